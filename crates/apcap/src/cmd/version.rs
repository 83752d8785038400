use apcap_decode::PSD_RECORD_LEN;
use apcap_frame::MAX_FRAME_LEN;
use apcap_transport::DEFAULT_BAUD_RATE;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("apcap {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: apcap");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("APCAP_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("serial_backend: {}", if cfg!(unix) { "termios" } else { "none" });
    println!("default_baud: {DEFAULT_BAUD_RATE}");
    println!("max_frame_len: {MAX_FRAME_LEN}");
    println!("psd_record_len: {PSD_RECORD_LEN}");

    Ok(SUCCESS)
}
