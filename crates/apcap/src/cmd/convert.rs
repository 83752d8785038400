use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use apcap_decode::{convert, layout};
use tracing::{debug, info};

use crate::cmd::ConvertArgs;
use crate::exit::{decode_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_convert_summary, OutputFormat};

const PROGRESS_EVERY: u64 = 1000;

pub fn run(args: ConvertArgs, format: OutputFormat) -> CliResult<i32> {
    let output = args.output.clone().unwrap_or_else(|| default_output(&args.input));
    if output == args.input {
        return Err(CliError::new(
            USAGE,
            format!("output would overwrite the input: {}", output.display()),
        ));
    }

    let input = File::open(&args.input)
        .map_err(|err| io_error(&format!("failed opening {}", args.input.display()), err))?;
    let len = input
        .metadata()
        .map_err(|err| io_error(&format!("failed reading {}", args.input.display()), err))?
        .len();
    let (expected, trailing) = layout(len);
    info!(records = expected, trailing_bytes = trailing, "converting sniffer capture");

    let writer = File::create(&output)
        .map_err(|err| io_error(&format!("failed creating {}", output.display()), err))?;

    let summary = convert(BufReader::new(input), BufWriter::new(writer), |records| {
        if records % PROGRESS_EVERY == 0 {
            debug!(records, "packets parsed");
        }
    })
    .map_err(|err| decode_error("conversion failed", err))?;

    print_convert_summary(&summary, &args.input, &output, format);
    Ok(SUCCESS)
}

fn default_output(input: &Path) -> PathBuf {
    input.with_extension("csv")
}
