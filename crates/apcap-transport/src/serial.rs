use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::Transport;
use crate::DEFAULT_BAUD_RATE;

/// Serial line settings applied on open.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate. Must be one of the standard termios speeds.
    pub baud_rate: u32,
    /// Raise DTR and RTS after configuring the line. The access point firmware
    /// only transmits once the host signals it is present.
    pub assert_dtr_rts: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            assert_dtr_rts: true,
        }
    }
}

/// A tty device configured as a raw 8N1 line without flow control.
///
/// The descriptor is opened non-blocking; read and write timeouts are
/// implemented with `poll(2)` so each call is bounded.
pub struct SerialPort {
    file: File,
    path: PathBuf,
}

impl SerialPort {
    /// Open and configure the serial device at `path`.
    pub fn open(path: impl AsRef<Path>, config: &SerialConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = baud_constant(config.baud_rate)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        configure_line(&file, speed, config.assert_dtr_rts).map_err(|source| {
            TransportError::Configure {
                path: path.clone(),
                source,
            }
        })?;

        info!(?path, baud = config.baud_rate, "opened serial port");
        Ok(Self { file, path })
    }

    /// The device path this port was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush both queues and release the device.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    /// Wait until the descriptor is ready for `events` or `timeout` expires.
    fn wait_ready(&self, events: libc::c_short, timeout: Duration) -> Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        loop {
            // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of 1.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            if rc == 0 {
                return Ok(false);
            }
            if pfd.revents & libc::POLLNVAL != 0 {
                return Err(TransportError::Closed);
            }
            if pfd.revents & (libc::POLLHUP | libc::POLLERR) != 0 && pfd.revents & events == 0 {
                return Err(TransportError::Closed);
            }
            return Ok(true);
        }
    }
}

impl Transport for SerialPort {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.is_empty() || !self.wait_ready(libc::POLLIN, timeout)? {
            return Ok(0);
        }
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(0)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        if data.is_empty() || !self.wait_ready(libc::POLLOUT, timeout)? {
            return Ok(0);
        }
        match self.file.write(data) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        // SAFETY: the descriptor is owned by `self.file` and open.
        let rc = unsafe { libc::tcflush(self.file.as_raw_fd(), libc::TCIOFLUSH) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "serial"
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        debug!(path = ?self.path, "closing serial port");
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .finish()
    }
}

fn baud_constant(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        other => return Err(TransportError::UnsupportedBaud(other)),
    };
    Ok(speed)
}

fn configure_line(file: &File, speed: libc::speed_t, assert_dtr_rts: bool) -> std::io::Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: termios is plain old data; tcgetattr fully initializes it on success.
    let mut tty: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is an open descriptor and `tty` is a valid writable termios.
    if unsafe { libc::tcgetattr(fd, &mut tty) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `tty` was initialized by tcgetattr above.
    unsafe { libc::cfmakeraw(&mut tty) };
    tty.c_cflag |= libc::CLOCAL | libc::CREAD;
    tty.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::CRTSCTS);
    tty.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
    tty.c_cc[libc::VMIN] = 0;
    tty.c_cc[libc::VTIME] = 0;

    // SAFETY: `tty` is a valid termios and `speed` a termios speed constant.
    let rc = unsafe { libc::cfsetispeed(&mut tty, speed) | libc::cfsetospeed(&mut tty, speed) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `fd` is open and `tty` is fully initialized.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tty) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    if assert_dtr_rts {
        let bits: libc::c_int = libc::TIOCM_DTR | libc::TIOCM_RTS;
        // SAFETY: TIOCMBIS reads one c_int through the pointer we pass.
        let rc = unsafe { libc::ioctl(fd, libc::TIOCMBIS, &bits as *const libc::c_int) };
        if rc != 0 {
            // Pseudo-terminals and some adapters have no modem lines.
            debug!(error = %std::io::Error::last_os_error(), "could not raise DTR/RTS");
        }
    }

    // SAFETY: `fd` is open.
    if unsafe { libc::tcflush(fd, libc::TCIOFLUSH) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let path = std::env::temp_dir().join(format!("apcap-no-such-tty-{}", std::process::id()));
        let err = SerialPort::open(&path, &SerialConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[test]
    fn test_unsupported_baud() {
        let cfg = SerialConfig {
            baud_rate: 12_345,
            ..SerialConfig::default()
        };
        let err = SerialPort::open("/dev/null", &cfg).unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedBaud(12_345)));
    }

    #[test]
    fn test_regular_file_is_not_a_tty() {
        let dir = std::env::temp_dir().join(format!("apcap-notty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("plain");
        std::fs::write(&path, b"not a tty").unwrap();

        let err = SerialPort::open(&path, &SerialConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::Configure { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    fn open_pty_pair() -> (File, PathBuf) {
        use std::os::fd::FromRawFd;

        // SAFETY: standard posix_openpt/grantpt/unlockpt/ptsname_r sequence on a
        // descriptor we own; the name buffer outlives the ptsname_r call.
        unsafe {
            let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(master >= 0, "posix_openpt failed");
            assert_eq!(libc::grantpt(master), 0);
            assert_eq!(libc::unlockpt(master), 0);
            let mut name = [0 as libc::c_char; 128];
            assert_eq!(libc::ptsname_r(master, name.as_mut_ptr(), name.len()), 0);
            let slave = std::ffi::CStr::from_ptr(name.as_ptr())
                .to_string_lossy()
                .into_owned();
            (File::from_raw_fd(master), PathBuf::from(slave))
        }
    }

    #[cfg(target_os = "linux")]
    fn read_exactly(port: &mut SerialPort, want: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        for _ in 0..50 {
            let n = port.read(&mut buf, Duration::from_millis(20)).unwrap();
            out.extend_from_slice(&buf[..n]);
            if out.len() >= want {
                break;
            }
        }
        out
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pty_roundtrip() {
        let (mut master, slave_path) = open_pty_pair();
        let mut port = SerialPort::open(&slave_path, &SerialConfig::default()).unwrap();
        assert_eq!(port.path(), slave_path.as_path());

        master.write_all(&[0xFF, 0x06, 0x03]).unwrap();
        assert_eq!(read_exactly(&mut port, 3), vec![0xFF, 0x06, 0x03]);

        port.write_all(&[0xFF, 0x07, 0x03], Duration::from_millis(100))
            .unwrap();
        let mut got = [0u8; 3];
        master.read_exact(&mut got).unwrap();
        assert_eq!(got, [0xFF, 0x07, 0x03]);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pty_read_times_out_with_zero_bytes() {
        let (_master, slave_path) = open_pty_pair();
        let mut port = SerialPort::open(&slave_path, &SerialConfig::default()).unwrap();

        let started = std::time::Instant::now();
        let mut buf = [0u8; 8];
        let n = port.read(&mut buf, Duration::from_millis(30)).unwrap();
        assert_eq!(n, 0);
        assert!(started.elapsed() < Duration::from_secs(2));
        port.close().unwrap();
    }
}
