use std::ffi::CString;
use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::ByteTransport;

/// Default bound on a single [`write`](ByteTransport::write).
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Line settings for a serial device.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Line speed in bits per second. Default: 115200.
    pub baud_rate: u32,
    /// How long a write may wait for the line to drain before failing with
    /// `ErrorKind::TimedOut`. Default: 1 s.
    pub write_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// POSIX serial port (UART, USB CDC, pseudo-terminal).
///
/// The device is opened non-blocking and put into raw 8N1 mode with no
/// software or hardware flow control, so reads return immediately with
/// whatever the driver has buffered.
pub struct SerialPort {
    path: PathBuf,
    config: SerialConfig,
    fd: Option<OwnedFd>,
}

impl SerialPort {
    /// Create a closed port for `path`.
    pub fn new(path: impl AsRef<Path>, config: SerialConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            fd: None,
        }
    }

    /// Create and open a port in one step.
    pub fn open_path(path: impl AsRef<Path>, config: SerialConfig) -> Result<Self> {
        let mut port = Self::new(path, config);
        port.open()?;
        Ok(port)
    }

    /// Device path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Line settings.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn raw_fd(&self) -> Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or(TransportError::NotOpen)
    }

    fn configure(&self, fd: RawFd) -> Result<()> {
        let speed = baud_to_speed(self.config.baud_rate)
            .ok_or(TransportError::UnsupportedBaudRate(self.config.baud_rate))?;
        let configure_err = |source: io::Error| TransportError::Configure {
            path: self.path.clone(),
            source,
        };

        // SAFETY: termios is a plain C struct; an all-zero value is valid and
        // is fully overwritten by tcgetattr below.
        let mut tty: libc::termios = unsafe { std::mem::zeroed() };

        // SAFETY: `fd` is an open descriptor owned by this port and `tty` is a
        // valid, writable termios.
        if unsafe { libc::tcgetattr(fd, &mut tty) } != 0 {
            return Err(configure_err(io::Error::last_os_error()));
        }

        // SAFETY: `tty` is a valid termios obtained from tcgetattr.
        unsafe { libc::cfmakeraw(&mut tty) };
        tty.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::PARODD | libc::CSTOPB | libc::CRTSCTS);
        tty.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
        tty.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY | libc::IGNBRK);
        tty.c_cc[libc::VMIN] = 0;
        tty.c_cc[libc::VTIME] = 0;

        // SAFETY: `tty` is a valid termios and `speed` is a termios speed constant.
        let rc = unsafe { libc::cfsetispeed(&mut tty, speed) | libc::cfsetospeed(&mut tty, speed) };
        if rc != 0 {
            return Err(configure_err(io::Error::last_os_error()));
        }

        // SAFETY: `fd` is open and `tty` is a fully initialised termios.
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tty) } != 0 {
            return Err(configure_err(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl ByteTransport for SerialPort {
    fn open(&mut self) -> Result<()> {
        if self.fd.is_some() {
            return Ok(());
        }

        let c_path = CString::new(self.path.as_os_str().as_bytes()).map_err(|_| {
            TransportError::Open {
                path: self.path.clone(),
                source: io::Error::new(ErrorKind::InvalidInput, "device path contains NUL"),
            }
        })?;

        // SAFETY: `c_path` is a valid NUL-terminated string for the duration of
        // the call.
        let raw = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if raw < 0 {
            return Err(TransportError::Open {
                path: self.path.clone(),
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: `raw` was just returned by open(2) and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        self.configure(fd.as_raw_fd())?;
        self.fd = Some(fd);

        info!(path = ?self.path, baud = self.config.baud_rate, "serial port opened");
        Ok(())
    }

    fn close(&mut self) {
        if self.fd.take().is_some() {
            debug!(path = ?self.path, "serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let fd = self.raw_fd()?;
        let deadline = Instant::now() + self.config.write_timeout;
        let mut offset = 0usize;
        while offset < data.len() {
            let remaining = &data[offset..];
            // SAFETY: `remaining` is a valid readable slice of the given length.
            let rc = unsafe { libc::write(fd, remaining.as_ptr().cast(), remaining.len()) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::WouldBlock => {
                        let time_left = deadline.saturating_duration_since(Instant::now());
                        if time_left.is_zero() {
                            warn!(
                                path = ?self.path,
                                written = offset,
                                total = data.len(),
                                "serial write timed out"
                            );
                            return Err(TransportError::Io(io::Error::new(
                                ErrorKind::TimedOut,
                                "serial line did not drain before the write timeout",
                            )));
                        }
                        wait_writable(fd, time_left)?;
                        continue;
                    }
                    _ => return Err(TransportError::Io(err)),
                }
            }
            if rc == 0 {
                return Err(TransportError::Io(io::Error::from(ErrorKind::WriteZero)));
            }
            offset += rc as usize;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let fd = self.raw_fd()?;
        // SAFETY: `buf` is a valid writable slice of the given length.
        let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                ErrorKind::WouldBlock | ErrorKind::Interrupted => Ok(0),
                _ => Err(TransportError::Io(err)),
            };
        }
        Ok(rc as usize)
    }

    fn try_clone(&self) -> Result<Self> {
        let fd = self
            .fd
            .as_ref()
            .ok_or(TransportError::NotOpen)?
            .try_clone()?;
        Ok(Self {
            path: self.path.clone(),
            config: self.config.clone(),
            fd: Some(fd),
        })
    }

    fn transport_name(&self) -> &'static str {
        "serial"
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .field("baud_rate", &self.config.baud_rate)
            .field("open", &self.fd.is_some())
            .finish()
    }
}

fn wait_writable(fd: RawFd, limit: Duration) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(limit.as_millis())
        .unwrap_or(libc::c_int::MAX)
        .max(1);
    // SAFETY: `pfd` is a valid pollfd for the duration of the call.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
    Ok(())
}

/// Map a numeric baud rate to its termios speed constant.
pub fn baud_to_speed(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460_800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921_600 => libc::B921600,
        _ => return None,
    };
    Some(speed)
}
