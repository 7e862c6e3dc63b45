//! Transport over the modem's AT tty.
//!
//! Once the kernel's USB serial driver has bound the modem, its AT interface
//! shows up as a character device (`/dev/ttyUSB2`, `/dev/ttyACM0`, ...).
//! The line discipline is switched to raw so the modem's CR/LF framing and
//! the Ctrl-Z terminator pass through untouched; reads wait with `poll(2)` so
//! every read is bounded by the listener's timeout.
//!
//! [`Transport::close`] releases the descriptor; later reads and writes fail
//! with [`TransportError::Closed`]. A read already waiting in `poll` keeps its
//! own handle until it returns.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use atmodem_core::error::TransportError;
use atmodem_core::transport::Transport;
use bytes::Bytes;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 512;

pub struct TtyTransport {
    file: Mutex<Option<Arc<File>>>,
    path: PathBuf,
}

impl TtyTransport {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)?;

        match set_raw(file.as_raw_fd()) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::ENOTTY) => {
                warn!(path = %path.display(), "not a terminal, using as plain file");
            }
            Err(e) => return Err(e),
        }

        info!(path = %path.display(), "AT port opened");
        Ok(Self {
            file: Mutex::new(Some(Arc::new(file))),
            path: path.to_path_buf(),
        })
    }

    /// Handle for one operation; the lock is not held across I/O.
    fn handle(&self) -> Result<Arc<File>, TransportError> {
        self.file
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(TransportError::Closed)
    }
}

impl Transport for TtyTransport {
    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let handle = self.handle()?;
        let mut file = &*handle;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }

    fn read(&self, timeout: Duration) -> Result<Bytes, TransportError> {
        let handle = self.handle()?;
        if !wait_readable(handle.as_raw_fd(), timeout)? {
            return Err(TransportError::Timeout);
        }

        let mut buf = [0u8; READ_CHUNK];
        let mut file = &*handle;
        match file.read(&mut buf) {
            // Raw mode with VMIN=0 may report readiness with nothing queued.
            Ok(0) => Err(TransportError::Timeout),
            Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(TransportError::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        let released = self.file.lock().unwrap_or_else(|e| e.into_inner()).take();
        if released.is_some() {
            debug!(path = %self.path.display(), "AT port closed");
        }
    }
}

/// `poll(2)` for input. `Ok(false)` on timeout or signal interruption.
fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    // SAFETY: `pfd` is a valid pollfd for the duration of the call and the
    // count matches.
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if ret == 0 {
        return Ok(false);
    }
    let hangup = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
    if pfd.revents & libc::POLLIN == 0 && pfd.revents & hangup != 0 {
        return Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            format!("device hung up (revents {:#x})", pfd.revents),
        ));
    }
    Ok(true)
}

/// Raw 8-bit mode, non-blocking reads (readiness comes from `poll`).
fn set_raw(fd: RawFd) -> io::Result<()> {
    // SAFETY: termios is plain data; tcgetattr fully initializes it before
    // it is read, and the fd stays open for both calls.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 0;
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
