use std::ffi::CString;
use std::io;
use std::os::unix::prelude::*;
use std::path::Path;

use libc::{c_int, c_void, size_t};

use crate::ModemLine;

/// Owns the open descriptor for a tty device.
///
/// The descriptor is marked exclusive while owned and is released and closed
/// when the value is dropped, so a `Device` dropped halfway through an open
/// sequence leaves nothing allocated at the OS level.
#[derive(Debug)]
pub(crate) struct Device {
    fd: RawFd,
}

impl Device {
    /// Opens the device read-write, non-blocking, without becoming its
    /// controlling terminal.
    pub fn open(path: &Path) -> io::Result<Self> {
        let cstr = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "device path contains a NUL byte")
        })?;

        let fd = unsafe {
            libc::open(
                cstr.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK,
                0,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let device = Device { fd };

        // get exclusive access to the device
        ioctl::tiocexcl(device.fd)?;

        Ok(device)
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let len = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut c_void, buf.len() as size_t) };

        if len >= 0 {
            Ok(len as usize)
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let len = unsafe { libc::write(self.fd, buf.as_ptr() as *const c_void, buf.len() as size_t) };

        if len >= 0 {
            Ok(len as usize)
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn status_flags(&self) -> io::Result<c_int> {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(flags)
    }

    pub fn set_status_flags(&self, flags: c_int) -> io::Result<()> {
        if unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Directs the descriptor's asynchronous I/O signals to this process.
    pub fn set_signal_owner(&self) -> io::Result<()> {
        if unsafe { libc::fcntl(self.fd, libc::F_SETOWN, libc::getpid()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn set_pin(&self, pin: c_int, level: bool) -> io::Result<()> {
        if level {
            ioctl::tiocmbis(self.fd, pin)
        } else {
            ioctl::tiocmbic(self.fd, pin)
        }
    }

    pub fn read_pin(&self, pin: c_int) -> io::Result<bool> {
        ioctl::tiocmget(self.fd).map(|pins| pins & pin != 0)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = ioctl::tiocnxcl(self.fd);

        unsafe {
            libc::close(self.fd);
        }
    }
}

impl AsRawFd for Device {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

/// Number of bytes currently readable at the descriptor.
pub(crate) fn bytes_waiting(fd: RawFd) -> io::Result<usize> {
    let mut count: c_int = 0;
    if unsafe { libc::ioctl(fd, libc::FIONREAD, &mut count) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(count as usize)
}

impl ModemLine {
    pub(crate) fn mask(self) -> c_int {
        match self {
            ModemLine::Dtr => ioctl::TIOCM_DTR as c_int,
            ModemLine::Rts => ioctl::TIOCM_RTS as c_int,
            ModemLine::Cts => ioctl::TIOCM_CTS as c_int,
            ModemLine::Dsr => ioctl::TIOCM_DSR as c_int,
        }
    }

    /// CTS and DSR are driven by the peer and can only be read.
    pub(crate) fn is_settable(self) -> bool {
        matches!(self, ModemLine::Dtr | ModemLine::Rts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_path_with_nul() {
        let err = Device::open(Path::new("/dev/tty\0USB0")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn settable_lines() {
        assert!(ModemLine::Dtr.is_settable());
        assert!(ModemLine::Rts.is_settable());
        assert!(!ModemLine::Cts.is_settable());
        assert!(!ModemLine::Dsr.is_settable());
    }
}
