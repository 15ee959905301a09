//! Pseudo-terminal plumbing for the integration tests.
//!
//! Each test opens its own pty pair: the slave side is handed to the library
//! under test by path, while the master side stands in for the device on the
//! other end of the wire.

use std::ffi::CStr;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Once;
use std::time::{Duration, Instant};

static TRACING: Once = Once::new();

/// Installs a tracing subscriber honoring `RUST_LOG`, so diagnostic runs can
/// watch the dispatcher and collector at work.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct PtyLink {
    master: RawFd,
    slave_path: String,
}

impl PtyLink {
    pub fn open() -> io::Result<Self> {
        init_tracing();

        unsafe {
            let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            if master < 0 {
                return Err(io::Error::last_os_error());
            }

            if libc::grantpt(master) != 0 || libc::unlockpt(master) != 0 {
                let err = io::Error::last_os_error();
                libc::close(master);
                return Err(err);
            }

            let mut name = [0 as libc::c_char; 128];
            if libc::ptsname_r(master, name.as_mut_ptr(), name.len()) != 0 {
                let err = io::Error::last_os_error();
                libc::close(master);
                return Err(err);
            }

            let slave_path = CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned();

            Ok(PtyLink { master, slave_path })
        }
    }

    pub fn slave_path(&self) -> &str {
        &self.slave_path
    }

    /// Writes bytes at the far end of the link.
    pub fn feed(&self, data: &[u8]) {
        let mut written = 0;
        while written < data.len() {
            let len = unsafe {
                libc::write(
                    self.master,
                    data[written..].as_ptr() as *const libc::c_void,
                    (data.len() - written) as libc::size_t,
                )
            };
            assert!(
                len > 0,
                "write to pty master failed: {}",
                io::Error::last_os_error()
            );
            written += len as usize;
        }
    }

    /// Reads whatever arrives at the far end of the link, blocking until at
    /// least one byte is available.
    pub fn collect(&self, buf: &mut [u8]) -> usize {
        let len = unsafe {
            libc::read(
                self.master,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len() as libc::size_t,
            )
        };
        assert!(
            len >= 0,
            "read from pty master failed: {}",
            io::Error::last_os_error()
        );
        len as usize
    }

    /// Reads from the far end until `count` bytes have arrived.
    pub fn collect_exact(&self, count: usize) -> Vec<u8> {
        let mut data = vec![0u8; count];
        let mut filled = 0;
        while filled < count {
            filled += self.collect(&mut data[filled..]);
        }
        data
    }
}

impl Drop for PtyLink {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.master);
        }
    }
}

/// Spins until `ready` reports true, failing the test after two seconds.
pub fn wait_until<F: FnMut() -> bool>(what: &str, mut ready: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}
