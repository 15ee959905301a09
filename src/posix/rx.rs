use std::collections::VecDeque;
use std::os::unix::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::device;
use super::signal::SigioHandler;

/// Receive buffer shared between a port's reader and its SIGIO collector.
///
/// The primary queue holds bytes in arrival order and is the only state the
/// reader touches. The shadow queue is the collector's overflow path: when
/// the reader holds the queue lock at delivery time, freshly arrived bytes
/// are staged there instead, so the dispatch thread never blocks on a lock.
/// The shadow queue is always drained into the primary queue before any new
/// bytes are appended, preserving the overall arrival order.
pub(crate) struct RxBuffer {
    queue: Mutex<VecDeque<u8>>,
    shadow: Mutex<VecDeque<u8>>,
    available: AtomicBool,
}

impl RxBuffer {
    pub fn new() -> Self {
        RxBuffer {
            queue: Mutex::new(VecDeque::new()),
            shadow: Mutex::new(VecDeque::new()),
            available: AtomicBool::new(false),
        }
    }

    /// Discards buffered bytes from a previous open.
    pub fn reset(&self) {
        self.queue.lock().clear();
        self.shadow.lock().clear();
        self.available.store(false, Ordering::SeqCst);
    }

    /// Whether unread bytes are queued. Mirrors queue non-emptiness without
    /// taking the lock.
    pub fn is_data_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Removes and returns the oldest byte, if any. The lock is held only
    /// for the pop and flag update.
    pub fn pop(&self) -> Option<u8> {
        let mut queue = self.queue.lock();
        let byte = queue.pop_front();
        self.available.store(!queue.is_empty(), Ordering::SeqCst);
        byte
    }
}

/// Drains a descriptor into its port's `RxBuffer` on data-ready deliveries.
pub(crate) struct Collector {
    fd: RawFd,
    rx: Arc<RxBuffer>,
}

impl Collector {
    pub fn new(fd: RawFd, rx: Arc<RxBuffer>) -> Self {
        Collector { fd, rx }
    }
}

impl SigioHandler for Collector {
    fn data_ready(&self) {
        // Delivery errors are ignored: a failed FIONREAD means the
        // descriptor is on its way out and close() will handle it.
        let pending = match device::bytes_waiting(self.fd) {
            Ok(count) => count,
            Err(_) => return,
        };

        match self.rx.queue.try_lock() {
            Some(mut queue) => {
                {
                    let mut shadow = self.rx.shadow.lock();
                    while let Some(byte) = shadow.pop_front() {
                        queue.push_back(byte);
                    }
                }

                for _ in 0..pending {
                    match read_one(self.fd) {
                        Some(byte) => queue.push_back(byte),
                        None => break,
                    }
                }

                self.rx.available.store(!queue.is_empty(), Ordering::SeqCst);
                trace!(fd = self.fd, pending, queued = queue.len(), "collected rx bytes");
            }
            None => {
                // A reader holds the queue lock. Stage into the shadow
                // queue rather than stalling the dispatch thread; the next
                // locked delivery reconciles it.
                let mut shadow = self.rx.shadow.lock();
                for _ in 0..pending {
                    match read_one(self.fd) {
                        Some(byte) => shadow.push_back(byte),
                        None => break,
                    }
                }
            }
        }
    }
}

/// Reads a single byte. The caller knows how many bytes are waiting, so this
/// never blocks in practice.
fn read_one(fd: RawFd) -> Option<u8> {
    let mut byte = 0u8;
    let len = unsafe { libc::read(fd, &mut byte as *mut u8 as *mut libc::c_void, 1) };
    if len > 0 {
        Some(byte)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pipe {
        read_fd: RawFd,
        write_fd: RawFd,
    }

    impl Pipe {
        fn new() -> Self {
            let mut fds = [0; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            Pipe {
                read_fd: fds[0],
                write_fd: fds[1],
            }
        }

        fn feed(&self, data: &[u8]) {
            let len = unsafe {
                libc::write(
                    self.write_fd,
                    data.as_ptr() as *const libc::c_void,
                    data.len() as libc::size_t,
                )
            };
            assert_eq!(len as usize, data.len());
        }
    }

    impl Drop for Pipe {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.read_fd);
                libc::close(self.write_fd);
            }
        }
    }

    fn drain(rx: &RxBuffer) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let Some(byte) = rx.pop() {
            bytes.push(byte);
        }
        bytes
    }

    #[test]
    fn collects_in_arrival_order() {
        let pipe = Pipe::new();
        let rx = Arc::new(RxBuffer::new());
        let collector = Collector::new(pipe.read_fd, Arc::clone(&rx));

        pipe.feed(b"abc");
        collector.data_ready();
        pipe.feed(b"def");
        collector.data_ready();

        assert!(rx.is_data_available());
        assert_eq!(drain(&rx), b"abcdef");
        assert!(!rx.is_data_available());
    }

    #[test]
    fn contended_delivery_goes_to_shadow_queue() {
        let pipe = Pipe::new();
        let rx = Arc::new(RxBuffer::new());
        let collector = Collector::new(pipe.read_fd, Arc::clone(&rx));

        pipe.feed(b"12");
        collector.data_ready();

        // simulate a reader holding the queue lock mid-pop
        {
            let guard = rx.queue.lock();
            pipe.feed(b"34");
            collector.data_ready();
            assert_eq!(guard.len(), 2);
            assert_eq!(rx.shadow.lock().len(), 2);
        }

        // next uncontended delivery reconciles the shadow queue first
        pipe.feed(b"56");
        collector.data_ready();

        assert_eq!(drain(&rx), b"123456");
        assert!(rx.shadow.lock().is_empty());
    }

    #[test]
    fn delivery_without_pending_bytes_is_harmless() {
        let pipe = Pipe::new();
        let rx = Arc::new(RxBuffer::new());
        let collector = Collector::new(pipe.read_fd, Arc::clone(&rx));

        collector.data_ready();
        assert!(!rx.is_data_available());
        assert_eq!(device::bytes_waiting(pipe.read_fd).unwrap(), 0);
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn reset_discards_both_queues() {
        let pipe = Pipe::new();
        let rx = Arc::new(RxBuffer::new());
        let collector = Collector::new(pipe.read_fd, Arc::clone(&rx));

        pipe.feed(b"xy");
        collector.data_ready();

        {
            let _guard = rx.queue.lock();
            pipe.feed(b"z");
            collector.data_ready();
        }

        rx.reset();
        assert!(!rx.is_data_available());
        assert_eq!(rx.pop(), None);
        assert!(rx.shadow.lock().is_empty());
    }

    #[test]
    fn pop_keeps_flag_mirroring_queue() {
        let pipe = Pipe::new();
        let rx = Arc::new(RxBuffer::new());
        let collector = Collector::new(pipe.read_fd, Arc::clone(&rx));

        pipe.feed(b"ab");
        collector.data_ready();

        assert_eq!(rx.pop(), Some(b'a'));
        assert!(rx.is_data_available());
        assert_eq!(rx.pop(), Some(b'b'));
        assert!(!rx.is_data_available());
    }
}
