use std::io;
use std::os::unix::prelude::*;
use std::sync::Arc;
use std::thread;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use signal_hook::iterator::Signals;
use tracing::debug;

/// A handler invoked from the dispatch thread whenever the OS reports that
/// data is ready on some descriptor.
///
/// SIGIO does not identify which descriptor became ready, so every attached
/// handler is invoked on every delivery and is expected to check its own
/// descriptor. Handlers must not block the dispatch thread.
pub trait SigioHandler: Send + Sync {
    fn data_ready(&self);
}

/// Fans SIGIO deliveries out to attached handlers.
///
/// One dispatcher drives any number of ports. `TTYPort` attaches itself at
/// open and detaches at close; a process-wide instance is created lazily for
/// ports that are not given their own dispatcher.
pub struct SigioDispatcher {
    handlers: Mutex<Vec<(RawFd, Arc<dyn SigioHandler>)>>,
    handle: signal_hook::iterator::Handle,
}

impl SigioDispatcher {
    /// Starts a dispatch thread listening for SIGIO.
    pub fn new() -> io::Result<Arc<Self>> {
        let mut signals = Signals::new([libc::SIGIO])?;
        let handle = signals.handle();

        let dispatcher = Arc::new(SigioDispatcher {
            handlers: Mutex::new(Vec::new()),
            handle,
        });

        let worker = Arc::downgrade(&dispatcher);
        thread::Builder::new()
            .name("sigio-dispatcher".into())
            .spawn(move || {
                for _ in signals.forever() {
                    let Some(dispatcher) = worker.upgrade() else {
                        break;
                    };

                    // Holding the registry lock across the fan-out means a
                    // returned detach() guarantees no further callbacks.
                    for (_, handler) in dispatcher.handlers.lock().iter() {
                        handler.data_ready();
                    }
                }
            })?;

        Ok(dispatcher)
    }

    /// Registers a handler for SIGIO deliveries, keyed by descriptor.
    pub fn attach(&self, fd: RawFd, handler: Arc<dyn SigioHandler>) {
        self.handlers.lock().push((fd, handler));
        debug!(fd, "attached SIGIO handler");
    }

    /// Removes the handler registered for `fd`. Once this returns, the
    /// handler will not be invoked again.
    pub fn detach(&self, fd: RawFd) {
        self.handlers.lock().retain(|(handler_fd, _)| *handler_fd != fd);
        debug!(fd, "detached SIGIO handler");
    }
}

impl Drop for SigioDispatcher {
    fn drop(&mut self) {
        self.handle.close();
    }
}

static DEFAULT_DISPATCHER: OnceCell<Arc<SigioDispatcher>> = OnceCell::new();

/// The process-wide dispatcher used by ports without an injected one.
pub(crate) fn default_dispatcher() -> io::Result<&'static Arc<SigioDispatcher>> {
    DEFAULT_DISPATCHER.get_or_try_init(SigioDispatcher::new)
}
