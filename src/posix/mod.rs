//! Serial port implementation for POSIX-compliant operating systems.

pub use self::settings::TTYSettings;
pub use self::signal::{SigioDispatcher, SigioHandler};
pub use self::stream::SerialStream;
pub use self::tty::TTYPort;

mod device;
mod rx;
mod settings;
mod signal;
mod stream;
mod tty;
