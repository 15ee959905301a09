use std::io;

use thiserror::Error;

/// Errors reported by serial port operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation requires an open port.
    #[error("serial port is not open")]
    NotOpen,

    /// `open()` was called on a port that is already open.
    #[error("serial port is already open")]
    AlreadyOpen,

    /// A step of the open sequence failed. Carries the OS error text.
    #[error("could not open serial port: {0}")]
    OpenFailed(String),

    /// The requested baud rate was rejected by the OS.
    #[error("unsupported baud rate")]
    UnsupportedBaudRate,

    /// The read deadline elapsed before any data arrived.
    #[error("timed out waiting for incoming data")]
    ReadTimeout,

    /// An argument was outside the range the device can accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Any other I/O failure, wrapping the OS error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps an I/O error from the open sequence, preserving the OS error
    /// text the way `OpenFailed` reports it.
    pub(crate) fn open_failed(err: io::Error) -> Self {
        Error::OpenFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
