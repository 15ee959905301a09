//! Serial (tty) device access for POSIX operating systems.
//!
//! Two complementary APIs are built on the same device and attribute
//! handling:
//!
//! * [`posix::TTYPort`] is a handle-style port. Incoming bytes are collected
//!   in the background whenever the OS raises `SIGIO` for the descriptor, and
//!   reads are served from that buffer with caller-specified deadlines.
//! * [`posix::SerialStream`] is an unbuffered byte stream implementing
//!   [`std::io::Read`] and [`std::io::Write`], with one byte of putback for
//!   peeking.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let mut port = serial_posix::open("/dev/ttyUSB0").unwrap();
//! port.set_baud_rate(serial_posix::Baud115200).unwrap();
//! port.write(b"AT\r\n").unwrap();
//! let reply = port.read_line(Some(Duration::from_millis(500)), b'\n').unwrap();
//! println!("{:?}", reply);
//! ```

use std::path::Path;

pub use crate::BaudRate::*;
pub use crate::CharSize::*;
pub use crate::FlowControl::*;
pub use crate::Parity::*;
pub use crate::StopBits::*;

pub use crate::error::{Error, Result};

mod error;

pub mod posix;

/// A convenience function for opening a serial port.
///
/// The argument should be a path to a TTY device file, e.g., `/dev/ttyUSB0`.
/// The returned port is open; configure it with
/// [`TTYPort::configure`](posix::TTYPort::configure) or the per-attribute
/// setters.
///
/// ```no_run
/// let port = serial_posix::open("/dev/ttyUSB0").unwrap();
/// ```
pub fn open<P: AsRef<Path>>(path: P) -> Result<posix::TTYPort> {
    let mut port = posix::TTYPort::new(path);
    port.open()?;
    Ok(port)
}

/// Serial port baud rates.
///
/// The supported rates are a closed set; arbitrary rates are not accepted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaudRate {
    /** 50 baud. */      Baud50,
    /** 75 baud. */      Baud75,
    /** 110 baud. */     Baud110,
    /** 134 baud. */     Baud134,
    /** 150 baud. */     Baud150,
    /** 200 baud. */     Baud200,
    /** 300 baud. */     Baud300,
    /** 600 baud. */     Baud600,
    /** 1200 baud. */    Baud1200,
    /** 1800 baud. */    Baud1800,
    /** 2400 baud. */    Baud2400,
    /** 4800 baud. */    Baud4800,
    /** 9600 baud. */    Baud9600,
    /** 19,200 baud. */  Baud19200,
    /** 38,400 baud. */  Baud38400,
    /** 57,600 baud. */  Baud57600,
    /** 115,200 baud. */ Baud115200,
    /** 230,400 baud. */ Baud230400,
}

/// Number of bits per character.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CharSize {
    /** 5 bits per character. */ Bits5,
    /** 6 bits per character. */ Bits6,
    /** 7 bits per character. */ Bits7,
    /** 8 bits per character. */ Bits8,
}

/// Parity checking modes.
///
/// When parity checking is enabled (`ParityOdd` or `ParityEven`) an extra bit
/// is transmitted with each character. The value of the parity bit is
/// arranged so that the number of 1 bits in the character (including the
/// parity bit) is an even number (`ParityEven`) or an odd number
/// (`ParityOdd`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    ParityNone,

    /// Parity bit sets odd number of 1 bits.
    ParityOdd,

    /// Parity bit sets even number of 1 bits.
    ParityEven,
}

/// Number of stop bits transmitted after every character.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit.
    Stop1,

    /// Two stop bits.
    Stop2,
}

/// Flow control modes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlowControl {
    /// No flow control.
    FlowNone,

    /// Flow control using XON/XOFF bytes.
    FlowSoftware,

    /// Flow control using RTS/CTS signals.
    FlowHardware,
}

/// Modem control lines.
///
/// DTR and RTS can be driven; CTS and DSR are inputs and can only be read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModemLine {
    /** Data Terminal Ready. */ Dtr,
    /** Request To Send. */     Rts,
    /** Clear To Send. */       Cts,
    /** Data Set Ready. */      Dsr,
}

/// A complete set of serial port configuration settings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PortSettings {
    /// Baud rate.
    pub baud_rate: BaudRate,

    /// Character size.
    pub char_size: CharSize,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Flow control mode.
    pub flow_control: FlowControl,
}

impl Default for PortSettings {
    fn default() -> Self {
        PortSettings {
            baud_rate: BaudRate::Baud9600,
            char_size: CharSize::Bits8,
            parity: Parity::ParityNone,
            stop_bits: StopBits::Stop1,
            flow_control: FlowControl::FlowNone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_settings_default_is_9600_8n1() {
        let settings = PortSettings::default();
        assert_eq!(settings.baud_rate, Baud9600);
        assert_eq!(settings.char_size, Bits8);
        assert_eq!(settings.parity, ParityNone);
        assert_eq!(settings.stop_bits, Stop1);
        assert_eq!(settings.flow_control, FlowNone);
    }
}
