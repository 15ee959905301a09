use std::os::unix::prelude::*;

use termios::os::target::{B115200, B230400, B57600, CRTSCTS};
use termios::{
    cfgetispeed, cfgetospeed, cfsetspeed, tcsetattr, Termios, B110, B1200, B134, B150, B1800,
    B19200, B200, B2400, B300, B38400, B4800, B50, B600, B75, B9600,
};
use termios::{CS5, CS6, CS7, CS8, CSIZE, CSTOPB, PARENB, PARODD};
use termios::{CLOCAL, CREAD, ECHO, ECHOE, ECHOK, ECHONL, ICANON, IEXTEN, ISIG};
use termios::{ICRNL, IGNBRK, IGNCR, IGNPAR, INLCR, INPCK, ISTRIP, IXOFF, IXON};
use termios::{TCSANOW, VMIN, VSTART, VSTOP, VTIME};

use crate::error::{Error, Result};
use crate::{BaudRate, CharSize, FlowControl, Parity, StopBits};

/// Control code transmitted to restart output (^Q).
const XON_CHAR: u8 = 0x11;

/// Control code transmitted to suspend output (^S).
const XOFF_CHAR: u8 = 0x13;

/// Disables a control character slot.
const CHAR_DISABLED: u8 = 0;

/// A snapshot of a tty device's attribute descriptor.
///
/// `TTYSettings` is a pure mapping between the semantic settings and the
/// termios bit patterns. It never talks to a descriptor itself; callers
/// fetch a fresh snapshot, modify it, and write it back, so the device is
/// always the source of truth.
#[derive(Debug, Copy, Clone)]
pub struct TTYSettings {
    termios: Termios,
}

impl TTYSettings {
    pub(crate) fn new(termios: Termios) -> Self {
        TTYSettings { termios }
    }

    pub(crate) fn inner(&self) -> &Termios {
        &self.termios
    }

    /// Reconfigures the snapshot for binary serial port access: receiver on,
    /// modem control lines ignored, and all line-discipline input, output,
    /// and echo processing off. VMIN and VTIME are zeroed so raw reads
    /// return only what is currently available.
    pub(crate) fn make_raw(&mut self) {
        self.termios.c_cflag |= CREAD | CLOCAL;
        self.termios.c_lflag &= !(ICANON | ECHO | ECHOE | ECHOK | ECHONL | ISIG | IEXTEN);
        self.termios.c_oflag &= !termios::OPOST;
        self.termios.c_iflag &= !(INLCR | IGNCR | ICRNL | IGNBRK);

        self.termios.c_cc[VMIN] = 0;
        self.termios.c_cc[VTIME] = 0;
    }

    /// Returns the configured baud rate, or `None` when the input and output
    /// speeds disagree or the stored speed is not a supported rate.
    pub fn baud_rate(&self) -> Option<BaudRate> {
        let ospeed = cfgetospeed(&self.termios);
        let ispeed = cfgetispeed(&self.termios);

        if ospeed != ispeed {
            return None;
        }

        match ospeed {
            B50 => Some(BaudRate::Baud50),
            B75 => Some(BaudRate::Baud75),
            B110 => Some(BaudRate::Baud110),
            B134 => Some(BaudRate::Baud134),
            B150 => Some(BaudRate::Baud150),
            B200 => Some(BaudRate::Baud200),
            B300 => Some(BaudRate::Baud300),
            B600 => Some(BaudRate::Baud600),
            B1200 => Some(BaudRate::Baud1200),
            B1800 => Some(BaudRate::Baud1800),
            B2400 => Some(BaudRate::Baud2400),
            B4800 => Some(BaudRate::Baud4800),
            B9600 => Some(BaudRate::Baud9600),
            B19200 => Some(BaudRate::Baud19200),
            B38400 => Some(BaudRate::Baud38400),
            B57600 => Some(BaudRate::Baud57600),
            B115200 => Some(BaudRate::Baud115200),
            B230400 => Some(BaudRate::Baud230400),

            _ => None,
        }
    }

    /// Sets the input and output speeds to the same rate.
    pub fn set_baud_rate(&mut self, baud_rate: BaudRate) -> Result<()> {
        let baud = match baud_rate {
            BaudRate::Baud50 => B50,
            BaudRate::Baud75 => B75,
            BaudRate::Baud110 => B110,
            BaudRate::Baud134 => B134,
            BaudRate::Baud150 => B150,
            BaudRate::Baud200 => B200,
            BaudRate::Baud300 => B300,
            BaudRate::Baud600 => B600,
            BaudRate::Baud1200 => B1200,
            BaudRate::Baud1800 => B1800,
            BaudRate::Baud2400 => B2400,
            BaudRate::Baud4800 => B4800,
            BaudRate::Baud9600 => B9600,
            BaudRate::Baud19200 => B19200,
            BaudRate::Baud38400 => B38400,
            BaudRate::Baud57600 => B57600,
            BaudRate::Baud115200 => B115200,
            BaudRate::Baud230400 => B230400,
        };

        cfsetspeed(&mut self.termios, baud).map_err(|_| Error::UnsupportedBaudRate)
    }

    pub fn char_size(&self) -> Option<CharSize> {
        match self.termios.c_cflag & CSIZE {
            CS8 => Some(CharSize::Bits8),
            CS7 => Some(CharSize::Bits7),
            CS6 => Some(CharSize::Bits6),
            CS5 => Some(CharSize::Bits5),

            _ => None,
        }
    }

    /// Sets the character size.
    ///
    /// With fewer than 8 data bits the high-order input bits carry
    /// unspecified values, so ISTRIP is set to zero them; with 8 data bits
    /// ISTRIP must be clear or the MSB of every byte would be lost.
    pub fn set_char_size(&mut self, char_size: CharSize) {
        let size = match char_size {
            CharSize::Bits5 => CS5,
            CharSize::Bits6 => CS6,
            CharSize::Bits7 => CS7,
            CharSize::Bits8 => CS8,
        };

        if char_size == CharSize::Bits8 {
            self.termios.c_iflag &= !ISTRIP;
        } else {
            self.termios.c_iflag |= ISTRIP;
        }

        self.termios.c_cflag &= !CSIZE;
        self.termios.c_cflag |= size;
    }

    /// Returns the parity mode. The PARENB bit is authoritative; PARODD is
    /// only consulted when parity is enabled.
    pub fn parity(&self) -> Parity {
        if self.termios.c_cflag & PARENB != 0 {
            if self.termios.c_cflag & PARODD != 0 {
                Parity::ParityOdd
            } else {
                Parity::ParityEven
            }
        } else {
            Parity::ParityNone
        }
    }

    pub fn set_parity(&mut self, parity: Parity) {
        match parity {
            Parity::ParityNone => {
                self.termios.c_cflag &= !(PARENB | PARODD);
                self.termios.c_iflag &= !INPCK;
                self.termios.c_iflag |= IGNPAR;
            }
            Parity::ParityOdd => {
                self.termios.c_cflag |= PARENB | PARODD;
                self.termios.c_iflag |= INPCK;
                self.termios.c_iflag &= !IGNPAR;
            }
            Parity::ParityEven => {
                self.termios.c_cflag &= !PARODD;
                self.termios.c_cflag |= PARENB;
                self.termios.c_iflag |= INPCK;
                self.termios.c_iflag &= !IGNPAR;
            }
        };
    }

    pub fn stop_bits(&self) -> StopBits {
        if self.termios.c_cflag & CSTOPB != 0 {
            StopBits::Stop2
        } else {
            StopBits::Stop1
        }
    }

    pub fn set_stop_bits(&mut self, stop_bits: StopBits) {
        match stop_bits {
            StopBits::Stop1 => self.termios.c_cflag &= !CSTOPB,
            StopBits::Stop2 => self.termios.c_cflag |= CSTOPB,
        };
    }

    /// Returns the flow control mode.
    ///
    /// Software flow control is reported only when both XON and XOFF are
    /// enabled and the control codes are the expected ^Q/^S pair. When
    /// neither is enabled the CRTSCTS bit decides between hardware gating
    /// and no flow control. Any other combination is an unsupported
    /// configuration and reports `None` rather than being coerced.
    pub fn flow_control(&self) -> Option<FlowControl> {
        let iflag = self.termios.c_iflag;

        if iflag & IXON != 0
            && iflag & IXOFF != 0
            && self.termios.c_cc[VSTART] == XON_CHAR
            && self.termios.c_cc[VSTOP] == XOFF_CHAR
        {
            Some(FlowControl::FlowSoftware)
        } else if iflag & (IXON | IXOFF) == 0 {
            if self.termios.c_cflag & CRTSCTS != 0 {
                Some(FlowControl::FlowHardware)
            } else {
                Some(FlowControl::FlowNone)
            }
        } else {
            None
        }
    }

    pub fn set_flow_control(&mut self, flow_control: FlowControl) {
        match flow_control {
            FlowControl::FlowNone => {
                self.termios.c_iflag &= !(IXON | IXOFF);
                self.termios.c_cflag &= !CRTSCTS;
            }
            FlowControl::FlowSoftware => {
                self.termios.c_iflag |= IXON | IXOFF;
                self.termios.c_cflag &= !CRTSCTS;
                self.termios.c_cc[VSTART] = XON_CHAR;
                self.termios.c_cc[VSTOP] = XOFF_CHAR;
            }
            FlowControl::FlowHardware => {
                self.termios.c_iflag &= !(IXON | IXOFF);
                self.termios.c_cflag |= CRTSCTS;
                self.termios.c_cc[VSTART] = CHAR_DISABLED;
                self.termios.c_cc[VSTOP] = CHAR_DISABLED;
            }
        };
    }

    /// Minimum number of characters for a non-canonical read.
    pub fn vmin(&self) -> u8 {
        self.termios.c_cc[VMIN]
    }

    pub fn set_vmin(&mut self, vmin: u8) {
        self.termios.c_cc[VMIN] = vmin;
    }

    /// Timeout in deciseconds for a non-canonical read.
    pub fn vtime(&self) -> u8 {
        self.termios.c_cc[VTIME]
    }

    pub fn set_vtime(&mut self, vtime: u8) {
        self.termios.c_cc[VTIME] = vtime;
    }
}

/// Fetches a fresh attribute snapshot from the descriptor.
pub(crate) fn fetch(fd: RawFd) -> Result<TTYSettings> {
    Ok(TTYSettings::new(Termios::from_fd(fd)?))
}

/// Writes a snapshot back to the descriptor.
pub(crate) fn apply(fd: RawFd, settings: &TTYSettings) -> Result<()> {
    tcsetattr(fd, TCSANOW, &settings.termios)?;
    Ok(())
}
