use std::io;
use std::os::unix::prelude::*;
use std::path::Path;

use termios::{tcdrain, tcflush, Termios, TCIOFLUSH, TCSANOW};
use tracing::debug;

use super::device::Device;
use super::settings;
use crate::error::{Error, Result};
use crate::{BaudRate, CharSize, FlowControl, Parity, PortSettings, StopBits};

/// An unbuffered, blocking byte stream over a serial device.
///
/// `SerialStream` talks to the descriptor directly: reads and writes map to
/// single `read(2)`/`write(2)` calls, and nothing is queued in the
/// background. One byte of putback is kept so the next byte can be examined
/// without consuming it, which is all a character-stream front end needs
/// from an unbuffered source.
///
/// Configuration goes through the same attribute handling as [`TTYPort`]
/// and is likewise a read-modify-write against the live descriptor.
///
/// [`TTYPort`]: super::TTYPort
pub struct SerialStream {
    device: Option<Device>,
    putback: Option<u8>,
}

impl SerialStream {
    /// Opens the TTY device at `path` as a blocking byte stream.
    ///
    /// The device starts out in raw mode with the default settings
    /// (9600 8N1, no flow control) and VMIN=1/VTIME=0, so reads block until
    /// at least one byte arrives. Both kernel buffers are flushed first.
    ///
    /// ## Errors
    ///
    /// * `OpenFailed` wrapping the OS error text if any step fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let device = Device::open(path.as_ref()).map_err(Error::open_failed)?;
        let fd = device.as_raw_fd();

        tcflush(fd, TCIOFLUSH).map_err(Error::open_failed)?;

        let mut stream_settings =
            settings::TTYSettings::new(Termios::from_fd(fd).map_err(Error::open_failed)?);
        stream_settings.make_raw();
        stream_settings.set_vmin(1);
        stream_settings.set_vtime(0);
        termios::tcsetattr(fd, TCSANOW, stream_settings.inner()).map_err(Error::open_failed)?;

        let mut stream = SerialStream {
            device: Some(device),
            putback: None,
        };
        stream.configure(&PortSettings::default())?;

        // configuration is done; all further I/O blocks
        let device = stream.device()?;
        let flags = device.status_flags().map_err(Error::open_failed)?;
        device
            .set_status_flags(flags & !libc::O_NONBLOCK)
            .map_err(Error::open_failed)?;

        debug!(path = %path.as_ref().display(), fd, "serial stream opened");

        Ok(stream)
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn device(&self) -> Result<&Device> {
        self.device.as_ref().ok_or(Error::NotOpen)
    }

    fn fd(&self) -> Result<RawFd> {
        self.device().map(|device| device.as_raw_fd())
    }

    /// Closes the stream. Further operations fail with `NotOpen`.
    pub fn close(&mut self) -> Result<()> {
        let device = self.device.take().ok_or(Error::NotOpen)?;
        self.putback = None;
        drop(device);
        Ok(())
    }

    /// Applies a complete set of port settings, one attribute at a time.
    pub fn configure(&mut self, port_settings: &PortSettings) -> Result<()> {
        self.set_baud_rate(port_settings.baud_rate)?;
        self.set_char_size(port_settings.char_size)?;
        self.set_parity(port_settings.parity)?;
        self.set_stop_bits(port_settings.stop_bits)?;
        self.set_flow_control(port_settings.flow_control)?;
        Ok(())
    }

    fn read_settings(&self) -> Result<settings::TTYSettings> {
        settings::fetch(self.fd()?)
    }

    fn write_settings(&self, stream_settings: &settings::TTYSettings) -> Result<()> {
        settings::apply(self.fd()?, stream_settings)
    }

    pub fn baud_rate(&self) -> Result<Option<BaudRate>> {
        Ok(self.read_settings()?.baud_rate())
    }

    pub fn set_baud_rate(&mut self, baud_rate: BaudRate) -> Result<Option<BaudRate>> {
        let mut stream_settings = self.read_settings()?;
        stream_settings.set_baud_rate(baud_rate)?;
        self.write_settings(&stream_settings)
            .map_err(|err| match err {
                Error::Io(_) => Error::UnsupportedBaudRate,
                other => other,
            })?;
        self.baud_rate()
    }

    pub fn char_size(&self) -> Result<Option<CharSize>> {
        Ok(self.read_settings()?.char_size())
    }

    pub fn set_char_size(&mut self, char_size: CharSize) -> Result<Option<CharSize>> {
        let mut stream_settings = self.read_settings()?;
        stream_settings.set_char_size(char_size);
        self.write_settings(&stream_settings)?;
        self.char_size()
    }

    pub fn parity(&self) -> Result<Parity> {
        Ok(self.read_settings()?.parity())
    }

    pub fn set_parity(&mut self, parity: Parity) -> Result<Parity> {
        let mut stream_settings = self.read_settings()?;
        stream_settings.set_parity(parity);
        self.write_settings(&stream_settings)?;
        self.parity()
    }

    pub fn stop_bits(&self) -> Result<StopBits> {
        Ok(self.read_settings()?.stop_bits())
    }

    pub fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<StopBits> {
        let mut stream_settings = self.read_settings()?;
        stream_settings.set_stop_bits(stop_bits);
        self.write_settings(&stream_settings)?;
        self.stop_bits()
    }

    pub fn flow_control(&self) -> Result<Option<FlowControl>> {
        Ok(self.read_settings()?.flow_control())
    }

    pub fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<Option<FlowControl>> {
        let mut stream_settings = self.read_settings()?;
        stream_settings.set_flow_control(flow_control);
        self.write_settings(&stream_settings)?;
        self.flow_control()
    }

    /// Minimum number of bytes a blocking read waits for.
    pub fn vmin(&self) -> Result<u8> {
        Ok(self.read_settings()?.vmin())
    }

    pub fn set_vmin(&mut self, vmin: u8) -> Result<()> {
        let mut stream_settings = self.read_settings()?;
        stream_settings.set_vmin(vmin);
        self.write_settings(&stream_settings)
    }

    /// Read timeout in deciseconds, 0 meaning none.
    pub fn vtime(&self) -> Result<u8> {
        Ok(self.read_settings()?.vtime())
    }

    pub fn set_vtime(&mut self, vtime: u8) -> Result<()> {
        let mut stream_settings = self.read_settings()?;
        stream_settings.set_vtime(vtime);
        self.write_settings(&stream_settings)
    }

    /// Whether a byte can be read without blocking: 1 if so, 0 otherwise.
    ///
    /// When no putback byte is pending, this probes the descriptor with a
    /// momentarily non-blocking single-byte read; a byte obtained that way
    /// becomes the putback byte, so nothing is lost.
    pub fn bytes_available(&mut self) -> Result<usize> {
        if self.putback.is_some() {
            return Ok(1);
        }

        let device = self.device()?;
        let flags = device.status_flags()?;
        device.set_status_flags(flags | libc::O_NONBLOCK)?;

        let mut byte = [0u8; 1];
        let probe = device.read(&mut byte);

        device.set_status_flags(flags)?;

        match probe {
            Ok(1) => {
                self.putback = Some(byte[0]);
                Ok(1)
            }
            Ok(_) => Ok(0),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Returns the next byte without consuming it.
    ///
    /// Blocks until a byte is available. The byte read is retained as the
    /// putback byte, so repeated peeks return the same value.
    pub fn peek_byte(&mut self) -> Result<u8> {
        if let Some(byte) = self.putback {
            return Ok(byte);
        }

        let device = self.device()?;
        let mut byte = [0u8; 1];
        let len = device.read(&mut byte)?;
        if len == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "end of stream",
            )));
        }

        self.putback = Some(byte[0]);
        Ok(byte[0])
    }

    /// Returns the next byte, consuming it.
    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = self.peek_byte()?;
        self.putback = None;
        Ok(byte)
    }

    /// Pushes a byte back onto the stream so the next read returns it.
    ///
    /// ## Errors
    ///
    /// * `InvalidArgument` if a putback byte is already pending; only one
    ///   byte of putback is supported.
    pub fn unread_byte(&mut self, byte: u8) -> Result<()> {
        self.device()?;

        if self.putback.is_some() {
            return Err(Error::InvalidArgument("a putback byte is already pending"));
        }

        self.putback = Some(byte);
        Ok(())
    }
}

impl io::Read for SerialStream {
    /// Reads up to `buf.len()` bytes, serving a pending putback byte first
    /// and the rest from a single raw read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let device = self
            .device
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial stream is not open"))?;

        if let Some(byte) = self.putback.take() {
            buf[0] = byte;
            if buf.len() == 1 {
                return Ok(1);
            }

            match device.read(&mut buf[1..]) {
                Ok(len) => Ok(len + 1),
                Err(err) => {
                    // a failed call consumes nothing: keep the byte pending
                    self.putback = Some(byte);
                    Err(err)
                }
            }
        } else {
            device.read(buf)
        }
    }
}

impl io::Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial stream is not open"))?;

        device.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.fd() {
            Ok(fd) => tcdrain(fd),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial stream is not open",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_reports_os_error_text() {
        match SerialStream::open("/dev/this-stream-does-not-exist") {
            Err(Error::OpenFailed(message)) => assert!(!message.is_empty()),
            _ => panic!("expected OpenFailed"),
        }
    }
}
