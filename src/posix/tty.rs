use std::io;
use std::os::unix::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use termios::{tcflush, Termios, TCIFLUSH, TCSANOW};
use tracing::{debug, warn};

use super::device::Device;
use super::rx::{Collector, RxBuffer};
use super::settings;
use super::signal::{self, SigioDispatcher};
use crate::error::{Error, Result};
use crate::{BaudRate, CharSize, FlowControl, ModemLine, Parity, PortSettings, StopBits};

/// How long the reader sleeps between queue polls. Small relative to any
/// realistic serial timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A handle-style serial port.
///
/// The handle is constructed closed; [`open`](TTYPort::open) and
/// [`close`](TTYPort::close) drive the lifecycle explicitly, and the port is
/// closed on drop if still open.
///
/// While open, the port's descriptor delivers SIGIO on incoming data and a
/// background collector drains it into a receive queue. The `read_*` methods
/// consume that queue under caller-specified deadlines; they never issue a
/// blocking read against the descriptor itself.
///
/// Configuration is always a read-modify-write against the live descriptor.
/// No attribute state is cached: every getter fetches from the device, and
/// every setter re-reads and returns what the device actually accepted.
pub struct TTYPort {
    path: PathBuf,
    device: Option<Device>,
    saved_settings: Option<Termios>,
    rx: Arc<RxBuffer>,
    dispatcher: Option<Arc<SigioDispatcher>>,
}

impl TTYPort {
    /// Creates a closed handle for the TTY device at `path`, e.g.,
    /// `/dev/ttyS0`. The process-wide SIGIO dispatcher is used.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        TTYPort {
            path: path.as_ref().to_path_buf(),
            device: None,
            saved_settings: None,
            rx: Arc::new(RxBuffer::new()),
            dispatcher: None,
        }
    }

    /// Creates a closed handle using the given dispatcher for data-ready
    /// notifications instead of the process-wide one.
    pub fn with_dispatcher<P: AsRef<Path>>(path: P, dispatcher: Arc<SigioDispatcher>) -> Self {
        TTYPort {
            path: path.as_ref().to_path_buf(),
            device: None,
            saved_settings: None,
            rx: Arc::new(RxBuffer::new()),
            dispatcher: Some(dispatcher),
        }
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

    /// Opens the device.
    ///
    /// The descriptor is opened read-write and non-blocking without becoming
    /// the controlling terminal, registered for SIGIO delivery to this
    /// process, and switched to raw mode with VMIN/VTIME zeroed after the
    /// current attributes are saved for restoration at close. The kernel
    /// input buffer is flushed so only bytes arriving from now on are seen.
    ///
    /// ## Errors
    ///
    /// * `AlreadyOpen` if the port is already open.
    /// * `OpenFailed` wrapping the OS error text if any step fails. The
    ///   descriptor is closed again in that case; a failed open leaves
    ///   nothing allocated.
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let dispatcher = match &self.dispatcher {
            Some(dispatcher) => Arc::clone(dispatcher),
            None => Arc::clone(signal::default_dispatcher().map_err(Error::open_failed)?),
        };

        let device = Device::open(&self.path).map_err(Error::open_failed)?;
        let fd = device.as_raw_fd();

        self.rx.reset();
        dispatcher.attach(fd, Arc::new(Collector::new(fd, Arc::clone(&self.rx))));

        // Dropping `device` on failure closes the descriptor, so only the
        // dispatcher registration needs explicit cleanup from here on.
        let saved = match Self::init_descriptor(&device) {
            Ok(saved) => saved,
            Err(err) => {
                dispatcher.detach(fd);
                return Err(err);
            }
        };

        debug!(path = %self.path.display(), fd, "serial port opened");

        self.saved_settings = Some(saved);
        self.device = Some(device);
        self.dispatcher = Some(dispatcher);

        Ok(())
    }

    fn init_descriptor(device: &Device) -> Result<Termios> {
        device.set_signal_owner().map_err(Error::open_failed)?;
        device
            .set_status_flags(libc::O_ASYNC)
            .map_err(Error::open_failed)?;

        let fd = device.as_raw_fd();
        let saved = Termios::from_fd(fd).map_err(Error::open_failed)?;

        let mut port_settings = settings::TTYSettings::new(saved);
        port_settings.make_raw();

        tcflush(fd, TCIFLUSH).map_err(Error::open_failed)?;
        termios::tcsetattr(fd, TCSANOW, port_settings.inner()).map_err(Error::open_failed)?;

        Ok(saved)
    }

    /// Closes the device.
    ///
    /// The SIGIO handler is detached first, so no collection happens once
    /// this runs. The attributes saved at open are restored best-effort: a
    /// restore failure is logged, not surfaced, and the descriptor is closed
    /// regardless.
    ///
    /// ## Errors
    ///
    /// * `NotOpen` if the port is not open.
    pub fn close(&mut self) -> Result<()> {
        let device = self.device.take().ok_or(Error::NotOpen)?;
        let fd = device.as_raw_fd();

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.detach(fd);
        }

        if let Some(saved) = self.saved_settings.take() {
            if let Err(err) = termios::tcsetattr(fd, TCSANOW, &saved) {
                warn!(fd, error = %err, "could not restore saved terminal attributes");
            }
        }

        drop(device);
        debug!(path = %self.path.display(), "serial port closed");

        Ok(())
    }

    /// Whether unread bytes are waiting in the receive queue.
    pub fn is_data_available(&self) -> Result<bool> {
        self.device()?;
        Ok(self.rx.is_data_available())
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

    fn write_settings(&self, port_settings: &settings::TTYSettings) -> Result<()> {
        settings::apply(self.fd()?, port_settings)
    }

    /// Returns the configured baud rate, `None` when the device reports
    /// mismatched input and output speeds.
    pub fn baud_rate(&self) -> Result<Option<BaudRate>> {
        Ok(self.read_settings()?.baud_rate())
    }

    /// Sets the baud rate for both input and output, returning the rate the
    /// device reports afterwards.
    pub fn set_baud_rate(&mut self, baud_rate: BaudRate) -> Result<Option<BaudRate>> {
        let mut port_settings = self.read_settings()?;
        port_settings.set_baud_rate(baud_rate)?;
        self.write_settings(&port_settings)
            .map_err(|err| match err {
                Error::Io(_) => Error::UnsupportedBaudRate,
                other => other,
            })?;
        self.baud_rate()
    }

    pub fn char_size(&self) -> Result<Option<CharSize>> {
        Ok(self.read_settings()?.char_size())
    }

    /// Sets the character size, returning the size the device reports
    /// afterwards. Sizes below 8 bits also enable input stripping of the
    /// high-order bits; 8 bits disables it.
    pub fn set_char_size(&mut self, char_size: CharSize) -> Result<Option<CharSize>> {
        let mut port_settings = self.read_settings()?;
        port_settings.set_char_size(char_size);
        self.write_settings(&port_settings)?;
        self.char_size()
    }

    pub fn parity(&self) -> Result<Parity> {
        Ok(self.read_settings()?.parity())
    }

    pub fn set_parity(&mut self, parity: Parity) -> Result<Parity> {
        let mut port_settings = self.read_settings()?;
        port_settings.set_parity(parity);
        self.write_settings(&port_settings)?;
        self.parity()
    }

    pub fn stop_bits(&self) -> Result<StopBits> {
        Ok(self.read_settings()?.stop_bits())
    }

    pub fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<StopBits> {
        let mut port_settings = self.read_settings()?;
        port_settings.set_stop_bits(stop_bits);
        self.write_settings(&port_settings)?;
        self.stop_bits()
    }

    /// Returns the flow control mode, `None` when the device carries a
    /// combination this library does not express.
    pub fn flow_control(&self) -> Result<Option<FlowControl>> {
        Ok(self.read_settings()?.flow_control())
    }

    pub fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<Option<FlowControl>> {
        let mut port_settings = self.read_settings()?;
        port_settings.set_flow_control(flow_control);
        self.write_settings(&port_settings)?;
        self.flow_control()
    }

    /// Reads a single byte from the receive queue.
    ///
    /// Blocks by polling the queue at a short interval until a byte is
    /// available. With `timeout` of `None` the wait is unbounded; otherwise
    /// `ReadTimeout` is returned once strictly more than the timeout has
    /// elapsed without data.
    pub fn read_byte(&mut self, timeout: Option<Duration>) -> Result<u8> {
        self.device()?;

        let entry = Instant::now();
        loop {
            if let Some(byte) = self.rx.pop() {
                return Ok(byte);
            }

            if let Some(limit) = timeout {
                if entry.elapsed() > limit {
                    return Err(Error::ReadTimeout);
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Reads `count` bytes, each under `timeout`.
    ///
    /// A `count` of zero drains whatever is currently available instead,
    /// returning as soon as the queue reports empty.
    pub fn read_bytes(&mut self, count: usize, timeout: Option<Duration>) -> Result<Vec<u8>> {
        self.device()?;

        if count == 0 {
            let mut data = Vec::new();
            while self.is_data_available()? {
                data.push(self.read_byte(timeout)?);
            }
            return Ok(data);
        }

        let mut data = Vec::with_capacity(count);
        for _ in 0..count {
            data.push(self.read_byte(timeout)?);
        }
        Ok(data)
    }

    /// Reads bytes until `terminator` is seen, returning everything read
    /// including the terminator.
    ///
    /// The overall deadline is re-checked against the entry time on every
    /// iteration, in addition to the per-byte timeout.
    pub fn read_line(&mut self, timeout: Option<Duration>, terminator: u8) -> Result<Vec<u8>> {
        self.device()?;

        let entry = Instant::now();
        let mut line = Vec::new();
        loop {
            if let Some(limit) = timeout {
                if entry.elapsed() > limit {
                    return Err(Error::ReadTimeout);
                }
            }

            let byte = self.read_byte(timeout)?;
            line.push(byte);

            if byte == terminator {
                return Ok(line);
            }
        }
    }

    /// Writes the whole buffer to the device.
    ///
    /// Retries silently when the OS reports the descriptor temporarily
    /// unavailable and keeps writing until every byte is accepted; there is
    /// no write timeout. Any other error is surfaced immediately.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let device = self.device()?;

        let mut written = 0;
        while written < data.len() {
            match device.write(&data[written..]) {
                Ok(len) => written += len,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }

    /// Sets the state of a modem control line. Only DTR and RTS can be
    /// driven; CTS and DSR are inputs.
    pub fn set_modem_line(&mut self, line: ModemLine, state: bool) -> Result<()> {
        let device = self.device()?;

        if !line.is_settable() {
            return Err(Error::InvalidArgument("modem line is read-only"));
        }

        device.set_pin(line.mask(), state)?;
        Ok(())
    }

    /// Reads the current state of a modem control line.
    pub fn modem_line(&self, line: ModemLine) -> Result<bool> {
        Ok(self.device()?.read_pin(line.mask())?)
    }

    pub fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.set_modem_line(ModemLine::Dtr, level)
    }

    pub fn dtr(&self) -> Result<bool> {
        self.modem_line(ModemLine::Dtr)
    }

    pub fn set_rts(&mut self, level: bool) -> Result<()> {
        self.set_modem_line(ModemLine::Rts, level)
    }

    pub fn rts(&self) -> Result<bool> {
        self.modem_line(ModemLine::Rts)
    }

    pub fn cts(&self) -> Result<bool> {
        self.modem_line(ModemLine::Cts)
    }

    pub fn dsr(&self) -> Result<bool> {
        self.modem_line(ModemLine::Dsr)
    }
}

impl Drop for TTYPort {
    fn drop(&mut self) {
        if self.is_open() {
            let _ = self.close();
        }
    }
}

impl AsRawFd for TTYPort {
    fn as_raw_fd(&self) -> RawFd {
        self.device.as_ref().map_or(-1, |device| device.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_require_open_port() {
        let mut port = TTYPort::new("/dev/null");

        assert!(!port.is_open());
        assert!(matches!(port.close(), Err(Error::NotOpen)));
        assert!(matches!(port.baud_rate(), Err(Error::NotOpen)));
        assert!(matches!(port.set_parity(Parity::ParityEven), Err(Error::NotOpen)));
        assert!(matches!(port.is_data_available(), Err(Error::NotOpen)));
        assert!(matches!(port.read_byte(None), Err(Error::NotOpen)));
        assert!(matches!(port.write(b"x"), Err(Error::NotOpen)));
        assert!(matches!(port.set_dtr(true), Err(Error::NotOpen)));
        assert!(matches!(port.cts(), Err(Error::NotOpen)));
    }

    #[test]
    fn open_reports_os_error_text() {
        let mut port = TTYPort::new("/dev/this-port-does-not-exist");

        match port.open() {
            Err(Error::OpenFailed(message)) => assert!(!message.is_empty()),
            other => panic!("expected OpenFailed, got {:?}", other.map(|_| ())),
        }
        assert!(!port.is_open());
    }
}
