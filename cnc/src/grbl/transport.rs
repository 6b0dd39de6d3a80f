//! Line-oriented byte transport to the controller.
//!
//! The motion engine talks to the mill through two small traits:
//!
//! - [`Transport`] - an open duplex channel that can write bytes and read
//!   exactly one response line
//! - [`Connect`] - something that can open a [`Transport`] on demand, so the
//!   engine can defer opening the port until the first command
//!
//! [`SerialConnector`] is the production implementation. The simulated mill in
//! [`sim`](super::sim) implements both traits for tests.

use std::io::{self, BufRead, BufReader, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, trace};

use super::error::CncResult;

/// Wake-up sequence GRBL expects after the port opens.
const WAKE_SEQUENCE: &[u8] = b"\r\n\r\n";

/// Default time GRBL needs to reset and print its banner after the port opens.
pub const DEFAULT_WAKE_DELAY: Duration = Duration::from_secs(2);

/// Default blocking read timeout for a single response line.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Open duplex channel to the controller.
pub trait Transport {
    /// Write raw bytes and flush them to the device.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Block until one complete response line has been read.
    ///
    /// The returned string includes its line terminator if one was received.
    /// An error leaves the stream position undefined; callers should
    /// [`close`](Self::close) and reconnect rather than read again.
    fn read_line(&mut self) -> io::Result<String>;

    /// Release the channel. Further use after closing is an error.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Factory for a [`Transport`], invoked lazily on first use.
pub trait Connect {
    type Transport: Transport;

    fn connect(&self) -> CncResult<Self::Transport>;
}

/// Opens the serial port that the mill's controller is attached to.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    device: String,
    baud: u32,
    read_timeout: Duration,
    wake_delay: Duration,
}

impl SerialConnector {
    /// # Arguments
    ///
    /// * `device` - serial device path, e.g. `/dev/ttyACM0` or `COM3`
    /// * `baud` - baud rate, GRBL defaults to 115200
    pub fn new(device: impl Into<String>, baud: u32) -> Self {
        Self {
            device: device.into(),
            baud,
            read_timeout: DEFAULT_READ_TIMEOUT,
            wake_delay: DEFAULT_WAKE_DELAY,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_wake_delay(mut self, delay: Duration) -> Self {
        self.wake_delay = delay;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl Connect for SerialConnector {
    type Transport = SerialTransport;

    /// Open the port and wake the controller.
    ///
    /// Writes the wake-up sequence, waits for the controller to reset, then
    /// discards the start-up banner so the first response read belongs to the
    /// first command.
    fn connect(&self) -> CncResult<SerialTransport> {
        let mut port = serialport::new(&self.device, self.baud)
            .timeout(self.read_timeout)
            .open()?;
        debug!("Opened {} at {} baud", self.device, self.baud);

        port.write_all(WAKE_SEQUENCE)?;
        port.flush()?;
        std::thread::sleep(self.wake_delay);
        port.clear(ClearBuffer::Input)?;

        Ok(SerialTransport {
            reader: BufReader::new(port),
        })
    }
}

/// An open serial connection.
pub struct SerialTransport {
    reader: BufReader<Box<dyn SerialPort>>,
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.reader.get_mut();
        port.write_all(bytes)?;
        port.flush()
    }

    /// Read one response line.
    ///
    /// If the port's read timeout fires mid-line, the bytes already received
    /// are discarded with the error and the next read would start inside the
    /// late response. After a read timeout, close the link and reopen it
    /// before sending again.
    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial port closed while waiting for response",
            ));
        }
        trace!("Serial recv: {:?}", line);
        Ok(line)
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader.get_mut().flush()?;
        debug!("Closed serial port");
        Ok(())
    }
}
