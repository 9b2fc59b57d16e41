//! Serial transport shared by the verdict output and product-code input channels.

pub mod input;
pub mod output;

use std::io::{self, Read, Write};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Result, StationError};

pub use input::{InputStats, LatestValue, ProductCodeReader, ReaderSettings};
pub use output::{OutputStats, RetryPolicy, SerialOutput};

/// An open connection to a serial device.
pub trait Link: Send {
    /// Write and flush the whole buffer.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Next complete line without its terminator, or `None` when no full line
    /// is available yet.
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Opens links on demand; called again after every disconnect.
pub trait Connector: Send {
    fn connect(&mut self) -> Result<Box<dyn Link>>;

    /// Human-readable endpoint name for logs.
    fn endpoint(&self) -> String;
}

/// Real serial port, opened through the `serialport` crate.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout,
        }
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self) -> Result<Box<dyn Link>> {
        let port = serialport::new(&self.port, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| StationError::SerialConnect {
                port: self.port.clone(),
                message: e.to_string(),
            })?;
        info!("connected to {} @ {} baud", self.port, self.baud_rate);
        Ok(Box::new(SerialLink::new(port)))
    }

    fn endpoint(&self) -> String {
        format!("{}@{}", self.port, self.baud_rate)
    }
}

pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
    pending: LineBuffer,
}

impl SerialLink {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            port,
            pending: LineBuffer::default(),
        }
    }
}

impl Link for SerialLink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        if let Some(line) = self.pending.next_line() {
            return Ok(Some(line));
        }

        let available = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        if available == 0 {
            return Ok(None);
        }

        let mut chunk = vec![0u8; available];
        let n = self.port.read(&mut chunk)?;
        self.pending.extend(&chunk[..n]);
        Ok(self.pending.next_line())
    }
}

/// Longest unterminated line kept while waiting for its `\n`.
pub const MAX_PENDING_LINE: usize = 4096;

/// Received bytes not yet split into lines. A tail that grows past `limit`
/// without a terminator is dropped.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(MAX_PENDING_LINE)
    }
}

impl LineBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let tail_start = self
            .pending
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |end| end + 1);
        let tail = self.pending.len() - tail_start;
        if tail > self.limit {
            warn!("dropping {} bytes received without a line terminator", tail);
            self.pending.truncate(tail_start);
        }
    }

    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        take_line(&mut self.pending)
    }
}

/// Split the first `\n`-terminated line off `buffer`, dropping the `\r\n`/`\n`.
pub fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=end).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

/// Text of a received line. Invalid UTF-8 is decoded lossily.
pub fn decode_line(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
