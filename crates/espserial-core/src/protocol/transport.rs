//! Transport capability
//!
//! The session never touches a serial port directly. It consumes a
//! [`Transport`] (one open link) produced by a [`Connector`], so tests and
//! alternative links (USB CDC bridges, simulators) can be swapped in.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::serial::{list_ports, open_port};
use super::{ProtocolError, MAX_LINE_LENGTH};

/// One open, exclusively owned link to the device.
///
/// Dropping the transport closes it.
pub trait Transport: Send {
    /// Name of the port this link is open on
    fn port_name(&self) -> &str;

    /// Read one line including its terminator.
    ///
    /// Returns `Ok(None)` when the read timed out without a complete line.
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, ProtocolError>;

    /// Write all bytes
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Push buffered output to the device
    fn flush(&mut self) -> Result<(), ProtocolError>;
}

/// Opens transports by port name
pub trait Connector: Send {
    /// Open `port` at `baud_rate`; each read blocks at most `read_timeout`
    fn open(
        &mut self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn Transport>, ProtocolError>;

    /// Candidate ports used when none are configured
    fn discover(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Assembles newline-terminated lines from chunked reads.
///
/// Bytes after the last complete line are kept across read timeouts. A
/// partial line that reaches `max_line_length` is emitted as-is.
#[derive(Debug)]
pub struct LineAssembler {
    pending: Vec<u8>,
    max_line_length: usize,
}

impl LineAssembler {
    /// Assembler that force-emits partial lines once they are `max_line_length` long
    pub fn new(max_line_length: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_length: max_line_length.max(1),
        }
    }

    /// Append received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete (or over-long) line, terminator included
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            return Some(std::mem::replace(&mut self.pending, rest));
        }
        if self.pending.len() >= self.max_line_length {
            return Some(std::mem::take(&mut self.pending));
        }
        None
    }

    /// Bytes waiting for a terminator
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Read from `reader` until a line is available or a read times out.
    ///
    /// A read returning zero bytes means the device hung up.
    pub fn read_from<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut buffer = [0u8; 512];
        loop {
            if let Some(line) = self.next_line() {
                return Ok(Some(line));
            }
            match reader.read(&mut buffer) {
                Ok(0) => {
                    return Err(ProtocolError::ConnectionLost(
                        "port returned end of file".to_string(),
                    ))
                }
                Ok(n) => self.push(&buffer[..n]),
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

/// Serial port wrapper that assembles newline-terminated lines
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
    lines: LineAssembler,
}

impl SerialTransport {
    /// Wrap an already configured port
    pub fn new(name: impl Into<String>, port: Box<dyn SerialPort>) -> Self {
        Self {
            name: name.into(),
            port,
            lines: LineAssembler::default(),
        }
    }

    /// Emit partial lines once they reach `len` bytes
    pub fn with_max_line_length(mut self, len: usize) -> Self {
        self.lines = LineAssembler::new(len);
        self
    }
}

impl Transport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.lines.read_from(&mut self.port)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        Ok(self.port.write_all(data)?)
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        Ok(self.port.flush()?)
    }
}

/// Opens real serial ports through the `serialport` crate
#[derive(Debug, Clone)]
pub struct SerialConnector {
    max_line_length: usize,
}

impl SerialConnector {
    /// Connector whose transports emit partial lines at `max_line_length`
    pub fn new(max_line_length: usize) -> Self {
        Self { max_line_length }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

impl Connector for SerialConnector {
    fn open(
        &mut self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn Transport>, ProtocolError> {
        let handle = open_port(port, baud_rate, read_timeout)?;
        Ok(Box::new(
            SerialTransport::new(port, handle).with_max_line_length(self.max_line_length),
        ))
    }

    fn discover(&self) -> Vec<String> {
        list_ports().into_iter().map(|p| p.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    /// Reader that hands out scripted chunks; an exhausted script times out
    struct ChunkedReader {
        chunks: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ChunkedReader {
        fn new(chunks: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                chunks: chunks.into(),
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    fn timed_out() -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }

    #[test]
    fn test_line_split_across_timeout() {
        let mut reader = ChunkedReader::new(vec![
            Ok(b"I (31) boo".to_vec()),
            timed_out(),
            Ok(b"t: ready\r\n".to_vec()),
        ]);
        let mut lines = LineAssembler::default();

        assert_eq!(lines.read_from(&mut reader).unwrap(), None);
        assert_eq!(lines.buffered(), 10);
        assert_eq!(
            lines.read_from(&mut reader).unwrap(),
            Some(b"I (31) boot: ready\r\n".to_vec())
        );
        assert_eq!(lines.buffered(), 0);
    }

    #[test]
    fn test_two_lines_in_one_chunk() {
        let mut reader = ChunkedReader::new(vec![Ok(b"OK\r\nW low heap\r\nE pa".to_vec())]);
        let mut lines = LineAssembler::default();

        assert_eq!(lines.read_from(&mut reader).unwrap(), Some(b"OK\r\n".to_vec()));
        assert_eq!(
            lines.read_from(&mut reader).unwrap(),
            Some(b"W low heap\r\n".to_vec())
        );
        assert_eq!(lines.read_from(&mut reader).unwrap(), None);
        assert_eq!(lines.buffered(), 4);
    }

    #[test]
    fn test_overlong_line_emitted_at_limit() {
        let mut reader = ChunkedReader::new(vec![
            Ok(b"abcde".to_vec()),
            timed_out(),
            Ok(b"fghij".to_vec()),
            Ok(b"xy\n".to_vec()),
        ]);
        let mut lines = LineAssembler::new(8);

        // Below the limit the partial line is held
        assert_eq!(lines.read_from(&mut reader).unwrap(), None);
        assert_eq!(lines.buffered(), 5);

        assert_eq!(
            lines.read_from(&mut reader).unwrap(),
            Some(b"abcdefghij".to_vec())
        );
        assert_eq!(lines.read_from(&mut reader).unwrap(), Some(b"xy\n".to_vec()));
    }

    #[test]
    fn test_zero_byte_read_is_hang_up() {
        let mut reader = ChunkedReader::new(vec![Ok(b"partial".to_vec()), Ok(Vec::new())]);
        let mut lines = LineAssembler::default();

        let err = lines.read_from(&mut reader).unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionLost(_)));
    }

    #[test]
    fn test_read_error_propagates() {
        let mut reader = ChunkedReader::new(vec![Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "unplugged",
        ))]);
        let mut lines = LineAssembler::default();

        assert!(matches!(
            lines.read_from(&mut reader),
            Err(ProtocolError::IoError(_))
        ));
    }
}
