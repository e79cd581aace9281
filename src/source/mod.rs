//! Line sources feeding the bridge.
//!
//! A source owns the device stream, frames incoming bytes into text lines and
//! hands them to the pipeline over a channel. Framing is newline based: a
//! line split across several reads is reassembled, several lines in one read
//! are delivered separately.

#[cfg(feature = "serial")]
pub mod serial;

use bytes::{Buf, BytesMut};
use std::future::Future;
use std::io;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Channel buffer size for framed lines.
pub const LINE_CHANNEL_BUFFER_SIZE: usize = 100;

/// Longest accepted line in bytes; longer lines are discarded.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Error type for line sources.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The device could not be opened
    #[error("Failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },
    /// Read failure on an open device
    #[error("Device I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A framed line, or the fatal error that ended the stream.
pub type LineResult = Result<String, SourceError>;

/// Available line source backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// Serial device opened at the configured baud rate
    #[cfg(feature = "serial")]
    Serial,
    /// Standard input, for piped captures or simulators
    Stdin,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "serial")]
        return Backend::Serial;
        #[cfg(not(feature = "serial"))]
        return Backend::Stdin;
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "serial")]
            Backend::Serial => write!(f, "serial"),
            Backend::Stdin => write!(f, "stdin"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "serial")]
            "serial" | "tty" => Ok(Backend::Serial),
            "stdin" | "-" => Ok(Backend::Stdin),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Source abstraction so the pipeline can be tested without a device.
pub trait LineSource: Send + Sync {
    fn open(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<LineResult>, SourceError>> + Send + '_>>;
}

/// Real source for the configured device.
#[derive(Debug, Clone)]
pub struct DeviceSource {
    pub device: String,
    pub baud_rate: u32,
}

impl LineSource for DeviceSource {
    fn open(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<LineResult>, SourceError>> + Send + '_>>
    {
        Box::pin(async move {
            match backend {
                #[cfg(feature = "serial")]
                Backend::Serial => serial::open(&self.device, self.baud_rate),
                Backend::Stdin => Ok(spawn_line_reader(tokio::io::stdin())),
            }
        })
    }
}

/// Reassembles newline-terminated lines from arbitrary byte chunks.
///
/// Lines are trimmed and decoded lossily as UTF-8. Blank lines are skipped,
/// so an empty read never reaches the catch-all `otros` topic.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    max_len: usize,
    /// Dropping bytes until the next newline after an overlong line
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer::new(MAX_LINE_LENGTH)
    }
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        LineFramer {
            buffer: BytesMut::with_capacity(max_len.min(MAX_LINE_LENGTH)),
            max_len,
            discarding: false,
        }
    }

    /// Buffer to read new bytes into.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(end) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > self.max_len {
                    if !self.discarding {
                        warn!(max_len = self.max_len, "line too long, discarding");
                    }
                    self.discarding = true;
                    self.buffer.clear();
                }
                return None;
            };

            let raw = self.buffer.split_to(end + 1);
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if end > self.max_len {
                warn!(len = end, max_len = self.max_len, "line too long, discarding");
                continue;
            }
            if let Some(line) = to_line(&raw[..end]) {
                return Some(line);
            }
        }
    }

    /// Flush a trailing unterminated line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let discarding = std::mem::take(&mut self.discarding);
        let rest = self.buffer.split();
        if discarding || rest.len() > self.max_len {
            return None;
        }
        to_line(rest.chunk())
    }
}

fn to_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.trim();
    (!line.is_empty()).then(|| line.to_owned())
}

/// Frame `reader` into lines on a background task.
///
/// The channel closes at end of stream. A read error is sent as the last item.
pub fn spawn_line_reader<R>(mut reader: R) -> mpsc::Receiver<LineResult>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let mut framer = LineFramer::default();
        loop {
            match reader.read_buf(framer.buffer_mut()).await {
                Ok(0) => {
                    if let Some(line) = framer.finish() {
                        let _ = tx.send(Ok(line)).await;
                    }
                    debug!("line source reached end of stream");
                    break;
                }
                Ok(n) => {
                    debug!(bytes = n, "received chunk");
                    while let Some(line) = framer.next_line() {
                        if tx.send(Ok(line)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(SourceError::Io(e))).await;
                    break;
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    async fn collect(mut rx: mpsc::Receiver<LineResult>) -> Vec<LineResult> {
        let mut out = Vec::new();
        while let Some(r) = rx.recv().await {
            out.push(r);
        }
        out
    }

    fn ok_lines(results: Vec<LineResult>) -> Vec<String> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_framer_splits_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::default();
        framer.extend(b"first\nsecond\r\nthird");

        assert_eq!(framer.next_line().as_deref(), Some("first"));
        assert_eq!(framer.next_line().as_deref(), Some("second"));
        assert_eq!(framer.next_line(), None);
        assert_eq!(framer.finish().as_deref(), Some("third"));
    }

    #[test]
    fn test_framer_reassembles_across_chunks() {
        let mut framer = LineFramer::default();
        framer.extend(b"12,34,22.5,");
        assert_eq!(framer.next_line(), None);
        framer.extend(b"55,1,0101,0,12345\n");
        assert_eq!(
            framer.next_line().as_deref(),
            Some("12,34,22.5,55,1,0101,0,12345")
        );
    }

    #[test]
    fn test_framer_skips_blank_lines() {
        let mut framer = LineFramer::default();
        framer.extend(b"\n  \r\nvalue\n\n");
        assert_eq!(framer.next_line().as_deref(), Some("value"));
        assert_eq!(framer.next_line(), None);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_framer_replaces_invalid_utf8() {
        let mut framer = LineFramer::default();
        framer.extend(b"temp \xFF ok\n");
        assert_eq!(framer.next_line().as_deref(), Some("temp \u{FFFD} ok"));
    }

    #[test]
    fn test_framer_discards_overlong_complete_line() {
        let mut framer = LineFramer::new(8);
        framer.extend(b"0123456789abcdef\nshort\n");
        assert_eq!(framer.next_line().as_deref(), Some("short"));
    }

    #[test]
    fn test_framer_discards_overlong_partial_line_until_newline() {
        let mut framer = LineFramer::new(8);
        framer.extend(b"0123456789");
        assert_eq!(framer.next_line(), None);
        framer.extend(b"still the same line\nnext\n");
        assert_eq!(framer.next_line().as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn test_reader_reassembles_split_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"12,34,22.5,55,")
            .read(b"1,0101,0,12345\nhello")
            .read(b" world\n")
            .build();

        let lines = ok_lines(collect(spawn_line_reader(mock)).await);
        assert_eq!(lines, vec!["12,34,22.5,55,1,0101,0,12345", "hello world"]);
    }

    #[tokio::test]
    async fn test_reader_drops_blank_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\n")
            .read(b"a\n")
            .read(b"\r\n")
            .build();

        let lines = ok_lines(collect(spawn_line_reader(mock)).await);
        assert_eq!(lines, vec!["a"]);
    }

    #[tokio::test]
    async fn test_reader_flushes_partial_line_at_eof() {
        let mock = tokio_test::io::Builder::new()
            .read(b"one\ntrailing")
            .build();

        let lines = ok_lines(collect(spawn_line_reader(mock)).await);
        assert_eq!(lines, vec!["one", "trailing"]);
    }

    #[tokio::test]
    async fn test_reader_reports_io_error_last() {
        let mock = tokio_test::io::Builder::new()
            .read(b"before\n")
            .read_error(io::Error::other("device unplugged"))
            .build();

        let results = collect(spawn_line_reader(mock)).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "before");
        assert!(matches!(results[1], Err(SourceError::Io(_))));
    }

    #[test]
    fn test_source_error_display() {
        let err = SourceError::Open {
            device: "/dev/ttyUSB0".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
        };
        assert_eq!(
            format!("{}", err),
            "Failed to open /dev/ttyUSB0: no such device"
        );

        let err = SourceError::from(io::Error::other("device unplugged"));
        assert_eq!(format!("{}", err), "Device I/O error: device unplugged");
    }

    #[test]
    fn test_backend_from_str() {
        #[cfg(feature = "serial")]
        {
            assert_eq!(Backend::from_str("serial").unwrap(), Backend::Serial);
            assert_eq!(Backend::from_str("TTY").unwrap(), Backend::Serial);
        }
        assert_eq!(Backend::from_str("stdin").unwrap(), Backend::Stdin);
        assert_eq!(Backend::from_str("-").unwrap(), Backend::Stdin);
        assert!(Backend::from_str("bluetooth").is_err());
    }

    #[test]
    fn test_backend_display() {
        #[cfg(feature = "serial")]
        assert_eq!(format!("{}", Backend::Serial), "serial");
        assert_eq!(format!("{}", Backend::Stdin), "stdin");
    }
}
