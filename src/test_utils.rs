use crate::gateway::{PublishError, Publisher};
use crate::offline::OfflineSink;
use crate::source::{Backend, LineResult, LineSource, SourceError};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;

/// A [`Publisher`] that records every publish in order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingPublisher {
    /// A publisher whose client rejects every message.
    pub fn failing() -> Self {
        RecordingPublisher {
            published: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Rejected("test client".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

/// An in-memory [`OfflineSink`]; each session is a list of records.
#[derive(Debug, Default)]
pub struct MemorySink {
    sessions: Vec<Vec<String>>,
    open: bool,
    closes: usize,
    /// Number of upcoming appends that fail
    fail_next: usize,
}

impl MemorySink {
    pub fn failing_next(count: usize) -> Self {
        MemorySink {
            fail_next: count,
            ..Default::default()
        }
    }

    pub fn sessions(&self) -> Vec<Vec<String>> {
        self.sessions.clone()
    }

    /// Number of `close()` calls, whether or not a session was open.
    pub fn closes(&self) -> usize {
        self.closes
    }
}

impl OfflineSink for MemorySink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(io::Error::other("disk full"));
        }
        if !self.open {
            self.sessions.push(Vec::new());
            self.open = true;
        }
        if let Some(session) = self.sessions.last_mut() {
            session.push(line.to_string());
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closes += 1;
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// A [`LineSource`] that replays a fixed list of results and then ends.
#[derive(Debug)]
pub struct FakeLineSource {
    results: Mutex<Vec<LineResult>>,
}

impl FakeLineSource {
    pub fn new(results: Vec<LineResult>) -> Self {
        Self {
            results: Mutex::new(results),
        }
    }

    pub fn lines(lines: &[&str]) -> Self {
        Self::new(lines.iter().map(|l| Ok(l.to_string())).collect())
    }
}

impl LineSource for FakeLineSource {
    fn open(
        &self,
        _backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<LineResult>, SourceError>> + Send + '_>>
    {
        let results = std::mem::take(&mut *self.results.lock().unwrap());
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<LineResult>(results.len().max(1));
            tokio::spawn(async move {
                for r in results {
                    let _ = tx.send(r).await;
                }
                // drop tx to close channel
            });
            Ok(rx)
        })
    }
}

/// Shared buffer for formatted log output.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
