//! Offline message log.
//!
//! While the broker is unreachable, every message is appended to a session
//! file in the offline log directory. A session is opened lazily on the first
//! append and closed when the broker connection comes back; the next outage
//! starts a fresh file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Destination for messages that could not be published.
pub trait OfflineSink: Send {
    /// Append one record, opening a new session first if none is open.
    ///
    /// The record is durable when this returns `Ok`.
    fn append(&mut self, line: &str) -> io::Result<()>;

    /// Close the current session. Closing an already closed sink is a no-op.
    fn close(&mut self);

    /// Whether a session is currently open.
    fn is_open(&self) -> bool;
}

#[derive(Debug)]
struct Session {
    path: PathBuf,
    file: File,
}

/// File-backed [`OfflineSink`] writing `offline_{unix_millis}.txt` sessions.
///
/// The directory must exist before the first append.
#[derive(Debug)]
pub struct OfflineLog {
    dir: PathBuf,
    session: Option<Session>,
    /// Stamp of the most recently opened session, to keep names unique
    last_stamp: Option<i64>,
}

impl OfflineLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        OfflineLog {
            dir: dir.into(),
            session: None,
            last_stamp: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the open session file, if any.
    pub fn session_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    /// Next session stamp: wall-clock millis, bumped past the previous one if
    /// the clock has not moved on (or went backwards).
    fn next_stamp(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn open_session(&mut self) -> io::Result<Session> {
        let stamp = self.next_stamp();
        let path = self.dir.join(session_file_name(stamp));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "opened offline session");
        Ok(Session { path, file })
    }
}

/// File name of the session opened at `stamp` (unix millis).
pub fn session_file_name(stamp: i64) -> String {
    format!("offline_{stamp}.txt")
}

impl OfflineSink for OfflineLog {
    fn append(&mut self, line: &str) -> io::Result<()> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.open_session()?,
        };
        let session = self.session.insert(session);

        session.file.write_all(line.as_bytes())?;
        session.file.write_all(b"\n")?;
        session.file.flush()?;
        session.file.sync_data()
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(path = %session.path.display(), "closed offline session");
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}
