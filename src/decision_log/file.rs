//! File-backed decision log with fsync enforcement
//!
//! Layout: one append-only file per session under `<data_dir>/decisions/`,
//! named after the hex encoding of the session id. Each line is
//!
//! ```text
//! <crc32 of json, 8 hex digits> <json entry>\n
//! ```
//!
//! - Every append is followed by fsync before it is acknowledged
//! - Entries are never rewritten; purge removes the whole file
//! - Any checksum mismatch or malformed line halts the read
//!
//! The next sequence number of a session is recovered by scanning its file
//! the first time the session is appended to after open. Each session has
//! its own sequence slot, locked across that session's write and fsync;
//! appends to different sessions never wait on each other.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::checksum::{compute_checksum, verify_checksum};
use super::entry::{LogEntry, LogRecord};
use super::errors::{LogError, LogResult};
use super::DecisionLog;
use crate::protocol::TransactionId;

/// Durable decision log stored under a data directory.
#[derive(Debug)]
pub struct FileDecisionLog {
    dir: PathBuf,
    /// Next sequence number per session; `None` until the file is scanned.
    /// The map lock is only held to look a slot up.
    next_sequences: Mutex<HashMap<String, SequenceSlot>>,
}

type SequenceSlot = Arc<Mutex<Option<u64>>>;

fn lock_slot(slot: &SequenceSlot) -> MutexGuard<'_, Option<u64>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FileDecisionLog {
    /// Opens or creates the log under `<data_dir>/decisions`.
    ///
    /// # Errors
    ///
    /// Returns `TPC_LOG_APPEND_FAILED` if the directory cannot be created.
    pub fn open(data_dir: &Path) -> LogResult<Self> {
        let dir = data_dir.join("decisions");
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                LogError::append_failed(
                    format!("Failed to create decision log directory: {}", dir.display()),
                    e,
                )
            })?;
        }

        Ok(Self {
            dir,
            next_sequences: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the directory holding the session files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file backing a session.
    pub fn session_path(&self, session: &str) -> PathBuf {
        self.dir.join(format!("{}.log", encode_session(session)))
    }

    fn sequence_slot(&self, session: &str) -> SequenceSlot {
        self.next_sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session.to_string())
            .or_default()
            .clone()
    }

    fn read_session(&self, session: &str) -> LogResult<Vec<LogEntry>> {
        let path = self.session_path(session);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LogError::read_failed(
                    format!("Failed to open decision log: {}", path.display()),
                    e,
                ))
            }
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                LogError::read_failed(
                    format!("Failed to read decision log: {}", path.display()),
                    e,
                )
            })?;
            if line.is_empty() {
                continue;
            }
            entries.push(decode_line(session, index + 1, &line)?);
        }

        Ok(entries)
    }

    fn sync_dir(&self) -> LogResult<()> {
        let dir_handle = OpenOptions::new().read(true).open(&self.dir).map_err(|e| {
            LogError::append_failed(
                format!("Failed to open decision log directory for fsync: {}", self.dir.display()),
                e,
            )
        })?;
        dir_handle.sync_all().map_err(|e| {
            LogError::fsync_failed(
                format!("Failed to fsync decision log directory: {}", self.dir.display()),
                e,
            )
        })
    }
}

impl DecisionLog for FileDecisionLog {
    fn append(
        &self,
        session: &str,
        record: LogRecord,
        transaction_id: Option<TransactionId>,
    ) -> LogResult<LogEntry> {
        let slot = self.sequence_slot(session);
        let mut next_sequence = lock_slot(&slot);

        let sequence = match *next_sequence {
            Some(next) => next,
            None => self
                .read_session(session)?
                .last()
                .map(|e| e.sequence + 1)
                .unwrap_or(1),
        };

        let entry = LogEntry::new(sequence, record, transaction_id);
        let line = encode_line(&entry)?;

        let path = self.session_path(session);
        let created = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                LogError::append_failed(
                    format!("Failed to open decision log: {}", path.display()),
                    e,
                )
            })?;

        file.write_all(line.as_bytes()).map_err(|e| {
            LogError::append_failed(
                format!("Failed to write decision log entry at sequence {}", sequence),
                e,
            )
        })?;

        file.sync_all().map_err(|e| {
            LogError::fsync_failed(
                format!("fsync failed after decision log append at sequence {}", sequence),
                e,
            )
        })?;

        if created {
            self.sync_dir()?;
        }

        // Only advance after a durable write
        *next_sequence = Some(sequence + 1);

        Ok(entry)
    }

    fn entries(&self, session: &str) -> LogResult<Vec<LogEntry>> {
        self.read_session(session)
    }

    fn purge(&self, session: &str) -> LogResult<()> {
        let slot = self.sequence_slot(session);
        let mut next_sequence = lock_slot(&slot);

        let path = self.session_path(session);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LogError::append_failed(
                    format!("Failed to remove decision log: {}", path.display()),
                    e,
                ))
            }
        }
        *next_sequence = None;

        Ok(())
    }

    fn sessions(&self) -> LogResult<Vec<String>> {
        let read_dir = fs::read_dir(&self.dir).map_err(|e| {
            LogError::read_failed(
                format!("Failed to list decision log directory: {}", self.dir.display()),
                e,
            )
        })?;

        let mut sessions = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| {
                LogError::read_failed(
                    format!("Failed to list decision log directory: {}", self.dir.display()),
                    e,
                )
            })?;
            let file_name = dir_entry.file_name();
            let session = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(".log"))
                .and_then(decode_session);
            if let Some(session) = session {
                sessions.push(session);
            }
        }
        sessions.sort();

        Ok(sessions)
    }
}

/// Hex-encodes a session id so any string maps to a safe file name.
fn encode_session(session: &str) -> String {
    session.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// Inverse of [`encode_session`]; `None` for names it never produces.
fn decode_session(name: &str) -> Option<String> {
    if name.is_empty() || name.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(name.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

fn encode_line(entry: &LogEntry) -> LogResult<String> {
    let json = serde_json::to_string(entry).map_err(|e| {
        LogError::encode_failed(format!("Failed to encode decision log entry: {}", e))
    })?;
    Ok(format!("{:08x} {}\n", compute_checksum(json.as_bytes()), json))
}

fn decode_line(session: &str, line_no: usize, line: &str) -> LogResult<LogEntry> {
    let (checksum, json) = line
        .split_once(' ')
        .ok_or_else(|| LogError::corruption_at_line(session, line_no, "missing checksum prefix"))?;

    let expected = u32::from_str_radix(checksum, 16)
        .map_err(|_| LogError::corruption_at_line(session, line_no, "malformed checksum"))?;

    if !verify_checksum(json.as_bytes(), expected) {
        return Err(LogError::corruption_at_line(session, line_no, "checksum mismatch"));
    }

    serde_json::from_str(json).map_err(|e| {
        LogError::corruption_at_line(session, line_no, format!("malformed entry: {}", e))
    })
}
