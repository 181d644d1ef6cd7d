//! Append-only journal storage.

use crate::messages::JournalMessage;
use crate::reducer::ReduceError;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the journal file inside a deployment directory.
pub const JOURNAL_FILE: &str = "journal.jsonl";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt journal at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode journal message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("journal cannot be replayed: {0}")]
    Replay(#[from] ReduceError),
    #[error("corrupt snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable, ordered storage of journal messages.
///
/// A message must be durable once `record` returns.
pub trait Journal: Send {
    /// Appends one message.
    fn record(&mut self, message: &JournalMessage) -> Result<(), JournalError>;

    /// Returns every stored message in append order.
    fn read(&self) -> Result<Vec<JournalMessage>, JournalError>;
}

/// Journal kept in memory, for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryJournal {
    messages: Vec<JournalMessage>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[JournalMessage] {
        &self.messages
    }
}

impl Journal for MemoryJournal {
    fn record(&mut self, message: &JournalMessage) -> Result<(), JournalError> {
        self.messages.push(message.clone());
        Ok(())
    }

    fn read(&self) -> Result<Vec<JournalMessage>, JournalError> {
        Ok(self.messages.clone())
    }
}

/// Journal stored as one JSON message per line, synced on every append.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    /// Opens the journal inside `dir`, creating the directory if needed.
    ///
    /// A final line left incomplete by a crash is cut off so that new
    /// messages start on a fresh line.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, JournalError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);
        let journal = Self { path };
        journal.truncate_partial_line()?;
        Ok(journal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn truncate_partial_line(&self) -> Result<(), JournalError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if contents.is_empty() || contents.ends_with(b"\n") {
            return Ok(());
        }
        let keep = contents
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        warn!(
            path = %self.path.display(),
            dropped_bytes = contents.len() - keep,
            "Dropping incomplete final journal line"
        );
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(keep as u64)?;
        file.sync_all()?;
        Ok(())
    }
}

impl Journal for FileJournal {
    fn record(&mut self, message: &JournalMessage) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(message).map_err(JournalError::Encode)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.sync_data()?;
        debug!(future_id = ?message.future_id(), "Recorded journal message");
        Ok(())
    }

    fn read(&self) -> Result<Vec<JournalMessage>, JournalError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let lines = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()?;
        let last = lines.len();

        let mut messages = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(message) => messages.push(message),
                // A torn write can only affect the final line.
                Err(err) if index + 1 == last && err.is_eof() => {
                    warn!(line = index + 1, "Ignoring truncated final journal line");
                }
                Err(source) => {
                    return Err(JournalError::Corrupt {
                        line: index + 1,
                        source,
                    });
                }
            }
        }
        Ok(messages)
    }
}
