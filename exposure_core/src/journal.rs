//! Journal hand-off for finished sessions.
//!
//! Finished snapshots are appended to a JSONL (JSON Lines) file with file
//! locking so that concurrent CLI invocations never interleave lines.

use crate::{FinishedSnapshot, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Receiver of finished sessions
pub trait JournalSink: Send {
    fn record(&mut self, snapshot: &FinishedSnapshot) -> Result<()>;
}

/// JSONL-based journal with file locking
#[derive(Clone, Debug)]
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    /// Create a new journal for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl JournalSink for JsonlJournal {
    fn record(&mut self, snapshot: &FinishedSnapshot) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(snapshot)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        file.unlock()?;

        tracing::debug!("Journaled session {} ({:?})", snapshot.id, snapshot.end_reason);
        Ok(())
    }
}

/// Read all finished snapshots from a journal file
pub fn read_journal(path: &Path) -> Result<Vec<FinishedSnapshot>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut snapshots = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<FinishedSnapshot>(&line) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                tracing::warn!("Failed to parse journal entry at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} journal entries", snapshots.len());
    Ok(snapshots)
}
