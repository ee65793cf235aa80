//! Running-session persistence with file locking.
//!
//! The active session lives in a single JSON file. Reads take a shared
//! lock, writes go through a locked temp file that is renamed over the
//! original, so a crash mid-write never leaves a torn record behind.
//!
//! Those locks cover one read or one write. A process that loads, mutates
//! and saves the session holds a [`SessionLock`] for the whole cycle.

use crate::gateway::PersistenceGateway;
use crate::{Error, ExposureSession, LegacyRecord, Result, StoredSession};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use uuid::Uuid;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// On-disk shape of the record. Dose fields are optional so that records
/// written before dose tracking still load.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    start_time: DateTime<Utc>,
    planned_end_time: DateTime<Utc>,
    current_uv_index: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accumulated_dose: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    burn_limit_dose: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_dose_update_time: Option<DateTime<Utc>>,
}

impl From<&ExposureSession> for SessionRecord {
    fn from(session: &ExposureSession) -> Self {
        Self {
            id: Some(session.id),
            start_time: session.start_time,
            planned_end_time: session.planned_end_time,
            current_uv_index: session.current_uv_index,
            accumulated_dose: Some(session.accumulated_dose),
            burn_limit_dose: Some(session.burn_limit_dose),
            last_dose_update_time: Some(session.last_dose_update_time),
        }
    }
}

impl From<SessionRecord> for StoredSession {
    fn from(record: SessionRecord) -> Self {
        match (
            record.accumulated_dose,
            record.burn_limit_dose,
            record.last_dose_update_time,
        ) {
            (Some(accumulated_dose), Some(burn_limit_dose), Some(last_dose_update_time)) => {
                StoredSession::Current(ExposureSession {
                    id: record.id.unwrap_or_else(Uuid::new_v4),
                    start_time: record.start_time,
                    planned_end_time: record.planned_end_time,
                    current_uv_index: record.current_uv_index,
                    accumulated_dose,
                    burn_limit_dose,
                    last_dose_update_time,
                })
            }
            _ => StoredSession::Legacy(LegacyRecord {
                id: record.id,
                start_time: record.start_time,
                planned_end_time: record.planned_end_time,
                current_uv_index: record.current_uv_index,
            }),
        }
    }
}

/// File-backed persistence gateway for the running session
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Create a store backed by the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored record with a shared lock.
    ///
    /// Returns `None` if the file doesn't exist. An unreadable or corrupted
    /// file is logged and treated as absent: a lost session is better than
    /// a controller that cannot start.
    pub fn read(&self) -> Result<Option<StoredSession>> {
        let path = &self.path;
        if !path.exists() {
            tracing::debug!("No session file at {:?}", path);
            return Ok(None);
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open session file {:?}: {}. Ignoring it.", path, e);
                return Ok(None);
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock session file {:?}: {}. Ignoring it.", path, e);
            return Ok(None);
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read session file {:?}: {}. Ignoring it.", path, e);
            return Ok(None);
        }

        file.unlock()?;

        match serde_json::from_str::<SessionRecord>(&contents) {
            Ok(record) => {
                let stored = StoredSession::from(record);
                if matches!(stored, StoredSession::Legacy(_)) {
                    tracing::info!("Loaded legacy session record from {:?}", path);
                } else {
                    tracing::debug!("Loaded session record from {:?}", path);
                }
                Ok(Some(stored))
            }
            Err(e) => {
                tracing::warn!("Failed to parse session file {:?}: {}. Ignoring it.", path, e);
                Ok(None)
            }
        }
    }

    /// Save the session atomically with an exclusive lock
    ///
    /// 1. Write to a temp file in the same directory
    /// 2. Sync to disk
    /// 3. Rename over the original
    pub fn write(&self, session: &ExposureSession) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| Error::Other(format!("session path {:?} has no parent", self.path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(&SessionRecord::from(session))?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved session {} to {:?}", session.id, self.path);
        Ok(())
    }

    /// Remove the stored record, if any
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("Removed session file {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl PersistenceGateway for SessionStore {
    fn save(&mut self, session: &ExposureSession) -> Result<()> {
        self.write(session)
    }

    fn load(&mut self) -> Result<Option<StoredSession>> {
        self.read()
    }

    fn clear(&mut self) -> Result<()> {
        self.remove()
    }
}

/// Exclusive ownership of the session across processes.
///
/// Released when dropped.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    /// Take the lock, retrying for up to `wait` while another process
    /// holds it
    pub fn acquire(path: impl Into<PathBuf>, wait: Duration) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + wait;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!("Acquired session lock {:?}", path);
                    return Ok(Self { file, path });
                }
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    if Instant::now() >= deadline {
                        return Err(Error::State(format!(
                            "another uvdose process owns the session (lock {:?})",
                            path
                        )));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release session lock {:?}: {}", self.path, e);
        }
    }
}
