//! File-backed session records.
//!
//! One pretty-printed JSON file per session under `<data_dir>/sessions/`.
//! Writes go to a temp file that is renamed into place while holding an
//! advisory lock on a sibling `.lock` file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use journey_common::{Event, JourneyBrief, Mode, PhaseId, SessionId};
use serde::{Deserialize, Serialize};

use crate::context::PhaseContext;
use crate::context::store::{Snapshot, Versioned};
use crate::errors::PersistenceError;
use crate::gates::CheckpointGate;
use crate::orchestrator::session::{SessionState, SessionStatus, SessionSummary};

pub const RECORD_FORMAT: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub format_version: u32,
    pub id: SessionId,
    pub mode: Mode,
    pub brief: JourneyBrief,
    pub current_phase: PhaseId,
    pub status: SessionStatus,
    pub gate: CheckpointGate,
    /// Phase context in its checksummed envelope.
    pub snapshot: Snapshot,
    pub last_sequence: u64,
    /// Retained event tail, so replay keeps working after a reload.
    #[serde(default)]
    pub events: Vec<Event>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn state(&self) -> SessionState {
        SessionState {
            id: self.id,
            mode: self.mode,
            brief: self.brief.clone(),
            current_phase: self.current_phase.clone(),
            status: self.status.clone(),
            gate: self.gate.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from(&self.state())
    }

    pub fn context(&self) -> &PhaseContext {
        &self.snapshot.context
    }

    pub fn versioned_context(&self) -> Versioned<PhaseContext> {
        Versioned {
            version: self.snapshot.version,
            value: self.snapshot.context.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Store rooted at `<data_dir>/sessions`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("sessions"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn save(&self, record: &SessionRecord) -> Result<PathBuf, PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let json = serde_json::to_vec_pretty(record).map_err(|source| PersistenceError::Encode {
            id: record.id,
            source,
        })?;

        let path = self.path_for(&record.id);
        let lock_path = self.dir.join(format!(".{}.lock", record.id));
        let tmp_path = self.dir.join(format!(".{}.json.tmp", record.id));

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(io_error(&lock_path))?;
        FileExt::lock_exclusive(&lock).map_err(io_error(&lock_path))?;
        let written = write_atomically(&tmp_path, &path, &json);
        let _ = FileExt::unlock(&lock);
        written?;

        tracing::debug!(session_id = %record.id, path = %path.display(), "session saved");
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<SessionRecord, PersistenceError> {
        read_record(path)
    }

    pub fn load_id(&self, id: &SessionId) -> Result<SessionRecord, PersistenceError> {
        read_record(&self.path_for(id))
    }

    /// Every readable record in the store, most recently updated first.
    /// Unreadable files are skipped with a warning.
    pub fn list(&self) -> Result<Vec<SessionRecord>, PersistenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping session file"),
            }
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    pub fn delete(&self, id: &SessionId) -> Result<(), PersistenceError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Io { path, source }),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError {
    let path = path.to_path_buf();
    move |source| PersistenceError::Io { path, source }
}

fn write_atomically(tmp_path: &Path, path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let mut tmp = File::create(tmp_path).map_err(io_error(tmp_path))?;
    tmp.write_all(bytes).map_err(io_error(tmp_path))?;
    tmp.sync_all().map_err(io_error(tmp_path))?;
    fs::rename(tmp_path, path).map_err(io_error(path))
}

/// Reads and validates one session file.
pub fn read_record(path: &Path) -> Result<SessionRecord, PersistenceError> {
    let bytes = fs::read(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Header {
        format_version: u32,
    }
    let header: Header = serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    if header.format_version != RECORD_FORMAT {
        return Err(PersistenceError::UnsupportedFormat {
            path: path.to_path_buf(),
            found: header.format_version,
        });
    }

    let record: SessionRecord =
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    record
        .snapshot
        .verify(&record.id)
        .map_err(|source| PersistenceError::Snapshot {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_common::EventKind;
    use tempfile::TempDir;

    fn record() -> SessionRecord {
        let id = SessionId::new();
        let phase = PhaseId::from_static("decompose");
        let now = Utc::now();
        SessionRecord {
            format_version: RECORD_FORMAT,
            id,
            mode: Mode::Research,
            brief: JourneyBrief::new("How do vaccines work?"),
            current_phase: phase.clone(),
            status: SessionStatus::Active,
            gate: CheckpointGate::new(),
            snapshot: Snapshot::seal(
                &id,
                &Versioned {
                    version: 3,
                    value: PhaseContext::new(&phase),
                },
            )
            .unwrap(),
            last_sequence: 1,
            events: vec![Event {
                sequence: 1,
                timestamp: now,
                session_id: id,
                kind: EventKind::SessionStarted {
                    mode: Mode::Research,
                    phase,
                },
            }],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());
        let rec = record();

        let path = store.save(&rec).unwrap();
        assert_eq!(path, store.path_for(&rec.id));

        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded.id, rec.id);
        assert_eq!(loaded.context(), rec.context());
        assert_eq!(loaded.versioned_context().version, 3);
        assert_eq!(loaded.events, rec.events);
    }

    #[test]
    fn test_save_overwrites_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());
        let mut rec = record();
        store.save(&rec).unwrap();
        rec.status = SessionStatus::Completed;
        store.save(&rec).unwrap();

        assert_eq!(store.load_id(&rec.id).unwrap().status, SessionStatus::Completed);
        let tmp_files = fs::read_dir(store.dir())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(tmp_files, 0);
    }

    #[test]
    fn test_list_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());
        store.save(&record()).unwrap();
        store.save(&record()).unwrap();
        fs::write(store.dir().join("garbage.json"), "{not json").unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_list_of_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(&dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());
        let mut rec = record();
        rec.format_version = 99;
        let path = store.save(&rec).unwrap();

        let err = store.load(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::UnsupportedFormat { found: 99, .. }));
    }

    #[test]
    fn test_edited_context_fails_the_checksum() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());
        let path = store.save(&record()).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["snapshot"]["context"]["visitCounts"]["decompose"] = serde_json::json!(7);
        fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();

        let err = store.load(&path).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::Snapshot {
                source: crate::errors::StoreError::ChecksumMismatch { .. },
                ..
            }
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());
        let rec = record();
        store.save(&rec).unwrap();
        store.delete(&rec.id).unwrap();
        store.delete(&rec.id).unwrap();
        assert!(store.load_id(&rec.id).is_err());
    }
}
