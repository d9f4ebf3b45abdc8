//! Versioned storage for phase contexts.
//!
//! Writers read a context with its version, work on a copy, and write it back
//! with the version they read. A mismatch is a `VersionConflict`; the store
//! never merges.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use journey_common::SessionId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::PhaseContext;
use crate::errors::StoreError;

pub const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

pub trait ContextStore: Send + Sync {
    /// Inserts a new context at version 1 (or at `version` when restoring).
    fn create(&self, id: SessionId, ctx: PhaseContext, version: u64) -> Result<(), StoreError>;

    fn get(&self, id: &SessionId) -> Result<Versioned<PhaseContext>, StoreError>;

    /// Replaces the context if the stored version equals `expected_version`.
    /// Returns the new version.
    fn put(
        &self,
        id: &SessionId,
        ctx: PhaseContext,
        expected_version: u64,
    ) -> Result<u64, StoreError>;

    fn remove(&self, id: &SessionId) -> Result<(), StoreError>;

    fn snapshot(&self, id: &SessionId) -> Result<Vec<u8>, StoreError> {
        let current = self.get(id)?;
        encode_snapshot(id, &current)
    }

    fn restore(&self, bytes: &[u8]) -> Result<PhaseContext, StoreError> {
        decode_snapshot(bytes).map(|s| s.context)
    }
}

/// Checksummed envelope around one context version. Saved session records
/// carry it as-is, so a reload goes through the same checks as `restore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub format: u32,
    pub session_id: SessionId,
    pub version: u64,
    pub checksum: String,
    pub context: PhaseContext,
}

impl Snapshot {
    pub fn seal(id: &SessionId, current: &Versioned<PhaseContext>) -> Result<Self, StoreError> {
        Ok(Self {
            format: SNAPSHOT_FORMAT,
            session_id: *id,
            version: current.version,
            checksum: checksum(&current.value)?,
            context: current.value.clone(),
        })
    }

    /// Checks the format and checksum, and that the envelope belongs to `id`.
    pub fn verify(&self, id: &SessionId) -> Result<(), StoreError> {
        if self.format != SNAPSHOT_FORMAT {
            return Err(StoreError::UnsupportedFormat(self.format));
        }
        if self.session_id != *id {
            return Err(StoreError::SessionMismatch {
                expected: *id,
                found: self.session_id,
            });
        }
        let actual = checksum(&self.context)?;
        if actual != self.checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

fn checksum(ctx: &PhaseContext) -> Result<String, StoreError> {
    let bytes = serde_json::to_vec(ctx)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

pub fn encode_snapshot(
    id: &SessionId,
    current: &Versioned<PhaseContext>,
) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(&Snapshot::seal(id, current)?)?)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, StoreError> {
    let snapshot: Snapshot = serde_json::from_slice(bytes)?;
    snapshot.verify(&snapshot.session_id)?;
    Ok(snapshot)
}

/// In-memory store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    entries: DashMap<SessionId, Versioned<PhaseContext>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ContextStore for MemoryContextStore {
    fn create(&self, id: SessionId, ctx: PhaseContext, version: u64) -> Result<(), StoreError> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(Versioned {
                    version: version.max(1),
                    value: ctx,
                });
                Ok(())
            }
        }
    }

    fn get(&self, id: &SessionId) -> Result<Versioned<PhaseContext>, StoreError> {
        self.entries
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(*id))
    }

    fn put(
        &self,
        id: &SessionId,
        ctx: PhaseContext,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let mut entry = self.entries.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        if entry.version != expected_version {
            return Err(StoreError::VersionConflict {
                session: *id,
                expected: expected_version,
                actual: entry.version,
            });
        }
        entry.version += 1;
        entry.value = ctx;
        Ok(entry.version)
    }

    fn remove(&self, id: &SessionId) -> Result<(), StoreError> {
        self.entries
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{Condition, Transition};
    use journey_common::PhaseId;

    const A: PhaseId = PhaseId::from_static("a");
    const B: PhaseId = PhaseId::from_static("b");

    fn always(_: &PhaseContext) -> bool {
        true
    }

    #[test]
    fn test_create_starts_at_version_one() {
        let store = MemoryContextStore::new();
        let id = SessionId::new();
        store.create(id, PhaseContext::new(&A), 1).unwrap();
        assert_eq!(store.get(&id).unwrap().version, 1);
        assert!(matches!(
            store.create(id, PhaseContext::new(&A), 1),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_put_with_stale_version_conflicts() {
        let store = MemoryContextStore::new();
        let id = SessionId::new();
        store.create(id, PhaseContext::new(&A), 1).unwrap();

        let first = store.get(&id).unwrap();
        let second = store.get(&id).unwrap();

        let mut ctx = first.value;
        ctx.record_transition(&Transition::forward(A, B, Condition::new("go", always)));
        assert_eq!(store.put(&id, ctx, first.version).unwrap(), 2);

        let err = store.put(&id, second.value, second.version).unwrap_err();
        match err {
            StoreError::VersionConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected VersionConflict, got {other:?}"),
        }
        assert_eq!(store.get(&id).unwrap().value.visits(&B), 1);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let store = MemoryContextStore::new();
        let id = SessionId::new();
        let mut ctx = PhaseContext::new(&A);
        ctx.record_transition(&Transition::forward(A, B, Condition::new("go", always)));
        store.create(id, ctx.clone(), 1).unwrap();

        let bytes = store.snapshot(&id).unwrap();
        let restored = store.restore(&bytes).unwrap();
        assert_eq!(restored, ctx);

        let snapshot = decode_snapshot(&bytes).unwrap();
        assert_eq!(snapshot.session_id, id);
        assert_eq!(snapshot.version, 1);
    }

    #[test]
    fn test_tampered_snapshot_is_rejected() {
        let store = MemoryContextStore::new();
        let id = SessionId::new();
        store.create(id, PhaseContext::new(&A), 1).unwrap();
        let bytes = store.snapshot(&id).unwrap();

        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["context"]["visitCounts"]["a"] = serde_json::json!(5);
        let tampered = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            store.restore(&tampered),
            Err(StoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_snapshot_for_another_session_is_rejected() {
        let id = SessionId::new();
        let current = Versioned {
            version: 4,
            value: PhaseContext::new(&A),
        };
        let snapshot = Snapshot::seal(&id, &current).unwrap();
        snapshot.verify(&id).unwrap();

        let other = SessionId::new();
        assert!(matches!(
            snapshot.verify(&other),
            Err(StoreError::SessionMismatch { .. })
        ));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let store = MemoryContextStore::new();
        assert!(matches!(
            store.remove(&SessionId::new()),
            Err(StoreError::NotFound(_))
        ));
    }
}
