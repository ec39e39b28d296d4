//! In-memory progress and result store for split operations.
//!
//! The web layer registers every upload here under a fresh operation id and
//! polls it until the background annotation task marks it complete. The
//! store is plain state injected into the application, not a process
//! global, and every entry is owned by one operation's lifecycle: stamped
//! at creation, expired after a TTL, swept on insert, and treated as absent
//! once stale.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::Track;

/// How long finished operations stay downloadable.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Lifecycle state of one split operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Processing,
    Complete,
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Processing => "processing",
            OperationStatus::Complete => "complete",
            OperationStatus::Error => "error",
        }
    }
}

/// Progress counters reported to polling clients.
///
/// `total`/`completed` count geocoding lookups (two per track when place
/// name lookup is enabled, zero otherwise); `current_track` advances as the
/// annotation task walks the track list.
#[derive(Debug, Clone)]
pub struct Progress {
    pub total: u32,
    pub completed: u32,
    pub current_track: u32,
    pub total_tracks: u32,
    pub status: OperationStatus,
    pub lookup_place_names: bool,
}

impl Progress {
    /// Initial progress for a freshly registered operation.
    pub fn starting(total_lookups: u32, total_tracks: u32, lookup_place_names: bool) -> Self {
        Self {
            total: total_lookups,
            completed: 0,
            current_track: 0,
            total_tracks,
            status: OperationStatus::Processing,
            lookup_place_names,
        }
    }
}

/// One finished track plus its serialized form and place-name decoration.
#[derive(Debug, Clone)]
pub struct TrackRecord {
    pub track: Track,
    pub gpx_content: String,
    /// Empty when lookup was disabled or failed.
    pub start_place_name: String,
    pub end_place_name: String,
}

/// The completed output of a split operation.
#[derive(Debug, Clone)]
pub struct OperationResults {
    pub tracks: Vec<TrackRecord>,
    pub split_method: String,
}

/// Everything the store keeps for one operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub progress: Progress,
    pub results: Option<OperationResults>,
    pub error: Option<String>,
    created_at: Instant,
}

/// TTL-bounded map from operation id to [`Operation`].
///
/// Shared behind an `Arc` in the application state; all methods take `&self`.
pub struct OperationStore {
    ttl: Duration,
    inner: Mutex<HashMap<Uuid, Operation>>,
}

impl OperationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new operation, sweeping out expired entries first.
    pub fn insert(&self, id: Uuid, progress: Progress) {
        let mut map = self.lock();
        let ttl = self.ttl;
        map.retain(|_, op| op.created_at.elapsed() < ttl);
        map.insert(
            id,
            Operation {
                progress,
                results: None,
                error: None,
                created_at: Instant::now(),
            },
        );
    }

    /// Snapshot of an operation, or `None` if unknown or expired.
    pub fn get(&self, id: &Uuid) -> Option<Operation> {
        let map = self.lock();
        map.get(id)
            .filter(|op| op.created_at.elapsed() < self.ttl)
            .cloned()
    }

    /// Apply `f` to a live operation. Returns `false` for unknown or
    /// expired ids.
    pub fn update(&self, id: &Uuid, f: impl FnOnce(&mut Operation)) -> bool {
        let mut map = self.lock();
        match map.get_mut(id).filter(|op| op.created_at.elapsed() < self.ttl) {
            Some(op) => {
                f(op);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Operation>> {
        // A panic while holding the lock leaves the map intact; keep serving
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for OperationStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn insert_then_get_round_trips() {
        let store = OperationStore::default();
        let id = Uuid::new_v4();
        store.insert(id, Progress::starting(4, 2, true));

        let op = store.get(&id).unwrap();
        assert_eq!(op.progress.total, 4);
        assert_eq!(op.progress.total_tracks, 2);
        assert_eq!(op.progress.status, OperationStatus::Processing);
        assert!(op.results.is_none());
    }

    #[test]
    fn unknown_id_is_none() {
        let store = OperationStore::default();
        assert!(store.get(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn update_is_visible_to_later_reads() {
        let store = OperationStore::default();
        let id = Uuid::new_v4();
        store.insert(id, Progress::starting(2, 1, true));

        assert!(store.update(&id, |op| {
            op.progress.completed = 2;
            op.progress.status = OperationStatus::Complete;
        }));

        let op = store.get(&id).unwrap();
        assert_eq!(op.progress.completed, 2);
        assert_eq!(op.progress.status, OperationStatus::Complete);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = OperationStore::new(Duration::from_millis(20));
        let id = Uuid::new_v4();
        store.insert(id, Progress::starting(0, 1, false));
        assert!(store.get(&id).is_some());

        sleep(Duration::from_millis(40));
        assert!(store.get(&id).is_none());
        assert!(!store.update(&id, |_| ()));
    }

    #[test]
    fn insert_sweeps_expired_entries() {
        let store = OperationStore::new(Duration::from_millis(20));
        let old = Uuid::new_v4();
        store.insert(old, Progress::starting(0, 1, false));

        sleep(Duration::from_millis(40));
        let fresh = Uuid::new_v4();
        store.insert(fresh, Progress::starting(0, 1, false));

        assert!(store.get(&old).is_none());
        assert!(store.get(&fresh).is_some());
    }
}
