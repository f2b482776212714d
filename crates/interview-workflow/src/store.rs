//! Durable workflow stores.
//!
//! A store keeps one [`WorkflowRecord`] per request, a per-request execution
//! lease, and a cancellation flag. [`MemoryStore`] serves tests and
//! single-process use; [`FileStore`] writes one human-readable JSON file per
//! request so state survives a restart.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::WorkflowRecord;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Who may execute a request, and until when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    fn new(owner: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            owner: owner.to_string(),
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// True when `owner` may take (or renew) this lease at `now`.
    fn grantable_to(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.owner == owner || self.expires_at <= now
    }
}

pub trait WorkflowStore: Send + Sync {
    /// Persist a new record. Fails with `Duplicate` if the id exists.
    fn create(&self, record: &WorkflowRecord) -> StoreResult<()>;

    /// Overwrite an existing record.
    fn save(&self, record: &WorkflowRecord) -> StoreResult<()>;

    fn load(&self, id: Uuid) -> StoreResult<Option<WorkflowRecord>>;

    /// Every record, oldest first.
    fn list(&self) -> StoreResult<Vec<WorkflowRecord>>;

    /// Take or renew the execution lease. Returns `false` while another
    /// owner holds an unexpired lease.
    fn acquire_lease(&self, id: Uuid, owner: &str, ttl: Duration, now: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Drop the lease if `owner` holds it.
    fn release_lease(&self, id: Uuid, owner: &str) -> StoreResult<()>;

    fn request_cancel(&self, id: Uuid) -> StoreResult<()>;

    fn cancel_requested(&self, id: Uuid) -> StoreResult<bool>;
}

fn sort_oldest_first(records: &mut [WorkflowRecord]) {
    records.sort_by(|a, b| {
        a.request
            .created_at
            .cmp(&b.request.created_at)
            .then_with(|| a.id().cmp(&b.id()))
    });
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<Uuid, WorkflowRecord>,
    leases: HashMap<Uuid, Lease>,
    cancels: HashSet<Uuid>,
}

/// Records in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkflowStore for MemoryStore {
    fn create(&self, record: &WorkflowRecord) -> StoreResult<()> {
        let mut state = self.lock();
        if state.records.contains_key(&record.id()) {
            return Err(StoreError::Duplicate(record.id()));
        }
        state.records.insert(record.id(), record.clone());
        Ok(())
    }

    fn save(&self, record: &WorkflowRecord) -> StoreResult<()> {
        self.lock().records.insert(record.id(), record.clone());
        Ok(())
    }

    fn load(&self, id: Uuid) -> StoreResult<Option<WorkflowRecord>> {
        Ok(self.lock().records.get(&id).cloned())
    }

    fn list(&self) -> StoreResult<Vec<WorkflowRecord>> {
        let mut records: Vec<WorkflowRecord> = self.lock().records.values().cloned().collect();
        sort_oldest_first(&mut records);
        Ok(records)
    }

    fn acquire_lease(
        &self,
        id: Uuid,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        if let Some(lease) = state.leases.get(&id) {
            if !lease.grantable_to(owner, now) {
                return Ok(false);
            }
        }
        state.leases.insert(id, Lease::new(owner, ttl, now));
        Ok(true)
    }

    fn release_lease(&self, id: Uuid, owner: &str) -> StoreResult<()> {
        let mut state = self.lock();
        if state.leases.get(&id).is_some_and(|l| l.owner == owner) {
            state.leases.remove(&id);
        }
        Ok(())
    }

    fn request_cancel(&self, id: Uuid) -> StoreResult<()> {
        self.lock().cancels.insert(id);
        Ok(())
    }

    fn cancel_requested(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.lock().cancels.contains(&id))
    }
}

/// One JSON file per request under a directory:
///
/// ```text
/// <dir>/<id>.json     the workflow record
/// <dir>/<id>.lease    current execution lease
/// <dir>/<id>.cancel   present once cancellation was requested
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// Serializes lease read-modify-write within this process.
    lease_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            lease_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: Uuid, ext: &str) -> PathBuf {
        self.dir.join(format!("{id}.{ext}"))
    }

    /// Write via a temp file and rename so a crash never leaves half a record.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_lease(&self, id: Uuid) -> StoreResult<Option<Lease>> {
        match fs::read_to_string(self.path(id, "lease")) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl WorkflowStore for FileStore {
    fn create(&self, record: &WorkflowRecord) -> StoreResult<()> {
        let path = self.path(record.id(), "json");
        let json = serde_json::to_vec_pretty(record)?;
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::Duplicate(record.id()))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&json)?;
        file.sync_all()?;
        tracing::debug!(request_id = %record.id(), path = %path.display(), "Record created");
        Ok(())
    }

    fn save(&self, record: &WorkflowRecord) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(record)?;
        self.write_atomic(&self.path(record.id(), "json"), &json)
    }

    fn load(&self, id: Uuid) -> StoreResult<Option<WorkflowRecord>> {
        match fs::read_to_string(self.path(id, "json")) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> StoreResult<Vec<WorkflowRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = fs::read_to_string(&path)?;
            match serde_json::from_str::<WorkflowRecord>(&json) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable record")
                }
            }
        }
        sort_oldest_first(&mut records);
        Ok(records)
    }

    fn acquire_lease(
        &self,
        id: Uuid,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let _guard = self.lease_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let lease = Lease::new(owner, ttl, now);
        let json = serde_json::to_vec(&lease)?;
        let path = self.path(id, "lease");

        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(&json)?;
                return Ok(true);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        match self.read_lease(id)? {
            Some(current) if !current.grantable_to(owner, now) => Ok(false),
            _ => {
                self.write_atomic(&path, &json)?;
                Ok(true)
            }
        }
    }

    fn release_lease(&self, id: Uuid, owner: &str) -> StoreResult<()> {
        let _guard = self.lease_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.read_lease(id)?.is_some_and(|l| l.owner == owner) {
            match fs::remove_file(self.path(id, "lease")) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn request_cancel(&self, id: Uuid) -> StoreResult<()> {
        fs::write(self.path(id, "cancel"), Utc::now().to_rfc3339())?;
        Ok(())
    }

    fn cancel_requested(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.path(id, "cancel").exists())
    }
}
