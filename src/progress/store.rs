use super::quota::{QuotaLedger, Reservation, ResetSchedule};
use super::{ItemStatus, ProgressSnapshot, WorkItem};
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("progress file {path} is in use by another run ({holder})")]
    Locked { path: PathBuf, holder: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("progress snapshot JSON error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where the in-memory snapshot came from when the store was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOrigin {
    Fresh,
    Loaded,
    /// The file on disk was unreadable; it was moved to `moved_to` and the
    /// run starts from an empty snapshot.
    DiscardedCorrupt { moved_to: PathBuf, reason: String },
}

/// Exclusive marker next to the snapshot. Removed on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: PathBuf) -> Result<Self, StoreError> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let stamp = format!("pid={} since={}\n", std::process::id(), Utc::now().to_rfc3339());
                file.write_all(stamp.as_bytes())
                    .map_err(|e| StoreError::io(&path, e))?;
                Ok(Self { path })
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown holder".to_string());
                Err(StoreError::Locked { path, holder })
            }
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Durable, single-writer record of work items and quota usage.
///
/// Every mutation goes through one lock and is persisted before the call
/// returns, so a crash never loses a completed item.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    state: Mutex<ProgressSnapshot>,
    origin: SnapshotOrigin,
    _lock: LockFile,
}

impl ProgressStore {
    /// Opens (or creates) the snapshot at `path`, taking the exclusive lock.
    pub fn open(
        path: impl Into<PathBuf>,
        quota_limit: u64,
        schedule: ResetSchedule,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let lock = LockFile::acquire(lock_path(&path))?;

        let now = Utc::now();
        let (loaded, origin) = Self::load(&path)?;
        let mut snapshot =
            loaded.unwrap_or_else(|| ProgressSnapshot::empty(quota_limit, now, schedule));
        snapshot.quota.set_schedule(schedule);
        if snapshot.quota.limit() != quota_limit {
            tracing::info!(
                path = %path.display(),
                stored = snapshot.quota.limit(),
                configured = quota_limit,
                "Applying configured quota limit"
            );
            snapshot.quota.set_limit(quota_limit);
        }

        let store = Self {
            path,
            state: Mutex::new(snapshot),
            origin,
            _lock: lock,
        };
        store.save()?;
        Ok(store)
    }

    /// Reads the snapshot at `path`. Missing file → `None`. A malformed file is
    /// moved aside and reported through the origin, never partially applied.
    pub fn load(path: &Path) -> Result<(Option<ProgressSnapshot>, SnapshotOrigin), StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok((None, SnapshotOrigin::Fresh));
            }
            Err(err) => return Err(StoreError::io(path, err)),
        };

        let reason = match serde_json::from_str::<ProgressSnapshot>(&raw) {
            Ok(snapshot) => match snapshot.duplicate_key() {
                None => return Ok((Some(snapshot), SnapshotOrigin::Loaded)),
                Some(key) => format!("duplicate item key {key}"),
            },
            Err(err) => err.to_string(),
        };

        let moved_to = corrupt_path(path, Utc::now());
        fs::rename(path, &moved_to).map_err(|e| StoreError::io(path, e))?;
        tracing::error!(
            path = %path.display(),
            moved_to = %moved_to.display(),
            %reason,
            "Progress snapshot is corrupt; starting from an empty snapshot"
        );
        Ok((None, SnapshotOrigin::DiscardedCorrupt { moved_to, reason }))
    }

    /// Reads the snapshot without locking it or touching a corrupt file.
    pub fn peek(path: &Path) -> Result<Option<ProgressSnapshot>, StoreError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    /// Writes `snapshot` to `path` via temp file + rename.
    pub fn write_atomic(path: &Path, snapshot: &ProgressSnapshot) -> Result<(), StoreError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let json = serde_json::to_vec_pretty(snapshot)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".progress-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(&json).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;

        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }
        Ok(())
    }

    /// Removes a lock left behind by a killed process.
    pub fn break_lock(path: &Path) -> Result<bool, StoreError> {
        let lock = lock_path(path);
        match fs::remove_file(&lock) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::io(&lock, err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin(&self) -> &SnapshotOrigin {
        &self.origin
    }

    fn guard(&self) -> MutexGuard<'_, ProgressSnapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `f` to a copy of the snapshot and swaps it in once the copy is
    /// on disk. A failed write leaves memory matching the file.
    fn mutate<R>(&self, f: impl FnOnce(&mut ProgressSnapshot) -> R) -> Result<R, StoreError> {
        self.mutate_if(|s| {
            let result = f(s);
            (true, result)
        })
    }

    /// Like `mutate`, but only persists when `f` reports a change.
    fn mutate_if<R>(
        &self,
        f: impl FnOnce(&mut ProgressSnapshot) -> (bool, R),
    ) -> Result<R, StoreError> {
        let mut guard = self.guard();
        let mut next = guard.clone();
        let (changed, result) = f(&mut next);
        if changed {
            Self::write_atomic(&self.path, &next)?;
            *guard = next;
        }
        Ok(result)
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let guard = self.guard();
        Self::write_atomic(&self.path, &guard)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.guard().clone()
    }

    pub fn quota(&self) -> QuotaLedger {
        self.guard().quota.clone()
    }

    pub fn item(&self, key: &str) -> Option<WorkItem> {
        self.guard().item(key).cloned()
    }

    pub fn status_of(&self, key: &str) -> Option<ItemStatus> {
        self.guard().status_of(key)
    }

    pub fn output_of(&self, key: &str) -> Option<String> {
        self.guard().item(key).and_then(|item| item.output.clone())
    }

    pub fn reset_if_due(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let rolled = self.mutate_if(|s| {
            let rolled = s.quota.reset_if_due(now);
            (rolled, rolled)
        })?;
        if rolled {
            tracing::info!(
                path = %self.path.display(),
                next_reset = %self.quota().reset_at(),
                "Quota period rolled over"
            );
        }
        Ok(rolled)
    }

    /// Resets the period if due, then reserves `cost`. Allowed reservations
    /// are persisted before returning.
    pub fn reserve(&self, cost: u64, now: DateTime<Utc>) -> Result<Reservation, StoreError> {
        self.mutate_if(|s| {
            let rolled = s.quota.reset_if_due(now);
            let outcome = s.quota.reserve(cost);
            (rolled || outcome.is_allowed(), outcome)
        })
    }

    /// Spends the rest of the current period after a provider-side quota error.
    pub fn exhaust_quota(&self) -> Result<(), StoreError> {
        self.mutate(|s| s.quota.exhaust())
    }

    /// Counts one execution attempt and returns the new attempt count.
    pub fn begin_attempt(&self, key: &str) -> Result<u32, StoreError> {
        self.mutate(|s| {
            let item = s.item_mut(key);
            item.attempts += 1;
            item.attempts
        })
    }

    pub fn note_error(&self, key: &str, reason: &str) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.item_mut(key).last_error = Some(reason.to_string());
        })
    }

    pub fn mark_done(&self, key: &str, output: Option<String>) -> Result<(), StoreError> {
        self.mutate(|s| {
            let item = s.item_mut(key);
            item.status = ItemStatus::Done;
            item.output = output;
            item.last_error = None;
        })
    }

    /// Marks every key done in one write.
    pub fn mark_all_done<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Result<usize, StoreError> {
        let keys: Vec<&str> = keys.into_iter().collect();
        self.mutate_if(|s| {
            for key in &keys {
                let item = s.item_mut(key);
                item.status = ItemStatus::Done;
                item.last_error = None;
            }
            (!keys.is_empty(), keys.len())
        })
    }

    pub fn mark_failed(&self, key: &str, reason: &str) -> Result<(), StoreError> {
        self.mutate(|s| {
            let item = s.item_mut(key);
            item.status = ItemStatus::Failed;
            item.last_error = Some(reason.to_string());
        })
    }

    /// Returns failed items among `keys` to pending with a fresh attempt count.
    pub fn reset_failed<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Result<usize, StoreError> {
        let keys: Vec<&str> = keys.into_iter().collect();
        self.mutate(|s| {
            let mut count = 0;
            for item in s.items.iter_mut() {
                if item.status == ItemStatus::Failed && keys.contains(&item.key.as_str()) {
                    item.status = ItemStatus::Pending;
                    item.attempts = 0;
                    count += 1;
                }
            }
            count
        })
    }

    /// Drops the record for `key` entirely.
    pub fn forget(&self, key: &str) -> Result<bool, StoreError> {
        self.mutate(|s| {
            let before = s.items.len();
            s.items.retain(|item| item.key != key);
            before != s.items.len()
        })
    }

    pub fn meta(&self, key: &str) -> Option<String> {
        self.guard().meta.get(key).cloned()
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.meta.insert(key.to_string(), value.to_string());
        })
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn corrupt_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".corrupt-{}", now.format("%Y%m%dT%H%M%S%.3f")));
    PathBuf::from(name)
}
