//! File-backed JSON persistence primitive shared by every `squad-*` store.
//!
//! Grounded on `ai_squad.core.workstate.WorkStateManager`'s locking
//! discipline: an advisory lock file guards cross-process access, state is
//! reloaded from disk at the start of every mutation, and writes land via a
//! temp-file-plus-rename so a crash never leaves a half-written file behind.
//! [`TransactionalStore`] packages that pattern once so `squad-store`,
//! `squad-signal` and friends don't each reinvent it, the way `openintent-store`'s
//! `Database` packages `rusqlite` access behind a single `spawn_blocking`
//! bridge.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::{CoreError, Result};

/// A single JSON document backed by an advisory lock file, with corrupt-file
/// recovery and atomic writes.
pub struct LockedJsonFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl LockedJsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the exclusive advisory lock, runs `f`, releases it. Blocks
    /// the calling thread -- callers outside a `spawn_blocking` context will
    /// stall the executor.
    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;
        let result = f();
        let _ = FileExt::unlock(&lock_file);
        result
    }

    /// Loads the document, falling back to `T::default()` when the file is
    /// absent or unparseable. A corrupt file is renamed aside to `*.corrupt`
    /// and logged rather than returned as an error, matching
    /// `WorkStateManager._load_state`'s recovery behavior.
    pub fn load<T: DeserializeOwned + Default>(&self) -> Result<T> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(T::default());
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "resetting corrupt state file");
                let corrupt_path = {
                    let mut p = self.path.clone().into_os_string();
                    p.push(".corrupt");
                    PathBuf::from(p)
                };
                let _ = fs::rename(&self.path, &corrupt_path);
                Ok(T::default())
            }
        }
    }

    /// Atomically persists `value`: write to a sibling temp file, then
    /// rename over the target.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        fs::write(&tmp_path, serde_json::to_string_pretty(value)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// A JSON document held in memory and mirrored to disk, with transactional
/// mutation through a cross-process advisory lock.
///
/// Every mutating method on a `squad-*` store should go through
/// [`TransactionalStore::transact`]: it reloads the latest on-disk state
/// (picking up writes from other processes), hands the closure a `&mut S`,
/// and persists the result only if the closure reports a change -- mirroring
/// `WorkStateManager.transaction()`'s reload/mutate/save-if-dirty contract.
pub struct TransactionalStore<S> {
    file: LockedJsonFile,
    state: Mutex<S>,
}

impl<S> TransactionalStore<S>
where
    S: Default + Serialize + DeserializeOwned + Send + 'static,
{
    /// Opens (creating if absent) the store at `path`, loading its current
    /// state into memory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let file = LockedJsonFile::new(path);
        let state = file.load()?;
        Ok(Arc::new(Self {
            file,
            state: Mutex::new(state),
        }))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Runs `f` against the freshly reloaded state under the cross-process
    /// lock, on a blocking thread. `f` returns `(result, dirty)`; the state
    /// is persisted back to disk only when `dirty` is `true`.
    pub async fn transact<F, R>(self: &Arc<Self>, f: F) -> Result<R>
    where
        F: FnOnce(&mut S) -> Result<(R, bool)> + Send + 'static,
        R: Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            this.file.with_lock(|| {
                let mut guard = this
                    .state
                    .lock()
                    .map_err(|_| CoreError::Validation("store mutex poisoned".to_string()))?;
                *guard = this.file.load()?;
                let (result, dirty) = f(&mut guard)?;
                if dirty {
                    this.file.save(&*guard)?;
                }
                Ok(result)
            })
        })
        .await?
    }

    /// Reads from the in-memory copy without reloading from disk or taking
    /// the cross-process lock -- cheap, and fresh as of the last `transact`
    /// this process ran. Acceptable staleness for read-mostly call sites per
    /// the concurrency model's "many readers tolerate slightly-stale data"
    /// rule.
    pub fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&S) -> R,
    {
        let guard = self
            .state
            .lock()
            .map_err(|_| CoreError::Validation("store mutex poisoned".to_string()))?;
        Ok(f(&guard))
    }
}

/// An append-only, newline-delimited JSON log: the persistence shape for
/// routing events and other audit trails that are never rewritten, only
/// grown. Each line is locked individually so appends from concurrent
/// processes interleave but never tear.
pub struct AppendLog {
    path: PathBuf,
    lock_path: PathBuf,
}

impl AppendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    /// Serializes `value` to one JSON line and appends it.
    pub fn append<T: Serialize>(&self, value: &T) -> Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(value)?;
        let result = writeln!(file, "{line}").map_err(CoreError::from);
        let _ = FileExt::unlock(&lock_file);
        result
    }

    /// Reads every line, skipping (and logging) any that fail to parse
    /// rather than failing the whole read.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => out.push(value),
                Err(err) => warn!(path = %self.path.display(), error = %err, "skipping unparseable log line"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Counter {
        value: u64,
    }

    #[tokio::test]
    async fn transact_persists_only_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionalStore::<Counter>::open(dir.path().join("state.json")).unwrap();

        store
            .transact(|s| {
                s.value += 1;
                Ok(((), true))
            })
            .await
            .unwrap();

        let reloaded = LockedJsonFile::new(dir.path().join("state.json"))
            .load::<Counter>()
            .unwrap();
        assert_eq!(reloaded.value, 1);

        store
            .transact(|s| {
                let _ = s.value;
                Ok(((), false))
            })
            .await
            .unwrap();
        let still = LockedJsonFile::new(dir.path().join("state.json"))
            .load::<Counter>()
            .unwrap();
        assert_eq!(still.value, 1);
    }

    #[test]
    fn corrupt_file_resets_to_default_and_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let file = LockedJsonFile::new(&path);
        let loaded: Counter = file.load().unwrap();
        assert_eq!(loaded, Counter::default());
        assert!(path.with_extension("json.corrupt").exists() || dir.path().join("state.json.corrupt").exists());
    }

    #[test]
    fn append_log_round_trips_multiple_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AppendLog::new(dir.path().join("events.jsonl"));
        log.append(&Counter { value: 1 }).unwrap();
        log.append(&Counter { value: 2 }).unwrap();
        let all: Vec<Counter> = log.read_all().unwrap();
        assert_eq!(all, vec![Counter { value: 1 }, Counter { value: 2 }]);
    }
}
