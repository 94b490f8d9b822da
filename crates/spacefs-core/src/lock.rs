// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Advisory locking per logical path
//!
//! Two layers cooperate. An in-process registry admits holders per lock-file
//! path (many shared, or one exclusive) so two threads never race the same
//! advisory lock blindly. Once admitted, the holder takes an OS-level
//! `flock` on a `.flock` sidecar of the target, non-blocking, retried with
//! linear backoff: attempt `n` sleeps `n * duration_factor` before the next
//! try, giving a bounded worst-case wait of roughly
//! `max_cycles * (max_cycles + 1) / 2 * duration_factor` (~6.3 s at the
//! defaults of 20 cycles and 30 ms).

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Suffix of the sidecar file the OS-level lock is taken on.
pub const LOCK_FILE_SUFFIX: &str = ".flock";

const DEFAULT_MAX_CYCLES: u32 = 20;
const DEFAULT_DURATION_FACTOR_MS: u64 = 30;

/// Lock kind: multiple shared holders coexist, exclusive excludes everyone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// In-process holders of one lock-file path.
#[derive(Default)]
struct LockSlot {
    shared: usize,
    exclusive: bool,
}

impl LockSlot {
    fn admit(&mut self, kind: LockKind) -> bool {
        match kind {
            LockKind::Shared => {
                if self.exclusive {
                    return false;
                }
                self.shared += 1;
                true
            }
            LockKind::Exclusive => {
                if self.exclusive || self.shared > 0 {
                    return false;
                }
                self.exclusive = true;
                true
            }
        }
    }

    fn retract(&mut self, kind: LockKind) {
        match kind {
            LockKind::Shared => self.shared = self.shared.saturating_sub(1),
            LockKind::Exclusive => self.exclusive = false,
        }
    }

    fn empty(&self) -> bool {
        self.shared == 0 && !self.exclusive
    }
}

type Registry = Arc<Mutex<HashMap<PathBuf, LockSlot>>>;

/// Per-instance lock manager. The registry is owned by the instance, not a
/// process-wide singleton, so tests (and embedders with several roots) get
/// isolated lock tables.
pub struct LockManager {
    registry: Registry,
    max_cycles: u32,
    duration_factor: Duration,
}

impl LockManager {
    pub fn new(max_cycles: u32, duration_factor: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            max_cycles,
            duration_factor,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(
            config.max_acquire_lock_cycles,
            Duration::from_millis(config.lock_cycle_duration_factor_ms),
        )
    }

    /// Path of the `.flock` sidecar for a target path.
    pub fn lock_file_path(target: &Path) -> PathBuf {
        let mut os = target.as_os_str().to_os_string();
        os.push(LOCK_FILE_SUFFIX);
        PathBuf::from(os)
    }

    /// Acquire an advisory lock on `target`. Blocks (bounded) until the lock
    /// is held or the retry ceiling is exhausted.
    pub fn lock(&self, target: &Path, kind: LockKind) -> StoreResult<LockHandle> {
        if target.as_os_str().is_empty() {
            return Err(StoreError::PathEmpty);
        }
        let flock_path = Self::lock_file_path(target);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&flock_path)?;
        let op = match kind {
            LockKind::Shared => libc::LOCK_SH,
            LockKind::Exclusive => libc::LOCK_EX,
        } | libc::LOCK_NB;

        for cycle in 1..=self.max_cycles {
            if self.admit(&flock_path, kind) {
                if unsafe { libc::flock(file.as_raw_fd(), op) } == 0 {
                    return Ok(LockHandle {
                        registry: Arc::clone(&self.registry),
                        flock_path,
                        file: Some(file),
                        kind,
                        released: false,
                    });
                }
                // another process holds a conflicting flock
                self.retract(&flock_path, kind);
            }
            tracing::debug!(
                path = %flock_path.display(),
                cycle,
                "lock contended, backing off"
            );
            thread::sleep(self.duration_factor * cycle);
        }
        Err(StoreError::AcquireLockFailed)
    }

    /// Convenience for the common exclusive case.
    pub fn lock_exclusive(&self, target: &Path) -> StoreResult<LockHandle> {
        self.lock(target, LockKind::Exclusive)
    }

    pub fn lock_shared(&self, target: &Path) -> StoreResult<LockHandle> {
        self.lock(target, LockKind::Shared)
    }

    fn admit(&self, flock_path: &Path, kind: LockKind) -> bool {
        let mut registry = self.registry.lock().unwrap();
        registry
            .entry(flock_path.to_path_buf())
            .or_default()
            .admit(kind)
    }

    fn retract(&self, flock_path: &Path, kind: LockKind) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(slot) = registry.get_mut(flock_path) {
            slot.retract(kind);
            if slot.empty() {
                registry.remove(flock_path);
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_CYCLES,
            Duration::from_millis(DEFAULT_DURATION_FACTOR_MS),
        )
    }
}

/// A held lock. Dropping the handle releases the lock; use `release` to
/// observe cleanup errors.
pub struct LockHandle {
    registry: Registry,
    flock_path: PathBuf,
    file: Option<File>,
    kind: LockKind,
    released: bool,
}

impl LockHandle {
    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// Release the lock: funlock, free the in-process slot and, when no
    /// holder remains, delete the `.flock` sidecar. A lock file already
    /// removed by a racing cleanup is not an error.
    pub fn release(mut self) -> StoreResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> StoreResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if let Some(file) = self.file.take() {
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
        }

        let last_holder = {
            let mut registry = self.registry.lock().unwrap();
            match registry.get_mut(&self.flock_path) {
                Some(slot) => {
                    slot.retract(self.kind);
                    if slot.empty() {
                        registry.remove(&self.flock_path);
                        true
                    } else {
                        false
                    }
                }
                None => true,
            }
        };

        if last_holder {
            match fs::remove_file(&self.flock_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!(
                path = %self.flock_path.display(),
                error = %e,
                "lock release during drop failed"
            );
        }
    }
}
