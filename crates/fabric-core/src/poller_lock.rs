//! Exclusive per-(account, secret) ingest lock (component F).
//!
//! Two gates must both succeed before a transport is allowed to start
//! polling: an in-process registry (cheap, catches same-process double
//! starts instantly) and an exclusive on-disk file lock (catches
//! double-starts across processes/restarts, with staleness detection so a
//! crashed holder doesn't wedge the lock forever).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::now_ms;
use crate::error::{FabricError, Result};

/// Default staleness window: a lock file older than this (by mtime/ts_ms)
/// with no heartbeat is assumed abandoned.
pub const DEFAULT_STALE_WINDOW_MS: i64 = 5 * 60 * 1000;

/// How often the background heartbeat task touches the lock file.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

fn fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockPayload {
    os_pid: u32,
    host: String,
    instance_pid: String,
    ts_ms: i64,
}

fn local_pid_exists(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        true
    }
}

/// A unique identifier for this process instance, generated once and
/// reused for every lock this process acquires (so "is this instance
/// still alive" can be answered without a PID at all, for the in-host
/// same-process case).
fn instance_id() -> &'static str {
    use std::sync::OnceLock;
    static ID: OnceLock<String> = OnceLock::new();
    ID.get_or_init(|| uuid::Uuid::new_v4().simple().to_string())
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Held by whoever successfully acquires the lock. Dropping it stops the
/// heartbeat task; call [`PollerLock::release`] to additionally remove the
/// in-process registration and the on-disk file.
pub struct PollerLockGuard {
    account_id: String,
    fingerprint: String,
    path: PathBuf,
    heartbeat_cancel: CancellationToken,
}

impl Drop for PollerLockGuard {
    fn drop(&mut self) {
        self.heartbeat_cancel.cancel();
    }
}

#[derive(Clone)]
pub struct PollerLock {
    dir: PathBuf,
    stale_window_ms: i64,
    held: Arc<Mutex<HashSet<(String, String)>>>,
}

impl PollerLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stale_window_ms: DEFAULT_STALE_WINDOW_MS,
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_stale_window_ms(mut self, ms: i64) -> Self {
        self.stale_window_ms = ms;
        self
    }

    fn lock_path(&self, account_id: &str, fp: &str) -> PathBuf {
        self.dir.join(format!("{account_id}_{fp}.lock"))
    }

    fn is_stale(&self, payload: &LockPayload) -> bool {
        if now_ms() - payload.ts_ms > self.stale_window_ms {
            return true;
        }
        if payload.host == local_hostname() {
            if payload.instance_pid == instance_id() {
                return false; // held by us
            }
            if !local_pid_exists(payload.os_pid) {
                return true;
            }
        }
        false
    }

    /// Acquire the lock for `(account_id, secret)`. `secret` is fingerprinted
    /// with SHA-256 before ever touching disk or logs.
    pub async fn acquire(&self, account_id: &str, secret: &str) -> Result<PollerLockGuard> {
        let fp = fingerprint(secret);
        {
            let mut held = self.held.lock().await;
            let key = (account_id.to_string(), fp.clone());
            if held.contains(&key) {
                return Err(FabricError::Locked);
            }
            held.insert(key);
        }

        if let Err(e) = self.acquire_file(account_id, &fp).await {
            let mut held = self.held.lock().await;
            held.remove(&(account_id.to_string(), fp.clone()));
            return Err(e);
        }

        let heartbeat_cancel = CancellationToken::new();
        self.spawn_heartbeat(account_id, &fp, heartbeat_cancel.clone());

        Ok(PollerLockGuard {
            account_id: account_id.to_string(),
            fingerprint: fp,
            path: self.lock_path(account_id, &fp),
            heartbeat_cancel,
        })
    }

    async fn acquire_file(&self, account_id: &str, fp: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| FabricError::InternalError(format!("poller_lock: mkdir failed: {e}")))?;
        let path = self.lock_path(account_id, fp);
        if self.try_create(&path)? {
            return Ok(());
        }
        // Someone holds the file. Check staleness and maybe steal it.
        let payload = Self::read_payload(&path);
        let stale = payload.as_ref().map(|p| self.is_stale(p)).unwrap_or(true);
        if !stale {
            return Err(FabricError::Locked);
        }
        let _ = std::fs::remove_file(&path);
        if self.try_create(&path)? {
            debug!(account_id, "poller_lock: stole stale lock");
            Ok(())
        } else {
            Err(FabricError::Locked)
        }
    }

    fn try_create(&self, path: &PathBuf) -> Result<bool> {
        use std::fs::OpenOptions;
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                use std::io::Write;
                let payload = LockPayload {
                    os_pid: std::process::id(),
                    host: local_hostname(),
                    instance_pid: instance_id().to_string(),
                    ts_ms: now_ms(),
                };
                let json = serde_json::to_string(&payload).unwrap_or_default();
                let _ = file.write_all(json.as_bytes());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(FabricError::InternalError(format!(
                "poller_lock: create failed: {e}"
            ))),
        }
    }

    fn read_payload(path: &PathBuf) -> Option<LockPayload> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn touch(&self, account_id: &str, fp: &str) {
        let path = self.lock_path(account_id, fp);
        let payload = LockPayload {
            os_pid: std::process::id(),
            host: local_hostname(),
            instance_pid: instance_id().to_string(),
            ts_ms: now_ms(),
        };
        if let Ok(json) = serde_json::to_string(&payload) {
            if let Err(e) = std::fs::write(&path, json) {
                warn!(account_id, error = %e, "poller_lock: heartbeat touch failed");
            }
        }
    }

    fn spawn_heartbeat(&self, account_id: &str, fp: &str, cancel: CancellationToken) {
        let this = self.clone();
        let account_id = account_id.to_string();
        let fp = fp.to_string();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => this.touch(&account_id, &fp),
                }
            }
        });
    }

    /// Release a previously acquired lock. Idempotent — tolerates the file
    /// already being missing and being called more than once.
    pub async fn release(&self, guard: PollerLockGuard) {
        guard.heartbeat_cancel.cancel();
        {
            let mut held = self.held.lock().await;
            held.remove(&(guard.account_id.clone(), guard.fingerprint.clone()));
        }
        let _ = std::fs::remove_file(&guard.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PollerLock::new(dir.path());
        let guard = lock.acquire("acct", "secret").await.unwrap();
        lock.release(guard).await;
        assert!(lock.acquire("acct", "secret").await.is_ok());
    }

    #[tokio::test]
    async fn second_acquire_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PollerLock::new(dir.path());
        let _guard = lock.acquire("acct", "secret").await.unwrap();
        let err = lock.acquire("acct", "secret").await.unwrap_err();
        assert_eq!(err, FabricError::Locked);
    }

    #[tokio::test]
    async fn different_accounts_dont_contend() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PollerLock::new(dir.path());
        let _g1 = lock.acquire("acct-a", "secret").await.unwrap();
        assert!(lock.acquire("acct-b", "secret").await.is_ok());
    }

    #[tokio::test]
    async fn stale_lock_is_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PollerLock::new(dir.path()).with_stale_window_ms(0);
        let guard = lock.acquire("acct", "secret").await.unwrap();
        // Don't call release — simulate a crashed holder. The in-process
        // registry would still block a same-process reacquire, so drop the
        // guard's bookkeeping by constructing a fresh lock with its own
        // registry, same directory, to emulate "different process".
        drop(guard);
        let lock2 = PollerLock::new(dir.path()).with_stale_window_ms(0);
        assert!(lock2.acquire("acct", "secret").await.is_ok());
    }

    #[tokio::test]
    async fn release_is_idempotent_even_with_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PollerLock::new(dir.path());
        let guard = lock.acquire("acct", "secret").await.unwrap();
        let _ = std::fs::remove_file(&guard.path);
        lock.release(guard).await;
    }
}
