//! Per-repository exclusive lock backed by `sweep.lock`.
//!
//! The file is opened or created and the handle keeps an `fs2` advisory lock
//! on it for its whole lifetime, so a crashed holder releases it
//! automatically. The file also records `{pid, acquired_at}` so a waiter can
//! reclaim a lock whose holder is gone or that has outlived the staleness
//! threshold.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::SweepError;
use crate::io::signal::CancelToken;

/// Acquisition tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub timeout: Duration,
    pub retry_interval: Duration,
    pub stale_after: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_interval: Duration::from_millis(250),
            stale_after: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct LockHolder {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Exclusive per-repository lock. Released (and the file removed) on drop.
#[derive(Debug)]
pub struct LockHandle {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub path: PathBuf,
    file: File,
}

impl LockHandle {
    /// Acquire the lock, retrying on a fixed interval until the timeout.
    /// A cancellation request ends the wait with `Interrupted`.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn acquire(path: &Path, settings: &LockSettings, cancel: &CancelToken) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock directory {}", parent.display()))?;
        }
        let start = Instant::now();
        loop {
            if let Some(handle) = Self::try_acquire(path)? {
                info!(pid = handle.pid, "lock acquired");
                return Ok(handle);
            }

            let holder = read_holder(path);
            if is_stale(holder.as_ref(), settings.stale_after) {
                warn!(holder = %describe(holder.as_ref()), "reclaiming stale lock");
                remove_lock_file(path);
                continue;
            }

            cancel.check()?;
            if start.elapsed() >= settings.timeout {
                return Err(SweepError::LockTimeout {
                    path: path.to_path_buf(),
                    holder: describe(holder.as_ref()),
                    waited_secs: start.elapsed().as_secs(),
                }
                .into());
            }
            debug!(holder = %describe(holder.as_ref()), "lock busy, retrying");
            thread::sleep(settings.retry_interval);
        }
    }

    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock {}", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }
        // A reclaimer may have unlinked the file between our open and lock.
        if !same_file(&file, path) {
            debug!("lock file replaced while acquiring, retrying");
            return Ok(None);
        }

        let holder = LockHolder {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let payload = serde_json::to_string(&holder).context("serialize lock holder")?;
        file.set_len(0).context("truncate lock file")?;
        file.seek(SeekFrom::Start(0)).context("seek lock file")?;
        file.write_all(payload.as_bytes())
            .context("write lock holder")?;
        file.sync_all().context("sync lock file")?;

        Ok(Some(Self {
            pid: holder.pid,
            acquired_at: holder.acquired_at,
            path: path.to_path_buf(),
            file,
        }))
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if same_file(&self.file, &self.path) {
            remove_lock_file(&self.path);
        }
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(err = %err, "failed to unlock");
        }
        debug!(path = %self.path.display(), "lock released");
    }
}

fn read_holder(path: &Path) -> Option<LockHolder> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
}

fn is_stale(holder: Option<&LockHolder>, stale_after: Duration) -> bool {
    let Some(holder) = holder else {
        // Holder still writing its record, or an unreadable file held by a live lock.
        return false;
    };
    if !pid_alive(holder.pid) {
        return true;
    }
    let age = Utc::now().signed_duration_since(holder.acquired_at);
    age.to_std().is_ok_and(|age| age > stale_after)
}

fn describe(holder: Option<&LockHolder>) -> String {
    match holder {
        Some(holder) => format!(
            "pid {} since {}",
            holder.pid,
            holder.acquired_at.to_rfc3339()
        ),
        None => "unknown holder".to_string(),
    }
}

fn remove_lock_file(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(err = %err, path = %path.display(), "failed to remove lock file");
    }
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(open), Ok(on_disk)) => open.dev() == on_disk.dev() && open.ino() == on_disk.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// True when a process with this pid is still running.
pub fn pid_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let proc_dir = Path::new("/proc");
    if proc_dir.is_dir() {
        return proc_dir.join(pid.to_string()).exists();
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(true)
}
