//! # File I/O Module
//!
//! Every document the library persists goes through here:
//! - **Atomic writes**: write to `.tmp`, fsync, rename over the target
//! - **Locking**: an exclusive OS lock plus a JSON lock file naming the holder
//! - **Version validation**: artifacts and family documents carry a schema version
//!
//! ## Lock files
//!
//! A family document `x.familia.json` is locked through
//! `x.familia.json.lock`; a cache directory through `{dir}/.aea.lock`.
//!
//! ```rust,no_run
//! use aea_core::file_io::{write_json_atomic, FileLock};
//! use std::path::Path;
//!
//! let dir = Path::new("cache");
//! let lock = FileLock::acquire_dir(dir, "proyectista")?;
//! write_json_atomic(&serde_json::json!({"ok": true}), &dir.join("a.json"))?;
//! drop(lock);
//! # Ok::<(), aea_core::errors::CalcError>(())
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{CalcError, CalcResult};

/// Schema version written into artifacts and family documents.
pub const SCHEMA_VERSION: &str = "0.1.0";

/// Name of the lock file inside a locked directory.
pub const DIR_LOCK_NAME: &str = ".aea.lock";

/// Lock file metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// User name of the holder
    pub user: String,
    /// Machine name where lock was acquired
    pub machine: String,
    /// Process ID that holds the lock
    pub pid: u32,
    pub locked_at: DateTime<Utc>,
}

impl LockInfo {
    /// Lock info for the current process
    pub fn new(user: impl Into<String>) -> Self {
        LockInfo {
            user: user.into(),
            machine: hostname().unwrap_or_else(|| "unknown".to_string()),
            pid: std::process::id(),
            locked_at: Utc::now(),
        }
    }
}

/// Login name of the current user, `"unknown"` when the environment has none.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn hostname() -> Option<String> {
    #[cfg(windows)]
    {
        std::env::var("COMPUTERNAME").ok()
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::env::var("HOST").ok())
    }
}

/// Exclusive lock guard, released on drop.
///
/// Holds both an OS-level `fs2` lock on the lock file and the lock file's
/// JSON contents, so other processes can tell who holds it.
pub struct FileLock {
    /// The locked file or directory
    target: PathBuf,
    lock_path: PathBuf,
    /// Keeps the OS lock alive
    _lock_file: File,
    pub info: LockInfo,
}

impl FileLock {
    /// Lock a document; the lock file sits next to it.
    pub fn acquire(path: &Path, user: impl Into<String>) -> CalcResult<Self> {
        Self::acquire_at(path, lock_path_for(path), user.into())
    }

    /// Lock a directory (created if missing) through `{dir}/.aea.lock`.
    pub fn acquire_dir(dir: &Path, user: impl Into<String>) -> CalcResult<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| CalcError::file_error("create directory", dir.display().to_string(), e.to_string()))?;
        Self::acquire_at(dir, dir.join(DIR_LOCK_NAME), user.into())
    }

    fn acquire_at(target: &Path, lock_path: PathBuf, user: String) -> CalcResult<Self> {
        if let Some(existing) = live_lock(&lock_path) {
            return Err(CalcError::file_locked(
                target.display().to_string(),
                format!("{} ({})", existing.user, existing.machine),
                existing.locked_at.to_rfc3339(),
            ));
        }

        // The holder's info stays until the OS lock is ours
        let mut lock_file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| CalcError::file_error("create lock", lock_path.display().to_string(), e.to_string()))?;

        lock_file.try_lock_exclusive().map_err(|_| {
            CalcError::file_locked(
                target.display().to_string(),
                "another process".to_string(),
                "unknown".to_string(),
            )
        })?;
        lock_file
            .set_len(0)
            .map_err(|e| CalcError::file_error("truncate lock", lock_path.display().to_string(), e.to_string()))?;

        let info = LockInfo::new(user);
        let lock_json = serde_json::to_string_pretty(&info).map_err(CalcError::serialization)?;
        lock_file
            .write_all(lock_json.as_bytes())
            .map_err(|e| CalcError::file_error("write lock", lock_path.display().to_string(), e.to_string()))?;
        lock_file
            .sync_all()
            .map_err(|e| CalcError::file_error("sync lock", lock_path.display().to_string(), e.to_string()))?;

        Ok(FileLock {
            target: target.to_path_buf(),
            lock_path,
            _lock_file: lock_file,
            info,
        })
    }

    /// Holder of the lock on a document, if any.
    pub fn check(path: &Path) -> Option<LockInfo> {
        live_lock(&lock_path_for(path))
    }

    /// Holder of the lock on a directory, if any.
    pub fn check_dir(dir: &Path) -> Option<LockInfo> {
        live_lock(&dir.join(DIR_LOCK_NAME))
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // OS lock goes with _lock_file
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock_path = path.to_path_buf();
    let extension = lock_path
        .extension()
        .map(|e| format!("{}.lock", e.to_string_lossy()))
        .unwrap_or_else(|| "lock".to_string());
    lock_path.set_extension(extension);
    lock_path
}

fn live_lock(lock_path: &Path) -> Option<LockInfo> {
    if !lock_path.exists() {
        return None;
    }
    let info: LockInfo = read_json(lock_path).ok()?;
    (!is_lock_stale(&info)).then_some(info)
}

/// A lock is stale when its process is gone (same machine) or it is
/// older than a day.
fn is_lock_stale(info: &LockInfo) -> bool {
    if let Some(our_machine) = hostname() {
        if info.machine == our_machine {
            #[cfg(windows)]
            {
                use std::process::Command;
                let output = Command::new("tasklist")
                    .args(["/FI", &format!("PID eq {}", info.pid), "/NH"])
                    .output();
                if let Ok(output) = output {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    if stdout.contains("No tasks") || !stdout.contains(&info.pid.to_string()) {
                        return true;
                    }
                }
            }
            #[cfg(unix)]
            {
                if fs::metadata(format!("/proc/{}", info.pid)).is_err() {
                    return true;
                }
            }
        }
    }

    let age = Utc::now() - info.locked_at;
    age.num_hours() > 24
}

/// Write `bytes` to `path` atomically.
///
/// 1. Write `{path}.tmp`
/// 2. fsync
/// 3. Rename over `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> CalcResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| CalcError::file_error("create directory", parent.display().to_string(), e.to_string()))?;
    }
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut tmp_file = File::create(&tmp_path)
        .map_err(|e| CalcError::file_error("create temp file", tmp_path.display().to_string(), e.to_string()))?;
    tmp_file
        .write_all(bytes)
        .map_err(|e| CalcError::file_error("write temp file", tmp_path.display().to_string(), e.to_string()))?;
    tmp_file
        .sync_all()
        .map_err(|e| CalcError::file_error("sync temp file", tmp_path.display().to_string(), e.to_string()))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        CalcError::file_error("rename to final", path.display().to_string(), e.to_string())
    })
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(value: &T, path: &Path) -> CalcResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(CalcError::serialization)?;
    write_atomic(path, json.as_bytes())
}

/// Read and parse a JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> CalcResult<T> {
    let mut file = File::open(path).map_err(|e| CalcError::file_error("open", path.display().to_string(), e.to_string()))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| CalcError::file_error("read", path.display().to_string(), e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| CalcError::SerializationError {
        reason: format!("Invalid JSON in {}: {}", path.display(), e),
    })
}

/// Check that a stored schema version can be read by this build.
///
/// Major versions must match; in 0.x a newer minor is rejected.
pub fn validate_version(file_version: &str) -> CalcResult<()> {
    let parse = |v: &str| -> Vec<u32> { v.split('.').filter_map(|p| p.parse().ok()).collect() };
    let file_parts = parse(file_version);
    let current_parts = parse(SCHEMA_VERSION);
    let mismatch = || CalcError::VersionMismatch {
        file_version: file_version.to_string(),
        expected_version: SCHEMA_VERSION.to_string(),
    };

    let (Some(file_major), Some(current_major)) = (file_parts.first(), current_parts.first()) else {
        return Err(mismatch());
    };
    if file_major != current_major {
        return Err(mismatch());
    }
    if *current_major == 0 {
        if let (Some(file_minor), Some(current_minor)) = (file_parts.get(1), current_parts.get(1)) {
            if file_minor > current_minor {
                return Err(mismatch());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_generation() {
        let lock_path = lock_path_for(Path::new("/datos/linea.familia.json"));
        assert_eq!(lock_path, Path::new("/datos/linea.familia.json.lock"));
    }

    #[test]
    fn test_lock_info_creation() {
        let info = LockInfo::new("proyectista");
        assert_eq!(info.user, "proyectista");
        assert!(info.pid > 0);
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("doc.json");
        write_json_atomic(&json!({"L_vano": 350.0}), &path).unwrap();
        let back: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(back["L_vano"], 350.0);
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");
        write_atomic(&path, b"{}").unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("a.json.tmp").exists());
    }

    #[test]
    fn test_read_json_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
        let missing = read_json::<serde_json::Value>(&dir.path().join("none.json")).unwrap_err();
        assert_eq!(missing.error_code(), CalcError::file_error("", "", "").error_code());
    }

    #[test]
    fn test_file_lock_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("linea.familia.json");
        File::create(&path).unwrap();

        let lock = FileLock::acquire(&path, "proyectista").unwrap();
        assert_eq!(lock.info.user, "proyectista");
        let lock_path = lock_path_for(&path);
        assert!(lock_path.exists());

        drop(lock);
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_dir_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        let lock = FileLock::acquire_dir(&cache, "a").unwrap();
        assert!(cache.join(DIR_LOCK_NAME).exists());
        assert!(FileLock::acquire_dir(&cache, "b").is_err());
        drop(lock);
        assert!(FileLock::check_dir(&cache).is_none());
        assert!(FileLock::acquire_dir(&cache, "b").is_ok());
    }

    #[test]
    fn test_losing_acquire_keeps_holder_info() {
        use fs2::FileExt;

        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        let lock_path = cache.join(DIR_LOCK_NAME);

        // Holder whose info reads as stale but still holds the OS lock
        let info = LockInfo {
            user: "a".to_string(),
            machine: "otra-maquina".to_string(),
            pid: 1,
            locked_at: Utc::now() - chrono::Duration::days(2),
        };
        let written = serde_json::to_string_pretty(&info).unwrap();
        let mut holder = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .unwrap();
        holder.write_all(written.as_bytes()).unwrap();
        holder.sync_all().unwrap();
        holder.try_lock_exclusive().unwrap();

        let err = FileLock::acquire_dir(&cache, "b").err().unwrap();
        assert_eq!(err.error_code(), CalcError::file_locked("", "", "").error_code());
        assert_eq!(fs::read_to_string(&lock_path).unwrap(), written);

        holder.unlock().unwrap();
        drop(holder);
        let lock = FileLock::acquire_dir(&cache, "b").unwrap();
        let on_disk: LockInfo = read_json(&lock_path).unwrap();
        assert_eq!(on_disk.user, "b");
        assert_eq!(lock.info.user, "b");
    }

    #[test]
    fn test_version_validation() {
        assert!(validate_version(SCHEMA_VERSION).is_ok());
        assert!(validate_version("0.1.5").is_ok());
        assert!(validate_version("0.0.9").is_ok());
        assert!(validate_version("1.0.0").is_err());
        assert!(validate_version("0.2.0").is_err());
        assert!(validate_version("garbage").is_err());
    }
}
