//! Single-writer lock for the resume-logs directory, using `flock(2)`
//! directly.
//!
//! Uses raw `libc::flock` instead of RAII lock wrappers to avoid the
//! self-referential struct problem: an RAII guard borrows the lock owner,
//! making it impossible to store both in the same struct without lifetime
//! gymnastics.
//!
//! By calling `flock(2)` directly, we only need to own the `File` (which
//! owns the fd). `Drop` calls `flock(fd, LOCK_UN)` to release.
//!
//! The lock file carries a JSON diagnostic with the holder's session id and
//! pid. When acquisition fails, a `kill(pid, 0)` probe distinguishes a live
//! holder (refuse with `ConcurrentWriter`) from an unreadable diagnostic.

use chrono::{DateTime, Utc};
use mpm_core::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = ".writer.lock";

/// Diagnostic information written to the lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    session_id: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Writer lock guard backed by `flock(2)`.
///
/// Holds the open `File` whose fd carries the advisory lock.
/// On `Drop`, the lock is explicitly released via `flock(fd, LOCK_UN)`.
pub struct WriterLock {
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for WriterLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid file descriptor owned by `self.file`.
        // `LOCK_UN` releases the advisory lock. If the call fails the lock
        // is still released when the fd is closed moments later.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl WriterLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Whether a process with the given pid is alive.
fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // SAFETY: kill with signal 0 performs error checking only; it never
    // delivers a signal.
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Acquire the exclusive writer lock for a resume-logs directory.
///
/// Lock path: `{storage_dir}/.writer.lock`
///
/// On success the diagnostic JSON (session id, pid, acquired_at) is written
/// to the lock file and a guard that releases on drop is returned.
///
/// On failure the existing diagnostic is read back and, if the holder is a
/// different live session, `ConcurrentWriter` is returned.
pub fn acquire_writer_lock(storage_dir: &Path, session_id: &str) -> Result<WriterLock> {
    fs::create_dir_all(storage_dir)?;

    let lock_path = storage_dir.join(LOCK_FILE_NAME);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    let fd = file.as_raw_fd();

    // SAFETY: `fd` is a valid file descriptor from the `File` we just
    // opened. `LOCK_EX | LOCK_NB` requests an exclusive non-blocking lock.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

    if ret == 0 {
        let mut lock = WriterLock { file, lock_path };

        let diagnostic = LockDiagnostic {
            session_id: session_id.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        let json = serde_json::to_string(&diagnostic)
            .map_err(|e| EngineError::InvalidInput(format!("lock diagnostic: {e}")))?;

        lock.file.set_len(0)?;
        lock.file.write_all(json.as_bytes())?;
        lock.file.flush()?;

        Ok(lock)
    } else {
        let mut contents = String::new();
        let mut diag_file = File::open(&lock_path)?;
        diag_file.read_to_string(&mut contents)?;

        // flock failure means the holder's fd is still open, so it is live
        // by definition; the diagnostic just names it.
        match serde_json::from_str::<LockDiagnostic>(&contents) {
            Ok(diag) => Err(EngineError::ConcurrentWriter {
                session_id: diag.session_id,
                pid: diag.pid,
            }),
            Err(_) => {
                tracing::warn!(
                    path = %lock_path.display(),
                    "writer lock held but diagnostic is unreadable"
                );
                Err(EngineError::ConcurrentWriter {
                    session_id: "<unknown>".to_string(),
                    pid: 0,
                })
            }
        }
    }
}

/// Probe the lock file without acquiring: returns the holder's session id
/// if a different live session currently owns the directory.
pub fn probe_writer_lock(storage_dir: &Path, session_id: &str) -> Result<Option<String>> {
    let lock_path = storage_dir.join(LOCK_FILE_NAME);
    if !lock_path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&lock_path)?;
    match serde_json::from_str::<LockDiagnostic>(&contents) {
        Ok(diag) if diag.session_id != session_id && pid_alive(diag.pid) => {
            Ok(Some(diag.session_id))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_lock_succeeds() {
        let temp_dir = tempdir().expect("Failed to create temp dir");

        let lock = acquire_writer_lock(temp_dir.path(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert!(lock.is_ok(), "Lock acquisition should succeed");
        assert!(lock.unwrap().lock_path().exists());
    }

    #[test]
    fn test_lock_file_path_convention() {
        let temp_dir = tempdir().expect("Failed to create temp dir");

        let lock = acquire_writer_lock(temp_dir.path(), "01ARZ3NDEKTSV4RRFFQ69G5FAV")
            .expect("Failed to acquire lock");

        assert_eq!(lock.lock_path(), temp_dir.path().join(".writer.lock"));
    }

    #[test]
    fn test_lock_diagnostic_written() {
        let temp_dir = tempdir().expect("Failed to create temp dir");

        let _lock = acquire_writer_lock(temp_dir.path(), "01ARZ3NDEKTSV4RRFFQ69G5FAV")
            .expect("Failed to acquire lock");

        let contents = fs::read_to_string(temp_dir.path().join(LOCK_FILE_NAME)).unwrap();
        let diag: LockDiagnostic = serde_json::from_str(&contents).unwrap();
        assert_eq!(diag.session_id, "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(diag.pid, std::process::id());
    }

    #[test]
    fn test_second_lock_fails_with_concurrent_writer() {
        let temp_dir = tempdir().expect("Failed to create temp dir");

        let _lock1 = acquire_writer_lock(temp_dir.path(), "01ARZ3NDEKTSV4RRFFQ69G5FAV")
            .expect("First lock should succeed");

        let err = acquire_writer_lock(temp_dir.path(), "01BX5ZZKBKACTAV9WEVGEMMVRZ").unwrap_err();
        match err {
            EngineError::ConcurrentWriter { session_id, pid } => {
                assert_eq!(session_id, "01ARZ3NDEKTSV4RRFFQ69G5FAV");
                assert_eq!(pid, std::process::id());
            }
            other => panic!("Expected ConcurrentWriter, got {other:?}"),
        }
    }

    #[test]
    fn test_storage_dir_created_automatically() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let nested = temp_dir.path().join("deep").join("resume-logs");

        assert!(!nested.exists());
        let lock = acquire_writer_lock(&nested, "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert!(lock.is_ok(), "Should create intermediate dirs");
        assert!(nested.is_dir());
    }

    #[test]
    fn test_probe_without_lock_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let holder = probe_writer_lock(temp_dir.path(), "01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        assert!(holder.is_none());
    }

    #[test]
    fn test_probe_ignores_same_session() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let _lock = acquire_writer_lock(temp_dir.path(), "01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();

        let holder = probe_writer_lock(temp_dir.path(), "01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        assert!(holder.is_none(), "Own session must not count as a conflict");
    }

    #[test]
    fn test_probe_stale_pid_not_a_conflict() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let diag = LockDiagnostic {
            session_id: "01BX5ZZKBKACTAV9WEVGEMMVRZ".to_string(),
            pid: 0,
            acquired_at: Utc::now(),
        };
        fs::write(
            temp_dir.path().join(LOCK_FILE_NAME),
            serde_json::to_string(&diag).unwrap(),
        )
        .unwrap();

        let holder = probe_writer_lock(temp_dir.path(), "01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        assert!(holder.is_none(), "Dead holder must not block bootstrap");
    }

    #[test]
    fn test_lock_debug_format() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let lock = acquire_writer_lock(temp_dir.path(), "01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();

        let debug = format!("{:?}", lock);
        assert!(debug.contains("WriterLock"));
        assert!(debug.contains("lock_path"));
    }
}
