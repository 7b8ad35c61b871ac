//! Single-instance host lock (§5).
//!
//! Only one agent process may run against a given data directory at a
//! time, since both own the same cache/config/cert files on disk. Guarded
//! by an exclusively-created lock file (`O_CREAT | O_EXCL`) containing the
//! holder's PID, written with the same atomic-rename discipline as every
//! other persisted document in the core. A lock left behind by a process
//! that is no longer running is detected and reclaimed automatically.

use std::path::{Path, PathBuf};

use crate::error::{SignageError, SignageResult};

/// Holds the single-instance lock for as long as it is alive; removes the
/// lock file on drop so a clean shutdown never looks like a stale lock to
/// the next run.
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Acquires the lock file at `path`, reclaiming it first if it names a
    /// PID that is no longer running.
    pub fn acquire(path: &Path) -> SignageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SignageError::Internal(format!("creating lock directory: {e}")))?;
        }

        match create_exclusive(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(path) {
                    log::warn!(
                        "[single-instance] reclaiming stale lock at {}",
                        path.display()
                    );
                    std::fs::remove_file(path)
                        .map_err(|e| SignageError::Internal(format!("removing stale lock: {e}")))?;
                    create_exclusive(path)
                        .map_err(|e| SignageError::Internal(format!("creating lock file: {e}")))?;
                } else {
                    return Err(SignageError::Internal(format!(
                        "another instance is already running (lock held at {})",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                return Err(SignageError::Internal(format!("creating lock file: {e}")));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!(
                "[single-instance] failed to remove lock file {}: {e}",
                self.path.display()
            );
        }
    }
}

/// Creates `path` with `O_CREAT | O_EXCL` semantics and writes the
/// current PID into it. Fails with `ErrorKind::AlreadyExists` if the file
/// is already there.
#[cfg(unix)]
fn create_exclusive(path: &Path) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::io::FromRawFd;

    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `c_path` is a valid NUL-terminated C string for the
    // lifetime of this call; the returned fd (if non-negative) is owned
    // exclusively by this function and handed to `File::from_raw_fd`.
    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY, 0o644) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by a successful `open` call above and
    // is not used anywhere else.
    let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
    file.write_all(std::process::id().to_string().as_bytes())?;
    file.sync_all()
}

#[cfg(not(unix))]
fn create_exclusive(path: &Path) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)?;
    file.write_all(std::process::id().to_string().as_bytes())
}

/// True if `path` names a PID that is no longer running (or the file is
/// unreadable/unparsable, which is treated the same as stale).
#[cfg(unix)]
fn is_stale(path: &Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return true;
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return true;
    };
    // SAFETY: signal 0 sends no signal, only checks whether `pid` exists
    // and is signalable by this process.
    let alive = unsafe { libc::kill(pid, 0) } == 0;
    !alive
}

#[cfg(not(unix))]
fn is_stale(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("agent.lock");
        {
            let _lock = InstanceLock::acquire(&lock_path).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("agent.lock");
        let _first = InstanceLock::acquire(&lock_path).unwrap();
        assert!(InstanceLock::acquire(&lock_path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn stale_lock_naming_a_dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("agent.lock");
        // A PID essentially guaranteed not to be running.
        std::fs::write(&lock_path, "999999999").unwrap();
        let lock = InstanceLock::acquire(&lock_path);
        assert!(lock.is_ok());
    }
}
