//! Shared-memory array channel I/O (spec.md §4.9).
//!
//! `pjrmi_marshal::shm_policy::evaluate` decides whether an argument is
//! *eligible* for this channel; this module does the actual file I/O once
//! it is. Falling back to inline encoding on failure is mandatory, but it
//! is the caller's responsibility, not this module's: every function here
//! simply returns [`ClientError`] rather than attempting its own fallback.

use std::{
    fs,
    io::Write as _,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use pjrmi_core::Environment;

use crate::error::ClientError;

/// How long a written SHM file may sit unconsumed before the background
/// cleaner removes it (spec.md §4.9).
pub const CLEANER_MAX_AGE: Duration = Duration::from_secs(5);

/// Period between cleaner sweeps.
pub const CLEANER_SWEEP_PERIOD: Duration = Duration::from_secs(1);

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

/// Writes `bytes` (an array's raw element encoding) to a freshly named
/// file under `dir` and returns the filename. The wire encoding carries
/// only the name (spec.md §4.9); the directory is a connection-level
/// convention shared by both peers on the same host.
///
/// # Errors
///
/// [`ClientError::Io`] if the directory or file cannot be created or
/// written.
pub fn write_array(dir: &Path, bytes: &[u8]) -> Result<String, ClientError> {
    fs::create_dir_all(dir)?;
    let id = NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let name = format!("pjrmi-shm-{pid}-{id}.bin");
    let mut file = fs::File::create(dir.join(&name))?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(name)
}

/// Reads back an array file named by a peer's `SHM_BYTES` message.
///
/// # Errors
///
/// [`ClientError::Io`] if the file cannot be opened or read.
pub fn read_array(dir: &Path, filename: &str) -> Result<Vec<u8>, ClientError> {
    Ok(fs::read(dir.join(filename))?)
}

/// Removes every file this process wrote under `dir` (spec.md §4.10
/// shutdown: "unlink pending SHM files"). Best-effort: a file that can't
/// be removed is logged, not surfaced, matching the drop-flusher's
/// disconnect-time behavior.
pub fn unlink_all(dir: &Path) {
    sweep_matching(dir, &this_process_prefix(), |_| true);
}

/// Spawns the background cleaner thread: sweeps `dir` every
/// [`CLEANER_SWEEP_PERIOD`], removing this process's own files older than
/// [`CLEANER_MAX_AGE`] (spec.md §4.9). Exits once `connected` observes
/// `false`.
///
/// File age is measured against the real wall clock rather than
/// `env`'s, since a file's modification time is an OS-level property a
/// test [`Environment`] has no way to virtualize; `env` only paces the
/// sweep loop itself.
pub fn spawn_cleaner<E: Environment>(
    dir: PathBuf,
    connected: Arc<AtomicBool>,
    env: E,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let prefix = this_process_prefix();
        while connected.load(Ordering::Acquire) {
            env.sleep(CLEANER_SWEEP_PERIOD);
            if !connected.load(Ordering::Acquire) {
                break;
            }
            sweep_matching(&dir, &prefix, is_stale);
        }
    })
}

fn this_process_prefix() -> String {
    format!("pjrmi-shm-{}-", std::process::id())
}

fn is_stale(modified: SystemTime) -> bool {
    modified.elapsed().unwrap_or(Duration::ZERO) > CLEANER_MAX_AGE
}

fn sweep_matching(dir: &Path, prefix: &str, should_remove: impl Fn(SystemTime) -> bool) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(prefix) {
            continue;
        }

        let modified = entry.metadata().and_then(|metadata| metadata.modified());
        let remove = match modified {
            Ok(modified) => should_remove(modified),
            Err(_) => true,
        };

        if remove {
            if let Err(err) = fs::remove_file(entry.path()) {
                tracing::warn!(file = name, error = %err, "failed to remove SHM file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pjrmi_core::SystemEnvironment;

    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("pjrmi-shm-test-{name}-{}-{}", std::process::id(), name.len()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn write_array_then_read_array_round_trips() {
        let dir = test_dir("roundtrip");
        let name = write_array(&dir, &[1, 2, 3, 4]).unwrap();
        let bytes = read_array(&dir, &name).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn write_array_assigns_distinct_names() {
        let dir = test_dir("distinct-names");
        let first = write_array(&dir, &[0]).unwrap();
        let second = write_array(&dir, &[0]).unwrap();
        assert_ne!(first, second);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unlink_all_removes_this_process_files_only() {
        let dir = test_dir("unlink-all");
        let ours = write_array(&dir, &[9]).unwrap();
        let foreign = "pjrmi-shm-999999999-0.bin";
        fs::write(dir.join(foreign), b"other").unwrap();

        unlink_all(&dir);

        assert!(!dir.join(&ours).exists());
        assert!(dir.join(foreign).exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn sweep_removes_only_stale_files() {
        let dir = test_dir("sweep-stale");
        let prefix = this_process_prefix();

        let stale_path = dir.join(format!("{prefix}stale.bin"));
        let fresh_path = dir.join(format!("{prefix}fresh.bin"));
        fs::write(&stale_path, b"old").unwrap();
        fs::write(&fresh_path, b"new").unwrap();

        let stale_file = fs::OpenOptions::new().write(true).open(&stale_path).unwrap();
        stale_file.set_modified(SystemTime::now() - Duration::from_secs(30)).unwrap();

        sweep_matching(&dir, &prefix, is_stale);

        assert!(!stale_path.exists());
        assert!(fresh_path.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn cleaner_thread_stops_once_disconnected() {
        let dir = test_dir("cleaner-stops");
        let connected = Arc::new(AtomicBool::new(true));
        let handle = spawn_cleaner(dir.clone(), Arc::clone(&connected), SystemEnvironment);

        connected.store(false, Ordering::Release);
        handle.join().unwrap();

        fs::remove_dir_all(&dir).unwrap();
    }
}
