use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};

#[cfg(feature = "async-tokio")]
use crate::counter::AsyncCounterBackend;
use crate::{
    counter::CounterBackend,
    error::{Error, Result},
};

/// A host-local counter backend: one file per key holding the counter as a
/// decimal integer.
///
/// Every increment opens the key's file, takes an exclusive advisory `flock`,
/// reads, adds, writes back and syncs before the lock is released. Because
/// `flock` locks belong to the open file description, this serializes
/// increments between threads of one process as well as between processes on
/// the same host sharing the directory.
///
/// An empty or missing file reads as zero.
#[derive(Clone, Debug)]
pub struct FileCounter {
    dir: PathBuf,
}

impl FileCounter {
    /// Creates a counter rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::configuration(format!(
                "cannot create counter directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    /// The directory holding the counter files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file backing `key`.
    ///
    /// Bytes outside `[A-Za-z0-9._-]` are percent-encoded so that distinct
    /// keys never share a file.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + 4);
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
                name.push(char::from(byte));
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        name.push_str(".bin");
        self.dir.join(name)
    }

    fn add(&self, key: &str, n: u64) -> Result<u64> {
        let path = self.path_for(key);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let _lock = ExclusiveLock::acquire(&file)?;

        let mut contents = String::new();
        (&file).read_to_string(&mut contents)?;
        let contents = contents.trim();
        let current = if contents.is_empty() {
            0
        } else {
            contents.parse::<u64>().map_err(|e| {
                Error::backend(format!("corrupt counter file {}: {e}", path.display()))
            })?
        };
        let next = current
            .checked_add(n)
            .ok_or_else(|| Error::backend(format!("counter `{key}` overflowed")))?;

        let encoded = next.to_string();
        (&file).seek(SeekFrom::Start(0))?;
        (&file).write_all(encoded.as_bytes())?;
        file.set_len(encoded.len() as u64)?;
        file.sync_data()?;

        Ok(next)
    }
}

impl CounterBackend for FileCounter {
    fn increment_by(&self, key: &str, n: u64) -> Result<u64> {
        self.add(key, n)
    }
}

/// File I/O runs on Tokio's blocking pool; the lock is never held by an async
/// task.
#[cfg(feature = "async-tokio")]
impl AsyncCounterBackend for FileCounter {
    fn increment_by_async(&self, key: &str, n: u64) -> impl Future<Output = Result<u64>> + Send {
        let counter = self.clone();
        let key = key.to_owned();
        async move {
            tokio::task::spawn_blocking(move || counter.add(&key, n))
                .await
                .map_err(|e| Error::backend(format!("file counter task failed: {e}")))?
        }
    }
}

/// Holds `LOCK_EX` on a file until dropped.
struct ExclusiveLock<'a> {
    file: &'a File,
}

impl<'a> ExclusiveLock<'a> {
    fn acquire(file: &'a File) -> io::Result<Self> {
        loop {
            // SAFETY: the descriptor is owned by `file` and outlives the lock.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc == 0 {
                return Ok(Self { file });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Drop for ExclusiveLock<'_> {
    fn drop(&mut self) {
        // SAFETY: see `acquire`. Closing the file would release the lock too.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex, thread::scope};

    use super::*;

    #[test]
    fn persists_decimal_totals() {
        let dir = tempfile::tempdir().unwrap();
        let counter = FileCounter::new(dir.path()).unwrap();

        assert_eq!(counter.increment("ids").unwrap(), 1);
        assert_eq!(counter.increment_by("ids", 41).unwrap(), 42);
        assert_eq!(fs::read_to_string(counter.path_for("ids")).unwrap(), "42");

        let reopened = FileCounter::new(dir.path()).unwrap();
        assert_eq!(reopened.increment("ids").unwrap(), 43);
    }

    #[test]
    fn empty_file_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let counter = FileCounter::new(dir.path()).unwrap();
        File::create(counter.path_for("ids")).unwrap();
        assert_eq!(counter.increment("ids").unwrap(), 1);
    }

    #[test]
    fn shrinking_value_leaves_no_stale_digits() {
        let dir = tempfile::tempdir().unwrap();
        let counter = FileCounter::new(dir.path()).unwrap();
        fs::write(counter.path_for("ids"), "99\n\n").unwrap();
        assert_eq!(counter.increment("ids").unwrap(), 100);
        assert_eq!(fs::read_to_string(counter.path_for("ids")).unwrap(), "100");
    }

    #[test]
    fn corrupt_file_is_a_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let counter = FileCounter::new(dir.path()).unwrap();
        fs::write(counter.path_for("ids"), "not a number").unwrap();
        assert!(matches!(
            counter.increment("ids"),
            Err(Error::BackendUnavailable { .. })
        ));
    }

    #[test]
    fn keys_map_to_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let counter = FileCounter::new(dir.path()).unwrap();
        let a = counter.path_for("distinctid:test:a");
        let b = counter.path_for("distinctid_test_a");
        assert_ne!(a, b);
        assert_eq!(a.file_name().unwrap(), "distinctid%3Atest%3Aa.bin");
        assert!(counter.path_for("../escape").starts_with(dir.path()));
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let counter = FileCounter::new(&nested).unwrap();
        assert_eq!(counter.dir(), nested.as_path());
        assert_eq!(counter.increment("ids").unwrap(), 1);
    }

    #[test]
    fn increments_are_atomic_across_threads() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 50;

        let dir = tempfile::tempdir().unwrap();
        let seen = Mutex::new(HashSet::new());

        scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    // A separate handle per thread, like separate processes.
                    let counter = FileCounter::new(dir.path()).unwrap();
                    for _ in 0..PER_THREAD {
                        let value = counter.increment("shared").unwrap();
                        assert!(seen.lock().unwrap().insert(value));
                    }
                });
            }
        });

        let counter = FileCounter::new(dir.path()).unwrap();
        assert_eq!(
            counter.increment_by("shared", 0).unwrap(),
            (THREADS * PER_THREAD) as u64
        );
        assert_eq!(seen.lock().unwrap().len(), THREADS * PER_THREAD);
    }

    #[cfg(feature = "async-tokio")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn async_increments_use_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let counter = FileCounter::new(dir.path()).unwrap();
        assert_eq!(counter.increment_async("ids").await.unwrap(), 1);
        assert_eq!(counter.increment_by_async("ids", 4).await.unwrap(), 5);
        assert_eq!(counter.increment("ids").unwrap(), 6);
    }
}
