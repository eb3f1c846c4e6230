// File: ./src/storage.rs
//! On-disk helpers for `config.toml`.
//!
//! The activity cache itself is never persisted; the config file is the only
//! thing weekplan writes besides its log. Two CLI invocations may save it at
//! the same time, hence the lock file and the write-then-rename.
use anyhow::Result;
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};

pub struct LocalStorage;

impl LocalStorage {
    /// `config.toml` is guarded by `config.toml.lock` in the same directory.
    fn get_lock_path(file_path: &Path) -> PathBuf {
        let mut name = file_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Runs `f` under the exclusive `fs2` lock for `file_path`. The lock is
    /// advisory: only other weekplan processes honour it.
    pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock_path = Self::get_lock_path(file_path);
        let file = fs::File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        file.lock_exclusive()?;
        let result = f();
        FileExt::unlock(&file)?;
        result
    }

    /// Replaces `path` in one rename, so a reader sees either the old config
    /// or the new one, never a half-written file.
    pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }
}
