//! Existence-checked materialization of pipeline artifacts.
//!
//! Every file the pipeline produces goes through a [`MaterializationCache`].
//! Conversion and the national tract list only produce their bytes when the
//! key is absent; the always-overwritten artifacts call `materialize`
//! directly.

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::EtlError;

pub trait MaterializationCache: Send + Sync {
    fn exists(&self, key: &Utf8Path) -> bool;
    /// Stores `content` under `key`, replacing any previous artifact.
    fn materialize(&self, key: &Utf8Path, content: &[u8]) -> Result<Utf8PathBuf, EtlError>;
}

impl<T: MaterializationCache + ?Sized> MaterializationCache for &T {
    fn exists(&self, key: &Utf8Path) -> bool {
        (**self).exists(key)
    }

    fn materialize(&self, key: &Utf8Path, content: &[u8]) -> Result<Utf8PathBuf, EtlError> {
        (**self).materialize(key, content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Cached(Utf8PathBuf),
    Written(Utf8PathBuf),
}

impl Materialized {
    pub fn path(&self) -> &Utf8Path {
        match self {
            Materialized::Cached(path) | Materialized::Written(path) => path,
        }
    }

    pub fn was_written(&self) -> bool {
        matches!(self, Materialized::Written(_))
    }

    pub fn action(&self) -> &'static str {
        match self {
            Materialized::Cached(_) => "kept",
            Materialized::Written(_) => "written",
        }
    }
}

/// Runs `produce` and stores its output only when `key` is not yet present.
pub fn materialize_if_absent<C, F>(
    cache: &C,
    key: &Utf8Path,
    produce: F,
) -> Result<Materialized, EtlError>
where
    C: MaterializationCache + ?Sized,
    F: FnOnce() -> Result<Vec<u8>, EtlError>,
{
    if cache.exists(key) {
        return Ok(Materialized::Cached(key.to_path_buf()));
    }
    let content = produce()?;
    let path = cache.materialize(key, &content)?;
    Ok(Materialized::Written(path))
}

/// Filesystem-backed cache. Writes go to a temp file next to the target and
/// are persisted by rename, so a failed run never leaves a truncated artifact
/// that a later existence check would accept.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCache;

impl MaterializationCache for FsCache {
    fn exists(&self, key: &Utf8Path) -> bool {
        key.as_std_path().is_file()
    }

    fn materialize(&self, key: &Utf8Path, content: &[u8]) -> Result<Utf8PathBuf, EtlError> {
        let write_err = |message: String| EtlError::Write {
            path: key.to_path_buf(),
            message,
        };
        let parent = key
            .parent()
            .ok_or_else(|| write_err("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path()).map_err(|err| write_err(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".tract-etl")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| write_err(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| write_err(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| write_err(err.to_string()))?;
        temp.persist(key.as_std_path())
            .map_err(|err| write_err(err.to_string()))?;
        Ok(key.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct CountingCache {
        present: Mutex<Vec<Utf8PathBuf>>,
        writes: Mutex<usize>,
    }

    impl MaterializationCache for CountingCache {
        fn exists(&self, key: &Utf8Path) -> bool {
            self.present.lock().unwrap().iter().any(|path| path == key)
        }

        fn materialize(&self, key: &Utf8Path, _content: &[u8]) -> Result<Utf8PathBuf, EtlError> {
            *self.writes.lock().unwrap() += 1;
            self.present.lock().unwrap().push(key.to_path_buf());
            Ok(key.to_path_buf())
        }
    }

    #[test]
    fn materialize_if_absent_produces_once() {
        let cache = CountingCache::default();
        let key = Utf8Path::new("/data/census/geojson/01.geojson");
        let mut produced = 0;

        let first = materialize_if_absent(&cache, key, || {
            produced += 1;
            Ok(b"{}".to_vec())
        })
        .unwrap();
        let second = materialize_if_absent(&cache, key, || {
            produced += 1;
            Ok(b"{}".to_vec())
        })
        .unwrap();

        assert!(first.was_written());
        assert_eq!(second, Materialized::Cached(key.to_path_buf()));
        assert_eq!(produced, 1);
        assert_eq!(*cache.writes.lock().unwrap(), 1);
    }

    #[test]
    fn fs_cache_creates_parent_directories_and_replaces() {
        let temp = tempfile::tempdir().unwrap();
        let key = Utf8PathBuf::from_path_buf(temp.path().join("a").join("b").join("x.csv")).unwrap();

        FsCache.materialize(&key, b"one\n").unwrap();
        assert!(FsCache.exists(&key));
        FsCache.materialize(&key, b"two\n").unwrap();
        assert_eq!(fs::read_to_string(key.as_std_path()).unwrap(), "two\n");
    }

    #[test]
    fn fs_cache_reports_write_failures() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let key = Utf8PathBuf::from_path_buf(blocker.join("x.csv")).unwrap();

        let err = FsCache.materialize(&key, b"x").unwrap_err();
        assert!(matches!(err, EtlError::Write { path, .. } if path == key));
    }
}
