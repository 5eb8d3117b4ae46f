use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::EtlError;

/// Extracts every entry of `zip_path` below `target_dir`. Entries escaping
/// the target directory are rejected.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, EtlError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| EtlError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| EtlError::Filesystem(err.to_string()))?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| EtlError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(EtlError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| EtlError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| EtlError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| EtlError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| EtlError::Filesystem(err.to_string()))?;
        extracted += 1;
    }
    Ok(extracted)
}

/// Extracts `zip_path` into a staging directory next to `destination` and
/// swaps it into place only after every entry was written. A failed
/// extraction leaves `destination` untouched.
pub fn extract_zip_staged(zip_path: &Path, destination: &Path) -> Result<usize, EtlError> {
    let parent = destination
        .parent()
        .ok_or_else(|| EtlError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| EtlError::Filesystem(err.to_string()))?;
    let staging = tempfile::Builder::new()
        .prefix(".tract-etl-extract")
        .tempdir_in(parent)
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    let extract_dir = staging.path().join("extract");
    fs::create_dir_all(&extract_dir).map_err(|err| EtlError::Filesystem(err.to_string()))?;

    let extracted = extract_zip(zip_path, &extract_dir)?;
    atomic_rename_dir(&extract_dir, destination)
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    Ok(extracted)
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

/// True when `path` is a file, or a directory with at least one entry.
pub fn is_materialized(path: &Path) -> bool {
    if path.is_file() {
        return true;
    }
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
