use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path};

use zip::ZipArchive;

use crate::error::MetaError;

/// Whether `relative` stays below whatever base it is joined onto: no root,
/// no drive prefix, no `..`.
pub fn is_enclosed(relative: &Path) -> bool {
    !relative.as_os_str().is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, MetaError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| MetaError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(|err| MetaError::Zip(err.to_string()))?;

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| MetaError::Zip(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(MetaError::Zip(format!(
                    "zip entry path traversal detected: {}",
                    entry.name()
                )));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| MetaError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| MetaError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| MetaError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| MetaError::Filesystem(err.to_string()))?;
        extracted += 1;
    }
    Ok(extracted)
}

/// Reads the first file in the archive whose name ends with `file_name`.
pub fn read_zip_member(zip_path: &Path, file_name: &str) -> Result<Option<Vec<u8>>, MetaError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| MetaError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(|err| MetaError::Zip(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| MetaError::Zip(err.to_string()))?;
        if entry.is_dir() || !entry.name().ends_with(file_name) {
            continue;
        }
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|err| MetaError::Zip(err.to_string()))?;
        return Ok(Some(content));
    }
    Ok(None)
}
