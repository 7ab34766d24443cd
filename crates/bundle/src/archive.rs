//! Episode archive writer
//!
//! Packs an episode directory into a deflated zip whose entries are rooted
//! at the directory's own name. Entries are sorted and carry fixed metadata
//! (1980-01-01 timestamps, fixed unix modes), so the same directory contents
//! always produce the same archive bytes.

use crate::types::ARCHIVE_EXTENSION;
use agenttrace_core::{Error, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// Default deflate level for episode archives.
pub const DEFAULT_DEFLATE_LEVEL: i64 = 6;

/// Sibling archive path for `dir`: `{parent}/{name}.zip`.
pub fn archive_path_for(dir: &Path) -> Result<PathBuf> {
    let name = dir_name(dir)?;
    Ok(dir.with_file_name(format!("{}.{}", name, ARCHIVE_EXTENSION)))
}

/// Archive `dir` into its sibling `.zip` and return the archive path.
///
/// The archive is written to a temporary sibling first and renamed into
/// place, so readers never observe a half-written archive. An empty
/// directory yields an archive holding only the root directory entry.
pub fn write_dir_archive(dir: &Path, level: i64) -> Result<PathBuf> {
    let root = dir_name(dir)?;
    let archive_path = archive_path_for(dir)?;
    let tmp_path = dir.with_file_name(format!("{}.{}.tmp", root, ARCHIVE_EXTENSION));

    let result = write_to(&tmp_path, dir, &root, level);
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, &archive_path)?;
    Ok(archive_path)
}

fn write_to(tmp_path: &Path, dir: &Path, root: &str, level: i64) -> Result<()> {
    let file = File::create(tmp_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level))
        .last_modified_time(DateTime::default());
    let dir_options = options.unix_permissions(DIR_MODE);
    let file_options = options.unix_permissions(FILE_MODE);

    zip.add_directory(format!("{}/", root), dir_options)
        .map_err(|e| zip_error(root, e))?;

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Archive(format!("walk {}: {}", dir.display(), e)))?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Archive(e.to_string()))?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        let entry_path = format!("{}/{}", root, rel);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", entry_path), dir_options)
                .map_err(|e| zip_error(&entry_path, e))?;
        } else if entry.file_type().is_file() {
            let data = fs::read(entry.path())?;
            zip.start_file(entry_path.as_str(), file_options)
                .map_err(|e| zip_error(&entry_path, e))?;
            zip.write_all(&data)?;
        }
    }

    let buffered = zip.finish().map_err(|e| zip_error(root, e))?;
    let file = buffered
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

fn zip_error(path: &str, e: ZipError) -> Error {
    match e {
        ZipError::Io(io) => Error::Io(io),
        other => Error::Archive(format!("append {}: {}", path, other)),
    }
}

fn dir_name(dir: &Path) -> Result<String> {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Archive(format!("{} has no directory name", dir.display())))
}
