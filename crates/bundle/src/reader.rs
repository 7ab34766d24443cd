//! Episode archive reader
//!
//! Reads `.zip` episode archives back into file contents or step records.

use crate::types::parse_step_rank;
use agenttrace_core::{Error, Result, SpanRecord};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Directory,
}

/// Reader for episode archives
pub struct EpisodeArchiveReader;

impl EpisodeArchiveReader {
    /// Read every regular file, keyed by its path inside the archive
    /// (e.g. `episode_0/step_1.json`).
    pub fn read_entries(path: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut files = BTreeMap::new();
        Self::for_each_entry(path, |entry_path, kind, data| {
            if kind == EntryKind::File {
                files.insert(entry_path, data);
            }
        })?;
        Ok(files)
    }

    /// Directory entries in the archive, without trailing slashes.
    pub fn directories(path: &Path) -> Result<Vec<String>> {
        let mut dirs = Vec::new();
        Self::for_each_entry(path, |entry_path, kind, _| {
            if kind == EntryKind::Directory {
                dirs.push(entry_path);
            }
        })?;
        Ok(dirs)
    }

    /// Parse the step files, ordered by rank.
    pub fn read_steps(path: &Path) -> Result<Vec<SpanRecord>> {
        let mut ranked = Vec::new();
        for (entry_path, data) in Self::read_entries(path)? {
            let file_name = entry_path.rsplit('/').next().unwrap_or(&entry_path);
            if let Some(rank) = parse_step_rank(file_name) {
                let record: SpanRecord = serde_json::from_slice(&data)?;
                ranked.push((rank, record));
            }
        }
        ranked.sort_by_key(|(rank, _)| *rank);
        Ok(ranked.into_iter().map(|(_, record)| record).collect())
    }

    fn for_each_entry<F>(path: &Path, mut visit: F) -> Result<()>
    where
        F: FnMut(String, EntryKind, Vec<u8>),
    {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(archive_error)?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(archive_error)?;
            let entry_path = entry.name().trim_end_matches('/').to_string();
            let kind = if entry.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| Error::Archive(format!("read {}: {}", entry_path, e)))?;
            visit(entry_path, kind, data);
        }
        Ok(())
    }
}

fn archive_error(e: ZipError) -> Error {
    match e {
        ZipError::Io(io) => Error::Io(io),
        other => Error::Archive(other.to_string()),
    }
}
