//! Filesystem sources for archives
//!
//! A [`Source`] names a file or directory and where its contents go inside the
//! archive. Resolving sources gives one [`FileRecord`] per file: entry name, path,
//! length and modification time. Entry names always use `/` separators.

use crate::archive::ZipArchive;
use crate::dos_time::DosDateTime;
use crate::entry::EntryOptions;
use crate::error::Result;
use crate::sink::ArchiveSink;
use crate::stream::{calculate_total_size, stream_archive, SizedEntry, StreamEntry};
use std::ffi::OsStr;
use std::fs::{self, File, Metadata};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// A file or directory to put into an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub from: PathBuf,
    /// Directory inside the archive; empty for the archive root
    pub to: String,
    /// For directories: descend into subdirectories
    pub recursive: bool,
}

impl Source {
    /// Archive root, recursive
    pub fn new(from: impl Into<PathBuf>) -> Self {
        Self {
            from: from.into(),
            to: String::new(),
            recursive: true,
        }
    }

    pub fn directory(from: impl Into<PathBuf>, to: impl Into<String>, recursive: bool) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            recursive,
        }
    }

    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    #[must_use]
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

impl From<&str> for Source {
    fn from(from: &str) -> Self {
        Source::new(from)
    }
}

impl From<PathBuf> for Source {
    fn from(from: PathBuf) -> Self {
        Source::new(from)
    }
}

/// A resolved file, ready to be streamed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DosDateTime,
}

impl FileRecord {
    fn from_metadata(name: String, path: PathBuf, metadata: &Metadata) -> Self {
        let modified = metadata
            .modified()
            .map(DosDateTime::from_system_time)
            .unwrap_or_else(|_| DosDateTime::now());
        Self {
            name,
            path,
            size: metadata.len(),
            modified,
        }
    }

    pub fn into_stream_entry(self) -> Result<StreamEntry> {
        StreamEntry::new(self.name, self.size, self.modified, self.path)
    }
}

impl SizedEntry for FileRecord {
    fn name_len(&self) -> u64 {
        self.name.len() as u64
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Join archive path segments with `/`, dropping empty and leading separators
fn entry_name(to: &str, relative_dir: &Path, file_name: Option<&OsStr>) -> String {
    let mut parts: Vec<String> = to
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();
    for component in relative_dir.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_string_lossy().into_owned());
        }
    }
    if let Some(file_name) = file_name {
        parts.push(file_name.to_string_lossy().into_owned());
    }
    parts.join("/")
}

/// Expand sources into one record per file, in a stable (name sorted) walk order
pub fn resolve_sources(sources: &[Source]) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    for source in sources {
        let metadata = fs::metadata(&source.from)?;
        if metadata.is_dir() {
            let max_depth = if source.recursive { usize::MAX } else { 1 };
            let walker = WalkDir::new(&source.from)
                .min_depth(1)
                .max_depth(max_depth)
                .sort_by_file_name();
            for entry in walker {
                let entry = entry.map_err(io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .parent()
                    .and_then(|dir| dir.strip_prefix(&source.from).ok())
                    .unwrap_or_else(|| Path::new(""));
                let name = entry_name(&source.to, relative, Some(entry.file_name()));
                let metadata = entry.metadata().map_err(io::Error::from)?;
                records.push(FileRecord::from_metadata(
                    name,
                    entry.path().to_path_buf(),
                    &metadata,
                ));
            }
        } else {
            let name = entry_name(&source.to, Path::new(""), source.from.file_name());
            records.push(FileRecord::from_metadata(
                name,
                source.from.clone(),
                &metadata,
            ));
        }
    }
    debug!(sources = sources.len(), files = records.len(), "resolved sources");
    Ok(records)
}

/// Resolve `sources` and stream them to `dest`, returning the bytes written
pub fn stream_sources<W: Write>(sources: &[Source], dest: W) -> Result<u64> {
    let entries = resolve_sources(sources)?
        .into_iter()
        .map(FileRecord::into_stream_entry)
        .collect::<Result<Vec<_>>>()?;
    stream_archive(&entries, dest)
}

/// Length of the archive [`stream_sources`] would write, from file metadata only
pub fn calculate_sources_size(sources: &[Source]) -> Result<u64> {
    Ok(calculate_total_size(&resolve_sources(sources)?))
}

/// Build a general archive from a directory tree
///
/// Every file becomes an entry; directories without children become `dir/` entries.
pub fn create_from_directory<S: ArchiveSink>(dir: impl AsRef<Path>, sink: S) -> Result<S> {
    let dir = dir.as_ref();
    let mut archive = ZipArchive::new(sink)?;

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let metadata = entry.metadata().map_err(io::Error::from)?;
        let mut options = EntryOptions::new();
        if let Ok(modified) = metadata.modified() {
            options = options.last_modified_system(modified);
        }
        if let Some(mode) = unix_mode(&metadata) {
            options = options.unix_permissions(mode);
        }

        if entry.file_type().is_dir() {
            if fs::read_dir(entry.path())?.next().is_none() {
                let name = entry_name("", relative, None);
                archive.add_directory(&name, options)?;
            }
        } else if entry.file_type().is_file() {
            let name = entry_name("", relative, None);
            archive.add_entry(&name, options, File::open(entry.path())?)?;
        }
    }

    archive.into_inner()
}

#[cfg(unix)]
fn unix_mode(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &Metadata) -> Option<u32> {
    None
}
