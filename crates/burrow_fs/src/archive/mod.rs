//! Archive browsing: container files exposed as directory trees
//!
//! A file whose name looks like a supported container is wrapped in an
//! [`ArchiveFile`]. Listing it decodes the container's flat entry list once,
//! builds an [`EntryTree`] and serves every later navigation from that tree.

mod adapter;
mod ar;
mod compressed;
mod entry;
mod iso;
mod tarball;
mod tree;
mod zipfile;

pub use adapter::{ArchiveEntryFile, ArchiveFile};
pub use entry::{ArchiveEntry, EntryPayload};
pub use tree::{EntryTree, NodeId};

use crate::file::read_all;
use crate::{FileHandle, FsError, ReadSeek, Result, VfsFile};
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

/// Compression applied on top of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    Gzip,
    Bzip2,
}

impl Compression {
    /// Wrap a compressed stream in the matching decoder
    pub(crate) fn decoder(self, raw: Box<dyn Read + Send>) -> Box<dyn Read + Send> {
        match self {
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(raw)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(raw)),
        }
    }
}

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    /// TAR, optionally compressed as a whole
    Tar(Option<Compression>),
    /// Single gzip-compressed member
    Gzip,
    /// Single bzip2-compressed member
    Bzip2,
    Ar,
    Iso,
}

/// Extension table; compound extensions come before their suffixes
const EXTENSIONS: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::Tar(Some(Compression::Gzip))),
    (".tgz", ArchiveFormat::Tar(Some(Compression::Gzip))),
    (".tar.bz2", ArchiveFormat::Tar(Some(Compression::Bzip2))),
    (".tbz2", ArchiveFormat::Tar(Some(Compression::Bzip2))),
    (".tar", ArchiveFormat::Tar(None)),
    (".gz", ArchiveFormat::Gzip),
    (".bz2", ArchiveFormat::Bzip2),
    (".zip", ArchiveFormat::Zip),
    (".jar", ArchiveFormat::Zip),
    (".iso", ArchiveFormat::Iso),
    (".nrg", ArchiveFormat::Iso),
    (".ar", ArchiveFormat::Ar),
    (".deb", ArchiveFormat::Ar),
];

impl ArchiveFormat {
    /// Detect archive format from a filename, case-insensitively
    pub fn detect(name: &str) -> Option<Self> {
        EXTENSIONS
            .iter()
            .find(|(ext, _)| name.len() > ext.len() && ends_with_ignore_case(name, ext))
            .map(|(_, format)| *format)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "ZIP",
            ArchiveFormat::Tar(None) => "TAR",
            ArchiveFormat::Tar(Some(Compression::Gzip)) => "TAR.GZ",
            ArchiveFormat::Tar(Some(Compression::Bzip2)) => "TAR.BZ2",
            ArchiveFormat::Gzip => "GZIP",
            ArchiveFormat::Bzip2 => "BZIP2",
            ArchiveFormat::Ar => "AR",
            ArchiveFormat::Iso => "ISO",
        }
    }

    pub(crate) fn decoder(self) -> Box<dyn ArchiveDecoder> {
        match self {
            ArchiveFormat::Zip => Box::new(zipfile::ZipDecoder),
            ArchiveFormat::Tar(compression) => Box::new(tarball::TarDecoder::new(compression)),
            ArchiveFormat::Gzip => Box::new(compressed::CompressedDecoder::new(Compression::Gzip)),
            ArchiveFormat::Bzip2 => {
                Box::new(compressed::CompressedDecoder::new(Compression::Bzip2))
            }
            ArchiveFormat::Ar => Box::new(ar::ArDecoder),
            ArchiveFormat::Iso => Box::new(iso::IsoDecoder::default()),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Per-format container reader
pub(crate) trait ArchiveDecoder: Send + Sync + fmt::Debug {
    /// Flat list of the container's entries, in container order
    fn list_entries(&self, file: &dyn VfsFile) -> Result<Vec<ArchiveEntry>>;

    /// Content of one entry previously returned by `list_entries`
    fn open_entry(&self, file: &dyn VfsFile, entry: &ArchiveEntry) -> Result<Box<dyn Read + Send>>;
}

/// Location property that turns archive browsing off when set to `false`
pub const BROWSE_ARCHIVES_PROPERTY: &str = "archives";

/// Wrap `file` in an archive adapter when its name is a known container format
///
/// Directories, handles that already are archives and locations carrying
/// `archives=false` are returned unchanged.
pub fn wrap_if_archive(file: FileHandle) -> FileHandle {
    if file.as_archive().is_some()
        || file.url().property(BROWSE_ARCHIVES_PROPERTY) == Some("false")
        || file.is_directory()
    {
        return file;
    }

    match ArchiveFormat::detect(&file.name()) {
        Some(format) => {
            tracing::trace!("Wrapping {} as {}", file.url(), format);
            Arc::new(ArchiveFile::new(file, format))
        }
        None => file,
    }
}

/// Seekable stream over a file, buffering it in memory when the backend has no random access
pub(crate) fn random_access(file: &dyn VfsFile) -> Result<Box<dyn ReadSeek>> {
    match file.open_random_access() {
        Err(FsError::Unsupported(_)) => {
            tracing::debug!("Buffering {} for random access", file.url());
            Ok(Box::new(Cursor::new(read_all(file)?)))
        }
        other => other,
    }
}

/// Exactly `len` bytes from `reader`
///
/// `len` comes from container headers, so the buffer only grows with the
/// bytes actually read.
pub(crate) fn read_declared(reader: &mut dyn Read, len: u64, what: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.take(len).read_to_end(&mut data)?;
    if (data.len() as u64) < len {
        return Err(FsError::Archive(format!(
            "Truncated {}: {} of {} bytes",
            what,
            data.len(),
            len
        )));
    }
    Ok(data)
}

/// Clean an entry path from a container: `/` separators, no leading `./` or `/`,
/// no empty segments
pub(crate) fn normalize_entry_path(raw: &str) -> String {
    let slashed = raw.replace('\\', "/");
    let trailing = slashed.ends_with('/');

    let mut path = slashed
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/");

    if trailing && !path.is_empty() {
        path.push('/');
    }
    path
}

fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    let name = name.as_bytes();
    let suffix = suffix.as_bytes();
    name.len() >= suffix.len() && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}
