//! Burrow File System Abstraction Layer
//!
//! Provides a unified interface over heterogeneous storage backends, including:
//! - FileUrl: Location parsing and canonicalization
//! - VfsFile: The capability contract every backend implements
//! - Archive browsing: ZIP, TAR, GZIP, BZIP2, AR and ISO-9660 containers exposed
//!   as directories, recursively
//! - FileFactory: Protocol dispatch, credential lookup and handle caching

pub mod archive;
mod canonize;
pub mod config;
mod credentials;
mod encoding;
mod factory;
mod file;
mod local;
mod location;
mod mime;
mod sort;

pub use archive::{
    wrap_if_archive, ArchiveEntry, ArchiveEntryFile, ArchiveFile, ArchiveFormat, Compression,
    EntryPayload, EntryTree, NodeId, BROWSE_ARCHIVES_PROPERTY,
};
pub use canonize::canonize;
pub use config::VfsConfig;
pub use credentials::{CredentialStore, Credentials};
pub use encoding::{decode_bytes, detect_encoding, EncodingHint, ENCODING_PROPERTY};
pub use factory::{FileFactory, LocalProvider, ProtocolProvider};
pub use file::{read_all, FileHandle, FilePermissions, ReadSeek, VfsFile};
pub use local::LocalFile;
pub use location::{FileUrl, SchemeInfo};
pub use mime::MimeTable;
pub use sort::{sort_files, SortBy, SortOrder};

use thiserror::Error;

/// File system errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed location: {0}")]
    MalformedLocation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Authentication required: {url}")]
    AuthRequired { url: FileUrl },

    #[error("Authentication failed for {url}: {reason}")]
    AuthFailed { url: FileUrl, reason: String },

    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl FsError {
    /// Archive decode failures are reported to callers as I/O failures
    pub fn is_io_failure(&self) -> bool {
        matches!(self, FsError::Io(_) | FsError::Archive(_))
    }

    /// Is this an authentication problem the caller can fix by supplying credentials?
    pub fn is_auth(&self) -> bool {
        matches!(self, FsError::AuthRequired { .. } | FsError::AuthFailed { .. })
    }

    /// The location an authentication error refers to
    pub fn auth_url(&self) -> Option<&FileUrl> {
        match self {
            FsError::AuthRequired { url } | FsError::AuthFailed { url, .. } => Some(url),
            _ => None,
        }
    }

    pub(crate) fn unsupported(op: &str, url: &FileUrl) -> Self {
        FsError::Unsupported(format!("{} is not supported on {}", op, url))
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
