//! The file capability contract shared by every backend

use crate::archive::ArchiveFile;
use crate::{FileUrl, FsError, Result};
use std::fmt;
use std::io::{self, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

/// Shared handle to a file on any backend
pub type FileHandle = Arc<dyn VfsFile>;

/// Readable and seekable stream
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Unix-style permission bits and the mask of bits the backend actually knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilePermissions {
    pub bits: u32,
    pub mask: u32,
}

impl FilePermissions {
    pub fn new(bits: u32, mask: u32) -> Self {
        Self {
            bits: bits & mask,
            mask,
        }
    }

    /// Is the permission bit set and meaningful?
    pub fn has(&self, bit: u32) -> bool {
        self.mask & bit != 0 && self.bits & bit != 0
    }

    /// `rwxr-x---` style rendering; unknown bits print as `?`
    pub fn to_rwx(&self) -> String {
        const LETTERS: [char; 3] = ['r', 'w', 'x'];
        (0..9)
            .map(|i| {
                let bit = 1 << (8 - i);
                if self.mask & bit == 0 {
                    '?'
                } else if self.bits & bit != 0 {
                    LETTERS[i % 3]
                } else {
                    '-'
                }
            })
            .collect()
    }
}

/// Polymorphic file handle
///
/// Attributes are derived from the backend on every call; only the parent
/// handle (and an archive's entry tree) is cached. Operations a backend cannot
/// perform fail with [`FsError::Unsupported`].
pub trait VfsFile: Send + Sync + fmt::Debug {
    /// Location identifying this file
    fn url(&self) -> &FileUrl;

    fn name(&self) -> String {
        self.url().filename().unwrap_or_default().to_string()
    }

    /// Path in URL form; directories end with the separator
    fn absolute_path(&self) -> String {
        let path = self.url().path();
        if self.is_directory() {
            if path.ends_with(self.separator()) {
                path.to_string()
            } else {
                format!("{}{}", path, self.separator())
            }
        } else if self.url().is_root() {
            path.to_string()
        } else {
            path.trim_end_matches(self.separator()).to_string()
        }
    }

    /// Absolute path with symbolic links resolved, where the backend can do so
    fn canonical_path(&self) -> Result<String> {
        Ok(self.absolute_path())
    }

    fn separator(&self) -> &str {
        "/"
    }

    /// Last modification as Unix seconds
    fn last_modified(&self) -> Option<i64>;

    /// Size in bytes, `-1` when unknown
    fn size(&self) -> i64;

    /// Enclosing directory; resolved on first call and cached
    fn parent(&self) -> Option<FileHandle>;

    fn exists(&self) -> bool;

    fn permissions(&self) -> FilePermissions {
        FilePermissions::default()
    }

    fn can_read(&self) -> bool {
        self.exists()
    }

    fn can_write(&self) -> bool {
        false
    }

    fn is_hidden(&self) -> bool {
        self.name().starts_with('.')
    }

    fn is_directory(&self) -> bool;

    fn is_symlink(&self) -> bool {
        false
    }

    /// Can `ls` be called on this file?
    fn is_browsable(&self) -> bool {
        self.is_directory() || self.as_archive().is_some()
    }

    /// The archive adapter, when this handle is one
    fn as_archive(&self) -> Option<&ArchiveFile> {
        None
    }

    /// Native path, for handles on the local file system
    fn local_path(&self) -> Option<&Path> {
        None
    }

    /// Stream positioned at the start of the file
    fn open_read(&self) -> Result<Box<dyn Read + Send>>;

    /// Stream positioned `offset` bytes into the file
    ///
    /// The default reads and discards; seekable backends override it.
    fn open_read_at(&self, offset: u64) -> Result<Box<dyn Read + Send>> {
        let mut stream = self.open_read()?;
        let skipped = io::copy(&mut (&mut stream).take(offset), &mut io::sink())?;
        if skipped < offset {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} is shorter than {} bytes", self.url(), offset),
            )));
        }
        Ok(stream)
    }

    fn has_random_access(&self) -> bool {
        false
    }

    fn open_random_access(&self) -> Result<Box<dyn ReadSeek>> {
        Err(FsError::unsupported("Random access", self.url()))
    }

    /// Stream replacing (or appending to) the file's content
    fn open_write(&self, append: bool) -> Result<Box<dyn Write + Send>> {
        let _ = append;
        Err(FsError::unsupported("Writing", self.url()))
    }

    /// Move this file to `dest` using the backend's native rename
    ///
    /// Returns `Ok(false)` when the backend cannot do it directly and the
    /// caller has to copy and delete instead.
    fn move_to(&self, dest: &dyn VfsFile) -> Result<bool> {
        let _ = dest;
        Ok(false)
    }

    /// Delete this file, or this directory when it is empty
    fn delete(&self) -> Result<()> {
        Err(FsError::unsupported("Deleting", self.url()))
    }

    fn mkdir(&self) -> Result<()> {
        Err(FsError::unsupported("Creating directories", self.url()))
    }

    /// Children of a browsable file
    fn ls(&self) -> Result<Vec<FileHandle>>;

    /// Free space on the volume, `-1` when unknown
    fn free_space(&self) -> Result<i64> {
        Ok(-1)
    }

    /// Total space of the volume, `-1` when unknown
    fn total_space(&self) -> Result<i64> {
        Ok(-1)
    }
}

/// Read the whole content of a file
pub fn read_all(file: &dyn VfsFile) -> Result<Vec<u8>> {
    let mut stream = file.open_read()?;
    let mut buffer = match file.size() {
        size if size > 0 => Vec::with_capacity(size as usize),
        _ => Vec::new(),
    };
    stream.read_to_end(&mut buffer)?;
    Ok(buffer)
}
