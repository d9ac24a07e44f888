//! A single record of an archive's flat listing

use crate::FilePermissions;

/// Where a decoder finds an entry's content again
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntryPayload {
    /// Synthesized directory, or a format that needs no locator
    #[default]
    None,
    Zip {
        index: usize,
    },
    Tar {
        /// Position in the container's entry sequence
        index: usize,
        /// Offset of the content in the uncompressed stream
        data_offset: u64,
    },
    Ar {
        data_offset: u64,
    },
    Iso {
        /// First logical block of the extent
        extent: u32,
    },
}

/// Entry of an archive
///
/// `path` is relative to the archive root, uses `/` and ends with `/` for
/// directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    path: String,
    modified: Option<i64>,
    size: i64,
    is_directory: bool,
    permissions: FilePermissions,
    payload: EntryPayload,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, is_directory: bool) -> Self {
        let mut path = path.into();
        if is_directory && !path.ends_with('/') {
            path.push('/');
        }

        Self {
            path,
            modified: None,
            size: 0,
            is_directory,
            permissions: FilePermissions::default(),
            payload: EntryPayload::None,
        }
    }

    /// Directory entry standing in for a prefix the container never listed
    pub(crate) fn placeholder_directory(path: &str, modified: Option<i64>) -> Self {
        Self::new(path, true).with_modified(modified)
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    pub fn with_modified(mut self, modified: Option<i64>) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_permissions(mut self, permissions: FilePermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_payload(mut self, payload: EntryPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment, without the trailing `/`
    pub fn name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Nesting level; top-level entries are at depth 0
    pub fn depth(&self) -> usize {
        depth_of(&self.path)
    }

    pub fn modified(&self) -> Option<i64> {
        self.modified
    }

    /// Uncompressed size, `-1` when the container does not record it
    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn permissions(&self) -> FilePermissions {
        self.permissions
    }

    pub fn payload(&self) -> &EntryPayload {
        &self.payload
    }
}

/// Number of `/` in `path`, not counting a trailing one
pub(crate) fn depth_of(path: &str) -> usize {
    let count = path.matches('/').count();
    if path.ends_with('/') {
        count - 1
    } else {
        count
    }
}

/// Byte offsets just past each `/` that separates `path` into its ancestors,
/// followed by the length of `path` itself
///
/// `"a/b/c"` yields `[2, 4, 5]`: the prefixes `a/`, `a/b/` and `a/b/c`.
pub(crate) fn prefix_ends(path: &str) -> Vec<usize> {
    let depth = depth_of(path);
    let mut ends = Vec::with_capacity(depth + 1);
    let mut from = 0;

    for _ in 0..depth {
        match path[from..].find('/') {
            Some(pos) => {
                from += pos + 1;
                ends.push(from);
            }
            None => break,
        }
    }

    ends.push(path.len());
    ends
}
