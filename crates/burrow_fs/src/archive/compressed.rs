//! Single-member compressed files (`.gz`, `.bz2`) shown as a one-entry archive

use super::{ArchiveDecoder, ArchiveEntry, Compression};
use crate::{FsError, Result, VfsFile};
use std::io::Read;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";

#[derive(Debug)]
pub(crate) struct CompressedDecoder {
    compression: Compression,
}

impl CompressedDecoder {
    pub(crate) fn new(compression: Compression) -> Self {
        Self { compression }
    }

    fn magic(&self) -> &'static [u8] {
        match self.compression {
            Compression::Gzip => GZIP_MAGIC,
            Compression::Bzip2 => BZIP2_MAGIC,
        }
    }
}

impl ArchiveDecoder for CompressedDecoder {
    fn list_entries(&self, file: &dyn VfsFile) -> Result<Vec<ArchiveEntry>> {
        let magic = self.magic();
        let mut header = vec![0u8; magic.len()];
        file.open_read()?
            .read_exact(&mut header)
            .map_err(|_| FsError::Archive(format!("{} is too short", file.url())))?;
        if header != magic {
            return Err(FsError::Archive(format!(
                "{} is not {:?} compressed",
                file.url(),
                self.compression
            )));
        }

        // The uncompressed size is only known after decompressing
        let entry = ArchiveEntry::new(decompressed_name(&file.name(), self.compression), false)
            .with_size(-1)
            .with_modified(file.last_modified());
        Ok(vec![entry])
    }

    fn open_entry(&self, file: &dyn VfsFile, _entry: &ArchiveEntry) -> Result<Box<dyn Read + Send>> {
        Ok(self.compression.decoder(file.open_read()?))
    }
}

/// Name of the single member: the compression extension is dropped, and
/// `.tgz`/`.tbz2` become `.tar`
pub(crate) fn decompressed_name(name: &str, compression: Compression) -> String {
    let (tar_ext, ext) = match compression {
        Compression::Gzip => (".tgz", ".gz"),
        Compression::Bzip2 => (".tbz2", ".bz2"),
    };

    if let Some(stem) = strip_suffix_ignore_case(name, tar_ext) {
        format!("{}.tar", stem)
    } else if let Some(stem) = strip_suffix_ignore_case(name, ext) {
        stem.to_string()
    } else {
        name.to_string()
    }
}

fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let split = name.len().checked_sub(suffix.len())?;
    let tail = name.as_bytes().get(split..)?;
    if tail.eq_ignore_ascii_case(suffix.as_bytes()) && split > 0 {
        Some(&name[..split])
    } else {
        None
    }
}
