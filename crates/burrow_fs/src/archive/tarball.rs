//! TAR containers, plain or compressed as a whole

use super::{normalize_entry_path, ArchiveDecoder, ArchiveEntry, Compression, EntryPayload};
use crate::{FilePermissions, FsError, Result, VfsFile};
use std::io::{Cursor, Read};

#[derive(Debug)]
pub(crate) struct TarDecoder {
    compression: Option<Compression>,
}

impl TarDecoder {
    pub(crate) fn new(compression: Option<Compression>) -> Self {
        Self { compression }
    }

    fn stream(&self, file: &dyn VfsFile) -> Result<Box<dyn Read + Send>> {
        let raw = file.open_read()?;
        Ok(match self.compression {
            Some(compression) => compression.decoder(raw),
            None => raw,
        })
    }
}

impl ArchiveDecoder for TarDecoder {
    fn list_entries(&self, file: &dyn VfsFile) -> Result<Vec<ArchiveEntry>> {
        let corrupt = |e: std::io::Error| FsError::Archive(format!("{}: {}", file.url(), e));
        // Only an uncompressed container can be checked against its own length
        let container = match self.compression {
            None => u64::try_from(file.size()).ok(),
            Some(_) => None,
        };

        let mut archive = tar::Archive::new(self.stream(file)?);
        let mut entries = Vec::new();

        for (index, item) in archive.entries().map_err(corrupt)?.enumerate() {
            let item = item.map_err(corrupt)?;
            let header = item.header();
            let kind = header.entry_type();
            if kind.is_pax_global_extensions()
                || kind.is_pax_local_extensions()
                || kind.is_gnu_longname()
                || kind.is_gnu_longlink()
            {
                continue;
            }

            let raw_path = String::from_utf8_lossy(&item.path_bytes()).into_owned();
            let path = normalize_entry_path(&raw_path);
            if path.is_empty() {
                continue;
            }

            let data_offset = item.raw_file_position();
            if container.is_some_and(|len| data_offset.saturating_add(item.size()) > len) {
                return Err(FsError::Archive(format!(
                    "{}: {} declares {} bytes past the end of the archive",
                    file.url(),
                    path,
                    item.size()
                )));
            }

            let is_dir = kind.is_dir();
            let mut entry = ArchiveEntry::new(path, is_dir)
                .with_size(if is_dir { 0 } else { item.size() as i64 })
                .with_modified(header.mtime().ok().map(|t| t as i64))
                .with_payload(EntryPayload::Tar { index, data_offset });
            if let Ok(mode) = header.mode() {
                entry = entry.with_permissions(FilePermissions::new(mode, 0o777));
            }
            entries.push(entry);
        }

        Ok(entries)
    }

    fn open_entry(&self, file: &dyn VfsFile, entry: &ArchiveEntry) -> Result<Box<dyn Read + Send>> {
        let EntryPayload::Tar { index, data_offset } = entry.payload() else {
            return Err(FsError::Archive(format!("Not a TAR entry: {}", entry.path())));
        };

        // Uncompressed content sits at a fixed offset of the container
        if self.compression.is_none() {
            let stream = file.open_read_at(*data_offset)?;
            return Ok(Box::new(stream.take(entry.size().max(0) as u64)));
        }

        let mut archive = tar::Archive::new(self.stream(file)?);
        for (i, item) in archive.entries()?.enumerate() {
            let mut item = item?;
            if i == *index {
                let mut buffer = Vec::new();
                item.read_to_end(&mut buffer)?;
                return Ok(Box::new(Cursor::new(buffer)));
            }
        }

        Err(FsError::NotFound(format!("{}/{}", file.url(), entry.path())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_all, wrap_if_archive, ArchiveFormat, FileHandle, LocalFile};
    use flate2::write::GzEncoder;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_600_000_000);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn open(path: &Path) -> FileHandle {
        wrap_if_archive(Arc::new(LocalFile::from_path(path).unwrap()))
    }

    #[test]
    fn test_plain_tar() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.tar");
        std::fs::write(&path, tar_bytes(&[("a/one.txt", b"one"), ("two.txt", b"second")])).unwrap();

        let file = LocalFile::from_path(&path).unwrap();
        let decoder = TarDecoder::new(None);
        let entries = decoder.list_entries(&file).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path(), "a/one.txt");
        assert_eq!(entries[0].modified(), Some(1_600_000_000));
        assert_eq!(entries[0].permissions().to_rwx(), "rw-r--r--");

        let mut content = String::new();
        decoder
            .open_entry(&file, &entries[1])
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn test_oversized_entry_is_an_error() {
        let mut bytes = tar_bytes(&[("big.bin", b"tiny")]);

        // Claim 8 GiB of data and fix the header checksum up
        bytes[124..136].copy_from_slice(b"77777777777\0");
        bytes[148..156].copy_from_slice(b"        ");
        let sum: u32 = bytes[..512].iter().map(|&b| b as u32).sum();
        bytes[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.tar");
        std::fs::write(&path, &bytes).unwrap();

        let file = LocalFile::from_path(&path).unwrap();
        let result = TarDecoder::new(None).list_entries(&file);
        assert!(matches!(result, Err(FsError::Archive(_))));
    }

    #[test]
    fn test_corrupt_header_is_an_archive_error() {
        let mut bytes = tar_bytes(&[("a.txt", b"a")]);
        bytes[148..156].copy_from_slice(b"0000001\0");

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.tar");
        std::fs::write(&path, &bytes).unwrap();

        let file = LocalFile::from_path(&path).unwrap();
        let result = TarDecoder::new(None).list_entries(&file);
        assert!(matches!(result, Err(FsError::Archive(_))));
    }

    #[test]
    fn test_long_names_survive() {
        let long = format!("{}/file.txt", "d".repeat(120));
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("long.tar");
        std::fs::write(&path, tar_bytes(&[(long.as_str(), b"x")])).unwrap();

        let file = LocalFile::from_path(&path).unwrap();
        let entries = TarDecoder::new(None).list_entries(&file).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path(), long);
    }

    #[test]
    fn test_gzipped_tar_with_nested_zip() {
        let nested = {
            use std::io::Write;
            let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
            writer
                .start_file("inside.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"deep").unwrap();
            writer.finish().unwrap().into_inner()
        };

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.tar.gz");
        std::fs::write(&path, gzip(&tar_bytes(&[("pkg/inner.zip", &nested)]))).unwrap();

        let archive = open(&path);
        assert_eq!(
            archive.as_archive().unwrap().format(),
            ArchiveFormat::Tar(Some(Compression::Gzip))
        );

        let pkg = archive.ls().unwrap();
        assert_eq!(pkg.len(), 1);
        assert!(pkg[0].is_directory());

        let children = pkg[0].ls().unwrap();
        let inner = children[0].as_archive().expect("nested zip is wrapped");
        assert_eq!(inner.format(), ArchiveFormat::Zip);

        let leaves = children[0].ls().unwrap();
        assert_eq!(leaves[0].name(), "inside.txt");
        assert_eq!(read_all(leaves[0].as_ref()).unwrap(), b"deep");
    }
}
