//! ZIP containers

use super::{normalize_entry_path, random_access, ArchiveDecoder, ArchiveEntry, EntryPayload};
use crate::encoding::{decode_bytes, EncodingHint, ENCODING_PROPERTY};
use crate::{FilePermissions, FsError, ReadSeek, Result, VfsFile};
use chrono::NaiveDate;
use std::io::{Cursor, Read};
use zip::ZipArchive;

#[derive(Debug, Default)]
pub(crate) struct ZipDecoder;

impl ZipDecoder {
    fn open(file: &dyn VfsFile) -> Result<ZipArchive<Box<dyn ReadSeek>>> {
        let reader = random_access(file)?;
        ZipArchive::new(reader).map_err(|e| FsError::Archive(format!("{}: {}", file.url(), e)))
    }
}

impl ArchiveDecoder for ZipDecoder {
    fn list_entries(&self, file: &dyn VfsFile) -> Result<Vec<ArchiveEntry>> {
        let mut archive = Self::open(file)?;
        let hint = file
            .url()
            .property(ENCODING_PROPERTY)
            .and_then(|value| value.parse::<EncodingHint>().ok())
            .unwrap_or_default();

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let zip_file = archive
                .by_index_raw(index)
                .map_err(|e| FsError::Archive(format!("{} entry {}: {}", file.url(), index, e)))?;

            let (name, _) = decode_bytes(zip_file.name_raw(), hint);
            let path = normalize_entry_path(&name);
            if path.is_empty() {
                continue;
            }

            let is_dir = zip_file.is_dir();
            let modified = zip_file.last_modified().and_then(|dt| {
                zip_timestamp(dt.year(), dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second())
            });

            let mut entry = ArchiveEntry::new(path, is_dir)
                .with_size(if is_dir { 0 } else { zip_file.size() as i64 })
                .with_modified(modified)
                .with_payload(EntryPayload::Zip { index });
            if let Some(mode) = zip_file.unix_mode() {
                entry = entry.with_permissions(FilePermissions::new(mode, 0o777));
            }
            entries.push(entry);
        }

        Ok(entries)
    }

    fn open_entry(&self, file: &dyn VfsFile, entry: &ArchiveEntry) -> Result<Box<dyn Read + Send>> {
        let EntryPayload::Zip { index } = entry.payload() else {
            return Err(FsError::Archive(format!("Not a ZIP entry: {}", entry.path())));
        };

        let mut archive = Self::open(file)?;
        let mut zip_file = archive
            .by_index(*index)
            .map_err(|e| FsError::Archive(format!("{} entry {}: {}", file.url(), index, e)))?;

        // The reader borrows the archive, so the content is extracted here.
        // The declared size is not trusted for the allocation.
        let mut buffer = Vec::new();
        zip_file
            .read_to_end(&mut buffer)
            .map_err(|e| FsError::Archive(format!("{}/{}: {}", file.url(), entry.path(), e)))?;
        Ok(Box::new(Cursor::new(buffer)))
    }
}

/// MS-DOS date and time fields as Unix seconds
///
/// ZIP stores no zone; the fields are taken as UTC.
fn zip_timestamp(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Option<i64> {
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
        .and_hms_opt(hour as u32, minute as u32, second as u32)
        .map(|dt| dt.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileUrl, LocalFile};
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_list_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.zip");
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        let options = SimpleFileOptions::default()
            .unix_permissions(0o640)
            .last_modified_time(zip::DateTime::from_date_and_time(2021, 3, 4, 5, 6, 8).unwrap());
        writer.add_directory("sub/", options).unwrap();
        writer.start_file("sub/data.bin", options).unwrap();
        writer.write_all(b"0123456789").unwrap();
        writer.finish().unwrap();

        let file = LocalFile::from_path(&path).unwrap();
        let entries = ZipDecoder.list_entries(&file).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].path(), "sub/");
        assert!(entries[0].is_directory());

        let data = &entries[1];
        assert_eq!(data.path(), "sub/data.bin");
        assert_eq!(data.size(), 10);
        assert_eq!(data.permissions().to_rwx(), "rw-r-----");
        assert_eq!(data.modified(), zip_timestamp(2021, 3, 4, 5, 6, 8));

        let mut content = String::new();
        ZipDecoder
            .open_entry(&file, data)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "0123456789");
    }

    #[test]
    fn test_legacy_name_decoded_with_hint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sjis.zip");
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        writer.start_file("placeholder", SimpleFileOptions::default()).unwrap();
        writer.finish().unwrap();

        // Patch the UTF-8 name with Shift_JIS bytes of the same length
        let sjis_name: [u8; 11] = [0x83, 0x65, 0x83, 0x58, 0x83, 0x67, b'.', b't', b'x', b't', b'_'];
        let mut bytes = std::fs::read(&path).unwrap();
        let mut from = 0;
        while let Some(pos) = bytes[from..].windows(11).position(|w| w == b"placeholder") {
            let at = from + pos;
            bytes[at..at + 11].copy_from_slice(&sjis_name);
            from = at + 11;
        }
        std::fs::write(&path, &bytes).unwrap();

        let url = FileUrl::from_path(&path)
            .unwrap()
            .with_property(ENCODING_PROPERTY, EncodingHint::Japanese.as_str());
        let file = LocalFile::new(url).unwrap();
        let entries = ZipDecoder.list_entries(&file).unwrap();
        assert_eq!(entries[0].path(), "テスト.txt_");
    }

    #[test]
    fn test_declared_size_is_not_trusted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lying.zip");
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("data.txt", options).unwrap();
        writer.write_all(b"data").unwrap();
        writer.finish().unwrap();

        // Central directory: uncompressed size at offset 24
        let mut bytes = std::fs::read(&path).unwrap();
        let central = bytes
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let file = LocalFile::from_path(&path).unwrap();
        let entries = ZipDecoder.list_entries(&file).unwrap();
        assert_eq!(entries[0].size(), 0xFFFF_FFF0);

        match ZipDecoder.open_entry(&file, &entries[0]) {
            Ok(mut stream) => {
                let mut content = Vec::new();
                stream.read_to_end(&mut content).unwrap();
                assert_eq!(content, b"data");
            }
            Err(e) => assert!(matches!(e, FsError::Archive(_))),
        }
    }

    #[test]
    fn test_not_a_zip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.zip");
        std::fs::write(&path, b"garbage").unwrap();
        let file = LocalFile::from_path(&path).unwrap();
        assert!(matches!(ZipDecoder.list_entries(&file), Err(FsError::Archive(_))));
    }
}
