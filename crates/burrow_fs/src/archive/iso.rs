//! ISO-9660 images, cooked or raw sectors
//!
//! Only the primary volume descriptor's directory hierarchy is read; Joliet
//! and Rock Ridge names are not interpreted.

use super::{random_access, ArchiveDecoder, ArchiveEntry, EntryPayload};
use crate::{FsError, ReadSeek, Result, VfsFile};
use chrono::{FixedOffset, TimeZone};
use once_cell::sync::OnceCell;
use std::collections::{HashSet, VecDeque};
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Logical sector payload
const SECTOR: usize = 2048;
/// First volume descriptor
const DESCRIPTOR_START: u32 = 16;
/// Descriptors looked at before giving up on a terminator
const MAX_DESCRIPTORS: u32 = 32;
/// Lead-in some image formats keep in front of the first sector
const LEAD_IN_SECTORS: u64 = 150;
const STANDARD_ID: &[u8; 5] = b"CD001";

const DESCRIPTOR_PRIMARY: u8 = 1;
const DESCRIPTOR_TERMINATOR: u8 = 255;
const FLAG_DIRECTORY: u8 = 0x02;

/// Position of the logical sectors inside the image file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    sector_size: u64,
    /// Payload offset inside a physical sector
    header: u64,
    /// Bytes before sector 0
    lead_in: u64,
}

impl Layout {
    const fn new(sector_size: u64, header: u64, lead_in: bool) -> Self {
        Self {
            sector_size,
            header,
            lead_in: if lead_in { LEAD_IN_SECTORS * sector_size } else { 0 },
        }
    }

    fn position(&self, lba: u64) -> u64 {
        self.lead_in + lba * self.sector_size + self.header
    }

    fn is_cooked(&self) -> bool {
        self.sector_size == SECTOR as u64 && self.header == 0
    }
}

const LAYOUTS: [Layout; 6] = [
    Layout::new(2048, 0, false),
    Layout::new(2352, 16, false),
    Layout::new(2352, 24, false),
    Layout::new(2048, 0, true),
    Layout::new(2352, 16, true),
    Layout::new(2352, 24, true),
];

/// Decoded directory record
#[derive(Debug)]
struct Record {
    extent: u32,
    size: u32,
    modified: Option<i64>,
    is_dir: bool,
    name: Vec<u8>,
}

impl Record {
    fn parse(bytes: &[u8]) -> Option<Self> {
        let name_len = *bytes.get(32)? as usize;
        let name = bytes.get(33..33 + name_len)?.to_vec();
        let date: [u8; 7] = bytes.get(18..25)?.try_into().ok()?;

        Some(Self {
            extent: u32::from_le_bytes(bytes.get(2..6)?.try_into().ok()?),
            size: u32::from_le_bytes(bytes.get(10..14)?.try_into().ok()?),
            modified: decode_date(&date),
            is_dir: bytes.get(25)? & FLAG_DIRECTORY != 0,
            name,
        })
    }

    /// `.` and `..` are recorded as the single bytes 0 and 1
    fn is_self_or_parent(&self) -> bool {
        matches!(self.name.as_slice(), [0] | [1])
    }

    fn display_name(&self) -> String {
        let name = String::from_utf8_lossy(&self.name);
        let name = match name.rfind(';') {
            Some(pos) => &name[..pos],
            None => &name[..],
        };
        if self.is_dir {
            name.to_string()
        } else {
            name.trim_end_matches('.').to_string()
        }
    }
}

/// Recording date: years since 1900, month, day, hour, minute, second and
/// the GMT offset in 15-minute units
pub(crate) fn decode_date(bytes: &[u8; 7]) -> Option<i64> {
    if bytes[..6].iter().all(|&b| b == 0) {
        return None;
    }

    let offset = FixedOffset::east_opt(bytes[6] as i8 as i32 * 15 * 60)?;
    offset
        .with_ymd_and_hms(
            1900 + bytes[0] as i32,
            bytes[1] as u32,
            bytes[2] as u32,
            bytes[3] as u32,
            bytes[4] as u32,
            bytes[5] as u32,
        )
        .single()
        .map(|dt| dt.timestamp())
}

/// Read `len` bytes of logical sectors starting at `lba`
///
/// The range is checked against the image length before anything is
/// allocated, since `len` comes from directory records.
fn read_sectors(reader: &mut dyn ReadSeek, layout: Layout, lba: u32, len: usize) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let sectors = len.div_ceil(SECTOR) as u64;
    let tail = (len - (sectors as usize - 1) * SECTOR) as u64;
    let end = layout.position(lba as u64 + sectors - 1) + tail;
    let image_len = reader.seek(SeekFrom::End(0))?;
    if end > image_len {
        return Err(FsError::Archive(format!(
            "Extent at sector {} ({} bytes) runs past the end of the image",
            lba, len
        )));
    }

    let mut out = vec![0u8; len];

    if layout.is_cooked() {
        reader.seek(SeekFrom::Start(layout.position(lba as u64)))?;
        reader.read_exact(&mut out)?;
        return Ok(out);
    }

    for (i, chunk) in out.chunks_mut(SECTOR).enumerate() {
        reader.seek(SeekFrom::Start(layout.position(lba as u64 + i as u64)))?;
        reader.read_exact(chunk)?;
    }
    Ok(out)
}

fn detect_layout(reader: &mut dyn ReadSeek) -> Result<Layout> {
    LAYOUTS
        .iter()
        .copied()
        .find(|&layout| {
            read_sectors(reader, layout, DESCRIPTOR_START, SECTOR)
                .is_ok_and(|sector| &sector[1..6] == STANDARD_ID)
        })
        .ok_or_else(|| FsError::Archive("No ISO-9660 volume descriptor found".to_string()))
}

fn root_record(reader: &mut dyn ReadSeek, layout: Layout) -> Result<Record> {
    for lba in DESCRIPTOR_START..DESCRIPTOR_START + MAX_DESCRIPTORS {
        let sector = read_sectors(reader, layout, lba, SECTOR)?;
        if &sector[1..6] != STANDARD_ID {
            break;
        }
        match sector[0] {
            DESCRIPTOR_PRIMARY => {
                return Record::parse(&sector[156..190])
                    .ok_or_else(|| FsError::Archive("Corrupt root directory record".to_string()));
            }
            DESCRIPTOR_TERMINATOR => break,
            _ => {}
        }
    }
    Err(FsError::Archive("No primary volume descriptor".to_string()))
}

#[derive(Debug, Default)]
pub(crate) struct IsoDecoder {
    /// Sector layout found while listing, reused to read entries
    layout: OnceCell<Layout>,
}

impl IsoDecoder {
    fn layout(&self, file: &dyn VfsFile) -> Result<Layout> {
        self.layout
            .get_or_try_init(|| detect_layout(random_access(file)?.as_mut()))
            .copied()
    }
}

impl ArchiveDecoder for IsoDecoder {
    fn list_entries(&self, file: &dyn VfsFile) -> Result<Vec<ArchiveEntry>> {
        let mut reader = random_access(file)?;
        let layout = detect_layout(reader.as_mut())?;
        let _ = self.layout.set(layout);
        let root = root_record(reader.as_mut(), layout)?;
        tracing::debug!("{}: ISO-9660 layout {:?}", file.url(), layout);

        let mut entries = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = VecDeque::from([(root.extent, root.size, String::new())]);

        while let Some((extent, size, prefix)) = pending.pop_front() {
            if !visited.insert(extent) {
                tracing::warn!("{}: directory loop at sector {}", file.url(), extent);
                continue;
            }

            let data = read_sectors(reader.as_mut(), layout, extent, size as usize)?;
            let mut pos = 0;
            while pos < data.len() {
                let len = data[pos] as usize;
                if len == 0 {
                    // Records never straddle sectors; the rest of this one is padding
                    pos = (pos / SECTOR + 1) * SECTOR;
                    continue;
                }

                let Some(record) = data.get(pos..pos + len).and_then(Record::parse) else {
                    tracing::warn!("{}: truncated directory record in sector {}", file.url(), extent);
                    break;
                };
                pos += len;

                if record.is_self_or_parent() {
                    continue;
                }

                let mut path = format!("{}{}", prefix, record.display_name());
                if record.is_dir {
                    path.push('/');
                    pending.push_back((record.extent, record.size, path.clone()));
                }

                entries.push(
                    ArchiveEntry::new(path, record.is_dir)
                        .with_size(if record.is_dir { 0 } else { record.size as i64 })
                        .with_modified(record.modified)
                        .with_payload(EntryPayload::Iso {
                            extent: record.extent,
                        }),
                );
            }
        }

        Ok(entries)
    }

    fn open_entry(&self, file: &dyn VfsFile, entry: &ArchiveEntry) -> Result<Box<dyn Read + Send>> {
        let EntryPayload::Iso { extent } = entry.payload() else {
            return Err(FsError::Archive(format!("Not an ISO entry: {}", entry.path())));
        };
        let size = entry.size().max(0) as u64;
        let layout = self.layout(file)?;

        if layout.is_cooked() {
            let stream = file.open_read_at(layout.position(*extent as u64))?;
            return Ok(Box::new(stream.take(size)));
        }

        // Raw sectors: keep the payload of each physical sector in turn
        let mut stream = file.open_read_at(layout.position(*extent as u64) - layout.header)?;
        let mut sector = vec![0u8; layout.sector_size as usize];
        let mut data = Vec::new();
        let mut remaining = size;
        while remaining > 0 {
            stream.read_exact(&mut sector).map_err(|_| {
                FsError::Archive(format!("{}/{} is truncated", file.url(), entry.path()))
            })?;
            let chunk = remaining.min(SECTOR as u64) as usize;
            let start = layout.header as usize;
            data.extend_from_slice(&sector[start..start + chunk]);
            remaining -= chunk as u64;
        }
        Ok(Box::new(Cursor::new(data)))
    }
}
