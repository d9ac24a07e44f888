//! Unix `ar` containers (static libraries, Debian packages)
//!
//! Both the GNU (`//` name table, `/N` references) and the BSD (`#1/N`
//! inline names) long-name variants are understood.

use super::{read_declared, ArchiveDecoder, ArchiveEntry, EntryPayload};
use crate::{FilePermissions, FsError, Result, VfsFile};
use std::io::{self, Read};

const GLOBAL_MAGIC: &[u8; 8] = b"!<arch>\n";
const HEADER_LEN: usize = 60;
const HEADER_END: &[u8; 2] = b"`\n";

/// Meaning of a member header's name field
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ArName {
    Member(String),
    /// BSD long name: this many bytes of the member data are the name
    Inline(usize),
    /// GNU long-name table
    NameTable,
    SymbolTable,
}

/// Interpret a 16-byte name field, looking GNU `/N` references up in `table`
pub(crate) fn resolve_name(raw: &str, table: Option<&[u8]>) -> Result<ArName> {
    let name = raw.trim_end();

    match name {
        "//" => return Ok(ArName::NameTable),
        "/" | "/SYM64/" | "__.SYMDEF" | "__.SYMDEF SORTED" => return Ok(ArName::SymbolTable),
        _ => {}
    }

    if let Some(len) = name.strip_prefix("#1/") {
        return len
            .parse()
            .map(ArName::Inline)
            .map_err(|_| FsError::Archive(format!("Bad BSD name length: {}", name)));
    }

    if let Some(offset) = name.strip_prefix('/') {
        if let Ok(offset) = offset.parse::<usize>() {
            let table = table
                .ok_or_else(|| FsError::Archive(format!("{} used before the name table", name)))?;
            let rest = table
                .get(offset..)
                .ok_or_else(|| FsError::Archive(format!("{} is past the name table", name)))?;
            let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
            let long = String::from_utf8_lossy(&rest[..end]);
            return Ok(ArName::Member(long.trim_end_matches('/').to_string()));
        }
    }

    Ok(ArName::Member(name.strip_suffix('/').unwrap_or(name).to_string()))
}

#[derive(Debug, Default)]
pub(crate) struct ArDecoder;

impl ArchiveDecoder for ArDecoder {
    fn list_entries(&self, file: &dyn VfsFile) -> Result<Vec<ArchiveEntry>> {
        let mut reader = file.open_read()?;

        let mut magic = [0u8; 8];
        reader
            .read_exact(&mut magic)
            .map_err(|_| FsError::Archive(format!("{} is too short", file.url())))?;
        if &magic != GLOBAL_MAGIC {
            return Err(FsError::Archive(format!("{} is not an ar archive", file.url())));
        }

        let container = u64::try_from(file.size()).ok();
        let mut offset = GLOBAL_MAGIC.len() as u64;
        let mut table: Option<Vec<u8>> = None;
        let mut entries = Vec::new();
        let mut header = [0u8; HEADER_LEN];

        while read_header(&mut reader, &mut header)? {
            offset += HEADER_LEN as u64;
            if &header[58..60] != HEADER_END {
                return Err(FsError::Archive(format!("Corrupt member header at offset {}", offset)));
            }

            let raw_name = String::from_utf8_lossy(&header[0..16]).into_owned();
            let size = parse_number(&header[48..58], 10)
                .ok_or_else(|| FsError::Archive(format!("Bad member size at offset {}", offset)))?;
            let modified = parse_number(&header[16..28], 10).map(|t| t as i64);
            let mode = parse_number(&header[40..48], 8).map(|m| m as u32);
            if container.is_some_and(|len| offset.saturating_add(size) > len) {
                return Err(FsError::Archive(format!(
                    "Member at offset {} declares {} bytes past the end of the archive",
                    offset, size
                )));
            }
            let padded = size + (size & 1);

            match resolve_name(&raw_name, table.as_deref())? {
                ArName::NameTable => {
                    let names = read_declared(&mut reader, size, "ar name table")?;
                    skip(&mut reader, padded - size)?;
                    table = Some(names);
                }
                ArName::SymbolTable => skip(&mut reader, padded)?,
                ArName::Inline(len) => {
                    let len = len as u64;
                    if len > size {
                        return Err(FsError::Archive(format!("Bad BSD name at offset {}", offset)));
                    }
                    let name = read_declared(&mut reader, len, "ar member name")?;
                    let name = String::from_utf8_lossy(&name).trim_end_matches('\0').to_string();
                    entries.push(member(name, offset + len, size - len, modified, mode));
                    skip(&mut reader, padded - len)?;
                }
                ArName::Member(name) => {
                    entries.push(member(name, offset, size, modified, mode));
                    skip(&mut reader, padded)?;
                }
            }

            offset += padded;
        }

        Ok(entries)
    }

    fn open_entry(&self, file: &dyn VfsFile, entry: &ArchiveEntry) -> Result<Box<dyn Read + Send>> {
        let EntryPayload::Ar { data_offset } = entry.payload() else {
            return Err(FsError::Archive(format!("Not an ar member: {}", entry.path())));
        };

        let stream = file.open_read_at(*data_offset)?;
        Ok(Box::new(stream.take(entry.size().max(0) as u64)))
    }
}

fn member(name: String, data_offset: u64, size: u64, modified: Option<i64>, mode: Option<u32>) -> ArchiveEntry {
    let mut entry = ArchiveEntry::new(name, false)
        .with_size(size as i64)
        .with_modified(modified)
        .with_payload(EntryPayload::Ar { data_offset });
    if let Some(mode) = mode {
        entry = entry.with_permissions(FilePermissions::new(mode, 0o777));
    }
    entry
}

/// Fill `header`; `false` at a clean end of archive
fn read_header(reader: &mut dyn Read, header: &mut [u8; HEADER_LEN]) -> Result<bool> {
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match filled {
        0 => Ok(false),
        // Some writers omit the final padding byte
        1 if header[0] == b'\n' => Ok(false),
        HEADER_LEN => Ok(true),
        _ => Err(FsError::Archive("Truncated member header".to_string())),
    }
}

/// Skip `count` bytes; a missing final padding byte is tolerated
fn skip(reader: &mut dyn Read, count: u64) -> Result<()> {
    let skipped = io::copy(&mut reader.take(count), &mut io::sink())?;
    if skipped + 1 < count {
        return Err(FsError::Archive("Truncated member data".to_string()));
    }
    Ok(())
}

fn parse_number(field: &[u8], radix: u32) -> Option<u64> {
    let text = std::str::from_utf8(field).ok()?.trim();
    u64::from_str_radix(text, radix).ok()
}
