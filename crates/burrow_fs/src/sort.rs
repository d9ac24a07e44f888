//! Ordering of directory listings

use crate::FileHandle;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Sort key for file listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Name,
    Size,
    Modified,
    Extension,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Sort a listing in place; directories (and archives) always come first
pub fn sort_files(files: &mut [FileHandle], sort_by: SortBy, order: SortOrder) {
    // Attributes are derived on every call, so compute the keys once
    let mut keyed: Vec<(SortKey, FileHandle)> = files
        .iter()
        .map(|f| (SortKey::of(f), FileHandle::clone(f)))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        if a.browsable != b.browsable {
            return if a.browsable { Ordering::Less } else { Ordering::Greater };
        }

        let cmp = match sort_by {
            SortBy::Name => a.name.cmp(&b.name),
            SortBy::Size => a.size.cmp(&b.size),
            SortBy::Modified => a.modified.cmp(&b.modified),
            SortBy::Extension => a.extension.cmp(&b.extension).then_with(|| a.name.cmp(&b.name)),
        };

        match order {
            SortOrder::Ascending => cmp,
            SortOrder::Descending => cmp.reverse(),
        }
    });

    for (slot, (_, file)) in files.iter_mut().zip(keyed) {
        *slot = file;
    }
}

struct SortKey {
    browsable: bool,
    name: Vec<NaturalSortPart>,
    size: i64,
    modified: Option<i64>,
    extension: String,
}

impl SortKey {
    fn of(file: &FileHandle) -> Self {
        let name = file.name();
        Self {
            browsable: file.is_browsable(),
            extension: file.url().extension().unwrap_or_default().to_lowercase(),
            name: natural_sort_key(&name),
            size: file.size(),
            modified: file.last_modified(),
        }
    }
}

/// Generate a natural sort key (handles numbers correctly)
/// "image2.jpg" < "image10.jpg"
fn natural_sort_key(s: &str) -> Vec<NaturalSortPart> {
    let mut parts = Vec::new();
    let mut current_num = String::new();
    let mut current_str = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            if !current_str.is_empty() {
                parts.push(NaturalSortPart::Str(current_str.to_lowercase()));
                current_str.clear();
            }
            current_num.push(c);
        } else {
            if !current_num.is_empty() {
                parts.push(NaturalSortPart::number(&current_num));
                current_num.clear();
            }
            current_str.push(c);
        }
    }

    if !current_num.is_empty() {
        parts.push(NaturalSortPart::number(&current_num));
    }
    if !current_str.is_empty() {
        parts.push(NaturalSortPart::Str(current_str.to_lowercase()));
    }

    parts
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NaturalSortPart {
    Num(u64),
    Str(String),
}

impl NaturalSortPart {
    /// Digit runs too long for u64 compare as text
    fn number(digits: &str) -> Self {
        digits
            .parse()
            .map(NaturalSortPart::Num)
            .unwrap_or_else(|_| NaturalSortPart::Str(digits.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalFile;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_natural_sort() {
        let mut names = vec!["image10.jpg", "image2.jpg", "image1.jpg", "image20.jpg"];
        names.sort_by(|a, b| natural_sort_key(a).cmp(&natural_sort_key(b)));
        assert_eq!(names, vec!["image1.jpg", "image2.jpg", "image10.jpg", "image20.jpg"]);
    }

    #[test]
    fn test_sort_listing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b10.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("b2.txt"), b"12345").unwrap();
        std::fs::write(dir.path().join("a.log"), b"123").unwrap();
        std::fs::create_dir(dir.path().join("zdir")).unwrap();

        let root = LocalFile::from_path(dir.path()).unwrap();
        let mut files = crate::VfsFile::ls(&root).unwrap();
        let names = |files: &[FileHandle]| files.iter().map(|f| f.name()).collect::<Vec<_>>();

        sort_files(&mut files, SortBy::Name, SortOrder::Ascending);
        assert_eq!(names(&files), vec!["zdir", "a.log", "b2.txt", "b10.txt"]);

        sort_files(&mut files, SortBy::Size, SortOrder::Descending);
        assert_eq!(names(&files), vec!["zdir", "b2.txt", "a.log", "b10.txt"]);

        sort_files(&mut files, SortBy::Extension, SortOrder::Ascending);
        assert_eq!(names(&files), vec!["zdir", "a.log", "b2.txt", "b10.txt"]);

        let single: FileHandle = Arc::new(LocalFile::from_path(dir.path().join("a.log")).unwrap());
        let mut one = vec![single];
        sort_files(&mut one, SortBy::Modified, SortOrder::Ascending);
        assert_eq!(names(&one), vec!["a.log"]);
    }
}
