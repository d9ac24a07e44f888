//! File handles over archive containers and their entries

use super::{wrap_if_archive, ArchiveDecoder, ArchiveEntry, ArchiveFormat, EntryTree, NodeId};
use crate::{FileHandle, FilePermissions, FileUrl, FsError, ReadSeek, Result, VfsFile};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// State shared by an archive and every entry handle derived from it
#[derive(Debug)]
struct ArchiveCore {
    file: FileHandle,
    format: ArchiveFormat,
    decoder: Box<dyn ArchiveDecoder>,
    tree: Mutex<Option<Arc<EntryTree>>>,
}

impl ArchiveCore {
    /// Entry tree, decoded on first use
    ///
    /// The lock is held while decoding so concurrent callers wait for one
    /// build. A failed build is not remembered.
    fn tree(&self) -> Result<Arc<EntryTree>> {
        let mut guard = self.tree.lock();
        if let Some(tree) = guard.as_ref() {
            return Ok(Arc::clone(tree));
        }

        let start = Instant::now();
        let entries = self.decoder.list_entries(self.file.as_ref()).map_err(|e| {
            tracing::warn!("Failed to read {} archive {}: {}", self.format, self.file.url(), e);
            e
        })?;
        let count = entries.len();
        let tree = Arc::new(EntryTree::build(entries));

        tracing::debug!(
            "Indexed {} archive {}: {} entries, {} nodes in {:?}",
            self.format,
            self.file.url(),
            count,
            tree.len(),
            start.elapsed()
        );

        *guard = Some(Arc::clone(&tree));
        Ok(tree)
    }
}

/// A container file browsed as a directory
///
/// Metadata and byte access are those of the wrapped file; `ls` lists the
/// top level of the container.
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    core: Arc<ArchiveCore>,
}

impl ArchiveFile {
    pub fn new(file: FileHandle, format: ArchiveFormat) -> Self {
        Self {
            core: Arc::new(ArchiveCore {
                file,
                format,
                decoder: format.decoder(),
                tree: Mutex::new(None),
            }),
        }
    }

    pub fn format(&self) -> ArchiveFormat {
        self.core.format
    }

    /// The container file itself
    pub fn inner(&self) -> &FileHandle {
        &self.core.file
    }

    pub fn entry_tree(&self) -> Result<Arc<EntryTree>> {
        self.core.tree()
    }

    /// Handle on the entry at `path`, relative to the archive root
    pub fn entry_file(&self, path: &str) -> Result<FileHandle> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Ok(Arc::new(self.clone()));
        }

        let tree = self.core.tree()?;
        let node = tree
            .lookup(path)
            .ok_or_else(|| FsError::NotFound(format!("{}/{}", self.url(), path)))?;
        let entry = tree
            .entry(node)
            .cloned()
            .ok_or_else(|| FsError::NotFound(format!("{}/{}", self.url(), path)))?;

        Ok(wrap_if_archive(Arc::new(ArchiveEntryFile::new(self.clone(), entry, None))))
    }

    /// Handle on `path`, descending into archives nested inside this one
    ///
    /// `docs/bundle.zip/readme.txt` opens `docs/bundle.zip` as an archive and
    /// resolves `readme.txt` inside it.
    pub fn resolve_entry(&self, path: &str) -> Result<FileHandle> {
        let path = path.trim_start_matches('/');
        let tree = self.core.tree()?;

        let mut from = 0;
        while let Some(pos) = path[from..].find('/') {
            let end = from + pos;
            let prefix = &path[..end];

            let node = tree
                .lookup(prefix)
                .ok_or_else(|| FsError::NotFound(format!("{}/{}", self.url(), prefix)))?;
            let nested = tree
                .entry(node)
                .is_some_and(|e| !e.is_directory() && ArchiveFormat::detect(e.name()).is_some());

            if nested {
                let handle = self.entry_file(prefix)?;
                if let Some(archive) = handle.as_archive() {
                    return archive.resolve_entry(&path[end + 1..]);
                }
            }
            from = end + 1;
        }

        self.entry_file(path)
    }

    /// Wrapped handles for the children of `node`
    fn children_of(&self, tree: &EntryTree, node: NodeId, parent: FileHandle) -> Vec<FileHandle> {
        tree.children(node)
            .iter()
            .filter_map(|&child| tree.entry(child))
            .map(|entry| {
                let file = ArchiveEntryFile::new(self.clone(), entry.clone(), Some(Arc::clone(&parent)));
                wrap_if_archive(Arc::new(file))
            })
            .collect()
    }

    fn open_entry(&self, entry: &ArchiveEntry) -> Result<Box<dyn Read + Send>> {
        self.core.decoder.open_entry(self.core.file.as_ref(), entry)
    }
}

impl VfsFile for ArchiveFile {
    fn url(&self) -> &FileUrl {
        self.core.file.url()
    }

    fn name(&self) -> String {
        self.core.file.name()
    }

    fn canonical_path(&self) -> Result<String> {
        self.core.file.canonical_path()
    }

    fn last_modified(&self) -> Option<i64> {
        self.core.file.last_modified()
    }

    fn size(&self) -> i64 {
        self.core.file.size()
    }

    fn parent(&self) -> Option<FileHandle> {
        self.core.file.parent()
    }

    fn exists(&self) -> bool {
        self.core.file.exists()
    }

    fn permissions(&self) -> FilePermissions {
        self.core.file.permissions()
    }

    fn can_read(&self) -> bool {
        self.core.file.can_read()
    }

    fn can_write(&self) -> bool {
        self.core.file.can_write()
    }

    fn is_hidden(&self) -> bool {
        self.core.file.is_hidden()
    }

    fn is_directory(&self) -> bool {
        false
    }

    fn is_symlink(&self) -> bool {
        self.core.file.is_symlink()
    }

    fn as_archive(&self) -> Option<&ArchiveFile> {
        Some(self)
    }

    fn local_path(&self) -> Option<&Path> {
        self.core.file.local_path()
    }

    fn open_read(&self) -> Result<Box<dyn Read + Send>> {
        self.core.file.open_read()
    }

    fn open_read_at(&self, offset: u64) -> Result<Box<dyn Read + Send>> {
        self.core.file.open_read_at(offset)
    }

    fn has_random_access(&self) -> bool {
        self.core.file.has_random_access()
    }

    fn open_random_access(&self) -> Result<Box<dyn ReadSeek>> {
        self.core.file.open_random_access()
    }

    fn open_write(&self, append: bool) -> Result<Box<dyn Write + Send>> {
        self.core.file.open_write(append)
    }

    fn move_to(&self, dest: &dyn VfsFile) -> Result<bool> {
        self.core.file.move_to(dest)
    }

    fn delete(&self) -> Result<()> {
        self.core.file.delete()
    }

    fn mkdir(&self) -> Result<()> {
        self.core.file.mkdir()
    }

    fn ls(&self) -> Result<Vec<FileHandle>> {
        let tree = self.core.tree()?;
        let parent: FileHandle = Arc::new(self.clone());
        Ok(self.children_of(&tree, EntryTree::ROOT, parent))
    }

    fn free_space(&self) -> Result<i64> {
        self.core.file.free_space()
    }

    fn total_space(&self) -> Result<i64> {
        self.core.file.total_space()
    }
}

/// An entry inside an archive
///
/// Entries are read-only. Their location is the archive's location followed
/// by the entry path.
#[derive(Debug, Clone)]
pub struct ArchiveEntryFile {
    archive: ArchiveFile,
    entry: ArchiveEntry,
    url: FileUrl,
    parent: OnceCell<Option<FileHandle>>,
}

impl ArchiveEntryFile {
    fn new(archive: ArchiveFile, entry: ArchiveEntry, parent: Option<FileHandle>) -> Self {
        let url = archive.url().join(entry.path());
        let cell = OnceCell::new();
        if let Some(parent) = parent {
            let _ = cell.set(Some(parent));
        }

        Self {
            archive,
            entry,
            url,
            parent: cell,
        }
    }

    pub fn entry(&self) -> &ArchiveEntry {
        &self.entry
    }

    /// The archive this entry belongs to
    pub fn archive(&self) -> &ArchiveFile {
        &self.archive
    }

    fn resolve_parent(&self) -> Option<FileHandle> {
        let trimmed = self.entry.path().trim_end_matches('/');
        match trimmed.rfind('/') {
            None => Some(Arc::new(self.archive.clone())),
            Some(pos) => self.archive.entry_file(&trimmed[..=pos]).ok(),
        }
    }
}

impl VfsFile for ArchiveEntryFile {
    fn url(&self) -> &FileUrl {
        &self.url
    }

    fn name(&self) -> String {
        self.entry.name().to_string()
    }

    fn last_modified(&self) -> Option<i64> {
        self.entry.modified()
    }

    fn size(&self) -> i64 {
        self.entry.size()
    }

    fn parent(&self) -> Option<FileHandle> {
        self.parent.get_or_init(|| self.resolve_parent()).clone()
    }

    fn exists(&self) -> bool {
        true
    }

    fn permissions(&self) -> FilePermissions {
        self.entry.permissions()
    }

    fn can_read(&self) -> bool {
        !self.entry.is_directory()
    }

    fn is_directory(&self) -> bool {
        self.entry.is_directory()
    }

    fn open_read(&self) -> Result<Box<dyn Read + Send>> {
        if self.entry.is_directory() {
            return Err(FsError::unsupported("Reading a directory", &self.url));
        }
        self.archive.open_entry(&self.entry)
    }

    fn move_to(&self, _dest: &dyn VfsFile) -> Result<bool> {
        Err(FsError::unsupported("Moving archive entries", &self.url))
    }

    fn ls(&self) -> Result<Vec<FileHandle>> {
        if !self.entry.is_directory() {
            return Err(FsError::NotADirectory(self.url.to_string()));
        }

        let tree = self.archive.entry_tree()?;
        let node = tree
            .lookup(self.entry.path())
            .ok_or_else(|| FsError::NotFound(self.url.to_string()))?;
        let parent: FileHandle = Arc::new(self.clone());
        Ok(self.archive.children_of(&tree, node, parent))
    }

    fn free_space(&self) -> Result<i64> {
        Ok(0)
    }

    fn total_space(&self) -> Result<i64> {
        Ok(self.archive.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_all, LocalFile};
    use std::fs;
    use std::io::Write as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(fs::File::create(path).unwrap());
        for (name, data) in files {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn open_local(path: &Path) -> FileHandle {
        wrap_if_archive(Arc::new(LocalFile::from_path(path).unwrap()))
    }

    fn names(files: &[FileHandle]) -> Vec<String> {
        let mut names: Vec<String> = files.iter().map(|f| f.name()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_browse_zip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.zip");
        write_zip(
            &path,
            &[
                ("dir1/", b""),
                ("dir1/file.txt", b"hello"),
                ("dir2/inner.txt", b"inner"),
                ("top.txt", b"top"),
            ],
        );

        let archive = open_local(&path);
        assert!(archive.as_archive().is_some());
        assert!(archive.is_browsable());
        assert!(!archive.is_directory());
        assert_eq!(archive.name(), "sample.zip");

        let top = archive.ls().unwrap();
        assert_eq!(names(&top), vec!["dir1", "dir2", "top.txt"]);

        let dir2 = top.iter().find(|f| f.name() == "dir2").unwrap();
        assert!(dir2.is_directory());
        assert_eq!(dir2.url().path(), format!("{}/dir2/", archive.url().path()));
        assert_eq!(dir2.parent().unwrap().url(), archive.url());
        assert_eq!(dir2.free_space().unwrap(), 0);
        assert_eq!(dir2.total_space().unwrap(), archive.size());

        let inner = dir2.ls().unwrap();
        assert_eq!(names(&inner), vec!["inner.txt"]);
        assert_eq!(read_all(inner[0].as_ref()).unwrap(), b"inner");
        assert_eq!(inner[0].parent().unwrap().url(), dir2.url());
        assert!(!inner[0].can_write());
        assert!(inner[0].open_write(false).is_err());
        assert!(inner[0].delete().is_err());
        assert!(matches!(inner[0].ls(), Err(FsError::NotADirectory(_))));
    }

    #[test]
    fn test_entry_parent_resolved_lazily() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lazy.zip");
        write_zip(&path, &[("a/b/c.txt", b"c")]);

        let archive = open_local(&path);
        let entry = archive.as_archive().unwrap().entry_file("a/b/c.txt").unwrap();
        let b = entry.parent().unwrap();
        assert_eq!(b.name(), "b");
        let a = b.parent().unwrap();
        assert_eq!(a.name(), "a");
        let root = a.parent().unwrap();
        assert!(root.as_archive().is_some());
        assert_eq!(root.url(), archive.url());
    }

    #[test]
    fn test_nested_archive_resolution() {
        let dir = TempDir::new().unwrap();
        let nested = zip_bytes(&[("readme.txt", b"nested content")]);
        let path = dir.path().join("outer.zip");
        write_zip(&path, &[("docs/bundle.zip", &nested), ("docs/plain.txt", b"plain")]);

        let archive = open_local(&path);
        let top = archive.ls().unwrap();
        let docs = top[0].ls().unwrap();
        let wrapped = docs.iter().find(|f| f.name() == "bundle.zip").unwrap();
        assert!(wrapped.as_archive().is_some());
        assert_eq!(names(&wrapped.ls().unwrap()), vec!["readme.txt"]);

        let readme = archive
            .as_archive()
            .unwrap()
            .resolve_entry("docs/bundle.zip/readme.txt")
            .unwrap();
        assert_eq!(read_all(readme.as_ref()).unwrap(), b"nested content");

        assert!(matches!(
            archive.as_archive().unwrap().resolve_entry("docs/missing.txt"),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_index_is_retried() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.zip");
        fs::write(&path, b"not a zip yet").unwrap();

        let archive = open_local(&path);
        assert!(archive.ls().is_err());

        write_zip(&path, &[("ok.txt", b"ok")]);
        assert_eq!(names(&archive.ls().unwrap()), vec!["ok.txt"]);
    }

    /// Decoder that counts its listings and fails the first `failures` of them
    #[derive(Debug)]
    struct CountingDecoder {
        listings: AtomicUsize,
        failures: usize,
    }

    impl ArchiveDecoder for CountingDecoder {
        fn list_entries(&self, _file: &dyn VfsFile) -> Result<Vec<ArchiveEntry>> {
            let call = self.listings.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            if call < self.failures {
                return Err(FsError::Archive(format!("listing {} failed", call)));
            }
            Ok(vec![
                ArchiveEntry::new("a.txt", false).with_size(1),
                ArchiveEntry::new("b/", true),
            ])
        }

        fn open_entry(&self, _file: &dyn VfsFile, _entry: &ArchiveEntry) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(std::io::Cursor::new(b"x".to_vec())))
        }
    }

    fn counted_archive(dir: &TempDir, failures: usize) -> (ArchiveFile, Arc<CountingDecoder>) {
        let path = dir.path().join("counted.zip");
        fs::write(&path, b"placeholder").unwrap();
        let decoder = Arc::new(CountingDecoder {
            listings: AtomicUsize::new(0),
            failures,
        });
        let archive = ArchiveFile {
            core: Arc::new(ArchiveCore {
                file: Arc::new(LocalFile::from_path(&path).unwrap()),
                format: ArchiveFormat::Zip,
                decoder: Box::new(SharedDecoder(Arc::clone(&decoder))),
                tree: Mutex::new(None),
            }),
        };
        (archive, decoder)
    }

    #[derive(Debug)]
    struct SharedDecoder(Arc<CountingDecoder>);

    impl ArchiveDecoder for SharedDecoder {
        fn list_entries(&self, file: &dyn VfsFile) -> Result<Vec<ArchiveEntry>> {
            self.0.list_entries(file)
        }

        fn open_entry(&self, file: &dyn VfsFile, entry: &ArchiveEntry) -> Result<Box<dyn Read + Send>> {
            self.0.open_entry(file, entry)
        }
    }

    #[test]
    fn test_concurrent_listings_build_once() {
        let dir = TempDir::new().unwrap();
        let (archive, decoder) = counted_archive(&dir, 0);
        let barrier = Arc::new(Barrier::new(8));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let archive = archive.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    names(&archive.ls().unwrap())
                })
            })
            .collect();

        for worker in workers {
            assert_eq!(worker.join().unwrap(), vec!["a.txt", "b"]);
        }
        assert_eq!(decoder.listings.load(Ordering::SeqCst), 1);

        archive.ls().unwrap();
        assert_eq!(decoder.listings.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_build_is_not_remembered() {
        let dir = TempDir::new().unwrap();
        let (archive, decoder) = counted_archive(&dir, 1);

        assert!(matches!(archive.ls(), Err(FsError::Archive(_))));
        assert_eq!(decoder.listings.load(Ordering::SeqCst), 1);

        assert_eq!(names(&archive.ls().unwrap()), vec!["a.txt", "b"]);
        assert_eq!(decoder.listings.load(Ordering::SeqCst), 2);

        archive.ls().unwrap();
        assert_eq!(decoder.listings.load(Ordering::SeqCst), 2);
    }
}
