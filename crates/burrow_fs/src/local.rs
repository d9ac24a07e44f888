//! Local file system backend

use crate::location::{native_to_url_path, url_path_to_native};
use crate::{wrap_if_archive, FileHandle, FilePermissions, FileUrl, FsError, ReadSeek, Result, VfsFile};
use once_cell::sync::OnceCell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use sysinfo::Disks;

/// File or directory on a locally mounted file system
#[derive(Debug)]
pub struct LocalFile {
    url: FileUrl,
    path: PathBuf,
    parent: OnceCell<Option<FileHandle>>,
}

impl LocalFile {
    /// Handle for a `file://` location
    pub fn new(url: FileUrl) -> Result<Self> {
        if !url.is_local() {
            return Err(FsError::Unsupported(format!("Not a local location: {}", url)));
        }
        let path = url_path_to_native(&url);
        Ok(Self {
            url,
            path,
            parent: OnceCell::new(),
        })
    }

    /// Handle for a native path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(FileUrl::from_path(path)?)
    }

    fn with_parent(url: FileUrl, parent: FileHandle) -> Result<Self> {
        let file = Self::new(url)?;
        let _ = file.parent.set(Some(parent));
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn metadata(&self) -> Option<fs::Metadata> {
        fs::metadata(&self.path).ok()
    }

    fn is_drive_list(&self) -> bool {
        cfg!(windows) && self.url.is_root() && self.url.host().is_none()
    }

    fn same(&self) -> Self {
        Self {
            url: self.url.clone(),
            path: self.path.clone(),
            parent: self.parent.clone(),
        }
    }
}

impl VfsFile for LocalFile {
    fn url(&self) -> &FileUrl {
        &self.url
    }

    fn canonical_path(&self) -> Result<String> {
        let canonical = fs::canonicalize(&self.path)?;
        let mut path = native_to_url_path(&canonical);
        if canonical.is_dir() && !path.ends_with('/') {
            path.push('/');
        }
        Ok(path)
    }

    fn last_modified(&self) -> Option<i64> {
        self.metadata()?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
    }

    fn size(&self) -> i64 {
        match self.metadata() {
            Some(m) if m.is_dir() => 0,
            Some(m) => m.len() as i64,
            None => -1,
        }
    }

    fn parent(&self) -> Option<FileHandle> {
        self.parent
            .get_or_init(|| {
                let parent_url = self.url.parent()?;
                LocalFile::new(parent_url)
                    .ok()
                    .map(|f| Arc::new(f) as FileHandle)
            })
            .clone()
    }

    fn exists(&self) -> bool {
        self.is_drive_list() || fs::symlink_metadata(&self.path).is_ok()
    }

    fn permissions(&self) -> FilePermissions {
        let Some(metadata) = self.metadata() else {
            return FilePermissions::default();
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            FilePermissions::new(metadata.permissions().mode(), 0o777)
        }

        #[cfg(not(unix))]
        {
            // Only the owner write bit is known
            let bits = if metadata.permissions().readonly() { 0o444 } else { 0o666 };
            FilePermissions::new(bits, 0o200)
        }
    }

    fn can_read(&self) -> bool {
        match self.metadata() {
            Some(m) if m.is_dir() => fs::read_dir(&self.path).is_ok(),
            Some(_) => File::open(&self.path).is_ok(),
            None => false,
        }
    }

    fn can_write(&self) -> bool {
        self.metadata()
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
    }

    fn is_hidden(&self) -> bool {
        is_hidden_file(&self.path, &self.name())
    }

    fn is_directory(&self) -> bool {
        self.is_drive_list() || self.path.is_dir()
    }

    fn is_symlink(&self) -> bool {
        fs::symlink_metadata(&self.path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn open_read(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn open_read_at(&self, offset: u64) -> Result<Box<dyn Read + Send>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(Box::new(file))
    }

    fn has_random_access(&self) -> bool {
        true
    }

    fn open_random_access(&self) -> Result<Box<dyn ReadSeek>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn open_write(&self, append: bool) -> Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(&self.path)?;
        Ok(Box::new(file))
    }

    fn move_to(&self, dest: &dyn VfsFile) -> Result<bool> {
        // Only a local destination can be reached with a native rename
        let Some(target) = dest.local_path() else {
            return Ok(false);
        };
        if !dest.url().is_local() {
            return Ok(false);
        }

        match fs::rename(&self.path, target) {
            Ok(()) => {
                tracing::debug!("Renamed: {} -> {}", self.path.display(), target.display());
                Ok(true)
            }
            Err(e) if is_cross_device(&e) => {
                tracing::debug!("{} and {} are on different volumes", self.path.display(), target.display());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self) -> Result<()> {
        let metadata = fs::symlink_metadata(&self.path)?;
        if metadata.is_dir() {
            fs::remove_dir(&self.path)?;
        } else {
            fs::remove_file(&self.path)?;
        }
        tracing::debug!("Deleted: {}", self.path.display());
        Ok(())
    }

    fn mkdir(&self) -> Result<()> {
        fs::create_dir(&self.path)?;
        Ok(())
    }

    fn ls(&self) -> Result<Vec<FileHandle>> {
        if self.is_drive_list() {
            return list_drives(self);
        }

        let metadata = fs::metadata(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(self.url.to_string()),
            _ => FsError::Io(e),
        })?;
        if !metadata.is_dir() {
            return Err(FsError::NotADirectory(self.url.to_string()));
        }

        let parent: FileHandle = Arc::new(self.same());
        let mut children = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                || entry.path().is_dir();

            let mut child_url = self.url.join(&name);
            if is_dir {
                child_url = child_url.as_directory();
            }

            let child = LocalFile::with_parent(child_url, Arc::clone(&parent))?;
            children.push(wrap_if_archive(Arc::new(child)));
        }

        Ok(children)
    }

    fn free_space(&self) -> Result<i64> {
        volume_space(&self.path).map(|(free, _)| free)
    }

    fn total_space(&self) -> Result<i64> {
        volume_space(&self.path).map(|(_, total)| total)
    }
}

/// Check if a file is hidden
#[cfg(windows)]
fn is_hidden_file(path: &Path, _name: &str) -> bool {
    use std::os::windows::fs::MetadataExt;

    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;

    fs::metadata(path)
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn is_hidden_file(_path: &Path, name: &str) -> bool {
    name.starts_with('.')
}

/// Drive letters present on the machine, as children of `file:///`
#[cfg(windows)]
fn list_drives(root: &LocalFile) -> Result<Vec<FileHandle>> {
    let parent: FileHandle = Arc::new(root.same());
    let mut drives = Vec::new();

    for letter in b'A'..=b'Z' {
        let drive = format!("{}:\\", letter as char);
        if Path::new(&drive).exists() {
            let url = root.url.join(&format!("{}:/", letter as char));
            drives.push(Arc::new(LocalFile::with_parent(url, Arc::clone(&parent))?) as FileHandle);
        }
    }

    Ok(drives)
}

#[cfg(not(windows))]
fn list_drives(root: &LocalFile) -> Result<Vec<FileHandle>> {
    Err(FsError::NotADirectory(root.url.to_string()))
}

/// Rename failures that call for a copy and delete instead
fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EXDEV)
    }

    #[cfg(windows)]
    {
        use windows::Win32::Foundation::ERROR_NOT_SAME_DEVICE;
        err.raw_os_error() == Some(ERROR_NOT_SAME_DEVICE.0 as i32)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

/// (free, total) bytes of the volume holding `path`, `-1` when no mounted
/// disk contains it
fn volume_space(path: &Path) -> Result<(i64, i64)> {
    // Verbatim `\\?\` paths never match a drive's mount point
    #[cfg(windows)]
    let path = {
        fs::metadata(path)?;
        std::path::absolute(path)?
    };
    #[cfg(not(windows))]
    let path = fs::canonicalize(path)?;
    let disks = Disks::new_with_refreshed_list();

    // The innermost mount point wins
    let disk = disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    Ok(match disk {
        Some(disk) => (disk.available_space() as i64, disk.total_space() as i64),
        None => (-1, -1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(path: &Path) -> LocalFile {
        LocalFile::from_path(path).unwrap()
    }

    #[test]
    fn test_metadata_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let root = local(dir.path());
        assert!(root.exists());
        assert!(root.is_directory());
        assert!(root.is_browsable());
        assert!(root.absolute_path().ends_with('/'));

        let mut children = root.ls().unwrap();
        children.sort_by_key(|c| c.name());
        assert_eq!(children.len(), 2);

        let file = &children[0];
        assert_eq!(file.name(), "a.txt");
        assert_eq!(file.size(), 5);
        assert!(!file.is_directory());
        assert!(!file.absolute_path().ends_with('/'));
        assert!(file.last_modified().is_some());

        let sub = &children[1];
        assert!(sub.is_directory());
        assert!(sub.absolute_path().ends_with("sub/"));
        assert_eq!(sub.parent().unwrap().url(), root.url());
    }

    #[test]
    fn test_ls_on_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        fs::write(&path, b"x").unwrap();
        assert!(matches!(local(&path).ls(), Err(FsError::NotADirectory(_))));
    }

    #[test]
    fn test_read_write_and_offset() {
        let dir = tempfile::tempdir().unwrap();
        let file = local(&dir.path().join("data.bin"));

        file.open_write(false).unwrap().write_all(b"0123456789").unwrap();
        file.open_write(true).unwrap().write_all(b"AB").unwrap();

        let mut content = String::new();
        file.open_read_at(8).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "89AB");
        assert_eq!(file.size(), 12);
    }

    #[test]
    fn test_mkdir_delete_and_move() {
        let dir = tempfile::tempdir().unwrap();
        let sub = local(&dir.path().join("sub"));
        sub.mkdir().unwrap();
        assert!(sub.is_directory());

        let inner = local(&dir.path().join("sub").join("f.txt"));
        inner.open_write(false).unwrap().write_all(b"x").unwrap();

        // Non-recursive delete refuses a populated directory
        assert!(sub.delete().is_err());

        let moved = local(&dir.path().join("g.txt"));
        assert!(inner.move_to(&moved).unwrap());
        assert!(moved.exists());
        assert!(!inner.exists());

        sub.delete().unwrap();
        assert!(!sub.exists());
    }

    #[test]
    fn test_parent_chain() {
        let dir = tempfile::tempdir().unwrap();
        let file = local(&dir.path().join("x.txt"));
        let parent = file.parent().unwrap();
        assert_eq!(parent.url(), &FileUrl::from_path(dir.path()).unwrap());

        let mut current: FileHandle = Arc::new(file);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        assert!(current.url().is_root());
    }

    #[cfg(unix)]
    #[test]
    fn test_hidden_and_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let hidden = dir.path().join(".secret");
        fs::write(&hidden, b"x").unwrap();
        assert!(local(&hidden).is_hidden());

        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&hidden, &link).unwrap();
        assert!(local(&link).is_symlink());
        assert!(!local(&hidden).is_symlink());

        let root = local(dir.path());
        assert!(root.permissions().mask == 0o777);
    }

    #[test]
    fn test_volume_space() {
        let dir = tempfile::tempdir().unwrap();
        let root = local(dir.path());

        let total = root.total_space().unwrap();
        let free = root.free_space().unwrap();
        if total == -1 {
            assert_eq!(free, -1);
        } else {
            assert!(total > 0);
            assert!((0..=total).contains(&free));
        }

        assert!(local(&dir.path().join("absent")).total_space().is_err());
    }

    #[test]
    fn test_cross_device_rename_falls_back() {
        #[cfg(unix)]
        let cross = io::Error::from_raw_os_error(libc::EXDEV);
        #[cfg(windows)]
        let cross = io::Error::from_raw_os_error(17);
        #[cfg(any(unix, windows))]
        assert!(is_cross_device(&cross));

        assert!(!is_cross_device(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_cross_device(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_ls_reports_io_failures() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        fs::write(&plain, b"x").unwrap();

        // A path running through a regular file fails with ENOTDIR, not "missing"
        let err = local(&plain.join("child")).ls().unwrap_err();
        #[cfg(unix)]
        assert!(matches!(err, FsError::Io(_)), "{:?}", err);
        assert!(err.is_io_failure() || matches!(err, FsError::NotFound(_)));

        let missing = local(&dir.path().join("absent")).ls().unwrap_err();
        assert!(matches!(missing, FsError::NotFound(_)));
    }
}
