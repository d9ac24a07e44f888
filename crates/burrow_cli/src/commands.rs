//! Subcommand implementations
//!
//! Output goes to the writer passed in so the commands can be exercised
//! without a terminal.

use anyhow::{bail, Context, Result};
use burrow_fs::{sort_files, FileFactory, FileHandle, SortBy, SortOrder, VfsFile};
use chrono::DateTime;
use std::io::{self, Write};

pub fn ls(
    factory: &FileFactory,
    location: &str,
    show_hidden: bool,
    long: bool,
    sort_by: SortBy,
    order: SortOrder,
    out: &mut dyn Write,
) -> Result<()> {
    let dir = open(factory, location)?;
    if !dir.is_browsable() {
        bail!("{} is not a directory or an archive", dir.url());
    }

    let mut children = dir
        .ls()
        .with_context(|| format!("Failed to list {}", dir.url()))?;
    children.retain(|f| show_hidden || !f.is_hidden());
    sort_files(&mut children, sort_by, order);

    for child in &children {
        if long {
            writeln!(
                out,
                "{} {:>12} {} {}",
                kind_marker(child.as_ref()),
                format_size(child.size()),
                format_time(child.last_modified()),
                display_name(child.as_ref())
            )?;
        } else {
            writeln!(out, "{}", display_name(child.as_ref()))?;
        }
    }
    Ok(())
}

pub fn tree(
    factory: &FileFactory,
    location: &str,
    max_depth: Option<usize>,
    show_hidden: bool,
    enter_archives: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let root = open(factory, location)?;
    writeln!(out, "{}", root.url())?;
    walk(root.as_ref(), "", 1, max_depth, show_hidden, enter_archives, out)
}

fn walk(
    dir: &dyn VfsFile,
    indent: &str,
    depth: usize,
    max_depth: Option<usize>,
    show_hidden: bool,
    enter_archives: bool,
    out: &mut dyn Write,
) -> Result<()> {
    if max_depth.is_some_and(|max| depth > max) {
        return Ok(());
    }

    let mut children = match dir.ls() {
        Ok(children) => children,
        Err(e) => {
            // Keep going with the rest of the tree
            tracing::warn!("Cannot list {}: {}", dir.url(), e);
            writeln!(out, "{}└── [error: {}]", indent, e)?;
            return Ok(());
        }
    };
    children.retain(|f| show_hidden || !f.is_hidden());
    sort_files(&mut children, SortBy::Name, SortOrder::Ascending);

    let count = children.len();
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == count;
        writeln!(out, "{}{} {}", indent, if last { "└──" } else { "├──" }, display_name(child.as_ref()))?;

        let descend = child.is_directory() || (enter_archives && child.as_archive().is_some());
        if descend {
            let next_indent = format!("{}{}", indent, if last { "    " } else { "│   " });
            walk(child.as_ref(), &next_indent, depth + 1, max_depth, show_hidden, enter_archives, out)?;
        }
    }
    Ok(())
}

pub fn cat(factory: &FileFactory, location: &str, out: &mut dyn Write) -> Result<()> {
    let file = open(factory, location)?;
    if file.is_directory() {
        bail!("{} is a directory", file.url());
    }

    let mut stream = file
        .open_read()
        .with_context(|| format!("Failed to open {}", file.url()))?;
    io::copy(&mut stream, out).with_context(|| format!("Failed to read {}", file.url()))?;
    Ok(())
}

pub fn stat(factory: &FileFactory, location: &str, out: &mut dyn Write) -> Result<()> {
    let file = open(factory, location)?;
    if !file.exists() {
        bail!("{} does not exist", file.url());
    }

    let kind = match file.as_archive() {
        Some(archive) => format!("{} archive", archive.format()),
        None if file.is_directory() => "directory".to_string(),
        None => "file".to_string(),
    };

    writeln!(out, "Location:    {}", file.url())?;
    writeln!(out, "Name:        {}", file.name())?;
    writeln!(out, "Kind:        {}", kind)?;
    writeln!(out, "Size:        {}", format_size(file.size()))?;
    writeln!(out, "Modified:    {}", format_time(file.last_modified()))?;
    writeln!(out, "Permissions: {}", file.permissions().to_rwx())?;
    writeln!(out, "Readable:    {}", file.can_read())?;
    writeln!(out, "Writable:    {}", file.can_write())?;
    writeln!(out, "Hidden:      {}", file.is_hidden())?;
    writeln!(out, "Symlink:     {}", file.is_symlink())?;
    if let Ok(path) = file.canonical_path() {
        writeln!(out, "Canonical:   {}", path)?;
    }
    if let Some(parent) = file.parent() {
        writeln!(out, "Parent:      {}", parent.url())?;
    }
    let (free, total) = (file.free_space()?, file.total_space()?);
    if free >= 0 && total >= 0 {
        writeln!(out, "Space:       {} free of {}", format_size(free), format_size(total))?;
    }
    Ok(())
}

pub fn mkdir(factory: &FileFactory, location: &str) -> Result<()> {
    let dir = open(factory, location)?;
    if dir.exists() {
        bail!("{} already exists", dir.url());
    }
    dir.mkdir()
        .with_context(|| format!("Failed to create {}", dir.url()))?;
    tracing::info!("Created {}", dir.url());
    Ok(())
}

pub fn rm(factory: &FileFactory, location: &str) -> Result<()> {
    let file = open(factory, location)?;
    if !file.exists() {
        bail!("{} does not exist", file.url());
    }
    file.delete()
        .with_context(|| format!("Failed to delete {}", file.url()))?;
    tracing::info!("Deleted {}", file.url());
    Ok(())
}

/// Move with the backend's rename, falling back to copy and delete
pub fn mv(factory: &FileFactory, source: &str, destination: &str) -> Result<()> {
    let source = open(factory, source)?;
    let destination = open(factory, destination)?;
    if !source.exists() {
        bail!("{} does not exist", source.url());
    }
    if destination.exists() {
        bail!("{} already exists", destination.url());
    }

    if source
        .move_to(destination.as_ref())
        .with_context(|| format!("Failed to move {}", source.url()))?
    {
        tracing::info!("Renamed {} to {}", source.url(), destination.url());
        return Ok(());
    }

    if source.is_directory() {
        bail!("Cannot move directory {} across backends", source.url());
    }

    let mut reader = source
        .open_read()
        .with_context(|| format!("Failed to open {}", source.url()))?;
    let mut writer = destination
        .open_write(false)
        .with_context(|| format!("Failed to create {}", destination.url()))?;
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    drop(writer);

    source
        .delete()
        .with_context(|| format!("Copied to {} but failed to delete {}", destination.url(), source.url()))?;
    tracing::info!("Copied {} bytes from {} to {}", copied, source.url(), destination.url());
    Ok(())
}

fn open(factory: &FileFactory, location: &str) -> Result<FileHandle> {
    factory
        .get_file(location)
        .with_context(|| format!("Cannot resolve {}", location))
}

fn display_name(file: &dyn VfsFile) -> String {
    if file.is_directory() {
        format!("{}/", file.name())
    } else {
        file.name()
    }
}

/// `d` directory, `a` archive, `-` file, then `rwx` bits
fn kind_marker(file: &dyn VfsFile) -> String {
    let kind = if file.is_directory() {
        'd'
    } else if file.as_archive().is_some() {
        'a'
    } else {
        '-'
    };
    format!("{}{}", kind, file.permissions().to_rwx())
}

fn format_size(size: i64) -> String {
    if size < 0 {
        "?".to_string()
    } else {
        size.to_string()
    }
}

fn format_time(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".repeat(16))
}
