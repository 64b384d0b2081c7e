//! Directory traversal for archive construction.
//!
//! The tree is visited in a single forward pass. Entries are handed to a
//! callback as they are discovered so nothing about the tree is collected in
//! memory.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// What an entry is, as far as archiving is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    /// Symlinks, sockets, devices and anything else that is not a regular
    /// file or directory.
    Other,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    pub kind: EntryKind,

    /// File size in bytes (0 for directories)
    pub size: u64,

    /// Unix permission bits
    pub mode: u32,

    /// Last modification time, if the platform reports one
    pub mtime: Option<SystemTime>,
}

impl TreeEntry {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata().map_err(std::io::Error::from)?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o7777
        };

        #[cfg(not(unix))]
        let mode = if kind == EntryKind::Directory { 0o755 } else { 0o644 };

        Ok(Self {
            path,
            relative_path,
            kind,
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            mode,
            mtime: metadata.modified().ok(),
        })
    }

    /// Relative path with `/` separators, as stored in zip headers.
    ///
    /// `None` when a component is not valid UTF-8.
    pub fn archive_name(&self) -> Option<String> {
        let parts = self
            .relative_path
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_str()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }
}

/// Walk `root` and call `visit` for every entry below it.
///
/// The root itself is not visited. Entries are visited in file-name order,
/// parents before children, and symbolic links are never followed. The first
/// error, from the walk or from `visit`, stops the traversal.
///
/// Returns the number of visited entries.
///
/// # Example
/// ```no_run
/// use backup_runner::fs::walker::{walk_tree, EntryKind};
/// use std::path::Path;
///
/// let mut files = 0;
/// walk_tree(Path::new("/data"), |entry| {
///     if entry.kind == EntryKind::File {
///         files += 1;
///     }
///     Ok::<(), std::io::Error>(())
/// })
/// .unwrap();
/// ```
pub fn walk_tree<F, E>(root: &Path, mut visit: F) -> Result<usize, E>
where
    F: FnMut(&TreeEntry) -> Result<(), E>,
    E: From<walkdir::Error> + From<std::io::Error>,
{
    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();

    let mut visited = 0;
    for entry in walker {
        let entry = entry?;
        let tree_entry = TreeEntry::from_entry(&entry, root)?;
        visit(&tree_entry)?;
        visited += 1;
    }

    Ok(visited)
}
