//! Inventory model.
//!
//! Holds the remote files found at the target revision plus three ordered
//! indexes keyed by repository-relative path (`/dir/file`):
//! - `known_files`: path → MD5 from the previous run
//! - `local_files`: files found on disk under the target
//! - `local_dirs`: directories found on disk under the target
//!
//! Entries are removed from the indexes as the remote tree confirms them;
//! whatever remains afterwards is obsolete.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, SvnupError};

/// A file present in the repository at the target revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFile {
    /// Repository-relative path with a leading slash.
    pub path: String,
    /// WebDAV resource to GET (http only).
    pub href: Option<String>,
    /// Declared size; `None` until the download response reports it.
    pub size: Option<u64>,
    /// Bytes the file occupies on the wire, framing included.
    pub raw_size: u64,
    /// Lowercase hex MD5 digest.
    pub md5: Option<String>,
    pub md5_checked: bool,
    pub download: bool,
    pub executable: bool,
    /// `svn:special` (symbolic link).
    pub special: bool,
}

impl RemoteFile {
    pub fn new(path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            path: path.into(),
            size,
            ..Self::default()
        }
    }
}

/// Remote files plus the local indexes they are reconciled against.
#[derive(Debug)]
pub struct Inventory {
    root: PathBuf,
    pub files: Vec<RemoteFile>,
    pub known_files: BTreeMap<String, String>,
    pub local_files: BTreeSet<String>,
    pub local_dirs: BTreeSet<String>,
    /// Directories the remote listing confirmed; pruning never removes them.
    pub remote_dirs: BTreeSet<String>,
}

impl Inventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Vec::new(),
            known_files: BTreeMap::new(),
            local_files: BTreeSet::new(),
            local_dirs: BTreeSet::new(),
            remote_dirs: BTreeSet::new(),
        }
    }

    /// Checkout directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a repository-relative path.
    pub fn local_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// Record every directory (and, if `include_files`, every file or link)
    /// currently under the checkout directory.
    pub fn scan_local(&mut self, include_files: bool) -> Result<()> {
        if !self.root.is_dir() {
            return Ok(());
        }
        for entry in WalkDir::new(&self.root).follow_links(false).min_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = repository_path(relative);
            if entry.file_type().is_dir() {
                self.local_dirs.insert(key);
            } else if include_files {
                self.local_files.insert(key);
            }
        }
        debug!(
            "local scan: {} files, {} directories",
            self.local_files.len(),
            self.local_dirs.len()
        );
        Ok(())
    }

    pub fn add_file(&mut self, file: RemoteFile) {
        self.files.push(file);
    }

    /// A directory exists remotely: create it locally if needed and stop
    /// treating it as a prune candidate.
    pub fn confirm_directory(&mut self, path: &str) -> Result<()> {
        create_directory(&self.local_path(path))?;
        self.local_dirs.remove(path);
        self.remote_dirs.insert(path.to_string());
        Ok(())
    }
}

/// Create `path` unless it already is a directory. Anything else in the way
/// is a conflict the user has to resolve.
pub fn create_directory(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(SvnupError::Conflict {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Join a repository directory and an entry name: `("/a", "b")` → `/a/b`.
pub fn join_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

fn repository_path(relative: &Path) -> String {
    let mut key = String::new();
    for component in relative.components() {
        key.push('/');
        key.push_str(&component.as_os_str().to_string_lossy());
    }
    key
}
