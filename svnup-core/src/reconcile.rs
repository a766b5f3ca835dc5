//! Reconciliation of the remote inventory against local state.
//!
//! - `classify` decides, per remote file, whether its content is already
//!   correct on disk or has to be downloaded
//! - `write_index` folds the remote files into the pending known-files index
//! - `prune` removes whatever the remote tree no longer contains

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, SvnupError};
use crate::inventory::Inventory;
use crate::known_files::KnownFilesIndex;

/// Top-level entries of the checkout that are never pruned.
pub const PROTECTED_DIRS: &[&str] = &[".svnup", ".git"];

/// What to do with local files the repository does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneMode {
    /// Delete them.
    pub trim_tree: bool,
    /// Only report them; takes precedence over `trim_tree` for files.
    pub extra_files: bool,
}

/// Paths touched by `prune`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub removed_files: Vec<String>,
    pub extra_files: Vec<String>,
    pub removed_dirs: Vec<String>,
}

/// Classify every file that has not been checked yet and return how many
/// are marked for download.
///
/// A file without an MD5 is downloaded but stays unchecked, so a later pass
/// can look again once its checksum is known.
pub fn classify(inventory: &mut Inventory) -> usize {
    let Inventory {
        files, known_files, ..
    } = inventory;

    for file in files.iter_mut().filter(|f| !f.md5_checked) {
        let Some(md5) = file.md5.as_deref() else {
            file.download = true;
            continue;
        };
        file.download = match known_files.get(&file.path) {
            None => true,
            Some(known) => known != md5,
        };
        file.md5_checked = true;
    }
    inventory.files.iter().filter(|f| f.download).count()
}

/// Write every remote file to the pending index and drop it from the
/// known-files and local-files maps.
pub fn write_index(inventory: &mut Inventory, index: &KnownFilesIndex) -> Result<()> {
    let mut writer = index.writer()?;
    for file in &inventory.files {
        let md5 = file.md5.as_deref().ok_or_else(|| {
            SvnupError::protocol(format!("no checksum known for {}", file.path))
        })?;
        writer.record(md5, &file.path)?;
        inventory.known_files.remove(&file.path);
        inventory.local_files.remove(&file.path);
    }
    writer.finish()
}

/// Remove files and directories that are no longer part of the repository.
pub fn prune(inventory: &mut Inventory, mode: PruneMode) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    let root = inventory.root().to_path_buf();

    // Files tracked by the previous run but gone remotely.
    let stale: Vec<String> = std::mem::take(&mut inventory.known_files)
        .into_keys()
        .collect();
    for path in stale {
        inventory.local_files.remove(&path);
        if is_protected(&path) {
            continue;
        }
        if prune_path(&root, &path, &inventory.remote_dirs)? {
            report.removed_files.push(path);
        }
    }

    // Files nobody ever tracked.
    if mode.extra_files || mode.trim_tree {
        for path in std::mem::take(&mut inventory.local_files) {
            if is_protected(&path) {
                continue;
            }
            if mode.extra_files {
                report.extra_files.push(path);
            } else if prune_path(&root, &path, &inventory.remote_dirs)? {
                report.removed_files.push(path);
            }
        }
    }

    // Directories absent remotely, deepest first so nested empties go before
    // their parents. Only empty ones go, whatever the mode.
    for path in std::mem::take(&mut inventory.local_dirs).into_iter().rev() {
        if is_protected(&path) {
            continue;
        }
        let full = inventory.local_path(&path);
        match fs::remove_dir(&full) {
            Ok(()) => report.removed_dirs.push(path),
            Err(e) => debug!("keeping {}: {}", full.display(), e),
        }
    }

    Ok(report)
}

/// Whether `path` lies inside a control directory.
pub fn is_protected(path: &str) -> bool {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
    PROTECTED_DIRS.contains(&first)
}

/// Delete one file (or empty directory), then its parent if that is now
/// empty and not a directory in `remote_dirs`. Returns whether anything was
/// deleted.
fn prune_path(root: &Path, path: &str, remote_dirs: &BTreeSet<String>) -> Result<bool> {
    let full = root.join(path.trim_start_matches('/'));
    let meta = match fs::symlink_metadata(&full) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let removed = if meta.is_dir() {
        fs::remove_dir(&full)
    } else {
        fs::remove_file(&full)
    };
    if let Err(e) = removed {
        warn!("cannot remove {}: {}", full.display(), e);
        return Ok(false);
    }

    let parent = path.rsplit_once('/').map_or("", |(parent, _)| parent);
    if !parent.is_empty() && !remote_dirs.contains(parent) {
        if let Some(dir) = full.parent() {
            if let Err(e) = fs::remove_dir(dir) {
                debug!("keeping {}: {}", dir.display(), e);
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::RemoteFile;
    use tempfile::TempDir;

    const X: &str = "9dd4e461268c8034f5c8564e155c67a6";
    const Y: &str = "415290769594460e2e485922904f345d";

    fn remote(path: &str, md5: Option<&str>) -> RemoteFile {
        RemoteFile {
            md5: md5.map(str::to_string),
            ..RemoteFile::new(path, Some(1))
        }
    }

    #[test]
    fn test_classify() {
        let tmp = TempDir::new().unwrap();
        let mut inventory = Inventory::new(tmp.path());
        inventory.known_files.insert("/same".into(), X.into());
        inventory.known_files.insert("/changed".into(), Y.into());
        inventory.add_file(remote("/same", Some(X)));
        inventory.add_file(remote("/changed", Some(X)));
        inventory.add_file(remote("/new", Some(X)));
        inventory.add_file(remote("/unknown", None));

        assert_eq!(classify(&mut inventory), 3);
        let flags: Vec<(bool, bool)> = inventory
            .files
            .iter()
            .map(|f| (f.download, f.md5_checked))
            .collect();
        assert_eq!(
            flags,
            vec![(false, true), (true, true), (true, true), (true, false)]
        );

        // Once the checksum is learned, the unchecked file is looked at again.
        inventory.known_files.insert("/unknown".into(), Y.into());
        inventory.files[3].md5 = Some(Y.into());
        assert_eq!(classify(&mut inventory), 2);
        assert!(inventory.files[3].md5_checked);
        assert!(!inventory.files[3].download);
    }

    #[test]
    fn test_checked_files_are_not_reclassified() {
        let tmp = TempDir::new().unwrap();
        let mut inventory = Inventory::new(tmp.path());
        inventory.add_file(remote("/a", Some(X)));
        classify(&mut inventory);
        inventory.known_files.insert("/a".into(), X.into());
        classify(&mut inventory);
        assert!(inventory.files[0].download);
    }

    #[test]
    fn test_changed_file_and_untracked_local_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir(root.join(".svnup")).unwrap();
        fs::write(root.join("a.txt"), "old").unwrap();
        fs::write(root.join("b.txt"), "stray").unwrap();

        let mut inventory = Inventory::new(root);
        inventory.scan_local(true).unwrap();
        inventory.known_files.insert("/a.txt".into(), Y.into());
        inventory.add_file(remote("/a.txt", Some(X)));

        assert_eq!(classify(&mut inventory), 1);
        assert!(inventory.files[0].download);

        let index = KnownFilesIndex::new(&root.join(".svnup"));
        write_index(&mut inventory, &index).unwrap();
        index.commit().unwrap();
        assert_eq!(index.load().unwrap()["/a.txt"], X);

        let report = prune(
            &mut inventory,
            PruneMode {
                trim_tree: true,
                extra_files: false,
            },
        )
        .unwrap();
        assert_eq!(report.removed_files, vec!["/b.txt".to_string()]);
        assert!(root.join("a.txt").exists());
        assert!(!root.join("b.txt").exists());
        assert!(root.join(".svnup/known_files").exists());
    }

    #[test]
    fn test_prune_stale_known_file_and_empty_parent() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("old/dir")).unwrap();
        fs::write(root.join("old/dir/gone.c"), "x").unwrap();

        let mut inventory = Inventory::new(root);
        inventory.known_files.insert("/old/dir/gone.c".into(), X.into());
        let report = prune(
            &mut inventory,
            PruneMode {
                trim_tree: false,
                extra_files: false,
            },
        )
        .unwrap();
        assert_eq!(report.removed_files, vec!["/old/dir/gone.c".to_string()]);
        assert!(!root.join("old/dir").exists());
        assert!(root.join("old").exists());
    }

    #[test]
    fn test_prune_keeps_remote_directory_left_empty() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/old.txt"), "x").unwrap();

        let mut inventory = Inventory::new(root);
        inventory.scan_local(true).unwrap();
        inventory.known_files.insert("/docs/old.txt".into(), X.into());
        inventory.confirm_directory("/docs").unwrap();
        let report = prune(
            &mut inventory,
            PruneMode {
                trim_tree: true,
                extra_files: false,
            },
        )
        .unwrap();
        assert_eq!(report.removed_files, vec!["/docs/old.txt".to_string()]);
        assert!(report.removed_dirs.is_empty());
        assert!(root.join("docs").is_dir());
    }

    #[test]
    fn test_empty_directories_pruned_without_trim() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("gone/deeper")).unwrap();
        fs::create_dir_all(root.join("local")).unwrap();
        fs::write(root.join("local/notes.txt"), "mine").unwrap();

        let mut inventory = Inventory::new(root);
        inventory.scan_local(false).unwrap();
        let report = prune(
            &mut inventory,
            PruneMode {
                trim_tree: false,
                extra_files: false,
            },
        )
        .unwrap();
        assert_eq!(report.removed_dirs, vec!["/gone/deeper", "/gone"]);
        assert!(report.removed_files.is_empty());
        assert!(root.join("local/notes.txt").exists());
    }

    #[test]
    fn test_prune_directories_deepest_first() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir_all(root.join("keep")).unwrap();
        fs::write(root.join("keep/file"), "x").unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();

        let mut inventory = Inventory::new(root);
        inventory.scan_local(false).unwrap();
        let report = prune(
            &mut inventory,
            PruneMode {
                trim_tree: true,
                extra_files: false,
            },
        )
        .unwrap();
        assert_eq!(report.removed_dirs, vec!["/a/b/c", "/a/b", "/a"]);
        assert!(root.join("keep/file").exists());
        assert!(root.join(".git/objects").exists());
    }

    #[test]
    fn test_extra_files_are_reported_not_deleted() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("local.patch"), "x").unwrap();

        let mut inventory = Inventory::new(root);
        inventory.scan_local(true).unwrap();
        let report = prune(
            &mut inventory,
            PruneMode {
                trim_tree: true,
                extra_files: true,
            },
        )
        .unwrap();
        assert_eq!(report.extra_files, vec!["/local.patch".to_string()]);
        assert!(report.removed_files.is_empty());
        assert!(root.join("local.patch").exists());
    }

    #[test]
    fn test_is_protected() {
        assert!(is_protected("/.svnup/known_files"));
        assert!(is_protected("/.git"));
        assert!(!is_protected("/src/.git-keep"));
        assert!(!is_protected("/.gitignore"));
    }
}
