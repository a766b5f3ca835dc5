//! Verify and persist downloaded files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, SvnupError};
use crate::inventory::RemoteFile;

/// Content prefix of an `svn:special` symbolic link.
pub const LINK_PREFIX: &[u8] = b"link ";

/// Hex MD5 of `content`.
pub fn md5_hex(content: &[u8]) -> String {
    hex::encode(md5::compute(content).0)
}

/// Check `content` against the checksum the server declared for `file` and
/// return the computed checksum. Files without a declared checksum pass.
pub fn verify(file: &RemoteFile, content: &[u8]) -> Result<String> {
    let actual = md5_hex(content);
    if let Some(expected) = file.md5.as_deref() {
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(SvnupError::Integrity {
                path: file.path.clone(),
                expected: expected.to_string(),
                actual,
            });
        }
    }
    Ok(actual)
}

/// Write `content` to `path`.
///
/// Regular files go through a temporary sibling that is renamed into place,
/// so the target is either the old or the complete new file. Special files
/// whose content starts with `link ` become symbolic links.
pub fn save_file(path: &Path, content: &[u8], executable: bool, special: bool) -> Result<()> {
    if special {
        if let Some(target) = content.strip_prefix(LINK_PREFIX) {
            return save_symlink(path, target);
        }
        warn!(
            "{}: special file without link target, saving as a regular file",
            path.display()
        );
    }

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            return Err(SvnupError::Conflict {
                path: path.to_path_buf(),
            });
        }
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path)?,
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let tmp_path = temp_sibling(path);
    if let Err(e) = write_with_mode(&tmp_path, content, executable) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn write_with_mode(path: &Path, content: &[u8], executable: bool) -> Result<()> {
    fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if executable { 0o755 } else { 0o644 };
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = executable;
    Ok(())
}

#[cfg(unix)]
fn save_symlink(path: &Path, target: &[u8]) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            return Err(SvnupError::Conflict {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => fs::remove_file(path).map_err(|_| SvnupError::Conflict {
            path: path.to_path_buf(),
        })?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::os::unix::fs::symlink(OsStr::from_bytes(target), path)?;
    Ok(())
}

#[cfg(not(unix))]
fn save_symlink(path: &Path, target: &[u8]) -> Result<()> {
    warn!(
        "{}: symbolic links are not supported here, writing the link target",
        path.display()
    );
    save_file(path, target, false, false)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.svnup-tmp"))
}
