//! Mapping WebDAV hrefs to repository paths.
//!
//! A server reports resources under several prefixes:
//! - `<rev-root-stub>/<rev>/<trunk>/...` (HTTPv2 servers)
//! - `/<root>/!svn/<kind>/<rev>/<trunk>/...` (version and baseline URLs)
//! - `/<root>/<trunk>/...` (plain public URLs)
//!
//! All of them map to the same `/dir/file` path relative to the checked
//! out branch.

use svnup_core::{Result, SvnupError};

use crate::xml::percent_decode;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HrefMapper {
    /// Repository root, without slashes (empty when the repository is
    /// served from `/`).
    root: String,
    /// Checked out branch relative to the root, without slashes.
    trunk: String,
    rev_root_stub: Option<String>,
}

impl HrefMapper {
    pub fn new(root: &str, trunk: &str, rev_root_stub: Option<&str>) -> Self {
        Self {
            root: percent_decode(root.trim_matches('/')),
            trunk: percent_decode(trunk.trim_matches('/')),
            rev_root_stub: rev_root_stub
                .map(|s| percent_decode(s.trim_end_matches('/')))
                .filter(|s| !s.is_empty()),
        }
    }

    /// Mapper for a session whose repository root is `root` and whose URL
    /// path is `branch`. Fails when the branch is not below the root.
    pub fn for_branch(root: &str, branch: &str, rev_root_stub: Option<&str>) -> Result<Self> {
        let root = root.trim_matches('/');
        let branch = branch.trim_matches('/');
        let trunk = if root.is_empty() {
            branch
        } else {
            below(branch, root)
                .map(|rest| rest.trim_start_matches('/'))
                .ok_or_else(|| {
                    SvnupError::Protocol(format!(
                        "repository root /{root} is not a prefix of /{branch}"
                    ))
                })?
        };
        Ok(Self::new(root, trunk, rev_root_stub))
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    /// `/dir/file` for `href`, or an empty string for the branch itself.
    /// `None` when the href lies outside the checked out branch.
    pub fn repository_path(&self, href: &str) -> Option<String> {
        let decoded = percent_decode(href);
        let mut rest = decoded.trim_end_matches('/');

        if let Some(after) = self
            .rev_root_stub
            .as_deref()
            .and_then(|stub| rest.strip_prefix(stub))
        {
            rest = skip_revision(after);
        } else {
            if !self.root.is_empty() {
                rest = below(rest.strip_prefix('/')?, &self.root)?;
            }
            if let Some(special) = rest.strip_prefix("/!svn/") {
                let (_kind, after) = special.split_once('/')?;
                rest = skip_revision(after);
            }
        }

        if !self.trunk.is_empty() {
            rest = below(rest.strip_prefix('/')?, &self.trunk)?;
        }
        Some(rest.to_string())
    }
}

/// The part of `path` after the `prefix` segments, keeping its leading
/// slash.
fn below<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

fn skip_revision(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.trim_start_matches(|c: char| c.is_ascii_digit())
}

/// Whether a mapped path is safe to create below the checkout root.
pub fn is_safe_path(path: &str) -> bool {
    path.starts_with('/')
        && path[1..]
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != ".." && !seg.contains('\0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rev_root_stub() {
        let map = HrefMapper::new("repos", "base/head", Some("/repos/!svn/rvr"));
        assert_eq!(
            map.repository_path("/repos/!svn/rvr/1234/base/head/bin/sh").as_deref(),
            Some("/bin/sh")
        );
        assert_eq!(
            map.repository_path("/repos/!svn/rvr/1234/base/head").as_deref(),
            Some("")
        );
    }

    #[test]
    fn test_version_urls() {
        let map = HrefMapper::new("repos", "base", None);
        assert_eq!(
            map.repository_path("/repos/!svn/ver/9/base/a%20b.txt").as_deref(),
            Some("/a b.txt")
        );
        assert_eq!(
            map.repository_path("/repos/base/dir/").as_deref(),
            Some("/dir")
        );
        assert_eq!(map.repository_path("/other/base/x"), None);
        assert_eq!(map.repository_path("/repos/!svn/ver/9/basement/x"), None);
    }

    #[test]
    fn test_root_served_from_slash() {
        let map = HrefMapper::new("", "trunk", None);
        assert_eq!(
            map.repository_path("/!svn/ver/3/trunk/README").as_deref(),
            Some("/README")
        );
        let map = HrefMapper::new("", "", None);
        assert_eq!(map.repository_path("/README").as_deref(), Some("/README"));
    }

    #[test]
    fn test_for_branch() {
        let map = HrefMapper::for_branch("/svn", "svn/ports/head", None).unwrap();
        assert_eq!(map.root(), "svn");
        assert_eq!(map.trunk(), "ports/head");

        let map = HrefMapper::for_branch("/svn/repo", "svn/repo", None).unwrap();
        assert_eq!(map.trunk(), "");

        let map = HrefMapper::for_branch("/", "base", None).unwrap();
        assert_eq!(map.trunk(), "base");

        assert!(HrefMapper::for_branch("/other", "svn/head", None).is_err());
    }

    #[test]
    fn test_is_safe_path() {
        assert!(is_safe_path("/a/b.txt"));
        assert!(!is_safe_path("/a/../../etc/passwd"));
        assert!(!is_safe_path("/a//b"));
        assert!(!is_safe_path("relative"));
    }
}
