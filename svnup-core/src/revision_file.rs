//! Revision-state file.
//!
//! Records which revision a checkout holds, where it came from and the
//! commit that produced it:
//!
//! ```text
//! rev=7
//! url=svn://svn.example.org/base/head
//! date=2024-01-02 03:04:05
//! author=alice
//! log=first line of the message
//! second line
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::DateTime;

use crate::error::{Result, SvnupError};

pub const REVISION_FILE: &str = "revision";

/// Author, date and message of one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitInfo {
    pub author: String,
    /// Already sanitized (`YYYY-MM-DD HH:MM:SS`).
    pub date: String,
    pub message: String,
}

/// Contents of `.svnup/revision`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionState {
    pub revision: u64,
    pub url: String,
    pub commit: CommitInfo,
}

impl RevisionState {
    pub fn new(revision: u64, url: impl Into<String>, commit: CommitInfo) -> Self {
        Self {
            revision,
            url: url.into(),
            commit,
        }
    }

    pub fn file_path(work_dir: &Path) -> PathBuf {
        work_dir.join(REVISION_FILE)
    }

    /// Load the state of a checkout, `None` when there is none.
    pub fn load(work_dir: &Path) -> Result<Option<Self>> {
        let path = Self::file_path(work_dir);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Self::parse(&text).map(Some)
    }

    /// Write the state through a temporary file.
    pub fn save(&self, work_dir: &Path) -> Result<()> {
        let path = Self::file_path(work_dir);
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, self.render())?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut state = RevisionState::default();
        let mut saw_rev = false;
        let mut lines = text.split('\n');
        while let Some(line) = lines.next() {
            if let Some(value) = line.strip_prefix("rev=") {
                state.revision = value.trim().parse().map_err(|_| {
                    SvnupError::protocol(format!("invalid revision in state file: {value}"))
                })?;
                saw_rev = true;
            } else if let Some(value) = line.strip_prefix("url=") {
                state.url = value.to_string();
            } else if let Some(value) = line.strip_prefix("date=") {
                state.commit.date = value.to_string();
            } else if let Some(value) = line.strip_prefix("author=") {
                state.commit.author = value.to_string();
            } else if let Some(value) = line.strip_prefix("log=") {
                let rest: Vec<&str> = lines.by_ref().collect();
                let mut message = value.to_string();
                for extra in rest {
                    message.push('\n');
                    message.push_str(extra);
                }
                if message.ends_with('\n') {
                    message.pop();
                }
                state.commit.message = message;
                break;
            }
        }
        if !saw_rev {
            return Err(SvnupError::protocol("revision state file has no rev= line"));
        }
        Ok(state)
    }

    pub fn render(&self) -> String {
        format!(
            "rev={}\nurl={}\ndate={}\nauthor={}\nlog={}\n",
            self.revision, self.url, self.commit.date, self.commit.author, self.commit.message
        )
    }

    /// Fail unless `requested` (0 = any) is the revision on disk.
    pub fn ensure_revision(&self, requested: u64) -> Result<()> {
        if requested != 0 && requested != self.revision {
            return Err(SvnupError::RevisionMismatch(requested));
        }
        Ok(())
    }
}

/// Turn an RFC 3339 timestamp such as `2020-11-10T09:23:51.711212Z` into
/// `2020-11-10 09:23:51`.
pub fn sanitize_date(raw: &str) -> String {
    let raw = raw.trim();
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => {
            let cut = raw.find('.').unwrap_or(raw.len());
            raw[..cut].replacen('T', " ", 1)
        }
    }
}
