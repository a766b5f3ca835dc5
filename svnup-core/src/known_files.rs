//! Known-files index.
//!
//! One line per file from the last successful run: `<md5>\t<path>\n`.
//! A run writes the new index to `known_files.new` and renames it over
//! `known_files` as its very last step.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

pub const INDEX_FILE: &str = "known_files";

/// Location of the index inside the control directory.
#[derive(Debug, Clone)]
pub struct KnownFilesIndex {
    path: PathBuf,
}

impl KnownFilesIndex {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            path: work_dir.join(INDEX_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pending_path(&self) -> PathBuf {
        self.path.with_extension("new")
    }

    /// Load the previous run's index; a missing file is an empty index.
    /// Malformed lines are skipped.
    pub fn load(&self) -> Result<BTreeMap<String, String>> {
        let mut known = BTreeMap::new();
        if !self.path.exists() {
            return Ok(known);
        }
        let data = fs::read_to_string(&self.path)?;
        for (lineno, line) in data.lines().enumerate() {
            match parse_line(line) {
                Some((md5, path)) => {
                    known.insert(path.to_string(), md5.to_string());
                }
                None if line.is_empty() => {}
                None => warn!(
                    "{}:{}: ignoring malformed entry",
                    self.path.display(),
                    lineno + 1
                ),
            }
        }
        Ok(known)
    }

    /// Start writing the pending index.
    pub fn writer(&self) -> Result<IndexWriter> {
        let file = File::create(self.pending_path())?;
        Ok(IndexWriter {
            out: BufWriter::new(file),
        })
    }

    /// Replace the index with the pending one.
    pub fn commit(&self) -> Result<()> {
        fs::rename(self.pending_path(), &self.path)?;
        Ok(())
    }
}

/// Buffered writer for `known_files.new`.
pub struct IndexWriter {
    out: BufWriter<File>,
}

impl IndexWriter {
    pub fn record(&mut self, md5: &str, path: &str) -> Result<()> {
        writeln!(self.out, "{}\t{}", md5, path)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (md5, path) = line.split_once('\t')?;
    if md5.len() != 32 || !md5.bytes().all(|b| b.is_ascii_hexdigit()) || path.is_empty() {
        return None;
    }
    Some((md5, path))
}
