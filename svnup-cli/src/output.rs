//! User-facing output for `checkout`, `log` and `info`.

use std::io::{self, Write};

use svnup_core::{CheckoutReport, CommitInfo};

const RULE_WIDTH: usize = 72;

/// The commit recorded in a revision file, if one was recorded at all.
pub fn recorded(commit: &CommitInfo) -> Option<&CommitInfo> {
    (!commit.author.is_empty() || !commit.date.is_empty()).then_some(commit)
}

/// Human-readable byte count: `512 B`, `1.5 KiB`, `3.2 MiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// A repository without a log entry for the revision prints the rule only.
pub fn write_log(out: &mut dyn Write, revision: u64, commit: Option<&CommitInfo>) -> io::Result<()> {
    let rule = "-".repeat(RULE_WIDTH);
    writeln!(out, "{rule}")?;
    if let Some(commit) = commit {
        writeln!(out, "r{} | {} | {} |", revision, commit.author, commit.date)?;
        writeln!(out)?;
        writeln!(out, "{}", commit.message)?;
        writeln!(out, "{rule}")?;
    }
    Ok(())
}

pub fn write_info(
    out: &mut dyn Write,
    path: &str,
    url: &str,
    revision: u64,
    commit: Option<&CommitInfo>,
) -> io::Result<()> {
    writeln!(out, "Path: {path}")?;
    writeln!(out, "URL: {url}")?;
    writeln!(out, "Revision: {revision}")?;
    if let Some(commit) = commit {
        writeln!(out, "Last Changed Author: {}", commit.author)?;
        writeln!(out, "Last Changed Rev: {revision}")?;
        writeln!(out, "Last Changed Date: {} +0000", commit.date)?;
    }
    Ok(())
}

/// Changed paths at verbosity 1 and up, a transfer summary from 2.
pub fn write_checkout(out: &mut dyn Write, report: &CheckoutReport, verbosity: u8) -> io::Result<()> {
    if verbosity == 0 {
        return Ok(());
    }
    for path in &report.downloaded {
        writeln!(out, " + {path}")?;
    }
    for path in &report.pruned.removed_files {
        writeln!(out, " - {path}")?;
    }
    for path in &report.pruned.extra_files {
        writeln!(out, " * {path}")?;
    }
    if verbosity >= 2 {
        writeln!(
            out,
            "Downloaded {} of {} files ({}, {} on the wire) in {} ms",
            report.downloaded.len(),
            report.total_files,
            format_size(report.bytes_downloaded),
            format_size(report.raw_bytes),
            report.duration_ms
        )?;
        writeln!(
            out,
            "Removed {} files and {} directories",
            report.pruned.removed_files.len(),
            report.pruned.removed_dirs.len()
        )?;
    }
    writeln!(out, "Checked out revision {}.", report.revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use svnup_core::PruneReport;

    fn commit() -> CommitInfo {
        CommitInfo {
            author: "alice".into(),
            date: "2024-01-02 03:04:05".into(),
            message: "Fix the build\n(second line".into(),
        }
    }

    fn render(f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn test_write_log() {
        let rule = "-".repeat(72);
        let text = render(|out| write_log(out, 42, Some(&commit())));
        assert_eq!(
            text,
            format!(
                "{rule}\nr42 | alice | 2024-01-02 03:04:05 |\n\nFix the build\n(second line\n{rule}\n"
            )
        );

        let text = render(|out| write_log(out, 42, None));
        assert_eq!(text, format!("{rule}\n"));
    }

    #[test]
    fn test_write_info() {
        let text = render(|out| write_info(out, "head", "svn://h/base/head", 7, Some(&commit())));
        assert_eq!(
            text,
            "Path: head\nURL: svn://h/base/head\nRevision: 7\n\
             Last Changed Author: alice\nLast Changed Rev: 7\n\
             Last Changed Date: 2024-01-02 03:04:05 +0000\n"
        );

        let text = render(|out| write_info(out, "head", "svn://h/base/head", 7, None));
        assert!(!text.contains("Last Changed"));
    }

    #[test]
    fn test_write_checkout() {
        let report = CheckoutReport {
            revision: 9,
            total_files: 3,
            downloaded: vec!["/a.txt".into(), "/dir/b.txt".into()],
            bytes_downloaded: 2048,
            raw_bytes: 2100,
            pruned: PruneReport {
                removed_files: vec!["/old.txt".into()],
                extra_files: vec!["/local.txt".into()],
                removed_dirs: vec![],
            },
            duration_ms: 12,
        };

        assert_eq!(render(|out| write_checkout(out, &report, 0)), "");
        assert_eq!(
            render(|out| write_checkout(out, &report, 1)),
            " + /a.txt\n + /dir/b.txt\n - /old.txt\n * /local.txt\nChecked out revision 9.\n"
        );
        let text = render(|out| write_checkout(out, &report, 2));
        assert!(text.contains("Downloaded 2 of 3 files (2.0 KiB, 2.1 KiB on the wire) in 12 ms"));
        assert!(text.contains("Removed 1 files and 0 directories"));
    }

    #[test]
    fn test_recorded() {
        assert!(recorded(&CommitInfo::default()).is_none());
        assert!(recorded(&commit()).is_some());
    }
}
