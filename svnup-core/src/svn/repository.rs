//! svn:// repository session.
//!
//! - Handshake: greeting, client greeting, anonymous authentication
//! - Every command reply is preceded by an empty auth request, so a command
//!   expects two groups (three for file contents)
//! - Commands are pipelined in batches bounded by `COMMAND_BUFFER`
//! - A dropped connection is re-established, the handshake replayed and the
//!   outstanding batch resent

use std::collections::VecDeque;
use std::ops::Range;

use tracing::{debug, info, trace, warn};

use super::framing::{GroupScanner, content_raw_size, is_failure, unwrap_blocks};
use super::item::{SvnItem, parse_items, parse_success};
use super::wire;
use crate::buffer::{BUFFER_UNIT, ResponseBuffer};
use crate::config::COMMAND_BUFFER;
use crate::error::{Result, SvnupError};
use crate::inventory::{Inventory, RemoteFile, join_path};
use crate::remote::{Fetched, RemoteRepository, plan_batches};
use crate::revision_file::{CommitInfo, sanitize_date};
use crate::transport::{Connect, Transport};
use crate::url::RepoUrl;

/// A read-only session with an svnserve server.
pub struct SvnRepository {
    url: RepoUrl,
    transport: Transport,
    buffer: ResponseBuffer,
    scanner: GroupScanner,
    inspected: usize,
    revision: u64,
    retries: u32,
}

impl SvnRepository {
    pub fn new(url: RepoUrl, connector: Box<dyn Connect>, retries: u32) -> Self {
        Self {
            url,
            transport: Transport::new(connector),
            buffer: ResponseBuffer::new(),
            scanner: GroupScanner::new(),
            inspected: 0,
            revision: 0,
            retries,
        }
    }

    // ── Exchanges ──

    /// Send `request` and read until `groups` reply groups have arrived.
    fn exchange(&mut self, request: &[u8], groups: usize) -> Result<()> {
        self.exchange_until(request, &|_: &[u8], done: &[Range<usize>]| done.len() >= groups)
    }

    /// Send `request` and read until `complete` accepts the reply, retrying
    /// on a fresh connection after transient failures.
    fn exchange_until(
        &mut self,
        request: &[u8],
        complete: &dyn Fn(&[u8], &[Range<usize>]) -> bool,
    ) -> Result<()> {
        let mut attempts = 0;
        loop {
            match self.attempt(request, complete) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    attempts += 1;
                    if attempts > self.retries {
                        return Err(SvnupError::RetriesExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    warn!(
                        "svn exchange failed: {}; reconnecting ({}/{})",
                        e, attempts, self.retries
                    );
                    self.transport.close();
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt(
        &mut self,
        request: &[u8],
        complete: &dyn Fn(&[u8], &[Range<usize>]) -> bool,
    ) -> Result<()> {
        if !self.transport.is_connected() {
            self.handshake()?;
        }
        self.begin();
        self.transport.send(request)?;
        self.read_until(complete)
    }

    fn begin(&mut self) {
        self.buffer.reset();
        self.scanner.reset();
        self.inspected = 0;
    }

    fn read_until(&mut self, complete: &dyn Fn(&[u8], &[Range<usize>]) -> bool) -> Result<()> {
        loop {
            self.scanner.scan(self.buffer.as_slice())?;
            let data = self.buffer.as_slice();
            let groups = self.scanner.groups();
            for group in &groups[self.inspected..] {
                let bytes = &data[group.clone()];
                if is_failure(bytes) {
                    warn!(
                        "failure response: {}",
                        String::from_utf8_lossy(&bytes[..bytes.len().min(512)])
                    );
                    parse_success(bytes)?;
                    return Err(SvnupError::protocol(format!(
                        "malformed failure response: {}",
                        String::from_utf8_lossy(bytes)
                    )));
                }
            }
            self.inspected = groups.len();
            if complete(data, groups) {
                return Ok(());
            }
            let n = self.transport.receive(&mut self.buffer)?;
            trace!("received {} bytes ({} total)", n, self.buffer.len());
        }
    }

    fn group(&self, index: usize) -> Result<&[u8]> {
        let range = self
            .scanner
            .groups()
            .get(index)
            .cloned()
            .ok_or_else(|| SvnupError::protocol(format!("missing response group {index}")))?;
        Ok(&self.buffer.as_slice()[range])
    }

    fn handshake(&mut self) -> Result<()> {
        self.transport.connect()?;
        self.begin();
        self.read_until(&|_: &[u8], done: &[Range<usize>]| !done.is_empty())?;
        parse_success(self.group(0)?)?;

        self.begin();
        self.transport.send(&wire::greeting(&self.url.to_string()))?;
        self.read_until(&|_: &[u8], done: &[Range<usize>]| !done.is_empty())?;
        let params = parse_success(self.group(0)?)?;
        let anonymous = params
            .first()
            .and_then(SvnItem::as_list)
            .is_some_and(|mechs| mechs.iter().any(|m| m.as_word() == Some("ANONYMOUS")));
        if !anonymous {
            return Err(SvnupError::protocol(
                "server does not offer anonymous access",
            ));
        }

        self.begin();
        self.transport.send(&wire::anonymous_auth())?;
        self.read_until(&|_: &[u8], done: &[Range<usize>]| done.len() >= 2)?;
        parse_success(self.group(0)?)?;
        parse_success(self.group(1)?)?;
        debug!("authenticated anonymously with {}", self.url);
        Ok(())
    }

    // ── Attribute and content batches ──

    fn fetch_attribute_batch(&mut self, files: &mut [RemoteFile]) -> Result<()> {
        let mut request = Vec::new();
        for file in files.iter() {
            request.extend(wire::get_file(relative(&file.path), self.revision, true, false));
        }
        self.exchange(&request, files.len() * 2)?;

        for (i, file) in files.iter_mut().enumerate() {
            parse_success(self.group(2 * i)?)?;
            let params = parse_success(self.group(2 * i + 1)?)?;
            file.md5 = params
                .first()
                .and_then(SvnItem::optional)
                .and_then(SvnItem::as_text);
            if let Some(props) = params.get(2).and_then(SvnItem::as_list) {
                for prop in props.iter().filter_map(SvnItem::as_list) {
                    match prop.first().and_then(SvnItem::as_bytes) {
                        Some(b"svn:executable") => file.executable = true,
                        Some(b"svn:special") => file.special = true,
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn fetch_content_batch(
        &mut self,
        files: &[&RemoteFile],
        first_index: usize,
        sink: &mut dyn FnMut(&[Fetched<'_>]) -> Result<()>,
    ) -> Result<()> {
        let mut request = Vec::new();
        let mut expected = 0u64;
        for file in files {
            request.extend(wire::get_file(relative(&file.path), self.revision, false, true));
            expected += content_raw_size(
                file.size.unwrap_or(0),
                file.md5.as_deref(),
                self.revision,
            );
        }
        self.buffer
            .reserve_total(usize::try_from(expected).unwrap_or(0) + BUFFER_UNIT);
        self.exchange(&request, files.len() * 3)?;

        let groups = self.scanner.groups().to_vec();
        let data = self.buffer.as_slice();
        let mut contents = Vec::with_capacity(files.len());
        for i in (0..files.len()).rev() {
            let (auth, header, trailer) = (&groups[3 * i], &groups[3 * i + 1], &groups[3 * i + 2]);
            parse_success(&data[auth.clone()])?;
            parse_success(&data[header.clone()])?;
            parse_success(&data[trailer.clone()])?;
            let content = unwrap_blocks(&data[header.end..trailer.start], files[i].size)?;
            contents.push((i, content, (trailer.end - auth.start) as u64));
        }
        let fetched: Vec<Fetched<'_>> = contents
            .iter()
            .rev()
            .map(|(i, content, raw_size)| Fetched {
                index: first_index + i,
                content,
                raw_size: *raw_size,
            })
            .collect();
        sink(&fetched)?;

        if let (Some(first), Some(last)) = (groups.first(), groups.last()) {
            self.buffer.zero(first.start..last.end);
        }
        Ok(())
    }
}

impl RemoteRepository for SvnRepository {
    fn url(&self) -> &RepoUrl {
        &self.url
    }

    fn open(&mut self, revision: u64) -> Result<u64> {
        let revision = if revision == 0 {
            self.exchange(&wire::get_latest_rev(), 2)?;
            let params = parse_success(self.group(1)?)?;
            params
                .first()
                .and_then(SvnItem::as_number)
                .ok_or_else(|| SvnupError::protocol("get-latest-rev returned no revision"))?
        } else {
            revision
        };

        self.exchange(&wire::check_path(revision), 2)?;
        let params = parse_success(self.group(1)?)?;
        if params.first().and_then(SvnItem::as_word) != Some("dir") {
            return Err(SvnupError::protocol(format!(
                "{} is not a repository directory at revision {}",
                self.url, revision
            )));
        }

        self.revision = revision;
        info!("using revision {} of {}", revision, self.url);
        Ok(revision)
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn commit_info(&mut self) -> Result<Option<CommitInfo>> {
        // auth, then either the closing status or a log entry followed by
        // `done` and the closing status
        self.exchange_until(&wire::log(self.revision), &|data: &[u8], done: &[Range<usize>]| {
            done.len() >= 3 || (done.len() == 2 && data[done[1].clone()].starts_with(b"( success"))
        })?;

        let second = self.group(1)?;
        if second.starts_with(b"( success") {
            parse_success(second)?;
            return Ok(None);
        }
        let entry = parse_items(second)?;
        parse_success(self.group(2)?)?;

        let fields = entry
            .first()
            .and_then(SvnItem::as_list)
            .ok_or_else(|| SvnupError::protocol("malformed log entry"))?;
        let text_at = |i: usize| {
            fields
                .get(i)
                .and_then(SvnItem::optional)
                .and_then(SvnItem::as_text)
                .unwrap_or_default()
        };
        Ok(Some(CommitInfo {
            author: text_at(2),
            date: sanitize_date(&text_at(3)),
            message: text_at(4),
        }))
    }

    fn list(&mut self, inventory: &mut Inventory) -> Result<()> {
        let mut queue: VecDeque<String> = VecDeque::from([String::new()]);
        let mut batches = 0;

        while !queue.is_empty() {
            let mut request = Vec::new();
            let mut dirs = Vec::new();
            while let Some(dir) = queue.front() {
                let command = wire::get_dir(dir, self.revision);
                if !dirs.is_empty() && request.len() + command.len() > COMMAND_BUFFER {
                    break;
                }
                request.extend(command);
                dirs.extend(queue.pop_front());
            }
            batches += 1;
            debug!("get-dir batch #{}: {} directories", batches, dirs.len());
            self.exchange(&request, dirs.len() * 2)?;

            for (i, dir) in dirs.iter().enumerate() {
                parse_success(self.group(2 * i)?)?;
                let params = parse_success(self.group(2 * i + 1)?)?;
                let entries = params.get(2).and_then(SvnItem::as_list).ok_or_else(|| {
                    SvnupError::protocol(format!("get-dir reply for '{dir}' has no entry list"))
                })?;

                for entry in entries.iter().filter_map(SvnItem::as_list) {
                    let name = entry
                        .first()
                        .and_then(SvnItem::as_text)
                        .filter(|n| valid_entry_name(n))
                        .ok_or_else(|| {
                            SvnupError::protocol(format!("invalid entry name in '{dir}'"))
                        })?;
                    let child = if dir.is_empty() {
                        name.clone()
                    } else {
                        format!("{dir}/{name}")
                    };
                    let path = join_path("", &child);
                    match entry.get(1).and_then(SvnItem::as_word) {
                        Some("file") => {
                            let size = entry.get(2).and_then(SvnItem::as_number);
                            inventory.add_file(RemoteFile::new(path, size));
                        }
                        Some("dir") => {
                            inventory.confirm_directory(&path)?;
                            queue.push_back(child);
                        }
                        other => debug!("skipping {} of kind {:?}", path, other),
                    }
                }
            }
        }

        info!(
            "listed {} files in {} batches",
            inventory.files.len(),
            batches
        );
        Ok(())
    }

    fn fetch_attributes(&mut self, files: &mut [RemoteFile]) -> Result<()> {
        let pending: Vec<usize> = (0..files.len())
            .filter(|&i| files[i].md5.is_none())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let sizes: Vec<usize> = pending
            .iter()
            .map(|&i| wire::get_file(relative(&files[i].path), self.revision, true, false).len())
            .collect();

        for batch in plan_batches(&sizes, COMMAND_BUFFER, usize::MAX) {
            let mut chunk: Vec<RemoteFile> =
                pending[batch.clone()].iter().map(|&i| files[i].clone()).collect();
            self.fetch_attribute_batch(&mut chunk)?;
            for (&i, fetched) in pending[batch].iter().zip(chunk) {
                files[i] = fetched;
            }
        }
        Ok(())
    }

    fn fetch_contents(
        &mut self,
        files: &[&RemoteFile],
        sink: &mut dyn FnMut(&[Fetched<'_>]) -> Result<()>,
    ) -> Result<()> {
        let sizes: Vec<usize> = files
            .iter()
            .map(|f| wire::get_file(relative(&f.path), self.revision, false, true).len())
            .collect();
        for batch in plan_batches(&sizes, COMMAND_BUFFER, usize::MAX) {
            let start = batch.start;
            self.fetch_content_batch(&files[batch], start, sink)?;
        }
        Ok(())
    }

    fn connections(&self) -> u32 {
        self.transport.connections()
    }
}

/// Repository path relative to the session root, as the server expects it.
fn relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn valid_entry_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_entry_name() {
        assert!(valid_entry_name("Makefile"));
        assert!(valid_entry_name("with space"));
        assert!(!valid_entry_name(".."));
        assert!(!valid_entry_name("a/b"));
        assert!(!valid_entry_name(""));
    }

    #[test]
    fn test_relative() {
        assert_eq!(relative("/sys/kern/vfs.c"), "sys/kern/vfs.c");
    }
}
