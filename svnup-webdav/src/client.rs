//! http:// and https:// repository session.
//!
//! - `OPTIONS` discovers the youngest revision, the repository root, the
//!   revision-root stub and whether file properties can be inlined
//! - One update `REPORT` lists the whole tree
//! - `PROPFIND` and `GET` requests are pipelined, up to
//!   `MAX_HTTP_REQUESTS_PER_PACKET` per batch
//! - Transient failures reconnect and resend the outstanding batch

use std::ops::Range;

use quick_xml::escape::escape;
use tracing::{debug, info, trace, warn};

use svnup_core::{
    BUFFER_UNIT, COMMAND_BUFFER, CommitInfo, Connect, Fetched, Inventory,
    MAX_HTTP_REQUESTS_PER_PACKET, RemoteFile, RemoteRepository, RepoUrl, ResponseBuffer, Result,
    SvnupError, Transport, plan_batches,
};

use crate::codec::{self, HttpDecoder, HttpResponse, INLINE_PROPS};
use crate::href::{HrefMapper, is_safe_path};
use crate::xml;

const OPTIONS_BODY: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<D:options xmlns:D="DAV:">"#,
    r#"<D:activity-collection-set></D:activity-collection-set>"#,
    r#"</D:options>"#,
);

/// A read-only session with a mod_dav_svn server.
pub struct DavRepository {
    url: RepoUrl,
    host: String,
    transport: Transport,
    buffer: ResponseBuffer,
    decoder: HttpDecoder,
    revision: u64,
    retries: u32,
    rev_root_stub: Option<String>,
    inline_props: bool,
    hrefs: HrefMapper,
}

impl DavRepository {
    pub fn new(url: RepoUrl, connector: Box<dyn Connect>, retries: u32) -> Self {
        Self {
            host: url.authority(),
            url,
            transport: Transport::new(connector),
            buffer: ResponseBuffer::new(),
            decoder: HttpDecoder::new(),
            revision: 0,
            retries,
            rev_root_stub: None,
            inline_props: false,
            hrefs: HrefMapper::default(),
        }
    }

    /// Whether the server sends file properties inside the update report.
    pub fn inline_props(&self) -> bool {
        self.inline_props
    }

    // ── Exchanges ──

    /// Send `request` and wait for `expected` complete responses, retrying on
    /// a fresh connection after transient failures.
    fn exchange(&mut self, request: &[u8], expected: usize) -> Result<Vec<HttpResponse>> {
        let mut attempts = 0;
        loop {
            match self.attempt(request, expected) {
                Ok(()) => break,
                Err(e) if e.is_transient() => {
                    attempts += 1;
                    if attempts > self.retries {
                        return Err(SvnupError::RetriesExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    warn!(
                        "http exchange failed: {}; reconnecting ({}/{})",
                        e, attempts, self.retries
                    );
                    self.transport.close();
                }
                Err(e) => return Err(e),
            }
        }

        let responses = self.decoder.responses()[..expected].to_vec();
        if responses.iter().any(HttpResponse::closes_connection) {
            debug!("server asked to close the connection");
            self.transport.close();
        }
        Ok(responses)
    }

    fn attempt(&mut self, request: &[u8], expected: usize) -> Result<()> {
        self.buffer.clear();
        self.decoder.reset();
        self.transport.send(request)?;
        loop {
            self.decoder.decode(&mut self.buffer)?;
            if self.decoder.completed() >= expected {
                return Ok(());
            }
            let n = self.transport.receive(&mut self.buffer)?;
            trace!(
                "received {} bytes ({} total, {}/{} responses)",
                n,
                self.buffer.len(),
                self.decoder.completed(),
                expected
            );
        }
    }

    fn body(&self, response: &HttpResponse) -> &[u8] {
        &self.buffer.as_slice()[response.body.clone()]
    }

    /// Fail on any non-2xx status, preferring the server's own message.
    fn check(&self, response: &HttpResponse) -> Result<()> {
        if response.is_success() {
            return Ok(());
        }
        let message = xml::human_readable(self.body(response))
            .unwrap_or_else(|| response.status_line.clone());
        Err(SvnupError::HttpStatus {
            status: response.status,
            message,
        })
    }

    fn me_url(&self) -> String {
        if self.hrefs.root().is_empty() {
            "/!svn/me".to_string()
        } else {
            format!("/{}/!svn/me", self.hrefs.root())
        }
    }

    fn href_of<'a>(file: &'a RemoteFile) -> Result<&'a str> {
        file.href
            .as_deref()
            .ok_or_else(|| SvnupError::Protocol(format!("no href known for {}", file.path)))
    }

    fn map_href(&self, href: &str) -> Result<String> {
        self.hrefs
            .repository_path(href)
            .ok_or_else(|| SvnupError::Protocol(format!("href outside the repository: {href}")))
    }

    // ── Batches ──

    fn fetch_props_batch(&mut self, files: &mut [RemoteFile], batch: &[usize]) -> Result<()> {
        let mut request = Vec::new();
        for &i in batch {
            request.extend(codec::propfind(Self::href_of(&files[i])?, &self.host));
        }
        debug!("PROPFIND batch: {} files", batch.len());
        let responses = self.exchange(&request, batch.len())?;

        for (&i, response) in batch.iter().zip(&responses) {
            self.check(response)?;
            let props = xml::parse_propfind(self.body(response))?;
            let file = &mut files[i];
            file.size = props.size;
            file.executable = props.executable;
            file.special = props.special;
        }
        Ok(())
    }

    fn fetch_content_batch(
        &mut self,
        files: &[&RemoteFile],
        batch: Range<usize>,
        sink: &mut dyn FnMut(&[Fetched<'_>]) -> Result<()>,
    ) -> Result<()> {
        let mut request = Vec::new();
        let mut expected = 0u64;
        for file in &files[batch.clone()] {
            request.extend(codec::get(Self::href_of(file)?, &self.host));
            expected += file.size.unwrap_or(0) + BUFFER_UNIT as u64;
        }
        self.buffer
            .reserve_total(usize::try_from(expected).unwrap_or(0) + BUFFER_UNIT);
        debug!("GET batch: {} files", batch.len());
        let responses = self.exchange(&request, batch.len())?;

        for response in responses.iter().rev() {
            self.check(response)?;
        }
        let fetched: Vec<Fetched<'_>> = responses
            .iter()
            .enumerate()
            .map(|(i, response)| Fetched {
                index: batch.start + i,
                content: self.body(response),
                raw_size: response.wire_size(),
            })
            .collect();
        sink(&fetched)?;

        for response in &responses {
            self.buffer.zero(response.head.start..response.body.end);
        }
        Ok(())
    }
}

impl RemoteRepository for DavRepository {
    fn url(&self) -> &RepoUrl {
        &self.url
    }

    fn open(&mut self, revision: u64) -> Result<u64> {
        let request = codec::xml_request(
            "OPTIONS",
            &format!("/{}", self.url.branch),
            &self.host,
            OPTIONS_BODY,
        );
        let responses = self.exchange(&request, 1)?;
        let options = &responses[0];
        self.check(options)?;

        self.inline_props = options
            .header_values("DAV")
            .any(|v| v.split(',').any(|c| c.trim() == INLINE_PROPS));
        let root = options
            .header("SVN-Repository-Root")
            .filter(|r| r.starts_with('/'))
            .ok_or_else(|| SvnupError::Protocol("cannot find SVN repository root".into()))?;
        self.rev_root_stub = options.header("SVN-Rev-Root-Stub").map(str::to_string);
        self.hrefs = HrefMapper::for_branch(root, &self.url.branch, self.rev_root_stub.as_deref())?;

        let revision = if revision == 0 {
            options
                .header("SVN-Youngest-Rev")
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| SvnupError::Protocol("cannot find revision number".into()))?
        } else {
            revision
        };

        self.revision = revision;
        info!(
            "using revision {} of {} (root /{}, inline props: {})",
            revision,
            self.url,
            self.hrefs.root(),
            self.inline_props
        );
        Ok(revision)
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn commit_info(&mut self) -> Result<Option<CommitInfo>> {
        let Some(stub) = self.rev_root_stub.clone() else {
            debug!("server has no revision-root stub, skipping log");
            return Ok(None);
        };
        let body = format!(
            concat!(
                r#"<S:log-report xmlns:S="svn:">"#,
                "<S:start-revision>{rev}</S:start-revision>",
                "<S:end-revision>{rev}</S:end-revision>",
                "<S:revprop>svn:author</S:revprop>",
                "<S:revprop>svn:date</S:revprop>",
                "<S:revprop>svn:log</S:revprop>",
                "<S:path></S:path>",
                "<S:encode-binary-props></S:encode-binary-props>",
                "</S:log-report>"
            ),
            rev = self.revision
        );
        let request = codec::xml_request(
            "REPORT",
            &format!("{}/{}", stub, self.revision),
            &self.host,
            &body,
        );
        let responses = self.exchange(&request, 1)?;
        self.check(&responses[0])?;

        let info = xml::parse_log_report(self.body(&responses[0]))?;
        if info.is_none() {
            warn!("empty reply for log request");
        }
        Ok(info)
    }

    fn list(&mut self, inventory: &mut Inventory) -> Result<()> {
        let body = format!(
            concat!(
                r#"<S:update-report xmlns:S="svn:">"#,
                "{include}",
                "<S:src-path>/{branch}</S:src-path>",
                "<S:target-revision>{rev}</S:target-revision>",
                "<S:depth>unknown</S:depth>",
                r#"<S:entry rev="{rev}" depth="infinity" start-empty="true"></S:entry>"#,
                "</S:update-report>"
            ),
            include = if self.inline_props {
                "<S:include-props>yes</S:include-props>"
            } else {
                ""
            },
            branch = escape(self.url.branch.as_str()),
            rev = self.revision
        );
        let request = codec::xml_request("REPORT", &self.me_url(), &self.host, &body);
        let responses = self.exchange(&request, 1)?;
        self.check(&responses[0])?;
        let report = xml::parse_update_report(self.body(&responses[0]))?;
        self.inline_props = report.inline_props;

        for href in &report.dirs {
            let path = self.map_href(href)?;
            if path.is_empty() {
                continue;
            }
            if !is_safe_path(&path) {
                return Err(SvnupError::Protocol(format!("unsafe directory path {path:?}")));
            }
            inventory.confirm_directory(&path)?;
        }

        for entry in report.files {
            let path = self.map_href(&entry.href)?;
            if !is_safe_path(&path) {
                return Err(SvnupError::Protocol(format!("unsafe file path {path:?}")));
            }
            let mut file = RemoteFile::new(path, None);
            file.md5 = entry.md5;
            if report.inline_props {
                file.executable = entry.executable;
                file.special = entry.special;
            }
            file.href = Some(entry.href);
            inventory.add_file(file);
        }

        info!(
            "listed {} files and {} directories",
            inventory.files.len(),
            report.dirs.len()
        );
        Ok(())
    }

    fn fetch_attributes(&mut self, files: &mut [RemoteFile]) -> Result<()> {
        if self.inline_props {
            return Ok(());
        }
        let pending: Vec<usize> = (0..files.len()).filter(|&i| files[i].download).collect();
        if pending.is_empty() {
            return Ok(());
        }
        let sizes = pending
            .iter()
            .map(|&i| -> Result<usize> {
                Ok(codec::propfind(Self::href_of(&files[i])?, &self.host).len())
            })
            .collect::<Result<Vec<_>>>()?;

        for batch in plan_batches(&sizes, COMMAND_BUFFER, MAX_HTTP_REQUESTS_PER_PACKET) {
            self.fetch_props_batch(files, &pending[batch])?;
        }
        Ok(())
    }

    fn fetch_contents(
        &mut self,
        files: &[&RemoteFile],
        sink: &mut dyn FnMut(&[Fetched<'_>]) -> Result<()>,
    ) -> Result<()> {
        let sizes = files
            .iter()
            .map(|f| -> Result<usize> { Ok(codec::get(Self::href_of(f)?, &self.host).len()) })
            .collect::<Result<Vec<_>>>()?;
        for batch in plan_batches(&sizes, COMMAND_BUFFER, MAX_HTTP_REQUESTS_PER_PACKET) {
            self.fetch_content_batch(files, batch, sink)?;
        }
        Ok(())
    }

    fn connections(&self) -> u32 {
        self.transport.connections()
    }
}
