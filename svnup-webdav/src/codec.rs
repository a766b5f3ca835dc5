//! HTTP/1.1 codec for pipelined WebDAV exchanges.
//!
//! - Requests are plain byte strings; bodies are sent chunked
//! - Responses accumulate in a `ResponseBuffer` and are decoded
//!   incrementally: a response is complete once its head and its whole
//!   body (`Content-Length` or chunked) have arrived
//! - Chunk framing is spliced out of the buffer in place, so a decoded
//!   body is always one contiguous range

use std::ops::Range;

use memchr::memmem;
use tracing::trace;

use svnup_core::svn::wire::USER_AGENT;
use svnup_core::{ResponseBuffer, Result, SvnupError};

/// Capabilities announced on every XML request.
pub const DAV_CAPABILITIES: [&str; 3] = [
    "http://subversion.tigris.org/xmlns/dav/svn/depth",
    "http://subversion.tigris.org/xmlns/dav/svn/mergeinfo",
    "http://subversion.tigris.org/xmlns/dav/svn/log-revprops",
];

/// DAV capability advertised by servers that can inline file properties
/// in an update report.
pub const INLINE_PROPS: &str = "http://subversion.tigris.org/xmlns/dav/svn/inline-props";

// ── Requests ──

/// A request with an XML body, sent with chunked transfer encoding.
pub fn xml_request(verb: &str, url: &str, host: &str, body: &str) -> Vec<u8> {
    let mut out = format!(
        "{verb} {url} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Content-Type: text/xml\r\n\
         Connection: Keep-Alive\r\n"
    );
    for capability in DAV_CAPABILITIES {
        out.push_str("DAV: ");
        out.push_str(capability);
        out.push_str("\r\n");
    }
    out.push_str("Transfer-Encoding: chunked\r\n\r\n");
    out.push_str(&format!("{:x}\r\n{}\r\n0\r\n\r\n", body.len(), body));
    out.into_bytes()
}

/// Properties of a single resource.
pub fn propfind(href: &str, host: &str) -> Vec<u8> {
    format!(
        "PROPFIND {href} HTTP/1.1\r\n\
         Depth: 1\r\n\
         Host: {host}\r\n\
         User-Agent: {USER_AGENT}\r\n\r\n"
    )
    .into_bytes()
}

pub fn get(href: &str, host: &str) -> Vec<u8> {
    format!(
        "GET {href} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Connection: Keep-Alive\r\n\r\n"
    )
    .into_bytes()
}

// ── Responses ──

/// A fully received response. Ranges are offsets into the response buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub head: Range<usize>,
    pub body: Range<usize>,
}

impl HttpResponse {
    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of `name`.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the server announced it will close the connection.
    pub fn closes_connection(&self) -> bool {
        self.header_values("Connection")
            .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
    }

    /// Bytes the response occupied in the buffer after chunk removal.
    pub fn wire_size(&self) -> u64 {
        (self.body.end - self.head.start) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(usize),
    Chunked,
    None,
}

#[derive(Debug)]
enum State {
    Head,
    Length { end: usize },
    Chunked { cursor: usize },
}

#[derive(Debug)]
struct Partial {
    status: u16,
    status_line: String,
    headers: Vec<(String, String)>,
    head: Range<usize>,
}

/// Incremental decoder for a pipelined run of responses.
#[derive(Debug)]
pub struct HttpDecoder {
    state: State,
    pos: usize,
    partial: Option<Partial>,
    responses: Vec<HttpResponse>,
}

impl Default for HttpDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Head,
            pos: 0,
            partial: None,
            responses: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn responses(&self) -> &[HttpResponse] {
        &self.responses
    }

    pub fn completed(&self) -> usize {
        self.responses.len()
    }

    /// Decode as much of `buffer` as has arrived. Chunk size lines and
    /// chunk terminators are removed from the buffer as they are consumed.
    pub fn decode(&mut self, buffer: &mut ResponseBuffer) -> Result<()> {
        loop {
            let progressed = match self.state {
                State::Head => self.decode_head(buffer.as_slice())?,
                State::Length { end } => {
                    if buffer.len() >= end {
                        self.finish(end);
                        true
                    } else {
                        false
                    }
                }
                State::Chunked { cursor } => self.decode_chunk(buffer, cursor)?,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    fn decode_head(&mut self, data: &[u8]) -> Result<bool> {
        let Some(rest) = data.get(self.pos..) else {
            return Ok(false);
        };
        // Tolerate stray line breaks between pipelined responses.
        let skip = rest.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
        let start = self.pos + skip;
        let Some(end) = memmem::find(&data[start..], b"\r\n\r\n") else {
            return Ok(false);
        };
        let head_end = start + end + 4;
        let text = String::from_utf8_lossy(&data[start..start + end]);
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap_or_default().to_string();
        if !status_line.starts_with("HTTP/1.") {
            return Err(SvnupError::Protocol(format!(
                "unexpected response from HTTP server: {}",
                status_line.chars().take(80).collect::<String>()
            )));
        }
        let status: u16 = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SvnupError::Protocol(format!("bad status line: {status_line}")))?;

        let mut headers = Vec::new();
        let mut framing = Framing::None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let (name, value) = (name.trim(), value.trim());
            if framing == Framing::None {
                if name.eq_ignore_ascii_case("Content-Length") {
                    let len = value.parse().map_err(|_| {
                        SvnupError::Protocol(format!("bad Content-Length: {value}"))
                    })?;
                    framing = Framing::Length(len);
                } else if name.eq_ignore_ascii_case("Transfer-Encoding")
                    && value.to_ascii_lowercase().contains("chunked")
                {
                    framing = Framing::Chunked;
                }
            }
            headers.push((name.to_string(), value.to_string()));
        }
        trace!("response head: {} ({:?})", status_line, framing);

        // Interim responses carry no body and precede the real one.
        if (100..200).contains(&status) {
            self.pos = head_end;
            return Ok(true);
        }

        self.partial = Some(Partial {
            status,
            status_line,
            headers,
            head: start..head_end,
        });
        match framing {
            Framing::Length(len) => {
                let end = head_end
                    .checked_add(len)
                    .ok_or_else(|| SvnupError::Protocol("Content-Length out of range".into()))?;
                self.state = State::Length { end };
            }
            Framing::Chunked => self.state = State::Chunked { cursor: head_end },
            Framing::None => self.finish(head_end),
        }
        Ok(true)
    }

    /// Consume the chunk whose size line starts at `cursor`.
    fn decode_chunk(&mut self, buffer: &mut ResponseBuffer, cursor: usize) -> Result<bool> {
        let data = buffer.as_slice();
        let Some(line_len) = memmem::find(&data[cursor..], b"\r\n") else {
            return Ok(false);
        };
        let line = &data[cursor..cursor + line_len];
        let size = parse_chunk_size(line)?;
        let data_start = cursor + line_len + 2;

        if size == 0 {
            // Last chunk, then optional trailers, then an empty line.
            let tail = &data[data_start..];
            let end = if tail.starts_with(b"\r\n") {
                data_start + 2
            } else if let Some(at) = memmem::find(tail, b"\r\n\r\n") {
                data_start + at + 4
            } else {
                return Ok(false);
            };
            buffer.splice_out(cursor..end);
            self.finish(cursor);
            return Ok(true);
        }

        let data_end = data_start
            .checked_add(size)
            .ok_or_else(|| SvnupError::Protocol("chunk size out of range".into()))?;
        if data.len() < data_end + 2 {
            return Ok(false);
        }
        if &data[data_end..data_end + 2] != b"\r\n" {
            return Err(SvnupError::Protocol(format!(
                "chunk of {size} bytes at offset {cursor} is not terminated by CRLF"
            )));
        }
        buffer.splice_out(data_end..data_end + 2);
        buffer.splice_out(cursor..data_start);
        self.state = State::Chunked {
            cursor: cursor + size,
        };
        Ok(true)
    }

    fn finish(&mut self, body_end: usize) {
        if let Some(partial) = self.partial.take() {
            self.responses.push(HttpResponse {
                status: partial.status,
                status_line: partial.status_line,
                headers: partial.headers,
                body: partial.head.end..body_end,
                head: partial.head,
            });
        }
        self.pos = body_end;
        self.state = State::Head;
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| SvnupError::Protocol("chunk size line is not text".into()))?;
    let hex = text.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(hex, 16)
        .map_err(|_| SvnupError::Protocol(format!("bad chunk size: {hex:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_all(parts: &[&[u8]]) -> (ResponseBuffer, HttpDecoder) {
        let mut buffer = ResponseBuffer::new();
        let mut decoder = HttpDecoder::new();
        for part in parts {
            buffer.append(part);
            decoder.decode(&mut buffer).unwrap();
        }
        (buffer, decoder)
    }

    fn body<'a>(buffer: &'a ResponseBuffer, response: &HttpResponse) -> &'a [u8] {
        &buffer.as_slice()[response.body.clone()]
    }

    #[test]
    fn test_xml_request_layout() {
        let request = xml_request("OPTIONS", "/repos/trunk", "svn.example.org", "<x/>");
        let text = String::from_utf8(request).unwrap();
        assert!(text.starts_with("OPTIONS /repos/trunk HTTP/1.1\r\nHost: svn.example.org\r\n"));
        assert!(text.contains("DAV: http://subversion.tigris.org/xmlns/dav/svn/depth\r\n"));
        assert!(text.contains("Transfer-Encoding: chunked\r\n\r\n4\r\n<x/>\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_get_and_propfind() {
        let text = String::from_utf8(propfind("/r/!svn/rvr/3/a", "h")).unwrap();
        assert!(text.starts_with("PROPFIND /r/!svn/rvr/3/a HTTP/1.1\r\nDepth: 1\r\nHost: h\r\n"));
        assert!(text.ends_with("\r\n\r\n"));

        let text = String::from_utf8(get("/r/a%20b", "h:8080")).unwrap();
        assert!(text.starts_with("GET /r/a%20b HTTP/1.1\r\nHost: h:8080\r\n"));
    }

    #[test]
    fn test_content_length_body() {
        let (buffer, decoder) =
            decode_all(&[b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel", b"lo"]);
        assert_eq!(decoder.completed(), 1);
        let response = &decoder.responses()[0];
        assert_eq!(response.status, 200);
        assert_eq!(body(&buffer, response), b"hello");
    }

    #[test]
    fn test_incomplete_body_waits() {
        let (_, decoder) = decode_all(&[b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel"]);
        assert_eq!(decoder.completed(), 0);
    }

    #[test]
    fn test_chunked_body_is_spliced() {
        let (buffer, decoder) = decode_all(&[
            b"HTTP/1.1 207 Multi-Status\r\nTransfer-Encoding: chunked\r\n\r\n",
            b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n",
            b"0\r\n\r\n",
        ]);
        assert_eq!(decoder.completed(), 1);
        let response = &decoder.responses()[0];
        assert_eq!(body(&buffer, response), b"Wikipedia");
        assert_eq!(response.body.end, buffer.len());
    }

    #[test]
    fn test_chunked_trailers() {
        let (buffer, decoder) = decode_all(&[
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\nX-Checksum: 1\r\n\r\n",
        ]);
        assert_eq!(body(&buffer, &decoder.responses()[0]), b"abc");
        assert_eq!(buffer.len(), decoder.responses()[0].body.end);
    }

    #[test]
    fn test_pipelined_mixed_framing() {
        let (buffer, decoder) = decode_all(&[
            b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nab",
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\ncd\r\n0\r\n\r\n",
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        ]);
        assert_eq!(decoder.completed(), 3);
        let r = decoder.responses();
        assert_eq!(body(&buffer, &r[0]), b"ab");
        assert_eq!(body(&buffer, &r[1]), b"cd");
        assert_eq!(r[2].status, 404);
        assert!(!r[2].is_success());
        assert!(r[2].body.is_empty());
    }

    #[test]
    fn test_first_framing_header_wins() {
        let (buffer, decoder) = decode_all(&[
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\nxyz",
        ]);
        assert_eq!(body(&buffer, &decoder.responses()[0]), b"xyz");
    }

    #[test]
    fn test_unframed_response_has_empty_body() {
        let (_, decoder) = decode_all(&[b"HTTP/1.1 204 No Content\r\nServer: x\r\n\r\n"]);
        assert_eq!(decoder.completed(), 1);
        assert!(decoder.responses()[0].body.is_empty());
    }

    #[test]
    fn test_interim_response_skipped() {
        let (buffer, decoder) = decode_all(&[
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nz",
        ]);
        assert_eq!(decoder.completed(), 1);
        assert_eq!(body(&buffer, &decoder.responses()[0]), b"z");
    }

    #[test]
    fn test_headers_case_insensitive() {
        let (_, decoder) = decode_all(&[
            b"HTTP/1.1 200 OK\r\nsvn-youngest-rev: 42\r\nConnection: Keep-Alive, close\r\nContent-Length: 0\r\n\r\n",
        ]);
        let response = &decoder.responses()[0];
        assert_eq!(response.header("SVN-Youngest-Rev"), Some("42"));
        assert!(response.closes_connection());
    }

    #[test]
    fn test_bad_responses() {
        let mut buffer = ResponseBuffer::new();
        let mut decoder = HttpDecoder::new();
        buffer.append(b"SSH-2.0-OpenSSH\r\n\r\n");
        assert!(matches!(
            decoder.decode(&mut buffer),
            Err(SvnupError::Protocol(_))
        ));

        let mut buffer = ResponseBuffer::new();
        let mut decoder = HttpDecoder::new();
        buffer.append(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n");
        assert!(decoder.decode(&mut buffer).is_err());

        let mut buffer = ResponseBuffer::new();
        let mut decoder = HttpDecoder::new();
        buffer.append(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nabXX");
        assert!(decoder.decode(&mut buffer).is_err());
    }

    fn chunked_stream(payloads: &[Vec<u8>]) -> (Vec<u8>, Vec<Vec<u8>>) {
        let mut wire = Vec::new();
        let mut bodies = Vec::new();
        for payload in payloads {
            wire.extend_from_slice(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
            let mut body = Vec::new();
            for chunk in payload.chunks(7) {
                wire.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                wire.extend_from_slice(chunk);
                wire.extend_from_slice(b"\r\n");
                body.extend_from_slice(chunk);
            }
            wire.extend_from_slice(b"0\r\n\r\n");
            bodies.push(body);
        }
        (wire, bodies)
    }

    proptest! {
        #[test]
        fn prop_chunked_decoding_ignores_read_boundaries(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..4),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..12),
        ) {
            let (wire, bodies) = chunked_stream(&payloads);
            let mut splits: Vec<usize> = cuts.iter().map(|c| c.index(wire.len() + 1)).collect();
            splits.push(0);
            splits.push(wire.len());
            splits.sort_unstable();
            splits.dedup();

            let mut buffer = ResponseBuffer::new();
            let mut decoder = HttpDecoder::new();
            for pair in splits.windows(2) {
                buffer.append(&wire[pair[0]..pair[1]]);
                decoder.decode(&mut buffer).unwrap();
            }

            prop_assert_eq!(decoder.completed(), bodies.len());
            for (response, expected) in decoder.responses().iter().zip(&bodies) {
                prop_assert_eq!(&buffer.as_slice()[response.body.clone()], expected.as_slice());
            }
        }
    }
}
