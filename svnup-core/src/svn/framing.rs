//! Response framing for the svn:// protocol.
//!
//! The server never announces how long a reply is. A reply is complete once
//! the expected number of top-level parenthesized groups has been seen.
//! Strings are sent as `<len>:<bytes>` and may contain anything, including
//! unbalanced parentheses, so the scanner jumps over them instead of looking
//! inside.

use std::ops::Range;

use crate::error::{Result, SvnupError};

/// Size of the data blocks the server splits file contents into.
pub const DATA_BLOCK: u64 = 4096;

/// The empty auth request that precedes every command response.
pub const AUTH_REQUEST: &[u8] = b"( success ( ( ) 0: ) ) ";

/// Incremental group counter.
///
/// Feed it the accumulated response after every read; it resumes where it
/// stopped, so a string prefix or a string body may be split across reads.
#[derive(Debug, Default)]
pub struct GroupScanner {
    pos: usize,
    depth: usize,
    skip: usize,
    number: Option<usize>,
    inside_token: bool,
    group_start: usize,
    groups: Vec<Range<usize>>,
}

impl GroupScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Completed groups, as offsets into the scanned data.
    pub fn groups(&self) -> &[Range<usize>] {
        &self.groups
    }

    pub fn completed(&self) -> usize {
        self.groups.len()
    }

    /// Scan everything between the previous position and the end of `data`.
    pub fn scan(&mut self, data: &[u8]) -> Result<()> {
        while self.pos < data.len() {
            if self.skip > 0 {
                let take = self.skip.min(data.len() - self.pos);
                self.pos += take;
                self.skip -= take;
                self.inside_token = true;
                continue;
            }

            let at = self.pos;
            let b = data[at];
            self.pos += 1;

            if b.is_ascii_digit() && (self.number.is_some() || !self.inside_token) {
                let digit = (b - b'0') as usize;
                let n = self
                    .number
                    .unwrap_or(0)
                    .checked_mul(10)
                    .and_then(|n| n.checked_add(digit))
                    .ok_or_else(|| SvnupError::protocol("length prefix out of range"))?;
                self.number = Some(n);
                self.inside_token = true;
                continue;
            }
            if b == b':' {
                if let Some(n) = self.number.take() {
                    self.skip = n;
                    continue;
                }
            }
            self.number = None;

            match b {
                b'(' => {
                    if self.depth == 0 {
                        self.group_start = at;
                    }
                    self.depth += 1;
                }
                b')' => {
                    if self.depth == 0 {
                        return Err(SvnupError::protocol(format!(
                            "unbalanced ')' at offset {at}"
                        )));
                    }
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.groups.push(self.group_start..self.pos);
                    }
                }
                _ => {}
            }
            self.inside_token = !(b.is_ascii_whitespace() || b == b'(' || b == b')');
        }
        Ok(())
    }
}

/// Whether a complete group is a `( failure ...)` reply.
pub fn is_failure(group: &[u8]) -> bool {
    let inner = group.strip_prefix(b"(").unwrap_or(group);
    inner.trim_ascii_start().starts_with(b"failure")
}

/// Locate the end of the group opening at `start`: count `(` as +1 and `)`
/// as -1, jumping over strings, until the count returns to zero.
pub fn response_end(data: &[u8], start: usize) -> Option<usize> {
    let mut scanner = GroupScanner {
        pos: start,
        ..GroupScanner::default()
    };
    scanner.scan(data).ok()?;
    scanner.groups.first().map(|g| g.end)
}

/// Reassemble file contents from a run of `<n>:<bytes>` blocks ending with
/// the empty block `0:`.
///
/// Every length is checked against the region before it is copied.
pub fn unwrap_blocks(region: &[u8], expected: Option<u64>) -> Result<Vec<u8>> {
    let capacity = expected
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
        .min(region.len());
    let mut content = Vec::with_capacity(capacity);
    let mut pos = 0;

    loop {
        while pos < region.len() && region[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let digits_start = pos;
        while pos < region.len() && region[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits_start || pos >= region.len() || region[pos] != b':' {
            return Err(SvnupError::protocol(format!(
                "malformed data block marker at offset {digits_start}"
            )));
        }
        let len: usize = std::str::from_utf8(&region[digits_start..pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SvnupError::protocol("data block length out of range"))?;
        pos += 1;
        if len == 0 {
            break;
        }
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= region.len())
            .ok_or_else(|| {
                SvnupError::protocol(format!(
                    "data block of {len} bytes at offset {digits_start} overruns the response"
                ))
            })?;
        content.extend_from_slice(&region[pos..end]);
        pos = end;
    }

    if region[pos..].iter().any(|b| !b.is_ascii_whitespace()) {
        return Err(SvnupError::protocol("trailing data after final data block"));
    }
    Ok(content)
}

/// Expected on-wire size of a `get-file` contents reply: the auth request,
/// the header group, the block markers and the closing success group.
pub fn content_raw_size(size: u64, md5: Option<&str>, revision: u64) -> u64 {
    let md5_len = md5.map_or(0, |m| m.len() as u64);
    let header = "( success ( ( ".len() as u64
        + if md5_len > 0 { digits(md5_len) + 1 + md5_len + 1 } else { 0 }
        + ") ".len() as u64
        + digits(revision)
        + " ( ) ) ) ".len() as u64;
    let full_blocks = size / DATA_BLOCK;
    let remainder = size % DATA_BLOCK;
    let mut markers = full_blocks * (digits(DATA_BLOCK) + 2);
    if remainder > 0 {
        markers += digits(remainder) + 2;
    }
    let terminator = "0: ".len() as u64;
    let trailer = "( success ( ) ) ".len() as u64;

    AUTH_REQUEST.len() as u64 + header + size + markers + terminator + trailer
}

fn digits(mut n: u64) -> u64 {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(data: &[u8]) -> GroupScanner {
        let mut scanner = GroupScanner::new();
        scanner.scan(data).unwrap();
        scanner
    }

    #[test]
    fn test_counts_groups() {
        let data = b"( success ( ( ) 0: ) ) ( success ( 42 ) ) ";
        let scanner = scan_all(data);
        assert_eq!(scanner.completed(), 2);
        assert_eq!(&data[scanner.groups()[1].clone()], b"( success ( 42 ) )");
    }

    #[test]
    fn test_skips_unbalanced_parens_in_strings() {
        let data = b"( ( ) 7 ( 5:alice ) ( 9:oops (((( ) ( 3:):) ) false ) done ( success ( ) ) ";
        let scanner = scan_all(data);
        assert_eq!(scanner.completed(), 2);
    }

    #[test]
    fn test_digits_inside_words_are_not_lengths() {
        let scanner = scan_all(b"( success ( svndiff1 md5 ) ) ");
        assert_eq!(scanner.completed(), 1);
    }

    #[test]
    fn test_split_at_every_position() {
        let data: &[u8] = b"( success ( ( ) 0: ) ) ( success ( ( 32:0123456789abcdef0123456789abcdef ) 3 ( ) ) ) 6:(((((( 0: ( success ( ) ) ";
        for split in 0..data.len() {
            let mut scanner = GroupScanner::new();
            scanner.scan(&data[..split]).unwrap();
            scanner.scan(data).unwrap();
            assert_eq!(scanner.completed(), 3, "split at {split}");
        }
    }

    #[test]
    fn test_unbalanced_close_is_an_error() {
        let mut scanner = GroupScanner::new();
        assert!(scanner.scan(b"( ) ) ").is_err());
    }

    #[test]
    fn test_is_failure() {
        assert!(is_failure(b"( failure ( ( 1 0: 0: 0 ) ) )"));
        assert!(!is_failure(b"( success ( ) )"));
    }

    #[test]
    fn test_response_end() {
        let data = b"xx ( a ( 2:)) ) b ) ( c )";
        assert_eq!(response_end(data, 3), Some(19));
        assert_eq!(response_end(b"( open", 0), None);
    }

    #[test]
    fn test_unwrap_blocks() {
        let content = unwrap_blocks(b" 3:abc 2:de 0: ", Some(5)).unwrap();
        assert_eq!(content, b"abcde");
        assert_eq!(unwrap_blocks(b"0: ", None).unwrap(), b"");
    }

    #[test]
    fn test_unwrap_blocks_bounds_checked() {
        assert!(unwrap_blocks(b" 9:abc 0: ", None).is_err());
        assert!(unwrap_blocks(b" 3:abc ", None).is_err());
        assert!(unwrap_blocks(b" 3:abc 0: junk", None).is_err());
        assert!(unwrap_blocks(b" x:abc 0: ", None).is_err());
    }

    #[test]
    fn test_content_raw_size_matches_framing() {
        let md5 = "900150983cd24fb0d6963f7d28e17f72";
        let body = vec![b'a'; 4096 + 10];
        let mut wire = Vec::new();
        wire.extend_from_slice(AUTH_REQUEST);
        wire.extend_from_slice(format!("( success ( ( 32:{md5} ) 17 ( ) ) ) ").as_bytes());
        wire.extend_from_slice(b"4096:");
        wire.extend_from_slice(&body[..4096]);
        wire.extend_from_slice(b" 10:");
        wire.extend_from_slice(&body[4096..]);
        wire.extend_from_slice(b" 0: ( success ( ) ) ");

        assert_eq!(
            content_raw_size(body.len() as u64, Some(md5), 17),
            wire.len() as u64
        );
    }
}
