//! Request encoding for the svn:// protocol.
//!
//! Commands are tuples of words, numbers and `<len>:<bytes>` strings, each
//! token followed by a space, terminated by a newline.

/// Client name sent in the greeting.
pub const USER_AGENT: &str = concat!("svnup-", env!("CARGO_PKG_VERSION"));

const CAPABILITIES: &[&str] = &[
    "edit-pipeline",
    "svndiff1",
    "absent-entries",
    "commit-revprops",
    "depth",
    "log-revprops",
    "atomic-revprops",
    "partial-replay",
];

/// Token writer for one request.
#[derive(Debug, Default)]
pub struct WireEncoder {
    out: Vec<u8>,
}

impl WireEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a `( <name> ( ...` command tuple.
    pub fn command(name: &str) -> Self {
        let mut enc = Self::new();
        enc.list_start();
        enc.word(name);
        enc.list_start();
        enc
    }

    pub fn word(&mut self, word: &str) -> &mut Self {
        self.out.extend_from_slice(word.as_bytes());
        self.out.push(b' ');
        self
    }

    pub fn number(&mut self, n: u64) -> &mut Self {
        self.out.extend_from_slice(n.to_string().as_bytes());
        self.out.push(b' ');
        self
    }

    pub fn bool(&mut self, b: bool) -> &mut Self {
        self.word(if b { "true" } else { "false" })
    }

    pub fn string(&mut self, bytes: &[u8]) -> &mut Self {
        self.out.extend_from_slice(bytes.len().to_string().as_bytes());
        self.out.push(b':');
        self.out.extend_from_slice(bytes);
        self.out.push(b' ');
        self
    }

    pub fn list_start(&mut self) -> &mut Self {
        self.out.extend_from_slice(b"( ");
        self
    }

    pub fn list_end(&mut self) -> &mut Self {
        self.out.extend_from_slice(b") ");
        self
    }

    /// Close every still-open list and terminate the line.
    pub fn finish(mut self, open_lists: usize) -> Vec<u8> {
        for _ in 0..open_lists {
            self.list_end();
        }
        if self.out.last() == Some(&b' ') {
            self.out.pop();
        }
        self.out.push(b'\n');
        self.out
    }
}

/// Client greeting: protocol version 2, capabilities, URL and agent.
pub fn greeting(url: &str) -> Vec<u8> {
    let mut enc = WireEncoder::new();
    enc.list_start().number(2).list_start();
    for cap in CAPABILITIES {
        enc.word(cap);
    }
    enc.list_end()
        .string(url.as_bytes())
        .string(USER_AGENT.as_bytes())
        .list_start()
        .list_end();
    enc.finish(1)
}

/// Anonymous authentication with an empty token.
pub fn anonymous_auth() -> Vec<u8> {
    let mut enc = WireEncoder::new();
    enc.list_start().word("ANONYMOUS").list_start().string(b"");
    enc.finish(2)
}

pub fn get_latest_rev() -> Vec<u8> {
    WireEncoder::command("get-latest-rev").finish(2)
}

/// `check-path` for the session root at `revision`.
pub fn check_path(revision: u64) -> Vec<u8> {
    let mut enc = WireEncoder::command("check-path");
    enc.string(b"").list_start().number(revision).list_end();
    enc.finish(2)
}

/// Log entry of a single revision with author, date and message.
pub fn log(revision: u64) -> Vec<u8> {
    let mut enc = WireEncoder::command("log");
    enc.list_start().string(b"").list_end();
    enc.list_start().number(revision).list_end();
    enc.list_start().number(revision).list_end();
    enc.bool(false).bool(false).number(0).bool(false).word("revprops");
    enc.list_start()
        .string(b"svn:author")
        .string(b"svn:date")
        .string(b"svn:log")
        .list_end();
    enc.finish(2)
}

/// Directory listing with entry kind and size, no properties.
pub fn get_dir(path: &str, revision: u64) -> Vec<u8> {
    let mut enc = WireEncoder::command("get-dir");
    enc.string(path.as_bytes())
        .list_start()
        .number(revision)
        .list_end()
        .bool(false)
        .bool(true)
        .list_start()
        .word("kind")
        .word("size")
        .list_end()
        .bool(false);
    enc.finish(2)
}

/// `get-file` asking for properties (checksum, executable, special) or for
/// the contents.
pub fn get_file(path: &str, revision: u64, want_props: bool, want_contents: bool) -> Vec<u8> {
    let mut enc = WireEncoder::command("get-file");
    enc.string(path.as_bytes())
        .list_start()
        .number(revision)
        .list_end()
        .bool(want_props)
        .bool(want_contents)
        .bool(false);
    enc.finish(2)
}
