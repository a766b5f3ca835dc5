//! WebDAV XML parsing.
//!
//! Only the handful of elements a read-only client needs are extracted.
//! Elements are matched on their local name, so the namespace prefixes a
//! server picks do not matter.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use svnup_core::{CommitInfo, SvnupError, sanitize_date};

/// Errors raised while reading a response body.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),

    #[error("Missing element: {0}")]
    Missing(&'static str),
}

impl From<quick_xml::Error> for XmlError {
    fn from(e: quick_xml::Error) -> Self {
        XmlError::Parse(e.to_string())
    }
}

impl From<XmlError> for SvnupError {
    fn from(e: XmlError) -> Self {
        SvnupError::Protocol(e.to_string())
    }
}

// ── Event walking ──

/// What the walker hands to a visitor.
enum Node<'a, 'e> {
    /// An opening tag, or an empty element (`<x/>`).
    Start(&'a [u8], &'a BytesStart<'e>),
    /// A closing tag with the text collected since the innermost opening
    /// tag. Empty elements produce a `Start` immediately followed by an
    /// `End` with no text.
    End(&'a [u8], &'a str),
}

/// Visit every element of `xml`, matching on local names.
fn walk<F>(xml: &[u8], mut visit: F) -> Result<(), XmlError>
where
    F: FnMut(Node<'_, '_>) -> Result<(), XmlError>,
{
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                text.clear();
                visit(Node::Start(e.local_name().as_ref(), &e))?;
            }
            Event::Empty(e) => {
                text.clear();
                visit(Node::Start(e.local_name().as_ref(), &e))?;
                visit(Node::End(e.local_name().as_ref(), ""))?;
            }
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::End(e) => {
                visit(Node::End(e.local_name().as_ref(), &text))?;
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, XmlError> {
    match e.try_get_attribute(name) {
        Ok(Some(attr)) => Ok(Some(attr.unescape_value()?.into_owned())),
        Ok(None) => Ok(None),
        Err(err) => Err(XmlError::Parse(err.to_string())),
    }
}

// ── update-report ──

/// A file announced by an update report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFile {
    pub href: String,
    pub md5: Option<String>,
    pub executable: bool,
    pub special: bool,
}

/// The whole tree as announced by an update report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Directory hrefs in document order (parents first).
    pub dirs: Vec<String>,
    pub files: Vec<ReportFile>,
    /// The server sent file properties inline.
    pub inline_props: bool,
}

enum Open {
    Dir(usize),
    File(usize),
}

pub fn parse_update_report(xml: &[u8]) -> Result<UpdateReport, XmlError> {
    let mut report = UpdateReport::default();
    let mut stack: Vec<Open> = Vec::new();
    let mut prop_name: Option<String> = None;

    walk(xml, |node| {
        match node {
            Node::Start(b"update-report", e) => {
                report.inline_props = attribute(e, "inline-props")?.as_deref() == Some("true");
            }
            Node::Start(b"add-directory", _) => {
                report.dirs.push(String::new());
                stack.push(Open::Dir(report.dirs.len() - 1));
            }
            Node::Start(b"add-file", _) => {
                report.files.push(ReportFile::default());
                stack.push(Open::File(report.files.len() - 1));
            }
            Node::Start(b"set-prop", e) => prop_name = attribute(e, "name")?,
            Node::End(b"add-directory" | b"add-file", _) => {
                stack.pop();
            }
            Node::End(b"href", text) => match stack.last() {
                Some(&Open::Dir(i)) if report.dirs[i].is_empty() => {
                    report.dirs[i] = text.trim().to_string();
                }
                Some(&Open::File(i)) if report.files[i].href.is_empty() => {
                    report.files[i].href = text.trim().to_string();
                }
                _ => {}
            },
            Node::End(b"md5-checksum", text) => {
                if let Some(&Open::File(i)) = stack.last() {
                    report.files[i].md5 = Some(text.trim().to_ascii_lowercase());
                }
            }
            Node::End(b"set-prop", _) => {
                if let Some(&Open::File(i)) = stack.last() {
                    match prop_name.take().as_deref() {
                        Some("svn:executable") => report.files[i].executable = true,
                        Some("svn:special") => report.files[i].special = true,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    if let Some(file) = report.files.iter().find(|f| f.href.is_empty()) {
        return Err(XmlError::Parse(format!(
            "add-file without href (md5 {:?})",
            file.md5
        )));
    }
    Ok(report)
}

// ── PROPFIND ──

/// File attributes from a PROPFIND multistatus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileProps {
    pub size: Option<u64>,
    pub executable: bool,
    pub special: bool,
}

pub fn parse_propfind(xml: &[u8]) -> Result<FileProps, XmlError> {
    let mut props = FileProps::default();
    let mut seen_multistatus = false;

    walk(xml, |node| {
        match node {
            Node::Start(b"multistatus", _) => seen_multistatus = true,
            Node::End(b"getcontentlength", text) => {
                props.size = Some(text.trim().parse().map_err(|_| {
                    XmlError::Parse(format!("bad getcontentlength: {text:?}"))
                })?);
            }
            Node::End(b"executable", _) => props.executable = true,
            Node::End(b"special", text) => props.special = text.trim() == "*",
            _ => {}
        }
        Ok(())
    })?;

    if !seen_multistatus {
        return Err(XmlError::Missing("multistatus"));
    }
    Ok(props)
}

// ── log-report ──

/// Author, date and message of the single revision a log report covers.
/// `None` when the report holds no entry.
pub fn parse_log_report(xml: &[u8]) -> Result<Option<CommitInfo>, XmlError> {
    let mut info = CommitInfo::default();
    let mut date = None;

    walk(xml, |node| {
        match node {
            Node::End(b"creator-displayname", text) => info.author = text.to_string(),
            Node::End(b"date", text) => date = Some(text.trim().to_string()),
            Node::End(b"comment", text) => info.message = text.to_string(),
            _ => {}
        }
        Ok(())
    })?;

    Ok(date.map(|date| CommitInfo {
        date: sanitize_date(&date),
        ..info
    }))
}

// ── Errors ──

/// The `human-readable` message of an XML error body, if there is one.
pub fn human_readable(xml: &[u8]) -> Option<String> {
    let mut message = None;
    walk(xml, |node| {
        if let Node::End(b"human-readable", text) = node {
            if message.is_none() {
                message = Some(text.trim().to_string());
            }
        }
        Ok(())
    })
    .ok()?;
    message.filter(|m| !m.is_empty())
}

// ── Paths ──

/// Decode `%XX` escapes. Malformed escapes are kept as they are.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<S:update-report xmlns:S="svn:" xmlns:V="http://subversion.tigris.org/xmlns/dav/" xmlns:D="DAV:" send-all="true" inline-props="true">
<S:target-revision rev="12"/>
<S:open-directory rev="12">
<D:checked-in><D:href>/repos/!svn/ver/12/base</D:href></D:checked-in>
<S:add-directory name="bin" bc-url="/repos/!svn/bc/12/base/bin">
<D:checked-in><D:href>/repos/!svn/ver/10/base/bin</D:href></D:checked-in>
<S:add-file name="sh">
<D:checked-in><D:href>/repos/!svn/ver/9/base/bin/sh</D:href></D:checked-in>
<S:set-prop name="svn:executable">*</S:set-prop>
<S:prop><V:md5-checksum>0CC175B9C0F1B6A831C399E269772661</V:md5-checksum></S:prop>
</S:add-file>
</S:add-directory>
<S:add-file name="a b.txt">
<D:checked-in><D:href>/repos/!svn/ver/3/base/a%20b.txt</D:href></D:checked-in>
<S:set-prop name="svn:eol-style">native</S:set-prop>
<S:prop><V:md5-checksum>92eb5ffee6ae2fec3ad71c777531578f</V:md5-checksum></S:prop>
</S:add-file>
<S:add-file name="link">
<D:checked-in><D:href>/repos/!svn/ver/4/base/link</D:href></D:checked-in>
<S:set-prop name="svn:special">*</S:set-prop>
<S:prop><V:md5-checksum>4a8a08f09d37b73795649038408b5f33</V:md5-checksum></S:prop>
</S:add-file>
</S:open-directory>
</S:update-report>"#;

    #[test]
    fn test_update_report() {
        let report = parse_update_report(REPORT.as_bytes()).unwrap();
        assert!(report.inline_props);
        assert_eq!(report.dirs, vec!["/repos/!svn/ver/10/base/bin".to_string()]);
        assert_eq!(report.files.len(), 3);

        let sh = &report.files[0];
        assert_eq!(sh.href, "/repos/!svn/ver/9/base/bin/sh");
        assert_eq!(sh.md5.as_deref(), Some("0cc175b9c0f1b6a831c399e269772661"));
        assert!(sh.executable);
        assert!(!sh.special);

        assert_eq!(report.files[1].href, "/repos/!svn/ver/3/base/a%20b.txt");
        assert!(!report.files[1].executable);
        assert!(report.files[2].special);
    }

    #[test]
    fn test_update_report_without_inline_props() {
        let xml = br#"<S:update-report xmlns:S="svn:" xmlns:D="DAV:"><S:open-directory rev="2"><S:add-file name="x"><D:checked-in><D:href>/r/x</D:href></D:checked-in></S:add-file></S:open-directory></S:update-report>"#;
        let report = parse_update_report(xml).unwrap();
        assert!(!report.inline_props);
        assert_eq!(report.files[0].href, "/r/x");
        assert_eq!(report.files[0].md5, None);
    }

    #[test]
    fn test_propfind() {
        let xml = br#"<?xml version="1.0" encoding="utf-8"?>
<D:multistatus xmlns:D="DAV:" xmlns:lp1="DAV:" xmlns:S="http://subversion.tigris.org/xmlns/svn/">
<D:response><D:href>/repos/!svn/ver/9/base/bin/sh</D:href>
<D:propstat><D:prop>
<lp1:getcontentlength>1234</lp1:getcontentlength>
<S:executable/>
</D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>
</D:response></D:multistatus>"#;
        let props = parse_propfind(xml).unwrap();
        assert_eq!(props.size, Some(1234));
        assert!(props.executable);
        assert!(!props.special);

        let xml = br#"<D:multistatus xmlns:D="DAV:" xmlns:S="svn:"><D:response><D:propstat><D:prop><D:getcontentlength>7</D:getcontentlength><S:special>*</S:special></D:prop></D:propstat></D:response></D:multistatus>"#;
        let props = parse_propfind(xml).unwrap();
        assert!(props.special);
        assert!(parse_propfind(b"<html>nope</html>").is_err());
    }

    #[test]
    fn test_log_report() {
        let xml = br#"<?xml version="1.0" encoding="utf-8"?>
<S:log-report xmlns:S="svn:" xmlns:D="DAV:">
<S:log-item>
<D:version-name>12</D:version-name>
<D:creator-displayname>bob</D:creator-displayname>
<S:date>2021-03-04T05:06:07.000000Z</S:date>
<D:comment>Fix &lt;tags&gt; &amp; (parens
second line</D:comment>
</S:log-item>
</S:log-report>"#;
        let info = parse_log_report(xml).unwrap().unwrap();
        assert_eq!(info.author, "bob");
        assert_eq!(info.date, "2021-03-04 05:06:07");
        assert_eq!(info.message, "Fix <tags> & (parens\nsecond line");

        assert_eq!(
            parse_log_report(br#"<S:log-report xmlns:S="svn:"></S:log-report>"#).unwrap(),
            None
        );
    }

    #[test]
    fn test_human_readable() {
        let xml = br#"<?xml version="1.0" encoding="utf-8"?>
<D:error xmlns:D="DAV:" xmlns:m="http://apache.org/dav/xmlns" xmlns:C="svn:">
<C:error/>
<m:human-readable errcode="160006">
No such revision 99
</m:human-readable>
</D:error>"#;
        assert_eq!(human_readable(xml).as_deref(), Some("No such revision 99"));
        assert_eq!(human_readable(b"<html><body>Not Found</body></html>"), None);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b%2Fc"), "a b/c");
        assert_eq!(percent_decode("%C3%A9t%C3%A9"), "été");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz%4"), "%zz%4");
    }
}
