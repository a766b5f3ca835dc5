//! Repository URL parsing.

use std::fmt;

use crate::error::{Result, SvnupError};

/// Wire protocol selected by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Svn,
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Svn => "svn",
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Svn => 3690,
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// A parsed `scheme://host[:port]/branch` URL.
///
/// `branch` never starts or ends with a slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub branch: String,
}

impl RepoUrl {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (scheme, rest) = if let Some(rest) = strip_prefix_ignore_case(input, "svn://") {
            (Scheme::Svn, rest)
        } else if let Some(rest) = strip_prefix_ignore_case(input, "https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = strip_prefix_ignore_case(input, "http://") {
            (Scheme::Http, rest)
        } else {
            return Err(SvnupError::InvalidUrl(format!(
                "unsupported scheme (expected svn://, http:// or https://): {input}"
            )));
        };

        let Some((authority, path)) = rest.split_once('/') else {
            return Err(SvnupError::InvalidUrl(format!(
                "missing repository path: {input}"
            )));
        };
        let branch = path.trim_matches('/');
        if branch.is_empty() {
            return Err(SvnupError::InvalidUrl(format!(
                "missing repository path: {input}"
            )));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let Some((host, after)) = bracketed.split_once(']') else {
                return Err(SvnupError::InvalidUrl(format!("invalid host: {input}")));
            };
            (host, parse_port(after.strip_prefix(':'), scheme, input)?)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, parse_port(Some(port), scheme, input)?),
                None => (authority, scheme.default_port()),
            }
        };
        if host.is_empty() {
            return Err(SvnupError::InvalidUrl(format!("missing host: {input}")));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            branch: branch.to_string(),
        })
    }

    /// Host with the port appended when it is not the scheme default.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Last segment of the branch, used as the default checkout directory.
    pub fn default_target(&self) -> &str {
        self.branch.rsplit('/').next().unwrap_or(&self.branch)
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}",
            self.scheme.as_str(),
            self.authority(),
            self.branch
        )
    }
}

fn strip_prefix_ignore_case<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    input
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &input[prefix.len()..])
}

fn parse_port(port: Option<&str>, scheme: Scheme, input: &str) -> Result<u16> {
    match port {
        None | Some("") => Ok(scheme.default_port()),
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| SvnupError::InvalidUrl(format!("invalid port: {input}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_svn_url() {
        let url = RepoUrl::parse("svn://svn.freebsd.org/base/releng/13.2").unwrap();
        assert_eq!(url.scheme, Scheme::Svn);
        assert_eq!(url.host, "svn.freebsd.org");
        assert_eq!(url.port, 3690);
        assert_eq!(url.branch, "base/releng/13.2");
        assert_eq!(url.default_target(), "13.2");
        assert_eq!(url.to_string(), "svn://svn.freebsd.org/base/releng/13.2");
    }

    #[test]
    fn test_parse_https_with_port() {
        let url = RepoUrl::parse("HTTPS://example.org:8443/repo/trunk/").unwrap();
        assert_eq!(url.scheme, Scheme::Https);
        assert_eq!(url.port, 8443);
        assert_eq!(url.branch, "repo/trunk");
        assert_eq!(url.to_string(), "https://example.org:8443/repo/trunk");
    }

    #[test]
    fn test_parse_ipv6_host() {
        let url = RepoUrl::parse("http://[::1]:8080/repo").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.port, 8080);
        assert_eq!(url.authority(), "[::1]:8080");
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(RepoUrl::parse("ftp://host/repo").is_err());
        assert!(RepoUrl::parse("svn://host").is_err());
        assert!(RepoUrl::parse("svn://host/").is_err());
        assert!(RepoUrl::parse("svn://host:notaport/repo").is_err());
        assert!(RepoUrl::parse("svn:///repo").is_err());
    }
}
