//! Repository session selection.
//!
//! `svn://` URLs get an [`SvnRepository`], `http://` and `https://` URLs a
//! [`DavRepository`]; both sit behind the same `RemoteRepository` trait.

use anyhow::{Context, Result};
use tracing::info;

use svnup_core::{RemoteRepository, RepoUrl, Scheme, SvnRepository, SvnupConfig, TcpConnector};
use svnup_webdav::DavRepository;

/// Build the session for `url` without connecting.
pub fn build_repository(url: RepoUrl, config: &SvnupConfig) -> Box<dyn RemoteRepository> {
    let connector = Box::new(TcpConnector::for_url(&url, config));
    match url.scheme {
        Scheme::Svn => Box::new(SvnRepository::new(url, connector, config.retries)),
        Scheme::Http | Scheme::Https => {
            Box::new(DavRepository::new(url, connector, config.retries))
        }
    }
}

/// Connect to `url` and pin the session to `revision` (0 = youngest).
pub fn open(url: RepoUrl, config: &SvnupConfig, revision: u64) -> Result<Box<dyn RemoteRepository>> {
    let display = url.to_string();
    let mut repo = build_repository(url, config);
    let revision = repo
        .open(revision)
        .with_context(|| format!("cannot open {display}"))?;
    info!("session open at r{}", revision);
    Ok(repo)
}
