//! svnup: a read-only Subversion client that mirrors one branch of a
//! repository into a local directory.
//!
//! Supports:
//! - `svn://`, `http://` and `https://` repositories
//! - Incremental updates driven by the `.svnup/known_files` index
//! - `log` and `info` against a server or a local checkout
//!
//! # Usage
//!
//! ```bash
//! # Check out (or update) the youngest revision into ./head
//! svnup checkout svn://svn.freebsd.org/base/head
//!
//! # Pin a revision and a target directory
//! svnup co -r 370000 https://svn.example.org/repos/ports/head /usr/ports
//!
//! # Commit information of the server or of a checkout
//! svnup log svn://svn.freebsd.org/base/head
//! svnup info /usr/ports
//! ```

mod output;
mod session;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use svnup_core::{
    AddressFamily, CheckoutOptions, RepoUrl, RevisionState, SvnupConfig, WORK_DIR, checkout,
};

#[derive(Parser, Debug)]
#[command(name = "svnup")]
#[command(version)]
#[command(about = "Read-only Subversion checkout tool")]
struct Cli {
    /// 0 = silent, 1 = changed paths, 2 = summaries, 3+ = protocol traces
    #[arg(short, long, global = true)]
    verbosity: Option<u8>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only connect over IPv4
    #[arg(short = '4', global = true, conflicts_with = "ipv6")]
    ipv4: bool,

    /// Only connect over IPv6
    #[arg(short = '6', global = true)]
    ipv6: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check out or update a branch
    #[command(visible_alias = "co")]
    Checkout {
        /// Repository URL (svn://, http:// or https://)
        url: String,
        /// Target directory (default: last segment of the branch)
        dest: Option<PathBuf>,
        /// Target directory, as an option
        #[arg(long, conflicts_with = "dest")]
        target: Option<PathBuf>,
        /// Revision to check out (default: youngest)
        #[arg(short, long, default_value_t = 0)]
        revision: u64,
        /// Keep local files missing from the repository
        #[arg(long)]
        no_trim: bool,
        /// List local files unknown to the repository instead of deleting them
        #[arg(long)]
        extra_files: bool,
    },

    /// Show the commit message of a revision
    Log {
        /// Repository URL or local checkout
        location: String,
        #[arg(short, long, default_value_t = 0)]
        revision: u64,
    },

    /// Show revision information
    Info {
        /// Repository URL or local checkout
        location: String,
        #[arg(short, long, default_value_t = 0)]
        revision: u64,
    },
}

/// What a `log` or `info` argument names.
#[derive(Debug, PartialEq, Eq)]
enum Location {
    Remote(RepoUrl),
    Local(PathBuf),
}

fn parse_location(arg: &str) -> Result<Location> {
    if arg.contains("://") {
        Ok(Location::Remote(RepoUrl::parse(arg)?))
    } else {
        Ok(Location::Local(PathBuf::from(arg)))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(config.verbosity);

    match cli.command {
        Commands::Checkout {
            url,
            dest,
            target,
            revision,
            no_trim,
            extra_files,
        } => cmd_checkout(config, url, dest.or(target), revision, no_trim, extra_files),

        Commands::Log { location, revision } => cmd_log(&config, &location, revision),

        Commands::Info { location, revision } => cmd_info(&config, &location, revision),
    }
}

/// Configuration file values with the global flags applied on top.
fn load_config(cli: &Cli) -> Result<SvnupConfig> {
    let mut config = SvnupConfig::load_or_default(cli.config.as_deref())?;
    if let Some(verbosity) = cli.verbosity {
        config.verbosity = verbosity;
    }
    if cli.ipv4 {
        config.family = AddressFamily::Ipv4;
    } else if cli.ipv6 {
        config.family = AddressFamily::Ipv6;
    }
    Ok(config)
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "error,svnup={level},svnup_core={level},svnup_webdav={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn cmd_checkout(
    mut config: SvnupConfig,
    url: String,
    target: Option<PathBuf>,
    revision: u64,
    no_trim: bool,
    extra_files: bool,
) -> Result<()> {
    let url = RepoUrl::parse(&url)?;
    if no_trim {
        config.trim_tree = false;
    }
    if extra_files {
        config.extra_files = true;
    }
    let target = target
        .or_else(|| config.target.clone())
        .unwrap_or_else(|| PathBuf::from(url.default_target()));

    let display = url.to_string();
    let mut repo = session::open(url, &config, revision)?;
    let options = CheckoutOptions {
        target,
        trim_tree: config.trim_tree,
        extra_files: config.extra_files,
    };
    let report = checkout(repo.as_mut(), &options)
        .with_context(|| format!("checkout of {display} into {} failed", options.target.display()))?;
    info!(
        "r{}: {} of {} files downloaded over {} connection(s)",
        report.revision,
        report.downloaded.len(),
        report.total_files,
        repo.connections()
    );

    let mut out = io::stdout().lock();
    output::write_checkout(&mut out, &report, config.verbosity)?;
    out.flush()?;
    Ok(())
}

fn cmd_log(config: &SvnupConfig, location: &str, revision: u64) -> Result<()> {
    let mut out = io::stdout().lock();
    match parse_location(location)? {
        Location::Remote(url) => {
            let mut repo = session::open(url, config, revision)?;
            let commit = repo.commit_info()?;
            output::write_log(&mut out, repo.revision(), commit.as_ref())?;
        }
        Location::Local(dir) => {
            let state = load_local(&dir, revision)?;
            output::write_log(&mut out, state.revision, output::recorded(&state.commit))?;
        }
    }
    out.flush()?;
    Ok(())
}

fn cmd_info(config: &SvnupConfig, location: &str, revision: u64) -> Result<()> {
    let mut out = io::stdout().lock();
    match parse_location(location)? {
        Location::Remote(url) => {
            let path = url.default_target().to_string();
            let display = url.to_string();
            let mut repo = session::open(url, config, revision)?;
            let commit = repo.commit_info()?;
            output::write_info(&mut out, &path, &display, repo.revision(), commit.as_ref())?;
        }
        Location::Local(dir) => {
            let state = load_local(&dir, revision)?;
            output::write_info(
                &mut out,
                &dir.display().to_string(),
                &state.url,
                state.revision,
                output::recorded(&state.commit),
            )?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Revision state of the checkout at `dir`, which must match `revision`
/// unless that is 0.
fn load_local(dir: &Path, revision: u64) -> Result<RevisionState> {
    let state = RevisionState::load(&dir.join(WORK_DIR))
        .with_context(|| format!("cannot read the revision file of {}", dir.display()))?
        .with_context(|| format!("{} is not an svnup checkout", dir.display()))?;
    state.ensure_revision(revision)?;
    Ok(state)
}
