//! Client configuration.
//!
//! Settings come from an optional TOML file; command-line flags are applied
//! on top by the caller.
//!
//! ```toml
//! verbosity = 2
//! trim_tree = true
//! extra_files = false
//! family = "ipv4"
//! retries = 5
//! timeout_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SvnupError};

/// Command batch budget in bytes.
pub const COMMAND_BUFFER: usize = 32768;

/// Apache closes keep-alive connections after 100 requests by default.
pub const MAX_HTTP_REQUESTS_PER_PACKET: usize = 95;

/// Reconnect attempts allowed per exchange.
pub const DEFAULT_RETRIES: u32 = 5;

/// Address family used when resolving the server name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

/// Runtime settings shared by every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvnupConfig {
    /// 0 = silent, 1 = changed paths, 2 = summaries, 3+ = protocol traces.
    pub verbosity: u8,
    /// Delete local files that are not part of the remote tree.
    pub trim_tree: bool,
    /// Report (instead of delete) local files unknown to the repository.
    pub extra_files: bool,
    pub family: AddressFamily,
    /// Reconnects allowed per exchange before giving up.
    pub retries: u32,
    /// Socket read/write timeout; 0 disables it.
    pub timeout_secs: u64,
    /// Default checkout directory.
    pub target: Option<PathBuf>,
}

impl Default for SvnupConfig {
    fn default() -> Self {
        Self {
            verbosity: 1,
            trim_tree: true,
            extra_files: false,
            family: AddressFamily::Any,
            retries: DEFAULT_RETRIES,
            timeout_secs: 300,
            target: None,
        }
    }
}

impl SvnupConfig {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            SvnupError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&data)
            .map_err(|e| SvnupError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Load settings from `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}
