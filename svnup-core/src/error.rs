//! Error taxonomy for svnup.
//!
//! Every failure falls into one of a few classes:
//! - transient I/O (retried with a reconnect, bounded)
//! - protocol violations and server failures (fatal)
//! - integrity failures (fatal, nothing is written)
//! - local filesystem conflicts (fatal, the user has to clean up)

use std::path::PathBuf;

/// Result type for svnup operations
pub type Result<T> = std::result::Result<T, SvnupError>;

/// Errors that can occur while talking to a repository or updating a checkout
#[derive(Debug, thiserror::Error)]
pub enum SvnupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {message}")]
    Server { message: String },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{} is in the way, please remove it manually", path.display())]
    Conflict { path: PathBuf },

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<SvnupError>,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No local information for revision {0}")]
    RevisionMismatch(u64),
}

impl SvnupError {
    /// Whether the exchange that produced this error may be retried on a
    /// fresh connection.
    pub fn is_transient(&self) -> bool {
        match self {
            SvnupError::Io(e) => e.kind() != std::io::ErrorKind::InvalidInput,
            SvnupError::ConnectionClosed | SvnupError::Tls(_) => true,
            _ => false,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        SvnupError::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(SvnupError::Io(reset).is_transient());
        assert!(SvnupError::ConnectionClosed.is_transient());
        assert!(!SvnupError::protocol("bad").is_transient());
        assert!(
            !SvnupError::Integrity {
                path: "/a".into(),
                expected: "x".into(),
                actual: "y".into(),
            }
            .is_transient()
        );
    }

    #[test]
    fn test_conflict_message() {
        let err = SvnupError::Conflict {
            path: PathBuf::from("/tmp/target"),
        };
        assert_eq!(
            err.to_string(),
            "/tmp/target is in the way, please remove it manually"
        );
    }
}
