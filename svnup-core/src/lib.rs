//! svnup Core Library
//!
//! Core functionality for svnup, a read-only Subversion checkout tool:
//! - Response accumulator and blocking transport (TCP, optionally TLS)
//! - svn:// wire codec and repository session
//! - Inventory model and local tree scan
//! - Known-files index and revision-state file
//! - Reconciliation (classify, prune) and the download/verify/save engine
//! - Checkout driver working against any `RemoteRepository`

pub mod buffer;
pub mod checkout;
pub mod config;
pub mod error;
pub mod inventory;
pub mod known_files;
pub mod reconcile;
pub mod remote;
pub mod revision_file;
pub mod save;
pub mod svn;
pub mod transport;
pub mod url;

pub use buffer::{BUFFER_UNIT, ResponseBuffer};
pub use checkout::{CheckoutOptions, CheckoutReport, WORK_DIR, checkout};
pub use config::{AddressFamily, COMMAND_BUFFER, MAX_HTTP_REQUESTS_PER_PACKET, SvnupConfig};
pub use error::{Result, SvnupError};
pub use inventory::{Inventory, RemoteFile};
pub use known_files::KnownFilesIndex;
pub use reconcile::{PruneMode, PruneReport};
pub use remote::{Fetched, RemoteRepository, plan_batches};
pub use revision_file::{CommitInfo, RevisionState, sanitize_date};
pub use svn::SvnRepository;
pub use transport::{Connect, Stream, TcpConnector, Transport};
pub use url::{RepoUrl, Scheme};
