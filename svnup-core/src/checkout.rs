//! Checkout driver.
//!
//! Brings a local directory to the exact state of the repository at the
//! session's revision:
//! 1. load the known-files index and scan the directory
//! 2. list the remote tree
//! 3. classify, fetch missing attributes, classify again
//! 4. download, verify and save everything that changed
//! 5. write the pending index and the revision state, prune, then commit
//!    the index by renaming it into place

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{Result, SvnupError};
use crate::inventory::{Inventory, create_directory};
use crate::known_files::KnownFilesIndex;
use crate::reconcile::{self, PruneMode, PruneReport};
use crate::remote::{Fetched, RemoteRepository};
use crate::revision_file::RevisionState;
use crate::save;

/// Control directory inside every checkout.
pub const WORK_DIR: &str = ".svnup";

/// Where and how to check out.
#[derive(Debug, Clone)]
pub struct CheckoutOptions {
    pub target: PathBuf,
    pub trim_tree: bool,
    pub extra_files: bool,
}

impl CheckoutOptions {
    pub fn work_dir(&self) -> PathBuf {
        self.target.join(WORK_DIR)
    }
}

/// Outcome of a completed checkout.
#[derive(Debug, Default)]
pub struct CheckoutReport {
    pub revision: u64,
    /// Files in the remote tree.
    pub total_files: usize,
    /// Paths written during this run.
    pub downloaded: Vec<String>,
    /// Content bytes written.
    pub bytes_downloaded: u64,
    /// Bytes received for the downloads, framing included.
    pub raw_bytes: u64,
    pub pruned: PruneReport,
    pub duration_ms: u64,
}

/// Run a checkout through an opened repository session.
pub fn checkout(
    remote: &mut dyn RemoteRepository,
    options: &CheckoutOptions,
) -> Result<CheckoutReport> {
    let started = Instant::now();
    let revision = remote.revision();
    if revision == 0 {
        return Err(SvnupError::protocol("repository session is not open"));
    }

    create_directory(&options.target)?;
    let work_dir = options.work_dir();
    create_directory(&work_dir)?;

    let index = KnownFilesIndex::new(&work_dir);
    let mut inventory = Inventory::new(&options.target);
    inventory.known_files = index.load()?;
    inventory.scan_local(options.trim_tree || options.extra_files)?;
    debug!("{} files known from the last run", inventory.known_files.len());

    let commit = remote.commit_info()?.unwrap_or_default();
    remote.list(&mut inventory)?;

    reconcile::classify(&mut inventory);
    remote.fetch_attributes(&mut inventory.files)?;
    let pending = reconcile::classify(&mut inventory);
    info!(
        "{} of {} files need downloading",
        pending,
        inventory.files.len()
    );

    let mut report = CheckoutReport {
        revision,
        total_files: inventory.files.len(),
        ..CheckoutReport::default()
    };
    download(remote, &mut inventory, &mut report)?;

    reconcile::write_index(&mut inventory, &index)?;
    RevisionState::new(revision, remote.url().to_string(), commit).save(&work_dir)?;
    report.pruned = reconcile::prune(
        &mut inventory,
        PruneMode {
            trim_tree: options.trim_tree,
            extra_files: options.extra_files,
        },
    )?;
    index.commit()?;

    report.duration_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}

struct Saved {
    index: usize,
    md5: String,
    size: u64,
    raw_size: u64,
}

fn download(
    remote: &mut dyn RemoteRepository,
    inventory: &mut Inventory,
    report: &mut CheckoutReport,
) -> Result<()> {
    let wanted: Vec<usize> = (0..inventory.files.len())
        .filter(|&i| inventory.files[i].download)
        .collect();
    if wanted.is_empty() {
        return Ok(());
    }

    let mut saved: Vec<Saved> = Vec::with_capacity(wanted.len());
    {
        let requests: Vec<_> = wanted.iter().map(|&i| &inventory.files[i]).collect();
        // Every file of a batch is verified before the first one is written.
        let mut sink = |batch: &[Fetched<'_>]| -> Result<()> {
            let mut verified = Vec::with_capacity(batch.len());
            for fetched in batch {
                let file = requests.get(fetched.index).ok_or_else(|| {
                    SvnupError::protocol(format!("unexpected download #{}", fetched.index))
                })?;
                verified.push((file, save::verify(file, fetched.content)?));
            }
            for (fetched, (file, md5)) in batch.iter().zip(verified) {
                let path = inventory.local_path(&file.path);
                save::save_file(&path, fetched.content, file.executable, file.special)?;
                debug!("saved {} ({} bytes)", file.path, fetched.content.len());
                saved.push(Saved {
                    index: wanted[fetched.index],
                    md5,
                    size: fetched.content.len() as u64,
                    raw_size: fetched.raw_size,
                });
            }
            Ok(())
        };
        remote.fetch_contents(&requests, &mut sink)?;
    }

    if saved.len() != wanted.len() {
        return Err(SvnupError::protocol(format!(
            "expected {} files, received {}",
            wanted.len(),
            saved.len()
        )));
    }

    saved.sort_by_key(|s| s.index);
    for entry in saved {
        let file = &mut inventory.files[entry.index];
        file.md5 = Some(entry.md5);
        file.size = Some(entry.size);
        file.raw_size = entry.raw_size;
        file.download = false;
        report.bytes_downloaded += entry.size;
        report.raw_bytes += entry.raw_size;
        report.downloaded.push(file.path.clone());
    }
    Ok(())
}
