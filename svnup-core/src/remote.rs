//! The seam between the checkout engine and the two wire protocols.

use std::ops::Range;

use crate::error::Result;
use crate::inventory::{Inventory, RemoteFile};
use crate::revision_file::CommitInfo;
use crate::url::RepoUrl;

/// One downloaded file handed to the checkout engine.
#[derive(Debug)]
pub struct Fetched<'a> {
    /// Position in the slice passed to `fetch_contents`.
    pub index: usize,
    pub content: &'a [u8],
    /// Bytes the reply occupied on the wire.
    pub raw_size: u64,
}

/// A read-only repository session.
///
/// Implementations own their transport and response buffer. Every call
/// either completes its exchange or fails; transient network errors are
/// retried internally.
pub trait RemoteRepository {
    fn url(&self) -> &RepoUrl;

    /// Connect and pin the session to `revision` (0 = youngest).
    /// Returns the resolved revision.
    fn open(&mut self, revision: u64) -> Result<u64>;

    /// Revision resolved by `open`.
    fn revision(&self) -> u64;

    /// Author, date and message of the pinned revision, if it has any.
    fn commit_info(&mut self) -> Result<Option<CommitInfo>>;

    /// Walk the whole tree: create remote directories locally, confirm them
    /// with `inventory.confirm_directory` and add every file to `inventory.files`.
    fn list(&mut self, inventory: &mut Inventory) -> Result<()>;

    /// Fill in missing checksums, executable and special flags.
    fn fetch_attributes(&mut self, files: &mut [RemoteFile]) -> Result<()>;

    /// Download `files`, handing each completed batch to `sink` at once.
    /// A failed status anywhere in a batch fails before `sink` sees it.
    fn fetch_contents(
        &mut self,
        files: &[&RemoteFile],
        sink: &mut dyn FnMut(&[Fetched<'_>]) -> Result<()>,
    ) -> Result<()>;

    /// Connections opened so far (reconnects included).
    fn connections(&self) -> u32;
}

/// Split encoded requests into consecutive batches of at most `budget`
/// bytes and `max_items` requests. A request larger than the budget gets a
/// batch of its own.
pub fn plan_batches(sizes: &[usize], budget: usize, max_items: usize) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut bytes = 0;
    for (i, size) in sizes.iter().enumerate() {
        let count = i - start;
        if count > 0 && (bytes + size > budget || count >= max_items) {
            batches.push(start..i);
            start = i;
            bytes = 0;
        }
        bytes += size;
    }
    if start < sizes.len() {
        batches.push(start..sizes.len());
    }
    batches
}
