//! Asset diff service
//!
//! Works out which files a job created in its working directory. The launch
//! command is wrapped to write a directory listing before and after the user
//! command; after the container stops both listings are copied out and
//! compared.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::runtime::{ContainerHandle, ContainerRuntime, SNAPSHOT_AFTER, SNAPSHOT_BEFORE};

/// Paths containing this marker are interpreter caches, never assets
pub const CACHE_DIR_MARKER: &str = "__pycache__";

/// Trailing listing lines that are not paths (blank line and summary)
const LISTING_TRAILER_LINES: usize = 2;

/// One directory listing, in listing order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSnapshot {
    pub paths: Vec<String>,
}

impl AssetSnapshot {
    pub fn from_listing(listing: &str) -> Self {
        Self {
            paths: listing.lines().map(str::to_string).collect(),
        }
    }

    fn entries(&self) -> &[String] {
        let end = self.paths.len().saturating_sub(LISTING_TRAILER_LINES);
        &self.paths[..end]
    }
}

/// Paths that differ between the two listings
///
/// Only computed when the post-run listing is longer; otherwise nothing was
/// created and the result is empty. The comparison is a symmetric difference,
/// so a file deleted during a run that also created files is reported too.
pub fn new_assets(before: &AssetSnapshot, after: &AssetSnapshot) -> Vec<String> {
    if after.paths.len() <= before.paths.len() {
        return Vec::new();
    }

    let before: BTreeSet<&String> = before.entries().iter().collect();
    let after: BTreeSet<&String> = after.entries().iter().collect();

    before
        .symmetric_difference(&after)
        .filter(|path| !path.contains(CACHE_DIR_MARKER))
        .map(|path| path.to_string())
        .collect()
}

/// Copies both listings out of a stopped container and diffs them
pub async fn collect_assets(
    runtime: &dyn ContainerRuntime,
    handle: &ContainerHandle,
) -> Result<Vec<String>> {
    let before = runtime.copy_out(handle, SNAPSHOT_BEFORE).await?;
    let after = runtime.copy_out(handle, SNAPSHOT_AFTER).await?;

    let before = AssetSnapshot::from_listing(&String::from_utf8_lossy(&before));
    let after = AssetSnapshot::from_listing(&String::from_utf8_lossy(&after));

    Ok(new_assets(&before, &after))
}
