//! Version history: the changesets applied so far, by version.

use std::ops::RangeInclusive;

use crate::changeset::FinalizedChangeset;
use crate::{DocError, Result};

/// Append-only store of applied changesets.
///
/// Versions start past `base` and strictly increase. Skipped versions leave
/// holes; [`VersionHistory::get`] returns `None` for them.
#[derive(Clone, Debug, Default)]
pub struct VersionHistory {
    base: u64,
    entries: Vec<FinalizedChangeset>,
}

impl VersionHistory {
    pub fn new(base: u64) -> Self {
        Self {
            base,
            entries: Vec::new(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Highest recorded version (`base` when empty).
    pub fn latest_version(&self) -> u64 {
        self.entries.last().map_or(self.base, |c| c.version)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a version past the latest one.
    pub fn push(&mut self, changeset: FinalizedChangeset) -> Result<()> {
        let latest = self.latest_version();
        if changeset.version <= latest {
            return Err(DocError::VersionOrder {
                latest,
                version: changeset.version,
            });
        }
        self.entries.push(changeset);
        Ok(())
    }

    pub fn get(&self, version: u64) -> Option<&FinalizedChangeset> {
        let index = self.entries.binary_search_by_key(&version, |c| c.version).ok()?;
        self.entries.get(index)
    }

    /// Recorded changesets for `versions`, in order. Versions outside the
    /// history are skipped.
    pub fn range(&self, versions: RangeInclusive<u64>) -> impl Iterator<Item = &FinalizedChangeset> {
        let start = self.entries.partition_point(|c| c.version < *versions.start());
        self.entries[start..]
            .iter()
            .take_while(move |c| c.version <= *versions.end())
    }
}
