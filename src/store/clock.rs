//! Version Clock
//!
//! Per-node counter for the versions stamped on local writes.

use super::entry::{Version, MAX_VERSION};
use crate::error::{Error, Result};

/// Highest version this node has issued or observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionClock {
    last: Version,
}

impl VersionClock {
    /// Rebuild the clock from the highest version present in the store
    pub fn recovered(max_stored: Version) -> Self {
        Self { last: max_stored }
    }

    /// Last version issued or observed
    pub fn current(&self) -> Version {
        self.last
    }

    /// Consume the next version for a local write
    pub fn tick(&mut self) -> Result<Version> {
        if self.last >= MAX_VERSION {
            return Err(Error::Internal("version clock exhausted".into()));
        }
        self.last += 1;
        Ok(self.last)
    }

    /// Account for a version seen on a merged remote entry.
    ///
    /// The next local write then supersedes everything this node has seen.
    /// The clock never moves backwards.
    pub fn observe(&mut self, version: Version) {
        if version > self.last {
            self.last = version;
        }
    }
}
