//! Common types used throughout the index engine.

mod page_id;
mod record_id;

pub use page_id::PageId;
pub use record_id::{RecordId, RECORD_ID_LEN};

use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Width of a serialized page ID in bytes
pub const PAGE_ID_LEN: usize = 4;

/// Width of the meta word at the end of every tree page
pub const META_LEN: usize = 4;

/// Minimum number of keys a node limit may be capped to.
/// Below this the tree cannot split or merge meaningfully.
pub const MIN_KEYS: usize = 2;

/// Fanout caps for the tree, layered on top of the page-derived limits.
///
/// `None` means "as many entries as the page layout allows". Tests (and
/// visualization) set small caps to force splits and merges early.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeConfig {
    /// Maximum entries per leaf page
    pub max_leaf_entries: Option<usize>,
    /// Maximum keys per branch page
    pub max_branch_keys: Option<usize>,
}

impl TreeConfig {
    /// Cap both node kinds at the given numbers of entries
    pub fn new(max_leaf_entries: usize, max_branch_keys: usize) -> Self {
        Self {
            max_leaf_entries: Some(max_leaf_entries.max(MIN_KEYS)),
            max_branch_keys: Some(max_branch_keys.max(MIN_KEYS)),
        }
    }

    /// Use the page-derived limits only
    pub fn page_derived() -> Self {
        Self::default()
    }
}

/// Effective occupancy bounds for one index, combining the page-derived
/// limits with any [`TreeConfig`] caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLimits {
    /// Maximum entries per leaf
    pub leaf_max: usize,
    /// Minimum entries per non-root leaf
    pub leaf_min: usize,
    /// Maximum keys per branch
    pub branch_max: usize,
    /// Minimum keys per non-root branch
    pub branch_min: usize,
}

impl TreeLimits {
    /// Derive the bounds for a key of `key_len` bytes.
    ///
    /// A leaf must fit `2 * leaf_max` entries plus the two sibling links
    /// and the meta word; a branch must fit `branch_max` keys plus
    /// `branch_max + 1` child pointers and the meta word.
    pub fn derive(key_len: usize, config: &TreeConfig) -> Self {
        let entry = key_len + RECORD_ID_LEN;
        let leaf_derived = (PAGE_SIZE - 2 * PAGE_ID_LEN - META_LEN) / (2 * entry);
        let branch_derived = (PAGE_SIZE - META_LEN - PAGE_ID_LEN) / (key_len + PAGE_ID_LEN);

        let leaf_max = config
            .max_leaf_entries
            .map_or(leaf_derived, |cap| cap.min(leaf_derived))
            .max(MIN_KEYS);
        let branch_max = config
            .max_branch_keys
            .map_or(branch_derived, |cap| cap.min(branch_derived))
            .max(MIN_KEYS);

        Self {
            leaf_max,
            leaf_min: leaf_max / 2,
            branch_max,
            branch_min: branch_max / 2,
        }
    }
}
