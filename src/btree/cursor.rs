//! Ordered scans over the leaf level.
//!
//! A scan holds one pinned leaf and a position within it. Advancing
//! past the last entry of a leaf follows the next-leaf pointer: the old
//! leaf is unpinned, the next one pinned, and the position reset to 0.
//! Closing (or dropping) a scan releases its pin.

use crate::btree::leaf;
use crate::buffer::{BufferPool, PagePin};
use crate::error::Result;
use crate::keys::{Key, KeyType};
use crate::types::{PageId, RecordId};
use std::sync::Arc;

/// Iterator over index entries in ascending key order
pub struct IndexScan {
    buffer_pool: Arc<BufferPool>,
    key_type: KeyType,
    /// Currently pinned leaf; None once closed
    current: Option<PagePin>,
    /// Position of the next entry within the current leaf
    pos: usize,
    /// Saved starting point for [`restart`](IndexScan::restart)
    start: (PageId, usize),
}

impl IndexScan {
    /// Build a scan positioned on `pin` at `pos`.
    ///
    /// A start position past the leaf's last entry is normalized onto
    /// the next leaf, so an exhausted position always means the scan is
    /// done.
    pub(crate) fn new(
        buffer_pool: Arc<BufferPool>,
        key_type: KeyType,
        pin: PagePin,
        pos: usize,
    ) -> Result<Self> {
        let mut current = pin;
        let mut pos = pos;
        loop {
            let (k, next_id) = {
                let page = current.read();
                (page.num_keys(), leaf::next(&page))
            };
            if pos < k || !next_id.is_valid() {
                break;
            }
            current = buffer_pool.pin_page(next_id)?;
            pos = 0;
        }

        Ok(Self {
            start: (current.id(), pos),
            buffer_pool,
            key_type,
            current: Some(current),
            pos,
        })
    }

    /// Whether another entry is available
    pub fn has_next(&self) -> bool {
        match &self.current {
            Some(pin) => self.pos < pin.read().num_keys(),
            None => false,
        }
    }

    /// Return the next entry, or `None` when the scan is exhausted
    pub fn next(&mut self) -> Result<Option<(Key, RecordId)>> {
        let Some(pin) = &self.current else {
            return Ok(None);
        };

        let (entry, k, next_id) = {
            let page = pin.read();
            if self.pos >= page.num_keys() {
                return Ok(None);
            }
            let entry = (
                leaf::key_at(&page, &self.key_type, self.pos),
                leaf::rid_at(&page, &self.key_type, self.pos),
            );
            (entry, page.num_keys(), leaf::next(&page))
        };

        self.pos += 1;
        if self.pos >= k && next_id.is_valid() {
            self.current = Some(self.buffer_pool.pin_page(next_id)?);
            self.pos = 0;
        }

        Ok(Some(entry))
    }

    /// Key of the entry `next` would return, if any
    pub(crate) fn peek_key(&self) -> Option<Key> {
        let pin = self.current.as_ref()?;
        let page = pin.read();
        if self.pos < page.num_keys() {
            Some(leaf::key_at(&page, &self.key_type, self.pos))
        } else {
            None
        }
    }

    /// Re-pin the saved start leaf and reset to the start position
    pub fn restart(&mut self) -> Result<()> {
        self.current = Some(self.buffer_pool.pin_page(self.start.0)?);
        self.pos = self.start.1;
        Ok(())
    }

    /// Release the pinned leaf; further calls yield no entries
    pub fn close(&mut self) {
        self.current = None;
    }
}

/// Iterator over the entries whose key equals a target key
pub struct EqualScan {
    inner: IndexScan,
    key: Key,
}

impl EqualScan {
    pub(crate) fn new(inner: IndexScan, key: Key) -> Self {
        Self { inner, key }
    }

    /// Whether another entry with the target key is available
    pub fn has_next(&self) -> bool {
        self.inner.peek_key().is_some_and(|k| k == self.key)
    }

    /// Return the next matching entry, or `None` once the key differs
    pub fn next(&mut self) -> Result<Option<(Key, RecordId)>> {
        if !self.has_next() {
            return Ok(None);
        }
        self.inner.next()
    }

    /// Re-pin the saved start position
    pub fn restart(&mut self) -> Result<()> {
        self.inner.restart()
    }

    /// Release the pinned leaf
    pub fn close(&mut self) {
        self.inner.close()
    }
}
