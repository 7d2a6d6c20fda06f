//! B+-tree core implementation.
//!
//! This module provides the [`BPlusTree`] index handle with operations
//! for point lookup, insert (replace on duplicate), remove, ordered
//! scans, and index lifecycle (create / open / delete / close).
//!
//! Insert and delete descend recursively, passing the parent's page id,
//! the child's position in the parent, and the parent's key count down
//! by value. A page is unpinned before recursing into its child and
//! re-pinned only when the child reports a split or an underflow, so at
//! most three pages are pinned at any moment: the current page, its
//! parent, and one sibling.

use crate::btree::cursor::{EqualScan, IndexScan};
use crate::btree::{branch, header, leaf};
use crate::buffer::{BufferPool, PagePin};
use crate::error::{IndexError, Result};
use crate::keys::{Key, KeyType};
use crate::types::{PageId, RecordId, TreeConfig, TreeLimits};
use crate::{IndexStats, TreeNode};
use std::sync::Arc;

/// Context a recursive call carries about the page above it
struct ParentCtx {
    /// Page id of the parent branch
    page_id: PageId,
    /// Position of the current page among the parent's children
    pos: usize,
    /// Key count of the parent at descent time
    num_keys: usize,
}

/// Outcome of a recursive remove
enum RemoveStatus {
    /// The key was not present
    NotFound,
    /// Removed; the subtree satisfies its occupancy bound
    Done,
    /// Removed, but the page fell below its minimum
    Underflow,
}

/// A disk-based B+-tree index mapping fixed-width keys to record ids
pub struct BPlusTree {
    /// Buffer pool for page access
    buffer_pool: Arc<BufferPool>,
    /// Header page, pinned for the whole open lifetime
    header: PagePin,
    /// Key type the index was created with
    key_type: KeyType,
    /// Occupancy bounds
    limits: TreeLimits,
    /// Registered name, if any
    name: Option<String>,
}

impl BPlusTree {
    /// Create a new index.
    ///
    /// A named index is registered in the file-entry registry; creating
    /// a name that already exists fails with
    /// [`IndexError::IndexAlreadyExists`]. The new tree consists of one
    /// empty leaf.
    pub fn create(
        buffer_pool: Arc<BufferPool>,
        name: Option<&str>,
        key_type: KeyType,
        config: &TreeConfig,
    ) -> Result<Self> {
        if let Some(name) = name {
            if buffer_pool.disk_manager().registry_get(name).is_some() {
                return Err(IndexError::IndexAlreadyExists(name.to_string()));
            }
        }

        let leaf_pin = buffer_pool.new_page()?;
        leaf::init(&mut leaf_pin.write());

        let header_pin = buffer_pool.new_page()?;
        header::init(&mut header_pin.write(), leaf_pin.id(), &key_type);

        if let Some(name) = name {
            if let Err(e) = buffer_pool
                .disk_manager()
                .registry_add(name, header_pin.id())
            {
                buffer_pool.free_page(leaf_pin)?;
                buffer_pool.free_page(header_pin)?;
                return Err(e);
            }
        }
        drop(leaf_pin);

        Ok(Self {
            limits: TreeLimits::derive(key_type.key_len(), config),
            buffer_pool,
            header: header_pin,
            key_type,
            name: name.map(String::from),
        })
    }

    /// Open an existing named index.
    ///
    /// Fails with [`IndexError::IndexNotFound`] if the registry does not
    /// know the name.
    pub fn open(buffer_pool: Arc<BufferPool>, name: &str, config: &TreeConfig) -> Result<Self> {
        let header_id = buffer_pool
            .disk_manager()
            .registry_get(name)
            .ok_or_else(|| IndexError::IndexNotFound(name.to_string()))?;

        let header_pin = buffer_pool.pin_page(header_id)?;
        let key_type = header::key_type(&header_pin.read())?;

        Ok(Self {
            limits: TreeLimits::derive(key_type.key_len(), config),
            buffer_pool,
            header: header_pin,
            key_type,
            name: Some(name.to_string()),
        })
    }

    /// Close the index, unpinning its header page.
    ///
    /// Dropping the handle has the same effect.
    pub fn close(self) {}

    /// Destroy the index: free every tree page and the header page, and
    /// deregister the name.
    pub fn delete(self) -> Result<()> {
        let root = self.root();
        self.free_subtree(root)?;
        if let Some(name) = &self.name {
            self.buffer_pool.disk_manager().registry_remove(name)?;
        }
        let BPlusTree {
            buffer_pool, header, ..
        } = self;
        buffer_pool.free_page(header)
    }

    /// Number of entries in the index
    pub fn size(&self) -> usize {
        header::entry_count(&self.header.read()) as usize
    }

    /// Key type the index was created with
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Registered name, if the index was created with one
    pub fn file_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current root page id
    pub fn root_page(&self) -> PageId {
        self.root()
    }

    /// Effective occupancy bounds of this index
    pub fn limits(&self) -> TreeLimits {
        self.limits
    }

    /// Get statistics about this index and the database backing it
    pub fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            page_count: self.buffer_pool.page_count(),
            buffer_pool_size: self.buffer_pool.capacity(),
            height: self.height()?,
        })
    }

    /// Height of the tree (1 for a single leaf)
    pub fn height(&self) -> Result<usize> {
        let mut height = 1;
        let mut cur = self.root();
        loop {
            let pin = self.buffer_pool.pin_page(cur)?;
            let page = pin.read();
            if page.is_leaf() {
                return Ok(height);
            }
            cur = branch::child_at(&page, 0);
            height += 1;
        }
    }

    /// Look up a key, returning its entry if present
    pub fn lookup(&self, key: &Key) -> Result<Option<(Key, RecordId)>> {
        self.key_type.check_key(key)?;

        let pin = self.search(key)?;
        let page = pin.read();
        match leaf::find(&page, &self.key_type, key) {
            Ok(pos) => Ok(Some((
                leaf::key_at(&page, &self.key_type, pos),
                leaf::rid_at(&page, &self.key_type, pos),
            ))),
            Err(_) => Ok(None),
        }
    }

    /// Insert an entry, replacing the record id of an existing key
    pub fn insert(&mut self, key: &Key, rid: RecordId) -> Result<()> {
        self.key_type.check_key(key)?;

        let root = self.root();
        if let Some((sep, right_id)) = self.insert_rec(root, None, key, rid)? {
            // Root split: the tree grows by one level
            let new_root = self.buffer_pool.new_page()?;
            {
                let mut page = new_root.write();
                branch::init(&mut page);
                branch::set_child(&mut page, 0, root);
                branch::insert_entry(&mut page, &self.key_type, 0, &sep, right_id);
            }
            header::set_root(&mut self.header.write(), new_root.id());
        }
        Ok(())
    }

    /// Remove a key if present, returning whether a removal occurred.
    ///
    /// Duplicates are never stored, so the record id is not needed to
    /// locate the entry; it is accepted for interface compatibility and
    /// ignored.
    pub fn remove(&mut self, key: &Key, _rid: RecordId) -> Result<bool> {
        self.key_type.check_key(key)?;

        let root = self.root();
        match self.remove_rec(root, None, key)? {
            RemoveStatus::NotFound => Ok(false),
            _ => Ok(true),
        }
    }

    /// Scan all entries in ascending key order
    pub fn scan(&self) -> Result<IndexScan> {
        let pin = self.first_leaf()?;
        IndexScan::new(Arc::clone(&self.buffer_pool), self.key_type, pin, 0)
    }

    /// Scan entries with key >= `key` in ascending order
    pub fn scan_from(&self, key: &Key) -> Result<IndexScan> {
        self.key_type.check_key(key)?;

        let pin = self.search(key)?;
        let pos = match leaf::find(&pin.read(), &self.key_type, key) {
            Ok(pos) => pos,
            Err(ins) => ins,
        };
        IndexScan::new(Arc::clone(&self.buffer_pool), self.key_type, pin, pos)
    }

    /// Scan the entries whose key equals `key`
    pub fn scan_equal(&self, key: &Key) -> Result<EqualScan> {
        Ok(EqualScan::new(self.scan_from(key)?, key.clone()))
    }

    /// Verify the structural invariants of the whole tree
    pub fn check_invariants(&self) -> Result<()> {
        crate::btree::check::verify(self)
    }

    /// Export the tree structure for visualization
    pub fn export_tree(&self) -> Result<TreeNode> {
        self.export_node(self.root())
    }

    pub(crate) fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub(crate) fn root(&self) -> PageId {
        header::root(&self.header.read())
    }

    fn bump_size(&self, delta: i32) {
        let mut page = self.header.write();
        let count = header::entry_count(&page) as i64 + delta as i64;
        header::set_entry_count(&mut page, count as u32);
    }

    /// Descend to the leaf whose key range contains `key`.
    ///
    /// One page is pinned at a time; the returned leaf stays pinned.
    fn search(&self, key: &Key) -> Result<PagePin> {
        let mut cur = self.root();
        loop {
            let pin = self.buffer_pool.pin_page(cur)?;
            let child = {
                let page = pin.read();
                if page.is_leaf() {
                    None
                } else {
                    let pos = branch::child_index_for(&page, &self.key_type, key);
                    Some(branch::child_at(&page, pos))
                }
            };
            match child {
                None => return Ok(pin),
                Some(child) => cur = child,
            }
        }
    }

    /// Descend to the leftmost leaf
    fn first_leaf(&self) -> Result<PagePin> {
        let mut cur = self.root();
        loop {
            let pin = self.buffer_pool.pin_page(cur)?;
            let child = {
                let page = pin.read();
                if page.is_leaf() {
                    None
                } else {
                    Some(branch::child_at(&page, 0))
                }
            };
            match child {
                None => return Ok(pin),
                Some(child) => cur = child,
            }
        }
    }

    // ---- insert ----

    /// Recursive insert.
    ///
    /// Returns `Some((separator, new_page_id))` if the page split.
    fn insert_rec(
        &self,
        page_id: PageId,
        parent: Option<&ParentCtx>,
        key: &Key,
        rid: RecordId,
    ) -> Result<Option<(Key, PageId)>> {
        let pin = self.buffer_pool.pin_page(page_id)?;

        if pin.read().is_leaf() {
            return self.leaf_insert(pin, parent, key, rid);
        }

        let (pos, child_id, num_keys) = {
            let page = pin.read();
            let pos = branch::child_index_for(&page, &self.key_type, key);
            (pos, branch::child_at(&page, pos), page.num_keys())
        };
        drop(pin);

        let ctx = ParentCtx {
            page_id,
            pos,
            num_keys,
        };
        match self.insert_rec(child_id, Some(&ctx), key, rid)? {
            None => Ok(None),
            Some((sep, new_child)) => {
                let pin = self.buffer_pool.pin_page(page_id)?;
                self.branch_insert(pin, parent, pos, sep, new_child)
            }
        }
    }

    /// Insert into a pinned leaf
    fn leaf_insert(
        &self,
        pin: PagePin,
        parent: Option<&ParentCtx>,
        key: &Key,
        rid: RecordId,
    ) -> Result<Option<(Key, PageId)>> {
        let kt = &self.key_type;
        let (existing, pos, k) = {
            let page = pin.read();
            match leaf::find(&page, kt, key) {
                Ok(pos) => (true, pos, page.num_keys()),
                Err(pos) => (false, pos, page.num_keys()),
            }
        };

        if existing {
            // Duplicate keys are not stored; replace the record id
            leaf::set_rid(&mut pin.write(), kt, pos, rid);
            return Ok(None);
        }

        self.bump_size(1);

        if k < self.limits.leaf_max {
            leaf::insert_entry(&mut pin.write(), kt, pos, key, rid);
            return Ok(None);
        }

        // Full leaf: try the next sibling, then the previous one
        if let Some(ctx) = parent {
            if ctx.pos < ctx.num_keys
                && self.try_leaf_redistribute_right(&pin, ctx, pos, key, rid)?
            {
                return Ok(None);
            }
            if ctx.pos > 0 && self.try_leaf_redistribute_left(&pin, ctx, pos, key, rid)? {
                return Ok(None);
            }
        }

        self.leaf_split(pin, pos, key, rid).map(Some)
    }

    /// Rotate entries into the next leaf to make room for the insert.
    ///
    /// Returns false when the sibling cannot absorb its share.
    fn try_leaf_redistribute_right(
        &self,
        pin: &PagePin,
        ctx: &ParentCtx,
        pos: usize,
        key: &Key,
        rid: RecordId,
    ) -> Result<bool> {
        let kt = &self.key_type;
        let (next_id, k) = {
            let page = pin.read();
            (leaf::next(&page), page.num_keys())
        };

        let next_pin = self.buffer_pool.pin_page(next_id)?;
        let k_next = next_pin.read().num_keys();
        if k <= k_next {
            return Ok(false);
        }

        let move_n = (k - k_next + 1) / 2;
        let k_left = k - move_n;
        let lands_right = pos >= k_left;
        if k_next + move_n + usize::from(lands_right) > self.limits.leaf_max {
            return Ok(false);
        }

        let parent_pin = self.buffer_pool.pin_page(ctx.page_id)?;
        {
            let mut right = next_pin.write();
            leaf::shift_up(&mut right, kt, move_n);
            let left = pin.read();
            leaf::copy_entries(&left, k_left, &mut right, 0, move_n, kt);
            right.set_meta(true, k_next + move_n);
        }
        pin.write().set_meta(true, k_left);

        if lands_right {
            leaf::insert_entry(&mut next_pin.write(), kt, pos - k_left, key, rid);
        } else {
            leaf::insert_entry(&mut pin.write(), kt, pos, key, rid);
        }

        let new_sep = leaf::key_at(&next_pin.read(), kt, 0);
        branch::set_key(&mut parent_pin.write(), kt, ctx.pos, &new_sep);
        Ok(true)
    }

    /// Mirror of [`try_leaf_redistribute_right`] toward the previous leaf
    fn try_leaf_redistribute_left(
        &self,
        pin: &PagePin,
        ctx: &ParentCtx,
        pos: usize,
        key: &Key,
        rid: RecordId,
    ) -> Result<bool> {
        let kt = &self.key_type;
        let (prev_id, k) = {
            let page = pin.read();
            (leaf::prev(&page), page.num_keys())
        };

        let prev_pin = self.buffer_pool.pin_page(prev_id)?;
        let k_prev = prev_pin.read().num_keys();
        if k <= k_prev {
            return Ok(false);
        }

        let move_n = (k - k_prev + 1) / 2;
        let lands_left = pos < move_n;
        if k_prev + move_n + usize::from(lands_left) > self.limits.leaf_max {
            return Ok(false);
        }

        let parent_pin = self.buffer_pool.pin_page(ctx.page_id)?;
        {
            let mut left = prev_pin.write();
            let right = pin.read();
            leaf::copy_entries(&right, 0, &mut left, k_prev, move_n, kt);
            left.set_meta(true, k_prev + move_n);
        }
        leaf::remove_head(&mut pin.write(), kt, move_n);

        if lands_left {
            leaf::insert_entry(&mut prev_pin.write(), kt, k_prev + pos, key, rid);
        } else {
            // pos == move_n lands at the seam and becomes the separator
            leaf::insert_entry(&mut pin.write(), kt, pos - move_n, key, rid);
        }

        let new_sep = leaf::key_at(&pin.read(), kt, 0);
        branch::set_key(&mut parent_pin.write(), kt, ctx.pos - 1, &new_sep);
        Ok(true)
    }

    /// Split a full leaf, placing the new entry, and return the
    /// separator and new right page for the parent.
    fn leaf_split(
        &self,
        pin: PagePin,
        pos: usize,
        key: &Key,
        rid: RecordId,
    ) -> Result<(Key, PageId)> {
        let kt = &self.key_type;
        let k = self.limits.leaf_max;
        let l_min = self.limits.leaf_min;

        let right_pin = self.buffer_pool.new_page()?;
        let old_next = {
            let mut right = right_pin.write();
            leaf::init(&mut right);
            let left = pin.read();
            leaf::copy_entries(&left, l_min, &mut right, 0, k - l_min, kt);
            right.set_meta(true, k - l_min);
            leaf::set_prev(&mut right, pin.id());
            let old_next = leaf::next(&left);
            leaf::set_next(&mut right, old_next);
            old_next
        };
        {
            let mut left = pin.write();
            left.set_meta(true, l_min);
            leaf::set_next(&mut left, right_pin.id());
        }
        if old_next.is_valid() {
            let next_pin = self.buffer_pool.pin_page(old_next)?;
            leaf::set_prev(&mut next_pin.write(), right_pin.id());
        }

        if pos < l_min {
            leaf::insert_entry(&mut pin.write(), kt, pos, key, rid);
        } else {
            leaf::insert_entry(&mut right_pin.write(), kt, pos - l_min, key, rid);
        }

        let sep = leaf::key_at(&right_pin.read(), kt, 0);
        Ok((sep, right_pin.id()))
    }

    /// Insert a separator from a child split into a pinned branch
    fn branch_insert(
        &self,
        pin: PagePin,
        parent: Option<&ParentCtx>,
        pos: usize,
        sep: Key,
        new_child: PageId,
    ) -> Result<Option<(Key, PageId)>> {
        let k = pin.read().num_keys();

        if k < self.limits.branch_max {
            branch::insert_entry(&mut pin.write(), &self.key_type, pos, &sep, new_child);
            return Ok(None);
        }

        // Full branch: try the previous sibling, then the next one
        if let Some(ctx) = parent {
            if ctx.pos > 0 && self.try_branch_redistribute_left(&pin, ctx, pos, &sep, new_child)? {
                return Ok(None);
            }
            if ctx.pos < ctx.num_keys
                && self.try_branch_redistribute_right(&pin, ctx, pos, &sep, new_child)?
            {
                return Ok(None);
            }
        }

        self.branch_split(pin, pos, sep, new_child).map(Some)
    }

    /// Move head entries of this full branch into its left sibling and
    /// place the new separator on the correct side of the seam.
    fn try_branch_redistribute_left(
        &self,
        pin: &PagePin,
        ctx: &ParentCtx,
        pos: usize,
        m_key: &Key,
        new_child: PageId,
    ) -> Result<bool> {
        let kt = &self.key_type;
        let sep_idx = ctx.pos - 1;

        let parent_pin = self.buffer_pool.pin_page(ctx.page_id)?;
        let left_id = branch::child_at(&parent_pin.read(), ctx.pos - 1);
        let left_pin = self.buffer_pool.pin_page(left_id)?;

        let k = pin.read().num_keys();
        let k_l = left_pin.read().num_keys();
        if k <= k_l {
            return Ok(false);
        }
        let move_n = (k - k_l + 1) / 2;
        let sep = branch::key_at(&parent_pin.read(), kt, sep_idx);

        if pos >= move_n {
            // New entry stays on this page
            self.rotate_branch_left(&parent_pin, sep_idx, &left_pin, pin, move_n);
            branch::insert_entry(&mut pin.write(), kt, pos - move_n, m_key, new_child);
        } else if pos == move_n - 1 {
            // Seam: the new key becomes the parent separator and its
            // child becomes this page's leading child
            {
                let mut left = left_pin.write();
                let cur = pin.read();
                branch::insert_entry(&mut left, kt, k_l, &sep, branch::child_at(&cur, 0));
                branch::copy_entries(&cur, 0, &mut left, k_l + 1, pos, kt);
                left.set_meta(false, k_l + 1 + pos);
            }
            branch::set_key(&mut parent_pin.write(), kt, sep_idx, m_key);
            branch::remove_head(&mut pin.write(), kt, pos);
            branch::set_child(&mut pin.write(), 0, new_child);
        } else {
            // New entry migrates into the left sibling
            {
                let mut left = left_pin.write();
                let cur = pin.read();
                branch::insert_entry(&mut left, kt, k_l, &sep, branch::child_at(&cur, 0));
                branch::copy_entries(&cur, 0, &mut left, k_l + 1, pos, kt);
                left.set_meta(false, k_l + 1 + pos);
                branch::insert_entry(&mut left, kt, k_l + 1 + pos, m_key, new_child);
                let rest = move_n - 2 - pos;
                branch::copy_entries(&cur, pos, &mut left, k_l + 2 + pos, rest, kt);
                left.set_meta(false, k_l + move_n);
            }
            let promoted = branch::key_at(&pin.read(), kt, move_n - 2);
            branch::set_key(&mut parent_pin.write(), kt, sep_idx, &promoted);
            branch::remove_head(&mut pin.write(), kt, move_n - 1);
        }
        Ok(true)
    }

    /// Mirror of [`try_branch_redistribute_left`] toward the next sibling
    fn try_branch_redistribute_right(
        &self,
        pin: &PagePin,
        ctx: &ParentCtx,
        pos: usize,
        m_key: &Key,
        new_child: PageId,
    ) -> Result<bool> {
        let kt = &self.key_type;
        let sep_idx = ctx.pos;

        let parent_pin = self.buffer_pool.pin_page(ctx.page_id)?;
        let right_id = branch::child_at(&parent_pin.read(), ctx.pos + 1);
        let right_pin = self.buffer_pool.pin_page(right_id)?;

        let k = pin.read().num_keys();
        let k_r = right_pin.read().num_keys();
        if k <= k_r {
            return Ok(false);
        }
        let move_n = (k - k_r + 1) / 2;
        // Keys this page keeps once the dust settles
        let keep = k + 1 - move_n;
        let sep = branch::key_at(&parent_pin.read(), kt, sep_idx);

        if pos < keep {
            self.rotate_branch_right(&parent_pin, sep_idx, pin, &right_pin, move_n);
            branch::insert_entry(&mut pin.write(), kt, pos, m_key, new_child);
        } else if pos == keep {
            // Seam: the new key is promoted and its child leads the sibling
            {
                let mut right = right_pin.write();
                let cur = pin.read();
                branch::shift_up(&mut right, kt, move_n);
                branch::set_child(&mut right, 0, new_child);
                branch::copy_entries(&cur, pos, &mut right, 0, k - pos, kt);
                branch::set_key(&mut right, kt, move_n - 1, &sep);
                right.set_meta(false, k_r + move_n);
            }
            branch::set_key(&mut parent_pin.write(), kt, sep_idx, m_key);
            pin.write().set_meta(false, pos);
        } else {
            // New entry migrates into the right sibling
            let promoted = branch::key_at(&pin.read(), kt, keep);
            {
                let mut right = right_pin.write();
                let cur = pin.read();
                branch::shift_up(&mut right, kt, move_n);
                branch::set_child(&mut right, 0, branch::child_at(&cur, keep + 1));
                let lead = pos - keep - 1;
                branch::copy_entries(&cur, keep + 1, &mut right, 0, lead, kt);
                branch::set_key(&mut right, kt, lead, m_key);
                branch::set_child(&mut right, lead + 1, new_child);
                branch::copy_entries(&cur, pos, &mut right, lead + 1, k - pos, kt);
                branch::set_key(&mut right, kt, move_n - 1, &sep);
                right.set_meta(false, k_r + move_n);
            }
            branch::set_key(&mut parent_pin.write(), kt, sep_idx, &promoted);
            pin.write().set_meta(false, keep);
        }
        Ok(true)
    }

    /// Split a full branch at the minimum-occupancy seam.
    fn branch_split(
        &self,
        pin: PagePin,
        pos: usize,
        m_key: Key,
        new_child: PageId,
    ) -> Result<(Key, PageId)> {
        let kt = &self.key_type;
        let s = self.limits.branch_min;
        let k = self.limits.branch_max;

        let right_pin = self.buffer_pool.new_page()?;
        let promoted = {
            let mut right = right_pin.write();
            branch::init(&mut right);
            let cur = pin.read();
            if pos < s {
                // New entry lands left of the seam; K[s-1] is promoted
                let promoted = branch::key_at(&cur, kt, s - 1);
                branch::set_child(&mut right, 0, branch::child_at(&cur, s));
                branch::copy_entries(&cur, s, &mut right, 0, k - s, kt);
                right.set_meta(false, k - s);
                promoted
            } else if pos == s {
                // New entry is the seam itself; its key is promoted
                branch::set_child(&mut right, 0, new_child);
                branch::copy_entries(&cur, s, &mut right, 0, k - s, kt);
                right.set_meta(false, k - s);
                m_key.clone()
            } else {
                // New entry lands right of the seam; K[s] is promoted
                let promoted = branch::key_at(&cur, kt, s);
                branch::set_child(&mut right, 0, branch::child_at(&cur, s + 1));
                let lead = pos - s - 1;
                branch::copy_entries(&cur, s + 1, &mut right, 0, lead, kt);
                branch::set_key(&mut right, kt, lead, &m_key);
                branch::set_child(&mut right, lead + 1, new_child);
                branch::copy_entries(&cur, pos, &mut right, lead + 1, k - pos, kt);
                right.set_meta(false, k - s);
                promoted
            }
        };

        if pos < s {
            pin.write().set_meta(false, s - 1);
            branch::insert_entry(&mut pin.write(), kt, pos, &m_key, new_child);
        } else {
            pin.write().set_meta(false, s);
        }

        Ok((promoted, right_pin.id()))
    }

    // ---- remove ----

    /// Recursive remove
    fn remove_rec(
        &self,
        page_id: PageId,
        parent: Option<&ParentCtx>,
        key: &Key,
    ) -> Result<RemoveStatus> {
        let pin = self.buffer_pool.pin_page(page_id)?;

        if pin.read().is_leaf() {
            let pos = match leaf::find(&pin.read(), &self.key_type, key) {
                Ok(pos) => pos,
                Err(_) => return Ok(RemoveStatus::NotFound),
            };
            leaf::delete_entry(&mut pin.write(), &self.key_type, pos);
            self.bump_size(-1);

            let k = pin.read().num_keys();
            return if parent.is_some() && k < self.limits.leaf_min {
                Ok(RemoveStatus::Underflow)
            } else {
                Ok(RemoveStatus::Done)
            };
        }

        let (pos, child_id, num_keys) = {
            let page = pin.read();
            let pos = branch::child_index_for(&page, &self.key_type, key);
            (pos, branch::child_at(&page, pos), page.num_keys())
        };
        drop(pin);

        let ctx = ParentCtx {
            page_id,
            pos,
            num_keys,
        };
        match self.remove_rec(child_id, Some(&ctx), key)? {
            RemoveStatus::Underflow => {
                let pin = self.buffer_pool.pin_page(page_id)?;
                self.fix_underflow(pin, parent, pos, child_id)
            }
            status => Ok(status),
        }
    }

    /// Bring an underflowed child back above its minimum: steal from the
    /// left sibling, then the right one, then merge (preferring left).
    fn fix_underflow(
        &self,
        pin: PagePin,
        parent: Option<&ParentCtx>,
        pos: usize,
        child_id: PageId,
    ) -> Result<RemoveStatus> {
        let kt = &self.key_type;
        let child_pin = self.buffer_pool.pin_page(child_id)?;
        let (child_is_leaf, k_child) = {
            let page = child_pin.read();
            (page.is_leaf(), page.num_keys())
        };

        if pos > 0 {
            let left_id = branch::child_at(&pin.read(), pos - 1);
            let left_pin = self.buffer_pool.pin_page(left_id)?;
            let k_left = left_pin.read().num_keys();
            let move_n = k_left.saturating_sub(k_child) / 2;
            if move_n > 0 {
                if child_is_leaf {
                    self.rotate_leaf_right(&pin, pos - 1, &left_pin, &child_pin, move_n);
                } else {
                    self.rotate_branch_right(&pin, pos - 1, &left_pin, &child_pin, move_n);
                }
                return Ok(RemoveStatus::Done);
            }
        }

        let num_keys = pin.read().num_keys();
        if pos < num_keys {
            let right_id = branch::child_at(&pin.read(), pos + 1);
            let right_pin = self.buffer_pool.pin_page(right_id)?;
            let k_right = right_pin.read().num_keys();
            let move_n = k_right.saturating_sub(k_child) / 2;
            if move_n > 0 {
                if child_is_leaf {
                    self.rotate_leaf_left(&pin, pos, &child_pin, &right_pin, move_n);
                } else {
                    self.rotate_branch_left(&pin, pos, &child_pin, &right_pin, move_n);
                }
                return Ok(RemoveStatus::Done);
            }
        }

        // Both siblings are at their minimum: merge
        let (sep_idx, left_pin, right_pin) = if pos > 0 {
            let left_id = branch::child_at(&pin.read(), pos - 1);
            (pos - 1, self.buffer_pool.pin_page(left_id)?, child_pin)
        } else {
            let right_id = branch::child_at(&pin.read(), pos + 1);
            (pos, child_pin, self.buffer_pool.pin_page(right_id)?)
        };

        if child_is_leaf {
            self.merge_leaves(&left_pin, right_pin)?;
        } else {
            self.merge_branches(&pin, sep_idx, &left_pin, right_pin)?;
        }
        drop(left_pin);

        branch::delete_entry(&mut pin.write(), kt, sep_idx);
        let k_after = pin.read().num_keys();

        if parent.is_none() {
            if k_after == 0 {
                // The root branch lost its last separator: its single
                // remaining child becomes the new root
                let new_root = branch::child_at(&pin.read(), 0);
                header::set_root(&mut self.header.write(), new_root);
                self.buffer_pool.free_page(pin)?;
            }
            return Ok(RemoveStatus::Done);
        }

        if k_after < self.limits.branch_min {
            Ok(RemoveStatus::Underflow)
        } else {
            Ok(RemoveStatus::Done)
        }
    }

    // ---- rotations (shared by insert redistribution and delete stealing) ----

    /// Move the first `n` entries of `right` to the tail of `left`
    fn rotate_leaf_left(&self, parent: &PagePin, sep_idx: usize, left: &PagePin, right: &PagePin, n: usize) {
        let kt = &self.key_type;
        let k_l = left.read().num_keys();
        {
            let mut dst = left.write();
            let src = right.read();
            leaf::copy_entries(&src, 0, &mut dst, k_l, n, kt);
            dst.set_meta(true, k_l + n);
        }
        leaf::remove_head(&mut right.write(), kt, n);

        let new_sep = leaf::key_at(&right.read(), kt, 0);
        branch::set_key(&mut parent.write(), kt, sep_idx, &new_sep);
    }

    /// Move the last `n` entries of `left` to the head of `right`
    fn rotate_leaf_right(&self, parent: &PagePin, sep_idx: usize, left: &PagePin, right: &PagePin, n: usize) {
        let kt = &self.key_type;
        let k_l = left.read().num_keys();
        let k_r = right.read().num_keys();
        {
            let mut dst = right.write();
            leaf::shift_up(&mut dst, kt, n);
            let src = left.read();
            leaf::copy_entries(&src, k_l - n, &mut dst, 0, n, kt);
            dst.set_meta(true, k_r + n);
        }
        left.write().set_meta(true, k_l - n);

        let new_sep = leaf::key_at(&right.read(), kt, 0);
        branch::set_key(&mut parent.write(), kt, sep_idx, &new_sep);
    }

    /// Move the first `n` entries of branch `right` into `left`.
    ///
    /// The parent separator descends into `left` paired with `right`'s
    /// leading child; `right.K[n-1]` is promoted in its place.
    fn rotate_branch_left(&self, parent: &PagePin, sep_idx: usize, left: &PagePin, right: &PagePin, n: usize) {
        let kt = &self.key_type;
        let k_l = left.read().num_keys();
        let sep = branch::key_at(&parent.read(), kt, sep_idx);
        {
            let mut dst = left.write();
            let src = right.read();
            branch::insert_entry(&mut dst, kt, k_l, &sep, branch::child_at(&src, 0));
            branch::copy_entries(&src, 0, &mut dst, k_l + 1, n - 1, kt);
            dst.set_meta(false, k_l + n);
        }
        let new_sep = branch::key_at(&right.read(), kt, n - 1);
        branch::set_key(&mut parent.write(), kt, sep_idx, &new_sep);
        branch::remove_head(&mut right.write(), kt, n);
    }

    /// Move the last `n` entries of branch `left` into `right`.
    ///
    /// The parent separator descends as `right`'s key at `n-1` paired
    /// with `right`'s old leading child; `left.K[k-n]` is promoted.
    fn rotate_branch_right(&self, parent: &PagePin, sep_idx: usize, left: &PagePin, right: &PagePin, n: usize) {
        let kt = &self.key_type;
        let k_l = left.read().num_keys();
        let k_r = right.read().num_keys();
        let sep = branch::key_at(&parent.read(), kt, sep_idx);
        {
            let mut dst = right.write();
            let src = left.read();
            branch::shift_up(&mut dst, kt, n);
            branch::set_child(&mut dst, 0, branch::child_at(&src, k_l - n + 1));
            branch::copy_entries(&src, k_l - n + 1, &mut dst, 0, n - 1, kt);
            branch::set_key(&mut dst, kt, n - 1, &sep);
            dst.set_meta(false, k_r + n);
        }
        let promoted = branch::key_at(&left.read(), kt, k_l - n);
        branch::set_key(&mut parent.write(), kt, sep_idx, &promoted);
        left.write().set_meta(false, k_l - n);
    }

    // ---- merges ----

    /// Append `right`'s entries to `left`, bridge the leaf chain, and
    /// free `right`.
    fn merge_leaves(&self, left: &PagePin, right: PagePin) -> Result<()> {
        let kt = &self.key_type;
        let k_l = left.read().num_keys();
        let k_r = right.read().num_keys();
        {
            let mut dst = left.write();
            let src = right.read();
            leaf::copy_entries(&src, 0, &mut dst, k_l, k_r, kt);
            dst.set_meta(true, k_l + k_r);
        }

        let next_id = leaf::next(&right.read());
        leaf::set_next(&mut left.write(), next_id);
        let left_id = left.id();
        self.buffer_pool.free_page(right)?;

        if next_id.is_valid() {
            let next_pin = self.buffer_pool.pin_page(next_id)?;
            leaf::set_prev(&mut next_pin.write(), left_id);
        }
        Ok(())
    }

    /// Pull the parent separator down into `left`, append `right`'s
    /// entries, and free `right`.
    fn merge_branches(
        &self,
        parent: &PagePin,
        sep_idx: usize,
        left: &PagePin,
        right: PagePin,
    ) -> Result<()> {
        let kt = &self.key_type;
        let sep = branch::key_at(&parent.read(), kt, sep_idx);
        let k_l = left.read().num_keys();
        let k_r = right.read().num_keys();
        {
            let mut dst = left.write();
            let src = right.read();
            branch::insert_entry(&mut dst, kt, k_l, &sep, branch::child_at(&src, 0));
            branch::copy_entries(&src, 0, &mut dst, k_l + 1, k_r, kt);
            dst.set_meta(false, k_l + 1 + k_r);
        }
        self.buffer_pool.free_page(right)
    }

    // ---- teardown / export ----

    /// Post-order walk freeing every page of a subtree
    fn free_subtree(&self, page_id: PageId) -> Result<()> {
        let pin = self.buffer_pool.pin_page(page_id)?;
        if !pin.read().is_leaf() {
            let children: Vec<PageId> = {
                let page = pin.read();
                (0..=page.num_keys())
                    .map(|i| branch::child_at(&page, i))
                    .collect()
            };
            for child in children {
                self.free_subtree(child)?;
            }
        }
        self.buffer_pool.free_page(pin)
    }

    fn export_node(&self, page_id: PageId) -> Result<TreeNode> {
        let pin = self.buffer_pool.pin_page(page_id)?;
        let kt = &self.key_type;

        let (is_leaf, keys, values, child_ids) = {
            let page = pin.read();
            let k = page.num_keys();
            if page.is_leaf() {
                let keys = (0..k).map(|i| leaf::key_at(&page, kt, i).to_string()).collect();
                let values = (0..k).map(|i| leaf::rid_at(&page, kt, i).to_string()).collect();
                (true, keys, values, Vec::new())
            } else {
                let keys = (0..k).map(|i| branch::key_at(&page, kt, i).to_string()).collect();
                let child_ids = (0..=k).map(|i| branch::child_at(&page, i)).collect();
                (false, keys, Vec::new(), child_ids)
            }
        };
        drop(pin);

        let mut children = Vec::with_capacity(child_ids.len());
        for child_id in child_ids {
            children.push(self.export_node(child_id)?);
        }

        Ok(TreeNode {
            page_id: page_id.value(),
            is_leaf,
            keys,
            values,
            children,
        })
    }
}
