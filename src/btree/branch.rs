//! Branch-node operations.
//!
//! A branch page stores k keys growing from offset 0 and k+1 child
//! pointers growing backward from just before the meta word, so
//! `K[i]` sits at `i * key_len` and `C[i]` at
//! `PAGE_SIZE - 4 - (i + 1) * 4`. Key `K[i]` is the smallest key in the
//! subtree rooted at `C[i+1]`; subtree `C[i]` covers `[K[i-1], K[i])`.
//!
//! These are positional primitives: callers guarantee bounds and, for
//! the block operations, fix up the meta word themselves.

use crate::keys::{Key, KeyType};
use crate::page::PageBuf;
use crate::types::{PageId, META_LEN, PAGE_ID_LEN, PAGE_SIZE};
use std::cmp::Ordering;

/// Byte offset of key `i`
fn key_off(kt: &KeyType, i: usize) -> usize {
    i * kt.key_len()
}

/// Byte offset of child pointer `i`
fn child_off(i: usize) -> usize {
    PAGE_SIZE - META_LEN - (i + 1) * PAGE_ID_LEN
}

/// Initialize an empty branch page
pub fn init(page: &mut PageBuf) {
    page.set_meta(false, 0);
}

/// Read key `i`
pub fn key_at(page: &PageBuf, kt: &KeyType, i: usize) -> Key {
    kt.read(page.as_bytes(), key_off(kt, i))
}

/// Write key `i`
pub fn set_key(page: &mut PageBuf, kt: &KeyType, i: usize, key: &Key) {
    let off = key_off(kt, i);
    kt.write(page.as_bytes_mut(), off, key);
}

/// Read child pointer `i`
pub fn child_at(page: &PageBuf, i: usize) -> PageId {
    page.read_page_id(child_off(i))
}

/// Write child pointer `i`
pub fn set_child(page: &mut PageBuf, i: usize, child: PageId) {
    page.write_page_id(child_off(i), child);
}

/// Insert a key at `pos` with its right child at `pos + 1`.
///
/// Updates the meta word.
pub fn insert_entry(page: &mut PageBuf, kt: &KeyType, pos: usize, key: &Key, child: PageId) {
    let k = page.num_keys();
    let kl = kt.key_len();

    // Shift keys K[pos..k) one slot right
    if k > pos {
        page.shift(pos * kl, (pos + 1) * kl, (k - pos) * kl);
    }
    // Shift children C[pos+1..=k] one slot outward; the child region
    // grows toward lower offsets, so the block moves down by one width
    if k > pos {
        page.shift(child_off(k), child_off(k + 1), (k - pos) * PAGE_ID_LEN);
    }

    set_key(page, kt, pos, key);
    set_child(page, pos + 1, child);
    page.set_meta(false, k + 1);
}

/// Delete the key at `pos` and its right child at `pos + 1`.
///
/// Updates the meta word.
pub fn delete_entry(page: &mut PageBuf, kt: &KeyType, pos: usize) {
    let k = page.num_keys();
    let kl = kt.key_len();

    if k > pos + 1 {
        page.shift((pos + 1) * kl, pos * kl, (k - pos - 1) * kl);
        page.shift(child_off(k), child_off(k - 1), (k - pos - 1) * PAGE_ID_LEN);
    }
    page.set_meta(false, k - 1);
}

/// Copy `n` keys `K[src_pos..src_pos+n)` and their trailing children
/// `C[src_pos+1..=src_pos+n]` into `dst` at `dst_pos`.
///
/// The destination's leading child and meta word are written by callers.
pub fn copy_entries(
    src: &PageBuf,
    src_pos: usize,
    dst: &mut PageBuf,
    dst_pos: usize,
    n: usize,
    kt: &KeyType,
) {
    if n == 0 {
        return;
    }
    let kl = kt.key_len();
    dst.copy_from(dst_pos * kl, src, src_pos * kl, n * kl);
    dst.copy_from(
        child_off(dst_pos + n),
        src,
        child_off(src_pos + n),
        n * PAGE_ID_LEN,
    );
}

/// Drop the first `n` keys and the first `n` children, so the old
/// `C[n]` becomes the leading child.
///
/// Updates the meta word.
pub fn remove_head(page: &mut PageBuf, kt: &KeyType, n: usize) {
    let k = page.num_keys();
    let kl = kt.key_len();

    if n == 0 {
        return;
    }
    page.shift(n * kl, 0, (k - n) * kl);
    page.shift(child_off(k), child_off(k - n), (k - n + 1) * PAGE_ID_LEN);
    page.set_meta(false, k - n);
}

/// Open `n` key slots and `n` child slots at the head of the page.
///
/// Existing keys move to `K[n..]`, children to `C[n..]`; the vacated
/// slots and the meta word are written by callers.
pub fn shift_up(page: &mut PageBuf, kt: &KeyType, n: usize) {
    let k = page.num_keys();
    let kl = kt.key_len();

    if n == 0 {
        return;
    }
    if k > 0 {
        page.shift(0, n * kl, k * kl);
    }
    page.shift(child_off(k), child_off(k + n), (k + 1) * PAGE_ID_LEN);
}

/// Binary search for `key` among the page's keys.
///
/// Returns `Ok(i)` on an exact match, `Err(ins)` with the insertion
/// point otherwise.
pub fn find(page: &PageBuf, kt: &KeyType, key: &Key) -> std::result::Result<usize, usize> {
    let mut low = 0;
    let mut high = page.num_keys();

    while low < high {
        let mid = low + (high - low) / 2;
        match kt.compare(key, &key_at(page, kt, mid)) {
            Ordering::Less => high = mid,
            Ordering::Greater => low = mid + 1,
            Ordering::Equal => return Ok(mid),
        }
    }

    Err(low)
}

/// Index of the child to descend into for `key`.
///
/// An exact match on `K[i]` descends into `C[i+1]`, the subtree whose
/// minimum is `K[i]`; a miss descends at the insertion point.
pub fn child_index_for(page: &PageBuf, kt: &KeyType, key: &Key) -> usize {
    match find(page, kt, key) {
        Ok(i) => i + 1,
        Err(ins) => ins,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: i32) -> Key {
        Key::Int32(v)
    }

    fn branch_with(kt: &KeyType, keys: &[i32]) -> PageBuf {
        let mut page = PageBuf::new();
        init(&mut page);
        set_child(&mut page, 0, PageId::new(100));
        for (i, &v) in keys.iter().enumerate() {
            insert_entry(&mut page, kt, i, &key(v), PageId::new(101 + i as u32));
        }
        page
    }

    #[test]
    fn test_insert_entry_layout() {
        let kt = KeyType::Int32;
        let page = branch_with(&kt, &[10, 20, 30]);

        assert_eq!(page.num_keys(), 3);
        assert!(!page.is_leaf());
        assert_eq!(key_at(&page, &kt, 0), key(10));
        assert_eq!(key_at(&page, &kt, 2), key(30));
        assert_eq!(child_at(&page, 0), PageId::new(100));
        assert_eq!(child_at(&page, 3), PageId::new(103));

        // Keys at the head of the page, children mirrored at the tail
        assert_eq!(&page.as_bytes()[0..4], &10i32.to_be_bytes());
        assert_eq!(
            &page.as_bytes()[PAGE_SIZE - 8..PAGE_SIZE - 4],
            &100u32.to_be_bytes()
        );
    }

    #[test]
    fn test_insert_in_middle_shifts_both_regions() {
        let kt = KeyType::Int32;
        let mut page = branch_with(&kt, &[10, 30]);

        insert_entry(&mut page, &kt, 1, &key(20), PageId::new(200));

        assert_eq!(page.num_keys(), 3);
        assert_eq!(key_at(&page, &kt, 0), key(10));
        assert_eq!(key_at(&page, &kt, 1), key(20));
        assert_eq!(key_at(&page, &kt, 2), key(30));
        assert_eq!(child_at(&page, 0), PageId::new(100));
        assert_eq!(child_at(&page, 1), PageId::new(101));
        assert_eq!(child_at(&page, 2), PageId::new(200));
        assert_eq!(child_at(&page, 3), PageId::new(102));
    }

    #[test]
    fn test_delete_entry() {
        let kt = KeyType::Int32;
        let mut page = branch_with(&kt, &[10, 20, 30]);

        delete_entry(&mut page, &kt, 1);

        assert_eq!(page.num_keys(), 2);
        assert_eq!(key_at(&page, &kt, 0), key(10));
        assert_eq!(key_at(&page, &kt, 1), key(30));
        assert_eq!(child_at(&page, 0), PageId::new(100));
        assert_eq!(child_at(&page, 1), PageId::new(101));
        assert_eq!(child_at(&page, 2), PageId::new(103));
    }

    #[test]
    fn test_copy_entries_preserves_pairing() {
        let kt = KeyType::Int32;
        let src = branch_with(&kt, &[10, 20, 30, 40]);
        let mut dst = PageBuf::new();
        init(&mut dst);

        set_child(&mut dst, 0, child_at(&src, 2));
        copy_entries(&src, 2, &mut dst, 0, 2, &kt);
        dst.set_meta(false, 2);

        assert_eq!(key_at(&dst, &kt, 0), key(30));
        assert_eq!(key_at(&dst, &kt, 1), key(40));
        assert_eq!(child_at(&dst, 0), PageId::new(102));
        assert_eq!(child_at(&dst, 1), PageId::new(103));
        assert_eq!(child_at(&dst, 2), PageId::new(104));
    }

    #[test]
    fn test_remove_head() {
        let kt = KeyType::Int32;
        let mut page = branch_with(&kt, &[10, 20, 30]);

        remove_head(&mut page, &kt, 2);

        assert_eq!(page.num_keys(), 1);
        assert_eq!(key_at(&page, &kt, 0), key(30));
        assert_eq!(child_at(&page, 0), PageId::new(102));
        assert_eq!(child_at(&page, 1), PageId::new(103));
    }

    #[test]
    fn test_shift_up_then_fill() {
        let kt = KeyType::Int32;
        let mut page = branch_with(&kt, &[30, 40]);

        shift_up(&mut page, &kt, 1);
        set_key(&mut page, &kt, 0, &key(20));
        set_child(&mut page, 0, PageId::new(90));
        page.set_meta(false, 3);

        assert_eq!(key_at(&page, &kt, 0), key(20));
        assert_eq!(key_at(&page, &kt, 1), key(30));
        assert_eq!(key_at(&page, &kt, 2), key(40));
        assert_eq!(child_at(&page, 0), PageId::new(90));
        assert_eq!(child_at(&page, 1), PageId::new(100));
        assert_eq!(child_at(&page, 3), PageId::new(102));
    }

    #[test]
    fn test_find_and_descent() {
        let kt = KeyType::Int32;
        let page = branch_with(&kt, &[10, 20, 30]);

        assert_eq!(find(&page, &kt, &key(20)), Ok(1));
        assert_eq!(find(&page, &kt, &key(15)), Err(1));
        assert_eq!(find(&page, &kt, &key(5)), Err(0));
        assert_eq!(find(&page, &kt, &key(35)), Err(3));

        // Exact match descends to the right of the key
        assert_eq!(child_index_for(&page, &kt, &key(20)), 2);
        assert_eq!(child_index_for(&page, &kt, &key(15)), 1);
        assert_eq!(child_index_for(&page, &kt, &key(5)), 0);
        assert_eq!(child_index_for(&page, &kt, &key(99)), 3);
    }
}
