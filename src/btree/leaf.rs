//! Leaf-node operations.
//!
//! Leaf entries are (key, record id) pairs packed from offset 0 at a
//! fixed width of `key_len + 8` bytes. The two page ids just before the
//! meta word link the leaf level into a doubly-linked list in ascending
//! key order: prev at `PAGE_SIZE - 12`, next at `PAGE_SIZE - 8`.

use crate::keys::{Key, KeyType};
use crate::page::PageBuf;
use crate::types::{PageId, RecordId, META_LEN, PAGE_ID_LEN, PAGE_SIZE, RECORD_ID_LEN};
use std::cmp::Ordering;

/// Byte offset of the previous-leaf pointer
const PREV_OFFSET: usize = PAGE_SIZE - META_LEN - 2 * PAGE_ID_LEN;

/// Byte offset of the next-leaf pointer
const NEXT_OFFSET: usize = PAGE_SIZE - META_LEN - PAGE_ID_LEN;

/// Width of one leaf entry
fn entry_len(kt: &KeyType) -> usize {
    kt.key_len() + RECORD_ID_LEN
}

/// Byte offset of entry `i`
fn entry_off(kt: &KeyType, i: usize) -> usize {
    i * entry_len(kt)
}

/// Initialize an empty leaf page with invalid sibling links
pub fn init(page: &mut PageBuf) {
    page.set_meta(true, 0);
    page.write_page_id(PREV_OFFSET, PageId::INVALID);
    page.write_page_id(NEXT_OFFSET, PageId::INVALID);
}

/// Read the key of entry `i`
pub fn key_at(page: &PageBuf, kt: &KeyType, i: usize) -> Key {
    kt.read(page.as_bytes(), entry_off(kt, i))
}

/// Read the record id of entry `i`
pub fn rid_at(page: &PageBuf, kt: &KeyType, i: usize) -> RecordId {
    page.read_record_id(entry_off(kt, i) + kt.key_len())
}

/// Overwrite the record id of entry `i`, leaving the key in place
pub fn set_rid(page: &mut PageBuf, kt: &KeyType, i: usize, rid: RecordId) {
    page.write_record_id(entry_off(kt, i) + kt.key_len(), rid);
}

/// Previous leaf in the chain
pub fn prev(page: &PageBuf) -> PageId {
    page.read_page_id(PREV_OFFSET)
}

/// Next leaf in the chain
pub fn next(page: &PageBuf) -> PageId {
    page.read_page_id(NEXT_OFFSET)
}

pub fn set_prev(page: &mut PageBuf, id: PageId) {
    page.write_page_id(PREV_OFFSET, id);
}

pub fn set_next(page: &mut PageBuf, id: PageId) {
    page.write_page_id(NEXT_OFFSET, id);
}

/// Insert an entry at `pos`, shifting later entries right.
///
/// Updates the meta word.
pub fn insert_entry(page: &mut PageBuf, kt: &KeyType, pos: usize, key: &Key, rid: RecordId) {
    let k = page.num_keys();
    let el = entry_len(kt);

    if k > pos {
        page.shift(pos * el, (pos + 1) * el, (k - pos) * el);
    }
    let off = entry_off(kt, pos);
    kt.write(page.as_bytes_mut(), off, key);
    page.write_record_id(off + kt.key_len(), rid);
    page.set_meta(true, k + 1);
}

/// Delete the entry at `pos`, shifting later entries left.
///
/// Updates the meta word.
pub fn delete_entry(page: &mut PageBuf, kt: &KeyType, pos: usize) {
    let k = page.num_keys();
    let el = entry_len(kt);

    if k > pos + 1 {
        page.shift((pos + 1) * el, pos * el, (k - pos - 1) * el);
    }
    page.set_meta(true, k - 1);
}

/// Copy `n` entries from `src[src_pos..]` into `dst` at `dst_pos`.
///
/// The meta words are written by callers.
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
    let el = entry_len(kt);
    dst.copy_from(dst_pos * el, src, src_pos * el, n * el);
}

/// Drop the first `n` entries, shifting the rest to the head.
///
/// Updates the meta word.
pub fn remove_head(page: &mut PageBuf, kt: &KeyType, n: usize) {
    let k = page.num_keys();
    let el = entry_len(kt);

    if n == 0 {
        return;
    }
    if k > n {
        page.shift(n * el, 0, (k - n) * el);
    }
    page.set_meta(true, k - n);
}

/// Open `n` entry slots at the head of the page.
///
/// The vacated slots and the meta word are written by callers.
pub fn shift_up(page: &mut PageBuf, kt: &KeyType, n: usize) {
    let k = page.num_keys();
    let el = entry_len(kt);

    if n == 0 || k == 0 {
        return;
    }
    page.shift(0, n * el, k * el);
}

/// Binary search for `key` among the page's entries.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(slot: u32) -> RecordId {
        RecordId::new(PageId::new(0), slot)
    }

    fn leaf_with(kt: &KeyType, keys: &[i32]) -> PageBuf {
        let mut page = PageBuf::new();
        init(&mut page);
        for (i, &v) in keys.iter().enumerate() {
            insert_entry(&mut page, kt, i, &Key::Int32(v), rid(v as u32));
        }
        page
    }

    #[test]
    fn test_init_links_invalid() {
        let mut page = PageBuf::new();
        init(&mut page);
        assert!(page.is_leaf());
        assert_eq!(page.num_keys(), 0);
        assert!(!prev(&page).is_valid());
        assert!(!next(&page).is_valid());
    }

    #[test]
    fn test_insert_and_read_entries() {
        let kt = KeyType::Int32;
        let mut page = leaf_with(&kt, &[10, 30]);

        insert_entry(&mut page, &kt, 1, &Key::Int32(20), rid(20));

        assert_eq!(page.num_keys(), 3);
        for (i, v) in [10, 20, 30].iter().enumerate() {
            assert_eq!(key_at(&page, &kt, i), Key::Int32(*v));
            assert_eq!(rid_at(&page, &kt, i), rid(*v as u32));
        }
    }

    #[test]
    fn test_delete_entry() {
        let kt = KeyType::Int32;
        let mut page = leaf_with(&kt, &[10, 20, 30]);

        delete_entry(&mut page, &kt, 0);

        assert_eq!(page.num_keys(), 2);
        assert_eq!(key_at(&page, &kt, 0), Key::Int32(20));
        assert_eq!(key_at(&page, &kt, 1), Key::Int32(30));
    }

    #[test]
    fn test_set_rid_overwrites_in_place() {
        let kt = KeyType::Int32;
        let mut page = leaf_with(&kt, &[5]);

        set_rid(&mut page, &kt, 0, RecordId::new(PageId::new(9), 9));
        assert_eq!(key_at(&page, &kt, 0), Key::Int32(5));
        assert_eq!(rid_at(&page, &kt, 0), RecordId::new(PageId::new(9), 9));
        assert_eq!(page.num_keys(), 1);
    }

    #[test]
    fn test_block_moves() {
        let kt = KeyType::Int32;
        let src = leaf_with(&kt, &[1, 2, 3, 4]);
        let mut dst = PageBuf::new();
        init(&mut dst);

        copy_entries(&src, 2, &mut dst, 0, 2, &kt);
        dst.set_meta(true, 2);
        assert_eq!(key_at(&dst, &kt, 0), Key::Int32(3));
        assert_eq!(key_at(&dst, &kt, 1), Key::Int32(4));

        let mut page = leaf_with(&kt, &[1, 2, 3, 4]);
        remove_head(&mut page, &kt, 3);
        assert_eq!(page.num_keys(), 1);
        assert_eq!(key_at(&page, &kt, 0), Key::Int32(4));

        shift_up(&mut page, &kt, 2);
        let head = leaf_with(&kt, &[1, 2]);
        copy_entries(&head, 0, &mut page, 0, 2, &kt);
        page.set_meta(true, 3);
        assert_eq!(key_at(&page, &kt, 0), Key::Int32(1));
        assert_eq!(key_at(&page, &kt, 1), Key::Int32(2));
        assert_eq!(key_at(&page, &kt, 2), Key::Int32(4));
    }

    #[test]
    fn test_find() {
        let kt = KeyType::Int32;
        let page = leaf_with(&kt, &[10, 20, 30]);

        assert_eq!(find(&page, &kt, &Key::Int32(10)), Ok(0));
        assert_eq!(find(&page, &kt, &Key::Int32(30)), Ok(2));
        assert_eq!(find(&page, &kt, &Key::Int32(5)), Err(0));
        assert_eq!(find(&page, &kt, &Key::Int32(25)), Err(2));
        assert_eq!(find(&page, &kt, &Key::Int32(35)), Err(3));
    }

    #[test]
    fn test_sibling_links() {
        let mut page = PageBuf::new();
        init(&mut page);
        set_prev(&mut page, PageId::new(3));
        set_next(&mut page, PageId::new(4));
        assert_eq!(prev(&page), PageId::new(3));
        assert_eq!(next(&page), PageId::new(4));
    }
}
