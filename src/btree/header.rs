//! Index header page.
//!
//! Every index owns exactly one header page, pinned for as long as the
//! index is open. Layout:
//! ```text
//! Offset  Size  Description
//! 0       4     Root page id
//! 4       4     Entry count (total keys in the index)
//! 8       3     Serialized key-type descriptor
//! ```

use crate::error::Result;
use crate::keys::KeyType;
use crate::page::PageBuf;
use crate::types::PageId;

const ROOT_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 4;
const KEY_TYPE_OFFSET: usize = 8;

/// Initialize a fresh header page
pub fn init(page: &mut PageBuf, root: PageId, key_type: &KeyType) {
    page.write_page_id(ROOT_OFFSET, root);
    page.write_u32(COUNT_OFFSET, 0);
    key_type.write_descriptor(page.as_bytes_mut(), KEY_TYPE_OFFSET);
}

/// Root page id of the tree
pub fn root(page: &PageBuf) -> PageId {
    page.read_page_id(ROOT_OFFSET)
}

pub fn set_root(page: &mut PageBuf, root: PageId) {
    page.write_page_id(ROOT_OFFSET, root);
}

/// Total number of keys in the index
pub fn entry_count(page: &PageBuf) -> u32 {
    page.read_u32(COUNT_OFFSET)
}

pub fn set_entry_count(page: &mut PageBuf, count: u32) {
    page.write_u32(COUNT_OFFSET, count);
}

/// Key type the index was created with
pub fn key_type(page: &PageBuf) -> Result<KeyType> {
    KeyType::read_descriptor(page.as_bytes(), KEY_TYPE_OFFSET)
}
