//! Buffer pool: in-memory page cache with least-recently-used eviction.
//!
//! The buffer pool caches pages in memory to reduce disk I/O and hands
//! out RAII pin guards that keep a page's frame resident while tree
//! code works on it. Unpinned frames are evicted oldest-access-first
//! when the pool is full.

mod pool;

pub use pool::{BufferPool, PagePin, PageRef, PageRefMut};
