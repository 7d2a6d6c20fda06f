//! # B+-Tree Index Engine
//!
//! A disk-based, buffer-pool-backed B+-tree index for relational
//! databases, mapping fixed-width search keys to record identifiers
//! (pointers into heap pages).
//!
//! ## Architecture
//!
//! The engine is composed of modular, swappable components:
//!
//! - **Page Layer** (`page`): raw page buffers with a positional codec
//! - **Storage Layer** (`storage`): disk I/O, file header, name registry
//! - **Buffer Pool** (`buffer`): LRU page cache with pin/unpin tracking
//! - **B+-Tree Layer** (`btree`): node primitives, tree algorithms, scans
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bptree_index::{Config, Database, Key, KeyType, RecordId, PageId};
//!
//! let db = Database::open(Config::new("my_database.db"))?;
//! let mut idx = db.create_index(Some("orders_pk"), KeyType::Int32)?;
//!
//! idx.insert(&Key::Int32(42), RecordId::new(PageId::new(7), 3))?;
//! let hit = idx.lookup(&Key::Int32(42))?;
//!
//! let mut scan = idx.scan()?;
//! while let Some((key, rid)) = scan.next()? {
//!     println!("{} -> {}", key, rid);
//! }
//! ```

pub mod btree;
pub mod buffer;
pub mod error;
pub mod keys;
pub mod page;
pub mod storage;
pub mod types;

pub use error::{IndexError, Result};
pub use keys::{Key, KeyType};
pub use types::{PageId, RecordId, TreeConfig, PAGE_SIZE};

// Re-export main public API
pub use btree::{BPlusTree, EqualScan, IndexScan};
pub use buffer::BufferPool;
pub use storage::{DiskManager, FileDiskManager};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Database configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database file
    pub path: PathBuf,
    /// Buffer pool size in number of pages (default: 1000)
    pub buffer_pool_size: usize,
    /// Whether to sync writes immediately (default: false for performance)
    pub sync_on_write: bool,
    /// Fanout caps applied to every index opened through this database
    pub tree_config: TreeConfig,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            buffer_pool_size: 1000,
            sync_on_write: false,
            tree_config: TreeConfig::default(),
        }
    }

    /// Set buffer pool size
    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    /// Enable sync on write for durability
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    /// Set tree fanout caps
    pub fn tree_config(mut self, config: TreeConfig) -> Self {
        self.tree_config = config;
        self
    }
}

/// Node type for visualization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Page ID
    pub page_id: u32,
    /// Whether this is a leaf node
    pub is_leaf: bool,
    /// Keys in this node
    pub keys: Vec<String>,
    /// Record ids (only for leaf nodes)
    pub values: Vec<String>,
    /// Child nodes (only for branch nodes)
    pub children: Vec<TreeNode>,
}

/// Main database handle owning the file and the buffer pool.
///
/// Indexes are created, opened, and dropped by name through this
/// handle; each open index is an independent [`BPlusTree`].
pub struct Database {
    buffer_pool: Arc<BufferPool>,
    #[allow(dead_code)]
    disk_manager: Arc<FileDiskManager>,
    config: Config,
}

impl Database {
    /// Open or create a database file at the configured path
    pub fn open(config: Config) -> Result<Self> {
        let disk_manager = Arc::new(FileDiskManager::open(&config.path, config.sync_on_write)?);
        let buffer_pool = Arc::new(BufferPool::new(
            disk_manager.clone(),
            config.buffer_pool_size,
        ));

        Ok(Self {
            buffer_pool,
            disk_manager,
            config,
        })
    }

    /// Create a new index over `key_type`.
    ///
    /// With a name the index is registered for reopening; without one
    /// it lives only as long as the returned handle.
    pub fn create_index(&self, name: Option<&str>, key_type: KeyType) -> Result<BPlusTree> {
        BPlusTree::create(
            Arc::clone(&self.buffer_pool),
            name,
            key_type,
            &self.config.tree_config,
        )
    }

    /// Open an existing named index
    pub fn open_index(&self, name: &str) -> Result<BPlusTree> {
        BPlusTree::open(
            Arc::clone(&self.buffer_pool),
            name,
            &self.config.tree_config,
        )
    }

    /// Drop a named index, freeing all of its pages
    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.open_index(name)?.delete()
    }

    /// Flush all dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }

    /// The buffer pool shared by every index of this database
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }
}

/// Statistics about one open index and the database backing it
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Total number of pages in the database file
    pub page_count: usize,
    /// Buffer pool capacity
    pub buffer_pool_size: usize,
    /// Height of the tree (1 for a single leaf)
    pub height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_basic_operations() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(Config::new(&path))?;
        let mut idx = db.create_index(Some("t_pk"), KeyType::Int32)?;

        let rid = RecordId::new(PageId::new(1), 1);
        idx.insert(&Key::Int32(1), rid)?;
        assert_eq!(idx.lookup(&Key::Int32(1))?, Some((Key::Int32(1), rid)));

        // Replace on duplicate
        let rid2 = RecordId::new(PageId::new(2), 2);
        idx.insert(&Key::Int32(1), rid2)?;
        assert_eq!(idx.lookup(&Key::Int32(1))?, Some((Key::Int32(1), rid2)));
        assert_eq!(idx.size(), 1);

        // Remove
        assert!(idx.remove(&Key::Int32(1), rid2)?);
        assert_eq!(idx.lookup(&Key::Int32(1))?, None);
        assert!(!idx.remove(&Key::Int32(1), rid2)?);

        Ok(())
    }

    #[test]
    fn test_scan_across_indexes() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(Config::new(&path).tree_config(TreeConfig::new(4, 4)))?;

        let mut a = db.create_index(Some("a"), KeyType::Int32)?;
        let mut b = db.create_index(Some("b"), KeyType::Bytes(2))?;

        for i in 0..10 {
            a.insert(&Key::Int32(i), RecordId::new(PageId::new(0), i as u32))?;
        }
        b.insert(&Key::Bytes(b"hi".to_vec()), RecordId::new(PageId::new(0), 0))?;

        let mut scan = a.scan()?;
        let mut count = 0;
        while scan.next()?.is_some() {
            count += 1;
        }
        assert_eq!(count, 10);
        assert_eq!(b.size(), 1);

        a.check_invariants()?;
        b.check_invariants()?;
        Ok(())
    }

    #[test]
    fn test_reopen_database() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let db = Database::open(Config::new(&path))?;
            let mut idx = db.create_index(Some("persistent"), KeyType::Int32)?;
            idx.insert(&Key::Int32(7), RecordId::new(PageId::new(3), 4))?;
            idx.close();
            db.flush()?;
        }

        {
            let db = Database::open(Config::new(&path))?;
            let idx = db.open_index("persistent")?;
            assert_eq!(idx.size(), 1);
            assert_eq!(
                idx.lookup(&Key::Int32(7))?,
                Some((Key::Int32(7), RecordId::new(PageId::new(3), 4)))
            );
        }

        Ok(())
    }

    #[test]
    fn test_drop_index() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(Config::new(&path))?;

        db.create_index(Some("gone"), KeyType::Int32)?.close();
        db.drop_index("gone")?;
        assert!(matches!(
            db.open_index("gone"),
            Err(IndexError::IndexNotFound(_))
        ));

        Ok(())
    }
}
