//! Buffer pool implementation.
//!
//! The buffer pool manages a fixed number of in-memory page frames,
//! caching pages read from disk and writing dirty frames back. Tree
//! code never touches the disk manager directly; it pins pages here,
//! reads or writes the pinned buffer, and lets the pin guard release
//! the frame.
//!
//! Eviction is least-recently-used: every pin and unpin stamps the
//! frame with a tick from a shared access clock, and the victim is the
//! unpinned frame with the oldest stamp.

use crate::error::{IndexError, Result};
use crate::page::PageBuf;
use crate::storage::DiskManager;
use crate::types::PageId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A frame in the buffer pool
struct BufferFrame {
    /// The page data
    buf: PageBuf,
    /// Whether the frame has been modified since it was read
    dirty: bool,
    /// Pin count (number of live [`PagePin`] guards)
    pin_count: u32,
    /// Access-clock stamp of the most recent pin or unpin
    last_used: u64,
}

/// Buffer pool over a disk manager
pub struct BufferPool {
    /// The disk manager for I/O
    disk_manager: Arc<dyn DiskManager>,
    /// Cached frames indexed by page ID
    frames: RwLock<HashMap<PageId, Arc<RwLock<BufferFrame>>>>,
    /// Access clock; shared with pin guards so an unpin can stamp the
    /// frame it releases
    ticks: Arc<AtomicU64>,
    /// Maximum number of frames
    capacity: usize,
}

impl BufferPool {
    /// Create a new buffer pool
    pub fn new(disk_manager: Arc<dyn DiskManager>, capacity: usize) -> Self {
        Self {
            disk_manager,
            frames: RwLock::new(HashMap::with_capacity(capacity)),
            ticks: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// The disk manager backing this pool
    pub fn disk_manager(&self) -> &Arc<dyn DiskManager> {
        &self.disk_manager
    }

    fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }

    /// Pin an existing page by id.
    ///
    /// The page stays in memory until the returned guard is dropped.
    pub fn pin_page(&self, page_id: PageId) -> Result<PagePin> {
        let frame = self.get_frame(page_id)?;
        {
            let mut f = frame.write();
            f.pin_count += 1;
            f.last_used = self.tick();
        }
        Ok(PagePin {
            page_id,
            frame,
            ticks: Arc::clone(&self.ticks),
        })
    }

    /// Allocate a fresh page, returned pinned and zeroed.
    pub fn new_page(&self) -> Result<PagePin> {
        let page_id = self.disk_manager.allocate_page()?;

        {
            let frames = self.frames.read();
            if frames.len() >= self.capacity {
                drop(frames);
                self.evict_one()?;
            }
        }

        let frame = Arc::new(RwLock::new(BufferFrame {
            buf: PageBuf::new(),
            dirty: true,
            pin_count: 1,
            last_used: self.tick(),
        }));

        {
            let mut frames = self.frames.write();
            frames.insert(page_id, Arc::clone(&frame));
        }

        Ok(PagePin {
            page_id,
            frame,
            ticks: Arc::clone(&self.ticks),
        })
    }

    /// Release a pinned page and deallocate it.
    ///
    /// The page id must not be pinned anywhere else.
    pub fn free_page(&self, pin: PagePin) -> Result<()> {
        let page_id = pin.page_id;
        drop(pin);

        {
            let mut frames = self.frames.write();
            frames.remove(&page_id);
        }

        self.disk_manager.deallocate_page(page_id)
    }

    /// Flush a specific page to disk
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frames = self.frames.read();
        if let Some(frame) = frames.get(&page_id) {
            let mut frame_guard = frame.write();
            if frame_guard.dirty {
                self.disk_manager
                    .write_page(page_id, frame_guard.buf.as_bytes())?;
                frame_guard.dirty = false;
            }
        }
        Ok(())
    }

    /// Flush all dirty frames to disk
    pub fn flush_all(&self) -> Result<()> {
        let frames = self.frames.read();
        for (&page_id, frame) in frames.iter() {
            let mut frame_guard = frame.write();
            if frame_guard.dirty {
                self.disk_manager
                    .write_page(page_id, frame_guard.buf.as_bytes())?;
                frame_guard.dirty = false;
            }
        }
        self.disk_manager.sync()?;
        Ok(())
    }

    /// Total number of pages in the database file
    pub fn page_count(&self) -> usize {
        self.disk_manager.page_count()
    }

    /// Buffer pool capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of pin counts across all frames.
    ///
    /// An open index keeps exactly its header page pinned between
    /// operations; tests use this as the pin-balance oracle.
    pub fn pinned_page_count(&self) -> usize {
        let frames = self.frames.read();
        frames
            .values()
            .map(|frame| frame.read().pin_count as usize)
            .sum()
    }

    /// Get or load a frame for a page
    fn get_frame(&self, page_id: PageId) -> Result<Arc<RwLock<BufferFrame>>> {
        {
            let frames = self.frames.read();
            if let Some(frame) = frames.get(&page_id) {
                return Ok(Arc::clone(frame));
            }
        }

        self.load_page(page_id)
    }

    /// Load a page from disk into the buffer pool
    fn load_page(&self, page_id: PageId) -> Result<Arc<RwLock<BufferFrame>>> {
        let buf = self.disk_manager.read_page(page_id)?;

        {
            let frames = self.frames.read();
            if frames.len() >= self.capacity {
                drop(frames);
                self.evict_one()?;
            }
        }

        let frame = Arc::new(RwLock::new(BufferFrame {
            buf,
            dirty: false,
            pin_count: 0,
            last_used: self.tick(),
        }));
        {
            let mut frames = self.frames.write();
            frames.insert(page_id, Arc::clone(&frame));
        }

        Ok(frame)
    }

    /// Evict the unpinned frame with the oldest access stamp
    fn evict_one(&self) -> Result<()> {
        let victim = {
            let frames = self.frames.read();
            let mut victim: Option<(PageId, u64)> = None;
            for (&page_id, frame) in frames.iter() {
                let frame = frame.read();
                if frame.pin_count > 0 {
                    continue;
                }
                if victim.is_none() || victim.is_some_and(|(_, used)| frame.last_used < used) {
                    victim = Some((page_id, frame.last_used));
                }
            }
            victim
        };

        let Some((page_id, _)) = victim else {
            // Every frame is pinned
            return Err(IndexError::BufferPoolExhausted);
        };

        // Write back if dirty
        self.flush_page(page_id)?;

        let mut frames = self.frames.write();
        frames.remove(&page_id);
        Ok(())
    }
}

/// RAII pin on a buffer frame.
///
/// Holding a pin keeps the page in memory. Dropping it releases the pin;
/// the frame is written back as dirty only if [`write`](PagePin::write)
/// was taken at least once while any pin was held.
pub struct PagePin {
    page_id: PageId,
    frame: Arc<RwLock<BufferFrame>>,
    ticks: Arc<AtomicU64>,
}

impl PagePin {
    /// Get the page ID
    pub fn id(&self) -> PageId {
        self.page_id
    }

    /// Read access to the page buffer
    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.read(),
        }
    }

    /// Write access to the page buffer; marks the frame dirty
    pub fn write(&self) -> PageRefMut<'_> {
        let mut guard = self.frame.write();
        guard.dirty = true;
        PageRefMut { guard }
    }
}

impl Drop for PagePin {
    fn drop(&mut self) {
        let mut frame = self.frame.write();
        frame.pin_count = frame.pin_count.saturating_sub(1);
        frame.last_used = self.ticks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared reference to a pinned page buffer
pub struct PageRef<'a> {
    guard: RwLockReadGuard<'a, BufferFrame>,
}

impl std::ops::Deref for PageRef<'_> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        &self.guard.buf
    }
}

/// Mutable reference to a pinned page buffer
pub struct PageRefMut<'a> {
    guard: RwLockWriteGuard<'a, BufferFrame>,
}

impl std::ops::Deref for PageRefMut<'_> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        &self.guard.buf
    }
}

impl std::ops::DerefMut for PageRefMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.buf
    }
}
