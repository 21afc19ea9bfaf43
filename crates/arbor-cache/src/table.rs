//! Cache table: pin/unpin access to pages of open tree files.

use crate::file::{CacheFile, CacheFileId};
use crate::frame::{CacheFrame, CachePage, PageKey};
use crate::replacer::{ClockReplacer, Replacer};
use arbor_common::config::MIN_CACHE_BYTES;
use arbor_common::{ArborError, CacheConfig, DiskOff, Result};
use bytes::Bytes;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use sysinfo::System;

/// Statistics about the cache table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of resident pages.
    pub pages: usize,
    /// Number of pinned pages.
    pub pinned_pages: usize,
    /// Number of dirty pages.
    pub dirty_pages: usize,
    /// Summed serialized size of resident pages.
    pub size_current: usize,
    /// Soft capacity in bytes.
    pub capacity: usize,
}

struct TableInner<P> {
    /// Resident pages.
    frames: HashMap<PageKey, CacheFrame<P>>,
    /// Summed `size` of every frame.
    size_current: usize,
}

/// Cache of typed pages over any number of open files.
///
/// Pages are reached only through [`CacheTable::get_and_pin`] and
/// [`CacheTable::put`], which hand out a [`PinnedPage`]. The pin is released
/// by [`PinnedPage::unpin`] or, on any other exit path, when the guard drops.
/// Unpinned pages are evicted by clock order once the summed page size
/// exceeds the configured capacity; dirty victims are written back first.
pub struct CacheTable<P: CachePage> {
    /// Configuration.
    config: CacheConfig,
    /// Open files by ID.
    files: Mutex<HashMap<CacheFileId, Arc<CacheFile>>>,
    /// Next file ID to hand out.
    next_file_id: AtomicU32,
    /// Frames and size accounting.
    inner: Mutex<TableInner<P>>,
    /// Page replacement policy.
    replacer: ClockReplacer<PageKey>,
}

impl<P: CachePage> CacheTable<P> {
    /// Creates a new cache table.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            files: Mutex::new(HashMap::new()),
            next_file_id: AtomicU32::new(1),
            inner: Mutex::new(TableInner {
                frames: HashMap::new(),
                size_current: 0,
            }),
            replacer: ClockReplacer::new(),
        }
    }

    /// Creates a cache table sized to 25% of available system RAM.
    ///
    /// Never smaller than [`MIN_CACHE_BYTES`].
    pub fn auto_sized() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let capacity_bytes = (available_bytes / 4).max(MIN_CACHE_BYTES);

        Self::new(CacheConfig { capacity_bytes })
    }

    /// Returns the capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.config.capacity_bytes
    }

    /// Opens an existing file and registers it with the table.
    pub fn open_file(&self, path: &Path) -> Result<Arc<CacheFile>> {
        let id = CacheFileId(self.next_file_id.fetch_add(1, Ordering::Relaxed));
        let file = Arc::new(CacheFile::open(id, path)?);
        self.files.lock().insert(id, Arc::clone(&file));
        tracing::debug!(%id, path = %path.display(), "Opened cache file");
        Ok(file)
    }

    /// Returns the open file with the given ID.
    pub fn file(&self, id: CacheFileId) -> Option<Arc<CacheFile>> {
        self.files.lock().get(&id).cloned()
    }

    /// Returns the number of open files.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Checks if a page is resident.
    pub fn contains(&self, file: &CacheFile, location: DiskOff) -> bool {
        self.inner
            .lock()
            .frames
            .contains_key(&PageKey::new(file.id(), location))
    }

    /// Pins a page, fetching it from disk if it is not resident.
    ///
    /// Fails with `PageAlreadyPinned` if another pin is outstanding, and
    /// propagates fetch errors (`PageNotFound`, `PageCorrupted`, decode
    /// errors) unchanged.
    pub fn get_and_pin(&self, file: &CacheFile, location: DiskOff) -> Result<PinnedPage<'_, P>> {
        let key = PageKey::new(file.id(), location);

        {
            let mut inner = self.inner.lock();
            if let Some(frame) = inner.frames.get_mut(&key) {
                let guard = frame
                    .page
                    .try_lock_arc()
                    .ok_or(ArborError::PageAlreadyPinned { location: location.0 })?;
                frame.pin_count += 1;
                self.replacer.set_evictable(key, false);
                self.replacer.record_access(key);
                return Ok(PinnedPage::new(self, key, guard));
            }
        }

        let data = file.read_block(location)?;
        let page = P::decode(location, &data)?;
        self.install(key, page, false)
    }

    /// Installs a freshly built page, pinned, without fetching.
    ///
    /// A resident unpinned page at the same location is replaced; a pinned
    /// one is an error.
    pub fn put(&self, file: &CacheFile, location: DiskOff, page: P) -> Result<PinnedPage<'_, P>> {
        self.install(PageKey::new(file.id(), location), page, true)
    }

    fn install(&self, key: PageKey, page: P, dirty: bool) -> Result<PinnedPage<'_, P>> {
        let size = page.serialized_size();
        let page = Arc::new(Mutex::new(page));
        let guard = page.lock_arc();

        let mut inner = self.inner.lock();
        if let Some(old) = inner.frames.get(&key) {
            if old.is_pinned() {
                return Err(ArborError::PageAlreadyPinned {
                    location: key.location.0,
                });
            }
            let old_size = old.size;
            inner.frames.remove(&key);
            inner.size_current -= old_size;
            self.replacer.remove(key);
        }

        self.evict_if_needed(&mut inner, size)?;

        inner.frames.insert(key, CacheFrame::pinned(page, size, dirty));
        inner.size_current += size;
        self.replacer.set_evictable(key, false);

        Ok(PinnedPage::new(self, key, guard))
    }

    /// Releases one pin, recording the page's current size.
    fn release(&self, key: PageKey, dirty: bool, size: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let frame = inner
            .frames
            .get_mut(&key)
            .filter(|frame| frame.is_pinned())
            .ok_or(ArborError::PageNotPinned {
                location: key.location.0,
            })?;

        frame.pin_count -= 1;
        frame.dirty |= dirty;
        inner.size_current = inner.size_current - frame.size + size;
        frame.size = size;

        if !frame.is_pinned() {
            self.replacer.set_evictable(key, true);
        }
        Ok(())
    }

    /// Evicts unpinned pages until `incoming` more bytes fit.
    ///
    /// Stops early when nothing is evictable; pinned pages are never
    /// touched, so the table may run over capacity.
    fn evict_if_needed(&self, inner: &mut TableInner<P>, incoming: usize) -> Result<()> {
        while inner.size_current + incoming > self.config.capacity_bytes {
            let Some(victim) = self.replacer.evict() else {
                tracing::debug!(
                    size_current = inner.size_current,
                    capacity = self.config.capacity_bytes,
                    "Cache over capacity with nothing evictable"
                );
                break;
            };

            let Some(frame) = inner.frames.get(&victim) else {
                continue;
            };
            if frame.dirty {
                if let Err(e) = self.write_back(victim, frame) {
                    self.replacer.set_evictable(victim, true);
                    return Err(e);
                }
            }

            if let Some(frame) = inner.frames.remove(&victim) {
                inner.size_current -= frame.size;
            }
        }
        Ok(())
    }

    /// Writes an unpinned frame to its file.
    fn write_back(&self, key: PageKey, frame: &CacheFrame<P>) -> Result<()> {
        let file = self.file(key.file).ok_or_else(|| {
            ArborError::Internal(format!("no open file for {}", key))
        })?;
        let payload = encode_for_write(key, &*frame.page.lock())?;
        file.write_block(key.location, &payload)
    }

    /// Writes every dirty, unpinned page of `file`.
    ///
    /// Returns the number of pages written.
    pub fn flush_file(&self, file: &CacheFile) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut flushed = 0;

        for (key, frame) in inner.frames.iter_mut() {
            if key.file != file.id() || !frame.dirty || frame.is_pinned() {
                continue;
            }
            let payload = encode_for_write(*key, &*frame.page.lock())?;
            file.write_block(key.location, &payload)?;
            frame.dirty = false;
            flushed += 1;
        }

        Ok(flushed)
    }

    /// Flushes and forgets every page of `file`, then closes it.
    ///
    /// Fails with `PinLeak` if any page of the file is still pinned.
    pub fn close_file(&self, file: &CacheFile) -> Result<()> {
        let pinned = {
            let inner = self.inner.lock();
            inner
                .frames
                .iter()
                .filter(|(key, frame)| key.file == file.id() && frame.is_pinned())
                .count()
        };
        if pinned > 0 {
            return Err(ArborError::PinLeak { count: pinned });
        }

        self.flush_file(file)?;

        {
            let mut inner = self.inner.lock();
            let keys: Vec<PageKey> = inner
                .frames
                .keys()
                .filter(|key| key.file == file.id())
                .copied()
                .collect();
            for key in keys {
                if let Some(frame) = inner.frames.remove(&key) {
                    inner.size_current -= frame.size;
                }
                self.replacer.remove(key);
            }
        }

        file.sync()?;
        self.files.lock().remove(&file.id());
        tracing::debug!(id = %file.id(), "Closed cache file");
        Ok(())
    }

    /// Closes every open file.
    pub fn close(&self) -> Result<()> {
        let files: Vec<Arc<CacheFile>> = self.files.lock().values().cloned().collect();
        for file in files {
            self.close_file(&file)?;
        }
        Ok(())
    }

    /// Returns the number of pinned pages.
    pub fn pinned_count(&self) -> usize {
        self.inner
            .lock()
            .frames
            .values()
            .filter(|frame| frame.is_pinned())
            .count()
    }

    /// Returns statistics about the cache table.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            pages: inner.frames.len(),
            pinned_pages: inner.frames.values().filter(|f| f.is_pinned()).count(),
            dirty_pages: inner.frames.values().filter(|f| f.dirty).count(),
            size_current: inner.size_current,
            capacity: self.config.capacity_bytes,
        }
    }
}

/// Encodes a page for write-back, refusing blocks past its limit.
fn encode_for_write<P: CachePage>(key: PageKey, page: &P) -> Result<Bytes> {
    let payload = page.encode();
    if let Some(limit) = page.block_limit() {
        let size = CacheFile::block_size(payload.len());
        if size > limit {
            return Err(ArborError::PageTooLarge {
                location: key.location.0,
                size,
                limit,
            });
        }
    }
    Ok(payload)
}

/// Exclusive, scoped access to one pinned page.
///
/// Mutable access marks the page dirty. Call [`PinnedPage::unpin`] to
/// release the pin and observe errors; dropping the guard releases it too.
pub struct PinnedPage<'a, P: CachePage> {
    table: &'a CacheTable<P>,
    key: PageKey,
    page: ArcMutexGuard<RawMutex, P>,
    modified: bool,
    released: bool,
}

impl<'a, P: CachePage> PinnedPage<'a, P> {
    fn new(table: &'a CacheTable<P>, key: PageKey, page: ArcMutexGuard<RawMutex, P>) -> Self {
        Self {
            table,
            key,
            page,
            modified: false,
            released: false,
        }
    }

    /// Returns the page location.
    pub fn location(&self) -> DiskOff {
        self.key.location
    }

    /// Returns the owning file's ID.
    pub fn file_id(&self) -> CacheFileId {
        self.key.file
    }

    /// Returns true if the page was mutably borrowed through this pin.
    pub fn is_dirty(&self) -> bool {
        self.modified
    }

    /// Releases the pin, reporting the page's current serialized size.
    pub fn unpin(mut self, dirty: bool) -> Result<()> {
        let size = self.page.serialized_size();
        self.released = true;
        self.table.release(self.key, dirty || self.modified, size)
    }
}

impl<P: CachePage> Deref for PinnedPage<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.page
    }
}

impl<P: CachePage> DerefMut for PinnedPage<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.modified = true;
        &mut self.page
    }
}

impl<P: CachePage> Drop for PinnedPage<'_, P> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let size = self.page.serialized_size();
        if let Err(e) = self.table.release(self.key, self.modified, size) {
            tracing::warn!(page = %self.key, error = %e, "Failed to release pin on drop");
        }
    }
}
