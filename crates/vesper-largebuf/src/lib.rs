#![forbid(unsafe_code)]

//! Segmented out-of-line storage for values too large to live inside a
//! tree node.
//!
//! A large buffer is a singly-linked chain of overflow pages. Logical
//! content is contiguous; physically it occupies global offsets
//! `[head_offset, head_offset + len)` of the segment grid, so the buffer
//! can grow and shrink at either end by allocating or freeing whole
//! segments there; existing bytes are never moved. The mapping from a
//! logical offset to its segment is pure arithmetic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vesper_pager::{PageStore, ReadGuard, WriteGuard};
use vesper_types::page::{PageHeader, PageKind, PAGE_HDR_LEN};
use vesper_types::{LargeBufRef, PageId, Result, VesperError};
#[cfg(debug_assertions)]
use tracing::debug;
use tracing::trace;

pub const SEG_HDR_LEN: usize = 16;

mod seg {
    //! Segment header offsets, relative to the page start.
    use core::ops::Range;

    use vesper_types::page::PAGE_HDR_LEN;

    pub const NEXT: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 8;
    pub const USED: Range<usize> = PAGE_HDR_LEN + 8..PAGE_HDR_LEN + 12;
    pub const RESERVED: Range<usize> = PAGE_HDR_LEN + 12..PAGE_HDR_LEN + 16;
}

/// One writable region of a segment: an absolute byte range within the
/// page identified by `page`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SegmentSpan {
    pub page: PageId,
    pub offset: usize,
    pub len: usize,
}

/// A freshly allocated large buffer that no committed value references
/// yet. The holder must either `commit` the reference into a value handed
/// to the driver, or give it back via [`LargeBufStore::discard`]; there is
/// no third path.
#[must_use = "a large buffer must be committed into a value or discarded"]
pub struct OwnedLargeBuf {
    vref: LargeBufRef,
}

impl OwnedLargeBuf {
    pub fn vref(&self) -> &LargeBufRef {
        &self.vref
    }

    pub fn commit(self) -> LargeBufRef {
        self.vref
    }
}

#[derive(Default)]
pub struct LargeBufMetrics {
    pages_allocated: AtomicU64,
    pages_freed: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LargeBufMetricsSnapshot {
    pub pages_allocated: u64,
    pub pages_freed: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

impl LargeBufMetricsSnapshot {
    pub fn live_pages(&self) -> i64 {
        self.pages_allocated as i64 - self.pages_freed as i64
    }
}

impl LargeBufMetrics {
    pub fn snapshot(&self) -> LargeBufMetricsSnapshot {
        LargeBufMetricsSnapshot {
            pages_allocated: self.pages_allocated.load(Ordering::Relaxed),
            pages_freed: self.pages_freed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    fn record_pages_allocated(&self, n: u64) {
        if n != 0 {
            self.pages_allocated.fetch_add(n, Ordering::Relaxed);
        }
    }

    fn record_pages_freed(&self, n: u64) {
        if n != 0 {
            self.pages_freed.fetch_add(n, Ordering::Relaxed);
        }
    }

    fn record_bytes_written(&self, n: u64) {
        if n != 0 {
            self.bytes_written.fetch_add(n, Ordering::Relaxed);
        }
    }

    fn record_bytes_read(&self, n: u64) {
        if n != 0 {
            self.bytes_read.fetch_add(n, Ordering::Relaxed);
        }
    }
}

/// Number of segments covering the grid `[0, end)`.
fn pages_for(capacity: usize, end: u64) -> u32 {
    let capacity = capacity as u64;
    ((end + capacity - 1) / capacity) as u32
}

/// Bytes of segment `index` covered by content spanning `[head, end)` of
/// the grid.
fn seg_used(capacity: usize, head: u64, end: u64, index: u64) -> usize {
    let capacity = capacity as u64;
    let lo = head.max(index * capacity);
    let hi = end.min((index + 1) * capacity);
    (hi - lo) as usize
}

pub struct LargeBufStore {
    store: Arc<dyn PageStore>,
    page_size: usize,
    salt: u64,
    data_capacity: usize,
    metrics: Arc<LargeBufMetrics>,
}

impl LargeBufStore {
    pub fn open(store: Arc<dyn PageStore>) -> Result<Self> {
        let meta = store.meta()?;
        let page_size = store.page_size() as usize;
        if page_size <= PAGE_HDR_LEN + SEG_HDR_LEN {
            return Err(VesperError::Invalid("page size too small for segments"));
        }
        let data_capacity = page_size - PAGE_HDR_LEN - SEG_HDR_LEN;
        if data_capacity > u16::MAX as usize {
            return Err(VesperError::Invalid("page size too large for head offsets"));
        }
        Ok(Self {
            store,
            page_size,
            salt: meta.salt,
            data_capacity,
            metrics: Arc::new(LargeBufMetrics::default()),
        })
    }

    /// Payload bytes one segment can hold.
    pub fn data_capacity(&self) -> usize {
        self.data_capacity
    }

    pub fn metrics(&self) -> Arc<LargeBufMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn metrics_snapshot(&self) -> LargeBufMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Segment holding logical offset `pos`.
    pub fn pos_to_segment_index(&self, vref: &LargeBufRef, pos: u32) -> u32 {
        ((vref.head_offset as u64 + pos as u64) / self.data_capacity as u64) as u32
    }

    /// Offset of logical position `pos` within its segment's data area.
    pub fn pos_to_segment_offset(&self, vref: &LargeBufRef, pos: u32) -> usize {
        ((vref.head_offset as u64 + pos as u64) % self.data_capacity as u64) as usize
    }

    /// Creates a fresh buffer of logical size `len`, all segments
    /// reserved and zeroed. Content is written afterwards through
    /// [`fill_at`](Self::fill_at) or spans from
    /// [`writable_spans`](Self::writable_spans).
    pub fn allocate(&self, tx: &mut WriteGuard, len: u32) -> Result<OwnedLargeBuf> {
        if len == 0 {
            return Err(VesperError::Invalid("empty large buffer"));
        }
        let n_pages = pages_for(self.data_capacity, len as u64);
        let mut pages = Vec::with_capacity(n_pages as usize);
        for _ in 0..n_pages {
            pages.push(tx.allocate_page()?);
        }
        for (i, page) in pages.iter().enumerate() {
            let next = pages.get(i + 1).copied().unwrap_or(PageId(0));
            let used = seg_used(self.data_capacity, 0, len as u64, i as u64);
            let mut frame = tx.page_mut(*page)?;
            self.init_segment(frame.data_mut(), *page, next, used)?;
        }
        self.metrics.record_pages_allocated(n_pages as u64);
        trace!(pages = n_pages, len, "largebuf.allocate");
        Ok(OwnedLargeBuf {
            vref: LargeBufRef {
                start_page: pages[0],
                n_pages,
                len,
                head_offset: 0,
            },
        })
    }

    /// Grows the buffer by `delta` bytes at its tail, reserving new
    /// segments as needed. Existing content keeps its offsets.
    pub fn append(&self, tx: &mut WriteGuard, vref: &mut LargeBufRef, delta: u32) -> Result<()> {
        if delta == 0 {
            return Err(VesperError::Invalid("zero-length append"));
        }
        let new_len = vref.len as u64 + delta as u64;
        if new_len > u32::MAX as u64 {
            return Err(VesperError::Invalid("append overflows buffer size"));
        }
        let head = vref.head_offset as u64;
        let new_end = head + new_len;
        let needed = pages_for(self.data_capacity, new_end);
        let extra = needed - vref.n_pages;

        let tail = self.walk_to(tx, vref.start_page, vref.n_pages - 1)?;

        let mut grown = Vec::with_capacity(extra as usize);
        for _ in 0..extra {
            grown.push(tx.allocate_page()?);
        }
        for (i, page) in grown.iter().enumerate() {
            let index = vref.n_pages as u64 + i as u64;
            let next = grown.get(i + 1).copied().unwrap_or(PageId(0));
            let used = seg_used(self.data_capacity, head, new_end, index);
            let mut frame = tx.page_mut(*page)?;
            self.init_segment(frame.data_mut(), *page, next, used)?;
        }
        let tail_next = grown.first().copied();
        let tail_used = seg_used(self.data_capacity, head, new_end, vref.n_pages as u64 - 1);
        self.patch_segment(tx, tail, tail_next, Some(tail_used))?;

        vref.len = new_len as u32;
        vref.n_pages = needed;
        self.metrics.record_pages_allocated(extra as u64);
        trace!(delta, pages = extra, "largebuf.append");
        Ok(())
    }

    /// Exact inverse of [`append`](Self::append): shrinks the tail by
    /// `delta`, freeing segments that fall past the new end. The freed
    /// segments are discarded without being read, so this is safe even if
    /// a failed fill partially overwrote them.
    pub fn unappend(&self, tx: &mut WriteGuard, vref: &mut LargeBufRef, delta: u32) -> Result<()> {
        if delta == 0 {
            return Err(VesperError::Invalid("zero-length unappend"));
        }
        if delta >= vref.len {
            return Err(VesperError::Invalid("unappend would empty buffer"));
        }
        let head = vref.head_offset as u64;
        let new_len = vref.len - delta;
        let new_end = head + new_len as u64;
        let needed = pages_for(self.data_capacity, new_end);

        let new_tail = self.walk_to(tx, vref.start_page, needed - 1)?;
        let mut doomed = self.next_of(tx, new_tail)?;
        for _ in needed..vref.n_pages {
            if doomed.0 == 0 {
                return Err(VesperError::Corruption("overflow chain terminated early"));
            }
            let following = self.next_of(tx, doomed)?;
            tx.free_page(doomed)?;
            doomed = following;
        }
        let tail_used = seg_used(self.data_capacity, head, new_end, needed as u64 - 1);
        self.patch_segment(tx, new_tail, Some(PageId(0)), Some(tail_used))?;

        let freed = vref.n_pages - needed;
        vref.len = new_len;
        vref.n_pages = needed;
        self.metrics.record_pages_freed(freed as u64);
        trace!(delta, pages = freed, "largebuf.unappend");
        Ok(())
    }

    /// Grows the buffer by `delta` bytes at its head. Existing bytes keep
    /// their segments; new segments are chained in front when the head
    /// offset cannot absorb the growth.
    pub fn prepend(&self, tx: &mut WriteGuard, vref: &mut LargeBufRef, delta: u32) -> Result<()> {
        if delta == 0 {
            return Err(VesperError::Invalid("zero-length prepend"));
        }
        let new_len = vref.len as u64 + delta as u64;
        if new_len > u32::MAX as u64 {
            return Err(VesperError::Invalid("prepend overflows buffer size"));
        }
        let capacity = self.data_capacity as u64;
        let head = vref.head_offset as u64;

        if delta as u64 <= head {
            let new_head = head - delta as u64;
            let end = head + vref.len as u64;
            let used = seg_used(self.data_capacity, new_head, end, 0);
            self.patch_segment(tx, vref.start_page, None, Some(used))?;
            vref.head_offset = new_head as u16;
            vref.len = new_len as u32;
            trace!(delta, pages = 0u32, "largebuf.prepend");
            return Ok(());
        }

        let spill = delta as u64 - head;
        let extra = pages_for(self.data_capacity, spill);
        let new_head = extra as u64 * capacity - spill;
        let new_end = new_head + new_len;

        let mut grown = Vec::with_capacity(extra as usize);
        for _ in 0..extra {
            grown.push(tx.allocate_page()?);
        }
        for (i, page) in grown.iter().enumerate() {
            let next = grown.get(i + 1).copied().unwrap_or(vref.start_page);
            let used = seg_used(self.data_capacity, new_head, new_end, i as u64);
            let mut frame = tx.page_mut(*page)?;
            self.init_segment(frame.data_mut(), *page, next, used)?;
        }
        // The old head segment now carries bytes down to its start.
        let old_head_used = seg_used(self.data_capacity, new_head, new_end, extra as u64);
        self.patch_segment(tx, vref.start_page, None, Some(old_head_used))?;

        vref.start_page = grown[0];
        vref.n_pages += extra;
        vref.head_offset = new_head as u16;
        vref.len = new_len as u32;
        self.metrics.record_pages_allocated(extra as u64);
        trace!(delta, pages = extra, "largebuf.prepend");
        Ok(())
    }

    /// Exact inverse of [`prepend`](Self::prepend): shrinks the head by
    /// `delta`, freeing segments that fall before the new start without
    /// reading them.
    pub fn unprepend(&self, tx: &mut WriteGuard, vref: &mut LargeBufRef, delta: u32) -> Result<()> {
        if delta == 0 {
            return Err(VesperError::Invalid("zero-length unprepend"));
        }
        if delta >= vref.len {
            return Err(VesperError::Invalid("unprepend would empty buffer"));
        }
        let capacity = self.data_capacity as u64;
        let cut = vref.head_offset as u64 + delta as u64;
        let dropped = (cut / capacity) as u32;
        let new_head = cut % capacity;
        let new_len = vref.len - delta;
        let new_end = new_head + new_len as u64;

        if dropped == 0 {
            let used = seg_used(self.data_capacity, new_head, new_end, 0);
            self.patch_segment(tx, vref.start_page, None, Some(used))?;
            vref.head_offset = new_head as u16;
            vref.len = new_len;
            trace!(delta, pages = 0u32, "largebuf.unprepend");
            return Ok(());
        }

        let mut current = vref.start_page;
        for _ in 0..dropped {
            if current.0 == 0 {
                return Err(VesperError::Corruption("overflow chain terminated early"));
            }
            let next = self.next_of(tx, current)?;
            tx.free_page(current)?;
            current = next;
        }
        if current.0 == 0 {
            return Err(VesperError::Corruption("overflow chain terminated early"));
        }
        let used = seg_used(self.data_capacity, new_head, new_end, 0);
        self.patch_segment(tx, current, None, Some(used))?;

        vref.start_page = current;
        vref.n_pages -= dropped;
        vref.head_offset = new_head as u16;
        vref.len = new_len;
        self.metrics.record_pages_freed(dropped as u64);
        trace!(delta, pages = dropped, "largebuf.unprepend");
        Ok(())
    }

    /// Copies `bytes` into the buffer at logical position `pos`. Used to
    /// place already-known content (an old inline value migrating out of
    /// the node); streamed content goes through
    /// [`writable_spans`](Self::writable_spans) instead.
    pub fn fill_at(
        &self,
        tx: &mut WriteGuard,
        vref: &LargeBufRef,
        pos: u32,
        bytes: &[u8],
    ) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if pos as u64 + bytes.len() as u64 > vref.len as u64 {
            return Err(VesperError::Invalid("fill region beyond buffer"));
        }
        let index = self.pos_to_segment_index(vref, pos);
        let mut offset = self.pos_to_segment_offset(vref, pos);
        let mut current = self.walk_to(tx, vref.start_page, index)?;
        let mut remaining = bytes;
        let mut grid_index = index as u64;
        while !remaining.is_empty() {
            let chunk_len = remaining.len().min(self.data_capacity - offset);
            let (chunk, rest) = remaining.split_at(chunk_len);
            let mut frame = tx.page_mut(current)?;
            let (next, used, _) = self.decode_segment(current, frame.data())?;
            let data_start = if grid_index == 0 {
                vref.head_offset as usize
            } else {
                0
            };
            if offset + chunk_len > data_start + used {
                return Err(VesperError::Corruption("segment shorter than fill region"));
            }
            let at = PAGE_HDR_LEN + SEG_HDR_LEN + offset;
            frame.data_mut()[at..at + chunk_len].copy_from_slice(chunk);
            remaining = rest;
            if !remaining.is_empty() {
                if next.0 == 0 {
                    return Err(VesperError::Corruption("overflow chain terminated early"));
                }
                current = next;
                offset = 0;
                grid_index += 1;
            }
        }
        self.metrics.record_bytes_written(bytes.len() as u64);
        trace!(pos, len = bytes.len(), "largebuf.fill_at");
        Ok(())
    }

    /// Walks the chain once and returns the spans covering
    /// `[start_pos, start_pos + fill_len)`, in logical order, for a
    /// scatter fill.
    pub fn writable_spans(
        &self,
        tx: &WriteGuard,
        vref: &LargeBufRef,
        start_pos: u32,
        fill_len: u32,
    ) -> Result<Vec<SegmentSpan>> {
        if fill_len == 0 {
            return Ok(Vec::new());
        }
        if start_pos as u64 + fill_len as u64 > vref.len as u64 {
            return Err(VesperError::Invalid("fill region beyond buffer"));
        }
        let index = self.pos_to_segment_index(vref, start_pos);
        let mut offset = self.pos_to_segment_offset(vref, start_pos);
        let mut current = self.walk_to(tx, vref.start_page, index)?;
        let mut grid_index = index as u64;
        let mut remaining = fill_len as usize;
        let mut spans = Vec::new();
        loop {
            let page = tx.page(current)?;
            let (next, used, _) = self.decode_segment(current, page.data())?;
            let data_start = if grid_index == 0 {
                vref.head_offset as usize
            } else {
                0
            };
            let chunk = remaining.min(self.data_capacity - offset);
            if offset + chunk > data_start + used {
                return Err(VesperError::Corruption("segment shorter than fill region"));
            }
            spans.push(SegmentSpan {
                page: current,
                offset: PAGE_HDR_LEN + SEG_HDR_LEN + offset,
                len: chunk,
            });
            remaining -= chunk;
            if remaining == 0 {
                break;
            }
            if next.0 == 0 {
                return Err(VesperError::Corruption("overflow chain terminated early"));
            }
            current = next;
            offset = 0;
            grid_index += 1;
        }
        Ok(spans)
    }

    pub fn read(&self, tx: &ReadGuard, vref: &LargeBufRef) -> Result<Vec<u8>> {
        let mut dst = Vec::with_capacity(vref.len as usize);
        self.read_into(tx, vref, &mut dst)?;
        Ok(dst)
    }

    pub fn read_into(&self, tx: &ReadGuard, vref: &LargeBufRef, dst: &mut Vec<u8>) -> Result<()> {
        dst.clear();
        dst.reserve(vref.len as usize);
        let mut current = vref.start_page;
        let mut remaining = vref.len as usize;
        for grid_index in 0..vref.n_pages as u64 {
            if current.0 == 0 {
                return Err(VesperError::Corruption("overflow chain terminated early"));
            }
            let page = tx.get_page(current)?;
            let (next, used, data) = self.decode_segment(current, page.data())?;
            if used > remaining {
                return Err(VesperError::Corruption(
                    "overflow chain exceeded reported length",
                ));
            }
            let data_start = if grid_index == 0 {
                vref.head_offset as usize
            } else {
                0
            };
            if data_start + used > data.len() {
                return Err(VesperError::Corruption("overflow payload truncated"));
            }
            dst.extend_from_slice(&data[data_start..data_start + used]);
            remaining -= used;
            current = next;
        }
        if current.0 != 0 {
            return Err(VesperError::Corruption("overflow chain longer than page count"));
        }
        if remaining != 0 {
            return Err(VesperError::Corruption(
                "overflow chain shorter than reported length",
            ));
        }
        self.metrics.record_bytes_read(vref.len as u64);
        trace!(pages = vref.n_pages, len = vref.len, "largebuf.read");
        Ok(())
    }

    /// Frees every segment of a buffer within the transaction. This is
    /// the disposal path for a committed buffer whose value was replaced
    /// or deleted; an uncommitted buffer goes through
    /// [`discard`](Self::discard). A value shrinking below the in-node
    /// limit is handled by replacement: the operation builds a fresh
    /// inline value and the driver frees the old buffer here; a large
    /// buffer is never converted back to inline storage in place.
    pub fn free(&self, tx: &mut WriteGuard, vref: LargeBufRef) -> Result<()> {
        let mut current = vref.start_page;
        for _ in 0..vref.n_pages {
            if current.0 == 0 {
                return Err(VesperError::Corruption(
                    "overflow free chain shorter than expected",
                ));
            }
            let next = self.next_of(tx, current)?;
            tx.free_page(current)?;
            current = next;
        }
        if current.0 != 0 {
            return Err(VesperError::Corruption(
                "overflow free chain longer than expected",
            ));
        }
        self.metrics.record_pages_freed(vref.n_pages as u64);
        trace!(pages = vref.n_pages, len = vref.len, "largebuf.free");
        Ok(())
    }

    /// Unwinds a buffer that was allocated this transaction and will
    /// never be committed: marks it dead and releases its segments.
    pub fn discard(&self, tx: &mut WriteGuard, buf: OwnedLargeBuf) -> Result<()> {
        self.free(tx, buf.vref)
    }

    fn init_segment(
        &self,
        buf: &mut [u8],
        page: PageId,
        next: PageId,
        used: usize,
    ) -> Result<()> {
        if buf.len() < self.page_size {
            return Err(VesperError::Invalid("page buffer shorter than page size"));
        }
        buf[..self.page_size].fill(0);
        let header = PageHeader::new(
            PageKind::Overflow,
            page,
            self.page_size as u32,
            self.salt,
        )?;
        header.encode(&mut buf[..PAGE_HDR_LEN])?;
        buf[seg::NEXT].copy_from_slice(&next.0.to_be_bytes());
        buf[seg::USED].copy_from_slice(&(used as u32).to_be_bytes());
        Ok(())
    }

    /// Rewrites the chain link and/or reserved-length of one segment,
    /// leaving its data bytes untouched.
    fn patch_segment(
        &self,
        tx: &mut WriteGuard,
        page: PageId,
        next: Option<PageId>,
        used: Option<usize>,
    ) -> Result<()> {
        let mut frame = tx.page_mut(page)?;
        self.decode_segment(page, frame.data())?;
        let buf = frame.data_mut();
        if let Some(next) = next {
            buf[seg::NEXT].copy_from_slice(&next.0.to_be_bytes());
        }
        if let Some(used) = used {
            buf[seg::USED].copy_from_slice(&(used as u32).to_be_bytes());
        }
        Ok(())
    }

    fn decode_segment<'a>(
        &self,
        page: PageId,
        data: &'a [u8],
    ) -> Result<(PageId, usize, &'a [u8])> {
        if data.len() < self.page_size {
            return Err(VesperError::Corruption("overflow page truncated"));
        }
        let header = PageHeader::decode(&data[..PAGE_HDR_LEN])?;
        if header.kind != PageKind::Overflow {
            return Err(VesperError::Corruption("page is not overflow kind"));
        }
        if header.page_no != page {
            return Err(VesperError::Corruption("overflow page id mismatch"));
        }
        if header.page_size as usize != self.page_size {
            return Err(VesperError::Corruption("overflow page size mismatch"));
        }
        let next = PageId(u64::from_be_bytes(data[seg::NEXT].try_into().unwrap()));
        let used = u32::from_be_bytes(data[seg::USED].try_into().unwrap()) as usize;
        if data[seg::RESERVED] != [0; 4] {
            return Err(VesperError::Corruption("segment reserved bytes not zero"));
        }
        if used > self.data_capacity {
            return Err(VesperError::Corruption("segment used bytes exceed capacity"));
        }
        let payload = &data[PAGE_HDR_LEN + SEG_HDR_LEN..self.page_size];
        Ok((next, used, payload))
    }

    fn next_of(&self, tx: &WriteGuard, page: PageId) -> Result<PageId> {
        let frame = tx.page(page)?;
        let (next, _, _) = self.decode_segment(page, frame.data())?;
        Ok(next)
    }

    /// Follows `steps` chain links from `start` inside a write
    /// transaction.
    fn walk_to(&self, tx: &WriteGuard, start: PageId, steps: u32) -> Result<PageId> {
        let mut current = start;
        for _ in 0..steps {
            if current.0 == 0 {
                return Err(VesperError::Corruption("overflow chain terminated early"));
            }
            current = self.next_of(tx, current)?;
        }
        if current.0 == 0 {
            return Err(VesperError::Corruption("overflow chain terminated early"));
        }
        Ok(current)
    }
}

#[cfg(debug_assertions)]
impl LargeBufStore {
    pub fn dump_chain(&self, tx: &ReadGuard, vref: &LargeBufRef) -> Result<()> {
        debug!(
            start_page = vref.start_page.0,
            pages = vref.n_pages,
            len = vref.len,
            head_offset = vref.head_offset,
            "largebuf.dump.start"
        );
        let mut current = vref.start_page;
        let mut index = 0u32;
        while current.0 != 0 {
            let page = tx.get_page(current)?;
            let (next, used, _) = self.decode_segment(current, page.data())?;
            debug!(
                index,
                page_id = current.0,
                used,
                next_page = next.0,
                "largebuf.dump.segment"
            );
            current = next;
            index += 1;
        }
        debug!("largebuf.dump.end");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{pages_for, seg_used};

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(100, 1), 1);
        assert_eq!(pages_for(100, 100), 1);
        assert_eq!(pages_for(100, 101), 2);
        assert_eq!(pages_for(100, 250), 3);
    }

    #[test]
    fn seg_used_is_grid_intersection() {
        // Content [30, 250) on a 100-byte grid: 70 + 100 + 50.
        assert_eq!(seg_used(100, 30, 250, 0), 70);
        assert_eq!(seg_used(100, 30, 250, 1), 100);
        assert_eq!(seg_used(100, 30, 250, 2), 50);
    }
}
