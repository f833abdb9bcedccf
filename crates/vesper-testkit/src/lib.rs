#![forbid(unsafe_code)]

//! Test doubles for the storage crates: an in-memory [`PageStore`] with
//! commit/rollback semantics and page CRC stamping, plus deterministic
//! payload generation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vesper_checksum::page_crc32;
use vesper_pager::{Meta, PageMut, PageRef, PageStore, ReadGuard, ReadTx, WriteGuard, WriteTx};
use vesper_types::page::{self, DEFAULT_PAGE_SIZE, PAGE_HDR_LEN};
use vesper_types::{Lsn, PageId, Result, VesperError};

struct State {
    committed: HashMap<u64, Arc<[u8]>>,
    free: Vec<PageId>,
    next_page: u64,
    writer_active: bool,
    lsn: u64,
}

struct Shared {
    page_size: usize,
    salt: u64,
    state: Mutex<State>,
}

/// In-memory transactional page store. Committed pages carry a valid CRC32
/// in their header (stamped at commit, verified on snapshot reads), write
/// transactions are single-writer and discard all staged work unless
/// committed.
pub struct MemPager {
    shared: Arc<Shared>,
}

impl MemPager {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: u32) -> Self {
        assert!(page_size as usize >= PAGE_HDR_LEN, "page size too small");
        Self {
            shared: Arc::new(Shared {
                page_size: page_size as usize,
                salt: 0x5EED_CAFE,
                state: Mutex::new(State {
                    committed: HashMap::new(),
                    free: Vec::new(),
                    next_page: 1,
                    writer_active: false,
                    lsn: 0,
                }),
            }),
        }
    }

    /// Number of pages currently committed.
    pub fn committed_pages(&self) -> usize {
        self.shared.state.lock().committed.len()
    }

    /// Flip one committed byte without restamping the CRC, so the next
    /// snapshot read of the page fails verification.
    pub fn corrupt_page(&self, page: PageId, offset: usize) -> Result<()> {
        self.edit_committed(page, offset, false)
    }

    /// Flip one committed byte and restamp the CRC, so the damage reaches
    /// whatever decodes the page contents.
    pub fn tamper_page(&self, page: PageId, offset: usize) -> Result<()> {
        self.edit_committed(page, offset, true)
    }

    fn edit_committed(&self, page: PageId, offset: usize, restamp: bool) -> Result<()> {
        let mut state = self.shared.state.lock();
        let bytes = state
            .committed
            .get(&page.0)
            .ok_or(VesperError::Invalid("page not committed"))?;
        let mut copy = bytes.to_vec();
        if offset >= copy.len() {
            return Err(VesperError::Invalid("offset beyond page"));
        }
        copy[offset] ^= 0xFF;
        if restamp {
            stamp_crc(&mut copy, page.0, self.shared.salt)?;
        }
        state.committed.insert(page.0, Arc::from(copy));
        Ok(())
    }
}

impl Default for MemPager {
    fn default() -> Self {
        Self::new()
    }
}

fn stamp_crc(buf: &mut [u8], page_no: u64, salt: u64) -> Result<()> {
    page::clear_crc32(&mut buf[..PAGE_HDR_LEN])?;
    let crc = page_crc32(page_no, salt, buf);
    buf[page::header::CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

fn verify_crc(buf: &[u8], page_no: u64, salt: u64) -> Result<()> {
    let stored = u32::from_be_bytes(buf[page::header::CRC32].try_into().unwrap());
    let mut scratch = buf.to_vec();
    page::clear_crc32(&mut scratch[..PAGE_HDR_LEN])?;
    if page_crc32(page_no, salt, &scratch) != stored {
        return Err(VesperError::Corruption("page crc mismatch"));
    }
    Ok(())
}

impl PageStore for MemPager {
    fn page_size(&self) -> u32 {
        self.shared.page_size as u32
    }

    fn meta(&self) -> Result<Meta> {
        Ok(Meta {
            page_size: self.shared.page_size as u32,
            salt: self.shared.salt,
        })
    }

    fn begin_read(&self) -> Result<ReadGuard> {
        let state = self.shared.state.lock();
        Ok(ReadGuard::new(Box::new(MemReadTx {
            pages: state.committed.clone(),
            salt: self.shared.salt,
        })))
    }

    fn begin_write(&self) -> Result<WriteGuard> {
        let mut state = self.shared.state.lock();
        if state.writer_active {
            return Err(VesperError::Invalid("write transaction already active"));
        }
        state.writer_active = true;
        Ok(WriteGuard::new(Box::new(MemWriteTx {
            shared: Arc::clone(&self.shared),
            dirty: HashMap::new(),
            freed: Vec::new(),
            free_pool: state.free.clone(),
            next_page: state.next_page,
            finished: false,
        })))
    }
}

struct MemReadTx {
    pages: HashMap<u64, Arc<[u8]>>,
    salt: u64,
}

impl ReadTx for MemReadTx {
    fn get_page(&self, page: PageId) -> Result<PageRef> {
        let bytes = self
            .pages
            .get(&page.0)
            .ok_or(VesperError::Invalid("page not allocated"))?;
        verify_crc(bytes, page.0, self.salt)?;
        Ok(PageRef::new(Arc::clone(bytes)))
    }
}

struct MemWriteTx {
    shared: Arc<Shared>,
    dirty: HashMap<u64, Vec<u8>>,
    freed: Vec<PageId>,
    free_pool: Vec<PageId>,
    next_page: u64,
    finished: bool,
}

impl WriteTx for MemWriteTx {
    fn allocate_page(&mut self) -> Result<PageId> {
        let page = match self.free_pool.pop() {
            Some(page) => page,
            None => {
                let page = PageId(self.next_page);
                self.next_page += 1;
                page
            }
        };
        self.dirty.insert(page.0, vec![0; self.shared.page_size]);
        Ok(page)
    }

    fn free_page(&mut self, page: PageId) -> Result<()> {
        if page.0 == 0 || page.0 >= self.next_page {
            return Err(VesperError::Invalid("freeing page that was never allocated"));
        }
        self.dirty.remove(&page.0);
        self.freed.push(page);
        Ok(())
    }

    fn page(&self, page: PageId) -> Result<PageRef> {
        if let Some(bytes) = self.dirty.get(&page.0) {
            return Ok(PageRef::new(Arc::from(bytes.clone())));
        }
        let state = self.shared.state.lock();
        let bytes = state
            .committed
            .get(&page.0)
            .ok_or(VesperError::Invalid("page not allocated"))?;
        Ok(PageRef::new(Arc::clone(bytes)))
    }

    fn page_mut(&mut self, page: PageId) -> Result<PageMut<'_>> {
        if !self.dirty.contains_key(&page.0) {
            let state = self.shared.state.lock();
            let bytes = state
                .committed
                .get(&page.0)
                .ok_or(VesperError::Invalid("page not allocated"))?;
            self.dirty.insert(page.0, bytes.to_vec());
        }
        let bytes = self.dirty.get_mut(&page.0).unwrap();
        Ok(PageMut::new(bytes))
    }

    fn commit(mut self: Box<Self>) -> Result<Lsn> {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        for page in &self.freed {
            self.dirty.remove(&page.0);
            state.committed.remove(&page.0);
        }
        for (page_no, mut bytes) in self.dirty.drain() {
            stamp_crc(&mut bytes, page_no, shared.salt)?;
            state.committed.insert(page_no, Arc::from(bytes));
        }
        state.free = self.free_pool.clone();
        state.free.extend(self.freed.iter().copied());
        state.next_page = self.next_page;
        state.lsn += 1;
        state.writer_active = false;
        self.finished = true;
        Ok(Lsn(state.lsn))
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.writer_active = false;
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemWriteTx {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.state.lock().writer_active = false;
        }
    }
}

/// Deterministic pseudo-random payload for tests.
pub fn payload(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::page::{PageHeader, PageKind};

    fn init_page(tx: &mut WriteGuard, page: PageId, fill: u8) -> Result<()> {
        let mut frame = tx.page_mut(page)?;
        let buf = frame.data_mut();
        let header = PageHeader::new(PageKind::Leaf, page, buf.len() as u32, 0x5EED_CAFE)?;
        header.encode(&mut buf[..PAGE_HDR_LEN])?;
        buf[PAGE_HDR_LEN..].fill(fill);
        Ok(())
    }

    #[test]
    fn commit_then_read_back() -> Result<()> {
        let pager = MemPager::with_page_size(256);
        let mut tx = pager.begin_write()?;
        let page = tx.allocate_page()?;
        init_page(&mut tx, page, 0xAB)?;
        pager.commit(tx)?;

        let read = pager.begin_read()?;
        let snapshot = pager.get_page(&read, page)?;
        assert!(snapshot.data()[PAGE_HDR_LEN..].iter().all(|&b| b == 0xAB));
        Ok(())
    }

    #[test]
    fn dropped_transaction_discards_writes() -> Result<()> {
        let pager = MemPager::with_page_size(256);
        let mut tx = pager.begin_write()?;
        let page = tx.allocate_page()?;
        init_page(&mut tx, page, 0x11)?;
        drop(tx);

        let read = pager.begin_read()?;
        assert!(pager.get_page(&read, page).is_err());
        // The writer slot is free again.
        let tx = pager.begin_write()?;
        pager.rollback(tx)?;
        Ok(())
    }

    #[test]
    fn freed_pages_are_reused() -> Result<()> {
        let pager = MemPager::with_page_size(256);
        let mut tx = pager.begin_write()?;
        let page = tx.allocate_page()?;
        init_page(&mut tx, page, 0x22)?;
        pager.commit(tx)?;

        let mut tx = pager.begin_write()?;
        tx.free_page(page)?;
        pager.commit(tx)?;
        assert_eq!(pager.committed_pages(), 0);

        let mut tx = pager.begin_write()?;
        let again = tx.allocate_page()?;
        assert_eq!(again, page);
        pager.rollback(tx)?;
        Ok(())
    }

    #[test]
    fn corruption_is_detected_on_read() -> Result<()> {
        let pager = MemPager::with_page_size(256);
        let mut tx = pager.begin_write()?;
        let page = tx.allocate_page()?;
        init_page(&mut tx, page, 0x33)?;
        pager.commit(tx)?;

        pager.corrupt_page(page, PAGE_HDR_LEN + 5)?;
        let read = pager.begin_read()?;
        match pager.get_page(&read, page) {
            Err(VesperError::Corruption(_)) => Ok(()),
            other => panic!("expected corruption, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn single_writer_enforced() -> Result<()> {
        let pager = MemPager::new();
        let tx = pager.begin_write()?;
        assert!(pager.begin_write().is_err());
        pager.rollback(tx)?;
        assert!(pager.begin_write().is_ok());
        Ok(())
    }

    #[test]
    fn payload_is_deterministic() {
        assert_eq!(payload(7, 100), payload(7, 100));
        assert_ne!(payload(7, 100), payload(8, 100));
    }
}
