#![forbid(unsafe_code)]

//! Boundary to the engine's transactional page cache.
//!
//! The real pager (WAL, checkpointing, file IO) lives in the surrounding
//! engine. Storage components here only need the contract below: a store
//! that hands out read and write transactions, pages addressed by
//! [`PageId`], and commit/rollback of a write transaction as a unit. The
//! guards box `dyn` transaction impls so any pager can sit behind the same
//! object-safe boundary.

use std::sync::Arc;

use vesper_types::{Lsn, PageId, Result};

/// Store-wide fixed parameters, decided when the store is created.
#[derive(Clone, Copy, Debug)]
pub struct Meta {
    pub page_size: u32,
    pub salt: u64,
}

/// Immutable snapshot of one page's bytes.
#[derive(Clone)]
pub struct PageRef {
    data: Arc<[u8]>,
}

impl PageRef {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Mutable view of one page inside a write transaction. Only one page can
/// be held mutably at a time; the borrow is tied to the transaction.
pub struct PageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> PageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

pub trait ReadTx: Send {
    fn get_page(&self, page: PageId) -> Result<PageRef>;
}

pub trait WriteTx: Send {
    fn allocate_page(&mut self) -> Result<PageId>;
    fn free_page(&mut self, page: PageId) -> Result<()>;
    /// Read a page as seen by this transaction (own writes included).
    fn page(&self, page: PageId) -> Result<PageRef>;
    fn page_mut(&mut self, page: PageId) -> Result<PageMut<'_>>;
    fn commit(self: Box<Self>) -> Result<Lsn>;
    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Snapshot read transaction.
pub struct ReadGuard {
    inner: Box<dyn ReadTx>,
}

impl ReadGuard {
    pub fn new(inner: Box<dyn ReadTx>) -> Self {
        Self { inner }
    }

    pub fn get_page(&self, page: PageId) -> Result<PageRef> {
        self.inner.get_page(page)
    }
}

/// Exclusive write transaction. Dropping without commit discards all
/// staged writes, allocations and frees.
pub struct WriteGuard {
    inner: Box<dyn WriteTx>,
}

impl WriteGuard {
    pub fn new(inner: Box<dyn WriteTx>) -> Self {
        Self { inner }
    }

    pub fn allocate_page(&mut self) -> Result<PageId> {
        self.inner.allocate_page()
    }

    pub fn free_page(&mut self, page: PageId) -> Result<()> {
        self.inner.free_page(page)
    }

    pub fn page(&self, page: PageId) -> Result<PageRef> {
        self.inner.page(page)
    }

    pub fn page_mut(&mut self, page: PageId) -> Result<PageMut<'_>> {
        self.inner.page_mut(page)
    }

    fn into_inner(self) -> Box<dyn WriteTx> {
        self.inner
    }
}

pub trait PageStore: Send + Sync {
    fn page_size(&self) -> u32;
    fn meta(&self) -> Result<Meta>;
    fn begin_read(&self) -> Result<ReadGuard>;
    fn begin_write(&self) -> Result<WriteGuard>;

    fn commit(&self, tx: WriteGuard) -> Result<Lsn> {
        tx.into_inner().commit()
    }

    fn rollback(&self, tx: WriteGuard) -> Result<()> {
        tx.into_inner().rollback()
    }

    fn get_page(&self, tx: &ReadGuard, page: PageId) -> Result<PageRef> {
        tx.get_page(page)
    }
}
