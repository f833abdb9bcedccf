#![allow(dead_code)]

//! Shared fixtures for the operation tests: an in-memory store and data
//! provider doubles whose fate (discarded, bytes produced) can be probed
//! after an operation consumed them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use vesper_btree::modify::{DataProvider, ProviderFailed};
use vesper_btree::value::{Value, ValueMeta};
use vesper_largebuf::LargeBufStore;
use vesper_pager::WriteGuard;
use vesper_testkit::MemPager;
use vesper_types::{Cas, Result};

// 256-byte pages force multi-segment large values at small payload sizes.
pub const PAGE_SIZE: u32 = 256;

pub fn setup() -> (Arc<MemPager>, LargeBufStore) {
    setup_with(PAGE_SIZE)
}

pub fn setup_with(page_size: u32) -> (Arc<MemPager>, LargeBufStore) {
    let pager = Arc::new(MemPager::with_page_size(page_size));
    let store = LargeBufStore::open(pager.clone()).expect("open large buf store");
    (pager, store)
}

pub fn meta() -> ValueMeta {
    ValueMeta {
        client_flags: 0,
        expiration: 0,
        cas: None,
    }
}

pub fn meta_with_cas(cas: u64) -> ValueMeta {
    ValueMeta {
        cas: Some(Cas(cas)),
        ..meta()
    }
}

/// Builds a committed-style large value the way the driver would have
/// stored it: buffer allocated and filled outright.
pub fn seed_large_value(
    store: &LargeBufStore,
    tx: &mut WriteGuard,
    meta: ValueMeta,
    bytes: &[u8],
) -> Result<Value> {
    let owned = store.allocate(tx, bytes.len() as u32)?;
    store.fill_at(tx, owned.vref(), 0, bytes)?;
    Value::new_large(meta, owned.commit())
}

#[derive(Default)]
pub struct ProviderState {
    discarded: AtomicBool,
    filled: AtomicUsize,
}

/// Handle onto a provider's state that outlives the operation owning it.
#[derive(Clone)]
pub struct ProviderProbe(Arc<ProviderState>);

impl ProviderProbe {
    pub fn discarded(&self) -> bool {
        self.0.discarded.load(Ordering::Relaxed)
    }

    pub fn bytes_filled(&self) -> usize {
        self.0.filled.load(Ordering::Relaxed)
    }
}

/// Supplies a fixed payload, span by span.
pub struct PayloadProvider {
    bytes: Vec<u8>,
    pos: usize,
    state: Arc<ProviderState>,
}

impl PayloadProvider {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            pos: 0,
            state: Arc::new(ProviderState::default()),
        }
    }

    pub fn probe(&self) -> ProviderProbe {
        ProviderProbe(Arc::clone(&self.state))
    }
}

impl DataProvider for PayloadProvider {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn fill(&mut self, dst: &mut [u8]) -> std::result::Result<(), ProviderFailed> {
        let end = self.pos + dst.len();
        if end > self.bytes.len() {
            return Err(ProviderFailed);
        }
        dst.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        self.state.filled.fetch_add(dst.len(), Ordering::Relaxed);
        Ok(())
    }

    fn discard(&mut self) {
        self.state.discarded.store(true, Ordering::Relaxed);
    }
}

/// Declares `declared` bytes but dies after producing `fail_after`,
/// leaving whatever span it was filling partially written, the way a
/// dropped client connection does.
pub struct FailingProvider {
    declared: usize,
    fail_after: usize,
    pos: usize,
    state: Arc<ProviderState>,
}

impl FailingProvider {
    pub fn new(declared: usize, fail_after: usize) -> Self {
        assert!(fail_after < declared);
        Self {
            declared,
            fail_after,
            pos: 0,
            state: Arc::new(ProviderState::default()),
        }
    }

    pub fn probe(&self) -> ProviderProbe {
        ProviderProbe(Arc::clone(&self.state))
    }
}

impl DataProvider for FailingProvider {
    fn size(&self) -> u64 {
        self.declared as u64
    }

    fn fill(&mut self, dst: &mut [u8]) -> std::result::Result<(), ProviderFailed> {
        let end = self.pos + dst.len();
        if end > self.fail_after {
            let allowed = self.fail_after.saturating_sub(self.pos);
            dst[..allowed].fill(0xEE);
            self.pos = self.fail_after;
            self.state.filled.fetch_add(allowed, Ordering::Relaxed);
            return Err(ProviderFailed);
        }
        dst.fill(0xEE);
        self.pos = end;
        self.state.filled.fetch_add(dst.len(), Ordering::Relaxed);
        Ok(())
    }

    fn discard(&mut self) {
        self.state.discarded.store(true, Ordering::Relaxed);
    }
}

/// Declares a size but must only ever be discarded; filling it is a test
/// failure.
pub struct DiscardOnlyProvider {
    declared: u64,
    state: Arc<ProviderState>,
}

impl DiscardOnlyProvider {
    pub fn new(declared: u64) -> Self {
        Self {
            declared,
            state: Arc::new(ProviderState::default()),
        }
    }

    pub fn probe(&self) -> ProviderProbe {
        ProviderProbe(Arc::clone(&self.state))
    }
}

impl DataProvider for DiscardOnlyProvider {
    fn size(&self) -> u64 {
        self.declared
    }

    fn fill(&mut self, _dst: &mut [u8]) -> std::result::Result<(), ProviderFailed> {
        panic!("payload must not be requested");
    }

    fn discard(&mut self) {
        self.state.discarded.store(true, Ordering::Relaxed);
    }
}
