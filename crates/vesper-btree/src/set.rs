//! Unconditional and conditional stores: set, add, replace, cas.

use std::sync::Arc;

use tracing::trace;
use vesper_largebuf::LargeBufStore;
use vesper_pager::WriteGuard;
use vesper_types::value::{MAX_IN_NODE_VALUE_SIZE, MAX_VALUE_SIZE};
use vesper_types::{Cas, Result};

use crate::buffer_group::{BufferGroup, SpanDest};
use crate::modify::{fill_buffer_group, Change, DataProvider, FillOutcome, ModifyOperation};
use crate::value::{Value, ValueMeta};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetMode {
    /// Store regardless of whether the key already has a value.
    Set,
    /// Store only when the key has no value.
    Add,
    /// Store only when the key already has a value.
    Replace,
    /// Store only when the old value carries this CAS token.
    Cas(Cas),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetResult {
    Stored,
    NotStored,
    NotFound,
    Exists,
    TooLarge,
    DataProviderFailed,
}

/// Injected hook around a set's lifetime; stays out of the algorithm's
/// control flow.
pub trait SetObserver: Send + Sync {
    fn set_started(&self);
    fn set_finished(&self, result: SetResult);
}

pub struct SetOperation<D> {
    data: D,
    mode: SetMode,
    client_flags: u32,
    expiration: u32,
    observer: Option<Arc<dyn SetObserver>>,
}

impl<D: DataProvider> SetOperation<D> {
    pub fn new(data: D, mode: SetMode, client_flags: u32, expiration: u32) -> Self {
        Self {
            data,
            mode,
            client_flags,
            expiration,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SetObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn run(
        &mut self,
        large: &LargeBufStore,
        tx: &mut WriteGuard,
        old: Option<&Value>,
    ) -> Result<(SetResult, Change)> {
        match (self.mode, old) {
            (SetMode::Add, Some(_)) | (SetMode::Replace, None) => {
                self.data.discard();
                return Ok((SetResult::NotStored, Change::Keep));
            }
            (SetMode::Cas(_), None) => {
                self.data.discard();
                return Ok((SetResult::NotFound, Change::Keep));
            }
            (SetMode::Cas(req), Some(old)) if old.cas() != Some(req) => {
                // Covers both a missing slot and a stale token.
                self.data.discard();
                return Ok((SetResult::Exists, Change::Keep));
            }
            _ => {}
        }

        let declared = self.data.size();
        if declared > MAX_VALUE_SIZE as u64 {
            self.data.discard();
            trace!(size = declared, "set.too_large");
            // An oversized store still deletes the value it aimed to
            // replace; the old value must not survive the attempt.
            return Ok((SetResult::TooLarge, Change::Delete));
        }
        let size = declared as u32;

        // Once a key's value has a CAS slot, every later write keeps one.
        let reserve_cas =
            matches!(self.mode, SetMode::Cas(_)) || old.map_or(false, Value::has_cas);
        let meta = ValueMeta {
            client_flags: self.client_flags,
            expiration: self.expiration,
            cas: reserve_cas.then_some(Cas::PENDING),
        };

        if size <= MAX_IN_NODE_VALUE_SIZE {
            let mut inline = vec![0u8; size as usize];
            let mut group = BufferGroup::new();
            if size > 0 {
                group.add_span(size as usize, SpanDest::Value { offset: 0 });
            }
            match fill_buffer_group(&mut self.data, &group, &mut inline, tx)? {
                FillOutcome::ProviderFailed => Ok((SetResult::DataProviderFailed, Change::Keep)),
                FillOutcome::Done => {
                    trace!(size, large = false, "set.stored");
                    Ok((
                        SetResult::Stored,
                        Change::Put(Value::new_inline(meta, inline)?),
                    ))
                }
            }
        } else {
            let owned = large.allocate(tx, size)?;
            let mut group = BufferGroup::new();
            for span in large.writable_spans(tx, owned.vref(), 0, size)? {
                group.add_span(
                    span.len,
                    SpanDest::Segment {
                        page: span.page,
                        offset: span.offset,
                    },
                );
            }
            match fill_buffer_group(&mut self.data, &group, &mut [], tx)? {
                FillOutcome::ProviderFailed => {
                    // Never committed, so no partial-write concern: just
                    // mark it dead and release the segments.
                    large.discard(tx, owned)?;
                    Ok((SetResult::DataProviderFailed, Change::Keep))
                }
                FillOutcome::Done => {
                    trace!(size, large = true, "set.stored");
                    Ok((
                        SetResult::Stored,
                        Change::Put(Value::new_large(meta, owned.commit())?),
                    ))
                }
            }
        }
    }
}

impl<D: DataProvider> ModifyOperation for SetOperation<D> {
    type Code = SetResult;

    fn operate(
        &mut self,
        large: &LargeBufStore,
        tx: &mut WriteGuard,
        old: Option<&Value>,
    ) -> Result<(SetResult, Change)> {
        if let Some(observer) = &self.observer {
            observer.set_started();
        }
        let out = self.run(large, tx, old);
        if let (Some(observer), Ok((result, _))) = (&self.observer, &out) {
            observer.set_finished(*result);
        }
        out
    }
}
