//! Extends an existing value at its tail (append) or head (prepend).
//!
//! The header is copied verbatim from the old value; only the payload and
//! its storage shape change. Three shapes are possible: the value stays
//! inline, the value moves out of the node into a fresh large buffer, or
//! an existing large buffer grows in place. Each shape has its own unwind
//! when the byte source fails partway through.

use tracing::trace;
use vesper_largebuf::LargeBufStore;
use vesper_pager::WriteGuard;
use vesper_types::value::{MAX_IN_NODE_VALUE_SIZE, MAX_VALUE_SIZE};
use vesper_types::{Result, VesperError};

use crate::buffer_group::{BufferGroup, SpanDest};
use crate::modify::{fill_buffer_group, Change, DataProvider, FillOutcome, ModifyOperation};
use crate::value::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExtendDir {
    Append,
    Prepend,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppendPrependResult {
    Success,
    NotFound,
    TooLarge,
    DataProviderFailed,
}

pub struct AppendPrependOperation<D> {
    data: D,
    dir: ExtendDir,
}

impl<D: DataProvider> AppendPrependOperation<D> {
    pub fn new(data: D, dir: ExtendDir) -> Self {
        Self { data, dir }
    }
}

impl<D: DataProvider> ModifyOperation for AppendPrependOperation<D> {
    type Code = AppendPrependResult;

    fn operate(
        &mut self,
        large: &LargeBufStore,
        tx: &mut WriteGuard,
        old: Option<&Value>,
    ) -> Result<(AppendPrependResult, Change)> {
        let old = match old {
            Some(value) => value,
            None => {
                self.data.discard();
                return Ok((AppendPrependResult::NotFound, Change::Keep));
            }
        };

        let old_size = old.size();
        let declared = self.data.size();
        if old_size as u64 + declared > MAX_VALUE_SIZE as u64 {
            self.data.discard();
            trace!(old_size, delta = declared, "extend.too_large");
            // Unlike an oversized set, an oversized extension leaves the
            // old value untouched.
            return Ok((AppendPrependResult::TooLarge, Change::Keep));
        }
        if declared == 0 {
            self.data.discard();
            return Ok((AppendPrependResult::Success, Change::Keep));
        }
        let delta = declared as u32;
        let new_size = old_size + delta;
        let meta = *old.meta();
        let append = matches!(self.dir, ExtendDir::Append);

        if new_size <= MAX_IN_NODE_VALUE_SIZE {
            // Stays inline. The new value gets a fresh buffer with the old
            // bytes placed at their final position and a hole for the
            // payload; nothing to unwind on failure.
            let old_bytes = old
                .inline()
                .ok_or(VesperError::Corruption("in-node value with out-of-line payload"))?;
            let mut inline = vec![0u8; new_size as usize];
            let mut group = BufferGroup::new();
            if append {
                inline[..old_size as usize].copy_from_slice(old_bytes);
                group.add_span(
                    delta as usize,
                    SpanDest::Value {
                        offset: old_size as usize,
                    },
                );
            } else {
                inline[delta as usize..].copy_from_slice(old_bytes);
                group.add_span(delta as usize, SpanDest::Value { offset: 0 });
            }
            return match fill_buffer_group(&mut self.data, &group, &mut inline, tx)? {
                FillOutcome::ProviderFailed => {
                    Ok((AppendPrependResult::DataProviderFailed, Change::Keep))
                }
                FillOutcome::Done => {
                    trace!(old_size, delta, append, "extend.inline");
                    Ok((
                        AppendPrependResult::Success,
                        Change::Put(Value::new_inline(meta, inline)?),
                    ))
                }
            };
        }

        let start_pos = if append { old_size } else { 0 };

        if let Some(old_ref) = old.large_ref() {
            // Grows the committed buffer in place at the affected end.
            let mut vref = *old_ref;
            if append {
                large.append(tx, &mut vref, delta)?;
            } else {
                large.prepend(tx, &mut vref, delta)?;
            }
            let mut group = BufferGroup::new();
            for span in large.writable_spans(tx, &vref, start_pos, delta)? {
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
                    // Shrink back to the old size. The freed segments may
                    // be partially overwritten; they are discarded unread
                    // and never exposed.
                    if append {
                        large.unappend(tx, &mut vref, delta)?;
                    } else {
                        large.unprepend(tx, &mut vref, delta)?;
                    }
                    Ok((AppendPrependResult::DataProviderFailed, Change::Keep))
                }
                FillOutcome::Done => {
                    trace!(old_size, delta, append, "extend.large");
                    Ok((
                        AppendPrependResult::Success,
                        Change::Put(Value::new_large(meta, vref)?),
                    ))
                }
            }
        } else {
            // Moves out of the node: fresh buffer sized for the total,
            // old bytes placed outright, payload streamed into the rest.
            let old_bytes = old
                .inline()
                .ok_or(VesperError::Corruption("in-node value with out-of-line payload"))?;
            let owned = large.allocate(tx, new_size)?;
            let old_at = if append { 0 } else { delta };
            large.fill_at(tx, owned.vref(), old_at, old_bytes)?;
            let mut group = BufferGroup::new();
            for span in large.writable_spans(tx, owned.vref(), start_pos, delta)? {
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
                    // The fresh buffer was never committed; the old inline
                    // value stands untouched.
                    large.discard(tx, owned)?;
                    Ok((AppendPrependResult::DataProviderFailed, Change::Keep))
                }
                FillOutcome::Done => {
                    trace!(old_size, delta, append, "extend.migrate");
                    Ok((
                        AppendPrependResult::Success,
                        Change::Put(Value::new_large(meta, owned.commit())?),
                    ))
                }
            }
        }
    }
}
