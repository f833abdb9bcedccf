//! The contract between the traversal driver and a value mutation, and
//! the span-by-span fill step shared by the concrete operations.

use vesper_largebuf::LargeBufStore;
use vesper_pager::WriteGuard;
use vesper_types::{Result, VesperError};

use crate::buffer_group::{BufferGroup, SpanDest};
use crate::value::Value;

/// The external byte source could not supply the promised bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProviderFailed;

/// External capability that produces a payload of a declared size.
///
/// The fill step calls [`fill`](Self::fill) once per destination span, in
/// span order; each call must fill the slice completely or fail. The sum
/// of all requests equals [`size`](Self::size). On every path where
/// filling never starts, [`discard`](Self::discard) is called exactly
/// once instead.
pub trait DataProvider {
    fn size(&self) -> u64;
    fn fill(&mut self, dst: &mut [u8]) -> std::result::Result<(), ProviderFailed>;
    fn discard(&mut self);
}

/// What the driver should commit for the key after a mutation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Change {
    /// Leave the currently committed value in place.
    Keep,
    /// Delete the key's value outright (freeing its large buffer, if any).
    Delete,
    /// Replace the value. The driver also frees the replaced value's old
    /// large buffer when the new value does not reuse it.
    Put(Value),
}

/// One key mutation, executed exactly once per transaction by the
/// traversal driver, under the key's lock. Policy rejections and provider
/// failures surface in the result code; `Err` is reserved for corruption
/// and misuse.
pub trait ModifyOperation {
    type Code: Copy;

    fn operate(
        &mut self,
        large: &LargeBufStore,
        tx: &mut WriteGuard,
        old: Option<&Value>,
    ) -> Result<(Self::Code, Change)>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FillOutcome {
    Done,
    ProviderFailed,
}

/// Streams the provider's payload into the group's spans. A provider
/// failure is reported as a value; storage may be partially overwritten
/// at that point, and the caller unwinds it per case.
pub fn fill_buffer_group(
    provider: &mut dyn DataProvider,
    group: &BufferGroup,
    inline: &mut [u8],
    tx: &mut WriteGuard,
) -> Result<FillOutcome> {
    if group.total_len() as u64 != provider.size() {
        return Err(VesperError::Invalid(
            "buffer group does not cover provider payload",
        ));
    }
    for span in group.spans() {
        let filled = match span.dest {
            SpanDest::Value { offset } => {
                let end = offset + span.len;
                if end > inline.len() {
                    return Err(VesperError::Invalid("inline span out of bounds"));
                }
                provider.fill(&mut inline[offset..end])
            }
            SpanDest::Segment { page, offset } => {
                let mut frame = tx.page_mut(page)?;
                let data = frame.data_mut();
                let end = offset + span.len;
                if end > data.len() {
                    return Err(VesperError::Corruption("segment shorter than fill span"));
                }
                provider.fill(&mut data[offset..end])
            }
        };
        if filled.is_err() {
            return Ok(FillOutcome::ProviderFailed);
        }
    }
    Ok(FillOutcome::Done)
}
