//! Scatter-gather destination list for one fill.

use smallvec::SmallVec;
use vesper_types::PageId;

/// Where one span's bytes land.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpanDest {
    /// Into the inline bytes of the value under construction.
    Value { offset: usize },
    /// Into an overflow page, at an absolute byte offset within the page.
    Segment { page: PageId, offset: usize },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Span {
    pub len: usize,
    pub dest: SpanDest,
}

/// Ordered list of destination spans presenting discontiguous memory as a
/// single fillable sink. Pure bookkeeping: bytes move only when the fill
/// step resolves each span against the transaction, one at a time and in
/// order. Once filling starts the group must not change.
#[derive(Default)]
pub struct BufferGroup {
    spans: SmallVec<[Span; 4]>,
    total_len: usize,
}

impl BufferGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_span(&mut self, len: usize, dest: SpanDest) {
        self.spans.push(Span { len, dest });
        self.total_len += len;
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Sum of all span lengths; must equal the byte count the data
    /// provider was asked for.
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}
