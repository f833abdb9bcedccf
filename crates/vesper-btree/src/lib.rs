#![forbid(unsafe_code)]

//! Value mutation core of the B-tree: the node value representation and
//! its codec, the scatter-gather buffer group, and the modify operations
//! (set, append/prepend) the traversal driver runs under its key lock.

pub mod append_prepend;
pub mod buffer_group;
pub mod modify;
pub mod set;
pub mod value;

pub use append_prepend::{AppendPrependOperation, AppendPrependResult, ExtendDir};
pub use buffer_group::{BufferGroup, Span, SpanDest};
pub use modify::{Change, DataProvider, ModifyOperation, ProviderFailed};
pub use set::{SetMode, SetObserver, SetOperation, SetResult};
pub use value::{Payload, Value, ValueMeta};
