//! Leaf pull sources and terminal sinks, stateless pull-pipe transformers,
//! and the two sync/async bridge adapters (`SyncToAsync`, `AsyncToSync`).
//!
//! Every stateful operator that composes these (sort, shard, reduce, join,
//! shuffle) lives in the sibling `flux-ops`/`flux-join`/`flux-shuffle`
//! crates and depends on this one for the pipe contracts it builds on.

mod bridge;
mod sink;
mod source;
mod transform;

pub use bridge::{AsyncToSync, SyncToAsync};
pub use sink::{CollectionSink, ConsumerSink, MapSink, QueueItem, QueueSink, TerminalSink};
pub use source::{IteratorSource, ReaderPipe, SeqGenSource, collection_source};
pub use transform::{
    CallbackPipe, ConcatPipe, FilterPipe, HeadPipe, MapPipe, OrderValidationPipe, TimeoutPipe,
};
