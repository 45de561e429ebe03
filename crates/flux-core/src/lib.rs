//! Core contracts for the `flux` pipeline framework: pipe lifecycle,
//! pull/push dataflow disciplines, the relational/streaming data model
//! (shards, join records, reductor configuration), progress tracking, and
//! the codec/storage SPIs external collaborators implement.
//!
//! Everything stateful — sources, sinks, transformers, sharders, joins,
//! the shuffler — lives in sibling crates (`flux-io`, `flux-ops`,
//! `flux-join`, `flux-shuffle`) and depends on this one.

mod clock;
mod codec;
mod error;
mod model;
mod options;
mod pipe;
mod progress;
mod pull;
mod push;
mod storage;

pub use clock::{Clock, FakeClock, SystemClock};
pub use codec::{Codec, CodecFactory, Decoder, Encoder};
pub use error::{CloseErrors, FluxError, FluxErrorKind, Result};
pub use model::{GroupSizePolicy, JoinMode, JoinRecord, ReductorConfig, Shard};
pub use options::{Compression, ReadOptions, WriteOptions};
pub use pipe::Pipe;
pub use progress::{Progress, ProgressRescale};
pub use pull::{BoxPullPipe, PullPipe};
pub use push::{Listener, PushPipe, TerminalGuard};
pub use storage::{Bucket, ObjectMetadata};

/// Re-exports the traits and types most pipe implementations need, the way
/// the teacher crate's `spark_core::prelude` collects its transport-layer
/// contracts into one glob import.
pub mod prelude {
    pub use crate::{
        Bucket, Clock, Codec, CodecFactory, Compression, Decoder, Encoder, FluxError,
        FluxErrorKind, GroupSizePolicy, JoinMode, JoinRecord, Listener, ObjectMetadata, Pipe,
        Progress, ProgressRescale, PullPipe, PushPipe, ReadOptions, ReductorConfig, Result, Shard,
        SystemClock, TerminalGuard, WriteOptions,
    };
}
