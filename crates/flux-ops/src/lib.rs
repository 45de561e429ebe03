//! Disk-backed batch operators built on top of `flux-io`'s pipe contracts:
//! external sort, the three hash/sequential/item sharders, and the family
//! of reductors (sequence, hash, grouper, list, dedup).
//!
//! [`framed`] is the shared length-prefixed record format every
//! disk-backed operator here spills its temp files through.

mod framed;
mod reduce;
mod shard;
mod sort;

pub use framed::{FramedReader, FramedWriter};
pub use reduce::{DedupPipe, GrouperPipe, HashReductorPipe, ListReductor, SequenceReductorPipe};
pub use shard::{
    HashShardRouter, IntermediateSharder, ItemShardRouter, Sharder, SharderByHash, SharderByItem,
    SharderBySeq, SequentialShardRouter, ShardResult,
};
pub use sort::ExternalSort;
