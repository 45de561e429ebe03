//! Distributed shuffle push pipe (spec §4.J): repartitions a local stream
//! across a fixed set of worker peers over TCP, each worker simultaneously
//! serving its own shard and sending to every other peer's.

mod client;
mod server;
mod shuffle;
mod wire;

pub use client::PeerClient;
pub use shuffle::{Shuffler, ShufflerConfig};
pub use wire::Frame;
