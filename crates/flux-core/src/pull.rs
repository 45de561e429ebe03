use crate::error::Result;
use crate::pipe::Pipe;

/// A pull pipe, driven entirely by downstream calls to `next`/`peek` (spec
/// §3 "Pull pipe").
///
/// Contract: the thread that calls `start` owns `next`/`peek`/`close`
/// unless a concrete implementation documents itself as thread-safe.
/// `peek` is idempotent until the matching `next` consumes the cached item.
/// Once `next` returns `Ok(None)`, every later call also returns
/// `Ok(None)` — end of stream is sticky (spec §8 "pull totality").
pub trait PullPipe<T>: Pipe {
    /// Returns the next item, or `Ok(None)` at end of stream.
    fn next(&mut self) -> Result<Option<T>>;

    /// Returns the next item without consuming it. Calling `peek` twice in
    /// a row without an intervening `next` returns the same value.
    fn peek(&mut self) -> Result<Option<&T>>;
}

/// A boxed, type-erased pull pipe — the common currency for composing
/// heterogeneous pull pipelines (e.g. the N right-hand sides of a join).
pub type BoxPullPipe<T> = Box<dyn PullPipe<T> + Send>;
