use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{FluxError, Result};

/// Downstream listener for a [`PushPipe`]. Methods may be invoked
/// concurrently from multiple producer threads — implementations must be
/// internally safe (spec §3 "Push pipe").
pub trait Listener<T>: Send + Sync {
    fn on_next(&self, item: T);
    fn on_done(&self);
    fn on_error(&self, err: FluxError);
}

/// A push pipe drives emission into a downstream [`Listener`] rather than
/// being polled. It owns the thread(s)/task(s) that produce items and must
/// call exactly one terminal listener method (`on_done` or `on_error`) per
/// run (spec §3, §4.C, §8 "exactly-one terminal").
pub trait PushPipe<T>: Send + Sync {
    /// Registers the downstream listener. Must be called exactly once,
    /// before [`PushPipe::start`].
    fn set_listener(&self, listener: Arc<dyn Listener<T>>);

    /// Begins production. May return before the terminal listener call —
    /// emission continues on producer threads owned by this pipe.
    fn start(&self) -> Result<()>;

    /// Cancels outstanding producers and releases owned resources. Safe to
    /// call from any thread, safe to call more than once, and does not
    /// itself notify the listener (spec §4.E: "on external close before
    /// completion, workers are interrupted and the listener is not
    /// further notified").
    fn close(&self) -> Result<()>;

    fn progress(&self) -> f64;
}

/// Wraps a `Listener<T>` and enforces the exactly-one-terminal contract at
/// the point of emission, so every `PushPipe` implementation gets the
/// invariant for free instead of re-deriving it.
///
/// Grounded on the teacher's pattern of a thin internal wrapper around the
/// handler chain that guards against double-firing a terminal event
/// (`data_plane/pipeline/internal.rs` in the teacher crate keeps a similar
/// "already completed" guard around its completion callback).
pub struct TerminalGuard<T> {
    listener: Arc<dyn Listener<T>>,
    fired: AtomicBool,
}

impl<T> TerminalGuard<T> {
    pub fn new(listener: Arc<dyn Listener<T>>) -> Self {
        Self {
            listener,
            fired: AtomicBool::new(false),
        }
    }

    /// Forwards an item downstream. No-op once a terminal call has fired,
    /// since spec §4.C treats post-terminal emission as a bug the pipe
    /// must not commit — debug builds catch it loudly, release builds
    /// degrade to a dropped item rather than a broken invariant downstream.
    pub fn emit(&self, item: T) {
        if self.fired.load(Ordering::Acquire) {
            debug_assert!(false, "emit() called after a terminal listener call");
            return;
        }
        self.listener.on_next(item);
    }

    /// Fires `on_done` exactly once; later calls (from either terminal
    /// method) are no-ops.
    pub fn done(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.listener.on_done();
    }

    /// Fires `on_error` exactly once; later calls are no-ops.
    pub fn error(&self, err: FluxError) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.listener.on_error(err);
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
