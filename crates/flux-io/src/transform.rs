use std::sync::Arc;
use std::time::{Duration, Instant};

use flux_core::{BoxPullPipe, Clock, FluxError, Pipe, PullPipe, Result};

/// Applies `f` to every upstream item (spec §4.F "`Map`").
pub struct MapPipe<In, Out, F> {
    upstream: BoxPullPipe<In>,
    f: F,
    cached: Option<Out>,
}

impl<In, Out, F> MapPipe<In, Out, F>
where
    F: FnMut(In) -> Out,
{
    pub fn new(upstream: BoxPullPipe<In>, f: F) -> Self {
        Self {
            upstream,
            f,
            cached: None,
        }
    }
}

impl<In, Out, F> Pipe for MapPipe<In, Out, F>
where
    F: FnMut(In) -> Out,
{
    fn start(&mut self) -> Result<()> {
        self.upstream.start()
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }

    fn progress(&self) -> f64 {
        self.upstream.progress()
    }
}

impl<In, Out, F> PullPipe<Out> for MapPipe<In, Out, F>
where
    F: FnMut(In) -> Out,
{
    fn next(&mut self) -> Result<Option<Out>> {
        if let Some(item) = self.cached.take() {
            return Ok(Some(item));
        }
        match self.upstream.next()? {
            Some(item) => Ok(Some((self.f)(item))),
            None => Ok(None),
        }
    }

    fn peek(&mut self) -> Result<Option<&Out>> {
        if self.cached.is_none() {
            self.cached = match self.upstream.next()? {
                Some(item) => Some((self.f)(item)),
                None => None,
            };
        }
        Ok(self.cached.as_ref())
    }
}

/// Drops items for which `predicate` returns `false` (spec §4.F "`Filter`").
pub struct FilterPipe<T, F> {
    upstream: BoxPullPipe<T>,
    predicate: F,
    cached: Option<T>,
}

impl<T, F> FilterPipe<T, F>
where
    F: FnMut(&T) -> bool,
{
    pub fn new(upstream: BoxPullPipe<T>, predicate: F) -> Self {
        Self {
            upstream,
            predicate,
            cached: None,
        }
    }

    fn advance(&mut self) -> Result<Option<T>> {
        loop {
            match self.upstream.next()? {
                Some(item) if (self.predicate)(&item) => return Ok(Some(item)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }
}

impl<T, F> Pipe for FilterPipe<T, F>
where
    F: FnMut(&T) -> bool,
{
    fn start(&mut self) -> Result<()> {
        self.upstream.start()
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }

    fn progress(&self) -> f64 {
        self.upstream.progress()
    }
}

impl<T, F> PullPipe<T> for FilterPipe<T, F>
where
    F: FnMut(&T) -> bool,
{
    fn next(&mut self) -> Result<Option<T>> {
        if let Some(item) = self.cached.take() {
            return Ok(Some(item));
        }
        self.advance()
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        if self.cached.is_none() {
            self.cached = self.advance()?;
        }
        Ok(self.cached.as_ref())
    }
}

/// Emits at most `limit` upstream items, then reports end-of-stream without
/// pulling upstream again — once the limit is reached an upstream error
/// that would have surfaced on the next pull is never observed (spec §4.F
/// "`Head` suppresses upstream errors once its count is satisfied").
pub struct HeadPipe<T> {
    upstream: BoxPullPipe<T>,
    limit: u64,
    emitted: u64,
    satisfied: bool,
}

impl<T> HeadPipe<T> {
    pub fn new(upstream: BoxPullPipe<T>, limit: u64) -> Self {
        Self {
            upstream,
            limit,
            emitted: 0,
            satisfied: false,
        }
    }
}

impl<T> Pipe for HeadPipe<T> {
    fn start(&mut self) -> Result<()> {
        self.upstream.start()
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }

    fn progress(&self) -> f64 {
        if self.limit == 0 {
            1.0
        } else {
            (self.emitted.min(self.limit) as f64) / (self.limit as f64)
        }
    }
}

impl<T> PullPipe<T> for HeadPipe<T> {
    fn next(&mut self) -> Result<Option<T>> {
        if self.satisfied || self.emitted >= self.limit {
            self.satisfied = true;
            return Ok(None);
        }
        match self.upstream.next()? {
            Some(item) => {
                self.emitted += 1;
                if self.emitted >= self.limit {
                    self.satisfied = true;
                }
                Ok(Some(item))
            }
            None => {
                self.satisfied = true;
                Ok(None)
            }
        }
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        if self.satisfied || self.emitted >= self.limit {
            return Ok(None);
        }
        self.upstream.peek()
    }
}

/// Concatenates several pull pipes of the same item type into one
/// sequential stream (spec §4.F "`Concat`").
pub struct ConcatPipe<T> {
    remaining: std::collections::VecDeque<BoxPullPipe<T>>,
    current_started: bool,
}

impl<T> ConcatPipe<T> {
    pub fn new(pipes: Vec<BoxPullPipe<T>>) -> Self {
        Self {
            remaining: pipes.into(),
            current_started: false,
        }
    }

    fn advance_to_nonempty(&mut self) -> Result<Option<&mut BoxPullPipe<T>>> {
        loop {
            match self.remaining.front_mut() {
                Some(current) => {
                    if !self.current_started {
                        current.start()?;
                        self.current_started = true;
                    }
                    if current.peek()?.is_some() {
                        return Ok(self.remaining.front_mut());
                    }
                    let mut exhausted = self.remaining.pop_front().expect("front exists");
                    exhausted.close()?;
                    self.current_started = false;
                }
                None => return Ok(None),
            }
        }
    }
}

impl<T> Pipe for ConcatPipe<T> {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut errors = flux_core::CloseErrors::new();
        while let Some(mut pipe) = self.remaining.pop_front() {
            errors.record(pipe.close());
        }
        errors.finish()
    }

    fn progress(&self) -> f64 {
        if self.remaining.is_empty() { 1.0 } else { 0.0 }
    }
}

impl<T> PullPipe<T> for ConcatPipe<T> {
    fn next(&mut self) -> Result<Option<T>> {
        match self.advance_to_nonempty()? {
            Some(current) => current.next(),
            None => Ok(None),
        }
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        match self.advance_to_nonempty()? {
            Some(current) => current.peek(),
            None => Ok(None),
        }
    }
}

/// Invokes a side-effecting callback for every item that passes through,
/// unmodified (spec §4.F "`Callback`").
pub struct CallbackPipe<T, F> {
    upstream: BoxPullPipe<T>,
    on_item: F,
}

impl<T, F> CallbackPipe<T, F>
where
    F: FnMut(&T),
{
    pub fn new(upstream: BoxPullPipe<T>, on_item: F) -> Self {
        Self { upstream, on_item }
    }
}

impl<T, F> Pipe for CallbackPipe<T, F>
where
    F: FnMut(&T),
{
    fn start(&mut self) -> Result<()> {
        self.upstream.start()
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }

    fn progress(&self) -> f64 {
        self.upstream.progress()
    }
}

impl<T, F> PullPipe<T> for CallbackPipe<T, F>
where
    F: FnMut(&T),
{
    fn next(&mut self) -> Result<Option<T>> {
        match self.upstream.next()? {
            Some(item) => {
                (self.on_item)(&item);
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        self.upstream.peek()
    }
}

/// Fails the stream with a `Timeout` error once `deadline` has elapsed
/// since `start()` (spec §4.F "`Timeout`" — the pipe's own scheduler ticks
/// off a caller-provided [`Clock`] rather than the wall clock directly, so
/// tests can drive it deterministically).
pub struct TimeoutPipe<T> {
    upstream: BoxPullPipe<T>,
    clock: Arc<dyn Clock>,
    deadline: Duration,
    started_at: Option<Instant>,
}

impl<T> TimeoutPipe<T> {
    pub fn new(upstream: BoxPullPipe<T>, clock: Arc<dyn Clock>, deadline: Duration) -> Self {
        Self {
            upstream,
            clock,
            deadline,
            started_at: None,
        }
    }

    fn check_deadline(&self) -> Result<()> {
        if let Some(started_at) = self.started_at {
            if self.clock.now().duration_since(started_at) > self.deadline {
                return Err(FluxError::timeout("TimeoutPipe: deadline elapsed"));
            }
        }
        Ok(())
    }
}

impl<T> Pipe for TimeoutPipe<T> {
    fn start(&mut self) -> Result<()> {
        self.started_at = Some(self.clock.now());
        self.upstream.start()
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }

    fn progress(&self) -> f64 {
        self.upstream.progress()
    }
}

impl<T> PullPipe<T> for TimeoutPipe<T> {
    fn next(&mut self) -> Result<Option<T>> {
        self.check_deadline()?;
        self.upstream.next()
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        self.check_deadline()?;
        self.upstream.peek()
    }
}

/// Validates that the key extracted from each successive item is
/// non-decreasing, raising `OutOfOrder` the moment it isn't (spec §4.F
/// "`OrderValidation`", §7 "a sorted stream observed a decreasing key").
pub struct OrderValidationPipe<T, K, F> {
    upstream: BoxPullPipe<T>,
    key_of: F,
    last_key: Option<K>,
}

impl<T, K, F> OrderValidationPipe<T, K, F>
where
    K: PartialOrd + Clone,
    F: Fn(&T) -> K,
{
    pub fn new(upstream: BoxPullPipe<T>, key_of: F) -> Self {
        Self {
            upstream,
            key_of,
            last_key: None,
        }
    }
}

impl<T, K, F> Pipe for OrderValidationPipe<T, K, F>
where
    K: PartialOrd + Clone,
    F: Fn(&T) -> K,
{
    fn start(&mut self) -> Result<()> {
        self.upstream.start()
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }

    fn progress(&self) -> f64 {
        self.upstream.progress()
    }
}

impl<T, K, F> PullPipe<T> for OrderValidationPipe<T, K, F>
where
    K: PartialOrd + Clone,
    F: Fn(&T) -> K,
{
    fn next(&mut self) -> Result<Option<T>> {
        match self.upstream.next()? {
            Some(item) => {
                let key = (self.key_of)(&item);
                if let Some(last_key) = &self.last_key {
                    if key < *last_key {
                        return Err(FluxError::out_of_order(
                            "OrderValidationPipe: key decreased relative to previous item",
                        ));
                    }
                }
                self.last_key = Some(key);
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        self.upstream.peek()
    }
}
