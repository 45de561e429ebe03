use std::io::BufRead;

use flux_core::{FluxError, Pipe, PullPipe, Result};

/// Generates `{f(0), f(1), ...}` until `f` returns `None` or an optional
/// count is reached (spec §4.D "`SeqGen`").
pub struct SeqGenSource<T, F> {
    generator: F,
    next_index: u64,
    limit: Option<u64>,
    cached: Option<T>,
    exhausted: bool,
}

impl<T, F> SeqGenSource<T, F>
where
    F: FnMut(u64) -> Option<T>,
{
    pub fn new(generator: F) -> Self {
        Self {
            generator,
            next_index: 0,
            limit: None,
            cached: None,
            exhausted: false,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn advance(&mut self) -> Option<T> {
        if self.exhausted {
            return None;
        }
        if let Some(limit) = self.limit {
            if self.next_index >= limit {
                self.exhausted = true;
                return None;
            }
        }
        match (self.generator)(self.next_index) {
            Some(value) => {
                self.next_index += 1;
                Some(value)
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

impl<T, F> Pipe for SeqGenSource<T, F>
where
    F: FnMut(u64) -> Option<T>,
{
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn progress(&self) -> f64 {
        match self.limit {
            Some(limit) if limit > 0 => (self.next_index.min(limit) as f64) / (limit as f64),
            Some(_) => 1.0,
            None => {
                if self.exhausted {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl<T, F> PullPipe<T> for SeqGenSource<T, F>
where
    F: FnMut(u64) -> Option<T>,
{
    fn next(&mut self) -> Result<Option<T>> {
        if let Some(value) = self.cached.take() {
            return Ok(Some(value));
        }
        Ok(self.advance())
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        if self.cached.is_none() {
            self.cached = self.advance();
        }
        Ok(self.cached.as_ref())
    }
}

/// Wraps any `Iterator<Item = T>` as a pull pipe (spec §4.D "`Collection`
/// and `Iterator` sources wrap an in-memory sequence").
pub struct IteratorSource<I: Iterator> {
    iter: I,
    total_hint: Option<usize>,
    consumed: usize,
    cached: Option<I::Item>,
}

impl<I: Iterator> IteratorSource<I> {
    pub fn new(iter: I) -> Self {
        Self {
            iter,
            total_hint: None,
            consumed: 0,
            cached: None,
        }
    }

    fn advance(&mut self) -> Option<I::Item> {
        let next = self.iter.next();
        if next.is_some() {
            self.consumed += 1;
        }
        next
    }
}

impl<I: Iterator> Pipe for IteratorSource<I> {
    fn start(&mut self) -> Result<()> {
        self.total_hint = self.total_hint.or_else(|| {
            let (_, upper) = self.iter.size_hint();
            upper
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn progress(&self) -> f64 {
        match self.total_hint {
            Some(total) if total > 0 => (self.consumed.min(total) as f64) / (total as f64),
            _ => 0.0,
        }
    }
}

impl<I: Iterator> PullPipe<I::Item> for IteratorSource<I> {
    fn next(&mut self) -> Result<Option<I::Item>> {
        if let Some(value) = self.cached.take() {
            return Ok(Some(value));
        }
        Ok(self.advance())
    }

    fn peek(&mut self) -> Result<Option<&I::Item>> {
        if self.cached.is_none() {
            self.cached = self.advance();
        }
        Ok(self.cached.as_ref())
    }
}

/// An in-memory collection source — a convenience wrapper over
/// [`IteratorSource`] for the common case of owning a `Vec<T>`.
pub fn collection_source<T>(items: Vec<T>) -> IteratorSource<std::vec::IntoIter<T>> {
    let mut source = IteratorSource::new(items.into_iter());
    source.total_hint = None;
    source
}

/// Yields one line per `next()` from a `BufRead` (spec §4.D "`ReaderPipe`
/// yields one line per `next`").
pub struct ReaderPipe<R> {
    reader: R,
    cached: Option<String>,
    done: bool,
}

impl<R: BufRead> ReaderPipe<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            cached: None,
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }
        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .map_err(|err| FluxError::io_from(err, "ReaderPipe::read_line"))?;
        if bytes_read == 0 {
            self.done = true;
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

impl<R: BufRead> Pipe for ReaderPipe<R> {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.done = true;
        Ok(())
    }

    fn progress(&self) -> f64 {
        if self.done { 1.0 } else { 0.0 }
    }
}

impl<R: BufRead> PullPipe<String> for ReaderPipe<R> {
    fn next(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.cached.take() {
            return Ok(Some(line));
        }
        self.read_line()
    }

    fn peek(&mut self) -> Result<Option<&String>> {
        if self.cached.is_none() {
            self.cached = self.read_line()?;
        }
        Ok(self.cached.as_ref())
    }
}
