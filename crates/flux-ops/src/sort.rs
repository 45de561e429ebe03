use std::cmp::Ordering;
use std::path::PathBuf;

use flux_core::{BoxPullPipe, Codec, CloseErrors, FluxError, Pipe, PullPipe, Result, WriteOptions};

use crate::framed::{FramedReader, FramedWriter};

/// Sorts an unbounded upstream without holding it entirely in memory (spec
/// §4.G "External sort"): at `start`, spills sorted in-memory runs to temp
/// files, then streams their union via a running minimum over each run's
/// cached lookahead item — the same role a binary heap plays, sized down
/// here since `run_count` stays small relative to item count and a
/// comparator-driven `Ord` impl would need a wrapper type either way.
pub struct ExternalSort<T, C, Cmp> {
    upstream: BoxPullPipe<T>,
    codec: C,
    compare: Cmp,
    run_size: usize,
    temp_root: PathBuf,
    runs: Vec<FramedReader<C>>,
    heads: Vec<Option<T>>,
    temp_paths: Vec<PathBuf>,
    started: bool,
    total: u64,
    emitted: u64,
}

impl<T, C, Cmp> ExternalSort<T, C, Cmp>
where
    C: Codec<T> + Clone,
    Cmp: Fn(&T, &T) -> Ordering,
{
    pub fn new(upstream: BoxPullPipe<T>, codec: C, compare: Cmp, run_size: usize, options: &WriteOptions) -> Self {
        assert!(run_size > 0, "run_size must be positive");
        Self {
            upstream,
            codec,
            compare,
            run_size,
            temp_root: options.temp.clone(),
            runs: Vec::new(),
            heads: Vec::new(),
            temp_paths: Vec::new(),
            started: false,
            total: 0,
            emitted: 0,
        }
    }

    fn find_min_index(&self) -> Option<usize> {
        let mut min_idx: Option<usize> = None;
        for i in 0..self.heads.len() {
            if let Some(candidate) = &self.heads[i] {
                min_idx = match min_idx {
                    None => Some(i),
                    Some(current_idx) => {
                        let current = self.heads[current_idx].as_ref().expect("index tracked as Some");
                        if (self.compare)(candidate, current) == Ordering::Less {
                            Some(i)
                        } else {
                            Some(current_idx)
                        }
                    }
                };
            }
        }
        min_idx
    }
}

impl<T, C, Cmp> Pipe for ExternalSort<T, C, Cmp>
where
    C: Codec<T> + Clone,
    Cmp: Fn(&T, &T) -> Ordering,
{
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.upstream.start()?;

        let mut run_paths = Vec::new();
        loop {
            let mut buffer = Vec::with_capacity(self.run_size);
            while buffer.len() < self.run_size {
                match self.upstream.next()? {
                    Some(item) => buffer.push(item),
                    None => break,
                }
            }
            if buffer.is_empty() {
                break;
            }
            buffer.sort_by(|a, b| (self.compare)(a, b));
            self.total += buffer.len() as u64;

            let path = self.temp_root.join(format!("run-{}", run_paths.len()));
            let mut writer = FramedWriter::create(&path, self.codec.clone())?;
            for item in &buffer {
                writer.write(item)?;
            }
            writer.finish()?;
            run_paths.push(path);
        }
        self.upstream.close()?;

        for path in &run_paths {
            self.runs.push(FramedReader::open(path, self.codec.clone())?);
        }
        self.heads = Vec::with_capacity(self.runs.len());
        for reader in self.runs.iter_mut() {
            self.heads.push(reader.read_next()?);
        }
        self.temp_paths = run_paths;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut errors = CloseErrors::new();
        for path in self.temp_paths.drain(..) {
            errors.record(
                std::fs::remove_file(&path).map_err(|err| FluxError::io_from(err, "ExternalSort::close")),
            );
        }
        errors.finish()
    }

    fn progress(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.emitted.min(self.total) as f64) / (self.total as f64)
        }
    }
}

impl<T, C, Cmp> PullPipe<T> for ExternalSort<T, C, Cmp>
where
    C: Codec<T> + Clone,
    Cmp: Fn(&T, &T) -> Ordering,
{
    fn next(&mut self) -> Result<Option<T>> {
        match self.find_min_index() {
            None => Ok(None),
            Some(i) => {
                let item = self.heads[i].take().expect("index tracked as Some");
                self.heads[i] = self.runs[i].read_next()?;
                self.emitted += 1;
                Ok(Some(item))
            }
        }
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        match self.find_min_index() {
            None => Ok(None),
            Some(i) => Ok(self.heads[i].as_ref()),
        }
    }
}
