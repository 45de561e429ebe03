use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::path::PathBuf;

use flux_core::{
    BoxPullPipe, Codec, CloseErrors, FluxError, JoinMode, JoinRecord, Pipe, PullPipe, Result, WriteOptions,
};
use flux_ops::{FramedReader, FramedWriter};

/// Disk-backed join for a right side too large to buffer in memory (spec
/// §4.I "HashJoinPipe"): partitions the left pipe and every right pipe into
/// `partition_count` buckets by `key_bytes(key_of(item))`, then joins each
/// bucket pair with an in-memory pass once both sides are fully written.
/// Matching keys always land in the same bucket across streams, so the
/// per-bucket join sees every match a full in-memory join would.
pub struct HashJoinPipe<V, K, KeyOf, KeyBytes, C> {
    left: BoxPullPipe<V>,
    rights: Vec<BoxPullPipe<V>>,
    key_of: KeyOf,
    key_bytes: KeyBytes,
    codec: C,
    mode: JoinMode,
    partition_count: usize,
    temp_root: PathBuf,
    left_bucket_paths: Vec<Option<PathBuf>>,
    right_bucket_paths: Vec<Vec<Option<PathBuf>>>,
    next_bucket: usize,
    buffer: VecDeque<JoinRecord<K, V>>,
    started: bool,
    _key: std::marker::PhantomData<K>,
}

impl<V, K, KeyOf, KeyBytes, C> HashJoinPipe<V, K, KeyOf, KeyBytes, C>
where
    V: Clone,
    K: Eq + Hash + Clone,
    KeyOf: Fn(&V) -> K,
    KeyBytes: Fn(&K) -> Vec<u8>,
    C: Codec<V> + Clone,
{
    pub fn new(
        left: BoxPullPipe<V>,
        rights: Vec<BoxPullPipe<V>>,
        key_of: KeyOf,
        key_bytes: KeyBytes,
        codec: C,
        mode: JoinMode,
        partition_count: usize,
        options: &WriteOptions,
    ) -> Self {
        assert!(partition_count > 0, "partition_count must be positive");
        let right_count = rights.len();
        Self {
            left,
            rights,
            key_of,
            key_bytes,
            codec,
            mode,
            partition_count,
            temp_root: options.temp.clone(),
            left_bucket_paths: Vec::new(),
            right_bucket_paths: vec![Vec::new(); right_count],
            next_bucket: 0,
            buffer: VecDeque::new(),
            started: false,
            _key: std::marker::PhantomData,
        }
    }

    fn partition(
        upstream: &mut BoxPullPipe<V>,
        key_of: &KeyOf,
        key_bytes: &KeyBytes,
        partition_count: usize,
        dir: &std::path::Path,
        codec: &C,
    ) -> Result<Vec<Option<PathBuf>>> {
        std::fs::create_dir_all(dir).map_err(|err| FluxError::io_from(err, "HashJoinPipe: create bucket dir"))?;
        let mut writers: Vec<Option<FramedWriter<C>>> = Vec::with_capacity(partition_count);
        writers.resize_with(partition_count, || None);

        while let Some(item) = upstream.next()? {
            let key = key_of(&item);
            let bytes = key_bytes(&key);
            let index = flux_util::shard_index(&bytes, partition_count);
            if writers[index].is_none() {
                let path = dir.join(index.to_string());
                writers[index] = Some(FramedWriter::create(path, codec.clone())?);
            }
            writers[index].as_mut().expect("inserted above").write(&item)?;
        }

        let mut paths = Vec::with_capacity(partition_count);
        for writer in writers {
            match writer {
                Some(writer) => paths.push(Some(writer.finish()?)),
                None => paths.push(None),
            }
        }
        Ok(paths)
    }

    fn refill_buffer(&mut self) -> Result<()> {
        while self.buffer.is_empty() && self.next_bucket < self.partition_count {
            let bucket = self.next_bucket;
            self.next_bucket += 1;

            let mut right_by_key: HashMap<K, Vec<(usize, V)>> = HashMap::new();
            for (pipe_index, paths) in self.right_bucket_paths.iter().enumerate() {
                let Some(path) = &paths[bucket] else { continue };
                let mut reader = FramedReader::open(path, self.codec.clone())?;
                while let Some(value) = reader.read_next::<V>()? {
                    let key = (self.key_of)(&value);
                    right_by_key.entry(key).or_default().push((pipe_index, value));
                }
            }

            let mut visited = std::collections::HashSet::new();
            if let Some(path) = &self.left_bucket_paths[bucket] {
                let mut reader = FramedReader::open(path, self.codec.clone())?;
                while let Some(value) = reader.read_next::<V>()? {
                    let key = (self.key_of)(&value);
                    visited.insert(key.clone());
                    let mut right_present = vec![false; self.rights.len()];
                    let mut record = JoinRecord::new(key.clone());
                    record.left_matches.push(value);
                    if let Some(matches) = right_by_key.get(&key) {
                        for (pipe_index, right_value) in matches {
                            right_present[*pipe_index] = true;
                            record.push_right(*pipe_index, right_value.clone());
                        }
                    }
                    if self.mode.should_output(true, &right_present) {
                        self.buffer.push_back(record);
                    }
                }
            }

            if matches!(self.mode, JoinMode::Outer) {
                for (key, matches) in &right_by_key {
                    if visited.contains(key) {
                        continue;
                    }
                    let mut record = JoinRecord::new(key.clone());
                    for (pipe_index, right_value) in matches {
                        record.push_right(*pipe_index, right_value.clone());
                    }
                    self.buffer.push_back(record);
                }
            }
        }
        Ok(())
    }
}

impl<V, K, KeyOf, KeyBytes, C> Pipe for HashJoinPipe<V, K, KeyOf, KeyBytes, C>
where
    V: Clone,
    K: Eq + Hash + Clone,
    KeyOf: Fn(&V) -> K,
    KeyBytes: Fn(&K) -> Vec<u8>,
    C: Codec<V> + Clone,
{
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        self.left.start()?;
        let left_dir = self.temp_root.join("left");
        let left_bucket_paths = {
            let key_of = &self.key_of;
            let key_bytes = &self.key_bytes;
            let codec = &self.codec;
            Self::partition(&mut self.left, key_of, key_bytes, self.partition_count, &left_dir, codec)?
        };
        self.left.close()?;
        self.left_bucket_paths = left_bucket_paths;

        for (pipe_index, right) in self.rights.iter_mut().enumerate() {
            right.start()?;
            let right_dir = self.temp_root.join(format!("right-{pipe_index}"));
            let paths = {
                let key_of = &self.key_of;
                let key_bytes = &self.key_bytes;
                let codec = &self.codec;
                Self::partition(right, key_of, key_bytes, self.partition_count, &right_dir, codec)?
            };
            right.close()?;
            self.right_bucket_paths[pipe_index] = paths;
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut errors = CloseErrors::new();
        for path in self.left_bucket_paths.drain(..).flatten() {
            errors.record(std::fs::remove_file(&path).map_err(|err| FluxError::io_from(err, "HashJoinPipe::close")));
        }
        for paths in self.right_bucket_paths.iter_mut() {
            for path in paths.drain(..).flatten() {
                errors.record(std::fs::remove_file(&path).map_err(|err| FluxError::io_from(err, "HashJoinPipe::close")));
            }
        }
        errors.finish()
    }

    fn progress(&self) -> f64 {
        if self.partition_count == 0 {
            1.0
        } else {
            (self.next_bucket.min(self.partition_count) as f64) / (self.partition_count as f64)
        }
    }
}

impl<V, K, KeyOf, KeyBytes, C> PullPipe<JoinRecord<K, V>> for HashJoinPipe<V, K, KeyOf, KeyBytes, C>
where
    V: Clone,
    K: Eq + Hash + Clone,
    KeyOf: Fn(&V) -> K,
    KeyBytes: Fn(&K) -> Vec<u8>,
    C: Codec<V> + Clone,
{
    fn next(&mut self) -> Result<Option<JoinRecord<K, V>>> {
        if self.buffer.is_empty() {
            self.refill_buffer()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn peek(&mut self) -> Result<Option<&JoinRecord<K, V>>> {
        if self.buffer.is_empty() {
            self.refill_buffer()?;
        }
        Ok(self.buffer.front())
    }
}
