use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::PathBuf;

use flux_core::{
    BoxPullPipe, Codec, CloseErrors, FluxError, GroupSizePolicy, Pipe, PullPipe, ReductorConfig,
    Result, WriteOptions,
};

use crate::framed::{FramedReader, FramedWriter};

/// Streaming reductor assuming equal keys are already contiguous in the
/// upstream: emits `finalize(acc)` exactly when the key changes or
/// end-of-stream is reached, with O(1) memory per group (spec §4.H
/// "SequenceReductorPipe").
pub struct SequenceReductorPipe<Item, Key, Acc, Out, Cfg> {
    upstream: BoxPullPipe<Item>,
    config: Cfg,
    current: Option<(Key, Acc)>,
    exhausted: bool,
    cached: Option<Out>,
}

impl<Item, Key, Acc, Out, Cfg> SequenceReductorPipe<Item, Key, Acc, Out, Cfg>
where
    Key: PartialEq,
    Cfg: ReductorConfig<Item, Key, Acc, Out>,
{
    pub fn new(upstream: BoxPullPipe<Item>, config: Cfg) -> Self {
        Self {
            upstream,
            config,
            current: None,
            exhausted: false,
            cached: None,
        }
    }

    fn advance(&mut self) -> Result<Option<Out>> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            match self.upstream.next()? {
                Some(item) => {
                    let key = self.config.discriminate(&item);
                    match self.current.take() {
                        None => {
                            let acc = self.config.init(&key);
                            let acc = self.config.fold(acc, item);
                            self.current = Some((key, acc));
                        }
                        Some((current_key, acc)) if current_key == key => {
                            let acc = self.config.fold(acc, item);
                            self.current = Some((current_key, acc));
                        }
                        Some((current_key, acc)) => {
                            let out = self.config.finalize(current_key, acc);
                            let new_acc = self.config.fold(self.config.init(&key), item);
                            self.current = Some((key, new_acc));
                            return Ok(Some(out));
                        }
                    }
                }
                None => {
                    self.exhausted = true;
                    return match self.current.take() {
                        Some((key, acc)) => Ok(Some(self.config.finalize(key, acc))),
                        None => Ok(None),
                    };
                }
            }
        }
    }
}

impl<Item, Key, Acc, Out, Cfg> Pipe for SequenceReductorPipe<Item, Key, Acc, Out, Cfg>
where
    Key: PartialEq,
    Cfg: ReductorConfig<Item, Key, Acc, Out>,
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

impl<Item, Key, Acc, Out, Cfg> PullPipe<Out> for SequenceReductorPipe<Item, Key, Acc, Out, Cfg>
where
    Key: PartialEq,
    Cfg: ReductorConfig<Item, Key, Acc, Out>,
{
    fn next(&mut self) -> Result<Option<Out>> {
        if let Some(out) = self.cached.take() {
            return Ok(Some(out));
        }
        self.advance()
    }

    fn peek(&mut self) -> Result<Option<&Out>> {
        if self.cached.is_none() {
            self.cached = self.advance()?;
        }
        Ok(self.cached.as_ref())
    }
}

/// Disk-backed reductor for upstreams with no ordering guarantee: hash-
/// partitions into `partition_count` buckets by the discriminated key,
/// then per bucket folds an in-memory `map<key, acc>` bounded by that
/// bucket's distinct key count (spec §4.H "HashReductorPipe"). Buckets are
/// consumed in index order; emission order within a bucket is the map's
/// iteration order.
pub struct HashReductorPipe<Item, Key, Acc, Out, Cfg, KeyBytes, C> {
    upstream: BoxPullPipe<Item>,
    config: Cfg,
    key_bytes: KeyBytes,
    partition_count: usize,
    codec: C,
    temp_root: PathBuf,
    bucket_paths: Vec<PathBuf>,
    next_bucket_idx: usize,
    buffer: VecDeque<Out>,
    started: bool,
    _key_acc: PhantomData<fn() -> (Key, Acc)>,
}

impl<Item, Key, Acc, Out, Cfg, KeyBytes, C> HashReductorPipe<Item, Key, Acc, Out, Cfg, KeyBytes, C>
where
    Key: Eq + Hash,
    Cfg: ReductorConfig<Item, Key, Acc, Out>,
    KeyBytes: Fn(&Key) -> Vec<u8>,
    C: Codec<Item> + Clone,
{
    pub fn new(
        upstream: BoxPullPipe<Item>,
        config: Cfg,
        key_bytes: KeyBytes,
        partition_count: usize,
        codec: C,
        options: &WriteOptions,
    ) -> Self {
        assert!(partition_count > 0, "partition_count must be positive");
        Self {
            upstream,
            config,
            key_bytes,
            partition_count,
            codec,
            temp_root: options.temp.clone(),
            bucket_paths: Vec::new(),
            next_bucket_idx: 0,
            buffer: VecDeque::new(),
            started: false,
            _key_acc: PhantomData,
        }
    }

    fn refill_buffer(&mut self) -> Result<()> {
        while self.buffer.is_empty() && self.next_bucket_idx < self.bucket_paths.len() {
            let path = self.bucket_paths[self.next_bucket_idx].clone();
            self.next_bucket_idx += 1;

            let mut reader = FramedReader::open(&path, self.codec.clone())?;
            let mut groups: HashMap<Key, Acc> = HashMap::new();
            while let Some(item) = reader.read_next::<Item>()? {
                let key = self.config.discriminate(&item);
                let acc = groups
                    .remove(&key)
                    .unwrap_or_else(|| self.config.init(&key));
                let acc = self.config.fold(acc, item);
                groups.insert(key, acc);
            }
            for (key, acc) in groups {
                self.buffer.push_back(self.config.finalize(key, acc));
            }
        }
        Ok(())
    }
}

impl<Item, Key, Acc, Out, Cfg, KeyBytes, C> Pipe for HashReductorPipe<Item, Key, Acc, Out, Cfg, KeyBytes, C>
where
    Key: Eq + Hash,
    Cfg: ReductorConfig<Item, Key, Acc, Out>,
    KeyBytes: Fn(&Key) -> Vec<u8>,
    C: Codec<Item> + Clone,
{
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.upstream.start()?;

        let mut writers: Vec<Option<FramedWriter<C>>> = Vec::with_capacity(self.partition_count);
        writers.resize_with(self.partition_count, || None);

        while let Some(item) = self.upstream.next()? {
            let key = self.config.discriminate(&item);
            let bytes = (self.key_bytes)(&key);
            let index = flux_util::shard_index(&bytes, self.partition_count);
            if writers[index].is_none() {
                let path = self.temp_root.join(format!("bucket-{index}"));
                writers[index] = Some(FramedWriter::create(path, self.codec.clone())?);
            }
            writers[index].as_mut().expect("inserted above").write(&item)?;
        }
        self.upstream.close()?;

        let mut bucket_paths = Vec::new();
        for writer in writers.into_iter().flatten() {
            bucket_paths.push(writer.finish()?);
        }
        self.bucket_paths = bucket_paths;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut errors = CloseErrors::new();
        for path in self.bucket_paths.drain(..) {
            errors.record(
                std::fs::remove_file(&path).map_err(|err| FluxError::io_from(err, "HashReductorPipe::close")),
            );
        }
        errors.finish()
    }

    fn progress(&self) -> f64 {
        if self.bucket_paths.is_empty() {
            1.0
        } else {
            (self.next_bucket_idx.min(self.bucket_paths.len()) as f64) / (self.bucket_paths.len() as f64)
        }
    }
}

impl<Item, Key, Acc, Out, Cfg, KeyBytes, C> PullPipe<Out> for HashReductorPipe<Item, Key, Acc, Out, Cfg, KeyBytes, C>
where
    Key: Eq + Hash,
    Cfg: ReductorConfig<Item, Key, Acc, Out>,
    KeyBytes: Fn(&Key) -> Vec<u8>,
    C: Codec<Item> + Clone,
{
    fn next(&mut self) -> Result<Option<Out>> {
        if self.buffer.is_empty() {
            self.refill_buffer()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn peek(&mut self) -> Result<Option<&Out>> {
        if self.buffer.is_empty() {
            self.refill_buffer()?;
        }
        Ok(self.buffer.front())
    }
}

/// Uses the same hash-partition machinery as [`HashReductorPipe`] but,
/// instead of folding, re-emits every item of a group as a contiguous run
/// (spec §4.H "Grouper" — the stream comes out ordered *by group*, not by
/// input order, so a downstream [`SequenceReductorPipe`] sees contiguous
/// groups).
pub struct GrouperPipe<Item, Key, Discriminate, KeyBytes, C> {
    upstream: BoxPullPipe<Item>,
    discriminate: Discriminate,
    key_bytes: KeyBytes,
    partition_count: usize,
    codec: C,
    temp_root: PathBuf,
    bucket_paths: Vec<PathBuf>,
    next_bucket_idx: usize,
    buffer: VecDeque<Item>,
    started: bool,
    _key: std::marker::PhantomData<Key>,
}

impl<Item, Key, Discriminate, KeyBytes, C> GrouperPipe<Item, Key, Discriminate, KeyBytes, C>
where
    Key: Eq + Hash,
    Discriminate: Fn(&Item) -> Key,
    KeyBytes: Fn(&Key) -> Vec<u8>,
    C: Codec<Item> + Clone,
{
    pub fn new(
        upstream: BoxPullPipe<Item>,
        discriminate: Discriminate,
        key_bytes: KeyBytes,
        partition_count: usize,
        codec: C,
        options: &WriteOptions,
    ) -> Self {
        assert!(partition_count > 0, "partition_count must be positive");
        Self {
            upstream,
            discriminate,
            key_bytes,
            partition_count,
            codec,
            temp_root: options.temp.clone(),
            bucket_paths: Vec::new(),
            next_bucket_idx: 0,
            buffer: VecDeque::new(),
            started: false,
            _key: std::marker::PhantomData,
        }
    }

    fn refill_buffer(&mut self) -> Result<()> {
        while self.buffer.is_empty() && self.next_bucket_idx < self.bucket_paths.len() {
            let path = self.bucket_paths[self.next_bucket_idx].clone();
            self.next_bucket_idx += 1;

            let mut reader = FramedReader::open(&path, self.codec.clone())?;
            let mut groups: HashMap<Key, Vec<Item>> = HashMap::new();
            while let Some(item) = reader.read_next::<Item>()? {
                let key = (self.discriminate)(&item);
                groups.entry(key).or_default().push(item);
            }
            for (_key, items) in groups {
                self.buffer.extend(items);
            }
        }
        Ok(())
    }
}

impl<Item, Key, Discriminate, KeyBytes, C> Pipe for GrouperPipe<Item, Key, Discriminate, KeyBytes, C>
where
    Key: Eq + Hash,
    Discriminate: Fn(&Item) -> Key,
    KeyBytes: Fn(&Key) -> Vec<u8>,
    C: Codec<Item> + Clone,
{
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.upstream.start()?;

        let mut writers: Vec<Option<FramedWriter<C>>> = Vec::with_capacity(self.partition_count);
        writers.resize_with(self.partition_count, || None);

        while let Some(item) = self.upstream.next()? {
            let key = (self.discriminate)(&item);
            let bytes = (self.key_bytes)(&key);
            let index = flux_util::shard_index(&bytes, self.partition_count);
            if writers[index].is_none() {
                let path = self.temp_root.join(format!("group-bucket-{index}"));
                writers[index] = Some(FramedWriter::create(path, self.codec.clone())?);
            }
            writers[index].as_mut().expect("inserted above").write(&item)?;
        }
        self.upstream.close()?;

        let mut bucket_paths = Vec::new();
        for writer in writers.into_iter().flatten() {
            bucket_paths.push(writer.finish()?);
        }
        self.bucket_paths = bucket_paths;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut errors = CloseErrors::new();
        for path in self.bucket_paths.drain(..) {
            errors.record(
                std::fs::remove_file(&path).map_err(|err| FluxError::io_from(err, "GrouperPipe::close")),
            );
        }
        errors.finish()
    }

    fn progress(&self) -> f64 {
        if self.bucket_paths.is_empty() {
            1.0
        } else {
            (self.next_bucket_idx.min(self.bucket_paths.len()) as f64) / (self.bucket_paths.len() as f64)
        }
    }
}

impl<Item, Key, Discriminate, KeyBytes, C> PullPipe<Item> for GrouperPipe<Item, Key, Discriminate, KeyBytes, C>
where
    Key: Eq + Hash,
    Discriminate: Fn(&Item) -> Key,
    KeyBytes: Fn(&Key) -> Vec<u8>,
    C: Codec<Item> + Clone,
{
    fn next(&mut self) -> Result<Option<Item>> {
        if self.buffer.is_empty() {
            self.refill_buffer()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn peek(&mut self) -> Result<Option<&Item>> {
        if self.buffer.is_empty() {
            self.refill_buffer()?;
        }
        Ok(self.buffer.front())
    }
}

/// Collects contiguous equal-key items into a list, then finalizes the
/// whole list at once (spec §4.H "ListReductor"). `policy` governs what
/// happens once a group exceeds its size limit.
pub struct ListReductor<Item, Key, Out, KeyOf, Finalize> {
    upstream: BoxPullPipe<Item>,
    key_of: KeyOf,
    finalize: Finalize,
    policy: GroupSizePolicy,
    current: Option<(Key, Vec<Item>)>,
    exhausted: bool,
    cached: Option<Out>,
}

impl<Item, Key, Out, KeyOf, Finalize> ListReductor<Item, Key, Out, KeyOf, Finalize>
where
    Key: PartialEq + std::fmt::Debug,
    KeyOf: Fn(&Item) -> Key,
    Finalize: Fn(Key, Vec<Item>) -> Out,
{
    pub fn new(upstream: BoxPullPipe<Item>, key_of: KeyOf, finalize: Finalize, policy: GroupSizePolicy) -> Self {
        Self {
            upstream,
            key_of,
            finalize,
            policy,
            current: None,
            exhausted: false,
            cached: None,
        }
    }

    fn push_with_policy(&self, key: &Key, list: &mut Vec<Item>, item: Item) -> Result<()> {
        match self.policy {
            GroupSizePolicy::Truncate(limit) => {
                if list.len() < limit {
                    list.push(item);
                }
            }
            GroupSizePolicy::Fail(limit) => {
                if list.len() >= limit {
                    return Err(FluxError::excessive_resources(format!(
                        "ListReductor: group size exceeded for key {key:?}"
                    )));
                }
                list.push(item);
            }
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Out>> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            match self.upstream.next()? {
                Some(item) => {
                    let key = (self.key_of)(&item);
                    match self.current.take() {
                        None => {
                            let mut list = Vec::new();
                            self.push_with_policy(&key, &mut list, item)?;
                            self.current = Some((key, list));
                        }
                        Some((current_key, mut list)) if current_key == key => {
                            self.push_with_policy(&current_key, &mut list, item)?;
                            self.current = Some((current_key, list));
                        }
                        Some((current_key, list)) => {
                            let out = (self.finalize)(current_key, list);
                            let mut new_list = Vec::new();
                            self.push_with_policy(&key, &mut new_list, item)?;
                            self.current = Some((key, new_list));
                            return Ok(Some(out));
                        }
                    }
                }
                None => {
                    self.exhausted = true;
                    return match self.current.take() {
                        Some((key, list)) => Ok(Some((self.finalize)(key, list))),
                        None => Ok(None),
                    };
                }
            }
        }
    }
}

impl<Item, Key, Out, KeyOf, Finalize> Pipe for ListReductor<Item, Key, Out, KeyOf, Finalize>
where
    Key: PartialEq + std::fmt::Debug,
    KeyOf: Fn(&Item) -> Key,
    Finalize: Fn(Key, Vec<Item>) -> Out,
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

impl<Item, Key, Out, KeyOf, Finalize> PullPipe<Out> for ListReductor<Item, Key, Out, KeyOf, Finalize>
where
    Key: PartialEq + std::fmt::Debug,
    KeyOf: Fn(&Item) -> Key,
    Finalize: Fn(Key, Vec<Item>) -> Out,
{
    fn next(&mut self) -> Result<Option<Out>> {
        if let Some(out) = self.cached.take() {
            return Ok(Some(out));
        }
        self.advance()
    }

    fn peek(&mut self) -> Result<Option<&Out>> {
        if self.cached.is_none() {
            self.cached = self.advance()?;
        }
        Ok(self.cached.as_ref())
    }
}

/// Disk-backed exact dedup: hash-partitions into buckets, keeps a `set`
/// per bucket, emits the first occurrence of each item (spec §4.H
/// "DedupPipe").
pub struct DedupPipe<Item, KeyBytes, C> {
    upstream: BoxPullPipe<Item>,
    key_bytes: KeyBytes,
    partition_count: usize,
    codec: C,
    temp_root: PathBuf,
    bucket_paths: Vec<PathBuf>,
    next_bucket_idx: usize,
    buffer: VecDeque<Item>,
    started: bool,
}

impl<Item, KeyBytes, C> DedupPipe<Item, KeyBytes, C>
where
    Item: Eq + Hash + Clone,
    KeyBytes: Fn(&Item) -> Vec<u8>,
    C: Codec<Item> + Clone,
{
    pub fn new(upstream: BoxPullPipe<Item>, key_bytes: KeyBytes, partition_count: usize, codec: C, options: &WriteOptions) -> Self {
        assert!(partition_count > 0, "partition_count must be positive");
        Self {
            upstream,
            key_bytes,
            partition_count,
            codec,
            temp_root: options.temp.clone(),
            bucket_paths: Vec::new(),
            next_bucket_idx: 0,
            buffer: VecDeque::new(),
            started: false,
        }
    }

    fn refill_buffer(&mut self) -> Result<()> {
        while self.buffer.is_empty() && self.next_bucket_idx < self.bucket_paths.len() {
            let path = self.bucket_paths[self.next_bucket_idx].clone();
            self.next_bucket_idx += 1;

            let mut reader = FramedReader::open(&path, self.codec.clone())?;
            let mut seen: HashSet<Item> = HashSet::new();
            while let Some(item) = reader.read_next::<Item>()? {
                if seen.insert(item.clone()) {
                    self.buffer.push_back(item);
                }
            }
        }
        Ok(())
    }
}

impl<Item, KeyBytes, C> Pipe for DedupPipe<Item, KeyBytes, C>
where
    Item: Eq + Hash + Clone,
    KeyBytes: Fn(&Item) -> Vec<u8>,
    C: Codec<Item> + Clone,
{
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.upstream.start()?;

        let mut writers: Vec<Option<FramedWriter<C>>> = Vec::with_capacity(self.partition_count);
        writers.resize_with(self.partition_count, || None);

        while let Some(item) = self.upstream.next()? {
            let bytes = (self.key_bytes)(&item);
            let index = flux_util::shard_index(&bytes, self.partition_count);
            if writers[index].is_none() {
                let path = self.temp_root.join(format!("dedup-bucket-{index}"));
                writers[index] = Some(FramedWriter::create(path, self.codec.clone())?);
            }
            writers[index].as_mut().expect("inserted above").write(&item)?;
        }
        self.upstream.close()?;

        let mut bucket_paths = Vec::new();
        for writer in writers.into_iter().flatten() {
            bucket_paths.push(writer.finish()?);
        }
        self.bucket_paths = bucket_paths;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut errors = CloseErrors::new();
        for path in self.bucket_paths.drain(..) {
            errors.record(std::fs::remove_file(&path).map_err(|err| FluxError::io_from(err, "DedupPipe::close")));
        }
        errors.finish()
    }

    fn progress(&self) -> f64 {
        if self.bucket_paths.is_empty() {
            1.0
        } else {
            (self.next_bucket_idx.min(self.bucket_paths.len()) as f64) / (self.bucket_paths.len() as f64)
        }
    }
}

impl<Item, KeyBytes, C> PullPipe<Item> for DedupPipe<Item, KeyBytes, C>
where
    Item: Eq + Hash + Clone,
    KeyBytes: Fn(&Item) -> Vec<u8>,
    C: Codec<Item> + Clone,
{
    fn next(&mut self) -> Result<Option<Item>> {
        if self.buffer.is_empty() {
            self.refill_buffer()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn peek(&mut self) -> Result<Option<&Item>> {
        if self.buffer.is_empty() {
            self.refill_buffer()?;
        }
        Ok(self.buffer.front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::ExternalSort;
    use flux_codec_line::LineDelimitedCodec;
    use flux_io::collection_source;
    use proptest::prelude::*;

    struct WordCountConfig;

    impl ReductorConfig<String, String, u64, String> for WordCountConfig {
        fn discriminate(&self, item: &String) -> String {
            item.clone()
        }

        fn init(&self, _key: &String) -> u64 {
            0
        }

        fn fold(&self, acc: u64, _item: String) -> u64 {
            acc + 1
        }

        fn finalize(&self, key: String, acc: u64) -> String {
            format!("{key}_{acc}")
        }
    }

    #[test]
    fn sequence_reductor_emits_one_total_per_contiguous_key_run() {
        let items = vec![
            ("a".to_string(), 1u64),
            ("a".to_string(), 2),
            ("b".to_string(), 10),
        ];
        let upstream = collection_source(items);
        struct SumConfig;
        impl ReductorConfig<(String, u64), String, u64, (String, u64)> for SumConfig {
            fn discriminate(&self, item: &(String, u64)) -> String {
                item.0.clone()
            }
            fn init(&self, _key: &String) -> u64 {
                0
            }
            fn fold(&self, acc: u64, item: (String, u64)) -> u64 {
                acc + item.1
            }
            fn finalize(&self, key: String, acc: u64) -> (String, u64) {
                (key, acc)
            }
        }
        let mut pipe = SequenceReductorPipe::new(Box::new(upstream), SumConfig);
        assert_eq!(pipe.next().unwrap(), Some(("a".to_string(), 3)));
        assert_eq!(pipe.next().unwrap(), Some(("b".to_string(), 10)));
        assert_eq!(pipe.next().unwrap(), None);
    }

    #[test]
    fn hash_reductor_word_count_then_external_sort_matches_expected_order() {
        let dir = tempfile::tempdir().unwrap();
        let options = WriteOptions::new(dir.path());
        let words = vec!["why", "who", "what", "when", "why", "what", "what"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();

        let mut reductor = HashReductorPipe::new(
            Box::new(collection_source(words)),
            WordCountConfig,
            |key: &String| key.as_bytes().to_vec(),
            4,
            LineDelimitedCodec::new(),
            &options,
        );
        reductor.start().unwrap();
        let mut counted = Vec::new();
        while let Some(out) = reductor.next().unwrap() {
            counted.push(out);
        }
        reductor.close().unwrap();

        let sort_dir = tempfile::tempdir().unwrap();
        let sort_options = WriteOptions::new(sort_dir.path());
        let mut sorted = ExternalSort::new(
            Box::new(collection_source(counted)),
            LineDelimitedCodec::new(),
            |a: &String, b: &String| a.cmp(b),
            8,
            &sort_options,
        );
        sorted.start().unwrap();
        let mut output = Vec::new();
        while let Some(item) = sorted.next().unwrap() {
            output.push(item);
        }
        sorted.close().unwrap();

        assert_eq!(output, vec!["what_3", "when_1", "who_1", "why_2"]);
    }

    #[derive(Clone)]
    struct PairCodec;

    impl flux_core::Encoder<(String, i32)> for PairCodec {
        fn encode(&self, value: &(String, i32), out: &mut Vec<u8>) -> Result<()> {
            out.extend_from_slice(format!("{}:{}", value.0, value.1).as_bytes());
            out.push(b'\n');
            Ok(())
        }
    }

    impl flux_core::Decoder<(String, i32)> for PairCodec {
        fn decode(&self, bytes: &[u8], offset: usize) -> Result<((String, i32), usize)> {
            let slice = &bytes[offset..];
            let newline = slice.iter().position(|b| *b == b'\n').expect("newline-framed");
            let text = std::str::from_utf8(&slice[..newline]).expect("valid utf8");
            let (key, value) = text.split_once(':').expect("key:value");
            Ok(((key.to_string(), value.parse().unwrap()), newline + 1))
        }
    }

    #[test]
    fn grouper_emits_contiguous_runs_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let options = WriteOptions::new(dir.path());
        let items = vec![
            ("a".to_string(), 1),
            ("b".to_string(), 2),
            ("a".to_string(), 3),
        ];
        let mut grouper = GrouperPipe::new(
            Box::new(collection_source(items)),
            |item: &(String, i32)| item.0.clone(),
            |key: &String| key.as_bytes().to_vec(),
            2,
            PairCodec,
            &options,
        );
        grouper.start().unwrap();
        let mut groups: HashMap<String, Vec<i32>> = HashMap::new();
        let mut run_order: Vec<String> = Vec::new();
        let mut last_key: Option<String> = None;
        while let Some((key, value)) = grouper.next().unwrap() {
            if last_key.as_deref() != Some(key.as_str()) {
                run_order.push(key.clone());
                last_key = Some(key.clone());
            }
            groups.entry(key).or_default().push(value);
        }
        grouper.close().unwrap();

        assert_eq!(groups.get("a"), Some(&vec![1, 3]));
        assert_eq!(groups.get("b"), Some(&vec![2]));
        // Each key's items land in exactly one contiguous run.
        let mut seen = HashSet::new();
        for key in &run_order {
            assert!(seen.insert(key.clone()), "key {key} appeared in more than one run");
        }
    }

    #[test]
    fn list_reductor_truncates_beyond_the_limit() {
        let items = vec![
            ("a".to_string(), 1),
            ("a".to_string(), 2),
            ("a".to_string(), 3),
        ];
        let mut pipe = ListReductor::new(
            Box::new(collection_source(items)),
            |item: &(String, i32)| item.0.clone(),
            |key: String, list: Vec<(String, i32)>| (key, list),
            GroupSizePolicy::Truncate(2),
        );
        let (key, list) = pipe.next().unwrap().unwrap();
        assert_eq!(key, "a");
        assert_eq!(list, vec![("a".to_string(), 1), ("a".to_string(), 2)]);
    }

    #[test]
    fn list_reductor_fails_past_the_limit() {
        let items = vec![
            ("a".to_string(), 1),
            ("a".to_string(), 2),
            ("a".to_string(), 3),
        ];
        let mut pipe = ListReductor::new(
            Box::new(collection_source(items)),
            |item: &(String, i32)| item.0.clone(),
            |key: String, list: Vec<(String, i32)>| (key, list),
            GroupSizePolicy::Fail(2),
        );
        let err = pipe.next().unwrap_err();
        assert_eq!(err.kind(), flux_core::FluxErrorKind::ExcessiveResources);
    }

    #[test]
    fn dedup_pipe_keeps_only_the_first_occurrence_per_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let options = WriteOptions::new(dir.path());
        let items = vec!["a", "b", "a", "c", "b", "a"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let mut pipe = DedupPipe::new(
            Box::new(collection_source(items)),
            |s: &String| s.as_bytes().to_vec(),
            3,
            LineDelimitedCodec::new(),
            &options,
        );
        pipe.start().unwrap();
        let mut out = Vec::new();
        while let Some(item) = pipe.next().unwrap() {
            out.push(item);
        }
        pipe.close().unwrap();
        out.sort();
        assert_eq!(out, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    proptest! {
        #[test]
        fn dedup_pipe_output_is_a_set_sized_to_the_distinct_count(items in prop::collection::vec(0i64..50, 0..200), partition_count in 1usize..8) {
            let dir = tempfile::tempdir().unwrap();
            let options = WriteOptions::new(dir.path());
            let strings: Vec<String> = items.iter().map(|n| n.to_string()).collect();
            let distinct: std::collections::HashSet<&String> = strings.iter().collect();
            let expected_len = distinct.len();

            let mut pipe = DedupPipe::new(
                Box::new(collection_source(strings)),
                |s: &String| s.as_bytes().to_vec(),
                partition_count,
                LineDelimitedCodec::new(),
                &options,
            );
            pipe.start().unwrap();
            let mut out = Vec::new();
            while let Some(item) = pipe.next().unwrap() {
                out.push(item);
            }
            pipe.close().unwrap();

            prop_assert_eq!(out.len(), expected_len);
            let out_set: std::collections::HashSet<&String> = out.iter().collect();
            prop_assert_eq!(out_set.len(), out.len());
        }
    }
}
