use std::collections::HashMap;
use std::path::PathBuf;

use flux_core::{BoxPullPipe, Codec, Pipe, PullPipe, Result, WriteOptions};

use crate::framed::FramedWriter;

/// What a sharder produces once its upstream has been fully drained (spec
/// §4.G "outputs: the file listing in a temp folder named by shard key,
/// and a mapping shardKey → count").
#[derive(Debug, Clone, Default)]
pub struct ShardResult {
    pub shard_counts: HashMap<String, u64>,
    pub shard_files: HashMap<String, Vec<PathBuf>>,
}

/// Internal per-item routing strategy shared by the three sharder flavors
/// and by [`IntermediateSharder`] (which wraps any of them as a pass-
/// through pull pipe).
trait ShardRouter<T> {
    fn route(&mut self, item: &T) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
    fn result(&self) -> ShardResult;
}

fn shard_path(root: &std::path::Path, key: &str) -> PathBuf {
    root.join(key)
}

/// Path for the `run`-th file written under `key` — the first run keeps the
/// bare key name, later runs get a `.run{n}` suffix so a non-contiguous
/// repeat of the same key never truncates an earlier run's file.
fn shard_run_path(root: &std::path::Path, key: &str, run: usize) -> PathBuf {
    if run == 0 {
        shard_path(root, key)
    } else {
        shard_path(root, &format!("{key}.run{run}"))
    }
}

/// Routes each item to the file for `classifier(item)`, re-using the
/// currently open writer until the classifier output changes — *streaming*.
/// Non-contiguous runs of the same key do **not** share a file: each run
/// gets its own path (see [`shard_run_path`]), so `shard_files[key]` lists
/// every run's file and `shard_counts[key]` stays the aggregate count
/// retrievable by reading all of them (spec.md leaves the non-contiguous
/// case undefined; see DESIGN.md's Open Question decision).
pub struct SequentialShardRouter<T, F, C> {
    classifier: F,
    codec: C,
    root: PathBuf,
    current_key: Option<String>,
    current_writer: Option<FramedWriter<C>>,
    run_index: HashMap<String, usize>,
    counts: HashMap<String, u64>,
    files: HashMap<String, Vec<PathBuf>>,
    _item: std::marker::PhantomData<T>,
}

impl<T, F, C> SequentialShardRouter<T, F, C>
where
    F: Fn(&T) -> String,
    C: Codec<T> + Clone,
{
    pub fn new(classifier: F, codec: C, options: &WriteOptions) -> Self {
        Self {
            classifier,
            codec,
            root: options.temp.clone(),
            current_key: None,
            current_writer: None,
            run_index: HashMap::new(),
            counts: HashMap::new(),
            files: HashMap::new(),
            _item: std::marker::PhantomData,
        }
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(writer) = self.current_writer.take() {
            writer.finish()?;
        }
        Ok(())
    }
}

impl<T, F, C> ShardRouter<T> for SequentialShardRouter<T, F, C>
where
    F: Fn(&T) -> String,
    C: Codec<T> + Clone,
{
    fn route(&mut self, item: &T) -> Result<()> {
        let key = (self.classifier)(item);
        if self.current_key.as_deref() != Some(key.as_str()) {
            self.close_current()?;
            let run = {
                let slot = self.run_index.entry(key.clone()).or_insert(0);
                if self.files.contains_key(&key) {
                    *slot += 1;
                }
                *slot
            };
            let path = shard_run_path(&self.root, &key, run);
            self.files.entry(key.clone()).or_default().push(path.clone());
            self.current_writer = Some(FramedWriter::create(path, self.codec.clone())?);
            self.current_key = Some(key.clone());
        }
        let writer = self.current_writer.as_mut().expect("just opened above");
        writer.write(item)?;
        *self.counts.entry(key).or_insert(0) += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.close_current()
    }

    fn result(&self) -> ShardResult {
        ShardResult {
            shard_counts: self.counts.clone(),
            shard_files: self.files.clone(),
        }
    }
}

/// Routes each item to the file for `classifier(item)`, keeping one writer
/// per shard key open for the entire pass — the key set need not be
/// contiguous or bounded in advance (spec §4.G "SharderByItem").
pub struct ItemShardRouter<T, F, C> {
    classifier: F,
    codec: C,
    root: PathBuf,
    writers: HashMap<String, FramedWriter<C>>,
    counts: HashMap<String, u64>,
    files: HashMap<String, Vec<PathBuf>>,
    _item: std::marker::PhantomData<T>,
}

impl<T, F, C> ItemShardRouter<T, F, C>
where
    F: Fn(&T) -> String,
    C: Codec<T> + Clone,
{
    pub fn new(classifier: F, codec: C, options: &WriteOptions) -> Self {
        Self {
            classifier,
            codec,
            root: options.temp.clone(),
            writers: HashMap::new(),
            counts: HashMap::new(),
            files: HashMap::new(),
            _item: std::marker::PhantomData,
        }
    }
}

impl<T, F, C> ShardRouter<T> for ItemShardRouter<T, F, C>
where
    F: Fn(&T) -> String,
    C: Codec<T> + Clone,
{
    fn route(&mut self, item: &T) -> Result<()> {
        let key = (self.classifier)(item);
        if !self.writers.contains_key(&key) {
            let path = shard_path(&self.root, &key);
            self.files.entry(key.clone()).or_default().push(path.clone());
            self.writers
                .insert(key.clone(), FramedWriter::create(path, self.codec.clone())?);
        }
        let writer = self.writers.get_mut(&key).expect("inserted above");
        writer.write(item)?;
        *self.counts.entry(key).or_insert(0) += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut errors = flux_core::CloseErrors::new();
        for (_, writer) in self.writers.drain() {
            errors.record(writer.finish().map(|_| ()));
        }
        errors.finish()
    }

    fn result(&self) -> ShardResult {
        ShardResult {
            shard_counts: self.counts.clone(),
            shard_files: self.files.clone(),
        }
    }
}

/// Routes each item deterministically into one of `shard_count` files via
/// `flux_util::shard_index` on `key_of(item)` (spec §4.G "SharderByHash").
pub struct HashShardRouter<T, F, C> {
    key_of: F,
    root: PathBuf,
    shard_count: usize,
    writers: Vec<Option<FramedWriter<C>>>,
    codec: C,
    counts: HashMap<String, u64>,
    files: HashMap<String, Vec<PathBuf>>,
    _item: std::marker::PhantomData<T>,
}

impl<T, F, C> HashShardRouter<T, F, C>
where
    F: Fn(&T) -> Vec<u8>,
    C: Codec<T> + Clone,
{
    pub fn new(key_of: F, shard_count: usize, codec: C, options: &WriteOptions) -> Self {
        assert!(shard_count > 0, "shard_count must be positive");
        let mut writers = Vec::with_capacity(shard_count);
        writers.resize_with(shard_count, || None);
        Self {
            key_of,
            root: options.temp.clone(),
            shard_count,
            writers,
            codec,
            counts: HashMap::new(),
            files: HashMap::new(),
            _item: std::marker::PhantomData,
        }
    }

    pub fn shard_path_for_index(&self, index: usize) -> PathBuf {
        shard_path(&self.root, &index.to_string())
    }
}

impl<T, F, C> ShardRouter<T> for HashShardRouter<T, F, C>
where
    F: Fn(&T) -> Vec<u8>,
    C: Codec<T> + Clone,
{
    fn route(&mut self, item: &T) -> Result<()> {
        let key_bytes = (self.key_of)(item);
        let index = flux_util::shard_index(&key_bytes, self.shard_count);
        if self.writers[index].is_none() {
            let path = self.shard_path_for_index(index);
            self.files.entry(index.to_string()).or_default().push(path.clone());
            self.writers[index] = Some(FramedWriter::create(path, self.codec.clone())?);
        }
        let writer = self.writers[index].as_mut().expect("inserted above");
        writer.write(item)?;
        *self.counts.entry(index.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut errors = flux_core::CloseErrors::new();
        for slot in self.writers.iter_mut() {
            if let Some(writer) = slot.take() {
                errors.record(writer.finish().map(|_| ()));
            }
        }
        errors.finish()
    }

    fn result(&self) -> ShardResult {
        ShardResult {
            shard_counts: self.counts.clone(),
            shard_files: self.files.clone(),
        }
    }
}

/// Drains `upstream` fully through `router`, producing only the
/// [`ShardResult`] — no items reach a downstream consumer (spec §4.G base
/// sharders, as opposed to [`IntermediateSharder`]).
pub struct Sharder<T, R> {
    upstream: BoxPullPipe<T>,
    router: R,
}

impl<T, R: ShardRouter<T>> Sharder<T, R> {
    pub fn new(upstream: BoxPullPipe<T>, router: R) -> Self {
        Self { upstream, router }
    }

    pub fn run(&mut self) -> Result<ShardResult> {
        self.upstream.start()?;
        while let Some(item) = self.upstream.next()? {
            self.router.route(&item)?;
        }
        self.router.finish()?;
        self.upstream.close()?;
        Ok(self.router.result())
    }
}

/// Writes every item to its shard file, then re-emits it downstream
/// unchanged (spec §4.G "IntermediateSharder variants ... pass-through
/// with disk side effect").
pub struct IntermediateSharder<T, R> {
    upstream: BoxPullPipe<T>,
    router: R,
    finished: bool,
}

impl<T, R: ShardRouter<T>> IntermediateSharder<T, R> {
    pub fn new(upstream: BoxPullPipe<T>, router: R) -> Self {
        Self {
            upstream,
            router,
            finished: false,
        }
    }

    pub fn shard_result(&self) -> ShardResult {
        self.router.result()
    }
}

impl<T, R: ShardRouter<T>> Pipe for IntermediateSharder<T, R> {
    fn start(&mut self) -> Result<()> {
        self.upstream.start()
    }

    fn close(&mut self) -> Result<()> {
        if !self.finished {
            self.router.finish()?;
            self.finished = true;
        }
        self.upstream.close()
    }

    fn progress(&self) -> f64 {
        self.upstream.progress()
    }
}

impl<T, R: ShardRouter<T>> PullPipe<T> for IntermediateSharder<T, R> {
    fn next(&mut self) -> Result<Option<T>> {
        match self.upstream.next()? {
            Some(item) => {
                self.router.route(&item)?;
                Ok(Some(item))
            }
            None => {
                if !self.finished {
                    self.router.finish()?;
                    self.finished = true;
                }
                Ok(None)
            }
        }
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        self.upstream.peek()
    }
}

/// Convenience constructors binding the three router flavors to `Sharder`
/// under the spec's own names.
pub type SharderBySeq<T, F, C> = Sharder<T, SequentialShardRouter<T, F, C>>;
pub type SharderByItem<T, F, C> = Sharder<T, ItemShardRouter<T, F, C>>;
pub type SharderByHash<T, F, C> = Sharder<T, HashShardRouter<T, F, C>>;

impl<T, F, C> Sharder<T, SequentialShardRouter<T, F, C>>
where
    F: Fn(&T) -> String,
    C: Codec<T> + Clone,
{
    pub fn by_seq(upstream: BoxPullPipe<T>, classifier: F, codec: C, options: &WriteOptions) -> Self {
        Self::new(upstream, SequentialShardRouter::new(classifier, codec, options))
    }
}

impl<T, F, C> Sharder<T, ItemShardRouter<T, F, C>>
where
    F: Fn(&T) -> String,
    C: Codec<T> + Clone,
{
    pub fn by_item(upstream: BoxPullPipe<T>, classifier: F, codec: C, options: &WriteOptions) -> Self {
        Self::new(upstream, ItemShardRouter::new(classifier, codec, options))
    }
}

impl<T, F, C> Sharder<T, HashShardRouter<T, F, C>>
where
    F: Fn(&T) -> Vec<u8>,
    C: Codec<T> + Clone,
{
    pub fn by_hash(
        upstream: BoxPullPipe<T>,
        key_of: F,
        shard_count: usize,
        codec: C,
        options: &WriteOptions,
    ) -> Self {
        Self::new(upstream, HashShardRouter::new(key_of, shard_count, codec, options))
    }
}
