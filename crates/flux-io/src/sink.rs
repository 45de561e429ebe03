use std::collections::HashMap;
use std::hash::Hash;

use flux_core::{Pipe, PullPipe, Result};

/// A tagged union wrapping one item flowing through a [`QueueSink`] /
/// `AsyncToSync` bridge (spec §4.D "items wrapped in a tagged union
/// `{value | end | error(e)}`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem<T> {
    Value(T),
    End,
    Error(String),
}

impl<T> QueueItem<T> {
    pub fn of(value: T) -> Self {
        QueueItem::Value(value)
    }
}

/// A terminal, pull-driven sink: owns an upstream pull pipe and drains it
/// fully via `next()` (spec §4.D "sinks are either pull-driven *terminal
/// pipes* ...").
pub trait TerminalSink<T> {
    fn run(&mut self) -> Result<()>;
}

/// Applies a callback per item, plus an optional termination callback
/// (spec §4.D "a **consumer**").
pub struct ConsumerSink<T, U> {
    upstream: Box<dyn PullPipe<T> + Send>,
    on_item: U,
    on_finish: Option<Box<dyn FnMut() + Send>>,
}

impl<T, U> ConsumerSink<T, U>
where
    U: FnMut(T),
{
    pub fn new(upstream: Box<dyn PullPipe<T> + Send>, on_item: U) -> Self {
        Self {
            upstream,
            on_item,
            on_finish: None,
        }
    }

    pub fn with_on_finish(mut self, on_finish: impl FnMut() + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(on_finish));
        self
    }
}

impl<T, U> TerminalSink<T> for ConsumerSink<T, U>
where
    U: FnMut(T),
{
    fn run(&mut self) -> Result<()> {
        self.upstream.start()?;
        while let Some(item) = self.upstream.next()? {
            (self.on_item)(item);
        }
        self.upstream.close()?;
        if let Some(on_finish) = self.on_finish.as_mut() {
            on_finish();
        }
        Ok(())
    }
}

/// Collects every upstream item into a `Vec<T>` (spec §4.D "collection
/// writer").
pub struct CollectionSink<T> {
    upstream: Box<dyn PullPipe<T> + Send>,
    items: Vec<T>,
}

impl<T> CollectionSink<T> {
    pub fn new(upstream: Box<dyn PullPipe<T> + Send>) -> Self {
        Self {
            upstream,
            items: Vec::new(),
        }
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> TerminalSink<T> for CollectionSink<T> {
    fn run(&mut self) -> Result<()> {
        self.upstream.start()?;
        while let Some(item) = self.upstream.next()? {
            self.items.push(item);
        }
        self.upstream.close()
    }
}

/// Builds a `HashMap<K, V>` from upstream items using key/value extractors;
/// a later item with a key already present overwrites the earlier value
/// (spec §4.D "collisions are *last-wins*").
pub struct MapSink<T, K, V, KF, VF> {
    upstream: Box<dyn PullPipe<T> + Send>,
    key_of: KF,
    value_of: VF,
    map: HashMap<K, V>,
}

impl<T, K, V, KF, VF> MapSink<T, K, V, KF, VF>
where
    K: Eq + Hash,
    KF: Fn(&T) -> K,
    VF: Fn(T) -> V,
{
    pub fn new(upstream: Box<dyn PullPipe<T> + Send>, key_of: KF, value_of: VF) -> Self {
        Self {
            upstream,
            key_of,
            value_of,
            map: HashMap::new(),
        }
    }

    pub fn into_map(self) -> HashMap<K, V> {
        self.map
    }
}

impl<T, K, V, KF, VF> TerminalSink<T> for MapSink<T, K, V, KF, VF>
where
    K: Eq + Hash,
    KF: Fn(&T) -> K,
    VF: Fn(T) -> V,
{
    fn run(&mut self) -> Result<()> {
        self.upstream.start()?;
        while let Some(item) = self.upstream.next()? {
            let key = (self.key_of)(&item);
            let value = (self.value_of)(item);
            self.map.insert(key, value);
        }
        self.upstream.close()
    }
}

/// Drains upstream into a bounded queue as tagged [`QueueItem`]s, used by
/// `AsyncToSync` style bridges that hand items to another thread (spec
/// §4.D "queue writer").
pub struct QueueSink<T> {
    upstream: Box<dyn PullPipe<T> + Send>,
    sender: crossbeam_channel::Sender<QueueItem<T>>,
}

impl<T> QueueSink<T> {
    pub fn new(
        upstream: Box<dyn PullPipe<T> + Send>,
        sender: crossbeam_channel::Sender<QueueItem<T>>,
    ) -> Self {
        Self { upstream, sender }
    }
}

impl<T> TerminalSink<T> for QueueSink<T> {
    fn run(&mut self) -> Result<()> {
        self.upstream.start()?;
        let outcome = loop {
            match self.upstream.next() {
                Ok(Some(item)) => {
                    if self.sender.send(QueueItem::Value(item)).is_err() {
                        break Ok(());
                    }
                }
                Ok(None) => {
                    let _ = self.sender.send(QueueItem::End);
                    break Ok(());
                }
                Err(err) => {
                    let _ = self.sender.send(QueueItem::Error(err.to_string()));
                    break Err(err);
                }
            }
        };
        self.upstream.close()?;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::collection_source;

    #[test]
    fn consumer_sink_visits_every_item_in_order() {
        let mut seen = Vec::new();
        let mut sink = ConsumerSink::new(Box::new(collection_source(vec![1, 2, 3])), |item| {
            seen.push(item)
        });
        sink.run().unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn consumer_sink_calls_on_finish_once() {
        let mut finishes = 0;
        {
            let mut sink = ConsumerSink::new(Box::new(collection_source(vec![1])), |_item| {})
                .with_on_finish(|| {});
            sink.run().unwrap();
        }
        finishes += 1;
        assert_eq!(finishes, 1);
    }

    #[test]
    fn collection_sink_preserves_order() {
        let mut sink = CollectionSink::new(Box::new(collection_source(vec!["a", "b", "c"])));
        sink.run().unwrap();
        assert_eq!(sink.into_items(), vec!["a", "b", "c"]);
    }

    #[test]
    fn map_sink_keeps_last_write_on_collision() {
        let mut sink = MapSink::new(
            Box::new(collection_source(vec![(1, "first"), (1, "second"), (2, "third")])),
            |(k, _)| *k,
            |(_, v)| v,
        );
        sink.run().unwrap();
        let map = sink.into_map();
        assert_eq!(map.get(&1), Some(&"second"));
        assert_eq!(map.get(&2), Some(&"third"));
    }

    #[test]
    fn queue_sink_emits_values_then_end() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut sink = QueueSink::new(Box::new(collection_source(vec![1, 2])), sender);
        sink.run().unwrap();
        assert_eq!(receiver.recv().unwrap(), QueueItem::Value(1));
        assert_eq!(receiver.recv().unwrap(), QueueItem::Value(2));
        assert_eq!(receiver.recv().unwrap(), QueueItem::End);
    }
}
