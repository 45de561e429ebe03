use std::collections::HashMap;
use std::hash::Hash;

use flux_core::{BoxPullPipe, JoinMode, JoinRecord, Pipe, PullPipe, Result};

/// In-memory right side (spec §4.I "LookupJoinPipe"): at `start`, buffers
/// every right pipe into `map<key, matches-by-pipe-index>`, then iterates
/// the left pipe once. **Assumes left keys are unique** — per the Open
/// Question decision in DESIGN.md, a duplicate left key still produces at
/// most one left match per join record (the later occurrence overwrites
/// the earlier one in the emitted record, matching the original "at most
/// one left side match" behavior this pipe preserves).
///
/// In `OUTER` mode, once the left pipe is exhausted, unvisited entries of
/// the right map are emitted as right-only records.
pub struct LookupJoinPipe<V, K, KeyOf> {
    left: BoxPullPipe<V>,
    rights: Vec<BoxPullPipe<V>>,
    key_of: KeyOf,
    mode: JoinMode,
    right_by_key: HashMap<K, Vec<(usize, V)>>,
    visited: std::collections::HashSet<K>,
    leftover_keys: Option<std::vec::IntoIter<K>>,
    started: bool,
    left_exhausted: bool,
    buffered: Option<JoinRecord<K, V>>,
}

impl<V, K, KeyOf> LookupJoinPipe<V, K, KeyOf>
where
    V: Clone,
    K: Eq + Hash + Clone,
    KeyOf: Fn(&V) -> K,
{
    pub fn new(left: BoxPullPipe<V>, rights: Vec<BoxPullPipe<V>>, key_of: KeyOf, mode: JoinMode) -> Self {
        Self {
            left,
            rights,
            key_of,
            mode,
            right_by_key: HashMap::new(),
            visited: std::collections::HashSet::new(),
            leftover_keys: None,
            started: false,
            left_exhausted: false,
            buffered: None,
        }
    }

    fn buffer_right_side(&mut self) -> Result<()> {
        for (pipe_index, right) in self.rights.iter_mut().enumerate() {
            right.start()?;
            while let Some(value) = right.next()? {
                let key = (self.key_of)(&value);
                self.right_by_key.entry(key).or_default().push((pipe_index, value));
            }
            right.close()?;
        }
        Ok(())
    }

    fn record_for_left(&mut self, value: V) -> JoinRecord<K, V> {
        let key = (self.key_of)(&value);
        self.visited.insert(key.clone());
        let mut record = JoinRecord::new(key.clone());
        record.left_matches.push(value);
        if let Some(matches) = self.right_by_key.get(&key) {
            for (pipe_index, right_value) in matches {
                record.push_right(*pipe_index, right_value_clone(right_value));
            }
        }
        record
    }

    fn right_only_record(&self, key: K) -> JoinRecord<K, V> {
        let mut record = JoinRecord::new(key.clone());
        if let Some(matches) = self.right_by_key.get(&key) {
            for (pipe_index, right_value) in matches {
                record.push_right(*pipe_index, right_value_clone(right_value));
            }
        }
        record
    }
}

fn right_value_clone<V: Clone>(value: &V) -> V {
    value.clone()
}

impl<V, K, KeyOf> Pipe for LookupJoinPipe<V, K, KeyOf>
where
    V: Clone,
    K: Eq + Hash + Clone,
    KeyOf: Fn(&V) -> K,
{
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.buffer_right_side()?;
        self.left.start()
    }

    fn close(&mut self) -> Result<()> {
        self.left.close()
    }

    fn progress(&self) -> f64 {
        self.left.progress()
    }
}

impl<V, K, KeyOf> PullPipe<JoinRecord<K, V>> for LookupJoinPipe<V, K, KeyOf>
where
    V: Clone,
    K: Eq + Hash + Clone,
    KeyOf: Fn(&V) -> K,
{
    fn next(&mut self) -> Result<Option<JoinRecord<K, V>>> {
        if let Some(record) = self.buffered.take() {
            return Ok(Some(record));
        }
        self.advance()
    }

    fn peek(&mut self) -> Result<Option<&JoinRecord<K, V>>> {
        if self.buffered.is_none() {
            self.buffered = self.advance()?;
        }
        Ok(self.buffered.as_ref())
    }
}

impl<V, K, KeyOf> LookupJoinPipe<V, K, KeyOf>
where
    V: Clone,
    K: Eq + Hash + Clone,
    KeyOf: Fn(&V) -> K,
{
    fn advance(&mut self) -> Result<Option<JoinRecord<K, V>>> {
        while !self.left_exhausted {
            match self.left.next()? {
                Some(value) => {
                    let record = self.record_for_left(value);
                    let mut right_present = vec![false; self.rights.len()];
                    for pipe_index in record.right_matches_by_pipe_index.keys() {
                        right_present[*pipe_index] = true;
                    }
                    if self.mode.should_output(true, &right_present) {
                        return Ok(Some(record));
                    }
                }
                None => {
                    self.left_exhausted = true;
                    if matches!(self.mode, JoinMode::Outer) {
                        let leftover: Vec<K> = self
                            .right_by_key
                            .keys()
                            .filter(|key| !self.visited.contains(*key))
                            .cloned()
                            .collect();
                        self.leftover_keys = Some(leftover.into_iter());
                    }
                }
            }
        }

        match self.leftover_keys.as_mut().and_then(Iterator::next) {
            Some(key) => Ok(Some(self.right_only_record(key))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_io::collection_source;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Row {
        key: i64,
        label: &'static str,
    }

    fn row(key: i64, label: &'static str) -> Row {
        Row { key, label }
    }

    #[test]
    fn scenario_2_lookup_outer_join() {
        let left = collection_source(vec![row(1, "left"), row(3, "left"), row(5, "left"), row(6, "left")]);
        let r0 = collection_source(vec![
            row(1, "Walter"),
            row(2, "Donny"),
            row(3, "Dude"),
            row(5, "Maude"),
        ]);
        let r1 = collection_source(vec![row(1, "Walter"), row(3, "Dude"), row(4, "Jeff")]);

        let mut join = LookupJoinPipe::new(
            Box::new(left),
            vec![Box::new(r0), Box::new(r1)],
            |r: &Row| r.key,
            JoinMode::Outer,
        );
        join.start().unwrap();

        let mut by_key: HashMap<i64, JoinRecord<i64, Row>> = HashMap::new();
        while let Some(record) = join.next().unwrap() {
            by_key.insert(record.key, record);
        }
        join.close().unwrap();

        assert_eq!(by_key.len(), 6);
        assert_eq!(by_key[&1].right_matches_by_pipe_index.get(&0), Some(&vec![row(1, "Walter")]));
        assert_eq!(by_key[&1].right_matches_by_pipe_index.get(&1), Some(&vec![row(1, "Walter")]));
        assert_eq!(by_key[&2].left_matches, Vec::new());
        assert_eq!(by_key[&2].right_matches_by_pipe_index.get(&0), Some(&vec![row(2, "Donny")]));
        assert_eq!(by_key[&4].right_matches_by_pipe_index.get(&1), Some(&vec![row(4, "Jeff")]));
        assert_eq!(by_key[&6].left_matches, vec![row(6, "left")]);
        assert!(by_key[&6].right_matches_by_pipe_index.is_empty());
    }

    #[test]
    fn peek_returns_the_same_record_until_next_consumes_it() {
        let left = collection_source(vec![row(1, "left"), row(2, "left")]);
        let right: flux_core::BoxPullPipe<Row> = Box::new(collection_source(vec![row(1, "r")]));
        let mut join = LookupJoinPipe::new(Box::new(left), vec![right], |r: &Row| r.key, JoinMode::Left);
        join.start().unwrap();

        let first = join.peek().unwrap().cloned();
        assert_eq!(first.as_ref().map(|r| r.key), Some(1));
        assert_eq!(join.peek().unwrap().cloned(), first);
        assert_eq!(join.next().unwrap(), first);

        assert_eq!(join.peek().unwrap().map(|r| r.key), Some(2));
        assert_eq!(join.next().unwrap().map(|r| r.key), Some(2));
        assert_eq!(join.next().unwrap(), None);
    }

    #[test]
    fn duplicate_left_keys_keep_at_most_one_left_match_per_record() {
        let left = collection_source(vec![row(1, "first"), row(1, "second")]);
        let right: flux_core::BoxPullPipe<Row> = Box::new(collection_source(vec![row(1, "r")]));
        let mut join = LookupJoinPipe::new(Box::new(left), vec![right], |r: &Row| r.key, JoinMode::Left);
        join.start().unwrap();

        let first = join.next().unwrap().unwrap();
        assert_eq!(first.left_matches.len(), 1);
        let second = join.next().unwrap().unwrap();
        assert_eq!(second.left_matches.len(), 1);
        assert_eq!(join.next().unwrap(), None);
    }
}
