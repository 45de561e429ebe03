use flux_core::{BoxPullPipe, FluxError, JoinMode, JoinRecord, Pipe, PullPipe, Result};

/// N-way ordered join on `(left, rightPipes[0], ..., rightPipes[n-1])` with
/// a common key comparator (spec §4.I "SortedJoinPipe").
///
/// Every stream must be non-decreasing under `key_of` + `compare`; a
/// decrease raises [`FluxErrorKind::OutOfOrder`](flux_core::FluxErrorKind::OutOfOrder).
/// Each call to `next` gathers every cursor whose current key equals the
/// overall minimum into one [`JoinRecord`], advances exactly those
/// cursors, and emits the record only if `mode.should_output` agrees —
/// otherwise it loops to the next key. The merge stops the moment
/// `mode.can_early_exit` is satisfied, discarding whatever is left unread.
pub struct SortedJoinPipe<V, K, KeyOf, Cmp> {
    left: BoxPullPipe<V>,
    rights: Vec<BoxPullPipe<V>>,
    key_of: KeyOf,
    compare: Cmp,
    mode: JoinMode,
    left_last_key: Option<K>,
    right_last_keys: Vec<Option<K>>,
    done: bool,
    buffered: Option<JoinRecord<K, V>>,
}

impl<V, K, KeyOf, Cmp> SortedJoinPipe<V, K, KeyOf, Cmp>
where
    K: Clone,
    KeyOf: Fn(&V) -> K,
    Cmp: Fn(&K, &K) -> std::cmp::Ordering,
{
    pub fn new(left: BoxPullPipe<V>, rights: Vec<BoxPullPipe<V>>, key_of: KeyOf, compare: Cmp, mode: JoinMode) -> Self {
        let right_count = rights.len();
        Self {
            left,
            rights,
            key_of,
            compare,
            mode,
            left_last_key: None,
            right_last_keys: vec![None; right_count],
            done: false,
            buffered: None,
        }
    }

    fn check_order(last: &mut Option<K>, key: &K, compare: &Cmp, label: &str) -> Result<()> {
        if let Some(prev) = last.as_ref() {
            if compare(prev, key) == std::cmp::Ordering::Greater {
                return Err(FluxError::out_of_order(format!(
                    "SortedJoinPipe: {label} produced a decreasing key"
                )));
            }
        }
        *last = Some(key.clone());
        Ok(())
    }

    fn left_key(&mut self) -> Result<Option<K>> {
        match self.left.peek()? {
            Some(value) => {
                let key = (self.key_of)(value);
                Self::check_order(&mut self.left_last_key, &key, &self.compare, "left pipe")?;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    fn right_key(&mut self, index: usize) -> Result<Option<K>> {
        match self.rights[index].peek()? {
            Some(value) => {
                let key = (self.key_of)(value);
                Self::check_order(&mut self.right_last_keys[index], &key, &self.compare, "right pipe")?;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    fn active_mask(&mut self) -> Result<(Vec<bool>, Option<K>, Vec<Option<K>>)> {
        let left_key = self.left_key()?;
        let mut right_keys = Vec::with_capacity(self.rights.len());
        for i in 0..self.rights.len() {
            right_keys.push(self.right_key(i)?);
        }
        let mut mask = Vec::with_capacity(1 + right_keys.len());
        mask.push(left_key.is_some());
        mask.extend(right_keys.iter().map(Option::is_some));
        Ok((mask, left_key, right_keys))
    }

    fn min_key<'a>(&self, left_key: &'a Option<K>, right_keys: &'a [Option<K>]) -> Option<&'a K> {
        let mut min: Option<&K> = None;
        for candidate in std::iter::once(left_key).chain(right_keys.iter()).flatten() {
            min = match min {
                None => Some(candidate),
                Some(current) if (self.compare)(candidate, current) == std::cmp::Ordering::Less => Some(candidate),
                Some(current) => Some(current),
            };
        }
        min
    }

    fn gather_and_advance(&mut self) -> Result<Option<JoinRecord<K, V>>> {
        loop {
            if self.done {
                return Ok(None);
            }
            let (mask, left_key, right_keys) = self.active_mask()?;
            if self.mode.can_early_exit(&mask, self.rights.len()) {
                self.done = true;
                return Ok(None);
            }

            let min_key = match self.min_key(&left_key, &right_keys) {
                Some(key) => key.clone(),
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };

            let mut record = JoinRecord::new(min_key.clone());
            let has_left = matches!(&left_key, Some(key) if (self.compare)(key, &min_key) == std::cmp::Ordering::Equal);
            if has_left {
                let value = self.left.next()?.expect("peeked above");
                record.left_matches.push(value);
            }

            let mut right_present = Vec::with_capacity(self.rights.len());
            for (i, key) in right_keys.iter().enumerate() {
                let matches = matches!(key, Some(key) if (self.compare)(key, &min_key) == std::cmp::Ordering::Equal);
                right_present.push(matches);
                if matches {
                    let value = self.rights[i].next()?.expect("peeked above");
                    record.push_right(i, value);
                }
            }

            if self.mode.should_output(has_left, &right_present) {
                return Ok(Some(record));
            }
        }
    }
}

impl<V, K, KeyOf, Cmp> Pipe for SortedJoinPipe<V, K, KeyOf, Cmp>
where
    K: Clone,
    KeyOf: Fn(&V) -> K,
    Cmp: Fn(&K, &K) -> std::cmp::Ordering,
{
    fn start(&mut self) -> Result<()> {
        self.left.start()?;
        for right in &mut self.rights {
            right.start()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut errors = flux_core::CloseErrors::new();
        errors.record(self.left.close());
        for right in &mut self.rights {
            errors.record(right.close());
        }
        errors.finish()
    }

    fn progress(&self) -> f64 {
        let mut total = self.left.progress();
        for right in &self.rights {
            total += right.progress();
        }
        total / (1.0 + self.rights.len() as f64)
    }
}

impl<V, K, KeyOf, Cmp> PullPipe<JoinRecord<K, V>> for SortedJoinPipe<V, K, KeyOf, Cmp>
where
    K: Clone,
    KeyOf: Fn(&V) -> K,
    Cmp: Fn(&K, &K) -> std::cmp::Ordering,
{
    fn next(&mut self) -> Result<Option<JoinRecord<K, V>>> {
        if let Some(record) = self.buffered.take() {
            return Ok(Some(record));
        }
        self.gather_and_advance()
    }

    fn peek(&mut self) -> Result<Option<&JoinRecord<K, V>>> {
        if self.buffered.is_none() {
            self.buffered = self.gather_and_advance()?;
        }
        Ok(self.buffered.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_io::{SeqGenSource, collection_source};
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Row {
        key: i64,
        label: &'static str,
    }

    fn row(key: i64, label: &'static str) -> Row {
        Row { key, label }
    }

    fn int_cmp(a: &i64, b: &i64) -> std::cmp::Ordering {
        a.cmp(b)
    }

    #[test]
    fn scenario_1_sorted_inner_join_over_three_streams() {
        let left = collection_source(vec![row(1, "left"), row(3, "left"), row(5, "left"), row(6, "left")]);
        let r0 = collection_source(vec![
            row(1, "Walter"),
            row(2, "Donny"),
            row(3, "Dude"),
            row(5, "Maude"),
        ]);
        let r1 = collection_source(vec![row(1, "Walter"), row(3, "Dude"), row(4, "Jeff")]);

        let mut join = SortedJoinPipe::new(
            Box::new(left),
            vec![Box::new(r0), Box::new(r1)],
            |r: &Row| r.key,
            int_cmp,
            JoinMode::Inner,
        );
        join.start().unwrap();

        let mut output = Vec::new();
        while let Some(record) = join.next().unwrap() {
            output.push(record);
        }
        join.close().unwrap();

        assert_eq!(output.len(), 3);

        assert_eq!(output[0].key, 1);
        assert_eq!(output[0].left_matches, vec![row(1, "left")]);
        assert_eq!(output[0].right_matches_by_pipe_index.get(&0), Some(&vec![row(1, "Walter")]));
        assert_eq!(output[0].right_matches_by_pipe_index.get(&1), Some(&vec![row(1, "Walter")]));

        assert_eq!(output[1].key, 3);
        assert_eq!(output[1].right_matches_by_pipe_index.get(&0), Some(&vec![row(3, "Dude")]));
        assert_eq!(output[1].right_matches_by_pipe_index.get(&1), Some(&vec![row(3, "Dude")]));

        assert_eq!(output[2].key, 5);
        assert_eq!(output[2].left_matches, vec![row(5, "left")]);
        assert_eq!(output[2].right_matches_by_pipe_index.get(&0), Some(&vec![row(5, "Maude")]));
        assert_eq!(output[2].right_matches_by_pipe_index.get(&1), None);
    }

    #[test]
    fn inner_join_early_exits_once_the_only_right_pipe_is_exhausted() {
        let left = SeqGenSource::new(|i| Some(row(i as i64, "left")));
        let right = collection_source(vec![row(0, "a"), row(1, "b")]);
        let mut join = SortedJoinPipe::new(
            Box::new(left),
            vec![Box::new(right)],
            |r: &Row| r.key,
            int_cmp,
            JoinMode::Inner,
        );
        join.start().unwrap();
        let mut output = Vec::new();
        while let Some(record) = join.next().unwrap() {
            output.push(record);
        }
        join.close().unwrap();
        assert_eq!(output.len(), 2);
    }

    #[test]
    fn peek_is_idempotent_and_does_not_advance_past_the_cached_record() {
        let left = collection_source(vec![row(1, "left"), row(3, "left")]);
        let right = collection_source(vec![row(1, "Walter"), row(3, "Dude")]);
        let mut join = SortedJoinPipe::new(Box::new(left), vec![Box::new(right)], |r: &Row| r.key, int_cmp, JoinMode::Inner);
        join.start().unwrap();

        let first = join.peek().unwrap().cloned();
        assert_eq!(first.as_ref().map(|r| r.key), Some(1));
        assert_eq!(join.peek().unwrap().cloned(), first);

        let taken = join.next().unwrap();
        assert_eq!(taken.map(|r| r.key), Some(1));

        assert_eq!(join.peek().unwrap().map(|r| r.key), Some(3));
        assert_eq!(join.next().unwrap().map(|r| r.key), Some(3));
        assert_eq!(join.next().unwrap(), None);
        join.close().unwrap();
    }

    #[test]
    fn out_of_order_key_is_rejected() {
        let left = collection_source(vec![row(3, "left"), row(1, "left")]);
        let right: flux_core::BoxPullPipe<Row> = Box::new(collection_source(Vec::<Row>::new()));
        let mut join = SortedJoinPipe::new(Box::new(left), vec![right], |r: &Row| r.key, int_cmp, JoinMode::Left);
        join.start().unwrap();
        // The first item (key 3) is consumed before the decreasing key (1)
        // is observed, so the violation only surfaces on a later call.
        let mut result = join.next();
        while matches!(result, Ok(Some(_))) {
            result = join.next();
        }
        assert_eq!(result.unwrap_err().kind(), flux_core::FluxErrorKind::OutOfOrder);
    }

    proptest! {
        #[test]
        fn sorted_join_invariants_hold_for_any_inner_join(
            mut left_keys in prop::collection::vec(0i64..30, 0..15),
            mut right_keys in prop::collection::vec(0i64..30, 0..15),
        ) {
            left_keys.sort();
            left_keys.dedup();
            right_keys.sort();
            right_keys.dedup();

            let left = collection_source(left_keys.iter().map(|&k| row(k, "left")).collect());
            let right = collection_source(right_keys.iter().map(|&k| row(k, "right")).collect());
            let mut join = SortedJoinPipe::new(Box::new(left), vec![Box::new(right)], |r: &Row| r.key, int_cmp, JoinMode::Inner);
            join.start().unwrap();

            let mut output = Vec::new();
            while let Some(record) = join.next().unwrap() {
                output.push(record);
            }
            join.close().unwrap();

            for pair in output.windows(2) {
                prop_assert!(pair[0].key < pair[1].key);
            }

            let left_set: std::collections::HashSet<i64> = left_keys.iter().copied().collect();
            let right_set: std::collections::HashSet<i64> = right_keys.iter().copied().collect();
            let expected: std::collections::BTreeSet<i64> = left_set.intersection(&right_set).copied().collect();
            let actual: std::collections::BTreeSet<i64> = output.iter().map(|r| r.key).collect();
            prop_assert_eq!(actual, expected);

            for record in &output {
                for value in &record.left_matches {
                    prop_assert_eq!(value.key, record.key);
                }
                for values in record.right_matches_by_pipe_index.values() {
                    for value in values {
                        prop_assert_eq!(value.key, record.key);
                    }
                }
            }
        }
    }
}
