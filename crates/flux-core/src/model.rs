use std::collections::BTreeMap;

/// Identity of one shard among `count` (spec §3 "Shard"). Ownership of an
/// item is decided by a strong hash of a derived key, modulo `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shard {
    index: usize,
    count: usize,
}

impl Shard {
    pub fn new(index: usize, count: usize) -> Self {
        assert!(count > 0, "Shard count must be positive");
        assert!(index < count, "Shard index {index} out of range for count {count}");
        Self { index, count }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// A single join output (spec §3 "Join record"): a key, the left-hand
/// matches for that key (zero or one entries for `LookupJoinPipe`, per its
/// documented "at most one left match" behavior; zero or more for
/// `SortedJoinPipe`), and an ordered mapping from right-pipe index to that
/// pipe's non-empty match list. Equality is structural over all three
/// fields, which is what lets spec §8's scenario assertions compare
/// `JoinRecord` values directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord<K, V> {
    pub key: K,
    pub left_matches: Vec<V>,
    pub right_matches_by_pipe_index: BTreeMap<usize, Vec<V>>,
}

impl<K, V> JoinRecord<K, V> {
    pub fn new(key: K) -> Self {
        Self {
            key,
            left_matches: Vec::new(),
            right_matches_by_pipe_index: BTreeMap::new(),
        }
    }

    pub fn right_count(&self) -> usize {
        self.right_matches_by_pipe_index.len()
    }

    pub fn push_right(&mut self, pipe_index: usize, value: V) {
        self.right_matches_by_pipe_index
            .entry(pipe_index)
            .or_default()
            .push(value);
    }
}

/// Join semantics (spec §3 "JoinMode values").
///
/// Each mode defines whether a fully-gathered key is emitted
/// ([`JoinMode::should_output`]) and when the sorted merge may stop early
/// ([`JoinMode::can_early_exit`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    Left,
    Inner,
    FullInner,
    Outer,
}

impl JoinMode {
    /// `active_mask[0]` is the left pipe; `active_mask[1..]` are the right
    /// pipes in order. `true` means that pipe still has items remaining.
    ///
    /// `INNER` requires the left plus *at least one* matching right (spec
    /// §8 scenario 1: key `5` is emitted with only `r0` present, `r1`
    /// having no match). `FULL_INNER` is the stricter N-way inner join
    /// requiring every right pipe to match.
    pub fn should_output(&self, has_left: bool, right_present: &[bool]) -> bool {
        let right_count = right_present.len();
        let right_present_count = right_present.iter().filter(|p| **p).count();
        match self {
            JoinMode::Inner => has_left && right_present_count > 0,
            JoinMode::Left => has_left,
            JoinMode::FullInner => has_left && right_present_count == right_count && right_count > 0,
            JoinMode::Outer => true,
        }
    }

    /// `active_mask[0]` is the left pipe; the rest are right pipes in
    /// order. Returns `true` when the merge can stop immediately,
    /// discarding whatever remains unread.
    ///
    /// Per spec §4.I: "tested with an infinite left pipe and a finite
    /// right: INNER mode must exit once any right pipe is exhausted."
    /// With a single right pipe "any" and "all" coincide; with several,
    /// `INNER` can still match through a right pipe that is still active,
    /// so it only halts once the left is gone or every right is gone.
    pub fn can_early_exit(&self, active_mask: &[bool], right_count: usize) -> bool {
        debug_assert_eq!(active_mask.len(), right_count + 1);
        let left_active = active_mask[0];
        let right_active = &active_mask[1..];
        match self {
            JoinMode::Inner => !left_active || right_active.iter().all(|active| !active),
            JoinMode::FullInner => !left_active || right_active.iter().any(|active| !active),
            JoinMode::Left => !left_active,
            JoinMode::Outer => !left_active && right_active.iter().all(|active| !active),
        }
    }
}

/// Parameterizes a reductor: a discriminator that derives a grouping key,
/// an accumulator constructor, a fold step, and a finalizer (spec §3
/// "ReductorConfig").
pub trait ReductorConfig<Item, Key, Acc, Out> {
    fn discriminate(&self, item: &Item) -> Key;
    fn init(&self, key: &Key) -> Acc;
    fn fold(&self, acc: Acc, item: Item) -> Acc;
    fn finalize(&self, key: Key, acc: Acc) -> Out;
}

/// Group-size policy for [`ListReductor`] (spec §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSizePolicy {
    /// Silently drop items beyond the limit.
    Truncate(usize),
    /// Raise `FluxErrorKind::ExcessiveResources` once the limit is
    /// exceeded.
    Fail(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_join_with_a_single_right_pipe_exits_once_it_is_exhausted() {
        let mode = JoinMode::Inner;
        assert!(mode.can_early_exit(&[true, false], 1));
        assert!(!mode.can_early_exit(&[true, true], 1));
    }

    #[test]
    fn inner_join_does_not_early_exit_while_any_right_pipe_is_still_active() {
        let mode = JoinMode::Inner;
        // left active, right[0] exhausted, right[1] still active: a later
        // key could still match through right[1].
        assert!(!mode.can_early_exit(&[true, false, true], 2));
        assert!(mode.can_early_exit(&[true, false, false], 2));
    }

    #[test]
    fn full_inner_join_early_exits_as_soon_as_any_right_is_exhausted() {
        let mode = JoinMode::FullInner;
        assert!(mode.can_early_exit(&[true, true, false], 2));
        assert!(!mode.can_early_exit(&[true, true, true], 2));
    }

    #[test]
    fn outer_join_never_early_exits_while_any_side_active() {
        let mode = JoinMode::Outer;
        assert!(!mode.can_early_exit(&[true, false, false], 2));
        assert!(mode.can_early_exit(&[false, false, false], 2));
    }

    #[test]
    fn inner_join_should_output_with_at_least_one_right_match() {
        let mode = JoinMode::Inner;
        assert!(mode.should_output(true, &[true, true]));
        assert!(mode.should_output(true, &[true, false]));
        assert!(!mode.should_output(true, &[false, false]));
        assert!(!mode.should_output(false, &[true, true]));
    }

    #[test]
    fn full_inner_join_should_output_requires_all_rights_present() {
        let mode = JoinMode::FullInner;
        assert!(mode.should_output(true, &[true, true]));
        assert!(!mode.should_output(true, &[true, false]));
        assert!(!mode.should_output(false, &[true, true]));
    }

    #[test]
    fn outer_join_should_output_even_with_nothing_present() {
        let mode = JoinMode::Outer;
        assert!(mode.should_output(false, &[false, false]));
    }
}
