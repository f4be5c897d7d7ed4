//! Support for partitioning test runs across several machines.
//!
//! Without timing history the identifiers are sliced into contiguous chunks
//! of `ceil(total / group_total)`. With history, each identifier (in discovery
//! order) goes to the group with the smallest accumulated duration, the lowest
//! index winning ties. This greedy rule keeps any two groups within one
//! maximum test duration of each other.

use tracing::debug;

use crate::models::TestId;
use crate::timings::TimingLedger;

/// Duration assumed for tests missing from the ledger
pub const DEFAULT_ESTIMATE_SECS: f64 = 1.0;

/// Tests split into disjoint, ordered groups
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupAssignment {
    groups: Vec<Vec<TestId>>,
    /// Accumulated estimate per group (only meaningful with history)
    loads: Vec<f64>,
}

impl GroupAssignment {
    pub fn group_total(&self) -> usize {
        self.groups.len()
    }

    /// Tests of a 1-indexed group; out-of-range positions are empty
    pub fn group(&self, pos: usize) -> &[TestId] {
        pos.checked_sub(1)
            .and_then(|i| self.groups.get(i))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Accumulated estimated seconds of a 1-indexed group
    pub fn load(&self, pos: usize) -> f64 {
        pos.checked_sub(1)
            .and_then(|i| self.loads.get(i))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn groups(&self) -> &[Vec<TestId>] {
        &self.groups
    }

    pub fn total_tests(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}

/// Splits identifiers into groups
#[derive(Clone, Debug)]
pub struct Partitioner {
    group_total: usize,
    max_groups: usize,
}

impl Partitioner {
    pub fn new(group_total: usize) -> Self {
        Self {
            group_total,
            max_groups: usize::MAX,
        }
    }

    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = max_groups;
        self
    }

    /// Partition all identifiers; a ledger with entries enables balancing
    pub fn partition(&self, ids: &[TestId], ledger: Option<&TimingLedger>) -> GroupAssignment {
        if self.group_total == 0 || self.group_total > self.max_groups {
            debug!(
                "Group total {} outside 1..={}, producing no groups",
                self.group_total, self.max_groups
            );
            return GroupAssignment::default();
        }

        match ledger.filter(|l| !l.is_empty()) {
            Some(ledger) => self.balanced(ids, ledger),
            None => self.contiguous(ids),
        }
    }

    /// Tests for one 1-indexed group position
    pub fn select(
        &self,
        ids: &[TestId],
        ledger: Option<&TimingLedger>,
        group_pos: usize,
    ) -> Vec<TestId> {
        self.partition(ids, ledger).group(group_pos).to_vec()
    }

    fn contiguous(&self, ids: &[TestId]) -> GroupAssignment {
        let chunk = ids.len().div_ceil(self.group_total);
        let mut groups: Vec<Vec<TestId>> = vec![Vec::new(); self.group_total];

        if chunk > 0 {
            for (i, slice) in ids.chunks(chunk).enumerate() {
                groups[i] = slice.to_vec();
            }
        }

        GroupAssignment {
            loads: vec![0.0; self.group_total],
            groups,
        }
    }

    fn balanced(&self, ids: &[TestId], ledger: &TimingLedger) -> GroupAssignment {
        let mut groups: Vec<Vec<TestId>> = vec![Vec::new(); self.group_total];
        let mut loads = vec![0.0_f64; self.group_total];

        for id in ids {
            // Strict `<` keeps the lowest index on ties.
            let mut target = 0;
            for (i, load) in loads.iter().enumerate().skip(1) {
                if *load < loads[target] {
                    target = i;
                }
            }

            groups[target].push(id.clone());
            loads[target] += ledger.get(id).unwrap_or(DEFAULT_ESTIMATE_SECS);
        }

        GroupAssignment { groups, loads }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(names: &[&str]) -> Vec<TestId> {
        names.iter().map(|n| TestId::new(n)).collect()
    }

    fn names(group: &[TestId]) -> Vec<&str> {
        group.iter().map(TestId::as_str).collect()
    }

    #[test]
    fn test_single_group_keeps_discovery_order() {
        let all = ids(&["a/x.test.js", "a/y.test.js", "b/z.test.js"]);
        let assignment = Partitioner::new(1).partition(&all, None);
        assert_eq!(
            names(assignment.group(1)),
            vec!["a/x.test.js", "a/y.test.js", "b/z.test.js"]
        );
    }

    #[test]
    fn test_contiguous_slicing() {
        let all = ids(&["a/x.test.js", "a/y.test.js", "b/z.test.js"]);
        let assignment = Partitioner::new(2).partition(&all, None);
        assert_eq!(names(assignment.group(1)), vec!["a/x.test.js", "a/y.test.js"]);
        assert_eq!(names(assignment.group(2)), vec!["b/z.test.js"]);
    }

    #[test]
    fn test_empty_ledger_means_contiguous() {
        let all = ids(&["a", "b", "c"]);
        let ledger = TimingLedger::default();
        let assignment = Partitioner::new(2).partition(&all, Some(&ledger));
        assert_eq!(names(assignment.group(1)), vec!["a", "b"]);
    }

    #[test]
    fn test_more_groups_than_tests() {
        let all = ids(&["a", "b"]);
        let assignment = Partitioner::new(4).partition(&all, None);
        assert_eq!(assignment.group(1).len(), 1);
        assert_eq!(assignment.group(2).len(), 1);
        assert!(assignment.group(3).is_empty());
        assert!(assignment.group(4).is_empty());
    }

    #[test]
    fn test_out_of_range_positions_are_empty() {
        let all = ids(&["a", "b"]);
        let partitioner = Partitioner::new(2);
        assert!(partitioner.select(&all, None, 0).is_empty());
        assert!(partitioner.select(&all, None, 3).is_empty());
    }

    #[test]
    fn test_group_total_above_max_is_empty() {
        let all = ids(&["a", "b"]);
        let partitioner = Partitioner::new(8).with_max_groups(4);
        assert!(partitioner.select(&all, None, 1).is_empty());
        assert_eq!(partitioner.partition(&all, None).group_total(), 0);
    }

    #[test]
    fn test_balanced_by_history() {
        let all = ids(&["slow", "a", "b", "c"]);
        let ledger: TimingLedger = [("slow", 10.0), ("a", 2.0), ("b", 2.0), ("c", 2.0)]
            .into_iter()
            .collect();

        let assignment = Partitioner::new(2).partition(&all, Some(&ledger));
        assert_eq!(names(assignment.group(1)), vec!["slow"]);
        assert_eq!(names(assignment.group(2)), vec!["a", "b", "c"]);
        assert_eq!(assignment.load(1), 10.0);
        assert_eq!(assignment.load(2), 6.0);
    }

    #[test]
    fn test_balanced_ties_go_to_lowest_index() {
        let all = ids(&["a", "b", "c"]);
        let ledger: TimingLedger = [("a", 1.0), ("b", 1.0), ("c", 1.0)].into_iter().collect();

        let assignment = Partitioner::new(3).partition(&all, Some(&ledger));
        assert_eq!(names(assignment.group(1)), vec!["a"]);
        assert_eq!(names(assignment.group(2)), vec!["b"]);
        assert_eq!(names(assignment.group(3)), vec!["c"]);
    }

    #[test]
    fn test_unknown_tests_use_default_estimate() {
        let all = ids(&["known", "new1", "new2"]);
        let ledger: TimingLedger = [("known", 1.5)].into_iter().collect();

        let assignment = Partitioner::new(2).partition(&all, Some(&ledger));
        assert_eq!(names(assignment.group(1)), vec!["known"]);
        assert_eq!(names(assignment.group(2)), vec!["new1", "new2"]);
        assert_eq!(assignment.load(2), 2.0 * DEFAULT_ESTIMATE_SECS);
    }

    fn unique_ids() -> impl Strategy<Value = Vec<TestId>> {
        prop::collection::btree_set("[a-z]{1,8}", 0..40)
            .prop_map(|set| set.into_iter().map(TestId::new).collect())
    }

    proptest! {
        #[test]
        fn prop_groups_cover_input_exactly_once(
            all in unique_ids(),
            group_total in 1usize..8,
            weights in prop::collection::vec(1u32..100, 40),
            with_history in any::<bool>(),
        ) {
            let ledger: TimingLedger = all
                .iter()
                .zip(&weights)
                .map(|(id, w)| (id.as_str(), f64::from(*w)))
                .collect();
            let ledger = if with_history { Some(&ledger) } else { None };

            let assignment = Partitioner::new(group_total).partition(&all, ledger);
            prop_assert_eq!(assignment.group_total(), group_total);
            prop_assert_eq!(assignment.total_tests(), all.len());

            let mut seen: Vec<TestId> = assignment.groups().iter().flatten().cloned().collect();
            seen.sort();
            let mut expected = all.clone();
            expected.sort();
            prop_assert_eq!(seen, expected);
        }

        #[test]
        fn prop_greedy_balance_bound(
            all in unique_ids(),
            group_total in 1usize..8,
            weights in prop::collection::vec(1u32..100, 40),
        ) {
            let ledger: TimingLedger = all
                .iter()
                .zip(&weights)
                .map(|(id, w)| (id.as_str(), f64::from(*w)))
                .collect();
            prop_assume!(!ledger.is_empty());

            let assignment = Partitioner::new(group_total).partition(&all, Some(&ledger));
            let max_single = weights.iter().take(all.len()).copied().max().map(f64::from).unwrap_or(0.0);

            for a in 1..=group_total {
                for b in 1..=group_total {
                    let diff = (assignment.load(a) - assignment.load(b)).abs();
                    prop_assert!(diff <= max_single, "groups {} and {} differ by {}", a, b, diff);
                }
            }
        }
    }
}
