//! State Resolver
//!
//! Merges two cluster states into one reflecting the union of their
//! knowledge. For a label known to both sides the definition with the later
//! timestamp wins. Equal timestamps fall back to comparing the label as an
//! unsigned byte sequence, then the address and status, so the choice is a
//! maximum over a total order. That makes merge commutative, associative
//! and idempotent.

use std::cmp::Ordering;
use std::collections::btree_map::Entry;

use serde::Deserialize;

use super::identity::NodeDefinition;
use super::state::ClusterState;

/// Direction of the tie-break applied when two definitions carry the same
/// timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// The larger label (then address) wins
    #[default]
    LargerLabel,
    /// The smaller label (then address) wins
    SmallerLabel,
}

/// Deterministic merge of cluster states
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterStateResolver {
    tie_break: TieBreak,
}

impl ClusterStateResolver {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    /// Merge two states. Total over all inputs, including empty ones.
    pub fn merge(&self, a: &ClusterState, b: &ClusterState) -> ClusterState {
        let (base, other) = if a.len() >= b.len() { (a, b) } else { (b, a) };

        let mut members = base
            .iter()
            .map(|def| (def.label, def.clone()))
            .collect::<std::collections::BTreeMap<_, _>>();

        for def in other {
            match members.entry(def.label) {
                Entry::Vacant(slot) => {
                    slot.insert(def.clone());
                }
                Entry::Occupied(mut slot) => {
                    if self.prefer(def, slot.get()) {
                        slot.insert(def.clone());
                    }
                }
            }
        }

        ClusterState::from_members(members)
    }

    /// Whether `candidate` should replace `current` for the same label
    pub fn prefer(&self, candidate: &NodeDefinition, current: &NodeDefinition) -> bool {
        self.compare(candidate, current) == Ordering::Greater
    }

    fn compare(&self, a: &NodeDefinition, b: &NodeDefinition) -> Ordering {
        a.timestamp.cmp(&b.timestamp).then_with(|| {
            let fallback = a
                .label
                .cmp(&b.label)
                .then_with(|| a.address.cmp(&b.address))
                .then_with(|| a.status.cmp(&b.status));
            match self.tie_break {
                TieBreak::LargerLabel => fallback,
                TieBreak::SmallerLabel => fallback.reverse(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::identity::{NodeAddress, NodeLabel, NodeStatus};
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn def(label: u128, port: u16, secs: i64) -> NodeDefinition {
        NodeDefinition {
            timestamp: at(secs),
            status: NodeStatus::Live,
            label: NodeLabel::from_uuid(Uuid::from_u128(label)),
            address: NodeAddress::new("localhost", port),
        }
    }

    #[test]
    fn test_merge_disjoint_is_union() {
        let x = def(1, 7400, 0);
        let y = def(2, 7401, 0);
        let a = ClusterState::singleton(x.clone());
        let b = ClusterState::singleton(y.clone());

        let merged = ClusterStateResolver::default().merge(&a, &b);
        assert_eq!(merged, ClusterState::from_definitions(vec![x, y]));
    }

    #[test]
    fn test_merge_with_empty() {
        let resolver = ClusterStateResolver::default();
        let a = ClusterState::singleton(def(1, 7400, 0));
        let empty = ClusterState::empty();

        assert_eq!(resolver.merge(&a, &empty), a);
        assert_eq!(resolver.merge(&empty, &a), a);
        assert_eq!(resolver.merge(&empty, &empty), empty);
    }

    #[test]
    fn test_later_timestamp_wins() {
        let resolver = ClusterStateResolver::default();
        let old = def(1, 7400, 0);
        let new = def(1, 7401, 5);
        let a = ClusterState::singleton(old);
        let b = ClusterState::singleton(new.clone());

        assert_eq!(resolver.merge(&a, &b).get(&new.label), Some(&new));
        assert_eq!(resolver.merge(&b, &a).get(&new.label), Some(&new));
    }

    #[test]
    fn test_equal_timestamp_tie_break() {
        let low = def(1, 7400, 0);
        let mut high = low.clone();
        high.address = NodeAddress::new("localhost", 7401);
        let a = ClusterState::singleton(low.clone());
        let b = ClusterState::singleton(high.clone());

        let larger = ClusterStateResolver::new(TieBreak::LargerLabel);
        assert_eq!(larger.merge(&a, &b).get(&low.label), Some(&high));
        assert_eq!(larger.merge(&b, &a).get(&low.label), Some(&high));

        let smaller = ClusterStateResolver::new(TieBreak::SmallerLabel);
        assert_eq!(smaller.merge(&a, &b).get(&low.label), Some(&low));
        assert_eq!(smaller.merge(&b, &a).get(&low.label), Some(&low));
    }

    #[test]
    fn test_prefer() {
        let resolver = ClusterStateResolver::default();
        let old = def(1, 7400, 0);
        let new = def(1, 7400, 1);
        assert!(resolver.prefer(&new, &old));
        assert!(!resolver.prefer(&old, &new));
        assert!(!resolver.prefer(&old, &old));
    }

    #[test]
    fn test_tie_break_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            tie_break: TieBreak,
        }
        let w: Wrapper = toml::from_str("tie_break = \"smaller-label\"").unwrap();
        assert_eq!(w.tie_break, TieBreak::SmallerLabel);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        // Small label and time spaces so overlapping keys and equal
        // timestamps are common
        fn definition_strategy() -> impl Strategy<Value = NodeDefinition> {
            (0u128..6, 7400u16..7403, 0i64..4)
                .prop_map(|(label, port, secs)| def(label, port, secs))
        }

        fn state_strategy() -> impl Strategy<Value = ClusterState> {
            prop::collection::vec(definition_strategy(), 0..8)
                .prop_map(ClusterState::from_definitions)
        }

        fn tie_break_strategy() -> impl Strategy<Value = TieBreak> {
            prop_oneof![Just(TieBreak::LargerLabel), Just(TieBreak::SmallerLabel)]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            #[test]
            fn prop_merge_idempotent(s in state_strategy(), tb in tie_break_strategy()) {
                let r = ClusterStateResolver::new(tb);
                prop_assert_eq!(r.merge(&s, &s), s);
            }

            #[test]
            fn prop_merge_commutative(
                a in state_strategy(),
                b in state_strategy(),
                tb in tie_break_strategy(),
            ) {
                let r = ClusterStateResolver::new(tb);
                prop_assert_eq!(r.merge(&a, &b), r.merge(&b, &a));
            }

            #[test]
            fn prop_merge_associative(
                a in state_strategy(),
                b in state_strategy(),
                c in state_strategy(),
                tb in tie_break_strategy(),
            ) {
                let r = ClusterStateResolver::new(tb);
                let left = r.merge(&r.merge(&a, &b), &c);
                let right = r.merge(&a, &r.merge(&b, &c));
                prop_assert_eq!(left, right);
            }

            #[test]
            fn prop_merge_union_of_keys(a in state_strategy(), b in state_strategy()) {
                let merged = ClusterStateResolver::default().merge(&a, &b);
                let mut expected: Vec<_> = a.labels().chain(b.labels()).copied().collect();
                expected.sort();
                expected.dedup();
                let actual: Vec<_> = merged.labels().copied().collect();
                prop_assert_eq!(actual, expected);
            }

            #[test]
            fn prop_later_timestamp_selected(
                label in 0u128..u128::MAX,
                t1 in 0i64..1_000_000,
                t2 in 0i64..1_000_000,
            ) {
                prop_assume!(t1 != t2);
                let first = def(label, 7400, t1);
                let second = def(label, 7400, t2);
                let later = if t1 > t2 { first.clone() } else { second.clone() };

                let merged = ClusterStateResolver::default().merge(
                    &ClusterState::singleton(first),
                    &ClusterState::singleton(second),
                );
                prop_assert_eq!(merged.get(&later.label), Some(&later));
            }
        }
    }
}
