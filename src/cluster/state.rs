//! Cluster State
//!
//! Immutable membership snapshot: one definition per known node label.
//! A node replaces its snapshot wholesale whenever a merge produces a new
//! version; snapshots themselves are never mutated.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use super::identity::{NodeDefinition, NodeLabel};

/// Membership snapshot keyed by node label
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<NodeLabel, NodeDefinition>")]
pub struct ClusterState {
    members: BTreeMap<NodeLabel, NodeDefinition>,
}

impl ClusterState {
    /// Empty state, the identity element of merge
    pub fn empty() -> Self {
        Self::default()
    }

    /// State containing exactly one definition
    pub fn singleton(definition: NodeDefinition) -> Self {
        let mut members = BTreeMap::new();
        members.insert(definition.label, definition);
        Self { members }
    }

    /// Build a state from definitions; a repeated label keeps the last one
    pub fn from_definitions<I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = NodeDefinition>,
    {
        Self {
            members: definitions.into_iter().map(|d| (d.label, d)).collect(),
        }
    }

    pub(crate) fn from_members(members: BTreeMap<NodeLabel, NodeDefinition>) -> Self {
        Self { members }
    }

    pub fn get(&self, label: &NodeLabel) -> Option<&NodeDefinition> {
        self.members.get(label)
    }

    pub fn contains(&self, label: &NodeLabel) -> bool {
        self.members.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Known labels in ascending order
    pub fn labels(&self) -> impl Iterator<Item = &NodeLabel> {
        self.members.keys()
    }

    /// Definitions in ascending label order
    pub fn iter(&self) -> btree_map::Values<'_, NodeLabel, NodeDefinition> {
        self.members.values()
    }
}

impl<'a> IntoIterator for &'a ClusterState {
    type Item = &'a NodeDefinition;
    type IntoIter = btree_map::Values<'a, NodeLabel, NodeDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for ClusterState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.members.serialize(serializer)
    }
}

/// A decoded entry whose key disagrees with the label inside the definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMismatch {
    pub key: NodeLabel,
    pub label: NodeLabel,
}

impl fmt::Display for LabelMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "member key {} does not match definition label {}",
            self.key, self.label
        )
    }
}

impl std::error::Error for LabelMismatch {}

impl TryFrom<BTreeMap<NodeLabel, NodeDefinition>> for ClusterState {
    type Error = LabelMismatch;

    fn try_from(members: BTreeMap<NodeLabel, NodeDefinition>) -> Result<Self, Self::Error> {
        if let Some((key, def)) = members.iter().find(|(key, def)| **key != def.label) {
            return Err(LabelMismatch {
                key: *key,
                label: def.label,
            });
        }
        Ok(Self { members })
    }
}

/// Console rendering used by the periodic reporter
impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} member(s)", self.members.len())?;
        for def in self.members.values() {
            write!(
                f,
                "\n  {} {} {} {}",
                def.label,
                def.address,
                def.status,
                def.timestamp.to_rfc3339()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::identity::{NodeAddress, NodeIdentity};

    fn definition(port: u16) -> NodeDefinition {
        NodeIdentity::new(NodeAddress::new("localhost", port)).current_definition()
    }

    #[test]
    fn test_singleton() {
        let def = definition(7400);
        let state = ClusterState::singleton(def.clone());
        assert_eq!(state.len(), 1);
        assert!(state.contains(&def.label));
        assert_eq!(state.get(&def.label), Some(&def));
    }

    #[test]
    fn test_from_definitions_keeps_last_duplicate() {
        let first = definition(7400);
        let mut second = first.clone();
        second.address = NodeAddress::new("localhost", 7401);

        let state = ClusterState::from_definitions(vec![first.clone(), second.clone()]);
        assert_eq!(state.len(), 1);
        assert_eq!(state.get(&first.label), Some(&second));
    }

    #[test]
    fn test_empty() {
        let state = ClusterState::empty();
        assert!(state.is_empty());
        assert_eq!(state.iter().count(), 0);
    }

    #[test]
    fn test_serialized_as_label_map() {
        let def = definition(7400);
        let state = ClusterState::singleton(def.clone());
        let value = serde_json::to_value(&state).unwrap();

        let entry = &value[def.label.to_string()];
        assert_eq!(entry["label"], def.label.to_string());
        assert_eq!(entry["address"], "localhost:7400");
    }

    #[test]
    fn test_deserialize_rejects_mismatched_key() {
        let def = definition(7400);
        let other = NodeLabel::random();
        let mut map = serde_json::Map::new();
        map.insert(other.to_string(), serde_json::to_value(&def).unwrap());

        let result: Result<ClusterState, _> = serde_json::from_value(map.into());
        assert!(result.is_err());
    }

    #[test]
    fn test_display_lists_members() {
        let a = definition(7400);
        let b = definition(7401);
        let state = ClusterState::from_definitions(vec![a.clone(), b.clone()]);
        let rendered = state.to_string();

        assert!(rendered.starts_with("2 member(s)"));
        assert!(rendered.contains(&a.label.to_string()));
        assert!(rendered.contains("localhost:7401"));
        assert!(rendered.contains("LIVE"));
    }
}
