//! Shared cluster view
//!
//! Holds the node's current snapshot. Readers clone the `Arc`; every
//! read-merge-write happens under the write lock so concurrent merges
//! cannot drop each other's updates.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cluster::{ClusterState, ClusterStateResolver};

pub struct ClusterView {
    current: RwLock<Arc<ClusterState>>,
    resolver: ClusterStateResolver,
}

impl ClusterView {
    pub fn new(initial: ClusterState, resolver: ClusterStateResolver) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            resolver,
        }
    }

    pub fn resolver(&self) -> ClusterStateResolver {
        self.resolver
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<ClusterState> {
        self.current.read().clone()
    }

    /// Replace the snapshot wholesale
    pub fn replace(&self, state: ClusterState) -> Arc<ClusterState> {
        let state = Arc::new(state);
        *self.current.write() = state.clone();
        state
    }

    /// Merge `incoming` into the current snapshot and store the result
    pub fn merge_in(&self, incoming: &ClusterState) -> Arc<ClusterState> {
        let mut current = self.current.write();
        let merged = Arc::new(self.resolver.merge(&current, incoming));
        *current = merged.clone();
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{NodeAddress, NodeIdentity};

    fn singleton(port: u16) -> ClusterState {
        ClusterState::singleton(
            NodeIdentity::new(NodeAddress::new("localhost", port)).current_definition(),
        )
    }

    #[test]
    fn test_snapshot_is_stable_after_merge() {
        let view = ClusterView::new(singleton(7400), ClusterStateResolver::default());
        let before = view.snapshot();

        let after = view.merge_in(&singleton(7401));

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert_eq!(view.snapshot(), after);
    }

    #[test]
    fn test_replace() {
        let view = ClusterView::new(singleton(7400), ClusterStateResolver::default());
        let replacement = singleton(7401);
        view.replace(replacement.clone());
        assert_eq!(*view.snapshot(), replacement);
    }

    #[test]
    fn test_concurrent_merges_keep_every_update() {
        let view = Arc::new(ClusterView::new(
            singleton(7400),
            ClusterStateResolver::default(),
        ));

        let handles: Vec<_> = (0..16u16)
            .map(|i| {
                let view = view.clone();
                std::thread::spawn(move || {
                    for j in 0..8u16 {
                        view.merge_in(&singleton(8000 + i * 8 + j));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(view.snapshot().len(), 1 + 16 * 8);
    }
}
