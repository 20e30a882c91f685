//! Cluster view reporter
//!
//! Periodically logs the node's current membership. Read-only: it never
//! feeds anything back into the cluster state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::view::ClusterView;
use crate::cluster::{ClusterState, NodeIdentity};

/// Render one report: who we are and what we currently know
pub fn render_report(identity: &NodeIdentity, state: &ClusterState) -> String {
    let def = identity.current_definition();
    format!(
        "Node {} at {} ({} as of {}), cluster: {}",
        def.label,
        def.address,
        def.status,
        def.timestamp.to_rfc3339(),
        state
    )
}

/// Spawn the reporting task; it ends when the shutdown signal fires
pub(crate) fn spawn_reporter(
    view: Arc<ClusterView>,
    identity: NodeIdentity,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(start) = Instant::now().checked_add(interval) else {
            warn!("Report interval {:?} is out of range, reporting disabled", interval);
            let _ = shutdown_rx.recv().await;
            return;
        };
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                // Closed or Lagged both mean the node is going away
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    let state = view.snapshot();
                    info!("{}", render_report(&identity, &state));
                }
            }
        }
    })
}
