//! Node Lifecycle
//!
//! Starts a node (lone or joining through a seed), serves inbound
//! handshakes, reports the cluster view and shuts everything down.
//!
//! Phases: `Starting -> Lone | Joining -> Running -> Stopping -> Stopped`.

mod reporter;
mod view;

pub use reporter::render_report;
pub use view::ClusterView;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::cluster::handshake::{self, HandshakeError, HandshakeLimits};
use crate::cluster::{
    ClusterState, ClusterStateResolver, NodeDefinition, NodeIdentity, NodeLabel,
};
use crate::config::NodeConfig;

/// Lifecycle phase of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    /// Binding the listener and generating the identity
    Starting,
    /// No seed configured
    Lone,
    /// Bootstrap handshake with the seed in progress
    Joining,
    /// Serving handshakes and reporting
    Running,
    /// Shutdown requested, draining in-flight work
    Stopping,
    /// All resources released
    Stopped,
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodePhase::Starting => "starting",
            NodePhase::Lone => "lone",
            NodePhase::Joining => "joining",
            NodePhase::Running => "running",
            NodePhase::Stopping => "stopping",
            NodePhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Fatal startup errors
#[derive(Debug)]
pub enum NodeError {
    /// The listening socket could not be bound
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// The seed was unreachable or answered with garbage
    Bootstrap {
        seed: String,
        source: HandshakeError,
    },
    /// The seed did not answer in time
    BootstrapTimeout { seed: String, after: Duration },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            NodeError::Bootstrap { seed, source } => {
                write!(f, "bootstrap from seed {} failed: {}", seed, source)
            }
            NodeError::BootstrapTimeout { seed, after } => {
                write!(f, "bootstrap from seed {} timed out after {:?}", seed, after)
            }
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NodeError::Bind { source, .. } => Some(source),
            NodeError::Bootstrap { source, .. } => Some(source),
            NodeError::BootstrapTimeout { .. } => None,
        }
    }
}

/// Background tasks owned by a running node
struct NodeTasks {
    accept: JoinHandle<()>,
    reporter: JoinHandle<()>,
}

/// A running cluster node
///
/// The node exclusively owns its cluster state; other components read it
/// through [`Node::cluster_state`] and change it only through the merge and
/// replace operations below.
pub struct Node {
    identity: NodeIdentity,
    local_addr: SocketAddr,
    view: Arc<ClusterView>,
    phase: watch::Sender<NodePhase>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Option<NodeTasks>>,
}

impl Node {
    /// Start a node: bind, bootstrap from the seed if configured, then begin
    /// serving handshakes and reporting.
    ///
    /// A configured seed is mandatory: any handshake failure aborts startup
    /// instead of falling back to a lone node.
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        let (phase, _) = watch::channel(NodePhase::Starting);

        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|source| NodeError::Bind {
                addr: config.bind,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| NodeError::Bind {
            addr: config.bind,
            source,
        })?;

        let identity = NodeIdentity::new(config.advertise_address(local_addr.port()));
        info!("My label is {}", identity.label());
        info!(
            "Listening on {} (advertised as {})",
            local_addr,
            identity.address()
        );

        let resolver = ClusterStateResolver::new(config.tie_break);
        let own = ClusterState::singleton(identity.current_definition());
        let view = Arc::new(ClusterView::new(own.clone(), resolver));
        let limits = config.handshake_limits();

        match &config.seed {
            None => {
                transition(&phase, NodePhase::Lone);
                info!("No seed configured, starting as a lone node");
            }
            Some(seed) => {
                transition(&phase, NodePhase::Joining);
                info!("Joining cluster via seed {}", seed);

                // The listener is dropped on the error paths below
                let response = bootstrap(seed, &own, limits).await?;
                let merged = view.merge_in(&response);
                info!(
                    "Bootstrapped from seed {}: {} member(s) known",
                    seed,
                    merged.len()
                );
            }
        }

        let (shutdown, _) = broadcast::channel(1);
        let semaphore = Arc::new(Semaphore::new(config.max_connections));

        let accept = tokio::spawn(accept_loop(
            listener,
            view.clone(),
            identity.clone(),
            limits,
            semaphore,
            shutdown.subscribe(),
        ));
        let reporter = reporter::spawn_reporter(
            view.clone(),
            identity.clone(),
            config.report_interval,
            shutdown.subscribe(),
        );

        transition(&phase, NodePhase::Running);

        Ok(Self {
            identity,
            local_addr,
            view,
            phase,
            shutdown,
            tasks: Mutex::new(Some(NodeTasks { accept, reporter })),
        })
    }

    pub fn label(&self) -> NodeLabel {
        self.identity.label()
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn phase(&self) -> NodePhase {
        *self.phase.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_phase(&self) -> watch::Receiver<NodePhase> {
        self.phase.subscribe()
    }

    /// Current cluster state snapshot
    pub fn cluster_state(&self) -> Arc<ClusterState> {
        self.view.snapshot()
    }

    /// Replace the cluster state wholesale
    ///
    /// This is a blind write: members merged in by concurrent handshakes
    /// since `state` was built are overwritten, not merged. A replacement
    /// missing our own entry gets it merged back in, so the node always
    /// knows itself.
    pub fn set_cluster_state(&self, state: ClusterState) -> Arc<ClusterState> {
        let state = if state.contains(&self.label()) {
            state
        } else {
            warn!("Replacement cluster state is missing this node, re-adding it");
            self.view.resolver().merge(
                &state,
                &ClusterState::singleton(self.current_definition()),
            )
        };
        self.view.replace(state)
    }

    /// Our own definition stamped with the current time
    pub fn current_definition(&self) -> NodeDefinition {
        self.identity.current_definition()
    }

    /// Merge a single definition into the current state
    pub fn add_member(&self, definition: NodeDefinition) -> Arc<ClusterState> {
        self.view.merge_in(&ClusterState::singleton(definition))
    }

    /// Run until `signal` completes, then stop
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!("Shutting down node {}", self.label());
        self.stop().await;
    }

    /// Stop reporting and accepting, wait for in-flight handshakes, release
    /// the listener. Safe to call more than once.
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            // Another caller is stopping; wait for it to finish
            let mut phase = self.phase.subscribe();
            let _ = phase.wait_for(|p| *p == NodePhase::Stopped).await;
            return;
        };

        transition(&self.phase, NodePhase::Stopping);
        let _ = self.shutdown.send(());

        if let Err(e) = tasks.reporter.await {
            warn!("Reporter task ended abnormally: {}", e);
        }
        if let Err(e) = tasks.accept.await {
            warn!("Accept task ended abnormally: {}", e);
        }

        transition(&self.phase, NodePhase::Stopped);
        info!("Node {} stopped", self.label());
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // Background tasks release their resources once signalled
        if self.tasks.get_mut().is_some() {
            let _ = self.shutdown.send(());
        }
    }
}

fn transition(phase: &watch::Sender<NodePhase>, next: NodePhase) {
    let previous = phase.send_replace(next);
    debug!("Node phase: {} -> {}", previous, next);
}

/// Initiator side of the bootstrap handshake, with errors mapped to
/// startup failures
async fn bootstrap(
    seed: &str,
    own: &ClusterState,
    limits: HandshakeLimits,
) -> Result<ClusterState, NodeError> {
    info!("Sending join request to seed {}", seed);
    match handshake::initiate(seed, own, limits).await {
        Ok(response) => {
            info!("Seed {} answered with {} member(s)", seed, response.len());
            Ok(response)
        }
        Err(HandshakeError::Timeout(after)) => {
            error!("Seed {} did not answer within {:?}", seed, after);
            Err(NodeError::BootstrapTimeout {
                seed: seed.to_string(),
                after,
            })
        }
        Err(source) => {
            error!("Failed to bootstrap from seed {}: {}", seed, source);
            Err(NodeError::Bootstrap {
                seed: seed.to_string(),
                source,
            })
        }
    }
}

/// Accept inbound handshakes until shutdown, then drain in-flight ones
///
/// A connection permit is taken before each accept, so at most
/// `max_connections` sockets are open at once; further peers queue in the
/// listen backlog.
async fn accept_loop(
    listener: TcpListener,
    view: Arc<ClusterView>,
    identity: NodeIdentity,
    limits: HandshakeLimits,
    semaphore: Arc<Semaphore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let identity = Arc::new(identity);
    let mut connections = JoinSet::new();

    debug!("Starting handshake accept loop");
    'accept: loop {
        let permit = tokio::select! {
            biased;

            _ = shutdown_rx.recv() => break,
            Some(result) = connections.join_next(), if !connections.is_empty() => {
                log_task_result(result);
                continue;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, addr) = loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break 'accept,
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    log_task_result(result);
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => break accepted,
                    Err(e) => error!("Failed to accept handshake connection: {}", e),
                },
            }
        };

        debug!("New handshake connection from {}", addr);
        connections.spawn(serve_handshake(
            stream,
            addr,
            view.clone(),
            identity.clone(),
            limits,
            permit,
        ));
    }

    drop(listener);
    if !connections.is_empty() {
        info!("Waiting for {} in-flight handshake(s)", connections.len());
    }
    while let Some(result) = connections.join_next().await {
        log_task_result(result);
    }
    debug!("Handshake accept loop finished");
}

fn log_task_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        warn!("Handshake task failed: {}", e);
    }
}

/// Responder side for one inbound connection
async fn serve_handshake(
    mut stream: TcpStream,
    addr: SocketAddr,
    view: Arc<ClusterView>,
    identity: Arc<NodeIdentity>,
    limits: HandshakeLimits,
    _permit: OwnedSemaphorePermit,
) {
    stream.set_nodelay(true).ok();

    let result = handshake::respond(&mut stream, limits, |request| {
        debug!("Peer {} sent {} member(s)", addr, request.len());
        let incoming = view.resolver().merge(
            &request,
            &ClusterState::singleton(identity.current_definition()),
        );
        view.merge_in(&incoming)
    })
    .await;

    match result {
        Ok(merged) => info!(
            "Merged cluster state from {}: {} member(s) known",
            addr,
            merged.len()
        ),
        // No state update for this connection; it is closed on drop
        Err(e) => debug!("Handshake with {} failed: {}", addr, e),
    }
}
