//! Relay connection multiplexer.
//!
//! Presents one logical channel per remote peer on top of relay allocations:
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!  engine  ◄──────┤ listener (own allocation)    │◄── frames from every peer
//!  outbound ─────►│ connection → peer A alloc    │
//!  queue          │ connection → peer B alloc    │
//!                 └──────────────────────────────┘
//! ```
//!
//! Every frame sent carries the local client id as an 8-byte big-endian
//! prefix, so the receiving side can rebuild the sender's synthetic address
//! no matter which allocation the frame came through.
//!
//! All state is owned by the tick thread. Allocation and join requests run on
//! the tokio runtime and post a completion message that [`RelayMultiplexer::pump`]
//! drains, so completions are applied in a deterministic order.

use crate::error::RelayError;
use crate::framing::{decode_frame, encode_frame};
use crate::service::{DriverEvent, HostAllocation, LinkId, RelayDriver, RelayService};
use huddle_core::{ClientId, ConsensusEngine, JoinCode, PeerIdentity, SyntheticAddress};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Establishment state of an outbound connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Joined, rendezvous not finished
    Pending,
    /// Accepts data
    Connected,
    /// Remote side went away
    Disconnected,
}

/// Outbound channel to one remote peer
pub struct RelayConnection {
    remote: PeerIdentity,
    driver: Box<dyn RelayDriver>,
    link: Option<LinkId>,
    status: ConnectionStatus,
}

impl RelayConnection {
    /// Remote peer
    #[must_use]
    pub fn remote(&self) -> &PeerIdentity {
        &self.remote
    }

    /// Establishment state
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("remote", &self.remote)
            .field("link", &self.link)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Something the owner of the multiplexer may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayNotice {
    /// Listener allocation is ready
    Bound(JoinCode),
    /// Listener allocation failed; `bind` may be called again
    BindFailed(String),
    /// A peer joined the listener allocation
    Accepted(LinkId),
    /// Outbound connection finished its rendezvous
    Connected(PeerIdentity),
    /// Joining a peer's allocation failed; `connect_to` may be called again
    ConnectFailed {
        /// Peer that could not be reached
        remote: PeerIdentity,
        /// Failure description
        reason: String,
    },
    /// Outbound connection was closed by the remote side
    Disconnected(PeerIdentity),
}

/// Packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    /// Inbound frames handed to the engine
    pub inbound_delivered: u64,
    /// Outbound frames written to a driver
    pub outbound_sent: u64,
    /// Outbound packets for destinations without a connection
    pub dropped_unknown: u64,
    /// Outbound packets for connections still pending or disconnected
    pub dropped_unconnected: u64,
    /// Inbound frames too short to carry a sender id
    pub dropped_malformed: u64,
    /// Driver send failures and engine commit failures
    pub errors: u64,
}

enum Completion {
    Bound {
        generation: u64,
        result: Result<HostAllocation, RelayError>,
    },
    Joined {
        generation: u64,
        remote: PeerIdentity,
        join_code: JoinCode,
        result: Result<Box<dyn RelayDriver>, RelayError>,
    },
}

enum Listener {
    Unbound,
    Binding,
    Bound {
        join_code: JoinCode,
        driver: Box<dyn RelayDriver>,
    },
}

/// Multiplexes per-peer relay connections for one local peer
pub struct RelayMultiplexer<S: RelayService> {
    service: Arc<S>,
    runtime: Handle,
    local_id: ClientId,
    listener: Listener,
    connections: HashMap<SyntheticAddress, RelayConnection>,
    pending: HashSet<SyntheticAddress>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    generation: u64,
    stats: MultiplexerStats,
}

impl<S: RelayService> RelayMultiplexer<S> {
    /// Create a multiplexer for the peer identified by `local_id`
    ///
    /// Relay requests are spawned on `runtime`.
    pub fn new(service: Arc<S>, local_id: ClientId, runtime: Handle) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            service,
            runtime,
            local_id,
            listener: Listener::Unbound,
            connections: HashMap::new(),
            pending: HashSet::new(),
            completions_tx,
            completions_rx,
            generation: 0,
            stats: MultiplexerStats::default(),
        }
    }

    /// Request the listener allocation, sized for `peer_count` remote peers plus ourselves
    ///
    /// The join code arrives as [`RelayNotice::Bound`] from a later [`pump`](Self::pump).
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AlreadyBound`] if a listener exists or is being created.
    pub fn bind(&mut self, peer_count: usize) -> Result<(), RelayError> {
        if !matches!(self.listener, Listener::Unbound) {
            return Err(RelayError::AlreadyBound);
        }
        self.listener = Listener::Binding;

        let capacity = peer_count + 1;
        let service = Arc::clone(&self.service);
        let tx = self.completions_tx.clone();
        let generation = self.generation;
        tracing::info!(capacity, "requesting relay allocation");
        self.runtime.spawn(async move {
            let result = service.create_allocation(capacity).await;
            let _ = tx.send(Completion::Bound { generation, result });
        });
        Ok(())
    }

    /// Join `remote`'s allocation unless a connection is pending or established
    pub fn connect_to(&mut self, remote: &PeerIdentity, join_code: &JoinCode) {
        if remote.client_id() == self.local_id {
            tracing::trace!("not connecting to ourselves");
            return;
        }
        let addr = remote.synthetic_address();
        if self.connections.contains_key(&addr) || !self.pending.insert(addr) {
            tracing::trace!(peer = %remote.client_id(), "relay connection already pending or established");
            return;
        }

        let service = Arc::clone(&self.service);
        let tx = self.completions_tx.clone();
        let generation = self.generation;
        let remote = remote.clone();
        let join_code = join_code.clone();
        tracing::debug!(peer = %remote.client_id(), %join_code, "joining peer allocation");
        self.runtime.spawn(async move {
            let result = service.join_allocation(&join_code).await;
            let _ = tx.send(Completion::Joined {
                generation,
                remote,
                join_code,
                result,
            });
        });
    }

    /// Advance every driver and move packets between the relay and `engine`
    ///
    /// Inbound frames are committed to the engine first; then the engine's
    /// outbound queue is drained and each packet routed by destination.
    /// Packets for peers without a connected channel are dropped; the engine
    /// retransmits on its own.
    ///
    /// # Errors
    ///
    /// Fails only if the engine's outbound queue cannot be read.
    pub fn pump<E>(&mut self, engine: &mut E) -> Result<Vec<RelayNotice>, RelayError>
    where
        E: ConsensusEngine + ?Sized,
    {
        let mut notices = Vec::new();
        self.drain_completions(&mut notices);

        if let Listener::Bound { driver, .. } = &mut self.listener {
            loop {
                match driver.poll_event() {
                    Ok(Some(DriverEvent::Connected(link))) => {
                        tracing::debug!(link, "peer joined our allocation");
                        notices.push(RelayNotice::Accepted(link));
                    }
                    Ok(Some(DriverEvent::Data(_, frame))) => {
                        deliver(engine, &mut self.stats, &frame);
                    }
                    Ok(Some(DriverEvent::Disconnected(link))) => {
                        tracing::debug!(link, "peer left our allocation");
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "relay listener poll failed");
                        break;
                    }
                }
            }
        }

        for conn in self.connections.values_mut() {
            loop {
                match conn.driver.poll_event() {
                    Ok(Some(DriverEvent::Connected(link))) => {
                        if conn.status == ConnectionStatus::Pending {
                            tracing::info!(peer = %conn.remote.client_id(), "relay connection established");
                            conn.link = Some(link);
                            conn.status = ConnectionStatus::Connected;
                            notices.push(RelayNotice::Connected(conn.remote.clone()));
                        }
                    }
                    Ok(Some(DriverEvent::Data(_, frame))) => {
                        deliver(engine, &mut self.stats, &frame);
                    }
                    Ok(Some(DriverEvent::Disconnected(_))) => {
                        if conn.status != ConnectionStatus::Disconnected {
                            tracing::info!(peer = %conn.remote.client_id(), "relay connection lost");
                            conn.status = ConnectionStatus::Disconnected;
                            notices.push(RelayNotice::Disconnected(conn.remote.clone()));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(peer = %conn.remote.client_id(), error = %e, "relay connection poll failed");
                        break;
                    }
                }
            }
        }

        while let Some((to, payload)) = engine.next_outbound_relay_packet()? {
            let Some(conn) = self.connections.get_mut(&to) else {
                self.stats.dropped_unknown += 1;
                tracing::debug!(destination = ?to, "no relay connection for destination, dropping packet");
                continue;
            };
            let (ConnectionStatus::Connected, Some(link)) = (conn.status, conn.link) else {
                self.stats.dropped_unconnected += 1;
                tracing::trace!(peer = %conn.remote.client_id(), status = ?conn.status, "relay connection not ready, dropping packet");
                continue;
            };
            let frame = encode_frame(self.local_id, &payload);
            match conn.driver.send(link, &frame) {
                Ok(()) => self.stats.outbound_sent += 1,
                Err(e) => {
                    self.stats.errors += 1;
                    tracing::warn!(peer = %conn.remote.client_id(), error = %e, "relay send failed");
                }
            }
        }

        Ok(notices)
    }

    fn drain_completions(&mut self, notices: &mut Vec<RelayNotice>) {
        while let Ok(completion) = self.completions_rx.try_recv() {
            match completion {
                Completion::Bound { generation, result } => {
                    if generation != self.generation {
                        if let Ok(mut stale) = result {
                            stale.driver.close();
                        }
                        continue;
                    }
                    match result {
                        Ok(HostAllocation { join_code, driver }) => {
                            tracing::info!(%join_code, "relay allocation ready");
                            notices.push(RelayNotice::Bound(join_code.clone()));
                            self.listener = Listener::Bound { join_code, driver };
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "relay allocation failed");
                            self.listener = Listener::Unbound;
                            notices.push(RelayNotice::BindFailed(e.to_string()));
                        }
                    }
                }
                Completion::Joined {
                    generation,
                    remote,
                    join_code,
                    result,
                } => {
                    if generation != self.generation {
                        if let Ok(mut stale) = result {
                            stale.close();
                        }
                        continue;
                    }
                    let addr = remote.synthetic_address();
                    self.pending.remove(&addr);
                    match result {
                        Ok(driver) => {
                            tracing::debug!(peer = %remote.client_id(), %join_code, "joined peer allocation");
                            self.connections.insert(
                                addr,
                                RelayConnection {
                                    remote,
                                    driver,
                                    link: None,
                                    status: ConnectionStatus::Pending,
                                },
                            );
                        }
                        Err(e) => {
                            tracing::warn!(peer = %remote.client_id(), %join_code, error = %e, "failed to join peer allocation");
                            notices.push(RelayNotice::ConnectFailed {
                                remote,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Close every driver and forget all connections
    ///
    /// Requests still in flight are discarded when they complete.
    pub fn shutdown(&mut self) {
        self.generation += 1;
        if let Listener::Bound { driver, .. } = &mut self.listener {
            driver.close();
        }
        self.listener = Listener::Unbound;
        for conn in self.connections.values_mut() {
            conn.driver.close();
        }
        if !self.connections.is_empty() {
            tracing::info!(count = self.connections.len(), "relay connections closed");
        }
        self.connections.clear();
        self.pending.clear();
    }

    /// Join code of the listener allocation
    #[must_use]
    pub fn join_code(&self) -> Option<&JoinCode> {
        match &self.listener {
            Listener::Bound { join_code, .. } => Some(join_code),
            _ => None,
        }
    }

    /// Whether a listener exists
    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(self.listener, Listener::Bound { .. })
    }

    /// Number of outbound connections, pending joins excluded
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of joins in flight
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Connection to `remote`, if joined
    #[must_use]
    pub fn connection(&self, remote: &PeerIdentity) -> Option<&RelayConnection> {
        self.connections.get(&remote.synthetic_address())
    }

    /// Packet counters
    #[must_use]
    pub fn stats(&self) -> MultiplexerStats {
        self.stats
    }

    /// Local client id written into every frame
    #[must_use]
    pub fn local_id(&self) -> ClientId {
        self.local_id
    }
}

impl<S: RelayService> Drop for RelayMultiplexer<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn deliver<E>(engine: &mut E, stats: &mut MultiplexerStats, frame: &[u8])
where
    E: ConsensusEngine + ?Sized,
{
    let (sender, payload) = match decode_frame(frame) {
        Ok(parts) => parts,
        Err(e) => {
            stats.dropped_malformed += 1;
            tracing::debug!(error = %e, "dropping malformed relay frame");
            return;
        }
    };
    match engine.commit_inbound_relay_packet(payload, SyntheticAddress::from_client_id(sender)) {
        Ok(()) => stats.inbound_delivered += 1,
        Err(e) => {
            stats.errors += 1;
            tracing::warn!(sender = %sender, error = %e, "engine rejected relay packet");
        }
    }
}
