//! Relay server: hands out allocations and forwards datagrams inside them.

use super::protocol::{AllocationId, RelayErrorCode, RelayMessage};
use crate::error::RelayError;
use crate::service::{HOST_LINK, LinkId};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

/// Characters used in join codes, without look-alikes
const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Join code length
const JOIN_CODE_LEN: usize = 6;

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Maximum number of live allocations
    pub max_allocations: usize,
    /// Allocation expires after this long without traffic
    pub allocation_timeout: Duration,
    /// Cleanup interval
    pub cleanup_interval: Duration,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            max_allocations: 1_000,
            allocation_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
struct Allocation {
    join_code: String,
    host: SocketAddr,
    members: HashMap<LinkId, SocketAddr>,
    capacity: usize,
    next_link: LinkId,
    last_seen: Instant,
}

impl Allocation {
    fn is_full(&self) -> bool {
        self.members.len() + 1 >= self.capacity
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    fn is_alive(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() < timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Host,
    Member(LinkId),
}

#[derive(Debug, Default)]
struct State {
    allocations: HashMap<AllocationId, Allocation>,
    by_code: HashMap<String, AllocationId>,
    by_addr: HashMap<SocketAddr, (AllocationId, Role)>,
    next_id: AllocationId,
}

impl State {
    fn remove_allocation(&mut self, id: AllocationId) -> Option<Allocation> {
        let alloc = self.allocations.remove(&id)?;
        self.by_code.remove(&alloc.join_code);
        self.by_addr.remove(&alloc.host);
        for addr in alloc.members.values() {
            self.by_addr.remove(addr);
        }
        Some(alloc)
    }
}

/// Reference relay server
pub struct UdpRelayServer {
    socket: Arc<UdpSocket>,
    state: Arc<RwLock<State>>,
    config: RelayServerConfig,
}

impl UdpRelayServer {
    /// Bind a relay server with default configuration
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, RelayError> {
        Self::bind_with_config(bind_addr, RelayServerConfig::default()).await
    }

    /// Bind a relay server
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn bind_with_config(
        bind_addr: SocketAddr,
        config: RelayServerConfig,
    ) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            state: Arc::new(RwLock::new(State::default())),
            config,
        })
    }

    /// Address the server is listening on
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve until the task is dropped
    ///
    /// # Errors
    ///
    /// Never returns under normal operation; receive errors are logged.
    pub async fn run(&self) -> Result<(), RelayError> {
        tracing::info!(addr = ?self.socket.local_addr().ok(), "relay server listening");
        self.spawn_cleanup_task();

        let mut buf = vec![0u8; super::MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => match RelayMessage::from_bytes(&buf[..len]) {
                    Ok(msg) => self.handle_message(msg, from).await,
                    Err(e) => {
                        tracing::debug!(%from, error = %e, "undecodable relay datagram");
                        self.send_error(from, RelayErrorCode::InvalidMessage, "invalid message")
                            .await;
                    }
                },
                Err(e) => {
                    // ICMP unreachable from a vanished client surfaces here on some platforms
                    tracing::debug!(error = %e, "relay receive error");
                }
            }
        }
    }

    async fn handle_message(&self, msg: RelayMessage, from: SocketAddr) {
        tracing::trace!(%from, kind = msg.message_type(), "relay message");
        match msg {
            RelayMessage::Allocate { capacity } => self.handle_allocate(capacity, from).await,
            RelayMessage::Join { join_code } => self.handle_join(&join_code, from).await,
            RelayMessage::SendTo { link, payload } => self.handle_send(link, payload, from).await,
            RelayMessage::Leave => self.handle_leave(from).await,
            RelayMessage::Keepalive => {
                let mut state = self.state.write().await;
                if let Some((id, _)) = state.by_addr.get(&from).copied() {
                    if let Some(alloc) = state.allocations.get_mut(&id) {
                        alloc.touch();
                    }
                }
            }
            _ => {
                // Server-to-client messages are ignored
            }
        }
    }

    async fn handle_allocate(&self, capacity: u16, from: SocketAddr) {
        let mut state = self.state.write().await;

        if state.by_addr.contains_key(&from) {
            drop(state);
            self.send_error(from, RelayErrorCode::InvalidMessage, "address already in an allocation")
                .await;
            return;
        }
        if state.allocations.len() >= self.config.max_allocations {
            drop(state);
            self.send_error(from, RelayErrorCode::ServerFull, "server at capacity")
                .await;
            return;
        }

        let join_code = loop {
            let code = generate_join_code();
            if !state.by_code.contains_key(&code) {
                break code;
            }
        };
        let id = state.next_id;
        state.next_id += 1;
        state.allocations.insert(
            id,
            Allocation {
                join_code: join_code.clone(),
                host: from,
                members: HashMap::new(),
                capacity: usize::from(capacity.max(1)),
                next_link: HOST_LINK + 1,
                last_seen: Instant::now(),
            },
        );
        state.by_code.insert(join_code.clone(), id);
        state.by_addr.insert(from, (id, Role::Host));
        drop(state);

        tracing::info!(%from, allocation = id, capacity, %join_code, "allocation created");
        self.send(
            from,
            &RelayMessage::Allocated {
                allocation_id: id,
                join_code,
            },
        )
        .await;
    }

    async fn handle_join(&self, join_code: &str, from: SocketAddr) {
        let mut state = self.state.write().await;

        let Some(id) = state.by_code.get(join_code).copied() else {
            drop(state);
            self.send_error(from, RelayErrorCode::UnknownJoinCode, "unknown join code")
                .await;
            return;
        };
        if state.by_addr.contains_key(&from) {
            drop(state);
            self.send_error(from, RelayErrorCode::InvalidMessage, "address already in an allocation")
                .await;
            return;
        }
        let Some(alloc) = state.allocations.get_mut(&id) else {
            return;
        };
        if alloc.is_full() {
            drop(state);
            self.send_error(from, RelayErrorCode::AllocationFull, "allocation full")
                .await;
            return;
        }

        let link = alloc.next_link;
        alloc.next_link += 1;
        alloc.members.insert(link, from);
        alloc.touch();
        let host = alloc.host;
        state.by_addr.insert(from, (id, Role::Member(link)));
        drop(state);

        tracing::debug!(%from, allocation = id, link, "peer joined allocation");
        self.send(
            from,
            &RelayMessage::Joined {
                allocation_id: id,
                link,
            },
        )
        .await;
        self.send(host, &RelayMessage::PeerJoined { link }).await;
    }

    async fn handle_send(&self, link: LinkId, payload: Vec<u8>, from: SocketAddr) {
        let mut state = self.state.write().await;

        let Some((id, role)) = state.by_addr.get(&from).copied() else {
            drop(state);
            self.send_error(from, RelayErrorCode::NotRegistered, "not registered")
                .await;
            return;
        };
        let Some(alloc) = state.allocations.get_mut(&id) else {
            return;
        };
        alloc.touch();

        let route = match role {
            Role::Host => alloc.members.get(&link).map(|addr| (*addr, HOST_LINK)),
            Role::Member(own) if link == HOST_LINK => Some((alloc.host, own)),
            Role::Member(_) => None,
        };
        drop(state);

        match route {
            Some((dest, source_link)) => {
                self.send(
                    dest,
                    &RelayMessage::Deliver {
                        link: source_link,
                        payload,
                    },
                )
                .await;
            }
            None => {
                self.send_error(from, RelayErrorCode::UnknownLink, "unknown link")
                    .await;
            }
        }
    }

    async fn handle_leave(&self, from: SocketAddr) {
        let mut state = self.state.write().await;
        let Some((id, role)) = state.by_addr.get(&from).copied() else {
            return;
        };

        let notify: Vec<(SocketAddr, LinkId)> = match role {
            Role::Host => state
                .remove_allocation(id)
                .map(|alloc| alloc.members.into_values().map(|a| (a, HOST_LINK)).collect())
                .unwrap_or_default(),
            Role::Member(link) => {
                state.by_addr.remove(&from);
                match state.allocations.get_mut(&id) {
                    Some(alloc) => {
                        alloc.members.remove(&link);
                        vec![(alloc.host, link)]
                    }
                    None => Vec::new(),
                }
            }
        };
        drop(state);

        tracing::debug!(%from, allocation = id, ?role, "participant left");
        for (addr, link) in notify {
            self.send(addr, &RelayMessage::PeerLeft { link }).await;
        }
    }

    async fn send(&self, addr: SocketAddr, msg: &RelayMessage) {
        match msg.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, addr).await {
                    tracing::debug!(%addr, error = %e, "relay send failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode relay message"),
        }
    }

    async fn send_error(&self, addr: SocketAddr, code: RelayErrorCode, message: &str) {
        self.send(
            addr,
            &RelayMessage::Error {
                code,
                message: message.to_string(),
            },
        )
        .await;
    }

    /// Spawn cleanup task to remove idle allocations
    fn spawn_cleanup_task(&self) {
        let state = Arc::clone(&self.state);
        let socket = Arc::clone(&self.socket);
        let timeout = self.config.allocation_timeout;
        let interval = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                let expired: Vec<Allocation> = {
                    let mut guard = state.write().await;
                    let ids: Vec<AllocationId> = guard
                        .allocations
                        .iter()
                        .filter(|(_, a)| !a.is_alive(timeout))
                        .map(|(id, _)| *id)
                        .collect();
                    ids.into_iter()
                        .filter_map(|id| guard.remove_allocation(id))
                        .collect()
                };

                for alloc in expired {
                    tracing::info!(join_code = %alloc.join_code, "allocation expired");
                    let mut targets: Vec<SocketAddr> = alloc.members.into_values().collect();
                    targets.push(alloc.host);
                    if let Ok(bytes) = (RelayMessage::PeerLeft { link: HOST_LINK }).to_bytes() {
                        for addr in targets {
                            let _ = socket.send_to(&bytes, addr).await;
                        }
                    }
                }
            }
        });
    }

    /// Number of live allocations
    pub async fn allocation_count(&self) -> usize {
        self.state.read().await.allocations.len()
    }
}

fn generate_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| char::from(JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())]))
        .collect()
}
