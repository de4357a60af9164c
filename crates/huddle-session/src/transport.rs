//! Peer transport facade.
//!
//! [`PeerTransport`] owns the [`SessionContext`] and wires the pieces
//! together for an embedding game loop:
//!
//! 1. `start_host` / `start_client` derive the local address book entry
//! 2. the local entry is published to the lobby, lobby snapshots are applied
//! 3. `start_session` drives setup; `poll` advances it every tick
//! 4. once in progress, `poll` yields [`TransportEvent`]s and `send` submits payloads

use crate::allocator::RelayAllocator;
use crate::context::SessionContext;
use crate::error::{SessionError, TransportError};
use crate::lobby::{IncomingSessionDetails, Lobby, OutgoingSessionDetails};
use crate::session::{Role, Session, SessionState};
use crate::translator::{EventTranslator, TransportClock, TransportEvent};
use huddle_core::{
    AddressBookEntry, AddressBookError, CLIENT_ID_PREFIX_LEN, ClientId, ConsensusEngine,
};
use huddle_relay::{RelayMultiplexer, RelayNotice, RelayService};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Wait before the first listener rebind; doubles per failure
const REBIND_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on the listener rebind delay
const REBIND_MAX_DELAY: Duration = Duration::from_secs(30);

struct Running<S: RelayService> {
    session: Session,
    translator: EventTranslator,
    multiplexer: Option<RelayMultiplexer<S>>,
    local_entry: Option<AddressBookEntry>,
    outgoing: OutgoingSessionDetails,
    rebind_at: Option<Instant>,
    rebind_delay: Duration,
}

impl<S: RelayService> Running<S> {
    fn adopt_local_entry<E: ConsensusEngine>(
        &mut self,
        ctx: &SessionContext<E>,
        entry: AddressBookEntry,
    ) -> Result<(), TransportError> {
        let is_host = self.session.role() == Role::Host;
        self.session.add_entry(ctx, entry.clone(), is_host)?;
        self.outgoing.address_book_entry = Some(entry.clone());
        self.local_entry = Some(entry);
        Ok(())
    }

    fn on_notice<E: ConsensusEngine>(
        &mut self,
        ctx: &SessionContext<E>,
        notice: RelayNotice,
    ) -> Result<(), TransportError> {
        match notice {
            RelayNotice::Bound(join_code) => {
                tracing::info!(%join_code, "relay listener bound");
                self.rebind_at = None;
                self.rebind_delay = REBIND_INITIAL_DELAY;
                let identity = ctx.engine().local_identity().clone();
                self.adopt_local_entry(ctx, AddressBookEntry::external(join_code, identity))?;
            }
            RelayNotice::BindFailed(reason) => {
                tracing::warn!(%reason, retry_in = ?self.rebind_delay, "relay listener allocation failed");
                self.rebind_at = Some(Instant::now() + self.rebind_delay);
                self.rebind_delay = (self.rebind_delay * 2).min(REBIND_MAX_DELAY);
            }
            RelayNotice::ConnectFailed { remote, reason } => {
                tracing::warn!(peer = %remote.client_id(), %reason, "relay connection failed");
            }
            other => tracing::debug!(notice = ?other, "relay notice"),
        }
        Ok(())
    }

    fn retry_bind<E: ConsensusEngine>(&mut self, ctx: &SessionContext<E>) -> Result<(), TransportError> {
        let (Some(at), Some(mux)) = (self.rebind_at, self.multiplexer.as_mut()) else {
            return Ok(());
        };
        if Instant::now() < at {
            return Ok(());
        }
        self.rebind_at = None;
        tracing::debug!("retrying relay listener allocation");
        mux.bind(ctx.config().total_nodes().saturating_sub(1))?;
        Ok(())
    }

    fn connect_external(&mut self, entry: &AddressBookEntry) {
        if let (Some(mux), Some(join_code)) = (self.multiplexer.as_mut(), entry.join_code()) {
            mux.connect_to(entry.identity(), join_code);
        }
    }
}

/// Session transport for one local peer
pub struct PeerTransport<E: ConsensusEngine, S: RelayService> {
    ctx: SessionContext<E>,
    relay_service: Option<Arc<S>>,
    allocator: Option<Arc<dyn RelayAllocator>>,
    running: Option<Running<S>>,
}

impl<E: ConsensusEngine, S: RelayService> PeerTransport<E, S> {
    /// Transport driving the engine in `ctx`
    pub fn new(ctx: SessionContext<E>) -> Self {
        Self {
            ctx,
            relay_service: None,
            allocator: None,
            running: None,
        }
    }

    /// Relay service for `external_relay` mode
    #[must_use]
    pub fn with_relay_service(mut self, service: Arc<S>) -> Self {
        self.relay_service = Some(service);
        self
    }

    /// Relay node allocator for `node_relay` mode
    #[must_use]
    pub fn with_relay_allocator(mut self, allocator: Arc<dyn RelayAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Start as the session host
    ///
    /// # Errors
    ///
    /// See [`start_client`](Self::start_client).
    pub fn start_host(&mut self) -> Result<(), TransportError> {
        self.start(Role::Host)
    }

    /// Start as a follower
    ///
    /// # Errors
    ///
    /// Fails if already started, if the engine's bound address is unavailable,
    /// or if `external_relay` mode has no relay service.
    pub fn start_client(&mut self) -> Result<(), TransportError> {
        self.start(Role::Follower)
    }

    fn start(&mut self, role: Role) -> Result<(), TransportError> {
        if self.running.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        let identity = self.ctx.engine().local_identity().clone();
        tracing::info!(client = %identity.client_id(), ?role, "starting transport");

        let mut session = Session::new(role);
        if let Some(allocator) = &self.allocator {
            session = session.with_allocator(Arc::clone(allocator));
        }
        let mut running = Running {
            session,
            translator: EventTranslator::new(&identity, role, TransportClock::new()),
            multiplexer: None,
            local_entry: None,
            outgoing: OutgoingSessionDetails::default(),
            rebind_at: None,
            rebind_delay: REBIND_INITIAL_DELAY,
        };

        if self.ctx.config().network_mode.uses_multiplexer() {
            let service = self
                .relay_service
                .clone()
                .ok_or(TransportError::MissingRelayService)?;
            let mut mux =
                RelayMultiplexer::new(service, identity.client_id(), self.ctx.runtime().clone());
            mux.bind(self.ctx.config().total_nodes().saturating_sub(1))?;
            running.multiplexer = Some(mux);
        } else {
            let bound = self.ctx.engine().bound_address()?;
            tracing::info!(%bound, "listening");
            running.adopt_local_entry(&self.ctx, AddressBookEntry::direct(bound, identity))?;
        }

        self.running = Some(running);
        Ok(())
    }

    /// Advance setup and collect transport events
    ///
    /// Pumps the relay multiplexer, applies finished relay requests, and once
    /// the session is in progress drains every pending engine event. A failed
    /// listener allocation is retried here after a doubling delay.
    ///
    /// # Errors
    ///
    /// Fails if the transport is not started or an engine call fails.
    pub fn poll(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
        let running = self.running.as_mut().ok_or(TransportError::NotStarted)?;
        let ctx = &mut self.ctx;

        if let Some(mux) = running.multiplexer.as_mut() {
            let notices = mux.pump(ctx.engine_mut())?;
            for notice in notices {
                running.on_notice(ctx, notice)?;
            }
            running.retry_bind(ctx)?;
        }

        running.session.tick(ctx);
        if running.session.role() == Role::Host {
            if let Some(relay) = running.session.relay_entry() {
                running.outgoing.relay = Some(relay.clone());
            }
        }
        running.translator.set_host(running.session.host().cloned());

        if running.session.state() != SessionState::InProgress {
            return Ok(Vec::new());
        }
        Ok(running.translator.poll(ctx.engine_mut())?)
    }

    /// Merge entries received from the lobby
    ///
    /// Relayed peers are dialed as soon as their entry is known. Entries that
    /// arrive after the session started are ignored.
    ///
    /// # Errors
    ///
    /// Fails if the transport is not started or an entry breaks the session
    /// (duplicate host, client id collision).
    pub fn apply_lobby(&mut self, details: &IncomingSessionDetails) -> Result<(), TransportError> {
        let running = self.running.as_mut().ok_or(TransportError::NotStarted)?;

        let host = details.host.iter().map(|entry| (entry, true));
        let others = details.address_book.iter().map(|entry| (entry, false));
        for (entry, is_host) in host.chain(others) {
            match running.session.add_entry(&self.ctx, entry.clone(), is_host) {
                Ok(_) => running.connect_external(entry),
                Err(SessionError::AddressBook(AddressBookError::Frozen)) => {
                    tracing::debug!(peer = %entry.identity().client_id(), "session membership fixed, ignoring entry");
                }
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(relay) = &details.relay {
            running.session.offer_relay_entry(relay.clone());
        }
        Ok(())
    }

    /// Begin or continue session setup
    ///
    /// See [`Session::start_session`].
    ///
    /// # Errors
    ///
    /// Fails if the transport is not started or the session is already in progress.
    pub fn start_session<F, G>(
        &mut self,
        details: &IncomingSessionDetails,
        on_success: F,
        on_failure: G,
    ) -> Result<(), TransportError>
    where
        F: FnOnce() + Send + 'static,
        G: FnOnce(SessionError) + Send + 'static,
    {
        let running = self.running.as_mut().ok_or(TransportError::NotStarted)?;
        for entry in details.host.iter().chain(&details.address_book) {
            running.connect_external(entry);
        }
        running
            .session
            .start_session(&mut self.ctx, details, on_success, on_failure)?;
        Ok(())
    }

    /// Send `payload` to `client_id` (0 is the host)
    ///
    /// # Errors
    ///
    /// Fails unless the session is in progress, or if the engine rejects the payload.
    pub fn send(&mut self, client_id: ClientId, payload: &[u8]) -> Result<(), TransportError> {
        let running = self.running.as_ref().ok_or(TransportError::NotStarted)?;
        if running.session.state() != SessionState::InProgress {
            return Err(TransportError::SessionNotInProgress);
        }

        let mut tx = Vec::with_capacity(CLIENT_ID_PREFIX_LEN + payload.len());
        tx.extend_from_slice(&client_id.to_be_bytes());
        tx.extend_from_slice(payload);
        self.ctx.engine_mut().send(&tx)?;
        tracing::trace!(to = %client_id, len = payload.len(), "sent payload");
        Ok(())
    }

    /// Publish changed session details to `lobby` as `player`
    ///
    /// Returns whether anything was published.
    ///
    /// # Errors
    ///
    /// Fails if the transport is not started or the lobby push fails.
    pub async fn publish(&mut self, lobby: &dyn Lobby, player: &str) -> Result<bool, TransportError> {
        let running = self.running.as_mut().ok_or(TransportError::NotStarted)?;
        Ok(running.outgoing.publish(lobby, player).await?)
    }

    /// Tear down the session, relay connections and peer sightings
    pub fn shutdown(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        tracing::info!(state = ?running.session.state(), "transport shutdown");
        running.session.shutdown();
        if let Some(mux) = running.multiplexer.as_mut() {
            mux.shutdown();
        }
        running.translator.reset();
    }

    /// Local role, once started
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.running.as_ref().map(|r| r.session.role())
    }

    /// Session state; `NotStarted` before the transport starts
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.running
            .as_ref()
            .map_or(SessionState::NotStarted, |r| r.session.state())
    }

    /// Local address book entry, once known
    #[must_use]
    pub fn local_entry(&self) -> Option<&AddressBookEntry> {
        self.running.as_ref().and_then(|r| r.local_entry.as_ref())
    }

    /// Session, once started
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.running.as_ref().map(|r| &r.session)
    }

    /// Relay multiplexer in `external_relay` mode
    #[must_use]
    pub fn multiplexer(&self) -> Option<&RelayMultiplexer<S>> {
        self.running.as_ref().and_then(|r| r.multiplexer.as_ref())
    }

    /// Session context
    pub fn context(&self) -> &SessionContext<E> {
        &self.ctx
    }

    /// Consensus engine
    pub fn engine(&self) -> &E {
        self.ctx.engine()
    }

    /// Consensus engine, mutably
    pub fn engine_mut(&mut self) -> &mut E {
        self.ctx.engine_mut()
    }
}

impl<E: ConsensusEngine, S: RelayService> std::fmt::Debug for PeerTransport<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerTransport")
            .field("ctx", &self.ctx)
            .field("session", &self.session())
            .field("local_entry", &self.local_entry())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::StaticRelayAllocator;
    use crate::lobby::{MemoryLobby, RELAY_KEY};
    use huddle_core::testing::{RecordingEngine, event, identity_from_seed};
    use huddle_core::{GREETING, NetworkMode, TransportConfig};
    use async_trait::async_trait;
    use huddle_core::JoinCode;
    use huddle_relay::{HostAllocation, RelayDriver, RelayError, UdpRelayService};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Handle;

    type Transport = PeerTransport<RecordingEngine, UdpRelayService>;

    fn transport(seed: u64, port: u16, total: u16, mode: NetworkMode) -> Transport {
        let config = TransportConfig {
            total_nodes: total,
            network_mode: mode,
            ..TransportConfig::default()
        };
        let engine = RecordingEngine::new(identity_from_seed(seed))
            .with_bound_address(([127, 0, 0, 1], port).into());
        PeerTransport::new(SessionContext::new(engine, config, Handle::current()))
    }

    #[derive(Default)]
    struct UnavailableRelay {
        creates: AtomicUsize,
    }

    #[async_trait]
    impl RelayService for UnavailableRelay {
        async fn create_allocation(&self, _capacity: usize) -> Result<HostAllocation, RelayError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::AllocationFailed("relay full".to_string()))
        }

        async fn join_allocation(
            &self,
            _join_code: &JoinCode,
        ) -> Result<Box<dyn RelayDriver>, RelayError> {
            Err(RelayError::AllocationFailed("relay full".to_string()))
        }
    }

    async fn settle<S: RelayService>(peer: &mut PeerTransport<RecordingEngine, S>) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        peer.poll().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_rebind_backs_off() {
        let relay = Arc::new(UnavailableRelay::default());
        let config = TransportConfig {
            total_nodes: 2,
            network_mode: NetworkMode::ExternalRelay,
            ..TransportConfig::default()
        };
        let engine = RecordingEngine::new(identity_from_seed(1));
        let mut peer = PeerTransport::new(SessionContext::new(engine, config, Handle::current()))
            .with_relay_service(Arc::clone(&relay));
        let creates = || relay.creates.load(Ordering::SeqCst);

        peer.start_client().unwrap();
        settle(&mut peer).await;
        assert_eq!(creates(), 1);

        // no retry while the delay runs
        for _ in 0..5 {
            settle(&mut peer).await;
        }
        assert_eq!(creates(), 1);

        tokio::time::advance(REBIND_INITIAL_DELAY).await;
        settle(&mut peer).await;
        settle(&mut peer).await;
        assert_eq!(creates(), 2);

        // second failure doubles the delay
        tokio::time::advance(REBIND_INITIAL_DELAY).await;
        settle(&mut peer).await;
        settle(&mut peer).await;
        assert_eq!(creates(), 2);

        tokio::time::advance(REBIND_INITIAL_DELAY).await;
        settle(&mut peer).await;
        settle(&mut peer).await;
        assert_eq!(creates(), 3);
        assert!(peer.local_entry().is_none());
    }

    #[tokio::test]
    async fn test_host_local_entry_and_session() {
        let mut host = transport(1, 7001, 1, NetworkMode::Local);
        assert!(matches!(host.poll(), Err(TransportError::NotStarted)));

        host.start_host().unwrap();
        let entry = host.local_entry().unwrap().clone();
        assert_eq!(entry.socket_addr(), Some(([127, 0, 0, 1], 7001).into()));
        assert_eq!(host.session().unwrap().host(), Some(entry.identity()));
        assert!(matches!(
            host.send(ClientId(5), b"early"),
            Err(TransportError::SessionNotInProgress)
        ));

        host.start_session(&IncomingSessionDetails::default(), || {}, |_| {})
            .unwrap();
        assert_eq!(host.state(), SessionState::InProgress);

        host.send(ClientId(5), b"hello").unwrap();
        let mut expected = 5u64.to_be_bytes().to_vec();
        expected.extend_from_slice(b"hello");
        assert_eq!(host.engine().sent(), &[GREETING.to_vec(), expected]);
    }

    #[tokio::test]
    async fn test_start_twice_and_restart_after_shutdown() {
        let mut peer = transport(2, 7002, 2, NetworkMode::Local);
        peer.start_client().unwrap();
        assert!(matches!(peer.start_client(), Err(TransportError::AlreadyStarted)));

        peer.shutdown();
        assert_eq!(peer.state(), SessionState::NotStarted);
        assert_eq!(peer.role(), None);
        peer.start_host().unwrap();
        assert_eq!(peer.role(), Some(Role::Host));
    }

    #[tokio::test]
    async fn test_external_relay_requires_service() {
        let mut peer = transport(3, 7003, 2, NetworkMode::ExternalRelay);
        assert!(matches!(
            peer.start_client(),
            Err(TransportError::MissingRelayService)
        ));
    }

    #[tokio::test]
    async fn test_poll_translates_after_start() {
        let mut host = transport(1, 7001, 2, NetworkMode::Local);
        let peer = identity_from_seed(2);
        host.start_host().unwrap();
        host.start_session(&IncomingSessionDetails::default(), || {}, |_| {})
            .unwrap();
        assert_eq!(host.state(), SessionState::Starting);

        let mut tx = ClientId::HOST.to_be_bytes().to_vec();
        tx.extend_from_slice(b"input");
        host.engine_mut()
            .push_event(event(&peer, 0, &[GREETING, tx.as_slice()]));
        assert!(host.poll().unwrap().is_empty());

        host.apply_lobby(&IncomingSessionDetails {
            address_book: vec![AddressBookEntry::direct(
                ([127, 0, 0, 1], 7002).into(),
                peer.clone(),
            )],
            ..IncomingSessionDetails::default()
        })
        .unwrap();
        let events = host.poll().unwrap();
        assert_eq!(host.state(), SessionState::InProgress);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TransportEvent::Connect { client_id, .. } if client_id == peer.client_id()));
        assert!(matches!(&events[1], TransportEvent::Data { payload, .. } if payload == b"input"));
    }

    #[tokio::test]
    async fn test_entries_after_start_are_ignored() {
        let mut host = transport(1, 7001, 1, NetworkMode::Local);
        host.start_host().unwrap();
        host.start_session(&IncomingSessionDetails::default(), || {}, |_| {})
            .unwrap();

        let late = AddressBookEntry::direct(([127, 0, 0, 1], 7009).into(), identity_from_seed(9));
        host.apply_lobby(&IncomingSessionDetails {
            address_book: vec![late],
            ..IncomingSessionDetails::default()
        })
        .unwrap();
        assert_eq!(host.session().unwrap().book().count(), 1);
    }

    #[tokio::test]
    async fn test_host_publishes_allocated_relay() {
        let relay = AddressBookEntry::direct(([10, 0, 0, 99], 9000).into(), identity_from_seed(99));
        let mut host = transport(1, 7001, 2, NetworkMode::NodeRelay)
            .with_relay_allocator(Arc::new(StaticRelayAllocator::new(relay.clone())));
        let lobby = MemoryLobby::new("host");

        host.start_host().unwrap();
        host.start_session(&IncomingSessionDetails::default(), || {}, |_| {})
            .unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        host.poll().unwrap();
        assert_eq!(host.state(), SessionState::InProgress);

        assert!(host.publish(&lobby, "host").await.unwrap());
        let snapshot = lobby.snapshot().await.unwrap();
        let published = AddressBookEntry::from_json(&snapshot.data[RELAY_KEY]).unwrap();
        assert_eq!(published, relay.into_relay());
    }
}
