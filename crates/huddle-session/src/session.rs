//! Session bootstrap state machine.
//!
//! ```text
//!              start_session
//!  NotStarted ───────────────► Starting ──── quorum + engine start ───► InProgress
//!      ▲                          │
//!      └──── any setup failure ───┘
//! ```
//!
//! While `Starting` the session may be waiting on a relay node: the host
//! requests one through its [`RelayAllocator`], a follower waits for the
//! host's relay entry to show up in the lobby. The allocation runs on the
//! runtime and posts its result to a queue drained by [`Session::tick`].

use crate::allocator::RelayAllocator;
use crate::context::SessionContext;
use crate::error::{AllocationError, SessionError};
use crate::lobby::IncomingSessionDetails;
use huddle_core::{
    AddressBook, AddressBookEntry, AddressBookError, ConsensusEngine, GREETING, PeerIdentity,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which side of the session the local peer is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Created the lobby; allocates the relay node
    Host,
    /// Joined an existing lobby
    Follower,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Idle, `start_session` may be called
    #[default]
    NotStarted,
    /// Collecting entries or waiting on a relay node
    Starting,
    /// Engine running
    InProgress,
}

type SuccessCallback = Box<dyn FnOnce() + Send>;
type FailureCallback = Box<dyn FnOnce(SessionError) + Send>;

struct Callbacks {
    on_success: SuccessCallback,
    on_failure: FailureCallback,
}

struct AllocationCompletion {
    generation: u64,
    result: Result<AddressBookEntry, AllocationError>,
}

/// Drives one peer from lobby discovery to a running engine
pub struct Session {
    role: Role,
    state: SessionState,
    book: AddressBook,
    relay_entry: Option<AddressBookEntry>,
    allocator: Option<Arc<dyn RelayAllocator>>,
    allocation_in_flight: bool,
    generation: u64,
    completions_tx: mpsc::UnboundedSender<AllocationCompletion>,
    completions_rx: mpsc::UnboundedReceiver<AllocationCompletion>,
    callbacks: Option<Callbacks>,
}

impl Session {
    /// Idle session for `role`
    #[must_use]
    pub fn new(role: Role) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            role,
            state: SessionState::NotStarted,
            book: AddressBook::new(),
            relay_entry: None,
            allocator: None,
            allocation_in_flight: false,
            generation: 0,
            completions_tx,
            completions_rx,
            callbacks: None,
        }
    }

    /// Use `allocator` for relay nodes
    #[must_use]
    pub fn with_allocator(mut self, allocator: Arc<dyn RelayAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Local role
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Entries known so far
    #[must_use]
    pub fn book(&self) -> &AddressBook {
        &self.book
    }

    /// Identity marked as host
    #[must_use]
    pub fn host(&self) -> Option<&PeerIdentity> {
        self.book.host()
    }

    /// Relay node entry, once allocated or received
    #[must_use]
    pub fn relay_entry(&self) -> Option<&AddressBookEntry> {
        self.relay_entry.as_ref()
    }

    /// Whether a relay allocation request is outstanding
    #[must_use]
    pub fn is_allocation_in_flight(&self) -> bool {
        self.allocation_in_flight
    }

    /// Begin or continue session setup
    ///
    /// Entries from `details` are merged, then setup advances as far as it
    /// can. Calling again while `Starting` is safe: entries are deduplicated,
    /// at most one relay allocation is outstanding and the callbacks of the
    /// first call are kept. Exactly one of the callbacks runs, once setup
    /// either reaches `InProgress` or fails back to `NotStarted`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] if the session is already in progress.
    /// Setup failures are reported through `on_failure`, not returned.
    pub fn start_session<E, S, F>(
        &mut self,
        ctx: &mut SessionContext<E>,
        details: &IncomingSessionDetails,
        on_success: S,
        on_failure: F,
    ) -> Result<(), SessionError>
    where
        E: ConsensusEngine,
        S: FnOnce() + Send + 'static,
        F: FnOnce(SessionError) + Send + 'static,
    {
        match self.state {
            SessionState::InProgress => return Err(SessionError::InvalidState(self.state)),
            SessionState::NotStarted => {
                tracing::info!(role = ?self.role, "starting session");
                self.state = SessionState::Starting;
                self.callbacks = Some(Callbacks {
                    on_success: Box::new(on_success),
                    on_failure: Box::new(on_failure),
                });
            }
            SessionState::Starting => tracing::trace!("start_session re-entered while starting"),
        }

        let total = ctx.config().total_nodes();
        let host = details.host.iter().map(|entry| (entry, true));
        let others = details.address_book.iter().map(|entry| (entry, false));
        for (entry, is_host) in host.chain(others) {
            if let Err(e) = self.merge(entry.clone(), is_host, total) {
                self.fail(e.into());
                return Ok(());
            }
        }
        if let Some(relay) = &details.relay {
            self.offer_relay_entry(relay.clone());
        }

        self.advance(ctx);
        Ok(())
    }

    /// Merge one entry from the lobby feed or the local transport
    ///
    /// Returns whether the entry was new. Setup is not advanced until the
    /// next [`tick`](Self::tick).
    ///
    /// # Errors
    ///
    /// Duplicate hosts and client id collisions are returned and, while
    /// `Starting`, also fail the session. Additions after the session started
    /// return [`AddressBookError::Frozen`].
    pub fn add_entry<E: ConsensusEngine>(
        &mut self,
        ctx: &SessionContext<E>,
        entry: AddressBookEntry,
        is_host: bool,
    ) -> Result<bool, SessionError> {
        match self.merge(entry, is_host, ctx.config().total_nodes()) {
            Ok(added) => Ok(added),
            Err(AddressBookError::Frozen) => Err(AddressBookError::Frozen.into()),
            Err(e) => {
                let err = SessionError::from(e);
                if self.state == SessionState::Starting {
                    self.fail(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Provide the relay node entry the host published
    ///
    /// Only the first offer is kept.
    pub fn offer_relay_entry(&mut self, entry: AddressBookEntry) {
        if self.relay_entry.is_some() {
            return;
        }
        tracing::debug!(relay = %entry.identity().client_id(), "relay entry available");
        self.relay_entry = Some(entry.into_relay());
    }

    /// Apply finished relay allocations and advance setup
    ///
    /// Called once per host tick.
    pub fn tick<E: ConsensusEngine>(&mut self, ctx: &mut SessionContext<E>) -> SessionState {
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.on_allocation(completion);
        }
        self.advance(ctx);
        self.state
    }

    /// Back to `NotStarted` with an empty book
    ///
    /// Outstanding allocations are ignored when they complete and no callback runs.
    pub fn shutdown(&mut self) {
        tracing::debug!(state = ?self.state, "session shutdown");
        self.state = SessionState::NotStarted;
        self.book.clear();
        self.relay_entry = None;
        self.allocation_in_flight = false;
        self.generation += 1;
        self.callbacks = None;
        while self.completions_rx.try_recv().is_ok() {}
    }

    fn merge(
        &mut self,
        entry: AddressBookEntry,
        is_host: bool,
        total: usize,
    ) -> Result<bool, AddressBookError> {
        match self.book.add(entry, is_host) {
            Ok(true) => {
                tracing::info!("discovered {} of {}", self.book.count(), total);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(AddressBookError::UnboundPort(address)) => {
                tracing::warn!(%address, "skipping direct entry without a bound port");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn on_allocation(&mut self, completion: AllocationCompletion) {
        if completion.generation != self.generation || !self.allocation_in_flight {
            tracing::trace!("ignoring stale relay allocation");
            return;
        }
        self.allocation_in_flight = false;

        match completion.result {
            Ok(entry) => {
                tracing::info!(relay = %entry.identity().client_id(), "relay node allocated");
                self.relay_entry = Some(entry.into_relay());
            }
            Err(e) => {
                tracing::warn!(error = %e, "relay allocation failed");
                self.fail(SessionError::RelayAllocationFailed(e.0));
            }
        }
    }

    fn advance<E: ConsensusEngine>(&mut self, ctx: &mut SessionContext<E>) {
        if self.state != SessionState::Starting {
            return;
        }
        let total = ctx.config().total_nodes();

        if ctx.config().network_mode.requires_relay_allocation() && self.relay_entry.is_none() {
            match self.role {
                Role::Host => self.request_allocation(ctx),
                Role::Follower => tracing::debug!("waiting for the host's relay entry"),
            }
            return;
        }

        if let Some(relay) = self.relay_entry.clone() {
            if let Err(e) = self.merge(relay, false, total) {
                self.fail(e.into());
                return;
            }
        }

        if !self.book.is_quorum_reached(total) {
            tracing::trace!(known = self.book.count(), total, "waiting for quorum");
            return;
        }

        self.commit(ctx);
    }

    fn request_allocation<E: ConsensusEngine>(&mut self, ctx: &mut SessionContext<E>) {
        if self.allocation_in_flight {
            return;
        }
        let Some(allocator) = self.allocator.clone() else {
            self.fail(SessionError::MissingAllocator);
            return;
        };

        // The relay is allocated against the members the engine already knows
        if let Err(e) = ctx.engine_mut().set_address_book(&self.book) {
            self.fail(e.into());
            return;
        }

        self.allocation_in_flight = true;
        let members = self.book.entries().to_vec();
        let tx = self.completions_tx.clone();
        let generation = self.generation;
        tracing::info!(members = members.len(), "requesting relay node");
        ctx.runtime().spawn(async move {
            let result = allocator.allocate(members).await;
            let _ = tx.send(AllocationCompletion { generation, result });
        });
    }

    fn commit<E: ConsensusEngine>(&mut self, ctx: &mut SessionContext<E>) {
        if let Err(e) = ctx.engine_mut().start(&self.book) {
            self.fail(e.into());
            return;
        }

        self.book.freeze();
        self.state = SessionState::InProgress;
        tracing::info!(members = self.book.count(), role = ?self.role, "session in progress");

        if let Err(e) = ctx.engine_mut().send(GREETING) {
            tracing::warn!(error = %e, "failed to send greeting");
        }
        if let Some(callbacks) = self.callbacks.take() {
            (callbacks.on_success)();
        }
    }

    fn fail(&mut self, err: SessionError) {
        tracing::warn!(error = %err, retryable = err.is_retryable(), "session setup failed");
        self.state = SessionState::NotStarted;
        self.allocation_in_flight = false;
        self.generation += 1;
        if let Some(callbacks) = self.callbacks.take() {
            (callbacks.on_failure)(err);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("entries", &self.book.count())
            .field("relay_entry", &self.relay_entry)
            .field("allocation_in_flight", &self.allocation_in_flight)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use huddle_core::testing::{RecordingEngine, identity_from_seed};
    use huddle_core::{EngineResultCode, NetworkMode, TransportConfig};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Handle;

    type Outcome = Result<(), SessionError>;

    #[derive(Clone, Default)]
    struct Outcomes(Arc<Mutex<Vec<Outcome>>>);

    impl Outcomes {
        fn on_success(&self) -> impl FnOnce() + Send + 'static {
            let outcomes = Arc::clone(&self.0);
            move || outcomes.lock().unwrap().push(Ok(()))
        }

        fn on_failure(&self) -> impl FnOnce(SessionError) + Send + 'static {
            let outcomes = Arc::clone(&self.0);
            move |e| outcomes.lock().unwrap().push(Err(e))
        }

        fn take(&self) -> Vec<Outcome> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    /// Fails the first `failures` requests, then hands out `entry`
    struct FlakyAllocator {
        failures: AtomicUsize,
        calls: AtomicUsize,
        entry: AddressBookEntry,
    }

    impl FlakyAllocator {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
                entry: direct(99, 9000),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RelayAllocator for FlakyAllocator {
        async fn allocate(
            &self,
            _members: Vec<AddressBookEntry>,
        ) -> Result<AddressBookEntry, AllocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                Err(AllocationError("no capacity".into()))
            } else {
                Ok(self.entry.clone())
            }
        }
    }

    fn direct(seed: u64, port: u16) -> AddressBookEntry {
        AddressBookEntry::direct(
            ([10, 0, 0, seed as u8], port).into(),
            identity_from_seed(seed),
        )
    }

    fn context(total: u16, mode: NetworkMode) -> SessionContext<RecordingEngine> {
        let config = TransportConfig {
            total_nodes: total,
            network_mode: mode,
            ..TransportConfig::default()
        };
        SessionContext::new(
            RecordingEngine::new(identity_from_seed(1)),
            config,
            Handle::current(),
        )
    }

    async fn settle(session: &mut Session, ctx: &mut SessionContext<RecordingEngine>) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        session.tick(ctx);
    }

    #[tokio::test]
    async fn test_host_without_relay_starts_immediately() {
        let mut ctx = context(1, NetworkMode::Local);
        let mut session = Session::new(Role::Host);
        let outcomes = Outcomes::default();

        session.add_entry(&ctx, direct(1, 4000), true).unwrap();
        session
            .start_session(
                &mut ctx,
                &IncomingSessionDetails::default(),
                outcomes.on_success(),
                outcomes.on_failure(),
            )
            .unwrap();

        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(ctx.engine().start_calls(), 1);
        assert_eq!(ctx.engine().sent(), &[GREETING.to_vec()]);
        assert_eq!(outcomes.take(), vec![Ok(())]);
        assert!(session.book().is_frozen());
    }

    #[tokio::test]
    async fn test_start_twice_in_progress_is_rejected() {
        let mut ctx = context(1, NetworkMode::Local);
        let mut session = Session::new(Role::Host);
        session.add_entry(&ctx, direct(1, 4000), true).unwrap();
        let details = IncomingSessionDetails::default();
        session.start_session(&mut ctx, &details, || {}, |_| {}).unwrap();

        let err = session
            .start_session(&mut ctx, &details, || {}, |_| {})
            .unwrap_err();
        assert_eq!(err, SessionError::InvalidState(SessionState::InProgress));
        assert_eq!(ctx.engine().start_calls(), 1);
    }

    #[tokio::test]
    async fn test_waits_for_quorum() {
        let mut ctx = context(3, NetworkMode::Local);
        let mut session = Session::new(Role::Follower);
        let outcomes = Outcomes::default();
        let details = IncomingSessionDetails {
            address_book: vec![direct(2, 4001)],
            host: Some(direct(2, 4001)),
            relay: None,
        };

        session.add_entry(&ctx, direct(1, 4000), false).unwrap();
        session
            .start_session(&mut ctx, &details, outcomes.on_success(), outcomes.on_failure())
            .unwrap();
        assert_eq!(session.state(), SessionState::Starting);
        assert_eq!(session.host(), Some(details.host.as_ref().unwrap().identity()));

        session.add_entry(&ctx, direct(3, 4002), false).unwrap();
        assert_eq!(session.tick(&mut ctx), SessionState::InProgress);
        assert_eq!(ctx.engine().started_with().unwrap().len(), 3);
        assert_eq!(outcomes.take(), vec![Ok(())]);
    }

    #[tokio::test]
    async fn test_allocation_failure_reverts_then_retry_succeeds() {
        let mut ctx = context(2, NetworkMode::NodeRelay);
        let allocator = FlakyAllocator::new(1);
        let mut session = Session::new(Role::Host).with_allocator(allocator.clone());
        let outcomes = Outcomes::default();
        let details = IncomingSessionDetails::default();

        session.add_entry(&ctx, direct(1, 4000), true).unwrap();
        session
            .start_session(&mut ctx, &details, outcomes.on_success(), outcomes.on_failure())
            .unwrap();
        assert_eq!(session.state(), SessionState::Starting);
        assert!(session.is_allocation_in_flight());
        assert_eq!(ctx.engine().set_address_book_calls(), 1);

        settle(&mut session, &mut ctx).await;
        assert_eq!(session.state(), SessionState::NotStarted);
        let failures = outcomes.take();
        assert_eq!(failures.len(), 1);
        let err = failures[0].clone().unwrap_err();
        assert!(matches!(err, SessionError::RelayAllocationFailed(_)));
        assert!(err.is_retryable());
        assert_eq!(ctx.engine().start_calls(), 0);

        session
            .start_session(&mut ctx, &details, outcomes.on_success(), outcomes.on_failure())
            .unwrap();
        settle(&mut session, &mut ctx).await;

        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(allocator.calls(), 2);
        assert_eq!(ctx.engine().start_calls(), 1);
        let started = ctx.engine().started_with().unwrap();
        assert_eq!(started.len(), 2);
        assert!(started[1].is_relay());
        assert_eq!(outcomes.take(), vec![Ok(())]);
    }

    #[tokio::test]
    async fn test_reentry_issues_one_allocation_and_keeps_first_callbacks() {
        let mut ctx = context(2, NetworkMode::NodeRelay);
        let allocator = FlakyAllocator::new(0);
        let mut session = Session::new(Role::Host).with_allocator(allocator.clone());
        let first = Outcomes::default();
        let second = Outcomes::default();
        let details = IncomingSessionDetails::default();

        session.add_entry(&ctx, direct(1, 4000), true).unwrap();
        session
            .start_session(&mut ctx, &details, first.on_success(), first.on_failure())
            .unwrap();
        session
            .start_session(&mut ctx, &details, second.on_success(), second.on_failure())
            .unwrap();
        settle(&mut session, &mut ctx).await;

        assert_eq!(allocator.calls(), 1);
        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(first.take(), vec![Ok(())]);
        assert!(second.take().is_empty());
    }

    #[tokio::test]
    async fn test_follower_waits_for_relay_entry() {
        let mut ctx = context(3, NetworkMode::NodeRelay);
        let mut session = Session::new(Role::Follower);
        let outcomes = Outcomes::default();
        let host = direct(2, 4001);
        let mut details = IncomingSessionDetails {
            address_book: vec![host.clone()],
            host: Some(host),
            relay: None,
        };

        session.add_entry(&ctx, direct(1, 4000), false).unwrap();
        for _ in 0..3 {
            session
                .start_session(&mut ctx, &details, outcomes.on_success(), outcomes.on_failure())
                .unwrap();
            assert_eq!(session.state(), SessionState::Starting);
        }
        assert_eq!(ctx.engine().start_calls(), 0);
        assert_eq!(session.book().count(), 2);

        details.relay = Some(direct(99, 9000).into_relay());
        session
            .start_session(&mut ctx, &details, outcomes.on_success(), outcomes.on_failure())
            .unwrap();

        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(session.book().count(), 3);
        assert!(session.book().relay_entry().is_some());
        assert_eq!(outcomes.take(), vec![Ok(())]);
    }

    #[tokio::test]
    async fn test_duplicate_host_fails_once() {
        let mut ctx = context(3, NetworkMode::Local);
        let mut session = Session::new(Role::Host);
        let outcomes = Outcomes::default();

        session.add_entry(&ctx, direct(1, 4000), true).unwrap();
        let details = IncomingSessionDetails {
            address_book: vec![direct(2, 4001)],
            host: Some(direct(2, 4001)),
            relay: None,
        };
        session
            .start_session(&mut ctx, &details, outcomes.on_success(), outcomes.on_failure())
            .unwrap();

        assert_eq!(session.state(), SessionState::NotStarted);
        let outcomes = outcomes.take();
        assert_eq!(outcomes.len(), 1);
        let err = outcomes[0].clone().unwrap_err();
        assert!(matches!(
            err,
            SessionError::AddressBook(AddressBookError::DuplicateHost { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_engine_start_failure_is_retryable() {
        let mut ctx = context(1, NetworkMode::Local);
        ctx.engine_mut()
            .fail_next_start(EngineResultCode::BindListenerError);
        let mut session = Session::new(Role::Host);
        let outcomes = Outcomes::default();
        let details = IncomingSessionDetails::default();

        session.add_entry(&ctx, direct(1, 4000), true).unwrap();
        session
            .start_session(&mut ctx, &details, outcomes.on_success(), outcomes.on_failure())
            .unwrap();
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(!session.book().is_frozen());
        let failures = outcomes.take();
        assert!(matches!(&failures[0], Err(SessionError::Engine(e)) if e.code == EngineResultCode::BindListenerError));

        session
            .start_session(&mut ctx, &details, outcomes.on_success(), outcomes.on_failure())
            .unwrap();
        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(ctx.engine().start_calls(), 2);
    }

    #[tokio::test]
    async fn test_greeting_failure_does_not_fail_session() {
        let mut ctx = context(1, NetworkMode::Local);
        ctx.engine_mut().fail_sends(Some(EngineResultCode::SendError));
        let mut session = Session::new(Role::Host);
        let outcomes = Outcomes::default();

        session.add_entry(&ctx, direct(1, 4000), true).unwrap();
        session
            .start_session(
                &mut ctx,
                &IncomingSessionDetails::default(),
                outcomes.on_success(),
                outcomes.on_failure(),
            )
            .unwrap();

        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(outcomes.take(), vec![Ok(())]);
    }

    #[tokio::test]
    async fn test_missing_allocator() {
        let mut ctx = context(2, NetworkMode::NodeRelay);
        let mut session = Session::new(Role::Host);
        let outcomes = Outcomes::default();

        session.add_entry(&ctx, direct(1, 4000), true).unwrap();
        session
            .start_session(
                &mut ctx,
                &IncomingSessionDetails::default(),
                outcomes.on_success(),
                outcomes.on_failure(),
            )
            .unwrap();

        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(outcomes.take(), vec![Err(SessionError::MissingAllocator)]);
    }

    #[tokio::test]
    async fn test_shutdown_ignores_late_allocation() {
        let mut ctx = context(2, NetworkMode::NodeRelay);
        let mut session = Session::new(Role::Host).with_allocator(FlakyAllocator::new(0));
        let outcomes = Outcomes::default();

        session.add_entry(&ctx, direct(1, 4000), true).unwrap();
        session
            .start_session(
                &mut ctx,
                &IncomingSessionDetails::default(),
                outcomes.on_success(),
                outcomes.on_failure(),
            )
            .unwrap();
        session.shutdown();
        settle(&mut session, &mut ctx).await;

        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(session.relay_entry(), None);
        assert_eq!(session.book().count(), 0);
        assert!(outcomes.take().is_empty());
    }

    #[tokio::test]
    async fn test_unbound_entries_are_skipped() {
        let mut ctx = context(1, NetworkMode::Local);
        let mut session = Session::new(Role::Follower);
        let unbound = AddressBookEntry::direct(([10, 0, 0, 5], 0).into(), identity_from_seed(5));

        assert!(!session.add_entry(&ctx, unbound, false).unwrap());
        assert_eq!(session.book().count(), 0);
        session.add_entry(&ctx, direct(1, 4000), false).unwrap();
        assert_eq!(session.tick(&mut ctx), SessionState::NotStarted);
    }
}
