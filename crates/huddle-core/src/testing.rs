//! Test doubles shared by the workspace.
//!
//! Enabled for this crate's own tests and for dependents through the
//! `test-utils` feature.

use crate::address_book::{AddressBook, AddressBookEntry};
use crate::engine::{ConsensusEngine, ConsensusEvent, EngineResultCode};
use crate::error::EngineError;
use crate::identity::{PeerIdentity, RAW_POINT_LEN};
use crate::sockaddr::SyntheticAddress;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::VecDeque;
use std::net::SocketAddr;

/// Deterministic identity for `seed`
#[must_use]
pub fn identity_from_seed(seed: u64) -> PeerIdentity {
    let mut point = [0u8; RAW_POINT_LEN];
    StdRng::seed_from_u64(seed).fill_bytes(&mut point);
    PeerIdentity::from_raw_point(&point)
}

/// Fresh random identity
#[must_use]
pub fn random_identity() -> PeerIdentity {
    let mut point = [0u8; RAW_POINT_LEN];
    rand::thread_rng().fill(&mut point[..]);
    PeerIdentity::from_raw_point(&point)
}

/// Build an event from `creator` carrying `transactions`
#[must_use]
pub fn event(creator: &PeerIdentity, timestamp_nanos: u64, transactions: &[&[u8]]) -> ConsensusEvent {
    ConsensusEvent {
        creator: creator.clone(),
        timestamp_created: timestamp_nanos,
        timestamp_received: timestamp_nanos,
        transactions: transactions.iter().map(|t| t.to_vec()).collect(),
    }
}

/// In-memory engine that records every call
///
/// Events and outbound relay packets are scripted by the test; everything
/// the code under test hands to the engine is kept for inspection.
#[derive(Debug)]
pub struct RecordingEngine {
    identity: PeerIdentity,
    bound: SocketAddr,
    registered: Vec<AddressBookEntry>,
    set_address_book_calls: usize,
    started_with: Option<Vec<AddressBookEntry>>,
    start_calls: usize,
    sent: Vec<Vec<u8>>,
    events: VecDeque<Result<ConsensusEvent, EngineResultCode>>,
    outbound: VecDeque<(SyntheticAddress, Vec<u8>)>,
    inbound: Vec<(SyntheticAddress, Vec<u8>)>,
    fail_start: Option<EngineResultCode>,
    fail_send: Option<EngineResultCode>,
    fail_commit: Option<EngineResultCode>,
}

impl RecordingEngine {
    /// Engine for `identity`, bound to 127.0.0.1:7000
    #[must_use]
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            bound: SocketAddr::from(([127, 0, 0, 1], 7000)),
            registered: Vec::new(),
            set_address_book_calls: 0,
            started_with: None,
            start_calls: 0,
            sent: Vec::new(),
            events: VecDeque::new(),
            outbound: VecDeque::new(),
            inbound: Vec::new(),
            fail_start: None,
            fail_send: None,
            fail_commit: None,
        }
    }

    /// Override the reported bound address
    #[must_use]
    pub fn with_bound_address(mut self, bound: SocketAddr) -> Self {
        self.bound = bound;
        self
    }

    /// Queue an ordered event
    pub fn push_event(&mut self, event: ConsensusEvent) {
        self.events.push_back(Ok(event));
    }

    /// Queue a failing `next_event` call, in order with queued events
    pub fn push_event_failure(&mut self, code: EngineResultCode) {
        self.events.push_back(Err(code));
    }

    /// Queue a packet for the relay path
    pub fn push_outbound(&mut self, to: SyntheticAddress, payload: impl Into<Vec<u8>>) {
        self.outbound.push_back((to, payload.into()));
    }

    /// Make the next `start` fail with `code`
    pub fn fail_next_start(&mut self, code: EngineResultCode) {
        self.fail_start = Some(code);
    }

    /// Make every `send` fail with `code` until cleared with `None`
    pub fn fail_sends(&mut self, code: Option<EngineResultCode>) {
        self.fail_send = code;
    }

    /// Make every inbound commit fail with `code` until cleared with `None`
    pub fn fail_commits(&mut self, code: Option<EngineResultCode>) {
        self.fail_commit = code;
    }

    /// Number of `start` calls, failed ones included
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.start_calls
    }

    /// Number of `set_address_book` calls
    #[must_use]
    pub fn set_address_book_calls(&self) -> usize {
        self.set_address_book_calls
    }

    /// Entries of the successful start
    #[must_use]
    pub fn started_with(&self) -> Option<&[AddressBookEntry]> {
        self.started_with.as_deref()
    }

    /// Every entry registered so far, without duplicates
    #[must_use]
    pub fn registered(&self) -> &[AddressBookEntry] {
        &self.registered
    }

    /// Whether a start succeeded
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started_with.is_some()
    }

    /// Transactions submitted through `send`
    #[must_use]
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Packets committed from the relay path
    #[must_use]
    pub fn inbound(&self) -> &[(SyntheticAddress, Vec<u8>)] {
        &self.inbound
    }

    /// Outbound packets not yet drained
    #[must_use]
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    fn register(&mut self, book: &AddressBook) {
        for entry in book.iter() {
            if !self.registered.contains(entry) {
                self.registered.push(entry.clone());
            }
        }
    }
}

impl ConsensusEngine for RecordingEngine {
    fn local_identity(&self) -> &PeerIdentity {
        &self.identity
    }

    fn bound_address(&self) -> Result<SocketAddr, EngineError> {
        Ok(self.bound)
    }

    fn set_address_book(&mut self, book: &AddressBook) -> Result<(), EngineError> {
        self.set_address_book_calls += 1;
        self.register(book);
        Ok(())
    }

    fn start(&mut self, book: &AddressBook) -> Result<(), EngineError> {
        self.start_calls += 1;
        if let Some(code) = self.fail_start.take() {
            return Err(EngineError::new("tce_start", code));
        }
        if self.started_with.is_some() {
            return Err(EngineError::new("tce_start", EngineResultCode::AlreadyStarted));
        }
        if book.count() == 0 {
            return Err(EngineError::new("tce_start", EngineResultCode::EmptyAddressBook));
        }
        self.register(book);
        self.started_with = Some(book.entries().to_vec());
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        if let Some(code) = self.fail_send {
            return Err(EngineError::new("tce_send", code));
        }
        if self.started_with.is_none() {
            return Err(EngineError::new("tce_send", EngineResultCode::NotStarted));
        }
        self.sent.push(payload.to_vec());
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<ConsensusEvent>, EngineError> {
        match self.events.pop_front() {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(code)) => Err(EngineError::new("tce_event_get", code)),
            None => Ok(None),
        }
    }

    fn next_outbound_relay_packet(
        &mut self,
    ) -> Result<Option<(SyntheticAddress, Vec<u8>)>, EngineError> {
        Ok(self.outbound.pop_front())
    }

    fn commit_inbound_relay_packet(
        &mut self,
        payload: &[u8],
        from: SyntheticAddress,
    ) -> Result<(), EngineError> {
        if let Some(code) = self.fail_commit {
            return Err(EngineError::new("tce_external_receive", code));
        }
        self.inbound.push((from, payload.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_seed_is_deterministic() {
        assert_eq!(identity_from_seed(42), identity_from_seed(42));
        assert_ne!(
            identity_from_seed(1).client_id(),
            identity_from_seed(2).client_id()
        );
    }

    #[test]
    fn test_recording_engine_start_once() {
        let me = identity_from_seed(1);
        let mut engine = RecordingEngine::new(me.clone());
        let mut book = AddressBook::new();
        assert_eq!(
            engine.start(&book).unwrap_err().code,
            EngineResultCode::EmptyAddressBook
        );

        book.add(
            AddressBookEntry::direct(engine.bound_address().unwrap(), me),
            true,
        )
        .unwrap();
        engine.start(&book).unwrap();
        assert_eq!(
            engine.start(&book).unwrap_err().code,
            EngineResultCode::AlreadyStarted
        );
        assert_eq!(engine.start_calls(), 3);
        assert_eq!(engine.started_with().map(<[_]>::len), Some(1));
    }

    #[test]
    fn test_recording_engine_send_requires_start() {
        let mut engine = RecordingEngine::new(identity_from_seed(1));
        assert_eq!(
            engine.send(b"x").unwrap_err().code,
            EngineResultCode::NotStarted
        );
    }
}
