//! Translation of ordered engine events into transport events.
//!
//! The engine reports every event of every member. The transport layer
//! above only wants to hear about peers it talks to and about payloads
//! addressed to it:
//!
//! - events created by the local peer are dropped
//! - the first event of a remote peer yields one `Connect`; a follower only
//!   connects to the host
//! - the greeting transaction is dropped
//! - every other transaction starts with the recipient's 8-byte big-endian
//!   client id; the host keeps payloads for id 0, a follower keeps payloads
//!   for its own id

use crate::session::Role;
use huddle_core::{
    CLIENT_ID_PREFIX_LEN, ClientId, ConsensusEngine, ConsensusEvent, EngineError, GREETING,
    PeerIdentity,
};
use std::collections::HashSet;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Event surfaced to the transport layer
///
/// Receive times are seconds on the transport's [`TransportClock`], whose
/// origin is the moment the transport started (not process start). Compare
/// them with [`TransportClock::now`] from the same transport only.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// First contact with a peer
    Connect {
        /// Peer as seen by the transport; 0 is the host
        client_id: ClientId,
        /// Seconds on the [`TransportClock`]
        receive_time: f64,
    },
    /// Payload addressed to the local peer
    Data {
        /// Sender as seen by the transport; 0 is the host
        client_id: ClientId,
        /// Payload with the recipient prefix removed
        payload: Vec<u8>,
        /// Seconds on the [`TransportClock`]
        receive_time: f64,
    },
}

/// Maps engine timestamps onto seconds since the transport started
///
/// [`TransportClock::new`] pins the origin to the wall clock at creation,
/// which [`PeerTransport`](crate::PeerTransport) does when it starts.
#[derive(Debug, Clone, Copy)]
pub struct TransportClock {
    started: Instant,
    unix_at_start: f64,
}

impl TransportClock {
    /// Clock starting now
    #[must_use]
    pub fn new() -> Self {
        let started = Instant::now();
        let unix_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            started,
            unix_at_start: unix_now,
        }
    }

    /// Clock whose origin is `unix_secs` after the epoch
    #[must_use]
    pub fn with_unix_origin(unix_secs: f64) -> Self {
        Self {
            started: Instant::now(),
            unix_at_start: unix_secs,
        }
    }

    /// Seconds since the clock started
    #[must_use]
    pub fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Convert an engine timestamp (unix nanoseconds)
    #[must_use]
    pub fn to_transport_time(&self, unix_nanos: u64) -> f64 {
        unix_nanos as f64 / 1e9 - self.unix_at_start
    }
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns engine events into [`TransportEvent`]s
#[derive(Debug)]
pub struct EventTranslator {
    local: ClientId,
    role: Role,
    host: Option<PeerIdentity>,
    seen: HashSet<PeerIdentity>,
    pending: Vec<TransportEvent>,
    clock: TransportClock,
}

impl EventTranslator {
    /// Translator for the peer identified by `local`
    #[must_use]
    pub fn new(local: &PeerIdentity, role: Role, clock: TransportClock) -> Self {
        Self {
            local: local.client_id(),
            role,
            host: None,
            seen: HashSet::new(),
            pending: Vec::new(),
            clock,
        }
    }

    /// Set the session host a follower connects to
    pub fn set_host(&mut self, host: Option<PeerIdentity>) {
        self.host = host;
    }

    /// Clock used for receive times
    #[must_use]
    pub fn clock(&self) -> &TransportClock {
        &self.clock
    }

    /// Drain `engine` until its event queue is empty
    ///
    /// # Errors
    ///
    /// Returns the first engine failure. Events translated before it are
    /// kept and returned ahead of new ones by the next successful poll.
    pub fn poll<E: ConsensusEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Vec<TransportEvent>, EngineError> {
        loop {
            match engine.next_event() {
                Ok(Some(event)) => {
                    let mut out = std::mem::take(&mut self.pending);
                    self.translate_into(&event, &mut out);
                    self.pending = out;
                }
                Ok(None) => return Ok(std::mem::take(&mut self.pending)),
                Err(e) => {
                    tracing::warn!(error = %e, held = self.pending.len(), "engine event poll failed");
                    return Err(e);
                }
            }
        }
    }

    /// Events translated by a poll that later failed
    #[must_use]
    pub fn pending(&self) -> &[TransportEvent] {
        &self.pending
    }

    /// Translate one event
    #[must_use]
    pub fn translate(&mut self, event: &ConsensusEvent) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        self.translate_into(event, &mut out);
        out
    }

    /// Forget every peer seen so far and drop held events
    pub fn reset(&mut self) {
        self.seen.clear();
        self.pending.clear();
    }

    fn translate_into(&mut self, event: &ConsensusEvent, out: &mut Vec<TransportEvent>) {
        let creator_id = event.creator.client_id();
        if creator_id == self.local {
            tracing::trace!("ignoring event created by us");
            return;
        }

        let receive_time = self.clock.to_transport_time(event.timestamp_received);

        if self.seen.insert(event.creator.clone()) {
            match self.role {
                Role::Host => {
                    tracing::info!(client = %creator_id, "first sighting of client");
                    out.push(TransportEvent::Connect {
                        client_id: creator_id,
                        receive_time,
                    });
                }
                Role::Follower if self.host.as_ref() == Some(&event.creator) => {
                    tracing::info!(host = %creator_id, "first sighting of host");
                    out.push(TransportEvent::Connect {
                        client_id: ClientId::HOST,
                        receive_time,
                    });
                }
                Role::Follower => tracing::info!(peer = %creator_id, "first sighting of peer"),
            }
        }

        for tx in &event.transactions {
            if tx.as_slice() == GREETING {
                tracing::trace!(from = %creator_id, "ignoring greeting");
                continue;
            }
            let Some((prefix, payload)) = tx.split_first_chunk::<CLIENT_ID_PREFIX_LEN>() else {
                tracing::warn!(from = %creator_id, len = tx.len(), "transaction too short for a recipient id");
                continue;
            };
            let recipient = ClientId::from_be_bytes(*prefix);

            let client_id = match self.role {
                Role::Host if recipient == ClientId::HOST => creator_id,
                Role::Follower if recipient == self.local => ClientId::HOST,
                _ => {
                    tracing::trace!(from = %creator_id, to = %recipient, "ignoring payload for another peer");
                    continue;
                }
            };

            tracing::trace!(from = %creator_id, len = payload.len(), "received payload");
            out.push(TransportEvent::Data {
                client_id,
                payload: payload.to_vec(),
                receive_time,
            });
        }
    }
}
