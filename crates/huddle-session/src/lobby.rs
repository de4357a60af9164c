//! Lobby exchange of address book entries.
//!
//! Every player publishes its own entry under [`ADDRESS_BOOK_ENTRY_KEY`]; the
//! host additionally publishes the relay node's entry under [`RELAY_KEY`] in
//! lobby-wide data. Peers poll the whole lobby and merge what they find.

use crate::error::LobbyError;
use async_trait::async_trait;
use huddle_core::AddressBookEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Player data key holding a serialized [`AddressBookEntry`]
pub const ADDRESS_BOOK_ENTRY_KEY: &str = "AddressBookEntry";

/// Lobby data key holding the relay node's serialized entry
pub const RELAY_KEY: &str = "TashiRelay";

/// Where a value is published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataScope {
    /// Per-player data
    Player,
    /// Lobby-wide data
    Lobby,
}

/// One lobby member and its published data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerData {
    /// Lobby player id
    pub id: String,
    /// Published key/value pairs
    #[serde(default)]
    pub data: HashMap<String, String>,
}

/// Point-in-time view of a lobby
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    /// Player id of the lobby host
    pub host_id: Option<String>,
    /// Lobby-wide key/value pairs
    #[serde(default)]
    pub data: HashMap<String, String>,
    /// Members in join order
    #[serde(default)]
    pub players: Vec<PlayerData>,
}

/// Matchmaking lobby used as the rendezvous for address book entries
#[async_trait]
pub trait Lobby: Send + Sync {
    /// Publish `value` under `key`
    ///
    /// `player` names the publishing member; lobby-scope writes are only
    /// accepted from the host.
    async fn push(
        &self,
        player: &str,
        scope: DataScope,
        key: &str,
        value: String,
    ) -> Result<(), LobbyError>;

    /// Current state of the lobby
    async fn snapshot(&self) -> Result<LobbySnapshot, LobbyError>;
}

/// Session details received from the other players
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingSessionDetails {
    /// Relay node allocated by the host, if any
    pub relay: Option<AddressBookEntry>,
    /// Entries of every other player that published one
    pub address_book: Vec<AddressBookEntry>,
    /// Entry of the lobby host, also present in `address_book`
    pub host: Option<AddressBookEntry>,
}

impl IncomingSessionDetails {
    /// Collect session details from `snapshot`, skipping `local_player`
    ///
    /// Malformed entries are logged and skipped.
    #[must_use]
    pub fn from_snapshot(snapshot: &LobbySnapshot, local_player: &str) -> Self {
        let mut details = Self::default();

        if let Some(text) = snapshot.data.get(RELAY_KEY) {
            match AddressBookEntry::from_json(text) {
                Ok(entry) => details.relay = Some(entry.into_relay()),
                Err(e) => tracing::warn!(error = %e, "ignoring malformed relay entry"),
            }
        }

        for player in &snapshot.players {
            if player.id == local_player {
                continue;
            }
            let Some(text) = player.data.get(ADDRESS_BOOK_ENTRY_KEY) else {
                tracing::debug!(player = %player.id, "player has not published an entry yet");
                continue;
            };
            let entry = match AddressBookEntry::from_json(text) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(player = %player.id, error = %e, "ignoring malformed address book entry");
                    continue;
                }
            };
            tracing::trace!(player = %player.id, ?entry, "received address book entry");
            if snapshot.host_id.as_deref() == Some(player.id.as_str()) {
                details.host = Some(entry.clone());
            }
            details.address_book.push(entry);
        }

        details
    }
}

/// Session details the local player shares with the lobby
#[derive(Debug, Clone, Default)]
pub struct OutgoingSessionDetails {
    /// Relay node entry, published by the host only
    pub relay: Option<AddressBookEntry>,
    /// Local entry
    pub address_book_entry: Option<AddressBookEntry>,
    last_player_hash: Option<u64>,
    last_lobby_hash: Option<u64>,
}

impl OutgoingSessionDetails {
    /// Serialized local entry if it changed since the last call
    ///
    /// # Errors
    ///
    /// Fails if the entry cannot be serialized.
    pub fn player_update(&mut self) -> Result<Option<String>, LobbyError> {
        changed(self.address_book_entry.as_ref(), &mut self.last_player_hash)
    }

    /// Serialized relay entry if it changed since the last call
    ///
    /// # Errors
    ///
    /// Fails if the entry cannot be serialized.
    pub fn lobby_update(&mut self) -> Result<Option<String>, LobbyError> {
        changed(self.relay.as_ref(), &mut self.last_lobby_hash)
    }

    /// Push every changed value to `lobby` as `player`
    ///
    /// Returns whether anything was published.
    ///
    /// # Errors
    ///
    /// Fails if serialization or the lobby push fails. A failed push is
    /// retried by the next call.
    pub async fn publish(&mut self, lobby: &dyn Lobby, player: &str) -> Result<bool, LobbyError> {
        let mut published = false;

        if let Some(value) = self.player_update()? {
            tracing::debug!(%player, %value, "publishing address book entry");
            if let Err(e) = lobby
                .push(player, DataScope::Player, ADDRESS_BOOK_ENTRY_KEY, value)
                .await
            {
                self.last_player_hash = None;
                return Err(e);
            }
            published = true;
        }

        if let Some(value) = self.lobby_update()? {
            tracing::debug!(%player, %value, "publishing relay entry");
            if let Err(e) = lobby.push(player, DataScope::Lobby, RELAY_KEY, value).await {
                self.last_lobby_hash = None;
                return Err(e);
            }
            published = true;
        }

        Ok(published)
    }
}

fn changed(
    entry: Option<&AddressBookEntry>,
    last: &mut Option<u64>,
) -> Result<Option<String>, LobbyError> {
    let Some(entry) = entry else {
        return Ok(None);
    };
    let value = entry.to_json()?;
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    let hash = hasher.finish();

    if *last == Some(hash) {
        return Ok(None);
    }
    *last = Some(hash);
    Ok(Some(value))
}

/// In-process lobby
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryLobby {
    state: Arc<RwLock<LobbySnapshot>>,
}

impl MemoryLobby {
    /// Lobby hosted by `host_id`
    #[must_use]
    pub fn new(host_id: &str) -> Self {
        let snapshot = LobbySnapshot {
            host_id: Some(host_id.to_string()),
            data: HashMap::new(),
            players: vec![PlayerData {
                id: host_id.to_string(),
                data: HashMap::new(),
            }],
        };
        Self {
            state: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Add `player_id` to the lobby; joining twice is a no-op
    pub async fn join(&self, player_id: &str) {
        let mut state = self.state.write().await;
        if state.players.iter().any(|p| p.id == player_id) {
            return;
        }
        state.players.push(PlayerData {
            id: player_id.to_string(),
            data: HashMap::new(),
        });
    }

    /// Remove `player_id` and its data
    pub async fn leave(&self, player_id: &str) {
        self.state.write().await.players.retain(|p| p.id != player_id);
    }
}

#[async_trait]
impl Lobby for MemoryLobby {
    async fn push(
        &self,
        player: &str,
        scope: DataScope,
        key: &str,
        value: String,
    ) -> Result<(), LobbyError> {
        let mut state = self.state.write().await;
        match scope {
            DataScope::Player => {
                let member = state
                    .players
                    .iter_mut()
                    .find(|p| p.id == player)
                    .ok_or_else(|| LobbyError::UnknownPlayer(player.to_string()))?;
                member.data.insert(key.to_string(), value);
            }
            DataScope::Lobby => {
                if state.host_id.as_deref() != Some(player) {
                    return Err(LobbyError::UnknownPlayer(player.to_string()));
                }
                state.data.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<LobbySnapshot, LobbyError> {
        Ok(self.state.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::JoinCode;
    use huddle_core::testing::identity_from_seed;

    fn direct(seed: u64, port: u16) -> AddressBookEntry {
        AddressBookEntry::direct(
            ([10, 0, 0, seed as u8], port).into(),
            identity_from_seed(seed),
        )
    }

    #[tokio::test]
    async fn test_incoming_skips_local_and_marks_host() {
        let lobby = MemoryLobby::new("host");
        lobby.join("alice").await;
        lobby.join("bob").await;

        let host = direct(1, 4000);
        let alice = direct(2, 4001);
        let bob = direct(3, 4002);
        for (player, entry) in [("host", &host), ("alice", &alice), ("bob", &bob)] {
            lobby
                .push(player, DataScope::Player, ADDRESS_BOOK_ENTRY_KEY, entry.to_json().unwrap())
                .await
                .unwrap();
        }

        let snapshot = lobby.snapshot().await.unwrap();
        let details = IncomingSessionDetails::from_snapshot(&snapshot, "alice");

        assert_eq!(details.address_book, vec![host.clone(), bob]);
        assert_eq!(details.host, Some(host));
        assert_eq!(details.relay, None);
    }

    #[test]
    fn test_incoming_skips_malformed_entries() {
        let good = direct(2, 4001);
        let snapshot = LobbySnapshot {
            host_id: Some("host".into()),
            data: HashMap::from([(RELAY_KEY.to_string(), "not json".to_string())]),
            players: vec![
                PlayerData {
                    id: "host".into(),
                    data: HashMap::from([(
                        ADDRESS_BOOK_ENTRY_KEY.to_string(),
                        "{\"kind\":\"carrier_pigeon\"}".to_string(),
                    )]),
                },
                PlayerData {
                    id: "alice".into(),
                    data: HashMap::from([(
                        ADDRESS_BOOK_ENTRY_KEY.to_string(),
                        good.to_json().unwrap(),
                    )]),
                },
                PlayerData {
                    id: "late".into(),
                    data: HashMap::new(),
                },
            ],
        };

        let details = IncomingSessionDetails::from_snapshot(&snapshot, "me");
        assert_eq!(details.address_book, vec![good]);
        assert_eq!(details.host, None);
        assert_eq!(details.relay, None);
    }

    #[test]
    fn test_incoming_relay_is_flagged() {
        let relay = direct(9, 5000);
        let snapshot = LobbySnapshot {
            host_id: None,
            data: HashMap::from([(RELAY_KEY.to_string(), relay.to_json().unwrap())]),
            players: Vec::new(),
        };
        let details = IncomingSessionDetails::from_snapshot(&snapshot, "me");
        let received = details.relay.unwrap();
        assert!(received.is_relay());
        assert_eq!(received.identity(), relay.identity());
    }

    #[test]
    fn test_snapshot_from_json() {
        let text = r#"{"host_id":"h","players":[{"id":"h"}]}"#;
        let snapshot: LobbySnapshot = serde_json::from_str(text).unwrap();
        assert_eq!(snapshot.host_id.as_deref(), Some("h"));
        assert!(snapshot.data.is_empty());
        assert_eq!(snapshot.players.len(), 1);
    }

    #[test]
    fn test_outgoing_reports_changes_only() {
        let mut outgoing = OutgoingSessionDetails::default();
        assert_eq!(outgoing.player_update().unwrap(), None);

        outgoing.address_book_entry = Some(direct(1, 4000));
        assert!(outgoing.player_update().unwrap().is_some());
        assert_eq!(outgoing.player_update().unwrap(), None);

        outgoing.address_book_entry = Some(direct(1, 4001));
        assert!(outgoing.player_update().unwrap().is_some());

        outgoing.relay = Some(
            AddressBookEntry::external(JoinCode::new("ABC123"), identity_from_seed(7)).into_relay(),
        );
        assert!(outgoing.lobby_update().unwrap().is_some());
        assert_eq!(outgoing.lobby_update().unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_to_memory_lobby() {
        let lobby = MemoryLobby::new("host");
        let mut outgoing = OutgoingSessionDetails {
            address_book_entry: Some(direct(1, 4000)),
            relay: Some(direct(9, 5000).into_relay()),
            ..Default::default()
        };

        assert!(outgoing.publish(&lobby, "host").await.unwrap());
        assert!(!outgoing.publish(&lobby, "host").await.unwrap());

        let snapshot = lobby.snapshot().await.unwrap();
        assert!(snapshot.data.contains_key(RELAY_KEY));
        assert!(snapshot.players[0].data.contains_key(ADDRESS_BOOK_ENTRY_KEY));
    }

    #[tokio::test]
    async fn test_publish_failure_is_retried() {
        let lobby = MemoryLobby::new("host");
        let mut outgoing = OutgoingSessionDetails {
            address_book_entry: Some(direct(2, 4001)),
            ..Default::default()
        };

        let err = outgoing.publish(&lobby, "stranger").await.unwrap_err();
        assert!(matches!(err, LobbyError::UnknownPlayer(_)));

        lobby.join("stranger").await;
        assert!(outgoing.publish(&lobby, "stranger").await.unwrap());
    }

    #[tokio::test]
    async fn test_lobby_scope_requires_host() {
        let lobby = MemoryLobby::new("host");
        lobby.join("guest").await;
        let result = lobby
            .push("guest", DataScope::Lobby, RELAY_KEY, "x".into())
            .await;
        assert!(matches!(result, Err(LobbyError::UnknownPlayer(_))));

        lobby.leave("guest").await;
        assert_eq!(lobby.snapshot().await.unwrap().players.len(), 1);
    }
}
