//! # Huddle Session
//!
//! Session bootstrap for small peer groups that meet in a matchmaking lobby.
//!
//! This crate provides:
//! - Lobby exchange of address book entries ([`lobby`])
//! - The [`Session`] state machine from first entry to a running engine
//! - [`EventTranslator`], turning ordered engine events into connect/data events
//! - [`PeerTransport`], the facade an embedding game loop drives once per tick
//!
//! ## Example
//!
//! ```ignore
//! let ctx = SessionContext::new(engine, config, runtime.handle().clone());
//! let mut transport = PeerTransport::<_, UdpRelayService>::new(ctx);
//! transport.start_host()?;
//! loop {
//!     transport.publish(&lobby, "me").await?;
//!     let details = IncomingSessionDetails::from_snapshot(&lobby.snapshot().await?, "me");
//!     transport.start_session(&details, || {}, |e| eprintln!("{e}"))?;
//!     for event in transport.poll()? {
//!         // hand to the game
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod context;
pub mod error;
pub mod lobby;
pub mod logging;
pub mod session;
pub mod transport;
pub mod translator;

pub use allocator::{RelayAllocator, StaticRelayAllocator};
pub use context::SessionContext;
pub use error::{AllocationError, LobbyError, SessionError, TransportError};
pub use lobby::{
    ADDRESS_BOOK_ENTRY_KEY, DataScope, IncomingSessionDetails, Lobby, LobbySnapshot, MemoryLobby,
    OutgoingSessionDetails, PlayerData, RELAY_KEY,
};
pub use logging::init_logging;
pub use session::{Role, Session, SessionState};
pub use translator::{EventTranslator, TransportClock, TransportEvent};
pub use transport::PeerTransport;
