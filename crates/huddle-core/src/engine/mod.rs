//! Boundary to the consensus engine.
//!
//! The engine orders messages between the members of an address book. This
//! crate never implements ordering itself; it only drives an engine through
//! the [`ConsensusEngine`] trait, which is implemented by the native binding
//! (`native` feature) and by the recording engine used in tests.

mod event;
#[cfg(feature = "native")]
pub mod native;

pub use event::{ConsensusEvent, unpack_transactions};

use crate::address_book::AddressBook;
use crate::error::EngineError;
use crate::identity::PeerIdentity;
use crate::sockaddr::SyntheticAddress;
use std::net::SocketAddr;

/// Result codes returned by every engine call
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineResultCode {
    /// Call succeeded
    Success = 0,
    /// Log file path could not be used
    LogFilePathError = 1,
    /// Address string could not be parsed
    ParseAddressError = 2,
    /// Listener could not be bound
    BindListenerError = 3,
    /// Engine handle is not initialized
    NotInitialized = 4,
    /// Engine has not been started
    NotStarted = 5,
    /// Engine runtime could not be created
    RuntimeCreationError = 6,
    /// Secret key could not be constructed
    SecretKeyConstructionError = 7,
    /// Platform could not be created
    PlatformCreationError = 8,
    /// Caller-provided buffer is too small
    BufferTooSmall = 9,
    /// Key could not be converted to DER
    ConversionToDerError = 10,
    /// Key could not be converted from DER
    ConversionFromDerError = 11,
    /// UDP socket could not be spawned
    SpawnUdpError = 12,
    /// Send failed
    SendError = 13,
    /// Payload exceeds the engine limit
    DataTooLarge = 14,
    /// Creator id exceeds the engine limit
    CreatorIdTooLarge = 15,
    /// Event has no creator
    CreatorIdMissing = 16,
    /// Event could not be received
    ReceiveEventError = 17,
    /// No initial nodes were provided
    InitialNodesMissing = 18,
    /// Engine is already running
    AlreadyStarted = 19,
    /// Start was called with an empty address book
    EmptyAddressBook = 20,
    /// Local IP could not be determined
    FailedToDetermineLocalIp = 21,
    /// No outbound relay packet is queued
    TransmitQueueEmpty = 22,
    /// Invalid argument
    ArgumentError = 23,
    /// Call requires the external network mode
    ExternalModeRequired = 24,
    /// Engine is not ready to receive
    RecvNotReady = 25,
    /// Socket address could not be decoded
    InvalidSockAddr = 26,
    /// A bind address is required in this mode
    BindAddressRequired = 27,
    /// Log callbacks are already installed
    LoggingAlreadySet = 28,
    /// Code not known to this binding
    Unknown = u32::MAX,
}

impl EngineResultCode {
    /// Interpret a raw result code
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        use EngineResultCode::*;
        const ALL: [EngineResultCode; 29] = [
            Success,
            LogFilePathError,
            ParseAddressError,
            BindListenerError,
            NotInitialized,
            NotStarted,
            RuntimeCreationError,
            SecretKeyConstructionError,
            PlatformCreationError,
            BufferTooSmall,
            ConversionToDerError,
            ConversionFromDerError,
            SpawnUdpError,
            SendError,
            DataTooLarge,
            CreatorIdTooLarge,
            CreatorIdMissing,
            ReceiveEventError,
            InitialNodesMissing,
            AlreadyStarted,
            EmptyAddressBook,
            FailedToDetermineLocalIp,
            TransmitQueueEmpty,
            ArgumentError,
            ExternalModeRequired,
            RecvNotReady,
            InvalidSockAddr,
            BindAddressRequired,
            LoggingAlreadySet,
        ];
        ALL.get(raw as usize).copied().unwrap_or(Unknown)
    }

    /// Turn a result code into `Ok(())` or an [`EngineError`] naming `call`
    pub fn check(self, call: &'static str) -> Result<(), EngineError> {
        match self {
            EngineResultCode::Success => Ok(()),
            code => Err(EngineError::new(call, code)),
        }
    }
}

/// Network mode the engine is initialized with
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineNetworkMode {
    /// Loopback interface only
    Loopback = 0,
    /// Local network, engine owns its UDP socket
    Local = 1,
    /// Packets leave through the outbound relay queue
    External = 2,
}

/// Operations the session layer needs from a consensus engine
///
/// All calls are made from the tick thread.
pub trait ConsensusEngine {
    /// Identity the engine signs events with
    fn local_identity(&self) -> &PeerIdentity;

    /// Address the engine's own socket is bound to
    fn bound_address(&self) -> Result<SocketAddr, EngineError>;

    /// Register the members of `book` without starting
    ///
    /// Entries registered by an earlier call are not registered twice.
    fn set_address_book(&mut self, book: &AddressBook) -> Result<(), EngineError>;

    /// Register `book` and start ordering
    fn start(&mut self, book: &AddressBook) -> Result<(), EngineError>;

    /// Submit one transaction
    fn send(&mut self, payload: &[u8]) -> Result<(), EngineError>;

    /// Next ordered event, if any
    fn next_event(&mut self) -> Result<Option<ConsensusEvent>, EngineError>;

    /// Next packet the engine wants sent through the relay, if any
    fn next_outbound_relay_packet(
        &mut self,
    ) -> Result<Option<(SyntheticAddress, Vec<u8>)>, EngineError>;

    /// Hand a packet received through the relay to the engine
    fn commit_inbound_relay_packet(
        &mut self,
        payload: &[u8],
        from: SyntheticAddress,
    ) -> Result<(), EngineError>;
}
