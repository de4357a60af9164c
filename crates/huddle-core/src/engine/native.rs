//! Binding to the native consensus engine library.
//!
//! The library hands out an opaque platform pointer that must be freed
//! exactly once, and event pointers that must be freed after copying. Both
//! are wrapped in owning types here so callers never see a raw pointer.
//!
//! ## Safety
//!
//! Every `extern` call takes a pointer owned by [`NativeEngine`], which keeps
//! it valid until `Drop`. Buffers passed in are borrowed for the duration of
//! the call only.

use super::{ConsensusEngine, ConsensusEvent, EngineNetworkMode, EngineResultCode};
use crate::address_book::{AddressBook, AddressBookEntry};
use crate::config::TransportConfig;
use crate::error::{EngineError, EventError};
use crate::identity::{PUBLIC_KEY_DER_LEN, PeerIdentity, SECRET_KEY_DER_LEN, SecretKey};
use crate::sockaddr::{SOCKADDR_LEN, SyntheticAddress};
use std::collections::HashSet;
use std::ffi::{CString, c_char, c_void};
use std::net::{IpAddr, SocketAddr};
use std::ptr::NonNull;
use zeroize::Zeroize;

/// Largest packet the engine emits on the relay path
const MAX_RELAY_PACKET: usize = 64 * 1024;

#[repr(C)]
struct RawEvent {
    packed_transactions: *const u8,
    packed_transactions_len: u32,
    timestamp_created: u64,
    timestamp_received: u64,
    creator_id: *const u8,
    creator_id_len: u32,
}

type LogFn = unsafe extern "C" fn(message: *const u8, len: usize);

#[link(name = "tashi_consensus_engine")]
unsafe extern "C" {
    fn tce_secret_key_generate(der: *mut u8, capacity: u32, len: *mut u32) -> u32;
    fn tce_public_key_get(
        secret_key_der: *const u8,
        secret_key_der_len: u32,
        public_key_der: *mut u8,
        public_key_der_capacity: u32,
        public_key_der_len: *mut u32,
    ) -> u32;
    fn tce_init(
        mode: u32,
        port: u16,
        sync_interval_ms: u32,
        secret_key_der: *const u8,
        secret_key_der_len: u32,
        result: *mut u32,
    ) -> *mut c_void;
    fn tce_bound_address_get(
        platform: *const c_void,
        buffer: *mut c_char,
        buffer_len: i32,
        port: *mut u16,
    ) -> i32;
    fn tce_add_node(
        platform: *mut c_void,
        address: *const c_char,
        public_key_der: *const u8,
        public_key_der_len: u32,
    ) -> u32;
    fn tce_add_external_node(
        platform: *mut c_void,
        address: *const u8,
        public_key_der: *const u8,
        public_key_der_len: u32,
    ) -> u32;
    fn tce_start(platform: *mut c_void) -> u32;
    fn tce_event_get(platform: *mut c_void, result: *mut u32) -> *mut RawEvent;
    fn tce_event_free(event: *mut RawEvent);
    fn tce_send(platform: *mut c_void, data: *const u8, len: u32) -> u32;
    fn tce_external_transmit_get(
        platform: *mut c_void,
        address: *mut u8,
        buffer: *mut u8,
        buffer_len: u32,
        len_out: *mut u32,
    ) -> u32;
    fn tce_external_receive(
        platform: *mut c_void,
        data: *const u8,
        len: u32,
        address: *const u8,
    ) -> u32;
    fn tce_free(platform: *mut c_void);
    fn tce_log_set_functions(log: Option<LogFn>, warn: Option<LogFn>, error: Option<LogFn>) -> u32;
    fn tce_log_set_filter(filter: *const c_char) -> u32;
}

impl SecretKey {
    /// Generate a fresh P-256 secret key
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot create a key or returns one of the wrong
    /// length.
    pub fn generate() -> Result<Self, EngineError> {
        let mut der = [0u8; SECRET_KEY_DER_LEN];
        let mut len = 0u32;
        // SAFETY: `der` has SECRET_KEY_DER_LEN writable bytes and `len` is a valid out pointer.
        let code = unsafe { tce_secret_key_generate(der.as_mut_ptr(), der.len() as u32, &mut len) };
        let key = EngineResultCode::from_raw(code)
            .check("tce_secret_key_generate")
            .and_then(|()| {
                if len as usize == SECRET_KEY_DER_LEN {
                    Ok(Self::from_bytes(der))
                } else {
                    Err(EngineError::new(
                        "tce_secret_key_generate",
                        EngineResultCode::SecretKeyConstructionError,
                    ))
                }
            });
        der.zeroize();
        key
    }

    /// Derive the public identity for this key
    ///
    /// # Errors
    ///
    /// Fails if the engine rejects the key or returns a malformed public key.
    pub fn public_key(&self) -> Result<PeerIdentity, EngineError> {
        let fail = |code| EngineError::new("tce_public_key_get", code);
        let secret = self.as_der();
        let mut public = [0u8; PUBLIC_KEY_DER_LEN];
        let mut len = 0u32;
        // SAFETY: `secret` is readable and `public` writable for their full lengths.
        let code = unsafe {
            tce_public_key_get(
                secret.as_ptr(),
                secret.len() as u32,
                public.as_mut_ptr(),
                public.len() as u32,
                &mut len,
            )
        };
        EngineResultCode::from_raw(code).check("tce_public_key_get")?;
        if len as usize != PUBLIC_KEY_DER_LEN {
            return Err(fail(EngineResultCode::ConversionToDerError));
        }
        PeerIdentity::from_der(&public).map_err(|_| fail(EngineResultCode::ConversionFromDerError))
    }
}

/// Owned handle to a native engine instance
pub struct NativeEngine {
    platform: NonNull<c_void>,
    identity: PeerIdentity,
    registered: HashSet<SyntheticAddress>,
    started: bool,
}

impl NativeEngine {
    /// Initialize an engine bound according to `config`
    ///
    /// The local identity is derived from `key`.
    ///
    /// # Errors
    ///
    /// Returns the engine's result code if the key is rejected or
    /// initialization fails.
    pub fn new(config: &TransportConfig, key: &SecretKey) -> Result<Self, EngineError> {
        let identity = key.public_key()?;
        let secret_key_der = key.as_der();
        let mode: EngineNetworkMode = config.network_mode.engine_mode();
        let mut result = 0u32;
        // SAFETY: the key buffer outlives the call and `result` is a valid out pointer.
        let raw = unsafe {
            tce_init(
                mode as u32,
                config.bind_port,
                config.sync_interval_ms,
                secret_key_der.as_ptr(),
                secret_key_der.len() as u32,
                &mut result,
            )
        };
        EngineResultCode::from_raw(result).check("tce_init")?;
        let platform = NonNull::new(raw)
            .ok_or(EngineError::new("tce_init", EngineResultCode::PlatformCreationError))?;

        tracing::debug!(
            ?mode,
            port = config.bind_port,
            client_id = %identity.client_id(),
            "native engine initialized"
        );
        Ok(Self {
            platform,
            identity,
            registered: HashSet::new(),
            started: false,
        })
    }

    fn register(&mut self, entry: &AddressBookEntry) -> Result<(), EngineError> {
        let address = entry.engine_address();
        if self.registered.contains(&address) {
            return Ok(());
        }
        let der = entry.identity().as_der();
        let code = match entry {
            AddressBookEntry::Direct { address, port, .. } => {
                let text = CString::new(SocketAddr::new(*address, *port).to_string())
                    .map_err(|_| EngineError::new("tce_add_node", EngineResultCode::ArgumentError))?;
                // SAFETY: `text` and `der` outlive the call.
                unsafe {
                    tce_add_node(
                        self.platform.as_ptr(),
                        text.as_ptr(),
                        der.as_ptr(),
                        der.len() as u32,
                    )
                }
            }
            AddressBookEntry::External { .. } => {
                // SAFETY: the address buffer is SOCKADDR_LEN bytes and outlives the call.
                unsafe {
                    tce_add_external_node(
                        self.platform.as_ptr(),
                        address.as_bytes().as_ptr(),
                        der.as_ptr(),
                        der.len() as u32,
                    )
                }
            }
        };
        EngineResultCode::from_raw(code).check("tce_add_node")?;
        self.registered.insert(address);
        Ok(())
    }
}

impl ConsensusEngine for NativeEngine {
    fn local_identity(&self) -> &PeerIdentity {
        &self.identity
    }

    fn bound_address(&self) -> Result<SocketAddr, EngineError> {
        let fail = |code| EngineError::new("tce_bound_address_get", code);
        let mut buffer = vec![0u8; 64];
        loop {
            let mut port = 0u16;
            let capacity = i32::try_from(buffer.len())
                .map_err(|_| fail(EngineResultCode::BufferTooSmall))?;
            // SAFETY: `buffer` has `capacity` writable bytes.
            let required = unsafe {
                tce_bound_address_get(
                    self.platform.as_ptr(),
                    buffer.as_mut_ptr().cast::<c_char>(),
                    capacity,
                    &mut port,
                )
            };
            if required < 0 {
                return Err(fail(EngineResultCode::from_raw(required.unsigned_abs())));
            }
            let required = required as usize;
            if required > buffer.len() {
                buffer.resize(required, 0);
                continue;
            }
            // `required` counts the trailing NUL
            let text = std::str::from_utf8(&buffer[..required.saturating_sub(1)])
                .map_err(|_| fail(EngineResultCode::ParseAddressError))?;
            let ip: IpAddr = text
                .parse()
                .map_err(|_| fail(EngineResultCode::ParseAddressError))?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    fn set_address_book(&mut self, book: &AddressBook) -> Result<(), EngineError> {
        for entry in book.iter() {
            self.register(entry)?;
        }
        Ok(())
    }

    fn start(&mut self, book: &AddressBook) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::new("tce_start", EngineResultCode::AlreadyStarted));
        }
        self.set_address_book(book)?;
        // SAFETY: platform is valid until drop.
        let code = unsafe { tce_start(self.platform.as_ptr()) };
        EngineResultCode::from_raw(code).check("tce_start")?;
        self.started = true;
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| EngineError::new("tce_send", EngineResultCode::DataTooLarge))?;
        // SAFETY: payload outlives the call.
        let code = unsafe { tce_send(self.platform.as_ptr(), payload.as_ptr(), len) };
        EngineResultCode::from_raw(code).check("tce_send")
    }

    fn next_event(&mut self) -> Result<Option<ConsensusEvent>, EngineError> {
        if !self.started {
            return Err(EngineError::new("tce_event_get", EngineResultCode::NotStarted));
        }
        let mut result = 0u32;
        // SAFETY: platform is valid until drop, `result` is a valid out pointer.
        let raw = unsafe { tce_event_get(self.platform.as_ptr(), &mut result) };
        let Some(raw) = NonNull::new(raw) else {
            EngineResultCode::from_raw(result).check("tce_event_get")?;
            return Ok(None);
        };
        let event = OwnedEvent(raw);
        EngineResultCode::from_raw(result).check("tce_event_get")?;
        event.copy().map(Some).map_err(|e| {
            let code = match e {
                EventError::CreatorMissing => EngineResultCode::CreatorIdMissing,
                _ => EngineResultCode::ReceiveEventError,
            };
            EngineError::new("tce_event_get", code)
        })
    }

    fn next_outbound_relay_packet(
        &mut self,
    ) -> Result<Option<(SyntheticAddress, Vec<u8>)>, EngineError> {
        if !self.started {
            return Ok(None);
        }
        let mut address = [0u8; SOCKADDR_LEN];
        let mut buffer = vec![0u8; MAX_RELAY_PACKET];
        let mut len = 0u32;
        // SAFETY: both buffers are writable for their full length.
        let code = unsafe {
            tce_external_transmit_get(
                self.platform.as_ptr(),
                address.as_mut_ptr(),
                buffer.as_mut_ptr(),
                buffer.len() as u32,
                &mut len,
            )
        };
        match EngineResultCode::from_raw(code) {
            EngineResultCode::TransmitQueueEmpty => Ok(None),
            other => {
                other.check("tce_external_transmit_get")?;
                buffer.truncate(len as usize);
                Ok(Some((SyntheticAddress::from_bytes(address), buffer)))
            }
        }
    }

    fn commit_inbound_relay_packet(
        &mut self,
        payload: &[u8],
        from: SyntheticAddress,
    ) -> Result<(), EngineError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| EngineError::new("tce_external_receive", EngineResultCode::DataTooLarge))?;
        // SAFETY: payload and address outlive the call.
        let code = unsafe {
            tce_external_receive(
                self.platform.as_ptr(),
                payload.as_ptr(),
                len,
                from.as_bytes().as_ptr(),
            )
        };
        EngineResultCode::from_raw(code).check("tce_external_receive")
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        // SAFETY: the platform pointer came from tce_init and is freed once.
        unsafe { tce_free(self.platform.as_ptr()) };
    }
}

/// Event pointer freed on drop
struct OwnedEvent(NonNull<RawEvent>);

impl OwnedEvent {
    fn copy(&self) -> Result<ConsensusEvent, EventError> {
        // SAFETY: the engine guarantees the event and its buffers stay valid
        // until tce_event_free.
        let raw = unsafe { self.0.as_ref() };
        let creator = if raw.creator_id.is_null() {
            &[][..]
        } else {
            // SAFETY: non-null with the advertised length.
            unsafe { std::slice::from_raw_parts(raw.creator_id, raw.creator_id_len as usize) }
        };
        let packed = if raw.packed_transactions.is_null() {
            &[][..]
        } else {
            // SAFETY: non-null with the advertised length.
            unsafe {
                std::slice::from_raw_parts(
                    raw.packed_transactions,
                    raw.packed_transactions_len as usize,
                )
            }
        };
        ConsensusEvent::from_packed(
            creator,
            raw.timestamp_created,
            raw.timestamp_received,
            packed,
        )
    }
}

impl Drop for OwnedEvent {
    fn drop(&mut self) {
        // SAFETY: pointer came from tce_event_get and is freed once.
        unsafe { tce_event_free(self.0.as_ptr()) };
    }
}

/// Forwards engine log output into `tracing` while alive
///
/// Dropping the guard unregisters the callbacks. Only one guard should exist
/// per process.
pub struct LogForwarding {
    _private: (),
}

impl LogForwarding {
    /// Register the forwarding callbacks and apply `filter`
    ///
    /// # Errors
    ///
    /// Fails if the engine rejects the callbacks or the filter.
    pub fn install(filter: &str) -> Result<Self, EngineError> {
        // SAFETY: the callbacks are plain functions valid for the process lifetime.
        let code = unsafe { tce_log_set_functions(Some(log_info), Some(log_warn), Some(log_error)) };
        EngineResultCode::from_raw(code).check("tce_log_set_functions")?;
        let guard = Self { _private: () };

        let filter = CString::new(filter)
            .map_err(|_| EngineError::new("tce_log_set_filter", EngineResultCode::ArgumentError))?;
        // SAFETY: `filter` is NUL-terminated and outlives the call.
        let code = unsafe { tce_log_set_filter(filter.as_ptr()) };
        EngineResultCode::from_raw(code).check("tce_log_set_filter")?;
        Ok(guard)
    }
}

impl Drop for LogForwarding {
    fn drop(&mut self) {
        // SAFETY: clearing the callbacks is always allowed.
        unsafe {
            tce_log_set_functions(None, None, None);
        }
    }
}

/// # Safety
///
/// `message` must point to `len` readable bytes.
unsafe fn message<'a>(message: *const u8, len: usize) -> std::borrow::Cow<'a, str> {
    if message.is_null() {
        return std::borrow::Cow::Borrowed("");
    }
    // SAFETY: upheld by the caller.
    String::from_utf8_lossy(unsafe { std::slice::from_raw_parts(message, len) })
}

unsafe extern "C" fn log_info(ptr: *const u8, len: usize) {
    // SAFETY: the engine passes a valid UTF-8 buffer of `len` bytes.
    tracing::info!(target: "huddle::engine", "{}", unsafe { message(ptr, len) });
}

unsafe extern "C" fn log_warn(ptr: *const u8, len: usize) {
    // SAFETY: as above.
    tracing::warn!(target: "huddle::engine", "{}", unsafe { message(ptr, len) });
}

unsafe extern "C" fn log_error(ptr: *const u8, len: usize) {
    // SAFETY: as above.
    tracing::error!(target: "huddle::engine", "{}", unsafe { message(ptr, len) });
}
