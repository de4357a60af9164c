//! [`RelayService`] backed by the reference UDP relay server.

use super::protocol::RelayMessage;
use super::{HANDSHAKE_TIMEOUT, KEEPALIVE_INTERVAL, MAX_DATAGRAM};
use crate::error::RelayError;
use crate::service::{DriverEvent, HOST_LINK, HostAllocation, LinkId, RelayDriver, RelayService};
use async_trait::async_trait;
use huddle_core::JoinCode;
use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time;

/// Relay service talking to a [`UdpRelayServer`](super::UdpRelayServer)
///
/// Every allocation and every join gets its own socket.
#[derive(Debug, Clone)]
pub struct UdpRelayService {
    server: SocketAddr,
    handshake_timeout: Duration,
}

impl UdpRelayService {
    /// Service for the relay server at `server`
    #[must_use]
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Override how long to wait for the server's reply
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Relay server address
    #[must_use]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Send `request` from a fresh socket and wait for the first reply
    async fn handshake(&self, request: &RelayMessage) -> Result<(UdpSocket, RelayMessage), RelayError> {
        let bind: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(self.server).await?;
        socket.send(&request.to_bytes()?).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let reply = time::timeout(self.handshake_timeout, async {
            loop {
                let len = socket.recv(&mut buf).await?;
                match RelayMessage::from_bytes(&buf[..len]) {
                    Ok(msg) => return Ok::<_, RelayError>(msg),
                    Err(e) => tracing::debug!(error = %e, "ignoring undecodable handshake reply"),
                }
            }
        })
        .await
        .map_err(|_| RelayError::Timeout)??;

        Ok((socket, reply))
    }
}

#[async_trait]
impl RelayService for UdpRelayService {
    async fn create_allocation(&self, capacity: usize) -> Result<HostAllocation, RelayError> {
        let capacity = u16::try_from(capacity)
            .map_err(|_| RelayError::AllocationFailed(format!("capacity {capacity} too large")))?;
        let (socket, reply) = self.handshake(&RelayMessage::Allocate { capacity }).await?;

        match reply {
            RelayMessage::Allocated {
                allocation_id,
                join_code,
            } => {
                tracing::debug!(allocation_id, %join_code, "allocation created");
                Ok(HostAllocation {
                    join_code: JoinCode::new(join_code),
                    driver: Box::new(UdpDriver::new(socket, None)?),
                })
            }
            RelayMessage::Error { code, message } => Err(RelayError::Server { code, message }),
            other => Err(RelayError::AllocationFailed(format!(
                "unexpected reply {}",
                other.message_type()
            ))),
        }
    }

    async fn join_allocation(
        &self,
        join_code: &JoinCode,
    ) -> Result<Box<dyn RelayDriver>, RelayError> {
        let request = RelayMessage::Join {
            join_code: join_code.to_string(),
        };
        let (socket, reply) = self.handshake(&request).await?;

        match reply {
            RelayMessage::Joined {
                allocation_id,
                link,
            } => {
                tracing::debug!(allocation_id, link, %join_code, "joined allocation");
                // The host is reachable as soon as the server admits us
                Ok(Box::new(UdpDriver::new(
                    socket,
                    Some(DriverEvent::Connected(HOST_LINK)),
                )?))
            }
            RelayMessage::Error { code, message } => Err(RelayError::JoinFailed {
                join_code: join_code.to_string(),
                reason: format!("{code:?}: {message}"),
            }),
            other => Err(RelayError::JoinFailed {
                join_code: join_code.to_string(),
                reason: format!("unexpected reply {}", other.message_type()),
            }),
        }
    }
}

/// Non-blocking driver over one relay socket
pub struct UdpDriver {
    socket: std::net::UdpSocket,
    pending: VecDeque<DriverEvent>,
    buf: Vec<u8>,
    last_sent: Instant,
    closed: bool,
}

impl UdpDriver {
    fn new(socket: UdpSocket, initial: Option<DriverEvent>) -> Result<Self, RelayError> {
        let socket = socket.into_std()?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            pending: initial.into_iter().collect(),
            buf: vec![0u8; MAX_DATAGRAM],
            last_sent: Instant::now(),
            closed: false,
        })
    }

    fn transmit(&mut self, msg: &RelayMessage) -> Result<(), RelayError> {
        self.socket.send(&msg.to_bytes()?)?;
        self.last_sent = Instant::now();
        Ok(())
    }

    fn maybe_keepalive(&mut self) {
        if self.last_sent.elapsed() >= KEEPALIVE_INTERVAL {
            if let Err(e) = self.transmit(&RelayMessage::Keepalive) {
                tracing::debug!(error = %e, "relay keepalive failed");
            }
        }
    }
}

impl RelayDriver for UdpDriver {
    fn poll_event(&mut self) -> Result<Option<DriverEvent>, RelayError> {
        if self.closed {
            return Err(RelayError::Closed);
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        self.maybe_keepalive();

        loop {
            let len = match self.socket.recv(&mut self.buf) {
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            match RelayMessage::from_bytes(&self.buf[..len]) {
                Ok(RelayMessage::Deliver { link, payload }) => {
                    return Ok(Some(DriverEvent::Data(link, payload)));
                }
                Ok(RelayMessage::PeerJoined { link }) => {
                    return Ok(Some(DriverEvent::Connected(link)));
                }
                Ok(RelayMessage::PeerLeft { link }) => {
                    return Ok(Some(DriverEvent::Disconnected(link)));
                }
                Ok(RelayMessage::Error { code, message }) => {
                    tracing::warn!(?code, %message, "relay server reported an error");
                }
                Ok(other) => {
                    tracing::trace!(kind = other.message_type(), "ignoring relay message");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring undecodable relay datagram");
                }
            }
        }
    }

    fn send(&mut self, link: LinkId, payload: &[u8]) -> Result<(), RelayError> {
        if self.closed {
            return Err(RelayError::Closed);
        }
        self.transmit(&RelayMessage::SendTo {
            link,
            payload: payload.to_vec(),
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.transmit(&RelayMessage::Leave) {
            tracing::debug!(error = %e, "failed to notify relay of leave");
        }
        self.closed = true;
    }
}

impl Drop for UdpDriver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_times_out_without_server() {
        // Bound but never answering
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let service = UdpRelayService::new(silent.local_addr().unwrap())
            .with_handshake_timeout(Duration::from_millis(50));
        let result = service.create_allocation(2).await;
        assert!(matches!(result, Err(RelayError::Timeout)));
    }

    #[tokio::test]
    async fn test_capacity_overflow_rejected() {
        let service = UdpRelayService::new("127.0.0.1:9".parse().unwrap());
        let result = service.create_allocation(usize::from(u16::MAX) + 1).await;
        assert!(matches!(result, Err(RelayError::AllocationFailed(_))));
    }
}
