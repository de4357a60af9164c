//! End-to-end tests against the reference UDP relay server.

use huddle_core::testing::{RecordingEngine, identity_from_seed};
use huddle_core::{JoinCode, SyntheticAddress};
use huddle_relay::{
    ConnectionStatus, DriverEvent, HOST_LINK, RelayDriver, RelayError, RelayMultiplexer,
    RelayNotice, RelayService, UdpRelayServer, UdpRelayService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

async fn start_server() -> SocketAddr {
    let server = Arc::new(
        UdpRelayServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap(),
    );
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

async fn next_event(driver: &mut dyn RelayDriver) -> DriverEvent {
    for _ in 0..400 {
        if let Some(event) = driver.poll_event().unwrap() {
            return event;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no driver event within timeout");
}

// ============================================================================
// Allocation and join
// ============================================================================

#[tokio::test]
async fn test_allocate_join_and_exchange() {
    let service = UdpRelayService::new(start_server().await);

    let mut host = service.create_allocation(2).await.unwrap();
    let mut peer = service.join_allocation(&host.join_code).await.unwrap();

    assert_eq!(
        next_event(peer.as_mut()).await,
        DriverEvent::Connected(HOST_LINK)
    );
    let DriverEvent::Connected(link) = next_event(host.driver.as_mut()).await else {
        panic!("host did not see the join");
    };

    peer.send(HOST_LINK, b"ping").unwrap();
    assert_eq!(
        next_event(host.driver.as_mut()).await,
        DriverEvent::Data(link, b"ping".to_vec())
    );

    host.driver.send(link, b"pong").unwrap();
    assert_eq!(
        next_event(peer.as_mut()).await,
        DriverEvent::Data(HOST_LINK, b"pong".to_vec())
    );
}

#[tokio::test]
async fn test_allocation_capacity_includes_host() {
    let service = UdpRelayService::new(start_server().await);

    let host = service.create_allocation(2).await.unwrap();
    let _first = service.join_allocation(&host.join_code).await.unwrap();
    let second = service.join_allocation(&host.join_code).await;

    assert!(matches!(second, Err(RelayError::JoinFailed { .. })));
}

#[tokio::test]
async fn test_unknown_join_code() {
    let service = UdpRelayService::new(start_server().await);
    let result = service.join_allocation(&JoinCode::new("NOPE99")).await;
    assert!(matches!(result, Err(RelayError::JoinFailed { .. })));
}

#[tokio::test]
async fn test_leave_notifies_host() {
    let service = UdpRelayService::new(start_server().await);

    let mut host = service.create_allocation(3).await.unwrap();
    let mut peer = service.join_allocation(&host.join_code).await.unwrap();
    let DriverEvent::Connected(link) = next_event(host.driver.as_mut()).await else {
        panic!("host did not see the join");
    };

    peer.close();
    assert!(matches!(peer.poll_event(), Err(RelayError::Closed)));
    assert_eq!(
        next_event(host.driver.as_mut()).await,
        DriverEvent::Disconnected(link)
    );
}

// ============================================================================
// Multiplexers over the UDP relay
// ============================================================================

#[tokio::test]
async fn test_two_multiplexers_exchange_engine_packets() {
    let service = Arc::new(UdpRelayService::new(start_server().await));
    let alice = identity_from_seed(10);
    let bob = identity_from_seed(20);

    let mut alice_mux =
        RelayMultiplexer::new(Arc::clone(&service), alice.client_id(), Handle::current());
    let mut bob_mux = RelayMultiplexer::new(Arc::clone(&service), bob.client_id(), Handle::current());
    let mut alice_engine = RecordingEngine::new(alice.clone());
    let mut bob_engine = RecordingEngine::new(bob.clone());

    alice_mux.bind(1).unwrap();
    bob_mux.bind(1).unwrap();

    let mut alice_code = None;
    let mut bob_code = None;
    for _ in 0..400 {
        for notice in alice_mux.pump(&mut alice_engine).unwrap() {
            if let RelayNotice::Bound(code) = notice {
                alice_code = Some(code);
            }
        }
        for notice in bob_mux.pump(&mut bob_engine).unwrap() {
            if let RelayNotice::Bound(code) = notice {
                bob_code = Some(code);
            }
        }
        if alice_code.is_some() && bob_code.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let (alice_code, bob_code) = (alice_code.unwrap(), bob_code.unwrap());

    alice_mux.connect_to(&bob, &bob_code);
    bob_mux.connect_to(&alice, &alice_code);
    for _ in 0..400 {
        alice_mux.pump(&mut alice_engine).unwrap();
        bob_mux.pump(&mut bob_engine).unwrap();
        let ready = |status: Option<ConnectionStatus>| status == Some(ConnectionStatus::Connected);
        if ready(alice_mux.connection(&bob).map(|c| c.status()))
            && ready(bob_mux.connection(&alice).map(|c| c.status()))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    alice_engine.push_outbound(bob.synthetic_address(), b"from alice".to_vec());
    bob_engine.push_outbound(alice.synthetic_address(), b"from bob".to_vec());
    for _ in 0..400 {
        alice_mux.pump(&mut alice_engine).unwrap();
        bob_mux.pump(&mut bob_engine).unwrap();
        if !alice_engine.inbound().is_empty() && !bob_engine.inbound().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(
        bob_engine.inbound(),
        &[(
            SyntheticAddress::from_client_id(alice.client_id()),
            b"from alice".to_vec()
        )]
    );
    assert_eq!(
        alice_engine.inbound(),
        &[(
            SyntheticAddress::from_client_id(bob.client_id()),
            b"from bob".to_vec()
        )]
    );
    assert_eq!(alice_mux.stats().outbound_sent, 1);
    assert_eq!(bob_mux.stats().inbound_delivered, 1);
}
