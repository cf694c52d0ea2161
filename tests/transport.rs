//! End-to-end transport tests over real sockets

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use remote_objects::config::NetworkConfig;
use remote_objects::core::packet::{Packet, PacketType, PacketWriter};
use remote_objects::error::ProtocolError;
use remote_objects::protocol::handshake::{expect_handshake, send_handshake};
use remote_objects::protocol::packets::serialize_ping_packet;
use remote_objects::protocol::{serve_connection, Dispatcher};
use remote_objects::transport::{parse_address, Connection, Listener, TransportRegistry};
use remote_objects::utils::timeout::with_timeout;

async fn accept_within(listener: &mut Box<dyn Listener>) -> Connection {
    with_timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("accept timed out")
        .expect("listener closed")
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_handshake() {
    let registry = TransportRegistry::default();
    let address = parse_address("local:ro_test").unwrap();
    let mut listener = registry.listen(&address).await.expect("listen");
    assert!(listener.is_listening());

    let mut client = registry.connect(&address).await.expect("connect");
    let mut server = accept_within(&mut listener).await;

    send_handshake(&mut server).await.expect("send handshake");
    let version = expect_handshake(&mut client).await.expect("handshake");
    assert_eq!(version, "1");
    assert!(client.is_open());

    listener.close();
    assert!(!listener.is_listening());
}

#[tokio::test]
async fn test_tcp_ephemeral_port_and_packets_both_ways() {
    let registry = TransportRegistry::default();
    let mut listener = registry
        .listen(&parse_address("tcp://127.0.0.1:0").unwrap())
        .await
        .expect("listen");
    let bound = listener.address().expect("address");
    assert_ne!(bound.port(), Some(0));

    let mut client = registry.connect(&bound).await.expect("connect");
    let mut server = accept_within(&mut listener).await;

    let mut writer = PacketWriter::new();
    client
        .send(serialize_ping_packet(&mut writer, "counter"))
        .await
        .expect("send");
    let packet = server.receive().await.expect("open").expect("packet");
    assert_eq!(packet.packet_type, PacketType::Ping);
    assert_eq!(packet.name, "counter");

    server
        .send_packet(Packet::new(PacketType::RemoveObject, "counter", Default::default()))
        .await
        .expect("send");
    let packet = client.receive().await.expect("open").expect("packet");
    assert_eq!(packet.packet_type, PacketType::RemoveObject);
}

#[tokio::test]
async fn test_pending_connections_polled() {
    let registry = TransportRegistry::default();
    let mut listener = registry
        .listen(&parse_address("tcp://127.0.0.1:0").unwrap())
        .await
        .expect("listen");
    let bound = listener.address().expect("address");
    assert!(!listener.has_pending_connections());
    assert!(listener.next_pending_connection().is_none());

    let _client = registry.connect(&bound).await.expect("connect");
    let polled = with_timeout(Duration::from_secs(5), async {
        loop {
            if let Some(connection) = listener.next_pending_connection() {
                return connection;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection never queued");
    assert!(polled.is_open());
}

#[tokio::test]
async fn test_peer_close_ends_receive() {
    let registry = TransportRegistry::default();
    let mut listener = registry
        .listen(&parse_address("tcp://127.0.0.1:0").unwrap())
        .await
        .expect("listen");
    let mut client = registry
        .connect(&listener.address().unwrap())
        .await
        .expect("connect");
    let mut server = accept_within(&mut listener).await;

    client.close().await.expect("close");
    client.close().await.expect("second close is a no-op");
    assert!(server.receive().await.is_none());
    assert!(!server.is_open());
    assert!(matches!(
        server.send(bytes::Bytes::new()).await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_served_connection_answers_pings() {
    let registry = TransportRegistry::default();
    let mut listener = registry
        .listen(&parse_address("tcp://127.0.0.1:0").unwrap())
        .await
        .expect("listen");
    let mut client = registry
        .connect(&listener.address().unwrap())
        .await
        .expect("connect");
    let mut server = accept_within(&mut listener).await;

    let serving = tokio::spawn(async move {
        let mut dispatcher = Dispatcher::new();
        dispatcher.respond_to_pings();
        serve_connection(&mut server, &mut dispatcher).await
    });

    let mut writer = PacketWriter::new();
    // Unhandled packet types are skipped, not fatal
    client
        .send_packet(Packet::new(PacketType::AddObject, "car", bytes::Bytes::from_static(&[0])))
        .await
        .expect("send");
    client
        .send(serialize_ping_packet(&mut writer, "car"))
        .await
        .expect("send");

    let pong = with_timeout(Duration::from_secs(5), client.receive())
        .await
        .expect("pong timed out")
        .expect("open")
        .expect("packet");
    assert_eq!(pong.packet_type, PacketType::Pong);
    assert_eq!(pong.name, "car");

    client.close().await.expect("close");
    serving.await.expect("join").expect("served cleanly");
}

#[tokio::test]
async fn test_unknown_scheme_and_refused_connect() {
    let registry = TransportRegistry::default();
    assert!(matches!(
        registry.connect(&parse_address("udp://127.0.0.1:9").unwrap()).await,
        Err(ProtocolError::UnknownScheme(_))
    ));

    // Bind then release a port so nothing listens on it
    let port = {
        let mut listener = registry
            .listen(&parse_address("tcp://127.0.0.1:0").unwrap())
            .await
            .expect("listen");
        let port = listener.address().unwrap().port().unwrap();
        listener.close();
        port
    };
    let refused = registry
        .connect(&parse_address(&format!("tcp://127.0.0.1:{port}")).unwrap())
        .await;
    assert!(refused.is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn test_configured_endpoints_connect() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "local:ro_configured".to_string();
        c.client.address = "local:ro_configured".to_string();
        c.client.heartbeat_interval = Duration::from_millis(250);
    });
    let registry = TransportRegistry::from_config(&config);
    let mut listener = registry
        .listen(&config.server.url().unwrap())
        .await
        .expect("listen");

    let client = registry
        .connect(&config.client.url().unwrap())
        .await
        .expect("connect");
    let server = accept_within(&mut listener).await;
    assert_eq!(client.heartbeat_interval(), Some(Duration::from_millis(250)));
    assert_eq!(server.heartbeat_interval(), Some(Duration::from_millis(250)));
    listener.close();
}

#[tokio::test]
async fn test_connect_bounded_by_timeout() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.client.connection_timeout = Duration::from_millis(50);
    });
    let registry = TransportRegistry::from_config(&config);
    // Non-routable address: the attempt hangs until the bound elapses
    let address = parse_address("tcp://10.255.255.1:9").unwrap();
    match registry.connect(&address).await {
        Err(ProtocolError::Timeout) | Err(ProtocolError::Io(_)) => {}
        other => panic!("expected timeout, got {other:?}"),
    }
}
