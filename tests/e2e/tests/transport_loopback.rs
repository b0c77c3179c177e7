//! Pipelines talking to each other over real sockets

use channel::{DataContext, DataOperation, DataPipelineBuilder, DataSource, DefaultCore};
use e2e_tests::registry;
use network::{
    PeerAddr, PeerName, TcpClientConfig, TcpClientCore, TcpServerConfig, TcpServerCore, UdpConfig,
    UdpCore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const STEP: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_tcp_request_reply() {
    let registry = registry();
    let cancel = CancellationToken::new();

    let (server_inner, mut server_inbound) = DefaultCore::with_channel();
    let server_inner = Arc::new(server_inner);
    let server = Arc::new(TcpServerCore::new(TcpServerConfig::new("127.0.0.1:0")));
    DataPipelineBuilder::new("tcp-server")
        .inner(server_inner.clone())
        .outer(server.clone())
        .register(&registry)
        .unwrap();
    registry.fetch("tcp-server").unwrap().pipeline().init(&cancel).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (client_inner, mut client_inbound) = DefaultCore::with_channel();
    let client_inner = Arc::new(client_inner);
    let client = Arc::new(TcpClientCore::new(TcpClientConfig::new(addr.to_string())));
    DataPipelineBuilder::new("tcp-client")
        .inner(client_inner.clone())
        .outer(client.clone())
        .register(&registry)
        .unwrap();
    registry.fetch("tcp-client").unwrap().pipeline().init(&cancel).await.unwrap();
    assert!(client.wait_connected(STEP).await);

    client_inner.send("ping").await.unwrap();
    let request = timeout(STEP, server_inbound.recv()).await.unwrap().unwrap();
    assert_eq!(request.data().as_text(), Some("ping"));
    let peer = request.metadata.get::<PeerName>().cloned().unwrap();

    let reply = DataContext::from_side(DataSource::Inner, DataOperation::Response, "pong")
        .with_metadata(peer);
    server_inner.send_context(reply).await.unwrap();
    let response = timeout(STEP, client_inbound.recv()).await.unwrap().unwrap();
    assert_eq!(response.data().as_text(), Some("pong"));

    registry.dispose_all().await;
    assert!(server.peers().is_empty());
}

#[tokio::test]
async fn test_udp_datagram_exchange() {
    let registry = registry();
    let cancel = CancellationToken::new();

    let (a_inner, mut a_inbound) = DefaultCore::with_channel();
    let a_inner = Arc::new(a_inner);
    let a = Arc::new(UdpCore::new(UdpConfig::new("127.0.0.1", 0)));
    let a_channel = DataPipelineBuilder::new("udp-a")
        .inner(a_inner.clone())
        .outer(a.clone())
        .register(&registry)
        .unwrap();
    a_channel.pipeline().init(&cancel).await.unwrap();
    let a_addr = a.local_addr().unwrap();

    let (b_inner, mut b_inbound) = DefaultCore::with_channel();
    let b_inner = Arc::new(b_inner);
    let b = Arc::new(UdpCore::new(
        UdpConfig::new("127.0.0.1", 0).with_remote(a_addr.to_string()),
    ));
    let b_channel = DataPipelineBuilder::new("udp-b")
        .inner(b_inner.clone())
        .outer(b.clone())
        .register(&registry)
        .unwrap();
    b_channel.pipeline().init(&cancel).await.unwrap();

    b_inner.send("dgram").await.unwrap();
    let datagram = timeout(STEP, a_inbound.recv()).await.unwrap().unwrap();
    assert_eq!(datagram.data().as_bytes().map(|b| b.as_ref()), Some(&b"dgram"[..]));
    let sender = datagram.metadata.get::<PeerAddr>().cloned().unwrap();
    assert_eq!(sender.0, b.local_addr().unwrap());

    let reply = DataContext::from_side(DataSource::Inner, DataOperation::Response, "ack")
        .with_metadata(sender);
    a_inner.send_context(reply).await.unwrap();
    let ack = timeout(STEP, b_inbound.recv()).await.unwrap().unwrap();
    assert_eq!(ack.data().as_bytes().map(|b| b.as_ref()), Some(&b"ack"[..]));

    registry.dispose_all().await;
    assert!(!a.is_bound());
}
