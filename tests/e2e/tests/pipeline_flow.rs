//! Envelope flow through built pipelines

use channel::testing::{RecordingCore, Trail, TraceMiddleware};
use channel::{
    ChannelError, ConnectionDirection, DataContext, DataOperation, DataPipelineBuilder, DataSource,
    DefaultCore,
};
use e2e_tests::{registry, UppercaseMiddleware};
use network::{UdpConfig, UdpCore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_transform_applies_in_both_directions() {
    let registry = registry();
    let (inner, mut inbound) = DefaultCore::with_channel();
    let inner = Arc::new(inner);
    let (outer, mut outbound) = DefaultCore::with_channel();
    let outer = Arc::new(outer);
    let channel = DataPipelineBuilder::new("shout")
        .inner(inner.clone())
        .outer(outer.clone())
        .middleware(Arc::new(UppercaseMiddleware))
        .register(&registry)
        .unwrap();
    channel.pipeline().init(&CancellationToken::new()).await.unwrap();

    let publish = DataContext::new(
        DataSource::Inner,
        DataSource::Inner,
        DataOperation::Publish,
        "hello",
    );
    inner.send_context(publish).await.unwrap();
    let delivered = outbound.recv().await.unwrap();
    assert_eq!(delivered.data().as_text(), Some("HELLO"));
    assert_eq!(delivered.operation(), DataOperation::Publish);

    outer.send("world").await.unwrap();
    let received = inbound.recv().await.unwrap();
    assert_eq!(received.data().as_text(), Some("WORLD"));
    assert!(!channel.pipeline().has_exceptions());

    registry.dispose_all().await;
}

#[tokio::test]
async fn test_middlewares_wrap_like_an_onion() {
    let registry = registry();
    let (inner, mut inbound) = DefaultCore::with_channel();
    let inner = Arc::new(inner);
    let outer = Arc::new(RecordingCore::new("outer"));
    let channel = DataPipelineBuilder::new("onion")
        .inner(inner.clone())
        .outer(outer.clone())
        .middleware(Arc::new(TraceMiddleware::new("first")))
        .middleware(Arc::new(TraceMiddleware::new("second")))
        .register(&registry)
        .unwrap();
    channel.pipeline().init(&CancellationToken::new()).await.unwrap();

    inner.send("out").await.unwrap();
    let trail = outer.received()[0].metadata.get::<Trail>().cloned().unwrap();
    assert_eq!(trail, Trail(vec!["second".into(), "first".into()]));

    outer.push("in").await.unwrap();
    let received = inbound.recv().await.unwrap();
    let trail = received.metadata.get::<Trail>().cloned().unwrap();
    assert_eq!(trail, Trail(vec!["first".into(), "second".into()]));
}

#[tokio::test]
async fn test_udp_with_invalid_host_is_not_available() {
    let registry = registry();
    let channel = DataPipelineBuilder::new("udp-bad")
        .outer(Arc::new(UdpCore::new(UdpConfig::new("not-an-ip", 0))))
        .register(&registry)
        .unwrap();

    let result = channel.pipeline().init(&CancellationToken::new()).await;
    assert!(matches!(result, Err(ChannelError::InitFailed { .. })));
    assert!(channel.pipeline().is_not_available());
    assert!(!channel.pipeline().is_initialized());
    assert_eq!(channel.pipeline().exceptions().len(), 1);

    let report = registry.init_all(&CancellationToken::new()).await;
    assert_eq!(report.failed.len(), 1);
    assert!(report.succeeded.is_empty());
}

#[tokio::test]
async fn test_delivery_to_input_only_endpoint_is_rejected() {
    let registry = registry();
    let inner = Arc::new(DefaultCore::new());
    let outer = Arc::new(RecordingCore::new("ingest").with_direction(ConnectionDirection::Input));
    let channel = DataPipelineBuilder::new("ingest")
        .inner(inner.clone())
        .outer(outer.clone())
        .register(&registry)
        .unwrap();
    channel.pipeline().init(&CancellationToken::new()).await.unwrap();

    let err = inner.send("nope").await.unwrap_err();
    assert!(matches!(err, ChannelError::DirectionNotSupported { .. }));
    assert!(outer.received().is_empty());
    assert!(channel.pipeline().has_exceptions());
}

#[tokio::test]
async fn test_duplicate_ids_are_rejected() {
    let registry = registry();
    DataPipelineBuilder::new("dup")
        .outer(Arc::new(DefaultCore::new()))
        .register(&registry)
        .unwrap();
    let err = DataPipelineBuilder::new("dup")
        .outer(Arc::new(DefaultCore::new()))
        .register(&registry)
        .unwrap_err();
    assert!(matches!(err, ChannelError::DuplicateChannel(_)));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_re_initialize_unknown_channel_has_no_side_effects() {
    let registry = registry();
    let outer = Arc::new(RecordingCore::new("outer"));
    DataPipelineBuilder::new("known")
        .outer(outer.clone())
        .register(&registry)
        .unwrap();

    for _ in 0..2 {
        let err = registry.re_initialize("unknown").await.unwrap_err();
        assert!(err.is_not_found());
    }
    assert!(outer.events().is_empty());
    assert_eq!(registry.ids(), vec!["known"]);
}
