//! HTTP management surface of a running host

use channel_host::{ChannelHost, HostConfig};
use e2e_tests::init_test_tracing;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
    sequential_init = true
    init_delay_ms = 0

    [[channels]]
    id = "telemetry"
    group_id = "sensors"
    middlewares = [{ type = "message_counter" }]

    [channels.outer]
    type = "udp"
    host = "127.0.0.1"
    port = 0

    [[channels]]
    id = "broken"

    [channels.outer]
    type = "udp"
    host = "not-an-ip"
    port = 0

    [[channels]]
    id = "orders"

    [channels.outer]
    type = "binding"
    binding_name = "orders"
"#;

struct RunningHost {
    host: ChannelHost,
    base: String,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl RunningHost {
    async fn start() -> Self {
        init_test_tracing();
        let host = ChannelHost::build(HostConfig::from_toml(CONFIG).unwrap()).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let (addr, server) = host
            .server()
            .spawn("127.0.0.1:0".parse().unwrap(), async move {
                let _ = rx.await;
            })
            .unwrap();
        host.initialize(&CancellationToken::new()).await;
        Self {
            host,
            base: format!("http://{addr}"),
            shutdown: Some(tx),
            server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.server).await;
        self.host.registry().dispose_all().await;
    }
}

#[tokio::test]
async fn test_health_and_listing() {
    let running = RunningHost::start().await;
    let client = reqwest::Client::new();

    let health = client.get(running.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "OK");

    let body: serde_json::Value = client
        .get(running.url("/channels"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["code"], "ok");
    let channels = body["data"].as_array().unwrap();
    assert_eq!(channels.len(), 3);
    assert_eq!(channels[0]["id"], "telemetry");
    assert_eq!(channels[0]["group_id"], "sensors");
    assert_eq!(channels[0]["is_initialized"], true);
    assert_eq!(channels[0]["middlewares"][0]["name"], "MessageCounter");
    assert_eq!(channels[1]["is_not_available"], true);
    assert_eq!(channels[1]["has_exceptions"], true);

    running.stop().await;
}

#[tokio::test]
async fn test_re_init_unknown_channel_twice_is_not_found() {
    let running = RunningHost::start().await;
    let client = reqwest::Client::new();
    let before = running.host.registry().ids();

    for _ in 0..2 {
        let res = client
            .get(running.url("/channel/does-not-exist/re-init"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["code"], "fail");
    }

    assert_eq!(running.host.registry().ids(), before);
    let telemetry = running.host.registry().fetch("telemetry").unwrap();
    assert!(telemetry.pipeline().is_initialized());
    assert!(!telemetry.pipeline().has_exceptions());

    running.stop().await;
}

#[tokio::test]
async fn test_exceptions_lifecycle() {
    let running = RunningHost::start().await;
    let client = reqwest::Client::new();

    let res = client
        .get(running.url("/channel/broken/re-init"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: serde_json::Value = client
        .get(running.url("/channel/broken/exceptions?count=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["summary"]["count"], 2);
    assert_eq!(body["data"]["exceptions"].as_array().unwrap().len(), 1);

    let summary: serde_json::Value = client
        .get(running.url("/channels/exceptions/summary"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["data"]["channels_with_exceptions"], 1);

    let cleared = client
        .delete(running.url("/channel/broken/exceptions"))
        .send()
        .await
        .unwrap();
    assert_eq!(cleared.status(), StatusCode::OK);
    let broken = running.host.registry().fetch("broken").unwrap();
    assert!(!broken.pipeline().has_exceptions());
    assert_eq!(broken.pipeline().exceptions().total_count(), 2);

    running.stop().await;
}

#[tokio::test]
async fn test_webhook_reaches_inner_endpoint() {
    let running = RunningHost::start().await;
    let client = reqwest::Client::new();
    let orders = running.host.registry().fetch("orders").unwrap();
    assert!(orders.pipeline().is_initialized());

    let res = client
        .post(running.url("/orders"))
        .json(&serde_json::json!({ "order": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let missing = client
        .post(running.url("/nowhere"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    assert!(!orders.pipeline().has_exceptions());

    running.stop().await;
}
