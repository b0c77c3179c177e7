//! HTTP management and webhook server

use crate::error::{HostError, Result};
use crate::service::{ApiResponse, ManagementService};
use bytes::Bytes;
use channel::{RouteTable, WebhookRequest};
use serde::Deserialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::{Filter, Reply};

const DEFAULT_EXCEPTION_COUNT: usize = 10;

#[derive(Debug, Deserialize)]
struct ExceptionsQuery {
    count: Option<usize>,
}

/// Serves the management API and every registered webhook route
#[derive(Debug, Clone)]
pub struct ManagementServer {
    service: ManagementService,
    routes: Arc<RouteTable>,
}

impl ManagementServer {
    pub fn new(service: ManagementService, routes: Arc<RouteTable>) -> Self {
        Self { service, routes }
    }

    /// Complete filter tree
    pub fn filter(
        &self,
    ) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
        let service = self.service.clone();
        let with_service = warp::any().map(move || service.clone());
        let routes = self.routes.clone();
        let with_routes = warp::any().map(move || routes.clone());

        let re_init = warp::get()
            .and(warp::path!("channel" / String / "re-init"))
            .and(with_service.clone())
            .and_then(handle_re_init);

        let channels = warp::get()
            .and(warp::path!("channels"))
            .and(with_service.clone())
            .and_then(handle_channels);

        let exceptions = warp::get()
            .and(warp::path!("channel" / String / "exceptions"))
            .and(warp::query::<ExceptionsQuery>())
            .and(with_service.clone())
            .and_then(handle_exceptions);

        let summary = warp::get()
            .and(warp::path!("channels" / "exceptions" / "summary"))
            .and(with_service.clone())
            .and_then(handle_exceptions_summary);

        let clear = warp::delete()
            .and(warp::path!("channel" / String / "exceptions"))
            .and(with_service)
            .and_then(handle_clear_exceptions);

        let health = warp::get()
            .and(warp::path!("health"))
            .map(|| warp::reply::with_status("OK", StatusCode::OK));

        let webhook = warp::post()
            .and(warp::path::full())
            .and(warp::header::optional::<String>("content-type"))
            .and(warp::body::bytes())
            .and(with_routes)
            .and_then(handle_webhook);

        re_init
            .or(channels)
            .or(exceptions)
            .or(summary)
            .or(clear)
            .or(health)
            .or(webhook)
            .with(warp::trace::request())
    }

    /// Bind and serve until `shutdown` resolves
    ///
    /// Returns the bound address, which differs from `addr` for port 0.
    pub fn spawn(
        &self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let (bound, server) = warp::serve(self.filter())
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .map_err(|e| HostError::configuration(format!("Failed to bind {addr}: {e}")))?;
        info!(address = %bound, routes = self.routes.len(), "Management server listening");
        Ok((bound, tokio::spawn(server)))
    }
}

fn reply(result: Result<ApiResponse>) -> warp::reply::Response {
    match result {
        Ok(body) => warp::reply::with_status(warp::reply::json(&body), StatusCode::OK).into_response(),
        Err(e) => {
            let status = e.status();
            warn!(status = status.as_u16(), error = %e, "Management request failed");
            warp::reply::with_status(warp::reply::json(&ApiResponse::fail(e.to_string())), status)
                .into_response()
        }
    }
}

async fn handle_re_init(
    id: String,
    service: ManagementService,
) -> std::result::Result<warp::reply::Response, Infallible> {
    Ok(reply(service.re_initialize(&id).await))
}

async fn handle_channels(
    service: ManagementService,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let channels = service.channels();
    Ok(reply(Ok(ApiResponse::ok_with(
        format!("{} channels", channels.len()),
        &channels,
    ))))
}

async fn handle_exceptions(
    id: String,
    query: ExceptionsQuery,
    service: ManagementService,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let count = query.count.unwrap_or(DEFAULT_EXCEPTION_COUNT);
    Ok(reply(service.exceptions(&id, count).map(|exceptions| {
        ApiResponse::ok_with(format!("Exceptions of channel {id}"), &exceptions)
    })))
}

async fn handle_exceptions_summary(
    service: ManagementService,
) -> std::result::Result<warp::reply::Response, Infallible> {
    Ok(reply(Ok(ApiResponse::ok_with(
        "Exception summary",
        &service.exceptions_overview(),
    ))))
}

async fn handle_clear_exceptions(
    id: String,
    service: ManagementService,
) -> std::result::Result<warp::reply::Response, Infallible> {
    Ok(reply(
        service
            .clear_exceptions(&id)
            .map(|_| ApiResponse::ok(format!("Exceptions of channel {id} cleared"))),
    ))
}

async fn handle_webhook(
    path: warp::path::FullPath,
    content_type: Option<String>,
    body: Bytes,
    routes: Arc<RouteTable>,
) -> std::result::Result<warp::reply::Response, Infallible> {
    let mut request = WebhookRequest::new(path.as_str(), body);
    if let Some(content_type) = content_type {
        request = request.with_content_type(content_type);
    }
    let response = match routes.dispatch(request).await {
        Some(result) => reply(
            result
                .map(|_| ApiResponse::ok("Accepted"))
                .map_err(HostError::from),
        ),
        None => warp::reply::with_status(
            warp::reply::json(&ApiResponse::fail(format!(
                "No webhook route for {}",
                path.as_str()
            ))),
            StatusCode::NOT_FOUND,
        )
        .into_response(),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel::testing::RecordingCore;
    use channel::{ChannelRegistry, ChannelSettings, DataPipelineBuilder, DefaultCore};
    use network::{BindingConfig, BindingCore};
    use tokio_util::sync::CancellationToken;

    fn registry_with(outer: Arc<RecordingCore>) -> Arc<ChannelRegistry> {
        let registry = Arc::new(ChannelRegistry::with_settings(ChannelSettings::default()));
        DataPipelineBuilder::new("alpha")
            .outer(outer)
            .register(&registry)
            .unwrap();
        registry
    }

    fn server(registry: Arc<ChannelRegistry>, routes: RouteTable) -> ManagementServer {
        ManagementServer::new(ManagementService::new(registry), Arc::new(routes))
    }

    fn body(res: &warp::http::Response<Bytes>) -> serde_json::Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let outer = Arc::new(RecordingCore::new("outer"));
        let filter = server(registry_with(outer), RouteTable::new()).filter();
        let res = warp::test::request().path("/health").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"OK");
    }

    #[tokio::test]
    async fn test_re_init_unknown_channel_twice() {
        let outer = Arc::new(RecordingCore::new("outer"));
        let filter = server(registry_with(outer.clone()), RouteTable::new()).filter();

        for _ in 0..2 {
            let res = warp::test::request()
                .path("/channel/missing/re-init")
                .reply(&filter)
                .await;
            assert_eq!(res.status(), StatusCode::NOT_FOUND);
            assert_eq!(body(&res)["code"], "fail");
        }
        assert!(outer.events().is_empty());
    }

    #[tokio::test]
    async fn test_re_init_and_list() {
        let outer = Arc::new(RecordingCore::new("outer"));
        let filter = server(registry_with(outer.clone()), RouteTable::new()).filter();

        let res = warp::test::request()
            .path("/channel/alpha/re-init")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["code"], "ok");
        assert_eq!(outer.init_count(), 1);

        let res = warp::test::request().path("/channels").reply(&filter).await;
        let json = body(&res);
        assert_eq!(json["data"][0]["id"], "alpha");
        assert_eq!(json["data"][0]["is_initialized"], true);
        assert_eq!(json["data"][0]["outer_endpoint"]["name"], "RecordingCore");
    }

    #[tokio::test]
    async fn test_exception_endpoints() {
        let outer = Arc::new(RecordingCore::new("outer").failing_init());
        let filter = server(registry_with(outer), RouteTable::new()).filter();

        let res = warp::test::request()
            .path("/channel/alpha/re-init")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let res = warp::test::request()
            .path("/channel/alpha/exceptions?count=5")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let json = body(&res);
        assert_eq!(json["data"]["summary"]["count"], 1);
        assert_eq!(json["data"]["exceptions"][0]["source_type"], "endpoint");

        let res = warp::test::request()
            .path("/channels/exceptions/summary")
            .reply(&filter)
            .await;
        assert_eq!(body(&res)["data"]["channels_with_exceptions"], 1);

        let res = warp::test::request()
            .method("DELETE")
            .path("/channel/alpha/exceptions")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = warp::test::request()
            .path("/channel/missing/exceptions")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_dispatch() {
        let registry = Arc::new(ChannelRegistry::with_settings(ChannelSettings::default()));
        let (inner, mut rx) = DefaultCore::with_channel();
        registry.add_builder(
            DataPipelineBuilder::new("orders")
                .inner(Arc::new(inner))
                .outer(Arc::new(BindingCore::new(BindingConfig::new("orders")))),
        );
        let mut routes = RouteTable::new();
        registry.start_build(&mut routes).unwrap();
        let filter = server(registry.clone(), routes).filter();

        let res = warp::test::request()
            .method("POST")
            .path("/orders")
            .header("content-type", "application/json")
            .body(r#"{"id":7}"#)
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        registry.init_all(&CancellationToken::new()).await;
        let res = warp::test::request()
            .method("POST")
            .path("/orders")
            .header("content-type", "application/json")
            .body(r#"{"id":7}"#)
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.data().as_object(), Some(&serde_json::json!({ "id": 7 })));

        let res = warp::test::request()
            .method("POST")
            .path("/unknown")
            .body("x")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
