// Copyright 2026 beacon authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The reflective HTTP→gRPC gateway.
//!
//! Accepts `POST /<api-root>/<package.Service>/<Method>` with a JSON body,
//! resolves the method through server reflection over the load-balanced
//! upstream channel, invokes it dynamically and writes the JSON reply.
//! Paths not matching the pattern fall through to a 404.

pub mod codec;
pub mod descriptor;
pub mod error;
mod handler;

use axum::{Router, extract::DefaultBodyLimit, routing::post};
use beacon_server::{BindSnafu, ParseAddressSnafu, Result, ServiceHandler};
pub use handler::ProxyState;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Default maximum HTTP request body size (100 MB)
pub const DEFAULT_MAX_HTTP_BODY_SIZE: usize = 100 * 1024 * 1024;

/// Configuration options for the gateway's HTTP listener.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
pub struct ProxyServerConfig {
    /// The address to bind the HTTP server
    #[default = "0.0.0.0:3000"]
    pub bind_address: String,
    /// First path segment under which methods are exposed
    #[default = "api"]
    pub api_root: String,
    /// Maximum HTTP request body size in bytes
    #[default(DEFAULT_MAX_HTTP_BODY_SIZE)]
    pub max_body_size: usize,
    /// Whether to enable CORS
    #[default = true]
    pub enable_cors: bool,
}

/// Build the gateway router for the given api root.
pub fn proxy_routes(config: &ProxyServerConfig, state: ProxyState) -> Router {
    Router::new()
        .route(
            &format!("/{}/{{service}}/{{method}}", config.api_root),
            post(handler::invoke),
        )
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .with_state(state)
}

/// Starts the gateway HTTP server and returns a handle for managing its
/// lifecycle. The reflection descriptor cache is reset once the listener
/// has shut down.
///
/// # Errors
/// Returns an error if the bind address cannot be parsed.
pub async fn start_proxy_server(
    config: ProxyServerConfig,
    state: ProxyState,
) -> Result<ServiceHandler> {
    let bind_addr = config
        .bind_address
        .parse::<std::net::SocketAddr>()
        .context(ParseAddressSnafu {
            addr: config.bind_address.clone(),
        })?;

    let mut router = proxy_routes(&config, state.clone());
    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    // Bind before spawning so an unusable listen address is fatal at
    // startup instead of a dead background task.
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context(BindSnafu {
            addr: config.bind_address.clone(),
        })?;

    let cancellation_token = CancellationToken::new();
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let cancellation_token_clone = cancellation_token.clone();

    let join_handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                info!("gateway (on {}) starting", bind_addr);
                let _ = started_tx.send(());
                info!("gateway (on {}) started", bind_addr);
                cancellation_token_clone.cancelled().await;
                info!("gateway (on {}) received shutdown signal", bind_addr);
            })
            .await;

        state.descriptors().reset().await;
        info!("gateway (on {}) task completed: {:?}", bind_addr, result);
    });

    Ok(ServiceHandler::new(
        join_handle,
        cancellation_token,
        started_rx,
        Vec::new(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use beacon_server::grpc::{GrpcServerConfig, greeter::GreeterService, start_grpc_server};
    use tonic::transport::Channel;

    use super::*;

    async fn get_available_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn proxies_json_to_grpc_and_back() {
        let grpc_port = get_available_port().await;
        let grpc_config = GrpcServerConfig {
            bind_address: format!("127.0.0.1:{grpc_port}"),
            server_address: format!("127.0.0.1:{grpc_port}"),
        };
        let mut grpc = start_grpc_server(grpc_config, vec![Arc::new(GreeterService)])
            .await
            .unwrap();
        grpc.wait_for_start().await.unwrap();

        let channel = Channel::from_shared(format!("http://127.0.0.1:{grpc_port}"))
            .unwrap()
            .connect_lazy();

        let http_port = get_available_port().await;
        let config = ProxyServerConfig {
            bind_address: format!("127.0.0.1:{http_port}"),
            ..ProxyServerConfig::default()
        };
        let mut proxy = start_proxy_server(config, ProxyState::new(channel))
            .await
            .unwrap();
        proxy.wait_for_start().await.unwrap();

        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{http_port}");

        // The happy path: JSON in, JSON out.
        let response = client
            .post(format!("{base}/api/apis.Greeter/SayHello"))
            .body(r#"{"name":"World"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Hello, World");

        // Unknown method inside a known service.
        let response = client
            .post(format!("{base}/api/apis.Greeter/Nope"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        // Malformed body surfaces as a client error, not a process failure.
        let response = client
            .post(format!("{base}/api/apis.Greeter/SayHello"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        // Paths outside the api root fall through to 404.
        let response = client
            .post(format!("{base}/other/apis.Greeter/SayHello"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        proxy.shutdown();
        proxy.wait_for_stop().await.unwrap();
        grpc.shutdown();
        grpc.wait_for_stop().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        // The limit is enforced before the handler runs, so a dead upstream
        // is fine here.
        let channel = Channel::from_shared("http://127.0.0.1:1".to_string())
            .unwrap()
            .connect_lazy();

        let http_port = get_available_port().await;
        let config = ProxyServerConfig {
            bind_address: format!("127.0.0.1:{http_port}"),
            max_body_size: 64,
            ..ProxyServerConfig::default()
        };
        let mut proxy = start_proxy_server(config, ProxyState::new(channel))
            .await
            .unwrap();
        proxy.wait_for_start().await.unwrap();

        let client = reqwest::Client::new();
        let response = client
            .post(format!(
                "http://127.0.0.1:{http_port}/api/apis.Greeter/SayHello"
            ))
            .body(format!(r#"{{"name":"{}"}}"#, "x".repeat(1024)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 413);

        proxy.shutdown();
        proxy.wait_for_stop().await.unwrap();
    }
}
