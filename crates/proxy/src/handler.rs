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

//! The invoke path: JSON body in, dynamic unary call over the balanced
//! channel, JSON reply out.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::uri::PathAndQuery;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use tonic::transport::Channel;
use tracing::debug;

use crate::{
    codec::DynamicCodec,
    descriptor::ReflectionSource,
    error::{ApiError, ApiResult, DescriptorSnafu, FormatReplySnafu, InvalidBodySnafu},
};

/// Shared gateway state: the balanced upstream channel and the cached
/// reflection descriptor source on top of it.
#[derive(Clone)]
pub struct ProxyState {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    channel: Channel,
    descriptors: ReflectionSource,
}

impl ProxyState {
    pub fn new(channel: Channel) -> Self {
        let descriptors = ReflectionSource::new(channel.clone());
        Self {
            inner: Arc::new(ProxyInner {
                channel,
                descriptors,
            }),
        }
    }

    pub fn descriptors(&self) -> &ReflectionSource {
        &self.inner.descriptors
    }

    /// Invoke `symbol` (`package.Service/Method`) with a JSON request body,
    /// returning the JSON-encoded reply.
    pub async fn call(&self, symbol: &str, body: &[u8]) -> ApiResult<Vec<u8>> {
        let method = self.inner.descriptors.method(symbol).await?;
        let request = parse_request(&method, body)?;

        let path = PathAndQuery::try_from(format!("/{symbol}")).map_err(|e| {
            DescriptorSnafu {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            }
            .build()
        })?;

        let mut grpc = tonic::client::Grpc::new(self.inner.channel.clone());
        grpc.ready().await.map_err(|e| ApiError::Upstream {
            code: tonic::Code::Unavailable,
            message: e.to_string(),
        })?;

        let response = grpc
            .unary(
                tonic::Request::new(request),
                path,
                DynamicCodec::new(method.output()),
            )
            .await
            .map_err(|status| ApiError::Upstream {
                code: status.code(),
                message: status.message().to_string(),
            })?;

        format_reply(&response.into_inner())
    }
}

/// Parse a JSON request body into a dynamic message for the method's input
/// type. Unknown fields and trailing garbage are rejected.
pub(crate) fn parse_request(method: &MethodDescriptor, body: &[u8]) -> ApiResult<DynamicMessage> {
    let mut deserializer = serde_json::Deserializer::from_slice(body);
    let request =
        DynamicMessage::deserialize(method.input(), &mut deserializer).map_err(|e| {
            InvalidBodySnafu {
                reason: e.to_string(),
            }
            .build()
        })?;
    deserializer.end().map_err(|e| {
        InvalidBodySnafu {
            reason: e.to_string(),
        }
        .build()
    })?;
    Ok(request)
}

/// Serialize a reply message using the proto3 JSON mapping.
pub(crate) fn format_reply(reply: &DynamicMessage) -> ApiResult<Vec<u8>> {
    serde_json::to_vec(reply).map_err(|e| {
        FormatReplySnafu {
            reason: e.to_string(),
        }
        .build()
    })
}

/// `POST /<api-root>/<package.Service>/<Method>` with a JSON body.
pub(crate) async fn invoke(
    State(state): State<ProxyState>,
    Path((service, method)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let symbol = format!("{service}/{method}");
    debug!(%symbol, "proxying request");

    let reply = state.call(&symbol, &body).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        reply,
    )
        .into_response())
}
