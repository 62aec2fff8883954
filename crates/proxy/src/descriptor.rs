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

//! Descriptor source backed by gRPC server reflection.
//!
//! Descriptors fetched over the wire are cached in a [`DescriptorPool`];
//! a symbol is only fetched again when the pool cannot answer for it. The
//! reflection server returns each file together with its transitive
//! dependencies, unordered, so insertion retries until the closure settles.

use prost::Message as _;
use prost_reflect::{DescriptorPool, MethodDescriptor, ServiceDescriptor};
use prost_types::FileDescriptorProto;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, server_reflection_client::ServerReflectionClient,
    server_reflection_request::MessageRequest, server_reflection_response::MessageResponse,
};
use tracing::debug;

use crate::error::{ApiError, ApiResult, DescriptorSnafu, UnknownMethodSnafu};

pub struct ReflectionSource {
    client: ServerReflectionClient<Channel>,
    pool: Mutex<DescriptorPool>,
}

impl ReflectionSource {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: ServerReflectionClient::new(channel),
            pool: Mutex::new(DescriptorPool::new()),
        }
    }

    /// Resolve `symbol` of the form `package.Service/Method` to its method
    /// descriptor, fetching the owning file from the server when the cache
    /// cannot answer.
    pub async fn method(&self, symbol: &str) -> ApiResult<MethodDescriptor> {
        let (service, method) = symbol
            .rsplit_once('/')
            .ok_or_else(|| {
                UnknownMethodSnafu {
                    symbol: symbol.to_string(),
                }
                .build()
            })?;

        if let Some(found) = Self::find_method(&*self.pool.lock().await, service, method) {
            return Ok(found);
        }

        self.fetch_file_for_symbol(service).await?;

        Self::find_method(&*self.pool.lock().await, service, method).ok_or_else(|| {
            UnknownMethodSnafu {
                symbol: symbol.to_string(),
            }
            .build()
        })
    }

    /// Resolve a fully-qualified service name, fetching it when needed.
    pub async fn service(&self, name: &str) -> ApiResult<ServiceDescriptor> {
        if let Some(found) = self.pool.lock().await.get_service_by_name(name) {
            return Ok(found);
        }

        self.fetch_file_for_symbol(name).await?;

        self.pool
            .lock()
            .await
            .get_service_by_name(name)
            .ok_or_else(|| {
                UnknownMethodSnafu {
                    symbol: name.to_string(),
                }
                .build()
            })
    }

    /// Names of every service the server exposes, as reported by the
    /// reflection list-services call.
    pub async fn list_service_names(&self) -> ApiResult<Vec<String>> {
        let responses = self
            .call(MessageRequest::ListServices(String::new()), "*")
            .await?;

        let mut names = Vec::new();
        for response in responses {
            if let MessageResponse::ListServicesResponse(list) = response {
                names.extend(list.service.into_iter().map(|s| s.name));
            }
        }
        Ok(names)
    }

    /// Drop every cached descriptor. Performed on gateway shutdown.
    pub async fn reset(&self) {
        *self.pool.lock().await = DescriptorPool::new();
    }

    fn find_method(
        pool: &DescriptorPool,
        service: &str,
        method: &str,
    ) -> Option<MethodDescriptor> {
        pool.get_service_by_name(service)?
            .methods()
            .find(|m| m.name() == method)
    }

    async fn fetch_file_for_symbol(&self, symbol: &str) -> ApiResult<()> {
        let responses = self
            .call(
                MessageRequest::FileContainingSymbol(symbol.to_string()),
                symbol,
            )
            .await?;

        let mut files = Vec::new();
        for response in responses {
            if let MessageResponse::FileDescriptorResponse(descriptors) = response {
                files.extend(descriptors.file_descriptor_proto);
            }
        }

        let mut pool = self.pool.lock().await;
        add_files(&mut pool, symbol, files)
    }

    async fn call(
        &self,
        request: MessageRequest,
        symbol: &str,
    ) -> ApiResult<Vec<MessageResponse>> {
        let request = ServerReflectionRequest {
            host: String::new(),
            message_request: Some(request),
        };

        let mut client = self.client.clone();
        let mut stream = client
            .server_reflection_info(tokio_stream::once(request))
            .await
            .map_err(|status| ApiError::Upstream {
                code: status.code(),
                message: status.message().to_string(),
            })?
            .into_inner();

        let mut responses = Vec::new();
        while let Some(response) = stream.message().await.map_err(|status| ApiError::Upstream {
            code: status.code(),
            message: status.message().to_string(),
        })? {
            match response.message_response {
                Some(MessageResponse::ErrorResponse(error)) => {
                    return Err(ApiError::Upstream {
                        code: tonic::Code::from_i32(error.error_code),
                        message: error.error_message,
                    });
                }
                Some(message) => responses.push(message),
                None => {
                    debug!(%symbol, "empty reflection response message");
                }
            }
        }
        Ok(responses)
    }
}

/// Insert a batch of encoded file descriptors into the pool. The batch may
/// arrive in any order; files whose dependencies are not in the pool yet are
/// retried until the batch stops shrinking.
fn add_files(pool: &mut DescriptorPool, symbol: &str, files: Vec<Vec<u8>>) -> ApiResult<()> {
    let mut pending = Vec::with_capacity(files.len());
    for encoded in &files {
        let file = FileDescriptorProto::decode(&encoded[..]).map_err(|e| {
            DescriptorSnafu {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            }
            .build()
        })?;
        if pool.get_file_by_name(file.name()).is_none() {
            pending.push(file);
        }
    }

    while !pending.is_empty() {
        let before = pending.len();
        let mut last_error = None;

        pending.retain(|file| match pool.add_file_descriptor_proto(file.clone()) {
            Ok(_) => false,
            Err(error) => {
                last_error = Some(error.to_string());
                true
            }
        });

        if pending.len() == before {
            return Err(DescriptorSnafu {
                symbol: symbol.to_string(),
                reason: last_error.unwrap_or_else(|| "unsatisfiable dependencies".to_string()),
            }
            .build());
        }
    }
    Ok(())
}
