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

use std::sync::Arc;

use async_trait::async_trait;
use beacon_api::pb::apis::{
    JoinReply, JoinRequest, SayHelloReply, SayHelloRequest, greeter_server,
};
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tonic_health::server::HealthReporter;
use uuid::Uuid;

use crate::grpc::GrpcServiceHandler;

/// The demo service advertised through the registry.
#[derive(Default)]
pub struct GreeterService;

#[async_trait]
impl greeter_server::Greeter for GreeterService {
    async fn say_hello(
        &self,
        request: tonic::Request<SayHelloRequest>,
    ) -> std::result::Result<tonic::Response<SayHelloReply>, tonic::Status> {
        let name = request.into_inner().name;
        Ok(tonic::Response::new(SayHelloReply {
            message: format!("Hello, {name}"),
        }))
    }

    async fn join(
        &self,
        _request: tonic::Request<JoinRequest>,
    ) -> std::result::Result<tonic::Response<JoinReply>, tonic::Status> {
        Ok(tonic::Response::new(JoinReply {
            id: Uuid::new_v4().to_string(),
        }))
    }
}

#[async_trait]
impl GrpcServiceHandler for GreeterService {
    fn service_name(&self) -> &'static str {
        "Greeter"
    }

    fn file_descriptor_set(&self) -> &'static [u8] {
        beacon_api::pb::GRPC_DESC
    }

    fn register_service(self: &Arc<Self>, builder: &mut RoutesBuilder) {
        builder.add_service(greeter_server::GreeterServer::from_arc(self.clone()));
    }

    async fn readiness_reporting(
        self: &Arc<Self>,
        _cancellation_token: CancellationToken,
        reporter: HealthReporter,
    ) {
        let mut reporter = reporter;
        reporter
            .set_serving::<greeter_server::GreeterServer<GreeterService>>()
            .await;
    }
}
