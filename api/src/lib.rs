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

//! Generated protobuf/gRPC stubs for the beacon demo services.

pub mod pb {
    #[allow(clippy::all, clippy::pedantic, clippy::nursery)]
    pub mod apis {
        tonic::include_proto!("apis");
    }

    /// Encoded file descriptor set for the `apis` package, served through
    /// gRPC server reflection.
    pub const GRPC_DESC: &[u8] = tonic::include_file_descriptor_set!("apis_descriptor");
}
