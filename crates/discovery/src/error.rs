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

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to connect to etcd at {endpoints:?}"))]
    Connect {
        endpoints: Vec<String>,
        #[snafu(source)]
        source: etcd_client::Error,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("etcd request failed for key {key}"))]
    Kv {
        key: String,
        #[snafu(source)]
        source: etcd_client::Error,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Failed to grant lease with ttl {ttl}s"))]
    LeaseGrant {
        ttl: i64,
        #[snafu(source)]
        source: etcd_client::Error,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Failed to start keepalive for lease {lease_id}"))]
    LeaseKeepAlive {
        lease_id: i64,
        #[snafu(source)]
        source: etcd_client::Error,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Failed to open watch on {prefix}"))]
    Watch {
        prefix: String,
        #[snafu(source)]
        source: etcd_client::Error,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Failed to encode service record {id}"))]
    EncodeRecord {
        id: String,
        #[snafu(source)]
        source: serde_json::Error,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Invalid service record: {reason}"))]
    InvalidRecord {
        reason: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Service was never registered"))]
    NotRegistered {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Invalid dial target {target}: {reason}"))]
    InvalidTarget {
        target: String,
        reason: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}
