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

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Default key namespace for service records.
pub const DEFAULT_PREFIX: &str = "services";

/// Configuration for the etcd-backed discovery runtime.
///
/// The lease TTL must stay above twice the re-assert interval so a dropped
/// keepalive is always re-established before the record can expire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// etcd endpoints to dial.
    #[default(_code = "vec![\"localhost:2379\".to_string()]")]
    pub endpoints: Vec<String>,
    /// Key namespace under which service records live.
    #[default(_code = "DEFAULT_PREFIX.to_string()")]
    pub prefix: String,
    /// Timeout for establishing the etcd connection.
    #[default = 5]
    pub dial_timeout_secs: u64,
    /// TTL granted to each registration lease.
    #[default = 30]
    pub lease_ttl_secs: i64,
    /// Interval at which the registrar probes for its own key.
    #[default = 15]
    pub reassert_interval_secs: u64,
    /// Pause before re-establishing a failed watch.
    #[default = 5]
    pub watch_backoff_secs: u64,
}

impl DiscoveryConfig {
    /// Split a semicolon-separated endpoint list as supplied on the CLI.
    pub fn parse_endpoints(addr: &str) -> Vec<String> {
        addr.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    /// Key prefix covering every instance of a service:
    /// `/<prefix>/<service-name>`.
    pub fn service_prefix(&self, service_name: &str) -> String {
        format!("/{}/{}", self.prefix, service_name)
    }

    /// Full key of one instance record:
    /// `/<prefix>/<service-name>/<instance-id>`.
    pub fn service_path(&self, service_name: &str, instance_id: &str) -> String {
        format!("/{}/{}/{}", self.prefix, service_name, instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_lease_ahead_of_probe() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.prefix, "services");
        assert!(config.lease_ttl_secs >= 2 * config.reassert_interval_secs as i64);
    }

    #[test]
    fn parse_endpoints_splits_on_semicolons() {
        assert_eq!(
            DiscoveryConfig::parse_endpoints("a:2379;b:2379; c:2379 ;"),
            vec!["a:2379", "b:2379", "c:2379"]
        );
    }

    #[test]
    fn key_layout() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.service_prefix("my-service"), "/services/my-service");
        assert_eq!(
            config.service_path("my-service", "a"),
            "/services/my-service/a"
        );
    }
}
