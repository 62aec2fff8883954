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

//! The service record stored under each registry key, and its canonical
//! JSON encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{EncodeRecordSnafu, Result};

/// One advertised network destination.
///
/// Identity is `(ip, port)`; the remaining fields are informational.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: String,
    pub protocol: String,
    pub version: String,
    /// Ordered so the encoding stays canonical.
    pub metadata: BTreeMap<String, String>,
}

impl Endpoint {
    /// The dialable `ip:port` form used as the deduplication key.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// One instance advertisement, serialized as JSON under
/// `/<prefix>/<name>/<id>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

impl ServiceRecord {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context(EncodeRecordSnafu {
            id: self.id.clone(),
        })
    }

    pub fn decode(value: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(value)
    }

    /// Flatten the endpoints into `ip:port` strings, keeping each unique
    /// address once in first-seen order.
    pub fn addresses(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for endpoint in &self.endpoints {
            let address = endpoint.address();
            if !seen.contains(&address) {
                seen.push(address);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServiceRecord {
        ServiceRecord {
            id: "a".to_string(),
            name: "my-service".to_string(),
            endpoints: vec![Endpoint {
                ip: "10.0.0.1".to_string(),
                port: "7001".to_string(),
                protocol: "GRPC".to_string(),
                version: "v1.0.0".to_string(),
                metadata: BTreeMap::from([("role".to_string(), "service".to_string())]),
            }],
        }
    }

    #[test]
    fn stable_field_names() {
        let encoded = sample().encode().unwrap();
        assert_eq!(
            encoded,
            r#"{"id":"a","name":"my-service","endpoints":[{"ip":"10.0.0.1","port":"7001","protocol":"GRPC","version":"v1.0.0","metadata":{"role":"service"}}]}"#
        );
    }

    #[test]
    fn encode_decode_encode_is_identity() {
        let encoded = sample().encode().unwrap();
        let decoded = ServiceRecord::decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, sample());
        assert_eq!(decoded.encode().unwrap(), encoded);
    }

    #[test]
    fn addresses_deduplicate_within_a_record() {
        let mut record = sample();
        record.endpoints.push(record.endpoints[0].clone());
        record.endpoints.push(Endpoint {
            ip: "10.0.0.2".to_string(),
            port: "7001".to_string(),
            ..Endpoint::default()
        });
        assert_eq!(record.addresses(), vec!["10.0.0.1:7001", "10.0.0.2:7001"]);
    }

    #[test]
    fn empty_endpoints_contribute_nothing() {
        let record = ServiceRecord {
            id: "a".to_string(),
            name: "my-service".to_string(),
            endpoints: vec![],
        };
        assert!(record.addresses().is_empty());
        let decoded = ServiceRecord::decode(record.encode().unwrap().as_bytes()).unwrap();
        assert!(decoded.endpoints.is_empty());
    }
}
