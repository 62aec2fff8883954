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

//! Thin facade over the etcd client. This is the only module that names the
//! coordination store; everything above it speaks keys, records and leases.
//!
//! `etcd_client::Client` wraps an inner `Arc`, so each operation clones it
//! cheaply.

use std::time::Duration;

use etcd_client::{
    Client, ConnectOptions, GetOptions, PutOptions, WatchOptions, WatchStream, Watcher,
};
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    config::DiscoveryConfig,
    error::{ConnectSnafu, KvSnafu, LeaseGrantSnafu, LeaseKeepAliveSnafu, Result, WatchSnafu},
    record::ServiceRecord,
};

#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    config: DiscoveryConfig,
}

impl EtcdStore {
    /// Connect to etcd with the configured dial timeout. Connect failure is
    /// fatal to the hosting component.
    pub async fn connect(config: DiscoveryConfig) -> Result<Self> {
        let options = ConnectOptions::new()
            .with_connect_timeout(Duration::from_secs(config.dial_timeout_secs));
        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .context(ConnectSnafu {
                endpoints: config.endpoints.clone(),
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Number of keys currently stored at exactly `key`.
    pub async fn count(&self, key: &str) -> Result<i64> {
        let options = GetOptions::new().with_count_only();
        let resp = self
            .client
            .clone()
            .get(key, Some(options))
            .await
            .context(KvSnafu { key })?;
        Ok(resp.count())
    }

    /// Every decodable service record under `prefix`. Malformed values are
    /// logged and skipped; they must not poison the rest of the snapshot.
    pub async fn list_records(&self, prefix: &str) -> Result<Vec<ServiceRecord>> {
        let options = GetOptions::new().with_prefix();
        let resp = self
            .client
            .clone()
            .get(prefix, Some(options))
            .await
            .context(KvSnafu { key: prefix })?;

        let mut records = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            match ServiceRecord::decode(kv.value()) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!(
                        key = %String::from_utf8_lossy(kv.key()),
                        %error,
                        "skipping malformed service record"
                    );
                }
            }
        }
        Ok(records)
    }

    /// Write a record, optionally bound to a lease.
    pub async fn put_record(
        &self,
        key: &str,
        record: &ServiceRecord,
        lease_id: Option<i64>,
    ) -> Result<()> {
        let value = record.encode()?;
        let options = lease_id.map(|id| PutOptions::new().with_lease(id));
        self.client
            .clone()
            .put(key, value, options)
            .await
            .context(KvSnafu { key })?;
        Ok(())
    }

    /// Delete a key; returns how many keys were removed.
    pub async fn delete(&self, key: &str) -> Result<i64> {
        let resp = self
            .client
            .clone()
            .delete(key, None)
            .await
            .context(KvSnafu { key })?;
        Ok(resp.deleted())
    }

    pub async fn grant_lease(&self, ttl: i64) -> Result<i64> {
        let resp = self
            .client
            .clone()
            .lease_grant(ttl, None)
            .await
            .context(LeaseGrantSnafu { ttl })?;
        Ok(resp.id())
    }

    /// Start a background task renewing `lease_id` until the returned guard
    /// is dropped or the lease dies. A silently terminated keepalive is
    /// recovered by the registrar's next probe, not here.
    pub async fn spawn_keepalive(&self, lease_id: i64, ttl: i64) -> Result<LeaseKeepAlive> {
        let (mut keeper, mut stream) = self
            .client
            .clone()
            .lease_keep_alive(lease_id)
            .await
            .context(LeaseKeepAliveSnafu { lease_id })?;

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        // Renew well before expiry; a 30s lease is refreshed every 10s.
        let renew_every = Duration::from_secs((ttl / 3).max(1) as u64);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(renew_every);
            loop {
                tokio::select! {
                    () = child.cancelled() => {
                        debug!(lease_id, "lease keepalive stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(error) = keeper.keep_alive().await {
                            warn!(lease_id, %error, "lease keepalive send failed");
                            return;
                        }
                        match stream.message().await {
                            Ok(Some(resp)) if resp.ttl() > 0 => {
                                trace!(lease_id, ttl = resp.ttl(), "lease refreshed");
                            }
                            Ok(Some(_)) => {
                                warn!(lease_id, "lease expired");
                                return;
                            }
                            Ok(None) => {
                                warn!(lease_id, "lease keepalive stream closed");
                                return;
                            }
                            Err(error) => {
                                warn!(lease_id, %error, "lease keepalive receive failed");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(LeaseKeepAlive {
            lease_id,
            cancel,
            _task: task,
        })
    }

    /// Open a prefix watch with previous-value delivery.
    pub async fn watch_prefix(&self, prefix: &str) -> Result<(Watcher, WatchStream)> {
        let options = WatchOptions::new().with_prefix().with_prev_key();
        self.client
            .clone()
            .watch(prefix, Some(options))
            .await
            .context(WatchSnafu { prefix })
    }
}

/// Guard over a per-lease keepalive task; dropping it stops the renewals.
#[derive(Debug)]
pub struct LeaseKeepAlive {
    lease_id: i64,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl LeaseKeepAlive {
    pub fn lease_id(&self) -> i64 {
        self.lease_id
    }

    /// A guard with no renewal behind it, for store fakes in tests.
    #[cfg(test)]
    pub(crate) fn noop(lease_id: i64) -> Self {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let task = tokio::spawn(async move { child.cancelled().await });
        Self {
            lease_id,
            cancel,
            _task: task,
        }
    }
}

impl Drop for LeaseKeepAlive {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
