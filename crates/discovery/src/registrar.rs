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

//! Lease-backed advertiser keeping one service record alive for as long as
//! the process runs.
//!
//! Liveness rests on two mechanisms with one invariant between them: the
//! lease keepalive renews the record's TTL, and a coarse probe re-asserts
//! the record under a fresh lease whenever the key has gone missing. The
//! keepalive stream can die silently on a partition; the probe bounds the
//! outage to one check interval. Lease TTL stays above twice the probe
//! interval.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use snafu::ensure;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::DiscoveryConfig,
    error::{Error, InvalidRecordSnafu, NotRegisteredSnafu, Result},
    record::ServiceRecord,
    store::{EtcdStore, LeaseKeepAlive},
};

/// The store surface the registrar drives. [`EtcdStore`] is the production
/// implementation; tests substitute an in-memory fake.
#[async_trait]
pub trait RegistryStore: Send + Sync + 'static {
    fn config(&self) -> &DiscoveryConfig;
    async fn count(&self, key: &str) -> Result<i64>;
    async fn put_record(
        &self,
        key: &str,
        record: &ServiceRecord,
        lease_id: Option<i64>,
    ) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<i64>;
    async fn grant_lease(&self, ttl: i64) -> Result<i64>;
    async fn spawn_keepalive(&self, lease_id: i64, ttl: i64) -> Result<LeaseKeepAlive>;
}

#[async_trait]
impl RegistryStore for EtcdStore {
    fn config(&self) -> &DiscoveryConfig {
        EtcdStore::config(self)
    }

    async fn count(&self, key: &str) -> Result<i64> {
        EtcdStore::count(self, key).await
    }

    async fn put_record(
        &self,
        key: &str,
        record: &ServiceRecord,
        lease_id: Option<i64>,
    ) -> Result<()> {
        EtcdStore::put_record(self, key, record, lease_id).await
    }

    async fn delete(&self, key: &str) -> Result<i64> {
        EtcdStore::delete(self, key).await
    }

    async fn grant_lease(&self, ttl: i64) -> Result<i64> {
        EtcdStore::grant_lease(self, ttl).await
    }

    async fn spawn_keepalive(&self, lease_id: i64, ttl: i64) -> Result<LeaseKeepAlive> {
        EtcdStore::spawn_keepalive(self, lease_id, ttl).await
    }
}

pub struct Registrar<S: RegistryStore = EtcdStore> {
    store: S,
    record: ServiceRecord,
    service_path: String,
    cancel: CancellationToken,
    registered: AtomicBool,
    keepalive: Mutex<Option<LeaseKeepAlive>>,
}

impl<S: RegistryStore> Registrar<S> {
    /// Build a registrar for `record`. The record's name and id become path
    /// segments, so neither may be empty or contain `/`.
    pub fn new(store: S, record: ServiceRecord) -> Result<Self> {
        ensure!(
            valid_segment(&record.name),
            InvalidRecordSnafu {
                reason: format!("service name {:?} is not a valid path segment", record.name),
            }
        );
        ensure!(
            valid_segment(&record.id),
            InvalidRecordSnafu {
                reason: format!("instance id {:?} is not a valid path segment", record.id),
            }
        );

        let service_path = store.config().service_path(&record.name, &record.id);
        Ok(Self {
            store,
            record,
            service_path,
            cancel: CancellationToken::new(),
            registered: AtomicBool::new(false),
            keepalive: Mutex::new(None),
        })
    }

    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    /// Run the registration loop until [`shutdown`](Self::shutdown).
    ///
    /// The first assert is performed synchronously and its failure is fatal.
    /// After that the loop wakes every check interval and re-asserts only if
    /// the key has disappeared; transient store errors are logged and
    /// retried on the next tick. An encode failure is a programmer error and
    /// terminates the loop.
    pub async fn run(&self) -> Result<()> {
        self.assert_registered().await?;
        self.registered.store(true, Ordering::Release);

        let interval = Duration::from_secs(self.store.config().reassert_interval_secs);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; the initial
        // assert already happened, so consume it.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    // Stop renewing; the caller unregisters next.
                    *self.keepalive.lock().await = None;
                    info!(path = %self.service_path, "registrar stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.assert_registered().await {
                        Ok(()) => {}
                        Err(error @ Error::EncodeRecord { .. }) => return Err(error),
                        Err(error) => {
                            warn!(path = %self.service_path, %error, "re-assert failed, retrying next tick");
                        }
                    }
                }
            }
        }
    }

    /// Ensure the record exists: when the key is missing, grant a fresh
    /// lease, write the record under it and restart the keepalive. When the
    /// key is present the existing lease is still being renewed and there is
    /// nothing to do.
    async fn assert_registered(&self) -> Result<()> {
        if self.store.count(&self.service_path).await? > 0 {
            return Ok(());
        }

        let ttl = self.store.config().lease_ttl_secs;
        let lease_id = self.store.grant_lease(ttl).await?;
        self.store
            .put_record(&self.service_path, &self.record, Some(lease_id))
            .await?;
        let keepalive = self.store.spawn_keepalive(lease_id, ttl).await?;
        info!(path = %self.service_path, lease_id, "service record asserted");

        // Replacing the guard cancels any renewal task from a prior lease.
        *self.keepalive.lock().await = Some(keepalive);
        Ok(())
    }

    /// Delete the advertised record. Fails with `NotRegistered` when the
    /// registration loop never asserted.
    pub async fn unregister(&self) -> Result<()> {
        ensure!(self.registered.load(Ordering::Acquire), NotRegisteredSnafu);
        let deleted = self.store.delete(&self.service_path).await?;
        info!(path = %self.service_path, deleted, "service record deleted");
        Ok(())
    }

    /// Stop the registration loop. Safe to call any number of times.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

fn valid_segment(value: &str) -> bool {
    !value.is_empty() && !value.contains('/')
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex as StdMutex},
    };

    use super::*;
    use crate::record::Endpoint;

    #[test]
    fn path_segments_are_validated() {
        assert!(valid_segment("my-service"));
        assert!(valid_segment("5e3c1df8-6c19-4a4f-9a0a-0ce5ed2591cc"));
        assert!(!valid_segment(""));
        assert!(!valid_segment("my/service"));
    }

    #[derive(Default)]
    struct FakeInner {
        records: HashMap<String, (ServiceRecord, Option<i64>)>,
        puts: usize,
        next_lease: i64,
        fail_reads: bool,
    }

    /// In-memory stand-in for the etcd store, with injectable read failures.
    #[derive(Clone, Default)]
    struct FakeStore {
        config: DiscoveryConfig,
        inner: Arc<StdMutex<FakeInner>>,
    }

    impl FakeStore {
        fn contains(&self, key: &str) -> bool {
            self.inner.lock().unwrap().records.contains_key(key)
        }

        fn remove(&self, key: &str) {
            self.inner.lock().unwrap().records.remove(key);
        }

        fn puts(&self) -> usize {
            self.inner.lock().unwrap().puts
        }

        fn lease_of(&self, key: &str) -> Option<i64> {
            self.inner
                .lock()
                .unwrap()
                .records
                .get(key)
                .and_then(|(_, lease)| *lease)
        }

        fn set_fail_reads(&self, fail: bool) {
            self.inner.lock().unwrap().fail_reads = fail;
        }
    }

    #[async_trait]
    impl RegistryStore for FakeStore {
        fn config(&self) -> &DiscoveryConfig {
            &self.config
        }

        async fn count(&self, key: &str) -> Result<i64> {
            let inner = self.inner.lock().unwrap();
            ensure!(
                !inner.fail_reads,
                InvalidRecordSnafu {
                    reason: "injected read failure",
                }
            );
            Ok(i64::from(inner.records.contains_key(key)))
        }

        async fn put_record(
            &self,
            key: &str,
            record: &ServiceRecord,
            lease_id: Option<i64>,
        ) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner
                .records
                .insert(key.to_string(), (record.clone(), lease_id));
            inner.puts += 1;
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<i64> {
            Ok(i64::from(
                self.inner.lock().unwrap().records.remove(key).is_some(),
            ))
        }

        async fn grant_lease(&self, _ttl: i64) -> Result<i64> {
            let mut inner = self.inner.lock().unwrap();
            inner.next_lease += 1;
            Ok(inner.next_lease)
        }

        async fn spawn_keepalive(&self, lease_id: i64, _ttl: i64) -> Result<LeaseKeepAlive> {
            Ok(LeaseKeepAlive::noop(lease_id))
        }
    }

    fn record() -> ServiceRecord {
        ServiceRecord {
            id: "a".to_string(),
            name: "my-service".to_string(),
            endpoints: vec![Endpoint {
                ip: "10.0.0.1".to_string(),
                port: "7001".to_string(),
                protocol: "GRPC".to_string(),
                version: "v1.0.0".to_string(),
                ..Endpoint::default()
            }],
        }
    }

    /// Poll under the paused clock; sleeps auto-advance virtual time, so
    /// probe intervals elapse as soon as every task is idle.
    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn initial_assert_failure_is_fatal() {
        let store = FakeStore::default();
        store.set_fail_reads(true);
        let registrar = Registrar::new(store, record()).unwrap();
        assert!(registrar.run().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn asserts_once_and_leaves_a_present_key_alone() {
        let store = FakeStore::default();
        let registrar = Arc::new(Registrar::new(store.clone(), record()).unwrap());
        let path = registrar.service_path().to_string();
        assert_eq!(path, "/services/my-service/a");

        let task = tokio::spawn({
            let registrar = registrar.clone();
            async move { registrar.run().await }
        });

        wait_until(|| store.contains(&path)).await;
        assert_eq!(store.puts(), 1);

        // Several probe intervals with the key intact: no rewrites.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.puts(), 1);
        assert!(store.contains(&path));

        registrar.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reasserts_under_a_fresh_lease_when_the_key_disappears() {
        let store = FakeStore::default();
        let registrar = Arc::new(Registrar::new(store.clone(), record()).unwrap());
        let path = registrar.service_path().to_string();

        let task = tokio::spawn({
            let registrar = registrar.clone();
            async move { registrar.run().await }
        });

        wait_until(|| store.contains(&path)).await;
        let first_lease = store.lease_of(&path);
        assert!(first_lease.is_some());

        // The key vanishes behind the registrar's back (lease expiry, or an
        // operator deleting it directly).
        store.remove(&path);
        wait_until(|| store.contains(&path)).await;

        assert_eq!(store.puts(), 2);
        assert_ne!(store.lease_of(&path), first_lease);

        registrar.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_read_errors_are_retried_next_tick() {
        let store = FakeStore::default();
        let registrar = Arc::new(Registrar::new(store.clone(), record()).unwrap());
        let path = registrar.service_path().to_string();

        let task = tokio::spawn({
            let registrar = registrar.clone();
            async move { registrar.run().await }
        });

        wait_until(|| store.contains(&path)).await;

        // Probes fail for a while; the loop must survive and pick the
        // record back up once reads recover.
        store.set_fail_reads(true);
        store.remove(&path);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!store.contains(&path));
        assert!(!task.is_finished());

        store.set_fail_reads(false);
        wait_until(|| store.contains(&path)).await;

        registrar.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unregister_without_registration_is_rejected() {
        let registrar = Registrar::new(FakeStore::default(), record()).unwrap();
        assert!(matches!(
            registrar.unregister().await,
            Err(Error::NotRegistered { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_removes_the_record() {
        let store = FakeStore::default();
        let registrar = Arc::new(Registrar::new(store.clone(), record()).unwrap());
        let path = registrar.service_path().to_string();

        let task = tokio::spawn({
            let registrar = registrar.clone();
            async move { registrar.run().await }
        });
        wait_until(|| store.contains(&path)).await;

        registrar.shutdown();
        task.await.unwrap().unwrap();

        registrar.unregister().await.unwrap();
        assert!(!store.contains(&path));
    }

    #[test]
    fn rejects_records_with_invalid_segments() {
        let mut bad = record();
        bad.name = "my/service".to_string();
        assert!(Registrar::new(FakeStore::default(), bad).is_err());

        let mut bad = record();
        bad.id = String::new();
        assert!(Registrar::new(FakeStore::default(), bad).is_err());
    }
}
