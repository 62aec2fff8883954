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

//! The watching resolver: a live, monotonically updated address set for a
//! named service.
//!
//! [`ResolverBuilder`] is stateless; each [`build`](ResolverBuilder::build)
//! call produces a [`Resolver`] owning its own watch task and address set.
//! The task seeds the set from a prefix snapshot, then applies watch events
//! serially; every visible change is published through the supplied
//! [`AddressSink`]. Consumers therefore see a sequence of snapshots, each
//! reflecting exactly the events processed so far.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Event, EventType, WatchStream, Watcher};
use snafu::ensure;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{InvalidTargetSnafu, Result},
    record::ServiceRecord,
    set::AddressSet,
    store::EtcdStore,
};

/// Scheme under which this resolver addresses its targets.
pub const SCHEME: &str = "etcd";

/// A parsed `etcd://<authority>/<service-name>` dial target. The authority
/// carries nothing semantic and is ignored beyond logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub authority: String,
    pub service: String,
}

impl Target {
    pub fn parse(target: &str) -> Result<Self> {
        let uri: http::Uri = target.parse().map_err(|_| {
            InvalidTargetSnafu {
                target,
                reason: "not a valid URI",
            }
            .build()
        })?;

        ensure!(
            uri.scheme_str() == Some(SCHEME),
            InvalidTargetSnafu {
                target,
                reason: format!("scheme must be {SCHEME:?}"),
            }
        );

        let service = uri.path().trim_matches('/');
        ensure!(
            !service.is_empty() && !service.contains('/'),
            InvalidTargetSnafu {
                target,
                reason: "expected a single service-name path segment",
            }
        );

        Ok(Self {
            authority: uri.authority().map(ToString::to_string).unwrap_or_default(),
            service: service.to_string(),
        })
    }
}

/// Where the resolver publishes address updates; the RPC client's
/// address-update callback seam.
#[async_trait]
pub trait AddressSink: Send + Sync + 'static {
    async fn update(&self, addresses: Vec<String>);
}

/// Publishing into a watch channel; handy for tests and for consumers that
/// want the raw snapshots.
#[async_trait]
impl AddressSink for tokio::sync::watch::Sender<Vec<String>> {
    async fn update(&self, addresses: Vec<String>) {
        let _ = self.send(addresses);
    }
}

/// Stateless factory for per-target resolvers.
#[derive(Clone)]
pub struct ResolverBuilder {
    store: EtcdStore,
}

impl ResolverBuilder {
    pub fn new(store: EtcdStore) -> Self {
        Self { store }
    }

    pub fn scheme() -> &'static str {
        SCHEME
    }

    /// Start tracking `target`: take the snapshot, emit the initial set,
    /// then hand the watch to a background task. Snapshot or watch-open
    /// failure here is fatal to the build; once running, the task recovers
    /// from transport errors on its own.
    pub async fn build<S: AddressSink>(&self, target: &Target, sink: S) -> Result<Resolver> {
        let prefix = self.store.config().service_prefix(&target.service);
        debug!(
            service = %target.service,
            authority = %target.authority,
            %prefix,
            "building resolver"
        );

        let mut set = AddressSet::default();
        for record in self.store.list_records(&prefix).await? {
            set.insert_record(&record);
        }
        sink.update(set.addresses()).await;

        let (watcher, stream) = self.store.watch_prefix(&prefix).await?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_loop(
            self.store.clone(),
            prefix,
            set,
            sink,
            watcher,
            stream,
            cancel.clone(),
        ));

        Ok(Resolver {
            cancel,
            task: Some(task),
        })
    }
}

/// A live resolver; dropping or closing it stops the watch task without
/// further emissions.
#[derive(Debug)]
pub struct Resolver {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Resolver {
    /// Stop the watch task. Safe to call any number of times.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Close and wait for the watch task to finish.
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_loop<S: AddressSink>(
    store: EtcdStore,
    prefix: String,
    mut set: AddressSet,
    sink: S,
    mut watcher: Watcher,
    mut stream: WatchStream,
    cancel: CancellationToken,
) {
    let backoff = Duration::from_secs(store.config().watch_backoff_secs);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = watcher.cancel().await;
                info!(%prefix, "resolver watch stopped");
                return;
            }
            message = stream.message() => {
                // A batch may have raced the close signal; never emit after
                // close was requested.
                if cancel.is_cancelled() {
                    let _ = watcher.cancel().await;
                    return;
                }
                match message {
                    Ok(Some(response)) => {
                        if response.canceled() {
                            warn!(%prefix, "watch canceled by server, re-establishing");
                            if !reopen(&store, &prefix, &mut set, &sink, &mut watcher, &mut stream, &cancel, backoff).await {
                                return;
                            }
                            continue;
                        }
                        let mut changed = false;
                        for event in response.events() {
                            changed |= apply_event(&mut set, event);
                        }
                        if changed {
                            sink.update(set.addresses()).await;
                        }
                    }
                    Ok(None) => {
                        warn!(%prefix, "watch stream ended, re-establishing");
                        if !reopen(&store, &prefix, &mut set, &sink, &mut watcher, &mut stream, &cancel, backoff).await {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(%prefix, %error, "watch transport error, re-establishing");
                        if !reopen(&store, &prefix, &mut set, &sink, &mut watcher, &mut stream, &cancel, backoff).await {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Back off, re-open the watch and resynchronise the address set from a
/// fresh snapshot (events delivered during the gap are lost otherwise).
/// Returns false when the close signal arrived instead.
#[allow(clippy::too_many_arguments)]
async fn reopen<S: AddressSink>(
    store: &EtcdStore,
    prefix: &str,
    set: &mut AddressSet,
    sink: &S,
    watcher: &mut Watcher,
    stream: &mut WatchStream,
    cancel: &CancellationToken,
    backoff: Duration,
) -> bool {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(backoff) => {}
        }

        match store.watch_prefix(prefix).await {
            Ok((new_watcher, new_stream)) => {
                *watcher = new_watcher;
                *stream = new_stream;
                break;
            }
            Err(error) => {
                warn!(%prefix, %error, "re-opening watch failed, backing off");
            }
        }
    }

    match store.list_records(prefix).await {
        Ok(records) => {
            let mut fresh = AddressSet::default();
            for record in &records {
                fresh.insert_record(record);
            }
            if fresh.addresses() != set.addresses() {
                *set = fresh;
                sink.update(set.addresses()).await;
            }
        }
        Err(error) => {
            warn!(%prefix, %error, "resync snapshot failed, keeping previous set");
        }
    }
    true
}

/// Apply one watch event to the address set. Returns true when the visible
/// set changed. Store-level anomalies (missing kv/prev-kv) and malformed
/// records are logged and skipped, never fatal.
fn apply_event(set: &mut AddressSet, event: &Event) -> bool {
    let current = event.kv().map(|kv| (kv.key(), kv.value()));
    let prev = event.prev_kv().map(|kv| (kv.key(), kv.value()));
    match event.event_type() {
        EventType::Put => apply_put(set, current, prev),
        EventType::Delete => apply_delete(set, prev),
    }
}

/// A put event, as `(key, value)` pairs for the current and (when the store
/// delivered one) previous revisions.
fn apply_put(
    set: &mut AddressSet,
    current: Option<(&[u8], &[u8])>,
    prev: Option<(&[u8], &[u8])>,
) -> bool {
    let Some((key, value)) = current else {
        warn!("current kv is nil for put event");
        return false;
    };
    let record = match ServiceRecord::decode(value) {
        Ok(record) => record,
        Err(error) => {
            warn!(
                key = %String::from_utf8_lossy(key),
                %error,
                "skipping malformed record in put event"
            );
            return false;
        }
    };
    match prev {
        // A rewrite of an existing record: apply the endpoint diff so
        // endpoints dropped by the new value are released.
        Some((prev_key, prev_value)) => match ServiceRecord::decode(prev_value) {
            Ok(prev_record) => set.replace_record(&prev_record, &record),
            Err(error) => {
                warn!(
                    key = %String::from_utf8_lossy(prev_key),
                    %error,
                    "previous value malformed, applying put as pure addition"
                );
                set.insert_record(&record)
            }
        },
        None => set.insert_record(&record),
    }
}

/// A delete event. The current value of a delete is empty; only the
/// previous value tells us which endpoints to release.
fn apply_delete(set: &mut AddressSet, prev: Option<(&[u8], &[u8])>) -> bool {
    let Some((key, value)) = prev else {
        warn!("previous kv is nil for delete event");
        return false;
    };
    match ServiceRecord::decode(value) {
        Ok(prev_record) => set.remove_record(&prev_record),
        Err(error) => {
            warn!(
                key = %String::from_utf8_lossy(key),
                %error,
                "skipping malformed record in delete event"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Endpoint;

    #[test]
    fn parses_scheme_authority_and_service() {
        let target = Target::parse("etcd://author/my-service").unwrap();
        assert_eq!(target.authority, "author");
        assert_eq!(target.service, "my-service");
    }

    #[test]
    fn authority_may_be_anything() {
        let target = Target::parse("etcd://_/my-service").unwrap();
        assert_eq!(target.authority, "_");
        assert_eq!(target.service, "my-service");
    }

    #[test]
    fn rejects_foreign_schemes() {
        assert!(Target::parse("dns://x/my-service").is_err());
        assert!(Target::parse("my-service").is_err());
    }

    #[test]
    fn rejects_nested_or_empty_service_names() {
        assert!(Target::parse("etcd://x/").is_err());
        assert!(Target::parse("etcd://x/a/b").is_err());
    }

    fn record_json(id: &str, addrs: &[(&str, &str)]) -> Vec<u8> {
        let record = ServiceRecord {
            id: id.to_string(),
            name: "my-service".to_string(),
            endpoints: addrs
                .iter()
                .map(|(ip, port)| Endpoint {
                    ip: (*ip).to_string(),
                    port: (*port).to_string(),
                    protocol: "GRPC".to_string(),
                    version: "v1.0.0".to_string(),
                    ..Endpoint::default()
                })
                .collect(),
        };
        record.encode().unwrap().into_bytes()
    }

    const KEY: &[u8] = b"/services/my-service/a";

    #[test]
    fn put_without_prev_adds_addresses() {
        let mut set = AddressSet::default();
        let value = record_json("a", &[("10.0.0.1", "7001")]);

        assert!(apply_put(&mut set, Some((KEY, &value)), None));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);
    }

    #[test]
    fn duplicate_put_produces_no_emission() {
        let mut set = AddressSet::default();
        let value = record_json("a", &[("10.0.0.1", "7001")]);

        assert!(apply_put(&mut set, Some((KEY, &value)), None));
        // The same record re-delivered: nothing visible changes, so the
        // caller must not emit.
        assert!(!apply_put(&mut set, Some((KEY, &value)), Some((KEY, &value))));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);
    }

    #[test]
    fn put_with_prev_applies_replacement_diff() {
        let mut set = AddressSet::default();
        let old = record_json("a", &[("10.0.0.1", "7001"), ("10.0.0.2", "7001")]);
        let new = record_json("a", &[("10.0.0.2", "7001"), ("10.0.0.3", "7001")]);

        assert!(apply_put(&mut set, Some((KEY, &old)), None));
        assert!(apply_put(&mut set, Some((KEY, &new)), Some((KEY, &old))));
        assert_eq!(set.addresses(), vec!["10.0.0.2:7001", "10.0.0.3:7001"]);
    }

    #[test]
    fn put_with_nil_current_kv_is_skipped() {
        let mut set = AddressSet::default();
        assert!(!apply_put(&mut set, None, None));
        assert!(set.is_empty());
    }

    #[test]
    fn malformed_put_value_is_skipped() {
        let mut set = AddressSet::default();
        assert!(!apply_put(&mut set, Some((KEY, b"not json")), None));
        assert!(set.is_empty());
    }

    #[test]
    fn malformed_prev_value_falls_back_to_pure_addition() {
        let mut set = AddressSet::default();
        let value = record_json("a", &[("10.0.0.1", "7001")]);

        assert!(apply_put(
            &mut set,
            Some((KEY, &value)),
            Some((KEY, b"not json"))
        ));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);
    }

    #[test]
    fn delete_releases_previous_endpoints() {
        let mut set = AddressSet::default();
        let value = record_json("a", &[("10.0.0.1", "7001")]);

        assert!(apply_put(&mut set, Some((KEY, &value)), None));
        assert!(apply_delete(&mut set, Some((KEY, &value))));
        assert!(set.is_empty());
    }

    #[test]
    fn delete_with_nil_prev_kv_is_skipped() {
        let mut set = AddressSet::default();
        let value = record_json("a", &[("10.0.0.1", "7001")]);

        apply_put(&mut set, Some((KEY, &value)), None);
        assert!(!apply_delete(&mut set, None));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);
    }

    #[test]
    fn delete_with_malformed_prev_is_skipped() {
        let mut set = AddressSet::default();
        let value = record_json("a", &[("10.0.0.1", "7001")]);

        apply_put(&mut set, Some((KEY, &value)), None);
        assert!(!apply_delete(&mut set, Some((KEY, b"not json"))));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);
    }

    #[test]
    fn shared_address_survives_until_both_records_are_gone() {
        let mut set = AddressSet::default();
        let key_b: &[u8] = b"/services/my-service/b";
        let a = record_json("a", &[("10.0.0.1", "7001")]);
        let b = record_json("b", &[("10.0.0.1", "7001")]);

        assert!(apply_put(&mut set, Some((KEY, &a)), None));
        assert!(!apply_put(&mut set, Some((key_b, &b)), None));

        // Instance "a" goes away; "b" still advertises the address.
        assert!(!apply_delete(&mut set, Some((KEY, &a))));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);

        assert!(apply_delete(&mut set, Some((key_b, &b))));
        assert!(set.is_empty());
    }
}
