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

//! Bridge from resolver snapshots to tonic's balanced channel.
//!
//! The resolver publishes whole address sets; the balanced channel wants a
//! stream of endpoint insertions and removals. [`BalancerSink`] diffs each
//! snapshot against the previously published one and forwards the changes,
//! which the channel spreads requests across.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tonic::transport::{Channel, Endpoint, channel::Change};
use tracing::warn;

use crate::{
    error::Result,
    resolver::{AddressSink, Resolver, ResolverBuilder, Target},
};

/// Capacity of the change queue feeding the balanced channel.
const BALANCE_CHANNEL_CAPACITY: usize = 64;

/// Diffs consecutive address snapshots into balanced-channel changes.
pub struct BalancerSink {
    tx: mpsc::Sender<Change<String, Endpoint>>,
    published: Mutex<BTreeSet<String>>,
}

impl BalancerSink {
    pub fn new(tx: mpsc::Sender<Change<String, Endpoint>>) -> Self {
        Self {
            tx,
            published: Mutex::new(BTreeSet::new()),
        }
    }
}

#[async_trait]
impl AddressSink for BalancerSink {
    async fn update(&self, addresses: Vec<String>) {
        let next: BTreeSet<String> = addresses.into_iter().collect();
        let mut published = self.published.lock().await;

        for removed in published.difference(&next) {
            let _ = self.tx.send(Change::Remove(removed.clone())).await;
        }
        for added in next.difference(&published) {
            match Endpoint::from_shared(format!("http://{added}")) {
                Ok(endpoint) => {
                    let _ = self.tx.send(Change::Insert(added.clone(), endpoint)).await;
                }
                Err(error) => {
                    warn!(address = %added, %error, "skipping undialable address");
                }
            }
        }

        *published = next;
    }
}

/// Dial `target` through a load-balanced channel fed by a watching resolver.
///
/// The channel spreads requests over every address the resolver currently
/// sees; requests issued while the set is empty wait for the first
/// insertion. The returned [`Resolver`] must be kept alive for the channel
/// to keep receiving updates.
pub async fn balanced_channel(
    builder: &ResolverBuilder,
    target: &Target,
) -> Result<(Channel, Resolver)> {
    let (channel, tx) = Channel::balance_channel(BALANCE_CHANNEL_CAPACITY);
    let resolver = builder.build(target, BalancerSink::new(tx)).await?;
    Ok((channel, resolver))
}
