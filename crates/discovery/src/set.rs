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

//! The resolver's owned address set.
//!
//! Addresses are reference-counted per `(ip, port)`: two records advertising
//! the same address keep it visible until both are gone. Every mutation
//! reports whether the visible set changed, which is what drives update
//! emission.

use std::collections::{BTreeMap, BTreeSet};

use crate::record::ServiceRecord;

#[derive(Clone, Debug, Default)]
pub struct AddressSet {
    counts: BTreeMap<String, usize>,
}

impl AddressSet {
    /// Account for a newly observed record. Returns true if any address
    /// became visible.
    pub fn insert_record(&mut self, record: &ServiceRecord) -> bool {
        let mut changed = false;
        for address in record.addresses() {
            changed |= self.incr(address);
        }
        changed
    }

    /// Drop a record that disappeared. Returns true if any address stopped
    /// being visible.
    pub fn remove_record(&mut self, record: &ServiceRecord) -> bool {
        let mut changed = false;
        for address in record.addresses() {
            changed |= self.decr(&address);
        }
        changed
    }

    /// Apply a rewrite of one record: addresses only in the previous value
    /// are released, addresses only in the next value are acquired.
    /// Unchanged addresses keep their count untouched.
    pub fn replace_record(&mut self, prev: &ServiceRecord, next: &ServiceRecord) -> bool {
        let prev_addrs: BTreeSet<String> = prev.addresses().into_iter().collect();
        let next_addrs: BTreeSet<String> = next.addresses().into_iter().collect();

        let mut changed = false;
        for removed in prev_addrs.difference(&next_addrs) {
            changed |= self.decr(removed);
        }
        for added in next_addrs.difference(&prev_addrs) {
            changed |= self.incr(added.clone());
        }
        changed
    }

    /// The currently visible addresses, in stable (sorted) order.
    pub fn addresses(&self) -> Vec<String> {
        self.counts.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn incr(&mut self, address: String) -> bool {
        let count = self.counts.entry(address).or_insert(0);
        *count += 1;
        *count == 1
    }

    fn decr(&mut self, address: &str) -> bool {
        match self.counts.get_mut(address) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(address);
                true
            }
            // Deleting an address we never saw; store-level anomaly.
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Endpoint;

    fn record(id: &str, addrs: &[(&str, &str)]) -> ServiceRecord {
        ServiceRecord {
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
        }
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let mut set = AddressSet::default();
        assert!(set.insert_record(&record("a", &[("10.0.0.1", "7001")])));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);

        assert!(set.remove_record(&record("a", &[("10.0.0.1", "7001")])));
        assert!(set.is_empty());
    }

    #[test]
    fn duplicate_insert_is_idempotent_for_visibility() {
        let mut set = AddressSet::default();
        let rec = record("a", &[("10.0.0.1", "7001")]);
        assert!(set.insert_record(&rec));
        // Same record re-observed (duplicate PUT): count rises but nothing
        // becomes visible, so no emission is due.
        assert!(!set.insert_record(&rec));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);

        assert!(!set.remove_record(&rec));
        assert!(set.remove_record(&rec));
        assert!(set.is_empty());
    }

    #[test]
    fn shared_address_survives_one_unregister() {
        let mut set = AddressSet::default();
        set.insert_record(&record("a", &[("10.0.0.1", "7001")]));
        set.insert_record(&record("b", &[("10.0.0.1", "7001")]));

        // Instance "a" goes away; "b" still advertises the address.
        assert!(!set.remove_record(&record("a", &[("10.0.0.1", "7001")])));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);

        assert!(set.remove_record(&record("b", &[("10.0.0.1", "7001")])));
        assert!(set.is_empty());
    }

    #[test]
    fn replace_applies_symmetric_difference() {
        let mut set = AddressSet::default();
        let prev = record("a", &[("10.0.0.1", "7001"), ("10.0.0.2", "7001")]);
        set.insert_record(&prev);

        let next = record("a", &[("10.0.0.2", "7001"), ("10.0.0.3", "7001")]);
        assert!(set.replace_record(&prev, &next));
        assert_eq!(set.addresses(), vec!["10.0.0.2:7001", "10.0.0.3:7001"]);
    }

    #[test]
    fn replace_with_identical_endpoints_changes_nothing() {
        let mut set = AddressSet::default();
        let rec = record("a", &[("10.0.0.1", "7001")]);
        set.insert_record(&rec);
        assert!(!set.replace_record(&rec, &rec));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);
    }

    #[test]
    fn empty_endpoint_list_triggers_no_change() {
        let mut set = AddressSet::default();
        assert!(!set.insert_record(&record("a", &[])));
        assert!(!set.remove_record(&record("a", &[])));
        assert!(set.is_empty());
    }

    #[test]
    fn duplicate_endpoints_in_one_record_count_once() {
        let mut set = AddressSet::default();
        let rec = record("a", &[("10.0.0.1", "7001"), ("10.0.0.1", "7001")]);
        assert!(set.insert_record(&rec));
        assert_eq!(set.addresses(), vec!["10.0.0.1:7001"]);
        // A single removal fully releases it: the duplicate contributed one
        // reference, not two.
        assert!(set.remove_record(&rec));
        assert!(set.is_empty());
    }

    #[test]
    fn removing_unknown_address_is_benign() {
        let mut set = AddressSet::default();
        assert!(!set.remove_record(&record("ghost", &[("10.9.9.9", "1")])));
    }
}
