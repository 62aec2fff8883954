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

//! Service discovery over etcd: lease-backed registration, a watching
//! resolver that feeds live address sets into a load-balanced tonic channel,
//! and the shared record codec underneath both.
//!
//! Servers advertise a [`ServiceRecord`] under
//! `/<prefix>/<service-name>/<instance-id>` through the [`Registrar`];
//! clients track every record under `/<prefix>/<service-name>` through a
//! [`Resolver`] built for an `etcd://` [`Target`].

pub mod balance;
pub mod config;
pub mod error;
pub mod record;
pub mod registrar;
pub mod resolver;
pub mod set;
pub mod store;

pub use balance::balanced_channel;
pub use config::DiscoveryConfig;
pub use error::{Error, Result};
pub use record::{Endpoint, ServiceRecord};
pub use registrar::{Registrar, RegistryStore};
pub use resolver::{AddressSink, Resolver, ResolverBuilder, SCHEME, Target};
pub use set::AddressSet;
pub use store::EtcdStore;
