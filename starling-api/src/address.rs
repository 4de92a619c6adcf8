//! # Node Address Module
//!
//! ## Key Concepts
//! - Address: Unique routable identity of one running node instance
//! - Channel names: Every channel a node binds is derived from its address parts
//!
//! ## Format
//! `namespace:serviceId:instanceId`. The `:` separator is reserved, so none of the
//! three parts may contain it.
//!
//! ## Channel Topology
//! | Channel | Name |
//! |---|---|
//! | service-wide | `namespace:serviceId` |
//! | broadcast | `namespace:serviceId:broadcast` |
//! | lobby | `namespace:lobby` |
//! | instance | `namespace:serviceId:instanceId` |

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AddressError;

/// Separator between address parts.
pub const ADDRESS_SEPARATOR: char = ':';

/// Suffix of the broadcast-only channel of a service.
pub const BROADCAST_SUFFIX: &str = "broadcast";

/// Name of the presence channel inside a namespace.
pub const LOBBY: &str = "lobby";

/// # Address
///
/// ## Overview
/// Fully-qualified identity of one running node.
///
/// ## Invariants
/// - Globally unique per running instance
/// - Immutable for the lifetime of the node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    namespace: String,
    service_id: String,
    instance_id: String,
}

impl Address {
    /// Builds an address from its three parts.
    ///
    /// Returns an error if any part is empty or contains the separator.
    pub fn new(
        namespace: impl Into<String>,
        service_id: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Result<Self, AddressError> {
        let address = Self {
            namespace: namespace.into(),
            service_id: service_id.into(),
            instance_id: instance_id.into(),
        };
        validate_part("namespace", &address.namespace)?;
        validate_part("service id", &address.service_id)?;
        validate_part("instance id", &address.instance_id)?;
        Ok(address)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Channel shared by every instance of this service.
    pub fn service_channel(&self) -> String {
        service_channel(&self.namespace, &self.service_id)
    }

    /// Broadcast-only channel of this service.
    pub fn broadcast_channel(&self) -> String {
        broadcast_channel(&self.namespace, &self.service_id)
    }

    /// Presence channel of this namespace.
    pub fn lobby_channel(&self) -> String {
        lobby_channel(&self.namespace)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.namespace,
            self.service_id,
            self.instance_id,
            sep = ADDRESS_SEPARATOR
        )
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ADDRESS_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(service), Some(instance)) => Self::new(ns, service, instance),
            _ => Err(AddressError::Malformed(s.to_string())),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

fn validate_part(what: &'static str, value: &str) -> Result<(), AddressError> {
    if value.is_empty() {
        return Err(AddressError::EmptyPart(what));
    }
    if value.contains(ADDRESS_SEPARATOR) {
        return Err(AddressError::ReservedSeparator {
            part: what,
            value: value.to_string(),
        });
    }
    Ok(())
}

pub fn service_channel(namespace: &str, service_id: &str) -> String {
    format!("{namespace}{ADDRESS_SEPARATOR}{service_id}")
}

pub fn broadcast_channel(namespace: &str, service_id: &str) -> String {
    format!("{namespace}{ADDRESS_SEPARATOR}{service_id}{ADDRESS_SEPARATOR}{BROADCAST_SUFFIX}")
}

pub fn lobby_channel(namespace: &str) -> String {
    format!("{namespace}{ADDRESS_SEPARATOR}{LOBBY}")
}

/// Whether `target` is already qualified with `namespace` and can be used verbatim
/// as a channel name instead of being resolved through discovery.
pub fn is_qualified(namespace: &str, target: &str) -> bool {
    target
        .strip_prefix(namespace)
        .is_some_and(|rest| rest.starts_with(ADDRESS_SEPARATOR))
}
