//! The bus client boundary.
//!
//! Adapters never talk to a transport directly.  They go through a
//! [`BusClient`], which hands out opaque [`NodeHandle`]s and
//! [`SubscriptionHandle`]s and delivers raw payloads to a
//! [`MessageCallback`] from its own delivery context.
//!
//! Two clients ship with this crate: the in-process
//! [`LocalBus`][crate::bus::LocalBus] and, behind the `zenoh` feature,
//! [`ZenohBus`][crate::zenoh_bus::ZenohBus].

use std::fmt;
use std::sync::Arc;

use rosmod_types::BridgeError;
use uuid::Uuid;

/// Callback invoked once per received payload, in arrival order, on the bus
/// client's own delivery thread.
pub type MessageCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A transport able to open nodes against a bus master and subscribe them to
/// topics.
///
/// Implementations must be safe to share between adapters; every handle they
/// return is owned by exactly one caller.
pub trait BusClient: Send + Sync {
    /// Register a node called `name` with the master at `master`.
    fn open_node(&self, name: &str, master: &BusAddress) -> Result<NodeHandle, BridgeError>;

    /// Unregister `node`.  Subscriptions still bound to it are closed too.
    fn close_node(&self, node: NodeHandle) -> Result<(), BridgeError>;

    /// Subscribe `node` to `topic`, delivering every payload to `callback`.
    fn open_subscription(
        &self,
        node: &NodeHandle,
        topic: &str,
        callback: MessageCallback,
    ) -> Result<SubscriptionHandle, BridgeError>;

    /// Stop delivery for `subscription`.
    ///
    /// Clients should not return while a callback for this subscription is
    /// still running.  Adapters do not rely on it.
    fn close_subscription(&self, subscription: SubscriptionHandle) -> Result<(), BridgeError>;
}

// ────────────────────────────────────────────────────────────────────────────
// BusAddress
// ────────────────────────────────────────────────────────────────────────────

/// Address of a bus master in `hostname:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusAddress {
    host: String,
    port: u16,
}

impl BusAddress {
    /// Parse `hostname:port`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] when the host is empty or the port
    /// is not a valid `u16`.
    pub fn parse(uri: &str) -> Result<Self, BridgeError> {
        let uri = uri.trim();
        let invalid =
            || BridgeError::Validation(format!("primary uri '{uri}' must be hostname:port"));

        let (host, port) = uri.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handles
// ────────────────────────────────────────────────────────────────────────────

/// Opaque connection of one named node to a bus master.
///
/// Deliberately not `Clone`: a handle is closed exactly once by its owner.
#[derive(Debug, PartialEq, Eq)]
pub struct NodeHandle {
    id: Uuid,
    name: String,
    master: BusAddress,
}

impl NodeHandle {
    /// Mint a fresh handle.  Called by [`BusClient`] implementations.
    pub fn new(name: impl Into<String>, master: BusAddress) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            master,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> &BusAddress {
        &self.master
    }
}

/// Opaque binding of a node to a topic.
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: Uuid,
    node_id: Uuid,
    topic: String,
}

impl SubscriptionHandle {
    /// Mint a fresh handle bound to `node`.  Called by [`BusClient`]
    /// implementations.
    pub fn new(node: &NodeHandle, topic: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id: node.id,
            topic: topic.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Id of the [`NodeHandle`] this subscription was opened on.
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
