//! [`NodeManager`] – opens and closes bus nodes.
//!
//! Thin policy layer over [`BusClient`]: node names are checked against the
//! ROS graph-name rules before the client is asked, and every failure is
//! normalised into the taxonomy the adapter lifecycle expects.  There are no
//! retries here.

use std::sync::Arc;

use rosmod_types::BridgeError;
use tracing::debug;

use crate::client::{BusAddress, BusClient, NodeHandle};

/// Opens and closes [`NodeHandle`]s on behalf of an adapter.
#[derive(Clone)]
pub struct NodeManager {
    client: Arc<dyn BusClient>,
}

impl NodeManager {
    pub fn new(client: Arc<dyn BusClient>) -> Self {
        Self { client }
    }

    /// Register `name` with the master at `master`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] when the name is not a valid graph
    /// name or the master is unreachable.
    pub fn open(&self, name: &str, master: &BusAddress) -> Result<NodeHandle, BridgeError> {
        if !is_valid_node_name(name) {
            return Err(BridgeError::Connection(format!(
                "invalid node name '{name}'"
            )));
        }
        let node = self.client.open_node(name, master).map_err(|e| match e {
            BridgeError::Connection(_) => e,
            other => BridgeError::Connection(other.to_string()),
        })?;
        debug!(node = %name, master = %master, id = %node.id(), "node opened");
        Ok(node)
    }

    /// Close `node`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Teardown`]; callers log it and carry on.
    pub fn close(&self, node: NodeHandle) -> Result<(), BridgeError> {
        let name = node.name().to_string();
        let id = node.id();
        self.client.close_node(node).map_err(|e| match e {
            BridgeError::Teardown(_) => e,
            other => BridgeError::Teardown(format!("node '{name}': {other}")),
        })?;
        debug!(node = %name, id = %id, "node closed");
        Ok(())
    }
}

/// ROS graph names: non-empty, `[A-Za-z0-9_/]`, not starting with a digit.
pub(crate) fn is_valid_node_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '/' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/')
}
