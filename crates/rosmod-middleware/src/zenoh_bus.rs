//! [`ZenohBus`] – a [`BusClient`] over a zenoh router.
//!
//! Each node is its own zenoh session in client mode, connected to the
//! router at the node's master address.  Topics map onto key expressions by
//! dropping the leading `/`; private `~name` topics expand under the node
//! name.  Payloads are delivered as raw bytes on zenoh's callback thread.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rosmod_types::BridgeError;
use tracing::{debug, warn};
use uuid::Uuid;
use zenoh::Wait;
use zenoh::pubsub::Subscriber;
use zenoh::{Config, Session};

use crate::client::{BusAddress, BusClient, MessageCallback, NodeHandle, SubscriptionHandle};

struct OpenSubscriber {
    node_id: Uuid,
    subscriber: Subscriber<()>,
}

#[derive(Default)]
pub struct ZenohBus {
    sessions: Mutex<HashMap<Uuid, Session>>,
    subscribers: Mutex<HashMap<Uuid, OpenSubscriber>>,
}

impl ZenohBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_config(master: &BusAddress) -> Result<Config, BridgeError> {
        let mut config = Config::default();
        let invalid = |e: Box<dyn std::error::Error + Send + Sync>| {
            BridgeError::Connection(format!("zenoh config: {e}"))
        };
        config.insert_json5("mode", r#""client""#).map_err(invalid)?;
        config
            .insert_json5("connect/endpoints", &format!(r#"["tcp/{master}"]"#))
            .map_err(invalid)?;
        config
            .insert_json5("scouting/multicast/enabled", "false")
            .map_err(invalid)?;
        Ok(config)
    }
}

/// Key expression for `topic` as seen from node `node_name`.
pub(crate) fn key_expr(node_name: &str, topic: &str) -> String {
    match topic.strip_prefix('~') {
        Some(private) => format!(
            "{}/{}",
            node_name.trim_matches('/'),
            private.trim_start_matches('/')
        ),
        None => topic.trim_start_matches('/').to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BusClient for ZenohBus {
    fn open_node(&self, name: &str, master: &BusAddress) -> Result<NodeHandle, BridgeError> {
        let config = Self::session_config(master)?;
        let session = zenoh::open(config)
            .wait()
            .map_err(|e| BridgeError::Connection(format!("zenoh router {master}: {e}")))?;
        let node = NodeHandle::new(name, master.clone());
        debug!(node = %name, zid = %session.zid(), "zenoh session opened");
        lock(&self.sessions).insert(node.id(), session);
        Ok(node)
    }

    fn close_node(&self, node: NodeHandle) -> Result<(), BridgeError> {
        let session = lock(&self.sessions)
            .remove(&node.id())
            .ok_or_else(|| BridgeError::Teardown(format!("unknown node '{}'", node.name())))?;

        let orphans: Vec<OpenSubscriber> = {
            let mut subscribers = lock(&self.subscribers);
            let ids: Vec<Uuid> = subscribers
                .iter()
                .filter(|(_, s)| s.node_id == node.id())
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| subscribers.remove(id)).collect()
        };
        for orphan in orphans {
            warn!(node = %node.name(), "closing subscriber left open on node");
            if let Err(e) = orphan.subscriber.undeclare().wait() {
                warn!(node = %node.name(), error = %e, "failed to undeclare subscriber");
            }
        }

        session
            .close()
            .wait()
            .map_err(|e| BridgeError::Teardown(format!("zenoh session '{}': {e}", node.name())))
    }

    fn open_subscription(
        &self,
        node: &NodeHandle,
        topic: &str,
        callback: MessageCallback,
    ) -> Result<SubscriptionHandle, BridgeError> {
        let session = lock(&self.sessions)
            .get(&node.id())
            .cloned()
            .ok_or_else(|| BridgeError::Subscription(format!("unknown node '{}'", node.name())))?;

        let key = key_expr(node.name(), topic);
        let subscriber = session
            .declare_subscriber(key.clone())
            .callback(move |sample| {
                let payload = sample.payload().to_bytes();
                callback(payload.as_ref());
            })
            .wait()
            .map_err(|e| BridgeError::Subscription(format!("declare '{key}': {e}")))?;

        let handle = SubscriptionHandle::new(node, topic);
        lock(&self.subscribers).insert(
            handle.id(),
            OpenSubscriber {
                node_id: node.id(),
                subscriber,
            },
        );
        Ok(handle)
    }

    fn close_subscription(&self, subscription: SubscriptionHandle) -> Result<(), BridgeError> {
        let open = lock(&self.subscribers)
            .remove(&subscription.id())
            .ok_or_else(|| {
                BridgeError::Teardown(format!("unknown subscription to '{}'", subscription.topic()))
            })?;
        open.subscriber
            .undeclare()
            .wait()
            .map_err(|e| BridgeError::Teardown(format!("undeclare '{}': {e}", subscription.topic())))
    }
}
