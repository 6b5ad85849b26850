//! [`SubscriptionManager`] – opens and closes topic subscriptions.

use std::sync::Arc;

use rosmod_types::BridgeError;
use tracing::debug;

use crate::client::{BusClient, MessageCallback, NodeHandle, SubscriptionHandle};

/// Opens and closes [`SubscriptionHandle`]s on behalf of an adapter.
///
/// The callback passed to [`open`][Self::open] runs on the bus client's
/// delivery thread, concurrently with whatever the adapter is doing.
#[derive(Clone)]
pub struct SubscriptionManager {
    client: Arc<dyn BusClient>,
}

impl SubscriptionManager {
    pub fn new(client: Arc<dyn BusClient>) -> Self {
        Self { client }
    }

    /// Subscribe `node` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Subscription`] when the topic name is invalid or
    /// the node is not ready.
    pub fn open(
        &self,
        node: &NodeHandle,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<SubscriptionHandle, BridgeError> {
        if !is_valid_topic_name(topic) {
            return Err(BridgeError::Subscription(format!(
                "invalid topic name '{topic}'"
            )));
        }
        let subscription = self
            .client
            .open_subscription(node, topic, on_message)
            .map_err(|e| match e {
                BridgeError::Subscription(_) => e,
                other => BridgeError::Subscription(other.to_string()),
            })?;
        debug!(node = %node.name(), topic = %topic, id = %subscription.id(), "subscribed");
        Ok(subscription)
    }

    /// Close `subscription`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Teardown`]; callers log it and carry on.
    pub fn close(&self, subscription: SubscriptionHandle) -> Result<(), BridgeError> {
        let topic = subscription.topic().to_string();
        self.client
            .close_subscription(subscription)
            .map_err(|e| match e {
                BridgeError::Teardown(_) => e,
                other => BridgeError::Teardown(format!("subscription to '{topic}': {other}")),
            })?;
        debug!(topic = %topic, "unsubscribed");
        Ok(())
    }
}

/// ROS topic names: start with `/`, `~` or a letter; `[A-Za-z0-9_/]` after
/// that, so `~` only ever marks a private name; no empty path segments; not
/// the bare `/` or `~`.
pub(crate) fn is_valid_topic_name(topic: &str) -> bool {
    let mut chars = topic.chars();
    let leading_ok = matches!(
        chars.next(),
        Some(c) if c.is_ascii_alphabetic() || c == '/' || c == '~'
    );
    leading_ok
        && topic != "/"
        && topic != "~"
        && !topic.contains("//")
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::client::BusAddress;

    fn setup() -> (LocalBus, SubscriptionManager, NodeHandle) {
        let bus = LocalBus::new();
        let master = BusAddress::parse("localhost:11311").unwrap();
        bus.start_master(&master);
        let node = bus_node(&bus, &master);
        let subscriptions = SubscriptionManager::new(Arc::new(bus.clone()));
        (bus, subscriptions, node)
    }

    fn bus_node(bus: &LocalBus, master: &BusAddress) -> NodeHandle {
        bus.open_node("node", master).unwrap()
    }

    fn noop() -> MessageCallback {
        Arc::new(|_: &[u8]| {})
    }

    #[test]
    fn topic_name_rules() {
        assert!(is_valid_topic_name("/scan"));
        assert!(is_valid_topic_name("/transbot/battery"));
        assert!(is_valid_topic_name("scan"));
        assert!(is_valid_topic_name("~private"));
        assert!(is_valid_topic_name("s"));
        assert!(!is_valid_topic_name(""));
        assert!(!is_valid_topic_name("/"));
        assert!(!is_valid_topic_name("//scan"));
        assert!(!is_valid_topic_name("/sc an"));
        assert!(!is_valid_topic_name("1scan"));
        assert!(!is_valid_topic_name("~"));
        assert!(!is_valid_topic_name("/robot/~scan"));
    }

    #[test]
    fn open_rejects_invalid_topic() {
        let (bus, subscriptions, node) = setup();
        let result = subscriptions.open(&node, "/bad topic", noop());
        assert!(matches!(result, Err(BridgeError::Subscription(_))));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn open_on_unknown_node_is_subscription_error() {
        let (bus, subscriptions, node) = setup();
        bus.close_node(node).unwrap();
        let ghost = NodeHandle::new("node", BusAddress::parse("localhost:11311").unwrap());
        let result = subscriptions.open(&ghost, "/scan", noop());
        assert!(matches!(result, Err(BridgeError::Subscription(_))));
    }

    #[test]
    fn open_and_close_round_trip() {
        let (bus, subscriptions, node) = setup();
        let sub = subscriptions.open(&node, "/scan", noop()).unwrap();
        assert_eq!(bus.subscription_count(), 1);
        subscriptions.close(sub).unwrap();
        assert_eq!(bus.subscription_count(), 0);
    }
}
