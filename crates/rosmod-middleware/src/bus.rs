//! In-process bus client.
//!
//! [`LocalBus`] stands in for a real robotics bus inside one process: it runs
//! any number of masters keyed by [`BusAddress`], registers named nodes with
//! them, and fans published payloads out to every matching subscription.
//!
//! Each subscription owns a dedicated delivery thread fed by an unbounded
//! [`tokio::sync::mpsc`] channel, so callbacks run concurrently with the
//! caller and always in publish order.  Closing a subscription waits for that
//! thread to exit; once [`BusClient::close_subscription`] returns, no callback
//! for it is running or will run again.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use rosmod_types::BridgeError;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{BusAddress, BusClient, MessageCallback, NodeHandle, SubscriptionHandle};

/// Shared in-process bus.  Clone it cheaply – all clones share the same
/// masters, nodes and subscriptions.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<BusState>>,
}

#[derive(Default)]
struct BusState {
    masters: HashMap<BusAddress, Master>,
    nodes: HashMap<Uuid, NodeEntry>,
    subscriptions: HashMap<Uuid, SubscriptionEntry>,
}

#[derive(Default)]
struct Master {
    node_names: HashSet<String>,
}

struct NodeEntry {
    name: String,
    master: BusAddress,
}

struct SubscriptionEntry {
    node_id: Uuid,
    master: BusAddress,
    topic: String,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    active: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl SubscriptionEntry {
    /// Stop delivery and wait for the delivery thread to finish its current
    /// callback.
    fn shutdown(self) -> Result<(), BridgeError> {
        let SubscriptionEntry {
            topic,
            sender,
            active,
            worker,
            ..
        } = self;
        active.store(false, Ordering::Release);
        drop(sender);

        // A callback that closes its own subscription cannot join itself.
        if worker.thread().id() == thread::current().id() {
            return Ok(());
        }
        worker
            .join()
            .map_err(|_| BridgeError::Teardown(format!("delivery thread for '{topic}' panicked")))
    }
}

impl LocalBus {
    /// Create a bus with no masters running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a master at `address`.  Starting an already running master is a
    /// no-op.
    pub fn start_master(&self, address: &BusAddress) {
        self.lock().masters.entry(address.clone()).or_default();
        debug!(master = %address, "local bus master started");
    }

    /// Stop the master at `address`.  Nodes registered with it stay open but
    /// can no longer be cleanly unregistered.
    ///
    /// Returns `false` when no master was running there.
    pub fn stop_master(&self, address: &BusAddress) -> bool {
        let stopped = self.lock().masters.remove(address).is_some();
        if stopped {
            debug!(master = %address, "local bus master stopped");
        }
        stopped
    }

    /// Deliver `payload` to every active subscription on `topic` at `master`.
    ///
    /// Returns the number of subscriptions the payload was handed to.
    /// `0` is a normal condition, not an error.
    pub fn publish(&self, master: &BusAddress, topic: &str, payload: &[u8]) -> usize {
        let state = self.lock();
        state
            .subscriptions
            .values()
            .filter(|s| &s.master == master && s.topic == topic)
            .filter(|s| s.active.load(Ordering::Acquire))
            .filter(|s| s.sender.send(payload.to_vec()).is_ok())
            .count()
    }

    /// Serialise `message` as JSON and [`publish`][Self::publish] it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] if `message` cannot be serialised.
    pub fn publish_json<T: Serialize>(
        &self,
        master: &BusAddress,
        topic: &str,
        message: &T,
    ) -> Result<usize, BridgeError> {
        let payload =
            serde_json::to_vec(message).map_err(|e| BridgeError::Decode(format!("encode: {e}")))?;
        Ok(self.publish(master, topic, &payload))
    }

    /// Number of nodes currently open, across all masters.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Number of subscriptions currently open, across all masters.
    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Names registered with the master at `address`, sorted.
    pub fn node_names(&self, address: &BusAddress) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = state
            .masters
            .get(address)
            .map(|m| m.node_names.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BusClient for LocalBus {
    fn open_node(&self, name: &str, master: &BusAddress) -> Result<NodeHandle, BridgeError> {
        let mut state = self.lock();
        let registry = state.masters.get_mut(master).ok_or_else(|| {
            BridgeError::Connection(format!("no bus master running at {master}"))
        })?;
        if !registry.node_names.insert(name.to_string()) {
            return Err(BridgeError::Connection(format!(
                "node name '{name}' is already registered with {master}"
            )));
        }
        let node = NodeHandle::new(name, master.clone());
        state.nodes.insert(
            node.id(),
            NodeEntry {
                name: name.to_string(),
                master: master.clone(),
            },
        );
        Ok(node)
    }

    fn close_node(&self, node: NodeHandle) -> Result<(), BridgeError> {
        let (entry, unregistered, orphaned) = {
            let mut state = self.lock();
            let entry = state.nodes.remove(&node.id());
            let orphan_ids: Vec<Uuid> = state
                .subscriptions
                .iter()
                .filter(|(_, s)| s.node_id == node.id())
                .map(|(id, _)| *id)
                .collect();
            let orphaned: Vec<SubscriptionEntry> = orphan_ids
                .iter()
                .filter_map(|id| state.subscriptions.remove(id))
                .collect();
            let unregistered = entry.as_ref().is_some_and(|e| {
                state
                    .masters
                    .get_mut(&e.master)
                    .is_some_and(|m| m.node_names.remove(&e.name))
            });
            (entry, unregistered, orphaned)
        };

        for subscription in orphaned {
            warn!(node = %node.name(), topic = %subscription.topic, "closing subscription left open on node");
            if let Err(e) = subscription.shutdown() {
                warn!(node = %node.name(), error = %e, "orphaned subscription shutdown failed");
            }
        }

        match entry {
            None => Err(BridgeError::Teardown(format!(
                "node '{}' is not open",
                node.name()
            ))),
            Some(e) if !unregistered => Err(BridgeError::Teardown(format!(
                "bus master at {} is no longer running",
                e.master
            ))),
            Some(_) => Ok(()),
        }
    }

    fn open_subscription(
        &self,
        node: &NodeHandle,
        topic: &str,
        callback: MessageCallback,
    ) -> Result<SubscriptionHandle, BridgeError> {
        let mut state = self.lock();
        let master = match state.nodes.get(&node.id()) {
            Some(entry) => entry.master.clone(),
            None => {
                return Err(BridgeError::Subscription(format!(
                    "node '{}' is not ready",
                    node.name()
                )));
            }
        };
        if !state.masters.contains_key(&master) {
            return Err(BridgeError::Subscription(format!(
                "bus master at {master} is not running"
            )));
        }

        let (sender, mut receiver) = mpsc::unbounded_channel::<Vec<u8>>();
        let active = Arc::new(AtomicBool::new(true));
        let worker_active = Arc::clone(&active);
        let worker = thread::Builder::new()
            .name(format!("rosmod-local{topic}"))
            .spawn(move || {
                while let Some(payload) = receiver.blocking_recv() {
                    if !worker_active.load(Ordering::Acquire) {
                        break;
                    }
                    callback(payload.as_slice());
                }
            })
            .map_err(|e| BridgeError::Subscription(format!("spawn delivery thread: {e}")))?;

        let subscription = SubscriptionHandle::new(node, topic);
        state.subscriptions.insert(
            subscription.id(),
            SubscriptionEntry {
                node_id: node.id(),
                master,
                topic: topic.to_string(),
                sender,
                active,
                worker,
            },
        );
        Ok(subscription)
    }

    fn close_subscription(&self, subscription: SubscriptionHandle) -> Result<(), BridgeError> {
        let entry = self
            .lock()
            .subscriptions
            .remove(&subscription.id())
            .ok_or_else(|| {
                BridgeError::Teardown(format!(
                    "subscription to '{}' is not open",
                    subscription.topic()
                ))
            })?;
        entry.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn master() -> BusAddress {
        BusAddress::parse("localhost:11311").unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn recording_callback() -> (Arc<Mutex<Vec<Vec<u8>>>>, MessageCallback) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let callback: MessageCallback = Arc::new(move |payload: &[u8]| {
            sink.lock().unwrap().push(payload.to_vec());
        });
        (received, callback)
    }

    #[test]
    fn delivers_payloads_in_publish_order() {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let node = bus.open_node("listener", &master()).unwrap();
        let (received, callback) = recording_callback();
        let _sub = bus.open_subscription(&node, "/scan", callback).unwrap();

        for i in 0u8..50 {
            assert_eq!(bus.publish(&master(), "/scan", &[i]), 1);
        }

        assert!(wait_until(|| received.lock().unwrap().len() == 50));
        let got: Vec<u8> = received.lock().unwrap().iter().map(|p| p[0]).collect();
        assert_eq!(got, (0u8..50).collect::<Vec<_>>());
    }

    #[test]
    fn publish_only_reaches_matching_master_and_topic() {
        let bus = LocalBus::new();
        let other = BusAddress::parse("otherhost:11311").unwrap();
        bus.start_master(&master());
        bus.start_master(&other);
        let node = bus.open_node("listener", &master()).unwrap();
        let (_received, callback) = recording_callback();
        let _sub = bus.open_subscription(&node, "/scan", callback).unwrap();

        assert_eq!(bus.publish(&master(), "/battery", b"x"), 0);
        assert_eq!(bus.publish(&other, "/scan", b"x"), 0);
        assert_eq!(bus.publish(&master(), "/scan", b"x"), 1);
    }

    #[test]
    fn close_subscription_waits_for_running_callback() {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let node = bus.open_node("listener", &master()).unwrap();

        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        let callback: MessageCallback = Arc::new(move |_: &[u8]| {
            s.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            f.store(true, Ordering::SeqCst);
        });
        let sub = bus.open_subscription(&node, "/scan", callback).unwrap();

        bus.publish(&master(), "/scan", b"x");
        assert!(wait_until(|| started.load(Ordering::SeqCst)));
        bus.close_subscription(sub).unwrap();
        assert!(
            finished.load(Ordering::SeqCst),
            "close_subscription must not return while a callback is running"
        );
        assert_eq!(bus.publish(&master(), "/scan", b"x"), 0);
    }

    #[test]
    fn open_node_requires_running_master() {
        let bus = LocalBus::new();
        let result = bus.open_node("listener", &master());
        assert!(matches!(result, Err(BridgeError::Connection(_))));
    }

    #[test]
    fn duplicate_node_name_rejected_until_closed() {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let first = bus.open_node("listener", &master()).unwrap();
        assert!(matches!(
            bus.open_node("listener", &master()),
            Err(BridgeError::Connection(_))
        ));
        bus.close_node(first).unwrap();
        assert!(bus.open_node("listener", &master()).is_ok());
        assert_eq!(bus.node_names(&master()), vec!["listener".to_string()]);
    }

    #[test]
    fn close_node_closes_its_subscriptions() {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let node = bus.open_node("listener", &master()).unwrap();
        let (_received, callback) = recording_callback();
        let _sub = bus.open_subscription(&node, "/scan", callback).unwrap();
        assert_eq!(bus.subscription_count(), 1);

        bus.close_node(node).unwrap();
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.node_count(), 0);
    }

    #[test]
    fn close_node_after_master_stopped_is_teardown_error() {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let node = bus.open_node("listener", &master()).unwrap();
        assert!(bus.stop_master(&master()));

        assert!(matches!(bus.close_node(node), Err(BridgeError::Teardown(_))));
        assert_eq!(bus.node_count(), 0, "the node entry is released regardless");
    }

    #[test]
    fn closing_twice_is_teardown_error() {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let node = bus.open_node("listener", &master()).unwrap();
        let (_received, callback) = recording_callback();
        let sub = bus.open_subscription(&node, "/scan", callback).unwrap();
        let ghost = SubscriptionHandle::new(&node, "/scan");

        bus.close_subscription(sub).unwrap();
        assert!(matches!(
            bus.close_subscription(ghost),
            Err(BridgeError::Teardown(_))
        ));
    }

    #[test]
    fn publish_json_serialises_payload() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let node = bus.open_node("listener", &master())?;
        let (received, callback) = recording_callback();
        let _sub = bus.open_subscription(&node, "/battery", callback)?;

        bus.publish_json(&master(), "/battery", &serde_json::json!({ "voltage": 12.5 }))?;
        assert!(wait_until(|| !received.lock().unwrap().is_empty()));
        let payload = received.lock().unwrap()[0].clone();
        let value: serde_json::Value = serde_json::from_slice(&payload)?;
        assert_eq!(value["voltage"], 12.5);
        Ok(())
    }
}
