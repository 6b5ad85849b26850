//! The topic adapter lifecycle.
//!
//! A [`TopicAdapter`] owns one node/subscription pair on the bus and the last
//! message received on its topic.  Everything that differs between sensor
//! kinds (message schema, decoding, the product handed to callers) lives
//! behind the [`AdapterKind`] trait, so the lifecycle below is written once.
//!
//! # State machine
//!
//! ```text
//! Unconfigured ──configure──► Configuring ──ok──► Ready ──close──► Closed
//!       ▲                          │                 │
//!       └──────────error───────────┘◄──reconfigure───┘
//! ```
//!
//! # Locking
//!
//! Two locks, always taken in this order:
//!
//! 1. `lifecycle` – state, configuration and the [`Connection`].  Held by
//!    `configure` and `close` for their full duration, including the blocking
//!    bus calls, and by `read_latest` while it copies the message out.
//! 2. `latest` – the last message and the subscription generation it belongs
//!    to.  The delivery callback takes only this lock, so a bus client whose
//!    `close_subscription` waits for in-flight callbacks can never deadlock
//!    against `configure`.
//!
//! Every subscription's callback captures the generation it was opened for.
//! Replacing or closing the subscription advances the generation first, so a
//! late callback from the old subscription is discarded instead of
//! overwriting state that belongs to the new one.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rosmod_types::{AdapterConfig, Attributes, BridgeError, Stamped};
use serde::de::DeserializeOwned;
use tracing::{Span, debug, info, info_span, warn};

use crate::client::{BusAddress, BusClient, MessageCallback, NodeHandle, SubscriptionHandle};
use crate::node::NodeManager;
use crate::subscription::SubscriptionManager;

/// Everything that distinguishes one adapter kind from another.
pub trait AdapterKind: Send + Sync + 'static {
    /// Host-facing model name, e.g. `"viamlabs:ros:lidar"`.
    const MODEL: &'static str;

    /// Node name used when the configuration leaves `node_name` blank.
    const DEFAULT_NODE_NAME: &'static str;

    /// Kind-specific configuration block parsed from the same attributes as
    /// the common topic fields.
    type Extra: DeserializeOwned + Clone + Debug + Send + Sync + 'static;

    /// Decoded message type carried on the subscribed topic.
    type Message: Clone + Send + Sync + 'static;

    /// Product derived from the last message for callers.
    type Output;

    /// Decode one raw payload.  Failures are logged and the payload dropped.
    fn decode(payload: &[u8]) -> Result<Self::Message, BridgeError>;

    /// Project the last message into the caller-facing product.
    fn project(message: &Self::Message) -> Result<Self::Output, BridgeError>;
}

/// Decode a JSON payload into `M`.
pub fn decode_json<M: DeserializeOwned>(payload: &[u8]) -> Result<M, BridgeError> {
    serde_json::from_slice(payload).map_err(|e| BridgeError::Decode(e.to_string()))
}

/// Lifecycle state of a [`TopicAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// No node or subscription is open.
    Unconfigured,
    /// A (re)configuration is in progress.
    Configuring,
    /// Node and subscription are open.
    Ready,
    /// Closed for good; every further operation fails.
    Closed,
}

// ────────────────────────────────────────────────────────────────────────────
// Connection
// ────────────────────────────────────────────────────────────────────────────

/// The node/subscription pair.  The subscription depends on the node and is
/// always closed first.
#[derive(Debug)]
enum Connection {
    /// Node opened, subscription not (yet) opened.
    Partial { node: NodeHandle },
    /// Both open and bound to each other.
    Live {
        node: NodeHandle,
        subscription: SubscriptionHandle,
    },
}

impl Connection {
    fn node(&self) -> &NodeHandle {
        match self {
            Connection::Partial { node } | Connection::Live { node, .. } => node,
        }
    }

    fn attach(self, subscription: SubscriptionHandle) -> Self {
        match self {
            Connection::Partial { node } | Connection::Live { node, .. } => {
                Connection::Live { node, subscription }
            }
        }
    }

    /// Close subscription then node, logging and continuing past failures.
    fn teardown(self, nodes: &NodeManager, subscriptions: &SubscriptionManager) {
        let node = match self {
            Connection::Partial { node } => node,
            Connection::Live { node, subscription } => {
                if let Err(e) = subscriptions.close(subscription) {
                    warn!(error = %e, "failed to close subscriber");
                }
                node
            }
        };
        let name = node.name().to_string();
        if let Err(e) = nodes.close(node) {
            warn!(node = %name, error = %e, "failed to close node");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Adapter
// ────────────────────────────────────────────────────────────────────────────

struct Lifecycle<E> {
    state: AdapterState,
    config: Option<AdapterConfig<E>>,
    connection: Option<Connection>,
}

struct LatestSlot<M> {
    generation: u64,
    message: Option<Stamped<M>>,
}

/// Lifecycle manager for one topic subscription.
///
/// Safe to share between threads: every operation takes `&self`.
pub struct TopicAdapter<K: AdapterKind> {
    name: String,
    nodes: NodeManager,
    subscriptions: SubscriptionManager,
    lifecycle: Mutex<Lifecycle<K::Extra>>,
    latest: Arc<Mutex<LatestSlot<K::Message>>>,
    span: Span,
}

impl<K: AdapterKind> TopicAdapter<K> {
    /// Build an adapter called `name` and run the first
    /// [`configure`][Self::configure].
    ///
    /// # Errors
    ///
    /// Returns whatever `configure` returned; no bus resource stays open.
    pub fn construct(
        client: Arc<dyn BusClient>,
        name: impl Into<String>,
        attributes: &Attributes,
    ) -> Result<Self, BridgeError> {
        let name = name.into();
        let span = info_span!("adapter", name = %name, model = K::MODEL);
        let adapter = Self {
            name,
            nodes: NodeManager::new(Arc::clone(&client)),
            subscriptions: SubscriptionManager::new(client),
            lifecycle: Mutex::new(Lifecycle {
                state: AdapterState::Unconfigured,
                config: None,
                connection: None,
            }),
            latest: Arc::new(Mutex::new(LatestSlot {
                generation: 0,
                message: None,
            })),
            span,
        };
        adapter.configure(attributes)?;
        Ok(adapter)
    }

    /// Validate `attributes` and replace the node and subscription.
    ///
    /// A closed adapter is rejected before the attributes are looked at.
    /// Validation runs before anything is touched, so a
    /// [`BridgeError::Validation`] leaves the adapter exactly as it was.
    /// Once validation passes the old subscription and node are closed (in
    /// that order, failures logged) and new ones opened.  If the node cannot
    /// be opened the adapter is left `Unconfigured`; if the subscription
    /// cannot be opened the fresh node is closed again and the adapter is
    /// left `Unconfigured`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`], [`BridgeError::Connection`],
    /// [`BridgeError::Subscription`], or [`BridgeError::Closed`] after
    /// [`close`][Self::close].
    pub fn configure(&self, attributes: &Attributes) -> Result<(), BridgeError> {
        let _entered = self.span.enter();
        if self.state() == AdapterState::Closed {
            return Err(BridgeError::Closed);
        }

        let config = AdapterConfig::<K::Extra>::from_attributes(attributes, K::DEFAULT_NODE_NAME)?;
        let master = BusAddress::parse(&config.primary_uri)?;

        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.state == AdapterState::Closed {
            return Err(BridgeError::Closed);
        }
        let reconfigure = lifecycle.state == AdapterState::Ready;
        lifecycle.state = AdapterState::Configuring;

        let generation = self.invalidate_latest();
        if let Some(old) = lifecycle.connection.take() {
            debug!("tearing down previous connection");
            old.teardown(&self.nodes, &self.subscriptions);
        }
        lifecycle.config = None;

        let node = match self.nodes.open(&config.node_name, &master) {
            Ok(node) => node,
            Err(e) => {
                lifecycle.state = AdapterState::Unconfigured;
                return Err(e);
            }
        };
        let partial = Connection::Partial { node };

        let callback = self.message_callback(generation);
        let connection = match self
            .subscriptions
            .open(partial.node(), &config.topic, callback)
        {
            Ok(subscription) => partial.attach(subscription),
            Err(e) => {
                partial.teardown(&self.nodes, &self.subscriptions);
                lifecycle.state = AdapterState::Unconfigured;
                return Err(e);
            }
        };

        info!(
            node = %config.node_name,
            master = %master,
            topic = %config.topic,
            reconfigure,
            "adapter ready"
        );
        lifecycle.connection = Some(connection);
        lifecycle.config = Some(config);
        lifecycle.state = AdapterState::Ready;
        Ok(())
    }

    /// Project the last received message.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Closed`] after [`close`][Self::close];
    /// [`BridgeError::NotReady`] when unconfigured or before the first
    /// message; otherwise whatever [`AdapterKind::project`] returns.
    pub fn read_latest(&self) -> Result<K::Output, BridgeError> {
        let message = {
            let lifecycle = lock(&self.lifecycle);
            match lifecycle.state {
                AdapterState::Closed => return Err(BridgeError::Closed),
                AdapterState::Ready => {}
                AdapterState::Unconfigured | AdapterState::Configuring => {
                    return Err(BridgeError::NotReady("adapter is not configured".into()));
                }
            }
            let slot = lock(&self.latest);
            slot.message
                .as_ref()
                .map(|stamped| stamped.message.clone())
                .ok_or_else(|| BridgeError::NotReady("no message received yet".into()))?
        };
        K::project(&message)
    }

    /// Close the subscription, then the node, and move to `Closed`.
    ///
    /// Teardown failures are logged, never returned.  Closing an already
    /// closed adapter is a no-op.
    pub fn close(&self) -> Result<(), BridgeError> {
        let _entered = self.span.enter();
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.state == AdapterState::Closed {
            debug!("adapter already closed");
            return Ok(());
        }
        self.invalidate_latest();
        if let Some(connection) = lifecycle.connection.take() {
            connection.teardown(&self.nodes, &self.subscriptions);
        }
        lifecycle.state = AdapterState::Closed;
        info!("adapter closed");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AdapterState {
        lock(&self.lifecycle).state
    }

    /// The active configuration, `None` unless `Ready`.
    pub fn config(&self) -> Option<AdapterConfig<K::Extra>> {
        lock(&self.lifecycle).config.clone()
    }

    /// When the current subscription last stored a message.
    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.latest).message.as_ref().map(|m| m.received_at)
    }

    /// Advance the subscription generation and drop the stored message.
    /// Returns the new generation.
    fn invalidate_latest(&self) -> u64 {
        let mut slot = lock(&self.latest);
        slot.generation += 1;
        slot.message = None;
        slot.generation
    }

    fn message_callback(&self, generation: u64) -> MessageCallback {
        let latest = Arc::clone(&self.latest);
        let name = self.name.clone();
        Arc::new(move |payload: &[u8]| {
            let message = match K::decode(payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!(adapter = %name, error = %e, "dropping undecodable message");
                    return;
                }
            };
            let mut slot = lock(&latest);
            if slot.generation != generation {
                debug!(adapter = %name, "discarding message from replaced subscription");
                return;
            }
            slot.message = Some(Stamped::now(message));
        })
    }
}

impl<K: AdapterKind> Drop for TopicAdapter<K> {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = lifecycle.connection.take() {
            let _entered = self.span.enter();
            debug!("adapter dropped without close; releasing bus resources");
            connection.teardown(&self.nodes, &self.subscriptions);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
