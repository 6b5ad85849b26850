//! `rosmod-middleware` – bus plumbing and the adapter lifecycle.
//!
//! # Modules
//!
//! - [`client`] – the [`BusClient`] boundary, [`BusAddress`] and the opaque
//!   node/subscription handles.
//! - [`node`] – [`NodeManager`], name checks and error normalisation for
//!   opening and closing nodes.
//! - [`subscription`] – [`SubscriptionManager`], the same for topic
//!   subscriptions.
//! - [`adapter`] – [`TopicAdapter`], the configure / read / close lifecycle
//!   shared by every sensor kind.
//! - [`bus`] – [`LocalBus`], an in-process bus with masters, nodes and
//!   threaded delivery.  Used by tests and the simulator.
//! - `zenoh_bus` – `ZenohBus`, a zenoh-backed client (feature `zenoh`).

pub mod adapter;
pub mod bus;
pub mod client;
pub mod node;
pub mod subscription;
#[cfg(feature = "zenoh")]
pub mod zenoh_bus;

pub use adapter::{AdapterKind, AdapterState, TopicAdapter, decode_json};
pub use bus::LocalBus;
pub use client::{BusAddress, BusClient, MessageCallback, NodeHandle, SubscriptionHandle};
pub use node::NodeManager;
pub use subscription::SubscriptionManager;
#[cfg(feature = "zenoh")]
pub use zenoh_bus::ZenohBus;
