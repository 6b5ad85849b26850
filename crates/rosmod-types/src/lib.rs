//! `rosmod-types` – shared vocabulary for the ROS bus adapters.
//!
//! Everything that crosses a crate boundary lives here: the
//! [`BridgeError`] taxonomy, the validated [`AdapterConfig`], the decoded
//! message schemas and the products derived from them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// String-keyed configuration attributes as handed over by the host.
pub type Attributes = serde_json::Map<String, Value>;

/// Sensor readings keyed by field name, e.g. `{"voltage": 12.1}`.
pub type Readings = HashMap<String, Value>;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// The one error type shared by every adapter crate.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeError {
    /// A configuration field is missing or malformed.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The bus master could not be reached or the node name was rejected.
    #[error("bus connection failed: {0}")]
    Connection(String),

    /// The topic subscription could not be created.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// No message has been received on the subscribed topic yet.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The adapter has been closed.
    #[error("adapter is closed")]
    Closed,

    /// Closing a node or subscription failed.  Logged, never propagated by
    /// the adapter lifecycle.
    #[error("teardown failed: {0}")]
    Teardown(String),

    /// A payload could not be decoded into the expected message type.
    #[error("decode error: {0}")]
    Decode(String),

    /// The capability exists on the trait but has no implementation.
    #[error("{0} is not implemented")]
    Unimplemented(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Raw attributes shared by every topic adapter, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TopicAttributes {
    /// Name this adapter's node registers under.  Defaults per adapter kind.
    #[serde(default)]
    pub node_name: String,
    /// Bus master address, `hostname:port`.
    #[serde(default)]
    pub primary_uri: String,
    /// Topic to subscribe to.
    #[serde(default)]
    pub topic: String,
}

/// Validated adapter configuration: the common topic fields plus a
/// kind-specific `extra` block parsed from the same attribute map.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig<E> {
    pub node_name: String,
    pub primary_uri: String,
    pub topic: String,
    pub extra: E,
}

impl<E: DeserializeOwned> AdapterConfig<E> {
    /// Parse and validate `attributes`.
    ///
    /// `primary_uri` and `topic` are trimmed and must be non-empty.  An empty
    /// `node_name` is replaced by `default_node_name`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] when a required field is empty or
    /// an attribute has the wrong type.
    pub fn from_attributes(
        attributes: &Attributes,
        default_node_name: &str,
    ) -> Result<Self, BridgeError> {
        let raw = Value::Object(attributes.clone());
        let common: TopicAttributes = serde_json::from_value(raw.clone())
            .map_err(|e| BridgeError::Validation(e.to_string()))?;
        let extra: E =
            serde_json::from_value(raw).map_err(|e| BridgeError::Validation(e.to_string()))?;

        let primary_uri = common.primary_uri.trim();
        if primary_uri.is_empty() {
            return Err(BridgeError::Validation("primary uri must be set".to_string()));
        }
        let topic = common.topic.trim();
        if topic.is_empty() {
            return Err(BridgeError::Validation("topic must be set".to_string()));
        }
        let node_name = match common.node_name.trim() {
            "" => default_node_name,
            name => name,
        };

        Ok(Self {
            node_name: node_name.to_string(),
            primary_uri: primary_uri.to_string(),
            topic: topic.to_string(),
            extra,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────────────────

/// A decoded message together with the time the adapter stored it.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<M> {
    pub received_at: DateTime<Utc>,
    pub message: M,
}

impl<M> Stamped<M> {
    pub fn now(message: M) -> Self {
        Self {
            received_at: Utc::now(),
            message,
        }
    }
}

/// `transbot_msgs/Battery` as published by the Yahboom Transbot base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub voltage: f32,
}

/// `sensor_msgs/LaserScan`: a single planar sweep of a 2-D LiDAR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    /// Bearing of the first reading (rad).
    pub angle_min: f32,
    /// Bearing of the last reading (rad).
    pub angle_max: f32,
    /// Angular step between consecutive readings (rad).
    pub angle_increment: f32,
    /// Minimum valid range (m).
    pub range_min: f32,
    /// Maximum valid range (m).
    pub range_max: f32,
    /// Measured distances (m).
    pub ranges: Vec<f32>,
    /// Optional per-reading intensities; empty or the same length as `ranges`.
    #[serde(default)]
    pub intensities: Vec<f32>,
}

// ────────────────────────────────────────────────────────────────────────────
// Derived products
// ────────────────────────────────────────────────────────────────────────────

/// A point in the sensor frame (m).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Unordered point cloud.  `intensities` is either empty or parallel to
/// `points`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub points: Vec<Point3>,
    pub intensities: Vec<f32>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
