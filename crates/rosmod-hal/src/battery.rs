//! [`BatterySensor`] – battery voltage from a `transbot_msgs/Battery` topic.

use std::sync::Arc;

use rosmod_middleware::{AdapterKind, AdapterState, BusClient, TopicAdapter, decode_json};
use rosmod_types::{AdapterConfig, Attributes, BatteryState, BridgeError, Readings};
use serde::Deserialize;
use serde_json::Value;

use crate::resource::{Dependencies, Resource};
use crate::sensor::Sensor;

/// Model name the host registers this sensor under.
pub const BATTERY_MODEL: &str = "viamlabs:ros:yahboombattery";

/// The battery sensor has no attributes beyond the common topic fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatteryExtra {}

pub struct BatteryKind;

impl AdapterKind for BatteryKind {
    const MODEL: &'static str = BATTERY_MODEL;
    const DEFAULT_NODE_NAME: &'static str = "viam_batterysensor_node";
    type Extra = BatteryExtra;
    type Message = BatteryState;
    type Output = Readings;

    fn decode(payload: &[u8]) -> Result<BatteryState, BridgeError> {
        decode_json(payload)
    }

    fn project(message: &BatteryState) -> Result<Readings, BridgeError> {
        Ok(Readings::from([(
            "voltage".to_string(),
            Value::from(message.voltage),
        )]))
    }
}

/// Sensor-style adapter reporting `{"voltage": <f32>}`.
pub struct BatterySensor {
    adapter: TopicAdapter<BatteryKind>,
}

impl BatterySensor {
    /// Build the sensor and subscribe to its topic.
    ///
    /// # Errors
    ///
    /// Returns the first configuration failure; nothing stays open.
    pub fn new(
        client: Arc<dyn BusClient>,
        name: impl Into<String>,
        _deps: &Dependencies,
        attributes: &Attributes,
    ) -> Result<Self, BridgeError> {
        Ok(Self {
            adapter: TopicAdapter::construct(client, name, attributes)?,
        })
    }

    pub fn state(&self) -> AdapterState {
        self.adapter.state()
    }

    pub fn config(&self) -> Option<AdapterConfig<BatteryExtra>> {
        self.adapter.config()
    }
}

impl Resource for BatterySensor {
    fn name(&self) -> &str {
        self.adapter.name()
    }

    fn reconfigure(&self, _deps: &Dependencies, attributes: &Attributes) -> Result<(), BridgeError> {
        self.adapter.configure(attributes)
    }

    fn close(&self) -> Result<(), BridgeError> {
        self.adapter.close()
    }
}

impl Sensor for BatterySensor {
    fn readings(&self, _extra: &Attributes) -> Result<Readings, BridgeError> {
        self.adapter.read_latest()
    }
}
