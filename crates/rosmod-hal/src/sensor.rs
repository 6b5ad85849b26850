//! Generic `Sensor` trait for components that report named readings.

use rosmod_types::{Attributes, BridgeError, Readings};

use crate::resource::Resource;

/// A component whose state is a flat map of named values, e.g.
/// `{"voltage": 12.1}`.
pub trait Sensor: Resource {
    /// Current readings.  `extra` carries host-specific per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotReady`] while no data is available and
    /// [`BridgeError::Closed`] after the sensor has been closed.
    fn readings(&self, extra: &Attributes) -> Result<Readings, BridgeError>;
}
