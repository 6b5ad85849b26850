//! In-process robot simulator for CI/CD testing without a physical robot.
//!
//! [`SimRobot`] starts a master on a [`LocalBus`] and publishes plausible
//! battery and laser-scan messages on configurable topics.  This lets the
//! adapters run end to end in headless tests and the demo binary.
//!
//! # Example
//!
//! ```rust
//! use rosmod_hal::sim::SimRobot;
//! use rosmod_middleware::{BusAddress, LocalBus};
//!
//! let bus = LocalBus::new();
//! let master = BusAddress::parse("localhost:11311").unwrap();
//! let robot = SimRobot::new(bus, master)
//!     .with_battery("/transbot/battery", 12.4)
//!     .with_lidar("/scan", 360)
//!     .build();
//! robot.publish_once().expect("sim publish must succeed");
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rosmod_middleware::{BusAddress, LocalBus};
use rosmod_types::{BatteryState, BridgeError, LaserScan};
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Stub publishers
// ────────────────────────────────────────────────────────────────────────────

/// A simulated battery that drains a little with every message.
struct SimBattery {
    topic: String,
    voltage: f32,
}

impl SimBattery {
    const DRAIN_PER_TICK: f32 = 0.001;
    const CUTOFF_VOLTAGE: f32 = 9.0;

    fn next(&mut self) -> BatteryState {
        let msg = BatteryState {
            voltage: self.voltage,
        };
        self.voltage = (self.voltage - Self::DRAIN_PER_TICK).max(Self::CUTOFF_VOLTAGE);
        msg
    }
}

/// A simulated 360° lidar standing in a circular room whose radius breathes
/// slowly between ticks.
struct SimLidar {
    topic: String,
    beams: usize,
    tick: u64,
}

impl SimLidar {
    fn next(&mut self) -> LaserScan {
        let increment = std::f32::consts::TAU / self.beams.max(1) as f32;
        let radius = 2.0 + 0.5 * (self.tick as f32 * 0.1).sin();
        self.tick += 1;
        LaserScan {
            angle_min: 0.0,
            angle_max: increment * self.beams.saturating_sub(1) as f32,
            angle_increment: increment,
            range_min: 0.1,
            range_max: 12.0,
            ranges: vec![radius; self.beams],
            intensities: vec![1.0; self.beams],
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRobot builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for a simulated robot publishing on a [`LocalBus`].
pub struct SimRobot {
    bus: LocalBus,
    master: BusAddress,
    battery: Option<SimBattery>,
    lidars: Vec<SimLidar>,
}

impl SimRobot {
    /// Start with no sensors.  The master is started by [`build`][Self::build].
    pub fn new(bus: LocalBus, master: BusAddress) -> Self {
        Self {
            bus,
            master,
            battery: None,
            lidars: Vec::new(),
        }
    }

    /// Publish `transbot_msgs/Battery` on `topic`, starting at `voltage`.
    pub fn with_battery(mut self, topic: impl Into<String>, voltage: f32) -> Self {
        self.battery = Some(SimBattery {
            topic: topic.into(),
            voltage,
        });
        self
    }

    /// Publish a full-circle `sensor_msgs/LaserScan` of `beams` readings on
    /// `topic`.  May be called once per simulated lidar.
    pub fn with_lidar(mut self, topic: impl Into<String>, beams: usize) -> Self {
        self.lidars.push(SimLidar {
            topic: topic.into(),
            beams,
            tick: 0,
        });
        self
    }

    /// Start the master and return the running robot.
    pub fn build(self) -> RunningSimRobot {
        self.bus.start_master(&self.master);
        RunningSimRobot {
            bus: self.bus,
            master: self.master,
            sensors: std::sync::Mutex::new(Sensors {
                battery: self.battery,
                lidars: self.lidars,
            }),
        }
    }
}

struct Sensors {
    battery: Option<SimBattery>,
    lidars: Vec<SimLidar>,
}

/// A simulated robot whose master is up.
pub struct RunningSimRobot {
    bus: LocalBus,
    master: BusAddress,
    sensors: std::sync::Mutex<Sensors>,
}

impl RunningSimRobot {
    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    pub fn master(&self) -> &BusAddress {
        &self.master
    }

    /// Publish one message per simulated sensor.  Returns the number of
    /// subscribers reached.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] if a message cannot be encoded.
    pub fn publish_once(&self) -> Result<usize, BridgeError> {
        let mut sensors = self
            .sensors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut delivered = 0;
        if let Some(battery) = sensors.battery.as_mut() {
            let msg = battery.next();
            delivered += self.bus.publish_json(&self.master, &battery.topic, &msg)?;
        }
        for lidar in sensors.lidars.iter_mut() {
            let msg = lidar.next();
            delivered += self.bus.publish_json(&self.master, &lidar.topic, &msg)?;
        }
        Ok(delivered)
    }

    /// Publish every `period` on a background thread until the returned
    /// handle is stopped or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] if the thread cannot be spawned.
    pub fn spawn(self: Arc<Self>, period: Duration) -> Result<SimHandle, BridgeError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let worker = thread::Builder::new()
            .name("rosmod-sim".to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    match self.publish_once() {
                        Ok(n) => debug!(delivered = n, "sim tick"),
                        Err(e) => warn!(error = %e, "sim publish failed"),
                    }
                    thread::sleep(period);
                }
            })
            .map_err(|e| BridgeError::Connection(format!("spawn simulator: {e}")))?;
        Ok(SimHandle {
            running,
            worker: Some(worker),
        })
    }
}

/// Stops the background publisher on [`stop`][Self::stop] or drop.
pub struct SimHandle {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("simulator thread panicked");
            }
        }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
