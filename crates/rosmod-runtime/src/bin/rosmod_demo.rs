//! Runs the battery sensor and the lidar against a simulated robot on the
//! in-process bus: configure, read, reconfigure, close.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rosmod_hal::sim::SimRobot;
use rosmod_hal::{BatterySensor, Camera, Dependencies, Resource, RosLidar, Sensor};
use rosmod_middleware::{BusAddress, BusClient, LocalBus};
use rosmod_types::{Attributes, BridgeError};
use serde_json::{Value, json};
use tracing::{info, warn};

const MASTER: &str = "localhost:11311";
const TICKS: usize = 5;

fn attributes(value: Value) -> Result<Attributes, BridgeError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(BridgeError::Validation(format!(
            "attributes must be an object, got {other}"
        ))),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = rosmod_runtime::telemetry::init_tracing("rosmod-demo");

    let bus = LocalBus::new();
    let master = BusAddress::parse(MASTER)?;
    let robot = Arc::new(
        SimRobot::new(bus.clone(), master)
            .with_battery("/transbot/battery", 12.6)
            .with_lidar("/scan", 360)
            .with_lidar("/scan_rear", 180)
            .build(),
    );
    let mut sim = Arc::clone(&robot).spawn(Duration::from_millis(20))?;

    let client: Arc<dyn BusClient> = Arc::new(bus.clone());
    let deps = Dependencies::new();

    let battery = BatterySensor::new(
        Arc::clone(&client),
        "battery",
        &deps,
        &attributes(json!({ "primary_uri": MASTER, "topic": "/transbot/battery" }))?,
    )?;
    let lidar = RosLidar::new(
        Arc::clone(&client),
        "lidar",
        &deps,
        &attributes(json!({ "primary_uri": MASTER, "topic": "/scan", "time_rate_ms": 20 }))?,
    )?;
    info!(properties = ?lidar.properties()?, "lidar ready");

    for tick in 0..TICKS {
        thread::sleep(Duration::from_millis(50));
        match battery.readings(&Attributes::new()) {
            Ok(readings) => info!(tick, readings = ?readings, "battery"),
            Err(e) => warn!(tick, error = %e, "battery not ready"),
        }
        match lidar.next_point_cloud() {
            Ok(cloud) => info!(tick, points = cloud.len(), "lidar"),
            Err(e) => warn!(tick, error = %e, "lidar not ready"),
        }
    }

    lidar.reconfigure(
        &deps,
        &attributes(json!({
            "node_name": "rear_lidar_node",
            "primary_uri": MASTER,
            "topic": "/scan_rear",
        }))?,
    )?;
    info!(nodes = ?bus.node_names(robot.master()), "lidar moved to rear topic");
    thread::sleep(Duration::from_millis(50));
    if let Ok(cloud) = lidar.next_point_cloud() {
        info!(points = cloud.len(), "rear lidar");
    }

    battery.close()?;
    lidar.close()?;
    sim.stop();
    info!(
        nodes = bus.node_count(),
        subscriptions = bus.subscription_count(),
        "demo finished"
    );
    Ok(())
}
