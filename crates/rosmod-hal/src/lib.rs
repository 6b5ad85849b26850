//! `rosmod-hal` – host-facing components backed by bus topics.
//!
//! # Modules
//!
//! - [`resource`] – the [`Resource`] trait every component implements and
//!   the [`Dependencies`] map a host passes in.
//! - [`sensor`] / [`camera`] – the two component shapes the adapters take.
//! - [`battery`] – [`BatterySensor`], voltage readings from a battery topic.
//! - [`lidar`] – [`RosLidar`], point clouds from a laser-scan topic.
//! - [`sim`] – [`SimRobot`][sim::SimRobot], a simulated robot on a
//!   [`LocalBus`][rosmod_middleware::LocalBus] for headless testing.

pub mod battery;
pub mod camera;
pub mod lidar;
pub mod resource;
pub mod sensor;
pub mod sim;

pub use battery::{BATTERY_MODEL, BatteryKind, BatterySensor};
pub use camera::{Camera, CameraFrame, FrameStream, Projector, Properties};
pub use lidar::{LIDAR_MODEL, LidarExtra, LidarKind, MAX_LIDAR_RANGES, RosLidar};
pub use resource::{Dependencies, Resource};
pub use sensor::Sensor;
