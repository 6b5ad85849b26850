//! [`RosLidar`] – point clouds from a `sensor_msgs/LaserScan` topic.
//!
//! Each scan is projected into the sensor's XY plane: reading `i` lies at
//! bearing `angle_min + i * angle_increment`, at distance `ranges[i]`.
//! Readings that are not finite, or fall outside `[range_min, range_max]`,
//! are dropped.

use std::sync::Arc;

use rosmod_middleware::{AdapterKind, AdapterState, BusClient, TopicAdapter, decode_json};
use rosmod_types::{AdapterConfig, Attributes, BridgeError, LaserScan, Point3, PointCloud};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::camera::{Camera, FrameStream, Projector, Properties};
use crate::resource::{Dependencies, Resource};

/// Model name the host registers this camera under.
pub const LIDAR_MODEL: &str = "viamlabs:ros:lidar";

/// Maximum number of range readings accepted in a single scan.
///
/// Larger scans are rejected at decode time and never stored.
pub const MAX_LIDAR_RANGES: usize = 4096;

/// Lidar-specific attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LidarExtra {
    /// Expected interval between scans.  A hint only; not enforced.
    #[serde(default)]
    pub time_rate_ms: Option<u64>,
}

pub struct LidarKind;

impl AdapterKind for LidarKind {
    const MODEL: &'static str = LIDAR_MODEL;
    const DEFAULT_NODE_NAME: &'static str = "viam_lidar_node";
    type Extra = LidarExtra;
    type Message = LaserScan;
    type Output = PointCloud;

    fn decode(payload: &[u8]) -> Result<LaserScan, BridgeError> {
        let scan: LaserScan = decode_json(payload)?;
        if scan.ranges.len() > MAX_LIDAR_RANGES {
            return Err(BridgeError::Decode(format!(
                "laser scan has {} range readings, exceeding the limit of {}",
                scan.ranges.len(),
                MAX_LIDAR_RANGES,
            )));
        }
        if !scan.intensities.is_empty() && scan.intensities.len() != scan.ranges.len() {
            return Err(BridgeError::Decode(format!(
                "laser scan has {} intensities for {} ranges",
                scan.intensities.len(),
                scan.ranges.len(),
            )));
        }
        Ok(scan)
    }

    fn project(scan: &LaserScan) -> Result<PointCloud, BridgeError> {
        Ok(project_scan(scan))
    }
}

/// Project a laser scan onto the XY plane.
///
/// Intensities are carried over only when there is one per range; otherwise
/// the cloud has none.
pub fn project_scan(scan: &LaserScan) -> PointCloud {
    let intensities = match scan.intensities.len() {
        n if n > 0 && n == scan.ranges.len() => Some(&scan.intensities),
        _ => None,
    };
    let mut cloud = PointCloud::default();
    for (i, &range) in scan.ranges.iter().enumerate() {
        if !range.is_finite() || range < scan.range_min || range > scan.range_max {
            continue;
        }
        let bearing = scan.angle_min + i as f32 * scan.angle_increment;
        cloud
            .points
            .push(Point3::new(range * bearing.cos(), range * bearing.sin(), 0.0));
        if let Some(intensities) = intensities {
            cloud.intensities.push(intensities[i]);
        }
    }
    cloud
}

/// Camera-style adapter producing planar point clouds.
pub struct RosLidar {
    adapter: TopicAdapter<LidarKind>,
}

impl RosLidar {
    /// Build the lidar and subscribe to its topic.
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

    pub fn config(&self) -> Option<AdapterConfig<LidarExtra>> {
        self.adapter.config()
    }
}

impl Resource for RosLidar {
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

impl Camera for RosLidar {
    fn next_point_cloud(&self) -> Result<PointCloud, BridgeError> {
        self.adapter.read_latest()
    }

    fn properties(&self) -> Result<Properties, BridgeError> {
        if self.adapter.state() == AdapterState::Closed {
            return Err(BridgeError::Closed);
        }
        let frame_rate_hz = self
            .adapter
            .config()
            .and_then(|c| c.extra.time_rate_ms)
            .filter(|&ms| ms > 0)
            .map(|ms| 1000.0 / ms as f32);
        Ok(Properties {
            supports_pcd: true,
            frame_rate_hz,
        })
    }

    fn projector(&self) -> Result<Box<dyn Projector>, BridgeError> {
        self.unsupported("projector")
    }

    fn stream(&self) -> Result<Box<dyn FrameStream>, BridgeError> {
        self.unsupported("stream")
    }
}

impl RosLidar {
    fn unsupported<T>(&self, capability: &str) -> Result<T, BridgeError> {
        if self.adapter.state() == AdapterState::Closed {
            return Err(BridgeError::Closed);
        }
        Err(BridgeError::Unimplemented(capability.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosmod_middleware::{BusAddress, LocalBus};
    use serde_json::{Value, json};
    use std::f32::consts::FRAC_PI_2;
    use std::thread;
    use std::time::{Duration, Instant};

    const MASTER: &str = "localhost:11311";

    fn master() -> BusAddress {
        BusAddress::parse(MASTER).unwrap()
    }

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn scan(ranges: Vec<f32>) -> LaserScan {
        LaserScan {
            angle_min: 0.0,
            angle_max: FRAC_PI_2 * (ranges.len().saturating_sub(1)) as f32,
            angle_increment: FRAC_PI_2,
            range_min: 0.1,
            range_max: 10.0,
            ranges,
            intensities: Vec::new(),
        }
    }

    fn close_to(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    // ------------------------------------------------------------------
    // Projection
    // ------------------------------------------------------------------

    #[test]
    fn projects_ranges_onto_plane() {
        let cloud = project_scan(&scan(vec![1.0, 2.0]));
        assert_eq!(cloud.len(), 2);
        assert!(close_to(cloud.points[0].x, 1.0) && close_to(cloud.points[0].y, 0.0));
        assert!(close_to(cloud.points[1].x, 0.0) && close_to(cloud.points[1].y, 2.0));
        assert!(cloud.points.iter().all(|p| p.z == 0.0));
        assert!(cloud.intensities.is_empty());
    }

    #[test]
    fn drops_invalid_readings_and_keeps_bearings() {
        let mut s = scan(vec![f32::INFINITY, 0.05, f32::NAN, 50.0, 3.0]);
        s.intensities = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let cloud = project_scan(&s);
        assert_eq!(cloud.len(), 1);
        // Fifth reading: bearing 4 * pi/2, i.e. straight ahead.
        assert!(close_to(cloud.points[0].x, 3.0));
        assert_eq!(cloud.intensities, vec![5.0]);
    }

    #[test]
    fn mismatched_intensities_are_left_out() {
        let mut s = scan(vec![1.0, 2.0]);
        s.intensities = vec![7.0];
        let cloud = project_scan(&s);
        assert_eq!(cloud.len(), 2);
        assert!(cloud.intensities.is_empty());
    }

    #[test]
    fn empty_scan_gives_empty_cloud() {
        assert!(project_scan(&scan(Vec::new())).is_empty());
    }

    // ------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------

    #[test]
    fn decode_rejects_oversized_scan() {
        let payload = serde_json::to_vec(&scan(vec![1.0; MAX_LIDAR_RANGES + 1])).unwrap();
        assert!(matches!(LidarKind::decode(&payload), Err(BridgeError::Decode(_))));

        let payload = serde_json::to_vec(&scan(vec![1.0; MAX_LIDAR_RANGES])).unwrap();
        assert!(LidarKind::decode(&payload).is_ok());
    }

    #[test]
    fn decode_rejects_mismatched_intensities() {
        let mut s = scan(vec![1.0, 2.0]);
        s.intensities = vec![1.0];
        let payload = serde_json::to_vec(&s).unwrap();
        assert!(matches!(LidarKind::decode(&payload), Err(BridgeError::Decode(_))));
    }

    // ------------------------------------------------------------------
    // Adapter
    // ------------------------------------------------------------------

    fn wait_for_cloud(lidar: &RosLidar) -> Option<PointCloud> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(cloud) = lidar.next_point_cloud() {
                return Some(cloud);
            }
            thread::sleep(Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn point_cloud_from_published_scan() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let lidar = RosLidar::new(
            Arc::new(bus.clone()),
            "lidar",
            &Dependencies::new(),
            &attrs(json!({ "primary_uri": MASTER, "topic": "/scan", "time_rate_ms": 100 })),
        )?;
        assert_eq!(bus.node_names(&master()), vec!["viam_lidar_node"]);
        assert!(matches!(lidar.next_point_cloud(), Err(BridgeError::NotReady(_))));

        // Oversized scans never become the latest message.
        bus.publish_json(&master(), "/scan", &scan(vec![1.0; MAX_LIDAR_RANGES + 1]))?;
        bus.publish_json(&master(), "/scan", &scan(vec![1.0, 2.0, 3.0]))?;
        let cloud = wait_for_cloud(&lidar).ok_or("no point cloud")?;
        assert_eq!(cloud.len(), 3);

        let props = lidar.properties()?;
        assert!(props.supports_pcd);
        assert_eq!(props.frame_rate_hz, Some(10.0));
        Ok(())
    }

    #[test]
    fn time_rate_is_optional() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let lidar = RosLidar::new(
            Arc::new(bus),
            "lidar",
            &Dependencies::new(),
            &attrs(json!({ "node_name": "front_lidar", "primary_uri": MASTER, "topic": "/scan" })),
        )?;
        let config = lidar.config().ok_or("not configured")?;
        assert_eq!(config.node_name, "front_lidar");
        assert_eq!(config.extra, LidarExtra::default());
        assert_eq!(lidar.properties()?.frame_rate_hz, None);
        Ok(())
    }

    #[test]
    fn projector_and_stream_are_unimplemented() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let lidar = RosLidar::new(
            Arc::new(bus),
            "lidar",
            &Dependencies::new(),
            &attrs(json!({ "primary_uri": MASTER, "topic": "/scan" })),
        )?;
        assert!(matches!(lidar.projector(), Err(BridgeError::Unimplemented(_))));
        assert!(matches!(lidar.stream(), Err(BridgeError::Unimplemented(_))));
        Ok(())
    }

    #[test]
    fn closed_lidar_rejects_everything() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::new();
        bus.start_master(&master());
        let lidar = RosLidar::new(
            Arc::new(bus.clone()),
            "lidar",
            &Dependencies::new(),
            &attrs(json!({ "primary_uri": MASTER, "topic": "/scan" })),
        )?;
        lidar.close()?;
        lidar.close()?;
        assert_eq!(lidar.state(), AdapterState::Closed);
        assert_eq!(bus.node_count(), 0);
        assert_eq!(lidar.next_point_cloud(), Err(BridgeError::Closed));
        assert_eq!(lidar.properties(), Err(BridgeError::Closed));
        assert_eq!(lidar.projector().err(), Some(BridgeError::Closed));
        assert_eq!(lidar.stream().err(), Some(BridgeError::Closed));
        assert_eq!(
            lidar.reconfigure(
                &Dependencies::new(),
                &attrs(json!({ "primary_uri": MASTER, "topic": "/scan" }))
            ),
            Err(BridgeError::Closed)
        );
        Ok(())
    }

    #[test]
    fn lidar_attributes_have_a_schema() {
        let schema = schemars::schema_for!(LidarExtra);
        let json = serde_json::to_value(&schema).unwrap();
        assert!(json["properties"]["time_rate_ms"].is_object());
    }
}
