use anyhow::Result;
use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;
use tracing::debug;

use seeker_proto::{Pose, PoseStamped, Quaternion, Twist, Vec3};
use seeker_telemetry::TelemetryCache;

use crate::SetpointSink;

/// Added to the requested yaw before building the orientation, so that
/// yaw 0 means "facing north" in the ENU local frame.
pub const YAW_OFFSET_RAD: f64 = FRAC_PI_2;

/// Pose for `(x, y, z, roll, pitch, yaw)` with [`YAW_OFFSET_RAD`] applied.
pub fn pose_from_xyz_rpy(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Pose {
    Pose {
        position: Vec3::new(x, y, z),
        orientation: Quaternion::from_euler(roll, pitch, yaw + YAW_OFFSET_RAD),
    }
}

/// Position and velocity setpoints. Nothing is acknowledged; the vehicle only
/// follows them in guided mode, which is not checked here.
pub struct SetpointPublisher<S> {
    sink: S,
    cache: Arc<TelemetryCache>,
}

impl<S: SetpointSink> SetpointPublisher<S> {
    pub fn new(sink: S, cache: Arc<TelemetryCache>) -> Self {
        Self { sink, cache }
    }

    /// Stamped with the timestamp of the last pose received.
    pub fn goto_pose(&self, pose: Pose) -> Result<()> {
        let target = PoseStamped { stamp_ms: self.cache.stamp_ms(), pose };
        debug!("setpoint: pose {:?} @{}ms", target.pose.position, target.stamp_ms);
        self.sink.send_position(&target)
    }

    pub fn goto_xyz_rpy(&self, x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Result<()> {
        self.goto_pose(pose_from_xyz_rpy(x, y, z, roll, pitch, yaw))
    }

    pub fn set_velocity(&self, vx: f64, vy: f64, vz: f64) -> Result<()> {
        self.set_velocity_with_rates(Vec3::new(vx, vy, vz), Vec3::ZERO)
    }

    pub fn set_velocity_with_rates(&self, linear: Vec3, angular: Vec3) -> Result<()> {
        let twist = Twist { linear, angular };
        debug!("setpoint: velocity {:?} rates {:?}", linear, angular);
        self.sink.send_velocity(&twist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        positions: Mutex<Vec<PoseStamped>>,
        velocities: Mutex<Vec<Twist>>,
    }

    impl SetpointSink for RecordingSink {
        fn send_position(&self, target: &PoseStamped) -> Result<()> {
            self.positions.lock().unwrap().push(*target);
            Ok(())
        }

        fn send_velocity(&self, twist: &Twist) -> Result<()> {
            self.velocities.lock().unwrap().push(*twist);
            Ok(())
        }
    }

    fn publisher() -> (Arc<RecordingSink>, Arc<TelemetryCache>, SetpointPublisher<Arc<RecordingSink>>) {
        let sink = Arc::new(RecordingSink::default());
        let cache = Arc::new(TelemetryCache::new());
        let p = SetpointPublisher::new(sink.clone(), cache.clone());
        (sink, cache, p)
    }

    #[test]
    fn zero_rpy_faces_yaw_90() {
        let (sink, _cache, p) = publisher();
        p.goto_xyz_rpy(0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();

        let sent = sink.positions.lock().unwrap()[0];
        let expected = Quaternion::from_euler(0.0, 0.0, FRAC_PI_2);
        assert!(sent.pose.orientation.same_rotation(&expected, 1e-12));

        let (r, pi, y) = sent.pose.orientation.to_euler();
        assert!(r.abs() < 1e-12 && pi.abs() < 1e-12);
        assert!((y - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn offset_cancels_minus_90() {
        let pose = pose_from_xyz_rpy(1.0, 2.0, 3.0, 0.0, 0.0, -FRAC_PI_2);
        assert!(pose.orientation.same_rotation(&Quaternion::IDENTITY, 1e-12));
        assert_eq!(pose.position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn roll_and_pitch_survive_round_trip() {
        let pose = pose_from_xyz_rpy(0.0, 0.0, 1.0, 0.1, -0.2, 0.3);
        let (r, pi, y) = pose.orientation.to_euler();
        assert!((r - 0.1).abs() < 1e-9);
        assert!((pi + 0.2).abs() < 1e-9);
        assert!((y - (0.3 + FRAC_PI_2)).abs() < 1e-9);
    }

    #[test]
    fn pose_is_stamped_with_latest_telemetry() {
        let (sink, cache, p) = publisher();
        p.goto_pose(Pose::default()).unwrap();
        cache.update_pose(PoseStamped { stamp_ms: 8123, pose: Pose::default() });
        p.goto_pose(Pose::default()).unwrap();

        let sent = sink.positions.lock().unwrap();
        assert_eq!(sent[0].stamp_ms, 0);
        assert_eq!(sent[1].stamp_ms, 8123);
    }

    #[test]
    fn velocity_defaults_to_zero_rates() {
        let (sink, _cache, p) = publisher();
        p.set_velocity(0.5, -0.25, 1.0).unwrap();
        p.set_velocity_with_rates(Vec3::ZERO, Vec3::new(0.0, 0.0, 0.3)).unwrap();

        let sent = sink.velocities.lock().unwrap();
        assert_eq!(sent[0], Twist::linear(0.5, -0.25, 1.0));
        assert_eq!(sent[1].angular.z, 0.3);
        assert!(sink.positions.lock().unwrap().is_empty());
    }
}
