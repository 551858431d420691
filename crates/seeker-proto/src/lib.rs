pub mod geometry;
pub mod telemetry;

pub use geometry::{Pose, PoseStamped, Quaternion, Twist, Vec3};
pub use telemetry::{FlightMode, RcIn, VehicleStatus};
