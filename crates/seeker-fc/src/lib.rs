pub mod autodetect;
pub mod dispatch;
pub mod doctor;
pub mod mav;
pub mod ned;
pub mod sequencer;
pub mod setpoint;

use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;

use seeker_proto::{FlightMode, PoseStamped, Twist};

pub use sequencer::{FlightSequencer, FlightState, Request, SequenceError};
pub use setpoint::SetpointPublisher;

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    /// MAVLink connection string used when autodetect=false, e.g.
    /// "udpin:0.0.0.0:14550", "tcpout:127.0.0.1:5760", "serial:/dev/ttyACM0:57600".
    pub url: Option<String>,

    /// If true, probe candidate serial ports/bauds and pick the first
    /// that yields MAVLink HEARTBEAT.
    pub autodetect: bool,

    /// Autodetect candidates (paths). Example:
    /// ["/dev/serial0","/dev/ttyAMA0","/dev/ttyS0","/dev/ttyUSB0","/dev/ttyACM0"]
    pub candidate_devs: Option<Vec<String>>,

    /// Autodetect candidate baud rates (common ArduPilot telemetry values).
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per probe attempt
    pub heartbeat_timeout_ms: Option<u64>,

    /// MAVLink ids we use (companion side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (FC side). 1/1 is common for ArduPilot.
    pub target_sys: u8,
    pub target_comp: u8,

    /// How long a command waits for its COMMAND_ACK. Default 3s.
    pub ack_timeout_ms: Option<u64>,

    /// Companion heartbeat send rate. Default 1Hz.
    pub send_heartbeat_hz: Option<f32>,
}

/// Request/response side of the flight controller. `Ok(false)` means the
/// controller answered and said no; `Err` means no usable answer arrived.
pub trait FlightController: Send + Sync {
    fn request_arming(&self, armed: bool) -> Result<bool>;
    fn request_mode(&self, mode: FlightMode) -> Result<bool>;
    fn request_takeoff(&self, altitude_m: f32) -> Result<bool>;
}

/// Fire-and-forget setpoint stream.
pub trait SetpointSink: Send + Sync {
    fn send_position(&self, target: &PoseStamped) -> Result<()>;
    fn send_velocity(&self, twist: &Twist) -> Result<()>;
}

impl<T: FlightController + ?Sized> FlightController for Arc<T> {
    fn request_arming(&self, armed: bool) -> Result<bool> {
        (**self).request_arming(armed)
    }

    fn request_mode(&self, mode: FlightMode) -> Result<bool> {
        (**self).request_mode(mode)
    }

    fn request_takeoff(&self, altitude_m: f32) -> Result<bool> {
        (**self).request_takeoff(altitude_m)
    }
}

impl<T: SetpointSink + ?Sized> SetpointSink for Arc<T> {
    fn send_position(&self, target: &PoseStamped) -> Result<()> {
        (**self).send_position(target)
    }

    fn send_velocity(&self, twist: &Twist) -> Result<()> {
        (**self).send_velocity(twist)
    }
}
