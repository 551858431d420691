use serde::{Deserialize, Serialize};

/// Raw RC input as reported by the flight controller, channel order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcIn {
    pub channels: Vec<u16>,
    pub rssi: Option<u8>,
}

/// ArduCopter custom modes used by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightMode {
    Stabilize,
    Guided,
    Land,
}

impl FlightMode {
    pub fn custom_mode(self) -> u32 {
        match self {
            FlightMode::Stabilize => 0,
            FlightMode::Guided => 4,
            FlightMode::Land => 9,
        }
    }

    pub fn from_custom_mode(mode: u32) -> Option<Self> {
        match mode {
            0 => Some(FlightMode::Stabilize),
            4 => Some(FlightMode::Guided),
            9 => Some(FlightMode::Land),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlightMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlightMode::Stabilize => "STABILIZE",
            FlightMode::Guided => "GUIDED",
            FlightMode::Land => "LAND",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FlightMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stabilize" => Ok(FlightMode::Stabilize),
            "guided" => Ok(FlightMode::Guided),
            "land" => Ok(FlightMode::Land),
            other => Err(format!("unknown flight mode: {}", other)),
        }
    }
}

/// What the vehicle last said about itself in HEARTBEAT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleStatus {
    pub armed: bool,
    pub custom_mode: u32,
}

impl VehicleStatus {
    pub fn mode(&self) -> Option<FlightMode> {
        FlightMode::from_custom_mode(self.custom_mode)
    }
}
