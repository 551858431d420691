//! Arm / mode / takeoff / land sequencing.
//!
//! The sequencer tracks the flight state it has had *confirmed*: the state
//! only moves after the controller accepts a request. Preconditions are
//! checked locally before anything is sent, and a failed step stops the
//! sequence it belongs to. Calls block until the controller answers; the
//! link below owns the ack timeout.

use std::fmt;

use seeker_proto::{FlightMode, VehicleStatus};
use tracing::{info, warn};

use crate::FlightController;

pub const DEFAULT_TAKEOFF_HEIGHT_M: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Disarmed,
    Armed,
    Guided,
    Landing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Arm,
    Disarm,
    SetMode(FlightMode),
    Takeoff,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Arm => f.write_str("arm"),
            Request::Disarm => f.write_str("disarm"),
            Request::SetMode(m) => write!(f, "set mode {}", m),
            Request::Takeoff => f.write_str("takeoff"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("{0} rejected by flight controller")]
    Rejected(Request),

    #[error("refusing {request}: vehicle is {state:?}")]
    Precondition { request: Request, state: FlightState },

    #[error("invalid takeoff height {0} m")]
    InvalidHeight(f32),

    #[error("{request} request failed")]
    Transport {
        request: Request,
        #[source]
        source: anyhow::Error,
    },
}

pub struct FlightSequencer<C> {
    fc: C,
    state: FlightState,
}

impl<C: FlightController> FlightSequencer<C> {
    pub fn new(fc: C) -> Self {
        Self { fc, state: FlightState::Disarmed }
    }

    pub fn state(&self) -> FlightState {
        self.state
    }

    pub fn arm(&mut self) -> Result<(), SequenceError> {
        if matches!(self.state, FlightState::Guided | FlightState::Landing) {
            return Err(self.refuse(Request::Arm));
        }
        Self::settle(Request::Arm, self.fc.request_arming(true))?;
        self.state = FlightState::Armed;
        Ok(())
    }

    pub fn disarm(&mut self) -> Result<(), SequenceError> {
        Self::settle(Request::Disarm, self.fc.request_arming(false))?;
        self.state = FlightState::Disarmed;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: FlightMode) -> Result<(), SequenceError> {
        let request = Request::SetMode(mode);
        if mode == FlightMode::Guided && !matches!(self.state, FlightState::Armed | FlightState::Guided) {
            return Err(self.refuse(request));
        }
        Self::settle(request, self.fc.request_mode(mode))?;
        self.state = match (mode, self.state) {
            (FlightMode::Guided, _) => FlightState::Guided,
            (FlightMode::Land, _) => FlightState::Landing,
            (FlightMode::Stabilize, FlightState::Disarmed) => FlightState::Disarmed,
            (FlightMode::Stabilize, _) => FlightState::Armed,
        };
        Ok(())
    }

    /// Arm, switch to guided, then climb to `height` metres. Stops at the
    /// first step that fails; the takeoff request is never sent unless both
    /// earlier steps were accepted.
    pub fn takeoff(&mut self, height: f32) -> Result<(), SequenceError> {
        if !height.is_finite() || height <= 0.0 {
            return Err(SequenceError::InvalidHeight(height));
        }
        self.arm()?;
        self.set_mode(FlightMode::Guided)?;
        Self::settle(Request::Takeoff, self.fc.request_takeoff(height))?;
        info!("sequencer: takeoff to {:.2}m accepted", height);
        Ok(())
    }

    /// Switch to LAND, then disarm. Both requests are always sent, in that
    /// order; the first error is returned.
    ///
    /// The disarm goes out right after the mode change rather than after
    /// touchdown. ArduCopter refuses to disarm in flight, so this normally
    /// comes back rejected while the vehicle descends on its own.
    pub fn land(&mut self) -> Result<(), SequenceError> {
        let mode = self.set_mode(FlightMode::Land);
        if let Err(e) = &mode {
            warn!("sequencer: {}; disarming anyway", e);
        }
        let disarm = self.disarm();
        if let Err(e) = &disarm {
            warn!("sequencer: {} (expected while still airborne)", e);
        }
        mode.and(disarm)
    }

    /// Falls back to `Disarmed` when the vehicle heartbeat reports it is
    /// disarmed, e.g. after the auto-disarm that follows a landing whose
    /// disarm request was refused. Never moves to an armed state: those
    /// need an accepted request.
    pub fn sync_with(&mut self, status: &VehicleStatus) {
        if !status.armed && self.state != FlightState::Disarmed {
            info!("sequencer: vehicle reports disarmed, leaving {:?}", self.state);
            self.state = FlightState::Disarmed;
        }
    }

    fn refuse(&self, request: Request) -> SequenceError {
        warn!("sequencer: refusing {} while {:?}", request, self.state);
        SequenceError::Precondition { request, state: self.state }
    }

    fn settle(request: Request, answer: anyhow::Result<bool>) -> Result<(), SequenceError> {
        match answer {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("sequencer: {} rejected", request);
                Err(SequenceError::Rejected(request))
            }
            Err(source) => {
                warn!("sequencer: {} failed: {:#}", request, source);
                Err(SequenceError::Transport { request, source })
            }
        }
    }
}
