use anyhow::{Context, Result};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavResult, MavState, MavType,
        PositionTargetTypemask, COMMAND_ACK_DATA, COMMAND_LONG_DATA, HEARTBEAT_DATA,
        SET_POSITION_TARGET_LOCAL_NED_DATA,
    },
    MavConnection, MavHeader,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use seeker_proto::{FlightMode, PoseStamped, Twist};

use crate::ned;
use crate::{FcConfig, FlightController, SetpointSink};

// POSITION_TARGET_TYPEMASK bits
const IGNORE_POS: u16 = 0b111;
const IGNORE_VEL: u16 = 0b111 << 3;
const IGNORE_ACC: u16 = 0b111 << 6;
const IGNORE_YAW: u16 = 1 << 10;
const IGNORE_YAW_RATE: u16 = 1 << 11;

/// Position + yaw.
pub const POSITION_MASK: u16 = IGNORE_VEL | IGNORE_ACC | IGNORE_YAW_RATE;
/// Velocity + yaw rate.
pub const VELOCITY_MASK: u16 = IGNORE_POS | IGNORE_ACC | IGNORE_YAW;

/// One MAVLink connection shared by the reader task (recv) and the command
/// side (send + wait for ack). The connection itself is `Sync`; only one
/// command may be awaiting its ack at a time.
pub struct MavLink {
    conn: Box<dyn MavConnection<MavMessage> + Send + Sync>,
    sys_id: u8,
    comp_id: u8,
    sequence: AtomicU8,
    target_sys: u8,
    target_comp: u8,
    ack_timeout: Duration,
    acks: Mutex<VecDeque<COMMAND_ACK_DATA>>,
    ack_ready: Condvar,
    in_flight: Mutex<()>,
    seen_heartbeat: AtomicBool,
}

impl MavLink {
    pub fn connect(url: &str, cfg: &FcConfig) -> Result<Self> {
        let conn = mavlink::connect::<MavMessage>(url)
            .with_context(|| format!("mavlink connect {}", url))?;
        info!("fc: connected {}", url);
        Ok(Self::with_connection(conn, cfg))
    }

    pub fn with_connection(conn: Box<dyn MavConnection<MavMessage> + Send + Sync>, cfg: &FcConfig) -> Self {
        Self {
            conn,
            sys_id: cfg.sys_id,
            comp_id: cfg.comp_id,
            sequence: AtomicU8::new(0),
            target_sys: cfg.target_sys,
            target_comp: cfg.target_comp,
            ack_timeout: Duration::from_millis(cfg.ack_timeout_ms.unwrap_or(3000)),
            acks: Mutex::new(VecDeque::new()),
            ack_ready: Condvar::new(),
            in_flight: Mutex::new(()),
            seen_heartbeat: AtomicBool::new(false),
        }
    }

    pub fn target_sys(&self) -> u8 {
        self.target_sys
    }

    pub fn seen_heartbeat(&self) -> bool {
        self.seen_heartbeat.load(Ordering::Relaxed)
    }

    /// Blocking receive. COMMAND_ACKs addressed to us are queued for the
    /// waiting requester before the message is handed back.
    pub fn recv(&self) -> Result<(MavHeader, MavMessage)> {
        let (hdr, msg) = self.conn.recv().map_err(|e| anyhow::anyhow!("mavlink recv: {:?}", e))?;

        if hdr.system_id == self.target_sys {
            match &msg {
                MavMessage::HEARTBEAT(_) => self.seen_heartbeat.store(true, Ordering::Relaxed),
                MavMessage::COMMAND_ACK(ack) => self.push_ack(ack.clone()),
                _ => {}
            }
        }
        Ok((hdr, msg))
    }

    pub fn send_heartbeat(&self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(MavMessage::HEARTBEAT(hb))
    }

    fn push_ack(&self, ack: COMMAND_ACK_DATA) {
        let mut q = self.acks.lock().unwrap_or_else(PoisonError::into_inner);
        q.push_back(ack);
        // nobody waiting: keep only the tail
        while q.len() > 16 {
            q.pop_front();
        }
        self.ack_ready.notify_all();
    }

    /// Send a COMMAND_LONG and block until its ack (or the ack timeout).
    fn command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<bool> {
        let _one_at_a_time = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        // acks from earlier, timed-out requests are stale
        self.acks.lock().unwrap_or_else(PoisonError::into_inner).clear();

        let cmd = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        };
        debug!("fc: COMMAND_LONG {:?} {:?}", command, params);
        self.send(MavMessage::COMMAND_LONG(cmd))?;

        let deadline = Instant::now() + self.ack_timeout;
        let mut q = self.acks.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = take_answer(&mut q, command) {
                let accepted = result == MavResult::MAV_RESULT_ACCEPTED;
                if !accepted {
                    warn!("fc: {:?} answered {:?}", command, result);
                }
                return Ok(accepted);
            }

            let now = Instant::now();
            if now >= deadline {
                anyhow::bail!("no COMMAND_ACK for {:?} within {:?}", command, self.ack_timeout);
            }
            let (guard, _) = self
                .ack_ready
                .wait_timeout(q, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            q = guard;
        }
    }

    fn send(&self, msg: MavMessage) -> Result<()> {
        let hdr = MavHeader {
            system_id: self.sys_id,
            component_id: self.comp_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1),
        };
        self.conn.send(&hdr, &msg).map_err(|e| anyhow::anyhow!("mavlink send: {:?}", e))?;
        Ok(())
    }

    fn local_ned(&self, time_boot_ms: u32, mask: u16) -> SET_POSITION_TARGET_LOCAL_NED_DATA {
        SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
            type_mask: PositionTargetTypemask::from_bits_truncate(mask as _),
            target_system: self.target_sys,
            target_component: self.target_comp,
            coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
        }
    }
}

/// Drains `queue` up to the first final answer for `command`. Acks for other
/// commands and `IN_PROGRESS` updates are consumed and skipped.
fn take_answer(queue: &mut VecDeque<COMMAND_ACK_DATA>, command: MavCmd) -> Option<MavResult> {
    while let Some(ack) = queue.pop_front() {
        if ack.command != command {
            continue;
        }
        if ack.result == MavResult::MAV_RESULT_IN_PROGRESS {
            debug!("fc: {:?} in progress", command);
            continue;
        }
        return Some(ack.result);
    }
    None
}

impl FlightController for MavLink {
    fn request_arming(&self, armed: bool) -> Result<bool> {
        info!("FC: {}", if armed { "arm" } else { "disarm" });
        let p1 = if armed { 1.0 } else { 0.0 };
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [p1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn request_mode(&self, mode: FlightMode) -> Result<bool> {
        info!("FC: set mode {}", mode);
        let base = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [base, mode.custom_mode() as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn request_takeoff(&self, altitude_m: f32) -> Result<bool> {
        info!("FC: takeoff to {:.2}m", altitude_m);
        self.command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude_m])
    }
}

impl SetpointSink for MavLink {
    fn send_position(&self, target: &PoseStamped) -> Result<()> {
        let [x, y, z] = ned::enu_to_ned(target.pose.position);
        let (_, _, yaw_enu) = target.pose.orientation.to_euler();

        let mut sp = self.local_ned(target.stamp_ms, POSITION_MASK);
        sp.x = x;
        sp.y = y;
        sp.z = z;
        sp.yaw = ned::yaw_enu_to_ned(yaw_enu) as f32;
        self.send(MavMessage::SET_POSITION_TARGET_LOCAL_NED(sp))
    }

    fn send_velocity(&self, twist: &Twist) -> Result<()> {
        let [vx, vy, vz] = ned::enu_to_ned(twist.linear);

        // Only the yaw rate has a slot in this message; roll/pitch rates are
        // owned by the attitude controller.
        let mut sp = self.local_ned(0, VELOCITY_MASK);
        sp.vx = vx;
        sp.vy = vy;
        sp.vz = vz;
        sp.yaw_rate = -twist.angular.z as f32;
        self.send(MavMessage::SET_POSITION_TARGET_LOCAL_NED(sp))
    }
}
