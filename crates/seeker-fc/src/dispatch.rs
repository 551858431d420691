use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mavlink::common::{MavMessage, MavModeFlag};
use mavlink::MavHeader;
use seeker_proto::{Pose, PoseStamped, Quaternion, RcIn, VehicleStatus};
use seeker_telemetry::TelemetryCache;
use tracing::{debug, info, warn};

use crate::mav::MavLink;
use crate::ned;

/// Turns vehicle messages into cache updates. Lives on the reader task; the
/// latest attitude is held here so each position report can be published
/// as a complete pose.
pub struct TelemetryDispatcher {
    cache: Arc<TelemetryCache>,
    target_sys: u8,
    attitude: Quaternion,
}

impl TelemetryDispatcher {
    pub fn new(cache: Arc<TelemetryCache>, target_sys: u8) -> Self {
        Self { cache, target_sys, attitude: Quaternion::IDENTITY }
    }

    pub fn handle(&mut self, hdr: &MavHeader, msg: &MavMessage) {
        if hdr.system_id != self.target_sys {
            return;
        }
        match msg {
            MavMessage::HEARTBEAT(hb) => {
                self.cache.update_status(VehicleStatus {
                    armed: hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED),
                    custom_mode: hb.custom_mode,
                });
            }
            MavMessage::ATTITUDE_QUATERNION(att) => {
                // q1..q4 = w, x, y, z
                let q_ned = Quaternion {
                    x: att.q2 as f64,
                    y: att.q3 as f64,
                    z: att.q4 as f64,
                    w: att.q1 as f64,
                };
                self.attitude = ned::attitude_ned_to_enu(q_ned);
            }
            MavMessage::LOCAL_POSITION_NED(pos) => {
                self.cache.update_pose(PoseStamped {
                    stamp_ms: pos.time_boot_ms,
                    pose: Pose {
                        position: ned::ned_to_enu(pos.x, pos.y, pos.z),
                        orientation: self.attitude,
                    },
                });
            }
            MavMessage::RC_CHANNELS(rc) => {
                let raw = [
                    rc.chan1_raw, rc.chan2_raw, rc.chan3_raw, rc.chan4_raw,
                    rc.chan5_raw, rc.chan6_raw, rc.chan7_raw, rc.chan8_raw,
                    rc.chan9_raw, rc.chan10_raw, rc.chan11_raw, rc.chan12_raw,
                    rc.chan13_raw, rc.chan14_raw, rc.chan15_raw, rc.chan16_raw,
                    rc.chan17_raw, rc.chan18_raw,
                ];
                self.cache.update_rc(rc_from_raw(&raw, rc.chancount, rc.rssi));
            }
            _ => {}
        }
    }
}

/// RSSI 255 means "unknown" in RC_CHANNELS.
pub fn rc_from_raw(raw: &[u16], chancount: u8, rssi: u8) -> RcIn {
    let n = (chancount as usize).min(raw.len());
    RcIn {
        channels: raw[..n].to_vec(),
        rssi: if rssi == u8::MAX { None } else { Some(rssi) },
    }
}

/// Runs [`run_reader`] on a named OS thread that nobody joins. `recv` on a
/// silent link never returns, so process exit must not wait on this thread.
pub fn spawn_reader(
    link: Arc<MavLink>,
    cache: Arc<TelemetryCache>,
    heartbeat_hz: f32,
    stop: Arc<AtomicBool>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mavlink-reader".into())
        .spawn(move || run_reader(link, cache, heartbeat_hz, stop))
}

/// Blocking reader loop: dispatches inbound messages into the cache and sends
/// the companion heartbeat. Runs until `stop` is set (checked between
/// messages).
pub fn run_reader(link: Arc<MavLink>, cache: Arc<TelemetryCache>, heartbeat_hz: f32, stop: Arc<AtomicBool>) {
    let hb_interval = Duration::from_secs_f32(1.0 / heartbeat_hz.max(0.2));
    let mut last_hb_send: Option<Instant> = None;
    let mut dispatcher = TelemetryDispatcher::new(cache, link.target_sys());
    let mut recv_errors = 0u64;

    info!("fc: reader started (heartbeat every {:?})", hb_interval);
    while !stop.load(Ordering::Relaxed) {
        if last_hb_send.map(|t| t.elapsed() >= hb_interval).unwrap_or(true) {
            if let Err(e) = link.send_heartbeat() {
                warn!("fc: heartbeat send failed: {:#}", e);
            }
            last_hb_send = Some(Instant::now());
        }

        match link.recv() {
            Ok((hdr, msg)) => dispatcher.handle(&hdr, &msg),
            Err(e) => {
                recv_errors += 1;
                if recv_errors % 100 == 1 {
                    warn!("fc: {:#} ({} errors)", e, recv_errors);
                } else {
                    debug!("fc: {:#}", e);
                }
                // Light sleep to avoid busy loop
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    info!("fc: reader stopped");
}
