//! Takeoff-then-track demonstration loop.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use seeker_fc::{FlightController, FlightSequencer, FlightState, SetpointPublisher, SetpointSink};
use seeker_proto::FlightMode;
use seeker_telemetry::{Frame, TelemetryCache};
use seeker_vision::{annotate, Centroid, CentroidExtractor, VisionConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MissionConfig {
    pub takeoff_alt_m: Option<f32>,
    pub telemetry_timeout_s: Option<u64>,
    pub mode_confirm_timeout_ms: Option<u64>,

    /// Upper bound on the climb wait; the climb normally ends earlier, once
    /// the reported altitude reaches `climb_ratio` of the target.
    pub settle_timeout_s: Option<f32>,
    pub climb_ratio: Option<f32>,

    /// Send a position hold (facing north) once the climb is done.
    pub hold_after_takeoff: Option<bool>,
    pub poll_interval_ms: Option<u64>,

    /// Loop exits: Ctrl-C always; optionally after N iterations or once the
    /// target was seen in N consecutive frames.
    pub max_iterations: Option<u64>,
    pub land_after_locked_frames: Option<u32>,

    /// m/s per unit of normalised image error. Unset: observe only.
    pub track_gain: Option<f32>,
    pub max_speed_mps: Option<f32>,
}

impl MissionConfig {
    pub fn takeoff_alt(&self) -> f32 {
        self.takeoff_alt_m.unwrap_or(0.8)
    }

    fn telemetry_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry_timeout_s.unwrap_or(10))
    }

    fn mode_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.mode_confirm_timeout_ms.unwrap_or(2000))
    }

    fn settle_timeout(&self) -> Duration {
        // check_mission rejects what Duration cannot hold
        Duration::try_from_secs_f32(self.settle_timeout_s.unwrap_or(3.0)).unwrap_or(Duration::ZERO)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(50))
    }
}

pub fn check_mission(m: &MissionConfig) -> Result<()> {
    let alt = m.takeoff_alt();
    anyhow::ensure!(alt.is_finite() && alt > 0.0 && alt <= 50.0, "mission.takeoff_alt_m should be 0..50");
    let settle = m.settle_timeout_s.unwrap_or(3.0);
    anyhow::ensure!(
        settle.is_finite() && (0.0..=600.0).contains(&settle),
        "mission.settle_timeout_s should be 0..600"
    );
    let ratio = m.climb_ratio.unwrap_or(0.9);
    anyhow::ensure!(ratio > 0.0 && ratio <= 1.0, "mission.climb_ratio should be 0..1");
    if let Some(g) = m.track_gain {
        anyhow::ensure!(g.is_finite() && g >= 0.0, "mission.track_gain must be >= 0");
    }
    anyhow::ensure!(m.max_speed_mps.unwrap_or(0.5) > 0.0, "mission.max_speed_mps must be > 0");
    anyhow::ensure!(m.poll_interval_ms.unwrap_or(50) >= 1, "mission.poll_interval_ms must be >= 1");
    Ok(())
}

/// Everything the loop works with, built once at startup.
pub struct GuidanceContext<C, S> {
    pub cache: Arc<TelemetryCache>,
    pub sequencer: FlightSequencer<C>,
    pub setpoints: SetpointPublisher<S>,
    pub extractor: CentroidExtractor,
    pub stop: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Signal,
    IterationBound,
    TargetHeld,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionReport {
    pub iterations: u64,
    pub frames: u64,
    pub hits: u64,
    pub reason: StopReason,
    pub landed_cleanly: bool,
}

pub fn run_mission<C, S>(
    ctx: &mut GuidanceContext<C, S>,
    cfg: &MissionConfig,
    vision: &VisionConfig,
) -> Result<MissionReport>
where
    C: FlightController,
    S: SetpointSink,
{
    let start = ctx
        .cache
        .wait_for_pose(cfg.telemetry_timeout())
        .context("no vehicle pose received; is the link up?")?;
    let ground_z = start.pose.position.z;
    if let Some(status) = ctx.cache.status() {
        ctx.sequencer.sync_with(&status);
    }

    let alt = cfg.takeoff_alt();
    info!("mission: takeoff {:.2}m", alt);
    if let Err(e) = ctx.sequencer.takeoff(alt) {
        error!("mission: takeoff aborted: {}", e);
        if ctx.sequencer.state() != FlightState::Disarmed {
            if let Err(land_err) = ctx.sequencer.land() {
                warn!("mission: recovery land: {}", land_err);
            }
        }
        return Err(e.into());
    }

    let guided = ctx.cache.wait_until(cfg.mode_confirm_timeout(), |s| {
        s.status.map(|st| st.mode() == Some(FlightMode::Guided)).unwrap_or(false)
    });
    if guided.is_none() {
        warn!("mission: heartbeat has not confirmed GUIDED; continuing");
    }

    let climb_z = ground_z + (alt * cfg.climb_ratio.unwrap_or(0.9)) as f64;
    match ctx.cache.wait_until(cfg.settle_timeout(), |s| {
        s.pose.map(|p| p.pose.position.z >= climb_z).unwrap_or(false)
    }) {
        Some(s) => info!("mission: climb confirmed at z={:.2}", s.pose.map(|p| p.pose.position.z).unwrap_or(0.0)),
        None => warn!("mission: climb not confirmed within {:?}; continuing", cfg.settle_timeout()),
    }

    if cfg.hold_after_takeoff.unwrap_or(true) {
        let here = ctx.cache.pose().unwrap_or(start).pose.position;
        if let Err(e) = ctx.setpoints.goto_xyz_rpy(here.x, here.y, ground_z + alt as f64, 0.0, 0.0, 0.0) {
            warn!("mission: hold setpoint failed: {:#}", e);
        }
    }

    info!("mission: tracking");
    let report = track(ctx, cfg, vision);

    info!("mission: landing ({:?})", report.reason);
    let landed_cleanly = match ctx.sequencer.land() {
        Ok(()) => true,
        Err(e) => {
            warn!("mission: land: {}", e);
            false
        }
    };

    Ok(MissionReport { landed_cleanly, ..report })
}

fn track<C, S>(ctx: &GuidanceContext<C, S>, cfg: &MissionConfig, vision: &VisionConfig) -> MissionReport
where
    C: FlightController,
    S: SetpointSink,
{
    let debug_every = vision.debug_every_n.unwrap_or(10).max(1) as u64;
    let max_speed = cfg.max_speed_mps.unwrap_or(0.5);
    let mut report = MissionReport {
        iterations: 0,
        frames: 0,
        hits: 0,
        reason: StopReason::Signal,
        landed_cleanly: false,
    };
    let mut streak = 0u32;
    let mut last_frame: Option<Arc<Frame>> = None;

    loop {
        if ctx.stop.load(Ordering::Relaxed) {
            report.reason = StopReason::Signal;
            break;
        }
        if cfg.max_iterations.map(|n| report.iterations >= n).unwrap_or(false) {
            report.reason = StopReason::IterationBound;
            break;
        }
        report.iterations += 1;

        let Some(frame) = ctx.cache.image() else {
            streak = 0;
            std::thread::sleep(cfg.poll_interval());
            continue;
        };
        // the same frame polled twice carries no new information
        let fresh = last_frame.as_ref().map(|prev| !Arc::ptr_eq(prev, &frame)).unwrap_or(true);
        last_frame = Some(frame.clone());
        report.frames += fresh as u64;

        let found = ctx.extractor.extract(&frame.image);
        report.hits += found.is_some() as u64;
        if fresh {
            match (found, streak) {
                (Some(c), 0) => info!("mission: target acquired at ({}, {})", c.x, c.y),
                (None, s) if s > 0 => info!("mission: target lost after {} frames", s),
                (Some(c), _) => debug!("mission: centroid ({}, {})", c.x, c.y),
                (None, _) => debug!("mission: no centroid"),
            }
            streak = if found.is_some() { streak.saturating_add(1) } else { 0 };
        }

        if let Some(gain) = cfg.track_gain {
            let (vx, vy) = found
                .map(|c| steer(c, frame.image.width(), frame.image.height(), gain, max_speed))
                .unwrap_or((0.0, 0.0));
            if let Err(e) = ctx.setpoints.set_velocity(vx, vy, 0.0) {
                warn!("mission: velocity setpoint failed: {:#}", e);
            }
        }

        if let Some(path) = &vision.debug_frame_path {
            if fresh && (report.frames - 1) % debug_every == 0 {
                let mut img = frame.image.clone();
                if let (Some(c), true) = (found, vision.annotate.unwrap_or(true)) {
                    annotate::mark_centroid(&mut img, c);
                }
                if let Err(e) = img.save(path) {
                    warn!("mission: debug frame {}: {}", path, e);
                }
            }
        }

        if cfg.land_after_locked_frames.map(|n| streak >= n.max(1)).unwrap_or(false) {
            report.reason = StopReason::TargetHeld;
            break;
        }

        std::thread::sleep(cfg.poll_interval());
    }

    report
}

/// Proportional steering toward the centroid for a downward camera whose
/// image top points at the vehicle nose, vehicle facing north (ENU +y).
/// Returns ENU (vx, vy), clamped to `max_speed`.
pub fn steer(c: Centroid, width: u32, height: u32, gain: f32, max_speed: f32) -> (f64, f64) {
    if width == 0 || height == 0 {
        return (0.0, 0.0);
    }
    let half_w = width as f64 / 2.0;
    let half_h = height as f64 / 2.0;
    let ex = (c.x as f64 + 0.5 - half_w) / half_w;
    let ey = (c.y as f64 + 0.5 - half_h) / half_h;

    let gain = gain as f64;
    let (vx, vy) = (gain * ex, -gain * ey);
    let speed = (vx * vx + vy * vy).sqrt();
    let max = max_speed as f64;
    if speed > max {
        (vx * max / speed, vy * max / speed)
    } else {
        (vx, vy)
    }
}
