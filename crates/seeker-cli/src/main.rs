mod mission;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use seeker_fc::autodetect::autodetect_fc;
use seeker_fc::dispatch;
use seeker_fc::mav::MavLink;
use seeker_fc::{doctor as fc_doctor, FcConfig, FlightSequencer, SetpointPublisher};
use seeker_telemetry::TelemetryCache;
use seeker_vision::{annotate, camera, doctor as vision_doctor, CentroidExtractor, VisionConfig};

use mission::{GuidanceContext, MissionConfig};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "seeker", version, about = "seeker - color-target tracking guidance for MAVLink copters")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Take off, track the color target, land.
    Run,
    Vision { #[command(subcommand)] cmd: VisionCmd },
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum VisionCmd {
    /// Run the centroid extractor on a still image.
    Centroid {
        #[arg(long)]
        image: String,
        /// Write a copy with the centroid marked.
        #[arg(long)]
        annotate: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
    /// Listen for a few seconds and print what the vehicle reported.
    Status {
        #[arg(long, default_value_t = 3)]
        secs: u64,
    },
    /// Switch to LAND and disarm.
    Land,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    fc: FcConfig,
    camera: Option<camera::CameraConfig>,
    vision: Option<VisionConfig>,
    mission: Option<MissionConfig>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Vision { cmd } => vision_cmd(&cfg, cmd)?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    fc_doctor::check_link(&cfg.fc)?;
    let vision = cfg.vision.clone().unwrap_or_default();
    vision_doctor::check_color_range(&vision.color_range())?;
    match &cfg.camera {
        Some(cam) => vision_doctor::check_camera(cam)?,
        None => warn!("doctor: no [camera] section; `run` will never see a frame"),
    }
    mission::check_mission(&cfg.mission.clone().unwrap_or_default())?;

    info!("doctor: OK");
    Ok(())
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Centroid { image, annotate: out } => {
            let vision = cfg.vision.clone().unwrap_or_default();
            let mut img = image::open(&image).with_context(|| format!("open image {}", image))?.to_rgb8();
            let extractor = CentroidExtractor::new(vision.color_range());

            match extractor.extract(&img) {
                Some(c) => {
                    println!("centroid: {} {}", c.x, c.y);
                    if let Some(out) = out {
                        annotate::mark_centroid(&mut img, c);
                        img.save(&out).with_context(|| format!("write {}", out))?;
                    }
                }
                None => println!("centroid: none"),
            }
            Ok(())
        }
    }
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let res = autodetect_fc(&cfg.fc)?;
            if let Some((dev, baud)) = &res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            for p in res.probes {
                println!("probe dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
        FcCmd::Status { secs } => {
            let link = connect(&cfg.fc)?;
            let cache = Arc::new(TelemetryCache::new());
            let stop = Arc::new(AtomicBool::new(false));
            spawn_reader(&cfg.fc, link.clone(), cache.clone(), stop.clone())?;

            tokio::time::sleep(Duration::from_secs(secs)).await;
            stop.store(true, Ordering::Relaxed);

            let snap = cache.snapshot();
            println!("heartbeat_seen={}", link.seen_heartbeat());
            println!("status={:?} mode={:?}", snap.status, snap.status.and_then(|s| s.mode()));
            println!("pose={:?}", snap.pose);
            println!("pose_received={:?}", snap.pose_received);
            println!("rc={:?}", snap.rc);
            Ok(())
        }
        FcCmd::Land => {
            let link = connect(&cfg.fc)?;
            let cache = Arc::new(TelemetryCache::new());
            let stop = Arc::new(AtomicBool::new(false));
            spawn_reader(&cfg.fc, link.clone(), cache, stop.clone())?;

            let res = tokio::task::spawn_blocking(move || FlightSequencer::new(link).land()).await?;
            stop.store(true, Ordering::Relaxed);
            match res {
                Ok(()) => println!("land: mode LAND + disarm accepted"),
                Err(e) => println!("land: {}", e),
            }
            Ok(())
        }
    }
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let vision = cfg.vision.clone().unwrap_or_default();
    let mission_cfg = cfg.mission.clone().unwrap_or_default();
    mission::check_mission(&mission_cfg)?;

    let cache = Arc::new(TelemetryCache::new());
    let stop = Arc::new(AtomicBool::new(false));

    let link = connect(&cfg.fc)?;
    spawn_reader(&cfg.fc, link.clone(), cache.clone(), stop.clone())?;

    let camera_task = match cfg.camera.clone() {
        Some(cam) => {
            let frames = spawn_frame_decoder(cache.clone())?;
            Some(tokio::spawn(async move {
                camera::stream_frames(&cam, |bytes| match frames.try_send(bytes) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => debug!("camera: decoder busy, frame dropped"),
                    Err(TrySendError::Disconnected(_)) => warn!("camera: decoder gone"),
                })
                .await
            }))
        }
        None => {
            warn!("run: no [camera] configured; tracking will see no frames");
            None
        }
    };

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("run: interrupt, finishing loop and landing");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut ctx = GuidanceContext {
        cache: cache.clone(),
        sequencer: FlightSequencer::new(link.clone()),
        setpoints: SetpointPublisher::new(link.clone(), cache.clone()),
        extractor: CentroidExtractor::new(vision.color_range()),
        stop: stop.clone(),
    };

    let result = tokio::task::spawn_blocking(move || mission::run_mission(&mut ctx, &mission_cfg, &vision))
        .await
        .context("mission task")?;

    stop.store(true, Ordering::Relaxed);
    if let Some(t) = camera_task {
        t.abort();
    }

    let report = result?;
    info!(
        "run: done reason={:?} iterations={} frames={} hits={} landed_cleanly={} decode_failures={}",
        report.reason, report.iterations, report.frames, report.hits, report.landed_cleanly,
        cache.decode_failures()
    );
    Ok(())
}

fn connect(fc: &FcConfig) -> Result<Arc<MavLink>> {
    let url = resolve_fc_url(fc)?;
    Ok(Arc::new(MavLink::connect(&url, fc).context("FC connect")?))
}

fn resolve_fc_url(fc: &FcConfig) -> Result<String> {
    if fc.autodetect {
        let res = autodetect_fc(fc)?;
        res.url().context("fc autodetect failed: no heartbeat found")
    } else {
        fc.url.clone().context("fc.url missing (autodetect=false)")
    }
}

fn spawn_reader(
    fc: &FcConfig,
    link: Arc<MavLink>,
    cache: Arc<TelemetryCache>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let hz = fc.send_heartbeat_hz.unwrap_or(1.0);
    // detached: a reader stuck in recv must not hold up exit
    dispatch::spawn_reader(link, cache, hz, stop).context("spawn mavlink reader")?;
    Ok(())
}

/// Decodes camera frames into the cache on a dedicated thread. Holds at most
/// one pending frame; the thread ends once the sender is dropped.
fn spawn_frame_decoder(cache: Arc<TelemetryCache>) -> Result<SyncSender<Vec<u8>>> {
    let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(1);
    std::thread::Builder::new()
        .name("frame-decoder".into())
        .spawn(move || {
            for bytes in rx {
                cache.update_image(&bytes);
            }
        })
        .context("spawn frame decoder")?;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn quiet_link_cfg() -> FcConfig {
        FcConfig {
            url: Some("udpin:127.0.0.1:0".into()),
            autodetect: false,
            candidate_devs: None,
            candidate_bauds: None,
            heartbeat_timeout_ms: None,
            sys_id: 42,
            comp_id: 191,
            target_sys: 1,
            target_comp: 1,
            ack_timeout_ms: None,
            send_heartbeat_hz: Some(5.0),
        }
    }

    #[test]
    fn runtime_shuts_down_with_reader_blocked_on_silent_link() {
        let fc = quiet_link_cfg();
        let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        rt.block_on(async {
            let link = connect(&fc).unwrap();
            spawn_reader(&fc, link, Arc::new(TelemetryCache::new()), stop.clone()).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        stop.store(true, Ordering::Relaxed);

        let (done_tx, done_rx) = mpsc::channel();
        std::thread::spawn(move || {
            drop(rt);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn decoder_thread_fills_the_cache_in_order() {
        let cache = Arc::new(TelemetryCache::new());
        let frames = spawn_frame_decoder(cache.clone()).unwrap();

        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([150, 150, 150])))
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        frames.send(b"definitely not a jpeg".to_vec()).unwrap();
        frames.send(png).unwrap();

        let snap = cache.wait_until(Duration::from_secs(2), |s| s.image.is_some()).expect("decoded frame");
        let frame = snap.image.unwrap();
        assert_eq!(frame.image.dimensions(), (8, 6));
        assert_eq!(cache.decode_failures(), 1);
    }
}
