use anyhow::{Context, Result};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    pub mode: String,   // "libcamera-jpeg" | "v4l2-mjpeg" | "file"
    pub device: Option<String>, // /dev/video0 (v4l2)
    pub file: Option<String>,   // still image replayed as a stream (file)
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Grab one compressed frame (JPEG, or whatever the replay file holds).
/// - libcamera-jpeg: one JPEG still from `libcamera-still` on stdout
/// - v4l2-mjpeg: one MJPEG frame through `ffmpeg`
/// - file: the bytes of `camera.file`, for bench runs without a camera
pub async fn capture_frame(cfg: &CameraConfig) -> Result<Vec<u8>> {
    match cfg.mode.as_str() {
        "libcamera-jpeg" => capture_libcamera(cfg).await,
        "v4l2-mjpeg" => capture_v4l2_ffmpeg(cfg).await,
        "file" => {
            let path = cfg.file.as_ref().context("camera.file missing (mode=file)")?;
            tokio::fs::read(path).await.with_context(|| format!("read frame file {}", path))
        }
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
}

/// Capture at `cfg.fps` forever, handing every frame to `on_frame`.
/// Capture errors are logged and retried after a short backoff.
pub async fn stream_frames<F>(cfg: &CameraConfig, mut on_frame: F)
where
    F: FnMut(Vec<u8>),
{
    let period = Duration::from_secs_f32(1.0 / cfg.fps.max(1) as f32);
    let mut failures = 0u32;
    loop {
        match capture_frame(cfg).await {
            Ok(bytes) => {
                failures = 0;
                on_frame(bytes);
                tokio::time::sleep(period).await;
            }
            Err(e) => {
                failures += 1;
                warn!("camera: capture failed (#{}): {:#}", failures, e);
                let backoff = Duration::from_millis(200 * failures.min(10) as u64);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

fn libcamera_args(cfg: &CameraConfig) -> Vec<String> {
    let mut args: Vec<String> = ["--nopreview", "--immediate", "--encoding", "jpg", "-o", "-"]
        .iter()
        .map(|a| a.to_string())
        .collect();
    args.extend(["--width".into(), cfg.width.to_string(), "--height".into(), cfg.height.to_string()]);
    args
}

fn ffmpeg_args(cfg: &CameraConfig, device: &str) -> Vec<String> {
    let size = format!("{}x{}", cfg.width, cfg.height);
    [
        "-hide_banner", "-loglevel", "error",
        "-f", "video4linux2", "-input_format", "mjpeg", "-video_size", &size,
        "-i", device,
        "-frames:v", "1", "-c:v", "copy", "-f", "mjpeg", "-",
    ]
    .iter()
    .map(|a| a.to_string())
    .collect()
}

async fn capture_libcamera(cfg: &CameraConfig) -> Result<Vec<u8>> {
    run_capture("libcamera-still", libcamera_args(cfg)).await
}

async fn capture_v4l2_ffmpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let device = cfg.device.as_deref().unwrap_or("/dev/video0");
    run_capture("ffmpeg", ffmpeg_args(cfg, device)).await
}

/// Run a capture tool that writes one encoded frame to stdout.
async fn run_capture(program: &str, args: Vec<String>) -> Result<Vec<u8>> {
    debug!("camera: {} {}", program, args.join(" "));
    let out = Command::new(program)
        .args(&args)
        .output()
        .await
        .with_context(|| format!("spawn {}", program))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        anyhow::bail!("{} exited with {}: {}", program, out.status, stderr.trim());
    }
    anyhow::ensure!(!out.stdout.is_empty(), "{} produced no frame", program);
    Ok(out.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(mode: &str) -> CameraConfig {
        CameraConfig { mode: mode.into(), device: None, file: None, width: 640, height: 480, fps: 10 }
    }

    #[test]
    fn capture_args_carry_frame_size() {
        let lib = libcamera_args(&cfg("libcamera-jpeg"));
        assert!(lib.windows(2).any(|w| w[0] == "--width" && w[1] == "640"));
        assert!(lib.windows(2).any(|w| w[0] == "--height" && w[1] == "480"));

        let ff = ffmpeg_args(&cfg("v4l2-mjpeg"), "/dev/video2");
        assert!(ff.windows(2).any(|w| w[0] == "-video_size" && w[1] == "640x480"));
        assert!(ff.windows(2).any(|w| w[0] == "-i" && w[1] == "/dev/video2"));
        assert_eq!(ff.last().map(String::as_str), Some("-"));
    }

    #[tokio::test]
    async fn file_mode_needs_a_path() {
        assert!(capture_frame(&cfg("file")).await.is_err());
        assert!(capture_frame(&cfg("webcam")).await.is_err());
    }
}
