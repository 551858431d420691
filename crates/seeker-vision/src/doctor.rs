use anyhow::Result;
use crate::{camera::CameraConfig, ColorRange};

pub fn check_color_range(range: &ColorRange) -> Result<()> {
    let (lo, hi) = (range.lower, range.upper);
    anyhow::ensure!(lo.b <= hi.b, "vision: blue_lower {} > blue_upper {}", lo.b, hi.b);
    anyhow::ensure!(lo.g <= hi.g, "vision: green_lower {} > green_upper {}", lo.g, hi.g);
    anyhow::ensure!(lo.r <= hi.r, "vision: red_lower {} > red_upper {}", lo.r, hi.r);
    Ok(())
}

pub fn check_camera(cfg: &CameraConfig) -> Result<()> {
    anyhow::ensure!(cfg.width > 0 && cfg.height > 0, "camera: width/height must be > 0");
    anyhow::ensure!(cfg.fps >= 1 && cfg.fps <= 120, "camera: fps should be 1..120");
    match cfg.mode.as_str() {
        "libcamera-jpeg" | "v4l2-mjpeg" => Ok(()),
        "file" => {
            anyhow::ensure!(cfg.file.as_ref().map(|s| !s.is_empty()).unwrap_or(false), "camera.file missing (mode=file)");
            Ok(())
        }
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
}
