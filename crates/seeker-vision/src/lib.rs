pub mod annotate;
pub mod camera;
pub mod centroid;
pub mod doctor;

use serde::{Deserialize, Serialize};

pub use centroid::{Centroid, CentroidExtractor, Moments};

pub const DEFAULT_LOWER: u8 = 120;
pub const DEFAULT_UPPER: u8 = 200;

/// One value per channel, in the b/g/r order the thresholds are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bgr {
    pub b: u8,
    pub g: u8,
    pub r: u8,
}

impl Bgr {
    pub const fn splat(v: u8) -> Self {
        Self { b: v, g: v, r: v }
    }
}

/// Inclusive per-channel color window used for segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRange {
    pub lower: Bgr,
    pub upper: Bgr,
}

impl Default for ColorRange {
    fn default() -> Self {
        Self { lower: Bgr::splat(DEFAULT_LOWER), upper: Bgr::splat(DEFAULT_UPPER) }
    }
}

impl ColorRange {
    /// `px` is RGB, as stored in decoded frames.
    #[inline]
    pub fn contains(&self, px: [u8; 3]) -> bool {
        let [r, g, b] = px;
        (self.lower.b..=self.upper.b).contains(&b)
            && (self.lower.g..=self.upper.g).contains(&g)
            && (self.lower.r..=self.upper.r).contains(&r)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisionConfig {
    pub blue_lower: Option<u8>,
    pub green_lower: Option<u8>,
    pub red_lower: Option<u8>,
    pub blue_upper: Option<u8>,
    pub green_upper: Option<u8>,
    pub red_upper: Option<u8>,

    /// Draw the centroid marker on debug frames.
    pub annotate: Option<bool>,

    /// When set, every `debug_every_n`-th processed frame is written here
    /// (format from the extension).
    pub debug_frame_path: Option<String>,
    pub debug_every_n: Option<u32>,
}

impl VisionConfig {
    pub fn color_range(&self) -> ColorRange {
        ColorRange {
            lower: Bgr {
                b: self.blue_lower.unwrap_or(DEFAULT_LOWER),
                g: self.green_lower.unwrap_or(DEFAULT_LOWER),
                r: self.red_lower.unwrap_or(DEFAULT_LOWER),
            },
            upper: Bgr {
                b: self.blue_upper.unwrap_or(DEFAULT_UPPER),
                g: self.green_upper.unwrap_or(DEFAULT_UPPER),
                r: self.red_upper.unwrap_or(DEFAULT_UPPER),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_120_to_200() {
        let r = VisionConfig::default().color_range();
        assert_eq!(r, ColorRange::default());
        assert!(r.contains([120, 200, 160]));
        assert!(!r.contains([119, 150, 150]));
        assert!(!r.contains([150, 150, 201]));
    }

    #[test]
    fn channels_are_matched_by_name() {
        // only blue allowed high
        let range = ColorRange {
            lower: Bgr { b: 200, g: 0, r: 0 },
            upper: Bgr { b: 255, g: 50, r: 50 },
        };
        assert!(range.contains([10, 10, 250])); // rgb: pure-ish blue
        assert!(!range.contains([250, 10, 10])); // red
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg = VisionConfig { red_upper: Some(255), ..Default::default() };
        let r = cfg.color_range();
        assert_eq!(r.upper.r, 255);
        assert_eq!(r.upper.g, DEFAULT_UPPER);
        assert_eq!(r.lower, Bgr::splat(DEFAULT_LOWER));
    }
}
