use std::sync::{PoisonError, RwLock};

use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ColorRange;

/// Pixel coordinates of a segmented region's center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: u32,
    pub y: u32,
}

/// Zeroth and first order moments of a binary mask (pixel units, not 0..255).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Moments {
    pub m00: u64,
    pub m10: u64,
    pub m01: u64,
}

impl Moments {
    /// `None` when the mask is empty.
    pub fn centroid(&self) -> Option<Centroid> {
        if self.m00 == 0 {
            return None;
        }
        let area = self.m00 as f64;
        Some(Centroid {
            x: (self.m10 as f64 / area).round() as u32,
            y: (self.m01 as f64 / area).round() as u32,
        })
    }
}

/// 255 where every channel is inside `range`, 0 elsewhere.
pub fn in_range_mask(img: &RgbImage, range: &ColorRange) -> GrayImage {
    let mut mask = GrayImage::new(img.width(), img.height());
    for (x, y, px) in img.enumerate_pixels() {
        if range.contains(px.0) {
            mask.put_pixel(x, y, Luma([255]));
        }
    }
    mask
}

pub fn moments(mask: &GrayImage) -> Moments {
    let mut m = Moments::default();
    for (x, y, px) in mask.enumerate_pixels() {
        if px.0[0] != 0 {
            m.m00 += 1;
            m.m10 += x as u64;
            m.m01 += y as u64;
        }
    }
    m
}

/// Color-window centroid finder. The window can be retuned while frames are
/// being processed; each call reads it once.
#[derive(Debug, Default)]
pub struct CentroidExtractor {
    range: RwLock<ColorRange>,
}

impl CentroidExtractor {
    pub fn new(range: ColorRange) -> Self {
        Self { range: RwLock::new(range) }
    }

    pub fn range(&self) -> ColorRange {
        *self.range.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_range(&self, range: ColorRange) {
        *self.range.write().unwrap_or_else(PoisonError::into_inner) = range;
    }

    pub fn extract(&self, img: &RgbImage) -> Option<Centroid> {
        let range = self.range();
        let m = moments(&in_range_mask(img, &range));
        let c = m.centroid();
        if c.is_none() {
            debug!("vision: no centroid ({}x{})", img.width(), img.height());
        }
        c
    }
}
