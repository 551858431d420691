use image::{Rgb, RgbImage};

use crate::Centroid;

const MARK: Rgb<u8> = Rgb([255, 255, 255]);
const DOT_RADIUS: i64 = 5;
const TAG_OFFSET: i64 = 25;
const TAG_LEN: i64 = 50;

/// Filled dot on the centroid and a tag bar up-left of it, where a text label
/// would sit. Purely cosmetic; callers draw on their own copy of the frame.
pub fn mark_centroid(img: &mut RgbImage, c: Centroid) {
    let (cx, cy) = (c.x as i64, c.y as i64);

    for dy in -DOT_RADIUS..=DOT_RADIUS {
        for dx in -DOT_RADIUS..=DOT_RADIUS {
            if dx * dx + dy * dy <= DOT_RADIUS * DOT_RADIUS {
                put(img, cx + dx, cy + dy);
            }
        }
    }

    let (tx, ty) = (cx - TAG_OFFSET, cy - TAG_OFFSET);
    for x in tx..tx + TAG_LEN {
        put(img, x, ty);
        put(img, x, ty + 1);
    }
}

fn put(img: &mut RgbImage, x: i64, y: i64) {
    if x >= 0 && y >= 0 && (x as u64) < img.width() as u64 && (y as u64) < img.height() as u64 {
        img.put_pixel(x as u32, y as u32, MARK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_center_and_clips_at_edges() {
        let mut img = RgbImage::new(20, 20);
        mark_centroid(&mut img, Centroid { x: 0, y: 0 });
        assert_eq!(img.get_pixel(0, 0), &MARK);
        assert_eq!(img.get_pixel(5, 0), &MARK);
        assert_eq!(img.get_pixel(6, 0), &Rgb([0, 0, 0]));
        // tag is fully off-frame here
        assert_eq!(img.get_pixel(19, 19), &Rgb([0, 0, 0]));
    }

    #[test]
    fn draws_tag_bar() {
        let mut img = RgbImage::new(100, 100);
        mark_centroid(&mut img, Centroid { x: 50, y: 50 });
        assert_eq!(img.get_pixel(25, 25), &MARK);
        assert_eq!(img.get_pixel(74, 26), &MARK);
        assert_eq!(img.get_pixel(75, 25), &Rgb([0, 0, 0]));
    }
}
