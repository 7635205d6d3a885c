use image::RgbImage;
use rayon::prelude::*;

/// Number of half-degree hue steps on the 8-bit hue scale.
pub const HUE_STEPS: i32 = 180;

/// Converts one RGB triple to 8-bit HSV.
///
/// Hue is in half-degree units `[0, 180)`, saturation and value in `[0, 255]`.
/// Rounding matches the fixed-point conversion used by common vision
/// libraries, so thresholds authored against them carry over.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v == 0 {
        0
    } else {
        (2 * 255 * diff + v) / (2 * v)
    };

    let h = if diff == 0 {
        0
    } else {
        let raw = if v == r {
            g - b
        } else if v == g {
            b - r + 2 * diff
        } else {
            r - g + 4 * diff
        };
        // floor(30 * raw / diff + 0.5)
        let h = (60 * raw + diff).div_euclid(2 * diff);
        let h = if h < 0 { h + HUE_STEPS } else { h };
        if h >= HUE_STEPS {
            h - HUE_STEPS
        } else {
            h
        }
    };

    [h as u8, s as u8, v as u8]
}

/// Interleaved H, S, V planes of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsvImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl HsvImage {
    /// Converts a whole frame, one row per task.
    pub fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let mut data = vec![0u8; image.as_raw().len()];
        let row = (width as usize * 3).max(1);
        data.par_chunks_mut(row)
            .zip(image.as_raw().par_chunks(row))
            .for_each(|(out, src)| {
                for (o, s) in out.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
                    o.copy_from_slice(&rgb_to_hsv(s[0], s[1], s[2]));
                }
            });
        Self {
            width,
            height,
            data,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(3)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }
}
