//! Region sampling: derive filter parameters from a small patch around the
//! view center.

pub mod patch;

use std::f64::consts::PI;
use std::sync::Arc;

use image::RgbImage;
use tracing::debug;

use crate::color::rgb_to_hsv;
use crate::config::SamplerConfig;
use crate::error::ParameterError;
use crate::filter::{Calibration, FilterSettings};
use crate::runtime::VisionRuntime;

pub use patch::extract_patch;

/// Pixel positions of the circle inscribed in a `width` x `height` patch.
fn in_circle(width: u32, height: u32) -> impl Fn(u32, u32) -> bool {
    let radius = (width.max(height) / 2) as i64;
    let (cx, cy) = ((width / 2) as i64, (height / 2) as i64);
    move |x, y| {
        let (dx, dy) = (x as i64 - cx, y as i64 - cy);
        dx * dx + dy * dy <= radius * radius
    }
}

/// Most frequent term; ties go to the lower term id.
pub fn modal_term(terms: impl IntoIterator<Item = u8>) -> Option<usize> {
    let mut counts = [0usize; 256];
    let mut any = false;
    for term in terms {
        counts[term as usize] += 1;
        any = true;
    }
    if !any {
        return None;
    }
    let mut best = 0;
    for (term, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = term;
        }
    }
    Some(best)
}

/// Circular mean of half-degree hues, returned in whole degrees `[0, 360)`.
///
/// Each hue is placed on the circle at `h * 2` degrees; the mean direction
/// is truncated to a half-degree step and doubled.
pub fn circular_mean_hue(hues: impl IntoIterator<Item = u8>) -> Option<u16> {
    let (mut sin, mut cos, mut n) = (0.0f64, 0.0f64, 0usize);
    for hue in hues {
        let angle = hue as f64 * PI / 90.0;
        sin += angle.sin();
        cos += angle.cos();
        n += 1;
    }
    if n == 0 {
        return None;
    }
    let half_hue = sin.atan2(cos) * 90.0 / PI;
    // Snap float noise so exact directions do not truncate one step low.
    let half_hue = (half_hue * 1e6).round() / 1e6;
    let mut hue = (half_hue as i32) * 2;
    if hue < 0 {
        hue += 360;
    }
    Some(hue as u16)
}

/// Lower bound that keeps most of `values`: the 10th percentile minus `tolerance`.
pub fn percentile_floor(values: &mut [u8], tolerance: u8) -> Option<u8> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    Some(values[values.len() / 10].saturating_sub(tolerance))
}

/// Derives hue, term and optionally thresholds from a sample patch.
#[derive(Clone)]
pub struct RegionSampler {
    config: SamplerConfig,
    runtime: Arc<VisionRuntime>,
}

impl RegionSampler {
    pub fn new(config: SamplerConfig, runtime: Arc<VisionRuntime>) -> Self {
        Self { config, runtime }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Fields of `current` the patch disagrees with. Only pixels inside the
    /// inscribed circle count.
    pub fn calibrate(&self, patch: &RgbImage, current: &FilterSettings) -> Calibration {
        let (width, height) = patch.dimensions();
        let inside = in_circle(width, height);
        let mut calibration = Calibration::default();

        match current.term_map() {
            Some(map) => {
                let terms = map.create_map(patch, &self.runtime);
                let sampled = terms
                    .enumerate_pixels()
                    .filter(|(x, y, _)| inside(*x, *y))
                    .map(|(_, _, p)| p[0]);
                if let Some(term) = modal_term(sampled) {
                    if term != current.term() && term < map.terms().len() {
                        calibration.term = Some(term);
                    }
                }
            }
            None => {
                let hues = patch
                    .enumerate_pixels()
                    .filter(|(x, y, _)| inside(*x, *y))
                    .map(|(_, _, p)| rgb_to_hsv(p[0], p[1], p[2])[0]);
                if let Some(hue) = circular_mean_hue(hues) {
                    if hue != current.state().hue() {
                        calibration.hue = Some(hue);
                    }
                }
            }
        }

        if self.config.calibrate_thresholds {
            let (mut sats, mut vals): (Vec<u8>, Vec<u8>) = patch
                .enumerate_pixels()
                .filter(|(x, y, _)| inside(*x, *y))
                .map(|(_, _, p)| {
                    let [_, s, v] = rgb_to_hsv(p[0], p[1], p[2]);
                    (s, v)
                })
                .unzip();
            let tolerance = self.config.threshold_tolerance;
            let state = current.state();
            calibration.sat_threshold = percentile_floor(&mut sats, tolerance)
                .filter(|&s| s != state.sat_threshold());
            calibration.lum_threshold = percentile_floor(&mut vals, tolerance)
                .filter(|&v| v != state.lum_threshold());
        }

        debug!(?calibration, width, height, "Region sampled");
        calibration
    }

    /// The settings after sampling `patch`, and whether anything changed.
    pub fn sample(
        &self,
        patch: &RgbImage,
        current: &FilterSettings,
    ) -> Result<(FilterSettings, bool), ParameterError> {
        let calibration = self.calibrate(patch, current);
        let updated = calibration.apply(current)?;
        Ok((updated, calibration.is_change()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::term_map::tests::rgb_map;
    use crate::filter::{FilterMode, FilterState};
    use image::Rgb;

    fn sampler(calibrate_thresholds: bool) -> RegionSampler {
        let config = SamplerConfig {
            calibrate_thresholds,
            threshold_tolerance: 10,
            ..SamplerConfig::default()
        };
        RegionSampler::new(config, VisionRuntime::init(1).expect("runtime"))
    }

    fn solid(color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(9, 9, Rgb(color))
    }

    #[test]
    fn circle_excludes_patch_corners() {
        let inside = in_circle(10, 10);
        assert!(inside(5, 5));
        assert!(inside(0, 5));
        assert!(!inside(0, 0));
        assert!(!inside(9, 9));
    }

    #[test]
    fn circular_mean_handles_the_wrap() {
        assert_eq!(circular_mean_hue([0u8; 4]), Some(0));
        assert_eq!(circular_mean_hue([60u8; 3]), Some(120));
        assert_eq!(circular_mean_hue([45u8]), Some(90));
        // 10 and 170 straddle red; the arithmetic mean would be cyan
        assert_eq!(circular_mean_hue([10u8, 170]), Some(0));
        assert_eq!(circular_mean_hue([170u8, 175]), Some(346));
        assert_eq!(circular_mean_hue(std::iter::empty()), None);
    }

    #[test]
    fn modal_term_prefers_lower_id_on_ties() {
        assert_eq!(modal_term([2u8, 1, 2, 1, 0]), Some(1));
        assert_eq!(modal_term([3u8, 3, 1]), Some(3));
        assert_eq!(modal_term(std::iter::empty()), None);
    }

    #[test]
    fn percentile_floor_subtracts_tolerance() {
        let mut values: Vec<u8> = (0..100).map(|v| v as u8 + 50).collect();
        assert_eq!(percentile_floor(&mut values, 10), Some(50));
        assert_eq!(percentile_floor(&mut [5u8], 10), Some(0));
        assert_eq!(percentile_floor(&mut [], 10), None);
    }

    #[test]
    fn green_patch_moves_the_hue_and_reports_the_change() {
        let current = FilterSettings::new(FilterState::new(0, 30, 50, 50, FilterMode::Include).unwrap());
        let (updated, changed) = sampler(false).sample(&solid([0, 255, 0]), &current).unwrap();
        assert!(changed);
        assert_eq!(updated.state().hue(), 120);
        assert_eq!(updated.state().hue_width(), 30);
        assert_eq!(updated.state().sat_threshold(), 50);

        let (again, changed) = sampler(false).sample(&solid([0, 255, 0]), &updated).unwrap();
        assert!(!changed);
        assert_eq!(again, updated);
    }

    #[test]
    fn thresholds_follow_the_patch_when_enabled() {
        let current = FilterSettings::default();
        // (200, 100, 100): s = 128, v = 200
        let (updated, changed) = sampler(true).sample(&solid([200, 100, 100]), &current).unwrap();
        assert!(changed);
        assert_eq!(updated.state().sat_threshold(), 118);
        assert_eq!(updated.state().lum_threshold(), 190);
        assert_eq!(updated.state().hue(), 0);
    }

    #[test]
    fn term_map_sampling_picks_the_dominant_term() {
        let map = Arc::new(rgb_map());
        map.set_blur_radius(0).unwrap();
        let current = FilterSettings::default().with_term_map(Some(map));
        // blue fills the circle, red only the corners
        let patch = RgbImage::from_fn(9, 9, |x, y| {
            let (dx, dy) = (x as i32 - 4, y as i32 - 4);
            if dx * dx + dy * dy <= 16 {
                Rgb([0, 0, 200])
            } else {
                Rgb([200, 0, 0])
            }
        });
        let (updated, changed) = sampler(false).sample(&patch, &current).unwrap();
        assert!(changed);
        assert_eq!(updated.term(), 2);
        assert_eq!(updated.current_term_name(), "Blue");
        assert_eq!(updated.state().hue(), current.state().hue());
    }
}
