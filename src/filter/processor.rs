use std::sync::Arc;

use image::{GrayImage, RgbImage};
use rayon::prelude::*;
use tracing::instrument;

use crate::color::hsv::HsvImage;
use crate::error::FrameError;
use crate::filter::hue_band::HueBand;
use crate::filter::state::{FilterMode, FilterSettings};
use crate::runtime::VisionRuntime;

pub const FILL_BLACK: [u8; 3] = [0, 0, 0];
pub const FILL_WHITE: [u8; 3] = [255, 255, 255];

/// Output color of one pixel for `mode`, given whether the pixel matched.
#[inline]
pub fn compose_pixel(mode: FilterMode, rgb: [u8; 3], hsv: [u8; 3], matched: bool) -> [u8; 3] {
    match (mode, matched) {
        (FilterMode::None, _) => rgb,
        (FilterMode::Include, true) => rgb,
        (FilterMode::Include, false) => FILL_BLACK,
        (FilterMode::Exclude, true) => FILL_WHITE,
        (FilterMode::Exclude, false) => rgb,
        (FilterMode::Binary, true) => FILL_WHITE,
        (FilterMode::Binary, false) => FILL_BLACK,
        (FilterMode::Saturation, true) => [hsv[1]; 3],
        (FilterMode::Saturation, false) => FILL_BLACK,
    }
}

/// Applies the current filter settings to whole frames.
#[derive(Clone)]
pub struct FilterProcessor {
    runtime: Arc<VisionRuntime>,
}

impl FilterProcessor {
    pub fn new(runtime: Arc<VisionRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<VisionRuntime> {
        &self.runtime
    }

    /// 255 where a pixel is selected by `settings`, 0 elsewhere.
    ///
    /// Without a term map a pixel is selected when its hue lies in the band
    /// and saturation and value reach their thresholds. With a term map the
    /// term decides; the thresholds still apply when `combine_with_hsv` is set.
    pub fn mask(&self, frame: &RgbImage, hsv: &HsvImage, settings: &FilterSettings) -> GrayImage {
        let (width, height) = frame.dimensions();
        let state = settings.state();
        let band = match settings.term_map() {
            Some(_) => HueBand::full(),
            None => HueBand::from_state(state),
        };
        let hues = band.table();
        let (sat, lum) = (state.sat_threshold(), state.lum_threshold());
        let hsv_selected =
            |p: &[u8]| hues[p[0] as usize] && p[1] >= sat && p[2] >= lum;

        let term_mask = settings.term_map().map(|map| {
            match u8::try_from(settings.term()) {
                Ok(term) => map.query(frame, term, &self.runtime),
                // no table entry can hold this id, so nothing matches
                Err(_) => GrayImage::new(width, height),
            }
        });

        let mut mask = vec![0u8; width as usize * height as usize];
        if mask.is_empty() {
            return GrayImage::new(width, height);
        }
        let combine = settings.combine_with_hsv();
        self.runtime.install(|| {
            mask.par_chunks_mut(width as usize)
                .zip(hsv.as_raw().par_chunks(width as usize * 3))
                .enumerate()
                .for_each(|(y, (dst, src))| {
                    let row_start = y * width as usize;
                    for (x, (d, p)) in dst.iter_mut().zip(src.chunks_exact(3)).enumerate() {
                        let selected = match &term_mask {
                            Some(terms) => {
                                let by_term = terms.as_raw()[row_start + x] != 0;
                                by_term && (!combine || hsv_selected(p))
                            }
                            None => hsv_selected(p),
                        };
                        *d = if selected { 255 } else { 0 };
                    }
                });
        });
        GrayImage::from_raw(width, height, mask).unwrap_or_else(|| GrayImage::new(width, height))
    }

    /// Filters one frame. The input is never modified.
    #[instrument(level = "debug", skip_all, fields(mode = %settings.mode()))]
    pub fn process(&self, frame: &RgbImage, settings: &FilterSettings) -> Result<RgbImage, FrameError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame(width, height));
        }
        let mode = settings.mode();
        if mode == FilterMode::None {
            return Ok(frame.clone());
        }

        let hsv = self.runtime.install(|| HsvImage::from_rgb(frame));
        let mask = self.mask(frame, &hsv, settings);

        let mut out = vec![0u8; frame.as_raw().len()];
        let row = width as usize * 3;
        self.runtime.install(|| {
            out.par_chunks_mut(row)
                .zip(frame.as_raw().par_chunks(row))
                .zip(hsv.as_raw().par_chunks(row))
                .zip(mask.as_raw().par_chunks(width as usize))
                .for_each(|(((dst, rgb), hsv), mask)| {
                    for (((d, c), h), &m) in dst
                        .chunks_exact_mut(3)
                        .zip(rgb.chunks_exact(3))
                        .zip(hsv.chunks_exact(3))
                        .zip(mask)
                    {
                        let color = compose_pixel(mode, [c[0], c[1], c[2]], [h[0], h[1], h[2]], m != 0);
                        d.copy_from_slice(&color);
                    }
                });
        });

        RgbImage::from_raw(width, height, out)
            .ok_or_else(|| FrameError::Conversion("output buffer size mismatch".to_string()))
    }
}
