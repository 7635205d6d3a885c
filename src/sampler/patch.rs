use image::{imageops, RgbImage};

use crate::pipeline::display::{Affine, Viewport};

/// Crops the frame region shown under the viewport-center square of
/// `sample_size` density-independent units.
///
/// `to_view` is the frame-to-view display transform. The region is clamped
/// to the frame; `None` when nothing of the square lies inside it.
pub fn extract_patch(
    frame: &RgbImage,
    to_view: &Affine,
    viewport: &Viewport,
    sample_size: f32,
) -> Option<RgbImage> {
    let to_frame = to_view.invert()?;
    let half = sample_size * viewport.density / 2.0;
    let (cx, cy) = viewport.center();

    let corners = [
        to_frame.map_point(cx - half, cy - half),
        to_frame.map_point(cx + half, cy - half),
        to_frame.map_point(cx - half, cy + half),
        to_frame.map_point(cx + half, cy + half),
    ];
    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for (x, y) in corners {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let (width, height) = frame.dimensions();
    let clamp = |v: f32, hi: u32| v.round().clamp(0.0, hi as f32) as u32;
    let (x0, x1) = (clamp(min_x, width), clamp(max_x, width));
    let (y0, y1) = (clamp(min_y, height), clamp(max_y, height));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image())
}
