use std::path::Path;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageReader, Limits, RgbImage};
use uuid::Uuid;

use crate::common::Frame;
use crate::error::AppError;

/// A decoded still image that can be submitted to the pipeline repeatedly.
/// Every submission is a new frame sharing the same pixels.
#[derive(Debug, Clone)]
pub struct StillImage {
    id: Uuid,
    image: Arc<RgbImage>,
}

impl StillImage {
    /// Decodes `path`, refusing to allocate more than `max_decode_bytes`, and
    /// downscales the result to at most `max_pixels`.
    pub fn open(
        path: impl AsRef<Path>,
        max_pixels: u64,
        max_decode_bytes: u64,
    ) -> Result<Self, AppError> {
        let path = path.as_ref();
        let mut reader = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(ImageError::IoError)?;
        let mut limits = Limits::default();
        limits.max_alloc = Some(max_decode_bytes);
        reader.limits(limits);

        let image = reader.decode().map_err(|err| match err {
            ImageError::Limits(limit) => AppError::ResourceExhausted(format!(
                "{}: {limit}",
                path.display()
            )),
            other => AppError::Image(other),
        })?;
        tracing::info!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "Still image decoded"
        );
        Ok(Self::from_image(image, max_pixels))
    }

    pub fn from_image(image: DynamicImage, max_pixels: u64) -> Self {
        let image = downscale(image, max_pixels);
        Self {
            id: Uuid::new_v4(),
            image: Arc::new(image.into_rgb8()),
        }
    }

    pub fn source_id(&self) -> Uuid {
        self.id
    }

    pub fn image(&self) -> &Arc<RgbImage> {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn frame(&self) -> Frame {
        Frame::new(self.id, self.image.clone())
    }
}

/// Shrinks `image` to fit in `max_pixels`, keeping the aspect ratio.
fn downscale(image: DynamicImage, max_pixels: u64) -> DynamicImage {
    let (width, height) = (image.width() as u64, image.height() as u64);
    let pixels = width * height;
    if pixels <= max_pixels || pixels == 0 {
        return image;
    }
    let factor = (max_pixels as f64 / pixels as f64).sqrt();
    let new_width = ((width as f64 * factor) as u32).max(1);
    let new_height = ((height as f64 * factor) as u32).max(1);
    tracing::warn!(
        width,
        height,
        new_width,
        new_height,
        "Image exceeds the pixel budget, downscaling"
    );
    image.resize_exact(new_width, new_height, FilterType::Triangle)
}
