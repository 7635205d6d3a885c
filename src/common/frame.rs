use chrono::{DateTime, Utc};
use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A captured RGB frame, owned by whoever currently holds it.
///
/// The pixel buffer is shared so a still image can be re-submitted without
/// copying, but the frame itself is not `Clone`: its release hook fires
/// exactly once, when the frame is dropped.
pub struct Frame {
    source_id: Uuid,
    image: Arc<RgbImage>,
    captured_at: DateTime<Utc>,
    frame_id: Uuid,
    release: Option<ReleaseHook>,
}

impl Frame {
    pub fn new(source_id: Uuid, image: impl Into<Arc<RgbImage>>) -> Self {
        Self {
            source_id,
            image: image.into(),
            captured_at: Utc::now(),
            frame_id: Uuid::new_v4(),
            release: None,
        }
    }

    /// Attaches the callback handing the underlying buffer back to its source.
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn source_id(&self) -> Uuid {
        self.source_id
    }

    pub fn frame_id(&self) -> Uuid {
        self.frame_id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("source_id", &self.source_id)
            .field("frame_id", &self.frame_id)
            .field("dimensions", &self.image.dimensions())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}
