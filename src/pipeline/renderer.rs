use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AppError;
use crate::pipeline::display::Affine;
use crate::pipeline::metrics::FrameMetrics;

/// A filtered frame ready for presentation.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub frame_id: Uuid,
    pub source_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub image: RgbImage,
    /// Frame-to-viewport mapping to draw `image` with.
    pub transform: Affine,
    pub metrics: FrameMetrics,
    /// Sampling changed the filter on this frame.
    pub calibrated: bool,
}

/// Presentation side of the pipeline. Implementations composite the frame
/// onto whatever surface they own; the scheduler never touches one.
#[async_trait]
pub trait Renderer: Send {
    async fn render(&mut self, frame: RenderedFrame) -> Result<(), AppError>;
}

/// Forwards rendered frames to a UI task over a bounded channel.
pub struct ChannelRenderer {
    tx: mpsc::Sender<RenderedFrame>,
}

impl ChannelRenderer {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RenderedFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Renderer for ChannelRenderer {
    async fn render(&mut self, frame: RenderedFrame) -> Result<(), AppError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| AppError::Session("Renderer channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered() -> RenderedFrame {
        RenderedFrame {
            frame_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            captured_at: Utc::now(),
            image: RgbImage::new(1, 1),
            transform: Affine::IDENTITY,
            metrics: FrameMetrics::new(),
            calibrated: false,
        }
    }

    #[tokio::test]
    async fn channel_renderer_forwards_in_order() {
        let (mut renderer, mut rx) = ChannelRenderer::new(4);
        let (a, b) = (rendered(), rendered());
        let ids = (a.frame_id, b.frame_id);
        renderer.render(a).await.unwrap();
        renderer.render(b).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().frame_id, ids.0);
        assert_eq!(rx.recv().await.unwrap().frame_id, ids.1);
    }

    #[tokio::test]
    async fn closed_ui_side_is_a_session_error() {
        let (mut renderer, rx) = ChannelRenderer::new(1);
        drop(rx);
        let err = renderer.render(rendered()).await.unwrap_err();
        assert!(matches!(err, AppError::Session(_)));
    }
}
