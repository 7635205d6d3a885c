pub mod still_image;
pub mod synthetic;

use uuid::Uuid;

use crate::error::AppError;
use crate::pipeline::mailbox::FrameSink;

pub use still_image::StillImage;
pub use synthetic::SyntheticCamera;

/// A push-based frame producer running on its own context.
///
/// `start` hands the source the sink it offers frames into. `stop` must not
/// return until the source has stopped offering.
pub trait FrameSource: Send {
    fn source_id(&self) -> Uuid;

    fn start(&mut self, sink: FrameSink) -> Result<(), AppError>;

    fn stop(&mut self);
}
