pub mod display;
pub mod mailbox;
pub mod metrics;
pub mod renderer;
pub mod scheduler;

pub use display::{Affine, CameraOrientation, DisplayGeometry, Viewport};
pub use mailbox::{mailbox, FrameMailbox, FrameSink, MailboxStats, Offer};
pub use metrics::{FrameMetrics, SchedulerReport};
pub use renderer::{ChannelRenderer, RenderedFrame, Renderer};
pub use scheduler::{FrameHandler, FramePipeline, FrameScheduler};
