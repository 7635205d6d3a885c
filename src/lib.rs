pub mod capture;
pub mod color;
pub mod common;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod logging;
pub mod pipeline;
pub mod runtime;
pub mod sampler;

pub use error::{AppError, FrameError, LoadError, ParameterError};

pub use capture::{FrameSource, StillImage, SyntheticCamera};
pub use color::{TermMap, TermMapCatalog};
pub use config::Configuration;
pub use coordinator::{Coordinator, CoordinatorBuilder, SessionMode, SessionState};
pub use filter::{FilterControl, FilterEvent, FilterMode, FilterSettings, FilterState};
pub use pipeline::{ChannelRenderer, RenderedFrame, Renderer};
pub use runtime::VisionRuntime;
