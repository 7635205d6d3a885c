pub mod control;
pub mod hue_band;
pub mod processor;
pub mod state;

pub use control::{Calibration, FilterControl, FilterEvent};
pub use hue_band::HueBand;
pub use processor::{FilterProcessor, FILL_BLACK, FILL_WHITE};
pub use state::{FilterMode, FilterSettings, FilterState};
