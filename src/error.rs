use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Load Error: {0}")]
    Load(#[from] LoadError),
    #[error("Parameter Error: {0}")]
    Parameter(#[from] ParameterError),
    #[error("Frame Error: {0}")]
    Frame(#[from] FrameError),
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Not enough memory to hold the image: {0}")]
    ResourceExhausted(String),
    #[error("Session Error: {0}")]
    Session(String),
}

// Term map asset errors, fatal to the map being constructed.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read term map asset '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to decode term map asset: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Term map asset is {actual:?}, expected {expected:?}")]
    Dimensions {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("Lookup table has {actual} entries, expected {expected}")]
    TableLength { expected: usize, actual: usize },
    #[error("Term map entry {value} is outside the {count} declared terms")]
    TermOutOfRange { value: u8, count: usize },
    #[error("Term map '{0}' declares no terms")]
    NoTerms(String),
    #[error("Term map '{id}' declares {count} terms, at most {max} fit the lookup table")]
    TooManyTerms { id: String, count: usize, max: usize },
    #[error("Term map '{0}' declares no assets")]
    NoAssets(String),
    #[error("Unknown term map: {0}")]
    UnknownTermMap(String),
    #[error("Invalid term map manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

// Out-of-range settings, rejected at the setter; the previous value is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("Hue {0} is outside [0, 360)")]
    HueOutOfRange(i32),
    #[error("Hue width {0} is outside [0, 360]")]
    HueWidthOutOfRange(i32),
    #[error("{name} threshold {value} is outside [0, 255]")]
    ThresholdOutOfRange { name: &'static str, value: i32 },
    #[error("Blur radius {0} must be 0 or an odd positive number")]
    BlurRadius(i32),
    #[error("Term {term} is outside the {count} terms of the selected map")]
    TermOutOfRange { term: usize, count: usize },
    #[error("No filter mode has ordinal {0}")]
    FilterModeOrdinal(i32),
}

// Per-frame failures. The scheduler logs these and drops the frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame has no pixels ({0}x{1})")]
    EmptyFrame(u32, u32),
    #[error("Frame processing worker failed: {0}")]
    Worker(String),
    #[error("Color conversion failed: {0}")]
    Conversion(String),
}
