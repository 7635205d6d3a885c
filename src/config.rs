use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::color::catalog::{TermMapCatalog, TermMapDescriptor, DEFAULT_COLOR_SPACE};
use crate::error::AppError;
use crate::filter::{FilterMode, FilterSettings, FilterState};
use crate::pipeline::display::{CameraOrientation, DisplayGeometry, Viewport};

pub const DEFAULT_CONFIG_NAME: &str = "colorfilter";
pub const ENV_PREFIX: &str = "COLORFILTER";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub filter: FilterDefaults,
    pub sampler: SamplerConfig,
    pub scheduler: SchedulerConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    pub term_maps: TermMapsConfig,
}

/// Persisted filter values a session starts from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterDefaults {
    /// Filter mode ordinal, see [`FilterMode::ordinal`].
    pub mode: i32,
    pub hue: i32,
    pub hue_width: i32,
    pub sat_threshold: i32,
    pub lum_threshold: i32,
    pub term: usize,
    pub term_map: Option<String>,
    pub sample_mode: bool,
    pub combine_with_hsv: bool,
    pub blur_radius: Option<i32>,
}

impl Default for FilterDefaults {
    fn default() -> Self {
        Self {
            mode: FilterMode::Exclude.ordinal(),
            hue: 0,
            hue_width: 14,
            sat_threshold: 0,
            lum_threshold: 0,
            term: 1,
            term_map: None,
            sample_mode: false,
            combine_with_hsv: true,
            blur_radius: None,
        }
    }
}

impl FilterDefaults {
    /// Validates the defaults and resolves the term map id against `catalog`.
    pub fn to_settings(&self, catalog: &TermMapCatalog) -> Result<FilterSettings, AppError> {
        let mode = FilterMode::try_from(self.mode)?;
        let state = FilterState::new(
            self.hue,
            self.hue_width,
            self.sat_threshold,
            self.lum_threshold,
            mode,
        )?;
        let term_map = match &self.term_map {
            Some(id) => {
                let map = catalog.get(id)?;
                if let Some(radius) = self.blur_radius {
                    map.set_blur_radius(radius)?;
                }
                Some(map)
            }
            None => None,
        };
        let settings = FilterSettings::new(state)
            .with_combine_with_hsv(self.combine_with_hsv)
            .with_sample_mode(self.sample_mode)
            .with_term_map(term_map)
            .with_term(self.term)?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Side of the sampled square, in density-independent units.
    pub sample_size: f32,
    /// Also derive saturation and luminance thresholds from the sample.
    pub calibrate_thresholds: bool,
    pub threshold_tolerance: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_size: 40.0,
            calibrate_thresholds: false,
            threshold_tolerance: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub viewport: Viewport,
    pub orientation: CameraOrientation,
    /// Still images above this many pixels are downscaled on load.
    pub max_image_pixels: u64,
    /// Decoder allocation ceiling for still images, in bytes.
    pub max_decode_bytes: u64,
    /// Rendered frames the UI side may hold before the scheduler waits.
    pub render_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            orientation: CameraOrientation::default(),
            max_image_pixels: 16 * 1024 * 1024,
            max_decode_bytes: 512 * 1024 * 1024,
            render_buffer: 2,
        }
    }
}

impl SchedulerConfig {
    pub fn geometry(&self) -> DisplayGeometry {
        DisplayGeometry {
            viewport: self.viewport,
            orientation: self.orientation,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Vision pool size; 0 means one thread per core.
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TermMapsConfig {
    /// Preferred display color space for asset selection.
    pub color_space: String,
    /// JSON manifest of descriptors. Takes precedence over `maps`.
    pub manifest: Option<PathBuf>,
    pub maps: Vec<TermMapDescriptor>,
}

impl Default for TermMapsConfig {
    fn default() -> Self {
        Self {
            color_space: DEFAULT_COLOR_SPACE.to_string(),
            manifest: None,
            maps: Vec::new(),
        }
    }
}

impl TermMapsConfig {
    pub fn load_catalog(&self) -> Result<TermMapCatalog, AppError> {
        let catalog = match &self.manifest {
            Some(manifest) => TermMapCatalog::from_manifest(manifest, &self.color_space)?,
            None => TermMapCatalog::load(&self.maps, &self.color_space, None)?,
        };
        if !catalog.is_empty() && !catalog.matched_color_space() {
            tracing::warn!(
                color_space = %self.color_space,
                "No term map asset matches the display color space, using fallbacks"
            );
        }
        Ok(catalog)
    }
}

impl Configuration {
    /// Reads `path` (or an optional `colorfilter.*` in the working directory)
    /// under `COLORFILTER__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        Self::load_from(path, None)
    }

    fn load_from(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, AppError> {
        let file = match path {
            Some(path) => config::File::from(path),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let configuration: Configuration = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    fn validate(&self) -> Result<(), AppError> {
        let viewport = &self.scheduler.viewport;
        if !(viewport.width > 0.0 && viewport.height > 0.0 && viewport.density > 0.0) {
            return Err(invalid("scheduler.viewport dimensions and density must be positive"));
        }
        if !(self.sampler.sample_size > 0.0) {
            return Err(invalid("sampler.sample_size must be positive"));
        }
        if self.scheduler.max_image_pixels == 0 {
            return Err(invalid("scheduler.max_image_pixels must be positive"));
        }
        if self.scheduler.render_buffer == 0 {
            return Err(invalid("scheduler.render_buffer must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    config::ConfigError::Message(message.to_string()).into()
}
