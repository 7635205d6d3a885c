use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::color::TermMap;
use crate::error::ParameterError;

/// How matching pixels are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterMode {
    /// Input passes through untouched.
    #[default]
    None,
    /// Matching pixels keep their color, the rest turn black.
    Include,
    /// Matching pixels turn white, the rest keep their color.
    Exclude,
    /// White where matching, black elsewhere.
    Binary,
    /// Matching pixels show their saturation as a gray level, the rest turn black.
    Saturation,
}

impl FilterMode {
    pub const ALL: [FilterMode; 5] = [
        FilterMode::None,
        FilterMode::Include,
        FilterMode::Exclude,
        FilterMode::Binary,
        FilterMode::Saturation,
    ];

    /// Position used when the mode is persisted as an integer.
    pub fn ordinal(self) -> i32 {
        match self {
            FilterMode::None => 0,
            FilterMode::Include => 1,
            FilterMode::Exclude => 2,
            FilterMode::Binary => 3,
            FilterMode::Saturation => 4,
        }
    }
}

impl TryFrom<i32> for FilterMode {
    type Error = ParameterError;

    fn try_from(ordinal: i32) -> Result<Self, Self::Error> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(ParameterError::FilterModeOrdinal(ordinal))
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterMode::None => "none",
            FilterMode::Include => "include",
            FilterMode::Exclude => "exclude",
            FilterMode::Binary => "binary",
            FilterMode::Saturation => "saturation",
        };
        f.write_str(name)
    }
}

/// Validated HSV band parameters. Values can only be changed through the
/// checked `with_*` builders, so a `FilterState` is always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterState {
    hue: u16,
    hue_width: u16,
    sat_threshold: u8,
    lum_threshold: u8,
    mode: FilterMode,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            hue: 0,
            hue_width: 14,
            sat_threshold: 100,
            lum_threshold: 100,
            mode: FilterMode::None,
        }
    }
}

fn threshold(name: &'static str, value: i32) -> Result<u8, ParameterError> {
    u8::try_from(value).map_err(|_| ParameterError::ThresholdOutOfRange { name, value })
}

impl FilterState {
    pub fn new(
        hue: i32,
        hue_width: i32,
        sat_threshold: i32,
        lum_threshold: i32,
        mode: FilterMode,
    ) -> Result<Self, ParameterError> {
        Self::default()
            .with_hue(hue)?
            .with_hue_width(hue_width)?
            .with_sat_threshold(sat_threshold)?
            .with_lum_threshold(lum_threshold)
            .map(|state| state.with_mode(mode))
    }

    /// Center hue in degrees, `[0, 360)`.
    pub fn hue(&self) -> u16 {
        self.hue
    }

    /// Band width in half-degree units, `[0, 360]`.
    pub fn hue_width(&self) -> u16 {
        self.hue_width
    }

    pub fn sat_threshold(&self) -> u8 {
        self.sat_threshold
    }

    pub fn lum_threshold(&self) -> u8 {
        self.lum_threshold
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn with_hue(mut self, hue: i32) -> Result<Self, ParameterError> {
        if !(0..360).contains(&hue) {
            return Err(ParameterError::HueOutOfRange(hue));
        }
        self.hue = hue as u16;
        Ok(self)
    }

    pub fn with_hue_width(mut self, hue_width: i32) -> Result<Self, ParameterError> {
        if !(0..=360).contains(&hue_width) {
            return Err(ParameterError::HueWidthOutOfRange(hue_width));
        }
        self.hue_width = hue_width as u16;
        Ok(self)
    }

    pub fn with_sat_threshold(mut self, value: i32) -> Result<Self, ParameterError> {
        self.sat_threshold = threshold("Saturation", value)?;
        Ok(self)
    }

    pub fn with_lum_threshold(mut self, value: i32) -> Result<Self, ParameterError> {
        self.lum_threshold = threshold("Luminance", value)?;
        Ok(self)
    }

    pub fn with_mode(mut self, mode: FilterMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Everything the worker needs to filter one frame, read as one snapshot.
///
/// The term index is validated against the term map it is stored with, so a
/// snapshot can never pair a map with an index from a different map.
#[derive(Clone)]
pub struct FilterSettings {
    state: FilterState,
    term_map: Option<Arc<TermMap>>,
    term: usize,
    combine_with_hsv: bool,
    sample_mode: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            state: FilterState::default(),
            term_map: None,
            term: 0,
            combine_with_hsv: true,
            sample_mode: false,
        }
    }
}

impl FilterSettings {
    pub fn new(state: FilterState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn mode(&self) -> FilterMode {
        self.state.mode
    }

    pub fn term_map(&self) -> Option<&Arc<TermMap>> {
        self.term_map.as_ref()
    }

    pub fn term(&self) -> usize {
        self.term
    }

    /// When a term map is active, also require the HSV thresholds to pass.
    pub fn combine_with_hsv(&self) -> bool {
        self.combine_with_hsv
    }

    pub fn sample_mode(&self) -> bool {
        self.sample_mode
    }

    /// Label of the selected term, empty without a term map.
    pub fn current_term_name(&self) -> &str {
        self.term_map
            .as_ref()
            .and_then(|map| map.terms().get(self.term))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn with_state(mut self, state: FilterState) -> Self {
        self.state = state;
        self
    }

    /// Selects a term. Checked against the current term map, if any.
    pub fn with_term(mut self, term: usize) -> Result<Self, ParameterError> {
        if let Some(map) = &self.term_map {
            if term >= map.terms().len() {
                return Err(ParameterError::TermOutOfRange {
                    term,
                    count: map.terms().len(),
                });
            }
        }
        self.term = term;
        Ok(self)
    }

    /// Swaps the term map; the current term is clamped into the new map's range.
    pub fn with_term_map(mut self, term_map: Option<Arc<TermMap>>) -> Self {
        if let Some(map) = &term_map {
            let count = map.terms().len();
            if self.term >= count {
                self.term = count.saturating_sub(1);
            }
        }
        self.term_map = term_map;
        self
    }

    pub fn with_combine_with_hsv(mut self, combine: bool) -> Self {
        self.combine_with_hsv = combine;
        self
    }

    pub fn with_sample_mode(mut self, sample_mode: bool) -> Self {
        self.sample_mode = sample_mode;
        self
    }
}

impl PartialEq for FilterSettings {
    fn eq(&self, other: &Self) -> bool {
        let same_map = match (&self.term_map, &other.term_map) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_map
            && self.state == other.state
            && self.term == other.term
            && self.combine_with_hsv == other.combine_with_hsv
            && self.sample_mode == other.sample_mode
    }
}

impl fmt::Debug for FilterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSettings")
            .field("state", &self.state)
            .field("term_map", &self.term_map.as_ref().map(|m| m.id().to_string()))
            .field("term", &self.term)
            .field("combine_with_hsv", &self.combine_with_hsv)
            .field("sample_mode", &self.sample_mode)
            .finish()
    }
}
