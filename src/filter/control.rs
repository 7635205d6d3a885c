use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::color::term_map::validate_blur_radius;
use crate::color::TermMap;
use crate::error::ParameterError;
use crate::filter::state::{FilterMode, FilterSettings, FilterState};

/// Fields of the filter that a region sample wants to change. `None` means
/// the sample agreed with the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calibration {
    pub hue: Option<u16>,
    pub term: Option<usize>,
    pub sat_threshold: Option<u8>,
    pub lum_threshold: Option<u8>,
}

impl Calibration {
    pub fn is_change(&self) -> bool {
        *self != Self::default()
    }

    /// Applies the changed fields on top of `settings`.
    pub fn apply(&self, settings: &FilterSettings) -> Result<FilterSettings, ParameterError> {
        let mut state = *settings.state();
        if let Some(hue) = self.hue {
            state = state.with_hue(hue as i32)?;
        }
        if let Some(sat) = self.sat_threshold {
            state = state.with_sat_threshold(sat as i32)?;
        }
        if let Some(lum) = self.lum_threshold {
            state = state.with_lum_threshold(lum as i32)?;
        }
        let next = settings.clone().with_state(state);
        match self.term {
            Some(term) => next.with_term(term),
            None => Ok(next),
        }
    }
}

/// Notifications for observers that mirror the filter in their own UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterEvent {
    /// A region sample moved the filter.
    Calibrated {
        state: FilterState,
        term: usize,
        term_name: String,
    },
}

/// Shared handle to the live filter settings.
///
/// Writers go through validated setters; a rejected value leaves the
/// settings untouched. Readers take whole snapshots, so a frame never sees a
/// half-applied update.
#[derive(Clone)]
pub struct FilterControl {
    settings: Arc<watch::Sender<FilterSettings>>,
    events: broadcast::Sender<FilterEvent>,
}

impl FilterControl {
    pub fn new(initial: FilterSettings) -> Self {
        let (settings, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(16);
        Self {
            settings: Arc::new(settings),
            events,
        }
    }

    pub fn snapshot(&self) -> FilterSettings {
        self.settings.borrow().clone()
    }

    /// Receiver that wakes whenever the settings change.
    pub fn subscribe(&self) -> watch::Receiver<FilterSettings> {
        self.settings.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<FilterEvent> {
        self.events.subscribe()
    }

    /// Replaces the settings with `f(current)` if it validates. Subscribers
    /// are only woken when something actually changed.
    pub fn update<F>(&self, f: F) -> Result<FilterSettings, ParameterError>
    where
        F: FnOnce(&FilterSettings) -> Result<FilterSettings, ParameterError>,
    {
        self.modify(f).map(|(settings, _)| settings)
    }

    /// Like [`update`](Self::update), also reporting whether the value changed.
    fn modify<F>(&self, f: F) -> Result<(FilterSettings, bool), ParameterError>
    where
        F: FnOnce(&FilterSettings) -> Result<FilterSettings, ParameterError>,
    {
        let mut outcome = None;
        self.settings.send_if_modified(|current| match f(current) {
            Ok(next) => {
                let changed = next != *current;
                if changed {
                    *current = next;
                }
                outcome = Some(Ok((current.clone(), changed)));
                changed
            }
            Err(err) => {
                outcome = Some(Err(err));
                false
            }
        });
        outcome.unwrap_or_else(|| Ok((self.snapshot(), false)))
    }

    fn update_state<F>(&self, f: F) -> Result<(), ParameterError>
    where
        F: FnOnce(FilterState) -> Result<FilterState, ParameterError>,
    {
        self.update(|current| Ok(current.clone().with_state(f(*current.state())?)))
            .map(|_| ())
    }

    pub fn set_hue(&self, hue: i32) -> Result<(), ParameterError> {
        self.update_state(|state| state.with_hue(hue))
    }

    pub fn set_hue_width(&self, hue_width: i32) -> Result<(), ParameterError> {
        self.update_state(|state| state.with_hue_width(hue_width))
    }

    pub fn set_sat_threshold(&self, value: i32) -> Result<(), ParameterError> {
        self.update_state(|state| state.with_sat_threshold(value))
    }

    pub fn set_lum_threshold(&self, value: i32) -> Result<(), ParameterError> {
        self.update_state(|state| state.with_lum_threshold(value))
    }

    pub fn set_mode(&self, mode: FilterMode) {
        let _ = self.update_state(|state| Ok(state.with_mode(mode)));
    }

    /// Mode selection by persisted ordinal.
    pub fn set_mode_ordinal(&self, ordinal: i32) -> Result<(), ParameterError> {
        self.set_mode(FilterMode::try_from(ordinal)?);
        Ok(())
    }

    pub fn set_state(&self, state: FilterState) {
        let _ = self.update(|current| Ok(current.clone().with_state(state)));
    }

    pub fn set_term(&self, term: usize) -> Result<(), ParameterError> {
        self.update(|current| current.clone().with_term(term)).map(|_| ())
    }

    /// Activates `term_map`, or goes back to hue-band filtering with `None`.
    pub fn set_term_map(&self, term_map: Option<Arc<TermMap>>) {
        let id = term_map.as_ref().map(|m| m.id().to_string());
        let _ = self.update(|current| Ok(current.clone().with_term_map(term_map)));
        info!(term_map = ?id, "Term map selected");
    }

    pub fn set_combine_with_hsv(&self, combine: bool) {
        let _ = self.update(|current| Ok(current.clone().with_combine_with_hsv(combine)));
    }

    pub fn set_sample_mode(&self, sample_mode: bool) {
        let _ = self.update(|current| Ok(current.clone().with_sample_mode(sample_mode)));
        debug!(sample_mode, "Sample mode toggled");
    }

    /// Pre-lookup blur kernel of the active term map. The value is validated
    /// even when no map is active.
    pub fn set_blur_radius(&self, radius: i32) -> Result<(), ParameterError> {
        validate_blur_radius(radius)?;
        let Some(map) = self.snapshot().term_map().cloned() else {
            return Ok(());
        };
        map.set_blur_radius(radius)?;
        // the map is shared, so wake subscribers by hand
        self.settings.send_modify(|_| ());
        Ok(())
    }

    pub fn current_term_name(&self) -> String {
        self.settings.borrow().current_term_name().to_string()
    }

    /// Commits a sampling result on top of the latest settings and returns
    /// the settings the current frame should be filtered with.
    pub fn commit_calibration(
        &self,
        calibration: &Calibration,
    ) -> Result<FilterSettings, ParameterError> {
        if !calibration.is_change() {
            return Ok(self.snapshot());
        }
        let (settings, changed) = self.modify(|current| calibration.apply(current))?;
        if !changed {
            return Ok(settings);
        }
        debug!(?calibration, "Calibration committed");
        let _ = self.events.send(FilterEvent::Calibrated {
            state: *settings.state(),
            term: settings.term(),
            term_name: settings.current_term_name().to_string(),
        });
        Ok(settings)
    }
}

impl Default for FilterControl {
    fn default() -> Self {
        Self::new(FilterSettings::default())
    }
}
