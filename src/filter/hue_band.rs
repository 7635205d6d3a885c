use crate::color::hsv::HUE_STEPS;
use crate::filter::state::FilterState;

/// Inclusive hue interval on the half-degree scale.
pub type HueRange = (i32, i32);

/// The accepted hue band of a filter, in half-degree units.
///
/// `lower` and `upper` may fall outside `[0, 180]`; the part that does is
/// folded back onto the other end of the circle by [`HueBand::ranges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HueBand {
    lower: i32,
    upper: i32,
}

impl HueBand {
    /// Band centered on `hue` (degrees) spanning `hue_width` half-degrees.
    /// Bounds truncate toward zero.
    pub fn new(hue: u16, hue_width: u16) -> Self {
        let center = hue as f32 / 2.0;
        let half = hue_width as f32 / 2.0;
        Self {
            lower: (center - half) as i32,
            upper: (center + half) as i32,
        }
    }

    pub fn from_state(state: &FilterState) -> Self {
        Self::new(state.hue(), state.hue_width())
    }

    /// Every hue. Used when a term map does the color selection.
    pub fn full() -> Self {
        Self {
            lower: 0,
            upper: HUE_STEPS,
        }
    }

    pub fn lower(&self) -> i32 {
        self.lower
    }

    pub fn upper(&self) -> i32 {
        self.upper
    }

    /// The clamped primary range and, if the band crosses 0 or 180, the
    /// wrapped remainder on the far side.
    pub fn ranges(&self) -> (HueRange, Option<HueRange>) {
        let primary = (self.lower.max(0), self.upper.min(HUE_STEPS));
        let wrapped = if self.lower < 0 {
            Some((self.lower + HUE_STEPS, HUE_STEPS))
        } else if self.upper > HUE_STEPS {
            Some((0, self.upper - HUE_STEPS))
        } else {
            None
        };
        (primary, wrapped)
    }

    #[inline]
    pub fn contains(&self, hue: u8) -> bool {
        let hue = hue as i32;
        let within = |(lo, hi): HueRange| lo <= hue && hue <= hi;
        let (primary, wrapped) = self.ranges();
        within(primary) || wrapped.is_some_and(within)
    }

    /// Length of the union of the covered ranges.
    pub fn covered_span(&self) -> i32 {
        match self.ranges() {
            ((lo, hi), None) => hi - lo,
            ((lo, hi), Some((wlo, whi))) => {
                let overlap = (hi.min(whi) - lo.max(wlo)).max(0);
                (hi - lo) + (whi - wlo) - overlap
            }
        }
    }

    /// Per-hue lookup table, so a frame needs one comparison per pixel.
    pub fn table(&self) -> [bool; HUE_STEPS as usize] {
        let mut table = [false; HUE_STEPS as usize];
        for (hue, slot) in table.iter_mut().enumerate() {
            *slot = self.contains(hue as u8);
        }
        table
    }
}
