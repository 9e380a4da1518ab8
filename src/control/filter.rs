/// Raw value a ranging sensor reports on timeout or out-of-range.
pub const INVALID_DISTANCE: f64 = -1.0;

/// Default "near-zero" threshold T0 in centimetres.
pub const DEFAULT_NEAR_ZERO_CM: f64 = 7.0;

/// A validated sample.
///
/// `raw` drives the hysteresis decision. `reported` is what gets transmitted
/// and displayed. They differ only inside the sensor's dead zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredReading {
    pub raw: f64,
    pub reported: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceFilter {
    near_zero: f64,
}

impl Default for DistanceFilter {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_ZERO_CM)
    }
}

impl DistanceFilter {
    pub fn new(near_zero: f64) -> Self {
        Self { near_zero }
    }

    /// Returns `None` for the invalid sentinel and for any negative or
    /// non-finite value; the caller skips the whole cycle.
    ///
    /// At or below T0 the reported value is `(T0 - 1) - raw`.
    pub fn apply(&self, raw: f64) -> Option<FilteredReading> {
        if raw == INVALID_DISTANCE || !raw.is_finite() || raw < 0.0 {
            return None;
        }

        let reported = if raw <= self.near_zero {
            (self.near_zero - 1.0) - raw
        } else {
            raw
        };

        Some(FilteredReading { raw, reported })
    }
}
