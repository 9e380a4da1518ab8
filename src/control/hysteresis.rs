use crate::db::models::RelayState;

/// Default fill threshold in centimetres.
pub const DEFAULT_LOW_THRESHOLD_CM: f64 = 12.0;

/// Outcome of one controller step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub state: RelayState,
    pub changed: bool,
}

/// Edge-triggered single-threshold controller.
///
/// The sensor sits at the top of the tank, so a smaller distance means more
/// water. Below the threshold the pump fills; at or above it the pump stops.
///
/// `current` must be the state actually observed on the output, not the last
/// command issued, so a relay toggled by hand is caught on the next step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HysteresisController {
    low_threshold: f64,
}

impl Default for HysteresisController {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_THRESHOLD_CM)
    }
}

impl HysteresisController {
    pub fn new(low_threshold: f64) -> Self {
        Self { low_threshold }
    }

    pub fn low_threshold(&self) -> f64 {
        self.low_threshold
    }

    pub fn decide(&self, current: RelayState, raw_distance: f64) -> Decision {
        let target = if raw_distance < self.low_threshold {
            RelayState::On
        } else {
            RelayState::Off
        };

        Decision {
            state: target,
            changed: target != current,
        }
    }
}
