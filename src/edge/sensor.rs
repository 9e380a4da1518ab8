use std::{collections::VecDeque, path::PathBuf};

use tracing::debug;

use crate::control::INVALID_DISTANCE;

/// A ranging sensor. Returns centimetres, or [`INVALID_DISTANCE`] on timeout,
/// out-of-range or read failure.
pub trait DistanceSensor {
    fn measure_cm(&mut self) -> f64;
}

/// Reads a Linux IIO distance channel, e.g. the `srf04` driver's
/// `/sys/bus/iio/devices/iio:deviceN/in_distance_raw` (millimetres).
#[derive(Debug, Clone)]
pub struct IioDistanceSensor {
    path: PathBuf,
    scale: f64,
}

impl IioDistanceSensor {
    /// `scale` converts the file's unit to centimetres (`0.1` for mm).
    pub fn new(path: impl Into<PathBuf>, scale: f64) -> Self {
        Self {
            path: path.into(),
            scale,
        }
    }
}

impl DistanceSensor for IioDistanceSensor {
    fn measure_cm(&mut self) -> f64 {
        // The driver returns an I/O error when the echo times out.
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Distance read failed");
                return INVALID_DISTANCE;
            }
        };

        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => v * self.scale,
            _ => {
                debug!(path = %self.path.display(), raw = %raw.trim(), "Unparseable distance");
                INVALID_DISTANCE
            }
        }
    }
}

/// Replays a fixed sequence of readings, then reports invalid forever.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    readings: VecDeque<f64>,
}

impl ScriptedSensor {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
        }
    }
}

impl DistanceSensor for ScriptedSensor {
    fn measure_cm(&mut self) -> f64 {
        self.readings.pop_front().unwrap_or(INVALID_DISTANCE)
    }
}
