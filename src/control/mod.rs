//! Pure control logic shared by the edge loop: the distance filter and the
//! hysteresis decision. No I/O happens here.

pub mod filter;
pub mod hysteresis;

pub use filter::{DistanceFilter, FilteredReading, INVALID_DISTANCE};
pub use hysteresis::{Decision, HysteresisController};
