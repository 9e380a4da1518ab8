//! Edge device: samples the tank, drives the pump relay and reports to the
//! backend without ever waiting on the network.
//!
//! ```text
//!   sensor ─▶ filter ─▶ hysteresis ─▶ actuator
//!                 │              │
//!                 └──▶ ReportQueue ──▶ Reporter ──▶ backend
//! ```

pub mod actuator;
pub mod control_loop;
pub mod poller;
pub mod report;
pub mod sensor;

pub use actuator::{Actuator, MemoryRelay, RelayOutput, SysfsRelay};
pub use control_loop::{ControlLoop, TickOutcome};
pub use poller::RemoteStatePoller;
pub use report::{HttpSink, Report, ReportError, ReportQueue, ReportSink, Reporter};
pub use sensor::{DistanceSensor, IioDistanceSensor, ScriptedSensor};
