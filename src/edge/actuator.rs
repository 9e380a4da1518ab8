//! Local Actuator: drives the pump relay output.
//!
//! I/O faults here are fatal to the edge process. There is no safe-hold
//! fallback, so callers propagate them instead of retrying.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{bail, Context, Result};

use crate::db::models::RelayState;

/// A digital relay output that can be read back.
pub trait RelayOutput {
    fn read(&mut self) -> Result<RelayState>;

    fn write(&mut self, state: RelayState) -> Result<()>;
}

pub struct Actuator<O> {
    output: O,
}

impl<O: RelayOutput> Actuator<O> {
    pub fn new(output: O) -> Self {
        Self { output }
    }

    /// The state currently on the pin.
    pub fn observed(&mut self) -> Result<RelayState> {
        self.output.read()
    }

    /// Drives the output to `state` only if it currently differs.
    /// Returns whether a write happened.
    pub fn apply(&mut self, state: RelayState) -> Result<bool> {
        if self.output.read()? == state {
            return Ok(false);
        }
        self.output.write(state)?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// sysfs GPIO
// ---------------------------------------------------------------------------

/// Relay on a sysfs GPIO `value` file (`/sys/class/gpio/gpioN/value`).
/// The pin must already be exported and configured as an output.
#[derive(Debug, Clone)]
pub struct SysfsRelay {
    path: PathBuf,
    active_low: bool,
}

impl SysfsRelay {
    pub fn new(path: impl Into<PathBuf>, active_low: bool) -> Self {
        Self {
            path: path.into(),
            active_low,
        }
    }

    fn level_for(&self, state: RelayState) -> &'static str {
        if state.is_on() != self.active_low {
            "1"
        } else {
            "0"
        }
    }
}

impl RelayOutput for SysfsRelay {
    fn read(&mut self) -> Result<RelayState> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read relay GPIO {}", self.path.display()))?;
        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => bail!("unexpected GPIO level {other:?} in {}", self.path.display()),
        };
        Ok(if high != self.active_low {
            RelayState::On
        } else {
            RelayState::Off
        })
    }

    fn write(&mut self, state: RelayState) -> Result<()> {
        std::fs::write(&self.path, self.level_for(state))
            .with_context(|| format!("failed to write relay GPIO {}", self.path.display()))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryRelayInner {
    state: RelayState,
    writes: usize,
}

/// Host-side relay. Clones share the same pin, so a test can keep a handle
/// while the control loop owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<Mutex<MemoryRelayInner>>,
}

impl MemoryRelay {
    pub fn new(initial: RelayState) -> Self {
        let relay = Self::default();
        relay.lock().state = initial;
        relay
    }

    pub fn state(&self) -> RelayState {
        self.lock().state
    }

    /// Number of writes issued through [`RelayOutput::write`].
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Flips the pin without counting a write, like someone toggling the
    /// relay by hand.
    pub fn force(&self, state: RelayState) {
        self.lock().state = state;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryRelayInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RelayOutput for MemoryRelay {
    fn read(&mut self) -> Result<RelayState> {
        Ok(self.state())
    }

    fn write(&mut self, state: RelayState) -> Result<()> {
        let mut inner = self.lock();
        inner.state = state;
        inner.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_idempotent() {
        let relay = MemoryRelay::new(RelayState::Off);
        let mut actuator = Actuator::new(relay.clone());

        assert!(actuator.apply(RelayState::On).unwrap());
        assert!(!actuator.apply(RelayState::On).unwrap());
        assert!(!actuator.apply(RelayState::On).unwrap());
        assert_eq!(relay.state(), RelayState::On);
        assert_eq!(relay.writes(), 1);
    }

    #[test]
    fn apply_writes_each_transition_once() {
        let relay = MemoryRelay::new(RelayState::Off);
        let mut actuator = Actuator::new(relay.clone());

        actuator.apply(RelayState::On).unwrap();
        actuator.apply(RelayState::Off).unwrap();
        actuator.apply(RelayState::Off).unwrap();
        assert_eq!(relay.writes(), 2);
    }

    #[test]
    fn forced_state_is_observed() {
        let relay = MemoryRelay::new(RelayState::Off);
        let mut actuator = Actuator::new(relay.clone());
        relay.force(RelayState::On);
        assert_eq!(actuator.observed().unwrap(), RelayState::On);
        assert_eq!(relay.writes(), 0);
    }

    #[test]
    fn sysfs_relay_active_high() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "0\n").unwrap();
        let mut actuator = Actuator::new(SysfsRelay::new(file.path(), false));

        assert_eq!(actuator.observed().unwrap(), RelayState::Off);
        assert!(actuator.apply(RelayState::On).unwrap());
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "1");
        assert_eq!(actuator.observed().unwrap(), RelayState::On);
    }

    #[test]
    fn sysfs_relay_active_low() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "1\n").unwrap();
        let mut actuator = Actuator::new(SysfsRelay::new(file.path(), true));

        assert_eq!(actuator.observed().unwrap(), RelayState::Off);
        actuator.apply(RelayState::On).unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "0");
    }

    #[test]
    fn sysfs_relay_io_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut actuator = Actuator::new(SysfsRelay::new(dir.path().join("gone/value"), false));
        assert!(actuator.apply(RelayState::On).is_err());
    }
}
