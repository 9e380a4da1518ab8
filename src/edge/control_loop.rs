use std::{future::Future, time::Duration};

use anyhow::Result;
use tokio::{sync::watch, time};
use tracing::{debug, info, warn};

use super::{
    actuator::{Actuator, RelayOutput},
    report::{Report, ReportQueue},
    sensor::DistanceSensor,
};
use crate::{
    control::{DistanceFilter, HysteresisController},
    db::models::{RelayRecord, RelayState},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Invalid reading: nothing was decided, actuated or sent.
    Skipped,
    /// Valid reading, relay left as it was.
    Steady { reported: f64, state: RelayState },
    /// Valid reading, relay switched to `state`.
    Changed { reported: f64, state: RelayState },
}

/// The single-threaded sampling loop.
///
/// Owns the relay state via the actuator; nothing else writes the pin.
/// Reports are only ever enqueued, so network latency never reaches here.
pub struct ControlLoop<S, O> {
    sensor: S,
    actuator: Actuator<O>,
    filter: DistanceFilter,
    controller: HysteresisController,
    queue: ReportQueue,
    remote: Option<watch::Receiver<Option<RelayRecord>>>,
    interval: Duration,
}

impl<S: DistanceSensor, O: RelayOutput> ControlLoop<S, O> {
    pub fn new(
        sensor: S,
        actuator: Actuator<O>,
        filter: DistanceFilter,
        controller: HysteresisController,
        queue: ReportQueue,
        interval: Duration,
    ) -> Self {
        Self {
            sensor,
            actuator,
            filter,
            controller,
            queue,
            remote: None,
            interval,
        }
    }

    /// Compare every poll of the backend record against the relay and
    /// re-push the local state when they disagree. A lost re-push is
    /// repeated after the next poll that still disagrees.
    pub fn with_remote(mut self, remote: watch::Receiver<Option<RelayRecord>>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// One sampling tick. Only actuator I/O can fail.
    pub fn run_once(&mut self) -> Result<TickOutcome> {
        let raw = self.sensor.measure_cm();
        let Some(reading) = self.filter.apply(raw) else {
            debug!(raw = raw, "Invalid distance reading; skipping cycle");
            return Ok(TickOutcome::Skipped);
        };

        // Decide from the pin itself so a manual toggle is caught here.
        let observed = self.actuator.observed()?;
        let decision = self.controller.decide(observed, reading.raw);

        if decision.changed {
            self.actuator.apply(decision.state)?;
            info!(
                distance = reading.raw,
                threshold = self.controller.low_threshold(),
                relay_state = %decision.state,
                "Relay switched"
            );
        }

        self.queue.push(Report::Telemetry {
            distance: reading.reported,
            relay_state: decision.state,
        });

        let diverges = self.remote_diverges(decision.state);
        if decision.changed || diverges {
            self.queue.push(Report::RelayCommand {
                action: decision.state,
            });
        }

        Ok(if decision.changed {
            TickOutcome::Changed {
                reported: reading.reported,
                state: decision.state,
            }
        } else {
            TickOutcome::Steady {
                reported: reading.reported,
                state: decision.state,
            }
        })
    }

    /// True when a poll landed since the last tick and the polled record
    /// says something other than `actual`.
    fn remote_diverges(&mut self, actual: RelayState) -> bool {
        let Some(rx) = self.remote.as_mut() else {
            return false;
        };
        if !rx.has_changed().unwrap_or(false) {
            return false;
        }
        let polled = *rx.borrow_and_update();
        match polled {
            Some(record) if record.state != actual => {
                warn!(
                    remote = %record.state,
                    actual = %actual,
                    "Backend relay record disagrees with relay; re-asserting"
                );
                true
            }
            _ => false,
        }
    }

    /// Ticks until `shutdown` resolves, then switches the relay off and
    /// queues the matching command. The command may never be delivered.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(interval_ms = self.interval.as_millis() as u64, "Control loop started");
        let mut ticker = time::interval(self.interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once()?;
                }
                _ = &mut shutdown => break,
            }
        }

        if self.actuator.apply(RelayState::Off)? {
            info!("Relay switched off for shutdown");
        }
        self.queue.push(Report::RelayCommand {
            action: RelayState::Off,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        control::INVALID_DISTANCE,
        edge::{actuator::MemoryRelay, sensor::ScriptedSensor},
    };

    fn control_loop(
        readings: impl IntoIterator<Item = f64>,
        relay: &MemoryRelay,
        queue: &ReportQueue,
    ) -> ControlLoop<ScriptedSensor, MemoryRelay> {
        ControlLoop::new(
            ScriptedSensor::new(readings),
            Actuator::new(relay.clone()),
            DistanceFilter::default(),
            HysteresisController::default(),
            queue.clone(),
            Duration::from_millis(1000),
        )
    }

    fn drain(queue: &ReportQueue) -> Vec<Report> {
        std::iter::from_fn(|| queue.try_pop()).collect()
    }

    #[test]
    fn full_tank_is_steady() {
        let relay = MemoryRelay::new(RelayState::Off);
        let queue = ReportQueue::new(8);
        let mut cl = control_loop([20.0], &relay, &queue);

        assert_eq!(
            cl.run_once().unwrap(),
            TickOutcome::Steady {
                reported: 20.0,
                state: RelayState::Off
            }
        );
        assert_eq!(relay.writes(), 0);
        assert_eq!(
            drain(&queue),
            vec![Report::Telemetry {
                distance: 20.0,
                relay_state: RelayState::Off
            }]
        );
    }

    #[test]
    fn dead_zone_reading_reports_remap_and_switches_on() {
        let relay = MemoryRelay::new(RelayState::Off);
        let queue = ReportQueue::new(8);
        let mut cl = control_loop([5.0], &relay, &queue);

        assert_eq!(
            cl.run_once().unwrap(),
            TickOutcome::Changed {
                reported: 1.0,
                state: RelayState::On
            }
        );
        assert_eq!(relay.state(), RelayState::On);
        assert_eq!(relay.writes(), 1);
        assert_eq!(
            drain(&queue),
            vec![
                Report::Telemetry {
                    distance: 1.0,
                    relay_state: RelayState::On
                },
                Report::RelayCommand {
                    action: RelayState::On
                },
            ]
        );
    }

    #[test]
    fn rising_level_switches_off_once() {
        let relay = MemoryRelay::new(RelayState::On);
        let queue = ReportQueue::new(8);
        let mut cl = control_loop([15.0, 15.0], &relay, &queue);

        assert!(matches!(
            cl.run_once().unwrap(),
            TickOutcome::Changed { state: RelayState::Off, .. }
        ));
        assert!(matches!(cl.run_once().unwrap(), TickOutcome::Steady { .. }));
        assert_eq!(relay.writes(), 1);

        let commands = drain(&queue)
            .into_iter()
            .filter(|r| matches!(r, Report::RelayCommand { .. }))
            .count();
        assert_eq!(commands, 1);
    }

    #[test]
    fn invalid_reading_does_nothing() {
        let relay = MemoryRelay::new(RelayState::On);
        let queue = ReportQueue::new(8);
        let mut cl = control_loop([INVALID_DISTANCE], &relay, &queue);

        assert_eq!(cl.run_once().unwrap(), TickOutcome::Skipped);
        assert_eq!(relay.state(), RelayState::On);
        assert_eq!(relay.writes(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn raw_value_drives_control_not_remap() {
        // raw 0 reports 6, which is still below the threshold; raw 7 reports
        // -1. Both must switch on because the raw value is below 12.
        for raw in [0.0, 7.0] {
            let relay = MemoryRelay::new(RelayState::Off);
            let queue = ReportQueue::new(8);
            let mut cl = control_loop([raw], &relay, &queue);
            assert!(matches!(
                cl.run_once().unwrap(),
                TickOutcome::Changed { state: RelayState::On, .. }
            ));
        }
    }

    #[test]
    fn manual_toggle_is_reverted_next_tick() {
        let relay = MemoryRelay::new(RelayState::Off);
        let queue = ReportQueue::new(8);
        let mut cl = control_loop([30.0, 30.0], &relay, &queue);

        cl.run_once().unwrap();
        relay.force(RelayState::On);
        assert!(matches!(
            cl.run_once().unwrap(),
            TickOutcome::Changed { state: RelayState::Off, .. }
        ));
        assert_eq!(relay.state(), RelayState::Off);
    }

    fn has_command(reports: &[Report], action: RelayState) -> bool {
        reports.contains(&Report::RelayCommand { action })
    }

    #[test]
    fn divergent_remote_record_is_reasserted_once_per_poll() {
        let relay = MemoryRelay::new(RelayState::Off);
        let queue = ReportQueue::new(8);
        let (tx, rx) = watch::channel(None);
        let mut cl = control_loop([30.0; 4], &relay, &queue).with_remote(rx);

        cl.run_once().unwrap();
        drain(&queue);

        // An operator asked for ON while the tank is full.
        let record = RelayRecord {
            state: RelayState::On,
            updated_at: Utc::now(),
        };
        tx.send_replace(Some(record));
        cl.run_once().unwrap();
        assert_eq!(relay.state(), RelayState::Off);
        assert!(has_command(&drain(&queue), RelayState::Off));

        // No poll since the last tick: nothing new to correct.
        cl.run_once().unwrap();
        assert!(!has_command(&drain(&queue), RelayState::Off));

        // The re-push never arrived, so the next poll returns the same record.
        tx.send_replace(Some(record));
        cl.run_once().unwrap();
        assert!(has_command(&drain(&queue), RelayState::Off));
        assert_eq!(relay.writes(), 0);
    }

    #[test]
    fn lost_reassert_is_retried_until_backend_agrees() {
        let relay = MemoryRelay::new(RelayState::Off);
        let queue = ReportQueue::new(8);
        let (tx, rx) = watch::channel(None);
        let mut cl = control_loop([30.0; 6], &relay, &queue).with_remote(rx);
        let stale = RelayRecord {
            state: RelayState::On,
            updated_at: Utc::now(),
        };

        let mut reasserts = 0;
        for _ in 0..5 {
            tx.send_replace(Some(stale));
            cl.run_once().unwrap();
            if has_command(&drain(&queue), RelayState::Off) {
                reasserts += 1;
            }
        }
        assert_eq!(reasserts, 5);

        // Delivery finally lands; the backend now agrees.
        tx.send_replace(Some(RelayRecord {
            state: RelayState::Off,
            updated_at: Utc::now(),
        }));
        cl.run_once().unwrap();
        assert!(!has_command(&drain(&queue), RelayState::Off));
    }

    #[test]
    fn agreeing_remote_record_is_quiet() {
        let relay = MemoryRelay::new(RelayState::Off);
        let queue = ReportQueue::new(8);
        let (tx, rx) = watch::channel(None);
        let mut cl = control_loop([30.0], &relay, &queue).with_remote(rx);

        tx.send_replace(Some(RelayRecord {
            state: RelayState::Off,
            updated_at: Utc::now(),
        }));
        cl.run_once().unwrap();
        assert_eq!(drain(&queue).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_switches_off_on_shutdown() {
        let relay = MemoryRelay::new(RelayState::Off);
        let queue = ReportQueue::new(8);
        let cl = control_loop([5.0], &relay, &queue);

        cl.run(time::sleep(Duration::from_millis(1500))).await.unwrap();
        assert_eq!(relay.state(), RelayState::Off);
        assert_eq!(relay.writes(), 2);
        assert_eq!(
            drain(&queue).last(),
            Some(&Report::RelayCommand {
                action: RelayState::Off
            })
        );
    }
}
