//! Edge control loop: samples the tank, drives the pump relay and reports to
//! the backend.

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::info;

use tank_relay::{
    config::EdgeConfig,
    control::{DistanceFilter, HysteresisController},
    edge::{
        Actuator, ControlLoop, HttpSink, IioDistanceSensor, RemoteStatePoller, ReportQueue,
        Reporter, SysfsRelay,
    },
    shutdown, telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    telemetry::init();

    let config = EdgeConfig::from_env()?;
    info!(
        backend = %config.backend_url,
        interval_ms = config.sample_interval.as_millis() as u64,
        low_threshold_cm = config.low_threshold_cm,
        near_zero_cm = config.near_zero_threshold_cm,
        "Edge starting"
    );

    let queue = ReportQueue::new(config.report_queue_capacity);

    // Spawn reporter: drains the queue, never blocks sampling.
    let (stop_reporter, reporter_stopped) = oneshot::channel::<()>();
    let reporter = {
        let sink = HttpSink::new(
            config.telemetry_url(),
            config.relay_url(),
            config.report_timeout,
        )?;
        let reporter = Reporter::new(queue.clone(), sink, config.report_timeout);
        tokio::spawn(reporter.run_until(async {
            let _ = reporter_stopped.await;
        }))
    };

    let sensor = IioDistanceSensor::new(&config.sensor_path, config.sensor_scale);
    let actuator = Actuator::new(SysfsRelay::new(
        &config.relay_gpio_path,
        config.relay_active_low,
    ));

    let mut control = ControlLoop::new(
        sensor,
        actuator,
        DistanceFilter::new(config.near_zero_threshold_cm),
        HysteresisController::new(config.low_threshold_cm),
        queue,
        config.sample_interval,
    );

    if config.reconcile_remote {
        let (poller, rx) = RemoteStatePoller::new(
            config.relay_url(),
            config.poll_interval,
            config.report_timeout,
        )?;
        tokio::spawn(poller.run());
        control = control.with_remote(rx);
    }

    // Actuator faults end the loop with an error; there is no safe-hold.
    let result = control.run(shutdown::signal()).await;

    let _ = stop_reporter.send(());
    let _ = reporter.await;
    result
}
