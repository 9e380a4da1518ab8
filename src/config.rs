use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};

use crate::control::{filter::DEFAULT_NEAR_ZERO_CM, hysteresis::DEFAULT_LOW_THRESHOLD_CM};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL. When absent the service keeps state in memory.
    pub database_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Reject telemetry that carries no `relayState`.
    pub require_relay_state: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: parsed("SERVER_PORT", "8080")?,
            require_relay_state: parsed("REQUIRE_RELAY_STATE", "false")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Base URL of the backend, e.g. `http://10.0.0.2:8080`.
    pub backend_url: String,
    pub sample_interval: Duration,
    /// Distance (cm) below which the pump runs.
    pub low_threshold_cm: f64,
    /// T0: distances at or below this are inside the sensor's dead zone.
    pub near_zero_threshold_cm: f64,
    /// Per-call bound on outbound reports. Always below `sample_interval`.
    pub report_timeout: Duration,
    pub report_queue_capacity: usize,
    pub sensor_path: PathBuf,
    /// Multiplier from the sensor file's unit to centimetres.
    pub sensor_scale: f64,
    pub relay_gpio_path: PathBuf,
    pub relay_active_low: bool,
    /// Poll the backend relay record and re-push the local state when it diverges.
    pub reconcile_remote: bool,
    pub poll_interval: Duration,
}

impl EdgeConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            backend_url: required("BACKEND_URL")?.trim_end_matches('/').to_owned(),
            sample_interval: Duration::from_millis(parsed("SAMPLE_INTERVAL_MS", "1000")?),
            low_threshold_cm: parsed("LOW_THRESHOLD_CM", &DEFAULT_LOW_THRESHOLD_CM.to_string())?,
            near_zero_threshold_cm: parsed(
                "NEAR_ZERO_THRESHOLD_CM",
                &DEFAULT_NEAR_ZERO_CM.to_string(),
            )?,
            report_timeout: Duration::from_millis(parsed("REPORT_TIMEOUT_MS", "800")?),
            report_queue_capacity: parsed("REPORT_QUEUE_CAPACITY", "32")?,
            sensor_path: required("SENSOR_PATH")?.into(),
            sensor_scale: parsed("SENSOR_SCALE", "0.1")?,
            relay_gpio_path: required("RELAY_GPIO_PATH")?.into(),
            relay_active_low: parsed("RELAY_ACTIVE_LOW", "false")?,
            reconcile_remote: parsed("RECONCILE_REMOTE", "false")?,
            poll_interval: Duration::from_millis(parsed("POLL_INTERVAL_MS", "5000")?),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sample_interval.is_zero() {
            bail!("SAMPLE_INTERVAL_MS must be greater than zero");
        }
        if self.report_timeout >= self.sample_interval {
            bail!(
                "REPORT_TIMEOUT_MS ({}) must be shorter than SAMPLE_INTERVAL_MS ({})",
                self.report_timeout.as_millis(),
                self.sample_interval.as_millis()
            );
        }
        for (name, v) in [
            ("LOW_THRESHOLD_CM", self.low_threshold_cm),
            ("NEAR_ZERO_THRESHOLD_CM", self.near_zero_threshold_cm),
            ("SENSOR_SCALE", self.sensor_scale),
        ] {
            if !v.is_finite() || v < 0.0 {
                bail!("{name} must be a finite, non-negative number");
            }
        }
        if self.report_queue_capacity == 0 {
            bail!("REPORT_QUEUE_CAPACITY must be at least 1");
        }
        if self.poll_interval.is_zero() {
            bail!("POLL_INTERVAL_MS must be greater than zero");
        }
        Ok(())
    }

    pub fn telemetry_url(&self) -> String {
        format!("{}/readings", self.backend_url)
    }

    pub fn relay_url(&self) -> String {
        format!("{}/relay", self.backend_url)
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parsed<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    optional(key, default)
        .trim()
        .parse()
        .with_context(|| format!("{key} has an invalid value"))
}
