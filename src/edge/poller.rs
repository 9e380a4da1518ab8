use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::{sync::watch, time};
use tracing::{debug, info, warn};

use super::report::ReportError;
use crate::{api::dto::RelayStateDto, db::models::RelayRecord};

/// Polls the backend's relay record and publishes every successful fetch,
/// changed or not.
///
/// The control loop compares each poll against the physical relay and
/// re-pushes its own state when they disagree. Polling runs in its own
/// task so a slow backend never delays a sampling tick.
pub struct RemoteStatePoller {
    http: Client,
    url: String,
    interval: Duration,
    tx: watch::Sender<Option<RelayRecord>>,
}

impl RemoteStatePoller {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> anyhow::Result<(Self, watch::Receiver<Option<RelayRecord>>)> {
        let (tx, rx) = watch::channel(None);
        let http = Client::builder().timeout(timeout).build()?;
        Ok((
            Self {
                http,
                url: url.into(),
                interval,
                tx,
            },
            rx,
        ))
    }

    /// `Ok(None)` when the backend has no relay record yet.
    pub async fn fetch(&self) -> Result<Option<RelayRecord>, ReportError> {
        let resp = self.http.get(&self.url).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let dto = resp.json::<RelayStateDto>().await?;
                Ok(Some(dto.into()))
            }
            s => Err(ReportError::Status(s.as_u16())),
        }
    }

    /// Runs until every receiver is gone. Spawn this via `tokio::spawn`.
    pub async fn run(self) {
        info!(url = %self.url, interval_ms = self.interval.as_millis() as u64, "Remote state poller started");
        let mut ticker = time::interval(self.interval);

        loop {
            ticker.tick().await;
            if self.tx.is_closed() {
                break;
            }
            match self.fetch().await {
                Ok(Some(record)) => {
                    self.tx.send_replace(Some(record));
                }
                Ok(None) => debug!("Backend has no relay record yet"),
                Err(e) => warn!(error = %e, "Failed to poll remote relay state"),
            }
        }
    }
}
