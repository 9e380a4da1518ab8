//! Fire-and-forget reporting from the edge to the backend.
//!
//! The control loop pushes into a bounded [`ReportQueue`]; when full, the
//! oldest report is dropped. A separate [`Reporter`] task drains it, bounding
//! every call with a timeout. Failed reports are logged and lost, never
//! retried, and never feed back into the relay state.

use std::{
    collections::VecDeque,
    future::{self, Future},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::{sync::Notify, time};
use tracing::{debug, info, warn};

use crate::db::models::RelayState;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One outbound message. Serialises to the backend's request bodies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
    /// `{"distance": 1.0, "relayState": "ON"}`
    #[serde(rename_all = "camelCase")]
    Telemetry {
        distance: f64,
        relay_state: RelayState,
    },
    /// `{"action": "ON"}`
    RelayCommand { action: RelayState },
}

impl Report {
    fn kind(&self) -> &'static str {
        match self {
            Report::Telemetry { .. } => "telemetry",
            Report::RelayCommand { .. } => "relay_command",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned HTTP {0}")]
    Status(u16),
}

impl From<reqwest::Error> for ReportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ReportError::Timeout
        } else if let Some(status) = e.status() {
            ReportError::Status(status.as_u16())
        } else {
            ReportError::Transport(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

struct QueueInner {
    items: Mutex<VecDeque<Report>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

/// Bounded multi-producer queue with drop-oldest overflow. `push` never
/// blocks or awaits.
#[derive(Clone)]
pub struct ReportQueue {
    inner: Arc<QueueInner>,
}

impl ReportQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueues `report`. Returns `true` if an older report was evicted.
    pub fn push(&self, report: Report) -> bool {
        let evicted = {
            let mut items = self.items();
            let evicted = if items.len() >= self.inner.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(report);
            evicted
        };
        self.inner.notify.notify_one();

        match evicted {
            Some(old) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = old.kind(), "Report queue full; dropped oldest report");
                true
            }
            None => false,
        }
    }

    pub fn try_pop(&self) -> Option<Report> {
        self.items().pop_front()
    }

    /// Waits until a report is available.
    pub async fn pop(&self) -> Report {
        loop {
            if let Some(report) = self.try_pop() {
                return report;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total reports evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn items(&self) -> std::sync::MutexGuard<'_, VecDeque<Report>> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send(&self, report: &Report) -> Result<(), ReportError>;
}

/// Posts telemetry to `/readings` and relay commands to `/relay`.
#[derive(Debug, Clone)]
pub struct HttpSink {
    http: Client,
    telemetry_url: String,
    relay_url: String,
}

impl HttpSink {
    pub fn new(
        telemetry_url: impl Into<String>,
        relay_url: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            telemetry_url: telemetry_url.into(),
            relay_url: relay_url.into(),
        })
    }
}

#[async_trait]
impl ReportSink for HttpSink {
    async fn send(&self, report: &Report) -> Result<(), ReportError> {
        let url = match report {
            Report::Telemetry { .. } => &self.telemetry_url,
            Report::RelayCommand { .. } => &self.relay_url,
        };

        let resp = self.http.post(url).json(report).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ReportError::Status(status.as_u16()));
        }
        debug!(url = %url, status = status.as_u16(), "Report delivered");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reporter task
// ---------------------------------------------------------------------------

pub struct Reporter<S> {
    queue: ReportQueue,
    sink: S,
    timeout: Duration,
}

impl<S: ReportSink> Reporter<S> {
    pub fn new(queue: ReportQueue, sink: S, timeout: Duration) -> Self {
        Self {
            queue,
            sink,
            timeout,
        }
    }

    /// Drains the queue forever. Spawn this via `tokio::spawn`.
    pub async fn run(self) {
        self.run_until(future::pending()).await
    }

    /// Drains the queue until `shutdown` resolves, then flushes what is left.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        info!(timeout_ms = self.timeout.as_millis() as u64, "Reporter started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                report = self.queue.pop() => {
                    // Errors are already logged; the report is simply lost.
                    let _ = self.deliver(&report).await;
                }
                _ = &mut shutdown => break,
            }
        }
        self.flush().await;
    }

    /// One last pass over the queue, bounded as a whole by a single timeout.
    pub async fn flush(&self) {
        let drain = async {
            while let Some(report) = self.queue.try_pop() {
                let _ = self.deliver(&report).await;
            }
        };
        if time::timeout(self.timeout, drain).await.is_err() {
            warn!(pending = self.queue.len(), "Shutdown flush timed out");
        }
    }

    /// Sends one report within the timeout.
    pub async fn deliver(&self, report: &Report) -> Result<(), ReportError> {
        let result = match time::timeout(self.timeout, self.sink.send(report)).await {
            Ok(result) => result,
            Err(_) => Err(ReportError::Timeout),
        };

        if let Err(e) = &result {
            warn!(kind = report.kind(), error = %e, "Report dropped");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use tokio::{net::TcpListener, sync::mpsc};

    use super::*;

    fn telemetry(distance: f64) -> Report {
        Report::Telemetry {
            distance,
            relay_state: RelayState::Off,
        }
    }

    #[test]
    fn report_bodies_match_backend_schema() {
        assert_eq!(
            serde_json::to_value(Report::Telemetry {
                distance: 1.0,
                relay_state: RelayState::On,
            })
            .unwrap(),
            json!({ "distance": 1.0, "relayState": "ON" })
        );
        assert_eq!(
            serde_json::to_value(Report::RelayCommand {
                action: RelayState::Off
            })
            .unwrap(),
            json!({ "action": "OFF" })
        );
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = ReportQueue::new(2);
        assert!(!queue.push(telemetry(1.0)));
        assert!(!queue.push(telemetry(2.0)));
        assert!(queue.push(telemetry(3.0)));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(telemetry(2.0)));
        assert_eq!(queue.try_pop(), Some(telemetry(3.0)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = ReportQueue::new(4);
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(telemetry(9.0));
        assert_eq!(waiter.await.unwrap(), telemetry(9.0));
    }

    struct SlowSink;

    #[async_trait]
    impl ReportSink for SlowSink {
        async fn send(&self, _report: &Report) -> Result<(), ReportError> {
            time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_is_bounded_by_timeout() {
        let reporter = Reporter::new(ReportQueue::new(1), SlowSink, Duration::from_millis(500));
        let err = reporter.deliver(&telemetry(1.0)).await.unwrap_err();
        assert!(matches!(err, ReportError::Timeout));
    }

    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReportSink for FailingSink {
        async fn send(&self, _report: &Report) -> Result<(), ReportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ReportError::Transport("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn failed_report_is_not_retried() {
        let queue = ReportQueue::new(4);
        let sink = FailingSink {
            calls: AtomicUsize::new(0),
        };
        let reporter = Reporter::new(queue.clone(), sink, Duration::from_millis(500));

        queue.push(telemetry(1.0));
        let report = queue.pop().await;
        assert!(reporter.deliver(&report).await.is_err());
        assert_eq!(reporter.sink.calls.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<Report>>>,
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        async fn send(&self, report: &Report) -> Result<(), ReportError> {
            self.sent.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_until_flushes_reports_queued_at_shutdown() {
        let queue = ReportQueue::new(4);
        let sink = RecordingSink::default();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(
            Reporter::new(queue.clone(), sink.clone(), Duration::from_millis(500)).run_until(
                async {
                    let _ = stop_rx.await;
                },
            ),
        );

        queue.push(Report::RelayCommand {
            action: RelayState::Off,
        });
        stop_tx.send(()).unwrap();
        task.await.unwrap();

        assert!(queue.is_empty());
        assert_eq!(
            *sink.sent.lock().unwrap(),
            vec![Report::RelayCommand {
                action: RelayState::Off
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flush_is_bounded_by_one_timeout() {
        let queue = ReportQueue::new(4);
        for d in [1.0, 2.0, 3.0] {
            queue.push(telemetry(d));
        }
        let reporter = Reporter::new(queue.clone(), SlowSink, Duration::from_millis(500));

        let started = time::Instant::now();
        reporter.flush().await;
        assert!(started.elapsed() < Duration::from_millis(600));
        assert!(!queue.is_empty());
    }

    async fn spawn_backend(status: StatusCode) -> (String, mpsc::UnboundedReceiver<(String, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let readings_tx = tx.clone();
        let app = Router::new()
            .route(
                "/readings",
                post(move |Json(body): Json<Value>| {
                    let tx = readings_tx.clone();
                    async move {
                        let _ = tx.send(("/readings".to_owned(), body));
                        status
                    }
                }),
            )
            .route(
                "/relay",
                post(move |Json(body): Json<Value>| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(("/relay".to_owned(), body));
                        status
                    }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), rx)
    }

    #[tokio::test]
    async fn http_sink_routes_reports() {
        let (base, mut rx) = spawn_backend(StatusCode::OK).await;
        let sink = HttpSink::new(
            format!("{base}/readings"),
            format!("{base}/relay"),
            Duration::from_secs(2),
        )
        .unwrap();

        sink.send(&telemetry(20.0)).await.unwrap();
        sink.send(&Report::RelayCommand {
            action: RelayState::On,
        })
        .await
        .unwrap();

        let (path, body) = rx.recv().await.unwrap();
        assert_eq!(path, "/readings");
        assert_eq!(body, json!({ "distance": 20.0, "relayState": "OFF" }));

        let (path, body) = rx.recv().await.unwrap();
        assert_eq!(path, "/relay");
        assert_eq!(body, json!({ "action": "ON" }));
    }

    #[tokio::test]
    async fn http_sink_surfaces_error_status() {
        let (base, _rx) = spawn_backend(StatusCode::SERVICE_UNAVAILABLE).await;
        let sink = HttpSink::new(
            format!("{base}/readings"),
            format!("{base}/relay"),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = sink.send(&telemetry(20.0)).await.unwrap_err();
        assert!(matches!(err, ReportError::Status(503)));
    }

    #[tokio::test]
    async fn http_sink_unreachable_is_transport_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = HttpSink::new(
            format!("http://{addr}/readings"),
            format!("http://{addr}/relay"),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = sink.send(&telemetry(20.0)).await.unwrap_err();
        assert!(matches!(err, ReportError::Transport(_) | ReportError::Timeout));
    }
}
