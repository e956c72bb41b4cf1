//! Downstream sinks for summaries, crashes and position reports.
//!
//! Publishing is best effort: callers log a failed publish and move on,
//! nothing is retried or rolled back.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::aggregator::DrivingSummary;
use crate::collision::CrashEvent;
use crate::error::PublishError;
use crate::position::Position;
use crate::travel::Identity;

pub const DRIVING_EVENT: &str = "driving.tracking";
pub const CRASH_EVENT: &str = "crash.detected";
pub const POSITION_EVENT: &str = "geolocation.update";

pub trait Publisher: Send + Sync {
    fn publish_driving<'a>(
        &'a self,
        identity: &'a Identity,
        summary: &'a DrivingSummary,
    ) -> BoxFuture<'a, Result<(), PublishError>>;

    fn publish_crash<'a>(
        &'a self,
        identity: &'a Identity,
        event: &'a CrashEvent,
    ) -> BoxFuture<'a, Result<(), PublishError>>;

    fn publish_position<'a>(
        &'a self,
        position: &'a Position,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<(), PublishError>>;

    /// Flush and release the transport. Later publishes may fail.
    fn close(&self) -> BoxFuture<'_, Result<(), PublishError>>;
}

/// Identity fields flattened next to the payload
#[derive(Serialize)]
struct Tagged<'a, T: Serialize> {
    #[serde(flatten)]
    identity: &'a Identity,
    #[serde(flatten)]
    data: &'a T,
}

#[derive(Serialize)]
struct PositionReport {
    latitude: f64,
    longitude: f64,
    stale: bool,
    coordinates: String,
    fixed_at: Option<DateTime<Utc>>,
}

impl From<&Position> for PositionReport {
    fn from(position: &Position) -> Self {
        Self {
            latitude: position.latitude,
            longitude: position.longitude,
            stale: position.stale,
            coordinates: position.coordinates(),
            fixed_at: position.fixed_at,
        }
    }
}

// ─── HTTP backend ────────────────────────────────────────────────────────────

/// POSTs JSON to `{base}/driving`, `{base}/crashes` and `{base}/geolocation`.
pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPublisher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), PublishError> {
        self.client
            .post(format!("{}/{}", self.base_url, path))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl Publisher for HttpPublisher {
    fn publish_driving<'a>(
        &'a self,
        identity: &'a Identity,
        summary: &'a DrivingSummary,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        async move { self.post("driving", &Tagged { identity, data: summary }).await }.boxed()
    }

    fn publish_crash<'a>(
        &'a self,
        identity: &'a Identity,
        event: &'a CrashEvent,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        async move { self.post("crashes", &Tagged { identity, data: event }).await }.boxed()
    }

    fn publish_position<'a>(
        &'a self,
        position: &'a Position,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        async move {
            let report = PositionReport::from(position);
            self.post("geolocation", &Tagged { identity, data: &report }).await
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PublishError>> {
        async { Ok(()) }.boxed()
    }
}

// ─── JSON lines file ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    event: &'static str,
    data: Tagged<'a, T>,
}

/// Appends one `{"event": ..., "data": ...}` object per line.
pub struct JsonLinesPublisher {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl JsonLinesPublisher {
    pub async fn open(path: &Path) -> Result<Self, PublishError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append<T: Serialize>(
        &self,
        event: &'static str,
        identity: &Identity,
        data: &T,
    ) -> Result<(), PublishError> {
        let mut line = serde_json::to_vec(&Line {
            event,
            data: Tagged { identity, data },
        })?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(PublishError::Closed)?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

impl Publisher for JsonLinesPublisher {
    fn publish_driving<'a>(
        &'a self,
        identity: &'a Identity,
        summary: &'a DrivingSummary,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        self.append(DRIVING_EVENT, identity, summary).boxed()
    }

    fn publish_crash<'a>(
        &'a self,
        identity: &'a Identity,
        event: &'a CrashEvent,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        self.append(CRASH_EVENT, identity, event).boxed()
    }

    fn publish_position<'a>(
        &'a self,
        position: &'a Position,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        async move {
            let report = PositionReport::from(position);
            self.append(POSITION_EVENT, identity, &report).await
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PublishError>> {
        async move {
            if let Some(mut file) = self.file.lock().await.take() {
                file.flush().await?;
                file.sync_all().await?;
                log::info!("[publish] closed {}", self.path.display());
            }
            Ok(())
        }
        .boxed()
    }
}
