//! One sync invocation: pick a window, fetch, reconcile and persist.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::fetch::{MeterDataSource, ResolutionFallbackFetcher};
use crate::models::{Anomaly, Period, Reading, SkippedRecord};
use crate::window::Window;

/// Measurement name and tag set identifying one stored series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
}

impl Series {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Persistence for reconciled readings, typically a time-series database.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist `readings`, returning how many points were written.
    async fn write(&self, series: &Series, readings: &[Reading], period: Period) -> Result<usize>;

    /// Most recent stored instant for `series`, if any.
    async fn latest_instant(&self, series: &Series) -> Result<Option<DateTime<Utc>>>;
}

/// Knobs for a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub fine: Period,
    pub coarse: Period,
    /// Overlap with already stored data on incremental runs.
    pub buffer: Duration,
    /// How far back the first incremental run reaches.
    pub initial_days: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fine: Period::QUARTER_HOUR,
            coarse: Period::HOUR,
            buffer: Duration::hours(2),
            initial_days: 7,
        }
    }
}

/// Which window a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRequest {
    Manual(Window),
    /// Resume from the store's latest instant up to `now`.
    Incremental { now: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub window: Window,
    pub period: Period,
    pub written: usize,
    pub anomalies: Vec<Anomaly>,
    pub skipped: Vec<SkippedRecord>,
}

impl SyncSummary {
    pub fn is_noop(&self) -> bool {
        self.written == 0
    }
}

pub struct SyncJob<S, W> {
    fetcher: ResolutionFallbackFetcher<S>,
    store: W,
    series: Series,
    settings: SyncSettings,
}

impl<S: MeterDataSource, W: ReadingStore> SyncJob<S, W> {
    pub fn new(
        fetcher: ResolutionFallbackFetcher<S>,
        store: W,
        series: Series,
        settings: SyncSettings,
    ) -> Self {
        Self {
            fetcher,
            store,
            series,
            settings,
        }
    }

    pub fn store(&self) -> &W {
        &self.store
    }

    /// Resolve the window for `request`.
    ///
    /// A failing latest-instant lookup is logged and treated as an empty
    /// store, so the run falls back to the initial sync range.
    pub async fn resolve_window(&self, request: WindowRequest) -> Result<Window> {
        match request {
            WindowRequest::Manual(window) => Ok(window),
            WindowRequest::Incremental { now } => {
                let latest = match self.store.latest_instant(&self.series).await {
                    Ok(latest) => latest,
                    Err(e) => {
                        warn!("Could not query latest stored instant: {}", e);
                        None
                    }
                };
                match latest {
                    Some(latest) => info!(latest = %latest, "Found existing data"),
                    None => info!(
                        days = self.settings.initial_days,
                        "No existing data found, running initial sync"
                    ),
                }
                Window::incremental(
                    latest,
                    self.settings.buffer,
                    self.settings.initial_days,
                    now,
                )
            }
        }
    }

    /// Run one sync. An empty window is a successful no-op.
    pub async fn run(&self, request: WindowRequest) -> Result<SyncSummary> {
        let window = self.resolve_window(request).await?;
        info!(%window, hours = window.duration().num_hours(), "Syncing metering data");

        let outcome = self
            .fetcher
            .fetch_window(&window, self.settings.fine, self.settings.coarse)
            .await?;
        let reconciliation = outcome.reconciliation;

        let written = if reconciliation.is_empty() {
            info!(%window, "No new data to sync");
            0
        } else {
            let written = self
                .store
                .write(&self.series, &reconciliation.readings, outcome.period)
                .await?;
            info!(written, period = %outcome.period, "Wrote readings");
            written
        };

        Ok(SyncSummary {
            window,
            period: outcome.period,
            written,
            anomalies: reconciliation.anomalies,
            skipped: reconciliation.skipped,
        })
    }
}
