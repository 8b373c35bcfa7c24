//! Fetching with resolution fallback.
//!
//! Some metering points only report hourly data. The fetcher asks for the
//! fine period first and retries once at the coarse period when nothing
//! usable comes back.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{Period, RawRecord};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::window::Window;

/// Source of raw metering records, typically an HTTP API client.
#[async_trait]
pub trait MeterDataSource: Send + Sync {
    /// Records for `window` at `period`, in the order the source returned them.
    async fn fetch(&self, window: &Window, period: Period) -> Result<Vec<RawRecord>>;
}

/// Reconciled data for a window together with the period it was fetched at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub reconciliation: Reconciliation,
    pub period: Period,
}

impl FetchOutcome {
    pub fn is_empty(&self) -> bool {
        self.reconciliation.is_empty()
    }
}

pub struct ResolutionFallbackFetcher<S> {
    source: S,
    reconciler: Reconciler,
}

impl<S: MeterDataSource> ResolutionFallbackFetcher<S> {
    pub fn new(source: S, reconciler: Reconciler) -> Self {
        Self { source, reconciler }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch and reconcile `window`, falling back from `fine` to `coarse`.
    ///
    /// An empty result at both periods is returned as an empty outcome
    /// tagged with `fine`. Source errors are returned immediately without
    /// trying the other period.
    pub async fn fetch_window(
        &self,
        window: &Window,
        fine: Period,
        coarse: Period,
    ) -> Result<FetchOutcome> {
        let reconciliation = self.attempt(window, fine).await?;
        if !reconciliation.is_empty() {
            return Ok(FetchOutcome {
                reconciliation,
                period: fine,
            });
        }

        if coarse == fine {
            info!(%window, period = %fine, "No data available for window");
            return Ok(FetchOutcome {
                reconciliation,
                period: fine,
            });
        }

        info!(%window, from = %fine, to = %coarse, "No data at fine resolution, falling back");
        let fallback = self.attempt(window, coarse).await?;
        if !fallback.is_empty() {
            return Ok(FetchOutcome {
                reconciliation: fallback,
                period: coarse,
            });
        }

        info!(%window, "No data available at any resolution");
        Ok(FetchOutcome {
            reconciliation,
            period: fine,
        })
    }

    async fn attempt(&self, window: &Window, period: Period) -> Result<Reconciliation> {
        let records = self.source.fetch(window, period).await?;
        debug!(%window, %period, records = records.len(), "Fetched raw records");
        Ok(self.reconciler.reconcile(&records, period))
    }
}
