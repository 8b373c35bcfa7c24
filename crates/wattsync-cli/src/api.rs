//! Metering API client.

use std::str::FromStr;

use async_trait::async_trait;
use chrono_tz::Tz;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info};
use wattsync_core::models::DEFAULT_UNIT;
use wattsync_core::{MeterDataSource, Period, RawRecord, Result, SyncError, Window};

use crate::shared::format_rfc3339;

const COLLABORATOR: &str = "meter API";
const CLIENT_USER_AGENT: &str = "wattivahti-influx-sync/1.0.0";
const ERROR_BODY_LIMIT: usize = 200;
const MEASUREMENT_TYPE_CONSUMPTION: &str = "1";

/// Fetches consumption time series for one metering point.
pub struct MeterApiClient {
    http: reqwest::Client,
    base_url: String,
    metering_point: String,
    access_token: String,
    tz: Tz,
}

impl MeterApiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        metering_point: impl Into<String>,
        access_token: impl Into<String>,
        tz: Tz,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            metering_point: metering_point.into(),
            access_token: access_token.into(),
            tz,
        }
    }

    fn url(&self) -> String {
        format!("{}/meterdata2", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl MeterDataSource for MeterApiClient {
    async fn fetch(&self, window: &Window, period: Period) -> Result<Vec<RawRecord>> {
        let bounds = Some((window.start, window.end));
        let start = format_rfc3339(&window.start.with_timezone(&self.tz));
        let stop = format_rfc3339(&window.end.with_timezone(&self.tz));
        let token = period.as_api_token();

        info!(%start, %stop, resolution = %token, "Fetching data from metering API");

        let response = self
            .http
            .get(self.url())
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .query(&[
                ("meteringPointCode", self.metering_point.as_str()),
                ("measurementType", MEASUREMENT_TYPE_CONSUMPTION),
                ("start", start.as_str()),
                ("stop", stop.as_str()),
                ("resultStep", token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SyncError::upstream(COLLABORATOR, bounds, format!("Network error: {}", e)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            SyncError::upstream(COLLABORATOR, bounds, format!("Failed to read response: {}", e))
        })?;

        if !status.is_success() {
            let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(SyncError::upstream(
                COLLABORATOR,
                bounds,
                format!("HTTP {} - {}", status.as_u16(), snippet),
            ));
        }

        let envelope: Value = serde_json::from_str(&body).map_err(|e| {
            SyncError::upstream(COLLABORATOR, bounds, format!("Invalid JSON response: {}", e))
        })?;

        let records = decode_envelope(&envelope);
        debug!(records = records.len(), "Decoded API envelope");
        Ok(records)
    }
}

/// Flatten an API response into arrival-ordered raw records.
///
/// Accepts the full `getconsumptionsresult` envelope or a bare `tsv` array.
/// Missing envelope levels mean no records. Every item yields a record: a
/// missing `time` becomes empty text and a non-string `time` its JSON text,
/// both left for the grouper to skip. A `quantity` that is null or not a
/// number becomes `None`.
pub fn decode_envelope(envelope: &Value) -> Vec<RawRecord> {
    let items = match envelope {
        Value::Array(items) => Some(items),
        _ => envelope
            .pointer("/getconsumptionsresult/consumptiondata/timeseries/values/tsv")
            .and_then(Value::as_array),
    };

    items
        .map(|items| items.iter().map(decode_item).collect())
        .unwrap_or_default()
}

/// One record per item, so skipped-record indices match the response.
fn decode_item(item: &Value) -> RawRecord {
    let time = match item.get("time") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let quantity = item.get("quantity").and_then(decode_quantity);
    let unit = item
        .get("unit")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_UNIT);
    RawRecord::new(time, quantity).with_unit(unit)
}

fn decode_quantity(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}
