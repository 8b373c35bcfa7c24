//! InfluxDB v2 persistence: line-protocol writes and Flux queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, info};
use wattsync_core::{Period, ReadingStore, Reading, Result, Series, SyncError, Window};

use crate::shared::format_decimal;

const WRITE_COLLABORATOR: &str = "InfluxDB write";
const QUERY_COLLABORATOR: &str = "InfluxDB query";
const LATEST_LOOKBACK: &str = "-30d";
const ERROR_BODY_LIMIT: usize = 200;

pub const MEASUREMENT: &str = "electricity_consumption";
pub const METERING_POINT_TAG: &str = "metering_point";

/// Series for one metering point.
pub fn consumption_series(metering_point: &str) -> Series {
    Series::new(MEASUREMENT).tag(METERING_POINT_TAG, metering_point)
}

/// Escape measurement names, tag keys/values and field keys.
///
/// Line protocol requires escaping commas, spaces and equals with a backslash.
fn escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    escape_ident(key, out);
    out.push('=');
    escape_ident(value, out);
}

fn push_field(out: &mut String, first: &mut bool, key: &str, raw_value: &str) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }
    escape_ident(key, out);
    out.push('=');
    out.push_str(raw_value);
}

fn quote_string_field(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Encode one reading as a line-protocol point with nanosecond precision.
pub fn encode_line(series: &Series, reading: &Reading, period: Period) -> Result<String> {
    let nanos = reading.instant.timestamp_nanos_opt().ok_or_else(|| {
        SyncError::ParseError(format!("Instant out of range: {}", reading.instant))
    })?;

    let mut out = String::new();
    escape_ident(&series.measurement, &mut out);
    for (key, value) in &series.tags {
        push_tag(&mut out, key, value);
    }

    out.push(' ');
    let mut first = true;
    push_field(&mut out, &mut first, "consumption_kwh", &format_decimal(reading.quantity_kwh));
    push_field(&mut out, &mut first, "consumption_wh", &format_decimal(reading.quantity_wh));
    push_field(
        &mut out,
        &mut first,
        "resolution",
        &quote_string_field(&period.as_api_token()),
    );

    out.push(' ');
    out.push_str(&nanos.to_string());
    Ok(out)
}

/// Quote a value for use inside a Flux string literal.
fn flux_string(value: &str) -> String {
    let mut quoted = String::from("\"");
    for ch in value.chars() {
        match ch {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(ch);
            }
            '$' => quoted.push_str("\\$"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}

fn series_filters(series: &Series) -> String {
    let mut filters = format!(
        "  |> filter(fn: (r) => r[\"_measurement\"] == {})\n",
        flux_string(&series.measurement)
    );
    for (key, value) in &series.tags {
        filters.push_str(&format!(
            "  |> filter(fn: (r) => r[{}] == {})\n",
            flux_string(key),
            flux_string(value)
        ));
    }
    filters
}

pub fn latest_instant_query(bucket: &str, series: &Series) -> String {
    format!(
        "from(bucket: {})\n  |> range(start: {})\n{}  |> last()\n  |> keep(columns: [\"_time\"])\n",
        flux_string(bucket),
        LATEST_LOOKBACK,
        series_filters(series)
    )
}

pub fn window_instants_query(bucket: &str, series: &Series, window: &Window) -> String {
    format!(
        "from(bucket: {})\n  |> range(start: {}, stop: {})\n{}  |> filter(fn: (r) => r[\"_field\"] == \"consumption_kwh\")\n  |> keep(columns: [\"_time\"])\n",
        flux_string(bucket),
        wattsync_core::tz::format_rfc3339_utc(&window.start),
        wattsync_core::tz::format_rfc3339_utc(&window.end),
        series_filters(series)
    )
}

/// Extract every `_time` value from a Flux CSV response.
///
/// Handles multiple tables (each with its own header row), annotation rows
/// starting with `#` and blank separator lines.
pub fn parse_flux_times(body: &str) -> Result<Vec<DateTime<Utc>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());

    let mut time_column: Option<usize> = None;
    let mut times = Vec::new();

    for record in reader.records() {
        let record = record
            .map_err(|e| SyncError::upstream(QUERY_COLLABORATOR, None, format!("Malformed CSV: {}", e)))?;
        if record.iter().all(str::is_empty) {
            time_column = None;
            continue;
        }
        if let Some(idx) = record.iter().position(|field| field == "_time") {
            time_column = Some(idx);
            continue;
        }
        let Some(idx) = time_column else {
            continue;
        };
        let Some(raw) = record.get(idx).filter(|v| !v.is_empty()) else {
            continue;
        };
        let instant = DateTime::parse_from_rfc3339(raw).map_err(|e| {
            SyncError::upstream(QUERY_COLLABORATOR, None, format!("Bad _time '{}': {}", raw, e))
        })?;
        times.push(instant.with_timezone(&Utc));
    }

    Ok(times)
}

pub struct InfluxStore {
    http: reqwest::Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxStore {
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            http,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
        }
    }

    async fn query(&self, flux: String, window: Option<&Window>) -> Result<Vec<DateTime<Utc>>> {
        let bounds = window.map(|w| (w.start, w.end));
        debug!(query = %flux, "Running Flux query");

        let response = self
            .http
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(flux)
            .send()
            .await
            .map_err(|e| SyncError::upstream(QUERY_COLLABORATOR, bounds, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::upstream(QUERY_COLLABORATOR, bounds, e.to_string()))?;
        if !status.is_success() {
            return Err(SyncError::upstream(
                QUERY_COLLABORATOR,
                bounds,
                format!("HTTP {} - {}", status.as_u16(), truncate(&body)),
            ));
        }

        parse_flux_times(&body)
    }

    /// Stored instants for `series` inside `window`.
    pub async fn instants_in(&self, series: &Series, window: &Window) -> Result<Vec<DateTime<Utc>>> {
        self.query(window_instants_query(&self.bucket, series, window), Some(window))
            .await
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[async_trait]
impl ReadingStore for InfluxStore {
    async fn write(&self, series: &Series, readings: &[Reading], period: Period) -> Result<usize> {
        if readings.is_empty() {
            return Ok(0);
        }

        let lines = readings
            .iter()
            .map(|r| encode_line(series, r, period))
            .collect::<Result<Vec<_>>>()?;
        let bounds = readings
            .first()
            .zip(readings.last())
            .map(|(a, b)| (a.instant, b.instant));

        let response = self
            .http
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await
            .map_err(|e| SyncError::upstream(WRITE_COLLABORATOR, bounds, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::upstream(
                WRITE_COLLABORATOR,
                bounds,
                format!("HTTP {} - {}", status.as_u16(), truncate(&body)),
            ));
        }

        info!(points = lines.len(), bucket = %self.bucket, "Wrote points to InfluxDB");
        Ok(lines.len())
    }

    async fn latest_instant(&self, series: &Series) -> Result<Option<DateTime<Utc>>> {
        let times = self
            .query(latest_instant_query(&self.bucket, series), None)
            .await?;
        Ok(times.into_iter().max())
    }
}
