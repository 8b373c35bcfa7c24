use std::process::ExitCode;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;
use wattsync_core::{
    ResolutionFallbackFetcher, Severity, SyncJob, SyncSettings, SyncSummary, Window, WindowRequest,
};

use crate::api::MeterApiClient;
use crate::auth::{B2cClient, TokenFile, rotated_token};
use crate::cli::SyncArgs;
use crate::error::{CliError, CliResult, EXIT_SUCCESS, OutputFormat};
use crate::influx::{InfluxStore, consumption_series};
use crate::shared::{Zone, parse_period, parse_sync_bound, print_json};

pub async fn run_sync(args: SyncArgs, output_format: OutputFormat) -> CliResult<ExitCode> {
    let zone = Zone::from_args(&args.zone)?;
    let settings = SyncSettings {
        fine: parse_period(&args.fine_period)?,
        coarse: parse_period(&args.coarse_period)?,
        buffer: Duration::hours(i64::from(args.sync_buffer_hours)),
        initial_days: args.initial_sync_days,
    };
    let now = Utc::now();
    let request = match &args.start {
        Some(start) => {
            info!("Using manual date range");
            let start = parse_sync_bound(start, zone.tz)?;
            let end = match &args.end {
                Some(end) => parse_sync_bound(end, zone.tz)?,
                None => now,
            };
            WindowRequest::Manual(Window::new(start, end)?)
        }
        None => {
            info!("Using incremental sync mode");
            WindowRequest::Incremental { now }
        }
    };

    let http = reqwest::Client::new();

    let token_file = TokenFile::new(&args.auth.refresh_token_file);
    let refresh_token = token_file
        .read()
        .map_err(|e| CliError::input(format!("{:#}", e)).with_status("auth"))?;

    info!("Authenticating with metering service");
    let tokens = B2cClient::from_args(&args.auth)
        .refresh(&http, &refresh_token)
        .await
        .map_err(|e| {
            CliError::runtime(format!(
                "Authentication failed: {}\n\
                 Check the refresh token in {}. If it has expired, obtain a new one and write it to the file.",
                e,
                args.auth.refresh_token_file.display()
            ))
            .with_status("auth")
        })?;

    if let Some(rotated) = rotated_token(&refresh_token, &tokens) {
        token_file
            .save(rotated)
            .map_err(|e| CliError::runtime(format!("{:#}", e)))?;
    }

    let source = MeterApiClient::new(
        http.clone(),
        &args.api_base,
        &args.metering_point,
        &tokens.access_token,
        zone.tz,
    );
    let store = InfluxStore::new(
        http,
        &args.influx.influxdb_url,
        &args.influx.influxdb_token,
        &args.influx.influxdb_org,
        &args.influx.influxdb_bucket,
    );
    let job = SyncJob::new(
        ResolutionFallbackFetcher::new(source, zone.reconciler()),
        store,
        consumption_series(&args.metering_point),
        settings,
    );

    let summary = job.run(request).await?;
    if summary.is_noop() {
        info!("No data to sync");
    } else {
        info!("Sync completed successfully");
    }

    match output_format {
        OutputFormat::Json => print_json(&SyncOutput::from(&summary))?,
        OutputFormat::Text => print_text(&summary),
    }

    Ok(ExitCode::from(EXIT_SUCCESS))
}

#[derive(Debug, Serialize)]
struct SyncOutput<'a> {
    #[serde(flatten)]
    summary: &'a SyncSummary,
    skipped_count: usize,
    max_severity: Option<Severity>,
}

impl<'a> From<&'a SyncSummary> for SyncOutput<'a> {
    fn from(summary: &'a SyncSummary) -> Self {
        Self {
            summary,
            skipped_count: summary.skipped.len(),
            max_severity: summary.anomalies.iter().map(|a| a.severity).max(),
        }
    }
}

fn print_text(summary: &SyncSummary) {
    println!("Window: {}", summary.window);
    println!("Resolution: {}", summary.period);
    println!("Written: {}", summary.written);
    if !summary.skipped.is_empty() {
        println!("Skipped records: {}", summary.skipped.len());
    }
    for anomaly in &summary.anomalies {
        println!("{}: {}", anomaly.severity.to_string().to_uppercase(), anomaly);
    }
}
