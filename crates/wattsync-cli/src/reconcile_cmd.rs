use std::process::ExitCode;

use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use wattsync_core::tz::format_rfc3339_utc;
use wattsync_core::{Anomaly, Occurrence, Period, Reconciliation, SkippedRecord};

use crate::api::decode_envelope;
use crate::cli::ReconcileArgs;
use crate::error::{CliError, CliResult, EXIT_SUCCESS, OutputFormat};
use crate::shared::{Zone, format_decimal, format_rfc3339, parse_period, print_json, read_input};

pub fn run_reconcile(args: ReconcileArgs, output_format: OutputFormat) -> CliResult<ExitCode> {
    let zone = Zone::from_args(&args.zone)?;
    let period = parse_period(&args.period)?;
    let input = read_input(&args.input)?;

    let envelope: Value = serde_json::from_str(&input)
        .map_err(|e| CliError::input(format!("Input is not valid JSON: {}", e)))?;
    let records = decode_envelope(&envelope);

    let reconciliation = zone.reconciler().reconcile(&records, period);
    let report = ReconcileReport::new(zone.tz, period, records.len(), &reconciliation);

    match output_format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_text(&report),
    }

    Ok(ExitCode::from(EXIT_SUCCESS))
}

#[derive(Debug, Serialize)]
struct ReconcileReport<'a> {
    tz: String,
    period: Period,
    records: usize,
    readings: Vec<ReadingOutput>,
    anomalies: &'a [Anomaly],
    skipped: &'a [SkippedRecord],
}

#[derive(Debug, Serialize)]
struct ReadingOutput {
    utc: String,
    local: String,
    occurrence: Occurrence,
    consumption_kwh: String,
    consumption_wh: String,
    unit: String,
}

impl<'a> ReconcileReport<'a> {
    fn new(tz: Tz, period: Period, records: usize, reconciliation: &'a Reconciliation) -> Self {
        let readings = reconciliation
            .readings
            .iter()
            .map(|r| ReadingOutput {
                utc: format_rfc3339_utc(&r.instant),
                local: format_rfc3339(&r.instant.with_timezone(&tz)),
                occurrence: r.occurrence,
                consumption_kwh: format_decimal(r.quantity_kwh),
                consumption_wh: format_decimal(r.quantity_wh),
                unit: r.unit.clone(),
            })
            .collect();

        Self {
            tz: tz.to_string(),
            period,
            records,
            readings,
            anomalies: &reconciliation.anomalies,
            skipped: &reconciliation.skipped,
        }
    }
}

fn print_text(report: &ReconcileReport<'_>) {
    for r in &report.readings {
        println!(
            "{}  {}  {:<6}  {} {}",
            r.utc,
            r.local,
            r.occurrence.to_string(),
            r.consumption_kwh,
            r.unit
        );
    }
    println!(
        "Readings: {} from {} record(s) at {}",
        report.readings.len(),
        report.records,
        report.period
    );
    if !report.skipped.is_empty() {
        println!("Skipped: {}", report.skipped.len());
        for s in report.skipped {
            println!("  #{} '{}': {}", s.index, s.timestamp_text, s.reason);
        }
    }
    for anomaly in report.anomalies {
        println!("{}: {}", anomaly.severity.to_string().to_uppercase(), anomaly);
    }
}
