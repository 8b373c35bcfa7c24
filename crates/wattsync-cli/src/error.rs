use std::fmt;
use std::process::ExitCode;

use serde::Serialize;
use wattsync_core::SyncError;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_INPUT_ERROR: u8 = 2;
pub const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Runtime,
}

#[derive(Debug)]
pub struct CliError {
    kind: ErrorKind,
    message: String,
    status: Option<&'static str>,
}

impl CliError {
    pub fn input(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Input,
            message: message.into(),
            status: None,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            message: message.into(),
            status: None,
        }
    }

    /// Tag the error with a machine-readable status for the JSON envelope.
    pub fn with_status(mut self, status: &'static str) -> Self {
        self.status = Some(status);
        self
    }

    pub fn exit_code(&self) -> u8 {
        match self.kind {
            ErrorKind::Input => EXIT_INPUT_ERROR,
            ErrorKind::Runtime => EXIT_RUNTIME_ERROR,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<SyncError> for CliError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Upstream { collaborator, .. } => {
                let status = match collaborator {
                    "auth" => "auth",
                    _ => "upstream",
                };
                CliError::runtime(err.to_string()).with_status(status)
            }
            SyncError::NonexistentLocalTime { .. } => {
                CliError::input(err.to_string()).with_status("nonexistent")
            }
            SyncError::InvalidTimezone(_)
            | SyncError::ParseError(_)
            | SyncError::InvalidWindow { .. }
            | SyncError::InvalidPeriod(_) => CliError::input(err.to_string()),
        }
    }
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Serialize)]
struct ErrorOutput {
    error: String,
    exit_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

pub fn render_error(err: &CliError, output_format: OutputFormat) -> ExitCode {
    match output_format {
        OutputFormat::Json => {
            let envelope = ErrorOutput {
                error: err.message.clone(),
                exit_code: err.exit_code(),
                status: err.status.map(str::to_string),
            };

            match serde_json::to_string_pretty(&envelope) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("Error: {}", err.message),
            }
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", err.message);
        }
    }

    ExitCode::from(err.exit_code())
}

pub fn output_format_hint(s: &str) -> OutputFormat {
    if s.eq_ignore_ascii_case("json") {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    }
}

pub fn parse_output_format(s: &str) -> CliResult<OutputFormat> {
    match s.to_lowercase().as_str() {
        "json" => Ok(OutputFormat::Json),
        "text" => Ok(OutputFormat::Text),
        _ => Err(CliError::input(format!(
            "Invalid output_format '{}'. Expected: json, text",
            s
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn upstream_errors_are_runtime() {
        let start = Utc.with_ymd_and_hms(2025, 10, 26, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 10, 27, 0, 0, 0).unwrap();
        let err: CliError =
            SyncError::upstream("meter API", Some((start, end)), "HTTP 503").into();

        assert_eq!(err.exit_code(), EXIT_RUNTIME_ERROR);
        assert_eq!(err.status, Some("upstream"));
        assert!(err.to_string().contains("2025-10-26T00:00:00Z"));
    }

    #[test]
    fn auth_failures_get_their_own_status() {
        let err: CliError = SyncError::upstream("auth", None, "invalid_grant").into();
        assert_eq!(err.status, Some("auth"));
    }

    #[test]
    fn bad_input_maps_to_input_error() {
        let err: CliError = SyncError::InvalidPeriod("'PT7MIN'".into()).into();
        assert_eq!(err.exit_code(), EXIT_INPUT_ERROR);
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!(parse_output_format("JSON").unwrap(), OutputFormat::Json);
        assert!(parse_output_format("yaml").is_err());
        assert_eq!(output_format_hint("yaml"), OutputFormat::Text);
    }
}
