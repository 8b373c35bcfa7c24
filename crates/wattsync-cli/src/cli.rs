use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Sync metered electricity consumption into InfluxDB across DST transitions
#[derive(Parser, Debug)]
#[command(name = "wattsync")]
#[command(version, about = "Sync metered electricity consumption into InfluxDB across DST transitions")]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch readings from the metering API and write them to InfluxDB
    Sync(SyncArgs),
    /// Reconcile a captured API response offline
    Reconcile(ReconcileArgs),
    /// Explain how a date and local time are handled (DST classification)
    Explain(ExplainArgs),
    /// Compare stored readings for a civil day against the expected count
    Verify(VerifyArgs),
}

/// Metering zone and its DST rule.
#[derive(clap::Args, Debug, Clone)]
pub struct ZoneArgs {
    /// IANA timezone of the metering point
    #[arg(long, env = "WATTSYNC_TZ", default_value = "Europe/Helsinki")]
    pub tz: String,

    /// Annual DST rule: eu, us
    #[arg(long, env = "WATTSYNC_DST_RULE", default_value = "eu")]
    pub dst_rule: String,
}

#[derive(clap::Args, Clone)]
pub struct InfluxArgs {
    /// InfluxDB base URL
    #[arg(long, env = "INFLUXDB_URL", default_value = "http://localhost:8086")]
    pub influxdb_url: String,

    /// InfluxDB API token
    #[arg(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    pub influxdb_token: String,

    /// InfluxDB organization
    #[arg(long, env = "INFLUXDB_ORG", default_value = "wattivahti")]
    pub influxdb_org: String,

    /// InfluxDB bucket
    #[arg(long, env = "INFLUXDB_BUCKET", default_value = "electricity")]
    pub influxdb_bucket: String,
}

impl fmt::Debug for InfluxArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxArgs")
            .field("influxdb_url", &self.influxdb_url)
            .field("influxdb_token", &"<redacted>")
            .field("influxdb_org", &self.influxdb_org)
            .field("influxdb_bucket", &self.influxdb_bucket)
            .finish()
    }
}

/// Azure AD B2C client used to refresh the metering API token.
#[derive(clap::Args, Debug, Clone)]
pub struct AuthArgs {
    /// File holding the refresh token; rotated tokens are written back
    #[arg(long, env = "REFRESH_TOKEN_FILE", default_value = "refresh_token.txt")]
    pub refresh_token_file: PathBuf,

    #[arg(long, default_value = "pesv.onmicrosoft.com")]
    pub b2c_tenant: String,

    #[arg(long, default_value = "84ebdb93-9ea6-42c7-bd7d-302abf7556fa")]
    pub b2c_client_id: String,

    #[arg(long, default_value = "B2C_1_Tunnistus_SignInv2")]
    pub b2c_policy: String,

    #[arg(
        long,
        default_value = "https://pesv.onmicrosoft.com/salpa/customer.read openid profile offline_access"
    )]
    pub b2c_scope: String,
}

#[derive(clap::Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub zone: ZoneArgs,

    #[command(flatten)]
    pub influx: InfluxArgs,

    #[command(flatten)]
    pub auth: AuthArgs,

    /// Metering point code
    #[arg(long, env = "WATTIVAHTI_METERING_POINT")]
    pub metering_point: String,

    /// Metering API base URL
    #[arg(
        long,
        env = "WATTSYNC_API_BASE",
        default_value = "https://porienergia-prod-agent.frendsapp.com:9999/api/onlineapi/v1"
    )]
    pub api_base: String,

    /// Start (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS, local). Omit for incremental sync
    #[arg(long)]
    pub start: Option<String>,

    /// End (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS, local). Defaults to now
    #[arg(long, requires = "start")]
    pub end: Option<String>,

    /// Days to fetch when the store holds no data yet
    #[arg(long, env = "INITIAL_SYNC_DAYS", default_value_t = 7)]
    pub initial_sync_days: u32,

    /// Hours to re-fetch before the latest stored reading
    #[arg(long, env = "SYNC_BUFFER_HOURS", default_value_t = 2)]
    pub sync_buffer_hours: u32,

    /// Preferred metering period
    #[arg(long, env = "WATTSYNC_FINE_PERIOD", default_value = "PT15MIN")]
    pub fine_period: String,

    /// Period to fall back to when the preferred one returns nothing
    #[arg(long, env = "WATTSYNC_COARSE_PERIOD", default_value = "PT1H")]
    pub coarse_period: String,

    /// Output format: json, text
    #[arg(long, default_value = "text")]
    pub output_format: String,
}

#[derive(clap::Args, Debug)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub zone: ZoneArgs,

    /// Captured API response (use - for stdin)
    #[arg(long, default_value = "-")]
    pub input: String,

    /// Metering period of the captured data
    #[arg(long, default_value = "PT15MIN")]
    pub period: String,

    /// Output format: json, text
    #[arg(long, default_value = "json")]
    pub output_format: String,
}

#[derive(clap::Args, Debug)]
pub struct ExplainArgs {
    #[command(flatten)]
    pub zone: ZoneArgs,

    /// Civil date (YYYY-MM-DD)
    #[arg(long)]
    pub date: String,

    /// Local time on that date (HH:MM[:SS] or full YYYY-MM-DDTHH:MM:SS)
    #[arg(long)]
    pub local: Option<String>,

    /// Pass through a doubled hour: first, second
    #[arg(long, default_value = "first")]
    pub occurrence: String,

    /// Metering period used for the expected count
    #[arg(long, default_value = "PT15MIN")]
    pub period: String,

    /// Output format: json, text
    #[arg(long, default_value = "json")]
    pub output_format: String,
}

#[derive(clap::Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub zone: ZoneArgs,

    #[command(flatten)]
    pub influx: InfluxArgs,

    /// Metering point code
    #[arg(long, env = "WATTIVAHTI_METERING_POINT")]
    pub metering_point: String,

    /// Civil date to check (YYYY-MM-DD)
    #[arg(long)]
    pub date: String,

    /// Metering period the stored data was written at
    #[arg(long, default_value = "PT15MIN")]
    pub period: String,

    /// Output format: json, text
    #[arg(long, default_value = "text")]
    pub output_format: String,
}
