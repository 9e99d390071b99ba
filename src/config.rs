use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr};

/// Where deduplicated blobs live, and therefore how far dedup and the
/// janitor's reference check reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DedupScope {
    /// Each box shards blobs beneath its own storage root.
    Box,
    /// All boxes share one blob pool beneath the storage directory.
    Global,
}

impl FromStr for DedupScope {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "box" => Ok(Self::Box),
            "global" => Ok(Self::Global),
            other => anyhow::bail!("unknown dedup scope `{}` (expected `box` or `global`)", other),
        }
    }
}

impl fmt::Display for DedupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Box => write!(f, "box"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Shape of each emitted log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable `fmt` output.
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format `{}` (expected `text` or `json`)", other),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub clean_schedule: String,
    pub dedup_scope: DedupScope,
    pub max_upload_mb: usize,
    pub janitor_enabled: bool,
    /// Filter directives, e.g. `info` or `boxed=debug,sqlx=warn`. `RUST_LOG` wins when set.
    pub log_level: String,
    pub log_format: LogFormat,
    /// Directory for daily rolling log files; stdout when unset.
    pub log_path: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Content-addressable box/item file store")]
pub struct Args {
    /// Host to bind to (overrides BOXED_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BOXED_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding box storage roots (overrides BOXED_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BOXED_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Cron expression for the janitor's cleanup cycle (overrides BOXED_CLEAN_SCHEDULE)
    #[arg(long)]
    pub clean_schedule: Option<String>,

    /// Blob dedup scope (overrides BOXED_DEDUP_SCOPE)
    #[arg(long, value_enum)]
    pub dedup_scope: Option<DedupScope>,

    /// Maximum upload size in MiB (overrides BOXED_MAX_UPLOAD_MB)
    #[arg(long)]
    pub max_upload_mb: Option<usize>,

    /// Log filter directives (overrides BOXED_LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log line format (overrides BOXED_LOG_FORMAT)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Write logs to daily files in this directory (overrides BOXED_LOG_PATH)
    #[arg(long)]
    pub log_path: Option<String>,

    /// Do not start the scheduled janitor
    #[arg(long)]
    pub no_janitor: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("BOXED_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("BOXED_PORT", 3000u16)?;
        let env_storage = env::var("BOXED_STORAGE_DIR").unwrap_or_else(|_| "./data/boxes".into());
        let env_db = env::var("BOXED_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/boxed.db".into());
        let env_schedule =
            env::var("BOXED_CLEAN_SCHEDULE").unwrap_or_else(|_| "0 */5 * * * *".into());
        let env_scope = parse_env("BOXED_DEDUP_SCOPE", DedupScope::Box)?;
        let env_upload = parse_env("BOXED_MAX_UPLOAD_MB", 1024usize)?;
        let env_janitor = parse_env("BOXED_JANITOR", true)?;
        let env_log_level = env::var("BOXED_LOG_LEVEL").unwrap_or_else(|_| "info".into());
        let env_log_format = parse_env("BOXED_LOG_FORMAT", LogFormat::Text)?;
        let env_log_path = env::var("BOXED_LOG_PATH").ok().filter(|p| !p.trim().is_empty());

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            clean_schedule: args.clean_schedule.unwrap_or(env_schedule),
            dedup_scope: args.dedup_scope.unwrap_or(env_scope),
            max_upload_mb: args.max_upload_mb.unwrap_or(env_upload),
            janitor_enabled: env_janitor && !args.no_janitor,
            log_level: args.log_level.unwrap_or(env_log_level),
            log_format: args.log_format.unwrap_or(env_log_format),
            log_path: args.log_path.or(env_log_path),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_scope_parses_case_insensitively() {
        assert_eq!("Global".parse::<DedupScope>().unwrap(), DedupScope::Global);
        assert_eq!(" box ".parse::<DedupScope>().unwrap(), DedupScope::Box);
        assert!("shared".parse::<DedupScope>().is_err());
    }

    #[test]
    fn cli_arguments_override_defaults() {
        let args = Args::parse_from([
            "boxed",
            "--port",
            "8080",
            "--dedup-scope",
            "global",
            "--clean-schedule",
            "*/10 * * * *",
            "--no-janitor",
        ]);
        let cfg = AppConfig::merge(args).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.dedup_scope, DedupScope::Global);
        assert_eq!(cfg.clean_schedule, "*/10 * * * *");
        assert!(!cfg.janitor_enabled);
        assert_eq!(cfg.addr(), format!("{}:8080", cfg.host));
    }

    #[test]
    fn log_settings_come_from_the_command_line() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());

        let args = Args::parse_from([
            "boxed",
            "--log-level",
            "boxed=debug,sqlx=warn",
            "--log-format",
            "json",
            "--log-path",
            "/var/log/boxed",
        ]);
        let cfg = AppConfig::merge(args).unwrap();
        assert_eq!(cfg.log_level, "boxed=debug,sqlx=warn");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.log_path.as_deref(), Some("/var/log/boxed"));
    }
}
