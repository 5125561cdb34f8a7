use backlog_core::DEFAULT_SAMPLE_SIZE;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DB_PATH: &str = ".backlog/backlog.sqlite3";
const DEFAULT_LOG_DIR: &str = ".backlog/logs";
const DEFAULT_API_BASE: &str = "https://slack.com/api";
const DEFAULT_REFRESH_MINUTES: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Parser, Debug, Default)]
#[command(name = "backlog-hub")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub addr: String,
    #[arg(long, default_value = "")]
    pub db_path: String,
    #[arg(long)]
    pub refresh_minutes: Option<u64>,
    #[arg(long)]
    pub sample_size: Option<usize>,
    #[arg(long, default_value = "")]
    pub channel: String,
    #[arg(long, default_value = "")]
    pub api_base: String,
    #[arg(long, default_value = "")]
    pub saved_api_base: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Clone)]
pub struct Config {
    pub addr: String,
    pub db_path: PathBuf,
    /// Zero disables the timer; refreshes then only happen at startup and on demand.
    pub refresh_interval: Duration,
    pub sample_size: usize,
    pub channel_id: String,
    pub api_base: Url,
    pub saved_api_base: Url,
    pub bot_token: String,
    /// Socket Mode token. Without it no live events are received.
    pub app_token: Option<String>,
    pub client_token: String,
    pub cookie: String,
    pub log_dir: String,
    pub debug: bool,
}

pub fn load_config() -> Result<Config, ConfigError> {
    Config::resolve(Args::parse(), |key| std::env::var(key).ok())
}

impl Config {
    pub fn resolve<F>(args: Args, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let addr = resolve_addr(&args.addr, &lookup);
        let db_path = PathBuf::from(resolve_str(&args.db_path, "BACKLOG_DB_PATH", DEFAULT_DB_PATH, &lookup));
        let refresh_minutes = match args.refresh_minutes {
            Some(value) => value,
            None => parse_env(&lookup, "BACKLOG_REFRESH_MINUTES")?.unwrap_or(DEFAULT_REFRESH_MINUTES),
        };
        let sample_size = match args.sample_size {
            Some(value) => value,
            None => parse_env(&lookup, "BACKLOG_SAMPLE_SIZE")?.unwrap_or(DEFAULT_SAMPLE_SIZE),
        };
        if sample_size == 0 {
            return Err(ConfigError::Invalid {
                key: "BACKLOG_SAMPLE_SIZE",
                message: "must be at least 1".to_string(),
            });
        }

        let channel_id = resolve_str(&args.channel, "SLACK_CHANNEL_ID", "", &lookup);
        if channel_id.is_empty() {
            return Err(ConfigError::Missing("SLACK_CHANNEL_ID"));
        }

        let api_base = parse_base(
            "SLACK_API_BASE",
            &resolve_str(&args.api_base, "SLACK_API_BASE", DEFAULT_API_BASE, &lookup),
        )?;
        let saved_api_base = match resolve_str(&args.saved_api_base, "SLACK_SAVED_API_BASE", "", &lookup) {
            value if value.is_empty() => api_base.clone(),
            value => parse_base("SLACK_SAVED_API_BASE", &value)?,
        };

        let debug = args.debug || lookup("BACKLOG_DEBUG").is_some_and(|value| env_flag(&value));

        Ok(Self {
            addr,
            db_path,
            refresh_interval: Duration::from_secs(refresh_minutes.saturating_mul(60)),
            sample_size,
            channel_id,
            api_base,
            saved_api_base,
            bot_token: required(&lookup, "SLACK_BOT_TOKEN")?,
            app_token: lookup("SLACK_APP_TOKEN"),
            client_token: required(&lookup, "SLACK_CLIENT_TOKEN")?,
            cookie: required(&lookup, "SLACK_COOKIE")?,
            log_dir: resolve_str(&args.log_dir, "BACKLOG_LOG_DIR", DEFAULT_LOG_DIR, &lookup),
            debug,
        })
    }
}

fn resolve_str<F>(flag: &str, key: &str, default: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn resolve_addr<F>(flag: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    if let Some(value) = lookup("BACKLOG_ADDR") {
        return value;
    }
    if let Some(port) = lookup("PORT") {
        return format!("0.0.0.0:{}", port.trim());
    }
    DEFAULT_ADDR.to_string()
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or(ConfigError::Missing(key))
}

fn parse_env<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
                key,
                message: err.to_string(),
            })
        })
        .transpose()
}

/// Parses an API base URL, forcing a trailing slash so `Url::join` appends
/// method names instead of replacing the last path segment.
fn parse_base(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    let mut normalized = value.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|err| ConfigError::Invalid {
        key,
        message: err.to_string(),
    })
}

fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
