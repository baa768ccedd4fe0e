//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::{
    application::ring::DEFAULT_FEED_CAPACITY,
    cache::{CacheVersion, PolicyPreset},
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "wittr";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_SERVER_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_TICK_MIN_SECS: u64 = 5;
const DEFAULT_TICK_MAX_SECS: u64 = 15;
const DEFAULT_PUBLIC_DIR: &str = "public";
const DEFAULT_AVATARS_DIR: &str = "public/avatars";
const DEFAULT_SERVER_FALLBACK_ICON: &str = "public/imgs/icon.png";
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CLIENT_LISTEN: &str = "127.0.0.1:3000";
const DEFAULT_ORIGIN: &str = "http://127.0.0.1:3001";
const DEFAULT_DATABASE_URL: &str = "sqlite://wittr.db";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;
const DEFAULT_GC_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_STATIC_VERSION: u32 = 1;
const DEFAULT_CACHE_FALLBACK_ICON: &str = "/imgs/icon.png";

/// Command-line arguments for the wittr binary.
#[derive(Debug, Parser)]
#[command(name = "wittr", version, about = "Live feed server and offline-first sync client")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "WITTR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the feed server.
    Serve(Box<ServeArgs>),
    /// Run the sync client and its local cache proxy.
    Client(Box<ClientArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the number of posts kept in the feed ring.
    #[arg(long = "feed-capacity", value_name = "COUNT")]
    pub feed_capacity: Option<usize>,

    /// Override the minimum delay between posts.
    #[arg(long = "feed-tick-min-seconds", value_name = "SECONDS")]
    pub feed_tick_min_seconds: Option<u64>,

    /// Override the maximum delay between posts.
    #[arg(long = "feed-tick-max-seconds", value_name = "SECONDS")]
    pub feed_tick_max_seconds: Option<u64>,

    /// Override the directory served under /avatars.
    #[arg(long = "feed-avatars-dir", value_name = "PATH")]
    pub feed_avatars_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ClientArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the feed server origin.
    #[arg(long = "origin", value_name = "URL")]
    pub origin: Option<String>,

    /// Override the local proxy listen address.
    #[arg(long = "listen", value_name = "ADDR")]
    pub listen: Option<String>,

    /// Override the local database URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the static cache version.
    #[arg(long = "cache-static-version", value_name = "VERSION")]
    pub cache_static_version: Option<u32>,

    /// Override the content tier policy preset (standard|compact).
    #[arg(long = "cache-preset", value_name = "PRESET")]
    pub cache_preset: Option<String>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub feed: FeedSettings,
    pub client: ClientSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub capacity: NonZeroUsize,
    pub tick_min: Duration,
    pub tick_max: Duration,
    pub public_dir: PathBuf,
    pub avatars_dir: PathBuf,
    pub fallback_icon: PathBuf,
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub origin: Url,
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub database_max_connections: NonZeroU32,
    pub reconnect_delay: Duration,
    pub gc_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub static_version: CacheVersion,
    pub preset: PolicyPreset,
    pub quota_bytes: Option<u64>,
    pub precache: Vec<String>,
    pub build_manifest: Option<PathBuf>,
    pub fonts: Vec<String>,
    pub fallback_icon: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("WITTR").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(args),
        Some(Command::Client(args)) => raw.apply_client_overrides(args),
        None => raw.apply_serve_overrides(&ServeArgs::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    feed: RawFeedSettings,
    client: RawClientSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    capacity: Option<usize>,
    tick_min_seconds: Option<u64>,
    tick_max_seconds: Option<u64>,
    public_dir: Option<PathBuf>,
    avatars_dir: Option<PathBuf>,
    fallback_icon: Option<PathBuf>,
    probe_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClientSettings {
    origin: Option<String>,
    listen: Option<String>,
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    reconnect_delay_seconds: Option<u64>,
    gc_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    static_version: Option<u32>,
    preset: Option<String>,
    quota_bytes: Option<u64>,
    precache: Option<Vec<String>>,
    build_manifest: Option<PathBuf>,
    fonts: Option<Vec<String>>,
    fallback_icon: Option<String>,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_serve_overrides(&mut self, args: &ServeArgs) {
        self.apply_logging_overrides(&args.logging);
        if let Some(host) = args.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = args.server_port {
            self.server.port = Some(port);
        }
        if let Some(capacity) = args.feed_capacity {
            self.feed.capacity = Some(capacity);
        }
        if let Some(seconds) = args.feed_tick_min_seconds {
            self.feed.tick_min_seconds = Some(seconds);
        }
        if let Some(seconds) = args.feed_tick_max_seconds {
            self.feed.tick_max_seconds = Some(seconds);
        }
        if let Some(dir) = args.feed_avatars_dir.as_ref() {
            self.feed.avatars_dir = Some(dir.clone());
        }
    }

    fn apply_client_overrides(&mut self, args: &ClientArgs) {
        self.apply_logging_overrides(&args.logging);
        if let Some(origin) = args.origin.as_ref() {
            self.client.origin = Some(origin.clone());
        }
        if let Some(listen) = args.listen.as_ref() {
            self.client.listen = Some(listen.clone());
        }
        if let Some(url) = args.database_url.as_ref() {
            self.client.database_url = Some(url.clone());
        }
        if let Some(version) = args.cache_static_version {
            self.cache.static_version = Some(version);
        }
        if let Some(preset) = args.cache_preset.as_ref() {
            self.cache.preset = Some(preset.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            feed,
            client,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            feed: build_feed_settings(feed)?,
            client: build_client_settings(client)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_SERVER_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_shutdown = positive_seconds(
        server
            .graceful_shutdown_seconds
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_feed_settings(feed: RawFeedSettings) -> Result<FeedSettings, LoadError> {
    let capacity = NonZeroUsize::new(feed.capacity.unwrap_or(DEFAULT_FEED_CAPACITY))
        .ok_or_else(|| LoadError::invalid("feed.capacity", "must be greater than zero"))?;

    let tick_min = positive_seconds(
        feed.tick_min_seconds.unwrap_or(DEFAULT_TICK_MIN_SECS),
        "feed.tick_min_seconds",
    )?;
    let tick_max = positive_seconds(
        feed.tick_max_seconds.unwrap_or(DEFAULT_TICK_MAX_SECS),
        "feed.tick_max_seconds",
    )?;
    if tick_min > tick_max {
        return Err(LoadError::invalid(
            "feed.tick_min_seconds",
            "must not exceed feed.tick_max_seconds",
        ));
    }

    let probe_timeout = positive_seconds(
        feed.probe_timeout_seconds
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS),
        "feed.probe_timeout_seconds",
    )?;

    Ok(FeedSettings {
        capacity,
        tick_min,
        tick_max,
        avatars_dir: non_empty_path(
            feed.avatars_dir,
            DEFAULT_AVATARS_DIR,
            "feed.avatars_dir",
        )?,
        fallback_icon: non_empty_path(
            feed.fallback_icon,
            DEFAULT_SERVER_FALLBACK_ICON,
            "feed.fallback_icon",
        )?,
        public_dir: non_empty_path(feed.public_dir, DEFAULT_PUBLIC_DIR, "feed.public_dir")?,
        probe_timeout,
    })
}

fn build_client_settings(client: RawClientSettings) -> Result<ClientSettings, LoadError> {
    let origin_raw = client.origin.unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
    let origin = Url::parse(origin_raw.trim())
        .map_err(|err| LoadError::invalid("client.origin", format!("invalid URL: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "client.origin",
            "scheme must be http or https",
        ));
    }

    let listen_raw = client
        .listen
        .unwrap_or_else(|| DEFAULT_CLIENT_LISTEN.to_string());
    let listen_addr: SocketAddr = listen_raw.trim().parse().map_err(|err| {
        LoadError::invalid(
            "client.listen",
            format!("invalid address `{listen_raw}`: {err}"),
        )
    })?;

    let database_url = client
        .database_url
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

    let database_max_connections = non_zero_u32(
        client
            .database_max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "client.database_max_connections",
    )?;

    Ok(ClientSettings {
        origin,
        listen_addr,
        database_url,
        database_max_connections,
        reconnect_delay: positive_seconds(
            client
                .reconnect_delay_seconds
                .unwrap_or(DEFAULT_RECONNECT_DELAY_SECS),
            "client.reconnect_delay_seconds",
        )?,
        gc_interval: positive_seconds(
            client
                .gc_interval_seconds
                .unwrap_or(DEFAULT_GC_INTERVAL_SECS),
            "client.gc_interval_seconds",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let preset = match cache.preset {
        Some(value) => PolicyPreset::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.preset", reason))?,
        None => PolicyPreset::default(),
    };

    let quota_bytes = match cache.quota_bytes {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.quota_bytes",
                "must be greater than zero when set",
            ));
        }
        other => other,
    };

    let fallback_icon = cache
        .fallback_icon
        .unwrap_or_else(|| DEFAULT_CACHE_FALLBACK_ICON.to_string());
    if fallback_icon.trim().is_empty() {
        return Err(LoadError::invalid(
            "cache.fallback_icon",
            "path must not be empty",
        ));
    }

    Ok(CacheSettings {
        static_version: CacheVersion::new(cache.static_version.unwrap_or(DEFAULT_STATIC_VERSION)),
        preset,
        quota_bytes,
        precache: cache.precache.unwrap_or_else(|| vec!["/".to_string()]),
        build_manifest: cache.build_manifest,
        fonts: cache.fonts.unwrap_or_default(),
        fallback_icon,
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_seconds(seconds: u64, key: &'static str) -> Result<Duration, LoadError> {
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

#[cfg(test)]
mod tests;
