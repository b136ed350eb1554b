use anyhow::anyhow;
use clap::{Parser, Subcommand};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use reqwest_middleware::reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::{self, File},
    io::{Read, Write},
    path::PathBuf,
    time::Duration,
};
use time::{format_description::well_known::Iso8601, OffsetDateTime};

use crate::infra::client::Error;

pub const DEFAULT_ENDPOINT: &str = "https://api.leaderboards.dev/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to Settings.toml file holding configuration options
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level to run with the service (default: info)
    #[arg(short, long)]
    pub level: Option<String>,

    /// Credential for the leaderboard service, overrides the settings file
    #[arg(long, env = "LEADERBOARD_CREDENTIAL", hide_env_values = true)]
    pub credential: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Submit a score for a player
    Submit {
        #[arg(long)]
        leaderboard: String,
        #[arg(long)]
        player: String,
        #[arg(long, allow_hyphen_values = true)]
        score: i64,
        /// Opaque payload stored with the score
        #[arg(long)]
        metadata: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Fetch one page of a leaderboard
    Top {
        #[arg(long)]
        leaderboard: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        offset: Option<u64>,
        #[arg(long)]
        around_rank: Option<u64>,
        /// "", "current", "previous" or an ISO-8601 timestamp
        #[arg(long, default_value = "")]
        period: String,
        #[arg(long)]
        view: Option<String>,
    },
    /// Look up a single player's rank
    Rank {
        #[arg(long)]
        leaderboard: String,
        #[arg(long)]
        player: String,
        #[arg(long, default_value = "")]
        period: String,
        #[arg(long)]
        view: Option<String>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    pub config: Option<String>,
    pub level: Option<String>,
    pub client_settings: ClientSettings,
}

impl ConfigurableSettings for Settings {
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings) {
        if let Some(level) = &cli_settings.level {
            self.level = Some(level.clone());
        }
        if let Some(credential) = &cli_settings.credential {
            self.client_settings.credential = credential.clone();
        }
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("./config/local.toml")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Base url of the leaderboard service
    pub endpoint: String,
    /// API credential; the facade stays disabled while this is empty
    pub credential: String,
    /// Per-operation timeout in seconds
    pub timeout_secs: u64,
    /// Serve requests from an in-memory leaderboard instead of the network
    /// (only honored by debug builds or with the mock-service feature)
    #[serde(default)]
    pub mock_enabled: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            endpoint: String::from(DEFAULT_ENDPOINT),
            credential: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            mock_enabled: false,
        }
    }
}

/// Connection parameters handed to the facade
#[derive(Debug)]
pub struct ClientConfig {
    pub endpoint: Url,
    pub credential: SecretString,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        endpoint: &str,
        credential: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {:?}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!("{} cannot be a base url", endpoint)));
        }
        if timeout.is_zero() {
            return Err(Error::Config(String::from("timeout must be positive")));
        }
        Ok(Self {
            endpoint,
            credential: SecretString::from(credential.into()),
            timeout,
        })
    }

    pub fn has_credential(&self) -> bool {
        !self.credential.expose_secret().trim().is_empty()
    }
}

impl Clone for ClientConfig {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            credential: SecretString::from(self.credential.expose_secret().to_owned()),
            timeout: self.timeout,
        }
    }
}

impl TryFrom<&ClientSettings> for ClientConfig {
    type Error = Error;

    fn try_from(settings: &ClientSettings) -> Result<Self, Self::Error> {
        ClientConfig::new(
            &settings.endpoint,
            settings.credential.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }
}

pub struct CliSettings {
    pub config: Option<String>,
    pub level: Option<String>,
    pub credential: Option<String>,
}

impl From<&Cli> for CliSettings {
    fn from(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            level: cli.level.clone(),
            credential: cli.credential.clone(),
        }
    }
}

pub trait ConfigurableSettings: Serialize + for<'de> Deserialize<'de> + Default {
    /// Apply CLI settings after loading from file
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings);

    /// Config file read when no path is given on the command line
    fn default_config_path() -> PathBuf;

    /// Get the config directory path
    fn config_directory() -> PathBuf {
        PathBuf::from("./config")
    }
}

pub fn get_settings_with_cli<T: ConfigurableSettings>(
    cli_settings: CliSettings,
) -> Result<T, anyhow::Error> {
    let mut settings = if let Some(config_path) = cli_settings.config.clone() {
        let path = PathBuf::from(config_path);

        let absolute_path = if path.is_absolute() {
            path
        } else {
            env::current_dir()?.join(path)
        };

        match File::open(absolute_path) {
            Ok(mut file) => {
                let mut content = String::new();
                file.read_to_string(&mut content)
                    .map_err(|e| anyhow!("Failed to read config: {}", e))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow!("Failed to map config to settings: {}", e))?
            }
            Err(err) => return Err(anyhow!("Failed to find file: {}", err)),
        }
    } else {
        let default_path = T::default_config_path();
        match File::open(&default_path) {
            Ok(mut file) => {
                let mut content = String::new();
                file.read_to_string(&mut content)
                    .map_err(|e| anyhow!("Failed to read default config: {}", e))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow!("Failed to parse default config: {}", e))?
            }
            Err(_) => {
                let default_settings = T::default();

                fs::create_dir_all(T::config_directory())
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;

                let toml_content = toml::to_string(&default_settings)
                    .map_err(|e| anyhow!("Failed to serialize default settings: {}", e))?;

                let mut file = fs::File::create(&default_path)
                    .map_err(|e| anyhow!("Failed to create config file: {}", e))?;
                file.write_all(toml_content.as_bytes())
                    .map_err(|e| anyhow!("Failed to write default config: {}", e))?;

                default_settings
            }
        }
    };

    settings.apply_cli_overrides(&cli_settings);

    Ok(settings)
}

pub fn setup_logger(
    level: Option<String>,
    filter_targets: Vec<String>,
) -> Result<(), fern::InitError> {
    let rust_log = get_log_level(level);
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}: {}",
                OffsetDateTime::now_utc()
                    .format(&Iso8601::DEFAULT)
                    .unwrap_or_default(),
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .level(rust_log)
        .filter(move |metadata| {
            !filter_targets
                .iter()
                .any(|filter| metadata.target().starts_with(filter))
        })
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

pub fn get_log_level(level: Option<String>) -> LevelFilter {
    let level = level.unwrap_or_else(|| env::var("RUST_LOG").unwrap_or_default());
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}
