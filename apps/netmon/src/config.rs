use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fmt, fs};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::monitoring::types::{CheckType, Endpoint};
use crate::monitoring::validation::{ValidationError, validate_endpoint, validate_interval};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_LOG_FILE: &str = "events.log";
const DEFAULT_REQUEST_INTERVAL: f64 = 1.0;
const DEFAULT_FLUSH_INTERVAL: f64 = 60.0;
const DEFAULT_PROBE_TIMEOUT: f64 = 5.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    ReadFailed { path: PathBuf, source: std::io::Error },
    #[error("failed to write configuration file {path}: {source}")]
    WriteFailed { path: PathBuf, source: std::io::Error },
    #[error("failed to parse configuration file {path}: {message}")]
    ParseFailed { path: PathBuf, message: String },
    #[error("failed to serialize configuration: {0}")]
    SerializeFailed(String),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// On-disk file layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    /// `.toml` files are read as TOML, anything else as JSON
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            _ => FileFormat::Json,
        }
    }
}

/// One entry of the `addresses` map: a bare address or a detailed target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressEntry {
    Plain(String),
    Detailed {
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<CheckType>,
    },
}

/// Configuration as written in the file, before defaults and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(default)]
    pub addresses: Option<BTreeMap<String, AddressEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_interval: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_interval: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_method: Option<CheckType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_while_outstanding: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_countdown: Option<bool>,
}

impl Default for FileConfig {
    fn default() -> Self {
        let addresses = [("google", "www.google.com"), ("router", "192.168.0.1")]
            .into_iter()
            .map(|(name, address)| (name.to_string(), AddressEntry::Plain(address.to_string())))
            .collect();

        Self {
            addresses: Some(addresses),
            log_file_path: Some(DEFAULT_LOG_FILE.to_string()),
            request_interval: Some(DEFAULT_REQUEST_INTERVAL),
            flush_interval: Some(DEFAULT_FLUSH_INTERVAL),
            probe_timeout: None,
            probe_method: None,
            skip_while_outstanding: None,
            show_countdown: None,
        }
    }
}

impl FileConfig {
    /// Parse JSON or TOML text depending on `path`'s extension
    pub fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let parsed = match FileFormat::from_path(path) {
            FileFormat::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
            FileFormat::Toml => toml::from_str(raw).map_err(|e| e.to_string()),
        };

        parsed.map_err(|message| ConfigError::ParseFailed { path: path.to_path_buf(), message })
    }

    /// Serialize in the format matching `path`
    pub fn render(&self, path: &Path) -> Result<String, ConfigError> {
        match FileFormat::from_path(path) {
            FileFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::SerializeFailed(e.to_string())),
            FileFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))
            }
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.render(path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, contents)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply defaults and validate every field
    pub fn validate(self) -> Result<Config, ConfigError> {
        let addresses = self.addresses.ok_or(ValidationError::MissingAddresses)?;

        let request_interval = validate_interval(
            "requestInterval",
            self.request_interval.unwrap_or(DEFAULT_REQUEST_INTERVAL),
        )?;
        let flush_interval =
            validate_interval("flushInterval", self.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL))?;
        let probe_timeout =
            validate_interval("probeTimeout", self.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT))?;
        let probe_method = self.probe_method.unwrap_or_default();

        let endpoints = addresses
            .into_iter()
            .map(|(name, entry)| {
                let endpoint = match entry {
                    AddressEntry::Plain(address) => Endpoint::new(name, address).with_check_type(probe_method),
                    AddressEntry::Detailed { address, port, method } => Endpoint {
                        name,
                        address,
                        port,
                        check_type: method.unwrap_or(probe_method),
                    },
                };
                validate_endpoint(&endpoint)?;
                Ok(endpoint)
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        if endpoints.is_empty() {
            warn!("No addresses configured; the monitor will only write empty summaries");
        }

        Ok(Config {
            endpoints,
            log_file_path: PathBuf::from(self.log_file_path.unwrap_or_else(|| DEFAULT_LOG_FILE.to_string())),
            request_interval,
            flush_interval,
            probe_timeout,
            probe_method,
            skip_while_outstanding: self.skip_while_outstanding.unwrap_or(false),
            show_countdown: self.show_countdown.unwrap_or(false),
        })
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub endpoints: Vec<Endpoint>,
    pub log_file_path: PathBuf,
    pub request_interval: Duration,
    pub flush_interval: Duration,
    pub probe_timeout: Duration,
    pub probe_method: CheckType,
    pub skip_while_outstanding: bool,
    pub show_countdown: bool,
}

impl Config {
    /// Load and validate the configuration at `path`.
    ///
    /// A default configuration is written there first if the file does not
    /// exist yet.
    ///
    /// ```no_run
    /// let cfg = netmon::config::Config::load("config.json")?;
    /// println!("{}", cfg);
    /// # Ok::<(), netmon::config::ConfigError>(())
    /// ```
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Configuration file not found. Creating a default {}...", path.display());
            FileConfig::default().write_config(path)?;
        }

        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFailed { path: path.to_path_buf(), source })?;

        FileConfig::parse(&raw, path)?.validate()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Network monitor configuration:")?;
        write_title_1(f, "Addresses")?;
        for endpoint in &self.endpoints {
            let target = match endpoint.port {
                Some(port) => format!("{}:{} ({})", endpoint.address, port, endpoint.check_type),
                None => format!("{} ({})", endpoint.address, endpoint.check_type),
            };
            write_2(f, &endpoint.name, &target)?;
        }
        write_title_1(f, "Schedule")?;
        write_1(f, "Request interval", &format_args!("{:?}", self.request_interval))?;
        write_1(f, "Flush interval", &format_args!("{:?}", self.flush_interval))?;
        write_1(f, "Probe timeout", &format_args!("{:?}", self.probe_timeout))?;
        write_1(f, "Skip while outstanding", &self.skip_while_outstanding)?;
        write_title_1(f, "Output")?;
        write_1(f, "Log file", &self.log_file_path.display())?;
        write_1(f, "Countdown", &self.show_countdown)?;

        Ok(())
    }
}
