// src/config.rs

//! Manages daemon configuration: loading, environment expansion, and validation.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::env;
use std::fs;
use tracing_subscriber::filter::LevelFilter;

pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PORT: u16 = 6379;

/// The root of the YAML configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub valkey: ValkeyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            valkey: ValkeyConfig::default(),
        }
    }
}

/// The `valkey` section: endpoints and connection settings, immutable after
/// start.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValkeyConfig {
    /// Host or IP that resolves to the virtual address.
    #[serde(default)]
    pub virtual_address: String,

    /// Default TCP port for any endpoint that does not carry its own.
    /// Out-of-range values fail the YAML decode, and with it the startup.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Backend endpoints, each `host` or `host:port`. Order carries no
    /// priority meaning.
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// When true, connections use TLS with default trust.
    #[serde(default)]
    pub tls: bool,
}

impl Default for ValkeyConfig {
    fn default() -> Self {
        Self {
            virtual_address: String::new(),
            port: default_port(),
            nodes: Vec::new(),
            username: None,
            password: None,
            tls: false,
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Config {
    /// Loads the configuration from a YAML file, optionally expanding
    /// `$VAR`/`${VAR}` references against the process environment first.
    pub fn load(path: &str, expand: bool) -> Result<Self> {
        let mut contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;

        if expand {
            contents = expand_env(&contents);
        }

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML from '{path}'"))?;

        config.validate()?;
        Ok(config)
    }

    /// Ensures the configuration can actually drive the daemon.
    pub fn validate(&self) -> Result<()> {
        self.log_level_filter()?;
        self.valkey.validate()
    }

    /// Resolves the configured log level into a tracing level filter.
    pub fn log_level_filter(&self) -> Result<LevelFilter> {
        match self.log_level.to_lowercase().as_str() {
            "debug" => Ok(LevelFilter::DEBUG),
            "info" => Ok(LevelFilter::INFO),
            "warn" => Ok(LevelFilter::WARN),
            "error" => Ok(LevelFilter::ERROR),
            other => bail!("unknown log level \"{other}\""),
        }
    }
}

impl ValkeyConfig {
    /// Ensure that the given config is valid.
    pub fn validate(&self) -> Result<()> {
        if self.virtual_address.is_empty() {
            bail!("missing virtual address");
        }
        if self.nodes.is_empty() {
            bail!("need to have at least 1 node listed");
        }
        Ok(())
    }
}

/// Expands `$VAR` and `${VAR}` references using the process environment.
/// Unset variables expand to the empty string; a `$` followed by neither a
/// brace nor a name character stays literal.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        if let Some(braced) = rest.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    out.push_str(&env::var(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    out.push_str("${");
                    rest = braced;
                }
            }
        } else {
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if end == 0 || rest.as_bytes()[0].is_ascii_digit() {
                out.push('$');
            } else {
                out.push_str(&env::var(&rest[..end]).unwrap_or_default());
                rest = &rest[end..];
            }
        }
    }

    out.push_str(rest);
    out
}
