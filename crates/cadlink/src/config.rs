//! Layered configuration: defaults, the TOML config file, then environment.

use std::env;
use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use cadlink_protocol::{DEFAULT_BRIDGE_PORT, MAX_PAYLOAD_BYTES};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeSettings, Interpreter};
use crate::generate::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiConfig};

pub const APP_NAME: &str = "cadlink";

/// Fallback environment variable for the model API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub bridge: BridgeConfig,
    pub generator: GeneratorConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid server address {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Must be a loopback address.
    pub host: String,
    pub port: u16,
    pub poll_interval_ms: u64,
    pub max_payload_bytes: usize,
    /// Defaults to `<data_dir>/exports`.
    pub export_dir: Option<String>,
    /// Producer-side connect/read timeout.
    pub connect_timeout_secs: u64,
    /// Command line of a script interpreter for the headless host,
    /// e.g. `"freecadcmd -c"`. Scripts are piped to its stdin.
    pub interpreter: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_BRIDGE_PORT,
            poll_interval_ms: 100,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            export_dir: None,
            connect_timeout_secs: 5,
            interpreter: None,
        }
    }
}

impl BridgeConfig {
    /// Bridge address. Anything other than loopback is refused; the bridge
    /// executes arbitrary scripts.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("invalid bridge host {:?}", self.host))?;
        if !ip.is_loopback() {
            bail!("bridge host must be a loopback address, got {}", ip);
        }
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn settings(&self, data_dir: &Path) -> Result<BridgeSettings> {
        if self.poll_interval_ms == 0 {
            bail!("bridge.poll_interval_ms must be greater than zero");
        }
        if self.max_payload_bytes == 0 {
            bail!("bridge.max_payload_bytes must be greater than zero");
        }
        let export_dir = match &self.export_dir {
            Some(dir) => expand_str_path(dir)?,
            None => data_dir.join("exports"),
        };
        Ok(BridgeSettings {
            addr: self.socket_addr()?,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_payload_bytes: self.max_payload_bytes,
            export_dir,
        })
    }

    pub fn interpreter(&self) -> Result<Option<Interpreter>> {
        match self.interpreter.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(line) => Interpreter::from_command_line(line)
                .map(Some)
                .ok_or_else(|| anyhow!("invalid bridge.interpreter {:?}", line)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Falls back to `GEMINI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
        }
    }
}

impl GeneratorConfig {
    /// Client settings, or `None` when no API key is available.
    pub fn gemini(&self) -> Option<GeminiConfig> {
        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))?;
        Some(GeminiConfig {
            api_key,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        })
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: Option<String>,
    pub state_dir: Option<String>,
}

/// Resolved on-disk locations.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl AppPaths {
    pub fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self {
            config_file,
            data_dir: default_data_dir()?,
            state_dir: default_state_dir()?,
        })
    }

    pub fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
        }
        if let Some(ref state_override) = cfg.paths.state_dir {
            self.state_dir = expand_str_path(state_override)?;
        }
        Ok(self)
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config: {}, data: {}, state: {}",
            self.config_file.display(),
            self.data_dir.display(),
            self.state_dir.display()
        )
    }
}

/// Read the config file (if present) and apply `CADLINK__SECTION__KEY`
/// environment overrides on top of the defaults.
pub fn load_config(config_file: &Path) -> Result<AppConfig> {
    load_config_with_prefix(config_file, &env_prefix())
}

fn load_config_with_prefix(config_file: &Path, prefix: &str) -> Result<AppConfig> {
    let defaults = AppConfig::default();
    let built = Config::builder()
        .set_default("logging.level", defaults.logging.level)?
        .set_default("server.host", defaults.server.host)?
        .set_default("server.port", i64::from(defaults.server.port))?
        .set_default("bridge.host", defaults.bridge.host)?
        .set_default("bridge.port", i64::from(defaults.bridge.port))?
        .add_source(
            File::from(config_file)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("loading config from {}", config_file.display()))?;

    built
        .try_deserialize()
        .context("deserializing configuration")
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# generator.api_key falls back to the ");
    buffer.push_str(API_KEY_ENV);
    buffer.push_str(" environment variable.\n");
    buffer.push('\n');
    buffer
}

pub fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn default_state_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::state_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("state").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine state directory"))
}

pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.bridge.port, 6666);
        assert_eq!(config.bridge.poll_interval_ms, 100);
        assert_eq!(config.bridge.max_payload_bytes, 65536);
        assert_eq!(config.bridge.connect_timeout_secs, 5);
        assert_eq!(config.generator.model, "gemini-3-flash-preview");
        assert_eq!(env_prefix(), "CADLINK");
    }

    #[test]
    fn test_default_config_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadlink").join("config.toml");
        write_default_config(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Configuration for cadlink"));

        let config = load_config_with_prefix(&path, "CADLINK_TEST_UNUSED").unwrap();
        assert_eq!(config.bridge.port, 6666);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_file_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[bridge]\nport = 7777\npoll_interval_ms = 50\n\n[generator]\nmodel = \"other\"\n",
        )
        .unwrap();

        let config = load_config_with_prefix(&path, "CADLINK_TEST_UNUSED").unwrap();
        assert_eq!(config.bridge.port, 7777);
        assert_eq!(config.bridge.poll_interval_ms, 50);
        assert_eq!(config.bridge.max_payload_bytes, 65536);
        assert_eq!(config.generator.model, "other");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config =
            load_config_with_prefix(&dir.path().join("absent.toml"), "CADLINK_TEST_UNUSED")
                .unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_bridge_refuses_non_loopback_host() {
        let mut bridge = BridgeConfig::default();
        assert!(bridge.socket_addr().unwrap().ip().is_loopback());

        bridge.host = "0.0.0.0".to_string();
        assert!(bridge.socket_addr().is_err());

        bridge.host = "::1".to_string();
        assert_eq!(bridge.socket_addr().unwrap().port(), 6666);
    }

    #[test]
    fn test_export_dir_defaults_under_data_dir() {
        let settings = BridgeConfig::default()
            .settings(Path::new("/var/lib/cadlink"))
            .unwrap();
        assert_eq!(settings.export_dir, PathBuf::from("/var/lib/cadlink/exports"));
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let bridge = BridgeConfig {
            poll_interval_ms: 0,
            ..BridgeConfig::default()
        };
        assert!(bridge.settings(Path::new("/tmp")).is_err());
    }

    #[test]
    fn test_interpreter_parsing() {
        let mut bridge = BridgeConfig::default();
        assert!(bridge.interpreter().unwrap().is_none());

        bridge.interpreter = Some("freecadcmd -c".to_string());
        assert!(bridge.interpreter().unwrap().is_some());
    }

    #[test]
    fn test_explicit_api_key_enables_generator() {
        let generator = GeneratorConfig {
            api_key: Some("secret".to_string()),
            ..GeneratorConfig::default()
        };
        let gemini = generator.gemini().unwrap();
        assert_eq!(gemini.api_key, "secret");
        assert_eq!(gemini.model, DEFAULT_MODEL);
    }
}
