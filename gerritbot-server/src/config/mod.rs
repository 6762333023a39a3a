//! Configuration module for gerritbot.
//!
//! Loads the TOML bot configuration, applies CLI overrides, validates it and
//! reads the YAML channel configuration it points to.

pub mod file;

use crate::config::file::{FileConfig, GerritConfig, IrcBotConfig, MqttConfig};
use crate::irc::{IRC_TLS_PORT, IrcParams};
use gerritbot_core::processors::{MqttParams, SenderConfig, SshParams};
use gerritbot_core::{ChannelConfig, MatchMode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid channel config: {0}")]
    ChannelError(#[from] gerritbot_core::ConfigError),
}

/// Where Gerrit events come from.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    Ssh(SshParams),
    Mqtt(MqttParams),
}

/// Loaded configuration result containing all parts.
#[derive(Debug)]
pub struct LoadedConfig {
    pub irc: IrcParams,
    pub source: SourceConfig,
    pub sender: SenderConfig,
    pub channels: ChannelConfig,
    pub channel_config_path: PathBuf,
    pub log_filter: Option<String>,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    channel_config_override: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, channel_config_override: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            channel_config_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Validate it
    /// 3. Read and index the channel config
    /// 4. Build the per-component settings
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = read(&self.config_path)?;
        let file_config: FileConfig = toml::from_str(&config_content)?;

        self.validate(&file_config)?;

        let channel_config_path = self.channel_config_path(&file_config.ircbot)?;
        let mode = if file_config.ircbot.pattern_matching {
            MatchMode::Pattern
        } else {
            MatchMode::Literal
        };
        let channels = ChannelConfig::from_yaml_str(&read(&channel_config_path)?, mode)?;
        tracing::debug!(
            events = ?channels.event_keys().collect::<Vec<_>>(),
            projects = ?channels.project_keys().collect::<Vec<_>>(),
            branches = ?channels.branch_keys().collect::<Vec<_>>(),
            "Channel config indexed"
        );

        let source = match (file_config.ircbot.use_mqtt, file_config.mqtt, file_config.gerrit) {
            (true, Some(mqtt), _) => SourceConfig::Mqtt(mqtt_params(mqtt)),
            (false, _, Some(gerrit)) => SourceConfig::Ssh(ssh_params(gerrit)),
            // validate() rules out the remaining combinations
            (true, None, _) => return Err(missing_section("mqtt", "use_mqtt is set")),
            (false, _, None) => return Err(missing_section("gerrit", "use_mqtt is not set")),
        };

        Ok(LoadedConfig {
            irc: irc_params(&file_config.ircbot),
            source,
            sender: SenderConfig {
                channel_max: file_config.ircbot.channel_max,
                join_delay: Duration::from_millis(file_config.ircbot.join_delay_ms),
                send_delay: Duration::from_millis(file_config.ircbot.send_delay_ms),
            },
            channels,
            channel_config_path,
            log_filter: file_config.log.filter,
        })
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        if config.ircbot.use_mqtt && config.mqtt.is_none() {
            return Err(missing_section("mqtt", "use_mqtt is set"));
        }
        if !config.ircbot.use_mqtt && config.gerrit.is_none() {
            return Err(missing_section("gerrit", "use_mqtt is not set"));
        }
        if config.ircbot.channel_max == 0 {
            return Err(ConfigError::ValidationError(
                "ircbot.channel_max must be at least 1".to_string(),
            ));
        }
        if config.ircbot.nick.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "ircbot.nick must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn channel_config_path(&self, ircbot: &IrcBotConfig) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.channel_config_override {
            return Ok(path.clone());
        }
        ircbot
            .channel_config
            .as_deref()
            .map(expand_home)
            .ok_or_else(|| {
                ConfigError::ValidationError(
                    "channel config must be specified in ircbot.channel_config".to_string(),
                )
            })
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
        path: path.to_path_buf(),
        source,
    })
}

fn missing_section(section: &str, reason: &str) -> ConfigError {
    ConfigError::ValidationError(format!("[{section}] section is required when {reason}"))
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(raw: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (raw, home) {
        ("~", Some(home)) => home,
        (raw, Some(home)) if raw.starts_with("~/") => home.join(&raw[2..]),
        (raw, _) => PathBuf::from(raw),
    }
}

fn irc_params(ircbot: &IrcBotConfig) -> IrcParams {
    IrcParams {
        server: ircbot.server.clone(),
        port: ircbot.port,
        tls: ircbot.force_ssl || ircbot.port == IRC_TLS_PORT,
        nick: ircbot.nick.clone(),
        password: ircbot.pass.clone(),
        server_password: ircbot.server_password.clone(),
    }
}

fn ssh_params(gerrit: GerritConfig) -> SshParams {
    SshParams {
        port: gerrit.port,
        key: gerrit.key,
        ..SshParams::new(gerrit.host, gerrit.user)
    }
}

fn mqtt_params(mqtt: MqttConfig) -> MqttParams {
    MqttParams {
        port: mqtt.port,
        base_topic: mqtt.base_topic,
        websocket: mqtt.websocket,
        ..MqttParams::new(mqtt.host, format!("gerritbot-{}", std::process::id()))
    }
}
