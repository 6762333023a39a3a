//! TOML file configuration structures.
//!
//! These structs directly map to the `gerritbot.toml` file format.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub ircbot: IrcBotConfig,
    pub gerrit: Option<GerritConfig>,
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

/// The `[ircbot]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct IrcBotConfig {
    pub nick: String,
    /// NickServ password.
    pub pass: Option<String>,
    pub server: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    #[serde(default)]
    pub force_ssl: bool,
    pub server_password: Option<String>,
    /// Path of the YAML channel config. `~` is expanded.
    pub channel_config: Option<String>,
    #[serde(default = "default_channel_max")]
    pub channel_max: usize,
    #[serde(default = "default_delay_ms")]
    pub join_delay_ms: u64,
    #[serde(default = "default_delay_ms")]
    pub send_delay_ms: u64,
    /// Treat channel config entries starting with `^` as regular expressions.
    #[serde(default)]
    pub pattern_matching: bool,
    #[serde(default)]
    pub use_mqtt: bool,
}

/// The `[gerrit]` section, used for `ssh ... gerrit stream-events`.
#[derive(Debug, Clone, Deserialize)]
pub struct GerritConfig {
    pub user: String,
    pub key: Option<PathBuf>,
    pub host: String,
    #[serde(default = "default_gerrit_port")]
    pub port: u16,
}

/// The `[mqtt]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    #[serde(default)]
    pub websocket: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

fn default_irc_port() -> u16 {
    6667
}

fn default_channel_max() -> usize {
    gerritbot_core::membership::CHANNEL_MAX
}

fn default_delay_ms() -> u64 {
    500
}

fn default_gerrit_port() -> u16 {
    gerritbot_core::processors::ssh_stream::DEFAULT_SSH_PORT
}

fn default_mqtt_port() -> u16 {
    gerritbot_core::processors::mqtt::DEFAULT_MQTT_PORT
}

fn default_base_topic() -> String {
    gerritbot_core::processors::mqtt::DEFAULT_BASE_TOPIC.to_string()
}
