#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod channel_config;
pub mod chat;
pub mod events;
pub mod format;
pub mod membership;
pub mod processors;

pub use channel_config::{ChannelConfig, ChannelName, ChannelSpec, ConfigError, MatchMode};
