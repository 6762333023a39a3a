//! Outbound chat seam.
//!
//! The relay only needs four operations from a chat connection. The IRC
//! implementation lives in the server crate; tests use an in-memory recorder.

use crate::channel_config::ChannelName;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while talking to the chat server.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The connection is gone; a reconnect is required.
    #[error("chat connection lost")]
    Disconnected,

    /// Socket-level failure.
    #[error("chat I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server refused the connection or registration.
    #[error("chat server rejected the connection: {0}")]
    Rejected(String),

    /// The server did not answer in time.
    #[error("timed out waiting for the chat server")]
    Timeout,
}

#[async_trait]
pub trait ChatClient: Send {
    async fn join(&mut self, channel: &ChannelName) -> Result<(), DeliveryError>;

    async fn part(&mut self, channel: &ChannelName) -> Result<(), DeliveryError>;

    /// Send one line of text. Fire-and-forget beyond transport errors.
    async fn send(&mut self, channel: &ChannelName, text: &str) -> Result<(), DeliveryError>;

    /// Replace the connection. The server forgets all joins when this happens.
    async fn reconnect(&mut self) -> Result<(), DeliveryError>;
}
