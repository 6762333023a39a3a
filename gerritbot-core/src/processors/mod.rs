//! Processors of the relay pipeline.
//!
//! - Event sources (`GerritSshSource`, `GerritMqttSource`) driven by
//!   `SourceRunner`: emit `GerritEvent`
//! - `EventRouter`: receives `GerritEvent`, emits `Delivery`
//! - `ChannelSender`: receives `Delivery`, manages channel membership and
//!   writes to the chat connection

pub mod channel_sender;
pub mod event_source;
pub mod mqtt;
pub mod router;
pub mod ssh_stream;

pub use channel_sender::{ChannelSender, SendError, SenderConfig};
pub use event_source::{EventSource, RECONNECT_BACKOFF, SourceError, SourceRunner};
pub use mqtt::{GerritMqttSource, MqttParams};
pub use router::{Deliveries, EventRouter};
pub use ssh_stream::{GerritSshSource, SshParams};

use tokio::sync::watch;

/// Resolves once shutdown is requested or the shutdown sender is gone.
pub(crate) async fn shutdown_signaled(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
