//! Event channel factories and handles.

use super::types::{Delivery, GerritEvent};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for GerritEvent events.
pub type GerritEventSender = mpsc::Sender<GerritEvent>;
/// Receiver handle for GerritEvent events.
pub type GerritEventReceiver = mpsc::Receiver<GerritEvent>;

/// Sender handle for Delivery events.
pub type DeliverySender = mpsc::Sender<Delivery>;
/// Receiver handle for Delivery events.
pub type DeliveryReceiver = mpsc::Receiver<Delivery>;

/// Create a new GerritEvent channel.
///
/// Only one event source is active at a time, but the sender can be cloned.
pub fn gerrit_event_channel() -> (GerritEventSender, GerritEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new Delivery channel.
///
/// The receiving end must be owned by a single `ChannelSender` so that
/// messages leave in the order the router produced them.
pub fn delivery_channel() -> (DeliverySender, DeliveryReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
