//! Event system for the relay pipeline.
//!
//! # Event Flow
//!
//! 1. An event source emits `GerritEvent` -> `EventRouter`
//! 2. `EventRouter` emits one `Delivery` per (channel, message) -> `ChannelSender`
//! 3. `ChannelSender` joins the channel if needed and sends the text
//!
//! Events are consumed once and never stored.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, DeliveryReceiver, DeliverySender, GerritEventReceiver,
    GerritEventSender, delivery_channel, gerrit_event_channel,
};

pub use types::{
    Account, Approval, ApprovalOutcome, Change, Delivery, GerritEvent, PatchSet, RefUpdate,
};
