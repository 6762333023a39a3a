//! ChannelSender processor.
//!
//! The ChannelSender is the only writer of the chat connection and of the
//! channel membership. For each `Delivery` it:
//! - makes sure the target channel is joined, parting the least recently
//!   used channel when the membership cap is reached
//! - sends the line and refreshes the channel's last-used time
//! - paces joins and sends to stay under server flood limits
//!
//! A transport error drops the current message, replaces the connection and
//! forgets all memberships. Later deliveries re-join as needed.

use crate::channel_config::ChannelName;
use crate::chat::{ChatClient, DeliveryError};
use crate::events::{Delivery, DeliveryReceiver};
use crate::membership::{CHANNEL_MAX, ChannelMembership, JoinOutcome, MembershipError};
use crate::processors::shutdown_signaled;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
    /// Maximum number of channels joined at once.
    pub channel_max: usize,
    /// Pause after each JOIN.
    pub join_delay: Duration,
    /// Pause after each message.
    pub send_delay: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            channel_max: CHANNEL_MAX,
            join_delay: Duration::from_millis(500),
            send_delay: Duration::from_millis(500),
        }
    }
}

pub struct ChannelSender<C> {
    chat: C,
    membership: ChannelMembership,
    config: SenderConfig,
}

impl<C: ChatClient> ChannelSender<C> {
    pub fn new(chat: C, channels: BTreeSet<ChannelName>, config: SenderConfig) -> Self {
        Self {
            chat,
            membership: ChannelMembership::new(channels, config.channel_max),
            config,
        }
    }

    /// Run the ChannelSender until shutdown is signaled or the delivery
    /// channel closes.
    pub async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut delivery_rx: DeliveryReceiver,
    ) {
        info!(
            channel_max = self.membership.capacity(),
            "ChannelSender started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_signaled(&mut shutdown_rx) => {
                    info!("ChannelSender received shutdown signal");
                    break;
                }

                delivery = delivery_rx.recv() => {
                    let Some(delivery) = delivery else {
                        info!("Delivery channel closed");
                        break;
                    };
                    if let Err(e) = self.deliver(&delivery).await {
                        self.handle_error(&delivery, e).await;
                    }
                }
            }
        }

        info!("ChannelSender shutdown complete");
    }

    /// Join if needed, then send one message.
    pub async fn deliver(&mut self, delivery: &Delivery) -> Result<(), SendError> {
        let channel = &delivery.channel;

        if let JoinOutcome::Joined { evicted } = self.membership.ensure_joined(channel)? {
            if let Some(evicted) = evicted {
                debug!(%evicted, "Parting least recently used channel");
                self.chat.part(&evicted).await?;
            }
            info!(%channel, "Joining channel");
            self.chat.join(channel).await?;
            tokio::time::sleep(self.config.join_delay).await;
        }

        debug!(%channel, text = %delivery.text, "Sending message");
        self.chat.send(channel, &delivery.text).await?;
        self.membership.record_send(channel);
        tokio::time::sleep(self.config.send_delay).await;
        Ok(())
    }

    async fn handle_error(&mut self, delivery: &Delivery, e: SendError) {
        match e {
            SendError::Membership(e) => {
                warn!(error = %e, "Dropping message for unmanaged channel");
            }
            SendError::Delivery(e) => {
                error!(
                    channel = %delivery.channel,
                    error = %e,
                    "Failed to deliver message, reconnecting"
                );
                self.membership.clear();
                if let Err(e) = self.chat.reconnect().await {
                    error!(error = %e, "Reconnect failed");
                }
            }
        }
    }

    pub fn membership(&self) -> &ChannelMembership {
        &self.membership
    }

    pub fn into_chat(self) -> C {
        self.chat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::delivery_channel;
    use async_trait::async_trait;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Join(String),
        Part(String),
        Send(String, String),
        Reconnect,
    }

    #[derive(Default)]
    struct RecordingChat {
        ops: Vec<Op>,
        /// Number of upcoming sends that fail with `Disconnected`.
        failing_sends: usize,
    }

    #[async_trait]
    impl ChatClient for RecordingChat {
        async fn join(&mut self, channel: &ChannelName) -> Result<(), DeliveryError> {
            self.ops.push(Op::Join(channel.to_string()));
            Ok(())
        }

        async fn part(&mut self, channel: &ChannelName) -> Result<(), DeliveryError> {
            self.ops.push(Op::Part(channel.to_string()));
            Ok(())
        }

        async fn send(&mut self, channel: &ChannelName, text: &str) -> Result<(), DeliveryError> {
            if self.failing_sends > 0 {
                self.failing_sends -= 1;
                return Err(DeliveryError::Disconnected);
            }
            self.ops.push(Op::Send(channel.to_string(), text.to_string()));
            Ok(())
        }

        async fn reconnect(&mut self) -> Result<(), DeliveryError> {
            self.ops.push(Op::Reconnect);
            Ok(())
        }
    }

    fn no_delay(channel_max: usize) -> SenderConfig {
        SenderConfig {
            channel_max,
            join_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
        }
    }

    fn channels(raw: &[&str]) -> BTreeSet<ChannelName> {
        raw.iter().map(|n| ChannelName::new(n)).collect()
    }

    fn delivery(channel: &str, text: &str) -> Delivery {
        Delivery {
            channel: ChannelName::new(channel),
            text: text.to_string(),
        }
    }

    fn join(c: &str) -> Op {
        Op::Join(c.to_string())
    }

    fn part(c: &str) -> Op {
        Op::Part(c.to_string())
    }

    fn send(c: &str, t: &str) -> Op {
        Op::Send(c.to_string(), t.to_string())
    }

    #[tokio::test]
    async fn test_cap_parts_least_recently_used() {
        let mut sender = ChannelSender::new(
            RecordingChat::default(),
            channels(&["a", "b", "c"]),
            no_delay(2),
        );

        for (channel, text) in [("a", "one"), ("b", "two"), ("c", "three")] {
            sender.deliver(&delivery(channel, text)).await.unwrap();
        }

        assert!(!sender.membership().is_joined("#a"));
        assert_eq!(sender.membership().len(), 2);
        assert_eq!(
            sender.into_chat().ops,
            vec![
                join("#a"),
                send("#a", "one"),
                join("#b"),
                send("#b", "two"),
                part("#a"),
                join("#c"),
                send("#c", "three"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_and_send_are_paced() {
        let mut sender = ChannelSender::new(
            RecordingChat::default(),
            channels(&["a"]),
            SenderConfig::default(),
        );

        // first message: join delay plus send delay
        let start = tokio::time::Instant::now();
        sender.deliver(&delivery("a", "one")).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1000));

        // already joined: send delay only
        let start = tokio::time::Instant::now();
        sender.deliver(&delivery("a", "two")).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_joined_channel_is_not_joined_again() {
        let mut sender =
            ChannelSender::new(RecordingChat::default(), channels(&["a"]), no_delay(2));

        sender.deliver(&delivery("a", "one")).await.unwrap();
        sender.deliver(&delivery("a", "two")).await.unwrap();

        assert_eq!(
            sender.into_chat().ops,
            vec![join("#a"), send("#a", "one"), send("#a", "two")]
        );
    }

    #[tokio::test]
    async fn test_unknown_channel_is_rejected() {
        let mut sender =
            ChannelSender::new(RecordingChat::default(), channels(&["a"]), no_delay(2));

        let result = sender.deliver(&delivery("stray", "hello")).await;
        assert!(matches!(result, Err(SendError::Membership(_))));
        assert!(sender.into_chat().ops.is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_reconnects_and_rejoins() {
        let chat = RecordingChat {
            failing_sends: 1,
            ..Default::default()
        };
        let mut sender = ChannelSender::new(chat, channels(&["a"]), no_delay(2));

        for d in [delivery("a", "lost"), delivery("a", "kept")] {
            if let Err(e) = sender.deliver(&d).await {
                assert!(matches!(e, SendError::Delivery(DeliveryError::Disconnected)));
                sender.handle_error(&d, e).await;
                assert!(sender.membership().is_empty());
            }
        }

        assert_eq!(sender.membership().len(), 1);
        assert_eq!(
            sender.into_chat().ops,
            vec![join("#a"), Op::Reconnect, join("#a"), send("#a", "kept")]
        );
    }

    #[tokio::test]
    async fn test_run_drains_until_channel_closes() {
        let (delivery_tx, delivery_rx) = delivery_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let sender = ChannelSender::new(RecordingChat::default(), channels(&["a"]), no_delay(2));

        delivery_tx.send(delivery("a", "one")).await.unwrap();
        drop(delivery_tx);

        // returns once the delivery channel is closed and drained
        sender.run(shutdown_rx, delivery_rx).await;
    }
}
