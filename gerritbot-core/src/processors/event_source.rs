//! Upstream event sources and the loop that keeps them connected.
//!
//! An [`EventSource`] reports every transport outcome as a value. The
//! [`SourceRunner`] decides what to do with it:
//! - an event is forwarded to the router
//! - a malformed event is logged and skipped, the connection is kept
//! - any other error marks the source disconnected; after a fixed backoff
//!   the runner reconnects, forever
//!
//! The runner never gives up: an unreachable Gerrit at startup simply means
//! the first connect attempts fail.

use crate::events::{GerritEvent, GerritEventSender};
use crate::processors::shutdown_signaled;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Fixed delay between reconnect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Errors reported by an event source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not establish the upstream connection.
    #[error("failed to connect to event source: {0}")]
    Connect(String),

    /// The connection failed while waiting for events.
    #[error("failed to read from event source: {0}")]
    Read(String),

    /// The upstream ended the stream.
    #[error("event source closed the stream")]
    Closed,

    /// One event could not be decoded. The connection is still usable.
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl SourceError {
    /// Whether the connection has to be re-established.
    pub fn is_fatal_for_connection(&self) -> bool {
        !matches!(self, SourceError::Malformed(_))
    }
}

/// A transport delivering Gerrit events one at a time.
#[async_trait]
pub trait EventSource: Send {
    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String;

    /// (Re)establish the upstream connection, dropping any previous one.
    async fn connect(&mut self) -> Result<(), SourceError>;

    /// Wait for the next event on the current connection.
    async fn next_event(&mut self) -> Result<GerritEvent, SourceError>;
}

/// Drives an [`EventSource`] and forwards its events.
pub struct SourceRunner<S> {
    source: S,
    backoff: Duration,
}

impl<S: EventSource> SourceRunner<S> {
    /// Create a runner with the default [`RECONNECT_BACKOFF`].
    pub fn new(source: S) -> Self {
        Self {
            source,
            backoff: RECONNECT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until shutdown is signaled or the router goes away.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>, event_tx: GerritEventSender) {
        let endpoint = self.source.describe();
        info!(%endpoint, "Event source started");

        let mut connected = false;
        loop {
            if !connected {
                tokio::select! {
                    biased;

                    _ = shutdown_signaled(&mut shutdown_rx) => {
                        info!(%endpoint, "Event source received shutdown signal");
                        break;
                    }

                    result = self.source.connect() => match result {
                        Ok(()) => {
                            info!(%endpoint, "Start watching Gerrit event stream");
                            connected = true;
                        }
                        Err(e) => {
                            error!(%endpoint, error = %e, "Exception while connecting to event source");
                            if wait_backoff(self.backoff, &mut shutdown_rx).await {
                                break;
                            }
                            continue;
                        }
                    }
                }
            }

            tokio::select! {
                biased;

                _ = shutdown_signaled(&mut shutdown_rx) => {
                    info!(%endpoint, "Event source received shutdown signal");
                    break;
                }

                result = self.source.next_event() => match result {
                    Ok(event) => {
                        debug!(?event, "Received event");
                        if event_tx.send(event).await.is_err() {
                            warn!("GerritEvent channel closed, stopping event source");
                            break;
                        }
                    }
                    Err(e) if !e.is_fatal_for_connection() => {
                        warn!(%endpoint, error = %e, "Skipping malformed event");
                    }
                    Err(e) => {
                        error!(%endpoint, error = %e, "Event source failed, reconnecting");
                        connected = false;
                        if wait_backoff(self.backoff, &mut shutdown_rx).await {
                            break;
                        }
                    }
                }
            }
        }

        info!(%endpoint, "Event source shutdown complete");
    }
}

/// Sleep for `backoff`. Returns `true` if shutdown was requested meanwhile.
async fn wait_backoff(backoff: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_signaled(shutdown_rx) => true,
        _ = tokio::time::sleep(backoff) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::gerrit_event_channel;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays scripted results, then blocks forever.
    struct ScriptedSource {
        connects: VecDeque<Result<(), SourceError>>,
        events: VecDeque<Result<GerritEvent, SourceError>>,
        connect_calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn connect(&mut self) -> Result<(), SourceError> {
            *self.connect_calls.lock().unwrap() += 1;
            self.connects.pop_front().unwrap_or(Ok(()))
        }

        async fn next_event(&mut self) -> Result<GerritEvent, SourceError> {
            match self.events.pop_front() {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    fn merged() -> GerritEvent {
        GerritEvent::ChangeMerged { change: None }
    }

    fn malformed() -> SourceError {
        SourceError::Malformed(serde_json::from_str::<GerritEvent>("{").unwrap_err())
    }

    #[tokio::test]
    async fn test_runner_retries_and_forwards_in_order() {
        let connect_calls = Arc::new(Mutex::new(0));
        let source = ScriptedSource {
            connects: VecDeque::from([
                Err(SourceError::Connect("unreachable".to_string())),
                Ok(()),
                Ok(()),
            ]),
            events: VecDeque::from([
                Ok(merged()),
                Err(malformed()),
                Ok(GerritEvent::Unrecognized),
                Err(SourceError::Closed),
                Ok(merged()),
            ]),
            connect_calls: connect_calls.clone(),
        };

        let (event_tx, mut event_rx) = gerrit_event_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            SourceRunner::new(source)
                .with_backoff(Duration::from_millis(1))
                .run(shutdown_rx, event_tx),
        );

        assert_eq!(event_rx.recv().await.unwrap(), merged());
        assert_eq!(event_rx.recv().await.unwrap(), GerritEvent::Unrecognized);
        assert_eq!(event_rx.recv().await.unwrap(), merged());

        // failed first attempt, initial connection, reconnect after Closed;
        // the malformed event did not cost a reconnect
        assert_eq!(*connect_calls.lock().unwrap(), 3);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(event_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_runner_stops_during_backoff() {
        let source = ScriptedSource {
            connects: VecDeque::from([Err(SourceError::Connect("down".to_string()))]),
            events: VecDeque::new(),
            connect_calls: Arc::new(Mutex::new(0)),
        };
        let (event_tx, _event_rx) = gerrit_event_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            SourceRunner::new(source)
                .with_backoff(Duration::from_secs(3600))
                .run(shutdown_rx, event_tx),
        );

        tokio::task::yield_now().await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_runner_futures_are_send() {
        use crate::processors::{GerritMqttSource, GerritSshSource, MqttParams, SshParams};

        let (event_tx, _event_rx) = gerrit_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mqtt = SourceRunner::new(GerritMqttSource::new(MqttParams::new("localhost", "test")))
            .run(shutdown_rx.clone(), event_tx.clone());
        assert_send(&mqtt);
        let ssh = SourceRunner::new(GerritSshSource::new(SshParams::new("localhost", "bot")))
            .run(shutdown_rx, event_tx);
        assert_send(&ssh);
    }

    #[test]
    fn test_only_malformed_keeps_connection() {
        assert!(!malformed().is_fatal_for_connection());
        assert!(SourceError::Closed.is_fatal_for_connection());
        assert!(SourceError::Read("reset".to_string()).is_fatal_for_connection());
    }
}
