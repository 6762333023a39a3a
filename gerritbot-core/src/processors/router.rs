//! EventRouter processor.
//!
//! The EventRouter is responsible for:
//! - Receiving `GerritEvent` from the event source
//! - Computing the target channel set from the channel config indices
//! - Rendering the notification text for each target channel
//! - Emitting one `Delivery` per (channel, message) to the `ChannelSender`
//!
//! Routing rules:
//! - `ref-updated` goes to every channel subscribed to `ref-updated`;
//!   project and branch filters do not apply.
//! - Every other event goes to `event ∩ project ∩ branch`. An event without
//!   a change record, project or branch reaches nobody.
//! - `comment-added` additionally sends one follow-up per notable vote to the
//!   base channels that also subscribe to the vote's synthetic event name.

use crate::channel_config::{ChannelConfig, ChannelName};
use crate::events::{Change, Delivery, DeliverySender, GerritEvent, GerritEventReceiver};
use crate::format;
use crate::processors::shutdown_signaled;
use kanau::processor::Processor;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Messages produced for one event. Usually one or two.
pub type Deliveries = SmallVec<[Delivery; 2]>;

/// EventRouter maps events to channel deliveries.
pub struct EventRouter {
    config: Arc<ChannelConfig>,
}

impl EventRouter {
    /// Create a new EventRouter over the given channel config.
    pub fn new(config: Arc<ChannelConfig>) -> Self {
        Self { config }
    }

    /// Run the EventRouter until shutdown is signaled or either channel closes.
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut event_rx: GerritEventReceiver,
        delivery_tx: DeliverySender,
    ) {
        info!(
            channels = self.config.all_channels().len(),
            "EventRouter started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_signaled(&mut shutdown_rx) => {
                    info!("EventRouter received shutdown signal");
                    break;
                }

                event = event_rx.recv() => {
                    let Some(event) = event else {
                        info!("GerritEvent channel closed");
                        break;
                    };
                    let Ok(deliveries) = self.process(event).await;
                    for delivery in deliveries {
                        if delivery_tx.send(delivery).await.is_err() {
                            warn!("Delivery channel closed, stopping EventRouter");
                            return;
                        }
                    }
                }
            }
        }

        info!("EventRouter shutdown complete");
    }

    /// Channels that should hear about `event`.
    pub fn target_channels(&self, event: &GerritEvent) -> BTreeSet<ChannelName> {
        match event {
            GerritEvent::RefUpdated { .. } => {
                self.config.channels_for_event(GerritEvent::REF_UPDATED)
            }
            GerritEvent::PatchsetCreated { change, .. } => {
                self.change_channels(GerritEvent::PATCHSET_CREATED, change.as_ref())
            }
            GerritEvent::ChangeMerged { change } => {
                self.change_channels(GerritEvent::CHANGE_MERGED, change.as_ref())
            }
            GerritEvent::CommentAdded { change, .. } => {
                self.change_channels(GerritEvent::COMMENT_ADDED, change.as_ref())
            }
            GerritEvent::Unrecognized => BTreeSet::new(),
        }
    }

    /// Compute every delivery for `event`, in send order.
    ///
    /// Per channel the base message comes first, followed by vote follow-ups
    /// in the order the votes appear on the event.
    pub fn route(&self, event: &GerritEvent) -> Deliveries {
        let channels = self.target_channels(event);
        debug!(
            event = event.name().unwrap_or("unrecognized"),
            ?channels,
            "Potential channels to receive event notification"
        );
        if channels.is_empty() {
            return Deliveries::new();
        }

        let Some(base) = render_base(event) else {
            debug!(
                event = event.name().unwrap_or("unrecognized"),
                "Event lacks fields needed for its message, skipping"
            );
            return Deliveries::new();
        };

        let followups = self.vote_followups(event);

        let mut deliveries = Deliveries::new();
        for channel in channels {
            deliveries.push(Delivery {
                channel: channel.clone(),
                text: base.clone(),
            });
            for (subscribers, text) in &followups {
                if subscribers.contains(&channel) {
                    deliveries.push(Delivery {
                        channel: channel.clone(),
                        text: text.clone(),
                    });
                }
            }
        }
        deliveries
    }

    fn change_channels(&self, event_name: &str, change: Option<&Change>) -> BTreeSet<ChannelName> {
        let Some((project, branch)) =
            change.and_then(|c| Some((c.project.as_deref()?, c.branch.as_deref()?)))
        else {
            return BTreeSet::new();
        };

        let by_event = self.config.channels_for_event(event_name);
        if by_event.is_empty() {
            return by_event;
        }
        let by_project = self.config.channels_for_project(project);
        let by_branch = self.config.channels_for_branch(branch);

        by_event
            .into_iter()
            .filter(|channel| by_project.contains(channel) && by_branch.contains(channel))
            .collect()
    }

    /// Rendered follow-up lines for notable votes, each with the channels
    /// subscribed to the vote's synthetic event.
    fn vote_followups(&self, event: &GerritEvent) -> Vec<(BTreeSet<ChannelName>, String)> {
        let GerritEvent::CommentAdded {
            change: Some(change),
            approvals,
        } = event
        else {
            return Vec::new();
        };

        approvals
            .iter()
            .filter_map(|approval| approval.outcome())
            .filter_map(|outcome| {
                let text = format::approval(outcome, change)?;
                Some((self.config.channels_for_event(outcome.event_name()), text))
            })
            .collect()
    }
}

fn render_base(event: &GerritEvent) -> Option<String> {
    match event {
        GerritEvent::PatchsetCreated { change, patch_set } => {
            format::patchset_created(change.as_ref()?, patch_set.as_ref())
        }
        GerritEvent::ChangeMerged { change } => format::change_merged(change.as_ref()?),
        GerritEvent::CommentAdded { change, .. } => format::comment_added(change.as_ref()?),
        GerritEvent::RefUpdated {
            ref_update,
            submitter,
        } => format::ref_updated(ref_update.as_ref()?, submitter.as_ref()),
        GerritEvent::Unrecognized => None,
    }
}

impl Processor<GerritEvent> for EventRouter {
    type Output = Deliveries;
    type Error = Infallible;

    async fn process(&self, event: GerritEvent) -> Result<Deliveries, Infallible> {
        Ok(self.route(&event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_config::MatchMode;
    use crate::channel_config::tests::CHANNEL_CONFIG_YAML;
    use crate::events::{delivery_channel, gerrit_event_channel};
    use serde_json::{Value, json};

    const INFRA: &str = "#openstack-infra";

    fn router(mode: MatchMode) -> EventRouter {
        let config = ChannelConfig::from_yaml_str(CHANNEL_CONFIG_YAML, mode).unwrap();
        EventRouter::new(Arc::new(config))
    }

    fn sample_event(event_type: &str) -> Value {
        json!({
            "type": event_type,
            "change": {
                "branch": "master",
                "project": "openstack/gerritbot",
                "subject": "More unit tests",
                "url": "https://review.openstack.org/123456"
            },
            "patchSet": {"uploader": {"name": "John L. Villalovos"}},
            "refUpdate": {"project": "openstack/gerritbot", "refName": "refs/tags/pike"},
            "submitter": {"username": "elmo"}
        })
    }

    fn parse(value: Value) -> GerritEvent {
        serde_json::from_value(value).unwrap()
    }

    fn texts(deliveries: &Deliveries) -> Vec<(&str, &str)> {
        deliveries
            .iter()
            .map(|d| (d.channel.as_str(), d.text.as_str()))
            .collect()
    }

    #[test]
    fn test_route_patchset_created() {
        let deliveries = router(MatchMode::Literal).route(&parse(sample_event("patchset-created")));
        assert_eq!(
            texts(&deliveries),
            vec![(
                INFRA,
                "John L. Villalovos proposed openstack/gerritbot master: More unit tests  \
                 https://review.openstack.org/123456"
            )]
        );
    }

    #[test]
    fn test_route_change_merged() {
        let deliveries = router(MatchMode::Literal).route(&parse(sample_event("change-merged")));
        assert_eq!(
            texts(&deliveries),
            vec![(
                INFRA,
                "Merged openstack/gerritbot master: More unit tests  https://review.openstack.org/123456"
            )]
        );
    }

    #[test]
    fn test_route_ref_updated_ignores_project_and_branch_filters() {
        let mut event = sample_event("ref-updated");
        event["refUpdate"]["project"] = json!("unsubscribed/project");
        event.as_object_mut().unwrap().remove("change");

        let deliveries = router(MatchMode::Literal).route(&parse(event));
        assert_eq!(
            texts(&deliveries),
            vec![(INFRA, "elmo tagged project unsubscribed/project with pike")]
        );
    }

    #[test]
    fn test_route_ref_updated_branch_push_sends_nothing() {
        let mut event = sample_event("ref-updated");
        event["refUpdate"]["refName"] = json!("refs/heads/master");
        let router = router(MatchMode::Literal);
        let event = parse(event);
        assert_eq!(router.target_channels(&event).len(), 1);
        assert!(router.route(&event).is_empty());
    }

    #[test]
    fn test_route_comment_added() {
        let deliveries = router(MatchMode::Literal).route(&parse(sample_event("comment-added")));
        assert_eq!(
            texts(&deliveries),
            vec![(
                INFRA,
                "A comment has been added to a proposed change to openstack/gerritbot: \
                 More unit tests  https://review.openstack.org/123456"
            )]
        );
    }

    #[test]
    fn test_route_comment_added_verification_failed() {
        let mut event = sample_event("comment-added");
        event["approvals"] = json!([{"type": "VRIF", "value": "-2"}]);

        let deliveries = router(MatchMode::Literal).route(&parse(event));
        assert_eq!(
            texts(&deliveries),
            vec![
                (
                    INFRA,
                    "A comment has been added to a proposed change to openstack/gerritbot: \
                     More unit tests  https://review.openstack.org/123456"
                ),
                (
                    INFRA,
                    "Verification of a change to openstack/gerritbot failed: \
                     More unit tests  https://review.openstack.org/123456"
                ),
            ]
        );
    }

    #[test]
    fn test_vote_followups_only_reach_base_channels() {
        // #openstack-dev matches x-vrif-plus-2 by pattern but does not
        // subscribe to comment-added; #openstack-infra does not subscribe to
        // x-vrif-plus-2.
        let mut event = sample_event("comment-added");
        event["approvals"] = json!([{"type": "VRIF", "value": "2"}, {"type": "CRVW", "value": "1"}]);

        let deliveries = router(MatchMode::Pattern).route(&parse(event));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].channel.as_str(), INFRA);
    }

    #[test]
    fn test_multiple_votes_follow_base_in_order() {
        let mut event = sample_event("comment-added");
        event["approvals"] = json!([
            {"type": "Code-Review", "value": 2},
            {"type": "Verified", "value": -2}
        ]);

        let deliveries = router(MatchMode::Literal).route(&parse(event));
        let lines: Vec<_> = deliveries.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("A comment has been added"));
        assert!(lines[1].starts_with("A change to openstack/gerritbot has been approved"));
        assert!(lines[2].starts_with("Verification of a change to openstack/gerritbot failed"));
    }

    #[test]
    fn test_missing_change_or_branch_routes_nowhere() {
        let router = router(MatchMode::Literal);

        let mut no_change = sample_event("patchset-created");
        no_change.as_object_mut().unwrap().remove("change");
        assert!(router.target_channels(&parse(no_change)).is_empty());

        let mut no_branch = sample_event("change-merged");
        no_branch["change"].as_object_mut().unwrap().remove("branch");
        let event = parse(no_branch);
        assert!(router.target_channels(&event).is_empty());
        assert!(router.route(&event).is_empty());
    }

    #[test]
    fn test_unsubscribed_project_routes_nowhere_in_literal_mode() {
        let mut event = sample_event("change-merged");
        event["change"]["project"] = json!("openstack/ironic");
        let event = parse(event);

        assert!(router(MatchMode::Literal).route(&event).is_empty());
        assert_eq!(
            texts(&router(MatchMode::Pattern).route(&event)),
            vec![(
                INFRA,
                "Merged openstack/ironic master: More unit tests  https://review.openstack.org/123456"
            )]
        );
    }

    #[test]
    fn test_unrecognized_event_routes_nowhere() {
        let router = router(MatchMode::Literal);
        assert!(router.route(&GerritEvent::Unrecognized).is_empty());
    }

    #[tokio::test]
    async fn test_run_forwards_deliveries_in_order() {
        let (event_tx, event_rx) = gerrit_event_channel();
        let (delivery_tx, mut delivery_rx) = delivery_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(router(MatchMode::Literal).run(shutdown_rx, event_rx, delivery_tx));

        event_tx.send(parse(sample_event("change-merged"))).await.unwrap();
        event_tx.send(GerritEvent::Unrecognized).await.unwrap();
        event_tx.send(parse(sample_event("ref-updated"))).await.unwrap();
        drop(event_tx);

        let first = delivery_rx.recv().await.unwrap();
        let second = delivery_rx.recv().await.unwrap();
        assert!(first.text.starts_with("Merged "));
        assert_eq!(second.text, "elmo tagged project openstack/gerritbot with pike");

        handle.await.unwrap();
        assert!(delivery_rx.recv().await.is_none());
    }
}
