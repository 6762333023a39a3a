//! Event type definitions.
//!
//! `GerritEvent` mirrors the JSON emitted by `gerrit stream-events` (and
//! republished verbatim over MQTT). Only the fields the relay reads are
//! modelled. Every nested record is optional: an event that lacks a field
//! its route needs is skipped by the router, it is not a parse failure.

use crate::channel_config::ChannelName;
use serde::{Deserialize, Deserializer};

/// A change-review event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GerritEvent {
    /// A new patch set was uploaded.
    PatchsetCreated {
        #[serde(default)]
        change: Option<Change>,
        #[serde(default, rename = "patchSet")]
        patch_set: Option<PatchSet>,
    },
    /// A change was merged into its branch.
    ChangeMerged {
        #[serde(default)]
        change: Option<Change>,
    },
    /// A review comment, possibly carrying votes.
    CommentAdded {
        #[serde(default)]
        change: Option<Change>,
        #[serde(default)]
        approvals: Vec<Approval>,
    },
    /// A ref was updated directly (pushes, tags).
    RefUpdated {
        #[serde(default, rename = "refUpdate")]
        ref_update: Option<RefUpdate>,
        #[serde(default)]
        submitter: Option<Account>,
    },
    /// Any other event type Gerrit emits. Never routed.
    #[serde(other)]
    Unrecognized,
}

impl GerritEvent {
    pub const PATCHSET_CREATED: &str = "patchset-created";
    pub const CHANGE_MERGED: &str = "change-merged";
    pub const COMMENT_ADDED: &str = "comment-added";
    pub const REF_UPDATED: &str = "ref-updated";

    /// Parse one JSON event document.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// The subscription name of this event, as used in the channel config.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            GerritEvent::PatchsetCreated { .. } => Some(Self::PATCHSET_CREATED),
            GerritEvent::ChangeMerged { .. } => Some(Self::CHANGE_MERGED),
            GerritEvent::CommentAdded { .. } => Some(Self::COMMENT_ADDED),
            GerritEvent::RefUpdated { .. } => Some(Self::REF_UPDATED),
            GerritEvent::Unrecognized => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Change {
    pub project: Option<String>,
    pub branch: Option<String>,
    pub subject: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PatchSet {
    pub uploader: Option<Account>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RefUpdate {
    pub project: Option<String>,
    #[serde(rename = "refName")]
    pub ref_name: Option<String>,
}

/// A vote attached to a comment.
///
/// Gerrit sends the value as a string (`"-2"`); integers are accepted too.
/// A value that is not a number is kept as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Approval {
    #[serde(rename = "type", default)]
    pub label: String,
    #[serde(default, deserialize_with = "deserialize_vote")]
    pub value: Option<i32>,
}

impl Approval {
    /// The notable outcome this vote represents, if any.
    pub fn outcome(&self) -> Option<ApprovalOutcome> {
        let verification = matches!(self.label.as_str(), "VRIF" | "Verified");
        let code_review = matches!(self.label.as_str(), "CRVW" | "Code-Review");
        match (verification, code_review, self.value?) {
            (true, _, -2) => Some(ApprovalOutcome::VerificationFailed),
            (true, _, 2) => Some(ApprovalOutcome::VerificationSucceeded),
            (_, true, -2) => Some(ApprovalOutcome::Rejected),
            (_, true, 2) => Some(ApprovalOutcome::Approved),
            _ => None,
        }
    }
}

fn deserialize_vote<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Vote {
        Number(i64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Vote::deserialize(deserializer)? {
        Vote::Number(n) => i32::try_from(n).ok(),
        Vote::Text(s) => s.trim().parse().ok(),
        Vote::Other(_) => None,
    })
}

/// Vote outcomes that have a dedicated notification.
///
/// Each outcome is addressed by a synthetic event name that channels opt into
/// alongside `comment-added`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalOutcome {
    VerificationFailed,
    VerificationSucceeded,
    Rejected,
    Approved,
}

impl ApprovalOutcome {
    pub fn event_name(self) -> &'static str {
        match self {
            ApprovalOutcome::VerificationFailed => "x-vrif-minus-2",
            ApprovalOutcome::VerificationSucceeded => "x-vrif-plus-2",
            ApprovalOutcome::Rejected => "x-crvw-minus-2",
            ApprovalOutcome::Approved => "x-crvw-plus-2",
        }
    }
}

/// One rendered message bound for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: ChannelName,
    pub text: String,
}
