//! Bounded chat-channel membership with least-recently-used eviction.
//!
//! Networks cap how many channels one connection may sit in (Freenode and
//! Libera allow 120). [`ChannelMembership`] decides which channel to part when
//! a message needs a channel that is not joined yet; the caller performs the
//! actual JOIN and PART commands.

use crate::channel_config::ChannelName;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use thiserror::Error;

/// Default membership cap.
pub const CHANNEL_MAX: usize = 120;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MembershipError {
    /// The channel is not part of the channel configuration.
    #[error("channel {0} is not configured")]
    UnknownChannel(ChannelName),
}

/// A channel the connection currently sits in.
#[derive(Debug, Clone)]
struct ManagedChannel {
    name: ChannelName,
    last_used: Instant,
    /// Monotonic use counter. Breaks ties between equal instants so that
    /// eviction order is deterministic.
    sequence: u64,
}

/// What the caller has to do on the chat connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The channel was already joined; its timestamp was refreshed.
    AlreadyJoined,
    /// The channel must be joined, after parting `evicted` if present.
    Joined { evicted: Option<ChannelName> },
}

pub struct ChannelMembership {
    configured: BTreeSet<ChannelName>,
    joined: HashMap<ChannelName, ManagedChannel>,
    capacity: usize,
    next_sequence: u64,
}

impl ChannelMembership {
    /// Create a manager for the configured channels.
    ///
    /// A capacity of zero is raised to one; a membership manager that can
    /// never join anything would drop every message.
    pub fn new(configured: BTreeSet<ChannelName>, capacity: usize) -> Self {
        Self {
            configured,
            joined: HashMap::new(),
            capacity: capacity.max(1),
            next_sequence: 0,
        }
    }

    /// Make sure `channel` is a member, evicting the least recently used
    /// member when the cap is reached.
    pub fn ensure_joined(&mut self, channel: &ChannelName) -> Result<JoinOutcome, MembershipError> {
        if !self.configured.contains(channel) {
            return Err(MembershipError::UnknownChannel(channel.clone()));
        }

        let sequence = self.bump();
        if let Some(member) = self.joined.get_mut(channel) {
            member.last_used = Instant::now();
            member.sequence = sequence;
            return Ok(JoinOutcome::AlreadyJoined);
        }

        let evicted = if self.joined.len() >= self.capacity {
            self.evict_least_recently_used()
        } else {
            None
        };

        self.joined.insert(
            channel.clone(),
            ManagedChannel {
                name: channel.clone(),
                last_used: Instant::now(),
                sequence,
            },
        );

        Ok(JoinOutcome::Joined { evicted })
    }

    /// Refresh the timestamp of a joined channel after a successful send.
    ///
    /// Returns `false` if the channel is not joined.
    pub fn record_send(&mut self, channel: &ChannelName) -> bool {
        let sequence = self.bump();
        match self.joined.get_mut(channel) {
            Some(member) => {
                member.last_used = Instant::now();
                member.sequence = sequence;
                true
            }
            None => false,
        }
    }

    /// Forget every membership, e.g. after the chat connection was replaced.
    pub fn clear(&mut self) {
        self.joined.clear();
    }

    pub fn is_joined(&self, channel: &str) -> bool {
        self.joined.contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.joined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_least_recently_used(&mut self) -> Option<ChannelName> {
        let victim = self
            .joined
            .values()
            .min_by_key(|member| (member.last_used, member.sequence))
            .map(|member| member.name.clone())?;
        self.joined.remove(&victim);
        Some(victim)
    }

    fn bump(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> BTreeSet<ChannelName> {
        raw.iter().map(|n| ChannelName::new(n)).collect()
    }

    fn joined(evicted: Option<&str>) -> JoinOutcome {
        JoinOutcome::Joined {
            evicted: evicted.map(ChannelName::new),
        }
    }

    #[test]
    fn test_cap_evicts_oldest_member() {
        let mut membership = ChannelMembership::new(names(&["a", "b", "c"]), 2);
        let (a, b, c) = (ChannelName::new("a"), ChannelName::new("b"), ChannelName::new("c"));

        assert_eq!(membership.ensure_joined(&a).unwrap(), joined(None));
        assert_eq!(membership.ensure_joined(&b).unwrap(), joined(None));
        assert_eq!(membership.ensure_joined(&c).unwrap(), joined(Some("#a")));

        assert!(!membership.is_joined("#a"));
        assert!(membership.is_joined("#b"));
        assert!(membership.is_joined("#c"));
        assert_eq!(membership.len(), 2);
    }

    #[test]
    fn test_recent_use_protects_from_eviction() {
        let mut membership = ChannelMembership::new(names(&["a", "b", "c"]), 2);
        let (a, b, c) = (ChannelName::new("a"), ChannelName::new("b"), ChannelName::new("c"));

        membership.ensure_joined(&a).unwrap();
        membership.ensure_joined(&b).unwrap();
        assert!(membership.record_send(&a));

        assert_eq!(membership.ensure_joined(&c).unwrap(), joined(Some("#b")));
    }

    #[test]
    fn test_ensure_joined_is_idempotent() {
        let mut membership = ChannelMembership::new(names(&["a"]), 2);
        let a = ChannelName::new("a");

        assert_eq!(membership.ensure_joined(&a).unwrap(), joined(None));
        assert_eq!(
            membership.ensure_joined(&a).unwrap(),
            JoinOutcome::AlreadyJoined
        );
        assert_eq!(membership.len(), 1);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let all: Vec<String> = (0..20).map(|i| format!("chan{i}")).collect();
        let refs: Vec<&str> = all.iter().map(String::as_str).collect();
        let mut membership = ChannelMembership::new(names(&refs), 5);

        for (i, name) in refs.iter().cycle().take(200).enumerate() {
            let channel = ChannelName::new(name);
            let outcome = membership.ensure_joined(&channel).unwrap();
            assert!(membership.len() <= membership.capacity());
            if (5..20).contains(&i) {
                assert!(matches!(outcome, JoinOutcome::Joined { evicted: Some(_) }));
            }
        }
    }

    #[test]
    fn test_unknown_channel_is_rejected() {
        let mut membership = ChannelMembership::new(names(&["a"]), 2);
        let stray = ChannelName::new("stray");
        assert_eq!(
            membership.ensure_joined(&stray),
            Err(MembershipError::UnknownChannel(stray.clone()))
        );
        assert!(membership.is_empty());
    }

    #[test]
    fn test_clear_and_record_send_on_unknown() {
        let mut membership = ChannelMembership::new(names(&["a"]), 2);
        let a = ChannelName::new("a");
        assert!(!membership.record_send(&a));
        membership.ensure_joined(&a).unwrap();
        membership.clear();
        assert!(membership.is_empty());
        assert_eq!(membership.ensure_joined(&a).unwrap(), joined(None));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let membership = ChannelMembership::new(names(&["a"]), 0);
        assert_eq!(membership.capacity(), 1);
    }
}
