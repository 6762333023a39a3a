//! Channel subscription configuration.
//!
//! The channel configuration is a YAML mapping from channel name to the
//! events, projects and branches that channel wants to hear about:
//!
//! ```yaml
//! openstack-dev:
//!     events:
//!       - patchset-created
//!       - change-merged
//!     projects:
//!       - openstack/nova
//!     branches:
//!       - master
//! ```
//!
//! [`ChannelConfig`] turns that mapping into three reverse indices
//! (event, project, branch → channels) that the router intersects for every
//! incoming event. The indices are built once and never mutated.

use compact_str::{CompactString, ToCompactString, format_compact};
use regex::Regex;
use serde::Serialize;
use serde_yaml::Value;
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

/// Leading character of every canonical channel name.
pub const CHANNEL_SIGIL: char = '#';

/// Errors that can occur while building a [`ChannelConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid YAML.
    #[error("failed to parse channel config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The top level of the document is not a mapping.
    #[error("channel config must be a mapping of channel name to subscriptions")]
    NotAMapping,

    /// The document defines no channels.
    #[error("channel config defines no channels")]
    Empty,

    /// A channel record lacks one of `events`, `projects` or `branches`.
    #[error("channel {channel} is missing required list `{field}`")]
    MissingField {
        channel: ChannelName,
        field: &'static str,
    },

    /// A channel record has a malformed value.
    #[error("channel {channel}: {reason}")]
    InvalidEntry { channel: String, reason: String },

    /// Two keys normalize to the same channel name (e.g. `dev` and `#dev`).
    #[error("channel {0} is defined more than once")]
    DuplicateChannel(ChannelName),

    /// A `^`-prefixed entry is not a valid regular expression.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A canonical chat channel name, always starting with [`CHANNEL_SIGIL`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ChannelName(CompactString);

impl ChannelName {
    /// Normalize a user-authored name by prefixing the sigil when absent.
    ///
    /// Normalization is idempotent: `new("#a") == new("a")`.
    pub fn new(raw: &str) -> Self {
        if raw.starts_with(CHANNEL_SIGIL) {
            Self(raw.to_compact_string())
        } else {
            Self(format_compact!("{CHANNEL_SIGIL}{raw}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelName {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// How index keys are compared with event values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// Keys are opaque strings compared for equality.
    #[default]
    Literal,
    /// Keys beginning with `^` are regular expressions; every other key is
    /// still compared literally.
    Pattern,
}

/// One configured channel and its subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: ChannelName,
    pub events: Vec<String>,
    pub projects: Vec<String>,
    pub branches: Vec<String>,
}

/// Reverse index from a subscription key to the channels holding it.
#[derive(Debug, Default)]
struct SubscriptionIndex {
    literal: HashMap<CompactString, BTreeSet<ChannelName>>,
    patterns: Vec<(Regex, BTreeSet<ChannelName>)>,
}

impl SubscriptionIndex {
    fn insert(&mut self, key: &str, channel: &ChannelName) {
        self.literal
            .entry(key.to_compact_string())
            .or_default()
            .insert(channel.clone());
    }

    fn compile_patterns(&mut self) -> Result<(), ConfigError> {
        for (key, channels) in &self.literal {
            if !key.starts_with('^') {
                continue;
            }
            let regex = Regex::new(key).map_err(|source| ConfigError::InvalidPattern {
                pattern: key.to_string(),
                source,
            })?;
            self.patterns.push((regex, channels.clone()));
        }
        Ok(())
    }

    fn lookup(&self, value: &str) -> BTreeSet<ChannelName> {
        let mut channels = self.literal.get(value).cloned().unwrap_or_default();
        for (regex, matched) in &self.patterns {
            if regex.is_match(value) {
                channels.extend(matched.iter().cloned());
            }
        }
        channels
    }

    fn keys(&self) -> impl Iterator<Item = &str> {
        self.literal.keys().map(CompactString::as_str)
    }

    fn channels(&self) -> impl Iterator<Item = &ChannelName> {
        self.literal.values().flatten()
    }
}

/// Routing indices derived from the channel configuration.
#[derive(Debug)]
pub struct ChannelConfig {
    channels: BTreeSet<ChannelName>,
    events: SubscriptionIndex,
    projects: SubscriptionIndex,
    branches: SubscriptionIndex,
    mode: MatchMode,
}

impl ChannelConfig {
    /// Parse a YAML channel configuration document.
    pub fn from_yaml_str(document: &str, mode: MatchMode) -> Result<Self, ConfigError> {
        let value: Value = serde_yaml::from_str(document)?;
        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => return Err(ConfigError::Empty),
            _ => return Err(ConfigError::NotAMapping),
        };

        let specs = mapping
            .iter()
            .map(|(key, record)| {
                let raw_name = scalar_to_string(key).ok_or_else(|| ConfigError::InvalidEntry {
                    channel: format!("{key:?}"),
                    reason: "channel name must be a string".to_string(),
                })?;
                parse_channel_record(ChannelName::new(&raw_name), record)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_specs(specs, mode)
    }

    /// Build the indices from already-parsed channel specs.
    pub fn from_specs(
        specs: impl IntoIterator<Item = ChannelSpec>,
        mode: MatchMode,
    ) -> Result<Self, ConfigError> {
        let mut config = Self {
            channels: BTreeSet::new(),
            events: SubscriptionIndex::default(),
            projects: SubscriptionIndex::default(),
            branches: SubscriptionIndex::default(),
            mode,
        };

        for spec in specs {
            if !config.channels.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateChannel(spec.name));
            }
            for event in &spec.events {
                config.events.insert(event, &spec.name);
            }
            for project in &spec.projects {
                config.projects.insert(project, &spec.name);
            }
            for branch in &spec.branches {
                config.branches.insert(branch, &spec.name);
            }
        }

        if config.channels.is_empty() {
            return Err(ConfigError::Empty);
        }

        if mode == MatchMode::Pattern {
            config.events.compile_patterns()?;
            config.projects.compile_patterns()?;
            config.branches.compile_patterns()?;
        }

        Ok(config)
    }

    /// Channels subscribed to the given event name.
    pub fn channels_for_event(&self, event: &str) -> BTreeSet<ChannelName> {
        self.events.lookup(event)
    }

    /// Channels subscribed to the given project.
    pub fn channels_for_project(&self, project: &str) -> BTreeSet<ChannelName> {
        self.projects.lookup(project)
    }

    /// Channels subscribed to the given branch.
    pub fn channels_for_branch(&self, branch: &str) -> BTreeSet<ChannelName> {
        self.branches.lookup(branch)
    }

    /// Every configured channel.
    pub fn all_channels(&self) -> &BTreeSet<ChannelName> {
        &self.channels
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    pub fn match_mode(&self) -> MatchMode {
        self.mode
    }

    /// Subscription keys of the event index.
    pub fn event_keys(&self) -> impl Iterator<Item = &str> {
        self.events.keys()
    }

    /// Subscription keys of the project index.
    pub fn project_keys(&self) -> impl Iterator<Item = &str> {
        self.projects.keys()
    }

    /// Subscription keys of the branch index.
    pub fn branch_keys(&self) -> impl Iterator<Item = &str> {
        self.branches.keys()
    }

    /// Every channel mentioned by any of the three indices, with repeats.
    pub fn indexed_channels(&self) -> impl Iterator<Item = &ChannelName> {
        self.events
            .channels()
            .chain(self.projects.channels())
            .chain(self.branches.channels())
    }
}

fn parse_channel_record(name: ChannelName, record: &Value) -> Result<ChannelSpec, ConfigError> {
    let Value::Mapping(fields) = record else {
        return Err(ConfigError::InvalidEntry {
            channel: name.to_string(),
            reason: "subscriptions must be a mapping".to_string(),
        });
    };

    let list = |field: &'static str| -> Result<Vec<String>, ConfigError> {
        let Some(value) = fields.get(field) else {
            return Err(ConfigError::MissingField {
                channel: name.clone(),
                field,
            });
        };
        match value {
            // `events:` with no entries parses as null
            Value::Null => Ok(Vec::new()),
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    scalar_to_string(item).ok_or_else(|| ConfigError::InvalidEntry {
                        channel: name.to_string(),
                        reason: format!("`{field}` entries must be strings"),
                    })
                })
                .collect(),
            _ => Err(ConfigError::InvalidEntry {
                channel: name.to_string(),
                reason: format!("`{field}` must be a list"),
            }),
        }
    };

    Ok(ChannelSpec {
        events: list("events")?,
        projects: list("projects")?,
        branches: list("branches")?,
        name,
    })
}

/// YAML reads `1.0` or `true` as non-strings; branch names like that are
/// still meant literally.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
