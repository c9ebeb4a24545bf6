//! Queue hierarchy documents and engine settings.
//!
//! A [`QueueConfigDocument`] is the serialized form of a queue tree:
//!
//! ```json
//! {
//!   "partition": "default",
//!   "queues": [{
//!     "name": "root",
//!     "queues": [
//!       { "name": "sandbox1",
//!         "resources": { "guaranteed": { "memory": "512M" } },
//!         "properties": { "preemption.delay": "1s" } },
//!       { "name": "sandbox2",
//!         "resources": { "guaranteed": { "memory": "512M" } },
//!         "properties": { "preemption.delay": "1s", "preemption.policy": "fence" } }
//!     ]
//!   }]
//! }
//! ```
//!
//! Documents are resolved into [`QueueSettings`] before they touch a tree, so
//! a malformed document never leaves a partially applied configuration.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PreemptionError, Result};
use crate::queue::{DEFAULT_PREEMPTION_DELAY, PATH_SEPARATOR, PreemptionPolicy, ROOT_QUEUE};
use crate::resource::ResourceVector;

/// Property key for the preemption delay.
pub const PROPERTY_PREEMPTION_DELAY: &str = "preemption.delay";

/// Property key for the preemption policy.
pub const PROPERTY_PREEMPTION_POLICY: &str = "preemption.policy";

fn default_partition() -> String {
    "default".to_string()
}

/// A queue hierarchy for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfigDocument {
    /// Partition name, informational only.
    #[serde(default = "default_partition")]
    pub partition: String,
    /// Top-level queues. Exactly one, named `root`.
    pub queues: Vec<QueueConfig>,
}

impl QueueConfigDocument {
    /// Creates a document from a root queue.
    #[must_use]
    pub fn new(root: QueueConfig) -> Self {
        Self {
            partition: default_partition(),
            queues: vec![root],
        }
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::InvalidConfig`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PreemptionError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    /// Reads and parses a JSON document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::InvalidConfig`] if the file cannot be read
    /// or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| PreemptionError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json(&raw)
    }

    /// Serializes the document to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::InvalidConfig`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PreemptionError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    /// Validates the document and resolves every quantity and property.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn resolve(&self) -> Result<QueueSettings> {
        let [root] = self.queues.as_slice() else {
            return Err(PreemptionError::InvalidConfig {
                reason: format!(
                    "expected exactly one top-level queue, found {}",
                    self.queues.len()
                ),
            });
        };
        if root.name != ROOT_QUEUE {
            return Err(PreemptionError::InvalidConfig {
                reason: format!("top-level queue must be named {ROOT_QUEUE}, found {:?}", root.name),
            });
        }
        root.resolve(None)
    }
}

/// Resource section of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueResources {
    /// Guaranteed quantities by resource name, e.g. `{"memory": "512M"}`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub guaranteed: HashMap<String, String>,
}

/// One queue in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name. Must not contain `.`.
    pub name: String,
    /// Resource settings.
    #[serde(default)]
    pub resources: QueueResources,
    /// Free-form properties such as `preemption.delay`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    /// Child queues.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queues: Vec<QueueConfig>,
}

impl QueueConfig {
    /// Creates a queue with no settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: QueueResources::default(),
            properties: HashMap::new(),
            queues: Vec::new(),
        }
    }

    /// Adds a guaranteed quantity.
    #[must_use]
    pub fn with_guaranteed(mut self, resource: impl Into<String>, quantity: impl Into<String>) -> Self {
        self.resources.guaranteed.insert(resource.into(), quantity.into());
        self
    }

    /// Sets a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the `preemption.delay` property.
    #[must_use]
    pub fn with_preemption_delay(self, delay: impl Into<String>) -> Self {
        self.with_property(PROPERTY_PREEMPTION_DELAY, delay)
    }

    /// Sets the `preemption.policy` property.
    #[must_use]
    pub fn with_preemption_policy(self, policy: impl Into<String>) -> Self {
        self.with_property(PROPERTY_PREEMPTION_POLICY, policy)
    }

    /// Adds a child queue.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.queues.push(child);
        self
    }

    fn resolve(&self, parent_path: Option<&str>) -> Result<QueueSettings> {
        if self.name.is_empty() || self.name.contains(PATH_SEPARATOR) {
            return Err(PreemptionError::InvalidConfig {
                reason: format!("invalid queue name {:?}", self.name),
            });
        }
        let path = match parent_path {
            Some(parent) => format!("{parent}{PATH_SEPARATOR}{}", self.name),
            None => self.name.clone(),
        };

        let guaranteed = ResourceVector::from_quantities(&self.resources.guaranteed)?;

        let preemption_delay = match self.properties.get(PROPERTY_PREEMPTION_DELAY) {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_PREEMPTION_DELAY,
        };
        let policy = match self.properties.get(PROPERTY_PREEMPTION_POLICY) {
            Some(raw) => raw
                .parse::<PreemptionPolicy>()
                .map_err(|_| PreemptionError::InvalidConfig {
                    reason: format!("queue {path}: unknown preemption policy {raw:?}"),
                })?,
            None => PreemptionPolicy::Normal,
        };
        for key in self.properties.keys() {
            if key != PROPERTY_PREEMPTION_DELAY && key != PROPERTY_PREEMPTION_POLICY {
                debug!(queue = %path, property = %key, "ignoring unknown queue property");
            }
        }

        let mut seen = HashSet::new();
        let mut children = Vec::with_capacity(self.queues.len());
        for child in &self.queues {
            if !seen.insert(child.name.as_str()) {
                return Err(PreemptionError::InvalidConfig {
                    reason: format!("duplicate queue {path}{PATH_SEPARATOR}{}", child.name),
                });
            }
            children.push(child.resolve(Some(&path))?);
        }

        Ok(QueueSettings {
            name: self.name.clone(),
            guaranteed,
            policy,
            preemption_delay,
            children,
        })
    }
}

/// A validated queue with every property resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Queue name.
    pub name: String,
    /// Guaranteed share.
    pub guaranteed: ResourceVector,
    /// Preemption policy.
    pub policy: PreemptionPolicy,
    /// Preemption delay.
    pub preemption_delay: Duration,
    /// Child queues.
    pub children: Vec<QueueSettings>,
}

impl QueueSettings {
    /// Settings for a queue with no guarantee and default properties.
    #[must_use]
    pub fn unconfigured(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guaranteed: ResourceVector::new(),
            policy: PreemptionPolicy::Normal,
            preemption_delay: DEFAULT_PREEMPTION_DELAY,
            children: Vec::new(),
        }
    }
}

/// Parses a human-readable duration such as `"1s"` or `"2m 30s"`.
///
/// # Errors
///
/// Returns [`PreemptionError::InvalidDuration`] if the string is malformed.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim()).map_err(|e| PreemptionError::InvalidDuration {
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Serde adapter storing [`Duration`] as a humantime string.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a duration as e.g. `"1m 30s"`.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    /// Deserializes a duration from e.g. `"1m 30s"`.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Engine settings for preemption behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreemptionConfig {
    /// Whether preemption is enabled at all. Placement still happens when
    /// disabled.
    pub enabled: bool,
    /// Interval between scheduling ticks.
    #[serde(with = "duration_str")]
    pub tick_interval: Duration,
    /// Grace period for evictions when the workload does not set one.
    #[serde(with = "duration_str")]
    pub default_grace_period: Duration,
    /// Maximum grace period allowed.
    #[serde(with = "duration_str")]
    pub max_grace_period: Duration,
    /// A workload must have been running this long before it can be a victim.
    #[serde(with = "duration_str")]
    pub min_running_time: Duration,
    /// Maximum number of victims in a single preemption decision.
    pub max_victims_per_operation: usize,
    /// Consecutive eviction failures for one victim before a warning is
    /// raised.
    pub eviction_failure_threshold: u32,
    /// Maximum number of eviction records kept in history.
    pub max_history: usize,
}

impl Default for PreemptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: Duration::from_secs(1),
            default_grace_period: Duration::from_secs(30),
            max_grace_period: Duration::from_secs(300),
            min_running_time: Duration::ZERO,
            max_victims_per_operation: 100,
            eviction_failure_threshold: 3,
            max_history: 1000,
        }
    }
}

impl PreemptionConfig {
    /// Creates a new config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables preemption.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the tick interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the default grace period.
    #[must_use]
    pub const fn with_default_grace_period(mut self, duration: Duration) -> Self {
        self.default_grace_period = duration;
        self
    }

    /// Sets the maximum grace period.
    #[must_use]
    pub const fn with_max_grace_period(mut self, duration: Duration) -> Self {
        self.max_grace_period = duration;
        self
    }

    /// Sets the minimum running time before a workload can be a victim.
    #[must_use]
    pub const fn with_min_running_time(mut self, duration: Duration) -> Self {
        self.min_running_time = duration;
        self
    }

    /// Sets the maximum victims per operation.
    #[must_use]
    pub const fn with_max_victims(mut self, max: usize) -> Self {
        self.max_victims_per_operation = max;
        self
    }

    /// Sets the eviction failure threshold.
    #[must_use]
    pub const fn with_eviction_failure_threshold(mut self, threshold: u32) -> Self {
        self.eviction_failure_threshold = threshold;
        self
    }

    /// Sets the history size.
    #[must_use]
    pub const fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    /// Parses engine settings from JSON. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::InvalidConfig`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PreemptionError::InvalidConfig {
            reason: e.to_string(),
        })
    }
}
