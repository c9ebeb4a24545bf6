//! Queue records stored in the [`QueueTree`](crate::tree::QueueTree) arena.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PreemptionError, Result};
use crate::resource::ResourceVector;

/// Name of the queue at the top of every tree.
pub const ROOT_QUEUE: &str = "root";

/// Separator between queue names in a full path.
pub const PATH_SEPARATOR: char = '.';

/// Preemption delay applied when a queue does not configure one.
pub const DEFAULT_PREEMPTION_DELAY: Duration = Duration::from_secs(30);

/// Index of a queue inside one tree arena.
///
/// Ids are only meaningful for the tree that produced them; a
/// reconfiguration builds a new arena with new ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub(crate) usize);

impl QueueId {
    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Policy controlling how preemption crosses a queue boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreemptionPolicy {
    /// Preemption may look at any visible queue.
    #[default]
    Normal,
    /// The subtree is opaque: nothing outside can take victims inside it, and
    /// requests inside it only find victims inside it.
    Fence,
    /// Requests from this queue never trigger preemption. Its workloads can
    /// still be chosen as victims.
    Disabled,
}

impl PreemptionPolicy {
    /// Returns true if this policy fences the subtree.
    #[must_use]
    pub const fn is_fence(&self) -> bool {
        matches!(self, Self::Fence)
    }

    /// Returns true if requests from a queue with this policy may preempt.
    #[must_use]
    pub const fn allows_preemption(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl FromStr for PreemptionPolicy {
    type Err = PreemptionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "normal" | "default" => Ok(Self::Normal),
            "fence" => Ok(Self::Fence),
            "disabled" => Ok(Self::Disabled),
            other => Err(PreemptionError::InvalidConfig {
                reason: format!("unknown preemption policy {other:?}"),
            }),
        }
    }
}

impl fmt::Display for PreemptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Fence => "fence",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// One queue in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNode {
    /// Short name, unique among siblings.
    pub name: String,
    /// Full dotted path from the root.
    pub path: String,
    /// Parent queue, `None` for the root.
    pub parent: Option<QueueId>,
    /// Child queues in configuration order.
    pub children: Vec<QueueId>,
    /// Guaranteed share. Unset means no guarantee.
    pub guaranteed: ResourceVector,
    /// Resources held by running and terminating workloads in this subtree.
    pub usage: ResourceVector,
    /// Preemption policy.
    pub policy: PreemptionPolicy,
    /// Minimum time a request must stay under-served before it may preempt.
    pub preemption_delay: Duration,
    /// Removed from the configuration but still holding workloads.
    pub draining: bool,
}

impl QueueNode {
    /// Returns true if the queue has no children and can hold workloads.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns true if the queue configures a guarantee.
    #[must_use]
    pub fn has_guarantee(&self) -> bool {
        !self.guaranteed.is_unset()
    }
}

/// Point-in-time view of a queue returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Full dotted path.
    pub path: String,
    /// Guaranteed share.
    pub guaranteed: ResourceVector,
    /// Current usage.
    pub usage: ResourceVector,
    /// Whether usage is strictly below the guarantee.
    pub under_served: bool,
    /// Preemption policy.
    pub policy: PreemptionPolicy,
    /// Configured preemption delay.
    #[serde(with = "crate::config::duration_str")]
    pub preemption_delay: Duration,
    /// Whether the queue is draining.
    pub draining: bool,
    /// Running or terminating workloads in this subtree.
    pub running: usize,
    /// Pending requests in this subtree.
    pub pending: usize,
}
