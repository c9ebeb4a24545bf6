//! Arena-backed queue hierarchy.
//!
//! The [`QueueTree`] stores every [`QueueNode`] in a flat vector and links
//! parents and children by [`QueueId`]. Cloning the tree is a cheap snapshot
//! of the arena, and reconfiguration builds a fresh arena off to the side and
//! swaps it in only once it is complete.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info};

use crate::config::{QueueConfigDocument, QueueSettings};
use crate::error::{PreemptionError, Result};
use crate::queue::{PATH_SEPARATOR, QueueId, QueueNode, QueueStatus, ROOT_QUEUE};
use crate::resource::ResourceVector;

/// A hierarchy of queues rooted at `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTree {
    nodes: Vec<QueueNode>,
    index: HashMap<String, QueueId>,
}

impl Default for QueueTree {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueTree {
    /// Creates a tree holding only an unconfigured root queue.
    #[must_use]
    pub fn new() -> Self {
        Self::build(&QueueSettings::unconfigured(ROOT_QUEUE))
    }

    /// Builds a tree from a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not resolve.
    pub fn from_config(document: &QueueConfigDocument) -> Result<Self> {
        Ok(Self::build(&document.resolve()?))
    }

    fn build(settings: &QueueSettings) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        };
        tree.insert(None, settings, false);
        tree
    }

    fn insert(&mut self, parent: Option<QueueId>, settings: &QueueSettings, draining: bool) -> QueueId {
        let path = match parent {
            Some(parent) => format!("{}{PATH_SEPARATOR}{}", self.node(parent).path, settings.name),
            None => settings.name.clone(),
        };
        let id = QueueId(self.nodes.len());
        self.nodes.push(QueueNode {
            name: settings.name.clone(),
            path: path.clone(),
            parent,
            children: Vec::new(),
            guaranteed: settings.guaranteed.clone(),
            usage: ResourceVector::new(),
            policy: settings.policy,
            preemption_delay: settings.preemption_delay,
            draining,
        });
        self.index.insert(path, id);
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        for child in &settings.children {
            self.insert(Some(id), child, draining);
        }
        id
    }

    /// Returns the root queue id.
    #[must_use]
    pub const fn root(&self) -> QueueId {
        QueueId(0)
    }

    /// Returns the number of queues, including the root.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the queue with the given id.
    ///
    /// Ids must come from this tree.
    #[must_use]
    pub fn node(&self, id: QueueId) -> &QueueNode {
        &self.nodes[id.0]
    }

    /// Looks up a queue by full path.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::QueueNotFound`] if no queue has that path.
    pub fn lookup(&self, path: &str) -> Result<QueueId> {
        self.index
            .get(path)
            .copied()
            .ok_or_else(|| PreemptionError::QueueNotFound {
                path: path.to_string(),
            })
    }

    /// Returns the queue with the given path, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&QueueNode> {
        self.index.get(path).map(|id| self.node(*id))
    }

    /// Iterates over all queues in arena order (parents before children).
    pub fn iter(&self) -> impl Iterator<Item = (QueueId, &QueueNode)> {
        self.nodes.iter().enumerate().map(|(i, node)| (QueueId(i), node))
    }

    /// Returns the queue followed by each of its ancestors up to the root.
    pub fn self_and_ancestors(&self, id: QueueId) -> impl Iterator<Item = QueueId> + '_ {
        std::iter::successors(Some(id), move |q| self.node(*q).parent)
    }

    /// Returns the depth of a queue; the root has depth zero.
    #[must_use]
    pub fn depth(&self, id: QueueId) -> usize {
        self.self_and_ancestors(id).count() - 1
    }

    /// Returns true if `ancestor` is `id` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_or_self(&self, ancestor: QueueId, id: QueueId) -> bool {
        self.self_and_ancestors(id).any(|q| q == ancestor)
    }

    /// Returns the nearest queue that is an ancestor-or-self of both.
    #[must_use]
    pub fn lowest_common_ancestor(&self, a: QueueId, b: QueueId) -> QueueId {
        let chain: HashSet<QueueId> = self.self_and_ancestors(a).collect();
        self.self_and_ancestors(b)
            .find(|q| chain.contains(q))
            .unwrap_or_else(|| self.root())
    }

    /// Returns true if the queue has a guarantee and its usage is strictly
    /// below it on every guaranteed component.
    #[must_use]
    pub fn usage_below_guarantee(&self, id: QueueId) -> bool {
        let node = self.node(id);
        node.usage.strictly_below(&node.guaranteed)
    }

    /// Returns true if usage exceeds the guarantee on at least one
    /// component. Queues without a guarantee count as guaranteed zero.
    #[must_use]
    pub fn is_over_guarantee(&self, id: QueueId) -> bool {
        let node = self.node(id);
        node.usage.exceeds_any(&node.guaranteed)
    }

    /// Returns the nearest fenced ancestor-or-self, or the root.
    #[must_use]
    pub fn fence_scope(&self, id: QueueId) -> QueueId {
        self.self_and_ancestors(id)
            .find(|q| self.node(*q).policy.is_fence())
            .unwrap_or_else(|| self.root())
    }

    /// Returns true if preemption may flow between the two queues.
    #[must_use]
    pub fn mutually_visible(&self, a: QueueId, b: QueueId) -> bool {
        self.fence_scope(a) == self.fence_scope(b)
    }

    /// Returns the largest subtree in which both queues can see each other.
    ///
    /// When no fence separates them this is their lowest common ancestor.
    /// Otherwise the boundary collapses to the fence enclosing `a`.
    #[must_use]
    pub fn common_fence_ancestor(&self, a: QueueId, b: QueueId) -> QueueId {
        let scope = self.fence_scope(a);
        if scope == self.fence_scope(b) {
            self.lowest_common_ancestor(a, b)
        } else {
            scope
        }
    }

    /// Returns the leaf queues a request from `id` may take victims from,
    /// in tree order. The requesting queue itself is included when it is a
    /// leaf.
    #[must_use]
    pub fn preemption_scope(&self, id: QueueId) -> Vec<QueueId> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.fence_scope(id)];
        while let Some(q) = stack.pop() {
            let node = self.node(q);
            if node.is_leaf() {
                leaves.push(q);
                continue;
            }
            for &child in node.children.iter().rev() {
                if self.node(child).policy.is_fence() && !self.is_ancestor_or_self(child, id) {
                    continue;
                }
                stack.push(child);
            }
        }
        leaves
    }

    /// Adds usage to a leaf and every ancestor.
    pub fn allocate(&mut self, leaf: QueueId, resources: &ResourceVector) {
        let chain: Vec<QueueId> = self.self_and_ancestors(leaf).collect();
        for q in chain {
            let node = &mut self.nodes[q.0];
            node.usage = node.usage.add(resources);
        }
    }

    /// Removes usage from a leaf and every ancestor.
    ///
    /// Only what the leaf actually holds is removed, so parents stay equal
    /// to the sum of their children.
    pub fn release(&mut self, leaf: QueueId, resources: &ResourceVector) {
        let held = resources.capped_by(&self.node(leaf).usage);
        let chain: Vec<QueueId> = self.self_and_ancestors(leaf).collect();
        for q in chain {
            let node = &mut self.nodes[q.0];
            node.usage = node.usage.saturating_sub(&held);
        }
    }

    /// Checks that every parent's usage equals the sum of its children.
    #[must_use]
    pub fn usage_consistent(&self) -> bool {
        self.nodes.iter().filter(|n| !n.is_leaf()).all(|node| {
            let sum = node
                .children
                .iter()
                .fold(ResourceVector::new(), |acc, child| acc.add(&self.node(*child).usage));
            sum.fits_within(&node.usage) && node.usage.fits_within(&sum)
        })
    }

    /// Returns the status of a queue. Workload counts are left at zero; the
    /// scheduler fills them in.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::QueueNotFound`] for unknown paths.
    pub fn status(&self, path: &str) -> Result<QueueStatus> {
        let id = self.lookup(path)?;
        let node = self.node(id);
        Ok(QueueStatus {
            path: node.path.clone(),
            guaranteed: node.guaranteed.clone(),
            usage: node.usage.clone(),
            under_served: self.usage_below_guarantee(id),
            policy: node.policy,
            preemption_delay: node.preemption_delay,
            draining: node.draining,
            running: 0,
            pending: 0,
        })
    }

    /// Applies a configuration document in place, preserving the usage of
    /// every leaf that holds resources.
    ///
    /// # Errors
    ///
    /// Returns an error and leaves the tree untouched if the document is
    /// invalid or conflicts with current usage.
    pub fn apply_config(&mut self, document: &QueueConfigDocument) -> Result<()> {
        let occupied: BTreeSet<String> = self
            .nodes
            .iter()
            .filter(|n| n.is_leaf() && !n.usage.is_zero())
            .map(|n| n.path.clone())
            .collect();
        let next = self.reconfigure(document, &occupied)?;
        *self = next;
        Ok(())
    }

    /// Builds the tree that results from applying `document`, carrying over
    /// the usage of the `occupied` leaf queues.
    ///
    /// Occupied queues missing from the document are kept as draining
    /// queues. The current tree is not modified.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is invalid, or if an occupied leaf
    /// would have to become a parent queue.
    pub fn reconfigure(&self, document: &QueueConfigDocument, occupied: &BTreeSet<String>) -> Result<Self> {
        let settings = document.resolve()?;
        let next = Self::assemble(&settings, &self.carried_usage(occupied))?;
        info!(
            queues = next.queue_count(),
            draining = next.nodes.iter().filter(|n| n.draining).count(),
            "queue configuration resolved"
        );
        Ok(next)
    }

    /// Removes draining queues that no longer hold workloads.
    ///
    /// Returns true if anything was removed.
    pub fn prune_drained(&mut self, occupied: &BTreeSet<String>) -> bool {
        let stale = self
            .nodes
            .iter()
            .any(|n| n.draining && n.is_leaf() && !occupied.contains(&n.path));
        if !stale {
            return false;
        }
        let settings = self.settings_snapshot(self.root());
        match Self::assemble(&settings, &self.carried_usage(occupied)) {
            Ok(next) => {
                debug!(
                    before = self.queue_count(),
                    after = next.queue_count(),
                    "pruned drained queues"
                );
                *self = next;
                true
            }
            Err(_) => false,
        }
    }

    fn carried_usage(&self, occupied: &BTreeSet<String>) -> Vec<(String, ResourceVector)> {
        occupied
            .iter()
            .map(|path| {
                let usage = self.get(path).map(|n| n.usage.clone()).unwrap_or_default();
                (path.clone(), usage)
            })
            .collect()
    }

    fn settings_snapshot(&self, id: QueueId) -> QueueSettings {
        let node = self.node(id);
        QueueSettings {
            name: node.name.clone(),
            guaranteed: node.guaranteed.clone(),
            policy: node.policy,
            preemption_delay: node.preemption_delay,
            children: node
                .children
                .iter()
                .filter(|child| !self.node(**child).draining)
                .map(|child| self.settings_snapshot(*child))
                .collect(),
        }
    }

    fn assemble(settings: &QueueSettings, carried: &[(String, ResourceVector)]) -> Result<Self> {
        let mut tree = Self::build(settings);
        for (path, usage) in carried {
            let id = match tree.index.get(path) {
                Some(id) => *id,
                None => tree.insert_draining(path)?,
            };
            if !tree.node(id).is_leaf() {
                return Err(PreemptionError::InvalidConfig {
                    reason: format!("queue {path} holds workloads and cannot become a parent queue"),
                });
            }
            tree.allocate(id, usage);
        }
        Ok(tree)
    }

    fn insert_draining(&mut self, path: &str) -> Result<QueueId> {
        let mut segments = path.split(PATH_SEPARATOR);
        if segments.next() != Some(ROOT_QUEUE) {
            return Err(PreemptionError::QueueNotFound {
                path: path.to_string(),
            });
        }
        let mut current = self.root();
        for segment in segments {
            let child_path = format!("{}{PATH_SEPARATOR}{segment}", self.node(current).path);
            if let Some(id) = self.index.get(&child_path) {
                current = *id;
                continue;
            }
            let parent = self.node(current);
            if parent.is_leaf() && !parent.draining {
                return Err(PreemptionError::InvalidConfig {
                    reason: format!(
                        "leaf queue {} cannot keep draining queue {path} underneath it",
                        parent.path
                    ),
                });
            }
            debug!(queue = %child_path, "keeping removed queue as draining");
            current = self.insert(Some(current), &QueueSettings::unconfigured(segment), true);
        }
        Ok(current)
    }
}
