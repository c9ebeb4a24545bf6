//! Victim selection.
//!
//! The [`VictimSelector`] answers one question: which running workloads, if
//! any, should be evicted so that an under-served queue can place a request?
//!
//! Selection rules:
//! - Only queues inside the requester's fence scope are considered.
//! - Donors are leaf queues over their guarantee on a required resource. The
//!   donor furthest over is drained first, and within a donor the most
//!   recently started workload goes first.
//! - A victim is skipped if removing it would take its queue, or any ancestor
//!   below the common ancestor with the requester, under its guarantee.
//! - Workloads already terminating count as freed and are never picked again.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::PreemptionConfig;
use crate::queue::QueueId;
use crate::resource::ResourceVector;
use crate::tree::QueueTree;
use crate::types::{Workload, WorkloadState};

/// A request for preemption on behalf of one pending workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreemptionRequest {
    /// Leaf queue of the waiting workload.
    pub queue: String,
    /// Resources that must be freed.
    pub required: ResourceVector,
    /// When the workload started waiting.
    pub waiting_since: DateTime<Utc>,
}

impl PreemptionRequest {
    /// Creates a new preemption request.
    #[must_use]
    pub fn new(queue: impl Into<String>, required: ResourceVector, waiting_since: DateTime<Utc>) -> Self {
        Self {
            queue: queue.into(),
            required,
            waiting_since,
        }
    }
}

/// Result of finding victims for preemption.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VictimSet {
    /// Workloads selected for preemption, in selection order.
    pub victims: Vec<Workload>,
    /// Total resources that would be freed.
    pub total_freed: ResourceVector,
    /// Whether the freed resources satisfy the request.
    pub satisfies_request: bool,
}

impl VictimSet {
    /// Creates an empty victim set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a victim to the set.
    pub fn add_victim(&mut self, victim: Workload) {
        self.total_freed = self.total_freed.add(&victim.resources);
        self.victims.push(victim);
    }

    /// Returns the number of victims.
    #[must_use]
    pub fn len(&self) -> usize {
        self.victims.len()
    }

    /// Returns true if there are no victims.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }
}

/// Selects eviction victims from a snapshot of the queue tree.
#[derive(Debug, Clone, Default)]
pub struct VictimSelector {
    config: PreemptionConfig,
}

impl VictimSelector {
    /// Creates a selector with the given configuration.
    #[must_use]
    pub const fn new(config: PreemptionConfig) -> Self {
        Self { config }
    }

    /// Returns the current configuration.
    #[must_use]
    pub const fn config(&self) -> &PreemptionConfig {
        &self.config
    }

    /// Returns true if a request from `queue` may trigger preemption at
    /// `now`: preemption is enabled, the queue allows it, is under-served,
    /// and the request has waited at least the queue's preemption delay.
    #[must_use]
    pub fn is_eligible(&self, tree: &QueueTree, queue: QueueId, waiting_since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return false;
        }
        let node = tree.node(queue);
        if !node.policy.allows_preemption() || !tree.usage_below_guarantee(queue) {
            return false;
        }
        let waited = now
            .signed_duration_since(waiting_since)
            .to_std()
            .unwrap_or_default();
        waited >= node.preemption_delay
    }

    /// Finds victims whose eviction frees `request.required`.
    ///
    /// An empty set means "wait"; it is not an error. The result depends
    /// only on the snapshot, never on iteration order of `workloads`.
    #[must_use]
    pub fn find_victims<'a, I>(&self, tree: &QueueTree, workloads: I, request: &PreemptionRequest, now: DateTime<Utc>) -> VictimSet
    where
        I: IntoIterator<Item = &'a Workload>,
    {
        let Ok(requester) = tree.lookup(&request.queue) else {
            return VictimSet::empty();
        };
        if request.required.is_zero() || !self.is_eligible(tree, requester, request.waiting_since, now) {
            return VictimSet::empty();
        }

        let scope: HashSet<QueueId> = tree
            .preemption_scope(requester)
            .into_iter()
            .filter(|q| *q != requester)
            .collect();
        if scope.is_empty() {
            debug!(queue = %request.queue, "No queues visible for preemption");
            return VictimSet::empty();
        }

        let mut effective: Vec<ResourceVector> = tree.iter().map(|(_, node)| node.usage.clone()).collect();
        let mut candidates: BTreeMap<QueueId, Vec<&Workload>> = BTreeMap::new();
        for workload in workloads {
            let Ok(queue) = tree.lookup(&workload.queue) else {
                continue;
            };
            match workload.state {
                WorkloadState::Terminating => {
                    subtract_along_chain(tree, &mut effective, queue, &workload.resources);
                }
                WorkloadState::Running if scope.contains(&queue) && self.is_candidate(workload, request, now) => {
                    candidates.entry(queue).or_default().push(workload);
                }
                _ => {}
            }
        }
        for list in candidates.values_mut() {
            list.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        }

        let names: Vec<&str> = request
            .required
            .iter()
            .filter(|(_, quantity)| *quantity > 0)
            .map(|(name, _)| name)
            .collect();

        let mut set = VictimSet::empty();
        loop {
            if request.required.fits_within(&set.total_freed) {
                set.satisfies_request = true;
                break;
            }
            if set.len() >= self.config.max_victims_per_operation {
                debug!(queue = %request.queue, victims = set.len(), "Victim limit reached");
                break;
            }

            let donor = candidates
                .iter()
                .filter(|(_, list)| !list.is_empty())
                .map(|(queue, _)| {
                    let node = tree.node(*queue);
                    let delta = effective[queue.index()].excess_over(&node.guaranteed).total_of(names.iter().copied());
                    (*queue, delta)
                })
                .filter(|(_, delta)| *delta > 0)
                .max_by_key(|(queue, delta)| (*delta, Reverse(tree.node(*queue).path.as_str())))
                .map(|(queue, _)| queue);
            let Some(donor) = donor else {
                break;
            };

            let boundary = tree.lowest_common_ancestor(donor, requester);
            let list = candidates.entry(donor).or_default();
            let pick = list
                .iter()
                .position(|w| keeps_guarantees(tree, &effective, donor, boundary, &w.resources));
            match pick {
                Some(index) => {
                    let victim = list.remove(index);
                    subtract_along_chain(tree, &mut effective, donor, &victim.resources);
                    debug!(
                        workload_id = %victim.id,
                        queue = %victim.queue,
                        "Selected preemption victim"
                    );
                    set.add_victim(victim.clone());
                }
                None => list.clear(),
            }
        }

        debug!(
            queue = %request.queue,
            required = %request.required,
            victims = set.len(),
            freed = %set.total_freed,
            satisfies = set.satisfies_request,
            "Victim search finished"
        );
        set
    }

    fn is_candidate(&self, workload: &Workload, request: &PreemptionRequest, now: DateTime<Utc>) -> bool {
        workload.resources.overlaps(&request.required)
            && workload
                .running_duration(now)
                .is_some_and(|d| d >= self.config.min_running_time)
    }
}

fn subtract_along_chain(tree: &QueueTree, effective: &mut [ResourceVector], leaf: QueueId, resources: &ResourceVector) {
    for q in tree.self_and_ancestors(leaf) {
        let usage = &mut effective[q.index()];
        *usage = usage.saturating_sub(resources);
    }
}

fn keeps_guarantees(
    tree: &QueueTree,
    effective: &[ResourceVector],
    donor: QueueId,
    boundary: QueueId,
    resources: &ResourceVector,
) -> bool {
    tree.self_and_ancestors(donor)
        .take_while(|q| *q != boundary)
        .all(|q| {
            let guaranteed = &tree.node(q).guaranteed;
            let usage = &effective[q.index()];
            resources
                .iter()
                .filter(|(_, amount)| *amount > 0)
                .all(|(name, amount)| usage.get(name).saturating_sub(amount) >= guaranteed.get(name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, QueueConfigDocument};
    use crate::types::WorkloadId;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .unwrap_or_default()
    }

    fn mem(bytes: u64) -> ResourceVector {
        ResourceVector::new().with_memory(bytes)
    }

    fn tree_from(root: QueueConfig) -> QueueTree {
        QueueTree::from_config(&QueueConfigDocument::new(root)).unwrap_or_default()
    }

    fn sandboxes(guarantee: &str, sandbox2_policy: &str) -> QueueTree {
        tree_from(
            QueueConfig::new("root")
                .with_child(
                    QueueConfig::new("sandbox1")
                        .with_guaranteed("memory", guarantee)
                        .with_preemption_delay("1s"),
                )
                .with_child(
                    QueueConfig::new("sandbox2")
                        .with_guaranteed("memory", guarantee)
                        .with_preemption_delay("1s")
                        .with_preemption_policy(sandbox2_policy),
                ),
        )
    }

    fn running(tree: &mut QueueTree, id: &str, queue: &str, bytes: u64, started: i64) -> Workload {
        let mut workload = Workload::pending(WorkloadId::new(id), queue, mem(bytes), Duration::from_secs(30), at(0));
        workload.state = WorkloadState::Running;
        workload.started_at = Some(at(started));
        if let Ok(leaf) = tree.lookup(queue) {
            tree.allocate(leaf, &workload.resources);
        }
        workload
    }

    fn ids(set: &VictimSet) -> Vec<&str> {
        set.victims.iter().map(|w| w.id.as_str()).collect()
    }

    fn selector() -> VictimSelector {
        VictimSelector::new(PreemptionConfig::default())
    }

    #[test]
    fn over_guarantee_sibling_loses_newest_workload() {
        let mut tree = sandboxes("100", "normal");
        let workloads = vec![
            running(&mut tree, "s1-a", "root.sandbox1", 100, 0),
            running(&mut tree, "s1-b", "root.sandbox1", 100, 1),
            running(&mut tree, "s1-c", "root.sandbox1", 100, 2),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(100), at(10));

        let set = selector().find_victims(&tree, &workloads, &request, at(11));
        assert!(set.satisfies_request);
        assert_eq!(ids(&set), vec!["s1-c"]);
        assert_eq!(set.total_freed.get("memory"), 100);
    }

    #[test]
    fn waits_for_preemption_delay() {
        let mut tree = sandboxes("100", "normal");
        let workloads = vec![
            running(&mut tree, "s1-a", "root.sandbox1", 150, 0),
            running(&mut tree, "s1-b", "root.sandbox1", 150, 1),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(100), at(10));

        assert!(selector().find_victims(&tree, &workloads, &request, at(10)).is_empty());
        assert!(!selector().find_victims(&tree, &workloads, &request, at(11)).is_empty());
    }

    #[test]
    fn donor_at_guarantee_is_left_alone() {
        let mut tree = sandboxes("300", "normal");
        let workloads = vec![
            running(&mut tree, "s1-a", "root.sandbox1", 100, 0),
            running(&mut tree, "s1-b", "root.sandbox1", 100, 1),
            running(&mut tree, "s1-c", "root.sandbox1", 100, 2),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(100), at(0));

        let set = selector().find_victims(&tree, &workloads, &request, at(60));
        assert!(set.is_empty());
        assert!(!set.satisfies_request);
    }

    #[test]
    fn fenced_requester_sees_no_donors() {
        let mut tree = sandboxes("100", "fence");
        let workloads = vec![
            running(&mut tree, "s1-a", "root.sandbox1", 100, 0),
            running(&mut tree, "s1-b", "root.sandbox1", 100, 1),
            running(&mut tree, "s1-c", "root.sandbox1", 100, 2),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(100), at(0));
        assert!(selector().find_victims(&tree, &workloads, &request, at(60)).is_empty());
    }

    #[test]
    fn fenced_donor_is_invisible() {
        let mut tree = tree_from(
            QueueConfig::new("root")
                .with_child(QueueConfig::new("walled").with_preemption_policy("fence"))
                .with_child(QueueConfig::new("hungry").with_guaranteed("memory", "100").with_preemption_delay("0s")),
        );
        let workloads = vec![running(&mut tree, "w-a", "root.walled", 500, 0)];
        let request = PreemptionRequest::new("root.hungry", mem(100), at(0));
        assert!(selector().find_victims(&tree, &workloads, &request, at(1)).is_empty());
    }

    #[test]
    fn requester_not_under_served_never_preempts() {
        let mut tree = sandboxes("100", "normal");
        let workloads = vec![
            running(&mut tree, "s1-a", "root.sandbox1", 200, 0),
            running(&mut tree, "s2-a", "root.sandbox2", 100, 0),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(50), at(0));
        assert!(selector().find_victims(&tree, &workloads, &request, at(60)).is_empty());
    }

    #[test]
    fn disabled_policy_and_disabled_engine() {
        let mut tree = sandboxes("100", "disabled");
        let workloads = vec![running(&mut tree, "s1-a", "root.sandbox1", 300, 0)];
        let request = PreemptionRequest::new("root.sandbox2", mem(100), at(0));
        assert!(selector().find_victims(&tree, &workloads, &request, at(60)).is_empty());

        let mut tree = sandboxes("100", "normal");
        let workloads = vec![running(&mut tree, "s1-a", "root.sandbox1", 300, 0)];
        let off = VictimSelector::new(PreemptionConfig::default().with_enabled(false));
        assert!(off.find_victims(&tree, &workloads, &request, at(60)).is_empty());
    }

    #[test]
    fn victim_that_would_break_guarantee_is_skipped() {
        let mut tree = sandboxes("100", "normal");
        // Over by 20: the 60 workload would drop sandbox1 to 60 < 100.
        let workloads = vec![
            running(&mut tree, "s1-small", "root.sandbox1", 20, 0),
            running(&mut tree, "s1-big", "root.sandbox1", 60, 1),
            running(&mut tree, "s1-mid", "root.sandbox1", 40, 0),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(20), at(0));

        let set = selector().find_victims(&tree, &workloads, &request, at(5));
        assert_eq!(ids(&set), vec!["s1-small"]);
        assert!(set.satisfies_request);
    }

    #[test]
    fn insufficient_donors_report_unsatisfied() {
        let mut tree = sandboxes("100", "normal");
        let workloads = vec![
            running(&mut tree, "s1-a", "root.sandbox1", 100, 0),
            running(&mut tree, "s1-b", "root.sandbox1", 50, 1),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(100), at(0));

        let set = selector().find_victims(&tree, &workloads, &request, at(5));
        assert_eq!(ids(&set), vec!["s1-b"]);
        assert!(!set.satisfies_request);
    }

    #[test]
    fn terminating_workloads_count_as_freed() {
        let mut tree = sandboxes("100", "normal");
        let mut leaving = running(&mut tree, "s1-a", "root.sandbox1", 100, 0);
        leaving.state = WorkloadState::Terminating;
        let workloads = vec![
            leaving,
            running(&mut tree, "s1-b", "root.sandbox1", 100, 1),
            running(&mut tree, "s1-c", "root.sandbox1", 100, 2),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(200), at(0));

        // Effective usage is 200, so only one more victim can go.
        let set = selector().find_victims(&tree, &workloads, &request, at(5));
        assert_eq!(ids(&set), vec!["s1-c"]);
        assert!(!set.satisfies_request);
    }

    #[test]
    fn most_over_donor_goes_first() {
        let mut tree = tree_from(
            QueueConfig::new("root")
                .with_child(QueueConfig::new("a").with_guaranteed("memory", "100"))
                .with_child(QueueConfig::new("b").with_guaranteed("memory", "100"))
                .with_child(QueueConfig::new("c").with_guaranteed("memory", "100").with_preemption_delay("0s")),
        );
        let workloads = vec![
            running(&mut tree, "a-1", "root.a", 100, 0),
            running(&mut tree, "a-2", "root.a", 50, 1),
            running(&mut tree, "b-1", "root.b", 100, 0),
            running(&mut tree, "b-2", "root.b", 80, 1),
        ];
        let request = PreemptionRequest::new("root.c", mem(100), at(0));

        let set = selector().find_victims(&tree, &workloads, &request, at(1));
        assert_eq!(ids(&set), vec!["b-2", "a-2"]);
        assert!(set.satisfies_request);
    }

    #[test]
    fn equal_deltas_break_ties_by_path() {
        let mut tree = tree_from(
            QueueConfig::new("root")
                .with_child(QueueConfig::new("b"))
                .with_child(QueueConfig::new("a"))
                .with_child(QueueConfig::new("c").with_guaranteed("memory", "10").with_preemption_delay("0s")),
        );
        let workloads = vec![
            running(&mut tree, "b-1", "root.b", 10, 0),
            running(&mut tree, "a-1", "root.a", 10, 0),
        ];
        let request = PreemptionRequest::new("root.c", mem(10), at(0));
        let set = selector().find_victims(&tree, &workloads, &request, at(1));
        assert_eq!(ids(&set), vec!["a-1"]);
    }

    #[test]
    fn ancestor_guarantee_is_protected() {
        let mut tree = tree_from(
            QueueConfig::new("root")
                .with_child(
                    QueueConfig::new("team")
                        .with_guaranteed("memory", "100")
                        .with_child(QueueConfig::new("x"))
                        .with_child(QueueConfig::new("y")),
                )
                .with_child(QueueConfig::new("other").with_guaranteed("memory", "100").with_preemption_delay("0s")),
        );
        // team.x has no guarantee but team as a whole sits at its guarantee.
        let workloads = vec![
            running(&mut tree, "x-1", "root.team.x", 50, 0),
            running(&mut tree, "y-1", "root.team.y", 50, 0),
        ];
        let request = PreemptionRequest::new("root.other", mem(50), at(0));
        assert!(selector().find_victims(&tree, &workloads, &request, at(1)).is_empty());

        // Inside the team, the sibling boundary stops at team: x may donate to y.
        let request = PreemptionRequest::new("root.team.y", mem(50), at(0));
        let mut tree = tree_from(
            QueueConfig::new("root").with_child(
                QueueConfig::new("team")
                    .with_guaranteed("memory", "100")
                    .with_child(QueueConfig::new("x"))
                    .with_child(QueueConfig::new("y").with_guaranteed("memory", "50").with_preemption_delay("0s")),
            ),
        );
        let workloads = vec![running(&mut tree, "x-1", "root.team.x", 100, 0)];
        let set = selector().find_victims(&tree, &workloads, &request, at(1));
        assert_eq!(ids(&set), vec!["x-1"]);
    }

    #[test]
    fn min_running_time_protects_fresh_workloads() {
        let mut tree = sandboxes("100", "normal");
        let workloads = vec![
            running(&mut tree, "old", "root.sandbox1", 100, 0),
            running(&mut tree, "fresh", "root.sandbox1", 100, 58),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(100), at(0));
        let selector = VictimSelector::new(PreemptionConfig::default().with_min_running_time(Duration::from_secs(10)));

        let set = selector.find_victims(&tree, &workloads, &request, at(60));
        assert_eq!(ids(&set), vec!["old"]);
    }

    #[test]
    fn max_victims_caps_selection() {
        let mut tree = sandboxes("10", "normal");
        let workloads: Vec<Workload> = (0..5)
            .map(|i| running(&mut tree, &format!("s1-{i}"), "root.sandbox1", 10, i))
            .collect();
        let request = PreemptionRequest::new("root.sandbox2", mem(30), at(0));
        let selector = VictimSelector::new(PreemptionConfig::default().with_max_victims(2));

        let set = selector.find_victims(&tree, &workloads, &request, at(60));
        assert_eq!(set.len(), 2);
        assert!(!set.satisfies_request);
    }

    #[test]
    fn only_workloads_holding_required_resources_are_candidates() {
        let mut tree = sandboxes("100", "normal");
        let mut cpu_only = running(&mut tree, "cpu", "root.sandbox1", 0, 5);
        cpu_only.resources = ResourceVector::new().with_vcore(1_000);
        let workloads = vec![
            cpu_only,
            running(&mut tree, "mem", "root.sandbox1", 50, 0),
            running(&mut tree, "base", "root.sandbox1", 100, -10),
        ];
        let request = PreemptionRequest::new("root.sandbox2", mem(50), at(0));

        let set = selector().find_victims(&tree, &workloads, &request, at(60));
        assert_eq!(ids(&set), vec!["mem"]);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        /// root
        /// ├── left (guarantee g0)
        /// │   ├── l1 (g1)
        /// │   └── l2
        /// ├── fenced (fence)
        /// │   └── f1
        /// └── right (g2)
        fn random_tree(g: [u64; 3]) -> QueueTree {
            tree_from(
                QueueConfig::new("root")
                    .with_child(
                        QueueConfig::new("left")
                            .with_guaranteed("memory", g[0].to_string())
                            .with_child(QueueConfig::new("l1").with_guaranteed("memory", g[1].to_string()))
                            .with_child(QueueConfig::new("l2")),
                    )
                    .with_child(
                        QueueConfig::new("fenced")
                            .with_preemption_policy("fence")
                            .with_child(QueueConfig::new("f1")),
                    )
                    .with_child(
                        QueueConfig::new("right")
                            .with_guaranteed("memory", g[2].to_string())
                            .with_preemption_delay("0s"),
                    ),
            )
        }

        const LEAVES: [&str; 4] = ["root.left.l1", "root.left.l2", "root.fenced.f1", "root.right"];

        fn scenario() -> impl Strategy<Value = ([u64; 3], Vec<(usize, u64, i64)>, u64)> {
            (
                [1u64..500, 1u64..500, 1u64..500],
                prop::collection::vec((0usize..3, 1u64..200, 0i64..100), 0..12),
                1u64..400,
            )
        }

        proptest! {
            #[test]
            fn donors_keep_their_guarantee((g, placed, need) in scenario()) {
                let mut tree = random_tree(g);
                let workloads: Vec<Workload> = placed
                    .iter()
                    .enumerate()
                    .map(|(i, (leaf, bytes, start))| running(&mut tree, &format!("w{i}"), LEAVES[*leaf], *bytes, *start))
                    .collect();
                let request = PreemptionRequest::new("root.right", mem(need), at(0));
                let set = selector().find_victims(&tree, &workloads, &request, at(1_000));

                let mut after = tree.clone();
                for victim in &set.victims {
                    if let Ok(leaf) = after.lookup(&victim.queue) {
                        after.release(leaf, &victim.resources);
                    }
                }
                let requester = after.lookup("root.right").unwrap_or_else(|_| after.root());
                for victim in &set.victims {
                    let leaf = after.lookup(&victim.queue).unwrap_or_else(|_| after.root());
                    let boundary = after.lowest_common_ancestor(leaf, requester);
                    for q in after.self_and_ancestors(leaf).take_while(|q| *q != boundary) {
                        let node = after.node(q);
                        let before = tree.node(q);
                        let guaranteed = node.guaranteed.get("memory");
                        prop_assert!(
                            node.usage.get("memory") >= guaranteed.min(before.usage.get("memory")),
                            "{} dropped below its guarantee", node.path
                        );
                    }
                }
            }

            #[test]
            fn fence_is_never_crossed((g, placed, need) in scenario()) {
                let mut tree = random_tree(g);
                let mut workloads: Vec<Workload> = placed
                    .iter()
                    .enumerate()
                    .map(|(i, (leaf, bytes, start))| running(&mut tree, &format!("w{i}"), LEAVES[*leaf], *bytes, *start))
                    .collect();
                workloads.push(running(&mut tree, "walled", "root.fenced.f1", 300, 0));

                let outside = PreemptionRequest::new("root.right", mem(need), at(0));
                let set = selector().find_victims(&tree, &workloads, &outside, at(1_000));
                prop_assert!(set.victims.iter().all(|w| !w.queue.starts_with("root.fenced")));
            }

            #[test]
            fn selection_is_deterministic((g, placed, need) in scenario()) {
                let mut tree = random_tree(g);
                let workloads: Vec<Workload> = placed
                    .iter()
                    .enumerate()
                    .map(|(i, (leaf, bytes, start))| running(&mut tree, &format!("w{i}"), LEAVES[*leaf], *bytes, *start))
                    .collect();
                let mut reversed = workloads.clone();
                reversed.reverse();
                let request = PreemptionRequest::new("root.right", mem(need), at(0));

                let first = selector().find_victims(&tree, &workloads, &request, at(1_000));
                let second = selector().find_victims(&tree, &reversed, &request, at(1_000));
                prop_assert_eq!(first, second);
            }
        }
    }
}
