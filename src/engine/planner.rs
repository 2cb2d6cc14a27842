//! # Planner
//!
//! Collects systems, tags and run conditions, and turns them into an
//! execution plan.
//!
//! ## Tags
//! A [`Tag`] is a named ordering token. Systems and tags can be tagged with
//! other tags, and ordered `before`/`after` tags. Tag identity is the address
//! of the `static` it lives in, so two tags with the same name never collide:
//!
//! ```
//! use cubos_ecs::Tag;
//!
//! static PHYSICS: Tag = Tag::new("physics");
//! static RENDER: Tag = Tag::new("physics");
//!
//! assert_ne!(PHYSICS.id(), RENDER.id());
//! ```
//!
//! ## Building
//! [`Planner::build`] resolves the plan in four steps:
//! 1. every tag becomes a pair of nodes, `begin` and `end`, with its members
//!    and sub-tags nested between them,
//! 2. paths between systems through tag nodes become system edges, so a tag
//!    orders systems even when nothing is tagged with it,
//! 3. a cycle is reported as [`ScheduleError::Cycle`],
//! 4. systems are ordered topologically (ties keep registration order) and
//!    packed into stages by [`make_stages`].

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, error, warn};

use crate::engine::commands::{Command, CommandQueue};
use crate::engine::error::ScheduleError;
use crate::engine::plugins::PluginSender;
use crate::engine::scheduler::{make_stages, Schedule, Stage};
use crate::engine::systems::{BoxedSystem, SystemContext};
use crate::engine::types::SystemId;
use crate::engine::world::World;


/// A named ordering and grouping token.
///
/// Tags must live in `static`s; see the [module docs](self).
#[derive(Debug)]
pub struct Tag {
    name: &'static str,
}

impl Tag {
    /// Creates a tag.
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// Returns the tag's name.
    pub fn name(&self) -> &'static str { self.name }

    /// Returns the tag's identity.
    pub fn id(&'static self) -> TagId {
        TagId(self as *const Tag as usize)
    }
}

/// Identity of a [`Tag`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TagId(usize);

/// Handle of a run condition.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ConditionId(pub usize);

/// Placement of a system or tag in the plan.

#[derive(Clone, Debug, Default)]
pub struct Constraints {
    /// Tags the node belongs to.
    pub tags: Vec<TagId>,

    /// Tags whose members must run after the node.
    pub before: Vec<TagId>,

    /// Tags whose members must run before the node.
    pub after: Vec<TagId>,

    /// Conditions guarding the node.
    pub conditions: Vec<ConditionId>,
}

struct TagNode {
    name: &'static str,
    constraints: Constraints,
}

pub(crate) struct SystemNode {
    pub(crate) system: BoxedSystem,
    pub(crate) commands: CommandQueue,
    constraints: Constraints,
}

struct ConditionNode {
    system: BoxedSystem<bool>,
    commands: CommandQueue,
}

/// Systems, tags and conditions of one schedule.

#[derive(Default)]
pub struct Planner {
    tags: HashMap<TagId, TagNode>,
    systems: Vec<Option<SystemNode>>,
    conditions: Vec<Option<ConditionNode>>,
}

impl Planner {
    /// Creates an empty planner.
    pub fn new() -> Self { Self::default() }

    // ─────────────────────────────────────────────────────────────────────
    // Tags
    // ─────────────────────────────────────────────────────────────────────

    /// Adds `tag` if it isn't known yet and returns its identity.
    pub fn add_tag(&mut self, tag: &'static Tag) -> TagId {
        let id = tag.id();
        if !self.tags.contains_key(&id) {
            if self.tags.values().any(|node| node.name == tag.name()) {
                warn!(tag = tag.name(), "another tag already uses this name");
            }
            self.tags.insert(id, TagNode { name: tag.name(), constraints: Constraints::default() });
        }
        id
    }

    /// Returns `true` if the tag is known.
    pub fn has_tag(&self, id: TagId) -> bool {
        self.tags.contains_key(&id)
    }

    /// Returns the constraints of a tag, to be edited in place.
    pub fn tag_constraints_mut(&mut self, id: TagId) -> Option<&mut Constraints> {
        self.tags.get_mut(&id).map(|node| &mut node.constraints)
    }

    /// Removes a tag and its conditions. Members of the tag stay registered.
    pub fn remove_tag(&mut self, id: TagId) -> bool {
        let Some(node) = self.tags.remove(&id) else { return false };
        for condition in node.constraints.conditions {
            self.remove_condition(condition);
        }
        debug!(tag = node.name, "removed tag");
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Conditions
    // ─────────────────────────────────────────────────────────────────────

    /// Adds a run condition.
    pub fn add_condition(&mut self, system: BoxedSystem<bool>) -> ConditionId {
        let id = ConditionId(self.conditions.len());
        self.conditions.push(Some(ConditionNode { system, commands: CommandQueue::new() }));
        id
    }

    /// Removes a run condition. Nodes still naming it run unguarded by it.
    pub fn remove_condition(&mut self, id: ConditionId) -> bool {
        self.conditions.get_mut(id.0).and_then(Option::take).is_some()
    }

    /// Runs a condition. Unknown conditions pass.
    pub(crate) fn evaluate(&mut self, id: ConditionId, world: &World, plugins: &PluginSender) -> bool {
        let Some(node) = self.conditions.get_mut(id.0).and_then(Option::as_mut) else {
            return true;
        };
        let ctx = SystemContext { world, commands: &node.commands, plugins, trigger: None };
        // SAFETY: conditions run alone, between stages.
        unsafe { node.system.run(ctx) }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Systems
    // ─────────────────────────────────────────────────────────────────────

    /// Adds a system.
    pub fn add_system(&mut self, system: BoxedSystem, constraints: Constraints) -> SystemId {
        let id = SystemId(self.systems.len());
        debug!(system = system.name(), "added system");
        self.systems.push(Some(SystemNode { system, commands: CommandQueue::new(), constraints }));
        id
    }

    /// Removes a system and the conditions registered for it alone.
    pub fn remove_system(&mut self, id: SystemId) -> bool {
        let Some(node) = self.systems.get_mut(id.0).and_then(Option::take) else {
            return false;
        };
        for condition in node.constraints.conditions {
            self.remove_condition(condition);
        }
        debug!(system = node.system.name(), "removed system");
        true
    }

    /// Removes every system, keeping tags and their conditions.
    pub fn clear_systems(&mut self) {
        let ids: Vec<SystemId> = self.system_ids().collect();
        for id in ids {
            self.remove_system(id);
        }
    }

    /// Returns the name of a system.
    pub fn system_name(&self, id: SystemId) -> Option<&str> {
        self.node(id).map(|node| node.system.name())
    }

    /// Returns the registered systems, in registration order.
    pub fn system_ids(&self) -> impl Iterator<Item = SystemId> + '_ {
        self.systems.iter().enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| SystemId(index))
    }

    /// Returns the number of registered systems.
    pub fn len(&self) -> usize { self.system_ids().count() }

    /// Returns `true` if no system is registered.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn node(&self, id: SystemId) -> Option<&SystemNode> {
        self.systems.get(id.0).and_then(Option::as_ref)
    }

    /// Returns the nodes of `ids` that still exist, in registration order.
    pub(crate) fn nodes_mut(&mut self, ids: &[SystemId]) -> Vec<&mut SystemNode> {
        let mut wanted = ids.to_vec();
        wanted.sort_unstable();
        self.systems.iter_mut().enumerate()
            .filter(|(index, _)| wanted.binary_search(&SystemId(*index)).is_ok())
            .filter_map(|(_, slot)| slot.as_mut())
            .collect()
    }

    /// Drains the commands queued by a system.
    pub(crate) fn take_commands(&self, id: SystemId) -> Vec<Command> {
        self.node(id).map(|node| node.commands.take()).unwrap_or_default()
    }

    /// Drains the commands queued by every condition.
    pub(crate) fn take_condition_commands(&self) -> Vec<Command> {
        self.conditions.iter().flatten().flat_map(|node| node.commands.take()).collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Building
    // ─────────────────────────────────────────────────────────────────────

    /// Builds the execution plan of the registered systems.
    ///
    /// ## Errors
    /// [`ScheduleError::Cycle`] if the ordering constraints are cyclic.
    pub fn build(&self) -> Result<Schedule, ScheduleError> {
        let ids: Vec<SystemId> = self.system_ids().collect();
        let nodes: Vec<&SystemNode> = ids.iter().filter_map(|&id| self.node(id)).collect();
        let count = nodes.len();

        let mut conditions = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            let mut merged = node.constraints.conditions.clone();
            for tag in self.membership(&node.constraints.tags) {
                if let Some(tag) = self.tags.get(&tag) {
                    merged.extend_from_slice(&tag.constraints.conditions);
                }
            }
            merged.sort_unstable();
            merged.dedup();
            if !merged.is_empty() {
                conditions.insert(ids[i], merged);
            }
        }

        let successors = system_edges(&self.ordering_graph(&nodes), count);

        if let Some(cycle) = find_cycle(&successors) {
            let cycle: Vec<String> = cycle.into_iter()
                .map(|i| nodes[i].system.name().to_owned())
                .collect();
            let err = ScheduleError::Cycle { cycle };
            error!(error = %err, "cannot build schedule");
            return Err(err);
        }

        let mut predecessors = vec![Vec::new(); count];
        for (i, next) in successors.iter().enumerate() {
            for &j in next {
                predecessors[j].push(i);
            }
        }

        let order = topological_order(&successors, &predecessors);
        let accesses: Vec<_> = nodes.iter().map(|node| node.system.access()).collect();
        let stages: Vec<Stage> = make_stages(&order, &predecessors, &accesses)
            .into_iter()
            .map(|stage| Stage { systems: stage.into_iter().map(|i| ids[i]).collect() })
            .collect();

        debug!(systems = count, stages = stages.len(), "built schedule");
        Ok(Schedule::new(stages, conditions))
    }

    /// Builds the ordering graph over systems and tags.
    ///
    /// Systems are nodes `0..systems.len()`. Every known tag adds a `begin`
    /// and an `end` node after them.
    fn ordering_graph(&self, systems: &[&SystemNode]) -> Vec<BTreeSet<usize>> {
        let count = systems.len();
        let mut tags: Vec<TagId> = self.tags.keys().copied().collect();
        tags.sort_unstable();
        let slot: HashMap<TagId, usize> = tags.iter().enumerate().map(|(k, &tag)| (tag, k)).collect();
        let begin = |tag: &TagId| slot.get(tag).map(|k| count + 2 * k);
        let end = |tag: &TagId| slot.get(tag).map(|k| count + 2 * k + 1);

        let mut graph = vec![BTreeSet::new(); count + 2 * tags.len()];
        let mut edge = |from: Option<usize>, to: Option<usize>| {
            if let (Some(from), Some(to)) = (from, to) {
                graph[from].insert(to);
            }
        };

        for tag in &tags {
            let Some(node) = self.tags.get(tag) else { continue };
            edge(begin(tag), end(tag));
            for parent in node.constraints.tags.iter().filter(|parent| *parent != tag) {
                edge(begin(parent), begin(tag));
                edge(end(tag), end(parent));
            }
            for other in &node.constraints.before {
                edge(end(tag), begin(other));
            }
            for other in &node.constraints.after {
                edge(end(other), begin(tag));
            }
        }

        for (i, node) in systems.iter().enumerate() {
            let constraints = &node.constraints;
            for tag in &constraints.tags {
                edge(begin(tag), Some(i));
                edge(Some(i), end(tag));
            }
            for tag in &constraints.before {
                edge(Some(i), begin(tag));
            }
            for tag in &constraints.after {
                edge(end(tag), Some(i));
            }
        }
        graph
    }

    fn membership(&self, tags: &[TagId]) -> BTreeSet<TagId> {
        let mut closed = BTreeSet::new();
        let mut stack = tags.to_vec();
        while let Some(tag) = stack.pop() {
            if closed.insert(tag) {
                if let Some(node) = self.tags.get(&tag) {
                    stack.extend_from_slice(&node.constraints.tags);
                }
            }
        }
        closed
    }
}

/// Projects the ordering graph onto its first `systems` nodes: `i -> j` if a
/// path leads from system `i` to system `j` through tag nodes only.
fn system_edges(graph: &[BTreeSet<usize>], systems: usize) -> Vec<Vec<usize>> {
    (0..systems)
        .map(|start| {
            let mut reached = BTreeSet::new();
            let mut visited = vec![false; graph.len()];
            let mut stack: Vec<usize> = graph[start].iter().copied().collect();
            while let Some(node) = stack.pop() {
                if std::mem::replace(&mut visited[node], true) {
                    continue;
                }
                if node < systems {
                    reached.insert(node);
                } else {
                    stack.extend(graph[node].iter().copied());
                }
            }
            reached.into_iter().collect()
        })
        .collect()
}

/// Returns the nodes of a cycle in edge order, the first repeated at the end.
fn find_cycle(successors: &[Vec<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark { Unvisited, OnPath, Done }

    fn visit(node: usize, successors: &[Vec<usize>], marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<usize>> {
        marks[node] = Mark::OnPath;
        path.push(node);
        for &next in &successors[node] {
            match marks[next] {
                Mark::OnPath => {
                    let start = path.iter().position(|&n| n == next)?;
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, successors, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; successors.len()];
    let mut path = Vec::new();
    for start in 0..successors.len() {
        if marks[start] == Mark::Unvisited {
            if let Some(cycle) = visit(start, successors, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kahn's algorithm; among ready nodes the lowest index goes first.
fn topological_order(successors: &[Vec<usize>], predecessors: &[Vec<usize>]) -> Vec<usize> {
    let mut remaining: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..successors.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(successors.len());

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &successors[node] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.insert(next);
            }
        }
    }
    order
}
