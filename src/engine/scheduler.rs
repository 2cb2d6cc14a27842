//! Stage construction and execution.
//!
//! This module is responsible for:
//! * packing ordered systems into stages based on access compatibility,
//! * running the systems of a stage in parallel using Rayon,
//! * applying structural commands between stages.
//!
//! ## Scheduling model
//!
//! Systems are assigned to **stages** such that:
//! * systems within the same stage have compatible access,
//! * a system runs in a later stage than every system ordered before it,
//! * stages are executed sequentially.
//!
//! ## Structural synchronization
//!
//! Systems only queue structural changes. After a stage completes, the queues
//! are merged in stage order and flushed through the observers, so the next
//! stage sees every change of the previous one.

use std::collections::HashMap;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{trace, warn};

use crate::engine::access::SystemAccess;
use crate::engine::config::Settings;
use crate::engine::observers::Observers;
use crate::engine::planner::{ConditionId, Planner, SystemNode};
use crate::engine::plugins::PluginSender;
use crate::engine::systems::SystemContext;
use crate::engine::types::SystemId;
use crate::engine::world::World;


/// A group of systems that can be executed in parallel.
///
/// ## Invariants
/// * All systems within a `Stage` have compatible access sets
/// * Systems in a stage may safely run concurrently
///
/// Stages themselves must be executed sequentially.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stage {
    /// Systems scheduled to run in this stage, in topological order.
    pub systems: Vec<SystemId>,
}

/// Execution plan built by a [`Planner`].

#[derive(Clone, Debug, Default)]
pub struct Schedule {
    stages: Vec<Stage>,
    conditions: HashMap<SystemId, Vec<ConditionId>>,
}

impl Schedule {
    pub(crate) fn new(stages: Vec<Stage>, conditions: HashMap<SystemId, Vec<ConditionId>>) -> Self {
        Self { stages, conditions }
    }

    /// Returns the stages, in execution order.
    pub fn stages(&self) -> &[Stage] { &self.stages }

    /// Returns the conditions guarding a system.
    pub fn conditions_of(&self, id: SystemId) -> &[ConditionId] {
        self.conditions.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the stage index of a system.
    pub fn stage_of(&self, id: SystemId) -> Option<usize> {
        self.stages.iter().position(|stage| stage.systems.contains(&id))
    }

    /// Returns the number of stages.
    pub fn len(&self) -> usize { self.stages.len() }

    /// Returns `true` if there is no stage.
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }
}

/// Packs systems into stages.
///
/// ## Algorithm
/// Systems are visited in `order`, which must be topological. Each system is
/// placed into the first stage that:
/// * comes after the stages of all its predecessors, and
/// * holds no system whose access is incompatible with its own.
///
/// If no such stage exists, a new stage is created.
///
/// ## Complexity
/// * O(n²) in the worst case (pathological conflict patterns)
///
/// ## Returns
/// The stages as lists of indices into `accesses`.

pub fn make_stages(order: &[usize], predecessors: &[Vec<usize>], accesses: &[&SystemAccess]) -> Vec<Vec<usize>> {
    let mut stages: Vec<Vec<usize>> = Vec::new();
    let mut stage_of = vec![0usize; accesses.len()];

    for &system in order {
        let earliest = predecessors[system].iter()
            .map(|&p| stage_of[p] + 1)
            .max()
            .unwrap_or(0);

        let slot = (earliest..stages.len()).find(|&stage| {
            stages[stage].iter().all(|&other| accesses[system].compatible(accesses[other]))
        });

        let stage = match slot {
            Some(stage) => stage,
            None => {
                stages.push(Vec::new());
                stages.len() - 1
            }
        };
        stages[stage].push(system);
        stage_of[system] = stage;
    }
    stages
}

/// Executes schedules on a worker pool.

pub struct Runner {
    pool: Option<ThreadPool>,
    parallel: bool,
    max_observer_iterations: usize,
}

impl Runner {
    /// Creates a runner, building a dedicated worker pool if `settings`
    /// enables parallel stages.
    ///
    /// If the pool can't be built, the global Rayon pool is used instead.
    pub fn new(settings: &Settings) -> Self {
        let pool = if settings.parallel {
            let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("cubos-worker-{i}"));
            if let Some(threads) = settings.worker_threads {
                builder = builder.num_threads(threads);
            }
            match builder.build() {
                Ok(pool) => Some(pool),
                Err(err) => {
                    warn!(error = %err, "failed to build the worker pool, using the global pool");
                    None
                }
            }
        } else {
            None
        };

        Self { pool, parallel: settings.parallel, max_observer_iterations: settings.max_observer_iterations }
    }

    /// Runs every stage of `schedule` once.
    ///
    /// Conditions are evaluated at most once per call, right before the first
    /// stage holding a system they guard.
    ///
    /// ## Panics
    /// Panics if the command flush after a stage doesn't settle.
    pub fn run(
        &self,
        schedule: &Schedule,
        planner: &mut Planner,
        world: &mut World,
        observers: &mut Observers,
        plugins: &PluginSender,
    ) {
        let mut verdicts: HashMap<ConditionId, bool> = HashMap::new();

        for (index, stage) in schedule.stages().iter().enumerate() {
            let mut enabled = Vec::with_capacity(stage.systems.len());
            for &id in &stage.systems {
                let mut pass = true;
                for &condition in schedule.conditions_of(id) {
                    let verdict = *verdicts.entry(condition)
                        .or_insert_with(|| planner.evaluate(condition, &*world, plugins));
                    if !verdict {
                        pass = false;
                        break;
                    }
                }
                if pass {
                    enabled.push(id);
                }
            }

            trace!(stage = index, systems = enabled.len(), skipped = stage.systems.len() - enabled.len(), "running stage");
            self.run_stage(planner.nodes_mut(&enabled), world, plugins);

            let mut commands = planner.take_condition_commands();
            for &id in &stage.systems {
                commands.extend(planner.take_commands(id));
            }
            observers.flush(world, commands, plugins, self.max_observer_iterations);
        }
    }

    fn run_stage(&self, mut nodes: Vec<&mut SystemNode>, world: &World, plugins: &PluginSender) {
        let run = |node: &mut &mut SystemNode| {
            let SystemNode { system, commands, .. } = &mut **node;
            trace!(system = system.name(), "running system");
            let ctx = SystemContext { world, commands, plugins, trigger: None };
            // SAFETY: systems sharing a stage have compatible access.
            unsafe { system.run(ctx) }
        };

        if !self.parallel || nodes.len() < 2 {
            nodes.iter_mut().for_each(run);
            return;
        }
        match &self.pool {
            Some(pool) => pool.install(|| nodes.par_iter_mut().for_each(run)),
            None => nodes.par_iter_mut().for_each(run),
        }
    }
}
