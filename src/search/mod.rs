//! # Trial-based heuristic search
//!
//! A [`Planner`] drives one [`TrialStrategy`] over a [`BoundPair`]. Each trial walks down
//! from the root choosing actions and outcomes by the strategy's own rule, then backs the
//! visited nodes up bottom-up. Trials are written with explicit stacks and a depth cap so no
//! model can blow the call stack.
//!
//! The anytime contract: between any two trials the root bounds are valid and can be queried.

pub mod frtdp;
pub mod hdp;
pub mod hsvi;
pub mod lrtdp;
pub mod rtdp;
pub mod script;
pub mod wrtdp;

#[cfg(test)]
mod search_tests;

use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, info};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use crate::bound_pair::BoundPair;
use crate::config::{SearchStrategy, SolverConfig};
use crate::errors::{SolverError, SolverResult};
use crate::graph::{Node, NodeHook, NodeId};
use crate::utils::*;
use script::TrialScript;

/// Selection rule of one search algorithm
pub trait TrialStrategy {
    fn name(&self) -> &'static str;
    /// Hook run on every node the cache creates, used to seed per-node search data
    fn new_node_hook(&self) -> Option<NodeHook> { None }
    /// Walk down from `root`, then back the walked nodes up
    fn do_trial(&mut self, core: &mut SearchCore, root: NodeId) -> SolverResult<()>;
    /// True once the strategy has nothing more to do
    fn is_exhausted(&self) -> bool { false }
}

fn new_strategy(config: &SolverConfig) -> SolverResult<Box<dyn TrialStrategy>> {
    Ok(match config.search_strategy {
        SearchStrategy::Rtdp => Box::new(rtdp::Rtdp),
        SearchStrategy::Lrtdp => Box::new(lrtdp::Lrtdp),
        SearchStrategy::Hdp => Box::new(hdp::Hdp::new(config)),
        SearchStrategy::Frtdp => Box::new(frtdp::Frtdp::new(config)),
        SearchStrategy::Hsvi => Box::new(hsvi::Hsvi),
        SearchStrategy::Wrtdp => Box::new(wrtdp::Wrtdp::new(config)),
        SearchStrategy::Script => {
            let path = config.script_path.as_deref()
                .ok_or_else(|| SolverError::Config("script strategy needs a script_path".into()))?;
            Box::new(script::ScriptedReplay::new(TrialScript::read(path)?))
        }
    })
}

// ---------- Search core ---------- //
/// Everything a strategy may touch during a trial
pub struct SearchCore {
    pub bounds: BoundPair,
    pub target_precision: Reward,
    pub max_depth: usize,
    rng: StdRng,
    recorder: Option<TrialScript>,
}

impl SearchCore {
    #[inline] pub fn node(&self, id: NodeId) -> &Node { self.bounds.node(id) }
    #[inline] pub fn width(&self, id: NodeId) -> Reward { self.bounds.width(id) }
    #[inline] pub fn discount(&self) -> Reward { self.bounds.discount() }
    #[inline] pub fn is_terminal(&self, id: NodeId) -> bool { self.node(id).is_terminal }

    /// Width left over once the target, inflated by `γ^-depth`, is paid for
    pub fn excess_width(&self, id: NodeId, depth: usize) -> Reward {
        self.width(id) - self.target_precision * self.discount().powi(-(depth as i32))
    }

    /// Backup through the bound pair, recorded when trial recording is on
    pub fn update(&mut self, id: NodeId) -> Option<ActionId> {
        self.update_with_gain(id).0
    }

    /// Backup that also reports how much the node's width shrank
    pub fn update_with_gain(&mut self, id: NodeId) -> (Option<ActionId>, Reward) {
        if let Some(script) = self.recorder.as_mut() {
            let state = self.bounds.node(id).state.clone();
            script.record(state);
        }
        let before = self.width(id);
        let action = self.bounds.update(id);
        // NaN (both sides still infinite) counts as no gain
        (action, (before - self.width(id)).max(0.0))
    }

    /// Re-back-up a walked path, deepest node first
    pub fn back_up_path(&mut self, path: &[NodeId]) {
        for &id in path.iter().rev() {
            self.update(id);
        }
    }

    pub fn greedy_action(&self, id: NodeId) -> ActionId {
        self.bounds.max_ub_action(id)
    }

    pub fn successors(&self, id: NodeId, action: ActionId) -> Vec<(ObsId, Probability, NodeId)> {
        self.bounds.graph().successors(id, action)
    }

    /// Draw an outcome according to its probability. `None` when nothing is populated.
    pub fn sample_outcome(&mut self, id: NodeId, action: ActionId) -> Option<NodeId> {
        let succ = self.successors(id, action);
        let weights: Vec<Probability> = succ.iter().map(|(_, p, _)| *p).collect();
        let dist = WeightedIndex::new(&weights).ok()?;
        Some(succ[dist.sample(&mut self.rng)].2)
    }

    /// Successor maximizing `score(probability, node)`, earliest outcome on ties
    pub fn best_outcome(&self, id: NodeId, action: ActionId, score: impl Fn(Probability, NodeId) -> Reward) -> Option<(Probability, NodeId, Reward)> {
        let succ = self.successors(id, action);
        let (k, s) = arg_max(succ.iter().map(|(_, p, n)| score(*p, *n)))?;
        Some((succ[k].1, succ[k].2, s))
    }

    fn begin_trial(&mut self) {
        if let Some(script) = self.recorder.as_mut() {
            script.begin_trial();
        }
    }
}

// ---------- Planner ---------- //
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    /// Root width reached the requested precision
    Converged,
    /// Backup cap, time limit or script ran out before convergence
    BudgetExhausted,
}

/// Why [`Planner::plan`] stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    Converged,
    BudgetExhausted,
    TimeUp,
    Interrupted,
}

/// Limits of an anytime planning run
#[derive(Debug, Clone, Default)]
pub struct PlanLimits {
    pub max_time: Option<Duration>,
    /// Accept the root as solved at this width even if it is looser than the configured target
    pub min_precision: Reward,
    /// Checked between trials
    pub interrupt: Option<Arc<AtomicBool>>,
}

pub struct Planner {
    config: SolverConfig,
    core: Option<SearchCore>,
    strategy: Option<Box<dyn TrialStrategy>>,
    phase: Phase,
    bounds_ready: bool,
    started: Option<Instant>,
    num_trials: u64,
}

impl Default for Planner {
    fn default() -> Self { Self::new() }
}

impl Planner {
    pub fn new() -> Self {
        Planner {
            config: SolverConfig::default(),
            core: None,
            strategy: None,
            phase: Phase::Uninitialized,
            bounds_ready: false,
            started: None,
            num_trials: 0,
        }
    }

    #[inline] pub fn phase(&self) -> Phase { self.phase }
    #[inline] pub fn num_trials(&self) -> u64 { self.num_trials }
    #[inline] pub fn config(&self) -> &SolverConfig { &self.config }
    pub fn bounds(&self) -> Option<&BoundPair> { self.core.as_ref().map(|c| &c.bounds) }
    pub fn strategy_name(&self) -> Option<&'static str> { self.strategy.as_ref().map(|s| s.name()) }

    /// Validate the configuration and build the bounds and the search strategy. Model and
    /// configuration problems surface here.
    pub fn plan_init(&mut self, model: Rc<dyn Model>, config: &SolverConfig) -> SolverResult<()> {
        config.validate()?;
        let gamma = model.discount();
        if !(gamma > 0.0 && gamma <= 1.0) {
            return Err(SolverError::InvalidModel(format!("discount {} outside (0, 1]", gamma)));
        }
        let strategy = new_strategy(config)?;
        let mut bounds = BoundPair::new(model, config, true, true)?;
        if let Some(hook) = strategy.new_node_hook() {
            bounds.graph_mut().add_new_node_hook(hook);
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        self.core = Some(SearchCore {
            bounds,
            target_precision: config.target_precision,
            max_depth: config.max_depth,
            rng,
            recorder: if config.record_trials { Some(TrialScript::default()) } else { None },
        });
        info!("planner ready: {} search, {:?} lower / {:?} upper bounds, target {:e}",
              strategy.name(), config.lower_bound_representation, config.upper_bound_representation, config.target_precision);
        self.strategy = Some(strategy);
        self.config = config.clone();
        self.phase = Phase::Initialized;
        self.bounds_ready = false;
        self.started = None;
        self.num_trials = 0;
        Ok(())
    }

    /// Run exactly one trial from `state`, initializing the bounds first if this is the first
    /// call. `max_time` counts from the first call (or the start of the current [`Self::plan`]).
    /// Returns true once planning is done: the root is within `max(min_precision, target)`,
    /// or the backup budget, the time budget or the script is used up.
    pub fn plan_fixed_time(&mut self, state: &State, max_time: Duration, min_precision: Reward) -> SolverResult<bool> {
        let (Some(core), Some(strategy)) = (self.core.as_mut(), self.strategy.as_mut()) else {
            return Err(SolverError::NotInitialized);
        };
        if !self.bounds_ready {
            let t = Instant::now();
            core.bounds.initialize(self.config.init_precision())?;
            self.bounds_ready = true;
            self.started.get_or_insert_with(Instant::now);
            info!("initial bounds computed in {:.3}s", t.elapsed().as_secs_f64());
        }
        let precision = min_precision.max(core.target_precision);
        let root = core.bounds.get_node(state);
        let backups_before = core.bounds.num_backups();

        core.begin_trial();
        strategy.do_trial(core, root)?;
        self.num_trials += 1;
        let width = core.width(root);
        debug!("trial {} ({}): {} backups, root [{:.6}, {:.6}], {} nodes",
               self.num_trials, strategy.name(), core.bounds.num_backups() - backups_before,
               core.node(root).lb_val, core.node(root).ub_val, core.bounds.graph().len());

        if width <= precision {
            self.phase = Phase::Converged;
            info!("converged after {} trials, root width {:.3e}", self.num_trials, width);
            return Ok(true);
        }
        let out_of_backups = self.config.max_backups.is_some_and(|cap| core.bounds.num_backups() >= cap);
        let out_of_time = self.started.is_some_and(|t| t.elapsed() >= max_time);
        if out_of_backups || out_of_time || strategy.is_exhausted() {
            self.phase = Phase::BudgetExhausted;
            info!("budget used up after {} trials, root width {:.3e}", self.num_trials, width);
            return Ok(true);
        }
        Ok(false)
    }

    /// Anytime loop: trials until done, out of time or interrupted. The bounds are valid at every exit.
    pub fn plan(&mut self, state: &State, limits: &PlanLimits) -> SolverResult<PlanOutcome> {
        let start = Instant::now();
        self.started = Some(start);
        let max_time = limits.max_time.unwrap_or(Duration::MAX);
        loop {
            if limits.interrupt.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                info!("interrupted after {} trials", self.num_trials);
                return Ok(PlanOutcome::Interrupted);
            }
            if start.elapsed() >= max_time {
                return Ok(PlanOutcome::TimeUp);
            }
            if self.plan_fixed_time(state, max_time, limits.min_precision)? {
                return Ok(match self.phase {
                    Phase::Converged => PlanOutcome::Converged,
                    _ if start.elapsed() >= max_time => PlanOutcome::TimeUp,
                    _ => PlanOutcome::BudgetExhausted,
                });
            }
        }
    }

    fn ready_bounds(&self) -> SolverResult<&BoundPair> {
        match (&self.core, self.bounds_ready) {
            (Some(core), true) => Ok(&core.bounds),
            _ => Err(SolverError::NotInitialized),
        }
    }

    pub fn choose_action(&self, state: &State) -> SolverResult<ActionId> {
        Ok(self.ready_bounds()?.choose_action(state))
    }

    pub fn value_at(&self, state: &State) -> SolverResult<ValueInterval> {
        Ok(self.ready_bounds()?.value_at(state))
    }

    pub fn q_value(&self, state: &State, action: ActionId) -> SolverResult<ValueInterval> {
        let bounds = self.ready_bounds()?;
        let num_actions = bounds.model().num_actions();
        if action >= num_actions {
            return Err(SolverError::Config(format!("action {} out of range, the model has {} actions", action, num_actions)));
        }
        Ok(bounds.q_value(state, action))
    }

    pub fn write_policy(&mut self, path: &Path, can_modify_bounds: bool) -> SolverResult<()> {
        self.ready_bounds()?;
        let core = self.core.as_mut().ok_or(SolverError::NotInitialized)?;
        core.bounds.write_policy(path, can_modify_bounds)
    }

    /// Save the recorded update sequence for later replay
    pub fn write_trial_script(&self, path: &Path) -> SolverResult<()> {
        let core = self.core.as_ref().ok_or(SolverError::NotInitialized)?;
        let script = core.recorder.as_ref()
            .ok_or_else(|| SolverError::Unsupported("trial recording is off (record_trials)".into()))?;
        script.write(path)
    }
}
