use std::fmt::{Debug, Formatter};
use crate::config::SolverConfig;
use crate::errors::SolverResult;
use crate::linalg::SparseVec;

// ---------- Tune-ables ---------- //
pub const TARGET_PRECISION: Reward = 1e-3;  // Default regret bound at the root
pub const INIT_PRECISION_FACTOR: Reward = 1e-2;  // Initial bounds are computed this much tighter than the target
pub const OBS_IS_ZERO_EPS: Probability = 1e-10;  // Outcomes this unlikely are never expanded
pub const MAX_TRIAL_DEPTH: usize = 1000;  // Recursion cap shared by all trials
pub const PRUNE_GROWTH_FACTOR: f64 = 1.1;  // Prune once the plane set grows by this factor ...
pub const PRUNE_INCREMENT: usize = 10;  // ... plus this many planes
pub const DOMINANCE_EPS: Reward = 1e-10;  // Slack when comparing planes and points
pub const RELAX_DEPTH: usize = 2;  // Lookahead depth of the relaxed upper bound search
pub const RELAX_MAX_SWEEPS: usize = 50;
pub const FRTDP_INITIAL_DEPTH: f64 = 10.0;
pub const FRTDP_DEPTH_GROWTH: f64 = 1.1;
pub const WRTDP_OCCUPANCY_CUTOFF: f64 = 1e-2;
pub const VALUE_ITERATION_MAX_SWEEPS: usize = 100_000;

// ---------- Basic types (renamed for pretty) ---------- //
pub type Reward = f64;
pub type Probability = f64;
pub type ActionId = usize;
pub type ObsId = usize;
/// A fully observed state (unit vector) or a belief over hidden states
pub type State = SparseVec;

/// Lower/upper value pair; a side is `None` when that bound is not maintained
#[derive(Clone, Copy, PartialEq, Default)]
pub struct ValueInterval {
    pub lower: Option<Reward>,
    pub upper: Option<Reward>,
}

impl ValueInterval {
    pub fn new(lower: Option<Reward>, upper: Option<Reward>) -> Self {
        ValueInterval { lower, upper }
    }
    /// Gap between the bounds, infinite when either side is missing
    pub fn width(&self) -> Reward {
        match (self.lower, self.upper) {
            (Some(l), Some(u)) => u - l,
            _ => Reward::INFINITY,
        }
    }
}

impl Debug for ValueInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let show = |v: Option<Reward>| v.map(|x| format!("{:.4}", x)).unwrap_or_else(|| "-".into());
        write!(f, "[{}, {}]", show(self.lower), show(self.upper))
    }
}

// ---------- Traits the model must provide ----------
/// Sequential decision problem consumed by the search engine.
///
/// Outcome indices are whatever the model makes them: next-state indices for an MDP,
/// observation indices for a belief MDP.
pub trait Model {
    fn num_actions(&self) -> usize;
    /// Number of distinct outcomes per (state, action)
    fn num_observations(&self) -> usize;
    /// Discount factor, `0 < γ <= 1`
    fn discount(&self) -> Reward;
    fn initial_state(&self) -> State;
    fn is_terminal(&self, state: &State) -> bool;
    fn reward(&self, state: &State, action: ActionId) -> Reward;
    /// Distribution over outcome indices after taking `action` in `state`
    fn outcome_probs(&self, state: &State, action: ActionId) -> SparseVec;
    fn next_state(&self, state: &State, action: ActionId, outcome: ObsId) -> State;
    /// Admissible lower bound used to seed new nodes
    fn new_lower_bound(&self, config: &SolverConfig) -> SolverResult<Box<dyn InitialBound>>;
    /// Admissible upper bound used to seed new nodes
    fn new_upper_bound(&self, config: &SolverConfig) -> SolverResult<Box<dyn InitialBound>>;
    /// Belief-MDP view of the model, needed by convex bounds
    fn as_belief(&self) -> Option<&dyn BeliefModel> { None }
}

/// POMDP seen as a belief MDP: states are distributions over `num_states` hidden states
pub trait BeliefModel: Model {
    fn num_states(&self) -> usize;
    /// `R(·, a)` as a dense vector over hidden states
    fn reward_vector(&self, action: ActionId) -> Vec<Reward>;
    /// `g(s) = Σ_s' T(s,a,s') O(s',a,o) alpha(s')` for every `s` in `support` (all states when `None`)
    fn back_project(&self, alpha: &[Reward], action: ActionId, outcome: ObsId, support: Option<&[usize]>) -> Vec<(usize, Reward)>;
}

/// Externally supplied admissible bound evaluated directly on a state
pub trait InitialBound {
    fn initialize(&mut self, precision: Reward) -> SolverResult<()>;
    fn get_value(&self, state: &State) -> Reward;
    /// Linear pieces `(action, alpha)` for bounds that are piecewise linear over beliefs
    fn planes(&self) -> Option<Vec<(ActionId, Vec<Reward>)>> { None }
}

/// Index of the largest value, earliest index wins ties
pub fn arg_max<I: IntoIterator<Item = Reward>>(values: I) -> Option<(usize, Reward)> {
    let mut best: Option<(usize, Reward)> = None;
    for (i, v) in values.into_iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => (),
            _ => best = Some((i, v)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_max_breaks_ties_by_encounter_order() {
        assert_eq!(arg_max(vec![1.0, 3.0, 3.0, 2.0]), Some((1, 3.0)));
        assert_eq!(arg_max(Vec::<Reward>::new()), None);
    }

    #[test]
    fn interval_width() {
        assert_eq!(ValueInterval::new(Some(1.0), Some(3.5)).width(), 2.5);
        assert!(ValueInterval::new(None, Some(1.0)).width().is_infinite());
    }
}
