use std::rc::Rc;
use log::debug;
use crate::config::SolverConfig;
use crate::errors::{SolverError, SolverResult};
use crate::linalg::SparseVec;
use crate::models::initial::ConstantBound;
use crate::utils::*;

const ROW_SUM_TOLERANCE: f64 = 1e-9;

/// Rewards and transitions over fully observed states. Terminal states are absorbing and
/// pay nothing.
#[derive(Clone, Debug)]
pub struct Dynamics {
    pub num_states: usize,
    pub num_actions: usize,
    pub discount: Reward,
    pub terminal: Vec<bool>,
    /// `rewards[s][a]`
    pub rewards: Vec<Vec<Reward>>,
    /// `transitions[a][s]` is the next-state distribution
    pub transitions: Vec<Vec<SparseVec>>,
}

pub(crate) fn check_distribution(row: &SparseVec, dim: usize, what: &str) -> SolverResult<()> {
    if row.dim() != dim {
        return Err(SolverError::InvalidModel(format!("{} has dimension {}, expected {}", what, row.dim(), dim)));
    }
    if row.iter().any(|(_, p)| !(0.0..=1.0).contains(&p)) || (row.sum() - 1.0).abs() > ROW_SUM_TOLERANCE {
        return Err(SolverError::InvalidModel(format!("{} is not a probability distribution: {:?}", what, row)));
    }
    Ok(())
}

impl Dynamics {
    pub fn new(discount: Reward, terminal: Vec<bool>, rewards: Vec<Vec<Reward>>, transitions: Vec<Vec<SparseVec>>) -> SolverResult<Self> {
        let num_states = terminal.len();
        let num_actions = transitions.len();
        if !(discount > 0.0 && discount <= 1.0) {
            return Err(SolverError::InvalidModel(format!("discount {} outside (0, 1]", discount)));
        }
        if num_states == 0 || num_actions == 0 {
            return Err(SolverError::InvalidModel("model needs at least one state and one action".into()));
        }
        if rewards.len() != num_states || rewards.iter().any(|r| r.len() != num_actions) {
            return Err(SolverError::InvalidModel("reward table must be states x actions".into()));
        }
        for (a, rows) in transitions.iter().enumerate() {
            if rows.len() != num_states {
                return Err(SolverError::InvalidModel(format!("action {} has {} transition rows", a, rows.len())));
            }
            for (s, row) in rows.iter().enumerate() {
                check_distribution(row, num_states, &format!("T(s={}, a={})", s, a))?;
                if terminal[s] && (row.get(s) != 1.0 || rewards[s][a] != 0.0) {
                    return Err(SolverError::InvalidModel(format!("terminal state {} must be absorbing with zero reward", s)));
                }
            }
        }
        Ok(Dynamics { num_states, num_actions, discount, terminal, rewards, transitions })
    }

    #[inline]
    pub fn q_value(&self, values: &[Reward], s: usize, a: ActionId) -> Reward {
        if self.terminal[s] { return 0.0; }
        self.rewards[s][a] + self.discount * self.transitions[a][s].dot_dense(values)
    }

    /// Range of rewards over non-terminal states
    pub fn reward_range(&self) -> (Reward, Reward) {
        self.rewards.iter().enumerate()
            .filter(|(s, _)| !self.terminal[*s])
            .flat_map(|(_, r)| r.iter().cloned())
            .fold((Reward::INFINITY, Reward::NEG_INFINITY), |(lo, hi), r| (lo.min(r), hi.max(r)))
    }

    /// `(min(Rmin, 0) / (1 - γ), max(Rmax, 0) / (1 - γ))`
    pub fn constant_bounds(&self) -> SolverResult<(Reward, Reward)> {
        if self.discount >= 1.0 {
            return Err(SolverError::Config("constant initial bounds need a discount below 1".into()));
        }
        let (lo, hi) = self.reward_range();
        let horizon = 1.0 / (1.0 - self.discount);
        Ok((lo.min(0.0) * horizon, hi.max(0.0) * horizon))
    }

    /// Bellman iteration from `start` until successive sweeps differ by at most `precision`.
    /// Iterates stay on the same side of the optimum as the start when the start is an admissible bound.
    pub fn value_iteration(&self, mut values: Vec<Reward>, precision: Reward) -> Vec<Reward> {
        for sweep in 0..VALUE_ITERATION_MAX_SWEEPS {
            let next: Vec<Reward> = (0..self.num_states)
                .map(|s| (0..self.num_actions).map(|a| self.q_value(&values, s, a)).fold(Reward::NEG_INFINITY, Reward::max))
                .collect();
            let change = next.iter().zip(values.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, Reward::max);
            values = next;
            if change <= precision {
                debug!("value iteration converged after {} sweeps", sweep + 1);
                break;
            }
        }
        values
    }

    /// Value of repeating one action forever, iterated from `start` like [`Self::value_iteration`]
    pub fn fixed_action_values(&self, action: ActionId, mut values: Vec<Reward>, precision: Reward) -> Vec<Reward> {
        for _ in 0..VALUE_ITERATION_MAX_SWEEPS {
            let next: Vec<Reward> = (0..self.num_states).map(|s| self.q_value(&values, s, action)).collect();
            let change = next.iter().zip(values.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, Reward::max);
            values = next;
            if change <= precision { break; }
        }
        values
    }
}

/// Explicit MDP. States are unit vectors, an outcome is the index of the next state.
#[derive(Clone, Debug)]
pub struct TabularMdp {
    dynamics: Rc<Dynamics>,
    initial: usize,
}

impl TabularMdp {
    pub fn new(dynamics: Dynamics, initial: usize) -> SolverResult<Self> {
        if initial >= dynamics.num_states {
            return Err(SolverError::InvalidModel(format!("initial state {} out of range", initial)));
        }
        Ok(TabularMdp { dynamics: Rc::new(dynamics), initial })
    }

    #[inline] pub fn dynamics(&self) -> &Dynamics { &self.dynamics }
    #[inline] pub fn num_states(&self) -> usize { self.dynamics.num_states }

    pub fn state(&self, s: usize) -> State {
        SparseVec::unit(self.dynamics.num_states, s)
    }

    fn index_of(&self, state: &State) -> usize {
        assert_eq!(state.nnz(), 1, "MDP state must be a unit vector, got {:?}", state);
        state.entries()[0].0
    }

    /// Optimal state values to within `precision`
    pub fn optimal_values(&self, precision: Reward) -> Vec<Reward> {
        self.dynamics.value_iteration(vec![0.0; self.dynamics.num_states], precision)
    }
}

impl Model for TabularMdp {
    fn num_actions(&self) -> usize { self.dynamics.num_actions }
    fn num_observations(&self) -> usize { self.dynamics.num_states }
    fn discount(&self) -> Reward { self.dynamics.discount }
    fn initial_state(&self) -> State { self.state(self.initial) }
    fn is_terminal(&self, state: &State) -> bool { self.dynamics.terminal[self.index_of(state)] }
    fn reward(&self, state: &State, action: ActionId) -> Reward { self.dynamics.rewards[self.index_of(state)][action] }

    fn outcome_probs(&self, state: &State, action: ActionId) -> SparseVec {
        self.dynamics.transitions[action][self.index_of(state)].clone()
    }

    fn next_state(&self, _state: &State, _action: ActionId, outcome: ObsId) -> State {
        self.state(outcome)
    }

    fn new_lower_bound(&self, _config: &SolverConfig) -> SolverResult<Box<dyn InitialBound>> {
        let (lo, _) = self.dynamics.constant_bounds()?;
        Ok(Box::new(ConstantBound::new(lo)))
    }

    fn new_upper_bound(&self, _config: &SolverConfig) -> SolverResult<Box<dyn InitialBound>> {
        let (_, hi) = self.dynamics.constant_bounds()?;
        Ok(Box::new(ConstantBound::new(hi)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog;

    #[test]
    fn rejects_rows_that_do_not_sum_to_one() {
        let bad = Dynamics::new(0.9, vec![false, false], vec![vec![0.0], vec![0.0]],
                                vec![vec![SparseVec::from_dense(&[0.5, 0.4]), SparseVec::unit(2, 1)]]);
        assert!(matches!(bad, Err(SolverError::InvalidModel(_))));
    }

    #[test]
    fn undiscounted_models_have_no_constant_bounds() {
        let d = Dynamics::new(1.0, vec![false], vec![vec![1.0]], vec![vec![SparseVec::unit(1, 0)]]).unwrap();
        assert!(matches!(d.constant_bounds(), Err(SolverError::Config(_))));
    }

    #[test]
    fn chain_values() {
        let mdp = catalog::two_state_chain();
        let v = mdp.optimal_values(1e-12);
        assert!((v[0] - 1.0).abs() < 1e-9);
        assert_eq!(v[1], 0.0);
        let (lo, hi) = mdp.dynamics().constant_bounds().unwrap();
        assert!(lo <= v[0] && v[0] <= hi);
    }
}
