//! Explicit POMDP, exposed to the planner as a belief MDP.

use std::rc::Rc;
use crate::config::SolverConfig;
use crate::errors::{SolverError, SolverResult};
use crate::linalg::SparseVec;
use crate::models::initial::{BlindPolicyBound, MdpValueBound};
use crate::models::tabular::{check_distribution, Dynamics};
use crate::utils::*;

#[derive(Clone, Debug)]
pub struct TabularPomdp {
    dynamics: Rc<Dynamics>,
    num_observations: usize,
    /// `observations[a][s']` is the distribution over observations after landing in `s'`
    observations: Vec<Vec<SparseVec>>,
    initial_belief: State,
}

impl TabularPomdp {
    pub fn new(dynamics: Dynamics, num_observations: usize, observations: Vec<Vec<SparseVec>>, initial_belief: State) -> SolverResult<Self> {
        if observations.len() != dynamics.num_actions {
            return Err(SolverError::InvalidModel(format!("{} observation tables for {} actions", observations.len(), dynamics.num_actions)));
        }
        for (a, rows) in observations.iter().enumerate() {
            if rows.len() != dynamics.num_states {
                return Err(SolverError::InvalidModel(format!("action {} has {} observation rows", a, rows.len())));
            }
            for (s, row) in rows.iter().enumerate() {
                check_distribution(row, num_observations, &format!("O(s'={}, a={})", s, a))?;
            }
        }
        check_distribution(&initial_belief, dynamics.num_states, "initial belief")?;
        Ok(TabularPomdp { dynamics: Rc::new(dynamics), num_observations, observations, initial_belief })
    }

    /// POMDP whose observation reveals the next state
    pub fn fully_observable(dynamics: Dynamics, initial_belief: State) -> SolverResult<Self> {
        let n = dynamics.num_states;
        let observations = (0..dynamics.num_actions)
            .map(|_| (0..n).map(|s| SparseVec::unit(n, s)).collect())
            .collect();
        Self::new(dynamics, n, observations, initial_belief)
    }

    #[inline] pub fn dynamics(&self) -> &Dynamics { &self.dynamics }
    #[inline] pub fn dynamics_rc(&self) -> Rc<Dynamics> { self.dynamics.clone() }

    /// Unnormalized next-state distribution `Σ_s b(s) T(s,a,·)`
    fn predict(&self, belief: &State, action: ActionId) -> Vec<Probability> {
        let mut out = vec![0.0; self.dynamics.num_states];
        for (s, p) in belief.iter() {
            for (next, t) in self.dynamics.transitions[action][s].iter() {
                out[next] += p * t;
            }
        }
        out
    }
}

impl Model for TabularPomdp {
    fn num_actions(&self) -> usize { self.dynamics.num_actions }
    fn num_observations(&self) -> usize { self.num_observations }
    fn discount(&self) -> Reward { self.dynamics.discount }
    fn initial_state(&self) -> State { self.initial_belief.clone() }

    fn is_terminal(&self, state: &State) -> bool {
        state.nnz() > 0 && state.support().all(|s| self.dynamics.terminal[s])
    }

    fn reward(&self, state: &State, action: ActionId) -> Reward {
        state.iter().map(|(s, p)| p * self.dynamics.rewards[s][action]).sum()
    }

    fn outcome_probs(&self, state: &State, action: ActionId) -> SparseVec {
        let mut out = vec![0.0; self.num_observations];
        for (next, p) in self.predict(state, action).into_iter().enumerate() {
            if p <= 0.0 { continue; }
            for (o, q) in self.observations[action][next].iter() {
                out[o] += p * q;
            }
        }
        SparseVec::from_dense(&out)
    }

    fn next_state(&self, state: &State, action: ActionId, outcome: ObsId) -> State {
        let joint: Vec<(usize, Probability)> = self.predict(state, action).into_iter().enumerate()
            .map(|(next, p)| (next, p * self.observations[action][next].get(outcome)))
            .collect();
        SparseVec::new(self.dynamics.num_states, joint)
            .normalized()
            .unwrap_or_else(|| panic!("observation {} impossible after action {} from {:?}", outcome, action, state))
    }

    fn new_lower_bound(&self, _config: &SolverConfig) -> SolverResult<Box<dyn InitialBound>> {
        Ok(Box::new(BlindPolicyBound::new(self.dynamics.clone())))
    }

    fn new_upper_bound(&self, _config: &SolverConfig) -> SolverResult<Box<dyn InitialBound>> {
        Ok(Box::new(MdpValueBound::new(self.dynamics.clone())))
    }

    fn as_belief(&self) -> Option<&dyn BeliefModel> { Some(self) }
}

impl BeliefModel for TabularPomdp {
    fn num_states(&self) -> usize { self.dynamics.num_states }

    fn reward_vector(&self, action: ActionId) -> Vec<Reward> {
        self.dynamics.rewards.iter().map(|r| r[action]).collect()
    }

    fn back_project(&self, alpha: &[Reward], action: ActionId, outcome: ObsId, support: Option<&[usize]>) -> Vec<(usize, Reward)> {
        let project = |s: usize| {
            let g: Reward = self.dynamics.transitions[action][s].iter()
                .map(|(next, t)| t * self.observations[action][next].get(outcome) * alpha[next])
                .sum();
            (s, g)
        };
        match support {
            Some(states) => states.iter().map(|&s| project(s)).collect(),
            None => (0..self.dynamics.num_states).map(project).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog;

    #[test]
    fn listening_updates_the_belief() {
        let tiger = catalog::tiger();
        let b0 = tiger.initial_state();
        let probs = tiger.outcome_probs(&b0, 0);
        assert!((probs.get(0) - 0.5).abs() < 1e-12);
        let b1 = tiger.next_state(&b0, 0, 0);
        assert!((b1.get(0) - 0.85).abs() < 1e-12);
        // opening a door resets the problem
        let reset = tiger.next_state(&b1, 1, 1);
        assert!(reset.max_abs_diff(&b0) < 1e-12);
    }

    #[test]
    fn back_projection_sums_to_expected_future() {
        let tiger = catalog::tiger();
        let b0 = tiger.initial_state();
        let alpha = vec![3.0, -1.0];
        // Σ_o P(o|b,a) β·b_o == Σ_o b · g_o
        for a in 0..tiger.num_actions() {
            let mut lhs = 0.0;
            let mut rhs = 0.0;
            for (o, p) in tiger.outcome_probs(&b0, a).iter() {
                lhs += p * tiger.next_state(&b0, a, o).dot_dense(&alpha);
                rhs += tiger.back_project(&alpha, a, o, None).iter().map(|(s, g)| b0.get(*s) * g).sum::<Reward>();
            }
            assert!((lhs - rhs).abs() < 1e-12);
        }
    }

    #[test]
    fn terminal_beliefs() {
        let grid = catalog::observable_grid();
        let goal = grid.dynamics().num_states - 1;
        assert!(grid.is_terminal(&SparseVec::unit(goal + 1, goal)));
        assert!(!grid.is_terminal(&grid.initial_state()));
    }
}
