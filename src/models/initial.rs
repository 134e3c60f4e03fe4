//! Admissible initial bounds handed out by the tabular models.

use std::rc::Rc;
use log::debug;
use crate::errors::SolverResult;
use crate::models::tabular::Dynamics;
use crate::utils::*;

/// Same value everywhere
#[derive(Clone, Debug)]
pub struct ConstantBound {
    value: Reward,
}

impl ConstantBound {
    pub fn new(value: Reward) -> Self { ConstantBound { value } }
}

impl InitialBound for ConstantBound {
    fn initialize(&mut self, _precision: Reward) -> SolverResult<()> { Ok(()) }
    fn get_value(&self, _state: &State) -> Reward { self.value }
}

/// Lower bound from blind policies: one plane per action, the value of repeating that
/// action regardless of observations. `V(b) = max_a α_a · b`.
pub struct BlindPolicyBound {
    dynamics: Rc<Dynamics>,
    planes: Vec<Vec<Reward>>,
}

impl BlindPolicyBound {
    pub fn new(dynamics: Rc<Dynamics>) -> Self {
        BlindPolicyBound { dynamics, planes: vec![] }
    }
}

impl InitialBound for BlindPolicyBound {
    fn initialize(&mut self, precision: Reward) -> SolverResult<()> {
        let (lo, _) = self.dynamics.constant_bounds()?;
        let start: Vec<Reward> = self.dynamics.terminal.iter().map(|t| if *t { 0.0 } else { lo }).collect();
        self.planes = (0..self.dynamics.num_actions)
            .map(|a| self.dynamics.fixed_action_values(a, start.clone(), precision))
            .collect();
        debug!("blind policy planes: {:?}", self.planes);
        Ok(())
    }

    fn get_value(&self, state: &State) -> Reward {
        self.planes.iter().map(|alpha| state.dot_dense(alpha)).fold(Reward::NEG_INFINITY, Reward::max)
    }

    fn planes(&self) -> Option<Vec<(ActionId, Vec<Reward>)>> {
        Some(self.planes.iter().cloned().enumerate().collect())
    }
}

/// Upper bound from the fully observable relaxation: `V(b) = Σ_s b(s) V_MDP(s)`
pub struct MdpValueBound {
    dynamics: Rc<Dynamics>,
    values: Vec<Reward>,
}

impl MdpValueBound {
    pub fn new(dynamics: Rc<Dynamics>) -> Self {
        MdpValueBound { dynamics, values: vec![] }
    }
}

impl InitialBound for MdpValueBound {
    fn initialize(&mut self, precision: Reward) -> SolverResult<()> {
        let (_, hi) = self.dynamics.constant_bounds()?;
        let start: Vec<Reward> = self.dynamics.terminal.iter().map(|t| if *t { 0.0 } else { hi }).collect();
        self.values = self.dynamics.value_iteration(start, precision);
        debug!("fully observable values: {:?}", self.values);
        Ok(())
    }

    fn get_value(&self, state: &State) -> Reward {
        state.dot_dense(&self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::SparseVec;
    use crate::models::catalog;

    #[test]
    fn blind_and_mdp_bounds_bracket_tiger() {
        let tiger = catalog::tiger();
        let dynamics = tiger.dynamics_rc();
        let mut lower = BlindPolicyBound::new(dynamics.clone());
        let mut upper = MdpValueBound::new(dynamics);
        lower.initialize(1e-6).unwrap();
        upper.initialize(1e-6).unwrap();
        let uniform = SparseVec::from_dense(&[0.5, 0.5]);
        // listening forever is the best blind policy
        assert!((lower.get_value(&uniform) + 20.0).abs() < 1e-3);
        // knowing the tiger's position, always open the safe door
        assert!((upper.get_value(&uniform) - 200.0).abs() < 1e-3);
        assert_eq!(lower.planes().unwrap().len(), 3);
    }
}
