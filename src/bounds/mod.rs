//! # Bound representations
//!
//! Lower and upper bounds on the optimal value function. Every representation is a
//! [`BoundRep`]; the orchestrator only talks to the trait.
//! - **Point**: one scalar per cached node
//! - **MaxPlanes**: convex lower bound, max over alpha vectors
//! - **Sawtooth**: convex upper bound, interpolation over a point set

pub mod max_planes;
pub mod point;
pub mod relax;
pub mod sawtooth;

use std::rc::Rc;
use crate::config::{BoundKind, SolverConfig};
use crate::errors::{SolverError, SolverResult};
use crate::graph::{Node, NodeId, SearchGraph};
use crate::utils::*;

pub use max_planes::{MaxPlanes, Plane, PlaneId};
pub use point::PointBound;
pub use relax::RelaxUpperBound;
pub use sawtooth::{BoundPoint, Sawtooth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity { Lower, Upper }

impl Polarity {
    /// The node's value on this side
    #[inline] pub fn of(self, node: &Node) -> Reward {
        match self { Polarity::Lower => node.lb_val, Polarity::Upper => node.ub_val }
    }
}

/// Contract shared by all bound representations
pub trait BoundRep {
    fn polarity(&self) -> Polarity;
    fn is_point(&self) -> bool;
    /// Prepare the initial bound function to the given precision
    fn initialize(&mut self, precision: Reward) -> SolverResult<()>;
    /// Bound at `state`, using the cached node when there is one
    fn get_value(&self, graph: &SearchGraph, state: &State, node: Option<NodeId>) -> Reward;
    /// Seed a freshly created (non-terminal) node
    fn init_node_bound(&self, node: &mut Node);
    /// One-step Bellman backup of an expanded node. Returns the action with the best Q-value.
    fn update(&mut self, graph: &mut SearchGraph, id: NodeId) -> Option<ActionId>;
    /// Action attached to the bound itself (the best plane's action), if the representation has one
    fn best_action(&self, _state: &State) -> Option<ActionId> { None }
    fn as_max_planes(&self) -> Option<&MaxPlanes> { None }
    fn as_max_planes_mut(&mut self) -> Option<&mut MaxPlanes> { None }
}

/// `R(s,a) + γ Σ_o P(o) value(succ)` over the cached successor values of one side
pub(crate) fn point_backup(graph: &SearchGraph, id: NodeId, action: ActionId, discount: Reward, side: Polarity) -> Reward {
    let q = &graph.node(id).q[action];
    let future: Reward = q.edges().map(|(_, e)| e.obs_prob * side.of(graph.node(e.next))).sum();
    q.immediate_reward + discount * future
}

/// Build the configured lower bound representation
pub fn new_lower_bound(model: &Rc<dyn Model>, config: &SolverConfig) -> SolverResult<Box<dyn BoundRep>> {
    let initial = model.new_lower_bound(config)?;
    Ok(match config.lower_bound_representation {
        BoundKind::Point => Box::new(PointBound::new(Polarity::Lower, model.discount(), initial, false)),
        BoundKind::Convex => Box::new(MaxPlanes::new(model.clone(), initial, config)?),
    })
}

/// Build the configured upper bound representation, wrapping the initial bound in a
/// relaxed lookahead search when asked to
pub fn new_upper_bound(model: &Rc<dyn Model>, config: &SolverConfig) -> SolverResult<Box<dyn BoundRep>> {
    let mut initial = model.new_upper_bound(config)?;
    if config.relax_upper_bound {
        initial = Box::new(RelaxUpperBound::new(model.clone(), initial, config));
    }
    Ok(match config.upper_bound_representation {
        BoundKind::Point => Box::new(PointBound::new(Polarity::Upper, model.discount(), initial, config.use_ub_action_caching)),
        BoundKind::Convex => Box::new(Sawtooth::new(model.clone(), initial, config)?),
    })
}

/// Convex bounds need the belief-MDP view of the model
pub(crate) fn require_belief_model(model: &Rc<dyn Model>, what: &str) -> SolverResult<usize> {
    model.as_belief()
        .map(|b| b.num_states())
        .ok_or_else(|| SolverError::IncompatibleModel(format!("{} requires a POMDP (belief MDP) model", what)))
}
