//! # Bound pair
//!
//! Owns the search-graph cache and the lower/upper bound representations, keeps them
//! consistent, and answers value and action queries. Either side may be switched off.

use std::path::Path;
use std::rc::Rc;
use log::{debug, info};
use crate::bounds::{self, BoundRep, Polarity};
use crate::config::SolverConfig;
use crate::errors::{SolverError, SolverResult};
use crate::graph::{Node, NodeId, SearchGraph};
use crate::utils::*;

type Side = Option<Box<dyn BoundRep>>;

fn init_node_bounds(lower: &Side, upper: &Side, node: &mut Node) {
    if let Some(l) = lower { l.init_node_bound(node); }
    if let Some(u) = upper { u.init_node_bound(node); }
}

pub struct BoundPair {
    model: Rc<dyn Model>,
    graph: SearchGraph,
    lower: Side,
    upper: Side,
    /// Both sides are point bounds, so one pass over the successors serves both
    dual_point: bool,
    num_backups: u64,
}

impl BoundPair {
    /// Build the configured representations. Fails here, not at planning time, when a convex
    /// bound is asked of a model without a belief view.
    pub fn new(model: Rc<dyn Model>, config: &SolverConfig, maintain_lower: bool, maintain_upper: bool) -> SolverResult<Self> {
        if !maintain_lower && !maintain_upper {
            return Err(SolverError::Config("at least one bound must be maintained".into()));
        }
        let lower = if maintain_lower { Some(bounds::new_lower_bound(&model, config)?) } else { None };
        let upper = if maintain_upper { Some(bounds::new_upper_bound(&model, config)?) } else { None };
        let dual_point = matches!((&lower, &upper), (Some(l), Some(u)) if l.is_point() && u.is_point());
        Ok(BoundPair {
            graph: SearchGraph::new(config.outcome_epsilon),
            model,
            lower,
            upper,
            dual_point,
            num_backups: 0,
        })
    }

    /// Initialize both bound functions. Any nodes cached before this point are dropped.
    pub fn initialize(&mut self, precision: Reward) -> SolverResult<()> {
        if let Some(l) = self.lower.as_mut() { l.initialize(precision)?; }
        if let Some(u) = self.upper.as_mut() { u.initialize(precision)?; }
        self.graph.clear();
        self.num_backups = 0;
        info!("bounds initialized to precision {:e} (dual point backups: {})", precision, self.dual_point);
        Ok(())
    }

    #[inline] pub fn model(&self) -> &Rc<dyn Model> { &self.model }
    #[inline] pub fn graph(&self) -> &SearchGraph { &self.graph }
    #[inline] pub fn graph_mut(&mut self) -> &mut SearchGraph { &mut self.graph }
    #[inline] pub fn node(&self, id: NodeId) -> &Node { self.graph.node(id) }
    #[inline] pub fn num_backups(&self) -> u64 { self.num_backups }
    #[inline] pub fn discount(&self) -> Reward { self.model.discount() }
    #[inline] pub fn maintains_lower(&self) -> bool { self.lower.is_some() }
    #[inline] pub fn maintains_upper(&self) -> bool { self.upper.is_some() }
    pub fn lower(&self) -> Option<&dyn BoundRep> { self.lower.as_deref() }
    pub fn upper(&self) -> Option<&dyn BoundRep> { self.upper.as_deref() }

    pub fn get_node(&mut self, state: &State) -> NodeId {
        let BoundPair { model, graph, lower, upper, .. } = self;
        graph.get_node(&**model, state, &|n| init_node_bounds(&*lower, &*upper, n))
    }

    pub fn get_root_node(&mut self) -> NodeId {
        let BoundPair { model, graph, lower, upper, .. } = self;
        graph.get_root_node(&**model, &|n| init_node_bounds(&*lower, &*upper, n))
    }

    /// Lookup that never creates a node
    pub fn get_node_or_null(&self, state: &State) -> Option<NodeId> {
        self.graph.lookup(state)
    }

    pub fn expand(&mut self, id: NodeId) {
        let BoundPair { model, graph, lower, upper, .. } = self;
        graph.expand(&**model, id, &|n| init_node_bounds(&*lower, &*upper, n));
        for q in graph.node_mut(id).q.iter_mut() {
            q.ub_val = None;
        }
    }

    /// Back up one node (expanding it first if needed). Returns the action with the highest
    /// upper Q-value, or the lower side's best action when no upper bound is kept.
    pub fn update(&mut self, id: NodeId) -> Option<ActionId> {
        if self.graph.node(id).fringe {
            self.expand(id);
        }
        let best = if self.dual_point {
            self.update_dual_point(id)
        } else {
            let BoundPair { graph, lower, upper, .. } = self;
            let lb_action = lower.as_mut().and_then(|l| l.update(graph, id));
            let ub_action = upper.as_mut().and_then(|u| u.update(graph, id));
            ub_action.or(lb_action)
        };
        self.num_backups += 1;
        best
    }

    /// Both point bounds in a single pass over each action's successors
    fn update_dual_point(&mut self, id: NodeId) -> Option<ActionId> {
        let gamma = self.model.discount();
        let node = self.graph.node(id);
        let mut lbs = Vec::with_capacity(node.num_actions());
        let mut ubs = Vec::with_capacity(node.num_actions());
        for q in node.q.iter() {
            let (mut lb, mut ub) = (0.0, 0.0);
            for (_, e) in q.edges() {
                let succ = self.graph.node(e.next);
                lb += e.obs_prob * succ.lb_val;
                ub += e.obs_prob * succ.ub_val;
            }
            lbs.push(q.immediate_reward + gamma * lb);
            ubs.push(q.immediate_reward + gamma * ub);
        }
        let node = self.graph.node_mut(id);
        for (q, (lb, ub)) in node.q.iter_mut().zip(lbs.iter().zip(ubs.iter())) {
            q.lb_val = Some(*lb);
            q.ub_val = Some(*ub);
        }
        let (_, best_lb) = arg_max(lbs)?;
        let (action, best_ub) = arg_max(ubs)?;
        node.lb_val = node.lb_val.max(best_lb);
        node.ub_val = node.ub_val.min(best_ub);
        Some(action)
    }

    fn side(&self, side: Polarity) -> &Side {
        match side { Polarity::Lower => &self.lower, Polarity::Upper => &self.upper }
    }

    /// Cached value when the state is in the graph, otherwise the representation's own estimate
    fn value_of(&self, state: &State, side: Polarity) -> Option<Reward> {
        let rep = self.side(side).as_ref()?;
        if let Some(id) = self.graph.lookup(state) {
            return Some(side.of(self.graph.node(id)));
        }
        if self.model.is_terminal(state) {
            return Some(0.0);
        }
        Some(rep.get_value(&self.graph, state, None))
    }

    /// One-step lookahead Q-value on one side
    fn lookahead_q(&self, state: &State, action: ActionId, side: Polarity) -> Option<Reward> {
        self.side(side).as_ref()?;
        if self.model.is_terminal(state) {
            return Some(0.0);
        }
        let gamma = self.model.discount();
        if let Some(id) = self.graph.lookup(state) {
            let node = self.graph.node(id);
            if !node.fringe {
                let q = &node.q[action];
                let future: Reward = q.edges().map(|(_, e)| e.obs_prob * side.of(self.graph.node(e.next))).sum();
                return Some(q.immediate_reward + gamma * future);
            }
        }
        let mut future = 0.0;
        for (o, p) in self.model.outcome_probs(state, action).iter() {
            if p <= self.graph_epsilon() { continue; }
            let next = self.model.next_state(state, action, o);
            future += p * self.value_of(&next, side)?;
        }
        Some(self.model.reward(state, action) + gamma * future)
    }

    fn graph_epsilon(&self) -> Probability {
        self.graph.outcome_epsilon()
    }

    /// Action to execute at `state`: the lower bound's own best-plane action if it has one,
    /// otherwise a one-step lookahead on the lower bound (upper if no lower is kept).
    /// Ties go to the lowest action index.
    pub fn choose_action(&self, state: &State) -> ActionId {
        if let Some(lower) = &self.lower {
            if let Some(a) = lower.best_action(state) {
                return a;
            }
        }
        let side = if self.lower.is_some() { Polarity::Lower } else { Polarity::Upper };
        let values = (0..self.model.num_actions()).map(|a| self.lookahead_q(state, a, side).unwrap_or(Reward::NEG_INFINITY));
        arg_max(values).map(|(a, _)| a).unwrap_or(0)
    }

    pub fn value_at(&self, state: &State) -> ValueInterval {
        ValueInterval::new(self.value_of(state, Polarity::Lower), self.value_of(state, Polarity::Upper))
    }

    /// Q-value interval of one action. Panics if `action` is not one of the model's actions.
    pub fn q_value(&self, state: &State, action: ActionId) -> ValueInterval {
        assert!(action < self.model.num_actions(), "action {} past action count {}", action, self.model.num_actions());
        ValueInterval::new(self.lookahead_q(state, action, Polarity::Lower), self.lookahead_q(state, action, Polarity::Upper))
    }

    /// Width of a cached node
    #[inline] pub fn width(&self, id: NodeId) -> Reward { self.graph.node(id).width() }

    /// Action with the highest cached upper Q-value; falls back to the lower side
    pub fn max_ub_action(&self, id: NodeId) -> ActionId {
        let node = self.graph.node(id);
        let values: Vec<Reward> = if self.upper.is_some() {
            node.q.iter().map(|q| q.ub_val.unwrap_or(Reward::INFINITY)).collect()
        } else {
            node.q.iter().map(|q| q.lb_val.unwrap_or(Reward::NEG_INFINITY)).collect()
        };
        arg_max(values).map(|(a, _)| a).unwrap_or(0)
    }

    /// Write the lower bound's planes as a policy file
    pub fn write_policy(&mut self, path: &Path, can_modify_bounds: bool) -> SolverResult<()> {
        let planes = self.lower.as_mut()
            .and_then(|l| l.as_max_planes_mut())
            .ok_or_else(|| SolverError::Unsupported("policy output needs a convex lower bound".into()))?;
        planes.write_policy(path, can_modify_bounds)?;
        debug!("policy written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoundKind;
    use crate::models::catalog;

    fn chain_pair(lower: bool, upper: bool) -> BoundPair {
        let model: Rc<dyn Model> = Rc::new(catalog::two_state_chain());
        let mut pair = BoundPair::new(model, &SolverConfig::default(), lower, upper).unwrap();
        pair.initialize(1e-5).unwrap();
        pair
    }

    #[test]
    fn dual_point_backup_brackets_the_value() {
        let mut pair = chain_pair(true, true);
        let root = pair.get_root_node();
        for _ in 0..100 {
            pair.update(root);
        }
        let node = pair.node(root);
        assert!(node.lb_val <= 1.0 + 1e-9 && 1.0 - 1e-9 <= node.ub_val);
        assert!(node.width() < 1e-3);
        assert_eq!(pair.num_backups(), 100);
        assert_eq!(pair.choose_action(&node.state.clone()), 0);
    }

    #[test]
    fn second_backup_with_fixed_successors_changes_nothing() {
        let model: Rc<dyn Model> = Rc::new(catalog::observable_grid());
        let mut pair = BoundPair::new(model, &SolverConfig::default(), true, true).unwrap();
        pair.initialize(1e-5).unwrap();
        let root = pair.get_root_node();
        pair.update(root);
        let snapshot = |pair: &BoundPair| {
            let node = pair.node(root);
            let q: Vec<_> = node.q.iter().map(|e| (e.outcomes.clone(), e.lb_val, e.ub_val)).collect();
            (node.lb_val, node.ub_val, node.fringe, q, pair.graph().len(), pair.graph().num_expanded())
        };
        let first = snapshot(&pair);
        assert!(!first.2);
        pair.update(root);
        assert_eq!(snapshot(&pair), first);
    }

    #[test]
    fn single_sided_pairs_leave_the_other_side_empty() {
        let mut upper_only = chain_pair(false, true);
        let s0 = upper_only.model().initial_state();
        let root = upper_only.get_root_node();
        upper_only.update(root);
        let v = upper_only.value_at(&s0);
        assert!(v.lower.is_none());
        assert!(v.upper.is_some());
        assert!(v.width().is_infinite());
        assert!(BoundPair::new(Rc::new(catalog::two_state_chain()), &SolverConfig::default(), false, false).is_err());
    }

    #[test]
    fn q_values_off_the_graph_use_the_initial_bounds() {
        let pair = chain_pair(true, true);
        let s0 = pair.model().initial_state();
        let q = pair.q_value(&s0, 0);
        // a0 pays 1 and ends
        assert_eq!(q.lower, Some(1.0));
        assert_eq!(q.upper, Some(1.0));
        assert!(pair.get_node_or_null(&s0).is_none());
    }

    #[test]
    fn convex_bounds_need_a_belief_model() {
        let model: Rc<dyn Model> = Rc::new(catalog::two_state_chain());
        let config = SolverConfig::default().with_bounds(BoundKind::Convex, BoundKind::Point);
        assert!(matches!(BoundPair::new(model, &config, true, true), Err(SolverError::IncompatibleModel(_))));
    }

    #[test]
    fn policy_output_needs_planes() {
        let mut pair = chain_pair(true, true);
        let path = std::env::temp_dir().join("anytime_mdp_no_planes.json");
        assert!(matches!(pair.write_policy(&path, true), Err(SolverError::Unsupported(_))));
    }
}
