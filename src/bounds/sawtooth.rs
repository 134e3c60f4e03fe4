//! # Sawtooth upper bound
//!
//! Convex upper bound over beliefs built from corner values `c` (one per hidden state)
//! plus a set of interior points `(b_i, v_i)`:
//!
//! `V(b) = min(c·b, min_i [c·b + ρ_i(b) (v_i - c·b_i)])`, with `ρ_i(b) = min_{s ∈ supp(b_i)} b(s) / b_i(s)`.
//!
//! Each point only pulls the bound down inside the cone of beliefs that contain it, so the
//! interpolant stays an upper bound of any convex function lying under all the points.

use std::rc::Rc;
use log::{debug, trace};
use crate::bounds::{require_belief_model, BoundRep, Polarity};
use crate::config::SolverConfig;
use crate::errors::SolverResult;
use crate::graph::{Node, NodeId, SearchGraph};
use crate::linalg::SparseVec;
use crate::utils::*;

#[derive(Clone, Debug, PartialEq)]
pub struct BoundPoint {
    pub belief: State,
    pub value: Reward,
}

/// `ρ(b) = min_{s ∈ supp(point)} b(s) / point(s)`, zero when the point leaves `b`'s support
fn ratio(belief: &State, point: &State) -> Reward {
    let mut rho = Reward::INFINITY;
    for (s, p) in point.iter() {
        let b = belief.get(s);
        if b <= 0.0 { return 0.0; }
        rho = rho.min(b / p);
    }
    if rho.is_finite() { rho } else { 0.0 }
}

pub struct Sawtooth {
    discount: Reward,
    num_states: usize,
    initial: Box<dyn InitialBound>,
    corners: Vec<Reward>,
    points: Vec<BoundPoint>,
    prune_growth_factor: f64,
    prune_increment: usize,
    last_prune_size: usize,
}

impl Sawtooth {
    pub fn new(model: Rc<dyn Model>, initial: Box<dyn InitialBound>, config: &SolverConfig) -> SolverResult<Self> {
        let num_states = require_belief_model(&model, "sawtooth upper bound")?;
        Ok(Sawtooth {
            discount: model.discount(),
            num_states,
            initial,
            corners: vec![Reward::INFINITY; num_states],
            points: vec![],
            prune_growth_factor: config.prune_growth_factor,
            prune_increment: config.prune_increment,
            last_prune_size: 0,
        })
    }

    #[inline] pub fn corners(&self) -> &[Reward] { &self.corners }
    #[inline] pub fn points(&self) -> &[BoundPoint] { &self.points }

    /// `v_i - c·b_i`, never positive for a point worth keeping
    fn drop_below_corners(&self, point: &BoundPoint) -> Reward {
        point.value - point.belief.dot_dense(&self.corners)
    }

    pub fn interpolate(&self, belief: &State) -> Reward {
        let base = belief.dot_dense(&self.corners);
        self.points.iter()
            .map(|p| (ratio(belief, &p.belief), p))
            .filter(|(rho, _)| *rho > 0.0)
            .map(|(rho, p)| base + rho * self.drop_below_corners(p))
            .fold(base, Reward::min)
    }

    /// Record a backed-up value. Single-state beliefs lower their corner directly; other
    /// beliefs are kept only if they improve on the current interpolant.
    pub fn add_point(&mut self, belief: &State, value: Reward) {
        if belief.nnz() == 1 {
            let s = belief.entries()[0].0;
            self.corners[s] = self.corners[s].min(value);
            return;
        }
        if value < self.interpolate(belief) - DOMINANCE_EPS {
            trace!("sawtooth point {:?} -> {:.4}", belief, value);
            self.points.push(BoundPoint { belief: belief.clone(), value });
            if self.points.len() as f64 > self.last_prune_size as f64 * self.prune_growth_factor + self.prune_increment as f64 {
                self.prune();
            }
        }
    }

    /// Drop points that never lower the interpolant: those at or above the corner plane, and
    /// those whose cone is covered by a steeper point on a smaller support.
    pub fn prune(&mut self) {
        let before = self.points.len();
        let deltas: Vec<Reward> = self.points.iter().map(|p| self.drop_below_corners(p)).collect();
        let mut keep = vec![true; self.points.len()];
        for i in 0..self.points.len() {
            if deltas[i] >= 0.0 {
                keep[i] = false;
                continue;
            }
            keep[i] = !(0..self.points.len()).any(|j| {
                j != i && keep[j] && deltas[j] < 0.0 && self.covers_point(j, i, &deltas)
            });
        }
        let mut k = 0;
        self.points.retain(|_| { k += 1; keep[k - 1] });
        self.last_prune_size = self.points.len();
        debug!("pruned sawtooth points {} -> {}", before, self.points.len());
    }

    /// Point `j` lowers the bound at least as much as point `i` everywhere `i` acts:
    /// `supp(b_j) ⊆ supp(b_i)` and `|δ_j| b_i(s) >= |δ_i| b_j(s)` on `supp(b_j)`.
    fn covers_point(&self, j: usize, i: usize, deltas: &[Reward]) -> bool {
        let (bi, bj) = (&self.points[i].belief, &self.points[j].belief);
        let (di, dj) = (deltas[i].abs(), deltas[j].abs());
        bj.iter().all(|(s, pj)| {
            let pi = bi.get(s);
            pi > 0.0 && dj * pi >= di * pj * (1.0 - 1e-12)
        })
    }

    /// Refresh a successor's upper value from the interpolant
    fn successor_value(&self, graph: &mut SearchGraph, id: NodeId) -> Reward {
        let node = graph.node_mut(id);
        if !node.is_terminal {
            node.ub_val = node.ub_val.min(self.interpolate(&node.state));
        }
        node.ub_val
    }
}

impl BoundRep for Sawtooth {
    fn polarity(&self) -> Polarity { Polarity::Upper }
    fn is_point(&self) -> bool { false }

    fn initialize(&mut self, precision: Reward) -> SolverResult<()> {
        self.initial.initialize(precision)?;
        self.corners = (0..self.num_states)
            .map(|s| self.initial.get_value(&SparseVec::unit(self.num_states, s)))
            .collect();
        self.points.clear();
        self.last_prune_size = 0;
        debug!("sawtooth bound initialized, corners {:?}", self.corners);
        Ok(())
    }

    fn get_value(&self, graph: &SearchGraph, state: &State, node: Option<NodeId>) -> Reward {
        let v = self.interpolate(state);
        match node {
            Some(id) => v.min(graph.node(id).ub_val),
            None => v,
        }
    }

    fn init_node_bound(&self, node: &mut Node) {
        node.ub_val = self.interpolate(&node.state);
    }

    fn update(&mut self, graph: &mut SearchGraph, id: NodeId) -> Option<ActionId> {
        debug_assert!(!graph.node(id).fringe, "backup of unexpanded node {:?}", id);
        let num_actions = graph.node(id).num_actions();
        let mut q_values = Vec::with_capacity(num_actions);
        for a in 0..num_actions {
            let edges: Vec<(Probability, NodeId)> = graph.node(id).q[a].edges().map(|(_, e)| (e.obs_prob, e.next)).collect();
            let future: Reward = edges.into_iter().map(|(p, next)| p * self.successor_value(graph, next)).sum();
            q_values.push(graph.node(id).q[a].immediate_reward + self.discount * future);
        }
        let node = graph.node_mut(id);
        for (a, v) in q_values.iter().enumerate() {
            node.q[a].ub_val = Some(*v);
        }
        let (action, best) = arg_max(q_values)?;
        node.ub_val = node.ub_val.min(best);
        if !node.is_terminal {
            let (belief, value) = (node.state.clone(), node.ub_val);
            self.add_point(&belief, value);
        }
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog;
    use proptest::prelude::*;

    fn bare(corners: Vec<Reward>) -> Sawtooth {
        let model: Rc<dyn Model> = Rc::new(catalog::tiger());
        let config = SolverConfig::default();
        let initial = model.new_upper_bound(&config).unwrap();
        let mut bound = Sawtooth::new(model, initial, &config).unwrap();
        bound.corners = corners;
        bound
    }

    #[test]
    fn interpolates_between_corners_and_points() {
        let mut bound = bare(vec![10.0, 10.0]);
        let mid = SparseVec::from_dense(&[0.5, 0.5]);
        assert_eq!(bound.interpolate(&mid), 10.0);
        bound.add_point(&mid, 4.0);
        assert!((bound.interpolate(&mid) - 4.0).abs() < 1e-12);
        // halfway to a corner, half the drop
        let quarter = SparseVec::from_dense(&[0.75, 0.25]);
        assert!((bound.interpolate(&quarter) - 7.0).abs() < 1e-12);
        // corners are untouched by interior points
        assert_eq!(bound.interpolate(&SparseVec::unit(2, 0)), 10.0);
    }

    #[test]
    fn corner_updates_only_decrease() {
        let mut bound = bare(vec![10.0, 10.0]);
        bound.add_point(&SparseVec::unit(2, 1), 3.0);
        bound.add_point(&SparseVec::unit(2, 1), 8.0);
        assert_eq!(bound.corners(), &[10.0, 3.0]);
        assert!(bound.points().is_empty());
    }

    #[test]
    fn prune_drops_points_that_never_bind() {
        let mut bound = bare(vec![10.0, 10.0]);
        bound.add_point(&SparseVec::from_dense(&[0.5, 0.5]), 4.0);
        bound.add_point(&SparseVec::from_dense(&[0.6, 0.4]), 9.9);
        assert_eq!(bound.points().len(), 1);
        // a lower corner makes the remaining point useless
        bound.corners = vec![2.0, 2.0];
        bound.prune();
        assert!(bound.points().is_empty());
    }

    proptest! {
        #[test]
        fn pruning_never_changes_the_interpolant(
            points in prop::collection::vec((0.01f64..0.99, -5.0f64..10.0), 1..15),
            q in 0.0f64..=1.0,
        ) {
            let mut bound = bare(vec![10.0, 8.0]);
            for (p, v) in points {
                bound.add_point(&SparseVec::from_dense(&[p, 1.0 - p]), v);
            }
            let b = SparseVec::from_dense(&[q, 1.0 - q]);
            let before = bound.interpolate(&b);
            bound.prune();
            let after = bound.interpolate(&b);
            prop_assert!((after - before).abs() <= 1e-9 * (1.0 + before.abs()));
        }

        #[test]
        fn interpolant_stays_above_a_convex_function_under_the_points(
            samples in prop::collection::vec(0.0f64..=1.0, 1..10),
            query in 0.0f64..=1.0,
        ) {
            // V(b) = max(2b0, 2b1) is convex; every recorded value is on or above it
            let v = |p: f64| (2.0 * p).max(2.0 * (1.0 - p));
            let mut bound = bare(vec![2.0, 2.0]);
            for p in samples {
                bound.add_point(&SparseVec::from_dense(&[p, 1.0 - p]), v(p));
            }
            let b = SparseVec::from_dense(&[query, 1.0 - query]);
            prop_assert!(bound.interpolate(&b) >= v(query) - 1e-9);
        }
    }
}
