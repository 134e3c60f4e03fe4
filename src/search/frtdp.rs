//! Focused RTDP. Every node carries a priority: a fringe node's is its excess width
//! `Δ = width - target/2`; an expanded node takes the best `γ P(o) prio(succ)` over the
//! greedy action's outcomes, or its own `Δ` once that is no longer positive. Trials follow
//! the priority and are capped by an adaptive depth.
//!
//! Each backup is scored by its update quality, the occupancy of the node times the width it
//! removed. The cap grows when the deep half of a capped trial did at least as well as the
//! trial overall, and also whenever a capped trial left the root untouched.

use log::debug;
use crate::config::SolverConfig;
use crate::errors::SolverResult;
use crate::graph::{Node, NodeHook, NodeId, SearchData};
use crate::search::{SearchCore, TrialStrategy};
use crate::utils::*;

pub struct Frtdp {
    half_target: Reward,
    depth_limit: f64,
    depth_growth: f64,
}

fn prio(core: &SearchCore, id: NodeId, half_target: Reward) -> Reward {
    match core.node(id).search_data {
        SearchData::Focused { prio } => prio,
        _ => core.width(id) - half_target,
    }
}

fn set_prio(core: &mut SearchCore, id: NodeId, prio: Reward) {
    core.bounds.graph_mut().node_mut(id).search_data = SearchData::Focused { prio };
}

/// Next step of a trial after one backup
struct Step {
    next: Option<(NodeId, Probability)>,
    gain: Reward,
}

impl Frtdp {
    pub fn new(config: &SolverConfig) -> Self {
        Frtdp {
            half_target: config.target_precision / 2.0,
            depth_limit: config.frtdp_initial_depth,
            depth_growth: config.frtdp_depth_growth,
        }
    }

    #[inline] pub fn depth_limit(&self) -> f64 { self.depth_limit }

    /// Back up `id` and refresh its priority. The step carries the outcome to follow, if the
    /// node still has positive priority.
    fn update(&self, core: &mut SearchCore, id: NodeId) -> Step {
        let (action, gain) = core.update_with_gain(id);
        let delta = core.width(id) - self.half_target;
        if core.is_terminal(id) || delta <= 0.0 {
            set_prio(core, id, delta);
            return Step { next: None, gain };
        }
        let gamma = core.discount();
        let half = self.half_target;
        let best = action.and_then(|a| core.best_outcome(id, a, |p, next| gamma * p * prio(core, next, half)));
        let next = match best {
            Some((p, next, score)) => {
                set_prio(core, id, score);
                if score > 0.0 { Some((next, p)) } else { None }
            }
            None => {
                set_prio(core, id, delta);
                None
            }
        };
        Step { next, gain }
    }

    fn grow_depth_limit(&mut self, max_depth: usize) {
        self.depth_limit = (self.depth_limit * self.depth_growth).max(self.depth_limit + 1.0).min(max_depth as f64);
        debug!("frtdp depth limit raised to {:.1}", self.depth_limit);
    }
}

impl TrialStrategy for Frtdp {
    fn name(&self) -> &'static str { "frtdp" }

    fn new_node_hook(&self) -> Option<NodeHook> {
        let half = self.half_target;
        Some(Box::new(move |n: &mut Node| n.search_data = SearchData::Focused { prio: n.width() - half }))
    }

    fn do_trial(&mut self, core: &mut SearchCore, root: NodeId) -> SolverResult<()> {
        let cap = self.depth_limit.min(core.max_depth as f64);
        let gamma = core.discount();
        let root_width = core.width(root);
        // (node, depth, occupancy) of every node on the way down
        let mut path: Vec<(NodeId, usize, Probability)> = vec![];
        // (depth, update quality) of every backup this trial
        let mut quality: Vec<(usize, Reward)> = vec![];
        let mut here = root;
        let mut occupancy = 1.0;
        let mut depth = 0;
        let mut hit_cap = false;
        loop {
            let step = self.update(core, here);
            quality.push((depth, occupancy * step.gain));
            let Some((next, p)) = step.next else { break };
            if depth as f64 >= cap {
                hit_cap = true;
                break;
            }
            path.push((here, depth, occupancy));
            occupancy *= gamma * p;
            here = next;
            depth += 1;
        }
        for &(id, d, occ) in path.iter().rev() {
            let step = self.update(core, id);
            quality.push((d, occ * step.gain));
        }

        if hit_cap {
            let mean = |xs: &[Reward]| xs.iter().sum::<Reward>() / xs.len().max(1) as Reward;
            let all: Vec<Reward> = quality.iter().map(|(_, q)| *q).collect();
            let deep: Vec<Reward> = quality.iter().filter(|(d, _)| *d as f64 > cap / 2.0).map(|(_, q)| *q).collect();
            let stalled = core.width(root) >= root_width - DOMINANCE_EPS;
            if stalled || (!deep.is_empty() && mean(&deep) >= mean(&all)) {
                self.grow_depth_limit(core.max_depth);
            }
        }
        Ok(())
    }
}
