//! Labeled RTDP: RTDP trials that stop at solved nodes (or, like every trial, once the
//! excess width is gone), followed by a solved-labeling pass over the greedy subgraph below
//! each visited node, deepest first.

use std::collections::HashSet;
use crate::errors::SolverResult;
use crate::graph::{Node, NodeHook, NodeId, SearchData};
use crate::search::{SearchCore, TrialStrategy};

pub struct Lrtdp;

fn is_solved(core: &SearchCore, id: NodeId) -> bool {
    core.node(id).search_data.is_solved()
}

fn mark_solved(core: &mut SearchCore, id: NodeId) {
    core.bounds.graph_mut().node_mut(id).search_data = SearchData::Label { solved: true };
}

impl Lrtdp {
    /// Label `id` and its greedy descendants solved if every one of them is within the
    /// target; otherwise back the explored nodes up, deepest first.
    fn check_solved(core: &mut SearchCore, id: NodeId) -> bool {
        let mut converged = true;
        let mut open = vec![];
        let mut closed = vec![];
        let mut seen = HashSet::new();
        if !is_solved(core, id) {
            open.push(id);
            seen.insert(id);
        }
        while let Some(s) = open.pop() {
            closed.push(s);
            if core.node(s).fringe {
                core.update(s);
            }
            if core.width(s) > core.target_precision {
                converged = false;
                continue;
            }
            let action = core.greedy_action(s);
            for (_, _, next) in core.successors(s, action) {
                if !is_solved(core, next) && seen.insert(next) {
                    open.push(next);
                }
            }
        }
        if converged {
            for s in closed {
                mark_solved(core, s);
            }
        } else {
            while let Some(s) = closed.pop() {
                core.update(s);
            }
        }
        converged
    }
}

impl TrialStrategy for Lrtdp {
    fn name(&self) -> &'static str { "lrtdp" }

    fn new_node_hook(&self) -> Option<NodeHook> {
        Some(Box::new(|n: &mut Node| n.search_data = SearchData::Label { solved: n.is_terminal }))
    }

    fn do_trial(&mut self, core: &mut SearchCore, root: NodeId) -> SolverResult<()> {
        let mut visited = vec![];
        let mut here = root;
        let mut depth = 0;
        while !is_solved(core, here) {
            visited.push(here);
            let action = core.update(here);
            if core.is_terminal(here) || core.excess_width(here, depth) <= 0.0 || depth >= core.max_depth {
                break;
            }
            let Some(action) = action else { break };
            let Some(next) = core.sample_outcome(here, action) else { break };
            here = next;
            depth += 1;
        }
        while let Some(id) = visited.pop() {
            if !Self::check_solved(core, id) {
                break;
            }
        }
        // whatever the labeling pass did not reach is re-backed up bottom-up
        core.back_up_path(&visited);
        Ok(())
    }
}
