//! Heuristic search value iteration: greedy upper-bound action, then the outcome with the
//! largest probability-weighted excess width. The target is inflated by `γ^-depth` so deep
//! nodes need less precision.

use crate::errors::SolverResult;
use crate::graph::NodeId;
use crate::search::{SearchCore, TrialStrategy};

pub struct Hsvi;

impl TrialStrategy for Hsvi {
    fn name(&self) -> &'static str { "hsvi" }

    fn do_trial(&mut self, core: &mut SearchCore, root: NodeId) -> SolverResult<()> {
        let mut path = vec![];
        let mut here = root;
        let mut depth = 0;
        loop {
            let action = core.update(here);
            if core.is_terminal(here) || core.excess_width(here, depth) <= 0.0 || depth >= core.max_depth {
                break;
            }
            let Some(action) = action else { break };
            let choice = core.best_outcome(here, action, |p, next| p * core.excess_width(next, depth + 1));
            let Some((_, next, _)) = choice else { break };
            path.push(here);
            here = next;
            depth += 1;
        }
        core.back_up_path(&path);
        Ok(())
    }
}
