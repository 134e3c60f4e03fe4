//! Real-time dynamic programming: follow the greedy upper-bound action, sample the outcome.

use crate::errors::SolverResult;
use crate::graph::NodeId;
use crate::search::{SearchCore, TrialStrategy};

pub struct Rtdp;

impl TrialStrategy for Rtdp {
    fn name(&self) -> &'static str { "rtdp" }

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
            let Some(next) = core.sample_outcome(here, action) else { break };
            path.push(here);
            here = next;
            depth += 1;
        }
        core.back_up_path(&path);
        Ok(())
    }
}
