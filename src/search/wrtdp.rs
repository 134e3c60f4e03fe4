//! Weighted RTDP: like HSVI, but outcomes are scored by the discounted occupancy of the
//! successor, and a trial may also end early once the occupancy-weighted width left at the
//! current node is negligible.
//!
//! The early stop is adaptive. A trial it cut short must shrink the root width by at least
//! `cutoff * target`; otherwise the cutoff is halved, so repeated trials can never settle on
//! a path whose backups are all fixed points.

use log::debug;
use crate::config::SolverConfig;
use crate::errors::SolverResult;
use crate::graph::NodeId;
use crate::search::{SearchCore, TrialStrategy};
use crate::utils::*;

pub struct Wrtdp {
    occupancy_cutoff: f64,
}

impl Wrtdp {
    pub fn new(config: &SolverConfig) -> Self {
        Wrtdp { occupancy_cutoff: config.wrtdp_occupancy_cutoff }
    }

    #[inline] pub fn occupancy_cutoff(&self) -> f64 { self.occupancy_cutoff }
}

impl TrialStrategy for Wrtdp {
    fn name(&self) -> &'static str { "wrtdp" }

    fn do_trial(&mut self, core: &mut SearchCore, root: NodeId) -> SolverResult<()> {
        let gamma = core.discount();
        let root_width = core.width(root);
        let mut path = vec![];
        let mut here = root;
        let mut occupancy: Probability = 1.0;
        let mut depth = 0;
        let mut cut_short = false;
        loop {
            let action = core.update(here);
            if core.is_terminal(here) || core.excess_width(here, depth) <= 0.0 || depth >= core.max_depth {
                break;
            }
            if occupancy * core.width(here) <= self.occupancy_cutoff * core.target_precision {
                cut_short = true;
                break;
            }
            let Some(action) = action else { break };
            let choice = core.best_outcome(here, action, |p, next| occupancy * gamma * p * core.excess_width(next, depth + 1));
            let Some((p, next, _)) = choice else { break };
            path.push(here);
            occupancy *= gamma * p;
            here = next;
            depth += 1;
        }
        core.back_up_path(&path);

        if cut_short && root_width - core.width(root) < self.occupancy_cutoff * core.target_precision {
            self.occupancy_cutoff /= 2.0;
            debug!("wrtdp occupancy cutoff lowered to {:e}", self.occupancy_cutoff);
        }
        Ok(())
    }
}
