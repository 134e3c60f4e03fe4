//! HDP: depth-first search over the greedy subgraph that labels strongly connected
//! components solved (Tarjan) once every member is consistent and within the target.
//!
//! A node is inconsistent when backing it up still moves its bounds by more than a small
//! fraction of the target; the search stops descending there for this trial. The DFS runs
//! on an explicit frame stack.

use crate::config::SolverConfig;
use crate::errors::SolverResult;
use crate::graph::{Node, NodeHook, NodeId, SearchData};
use crate::search::{SearchCore, TrialStrategy};
use crate::utils::*;

/// Consistency threshold as a fraction of the target precision
const RESIDUAL_FRACTION: Reward = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Tarjan { solved: bool, visit: u64, index: usize, low_link: usize, on_stack: bool }

fn tarjan(core: &SearchCore, id: NodeId) -> Tarjan {
    match core.node(id).search_data {
        SearchData::Hdp { solved, visit, index, low_link, on_stack } => Tarjan { solved, visit, index, low_link, on_stack },
        other => Tarjan { solved: other.is_solved(), visit: 0, index: 0, low_link: 0, on_stack: false },
    }
}

fn set_tarjan(core: &mut SearchCore, id: NodeId, t: Tarjan) {
    core.bounds.graph_mut().node_mut(id).search_data =
        SearchData::Hdp { solved: t.solved, visit: t.visit, index: t.index, low_link: t.low_link, on_stack: t.on_stack };
}

/// One suspended DFS call
struct Frame {
    id: NodeId,
    depth: usize,
    successors: Vec<NodeId>,
    next: usize,
    flag: bool,
}

pub struct Hdp {
    residual: Reward,
    visit: u64,
    next_index: usize,
    stack: Vec<NodeId>,
}

impl Hdp {
    pub fn new(config: &SolverConfig) -> Self {
        Hdp { residual: config.target_precision * RESIDUAL_FRACTION, visit: 0, next_index: 0, stack: vec![] }
    }

    /// Visit a node for the first time this trial. Returns the frame to descend into, or the
    /// flag to hand straight back to the parent.
    fn enter(&mut self, core: &mut SearchCore, id: NodeId, depth: usize) -> Result<Frame, bool> {
        let mut t = tarjan(core, id);
        if t.solved {
            return Err(false);
        }
        if core.is_terminal(id) {
            t.solved = true;
            set_tarjan(core, id, t);
            return Err(false);
        }
        let (lb, ub) = (core.node(id).lb_val, core.node(id).ub_val);
        let was_fringe = core.node(id).fringe;
        core.update(id);
        let change = (ub - core.node(id).ub_val) + (core.node(id).lb_val - lb);
        if was_fringe || change > self.residual || depth >= core.max_depth {
            return Err(true);
        }
        t = Tarjan { solved: false, visit: self.visit, index: self.next_index, low_link: self.next_index, on_stack: true };
        self.next_index += 1;
        set_tarjan(core, id, t);
        self.stack.push(id);
        let action = core.greedy_action(id);
        let successors = core.successors(id, action).into_iter().map(|(_, _, n)| n).collect();
        Ok(Frame { id, depth, successors, next: 0, flag: false })
    }

    /// All children done: close the component if this node is its root
    fn leave(&mut self, core: &mut SearchCore, frame: &Frame) -> bool {
        let mut flag = frame.flag;
        let t = tarjan(core, frame.id);
        if t.low_link == t.index {
            let mut members = vec![];
            while let Some(top) = self.stack.pop() {
                members.push(top);
                if top == frame.id { break; }
            }
            let tight = !flag && members.iter().all(|&m| core.width(m) <= core.target_precision);
            for m in members {
                let mut mt = tarjan(core, m);
                mt.on_stack = false;
                mt.solved = tight;
                set_tarjan(core, m, mt);
            }
            flag |= !tight;
        }
        if flag {
            core.update(frame.id);
        }
        flag
    }
}

impl TrialStrategy for Hdp {
    fn name(&self) -> &'static str { "hdp" }

    fn new_node_hook(&self) -> Option<NodeHook> {
        Some(Box::new(|n: &mut Node| {
            n.search_data = SearchData::Hdp { solved: n.is_terminal, visit: 0, index: 0, low_link: 0, on_stack: false }
        }))
    }

    fn do_trial(&mut self, core: &mut SearchCore, root: NodeId) -> SolverResult<()> {
        self.visit += 1;
        self.next_index = 0;
        self.stack.clear();
        let mut frames = match self.enter(core, root, 0) {
            Ok(frame) => vec![frame],
            Err(_) => return Ok(()),
        };
        while let Some(frame) = frames.last_mut() {
            if frame.next < frame.successors.len() {
                let (parent, child, depth) = (frame.id, frame.successors[frame.next], frame.depth + 1);
                frame.next += 1;
                let ct = tarjan(core, child);
                if ct.solved {
                    continue;
                }
                if ct.visit == self.visit {
                    // seen this trial: either on the current path/component or in one that
                    // already closed unsolved
                    let mut pt = tarjan(core, parent);
                    if ct.on_stack {
                        pt.low_link = pt.low_link.min(ct.index);
                        set_tarjan(core, parent, pt);
                    } else if let Some(f) = frames.last_mut() {
                        f.flag = true;
                    }
                    continue;
                }
                match self.enter(core, child, depth) {
                    Ok(child_frame) => frames.push(child_frame),
                    Err(flag) => if let Some(f) = frames.last_mut() { f.flag |= flag },
                }
                continue;
            }
            let Some(done) = frames.pop() else { break };
            let flag = self.leave(core, &done);
            if let Some(parent) = frames.last_mut() {
                parent.flag |= flag;
                let (pt, ct) = (tarjan(core, parent.id), tarjan(core, done.id));
                if pt.low_link > ct.low_link {
                    set_tarjan(core, parent.id, Tarjan { low_link: ct.low_link, ..pt });
                }
            }
        }
        Ok(())
    }
}
