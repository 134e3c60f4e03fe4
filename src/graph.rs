//! # Search-graph cache
//!
//! Memoizes every state/belief the search has touched. Nodes live in an arena and are
//! addressed by [`NodeId`]; the cache only ever grows during a run.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use log::trace;
use crate::bounds::PlaneId;
use crate::linalg::StateKey;
use crate::utils::*;

/// Index of a node in the cache arena
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline] pub fn index(self) -> usize { self.0 as usize }
}

// ---------- Edges & Q-entries ----------
/// One populated (action, outcome) transition
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    pub obs_prob: Probability,
    pub next: NodeId,
}

/// Per-action data of an expanded node
#[derive(Clone, Debug)]
pub struct QEntry {
    pub immediate_reward: Reward,
    /// Indexed by outcome; `None` for outcomes that were too unlikely to expand
    pub outcomes: Vec<Option<Edge>>,
    pub lb_val: Option<Reward>,
    /// `None` until the first backup after expansion
    pub ub_val: Option<Reward>,
}

impl QEntry {
    #[inline] pub fn num_outcomes(&self) -> usize { self.outcomes.len() }

    pub fn outcome(&self, o: ObsId) -> Option<&Edge> {
        assert!(o < self.outcomes.len(), "outcome {} past cached outcome count {}", o, self.outcomes.len());
        self.outcomes[o].as_ref()
    }

    /// Populated outcomes in index order
    pub fn edges(&self) -> impl Iterator<Item = (ObsId, &Edge)> + '_ {
        self.outcomes.iter().enumerate().filter_map(|(o, e)| e.as_ref().map(|e| (o, e)))
    }
}

// ---------- Annotation slots ----------
/// Slot owned by the lower-bound representation
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundsData {
    /// Best plane found for this node's belief, and the plane-arena size at that moment.
    /// Only planes created after the stamp can beat it.
    pub best_plane: Option<(PlaneId, u64)>,
}

/// Slot owned by the active search strategy
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum SearchData {
    #[default]
    Empty,
    /// LRTDP solved label
    Label { solved: bool },
    /// HDP label plus Tarjan bookkeeping, `visit` stamps the trial that wrote the indices
    Hdp { solved: bool, visit: u64, index: usize, low_link: usize, on_stack: bool },
    /// FRTDP priority
    Focused { prio: Reward },
}

impl SearchData {
    pub fn is_solved(&self) -> bool {
        matches!(self, SearchData::Label { solved: true } | SearchData::Hdp { solved: true, .. })
    }
}

// ---------- Node ----------
pub struct Node {
    pub state: State,
    pub is_terminal: bool,
    pub lb_val: Reward,
    pub ub_val: Reward,
    /// True until the node is expanded
    pub fringe: bool,
    pub q: Vec<QEntry>,
    pub bounds_data: BoundsData,
    pub search_data: SearchData,
}

impl Node {
    fn new(state: State, is_terminal: bool) -> Self {
        Node {
            state,
            is_terminal,
            lb_val: Reward::NEG_INFINITY,
            ub_val: Reward::INFINITY,
            fringe: true,
            q: vec![],
            bounds_data: BoundsData::default(),
            search_data: SearchData::Empty,
        }
    }
    #[inline] pub fn width(&self) -> Reward { self.ub_val - self.lb_val }
    #[inline] pub fn num_actions(&self) -> usize { self.q.len() }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({:?}, lb={:.4}, ub={:.4}, fringe={}, terminal={})",
               self.state, self.lb_val, self.ub_val, self.fringe, self.is_terminal)
    }
}

/// Callback run once on every freshly created node (after its bounds are set)
pub type NodeHook = Box<dyn Fn(&mut Node)>;

// ---------- Cache ----------
pub struct SearchGraph {
    nodes: Vec<Node>,
    lookup: HashMap<StateKey, NodeId>,
    root: Option<NodeId>,
    outcome_epsilon: Probability,
    new_node_hooks: Vec<NodeHook>,
    num_expanded: usize,
}

impl SearchGraph {
    pub fn new(outcome_epsilon: Probability) -> Self {
        SearchGraph {
            nodes: vec![],
            lookup: HashMap::new(),
            root: None,
            outcome_epsilon,
            new_node_hooks: vec![],
            num_expanded: 0,
        }
    }

    pub fn add_new_node_hook(&mut self, hook: NodeHook) {
        self.new_node_hooks.push(hook);
    }

    /// Drop every cached node; hooks and the outcome threshold stay
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.lookup.clear();
        self.root = None;
        self.num_expanded = 0;
    }

    #[inline] pub fn outcome_epsilon(&self) -> Probability { self.outcome_epsilon }

    /// Number of cached nodes ("states touched")
    #[inline] pub fn len(&self) -> usize { self.nodes.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.nodes.is_empty() }
    #[inline] pub fn num_expanded(&self) -> usize { self.num_expanded }
    #[inline] pub fn root(&self) -> Option<NodeId> { self.root }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id.index()).unwrap_or_else(|| panic!("unknown node {:?}", id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(id.index()).unwrap_or_else(|| panic!("unknown node {:?}", id))
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Read-only lookup, never creates a node
    pub fn lookup(&self, state: &State) -> Option<NodeId> {
        self.lookup.get(&state.key()).copied()
    }

    /// Unique node for `state`, created and bound-initialized on first request
    pub fn get_node(&mut self, model: &dyn Model, state: &State, init: &dyn Fn(&mut Node)) -> NodeId {
        let key = state.key();
        if let Some(id) = self.lookup.get(&key) {
            return *id;
        }
        let mut node = Node::new(state.clone(), model.is_terminal(state));
        if node.is_terminal {
            node.lb_val = 0.0;
            node.ub_val = 0.0;
        } else {
            init(&mut node);
        }
        for hook in self.new_node_hooks.iter() {
            hook(&mut node);
        }
        let id = NodeId(self.nodes.len() as u32);
        trace!("new node {:?}: {:?}", id, node);
        self.nodes.push(node);
        self.lookup.insert(key, id);
        id
    }

    pub fn get_root_node(&mut self, model: &dyn Model, init: &dyn Fn(&mut Node)) -> NodeId {
        if let Some(id) = self.root {
            return id;
        }
        let id = self.get_node(model, &model.initial_state(), init);
        self.root = Some(id);
        id
    }

    /// Populate every action's reward and outcome edges, creating successor nodes as needed.
    /// Callers must check `fringe` first.
    pub fn expand(&mut self, model: &dyn Model, id: NodeId, init: &dyn Fn(&mut Node)) {
        debug_assert!(self.node(id).fringe, "expanding an already expanded node {:?}", id);
        let state = self.node(id).state.clone();
        let terminal = self.node(id).is_terminal;
        let mut q = Vec::with_capacity(model.num_actions());
        for a in 0..model.num_actions() {
            if terminal {
                // absorbing, zero value
                q.push(QEntry { immediate_reward: 0.0, outcomes: vec![], lb_val: Some(0.0), ub_val: None });
                continue;
            }
            let probs = model.outcome_probs(&state, a);
            debug_assert!((probs.sum() - 1.0).abs() < 1e-6, "outcome probabilities sum to {}", probs.sum());
            let mut outcomes = vec![None; probs.dim()];
            for (o, p) in probs.iter() {
                if p > self.outcome_epsilon {
                    let next_state = model.next_state(&state, a, o);
                    let next = self.get_node(model, &next_state, init);
                    outcomes[o] = Some(Edge { obs_prob: p, next });
                }
            }
            q.push(QEntry { immediate_reward: model.reward(&state, a), outcomes, lb_val: None, ub_val: None });
        }
        let node = self.node_mut(id);
        node.q = q;
        node.fringe = false;
        self.num_expanded += 1;
    }

    /// Populated successors of `(id, action)` as `(outcome, probability, node)`
    pub fn successors(&self, id: NodeId, action: ActionId) -> Vec<(ObsId, Probability, NodeId)> {
        let node = self.node(id);
        assert!(action < node.q.len(), "action {} past Q-entry count {} of {:?}", action, node.q.len(), id);
        node.q[action].edges().map(|(o, e)| (o, e.obs_prob, e.next)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog;

    fn seed(node: &mut Node) {
        node.lb_val = -10.0;
        node.ub_val = 10.0;
    }

    #[test]
    fn lookup_is_idempotent() {
        let model = catalog::two_state_chain();
        let mut graph = SearchGraph::new(OBS_IS_ZERO_EPS);
        let s = model.initial_state();
        let a = graph.get_node(&model, &s, &seed);
        let size = graph.len();
        let b = graph.get_node(&model, &s, &seed);
        assert_eq!(a, b);
        assert_eq!(graph.len(), size);
        assert_eq!(graph.lookup(&s), Some(a));
        assert_eq!(graph.get_root_node(&model, &seed), a);
    }

    #[test]
    fn expansion_populates_every_action() {
        let model = catalog::two_state_chain();
        let mut graph = SearchGraph::new(OBS_IS_ZERO_EPS);
        let root = graph.get_root_node(&model, &seed);
        graph.expand(&model, root, &seed);
        let node = graph.node(root);
        assert!(!node.fringe);
        assert_eq!(node.q.len(), model.num_actions());
        assert_eq!(node.q[0].immediate_reward, 1.0);
        assert!(node.q.iter().all(|q| q.ub_val.is_none()));
        assert_eq!(graph.num_expanded(), 1);
        // a0 leads to the terminal state, which starts at zero regardless of the seed
        let (_, p, next) = graph.successors(root, 0)[0];
        assert_eq!(p, 1.0);
        assert!(graph.node(next).is_terminal);
        assert_eq!(graph.node(next).ub_val, 0.0);
    }

    #[test]
    fn hooks_run_once_per_new_node() {
        let model = catalog::two_state_chain();
        let mut graph = SearchGraph::new(OBS_IS_ZERO_EPS);
        graph.add_new_node_hook(Box::new(|n: &mut Node| n.search_data = SearchData::Focused { prio: n.width() }));
        let root = graph.get_root_node(&model, &seed);
        assert_eq!(graph.node(root).search_data, SearchData::Focused { prio: 20.0 });
    }

    #[test]
    fn unlikely_outcomes_are_absent() {
        let model = catalog::noisy_chain(1e-12);
        let mut graph = SearchGraph::new(1e-10);
        let root = graph.get_root_node(&model, &seed);
        graph.expand(&model, root, &seed);
        let q = &graph.node(root).q[0];
        assert_eq!(q.edges().count(), 1);
        // the rare self-loop back to state 0 is recorded as absent
        assert!(q.outcome(0).is_none());
        assert!(q.outcome(1).is_some());
    }

    #[test]
    #[should_panic]
    fn outcome_past_count_panics() {
        let model = catalog::two_state_chain();
        let mut graph = SearchGraph::new(OBS_IS_ZERO_EPS);
        let root = graph.get_root_node(&model, &seed);
        graph.expand(&model, root, &seed);
        let q = &graph.node(root).q[0];
        q.outcome(q.num_outcomes());
    }
}
