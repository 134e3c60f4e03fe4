//! # Max-planes lower bound
//!
//! Piecewise-linear convex lower bound over beliefs: `V(b) = max_i α_i · b`. Planes live
//! in an append-only arena; a pruned slot keeps a redirect to the plane that dominated it,
//! so a node's cached best plane can always be followed to a live plane that is at least
//! as good.
//!
//! With masking on, a plane only claims values on its support (the belief support it was
//! backed up at) and may only be used for beliefs whose support lies inside it.

use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::rc::Rc;
use log::{debug, trace};
use crate::bounds::{require_belief_model, BoundRep, Polarity};
use crate::config::SolverConfig;
use crate::errors::{SolverError, SolverResult};
use crate::graph::{Node, NodeId, SearchGraph};
use crate::policy::MaxPlanesPolicy;
use crate::utils::*;

/// Index of a plane slot in the arena
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PlaneId(pub u32);

impl PlaneId {
    #[inline] pub fn index(self) -> usize { self.0 as usize }
}

// ---------- Plane ---------- //
#[derive(Clone, PartialEq)]
pub struct Plane {
    /// Action whose backup produced the plane
    pub action: ActionId,
    /// Dense over hidden states; entries outside the mask are meaningless
    pub alpha: Vec<Reward>,
    /// Sorted support, `None` for a plane valid everywhere
    pub mask: Option<Vec<usize>>,
}

impl Plane {
    pub fn full(action: ActionId, alpha: Vec<Reward>) -> Self {
        Plane { action, alpha, mask: None }
    }

    #[inline] pub fn value(&self, belief: &State) -> Reward {
        belief.dot_dense(&self.alpha)
    }

    /// True if the plane is defined on every state the belief puts mass on
    pub fn covers(&self, belief: &State) -> bool {
        match &self.mask {
            None => true,
            Some(mask) => belief.support().all(|s| mask.binary_search(&s).is_ok()),
        }
    }

    /// `self.mask ⊇ other.mask`
    fn mask_contains(&self, other: &Plane) -> bool {
        match (&self.mask, &other.mask) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => theirs.iter().all(|s| mine.binary_search(s).is_ok()),
        }
    }

    /// Pointwise dominance over the other plane's domain, within `eps`
    pub fn dominates(&self, other: &Plane, eps: Reward) -> bool {
        if !self.mask_contains(other) {
            return false;
        }
        match &other.mask {
            None => self.alpha.iter().zip(other.alpha.iter()).all(|(a, b)| *a >= *b - eps),
            Some(mask) => mask.iter().all(|&s| self.alpha[s] >= other.alpha[s] - eps),
        }
    }

    /// `(state, value)` over the plane's domain
    pub fn entries(&self) -> Vec<(usize, Reward)> {
        match &self.mask {
            None => self.alpha.iter().cloned().enumerate().collect(),
            Some(mask) => mask.iter().map(|&s| (s, self.alpha[s])).collect(),
        }
    }
}

impl Debug for Plane {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Plane(a={}, {:?}", self.action, self.entries())?;
        if self.mask.is_some() { write!(f, ", masked")?; }
        write!(f, ")")
    }
}

enum PlaneSlot {
    Live(Plane),
    Pruned { by: PlaneId },
}

// ---------- Bound ---------- //
pub struct MaxPlanes {
    model: Rc<dyn Model>,
    discount: Reward,
    num_states: usize,
    initial: Box<dyn InitialBound>,
    use_mask: bool,
    use_index: bool,
    prune_growth_factor: f64,
    prune_increment: usize,
    slots: Vec<PlaneSlot>,
    live: Vec<PlaneId>,
    /// Planes without a mask; always consulted
    unmasked: Vec<PlaneId>,
    /// Masked planes listed under every state of their support
    support_index: Vec<Vec<PlaneId>>,
    since_prune: Vec<PlaneId>,
    last_prune_size: usize,
    num_pruned: usize,
}

impl MaxPlanes {
    pub fn new(model: Rc<dyn Model>, initial: Box<dyn InitialBound>, config: &SolverConfig) -> SolverResult<Self> {
        let num_states = require_belief_model(&model, "max-planes lower bound")?;
        Ok(MaxPlanes {
            discount: model.discount(),
            model,
            num_states,
            initial,
            use_mask: config.use_masking,
            use_index: config.use_support_index,
            prune_growth_factor: config.prune_growth_factor,
            prune_increment: config.prune_increment,
            slots: vec![],
            live: vec![],
            unmasked: vec![],
            support_index: vec![vec![]; num_states],
            since_prune: vec![],
            last_prune_size: 0,
            num_pruned: 0,
        })
    }

    #[inline] pub fn num_planes(&self) -> usize { self.live.len() }
    #[inline] pub fn num_pruned(&self) -> usize { self.num_pruned }
    #[inline] pub fn num_states(&self) -> usize { self.num_states }
    #[inline] pub fn uses_mask(&self) -> bool { self.use_mask }

    /// Live planes in creation order
    pub fn planes(&self) -> impl Iterator<Item = &Plane> + '_ {
        self.live.iter().filter_map(move |id| self.live_plane(*id))
    }

    fn live_plane(&self, id: PlaneId) -> Option<&Plane> {
        match &self.slots[id.index()] {
            PlaneSlot::Live(p) => Some(p),
            PlaneSlot::Pruned { .. } => None,
        }
    }

    fn plane(&self, id: PlaneId) -> &Plane {
        self.live_plane(self.resolve(id)).unwrap_or_else(|| panic!("plane {:?} has no live dominator", id))
    }

    /// Follow prune redirects to a live plane
    pub fn resolve(&self, mut id: PlaneId) -> PlaneId {
        while let PlaneSlot::Pruned { by } = &self.slots[id.index()] {
            id = *by;
        }
        id
    }

    fn usable(&self, plane: &Plane, belief: &State) -> bool {
        !self.use_mask || plane.covers(belief)
    }

    /// Planes worth testing against `belief`
    fn candidates(&self, belief: &State) -> Vec<PlaneId> {
        if !(self.use_mask && self.use_index) {
            return self.live.clone();
        }
        // any plane covering the belief is indexed under every state of its support,
        // so the shortest list among them is enough
        let shortest = belief.support()
            .map(|s| &self.support_index[s])
            .min_by_key(|list| list.len());
        let mut out = self.unmasked.clone();
        if let Some(list) = shortest {
            out.extend(list.iter().cloned());
        }
        out
    }

    /// Best usable plane at `belief`, ties broken by creation order
    pub fn best_plane(&self, belief: &State) -> Option<(PlaneId, Reward)> {
        let mut best: Option<(PlaneId, Reward)> = None;
        for id in self.candidates(belief) {
            let Some(plane) = self.live_plane(id) else { continue };
            if !self.usable(plane, belief) { continue; }
            let v = plane.value(belief);
            match best {
                Some((b, bv)) if v < bv || (v == bv && id > b) => (),
                _ => best = Some((id, v)),
            }
        }
        best
    }

    /// Best plane for a cached node. The node remembers the best plane and how many slots
    /// existed when it was found; only planes created since then need checking.
    fn best_plane_for_node(&self, node: &Node) -> Option<(PlaneId, Reward)> {
        let Some((cached, stamp)) = node.bounds_data.best_plane else {
            return self.best_plane(&node.state);
        };
        let base = self.resolve(cached);
        let mut best = (base, self.plane(base).value(&node.state));
        for (k, slot) in self.slots.iter().enumerate().skip(stamp as usize) {
            if let PlaneSlot::Live(plane) = slot {
                if !self.usable(plane, &node.state) { continue; }
                let v = plane.value(&node.state);
                if v > best.1 {
                    best = (PlaneId(k as u32), v);
                }
            }
        }
        Some(best)
    }

    fn refresh_node(&self, graph: &mut SearchGraph, id: NodeId) -> Option<(PlaneId, Reward)> {
        let best = self.best_plane_for_node(graph.node(id))?;
        graph.node_mut(id).bounds_data.best_plane = Some((best.0, self.slots.len() as u64));
        Some(best)
    }

    fn add_plane(&mut self, plane: Plane) -> PlaneId {
        let id = PlaneId(self.slots.len() as u32);
        trace!("new plane {:?}: {:?}", id, plane);
        match &plane.mask {
            None => self.unmasked.push(id),
            Some(mask) => for &s in mask { self.support_index[s].push(id) },
        }
        self.slots.push(PlaneSlot::Live(plane));
        self.live.push(id);
        self.since_prune.push(id);
        if self.live.len() as f64 > self.last_prune_size as f64 * self.prune_growth_factor + self.prune_increment as f64 {
            self.prune();
        }
        id
    }

    fn kill(&mut self, id: PlaneId, by: PlaneId) {
        self.slots[id.index()] = PlaneSlot::Pruned { by };
        self.num_pruned += 1;
    }

    fn is_live(&self, id: PlaneId) -> bool {
        matches!(self.slots[id.index()], PlaneSlot::Live(_))
    }

    /// Remove dominated planes. Only planes added since the last prune are compared with the
    /// rest of the set; pairs of older planes were settled then.
    pub fn prune(&mut self) {
        let before = self.live.len();
        let fresh = std::mem::take(&mut self.since_prune);
        for n in fresh {
            if !self.is_live(n) { continue; }
            let dominator = self.live.iter().cloned().find(|&o| {
                o != n && self.is_live(o) && self.plane(o).dominates(self.plane(n), DOMINANCE_EPS)
            });
            if let Some(d) = dominator {
                self.kill(n, d);
                continue;
            }
            let victims: Vec<PlaneId> = self.live.iter().cloned()
                .filter(|&o| o != n && self.is_live(o) && self.plane(n).dominates(self.plane(o), DOMINANCE_EPS))
                .collect();
            for o in victims {
                self.kill(o, n);
            }
        }
        let live: Vec<PlaneId> = self.live.iter().cloned().filter(|&id| self.is_live(id)).collect();
        self.live = live;
        self.rebuild_index();
        self.last_prune_size = self.live.len();
        debug!("pruned planes {} -> {}", before, self.live.len());
    }

    fn rebuild_index(&mut self) {
        self.unmasked.clear();
        self.support_index.iter_mut().for_each(|l| l.clear());
        for &id in self.live.iter() {
            let PlaneSlot::Live(plane) = &self.slots[id.index()] else { continue };
            match &plane.mask {
                None => self.unmasked.push(id),
                Some(mask) => for &s in mask { self.support_index[s].push(id) },
            }
        }
    }

    /// Export the live planes, pruning first if the caller allows it
    pub fn write_policy(&mut self, path: &Path, can_modify_bounds: bool) -> SolverResult<()> {
        if can_modify_bounds {
            self.prune();
        }
        MaxPlanesPolicy::from_planes(self.num_states, self.use_mask, self.planes()).write(path)
    }
}

impl BoundRep for MaxPlanes {
    fn polarity(&self) -> Polarity { Polarity::Lower }
    fn is_point(&self) -> bool { false }

    fn initialize(&mut self, precision: Reward) -> SolverResult<()> {
        self.initial.initialize(precision)?;
        let planes = self.initial.planes()
            .ok_or_else(|| SolverError::Unsupported("initial lower bound has no planes to seed a max-planes bound".into()))?;
        if planes.is_empty() {
            return Err(SolverError::Unsupported("initial lower bound produced no planes".into()));
        }
        self.slots.clear();
        self.live.clear();
        self.since_prune.clear();
        self.rebuild_index();
        for (action, alpha) in planes {
            if alpha.len() != self.num_states {
                return Err(SolverError::InvalidModel(format!("initial plane has {} entries, expected {}", alpha.len(), self.num_states)));
            }
            self.add_plane(Plane::full(action, alpha));
        }
        self.last_prune_size = self.live.len();
        debug!("max-planes bound initialized with {} planes", self.live.len());
        Ok(())
    }

    fn get_value(&self, graph: &SearchGraph, state: &State, node: Option<NodeId>) -> Reward {
        let best = match node {
            Some(id) => self.best_plane_for_node(graph.node(id)),
            None => self.best_plane(state),
        };
        best.map(|(_, v)| v).unwrap_or(Reward::NEG_INFINITY)
    }

    fn init_node_bound(&self, node: &mut Node) {
        match self.best_plane(&node.state) {
            Some((id, v)) => {
                node.lb_val = v;
                node.bounds_data.best_plane = Some((id, self.slots.len() as u64));
            }
            None => node.lb_val = Reward::NEG_INFINITY,
        }
    }

    fn update(&mut self, graph: &mut SearchGraph, id: NodeId) -> Option<ActionId> {
        let model = self.model.clone();
        let pomdp = model.as_belief().expect("max-planes bound built on a belief model");
        debug_assert!(!graph.node(id).fringe, "backup of unexpanded node {:?}", id);
        let belief = graph.node(id).state.clone();
        let support: Option<Vec<usize>> = if self.use_mask { Some(belief.support().collect()) } else { None };
        // full-support plane used for outcomes too unlikely to have been expanded
        let fallback = self.unmasked.iter().cloned()
            .filter(|&p| self.is_live(p))
            .map(|p| (p, self.plane(p).value(&belief)))
            .fold(None, |best: Option<(PlaneId, Reward)>, (p, v)| match best {
                Some((_, bv)) if v <= bv => best,
                _ => Some((p, v)),
            })
            .map(|(p, _)| p);

        let num_actions = graph.node(id).num_actions();
        let mut q_values = Vec::with_capacity(num_actions);
        let mut best: Option<(ActionId, Vec<Reward>, Reward)> = None;
        for a in 0..num_actions {
            let rewards = pomdp.reward_vector(a);
            let mut alpha = match &support {
                None => rewards,
                Some(supp) => {
                    let mut alpha = vec![0.0; self.num_states];
                    for &s in supp { alpha[s] = rewards[s]; }
                    alpha
                }
            };
            let outcomes: Vec<Option<NodeId>> = graph.node(id).q[a].outcomes.iter().map(|e| e.map(|e| e.next)).collect();
            for (o, next) in outcomes.into_iter().enumerate() {
                let plane_id = match next {
                    Some(next) => self.refresh_node(graph, next).map(|(p, _)| p),
                    None => fallback,
                };
                let Some(plane_id) = plane_id else { continue };
                let beta = &self.plane(plane_id).alpha;
                for (s, g) in pomdp.back_project(beta, a, o, support.as_deref()) {
                    alpha[s] += self.discount * g;
                }
            }
            let v = belief.dot_dense(&alpha);
            q_values.push(v);
            match &best {
                Some((_, _, bv)) if v <= *bv => (),
                _ => best = Some((a, alpha, v)),
            }
        }

        let node = graph.node_mut(id);
        for (a, v) in q_values.iter().enumerate() {
            node.q[a].lb_val = Some(*v);
        }
        let (action, alpha, value) = best?;
        let current = self.best_plane_for_node(graph.node(id)).map(|(_, v)| v).unwrap_or(Reward::NEG_INFINITY);
        if value > current + DOMINANCE_EPS {
            let plane_id = self.add_plane(Plane { action, alpha, mask: support });
            graph.node_mut(id).bounds_data.best_plane = Some((plane_id, self.slots.len() as u64));
        }
        let node = graph.node_mut(id);
        node.lb_val = node.lb_val.max(value);
        Some(action)
    }

    fn best_action(&self, state: &State) -> Option<ActionId> {
        self.best_plane(state).map(|(id, _)| self.plane(id).action)
    }

    fn as_max_planes(&self) -> Option<&MaxPlanes> { Some(self) }
    fn as_max_planes_mut(&mut self) -> Option<&mut MaxPlanes> { Some(self) }
}
