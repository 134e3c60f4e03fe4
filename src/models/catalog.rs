//! Small benchmark problems, used by the demo binary and the tests.

use std::rc::Rc;
use crate::linalg::SparseVec;
use crate::models::{Dynamics, TabularMdp, TabularPomdp};
use crate::utils::*;

const GRID_CELLS: usize = 5;
const GRID_SLIP: Probability = 0.2;

/// `s0 --a0 (R=1)--> s1 (terminal)`, `s0 --a1 (R=0)--> s0`, γ = 0.9. Optimal value 1 via a0.
pub fn two_state_chain() -> TabularMdp {
    noisy_chain(0.0)
}

/// Like [`two_state_chain`], but a0 falls back to s0 with probability `eps`
pub fn noisy_chain(eps: Probability) -> TabularMdp {
    let a0 = vec![SparseVec::new(2, vec![(0, eps), (1, 1.0 - eps)]), SparseVec::unit(2, 1)];
    let a1 = vec![SparseVec::unit(2, 0), SparseVec::unit(2, 1)];
    let dynamics = Dynamics::new(0.9, vec![false, true], vec![vec![1.0, 0.0], vec![0.0, 0.0]], vec![a0, a1])
        .unwrap_or_else(|e| panic!("chain model: {}", e));
    TabularMdp::new(dynamics, 0).unwrap_or_else(|e| panic!("chain model: {}", e))
}

/// Slippery corridor: cells `0..5`, the last one is the terminal goal. Every step costs 1.
/// Actions: left, right, and a risky jump two cells right that sends you home half the time.
fn grid_dynamics() -> Dynamics {
    let n = GRID_CELLS;
    let goal = n - 1;
    let mut left = vec![];
    let mut right = vec![];
    let mut jump = vec![];
    for s in 0..n {
        if s == goal {
            for rows in [&mut left, &mut right, &mut jump] {
                rows.push(SparseVec::unit(n, s));
            }
            continue;
        }
        left.push(SparseVec::new(n, vec![(s.saturating_sub(1), 1.0 - GRID_SLIP), (s, GRID_SLIP)]));
        right.push(SparseVec::new(n, vec![((s + 1).min(goal), 1.0 - GRID_SLIP), (s, GRID_SLIP)]));
        jump.push(SparseVec::new(n, vec![((s + 2).min(goal), 0.5), (0, 0.5)]));
    }
    let rewards = (0..n).map(|s| if s == goal { vec![0.0; 3] } else { vec![-1.0; 3] }).collect();
    let terminal = (0..n).map(|s| s == goal).collect();
    Dynamics::new(0.95, terminal, rewards, vec![left, right, jump]).unwrap_or_else(|e| panic!("grid model: {}", e))
}

pub fn grid_walk() -> TabularMdp {
    TabularMdp::new(grid_dynamics(), 0).unwrap_or_else(|e| panic!("grid model: {}", e))
}

/// The grid as a POMDP whose observation reveals the next cell, starting unsure between the
/// first two cells
pub fn observable_grid() -> TabularPomdp {
    let initial = SparseVec::new(GRID_CELLS, vec![(0, 0.5), (1, 0.5)]);
    TabularPomdp::fully_observable(grid_dynamics(), initial).unwrap_or_else(|e| panic!("grid model: {}", e))
}

/// Classic tiger problem. States: tiger behind the left / right door. Actions: listen, open
/// left, open right. Listening costs 1 and is right 85% of the time; opening the tiger's door
/// costs 100, the other pays 10, and either resets the problem.
pub fn tiger() -> TabularPomdp {
    let uniform = SparseVec::from_dense(&[0.5, 0.5]);
    let listen_t = vec![SparseVec::unit(2, 0), SparseVec::unit(2, 1)];
    let reset_t = vec![uniform.clone(), uniform.clone()];
    let rewards = vec![vec![-1.0, -100.0, 10.0], vec![-1.0, 10.0, -100.0]];
    let dynamics = Dynamics::new(0.95, vec![false, false], rewards, vec![listen_t, reset_t.clone(), reset_t])
        .unwrap_or_else(|e| panic!("tiger model: {}", e));
    let hear = vec![SparseVec::from_dense(&[0.85, 0.15]), SparseVec::from_dense(&[0.15, 0.85])];
    let noise = vec![uniform.clone(), uniform.clone()];
    TabularPomdp::new(dynamics, 2, vec![hear, noise.clone(), noise], uniform).unwrap_or_else(|e| panic!("tiger model: {}", e))
}

/// Look a catalog model up by name
pub fn by_name(name: &str) -> Option<Rc<dyn Model>> {
    let model: Rc<dyn Model> = match name {
        "chain" => Rc::new(two_state_chain()),
        "grid" => Rc::new(grid_walk()),
        "observable-grid" => Rc::new(observable_grid()),
        "tiger" => Rc::new(tiger()),
        _ => return None,
    };
    Some(model)
}

pub const MODEL_NAMES: [&str; 4] = ["chain", "grid", "observable-grid", "tiger"];
