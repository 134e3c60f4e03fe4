use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use super::*;
use crate::config::{BoundKind, SearchStrategy};
use crate::linalg::SparseVec;
use crate::models::catalog;
use crate::policy::MaxPlanesPolicy;

const STRATEGIES: [SearchStrategy; 6] = [
    SearchStrategy::Rtdp, SearchStrategy::Lrtdp, SearchStrategy::Hdp,
    SearchStrategy::Frtdp, SearchStrategy::Hsvi, SearchStrategy::Wrtdp,
];

fn config(strategy: SearchStrategy) -> SolverConfig {
    SolverConfig { seed: Some(7), ..SolverConfig::default() }.with_strategy(strategy).with_precision(1e-3)
}

fn init(model: &Rc<dyn Model>, config: &SolverConfig) -> Planner {
    let mut planner = Planner::new();
    planner.plan_init(model.clone(), config).unwrap();
    planner
}

fn run_trials(planner: &mut Planner, state: &State, n: usize) {
    for _ in 0..n {
        if planner.plan_fixed_time(state, Duration::MAX, 0.0).unwrap() {
            break;
        }
    }
}

/// Every cached node as (lb, ub)
fn snapshot(planner: &Planner) -> HashMap<NodeId, (Reward, Reward)> {
    let bounds = planner.bounds().unwrap();
    bounds.graph().ids().map(|id| (id, (bounds.node(id).lb_val, bounds.node(id).ub_val))).collect()
}

#[test]
fn every_strategy_solves_the_chain() {
    for strategy in STRATEGIES {
        let model: Rc<dyn Model> = Rc::new(catalog::two_state_chain());
        let mut planner = init(&model, &config(strategy));
        let s0 = model.initial_state();
        let outcome = planner.plan(&s0, &PlanLimits { max_time: Some(Duration::from_secs(60)), ..PlanLimits::default() }).unwrap();
        assert_eq!(outcome, PlanOutcome::Converged, "{:?}", strategy);
        assert_eq!(planner.phase(), Phase::Converged);
        let v = planner.value_at(&s0).unwrap();
        assert!(v.lower.unwrap() <= 1.0 + 1e-9 && v.upper.unwrap() >= 1.0 - 1e-9, "{:?}: {:?}", strategy, v);
        assert!(v.width() <= 1e-3, "{:?}: {:?}", strategy, v);
        assert_eq!(planner.choose_action(&s0).unwrap(), 0, "{:?}", strategy);
    }
}

#[test]
fn lrtdp_labels_the_converged_root() {
    let model: Rc<dyn Model> = Rc::new(catalog::two_state_chain());
    let mut planner = init(&model, &config(SearchStrategy::Lrtdp));
    let s0 = model.initial_state();
    run_trials(&mut planner, &s0, 1000);
    let bounds = planner.bounds().unwrap();
    let root = bounds.get_node_or_null(&s0).unwrap();
    assert!(bounds.node(root).search_data.is_solved());
}

#[test]
fn convex_bounds_on_an_mdp_fail_at_init() {
    let model: Rc<dyn Model> = Rc::new(catalog::two_state_chain());
    let mut planner = Planner::new();
    let config = config(SearchStrategy::Hsvi).with_bounds(BoundKind::Convex, BoundKind::Point);
    assert!(matches!(planner.plan_init(model.clone(), &config), Err(SolverError::IncompatibleModel(_))));
    assert_eq!(planner.phase(), Phase::Uninitialized);
    assert!(matches!(planner.plan_fixed_time(&model.initial_state(), Duration::MAX, 0.0), Err(SolverError::NotInitialized)));
}

#[test]
fn queries_before_the_first_trial_are_rejected() {
    let model: Rc<dyn Model> = Rc::new(catalog::grid_walk());
    let planner = init(&model, &config(SearchStrategy::Hsvi));
    assert_eq!(planner.phase(), Phase::Initialized);
    assert!(matches!(planner.value_at(&model.initial_state()), Err(SolverError::NotInitialized)));
}

#[test]
fn point_bounds_bracket_the_optimal_values() {
    let grid = catalog::grid_walk();
    let optimal = grid.optimal_values(1e-12);
    let model: Rc<dyn Model> = Rc::new(grid);
    for strategy in STRATEGIES {
        let mut planner = init(&model, &config(strategy));
        let s0 = model.initial_state();
        for _ in 0..50 {
            let done = planner.plan_fixed_time(&s0, Duration::MAX, 0.0).unwrap();
            let bounds = planner.bounds().unwrap();
            for id in bounds.graph().ids() {
                let node = bounds.node(id);
                let s = node.state.entries()[0].0;
                assert!(node.lb_val <= optimal[s] + 1e-6, "{:?} lb {} above V*={} at {}", strategy, node.lb_val, optimal[s], s);
                assert!(node.ub_val >= optimal[s] - 1e-6, "{:?} ub {} below V*={} at {}", strategy, node.ub_val, optimal[s], s);
            }
            if done { break; }
        }
    }
}

#[test]
fn node_bounds_agree_with_their_q_values() {
    let model: Rc<dyn Model> = Rc::new(catalog::grid_walk());
    let mut planner = init(&model, &config(SearchStrategy::Hsvi));
    run_trials(&mut planner, &model.initial_state(), 20);
    let bounds = planner.bounds().unwrap();
    for id in bounds.graph().ids() {
        let node = bounds.node(id);
        if node.fringe || node.is_terminal { continue; }
        let Some(best_ub) = node.q.iter().map(|q| q.ub_val).collect::<Option<Vec<_>>>() else { continue };
        let best_lb: Vec<Reward> = node.q.iter().filter_map(|q| q.lb_val).collect();
        assert!(node.ub_val <= best_ub.iter().cloned().fold(Reward::NEG_INFINITY, Reward::max) + 1e-12);
        assert!(node.lb_val >= best_lb.iter().cloned().fold(Reward::NEG_INFINITY, Reward::max) - 1e-12);
    }
}

#[test]
fn convex_bounds_never_loosen() {
    let model: Rc<dyn Model> = Rc::new(catalog::tiger());
    let config = config(SearchStrategy::Hsvi).with_bounds(BoundKind::Convex, BoundKind::Convex);
    let mut planner = init(&model, &config);
    let s0 = model.initial_state();
    let mut before = HashMap::new();
    for _ in 0..30 {
        planner.plan_fixed_time(&s0, Duration::MAX, 0.0).unwrap();
        let after = snapshot(&planner);
        for (id, (lb, ub)) in before.iter() {
            let (lb2, ub2) = after[id];
            assert!(lb2 >= lb - 1e-12 && ub2 <= ub + 1e-12, "node {:?} loosened: [{}, {}] -> [{}, {}]", id, lb, ub, lb2, ub2);
            assert!(lb2 <= ub2 + 1e-9);
        }
        before = after;
    }
    let root = planner.value_at(&s0).unwrap();
    assert!(root.lower.unwrap() <= root.upper.unwrap());
    // initial gap is 200 - (-20)
    assert!(root.width() < 220.0);
}

#[test]
fn convex_bounds_bracket_a_fully_observable_pomdp() {
    let grid = catalog::grid_walk();
    let optimal = grid.optimal_values(1e-12);
    let pomdp = catalog::observable_grid();
    let gamma = pomdp.discount();
    // after one step the belief is a point mass, so one lookahead over V_MDP is exact
    let oracle = |b: &State| -> Reward {
        if b.nnz() == 1 { return optimal[b.entries()[0].0]; }
        (0..pomdp.num_actions()).map(|a| {
            let future: Reward = pomdp.outcome_probs(b, a).iter().map(|(o, p)| p * optimal[o]).sum();
            pomdp.reward(b, a) + gamma * future
        }).fold(Reward::NEG_INFINITY, Reward::max)
    };
    let model: Rc<dyn Model> = Rc::new(pomdp.clone());
    for (lower, upper) in [(BoundKind::Convex, BoundKind::Convex), (BoundKind::Convex, BoundKind::Point), (BoundKind::Point, BoundKind::Convex)] {
        let mut planner = init(&model, &config(SearchStrategy::Hsvi).with_bounds(lower, upper));
        run_trials(&mut planner, &model.initial_state(), 2000);
        let bounds = planner.bounds().unwrap();
        for id in bounds.graph().ids() {
            let node = bounds.node(id);
            let v = oracle(&node.state);
            assert!(node.lb_val <= v + 1e-6 && v - 1e-6 <= node.ub_val, "{:?}/{:?}: {:?} vs {}", lower, upper, node, v);
        }
        let root = planner.value_at(&model.initial_state()).unwrap();
        assert!(root.width() <= 1e-3, "{:?}/{:?}: {:?}", lower, upper, root);
    }
}

/// Plan on tiger under a backup cap; tiger's optimal value at the uniform belief is about 19.37
fn solve_tiger(strategy: SearchStrategy, lower: BoundKind, upper: BoundKind) -> (Planner, PlanOutcome) {
    let model: Rc<dyn Model> = Rc::new(catalog::tiger());
    let config = SolverConfig { max_backups: Some(2_000_000), ..config(strategy) }
        .with_precision(0.5)
        .with_bounds(lower, upper);
    let mut planner = init(&model, &config);
    let outcome = planner.plan(&model.initial_state(), &PlanLimits::default()).unwrap();
    (planner, outcome)
}

#[test]
fn every_strategy_converges_on_tiger() {
    let s0 = catalog::tiger().initial_state();
    for strategy in STRATEGIES {
        let (planner, outcome) = solve_tiger(strategy, BoundKind::Point, BoundKind::Point);
        let v = planner.value_at(&s0).unwrap();
        assert_eq!(outcome, PlanOutcome::Converged, "{:?} stopped at {:?} after {} trials", strategy, v, planner.num_trials());
        assert_eq!(planner.phase(), Phase::Converged);
        assert!(v.width() <= 0.5, "{:?}: {:?}", strategy, v);
        assert!(v.lower.unwrap() <= 19.38 && v.upper.unwrap() >= 19.37, "{:?}: {:?}", strategy, v);
    }
}

#[test]
fn frtdp_keeps_tightening_convex_bounds() {
    let model: Rc<dyn Model> = Rc::new(catalog::tiger());
    let config = config(SearchStrategy::Frtdp).with_precision(0.5).with_bounds(BoundKind::Convex, BoundKind::Convex);
    let mut planner = init(&model, &config);
    let s0 = model.initial_state();
    run_trials(&mut planner, &s0, 200);
    let early = planner.value_at(&s0).unwrap().width();
    run_trials(&mut planner, &s0, 2000);
    let late = planner.value_at(&s0).unwrap().width();
    assert!(planner.phase() == Phase::Converged || late < early - 1e-6, "root width stuck at {} -> {}", early, late);
}

#[test]
fn backup_cap_exhausts_the_budget() {
    let model: Rc<dyn Model> = Rc::new(catalog::tiger());
    let config = SolverConfig { max_backups: Some(5), ..config(SearchStrategy::Frtdp) };
    let mut planner = init(&model, &config);
    let outcome = planner.plan(&model.initial_state(), &PlanLimits::default()).unwrap();
    assert_eq!(outcome, PlanOutcome::BudgetExhausted);
    assert_eq!(planner.phase(), Phase::BudgetExhausted);
    assert!(planner.bounds().unwrap().num_backups() >= 5);
}

#[test]
fn interrupt_leaves_valid_bounds() {
    let model: Rc<dyn Model> = Rc::new(catalog::tiger());
    let mut planner = init(&model, &config(SearchStrategy::Hsvi));
    let s0 = model.initial_state();
    run_trials(&mut planner, &s0, 3);
    let flag = Arc::new(AtomicBool::new(true));
    let limits = PlanLimits { interrupt: Some(flag), ..PlanLimits::default() };
    assert_eq!(planner.plan(&s0, &limits).unwrap(), PlanOutcome::Interrupted);
    assert_eq!(planner.num_trials(), 3);
    let v = planner.value_at(&s0).unwrap();
    assert!(v.lower.unwrap() <= v.upper.unwrap());
}

#[test]
fn replayed_script_reproduces_the_bounds() {
    let model: Rc<dyn Model> = Rc::new(catalog::tiger());
    let path = std::env::temp_dir().join(format!("anytime_mdp_script_{}.json", std::process::id()));
    let recording = SolverConfig { record_trials: true, ..config(SearchStrategy::Hsvi) }
        .with_bounds(BoundKind::Convex, BoundKind::Point);
    let mut original = init(&model, &recording);
    let s0 = model.initial_state();
    run_trials(&mut original, &s0, 15);
    original.write_trial_script(&path).unwrap();

    let replaying = SolverConfig { search_strategy: SearchStrategy::Script, script_path: Some(path.clone()), ..recording };
    let mut replay = init(&model, &replaying);
    run_trials(&mut replay, &s0, 1000);
    assert_eq!(replay.num_trials(), original.num_trials());
    assert_eq!(replay.value_at(&s0).unwrap(), original.value_at(&s0).unwrap());
    assert_eq!(replay.bounds().unwrap().graph().len(), original.bounds().unwrap().graph().len());
    std::fs::remove_file(&path).ok();
}

#[test]
fn missing_script_fails_at_init() {
    let model: Rc<dyn Model> = Rc::new(catalog::tiger());
    let config = SolverConfig {
        search_strategy: SearchStrategy::Script,
        script_path: Some("/nonexistent/anytime_mdp_script.json".into()),
        ..SolverConfig::default()
    };
    assert!(matches!(Planner::new().plan_init(model, &config), Err(SolverError::Io(_))));
}

#[test]
fn policy_file_matches_the_lower_bound() {
    let model: Rc<dyn Model> = Rc::new(catalog::tiger());
    let config = config(SearchStrategy::Hsvi).with_bounds(BoundKind::Convex, BoundKind::Convex);
    let mut planner = init(&model, &config);
    run_trials(&mut planner, &model.initial_state(), 25);
    let path = std::env::temp_dir().join(format!("anytime_mdp_tiger_policy_{}.json", std::process::id()));
    planner.write_policy(&path, true).unwrap();
    let policy = MaxPlanesPolicy::read(&path).unwrap();
    let bounds = planner.bounds().unwrap();
    let lower = bounds.lower().unwrap();
    assert_eq!(policy.num_planes, lower.as_max_planes().unwrap().num_planes());
    for k in 0..=10 {
        let p = k as f64 / 10.0;
        let b = SparseVec::from_dense(&[p, 1.0 - p]);
        let expected = lower.get_value(bounds.graph(), &b, None);
        assert!((policy.value(&b).unwrap() - expected).abs() < 1e-9);
        assert_eq!(policy.choose_action(&b), lower.best_action(&b), "belief {:?}", b);
    }
    std::fs::remove_file(&path).ok();
}

#[test]
fn planners_are_independent() {
    let chain: Rc<dyn Model> = Rc::new(catalog::two_state_chain());
    let tiger: Rc<dyn Model> = Rc::new(catalog::tiger());
    let mut a = init(&chain, &config(SearchStrategy::Frtdp));
    let mut b = init(&tiger, &config(SearchStrategy::Hsvi));
    let (sa, sb) = (chain.initial_state(), tiger.initial_state());
    for _ in 0..200 {
        a.plan_fixed_time(&sa, Duration::MAX, 0.0).unwrap();
        b.plan_fixed_time(&sb, Duration::MAX, 0.0).unwrap();
    }
    let va = a.value_at(&sa).unwrap();
    assert!((va.lower.unwrap() - 1.0).abs() < 1e-3);
    assert_eq!(a.choose_action(&sa).unwrap(), 0);
    let vb = b.value_at(&sb).unwrap();
    assert!(vb.lower.unwrap() <= vb.upper.unwrap());
}

#[test]
fn q_value_rejects_unknown_actions() {
    let model: Rc<dyn Model> = Rc::new(catalog::tiger());
    let mut planner = init(&model, &config(SearchStrategy::Hsvi));
    let s0 = model.initial_state();
    run_trials(&mut planner, &s0, 3);
    assert!(planner.q_value(&s0, model.num_actions() - 1).is_ok());
    assert!(matches!(planner.q_value(&s0, model.num_actions()), Err(SolverError::Config(_))));
}
