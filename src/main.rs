use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use log::{error, info};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use anytime_mdp::models::catalog;
use anytime_mdp::utils::{Model, Reward};
use anytime_mdp::{PlanLimits, Planner, SolverConfig, SolverResult};

const EPISODES: usize = 50;
const EPISODE_STEPS: usize = 100;

struct Args {
    model: String,
    config: Option<PathBuf>,
    seconds: f64,
    policy_out: Option<PathBuf>,
    script_out: Option<PathBuf>,
}

fn usage() -> String {
    format!("usage: anytime_mdp <{}> [--config FILE] [--time SECS] [--policy OUT] [--script OUT]", catalog::MODEL_NAMES.join("|"))
}

fn parse_args() -> Result<Args, String> {
    let mut raw = std::env::args().skip(1);
    let model = raw.next().ok_or_else(usage)?;
    let mut args = Args { model, config: None, seconds: 10.0, policy_out: None, script_out: None };
    while let Some(flag) = raw.next() {
        let value = raw.next().ok_or_else(|| format!("{} needs a value\n{}", flag, usage()))?;
        match flag.as_str() {
            "--config" => args.config = Some(value.into()),
            "--time" => args.seconds = value.parse().map_err(|_| format!("bad --time {:?}", value))?,
            "--policy" => args.policy_out = Some(value.into()),
            "--script" => args.script_out = Some(value.into()),
            _ => return Err(format!("unknown flag {}\n{}", flag, usage())),
        }
    }
    Ok(args)
}

/// Run the planner's greedy policy from the initial state; returns the discounted return
fn episode(model: &dyn Model, planner: &Planner) -> SolverResult<Reward> {
    let mut state = model.initial_state();
    let mut total = 0.0;
    let mut weight = 1.0;
    for _ in 0..EPISODE_STEPS {
        if model.is_terminal(&state) { break; }
        let action = planner.choose_action(&state)?;
        total += weight * model.reward(&state, action);
        weight *= model.discount();
        let probs = model.outcome_probs(&state, action);
        let outcomes: Vec<(usize, f64)> = probs.iter().collect();
        let Ok(dist) = WeightedIndex::new(outcomes.iter().map(|(_, p)| *p)) else { break };
        let (o, _) = outcomes[dist.sample(&mut rand::rng())];
        state = model.next_state(&state, action, o);
    }
    Ok(total)
}

fn run(args: Args) -> SolverResult<()> {
    let model: Rc<dyn Model> = catalog::by_name(&args.model)
        .ok_or_else(|| anytime_mdp::SolverError::Config(format!("unknown model {:?}\n{}", args.model, usage())))?;
    let mut config = match &args.config {
        Some(path) => SolverConfig::from_json_file(path)?,
        None => SolverConfig::default(),
    };
    if args.script_out.is_some() {
        config.record_trials = true;
    }

    let mut planner = Planner::new();
    planner.plan_init(model.clone(), &config)?;
    let s0 = model.initial_state();
    let limits = PlanLimits {
        max_time: Some(Duration::from_secs_f64(args.seconds)),
        min_precision: 0.0,
        interrupt: Some(Arc::new(AtomicBool::new(false))),
    };
    let outcome = planner.plan(&s0, &limits)?;
    let root = planner.value_at(&s0)?;
    info!("{:?} after {} trials", outcome, planner.num_trials());
    println!("model {}: root bounds {:?} (width {:.3e}), best action {}", args.model, root, root.width(), planner.choose_action(&s0)?);

    let mut returns = 0.0;
    for _ in 0..EPISODES {
        returns += episode(&*model, &planner)?;
    }
    println!("average discounted return over {} episodes: {:.4}", EPISODES, returns / EPISODES as Reward);

    if let Some(path) = &args.policy_out {
        planner.write_policy(path, true)?;
        println!("policy written to {}", path.display());
    }
    if let Some(path) = &args.script_out {
        planner.write_trial_script(path)?;
        println!("trial script written to {}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(2);
        }
    };
    if let Err(e) = run(args) {
        error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
