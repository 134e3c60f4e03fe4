//! Solver configuration. Every field has a default so a JSON config only needs the
//! keys it wants to change.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::errors::{SolverError, SolverResult};
use crate::utils::*;

/// Which trial-based search algorithm drives the backups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy { Rtdp, Lrtdp, Hdp, Frtdp, Hsvi, Wrtdp, Script }

/// Shape of a bound representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    /// One scalar per cached node
    Point,
    /// Max-planes (lower) or sawtooth point set (upper), belief models only
    Convex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub search_strategy: SearchStrategy,
    pub lower_bound_representation: BoundKind,
    pub upper_bound_representation: BoundKind,
    /// Regret bound: planning stops once `ub - lb <= target_precision` at the root
    pub target_precision: Reward,
    pub max_backups: Option<u64>,
    /// Hard cap on trial depth, applies to every strategy
    pub max_depth: usize,
    /// Initial bounds are computed to `target_precision * init_precision_factor`
    pub init_precision_factor: Reward,
    /// Outcomes with probability at or below this are treated as impossible
    pub outcome_epsilon: Probability,
    pub use_masking: bool,
    pub use_support_index: bool,
    pub use_ub_action_caching: bool,
    pub prune_growth_factor: f64,
    pub prune_increment: usize,
    /// Refine the upper initial bound with a nested lookahead search
    pub relax_upper_bound: bool,
    pub relax_depth: usize,
    pub relax_max_sweeps: usize,
    pub frtdp_initial_depth: f64,
    pub frtdp_depth_growth: f64,
    /// WRTDP stops a trial once `occupancy * width` falls below this fraction of the target
    pub wrtdp_occupancy_cutoff: f64,
    pub seed: Option<u64>,
    pub record_trials: bool,
    pub script_path: Option<PathBuf>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            search_strategy: SearchStrategy::Frtdp,
            lower_bound_representation: BoundKind::Point,
            upper_bound_representation: BoundKind::Point,
            target_precision: TARGET_PRECISION,
            max_backups: None,
            max_depth: MAX_TRIAL_DEPTH,
            init_precision_factor: INIT_PRECISION_FACTOR,
            outcome_epsilon: OBS_IS_ZERO_EPS,
            use_masking: true,
            use_support_index: true,
            use_ub_action_caching: true,
            prune_growth_factor: PRUNE_GROWTH_FACTOR,
            prune_increment: PRUNE_INCREMENT,
            relax_upper_bound: false,
            relax_depth: RELAX_DEPTH,
            relax_max_sweeps: RELAX_MAX_SWEEPS,
            frtdp_initial_depth: FRTDP_INITIAL_DEPTH,
            frtdp_depth_growth: FRTDP_DEPTH_GROWTH,
            wrtdp_occupancy_cutoff: WRTDP_OCCUPANCY_CUTOFF,
            seed: None,
            record_trials: false,
            script_path: None,
        }
    }
}

impl SolverConfig {
    pub fn from_json_file(path: &Path) -> SolverResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SolverConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.search_strategy = strategy;
        self
    }

    pub fn with_bounds(mut self, lower: BoundKind, upper: BoundKind) -> Self {
        self.lower_bound_representation = lower;
        self.upper_bound_representation = upper;
        self
    }

    pub fn with_precision(mut self, target: Reward) -> Self {
        self.target_precision = target;
        self
    }

    /// Precision each initial bound function is computed to
    pub fn init_precision(&self) -> Reward {
        self.target_precision * self.init_precision_factor
    }

    pub fn validate(&self) -> SolverResult<()> {
        if !(self.target_precision > 0.0) {
            return Err(SolverError::Config(format!("target_precision must be positive, got {}", self.target_precision)));
        }
        if !(self.init_precision_factor > 0.0 && self.init_precision_factor <= 1.0) {
            return Err(SolverError::Config("init_precision_factor must be in (0, 1]".into()));
        }
        if self.max_depth == 0 {
            return Err(SolverError::Config("max_depth must be at least 1".into()));
        }
        if self.prune_growth_factor < 1.0 {
            return Err(SolverError::Config("prune_growth_factor must be >= 1".into()));
        }
        if self.frtdp_depth_growth <= 1.0 || self.frtdp_initial_depth < 1.0 {
            return Err(SolverError::Config("frtdp depth must start >= 1 and grow by a ratio > 1".into()));
        }
        if !(0.0..=1.0).contains(&self.outcome_epsilon) {
            return Err(SolverError::Config("outcome_epsilon must be a probability".into()));
        }
        if self.search_strategy == SearchStrategy::Script && self.script_path.is_none() {
            return Err(SolverError::Config("script strategy needs a script_path".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SolverConfig = serde_json::from_str(r#"{"search_strategy": "hsvi", "target_precision": 0.5}"#).unwrap();
        assert_eq!(config.search_strategy, SearchStrategy::Hsvi);
        assert_eq!(config.target_precision, 0.5);
        assert_eq!(config.max_depth, MAX_TRIAL_DEPTH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_precision_and_missing_script() {
        assert!(SolverConfig::default().with_precision(0.0).validate().is_err());
        let scripted = SolverConfig::default().with_strategy(SearchStrategy::Script);
        assert!(matches!(scripted.validate(), Err(SolverError::Config(_))));
    }
}
