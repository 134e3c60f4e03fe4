// #![allow(unused)]
#![allow(clippy::type_complexity)]
// #![allow(clippy::new_without_default)]

pub mod linalg;
pub mod errors;
pub mod config;
pub mod utils;
pub mod graph;
pub mod bounds;
pub mod bound_pair;
pub mod policy;
pub mod search;
pub mod models;

pub use bound_pair::BoundPair;
pub use config::{BoundKind, SearchStrategy, SolverConfig};
pub use errors::{SolverError, SolverResult};
pub use search::{PlanLimits, PlanOutcome, Planner};
