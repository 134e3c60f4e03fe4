//! Concrete models the planner can run on: explicit tables for MDPs and POMDPs, the
//! admissible initial bounds they hand out, and a few small benchmark problems.

pub mod catalog;
pub mod initial;
pub mod pomdp;
pub mod tabular;

pub use initial::{BlindPolicyBound, ConstantBound, MdpValueBound};
pub use pomdp::TabularPomdp;
pub use tabular::{Dynamics, TabularMdp};
