//! # Max-planes policy files
//!
//! A lower bound made of planes doubles as a policy: at belief `b` take the action of the
//! plane maximizing `α·b`. The file is JSON:
//!
//! ```json
//! {"policyType": "MaxPlanesLowerBound", "numStates": 2, "useMask": true, "numPlanes": 1,
//!  "planes": [{"action": 0, "numEntries": 2, "entries": [[0, -20.0], [1, -20.0]]}]}
//! ```
//!
//! With `useMask`, a plane only applies to beliefs whose support lies inside its entries.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::bounds::Plane;
use crate::errors::{SolverError, SolverResult};
use crate::utils::*;

pub const POLICY_TYPE: &str = "MaxPlanesLowerBound";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPlane {
    pub action: ActionId,
    pub num_entries: usize,
    /// `(state, value)`, ascending by state
    pub entries: Vec<(usize, Reward)>,
}

impl PolicyPlane {
    fn covers(&self, belief: &State) -> bool {
        belief.support().all(|s| self.entries.binary_search_by_key(&s, |(i, _)| *i).is_ok())
    }

    fn value(&self, belief: &State) -> Reward {
        self.entries.iter().map(|(s, v)| belief.get(*s) * v).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxPlanesPolicy {
    pub policy_type: String,
    pub num_states: usize,
    pub use_mask: bool,
    pub num_planes: usize,
    pub planes: Vec<PolicyPlane>,
}

impl MaxPlanesPolicy {
    pub fn from_planes<'a>(num_states: usize, use_mask: bool, planes: impl Iterator<Item = &'a Plane>) -> Self {
        let planes: Vec<PolicyPlane> = planes
            .map(|p| {
                let entries = p.entries();
                PolicyPlane { action: p.action, num_entries: entries.len(), entries }
            })
            .collect();
        MaxPlanesPolicy { policy_type: POLICY_TYPE.into(), num_states, use_mask, num_planes: planes.len(), planes }
    }

    /// Write atomically: a sibling temp file is renamed over `path` once complete
    pub fn write(&self, path: &Path) -> SolverResult<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut out, self)?;
            out.write_all(b"\n")?;
            out.flush()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read(path: &Path) -> SolverResult<Self> {
        let policy: MaxPlanesPolicy = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> SolverResult<()> {
        if self.policy_type != POLICY_TYPE {
            return Err(SolverError::InvalidPolicy(format!("unknown policy type {:?}", self.policy_type)));
        }
        if self.num_planes != self.planes.len() {
            return Err(SolverError::InvalidPolicy(format!("numPlanes is {} but {} planes follow", self.num_planes, self.planes.len())));
        }
        for (k, plane) in self.planes.iter().enumerate() {
            if plane.num_entries != plane.entries.len() {
                return Err(SolverError::InvalidPolicy(format!("plane {}: numEntries does not match its entries", k)));
            }
            let ascending = plane.entries.windows(2).all(|w| w[0].0 < w[1].0);
            if !ascending || plane.entries.iter().any(|(s, _)| *s >= self.num_states) {
                return Err(SolverError::InvalidPolicy(format!("plane {}: entries must be ascending state indices below {}", k, self.num_states)));
            }
        }
        Ok(())
    }

    fn best(&self, belief: &State) -> Option<(ActionId, Reward)> {
        let mut best: Option<(ActionId, Reward)> = None;
        for plane in self.planes.iter() {
            if self.use_mask && !plane.covers(belief) { continue; }
            let v = plane.value(belief);
            match best {
                Some((_, bv)) if v <= bv => (),
                _ => best = Some((plane.action, v)),
            }
        }
        best
    }

    /// Lower bound on the value at `belief`
    pub fn value(&self, belief: &State) -> Option<Reward> {
        self.best(belief).map(|(_, v)| v)
    }

    pub fn choose_action(&self, belief: &State) -> Option<ActionId> {
        self.best(belief).map(|(a, _)| a)
    }
}
