//! Recorded trials and their replay. A script is the sequence of states each trial backed
//! up; replaying it against identically initialized bounds reproduces them exactly.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::errors::SolverResult;
use crate::graph::NodeId;
use crate::search::{SearchCore, TrialStrategy};
use crate::utils::*;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialScript {
    pub trials: Vec<Vec<State>>,
}

impl TrialScript {
    pub fn begin_trial(&mut self) {
        self.trials.push(vec![]);
    }

    pub fn record(&mut self, state: State) {
        match self.trials.last_mut() {
            Some(trial) => trial.push(state),
            None => self.trials.push(vec![state]),
        }
    }

    #[inline] pub fn num_updates(&self) -> usize { self.trials.iter().map(|t| t.len()).sum() }

    pub fn read(path: &Path) -> SolverResult<Self> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    pub fn write(&self, path: &Path) -> SolverResult<()> {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut out, self)?;
        out.flush()?;
        Ok(())
    }
}

/// Replays one recorded trial per call
pub struct ScriptedReplay {
    trials: VecDeque<Vec<State>>,
}

impl ScriptedReplay {
    pub fn new(script: TrialScript) -> Self {
        ScriptedReplay { trials: script.trials.into() }
    }
}

impl TrialStrategy for ScriptedReplay {
    fn name(&self) -> &'static str { "script" }

    fn do_trial(&mut self, core: &mut SearchCore, _root: NodeId) -> SolverResult<()> {
        let Some(trial) = self.trials.pop_front() else { return Ok(()) };
        for state in trial {
            let id = core.bounds.get_node(&state);
            core.update(id);
        }
        Ok(())
    }

    fn is_exhausted(&self) -> bool { self.trials.is_empty() }
}
