use crate::config::SolverSettings;
use crate::model::LinearProgram;
use good_lp::solvers::coin_cbc::coin_cbc;
use good_lp::solvers::{SolutionStatus, WithTimeLimit};
use good_lp::{ResolutionError, Solution as LpSolution, SolverModel, Variable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Extra wall-clock time granted to CBC past its own time limit before the
/// caller stops waiting for it.
pub const SOLVER_GRACE: Duration = Duration::from_secs(5);

/// Terminal state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    SolverError,
    TimedOut,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::Unbounded => "unbounded",
            SolveStatus::SolverError => "solver error",
            SolveStatus::TimedOut => "timed out",
        };
        f.write_str(label)
    }
}

/// Solved values of the watched variables. Unknown variables read as 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolvedValues {
    values: HashMap<Variable, f64>,
}

impl SolvedValues {
    pub fn value(&self, variable: Variable) -> f64 {
        self.values.get(&variable).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(Variable, f64)> for SolvedValues {
    fn from_iter<I: IntoIterator<Item = (Variable, f64)>>(iter: I) -> Self {
        SolvedValues {
            values: iter.into_iter().collect(),
        }
    }
}

/// What a solver hands back. Only an optimal outcome carries values.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverOutcome {
    Optimal(SolvedValues),
    Infeasible,
    Unbounded,
    SolverError(String),
    TimedOut,
}

impl SolverOutcome {
    pub fn status(&self) -> SolveStatus {
        match self {
            SolverOutcome::Optimal(_) => SolveStatus::Optimal,
            SolverOutcome::Infeasible => SolveStatus::Infeasible,
            SolverOutcome::Unbounded => SolveStatus::Unbounded,
            SolverOutcome::SolverError(_) => SolveStatus::SolverError,
            SolverOutcome::TimedOut => SolveStatus::TimedOut,
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            SolverOutcome::SolverError(message) => Some(message.clone()),
            _ => None,
        }
    }
}

/// Anything able to minimise a [`LinearProgram`].
pub trait Solver {
    fn solve(&self, program: LinearProgram) -> SolverOutcome;
}

/// COIN-OR CBC through `good_lp`.
///
/// The solve runs on its own thread. With a time limit, CBC is told to stop
/// after that many seconds and reports the stop through its solution status.
/// The caller stops waiting [`SOLVER_GRACE`] later, so a hung backend still
/// yields [`SolverOutcome::TimedOut`].
#[derive(Debug, Clone, Default)]
pub struct CbcSolver {
    time_limit: Option<Duration>,
    verbose: bool,
}

impl CbcSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &SolverSettings) -> Self {
        CbcSolver {
            time_limit: settings.time_limit(),
            verbose: settings.verbose,
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }
}

impl Solver for CbcSolver {
    fn solve(&self, program: LinearProgram) -> SolverOutcome {
        let (tx, rx) = mpsc::channel();
        let time_limit = self.time_limit;
        let verbose = self.verbose;

        let spawned = thread::Builder::new()
            .name("cbc-solve".into())
            .spawn(move || {
                // The receiver is gone if the caller already gave up
                let _ = tx.send(run_cbc(program, time_limit, verbose));
            });
        if let Err(err) = spawned {
            return SolverOutcome::SolverError(format!("failed to start solver thread: {err}"));
        }

        let received = match time_limit {
            Some(limit) => rx.recv_timeout(limit + SOLVER_GRACE),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                warn!(?time_limit, "solver did not finish in time");
                SolverOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                SolverOutcome::SolverError("solver thread ended without a result".to_owned())
            }
        }
    }
}

fn run_cbc(program: LinearProgram, time_limit: Option<Duration>, verbose: bool) -> SolverOutcome {
    let LinearProgram {
        variables,
        objective,
        constraints,
        watched,
    } = program;

    let mut model = variables.minimise(objective).using(coin_cbc);
    if !verbose {
        model.set_parameter("loglevel", "0");
    }
    if let Some(limit) = time_limit {
        model = model.with_time_limit(limit.as_secs_f64());
    }
    let model = constraints.into_iter().fold(model, |m, c| m.with(c));

    let started = Instant::now();
    let result = model.solve();
    debug!(elapsed = ?started.elapsed(), "cbc returned");

    classify(result, &watched, time_limit.is_some())
}

/// Maps a backend result to an outcome. Only a proven optimum carries
/// values; an incumbent CBC holds when it stops early is dropped.
fn classify<S: LpSolution>(
    result: Result<S, ResolutionError>,
    watched: &[Variable],
    time_limited: bool,
) -> SolverOutcome {
    match result {
        Ok(solution) => match solution.status() {
            SolutionStatus::Optimal => SolverOutcome::Optimal(
                watched
                    .iter()
                    .map(|&variable| (variable, solution.value(variable)))
                    .collect(),
            ),
            status => {
                debug!(?status, "solver stopped before proving optimality");
                SolverOutcome::TimedOut
            }
        },
        Err(ResolutionError::Infeasible) => SolverOutcome::Infeasible,
        Err(ResolutionError::Unbounded) => SolverOutcome::Unbounded,
        Err(ResolutionError::Other(reason)) if time_limited && reason == "Stopped" => {
            SolverOutcome::TimedOut
        }
        Err(err) => SolverOutcome::SolverError(err.to_string()),
    }
}
