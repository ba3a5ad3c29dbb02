//! Assign every employee exactly one health plan, trading employer cost
//! against employee preference, while capping the number of distinct plans
//! and keeping at least one HSA-eligible plan on the menu.
//!
//! The pipeline is one-way: slot tags are turned into preference scores
//! ([`scoring`]), the roster becomes a mixed integer program ([`model`]),
//! a [`Solver`] resolves it and the solved values are read back and checked
//! ([`extract`]).

pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod report;
pub mod roster;
pub mod scoring;
pub mod solver;
pub mod types;

pub use config::{Config, ContributionMode, FactorBounds, SolverSettings};
pub use error::{ConfigError, DataError, Error, InvariantViolation};
pub use scoring::{PreferenceRow, PreferenceScores};
pub use solver::{CbcSolver, SolveStatus, Solver, SolverOutcome};
pub use types::{Assignment, Coverage, Employee, PlanAssignment, PlanOffer, SlotTag};

use model::build_model;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// A roster together with its configuration, as read from a planning
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningInput {
    #[serde(default)]
    pub config: Config,
    pub employees: Vec<Employee>,
    /// Precomputed preference scores. Derived from slot tags when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Vec<PreferenceRow>>,
}

impl PlanningInput {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn preference_scores(&self) -> Result<PreferenceScores, DataError> {
        match &self.preferences {
            Some(rows) => PreferenceScores::from_rows(rows, &self.employees),
            None => Ok(PreferenceScores::compute(&self.employees)),
        }
    }

    /// Solves with CBC, honouring the configured solver settings.
    pub fn solve(&self) -> Result<PlanAssignment, Error> {
        self.solve_with(&CbcSolver::from_settings(&self.config.solver))
    }

    pub fn solve_with(&self, solver: &dyn Solver) -> Result<PlanAssignment, Error> {
        let scores = self.preference_scores()?;
        plan_assignment(&self.employees, &scores, &self.config, solver)
    }
}

/// Builds the model, solves it once and extracts the assignment.
///
/// Bad input is an `Err` raised before the solver runs. A solver that ends
/// anywhere other than optimal is a regular result carrying that status and
/// no assignments; the caller decides whether to relax the configuration and
/// try again.
pub fn plan_assignment(
    employees: &[Employee],
    scores: &PreferenceScores,
    config: &Config,
    solver: &dyn Solver,
) -> Result<PlanAssignment, Error> {
    info!(
        employees = employees.len(),
        max_distinct_plans = config.max_distinct_plans,
        require_hsa = config.require_hsa,
        variable_factors = config.contribution.is_variable(),
        "planning assignment"
    );

    let model = build_model(employees, scores, config)?;
    if let Some(reason) = model.infeasible_reason {
        info!(%reason, "model is infeasible by construction");
        return Ok(PlanAssignment::unsolved(SolveStatus::Infeasible, Some(reason)));
    }

    let outcome = solver.solve(model.program);
    let result = match outcome {
        SolverOutcome::Optimal(values) => extract::extract_assignment(&model.layout, &values)?,
        other => PlanAssignment::unsolved(other.status(), other.detail()),
    };

    info!(
        status = %result.status,
        total_cost = result.total_cost,
        plans = result.distinct_plans().len(),
        "planning finished"
    );
    Ok(result)
}
