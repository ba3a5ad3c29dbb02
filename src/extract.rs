use crate::error::InvariantViolation;
use crate::model::{EmployeeSlots, FactorTerm, ModelLayout};
use crate::solver::{SolveStatus, SolvedValues};
use crate::types::{Assignment, Coverage, PlanAssignment};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A binary variable counts as selected above this value. Solvers return
/// near-binary values like 0.9999999 or 1e-9, so exact comparisons with 0
/// and 1 are wrong; values hovering around 0.5 are noise the threshold has
/// to decide.
pub const SELECTION_THRESHOLD: f64 = 0.5;

/// Relative tolerance when comparing realized cost with the solver's cost
/// component. Never tighter than this in absolute terms either.
pub const COST_TOLERANCE: f64 = 1e-5;

/// Slack allowed when checking solved factors against their bounds.
pub const FACTOR_TOLERANCE: f64 = 1e-6;

pub fn is_selected(value: f64) -> bool {
    value > SELECTION_THRESHOLD
}

/// Turns solved values into a validated assignment.
///
/// Every check here restates something the model already enforces, so a
/// failure means the model or the solver is broken, never that the input
/// was bad.
pub fn extract_assignment(
    layout: &ModelLayout,
    values: &SolvedValues,
) -> Result<PlanAssignment, InvariantViolation> {
    let factors = resolve_factors(layout, values)?;

    let assignments = layout
        .employees
        .iter()
        .map(|employee| assign_employee(employee, values, &factors))
        .collect::<Result<Vec<_>, _>>()?;

    check_distinct_plan_count(&assignments, layout.max_distinct_plans)?;
    if layout.require_hsa {
        check_hsa_plan_present(&assignments, &layout.hsa_plans)?;
    }

    let total_cost: f64 = assignments.iter().map(|a| a.cost).sum();
    check_cost_component(total_cost, layout, values)?;
    debug!(total_cost, employees = assignments.len(), "assignment extracted");

    Ok(PlanAssignment {
        status: SolveStatus::Optimal,
        detail: None,
        assignments,
        contribution_factors_used: factors,
        total_cost,
    })
}

/// The factor applied to each coverage category, read from the constant or
/// the solved variable.
fn resolve_factors(
    layout: &ModelLayout,
    values: &SolvedValues,
) -> Result<BTreeMap<Coverage, f64>, InvariantViolation> {
    layout
        .factors
        .iter()
        .map(|(&coverage, term)| {
            let factor = match *term {
                FactorTerm::Fixed(factor) => factor,
                FactorTerm::Solved { variable, bounds } => {
                    let value = values.value(variable);
                    if value < bounds.low - FACTOR_TOLERANCE
                        || value > bounds.high + FACTOR_TOLERANCE
                    {
                        return Err(InvariantViolation::FactorOutOfBounds {
                            coverage,
                            value,
                            low: bounds.low,
                            high: bounds.high,
                        });
                    }
                    value.clamp(bounds.low, bounds.high)
                }
            };
            Ok((coverage, factor))
        })
        .collect()
}

fn assign_employee(
    employee: &EmployeeSlots,
    values: &SolvedValues,
    factors: &BTreeMap<Coverage, f64>,
) -> Result<Assignment, InvariantViolation> {
    let selected: Vec<_> = employee
        .plans
        .iter()
        .filter(|slot| is_selected(values.value(slot.selection)))
        .collect();

    let slot = match selected.as_slice() {
        [slot] => *slot,
        [] => {
            let best = employee
                .plans
                .iter()
                .map(|slot| values.value(slot.selection))
                .fold(0.0, f64::max);
            return Err(InvariantViolation::NoPlanSelected {
                employee: employee.id.clone(),
                best,
            });
        }
        several => {
            return Err(InvariantViolation::SeveralPlansSelected {
                employee: employee.id.clone(),
                plans: several.iter().map(|slot| slot.plan.clone()).collect(),
            });
        }
    };

    let factor = factors.get(&employee.coverage).copied().ok_or_else(|| {
        InvariantViolation::MissingFactor {
            employee: employee.id.clone(),
            coverage: employee.coverage,
        }
    })?;

    Ok(Assignment {
        employee_id: employee.id.clone(),
        employee_name: employee.name.clone(),
        coverage: employee.coverage,
        plan_id: slot.plan.clone(),
        premium: slot.premium,
        contribution_factor: factor,
        cost: slot.premium * factor,
    })
}

fn check_distinct_plan_count(
    assignments: &[Assignment],
    max: usize,
) -> Result<(), InvariantViolation> {
    let plans: BTreeSet<&str> = assignments.iter().map(|a| a.plan_id.as_str()).collect();
    if plans.len() > max {
        return Err(InvariantViolation::TooManyPlans {
            used: plans.len(),
            max,
            plans: plans.into_iter().map(str::to_owned).collect(),
        });
    }
    Ok(())
}

fn check_hsa_plan_present(
    assignments: &[Assignment],
    hsa_plans: &BTreeSet<String>,
) -> Result<(), InvariantViolation> {
    if assignments.iter().any(|a| hsa_plans.contains(&a.plan_id)) {
        return Ok(());
    }
    let plans: BTreeSet<String> = assignments.iter().map(|a| a.plan_id.clone()).collect();
    Err(InvariantViolation::MissingHsaPlan {
        plans: plans.into_iter().collect(),
    })
}

/// The solver's own view of employer cost, evaluated on raw values, must
/// agree with the cost recomputed from the rounded assignment.
fn check_cost_component(
    realized: f64,
    layout: &ModelLayout,
    values: &SolvedValues,
) -> Result<(), InvariantViolation> {
    let reported: f64 = layout
        .cost_terms
        .iter()
        .map(|&(variable, coefficient)| coefficient * values.value(variable))
        .sum();

    let tolerance = COST_TOLERANCE * reported.abs().max(1.0);
    if (realized - reported).abs() > tolerance {
        return Err(InvariantViolation::CostMismatch { realized, reported });
    }
    Ok(())
}
