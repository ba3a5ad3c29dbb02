use crate::config::{Config, ContributionMode, FactorBounds};
use crate::error::{DataError, Error};
use crate::scoring::PreferenceScores;
use crate::types::{Coverage, Employee, PlanCatalog};
use good_lp::{
    Constraint, Expression, ProblemVariables, Variable, constraint, variable, variables,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// A linear program ready to hand to a [`crate::Solver`]: variables, an
/// objective to minimise and the constraints over them.
///
/// `watched` lists the variables whose values must be read back.
pub struct LinearProgram {
    pub variables: ProblemVariables,
    pub objective: Expression,
    pub constraints: Vec<Constraint>,
    pub watched: Vec<Variable>,
}

/// The contribution factor of one coverage category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FactorTerm {
    Fixed(f64),
    Solved {
        variable: Variable,
        bounds: FactorBounds,
    },
}

/// One offered (employee, plan) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSlot {
    pub plan: String,
    pub premium: f64,
    pub score: f64,
    pub selection: Variable,
    /// Auxiliary variable equal to premium × factor when selected, else 0.
    /// Only present when factors are solved for.
    pub linearized_cost: Option<Variable>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmployeeSlots {
    pub id: String,
    pub name: String,
    pub coverage: Coverage,
    pub plans: Vec<PlanSlot>,
}

/// Everything needed to turn solved variable values back into an
/// assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelLayout {
    pub employees: Vec<EmployeeSlots>,
    pub in_use: BTreeMap<String, Variable>,
    pub factors: BTreeMap<Coverage, FactorTerm>,
    pub hsa_plans: BTreeSet<String>,
    /// Un-normalised employer cost as `Σ coefficient × variable`.
    pub cost_terms: Vec<(Variable, f64)>,
    pub max_distinct_plans: usize,
    pub require_hsa: bool,
    pub cost_scale: f64,
    pub preference_scale: f64,
}

impl ModelLayout {
    fn watched_variables(&self) -> Vec<Variable> {
        let selections = self.employees.iter().flat_map(|e| {
            e.plans
                .iter()
                .flat_map(|slot| std::iter::once(slot.selection).chain(slot.linearized_cost))
        });
        let factors = self.factors.values().filter_map(|term| match term {
            FactorTerm::Solved { variable, .. } => Some(*variable),
            FactorTerm::Fixed(_) => None,
        });

        selections
            .chain(self.in_use.values().copied())
            .chain(factors)
            .collect()
    }
}

pub struct AssignmentModel {
    pub program: LinearProgram,
    pub layout: ModelLayout,
    /// Set when the model is infeasible by construction and need not be
    /// solved at all.
    pub infeasible_reason: Option<String>,
}

type EmployeePlanToVariableMap = BTreeMap<(String, String), Variable>;

/// Builds the assignment model for a roster.
///
/// Fails before anything reaches a solver when the roster or configuration
/// can never produce a valid assignment, e.g. an employee without offers.
pub fn build_model(
    employees: &[Employee],
    scores: &PreferenceScores,
    config: &Config,
) -> Result<AssignmentModel, Error> {
    let priced = check_roster(employees)?;
    config.validate()?;
    config.check_categories(employees.iter().map(|e| e.coverage))?;

    let catalog = PlanCatalog::from_employees(employees);
    let mut vars = variables!();

    // Create all variables, and LUTs of type (employee, plan) → Variable
    let factors = declare_factors(&mut vars, employees, &config.contribution);
    let (slots, selection_map) = declare_selections(&mut vars, employees, &priced, scores, config);
    let in_use = declare_plan_usage(&mut vars, &catalog);

    let cost_terms = collect_cost_terms(&slots, &factors);
    let cost_scale = theoretical_max_cost(&slots, &config.contribution);
    let preference_scale = theoretical_max_preference(&slots);
    let objective = create_objective_function(
        &slots,
        &cost_terms,
        config.weight_cost / cost_scale,
        config.weight_pref / preference_scale,
    );
    debug!(cost_scale, preference_scale, "objective normalisation");

    let hsa_plans: BTreeSet<String> = catalog.hsa_plans().map(str::to_owned).collect();

    // Add constraints
    let mut constraints = Vec::new();
    constraints.extend(constrain_one_plan_per_employee(&slots));
    constraints.extend(constrain_selection_implies_plan_in_use(&selection_map, &in_use));
    constraints.extend(constrain_plan_in_use_implies_selection(&selection_map, &in_use));
    constraints.push(constrain_distinct_plan_count(&in_use, config.max_distinct_plans));
    let mut infeasible_reason = None;
    if config.require_hsa {
        if hsa_plans.is_empty() {
            warn!("an HSA-eligible plan is required but no employee is offered one");
            infeasible_reason = Some("no HSA-eligible plan is offered to any employee".to_owned());
        } else {
            constraints.push(constrain_hsa_plan_in_use(&in_use, &hsa_plans));
        }
    }
    constraints.extend(constrain_linearized_costs(&slots, &factors));

    let layout = ModelLayout {
        employees: slots,
        in_use,
        factors,
        hsa_plans,
        cost_terms,
        max_distinct_plans: config.max_distinct_plans,
        require_hsa: config.require_hsa,
        cost_scale,
        preference_scale,
    };
    let watched = layout.watched_variables();
    debug!(
        variables = watched.len(),
        constraints = constraints.len(),
        plans = catalog.len(),
        "assignment model built"
    );

    Ok(AssignmentModel {
        program: LinearProgram {
            variables: vars,
            objective,
            constraints,
            watched,
        },
        layout,
        infeasible_reason,
    })
}

/// Validates the roster and returns each employee's distinct priced plans.
fn check_roster(employees: &[Employee]) -> Result<Vec<Vec<(&str, f64)>>, DataError> {
    if employees.is_empty() {
        return Err(DataError::EmptyRoster);
    }

    let mut ids = BTreeSet::new();
    employees
        .iter()
        .map(|employee| {
            if !ids.insert(employee.id.as_str()) {
                return Err(DataError::DuplicateEmployee(employee.id.clone()));
            }
            if employee.offers.is_empty() {
                return Err(DataError::NoOffers(employee.id.clone()));
            }
            employee.priced_plans()
        })
        .collect()
}

fn declare_factors(
    vars: &mut ProblemVariables,
    employees: &[Employee],
    contribution: &ContributionMode,
) -> BTreeMap<Coverage, FactorTerm> {
    let categories: BTreeSet<Coverage> = employees.iter().map(|e| e.coverage).collect();

    categories
        .into_iter()
        .filter_map(|coverage| {
            let bounds = contribution.range(coverage)?;
            let term = if contribution.is_variable() {
                let variable = vars.add(
                    variable()
                        .min(bounds.low)
                        .max(bounds.high)
                        .name(format!("factor_{coverage:?}")),
                );
                FactorTerm::Solved { variable, bounds }
            } else {
                FactorTerm::Fixed(bounds.low)
            };
            Some((coverage, term))
        })
        .collect()
}

fn declare_selections(
    vars: &mut ProblemVariables,
    employees: &[Employee],
    priced: &[Vec<(&str, f64)>],
    scores: &PreferenceScores,
    config: &Config,
) -> (Vec<EmployeeSlots>, EmployeePlanToVariableMap) {
    let mut selection_map = BTreeMap::new();

    let slots = employees
        .iter()
        .zip(priced)
        .map(|(employee, plans)| {
            let plans = plans
                .iter()
                .map(|&(plan, premium)| {
                    // Plans not offered to this employee never get a variable
                    let selection = vars.add(
                        variable()
                            .binary()
                            .name(format!("select_{}_{}", employee.id, plan)),
                    );
                    selection_map.insert((employee.id.clone(), plan.to_owned()), selection);

                    let linearized_cost = config.contribution.is_variable().then(|| {
                        vars.add(
                            variable()
                                .min(0.0)
                                .name(format!("cost_{}_{}", employee.id, plan)),
                        )
                    });

                    PlanSlot {
                        plan: plan.to_owned(),
                        premium,
                        score: scores.get(&employee.id, plan),
                        selection,
                        linearized_cost,
                    }
                })
                .collect();

            EmployeeSlots {
                id: employee.id.clone(),
                name: employee.name.clone(),
                coverage: employee.coverage,
                plans,
            }
        })
        .collect();

    (slots, selection_map)
}

fn declare_plan_usage(
    vars: &mut ProblemVariables,
    catalog: &PlanCatalog,
) -> BTreeMap<String, Variable> {
    catalog
        .iter()
        .map(|(plan, _)| {
            let in_use = vars.add(variable().binary().name(format!("in_use_{plan}")));
            (plan.to_owned(), in_use)
        })
        .collect()
}

/// Employer cost as linear terms: premium × fixed factor on the selection
/// variable, or the linearized cost variable when factors are solved for.
fn collect_cost_terms(
    slots: &[EmployeeSlots],
    factors: &BTreeMap<Coverage, FactorTerm>,
) -> Vec<(Variable, f64)> {
    slots
        .iter()
        .flat_map(|employee| {
            let factor = factors.get(&employee.coverage).copied();
            employee
                .plans
                .iter()
                .filter_map(move |slot| match (factor?, slot.linearized_cost) {
                    (FactorTerm::Fixed(f), _) => Some((slot.selection, slot.premium * f)),
                    (FactorTerm::Solved { .. }, Some(cost)) => Some((cost, 1.0)),
                    (FactorTerm::Solved { .. }, None) => None,
                })
        })
        .collect()
}

/// Cost if every offered pair were selected at the highest allowed factor.
fn theoretical_max_cost(slots: &[EmployeeSlots], contribution: &ContributionMode) -> f64 {
    let total: f64 = slots
        .iter()
        .map(|employee| {
            let high = contribution
                .range(employee.coverage)
                .map_or(0.0, |bounds| bounds.high);
            employee.plans.iter().map(|slot| slot.premium * high).sum::<f64>()
        })
        .sum();
    nonzero_or_one(total)
}

/// Preference if every offered pair were selected.
fn theoretical_max_preference(slots: &[EmployeeSlots]) -> f64 {
    let total: f64 = slots
        .iter()
        .flat_map(|employee| employee.plans.iter().map(|slot| slot.score))
        .sum();
    nonzero_or_one(total)
}

fn nonzero_or_one(total: f64) -> f64 {
    if total > 0.0 { total } else { 1.0 }
}

/// minimise cost_weight × cost − preference_weight × preference, with both
/// weights already divided by their normalisation scale
fn create_objective_function(
    slots: &[EmployeeSlots],
    cost_terms: &[(Variable, f64)],
    cost_weight: f64,
    preference_weight: f64,
) -> Expression {
    let mut objective = Expression::with_capacity(cost_terms.len() * 2);

    for &(variable, coefficient) in cost_terms {
        objective.add_mul(cost_weight * coefficient, variable);
    }
    for slot in slots.iter().flat_map(|employee| &employee.plans) {
        if slot.score != 0.0 {
            objective.add_mul(-preference_weight * slot.score, slot.selection);
        }
    }

    objective
}

/// Each employee is assigned exactly one of the plans offered to them
fn constrain_one_plan_per_employee(slots: &[EmployeeSlots]) -> Vec<Constraint> {
    slots
        .iter()
        .map(|employee| {
            let zero = Expression::from(0.0);
            let selected = employee
                .plans
                .iter()
                .fold(zero, |sum, slot| sum + slot.selection);
            selected.eq(1.0)
        })
        .collect()
}

/// Selecting a plan for anyone marks the plan as in use
fn constrain_selection_implies_plan_in_use(
    selection_map: &EmployeePlanToVariableMap,
    in_use: &BTreeMap<String, Variable>,
) -> Vec<Constraint> {
    selection_map
        .iter()
        .filter_map(|((_, plan), &selection)| {
            let used = *in_use.get(plan)?;
            Some(constraint!(selection <= used))
        })
        .collect()
}

/// A plan only counts as in use when somebody is assigned to it
fn constrain_plan_in_use_implies_selection(
    selection_map: &EmployeePlanToVariableMap,
    in_use: &BTreeMap<String, Variable>,
) -> Vec<Constraint> {
    in_use
        .iter()
        .map(|(plan, &used)| {
            let zero = Expression::from(0.0);
            let assigned = selection_map
                .iter()
                .filter(|((_, p), _)| p == plan)
                .fold(zero, |sum, (_, &selection)| sum + selection);
            assigned.geq(used)
        })
        .collect()
}

fn constrain_distinct_plan_count(in_use: &BTreeMap<String, Variable>, max: usize) -> Constraint {
    let zero = Expression::from(0.0);
    let plans_used = in_use.values().fold(zero, |sum, &used| sum + used);
    plans_used.leq(max as f64)
}

fn constrain_hsa_plan_in_use(
    in_use: &BTreeMap<String, Variable>,
    hsa_plans: &BTreeSet<String>,
) -> Constraint {
    let zero = Expression::from(0.0);
    let hsa_used = hsa_plans
        .iter()
        .filter_map(|plan| in_use.get(plan))
        .fold(zero, |sum, &used| sum + used);
    hsa_used.geq(1.0)
}

/// Tie each linearized cost variable y to premium × factor × selection.
///
/// The product of a continuous factor c and a binary selection x is not
/// linear, so with M = premium × (upper factor bound):
///
///   y <= premium × c
///   y <= M × x
///   y >= premium × c − M × (1 − x)
///   y >= 0                        (variable lower bound)
///
/// which forces y = premium × c when x = 1 and y = 0 when x = 0. M is taken
/// per pair rather than globally to keep the relaxation tight.
fn constrain_linearized_costs(
    slots: &[EmployeeSlots],
    factors: &BTreeMap<Coverage, FactorTerm>,
) -> Vec<Constraint> {
    let mut constraints = Vec::new();

    for employee in slots {
        let Some(&FactorTerm::Solved { variable: factor, bounds }) = factors.get(&employee.coverage)
        else {
            continue;
        };

        for slot in &employee.plans {
            let Some(cost) = slot.linearized_cost else {
                continue;
            };
            let premium = slot.premium;
            let big_m = big_m(premium, bounds);
            let selection = slot.selection;

            constraints.push(constraint!(cost <= premium * factor));
            constraints.push(constraint!(cost <= big_m * selection));
            constraints.push(constraint!(cost >= premium * factor - big_m + big_m * selection));
        }
    }

    constraints
}

/// The largest value premium × factor can take for this pair.
pub fn big_m(premium: f64, bounds: FactorBounds) -> f64 {
    premium * bounds.high
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{CbcSolver, Solver, SolverOutcome};
    use crate::types::{PlanOffer, SlotTag};

    fn employee(id: &str, coverage: Coverage, offers: &[(&str, f64, SlotTag)]) -> Employee {
        Employee {
            id: id.to_owned(),
            name: id.to_uppercase(),
            coverage,
            offers: offers
                .iter()
                .map(|&(plan, premium, tag)| PlanOffer {
                    plan: plan.to_owned(),
                    premium,
                    tag,
                })
                .collect(),
        }
    }

    fn two_employee_roster() -> Vec<Employee> {
        vec![
            employee(
                "a",
                Coverage::EmployeeOnly,
                &[("P1", 100.0, SlotTag::Tier(1)), ("P2", 200.0, SlotTag::HsaEligible)],
            ),
            employee("b", Coverage::EmployeeFamily, &[("P1", 300.0, SlotTag::Tier(1))]),
        ]
    }

    fn build(employees: &[Employee], config: &Config) -> Result<AssignmentModel, Error> {
        build_model(employees, &PreferenceScores::compute(employees), config)
    }

    #[test]
    fn fixed_mode_declares_selection_and_usage_variables() {
        let model = build(&two_employee_roster(), &Config::default()).unwrap();
        let layout = &model.layout;

        let plans: Vec<Vec<&str>> = layout
            .employees
            .iter()
            .map(|e| e.plans.iter().map(|s| s.plan.as_str()).collect())
            .collect();
        assert_eq!(plans, vec![vec!["P1", "P2"], vec!["P1"]]);
        assert_eq!(layout.in_use.keys().collect::<Vec<_>>(), vec!["P1", "P2"]);
        assert!(layout.employees.iter().flat_map(|e| &e.plans).all(|s| s.linearized_cost.is_none()));
        assert_eq!(
            layout.factors,
            BTreeMap::from([
                (Coverage::EmployeeOnly, FactorTerm::Fixed(0.8)),
                (Coverage::EmployeeFamily, FactorTerm::Fixed(0.6)),
            ])
        );

        // 3 selections + 2 plans in use
        assert_eq!(model.program.watched.len(), 5);
        // 2 one-plan rows + 3 implications + 2 reverse implications + plan cap + HSA presence
        assert_eq!(model.program.constraints.len(), 9);
        assert!(model.infeasible_reason.is_none());
    }

    #[test]
    fn fixed_mode_costs_premium_times_factor() {
        let model = build(&two_employee_roster(), &Config::default()).unwrap();
        let coefficients: Vec<f64> = model.layout.cost_terms.iter().map(|&(_, c)| c).collect();
        assert_eq!(coefficients, vec![100.0 * 0.8, 200.0 * 0.8, 300.0 * 0.6]);
        assert_eq!(model.layout.cost_scale, 80.0 + 160.0 + 180.0);
    }

    #[test]
    fn variable_mode_adds_factor_and_linearized_cost_variables() {
        let config = Config::default().with_contribution(ContributionMode::Variable {
            bounds: BTreeMap::from([
                (Coverage::EmployeeOnly, FactorBounds { low: 0.5, high: 0.9 }),
                (Coverage::EmployeeFamily, FactorBounds::default()),
            ]),
        });
        let model = build(&two_employee_roster(), &config).unwrap();
        let layout = &model.layout;

        assert!(matches!(
            layout.factors[&Coverage::EmployeeOnly],
            FactorTerm::Solved { bounds, .. } if bounds == FactorBounds { low: 0.5, high: 0.9 }
        ));
        assert!(layout.employees.iter().flat_map(|e| &e.plans).all(|s| s.linearized_cost.is_some()));
        assert!(layout.cost_terms.iter().all(|&(_, c)| c == 1.0));
        assert_eq!(layout.cost_terms.len(), 3);
        // 3 selections + 3 linearized costs + 2 plans in use + 2 factors
        assert_eq!(model.program.watched.len(), 10);
        // 9 structural rows + 3 linearization rows per pair
        assert_eq!(model.program.constraints.len(), 9 + 3 * 3);
        assert_eq!(layout.cost_scale, 100.0 * 0.9 + 200.0 * 0.9 + 300.0 * 1.0);
    }

    #[test]
    fn plans_in_use_always_have_an_assignee() {
        // The HSA plan is the dearer one, so only an actual assignment may
        // satisfy the HSA row.
        let roster = vec![
            employee(
                "a",
                Coverage::EmployeeOnly,
                &[("P1", 100.0, SlotTag::Tier(1)), ("P2", 200.0, SlotTag::HsaEligible)],
            ),
            employee("b", Coverage::EmployeeOnly, &[("P1", 100.0, SlotTag::Tier(1))]),
        ];
        let config = Config::default()
            .with_max_distinct_plans(2)
            .with_weights(1.0, 0.0);
        let model = build(&roster, &config).unwrap();
        let layout = model.layout;

        let outcome = CbcSolver::new().solve(model.program);
        let SolverOutcome::Optimal(values) = outcome else {
            panic!("expected optimal outcome, got {outcome:?}");
        };

        for (plan, &used) in &layout.in_use {
            let assigned = layout
                .employees
                .iter()
                .flat_map(|e| &e.plans)
                .filter(|slot| &slot.plan == plan)
                .any(|slot| values.value(slot.selection) > 0.5);
            assert_eq!(values.value(used) > 0.5, assigned, "usage of {plan}");
        }
        assert!(values.value(layout.employees[0].plans[1].selection) > 0.5);
    }

    #[test]
    fn big_m_follows_each_premium() {
        let bounds = FactorBounds { low: 0.1, high: 0.75 };
        assert_eq!(big_m(200.0, bounds), 150.0);
        assert_eq!(big_m(0.0, bounds), 0.0);
    }

    #[test]
    fn employee_without_offers_fails_before_solving() {
        let mut roster = two_employee_roster();
        roster.push(employee("c", Coverage::EmployeeOnly, &[]));

        assert!(matches!(
            build(&roster, &Config::default()),
            Err(Error::Data(DataError::NoOffers(id))) if id == "c"
        ));
    }

    #[test]
    fn empty_roster_is_rejected() {
        assert!(matches!(
            build(&[], &Config::default()),
            Err(Error::Data(DataError::EmptyRoster))
        ));
    }

    #[test]
    fn duplicate_employee_ids_are_rejected() {
        let mut roster = two_employee_roster();
        roster.push(roster[0].clone());

        assert!(matches!(
            build(&roster, &Config::default()),
            Err(Error::Data(DataError::DuplicateEmployee(id))) if id == "a"
        ));
    }

    #[test]
    fn missing_category_factor_is_a_config_error() {
        let config = Config::default().with_contribution(ContributionMode::Fixed {
            factors: BTreeMap::from([(Coverage::EmployeeOnly, 0.8)]),
        });

        assert!(matches!(
            build(&two_employee_roster(), &config),
            Err(Error::Config(crate::error::ConfigError::MissingCategory(
                Coverage::EmployeeFamily
            )))
        ));
    }

    #[test]
    fn required_hsa_without_any_hsa_offer_is_infeasible_by_construction() {
        let roster = vec![employee("a", Coverage::EmployeeOnly, &[("P1", 100.0, SlotTag::Tier(1))])];

        let model = build(&roster, &Config::default()).unwrap();
        assert!(model.infeasible_reason.is_some());

        let model = build(&roster, &Config::default().with_require_hsa(false)).unwrap();
        assert!(model.infeasible_reason.is_none());
    }

    #[test]
    fn preference_scale_sums_every_offered_score() {
        // a: P2 (hsa) scores 1.0, P1 scores 0.0; b: single plan scores 1.0
        let model = build(&two_employee_roster(), &Config::default()).unwrap();
        assert_eq!(model.layout.preference_scale, 2.0);

        let scores: Vec<f64> = model
            .layout
            .employees
            .iter()
            .flat_map(|e| e.plans.iter().map(|s| s.score))
            .collect();
        assert_eq!(scores, vec![0.0, 1.0, 1.0]);
    }
}
