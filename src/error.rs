use crate::types::Coverage;
use thiserror::Error;

/// Problems with the roster or preference data. These are caught before a
/// model is ever handed to the solver.
#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("roster contains no employees")]
    EmptyRoster,

    #[error("employee {0:?} has no plan offers and can never be assigned")]
    NoOffers(String),

    #[error("employee id {0:?} appears more than once")]
    DuplicateEmployee(String),

    #[error("employee {employee:?} lists plan {plan:?} with invalid premium {premium}")]
    InvalidPremium {
        employee: String,
        plan: String,
        premium: f64,
    },

    #[error("employee {employee:?} lists plan {plan:?} at conflicting premiums {first} and {second}")]
    ConflictingPremium {
        employee: String,
        plan: String,
        first: f64,
        second: f64,
    },

    #[error("preference score for ({employee:?}, {plan:?}) rejected: {reason}")]
    MalformedScore {
        employee: String,
        plan: String,
        reason: String,
    },

    #[error("unknown slot tag {0:?}")]
    UnknownSlotTag(String),

    #[error("unknown coverage category {0:?}")]
    UnknownCoverage(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("max_distinct_plans must be at least 1")]
    NoPlansAllowed,

    #[error("{name} must be a finite, non-negative number (got {value})")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("contribution factor for {coverage} must lie in (0, 1] (got {value})")]
    InvalidFactor { coverage: Coverage, value: f64 },

    #[error("contribution bounds for {coverage} must satisfy 0 < low <= high <= 1 (got [{low}, {high}])")]
    InvalidBounds {
        coverage: Coverage,
        low: f64,
        high: f64,
    },

    #[error("no contribution factor configured for coverage category {0}")]
    MissingCategory(Coverage),

    #[error("solver time limit must be positive (got {0})")]
    InvalidTimeLimit(f64),
}

/// A solved model whose values contradict the model's own constraints. This
/// points at a modeling bug or a misbehaving solver and must never be turned
/// into an assignment.
#[derive(Debug, Error, PartialEq)]
pub enum InvariantViolation {
    #[error("employee {employee:?} has no plan selected (largest selection value {best})")]
    NoPlanSelected { employee: String, best: f64 },

    #[error("employee {employee:?} has several plans selected: {plans:?}")]
    SeveralPlansSelected { employee: String, plans: Vec<String> },

    #[error("{used} distinct plans in use, but at most {max} are allowed: {plans:?}")]
    TooManyPlans {
        used: usize,
        max: usize,
        plans: Vec<String>,
    },

    #[error("an HSA-eligible plan is required, but none of {plans:?} is")]
    MissingHsaPlan { plans: Vec<String> },

    #[error("contribution factor {value} for {coverage} lies outside [{low}, {high}]")]
    FactorOutOfBounds {
        coverage: Coverage,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("employee {employee:?} has coverage {coverage} but the model holds no factor for it")]
    MissingFactor { employee: String, coverage: Coverage },

    #[error("realized cost {realized} does not match solver cost component {reported}")]
    CostMismatch { realized: f64, reported: f64 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("solved model violates an invariant: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
