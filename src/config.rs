//! Solve configuration.
//!
//! Configuration is plain serde data, so it can sit under the `config:` key
//! of a planning document or live in its own YAML file:
//!
//! ```
//! use planfit::{Config, ContributionMode};
//!
//! let config = Config::from_yaml_str(r#"
//!     max_distinct_plans: 3
//!     weight_pref: 0.5
//!     contribution:
//!       mode: variable
//! "#).unwrap();
//!
//! assert_eq!(config.max_distinct_plans, 3);
//! assert!(config.require_hsa);
//! assert!(matches!(config.contribution, ContributionMode::Variable { .. }));
//! ```

use crate::error::ConfigError;
use crate::types::Coverage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_DISTINCT_PLANS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on the number of distinct plans in use across the roster.
    #[serde(default = "default_max_distinct_plans")]
    pub max_distinct_plans: usize,

    /// At least one HSA-eligible plan must be in use.
    #[serde(default = "default_require_hsa")]
    pub require_hsa: bool,

    #[serde(default = "default_weight_cost")]
    pub weight_cost: f64,

    #[serde(default = "default_weight_pref")]
    pub weight_pref: f64,

    #[serde(default)]
    pub contribution: ContributionMode,

    #[serde(default)]
    pub solver: SolverSettings,
}

fn default_max_distinct_plans() -> usize {
    DEFAULT_MAX_DISTINCT_PLANS
}
fn default_require_hsa() -> bool {
    true
}
fn default_weight_cost() -> f64 {
    1.0
}
fn default_weight_pref() -> f64 {
    0.1
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_distinct_plans: default_max_distinct_plans(),
            require_hsa: default_require_hsa(),
            weight_cost: default_weight_cost(),
            weight_pref: default_weight_pref(),
            contribution: ContributionMode::default(),
            solver: SolverSettings::default(),
        }
    }
}

/// How the employer-paid fraction of each premium is decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ContributionMode {
    /// A constant factor per coverage category.
    Fixed {
        #[serde(default = "default_fixed_factors")]
        factors: BTreeMap<Coverage, f64>,
    },
    /// The solver picks one factor per coverage category within bounds.
    Variable {
        #[serde(default = "default_variable_bounds")]
        bounds: BTreeMap<Coverage, FactorBounds>,
    },
}

impl Default for ContributionMode {
    fn default() -> Self {
        ContributionMode::Fixed {
            factors: default_fixed_factors(),
        }
    }
}

fn default_fixed_factors() -> BTreeMap<Coverage, f64> {
    BTreeMap::from([
        (Coverage::EmployeeOnly, 0.8),
        (Coverage::EmployeeSpouse, 0.7),
        (Coverage::EmployeeFamily, 0.6),
    ])
}

fn default_variable_bounds() -> BTreeMap<Coverage, FactorBounds> {
    Coverage::ALL
        .into_iter()
        .map(|coverage| (coverage, FactorBounds::default()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorBounds {
    pub low: f64,
    pub high: f64,
}

impl Default for FactorBounds {
    fn default() -> Self {
        FactorBounds {
            low: 0.1,
            high: 1.0,
        }
    }
}

impl ContributionMode {
    /// The range a category's factor may take. A fixed factor is the
    /// degenerate range `[f, f]`.
    pub fn range(&self, coverage: Coverage) -> Option<FactorBounds> {
        match self {
            ContributionMode::Fixed { factors } => factors.get(&coverage).map(|&f| FactorBounds {
                low: f,
                high: f,
            }),
            ContributionMode::Variable { bounds } => bounds.get(&coverage).copied(),
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, ContributionMode::Variable { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Wall-clock limit for a single solve. No limit when absent.
    #[serde(default)]
    pub time_limit_secs: Option<f64>,

    /// Let the solver backend print its own log.
    #[serde(default)]
    pub verbose: bool,
}

impl SolverSettings {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn with_max_distinct_plans(mut self, max: usize) -> Self {
        self.max_distinct_plans = max;
        self
    }

    pub fn with_require_hsa(mut self, require_hsa: bool) -> Self {
        self.require_hsa = require_hsa;
        self
    }

    pub fn with_weights(mut self, weight_cost: f64, weight_pref: f64) -> Self {
        self.weight_cost = weight_cost;
        self.weight_pref = weight_pref;
        self
    }

    pub fn with_contribution(mut self, contribution: ContributionMode) -> Self {
        self.contribution = contribution;
        self
    }

    pub fn with_time_limit_secs(mut self, seconds: f64) -> Self {
        self.solver.time_limit_secs = Some(seconds);
        self
    }

    /// Checks every value that does not depend on the roster.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_distinct_plans == 0 {
            return Err(ConfigError::NoPlansAllowed);
        }

        for (name, value) in [
            ("weight_cost", self.weight_cost),
            ("weight_pref", self.weight_pref),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }

        match &self.contribution {
            ContributionMode::Fixed { factors } => {
                for (&coverage, &value) in factors {
                    if !(value > 0.0 && value <= 1.0) {
                        return Err(ConfigError::InvalidFactor { coverage, value });
                    }
                }
            }
            ContributionMode::Variable { bounds } => {
                for (&coverage, &FactorBounds { low, high }) in bounds {
                    if !(low > 0.0 && low <= high && high <= 1.0) {
                        return Err(ConfigError::InvalidBounds {
                            coverage,
                            low,
                            high,
                        });
                    }
                }
            }
        }

        if let Some(seconds) = self.solver.time_limit_secs {
            if !(seconds.is_finite() && seconds > 0.0) {
                return Err(ConfigError::InvalidTimeLimit(seconds));
            }
        }

        Ok(())
    }

    /// Every coverage category in use needs a factor or a bound.
    pub fn check_categories(
        &self,
        categories: impl IntoIterator<Item = Coverage>,
    ) -> Result<(), ConfigError> {
        categories
            .into_iter()
            .find(|&coverage| self.contribution.range(coverage).is_none())
            .map_or(Ok(()), |coverage| Err(ConfigError::MissingCategory(coverage)))
    }
}
