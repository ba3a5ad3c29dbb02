use crate::error::DataError;
use crate::solver::SolveStatus;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Enrollment tier of an employee. Selects the contribution-factor bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Coverage {
    EmployeeOnly,
    EmployeeSpouse,
    EmployeeFamily,
}

impl Coverage {
    pub const ALL: [Coverage; 3] = [
        Coverage::EmployeeOnly,
        Coverage::EmployeeSpouse,
        Coverage::EmployeeFamily,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Coverage::EmployeeOnly => "Employee Only",
            Coverage::EmployeeSpouse => "Employee + Spouse",
            Coverage::EmployeeFamily => "Employee + Family",
        }
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Coverage {
    type Err = DataError;

    // Accepts "Employee + Spouse", "Employee+Spouse", "employee_spouse", ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "employeeonly" | "employee" | "self" => Ok(Coverage::EmployeeOnly),
            "employeespouse" | "spouse" => Ok(Coverage::EmployeeSpouse),
            "employeefamily" | "family" => Ok(Coverage::EmployeeFamily),
            _ => Err(DataError::UnknownCoverage(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Coverage {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Coverage> for String {
    fn from(coverage: Coverage) -> Self {
        coverage.label().to_owned()
    }
}

/// Rank of a recommendation slot. Only ranks 1, 3 and 4 are ever offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecommendationRank {
    First,
    Third,
    Fourth,
}

/// Why a plan was offered to an employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SlotTag {
    /// Default tier slot, 1 through 5.
    Tier(u8),
    HsaEligible,
    Recommended(RecommendationRank),
}

impl fmt::Display for SlotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotTag::Tier(n) => write!(f, "tier{n}"),
            SlotTag::HsaEligible => f.write_str("hsa"),
            SlotTag::Recommended(RecommendationRank::First) => f.write_str("reco1"),
            SlotTag::Recommended(RecommendationRank::Third) => f.write_str("reco3"),
            SlotTag::Recommended(RecommendationRank::Fourth) => f.write_str("reco4"),
        }
    }
}

impl FromStr for SlotTag {
    type Err = DataError;

    // Also accepts the column names of the wide roster format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        let tag = match tag.as_str() {
            "hsa" | "hsa_eligible" | "hsa_eligible_plan" => return Ok(SlotTag::HsaEligible),
            "reco1" | "reco_plan1" => return Ok(SlotTag::Recommended(RecommendationRank::First)),
            "reco3" | "reco_plan3" => return Ok(SlotTag::Recommended(RecommendationRank::Third)),
            "reco4" | "reco_plan4" => return Ok(SlotTag::Recommended(RecommendationRank::Fourth)),
            other => other,
        };

        tag.strip_prefix("plan_level_id")
            .or_else(|| tag.strip_prefix("tier"))
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| (1..=5).contains(n))
            .map(SlotTag::Tier)
            .ok_or_else(|| DataError::UnknownSlotTag(s.to_owned()))
    }
}

impl TryFrom<String> for SlotTag {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SlotTag> for String {
    fn from(tag: SlotTag) -> Self {
        tag.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOffer {
    pub plan: String,
    pub premium: f64,
    pub tag: SlotTag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub coverage: Coverage,
    #[serde(default)]
    pub offers: Vec<PlanOffer>,
}

impl Employee {
    /// The distinct plans this employee may be assigned, with their premium,
    /// in order of first appearance.
    ///
    /// A plan listed under several slot tags must carry the same premium in
    /// every listing.
    pub fn priced_plans(&self) -> Result<Vec<(&str, f64)>, DataError> {
        let mut plans: Vec<(&str, f64)> = Vec::with_capacity(self.offers.len());

        for offer in &self.offers {
            if !offer.premium.is_finite() || offer.premium < 0.0 {
                return Err(DataError::InvalidPremium {
                    employee: self.id.clone(),
                    plan: offer.plan.clone(),
                    premium: offer.premium,
                });
            }

            match plans.iter().find(|(plan, _)| *plan == offer.plan) {
                Some(&(_, first)) if first != offer.premium => {
                    return Err(DataError::ConflictingPremium {
                        employee: self.id.clone(),
                        plan: offer.plan.clone(),
                        first,
                        second: offer.premium,
                    });
                }
                Some(_) => {}
                None => plans.push((offer.plan.as_str(), offer.premium)),
            }
        }

        Ok(plans)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanInfo {
    pub hsa_eligible: bool,
    pub offered_to: usize,
}

/// Every plan offered to anyone, keyed by plan id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanCatalog {
    plans: BTreeMap<String, PlanInfo>,
}

impl PlanCatalog {
    pub fn from_employees(employees: &[Employee]) -> Self {
        let mut plans: BTreeMap<String, PlanInfo> = BTreeMap::new();

        for employee in employees {
            let mut seen = BTreeSet::new();
            for offer in &employee.offers {
                let info = plans.entry(offer.plan.clone()).or_default();
                if offer.tag == SlotTag::HsaEligible {
                    info.hsa_eligible = true;
                }
                if seen.insert(offer.plan.as_str()) {
                    info.offered_to += 1;
                }
            }
        }

        PlanCatalog { plans }
    }

    pub fn is_hsa_eligible(&self, plan: &str) -> bool {
        self.plans.get(plan).is_some_and(|info| info.hsa_eligible)
    }

    pub fn hsa_plans(&self) -> impl Iterator<Item = &str> {
        self.plans
            .iter()
            .filter(|(_, info)| info.hsa_eligible)
            .map(|(plan, _)| plan.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PlanInfo)> {
        self.plans.iter().map(|(plan, info)| (plan.as_str(), info))
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// One row of a solved assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub employee_id: String,
    pub employee_name: String,
    pub coverage: Coverage,
    pub plan_id: String,
    pub premium: f64,
    pub contribution_factor: f64,
    pub cost: f64,
}

/// Result of a solve. `assignments` is only populated when the status is
/// [`SolveStatus::Optimal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAssignment {
    pub status: SolveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub contribution_factors_used: BTreeMap<Coverage, f64>,
    #[serde(default)]
    pub total_cost: f64,
}

impl PlanAssignment {
    pub fn unsolved(status: SolveStatus, detail: Option<String>) -> Self {
        PlanAssignment {
            status,
            detail,
            assignments: Vec::new(),
            contribution_factors_used: BTreeMap::new(),
            total_cost: 0.0,
        }
    }

    pub fn is_optimal(&self) -> bool {
        self.status == SolveStatus::Optimal
    }

    pub fn distinct_plans(&self) -> BTreeSet<&str> {
        self.assignments.iter().map(|a| a.plan_id.as_str()).collect()
    }

    pub fn plan_for(&self, employee_id: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.employee_id == employee_id)
            .map(|a| a.plan_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn offer(plan: &str, premium: f64, tag: SlotTag) -> PlanOffer {
        PlanOffer {
            plan: plan.to_owned(),
            premium,
            tag,
        }
    }

    #[rstest]
    #[case("Employee Only", Coverage::EmployeeOnly)]
    #[case("Employee + Spouse", Coverage::EmployeeSpouse)]
    #[case("Employee+Family", Coverage::EmployeeFamily)]
    #[case("employee_spouse", Coverage::EmployeeSpouse)]
    fn parses_coverage_labels(#[case] input: &str, #[case] expected: Coverage) {
        assert_eq!(input.parse::<Coverage>(), Ok(expected));
    }

    #[test]
    fn rejects_unknown_coverage() {
        assert_eq!(
            "Retiree".parse::<Coverage>(),
            Err(DataError::UnknownCoverage("Retiree".to_owned()))
        );
    }

    #[rstest]
    #[case("tier1", SlotTag::Tier(1))]
    #[case("plan_level_id5", SlotTag::Tier(5))]
    #[case("HSA", SlotTag::HsaEligible)]
    #[case("hsa_eligible_plan", SlotTag::HsaEligible)]
    #[case("reco1", SlotTag::Recommended(RecommendationRank::First))]
    #[case("reco_plan3", SlotTag::Recommended(RecommendationRank::Third))]
    #[case("reco4", SlotTag::Recommended(RecommendationRank::Fourth))]
    fn parses_slot_tags(#[case] input: &str, #[case] expected: SlotTag) {
        assert_eq!(input.parse::<SlotTag>(), Ok(expected));
    }

    #[rstest]
    #[case("tier0")]
    #[case("tier6")]
    #[case("reco2")]
    #[case("platinum")]
    fn rejects_unknown_slot_tags(#[case] input: &str) {
        assert!(input.parse::<SlotTag>().is_err());
    }

    #[test]
    fn slot_tags_round_trip_through_yaml() {
        let yaml = "plan: P1\npremium: 120.5\ntag: reco4\n";
        let parsed: PlanOffer = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            parsed,
            offer("P1", 120.5, SlotTag::Recommended(RecommendationRank::Fourth))
        );
        assert_eq!(serde_yaml::to_string(&parsed).unwrap(), yaml);
    }

    #[test]
    fn priced_plans_merges_duplicate_listings() {
        let employee = Employee {
            id: "e1".to_owned(),
            name: "Ada".to_owned(),
            coverage: Coverage::EmployeeOnly,
            offers: vec![
                offer("P1", 100.0, SlotTag::Tier(1)),
                offer("P2", 80.0, SlotTag::HsaEligible),
                offer("P1", 100.0, SlotTag::Recommended(RecommendationRank::First)),
            ],
        };

        assert_eq!(
            employee.priced_plans().unwrap(),
            vec![("P1", 100.0), ("P2", 80.0)]
        );
    }

    #[test]
    fn priced_plans_rejects_conflicting_premiums() {
        let employee = Employee {
            id: "e1".to_owned(),
            name: "Ada".to_owned(),
            coverage: Coverage::EmployeeOnly,
            offers: vec![
                offer("P1", 100.0, SlotTag::Tier(1)),
                offer("P1", 90.0, SlotTag::HsaEligible),
            ],
        };

        assert_eq!(
            employee.priced_plans(),
            Err(DataError::ConflictingPremium {
                employee: "e1".to_owned(),
                plan: "P1".to_owned(),
                first: 100.0,
                second: 90.0,
            })
        );
    }

    #[test]
    fn priced_plans_rejects_negative_premium() {
        let employee = Employee {
            id: "e1".to_owned(),
            name: "Ada".to_owned(),
            coverage: Coverage::EmployeeOnly,
            offers: vec![offer("P1", -5.0, SlotTag::Tier(1))],
        };

        assert!(matches!(
            employee.priced_plans(),
            Err(DataError::InvalidPremium { .. })
        ));
    }

    #[test]
    fn catalog_flags_hsa_plans_offered_to_anyone() {
        let employees = vec![
            Employee {
                id: "a".to_owned(),
                name: "A".to_owned(),
                coverage: Coverage::EmployeeOnly,
                offers: vec![
                    offer("P1", 100.0, SlotTag::Tier(1)),
                    offer("P2", 200.0, SlotTag::HsaEligible),
                ],
            },
            Employee {
                id: "b".to_owned(),
                name: "B".to_owned(),
                coverage: Coverage::EmployeeFamily,
                offers: vec![offer("P2", 400.0, SlotTag::Tier(2))],
            },
        ];

        let catalog = PlanCatalog::from_employees(&employees);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.is_hsa_eligible("P2"));
        assert!(!catalog.is_hsa_eligible("P1"));
        assert!(!catalog.is_hsa_eligible("P9"));
        assert_eq!(catalog.hsa_plans().collect::<Vec<_>>(), vec!["P2"]);
        let offered: Vec<_> = catalog.iter().map(|(p, i)| (p, i.offered_to)).collect();
        assert_eq!(offered, vec![("P1", 1), ("P2", 2)]);
    }
}
