//! Loading rosters from disk.
//!
//! Two formats are understood: the YAML planning document (see
//! [`PlanningInput`]) and the wide `employees.csv` export where every row
//! carries fixed plan slot columns:
//!
//! ```text
//! employeeId,firstName,lastName,composition,plan_level_id1,plan_level_id1_premium,...,hsa_eligible_plan,hsa_eligible_plan_premium,reco_plan1,reco_plan3,reco_plan4
//! ```
//!
//! Recommendation columns carry no premium of their own; they take the
//! premium of the same plan in a priced column of that row.

use crate::PlanningInput;
use crate::config::Config;
use crate::error::Error;
use crate::types::{Employee, PlanOffer, RecommendationRank, SlotTag};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "employeeId")]
    employee_id: String,
    #[serde(rename = "firstName", default)]
    first_name: String,
    #[serde(rename = "lastName", default)]
    last_name: String,
    composition: String,

    plan_level_id1: Option<String>,
    plan_level_id1_premium: Option<f64>,
    plan_level_id2: Option<String>,
    plan_level_id2_premium: Option<f64>,
    plan_level_id3: Option<String>,
    plan_level_id3_premium: Option<f64>,
    plan_level_id4: Option<String>,
    plan_level_id4_premium: Option<f64>,
    plan_level_id5: Option<String>,
    plan_level_id5_premium: Option<f64>,
    hsa_eligible_plan: Option<String>,
    hsa_eligible_plan_premium: Option<f64>,

    reco_plan1: Option<String>,
    reco_plan3: Option<String>,
    reco_plan4: Option<String>,
}

impl RosterRow {
    fn priced_slots(&self) -> [(SlotTag, Option<&str>, Option<f64>); 6] {
        [
            (SlotTag::Tier(1), plan_id(&self.plan_level_id1), self.plan_level_id1_premium),
            (SlotTag::Tier(2), plan_id(&self.plan_level_id2), self.plan_level_id2_premium),
            (SlotTag::Tier(3), plan_id(&self.plan_level_id3), self.plan_level_id3_premium),
            (SlotTag::Tier(4), plan_id(&self.plan_level_id4), self.plan_level_id4_premium),
            (SlotTag::Tier(5), plan_id(&self.plan_level_id5), self.plan_level_id5_premium),
            (
                SlotTag::HsaEligible,
                plan_id(&self.hsa_eligible_plan),
                self.hsa_eligible_plan_premium,
            ),
        ]
    }

    fn recommendation_slots(&self) -> [(SlotTag, Option<&str>); 3] {
        [
            (RecommendationRank::First, plan_id(&self.reco_plan1)),
            (RecommendationRank::Third, plan_id(&self.reco_plan3)),
            (RecommendationRank::Fourth, plan_id(&self.reco_plan4)),
        ]
        .map(|(rank, plan)| (SlotTag::Recommended(rank), plan))
    }

    fn into_employee(self) -> Result<Employee, Error> {
        let coverage = self.composition.parse()?;
        let mut offers: Vec<PlanOffer> = Vec::new();

        for (tag, plan, premium) in self.priced_slots() {
            match (plan, premium) {
                (Some(plan), Some(premium)) => offers.push(PlanOffer {
                    plan: plan.to_owned(),
                    premium,
                    tag,
                }),
                (Some(plan), None) => {
                    warn!(employee = %self.employee_id, plan, %tag, "slot has no premium, skipping");
                }
                (None, _) => {}
            }
        }

        for (tag, plan) in self.recommendation_slots() {
            let Some(plan) = plan else { continue };
            let priced = offers.iter().find(|offer| offer.plan == plan).map(|o| o.premium);
            match priced {
                Some(premium) => offers.push(PlanOffer {
                    plan: plan.to_owned(),
                    premium,
                    tag,
                }),
                None => {
                    warn!(employee = %self.employee_id, plan, %tag, "recommended plan has no priced slot, skipping");
                }
            }
        }

        let name = format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_owned();

        Ok(Employee {
            id: self.employee_id,
            name,
            coverage,
            offers,
        })
    }
}

fn plan_id(cell: &Option<String>) -> Option<&str> {
    cell.as_deref().map(str::trim).filter(|id| !id.is_empty())
}

/// Reads a wide-format roster.
pub fn read_wide_csv<R: Read>(reader: R) -> Result<Vec<Employee>, Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut employees = Vec::new();
    for record in csv_reader.deserialize::<RosterRow>() {
        employees.push(record?.into_employee()?);
    }
    Ok(employees)
}

/// Loads a planning document, or a wide CSV roster when the file ends in
/// `.csv`. An explicit config file replaces whatever the document carries.
pub fn load_planning_input(
    input: impl AsRef<Path>,
    config: Option<&Path>,
) -> Result<PlanningInput, Error> {
    let input = input.as_ref();
    let is_csv = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let mut planning = if is_csv {
        let file = std::fs::File::open(input)?;
        PlanningInput {
            config: Config::default(),
            employees: read_wide_csv(file)?,
            preferences: None,
        }
    } else {
        PlanningInput::from_yaml_file(input)?
    };

    if let Some(path) = config {
        planning.config = Config::from_yaml_file(path)?;
    }
    Ok(planning)
}
