use crate::error::DataError;
use crate::types::{Employee, RecommendationRank, SlotTag};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Base weight of a slot tag. Strictly ordered between tag classes so that
/// ties between plans only come from identical tag sets.
pub fn slot_weight(tag: SlotTag) -> f64 {
    match tag {
        SlotTag::HsaEligible => 10.0,
        SlotTag::Recommended(RecommendationRank::First) => 8.0,
        SlotTag::Recommended(RecommendationRank::Fourth) => 7.0,
        SlotTag::Recommended(RecommendationRank::Third) => 6.0,
        SlotTag::Tier(_) => 5.0,
    }
}

/// Scores one employee's offers. A plan listed under several tags gets the
/// sum of their weights, then scores are min-max scaled into [0, 1].
///
/// If every plan ends up with the same raw weight, all of them score 1.0.
pub fn score_offers<'a>(
    offers: impl IntoIterator<Item = (&'a str, SlotTag)>,
) -> BTreeMap<String, f64> {
    let mut raw: BTreeMap<&str, f64> = BTreeMap::new();
    for (plan, tag) in offers {
        *raw.entry(plan).or_insert(0.0) += slot_weight(tag);
    }

    let min = raw.values().copied().fold(f64::INFINITY, f64::min);
    let max = raw.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;

    raw.into_iter()
        .map(|(plan, score)| {
            let normalized = if spread > 0.0 {
                (score - min) / spread
            } else {
                1.0
            };
            (plan.to_owned(), normalized)
        })
        .collect()
}

/// One row of a precomputed preference table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRow {
    pub employee: String,
    pub plan: String,
    pub score: f64,
}

/// Preference score per (employee, plan), defined only for offered pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceScores {
    by_employee: BTreeMap<String, BTreeMap<String, f64>>,
}

impl PreferenceScores {
    /// Derives scores from each employee's slot tags. Employees without
    /// offers get no entry.
    pub fn compute(employees: &[Employee]) -> Self {
        let by_employee = employees
            .iter()
            .filter(|employee| !employee.offers.is_empty())
            .map(|employee| {
                let offers = employee
                    .offers
                    .iter()
                    .map(|offer| (offer.plan.as_str(), offer.tag));
                (employee.id.clone(), score_offers(offers))
            })
            .collect();

        PreferenceScores { by_employee }
    }

    /// Accepts a precomputed table after checking it against the roster.
    pub fn from_rows(rows: &[PreferenceRow], employees: &[Employee]) -> Result<Self, DataError> {
        let offered: BTreeMap<&str, BTreeSet<&str>> = employees
            .iter()
            .map(|e| {
                let plans = e.offers.iter().map(|o| o.plan.as_str()).collect();
                (e.id.as_str(), plans)
            })
            .collect();

        let mut by_employee: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for row in rows {
            let reject = |reason: &str| DataError::MalformedScore {
                employee: row.employee.clone(),
                plan: row.plan.clone(),
                reason: reason.to_owned(),
            };

            if !(row.score.is_finite() && (0.0..=1.0).contains(&row.score)) {
                return Err(reject("score must lie in [0, 1]"));
            }
            let Some(plans) = offered.get(row.employee.as_str()) else {
                return Err(reject("unknown employee"));
            };
            if !plans.contains(row.plan.as_str()) {
                return Err(reject("plan is not offered to this employee"));
            }

            let scores = by_employee.entry(row.employee.clone()).or_default();
            if scores.insert(row.plan.clone(), row.score).is_some() {
                return Err(reject("duplicate row"));
            }
        }

        Ok(PreferenceScores { by_employee })
    }

    /// Score of an offered pair; pairs missing from the table score 0.
    pub fn get(&self, employee: &str, plan: &str) -> f64 {
        self.by_employee
            .get(employee)
            .and_then(|scores| scores.get(plan))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn for_employee(&self, employee: &str) -> Option<&BTreeMap<String, f64>> {
        self.by_employee.get(employee)
    }

    /// Rows grouped by employee id, highest score first within an employee.
    pub fn rows(&self) -> Vec<PreferenceRow> {
        let mut rows: Vec<PreferenceRow> = self
            .by_employee
            .iter()
            .flat_map(|(employee, scores)| {
                scores.iter().map(move |(plan, &score)| PreferenceRow {
                    employee: employee.clone(),
                    plan: plan.clone(),
                    score,
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            a.employee
                .cmp(&b.employee)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.plan.cmp(&b.plan))
        });
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coverage, PlanOffer};
    use proptest::prelude::*;

    const RECO1: SlotTag = SlotTag::Recommended(RecommendationRank::First);
    const RECO3: SlotTag = SlotTag::Recommended(RecommendationRank::Third);
    const RECO4: SlotTag = SlotTag::Recommended(RecommendationRank::Fourth);

    fn employee(id: &str, offers: &[(&str, SlotTag)]) -> Employee {
        Employee {
            id: id.to_owned(),
            name: id.to_uppercase(),
            coverage: Coverage::EmployeeOnly,
            offers: offers
                .iter()
                .map(|&(plan, tag)| PlanOffer {
                    plan: plan.to_owned(),
                    premium: 100.0,
                    tag,
                })
                .collect(),
        }
    }

    #[test]
    fn weights_are_strictly_ordered_by_tag_class() {
        let ordered = [SlotTag::HsaEligible, RECO1, RECO4, RECO3, SlotTag::Tier(1)];
        for pair in ordered.windows(2) {
            assert!(slot_weight(pair[0]) > slot_weight(pair[1]), "{pair:?}");
        }
        assert_eq!(slot_weight(SlotTag::Tier(1)), slot_weight(SlotTag::Tier(5)));
    }

    #[test]
    fn normalizes_between_lowest_and_highest() {
        let scores = score_offers([
            ("P1", SlotTag::Tier(1)),
            ("P2", SlotTag::HsaEligible),
            ("P3", RECO3),
        ]);

        assert_eq!(scores["P1"], 0.0);
        assert_eq!(scores["P2"], 1.0);
        assert_eq!(scores["P3"], 0.2);
    }

    #[test]
    fn sums_weights_of_repeated_plans() {
        // P1: tier (5) + reco1 (8) = 13, P2: hsa (10), P3: tier (5)
        let scores = score_offers([
            ("P1", SlotTag::Tier(1)),
            ("P2", SlotTag::HsaEligible),
            ("P3", SlotTag::Tier(2)),
            ("P1", RECO1),
        ]);

        assert_eq!(scores["P1"], 1.0);
        assert_eq!(scores["P2"], 5.0 / 8.0);
        assert_eq!(scores["P3"], 0.0);
    }

    #[test]
    fn equal_scores_are_all_fully_preferred() {
        let scores = score_offers([
            ("P1", SlotTag::Tier(1)),
            ("P2", SlotTag::Tier(2)),
            ("P3", SlotTag::Tier(3)),
        ]);
        assert!(scores.values().all(|&s| s == 1.0));

        let single = score_offers([("P9", RECO4)]);
        assert_eq!(single["P9"], 1.0);
    }

    #[test]
    fn employees_without_offers_get_no_scores() {
        let scores = PreferenceScores::compute(&[
            employee("a", &[("P1", SlotTag::Tier(1)), ("P2", SlotTag::HsaEligible)]),
            employee("b", &[]),
        ]);

        assert!(scores.for_employee("b").is_none());
        assert_eq!(scores.get("a", "P2"), 1.0);
        assert_eq!(scores.get("a", "P1"), 0.0);
        assert_eq!(scores.get("b", "P1"), 0.0);
    }

    #[test]
    fn scores_are_scoped_per_employee() {
        let scores = PreferenceScores::compute(&[
            employee("a", &[("P1", SlotTag::HsaEligible), ("P2", SlotTag::Tier(1))]),
            employee("b", &[("P1", SlotTag::Tier(1)), ("P2", SlotTag::HsaEligible)]),
        ]);

        assert_eq!(scores.get("a", "P1"), 1.0);
        assert_eq!(scores.get("b", "P1"), 0.0);
    }

    #[test]
    fn rows_are_sorted_by_employee_then_descending_score() {
        let scores = PreferenceScores::compute(&[
            employee("b", &[("P1", SlotTag::Tier(1)), ("P2", SlotTag::HsaEligible)]),
            employee("a", &[("P3", RECO1), ("P4", SlotTag::Tier(1))]),
        ]);

        let order: Vec<_> = scores
            .rows()
            .into_iter()
            .map(|r| (r.employee, r.plan))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a".to_owned(), "P3".to_owned()),
                ("a".to_owned(), "P4".to_owned()),
                ("b".to_owned(), "P2".to_owned()),
                ("b".to_owned(), "P1".to_owned()),
            ]
        );
    }

    #[test]
    fn precomputed_rows_are_validated_against_offers() {
        let roster = [employee("a", &[("P1", SlotTag::Tier(1))])];
        let row = |employee: &str, plan: &str, score: f64| PreferenceRow {
            employee: employee.to_owned(),
            plan: plan.to_owned(),
            score,
        };

        let scores = PreferenceScores::from_rows(&[row("a", "P1", 0.25)], &roster).unwrap();
        assert_eq!(scores.get("a", "P1"), 0.25);

        for bad in [
            vec![row("a", "P1", 1.5)],
            vec![row("a", "P1", f64::NAN)],
            vec![row("z", "P1", 0.5)],
            vec![row("a", "P2", 0.5)],
            vec![row("a", "P1", 0.5), row("a", "P1", 0.6)],
        ] {
            assert!(matches!(
                PreferenceScores::from_rows(&bad, &roster),
                Err(DataError::MalformedScore { .. })
            ));
        }
    }

    fn any_tag() -> impl Strategy<Value = SlotTag> {
        prop_oneof![
            (1u8..=5).prop_map(SlotTag::Tier),
            Just(SlotTag::HsaEligible),
            Just(RECO1),
            Just(RECO3),
            Just(RECO4),
        ]
    }

    proptest! {
        #[test]
        fn scores_lie_in_unit_interval_with_a_top_plan(
            offers in prop::collection::vec((0usize..6, any_tag()), 1..12)
        ) {
            let plans = ["P0", "P1", "P2", "P3", "P4", "P5"];
            let scores = score_offers(offers.iter().map(|&(i, tag)| (plans[i], tag)));

            prop_assert!(scores.values().all(|s| (0.0..=1.0).contains(s)));
            prop_assert!(scores.values().any(|&s| s == 1.0));
        }

        #[test]
        fn distinct_plans_with_one_tag_all_score_one(count in 1usize..6, tag in any_tag()) {
            let plans = ["P0", "P1", "P2", "P3", "P4", "P5"];
            let scores = score_offers(plans[..count].iter().map(|&p| (p, tag)));

            prop_assert_eq!(scores.len(), count);
            prop_assert!(scores.values().all(|&s| s == 1.0));
        }
    }
}
