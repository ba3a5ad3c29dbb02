//! Plain-text rendering of results for terminals.

use crate::scoring::PreferenceRow;
use crate::types::PlanAssignment;
use std::fmt;

/// Human-readable summary of a [`PlanAssignment`].
pub struct AssignmentReport<'a>(pub &'a PlanAssignment);

impl fmt::Display for AssignmentReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        write!(f, "Status: {}", result.status)?;
        if let Some(detail) = &result.detail {
            write!(f, " ({detail})")?;
        }
        writeln!(f)?;
        if !result.is_optimal() {
            return Ok(());
        }

        writeln!(f)?;
        writeln!(f, "Employer Contribution in %")?;
        for (coverage, factor) in &result.contribution_factors_used {
            writeln!(f, "  {:<20} {:>6.1}%", coverage.label(), factor * 100.0)?;
        }

        let name_width = result
            .assignments
            .iter()
            .map(|a| a.employee_name.len())
            .chain(["Employee Name".len()])
            .max()
            .unwrap_or(0);
        let plan_width = result
            .assignments
            .iter()
            .map(|a| a.plan_id.len())
            .chain(["PlanID".len()])
            .max()
            .unwrap_or(0);

        writeln!(f)?;
        writeln!(f, "Employee Assignments")?;
        writeln!(
            f,
            "  {:<name_width$}  {:<plan_width$}  {:>19}  {:>10}  {:>10}",
            "Employee Name", "PlanID", "Contribution Factor", "Premium", "Cost"
        )?;
        for a in &result.assignments {
            writeln!(
                f,
                "  {:<name_width$}  {:<plan_width$}  {:>19.3}  {:>10.2}  {:>10.2}",
                a.employee_name, a.plan_id, a.contribution_factor, a.premium, a.cost
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Total Cost for Company: ${:.2}", result.total_cost)
    }
}

/// Preference scores as an employee/plan/score table.
pub struct PreferenceReport<'a>(pub &'a [PreferenceRow]);

impl fmt::Display for PreferenceReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let employee_width = self
            .0
            .iter()
            .map(|row| row.employee.len())
            .chain(["Employee".len()])
            .max()
            .unwrap_or(0);
        let plan_width = self
            .0
            .iter()
            .map(|row| row.plan.len())
            .chain(["Plan".len()])
            .max()
            .unwrap_or(0);

        writeln!(f, "{:<employee_width$}  {:<plan_width$}  {:>6}", "Employee", "Plan", "Score")?;
        for row in self.0 {
            writeln!(
                f,
                "{:<employee_width$}  {:<plan_width$}  {:>6.3}",
                row.employee, row.plan, row.score
            )?;
        }
        Ok(())
    }
}
