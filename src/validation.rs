//! Advisory checks on user input.
//!
//! Nothing here mutates a model. Each check produces messages; the caller's
//! [`ValidationPolicy`] decides whether those messages block the operation.

use crate::error::{FinancialModelError, Result};
use crate::projection::{check_projection_mix, revenue_subtree_ids};
use crate::schema::{ModelState, ProjectionMethod, StatementKind};
use crate::skeleton::{COGS, DNA, INTEREST_EXPENSE, SGA};
use crate::tree;
use crate::utils::VALUE_TOLERANCE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Report problems but let the operation proceed.
    #[default]
    Advisory,
    /// Reject the operation when any problem is found.
    Blocking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub should_allow: bool,
    pub messages: Vec<String>,
}

impl ValidationOutcome {
    pub fn allowed() -> Self {
        Self {
            should_allow: true,
            messages: Vec::new(),
        }
    }

    pub fn from_messages(messages: Vec<String>, policy: ValidationPolicy) -> Self {
        let should_allow = messages.is_empty() || policy == ValidationPolicy::Advisory;
        Self {
            should_allow,
            messages,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A trimmed, non-empty label.
pub fn validate_label(label: &str) -> Result<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(FinancialModelError::InvalidLabel(label.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Revenue and the core expense rows (with their breakdowns) are entered as positive amounts.
pub fn disallows_negative(state: &ModelState, statement: StatementKind, row_id: &str) -> bool {
    if statement != StatementKind::IncomeStatement {
        return false;
    }
    if revenue_subtree_ids(&state.income_statement).contains(row_id) {
        return true;
    }
    [COGS, SGA, DNA, INTEREST_EXPENSE].iter().any(|expense| {
        tree::find_row(&state.income_statement, expense)
            .is_some_and(|row| tree::contains(std::slice::from_ref(row), row_id))
    })
}

pub fn validate_value(
    state: &ModelState,
    statement: StatementKind,
    row_id: &str,
    value: f64,
    policy: ValidationPolicy,
) -> ValidationOutcome {
    let mut messages = Vec::new();
    if !value.is_finite() {
        messages.push(format!("Value for '{}' must be a finite number", row_id));
    } else if value < 0.0 && disallows_negative(state, statement, row_id) {
        messages.push(format!(
            "'{}' is entered as a positive amount; got {}",
            row_id, value
        ));
    }
    ValidationOutcome::from_messages(messages, policy)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareCheck {
    pub stream_id: String,
    pub total_pct: f64,
    pub within_tolerance: bool,
}

/// Breakdown line shares of a product-line or channel configuration should total 100%.
pub fn check_breakdown_shares(stream_id: &str, method: &ProjectionMethod) -> Option<ShareCheck> {
    let lines = method.lines()?;
    let overridden = lines.iter().all(|line| line.base_override.is_some());
    let total_pct: f64 = lines.iter().map(|line| line.share_pct).sum();
    Some(ShareCheck {
        stream_id: stream_id.to_string(),
        total_pct,
        within_tolerance: overridden || (total_pct - 100.0).abs() <= VALUE_TOLERANCE,
    })
}

/// Share totals of `method`, plus the category mix of the stream the row belongs to
/// once `method` is in place.
pub fn validate_projection(
    state: &ModelState,
    row_id: &str,
    method: &ProjectionMethod,
    policy: ValidationPolicy,
) -> ValidationOutcome {
    let mut messages = Vec::new();

    if let Some(check) = check_breakdown_shares(row_id, method) {
        if !check.within_tolerance {
            messages.push(format!(
                "Breakdown shares for '{}' total {:.2}%, expected 100%",
                row_id, check.total_pct
            ));
        }
    }

    if let ProjectionMethod::Unsupported = method {
        messages.push(format!("'{}' uses an unsupported projection method", row_id));
    }

    let mut candidate = state.clone();
    candidate
        .revenue_projections
        .insert(row_id.to_string(), method.clone());
    if let Some(Some(parent)) = tree::find_parent_id(&candidate.income_statement, row_id) {
        let mix = check_projection_mix(&candidate, &parent);
        if !mix.valid {
            messages.push(format!(
                "Breakdown of '{}' mixes growth, dollar and percent-of-stream methods",
                parent
            ));
        }
    }

    ValidationOutcome::from_messages(messages, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BreakdownLine, GrowthSchedule, ModelMeta, Row};
    use crate::skeleton::{default_template, REVENUE, TAX};
    use std::collections::BTreeMap;

    fn state() -> ModelState {
        let mut income_statement = default_template(StatementKind::IncomeStatement);
        income_statement = tree::map_subtree(&income_statement, REVENUE, |mut r| {
            r.children = vec![Row::input("saas", "SaaS")];
            r
        });
        ModelState {
            meta: ModelMeta::new("Test Co", vec!["2023A".to_string()]),
            income_statement,
            balance_sheet: default_template(StatementKind::BalanceSheet),
            cash_flow: default_template(StatementKind::CashFlow),
            sbc: BTreeMap::new(),
            dna: BTreeMap::new(),
            revenue_projections: BTreeMap::new(),
        }
    }

    fn line(id: &str, share_pct: f64) -> BreakdownLine {
        BreakdownLine {
            id: id.to_string(),
            label: id.to_string(),
            share_pct,
            growth: GrowthSchedule::constant(5.0),
            base_override: None,
        }
    }

    #[test]
    fn test_validate_label() {
        assert_eq!(validate_label("  R&D ").unwrap(), "R&D");
        assert!(matches!(
            validate_label("   "),
            Err(FinancialModelError::InvalidLabel(_))
        ));
    }

    #[test]
    fn test_negative_revenue_is_flagged() {
        let state = state();
        let advisory = validate_value(&state, StatementKind::IncomeStatement, "saas", -5.0, ValidationPolicy::Advisory);
        assert!(advisory.should_allow);
        assert_eq!(advisory.messages.len(), 1);

        let blocking = validate_value(&state, StatementKind::IncomeStatement, "saas", -5.0, ValidationPolicy::Blocking);
        assert!(!blocking.should_allow);

        let tax = validate_value(&state, StatementKind::IncomeStatement, TAX, -5.0, ValidationPolicy::Blocking);
        assert!(tax.should_allow && tax.is_clean());
    }

    #[test]
    fn test_breakdown_shares_must_total_100() {
        let good = ProjectionMethod::ProductLine {
            lines: vec![line("a", 60.0), line("b", 40.0)],
        };
        assert!(check_breakdown_shares("revenue", &good).unwrap().within_tolerance);

        let bad = ProjectionMethod::Channel {
            lines: vec![line("a", 60.0), line("b", 30.0)],
        };
        let check = check_breakdown_shares("revenue", &bad).unwrap();
        assert!(!check.within_tolerance);
        assert_eq!(check.total_pct, 90.0);

        let outcome = validate_projection(&state(), REVENUE, &bad, ValidationPolicy::Blocking);
        assert!(!outcome.should_allow);
    }
}
