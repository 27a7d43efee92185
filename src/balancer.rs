use crate::error::{FinancialModelError, Result};
use crate::schema::{ModelState, Row};
use crate::skeleton::{TOTAL_ASSETS, TOTAL_EQUITY, TOTAL_LIABILITIES};
use crate::tree;
use crate::utils::VALUE_TOLERANCE;
use log::warn;
use serde::{Deserialize, Serialize};

/// Assets against liabilities plus equity for one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub year: String,
    pub total_assets: f64,
    pub total_liabilities: f64,
    pub total_equity: f64,
    /// `assets − (liabilities + equity)`.
    pub difference: f64,
    pub balanced: bool,
}

pub struct AccountingBalancer<'a> {
    state: &'a ModelState,
}

impl<'a> AccountingBalancer<'a> {
    pub fn new(state: &'a ModelState) -> Self {
        Self { state }
    }

    fn total(&self, id: &str, year: &str) -> f64 {
        tree::find_row(&self.state.balance_sheet, id)
            .and_then(|row: &Row| row.value(year))
            .unwrap_or(0.0)
    }

    /// Reads the settled totals, so the state should be recalculated first.
    pub fn check_year(&self, year: &str, tolerance: f64) -> BalanceCheck {
        let total_assets = self.total(TOTAL_ASSETS, year);
        let total_liabilities = self.total(TOTAL_LIABILITIES, year);
        let total_equity = self.total(TOTAL_EQUITY, year);
        let difference = total_assets - (total_liabilities + total_equity);

        BalanceCheck {
            year: year.to_string(),
            total_assets,
            total_liabilities,
            total_equity,
            difference,
            balanced: difference.abs() <= tolerance,
        }
    }

    pub fn check_all(&self, tolerance: f64) -> Vec<BalanceCheck> {
        self.state
            .meta
            .years
            .iter()
            .map(|year| self.check_year(year, tolerance))
            .collect()
    }

    pub fn verify_accounting_equation(&self, tolerance: f64) -> Result<()> {
        for check in self.check_all(tolerance) {
            if !check.balanced {
                warn!(
                    "Balance sheet does not balance in {}: difference {:.2}",
                    check.year, check.difference
                );
                return Err(FinancialModelError::AccountingEquationViolation {
                    year: check.year,
                    assets: check.total_assets,
                    liabilities: check.total_liabilities,
                    equity: check.total_equity,
                    difference: check.difference.abs(),
                });
            }
        }
        Ok(())
    }
}

pub fn balance_checks(state: &ModelState) -> Vec<BalanceCheck> {
    AccountingBalancer::new(state).check_all(VALUE_TOLERANCE)
}

pub fn verify_accounting_equation(state: &ModelState, tolerance: f64) -> Result<()> {
    AccountingBalancer::new(state).verify_accounting_equation(tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::recalculate;
    use crate::schema::{ModelMeta, StatementKind};
    use crate::skeleton::{default_template, CASH, RETAINED_EARNINGS};
    use std::collections::BTreeMap;

    fn state_with(values: &[(&str, f64)]) -> ModelState {
        let mut state = ModelState {
            meta: ModelMeta::new("Test Corp", vec!["2023A".to_string()]),
            income_statement: default_template(StatementKind::IncomeStatement),
            balance_sheet: default_template(StatementKind::BalanceSheet),
            cash_flow: default_template(StatementKind::CashFlow),
            sbc: BTreeMap::new(),
            dna: BTreeMap::new(),
            revenue_projections: BTreeMap::new(),
        };
        for (id, value) in values {
            state.balance_sheet =
                tree::map_subtree(&state.balance_sheet, id, |r| r.with_value("2023A", *value));
        }
        recalculate(&state)
    }

    #[test]
    fn test_balanced_sheet_passes() {
        let state = state_with(&[
            (CASH, 100.0),
            ("ca_accounts_receivable", 50.0),
            ("cl_accounts_payable", 40.0),
            ("ncl_long_term_debt", 60.0),
            (RETAINED_EARNINGS, 50.0),
        ]);
        let checks = balance_checks(&state);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].total_assets, 150.0);
        assert_eq!(checks[0].total_liabilities, 100.0);
        assert_eq!(checks[0].total_equity, 50.0);
        assert!(checks[0].balanced);
        assert!(verify_accounting_equation(&state, VALUE_TOLERANCE).is_ok());
    }

    #[test]
    fn test_accounting_equation_violation() {
        let state = state_with(&[(CASH, 100.0), ("cl_accounts_payable", 30.0)]);
        let check = &balance_checks(&state)[0];
        assert!(!check.balanced);
        assert_eq!(check.difference, 70.0);

        match verify_accounting_equation(&state, VALUE_TOLERANCE) {
            Err(FinancialModelError::AccountingEquationViolation { year, difference, .. }) => {
                assert_eq!(year, "2023A");
                assert_eq!(difference, 70.0);
            }
            other => panic!("expected a violation, got {:?}", other),
        }
    }
}
