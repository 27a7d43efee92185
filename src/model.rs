//! The stateful model and the only sanctioned way to change it.
//!
//! [`FinancialModel`] owns a [`ModelState`]. Every mutation builds a new snapshot from
//! the current one, recalculates it, and replaces the state wholesale, so derived
//! values handed out by [`FinancialModel::state`] always belong to one consistent pass.
//! Structural problems (missing parents, missing rows, protected rows) are no-ops
//! reported through the return value, never errors.

use crate::balancer::{balance_checks, verify_accounting_equation, BalanceCheck};
use crate::engine::{recalculate, recalculate_from, CalculationEngine};
use crate::error::{FinancialModelError, Result};
use crate::matching::ConceptMatcher;
use crate::projection::{self, check_projection_mix, MixCheck};
use crate::schema::{ModelMeta, ModelState, ProjectionMethod, Row, StatementKind};
use crate::skeleton::{default_template, is_convertible, is_protected};
use crate::tree::{self, Direction};
use crate::utils::{slugify, sort_years, unique_id};
use crate::validation::{
    check_breakdown_shares, validate_label, validate_projection, validate_value, ShareCheck,
    ValidationOutcome, ValidationPolicy,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Gives every row a 0 for each year it has no value for.
fn seed_years(rows: &[Row], years: &[String]) -> Vec<Row> {
    tree::map_all(rows, &|mut row: Row| {
        for year in years {
            row.values.entry(year.clone()).or_insert(0.0);
        }
        row
    })
}

/// Read-only findings about a model that callers surface to users.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDiagnostics {
    pub unbalanced_years: Vec<BalanceCheck>,
    pub invalid_mixes: Vec<MixCheck>,
    pub share_issues: Vec<ShareCheck>,
    pub unsupported_projections: Vec<String>,
}

impl ModelDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.unbalanced_years.is_empty()
            && self.invalid_mixes.is_empty()
            && self.share_issues.is_empty()
            && self.unsupported_projections.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialModel {
    state: ModelState,
}

impl FinancialModel {
    /// A fresh model built from the default statement templates.
    pub fn new(mut meta: ModelMeta) -> Result<Self> {
        meta.validate()?;
        meta.years = sort_years(&meta.years);
        info!(
            "Creating financial model for {} with {} years",
            meta.company_name,
            meta.years.len()
        );
        let template = |kind| seed_years(&default_template(kind), &meta.years);
        let state = ModelState {
            income_statement: template(StatementKind::IncomeStatement),
            balance_sheet: template(StatementKind::BalanceSheet),
            cash_flow: template(StatementKind::CashFlow),
            meta,
            sbc: BTreeMap::new(),
            dna: BTreeMap::new(),
            revenue_projections: BTreeMap::new(),
        };
        Ok(Self {
            state: recalculate(&state),
        })
    }

    /// Adopts a stored snapshot: repairs it against the skeleton and recalculates.
    pub fn from_state(mut state: ModelState) -> Result<Self> {
        state.meta.validate()?;
        state.meta.years = sort_years(&state.meta.years);
        Ok(Self {
            state: recalculate(&state),
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let state: ModelState = serde_json::from_str(json)?;
        Self::from_state(state)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.state)?)
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn into_state(self) -> ModelState {
        self.state
    }

    pub fn years(&self) -> &[String] {
        &self.state.meta.years
    }

    pub fn row(&self, statement: StatementKind, row_id: &str) -> Option<&Row> {
        tree::find_row(self.state.statement(statement), row_id)
    }

    pub fn value(&self, statement: StatementKind, row_id: &str, year: &str) -> Option<f64> {
        self.row(statement, row_id).and_then(|row| row.value(year))
    }

    fn commit(&mut self, next: ModelState) {
        self.state = recalculate(&next);
    }

    fn with_statement(&self, statement: StatementKind, rows: Vec<Row>) -> ModelState {
        let mut next = self.state.clone();
        next.set_statement(statement, rows);
        next
    }

    fn add_child(&mut self, statement: StatementKind, parent_id: &str, mut child: Row) -> Result<Option<String>> {
        let rows = self.state.statement(statement);
        if !tree::contains(rows, parent_id) {
            debug!("Parent '{}' not found in {}; nothing added", parent_id, statement);
            return Ok(None);
        }
        if !is_convertible(statement, parent_id) {
            warn!("{} row '{}' cannot be broken down", statement, parent_id);
            return Err(FinancialModelError::InvalidParent {
                statement,
                row_id: parent_id.to_string(),
            });
        }

        let base = format!("{}_{}", parent_id, slugify(&child.label));
        child.id = unique_id(&base, &tree::collect_ids(rows));
        let id = child.id.clone();
        let rows = tree::insert_child(rows, parent_id, child, None);
        self.commit(self.with_statement(statement, rows));
        debug!("Added {} row '{}' under '{}'", statement, id, parent_id);
        Ok(Some(id))
    }

    /// Appends an empty input row under `parent_id` and returns its id.
    ///
    /// `Ok(None)` when the parent does not exist. Rows derived by a fixed formula
    /// (EBIT, Tax, subtotals, ...) cannot take children: `InvalidParent`.
    pub fn add_child_row(
        &mut self,
        statement: StatementKind,
        parent_id: &str,
        label: &str,
    ) -> Result<Option<String>> {
        let label = validate_label(label)?;
        self.add_child(statement, parent_id, Row::input("", label))
    }

    /// Like [`add_child_row`](Self::add_child_row), but lets `matcher` suggest the label
    /// and cash flow treatment of the new row.
    pub fn add_custom_row(
        &mut self,
        statement: StatementKind,
        parent_id: &str,
        label: &str,
        matcher: &dyn ConceptMatcher,
    ) -> Result<Option<String>> {
        let label = validate_label(label)?;
        let mut row = Row::input("", label.as_str());
        if let Some(found) = matcher.best_match(statement, &label) {
            debug!("'{}' matched concept '{}'", label, found.label);
            row.label = found.label;
            row.cfs_link = found.cfs_link;
        }
        self.add_child(statement, parent_id, row)
    }

    /// Inserts a top-level row at `index` (clamped) and returns its id, which is made
    /// unique within the statement.
    pub fn insert_row(&mut self, statement: StatementKind, index: usize, mut row: Row) -> String {
        let rows = self.state.statement(statement);
        let base = if row.id.trim().is_empty() {
            slugify(&row.label)
        } else {
            row.id.clone()
        };
        row.id = unique_id(&base, &tree::collect_ids(rows));
        let id = row.id.clone();
        let rows = tree::insert_at(rows, index, row);
        self.commit(self.with_statement(statement, rows));
        id
    }

    /// Swaps a row with its neighbour. Skeleton rows and aggregates never move, and
    /// nothing swaps places with one, so custom rows stay inside their block.
    pub fn move_row(&mut self, statement: StatementKind, row_id: &str, direction: Direction) -> bool {
        let Some(row) = self.row(statement, row_id) else {
            return false;
        };
        if is_protected(statement, row_id) || row.kind.is_aggregate() {
            warn!("Refusing to move protected {} row '{}'", statement, row_id);
            return false;
        }
        let moved = tree::move_within_siblings(
            self.state.statement(statement),
            row_id,
            direction,
            |_, neighbour| !neighbour.kind.is_aggregate() && !is_protected(statement, &neighbour.id),
        );
        match moved {
            Some(rows) => {
                self.commit(self.with_statement(statement, rows));
                true
            }
            None => {
                debug!("{} row '{}' cannot move {:?}", statement, row_id, direction);
                false
            }
        }
    }

    /// Deletes a row and its subtree, together with any projection configuration and
    /// attribution annotations keyed by the removed ids.
    pub fn remove_row(&mut self, statement: StatementKind, row_id: &str) -> bool {
        if is_protected(statement, row_id) {
            warn!("Refusing to remove protected {} row '{}'", statement, row_id);
            return false;
        }
        let Some(row) = self.row(statement, row_id) else {
            debug!("{} row '{}' not found; nothing removed", statement, row_id);
            return false;
        };
        let removed = tree::collect_ids(std::slice::from_ref(row));

        let mut next = self.with_statement(
            statement,
            tree::remove_subtree(self.state.statement(statement), row_id),
        );
        if statement == StatementKind::IncomeStatement {
            next.revenue_projections.retain(|id, _| !removed.contains(id));
            next.sbc.retain(|id, _| !removed.contains(id));
            next.dna.retain(|id, _| !removed.contains(id));
        }
        self.commit(next);
        debug!("Removed {} rows from {}", removed.len(), statement);
        true
    }

    pub fn rename_row(&mut self, statement: StatementKind, row_id: &str, label: &str) -> Result<bool> {
        let label = validate_label(label)?;
        if self.row(statement, row_id).is_none() {
            return Ok(false);
        }
        let rows = tree::map_subtree(self.state.statement(statement), row_id, |mut row| {
            row.label = label;
            row
        });
        self.commit(self.with_statement(statement, rows));
        Ok(true)
    }

    /// Stores a value on a row whose value is entered rather than derived for `year`,
    /// then recalculates from that year on. Returns `false` when the row is missing,
    /// derived in that year, or the year is not part of the model.
    pub fn update_row_value(&mut self, statement: StatementKind, row_id: &str, year: &str, value: f64) -> bool {
        if !self.state.meta.years.iter().any(|y| y == year) {
            debug!("Year {} is not part of the model", year);
            return false;
        }
        let accepts_input = CalculationEngine::new(&self.state)
            .formula(statement, row_id, year)
            .is_some_and(|formula| formula.is_stored());
        if !accepts_input {
            debug!("{} row '{}' is derived in {}; value ignored", statement, row_id, year);
            return false;
        }

        let rows = tree::map_subtree(self.state.statement(statement), row_id, |row| {
            row.with_value(year, value)
        });
        let next = self.with_statement(statement, rows);
        self.state = recalculate_from(&next, year);
        true
    }

    /// [`update_row_value`](Self::update_row_value) guarded by validation. The value is
    /// only written when the outcome allows it.
    pub fn update_row_value_checked(
        &mut self,
        statement: StatementKind,
        row_id: &str,
        year: &str,
        value: f64,
        policy: ValidationPolicy,
    ) -> Result<ValidationOutcome> {
        let outcome = validate_value(&self.state, statement, row_id, value, policy);
        if !outcome.should_allow {
            return Err(FinancialModelError::ValueRejected {
                row_id: row_id.to_string(),
                details: outcome.messages.join("; "),
            });
        }
        self.update_row_value(statement, row_id, year, value);
        Ok(outcome)
    }

    /// Replaces the year list. Values of removed years are dropped everywhere, new
    /// years are seeded with 0 on every row, then everything is recalculated.
    pub fn update_years(&mut self, years: &[String]) -> Result<()> {
        let years = sort_years(years);
        if years.is_empty() {
            return Err(FinancialModelError::InvalidYears(
                "at least one year is required".to_string(),
            ));
        }
        let keep: HashSet<String> = years.iter().cloned().collect();

        let mut next = self.state.clone();
        for kind in StatementKind::ALL {
            let rows = tree::map_all(next.statement(kind), &|mut row: Row| {
                row.values.retain(|year, _| keep.contains(year));
                row
            });
            next.set_statement(kind, seed_years(&rows, &years));
        }
        for table in [&mut next.sbc, &mut next.dna] {
            for values in table.values_mut() {
                values.retain(|year, _| keep.contains(year));
            }
            table.retain(|_, values| !values.is_empty());
        }
        for method in next.revenue_projections.values_mut() {
            for schedule in method.schedules_mut() {
                schedule.per_year.retain(|year, _| keep.contains(year));
            }
        }

        info!(
            "Updating years for {}: {} -> {}",
            next.meta.company_name,
            next.meta.years.join(", "),
            years.join(", ")
        );
        next.meta.years = years;
        self.commit(next);
        Ok(())
    }

    /// Configures how a revenue row is forecast.
    ///
    /// Only the revenue row and its breakdown can be projected. A `pct_of_total` that
    /// would make the row depend on itself is rejected.
    pub fn set_revenue_projection(&mut self, row_id: &str, method: ProjectionMethod) -> Result<()> {
        let invalid = |details: &str| FinancialModelError::InvalidProjection {
            row_id: row_id.to_string(),
            details: details.to_string(),
        };
        if !projection::revenue_subtree_ids(&self.state.income_statement).contains(row_id) {
            return Err(invalid("only revenue rows can be projected"));
        }
        if let ProjectionMethod::PctOfTotal { reference_id, pct } = &method {
            if !tree::contains(&self.state.income_statement, reference_id) {
                return Err(invalid(&format!("reference row '{}' does not exist", reference_id)));
            }
            if !pct.is_finite() {
                return Err(invalid("percentage must be a finite number"));
            }
        }
        if let Some(reference_id) = projection::find_reference_cycle(&self.state, row_id, &method) {
            warn!(
                "Rejected projection for '{}': circular reference through '{}'",
                row_id, reference_id
            );
            return Err(FinancialModelError::ProjectionCycle {
                row_id: row_id.to_string(),
                reference_id,
            });
        }

        let mut next = self.state.clone();
        next.revenue_projections.insert(row_id.to_string(), method);
        if let Some(Some(parent)) = tree::find_parent_id(&next.income_statement, row_id) {
            if !check_projection_mix(&next, &parent).valid {
                warn!("Breakdown of '{}' mixes all three projection categories", parent);
            }
        }
        self.commit(next);
        Ok(())
    }

    /// [`set_revenue_projection`](Self::set_revenue_projection) guarded by share and mix
    /// validation.
    pub fn set_revenue_projection_checked(
        &mut self,
        row_id: &str,
        method: ProjectionMethod,
        policy: ValidationPolicy,
    ) -> Result<ValidationOutcome> {
        let outcome = validate_projection(&self.state, row_id, &method, policy);
        if outcome.should_allow {
            self.set_revenue_projection(row_id, method)?;
        }
        Ok(outcome)
    }

    pub fn clear_revenue_projection(&mut self, row_id: &str) -> bool {
        let mut next = self.state.clone();
        if next.revenue_projections.remove(row_id).is_none() {
            return false;
        }
        self.commit(next);
        true
    }

    pub fn projection(&self, row_id: &str) -> Option<&ProjectionMethod> {
        self.state.revenue_projections.get(row_id)
    }

    /// Annotates stock-based compensation embedded in an income statement category.
    pub fn set_sbc(&mut self, category_id: &str, year: &str, amount: f64) -> bool {
        self.set_attribution(category_id, year, amount, |state| &mut state.sbc)
    }

    /// Annotates depreciation & amortization embedded in an income statement category.
    pub fn set_dna(&mut self, category_id: &str, year: &str, amount: f64) -> bool {
        self.set_attribution(category_id, year, amount, |state| &mut state.dna)
    }

    fn set_attribution<F>(&mut self, category_id: &str, year: &str, amount: f64, table: F) -> bool
    where
        F: FnOnce(&mut ModelState) -> &mut crate::schema::AttributionTable,
    {
        if !tree::contains(&self.state.income_statement, category_id)
            || !self.state.meta.years.iter().any(|y| y == year)
        {
            return false;
        }
        let mut next = self.state.clone();
        table(&mut next)
            .entry(category_id.to_string())
            .or_default()
            .insert(year.to_string(), amount);
        self.state = recalculate_from(&next, year);
        true
    }

    pub fn year_over_year(&self, row_id: &str, year: &str) -> Option<f64> {
        projection::year_over_year(&self.state, row_id, year)
    }

    pub fn balance_checks(&self) -> Vec<BalanceCheck> {
        balance_checks(&self.state)
    }

    pub fn verify_balance(&self, tolerance: f64) -> Result<()> {
        verify_accounting_equation(&self.state, tolerance)
    }

    pub fn diagnostics(&self) -> ModelDiagnostics {
        let mut streams: Vec<String> = self
            .state
            .revenue_projections
            .keys()
            .filter_map(|id| tree::find_parent_id(&self.state.income_statement, id).flatten())
            .collect();
        streams.sort();
        streams.dedup();

        ModelDiagnostics {
            unbalanced_years: self
                .balance_checks()
                .into_iter()
                .filter(|check| !check.balanced)
                .collect(),
            invalid_mixes: streams
                .iter()
                .map(|stream| check_projection_mix(&self.state, stream))
                .filter(|mix| !mix.valid)
                .collect(),
            share_issues: self
                .state
                .revenue_projections
                .iter()
                .filter_map(|(id, method)| check_breakdown_shares(id, method))
                .filter(|check| !check.within_tolerance)
                .collect(),
            unsupported_projections: self
                .state
                .revenue_projections
                .iter()
                .filter(|(_, method)| matches!(method, ProjectionMethod::Unsupported))
                .map(|(id, _)| id.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::KeywordMatcher;
    use crate::schema::{GrowthSchedule, Impact, RowKind};
    use crate::skeleton::{
        protected_ids, CFS_DNA, COGS, DNA, EBIT, EBT, GROSS_MARGIN, GROSS_PROFIT, INTEREST_EXPENSE,
        OTHER_INCOME, REVENUE, SGA, TAX, TOTAL_CURRENT_ASSETS,
    };

    fn model() -> FinancialModel {
        FinancialModel::new(ModelMeta::new(
            "Test Co",
            vec!["2023A".to_string(), "2024A".to_string(), "2025E".to_string()],
        ))
        .unwrap()
    }

    const IS: StatementKind = StatementKind::IncomeStatement;
    const BS: StatementKind = StatementKind::BalanceSheet;

    #[test]
    fn test_add_child_row_flips_kind_and_sums() {
        let mut m = model();
        let id = m.add_child_row(IS, REVENUE, "SaaS").unwrap().unwrap();
        assert_eq!(id, "revenue_saas");
        assert_eq!(m.row(IS, REVENUE).unwrap().kind, RowKind::Calc);

        assert!(m.update_row_value(IS, &id, "2023A", 120.0));
        assert_eq!(m.value(IS, REVENUE, "2023A"), Some(120.0));

        let second = m.add_child_row(IS, REVENUE, "SaaS").unwrap().unwrap();
        assert_eq!(second, "revenue_saas_2");
    }

    #[test]
    fn test_add_child_row_rejects_blank_label_and_missing_parent() {
        let mut m = model();
        assert!(m.add_child_row(IS, REVENUE, "  ").is_err());
        assert_eq!(m.add_child_row(IS, "missing", "X").unwrap(), None);
        for parent in [EBIT, TAX, GROSS_MARGIN] {
            assert!(matches!(
                m.add_child_row(IS, parent, "X"),
                Err(FinancialModelError::InvalidParent { .. })
            ));
        }
        assert!(matches!(
            m.add_child_row(BS, TOTAL_CURRENT_ASSETS, "X"),
            Err(FinancialModelError::InvalidParent { .. })
        ));
    }

    #[test]
    fn test_non_operating_lines_can_be_broken_down() {
        let mut m = model();
        m.update_row_value(IS, REVENUE, "2023A", 500.0);
        let amortization = m.add_child_row(IS, DNA, "Amortization").unwrap().unwrap();
        let depreciation = m.add_child_row(IS, DNA, "Depreciation").unwrap().unwrap();
        let bank = m.add_child_row(IS, INTEREST_EXPENSE, "Bank Loan").unwrap().unwrap();
        let fx = m.add_child_row(IS, OTHER_INCOME, "FX Gains").unwrap().unwrap();
        assert_eq!(m.row(IS, DNA).unwrap().kind, RowKind::Calc);

        m.update_row_value(IS, &amortization, "2023A", 15.0);
        m.update_row_value(IS, &depreciation, "2023A", 25.0);
        m.update_row_value(IS, &bank, "2023A", 12.0);
        m.update_row_value(IS, &fx, "2023A", 2.0);

        assert_eq!(m.value(IS, DNA, "2023A"), Some(40.0));
        assert_eq!(m.value(IS, EBIT, "2023A"), Some(460.0));
        assert_eq!(m.value(IS, EBT, "2023A"), Some(450.0));
        assert_eq!(m.value(StatementKind::CashFlow, CFS_DNA, "2023A"), Some(40.0));
        assert!(!m.update_row_value(IS, DNA, "2023A", 1.0));
    }

    #[test]
    fn test_remove_last_child_reverts_kind() {
        let mut m = model();
        let id = m.add_child_row(IS, COGS, "Hosting").unwrap().unwrap();
        assert_eq!(m.row(IS, COGS).unwrap().kind, RowKind::Calc);
        assert!(m.remove_row(IS, &id));
        assert_eq!(m.row(IS, COGS).unwrap().kind, RowKind::Input);
    }

    #[test]
    fn test_protected_rows_cannot_be_removed_or_moved() {
        let mut m = model();
        for kind in StatementKind::ALL {
            let before = tree::collect_ids(m.state().statement(kind));
            for id in protected_ids(kind) {
                assert!(!m.remove_row(kind, id));
                assert!(!m.move_row(kind, id, Direction::Up));
            }
            assert_eq!(tree::collect_ids(m.state().statement(kind)), before);
        }
    }

    #[test]
    fn test_move_row_stops_at_aggregates() {
        let mut m = model();
        // ca_inventory sits directly above Total Current Assets
        assert!(!m.move_row(BS, "ca_inventory", Direction::Down));
        assert!(m.move_row(BS, "ca_inventory", Direction::Up));
        let ids: Vec<&str> = m.state().balance_sheet.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(&ids[..4], &["ca_cash", "ca_inventory", "ca_accounts_receivable", TOTAL_CURRENT_ASSETS]);
    }

    #[test]
    fn test_move_row_keeps_custom_rows_inside_their_block() {
        let mut m = model();
        let ids = |m: &FinancialModel| -> Vec<String> {
            m.state().income_statement.iter().map(|r| r.id.clone()).collect()
        };
        let rnd = m.insert_row(IS, 4, Row::input("rnd", "R&D"));
        let marketing = m.insert_row(IS, 5, Row::input("marketing", "Marketing"));
        let other = m.insert_row(IS, 7, Row::input("other_opex", "Other Opex"));
        assert_eq!(
            ids(&m)[3..9],
            [GROSS_MARGIN, "rnd", "marketing", SGA, "other_opex", EBIT].map(String::from)
        );

        // Gross Margin % is not an aggregate but still never swaps
        let before = ids(&m);
        assert!(!m.move_row(IS, &rnd, Direction::Up));
        assert!(!m.move_row(IS, &marketing, Direction::Down));
        assert!(!m.move_row(IS, &other, Direction::Up));
        assert!(!m.move_row(IS, &other, Direction::Down));
        assert_eq!(ids(&m), before);

        m.update_row_value(IS, REVENUE, "2023A", 100.0);
        m.update_row_value(IS, &other, "2023A", 30.0);
        assert_eq!(m.value(IS, EBIT, "2023A"), Some(70.0));

        assert!(m.move_row(IS, &marketing, Direction::Up));
        assert_eq!(ids(&m)[4..6], [String::from("marketing"), String::from("rnd")]);
    }

    #[test]
    fn test_update_row_value_refuses_derived_rows() {
        let mut m = model();
        assert!(!m.update_row_value(IS, "gross_profit", "2023A", 5.0));
        assert!(!m.update_row_value(IS, "missing", "2023A", 5.0));
        assert!(!m.update_row_value(IS, REVENUE, "1999A", 5.0));
        assert!(m.update_row_value(IS, REVENUE, "2023A", 5.0));
    }

    #[test]
    fn test_update_row_value_checked_blocks_negative_revenue() {
        let mut m = model();
        let rejected =
            m.update_row_value_checked(IS, REVENUE, "2023A", -10.0, ValidationPolicy::Blocking);
        assert!(matches!(rejected, Err(FinancialModelError::ValueRejected { .. })));
        assert_eq!(m.value(IS, REVENUE, "2023A"), Some(0.0));

        let advisory = m
            .update_row_value_checked(IS, REVENUE, "2023A", -10.0, ValidationPolicy::Advisory)
            .unwrap();
        assert_eq!(advisory.messages.len(), 1);
        assert_eq!(m.value(IS, REVENUE, "2023A"), Some(-10.0));
    }

    #[test]
    fn test_set_revenue_projection_rejects_non_revenue_rows_and_cycles() {
        let mut m = model();
        let growth = ProjectionMethod::GrowthRate {
            base_amount: None,
            allocation_pct: None,
            growth: GrowthSchedule::constant(5.0),
        };
        assert!(matches!(
            m.set_revenue_projection(SGA, growth.clone()),
            Err(FinancialModelError::InvalidProjection { .. })
        ));

        let a = m.add_child_row(IS, REVENUE, "A").unwrap().unwrap();
        let b = m.add_child_row(IS, REVENUE, "B").unwrap().unwrap();
        m.set_revenue_projection(
            &a,
            ProjectionMethod::PctOfTotal {
                reference_id: b.clone(),
                pct: 50.0,
            },
        )
        .unwrap();
        let err = m
            .set_revenue_projection(
                &b,
                ProjectionMethod::PctOfTotal {
                    reference_id: a.clone(),
                    pct: 50.0,
                },
            )
            .unwrap_err();
        assert!(matches!(err, FinancialModelError::ProjectionCycle { .. }));
        assert!(m.projection(&b).is_none());
    }

    #[test]
    fn test_projection_reading_profit_of_its_own_stream_is_rejected() {
        let mut m = model();
        let a = m.add_child_row(IS, REVENUE, "A").unwrap().unwrap();
        let b = m.add_child_row(IS, REVENUE, "B").unwrap().unwrap();
        m.update_row_value(IS, &a, "2025E", 100.0);
        m.update_row_value(IS, COGS, "2025E", 40.0);

        for reference in [GROSS_PROFIT, EBIT] {
            let err = m
                .set_revenue_projection(
                    &b,
                    ProjectionMethod::PctOfTotal {
                        reference_id: reference.to_string(),
                        pct: 50.0,
                    },
                )
                .unwrap_err();
            assert!(
                matches!(err, FinancialModelError::ProjectionCycle { ref reference_id, .. } if reference_id == reference)
            );
        }
        assert!(m.projection(&b).is_none());

        for year in m.years() {
            let revenue = m.value(IS, REVENUE, year).unwrap();
            let cogs = m.value(IS, COGS, year).unwrap();
            assert_eq!(m.value(IS, GROSS_PROFIT, year), Some(revenue - cogs));
        }
        assert_eq!(m.value(IS, GROSS_PROFIT, "2025E"), Some(60.0));
    }

    #[test]
    fn test_removing_row_drops_its_projection_and_annotations() {
        let mut m = model();
        let id = m.add_child_row(IS, REVENUE, "Hardware").unwrap().unwrap();
        m.set_revenue_projection(
            &id,
            ProjectionMethod::GrowthRate {
                base_amount: Some(10.0),
                allocation_pct: None,
                growth: GrowthSchedule::constant(0.0),
            },
        )
        .unwrap();
        assert!(m.set_sbc(&id, "2023A", 1.0));
        assert!(m.remove_row(IS, &id));
        assert!(m.projection(&id).is_none());
        assert!(m.state().sbc.is_empty());
    }

    #[test]
    fn test_add_custom_row_uses_matcher() {
        let mut m = model();
        let idx = m
            .state()
            .balance_sheet
            .iter()
            .position(|r| r.id == TOTAL_CURRENT_ASSETS)
            .unwrap();
        m.insert_row(BS, idx, Row::input("ca_other", "Other Current Assets"));
        let id = m
            .add_custom_row(BS, "ca_other", "prepaid insurance", &KeywordMatcher)
            .unwrap()
            .unwrap();
        let row = m.row(BS, &id).unwrap();
        assert_eq!(row.label, "Prepaid Expenses");
        assert_eq!(row.cfs_link.as_ref().unwrap().impact, Impact::Negative);
    }

    #[test]
    fn test_insert_row_dedups_ids() {
        let mut m = model();
        let id = m.insert_row(BS, 1, Row::input("ca_inventory", "More Inventory"));
        assert_eq!(id, "ca_inventory_2");
        assert!(m
            .state()
            .cash_flow
            .iter()
            .flat_map(|r| r.children.iter())
            .any(|c| c.id == "wc_ca_inventory_2"));
    }

    #[test]
    fn test_diagnostics_flags_share_totals() {
        let mut m = model();
        m.set_revenue_projection(
            REVENUE,
            ProjectionMethod::ProductLine {
                lines: vec![crate::schema::BreakdownLine {
                    id: "core".to_string(),
                    label: "Core".to_string(),
                    share_pct: 80.0,
                    growth: GrowthSchedule::constant(5.0),
                    base_override: None,
                }],
            },
        )
        .unwrap();
        let diagnostics = m.diagnostics();
        assert_eq!(diagnostics.share_issues.len(), 1);
        assert!(diagnostics.unbalanced_years.is_empty());
    }
}
