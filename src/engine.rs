//! The recalculation engine.
//!
//! Each row maps to exactly one [`Formula`] for a given year; the formula names the rows
//! (possibly on another statement) it reads, which makes the dependency graph explicit.
//! A year is evaluated by a memoized depth-first walk over that graph, so every row is
//! computed after the rows it reads. References to earlier years always read values
//! settled by the previous pass, since [`recalculate`] walks years in chronological order.

use crate::derivations::{
    attributed_total, block_members, expected_working_capital_items, WorkingCapitalItem,
    WORKING_CAPITAL_PREFIX,
};
use crate::projection::{self, ProjectionOutput};
use crate::schema::{Impact, ModelState, ProjectionMethod, Row, RowKind, StatementKind};
use crate::skeleton::*;
use crate::tree;
use crate::utils::{is_projection_year, prior_year};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowRef {
    pub statement: StatementKind,
    pub id: String,
}

impl RowRef {
    pub fn new(statement: StatementKind, id: impl Into<String>) -> Self {
        Self {
            statement,
            id: id.into(),
        }
    }
}

fn is_ref(id: &str) -> RowRef {
    RowRef::new(StatementKind::IncomeStatement, id)
}

fn bs_ref(id: &str) -> RowRef {
    RowRef::new(StatementKind::BalanceSheet, id)
}

fn cfs_ref(id: &str) -> RowRef {
    RowRef::new(StatementKind::CashFlow, id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionKind {
    Sbc,
    Dna,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    /// The row's own stored value, 0 when absent.
    Stored,
    SumChildren(Vec<RowRef>),
    /// `Σ coefficient × value`.
    Linear(Vec<(RowRef, f64)>),
    /// `numerator / denominator × 100`; no value when the denominator is zero.
    Margin { numerator: RowRef, denominator: RowRef },
    Link { source: RowRef, sign: f64 },
    /// Prior-year own value plus `sign × source`.
    RollForward { source: RowRef, sign: f64 },
    /// `Σ sign × (value − prior value)` over balance sheet rows; no value in the first year.
    WorkingCapital(Vec<(RowRef, f64)>),
    WorkingCapitalItem { source: RowRef, sign: f64 },
    Attribution {
        kind: AttributionKind,
        plus: Option<RowRef>,
    },
    Projected(Option<f64>),
    PctOf { reference: RowRef, pct: f64 },
    /// Share of the parent's total where the parent includes this row:
    /// `pct/100 × Σothers / (1 − total_pct/100)`.
    PctOfParentTotal {
        others: Vec<RowRef>,
        pct: f64,
        total_pct: f64,
    },
}

impl Formula {
    /// Same-year rows this formula reads.
    pub fn dependencies(&self) -> Vec<RowRef> {
        match self {
            Formula::Stored | Formula::Projected(_) => Vec::new(),
            Formula::SumChildren(refs) => refs.clone(),
            Formula::Linear(terms) | Formula::WorkingCapital(terms) => {
                terms.iter().map(|(r, _)| r.clone()).collect()
            }
            Formula::Margin {
                numerator,
                denominator,
            } => vec![numerator.clone(), denominator.clone()],
            Formula::Link { source, .. }
            | Formula::RollForward { source, .. }
            | Formula::WorkingCapitalItem { source, .. } => vec![source.clone()],
            Formula::Attribution { plus, .. } => plus.iter().cloned().collect(),
            Formula::PctOf { reference, .. } => vec![reference.clone()],
            Formula::PctOfParentTotal { others, .. } => others.clone(),
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, Formula::Stored)
    }
}

fn statement_slot(kind: StatementKind) -> usize {
    match kind {
        StatementKind::IncomeStatement => 0,
        StatementKind::BalanceSheet => 1,
        StatementKind::CashFlow => 2,
    }
}

fn sign_of(impact: Impact) -> f64 {
    match impact {
        Impact::Negative => -1.0,
        _ => 1.0,
    }
}

#[derive(Debug, Clone, Copy)]
struct RowInfo<'a> {
    row: &'a Row,
    parent: Option<&'a str>,
}

/// Evaluates rows of one model snapshot.
pub struct CalculationEngine<'a> {
    state: &'a ModelState,
    rows: [HashMap<&'a str, RowInfo<'a>>; 3],
    projections: BTreeMap<String, ProjectionOutput>,
    working_capital: Vec<WorkingCapitalItem>,
    revenue_ids: HashSet<String>,
}

impl<'a> CalculationEngine<'a> {
    pub fn new(state: &'a ModelState) -> Self {
        let mut rows: [HashMap<&'a str, RowInfo<'a>>; 3] = Default::default();
        for kind in StatementKind::ALL {
            index_rows(state.statement(kind), None, &mut rows[statement_slot(kind)]);
        }
        Self {
            state,
            rows,
            projections: projection::precompute(state),
            working_capital: expected_working_capital_items(&state.balance_sheet),
            revenue_ids: projection::revenue_subtree_ids(&state.income_statement),
        }
    }

    fn info(&self, statement: StatementKind, id: &str) -> Option<RowInfo<'a>> {
        self.rows[statement_slot(statement)].get(id).copied()
    }

    /// The formula `statement`/`id` evaluates with in `year`; `None` if the row does not exist.
    pub fn formula(&self, statement: StatementKind, id: &str, year: &str) -> Option<Formula> {
        let info = self.info(statement, id)?;
        let projected = is_projection_year(year);
        let formula = match statement {
            StatementKind::IncomeStatement => self.income_statement_formula(info, year, projected),
            StatementKind::BalanceSheet => self.balance_sheet_formula(info, projected),
            StatementKind::CashFlow => self.cash_flow_formula(info, projected),
        };
        Some(formula.unwrap_or_else(|| generic_formula(statement, info.row)))
    }

    fn income_statement_formula(&self, info: RowInfo<'a>, year: &str, projected: bool) -> Option<Formula> {
        let row = info.row;
        if projected && self.revenue_ids.contains(&row.id) {
            if let Some(formula) = self.projection_formula(info, year) {
                return Some(formula);
            }
        }
        let margin = |numerator: &str| Formula::Margin {
            numerator: is_ref(numerator),
            denominator: is_ref(REVENUE),
        };
        let formula = match row.id.as_str() {
            GROSS_PROFIT => Formula::Linear(vec![(is_ref(REVENUE), 1.0), (is_ref(COGS), -1.0)]),
            GROSS_MARGIN => margin(GROSS_PROFIT),
            EBIT => {
                let mut terms = vec![
                    (is_ref(GROSS_PROFIT), 1.0),
                    (is_ref(SGA), -1.0),
                    (is_ref(DNA), -1.0),
                ];
                terms.extend(self.operating_expense_extras().into_iter().map(|id| (is_ref(id), -1.0)));
                Formula::Linear(terms)
            }
            EBIT_MARGIN => margin(EBIT),
            EBT => Formula::Linear(vec![
                (is_ref(EBIT), 1.0),
                (is_ref(INTEREST_EXPENSE), -1.0),
                (is_ref(INTEREST_INCOME), 1.0),
                (is_ref(OTHER_INCOME), 1.0),
            ]),
            NET_INCOME => Formula::Linear(vec![(is_ref(EBT), 1.0), (is_ref(TAX), -1.0)]),
            NET_INCOME_MARGIN => margin(NET_INCOME),
            _ => return None,
        };
        Some(formula)
    }

    /// Custom top-level rows between Gross Margin % and EBIT are operating expenses.
    fn operating_expense_extras(&self) -> Vec<&'a str> {
        let rows = &self.state.income_statement;
        let (Some(start), Some(end)) = (
            rows.iter().position(|r| r.id == GROSS_MARGIN),
            rows.iter().position(|r| r.id == EBIT),
        ) else {
            return Vec::new();
        };
        if start >= end {
            return Vec::new();
        }
        rows[start + 1..end]
            .iter()
            .filter(|r| !is_protected(StatementKind::IncomeStatement, &r.id))
            .map(|r| r.id.as_str())
            .collect()
    }

    fn projection_formula(&self, info: RowInfo<'a>, year: &str) -> Option<Formula> {
        let row = info.row;
        if row.children.is_empty() {
            if let Some((parent, line)) = projection::bound_line(self.state, &row.id) {
                let value = self
                    .projections
                    .get(&parent)
                    .and_then(|out| out.lines.get(&line.id))
                    .and_then(|series| series.get(year))
                    .copied();
                return Some(Formula::Projected(value));
            }
        }

        let method = self.state.revenue_projections.get(&row.id)?;
        if !row.children.is_empty() {
            return Some(Formula::SumChildren(child_refs(StatementKind::IncomeStatement, row)));
        }

        let formula = match method {
            ProjectionMethod::PctOfTotal { reference_id, pct } => {
                if info.parent == Some(reference_id.as_str()) {
                    self.pct_of_parent_formula(info, *pct)
                } else {
                    Formula::PctOf {
                        reference: is_ref(reference_id),
                        pct: *pct,
                    }
                }
            }
            _ => Formula::Projected(
                self.projections
                    .get(&row.id)
                    .and_then(|out| out.values.get(year))
                    .copied(),
            ),
        };
        Some(formula)
    }

    fn pct_of_parent_formula(&self, info: RowInfo<'a>, pct: f64) -> Formula {
        let parent = info.parent.unwrap_or_default();
        let siblings = self
            .info(StatementKind::IncomeStatement, parent)
            .map(|p| p.row.children.as_slice())
            .unwrap_or_default();

        let mut others = Vec::new();
        let mut total_pct = 0.0;
        for sibling in siblings {
            match self.state.revenue_projections.get(&sibling.id) {
                Some(ProjectionMethod::PctOfTotal {
                    reference_id,
                    pct: share,
                }) if reference_id == parent => total_pct += share,
                _ => others.push(is_ref(&sibling.id)),
            }
        }
        Formula::PctOfParentTotal {
            others,
            pct,
            total_pct,
        }
    }

    fn balance_sheet_formula(&self, info: RowInfo<'a>, projected: bool) -> Option<Formula> {
        let row = info.row;
        let formula = match row.id.as_str() {
            TOTAL_ASSETS => Formula::Linear(vec![
                (bs_ref(TOTAL_CURRENT_ASSETS), 1.0),
                (bs_ref(TOTAL_FIXED_ASSETS), 1.0),
            ]),
            TOTAL_LIABILITIES => Formula::Linear(vec![
                (bs_ref(TOTAL_CURRENT_LIABILITIES), 1.0),
                (bs_ref(TOTAL_NON_CURRENT_LIABILITIES), 1.0),
            ]),
            TOTAL_LIAB_AND_EQUITY => Formula::Linear(vec![
                (bs_ref(TOTAL_LIABILITIES), 1.0),
                (bs_ref(TOTAL_EQUITY), 1.0),
            ]),
            TOTAL_CURRENT_ASSETS
            | TOTAL_FIXED_ASSETS
            | TOTAL_CURRENT_LIABILITIES
            | TOTAL_NON_CURRENT_LIABILITIES
            | TOTAL_EQUITY => self.block_sum(StatementKind::BalanceSheet, &row.id),
            _ if projected && info.parent.is_none() && row.children.is_empty() => {
                if row.cfs_link.as_ref().map(|l| l.impact) == Some(Impact::Calculated) {
                    Formula::RollForward {
                        source: cfs_ref(NET_CHANGE_IN_CASH),
                        sign: 1.0,
                    }
                } else if let Some(link) = &row.is_link {
                    Formula::RollForward {
                        source: is_ref(&link.row_id),
                        sign: sign_of(link.impact),
                    }
                } else {
                    return None;
                }
            }
            _ => return None,
        };
        Some(formula)
    }

    fn cash_flow_formula(&self, info: RowInfo<'a>, projected: bool) -> Option<Formula> {
        let row = info.row;
        let formula = match row.id.as_str() {
            CFS_DNA => Formula::Attribution {
                kind: AttributionKind::Dna,
                plus: Some(is_ref(DNA)),
            },
            CFS_SBC => Formula::Attribution {
                kind: AttributionKind::Sbc,
                plus: None,
            },
            CFS_WORKING_CAPITAL => {
                if !row.children.is_empty() {
                    Formula::SumChildren(child_refs(StatementKind::CashFlow, row))
                } else if projected {
                    Formula::WorkingCapital(
                        self.working_capital
                            .iter()
                            .map(|item| (bs_ref(&item.bs_id), item.sign))
                            .collect(),
                    )
                } else {
                    Formula::Stored
                }
            }
            TOTAL_OPERATING_CASH_FLOW | TOTAL_INVESTING_CASH_FLOW | TOTAL_FINANCING_CASH_FLOW => {
                self.block_sum(StatementKind::CashFlow, &row.id)
            }
            NET_CHANGE_IN_CASH => Formula::Linear(vec![
                (cfs_ref(TOTAL_OPERATING_CASH_FLOW), 1.0),
                (cfs_ref(TOTAL_INVESTING_CASH_FLOW), 1.0),
                (cfs_ref(TOTAL_FINANCING_CASH_FLOW), 1.0),
            ]),
            _ if info.parent == Some(CFS_WORKING_CAPITAL) => {
                if !projected {
                    return None;
                }
                let bs_id = row.id.strip_prefix(WORKING_CAPITAL_PREFIX).unwrap_or(&row.id);
                let sign = self
                    .working_capital
                    .iter()
                    .find(|item| item.bs_id == bs_id)
                    .map_or(0.0, |item| item.sign);
                Formula::WorkingCapitalItem {
                    source: bs_ref(bs_id),
                    sign,
                }
            }
            _ => match &row.is_link {
                Some(link) if row.children.is_empty() => Formula::Link {
                    source: is_ref(&link.row_id),
                    sign: sign_of(link.impact),
                },
                _ => return None,
            },
        };
        Some(formula)
    }

    fn block_sum(&self, statement: StatementKind, total_id: &str) -> Formula {
        Formula::Linear(
            block_members(self.state.statement(statement), total_id)
                .into_iter()
                .map(|r| (RowRef::new(statement, r.id.clone()), 1.0))
                .collect(),
        )
    }

    /// Every row's same-year dependencies for `year`.
    pub fn dependency_table(&self, year: &str) -> BTreeMap<RowRef, Vec<RowRef>> {
        let mut table = BTreeMap::new();
        for kind in StatementKind::ALL {
            for row in tree::flatten(self.state.statement(kind)) {
                if let Some(formula) = self.formula(kind, &row.id, year) {
                    table.insert(RowRef::new(kind, row.id.clone()), formula.dependencies());
                }
            }
        }
        table
    }

    /// The dependency of `target` through which `target` reads itself in `year`, if any.
    pub fn find_cycle(&self, target: &RowRef, year: &str) -> Option<RowRef> {
        let table = self.dependency_table(year);
        for start in table.get(target)? {
            let mut stack = vec![start.clone()];
            let mut seen = HashSet::new();
            while let Some(current) = stack.pop() {
                if &current == target {
                    return Some(start.clone());
                }
                if seen.insert(current.clone()) {
                    if let Some(deps) = table.get(&current) {
                        stack.extend(deps.iter().cloned());
                    }
                }
            }
        }
        None
    }

    /// Computes a single row on demand; `None` when the row does not exist or has no value.
    pub fn value_of(&self, statement: StatementKind, id: &str, year: &str) -> Option<f64> {
        self.info(statement, id)?;
        YearPass::new(self, year).value(&RowRef::new(statement, id))
    }

    /// Values of every derived row for `year`. Stored inputs are not included.
    pub fn evaluate_year(&self, year: &str) -> BTreeMap<RowRef, Option<f64>> {
        let mut pass = YearPass::new(self, year);
        let mut results = BTreeMap::new();
        for kind in StatementKind::ALL {
            for row in tree::flatten(self.state.statement(kind)) {
                let row_ref = RowRef::new(kind, row.id.clone());
                let derived = self
                    .formula(kind, &row.id, year)
                    .is_some_and(|f| !f.is_stored());
                let value = pass.value(&row_ref);
                if derived {
                    results.insert(row_ref, value);
                }
            }
        }
        results
    }
}

fn index_rows<'a>(rows: &'a [Row], parent: Option<&'a str>, out: &mut HashMap<&'a str, RowInfo<'a>>) {
    for row in rows {
        out.insert(row.id.as_str(), RowInfo { row, parent });
        index_rows(&row.children, Some(row.id.as_str()), out);
    }
}

fn child_refs(statement: StatementKind, row: &Row) -> Vec<RowRef> {
    row.children
        .iter()
        .map(|c| RowRef::new(statement, c.id.clone()))
        .collect()
}

fn generic_formula(statement: StatementKind, row: &Row) -> Formula {
    match row.kind {
        RowKind::Input => Formula::Stored,
        _ if !row.children.is_empty() => Formula::SumChildren(child_refs(statement, row)),
        _ => Formula::Stored,
    }
}

/// Memoized evaluation of one year.
struct YearPass<'e, 'a> {
    engine: &'e CalculationEngine<'a>,
    year: &'e str,
    prior: Option<&'a str>,
    cache: HashMap<RowRef, Option<f64>>,
    in_progress: HashSet<RowRef>,
}

impl<'e, 'a> YearPass<'e, 'a> {
    fn new(engine: &'e CalculationEngine<'a>, year: &'e str) -> Self {
        Self {
            engine,
            year,
            prior: prior_year(&engine.state.meta.years, year),
            cache: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    fn value(&mut self, row_ref: &RowRef) -> Option<f64> {
        if let Some(cached) = self.cache.get(row_ref) {
            return *cached;
        }
        let Some(formula) = self.engine.formula(row_ref.statement, &row_ref.id, self.year) else {
            debug!("Reference to missing {} row '{}' evaluates to 0", row_ref.statement, row_ref.id);
            return Some(0.0);
        };
        if !self.in_progress.insert(row_ref.clone()) {
            warn!(
                "Circular reference through {} row '{}' in {}; using 0",
                row_ref.statement, row_ref.id, self.year
            );
            return Some(0.0);
        }
        let value = self.apply(row_ref, &formula);
        self.in_progress.remove(row_ref);
        self.cache.insert(row_ref.clone(), value);
        value
    }

    fn amount(&mut self, row_ref: &RowRef) -> f64 {
        self.value(row_ref).unwrap_or(0.0)
    }

    fn stored(&self, row_ref: &RowRef, year: Option<&str>) -> f64 {
        year.and_then(|y| {
            self.engine
                .info(row_ref.statement, &row_ref.id)
                .and_then(|info| info.row.value(y))
        })
        .unwrap_or(0.0)
    }

    fn apply(&mut self, row_ref: &RowRef, formula: &Formula) -> Option<f64> {
        match formula {
            Formula::Stored => Some(self.stored(row_ref, Some(self.year))),
            Formula::SumChildren(refs) => Some(refs.iter().map(|r| self.amount(r)).sum()),
            Formula::Linear(terms) => Some(terms.iter().map(|(r, k)| k * self.amount(r)).sum()),
            Formula::Margin {
                numerator,
                denominator,
            } => {
                let den = self.amount(denominator);
                let num = self.amount(numerator);
                if den == 0.0 {
                    None
                } else {
                    Some(num / den * 100.0)
                }
            }
            Formula::Link { source, sign } => Some(sign * self.amount(source)),
            Formula::RollForward { source, sign } => {
                let opening = self.stored(row_ref, self.prior);
                Some(opening + sign * self.amount(source))
            }
            Formula::WorkingCapital(items) => {
                let prior = self.prior?;
                Some(
                    items
                        .iter()
                        .map(|(r, sign)| sign * (self.amount(r) - self.stored(r, Some(prior))))
                        .sum(),
                )
            }
            Formula::WorkingCapitalItem { source, sign } => {
                // No change can be measured without an opening balance.
                let prior = self.prior?;
                let current = self.amount(source);
                Some(sign * (current - self.stored(source, Some(prior))))
            }
            Formula::Attribution { kind, plus } => {
                let table = match kind {
                    AttributionKind::Sbc => &self.engine.state.sbc,
                    AttributionKind::Dna => &self.engine.state.dna,
                };
                let embedded = attributed_total(table, &self.engine.state.income_statement, self.year);
                let direct = plus.as_ref().map_or(0.0, |r| self.amount(r));
                Some(embedded + direct)
            }
            Formula::Projected(value) => *value,
            Formula::PctOf { reference, pct } => Some(self.amount(reference) * pct / 100.0),
            Formula::PctOfParentTotal {
                others,
                pct,
                total_pct,
            } => {
                if *total_pct >= 100.0 {
                    return None;
                }
                let base: f64 = others.iter().map(|r| self.amount(r)).sum();
                Some(pct / 100.0 * base / (1.0 - total_pct / 100.0))
            }
        }
    }
}

fn write_back(state: &mut ModelState, year: &str, results: &BTreeMap<RowRef, Option<f64>>) {
    for kind in StatementKind::ALL {
        let rows = tree::map_all(state.statement(kind), &|mut row: Row| {
            if let Some(value) = results.get(&RowRef::new(kind, row.id.clone())) {
                match value {
                    Some(v) => {
                        row.values.insert(year.to_string(), *v);
                    }
                    None => {
                        row.values.remove(year);
                    }
                }
            }
            row
        });
        state.set_statement(kind, rows);
    }
}

fn settle_year(state: &mut ModelState, year: &str) {
    let results = CalculationEngine::new(state).evaluate_year(year);
    write_back(state, year, &results);
}

/// Reconciles the snapshot and recomputes every derived row for every year.
pub fn recalculate(state: &ModelState) -> ModelState {
    let mut next = reconcile_model(state);
    let years = next.meta.years.clone();
    for year in &years {
        settle_year(&mut next, year);
    }
    info!(
        "Recalculated model for {} across {} years",
        next.meta.company_name,
        years.len()
    );
    next
}

/// Recomputes `year` and every later year; earlier years are already settled.
/// Falls back to a full recalculation when `year` is not part of the model.
pub fn recalculate_from(state: &ModelState, year: &str) -> ModelState {
    let Some(start) = state.meta.years.iter().position(|y| y == year) else {
        return recalculate(state);
    };
    let mut next = reconcile_model(state);
    let years = next.meta.years.clone();
    for year in &years[start..] {
        settle_year(&mut next, year);
    }
    debug!("Recalculated {} years from {}", years.len() - start, year);
    next
}

/// One row's value against a snapshot, without writing anything back.
pub fn compute_row_value(state: &ModelState, statement: StatementKind, id: &str, year: &str) -> Option<f64> {
    CalculationEngine::new(state).value_of(statement, id, year)
}
