//! Canonical statement skeletons and the reconcile pass that repairs stored trees.
//!
//! Every statement carries a fixed set of core rows in a fixed relative order. Stored
//! trees can predate the current skeleton, so [`reconcile_model`] runs on load and
//! before every recalculation: it renames legacy ids, moves a few known-misplaced rows,
//! inserts whatever is missing and restores skeleton metadata. Existing rows are never
//! replaced, so values and children survive.

use crate::derivations::sync_working_capital;
use crate::schema::{CfsLink, CfsSection, Impact, ModelState, Row, RowKind, StatementKind, ValueType};
use crate::tree::{self, insert_at};
use log::debug;

// Income statement
pub const REVENUE: &str = "revenue";
pub const COGS: &str = "cogs";
pub const GROSS_PROFIT: &str = "gross_profit";
pub const GROSS_MARGIN: &str = "gross_margin";
pub const SGA: &str = "sga";
pub const EBIT: &str = "ebit";
pub const EBIT_MARGIN: &str = "ebit_margin";
pub const DNA: &str = "dna";
pub const INTEREST_EXPENSE: &str = "interest_expense";
pub const INTEREST_INCOME: &str = "interest_income";
pub const OTHER_INCOME: &str = "other_income";
pub const EBT: &str = "ebt";
pub const TAX: &str = "tax";
pub const NET_INCOME: &str = "net_income";
pub const NET_INCOME_MARGIN: &str = "net_income_margin";

// Balance sheet
pub const CASH: &str = "ca_cash";
pub const SHORT_TERM_DEBT: &str = "cl_short_term_debt";
pub const RETAINED_EARNINGS: &str = "equity_retained_earnings";
pub const TOTAL_CURRENT_ASSETS: &str = "total_current_assets";
pub const TOTAL_FIXED_ASSETS: &str = "total_fixed_assets";
pub const TOTAL_ASSETS: &str = "total_assets";
pub const TOTAL_CURRENT_LIABILITIES: &str = "total_current_liabilities";
pub const TOTAL_NON_CURRENT_LIABILITIES: &str = "total_non_current_liabilities";
pub const TOTAL_LIABILITIES: &str = "total_liabilities";
pub const TOTAL_EQUITY: &str = "total_equity";
pub const TOTAL_LIAB_AND_EQUITY: &str = "total_liab_and_equity";

// Cash flow
pub const CFS_NET_INCOME: &str = "cfs_net_income";
pub const CFS_DNA: &str = "cfs_dna";
pub const CFS_SBC: &str = "cfs_sbc";
pub const CFS_WORKING_CAPITAL: &str = "cfs_working_capital";
pub const TOTAL_OPERATING_CASH_FLOW: &str = "total_operating_cash_flow";
pub const CFS_CAPEX: &str = "cfs_capex";
pub const TOTAL_INVESTING_CASH_FLOW: &str = "total_investing_cash_flow";
pub const CFS_NET_DEBT: &str = "cfs_net_debt";
pub const TOTAL_FINANCING_CASH_FLOW: &str = "total_financing_cash_flow";
pub const NET_CHANGE_IN_CASH: &str = "net_change_in_cash";

/// Rows whose kind follows their children.
pub const CONVERTIBLE_IDS: [&str; 7] = [
    REVENUE,
    COGS,
    SGA,
    DNA,
    INTEREST_EXPENSE,
    INTEREST_INCOME,
    OTHER_INCOME,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    After(&'static str),
    Before(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct SkeletonRow {
    pub id: &'static str,
    pub label: &'static str,
    pub kind: RowKind,
    pub value_type: ValueType,
    pub anchor: Anchor,
    pub cfs_link: Option<(CfsSection, Impact)>,
    pub is_link: Option<(&'static str, Impact)>,
}

const fn row(id: &'static str, label: &'static str, kind: RowKind, anchor: Anchor) -> SkeletonRow {
    SkeletonRow {
        id,
        label,
        kind,
        value_type: ValueType::Currency,
        anchor,
        cfs_link: None,
        is_link: None,
    }
}

const fn percent(id: &'static str, label: &'static str, after: &'static str) -> SkeletonRow {
    SkeletonRow {
        id,
        label,
        kind: RowKind::Calc,
        value_type: ValueType::Percent,
        anchor: Anchor::After(after),
        cfs_link: None,
        is_link: None,
    }
}

const fn linked(mut def: SkeletonRow, section: CfsSection, impact: Impact) -> SkeletonRow {
    def.cfs_link = Some((section, impact));
    def
}

const fn from_is(mut def: SkeletonRow, is_row: &'static str, impact: Impact) -> SkeletonRow {
    def.is_link = Some((is_row, impact));
    def
}

use Anchor::{After, Before, Start};
use CfsSection::{Financing, Investing, Operating};
use RowKind::{Calc, Input, Subtotal, Total};

static INCOME_STATEMENT: [SkeletonRow; 15] = [
    row(REVENUE, "Revenue", Input, Start),
    row(COGS, "Cost of Goods Sold", Input, After(REVENUE)),
    row(GROSS_PROFIT, "Gross Profit", Subtotal, After(COGS)),
    percent(GROSS_MARGIN, "Gross Margin %", GROSS_PROFIT),
    row(SGA, "SG&A", Input, After(GROSS_MARGIN)),
    row(EBIT, "EBIT", Subtotal, After(SGA)),
    percent(EBIT_MARGIN, "EBIT Margin %", EBIT),
    row(DNA, "Depreciation & Amortization", Input, After(EBIT_MARGIN)),
    row(INTEREST_EXPENSE, "Interest Expense", Input, After(DNA)),
    row(INTEREST_INCOME, "Interest Income", Input, After(INTEREST_EXPENSE)),
    row(OTHER_INCOME, "Other Income", Input, After(INTEREST_INCOME)),
    row(EBT, "EBT", Subtotal, After(OTHER_INCOME)),
    row(TAX, "Income Tax", Input, After(EBT)),
    row(NET_INCOME, "Net Income", Total, After(TAX)),
    percent(NET_INCOME_MARGIN, "Net Income Margin %", NET_INCOME),
];

/// Balance sheet rows placed by anchor. Subtotals are placed by [`ensure_balance_sheet_subtotals`].
static BALANCE_SHEET: [SkeletonRow; 2] = [
    linked(
        row(CASH, "Cash & Equivalents", Input, Start),
        Operating,
        Impact::Calculated,
    ),
    from_is(
        row(RETAINED_EARNINGS, "Retained Earnings", Input, Before(TOTAL_EQUITY)),
        NET_INCOME,
        Impact::Positive,
    ),
];

static CASH_FLOW: [SkeletonRow; 10] = [
    from_is(
        linked(row(CFS_NET_INCOME, "Net Income", Calc, Start), Operating, Impact::Calculated),
        NET_INCOME,
        Impact::Positive,
    ),
    from_is(
        linked(
            row(CFS_DNA, "Depreciation & Amortization", Calc, After(CFS_NET_INCOME)),
            Operating,
            Impact::Positive,
        ),
        DNA,
        Impact::Positive,
    ),
    linked(
        row(CFS_SBC, "Stock-Based Compensation", Calc, After(CFS_DNA)),
        Operating,
        Impact::Positive,
    ),
    linked(
        row(CFS_WORKING_CAPITAL, "Change in Working Capital", Calc, After(CFS_SBC)),
        Operating,
        Impact::Calculated,
    ),
    row(TOTAL_OPERATING_CASH_FLOW, "Operating Cash Flow", Subtotal, After(CFS_WORKING_CAPITAL)),
    linked(
        row(CFS_CAPEX, "Capital Expenditures", Input, After(TOTAL_OPERATING_CASH_FLOW)),
        Investing,
        Impact::Negative,
    ),
    row(TOTAL_INVESTING_CASH_FLOW, "Investing Cash Flow", Subtotal, After(CFS_CAPEX)),
    linked(
        row(CFS_NET_DEBT, "Net Debt Issued / (Repaid)", Input, After(TOTAL_INVESTING_CASH_FLOW)),
        Financing,
        Impact::Neutral,
    ),
    row(TOTAL_FINANCING_CASH_FLOW, "Financing Cash Flow", Subtotal, After(CFS_NET_DEBT)),
    row(NET_CHANGE_IN_CASH, "Net Change in Cash", Total, After(TOTAL_FINANCING_CASH_FLOW)),
];

/// A balance sheet aggregate, placed after its category items or after its components.
#[derive(Debug, Clone, Copy)]
pub struct SubtotalRule {
    pub id: &'static str,
    pub label: &'static str,
    pub kind: RowKind,
    pub prefixes: &'static [&'static str],
    pub components: &'static [&'static str],
}

pub static BALANCE_SHEET_SUBTOTALS: [SubtotalRule; 8] = [
    SubtotalRule {
        id: TOTAL_CURRENT_ASSETS,
        label: "Total Current Assets",
        kind: Subtotal,
        prefixes: &["ca_"],
        components: &[],
    },
    SubtotalRule {
        id: TOTAL_FIXED_ASSETS,
        label: "Total Fixed Assets",
        kind: Subtotal,
        prefixes: &["fa_"],
        components: &[],
    },
    SubtotalRule {
        id: TOTAL_ASSETS,
        label: "Total Assets",
        kind: Total,
        prefixes: &[],
        components: &[TOTAL_CURRENT_ASSETS, TOTAL_FIXED_ASSETS],
    },
    SubtotalRule {
        id: TOTAL_CURRENT_LIABILITIES,
        label: "Total Current Liabilities",
        kind: Subtotal,
        prefixes: &["cl_"],
        components: &[],
    },
    SubtotalRule {
        id: TOTAL_NON_CURRENT_LIABILITIES,
        label: "Total Non-Current Liabilities",
        kind: Subtotal,
        prefixes: &["ncl_"],
        components: &[],
    },
    SubtotalRule {
        id: TOTAL_LIABILITIES,
        label: "Total Liabilities",
        kind: Total,
        prefixes: &[],
        components: &[TOTAL_CURRENT_LIABILITIES, TOTAL_NON_CURRENT_LIABILITIES],
    },
    SubtotalRule {
        id: TOTAL_EQUITY,
        label: "Total Equity",
        kind: Total,
        prefixes: &["equity_"],
        components: &[],
    },
    SubtotalRule {
        id: TOTAL_LIAB_AND_EQUITY,
        label: "Total Liabilities & Equity",
        kind: Total,
        prefixes: &[],
        components: &[TOTAL_LIABILITIES, TOTAL_EQUITY],
    },
];

/// Ids used by older saved models.
static LEGACY_RENAMES: [(StatementKind, &str, &str); 5] = [
    (StatementKind::IncomeStatement, "opex", SGA),
    (StatementKind::IncomeStatement, "operating_expenses", SGA),
    (StatementKind::IncomeStatement, "depreciation", DNA),
    (StatementKind::IncomeStatement, "income_tax", TAX),
    (StatementKind::BalanceSheet, "cash", CASH),
];

/// Rows older layouts stored in the wrong place: `(row, must directly follow)`.
static LEGACY_RELOCATIONS: [(StatementKind, &str, &str); 3] = [
    (StatementKind::IncomeStatement, GROSS_MARGIN, GROSS_PROFIT),
    (StatementKind::IncomeStatement, EBIT_MARGIN, EBIT),
    (StatementKind::IncomeStatement, NET_INCOME_MARGIN, NET_INCOME),
];

pub fn skeleton(kind: StatementKind) -> &'static [SkeletonRow] {
    match kind {
        StatementKind::IncomeStatement => &INCOME_STATEMENT,
        StatementKind::BalanceSheet => &BALANCE_SHEET,
        StatementKind::CashFlow => &CASH_FLOW,
    }
}

pub fn skeleton_row(kind: StatementKind, id: &str) -> Option<&'static SkeletonRow> {
    skeleton(kind).iter().find(|def| def.id == id)
}

fn subtotal_rule(id: &str) -> Option<&'static SubtotalRule> {
    BALANCE_SHEET_SUBTOTALS.iter().find(|rule| rule.id == id)
}

/// Skeleton rows and balance sheet subtotals; user actions never remove or move them.
pub fn is_protected(kind: StatementKind, id: &str) -> bool {
    skeleton_row(kind, id).is_some()
        || (kind == StatementKind::BalanceSheet && subtotal_rule(id).is_some())
}

pub fn protected_ids(kind: StatementKind) -> Vec<&'static str> {
    let mut ids: Vec<&'static str> = skeleton(kind).iter().map(|def| def.id).collect();
    if kind == StatementKind::BalanceSheet {
        ids.extend(BALANCE_SHEET_SUBTOTALS.iter().map(|rule| rule.id));
    }
    ids
}

pub fn is_convertible(kind: StatementKind, id: &str) -> bool {
    if kind == StatementKind::IncomeStatement && CONVERTIBLE_IDS.contains(&id) {
        return true;
    }
    !is_protected(kind, id)
}

/// The kind a row should have given its current children.
pub fn derive_kind(kind: StatementKind, row: &Row) -> RowKind {
    if is_convertible(kind, &row.id) {
        if row.kind.is_aggregate() {
            return row.kind;
        }
        return if row.children.is_empty() {
            RowKind::Input
        } else {
            RowKind::Calc
        };
    }
    if let Some(def) = skeleton_row(kind, &row.id) {
        return def.kind;
    }
    subtotal_rule(&row.id).map_or(row.kind, |rule| rule.kind)
}

fn instantiate(def: &SkeletonRow) -> Row {
    let mut row = Row::new(def.id, def.label, def.kind).with_value_type(def.value_type);
    if let Some((section, impact)) = def.cfs_link {
        row = row.with_cfs_link(CfsLink::new(section, impact));
    }
    if let Some((is_row, impact)) = def.is_link {
        row = row.with_is_link(is_row, impact);
    }
    row
}

fn top_index(rows: &[Row], id: &str) -> Option<usize> {
    rows.iter().position(|r| r.id == id)
}

fn rename_legacy_ids(kind: StatementKind, rows: Vec<Row>) -> Vec<Row> {
    let mut rows = rows;
    for (statement, legacy, current) in LEGACY_RENAMES.iter() {
        if *statement != kind || tree::contains(&rows, current) || !tree::contains(&rows, legacy) {
            continue;
        }
        debug!("Migrating legacy {} row id '{}' to '{}'", kind, legacy, current);
        rows = tree::map_subtree(&rows, legacy, |mut r| {
            r.id = current.to_string();
            r
        });
    }
    rows
}

fn relocate_legacy_rows(kind: StatementKind, mut rows: Vec<Row>) -> Vec<Row> {
    for (statement, id, follows) in LEGACY_RELOCATIONS.iter() {
        if *statement != kind {
            continue;
        }
        let (Some(idx), Some(anchor_idx)) = (top_index(&rows, id), top_index(&rows, follows)) else {
            continue;
        };
        if idx == anchor_idx + 1 {
            continue;
        }
        debug!("Relocating misplaced {} row '{}' after '{}'", kind, id, follows);
        let moved = rows.remove(idx);
        let anchor_idx = top_index(&rows, follows).unwrap_or(rows.len().saturating_sub(1));
        rows.insert(anchor_idx + 1, moved);
    }
    rows
}

fn insert_missing_rows(kind: StatementKind, mut rows: Vec<Row>) -> Vec<Row> {
    for def in skeleton(kind) {
        if tree::contains(&rows, def.id) {
            continue;
        }
        let index = match def.anchor {
            Anchor::Start => 0,
            Anchor::After(reference) => top_index(&rows, reference).map_or(rows.len(), |i| i + 1),
            Anchor::Before(reference) => top_index(&rows, reference).unwrap_or(rows.len()),
        };
        debug!("Inserting missing {} row '{}' at {}", kind, def.id, index);
        rows = insert_at(&rows, index, instantiate(def));
    }
    rows
}

/// Inserts any missing balance sheet subtotal after the last row of its category.
///
/// The category block is bounded by the nearest present totals on either side; the
/// scan runs backward from the next known total looking for an id with the category
/// prefix. Aggregates such as Total Assets go right after their last present component.
pub fn ensure_balance_sheet_subtotals(rows: &[Row]) -> Vec<Row> {
    let mut rows = rows.to_vec();
    for (k, rule) in BALANCE_SHEET_SUBTOTALS.iter().enumerate() {
        if top_index(&rows, rule.id).is_some() {
            continue;
        }
        let lower = BALANCE_SHEET_SUBTOTALS[..k]
            .iter()
            .rev()
            .find_map(|prev| top_index(&rows, prev.id))
            .map_or(0, |i| i + 1);
        let upper = BALANCE_SHEET_SUBTOTALS[k + 1..]
            .iter()
            .find_map(|next| top_index(&rows, next.id))
            .unwrap_or(rows.len())
            .max(lower);

        let index = if rule.prefixes.is_empty() {
            rule.components
                .iter()
                .filter_map(|c| top_index(&rows, c))
                .max()
                .map_or(lower, |i| i + 1)
        } else {
            (lower..upper)
                .rev()
                .find(|&i| rule.prefixes.iter().any(|p| rows[i].id.starts_with(p)))
                .map_or(lower, |i| i + 1)
        };

        debug!("Inserting missing balance sheet subtotal '{}' at {}", rule.id, index);
        rows.insert(index, Row::new(rule.id, rule.label, rule.kind));
    }
    rows
}

fn restore_metadata(kind: StatementKind, rows: &[Row]) -> Vec<Row> {
    tree::map_all(rows, &|mut row: Row| {
        if let Some(def) = skeleton_row(kind, &row.id) {
            row.value_type = def.value_type;
            if row.cfs_link.is_none() {
                if let Some((section, impact)) = def.cfs_link {
                    row.cfs_link = Some(CfsLink::new(section, impact));
                }
            }
            if row.is_link.is_none() {
                if let Some((is_row, impact)) = def.is_link {
                    row = row.with_is_link(is_row, impact);
                }
            }
        }
        row.kind = derive_kind(kind, &row);
        row
    })
}

/// Brings one statement in line with its skeleton. Idempotent.
pub fn reconcile_statement(kind: StatementKind, rows: &[Row]) -> Vec<Row> {
    let rows = rename_legacy_ids(kind, rows.to_vec());
    let rows = relocate_legacy_rows(kind, rows);
    let rows = if kind == StatementKind::BalanceSheet {
        ensure_balance_sheet_subtotals(&rows)
    } else {
        rows
    };
    let rows = insert_missing_rows(kind, rows);
    restore_metadata(kind, &rows)
}

/// Reconciles all three statements, then re-derives the working capital breakdown.
pub fn reconcile_model(state: &ModelState) -> ModelState {
    let mut next = state.clone();
    for kind in StatementKind::ALL {
        let rows = reconcile_statement(kind, state.statement(kind));
        next.set_statement(kind, rows);
    }
    next.cash_flow = sync_working_capital(&next.cash_flow, &next.balance_sheet);
    next
}

fn item(id: &str, label: &str, section: CfsSection, impact: Impact) -> Row {
    Row::input(id, label).with_cfs_link(CfsLink::new(section, impact))
}

/// A fresh statement: the skeleton plus the usual deletable category items.
pub fn default_template(kind: StatementKind) -> Vec<Row> {
    let rows = match kind {
        StatementKind::IncomeStatement => Vec::new(),
        StatementKind::BalanceSheet => vec![
            item("ca_accounts_receivable", "Accounts Receivable", Operating, Impact::Negative),
            item("ca_inventory", "Inventory", Operating, Impact::Negative),
            item("fa_ppe", "Property, Plant & Equipment", Investing, Impact::Negative),
            item("cl_accounts_payable", "Accounts Payable", Operating, Impact::Positive),
            item(SHORT_TERM_DEBT, "Short-Term Debt", Financing, Impact::Positive),
            item("ncl_long_term_debt", "Long-Term Debt", Financing, Impact::Positive),
            item("equity_common_stock", "Common Stock", Financing, Impact::Positive),
        ],
        StatementKind::CashFlow => {
            let skeleton_rows: Vec<Row> = CASH_FLOW.iter().map(instantiate).collect();
            let mut rows = Vec::new();
            for row in skeleton_rows {
                match row.id.as_str() {
                    TOTAL_OPERATING_CASH_FLOW => rows.push(item(
                        "cfs_other_operating",
                        "Other Operating Activities",
                        Operating,
                        Impact::Neutral,
                    )),
                    TOTAL_INVESTING_CASH_FLOW => rows.push(item(
                        "cfs_other_investing",
                        "Other Investing Activities",
                        Investing,
                        Impact::Neutral,
                    )),
                    TOTAL_FINANCING_CASH_FLOW => {
                        rows.push(item("cfs_equity_issued", "Equity Issued", Financing, Impact::Positive));
                        rows.push(item("cfs_dividends", "Dividends Paid", Financing, Impact::Negative));
                    }
                    _ => {}
                }
                rows.push(row);
            }
            rows
        }
    };
    reconcile_statement(kind, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_income_statement_template_order() {
        let rows = default_template(StatementKind::IncomeStatement);
        assert_eq!(
            ids(&rows),
            vec![
                REVENUE,
                COGS,
                GROSS_PROFIT,
                GROSS_MARGIN,
                SGA,
                EBIT,
                EBIT_MARGIN,
                DNA,
                INTEREST_EXPENSE,
                INTEREST_INCOME,
                OTHER_INCOME,
                EBT,
                TAX,
                NET_INCOME,
                NET_INCOME_MARGIN
            ]
        );
        assert_eq!(rows[3].value_type, ValueType::Percent);
    }

    #[test]
    fn test_balance_sheet_template_places_subtotals() {
        let rows = default_template(StatementKind::BalanceSheet);
        assert_eq!(
            ids(&rows),
            vec![
                CASH,
                "ca_accounts_receivable",
                "ca_inventory",
                TOTAL_CURRENT_ASSETS,
                "fa_ppe",
                TOTAL_FIXED_ASSETS,
                TOTAL_ASSETS,
                "cl_accounts_payable",
                SHORT_TERM_DEBT,
                TOTAL_CURRENT_LIABILITIES,
                "ncl_long_term_debt",
                TOTAL_NON_CURRENT_LIABILITIES,
                TOTAL_LIABILITIES,
                "equity_common_stock",
                RETAINED_EARNINGS,
                TOTAL_EQUITY,
                TOTAL_LIAB_AND_EQUITY
            ]
        );
    }

    #[test]
    fn test_cash_flow_template_sections() {
        let rows = default_template(StatementKind::CashFlow);
        let order = ids(&rows);
        let pos = |id: &str| order.iter().position(|x| *x == id).unwrap();
        assert!(pos("cfs_other_operating") < pos(TOTAL_OPERATING_CASH_FLOW));
        assert!(pos(CFS_CAPEX) < pos(TOTAL_INVESTING_CASH_FLOW));
        assert!(pos("cfs_dividends") < pos(TOTAL_FINANCING_CASH_FLOW));
        assert_eq!(*order.last().unwrap(), NET_CHANGE_IN_CASH);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        for kind in StatementKind::ALL {
            let partial: Vec<Row> = default_template(kind)
                .into_iter()
                .enumerate()
                .filter(|(i, _)| i % 3 != 0)
                .map(|(_, r)| r)
                .collect();
            let once = reconcile_statement(kind, &partial);
            let twice = reconcile_statement(kind, &once);
            assert_eq!(once, twice, "{} reconcile is not idempotent", kind);
            for id in protected_ids(kind) {
                assert!(tree::contains(&once, id), "{} missing {}", kind, id);
            }
        }
    }

    #[test]
    fn test_reconcile_preserves_existing_values_and_children() {
        let rows = vec![
            Row::input(REVENUE, "Revenue")
                .with_children(vec![Row::input("saas", "SaaS").with_value("2023A", 10.0)]),
            Row::input(TAX, "Tax").with_value("2023A", 3.0),
        ];
        let rows = reconcile_statement(StatementKind::IncomeStatement, &rows);
        let revenue = tree::find_row(&rows, REVENUE).unwrap();
        assert_eq!(revenue.kind, RowKind::Calc);
        assert_eq!(revenue.children[0].value("2023A"), Some(10.0));
        assert_eq!(tree::find_row(&rows, TAX).unwrap().value("2023A"), Some(3.0));
        assert_eq!(rows.len(), INCOME_STATEMENT.len());
    }

    #[test]
    fn test_legacy_ids_and_misplaced_margins_are_repaired() {
        let mut rows = default_template(StatementKind::IncomeStatement);
        rows = tree::map_subtree(&rows, SGA, |mut r| {
            r.id = "opex".to_string();
            r.values.insert("2023A".to_string(), 42.0);
            r
        });
        let margin_idx = top_index(&rows, GROSS_MARGIN).unwrap();
        let margin = rows.remove(margin_idx);
        rows.push(margin);

        let fixed = reconcile_statement(StatementKind::IncomeStatement, &rows);
        assert_eq!(ids(&fixed), ids(&default_template(StatementKind::IncomeStatement)));
        assert_eq!(tree::find_row(&fixed, SGA).unwrap().value("2023A"), Some(42.0));
    }

    #[test]
    fn test_subtotals_follow_last_category_item() {
        let rows = vec![
            Row::input(CASH, "Cash"),
            Row::input("ca_prepaid", "Prepaid"),
            Row::input("fa_land", "Land"),
            Row::input("cl_accrued", "Accrued"),
            Row::input("equity_common_stock", "Common Stock"),
        ];
        let rows = reconcile_statement(StatementKind::BalanceSheet, &rows);
        let order = ids(&rows);
        let pos = |id: &str| order.iter().position(|x| *x == id).unwrap();
        assert_eq!(pos(TOTAL_CURRENT_ASSETS), pos("ca_prepaid") + 1);
        assert_eq!(pos(TOTAL_FIXED_ASSETS), pos("fa_land") + 1);
        assert_eq!(pos(TOTAL_ASSETS), pos(TOTAL_FIXED_ASSETS) + 1);
        assert_eq!(pos(TOTAL_CURRENT_LIABILITIES), pos("cl_accrued") + 1);
        assert!(pos(RETAINED_EARNINGS) < pos(TOTAL_EQUITY));
        assert_eq!(*order.last().unwrap(), TOTAL_LIAB_AND_EQUITY);
    }

    #[test]
    fn test_derive_kind_flips_only_convertible_rows() {
        let with_child = Row::input(REVENUE, "Revenue").with_children(vec![Row::input("a", "A")]);
        assert_eq!(derive_kind(StatementKind::IncomeStatement, &with_child), RowKind::Calc);

        let bare = Row::new(REVENUE, "Revenue", RowKind::Calc);
        assert_eq!(derive_kind(StatementKind::IncomeStatement, &bare), RowKind::Input);

        let tax = Row::input(TAX, "Tax").with_children(vec![Row::input("a", "A")]);
        assert_eq!(derive_kind(StatementKind::IncomeStatement, &tax), RowKind::Input);

        let ebit = Row::input(EBIT, "EBIT");
        assert_eq!(derive_kind(StatementKind::IncomeStatement, &ebit), RowKind::Subtotal);
    }
}
