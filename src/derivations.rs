//! Values on one statement that are derived from another.

use crate::schema::{AttributionTable, CfsSection, Impact, Row};
use crate::skeleton::{
    CASH, CFS_WORKING_CAPITAL, SHORT_TERM_DEBT, TOTAL_CURRENT_ASSETS, TOTAL_CURRENT_LIABILITIES,
};
use crate::tree;
use log::debug;

pub const WORKING_CAPITAL_PREFIX: &str = "wc_";

#[derive(Debug, Clone, PartialEq)]
pub struct WorkingCapitalItem {
    pub bs_id: String,
    pub label: String,
    /// -1 for current assets (an increase consumes cash), +1 for current liabilities.
    pub sign: f64,
}

impl WorkingCapitalItem {
    pub fn child_id(&self) -> String {
        working_capital_child_id(&self.bs_id)
    }
}

pub fn working_capital_child_id(bs_id: &str) -> String {
    format!("{}{}", WORKING_CAPITAL_PREFIX, bs_id)
}

/// Top-level rows of the block that ends at `total_id`, i.e. everything after the
/// previous subtotal/total. Empty when `total_id` is absent.
pub fn block_members<'a>(rows: &'a [Row], total_id: &str) -> Vec<&'a Row> {
    let Some(end) = rows.iter().position(|r| r.id == total_id) else {
        return Vec::new();
    };
    let start = rows[..end]
        .iter()
        .rposition(|r| r.kind.is_aggregate())
        .map_or(0, |i| i + 1);
    rows[start..end]
        .iter()
        .filter(|r| !r.kind.is_aggregate())
        .collect()
}

fn is_operating_item(row: &Row) -> bool {
    if row.id == CASH || row.id == SHORT_TERM_DEBT {
        return false;
    }
    match &row.cfs_link {
        Some(link) => link.section == CfsSection::Operating && link.impact != Impact::Calculated,
        None => true,
    }
}

/// One item per operating current asset / current liability, in balance sheet order.
pub fn expected_working_capital_items(balance_sheet: &[Row]) -> Vec<WorkingCapitalItem> {
    let assets = block_members(balance_sheet, TOTAL_CURRENT_ASSETS)
        .into_iter()
        .map(|r| (r, -1.0));
    let liabilities = block_members(balance_sheet, TOTAL_CURRENT_LIABILITIES)
        .into_iter()
        .map(|r| (r, 1.0));

    assets
        .chain(liabilities)
        .filter(|(row, _)| is_operating_item(row))
        .map(|(row, sign)| WorkingCapitalItem {
            bs_id: row.id.clone(),
            label: row.label.clone(),
            sign,
        })
        .collect()
}

/// Rebuilds the working capital breakdown from the balance sheet's current categories.
///
/// Children still backed by a balance sheet row keep their values; missing ones are
/// added empty; the rest are dropped.
pub fn sync_working_capital(cash_flow: &[Row], balance_sheet: &[Row]) -> Vec<Row> {
    let Some(parent) = tree::find_row(cash_flow, CFS_WORKING_CAPITAL) else {
        return cash_flow.to_vec();
    };

    let children: Vec<Row> = expected_working_capital_items(balance_sheet)
        .into_iter()
        .map(|item| {
            let id = item.child_id();
            let label = format!("Change in {}", item.label);
            match parent.children.iter().find(|c| c.id == id) {
                Some(existing) => {
                    let mut row = existing.clone();
                    row.label = label;
                    row
                }
                None => Row::input(id, label),
            }
        })
        .collect();

    if children.len() != parent.children.len() {
        debug!(
            "Working capital breakdown resynchronised: {} -> {} items",
            parent.children.len(),
            children.len()
        );
    }

    tree::map_subtree(cash_flow, CFS_WORKING_CAPITAL, |mut row| {
        row.children = children;
        row
    })
}

/// The annotated amount for `row`, taken from its leaf categories when it is broken down.
pub fn attributed_amount(table: &AttributionTable, row: &Row, year: &str) -> f64 {
    if row.children.is_empty() {
        table
            .get(&row.id)
            .and_then(|years| years.get(year))
            .copied()
            .unwrap_or(0.0)
    } else {
        row.children
            .iter()
            .map(|child| attributed_amount(table, child, year))
            .sum()
    }
}

/// Total annotated amount across the income statement for one year.
pub fn attributed_total(table: &AttributionTable, income_statement: &[Row], year: &str) -> f64 {
    income_statement
        .iter()
        .map(|row| attributed_amount(table, row, year))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CfsLink, StatementKind};
    use crate::skeleton::{default_template, SGA};
    use std::collections::BTreeMap;

    fn balance_sheet() -> Vec<Row> {
        default_template(StatementKind::BalanceSheet)
    }

    #[test]
    fn test_expected_items_exclude_cash_and_short_term_debt() {
        let items = expected_working_capital_items(&balance_sheet());
        let ids: Vec<&str> = items.iter().map(|i| i.bs_id.as_str()).collect();
        assert_eq!(ids, vec!["ca_accounts_receivable", "ca_inventory", "cl_accounts_payable"]);
        assert_eq!(items[0].sign, -1.0);
        assert_eq!(items[2].sign, 1.0);
    }

    #[test]
    fn test_financing_tagged_current_rows_are_excluded() {
        let mut bs = balance_sheet();
        let idx = bs.iter().position(|r| r.id == TOTAL_CURRENT_LIABILITIES).unwrap();
        bs.insert(
            idx,
            Row::input("cl_loan_current", "Current Portion of Loan")
                .with_cfs_link(CfsLink::new(CfsSection::Financing, Impact::Positive)),
        );
        let items = expected_working_capital_items(&bs);
        assert!(items.iter().all(|i| i.bs_id != "cl_loan_current"));
    }

    #[test]
    fn test_sync_preserves_values_and_drops_stale_children() {
        let cash_flow = default_template(StatementKind::CashFlow);
        let cash_flow = tree::map_subtree(&cash_flow, CFS_WORKING_CAPITAL, |mut r| {
            r.children = vec![
                Row::input("wc_ca_accounts_receivable", "Change in AR").with_value("2023A", -5.0),
                Row::input("wc_ca_deferred_costs", "Change in Deferred Costs"),
            ];
            r
        });

        let synced = sync_working_capital(&cash_flow, &balance_sheet());
        let wc = tree::find_row(&synced, CFS_WORKING_CAPITAL).unwrap();
        let ids: Vec<&str> = wc.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["wc_ca_accounts_receivable", "wc_ca_inventory", "wc_cl_accounts_payable"]
        );
        assert_eq!(wc.children[0].value("2023A"), Some(-5.0));
        assert_eq!(wc.children[0].label, "Change in Accounts Receivable");
    }

    #[test]
    fn test_attribution_avoids_double_counting() {
        let is_rows = vec![
            Row::input("cogs", "COGS"),
            Row::new(SGA, "SG&A", crate::schema::RowKind::Calc).with_children(vec![
                Row::input("sga_sales", "Sales"),
                Row::input("sga_rnd", "R&D"),
            ]),
        ];
        let mut table: AttributionTable = BTreeMap::new();
        let mut put = |id: &str, v: f64| {
            table
                .entry(id.to_string())
                .or_default()
                .insert("2024A".to_string(), v);
        };
        put("cogs", 2.0);
        put(SGA, 100.0);
        put("sga_sales", 3.0);
        put("sga_rnd", 5.0);

        assert_eq!(attributed_total(&table, &is_rows, "2024A"), 10.0);
        assert_eq!(attributed_total(&table, &is_rows, "2025E"), 0.0);
    }
}
