//! Suggestions for user-entered row labels.

use crate::schema::{CfsLink, CfsSection, Impact, StatementKind};
use serde::{Deserialize, Serialize};

/// A canonical concept suggested for a free-text label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMatch {
    pub label: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfs_link: Option<CfsLink>,
}

/// Looks up the closest known concept for a label a user typed.
///
/// Consulted only when a custom row is added; a `None` leaves the typed label as is.
pub trait ConceptMatcher {
    fn best_match(&self, statement: StatementKind, label: &str) -> Option<ConceptMatch>;
}

/// Never suggests anything.
pub struct NoMatcher;

impl ConceptMatcher for NoMatcher {
    fn best_match(&self, _statement: StatementKind, _label: &str) -> Option<ConceptMatch> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct Concept {
    statement: StatementKind,
    keywords: &'static [&'static str],
    label: &'static str,
    description: &'static str,
    cfs_link: Option<(CfsSection, Impact)>,
}

use CfsSection::{Financing, Investing, Operating};
use StatementKind::{BalanceSheet, CashFlow, IncomeStatement};

static CONCEPTS: &[Concept] = &[
    Concept {
        statement: IncomeStatement,
        keywords: &["r&d", "research", "development"],
        label: "Research & Development",
        description: "Costs of developing new products and improving existing ones",
        cfs_link: None,
    },
    Concept {
        statement: IncomeStatement,
        keywords: &["marketing", "advertising"],
        label: "Sales & Marketing",
        description: "Customer acquisition, advertising and sales team costs",
        cfs_link: None,
    },
    Concept {
        statement: IncomeStatement,
        keywords: &["g&a", "general", "administrative", "admin"],
        label: "General & Administrative",
        description: "Corporate overhead such as finance, legal and HR",
        cfs_link: None,
    },
    Concept {
        statement: IncomeStatement,
        keywords: &["subscription", "saas", "recurring"],
        label: "Subscription Revenue",
        description: "Recurring revenue from subscriptions",
        cfs_link: None,
    },
    Concept {
        statement: IncomeStatement,
        keywords: &["consulting", "professional services", "services"],
        label: "Services Revenue",
        description: "Revenue from professional services and implementation",
        cfs_link: None,
    },
    Concept {
        statement: BalanceSheet,
        keywords: &["receivable", "a/r"],
        label: "Accounts Receivable",
        description: "Amounts owed by customers for goods or services delivered",
        cfs_link: Some((Operating, Impact::Negative)),
    },
    Concept {
        statement: BalanceSheet,
        keywords: &["inventory", "stock on hand"],
        label: "Inventory",
        description: "Goods held for sale or materials for production",
        cfs_link: Some((Operating, Impact::Negative)),
    },
    Concept {
        statement: BalanceSheet,
        keywords: &["prepaid"],
        label: "Prepaid Expenses",
        description: "Expenses paid in advance of the period they relate to",
        cfs_link: Some((Operating, Impact::Negative)),
    },
    Concept {
        statement: BalanceSheet,
        keywords: &["payable", "a/p"],
        label: "Accounts Payable",
        description: "Amounts owed to suppliers",
        cfs_link: Some((Operating, Impact::Positive)),
    },
    Concept {
        statement: BalanceSheet,
        keywords: &["accrued", "accrual"],
        label: "Accrued Liabilities",
        description: "Expenses incurred but not yet paid",
        cfs_link: Some((Operating, Impact::Positive)),
    },
    Concept {
        statement: BalanceSheet,
        keywords: &["deferred revenue", "unearned"],
        label: "Deferred Revenue",
        description: "Cash received for revenue not yet recognized",
        cfs_link: Some((Operating, Impact::Positive)),
    },
    Concept {
        statement: BalanceSheet,
        keywords: &["loan", "debt", "borrowing", "note payable"],
        label: "Debt",
        description: "Interest-bearing borrowings",
        cfs_link: Some((Financing, Impact::Positive)),
    },
    Concept {
        statement: BalanceSheet,
        keywords: &["equipment", "property", "ppe", "plant"],
        label: "Property, Plant & Equipment",
        description: "Long-lived tangible assets used in operations",
        cfs_link: Some((Investing, Impact::Negative)),
    },
    Concept {
        statement: CashFlow,
        keywords: &["acquisition", "acquired"],
        label: "Acquisitions",
        description: "Cash paid for acquired businesses",
        cfs_link: Some((Investing, Impact::Negative)),
    },
    Concept {
        statement: CashFlow,
        keywords: &["buyback", "repurchase"],
        label: "Share Repurchases",
        description: "Cash returned to shareholders by buying back shares",
        cfs_link: Some((Financing, Impact::Negative)),
    },
];

/// Case-insensitive keyword lookup over a built-in concept dictionary.
/// The longest matching keyword wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordMatcher;

impl ConceptMatcher for KeywordMatcher {
    fn best_match(&self, statement: StatementKind, label: &str) -> Option<ConceptMatch> {
        let needle = label.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        CONCEPTS
            .iter()
            .filter(|c| c.statement == statement)
            .filter_map(|c| {
                c.keywords
                    .iter()
                    .filter(|k| needle.contains(**k))
                    .map(|k| k.len())
                    .max()
                    .map(|len| (len, c))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, c)| ConceptMatch {
                label: c.label.to_string(),
                description: c.description.to_string(),
                cfs_link: c
                    .cfs_link
                    .map(|(section, impact)| CfsLink::new(section, impact)),
            })
    }
}
