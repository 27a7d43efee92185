//! # Financial Model Builder
//!
//! A library for building linked three-statement financial models: an Income Statement,
//! a Balance Sheet and a Cash Flow Statement kept as trees of labeled rows, with a
//! deterministic recalculation engine that keeps every derived value consistent after
//! each edit.
//!
//! ## Core Concepts
//!
//! - **Rows**: labeled nodes with per-year values. Breaking a row down into children turns
//!   it into the sum of those children.
//! - **Skeleton**: the fixed core rows of each statement (Revenue, EBIT, Total Assets, Net
//!   Change in Cash, ...). They are restored on load and can never be removed.
//! - **Years**: labels such as `2023A` (historical) and `2026E` (projection). Years are
//!   always evaluated in chronological order.
//! - **Cross-statement links**: Net Income flows to the cash flow statement and rolls
//!   Retained Earnings forward; working capital changes come from balance sheet deltas;
//!   cash rolls forward from the net change in cash.
//! - **Revenue projections**: growth, price × volume, customers × ARPU, percent of
//!   another stream, and product-line / channel build-ups.
//!
//! ## Example
//!
//! ```rust,ignore
//! use financial_model_builder::*;
//!
//! let meta = ModelMeta::new("ACME Corp", vec!["2023A".into(), "2024E".into()]);
//! let mut model = FinancialModel::new(meta)?;
//!
//! let saas = model
//!     .add_child_row(StatementKind::IncomeStatement, "revenue", "Subscriptions")?
//!     .unwrap();
//! model.update_row_value(StatementKind::IncomeStatement, &saas, "2023A", 1_000_000.0);
//! model.set_revenue_projection(
//!     &saas,
//!     ProjectionMethod::GrowthRate {
//!         base_amount: None,
//!         allocation_pct: None,
//!         growth: GrowthSchedule::constant(25.0),
//!     },
//! )?;
//!
//! let revenue = model.value(StatementKind::IncomeStatement, "revenue", "2024E");
//! assert_eq!(revenue, Some(1_250_000.0));
//! ```

pub mod balancer;
pub mod commands;
pub mod derivations;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod matching;
pub mod model;
pub mod persistence;
pub mod projection;
pub mod schema;
pub mod skeleton;
pub mod tree;
pub mod utils;
pub mod validation;

pub use balancer::{balance_checks, verify_accounting_equation, AccountingBalancer, BalanceCheck};
pub use commands::{apply_command, apply_commands, CommandOutcome, ModelCommand, ModelCommandLog};
pub use derivations::{expected_working_capital_items, sync_working_capital, WorkingCapitalItem};
pub use engine::{compute_row_value, recalculate, recalculate_from, CalculationEngine, Formula, RowRef};
pub use error::{FinancialModelError, Result};
pub use ingestion::{import_historicals, HistoricalEntry, ImportReport};
pub use matching::{ConceptMatch, ConceptMatcher, KeywordMatcher, NoMatcher};
pub use model::{FinancialModel, ModelDiagnostics};
pub use persistence::{JsonFileStore, MemoryStore, ModelStore, Project};
pub use projection::{
    check_projection_mix, find_reference_cycle, project_series, year_over_year, MixCheck,
    ProjectionBase, ProjectionCategory, ProjectionOutput,
};
pub use schema::*;
pub use skeleton::{default_template, protected_ids, reconcile_model, reconcile_statement};
pub use tree::Direction;
pub use validation::{ShareCheck, ValidationOutcome, ValidationPolicy};
