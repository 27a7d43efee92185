use crate::error::Result;
use crate::utils::validate_fiscal_year_end_month;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Year label -> amount. Percent rows store `75.5` for 75.5%.
pub type YearValues = BTreeMap<String, f64>;

/// Category row id -> year label -> annotated amount.
pub type AttributionTable = BTreeMap<String, YearValues>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    IncomeStatement,
    BalanceSheet,
    CashFlow,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [
        StatementKind::IncomeStatement,
        StatementKind::BalanceSheet,
        StatementKind::CashFlow,
    ];
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::IncomeStatement => "income statement",
            StatementKind::BalanceSheet => "balance sheet",
            StatementKind::CashFlow => "cash flow statement",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    #[schemars(description = "User-entered values")]
    Input,

    #[schemars(description = "Derived each pass, from children or a named formula")]
    Calc,

    #[schemars(description = "Sum of a group of rows inside a section")]
    Subtotal,

    #[schemars(description = "Statement-level aggregate")]
    Total,
}

impl RowKind {
    pub fn is_aggregate(self) -> bool {
        matches!(self, RowKind::Subtotal | RowKind::Total)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Currency,
    Percent,
    Number,
    Text,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CfsSection {
    Operating,
    Investing,
    Financing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Positive,
    Negative,
    Neutral,
    Calculated,
}

/// How a row is treated on the cash flow statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CfsLink {
    pub section: CfsSection,
    pub impact: Impact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CfsLink {
    pub fn new(section: CfsSection, impact: Impact) -> Self {
        Self {
            section,
            impact,
            description: None,
        }
    }
}

/// The income statement row a row is driven by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct IsLink {
    pub row_id: String,
    pub impact: Impact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Row {
    #[schemars(description = "Stable identifier, unique within its statement. Ids prefixed 'total_' are aggregates.")]
    pub id: String,

    pub label: String,

    pub kind: RowKind,

    #[serde(default)]
    pub value_type: ValueType,

    #[serde(default)]
    #[schemars(description = "Year label to value. Derived rows hold the result of the last recalculation.")]
    pub values: YearValues,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Row>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfs_link: Option<CfsLink>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_link: Option<IsLink>,
}

impl Row {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: RowKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            value_type: ValueType::Currency,
            values: BTreeMap::new(),
            children: Vec::new(),
            cfs_link: None,
            is_link: None,
        }
    }

    pub fn input(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, label, RowKind::Input)
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_cfs_link(mut self, link: CfsLink) -> Self {
        self.cfs_link = Some(link);
        self
    }

    pub fn with_is_link(mut self, row_id: impl Into<String>, impact: Impact) -> Self {
        self.is_link = Some(IsLink {
            row_id: row_id.into(),
            impact,
        });
        self
    }

    pub fn with_value(mut self, year: impl Into<String>, value: f64) -> Self {
        self.values.insert(year.into(), value);
        self
    }

    pub fn with_children(mut self, children: Vec<Row>) -> Self {
        self.children = children;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn value(&self, year: &str) -> Option<f64> {
        self.values.get(year).copied()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayUnit {
    #[default]
    Ones,
    Thousands,
    Millions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ModelMeta {
    #[schemars(description = "The legal name of the modeled company")]
    pub company_name: String,

    #[serde(default = "default_currency")]
    #[schemars(description = "ISO currency code. Display only; values are never converted.")]
    pub currency: String,

    #[serde(default)]
    pub unit: DisplayUnit,

    #[serde(default = "default_fiscal_year_end_month")]
    #[schemars(description = "The month when the fiscal year ends (1 = January, 12 = December)")]
    pub fiscal_year_end_month: u32,

    #[schemars(
        description = "Ordered year labels. Labels ending in 'E', 'F' or 'P' are projection years (e.g. '2025E'); anything else is historical (e.g. '2023A')."
    )]
    pub years: Vec<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_fiscal_year_end_month() -> u32 {
    12
}

impl ModelMeta {
    pub fn new(company_name: impl Into<String>, years: Vec<String>) -> Self {
        Self {
            company_name: company_name.into(),
            currency: default_currency(),
            unit: DisplayUnit::default(),
            fiscal_year_end_month: default_fiscal_year_end_month(),
            years,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_fiscal_year_end_month(self.fiscal_year_end_month)
    }
}

/// Growth in percent per year. `per_year` entries override `rate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema, Default)]
pub struct GrowthSchedule {
    #[serde(default)]
    pub rate: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub per_year: YearValues,
}

impl GrowthSchedule {
    pub fn constant(rate: f64) -> Self {
        Self {
            rate,
            per_year: BTreeMap::new(),
        }
    }

    pub fn rate_for(&self, year: &str) -> f64 {
        self.per_year.get(year).copied().unwrap_or(self.rate)
    }
}

/// A quantity that compounds on its own growth schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Driver {
    pub base: f64,
    #[serde(default)]
    pub growth: GrowthSchedule,
}

impl Driver {
    pub fn new(base: f64, growth_rate: f64) -> Self {
        Self {
            base,
            growth: GrowthSchedule::constant(growth_rate),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct BreakdownLine {
    #[schemars(description = "Line id. When it matches a child row of the stream, projected values are written into that row.")]
    pub id: String,
    pub label: String,
    #[schemars(description = "Share of the stream base in percent")]
    pub share_pct: f64,
    #[serde(default)]
    pub growth: GrowthSchedule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_override: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ProjectionMethod {
    #[schemars(description = "Compounds a seed (base amount, or last historic x allocation%) at the growth rate")]
    GrowthRate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_amount: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allocation_pct: Option<f64>,
        #[serde(default)]
        growth: GrowthSchedule,
    },

    PriceVolume {
        price: Driver,
        volume: Driver,
        #[serde(default)]
        annualize_monthly: bool,
    },

    CustomersArpu { customers: Driver, arpu: Driver },

    #[schemars(description = "A percentage of another row (the total revenue or another stream)")]
    PctOfTotal { reference_id: String, pct: f64 },

    ProductLine { lines: Vec<BreakdownLine> },

    Channel { lines: Vec<BreakdownLine> },

    /// A method this build does not know; projects nothing.
    #[serde(other)]
    Unsupported,
}

impl ProjectionMethod {
    pub fn lines(&self) -> Option<&[BreakdownLine]> {
        match self {
            ProjectionMethod::ProductLine { lines } | ProjectionMethod::Channel { lines } => {
                Some(lines)
            }
            _ => None,
        }
    }

    /// Every growth schedule the method carries.
    pub fn schedules_mut(&mut self) -> Vec<&mut GrowthSchedule> {
        match self {
            ProjectionMethod::GrowthRate { growth, .. } => vec![growth],
            ProjectionMethod::PriceVolume { price, volume, .. } => {
                vec![&mut price.growth, &mut volume.growth]
            }
            ProjectionMethod::CustomersArpu { customers, arpu } => {
                vec![&mut customers.growth, &mut arpu.growth]
            }
            ProjectionMethod::ProductLine { lines } | ProjectionMethod::Channel { lines } => {
                lines.iter_mut().map(|line| &mut line.growth).collect()
            }
            ProjectionMethod::PctOfTotal { .. } | ProjectionMethod::Unsupported => Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProjectionMethod::GrowthRate { .. } => "growth_rate",
            ProjectionMethod::PriceVolume { .. } => "price_volume",
            ProjectionMethod::CustomersArpu { .. } => "customers_arpu",
            ProjectionMethod::PctOfTotal { .. } => "pct_of_total",
            ProjectionMethod::ProductLine { .. } => "product_line",
            ProjectionMethod::Channel { .. } => "channel",
            ProjectionMethod::Unsupported => "unsupported",
        }
    }
}

/// Everything a project persists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ModelState {
    pub meta: ModelMeta,

    #[serde(default)]
    pub income_statement: Vec<Row>,

    #[serde(default)]
    pub balance_sheet: Vec<Row>,

    #[serde(default)]
    pub cash_flow: Vec<Row>,

    #[serde(default)]
    #[schemars(description = "Stock-based compensation embedded in expense categories: category row id -> year -> amount")]
    pub sbc: AttributionTable,

    #[serde(default)]
    #[schemars(description = "Depreciation & amortization embedded in expense categories: category row id -> year -> amount")]
    pub dna: AttributionTable,

    #[serde(default)]
    #[schemars(description = "Revenue row id -> forecast method")]
    pub revenue_projections: BTreeMap<String, ProjectionMethod>,
}

impl ModelState {
    pub fn statement(&self, kind: StatementKind) -> &[Row] {
        match kind {
            StatementKind::IncomeStatement => &self.income_statement,
            StatementKind::BalanceSheet => &self.balance_sheet,
            StatementKind::CashFlow => &self.cash_flow,
        }
    }

    pub fn statement_mut(&mut self, kind: StatementKind) -> &mut Vec<Row> {
        match kind {
            StatementKind::IncomeStatement => &mut self.income_statement,
            StatementKind::BalanceSheet => &mut self.balance_sheet,
            StatementKind::CashFlow => &mut self.cash_flow,
        }
    }

    pub fn set_statement(&mut self, kind: StatementKind, rows: Vec<Row>) {
        *self.statement_mut(kind) = rows;
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ModelState)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = ModelState::schema_as_json().unwrap();
        assert!(schema_json.contains("income_statement"));
        assert!(schema_json.contains("revenue_projections"));
        assert!(schema_json.contains("fiscal_year_end_month"));
    }

    #[test]
    fn test_projection_method_tagging() {
        let method = ProjectionMethod::PctOfTotal {
            reference_id: "revenue".to_string(),
            pct: 20.0,
        };
        let json = serde_json::to_string(&method).unwrap();
        assert!(json.contains("\"method\":\"pct_of_total\""));

        let unknown: ProjectionMethod =
            serde_json::from_str(r#"{"method":"seasonal_cohorts"}"#).unwrap();
        assert_eq!(unknown, ProjectionMethod::Unsupported);
    }

    #[test]
    fn test_row_defaults_on_deserialize() {
        let row: Row =
            serde_json::from_str(r#"{"id":"rnd","label":"R&D","kind":"input"}"#).unwrap();
        assert_eq!(row.value_type, ValueType::Currency);
        assert!(row.values.is_empty());
        assert!(row.is_leaf());
    }

    #[test]
    fn test_growth_schedule_per_year_override() {
        let mut growth = GrowthSchedule::constant(10.0);
        growth.per_year.insert("2026E".to_string(), 5.0);
        assert_eq!(growth.rate_for("2025E"), 10.0);
        assert_eq!(growth.rate_for("2026E"), 5.0);
    }
}
