//! Revenue forecasting.
//!
//! Each [`ProjectionMethod`] variant projects a revenue row over the projection years
//! through [`project_series`]. Methods that only depend on the row's own history and
//! configuration are projected once per recalculation; `pct_of_total` reads another
//! row's value for the same year, so the calculation engine resolves it in dependency
//! order (see [`crate::engine::Formula::PctOf`]).

use crate::engine::{CalculationEngine, RowRef};
use crate::schema::{
    BreakdownLine, GrowthSchedule, ModelState, ProjectionMethod, Row, StatementKind, YearValues,
};
use crate::skeleton::{reconcile_model, REVENUE};
use crate::tree;
use crate::utils::{last_historical_year, prior_year, projection_years};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// What a method may seed from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectionBase {
    /// The row's own value in the last historical year.
    pub last_historic: Option<f64>,
    /// The parent row's value in the last historical year.
    pub parent_last_historic: Option<f64>,
}

impl ProjectionBase {
    fn own_or_parent(&self) -> f64 {
        self.last_historic
            .or(self.parent_last_historic)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionOutput {
    pub values: YearValues,
    /// Per breakdown line, for product-line and channel methods.
    pub lines: BTreeMap<String, YearValues>,
}

/// `seed × Π(1 + g(y)/100)` over `years`, one entry per year.
pub fn compound(seed: f64, growth: &GrowthSchedule, years: &[String]) -> YearValues {
    let mut value = seed;
    years
        .iter()
        .map(|year| {
            value *= 1.0 + growth.rate_for(year) / 100.0;
            (year.clone(), value)
        })
        .collect()
}

fn product(a: &YearValues, b: &YearValues, factor: f64) -> YearValues {
    a.iter()
        .map(|(year, x)| (year.clone(), x * b.get(year).copied().unwrap_or(0.0) * factor))
        .collect()
}

fn project_lines(lines: &[BreakdownLine], stream_base: f64, years: &[String]) -> ProjectionOutput {
    let mut output = ProjectionOutput::default();
    for line in lines {
        let seed = line
            .base_override
            .unwrap_or(stream_base * line.share_pct / 100.0);
        let series = compound(seed, &line.growth, years);
        for (year, value) in &series {
            *output.values.entry(year.clone()).or_insert(0.0) += value;
        }
        output.lines.insert(line.id.clone(), series);
    }
    for year in years {
        output.values.entry(year.clone()).or_insert(0.0);
    }
    output
}

/// Projects a self-contained method. `None` for methods that need another row
/// (`pct_of_total`) and for unsupported methods.
pub fn project_series(
    method: &ProjectionMethod,
    base: &ProjectionBase,
    years: &[String],
) -> Option<ProjectionOutput> {
    let values = match method {
        ProjectionMethod::GrowthRate {
            base_amount,
            allocation_pct,
            growth,
        } => {
            let seed = match (base_amount, allocation_pct) {
                (Some(amount), _) => *amount,
                (None, Some(pct)) => {
                    base.parent_last_historic
                        .or(base.last_historic)
                        .unwrap_or(0.0)
                        * pct
                        / 100.0
                }
                (None, None) => base.own_or_parent(),
            };
            compound(seed, growth, years)
        }
        ProjectionMethod::PriceVolume {
            price,
            volume,
            annualize_monthly,
        } => {
            let factor = if *annualize_monthly { 12.0 } else { 1.0 };
            product(
                &compound(price.base, &price.growth, years),
                &compound(volume.base, &volume.growth, years),
                factor,
            )
        }
        ProjectionMethod::CustomersArpu { customers, arpu } => product(
            &compound(customers.base, &customers.growth, years),
            &compound(arpu.base, &arpu.growth, years),
            1.0,
        ),
        ProjectionMethod::ProductLine { lines } | ProjectionMethod::Channel { lines } => {
            return Some(project_lines(lines, base.own_or_parent(), years));
        }
        ProjectionMethod::PctOfTotal { .. } | ProjectionMethod::Unsupported => return None,
    };
    Some(ProjectionOutput {
        values,
        lines: BTreeMap::new(),
    })
}

/// Ids of the revenue row and all of its descendants.
pub fn revenue_subtree_ids(income_statement: &[Row]) -> HashSet<String> {
    tree::find_row(income_statement, REVENUE)
        .map(|r| tree::collect_ids(std::slice::from_ref(r)))
        .unwrap_or_default()
}

fn base_for(state: &ModelState, row_id: &str) -> ProjectionBase {
    let Some(year) = last_historical_year(&state.meta.years) else {
        return ProjectionBase::default();
    };
    let rows = &state.income_statement;
    let last_historic = tree::find_row(rows, row_id).and_then(|r| r.value(year));
    let parent_last_historic = tree::find_parent_id(rows, row_id)
        .flatten()
        .and_then(|parent| tree::find_row(rows, &parent))
        .and_then(|r| r.value(year));
    ProjectionBase {
        last_historic,
        parent_last_historic,
    }
}

/// Projects every configured revenue row whose method is self-contained.
///
/// Reads last-historical values from `state`, so historical years must already be settled.
pub fn precompute(state: &ModelState) -> BTreeMap<String, ProjectionOutput> {
    let years = projection_years(&state.meta.years);
    let revenue_ids = revenue_subtree_ids(&state.income_statement);
    state
        .revenue_projections
        .iter()
        .filter(|(id, _)| revenue_ids.contains(*id))
        .filter_map(|(id, method)| {
            project_series(method, &base_for(state, id), &years).map(|out| (id.clone(), out))
        })
        .collect()
}

/// The breakdown line a child row is bound to through its parent's configuration.
pub fn bound_line<'a>(state: &'a ModelState, row_id: &str) -> Option<(String, &'a BreakdownLine)> {
    let parent = tree::find_parent_id(&state.income_statement, row_id).flatten()?;
    let lines = state.revenue_projections.get(&parent)?.lines()?;
    lines
        .iter()
        .find(|line| line.id == row_id)
        .map(|line| (parent, line))
}

/// Projection formulas only apply to projection years; a model without any is checked
/// against this label so a cycle is caught before such a year is added.
const UNSCHEDULED_PROJECTION_YEAR: &str = "9999E";

/// If configuring `method` on `row_id` would make the row read itself, the reference
/// id that closes the loop.
///
/// The walk runs over the engine's full dependency table, so loops through named
/// formulas (Gross Profit, EBIT, ...) are found as well as direct references.
pub fn find_reference_cycle(
    state: &ModelState,
    row_id: &str,
    method: &ProjectionMethod,
) -> Option<String> {
    if let ProjectionMethod::PctOfTotal { reference_id, .. } = method {
        if reference_id == row_id {
            return Some(reference_id.clone());
        }
    }

    let mut candidate = state.clone();
    candidate
        .revenue_projections
        .insert(row_id.to_string(), method.clone());
    let candidate = reconcile_model(&candidate);

    let mut years = projection_years(&candidate.meta.years);
    if years.is_empty() {
        years.push(UNSCHEDULED_PROJECTION_YEAR.to_string());
    }
    let engine = CalculationEngine::new(&candidate);
    let target = RowRef::new(StatementKind::IncomeStatement, row_id);
    years
        .iter()
        .find_map(|year| engine.find_cycle(&target, year))
        .map(|reference| reference.id)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionCategory {
    Growth,
    Dollar,
    PctOfStream,
}

pub fn category(method: &ProjectionMethod) -> Option<ProjectionCategory> {
    match method {
        ProjectionMethod::GrowthRate {
            base_amount: Some(_),
            ..
        } => Some(ProjectionCategory::Dollar),
        ProjectionMethod::GrowthRate { .. }
        | ProjectionMethod::ProductLine { .. }
        | ProjectionMethod::Channel { .. } => Some(ProjectionCategory::Growth),
        ProjectionMethod::PriceVolume { .. } | ProjectionMethod::CustomersArpu { .. } => {
            Some(ProjectionCategory::Dollar)
        }
        ProjectionMethod::PctOfTotal { .. } => Some(ProjectionCategory::PctOfStream),
        ProjectionMethod::Unsupported => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixCheck {
    pub stream_id: String,
    pub categories: BTreeSet<ProjectionCategory>,
    pub valid: bool,
}

/// A stream's breakdown may combine at most two projection categories.
pub fn check_projection_mix(state: &ModelState, stream_id: &str) -> MixCheck {
    let categories: BTreeSet<ProjectionCategory> = tree::find_row(&state.income_statement, stream_id)
        .map(|stream| {
            stream
                .children
                .iter()
                .filter_map(|c| state.revenue_projections.get(&c.id))
                .filter_map(category)
                .collect()
        })
        .unwrap_or_default();
    MixCheck {
        stream_id: stream_id.to_string(),
        valid: categories.len() < 3,
        categories,
    }
}

fn growth_between(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some((current / previous - 1.0) * 100.0)
    }
}

/// Year-over-year growth in percent as displayed next to a revenue row.
///
/// Breakdown lines show their configured rate; a parent built from lines shows the
/// growth of the sum of its children so the display matches the build-up.
pub fn year_over_year(state: &ModelState, row_id: &str, year: &str) -> Option<f64> {
    let rows = &state.income_statement;
    let row = tree::find_row(rows, row_id)?;
    let previous = prior_year(&state.meta.years, year)?;
    let projected = crate::utils::is_projection_year(year);

    if projected {
        if let Some((_, line)) = bound_line(state, row_id) {
            return Some(line.growth.rate_for(year));
        }
    }

    let builds_from_lines = state
        .revenue_projections
        .get(row_id)
        .and_then(ProjectionMethod::lines)
        .is_some();
    if builds_from_lines && !row.children.is_empty() {
        let sum = |y: &str| -> f64 { row.children.iter().filter_map(|c| c.value(y)).sum() };
        return growth_between(sum(year), sum(previous));
    }

    growth_between(row.value(year)?, row.value(previous)?)
}
