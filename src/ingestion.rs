use crate::error::Result;
use crate::model::FinancialModel;
use crate::schema::{Row, StatementKind};
use crate::tree;
use crate::utils::sort_years;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// One historical figure taken from an external source such as an accounting export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEntry {
    pub statement: StatementKind,
    /// Row id, or a row label (case-insensitive) when no id matches.
    pub key: String,
    pub year: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub key: String,
    pub year: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub applied: usize,
    pub years_added: Vec<String>,
    pub skipped: Vec<SkippedEntry>,
}

fn resolve_key(rows: &[Row], key: &str) -> Option<String> {
    if tree::contains(rows, key) {
        return Some(key.to_string());
    }
    let wanted = key.trim().to_lowercase();
    tree::flatten(rows)
        .into_iter()
        .find(|row| row.label.trim().to_lowercase() == wanted)
        .map(|row| row.id.clone())
}

/// Writes historical entries into `model` through the mutation API.
///
/// Years the model does not have yet are added first. Entries that name an unknown row
/// or a row derived in that year are skipped and reported.
pub fn import_historicals(model: &mut FinancialModel, entries: &[HistoricalEntry]) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    let missing: Vec<String> = sort_years(
        &entries
            .iter()
            .map(|e| e.year.clone())
            .filter(|year| !model.years().contains(year))
            .collect::<Vec<_>>(),
    );
    if !missing.is_empty() {
        let mut years = model.years().to_vec();
        years.extend(missing.iter().cloned());
        model.update_years(&years)?;
        report.years_added = missing;
    }

    for entry in entries {
        let skip = |reason: &str| SkippedEntry {
            key: entry.key.clone(),
            year: entry.year.clone(),
            reason: reason.to_string(),
        };
        let Some(row_id) = resolve_key(model.state().statement(entry.statement), &entry.key) else {
            warn!("No {} row matches '{}'", entry.statement, entry.key);
            report.skipped.push(skip("no matching row"));
            continue;
        };
        if model.update_row_value(entry.statement, &row_id, entry.year.trim(), entry.value) {
            report.applied += 1;
        } else {
            report.skipped.push(skip("row is derived in this year"));
        }
    }

    info!(
        "Imported {} historical values ({} skipped, {} years added)",
        report.applied,
        report.skipped.len(),
        report.years_added.len()
    );
    Ok(report)
}
