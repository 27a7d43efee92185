use crate::error::Result;
use crate::model::FinancialModel;
use crate::schema::{ProjectionMethod, Row, StatementKind};
use crate::tree::Direction;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An ordered, replayable list of edits to a model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct ModelCommandLog {
    #[schemars(description = "Commands in the order they are applied. Later commands see the effect of earlier ones.")]
    #[serde(default)]
    pub commands: Vec<ModelCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModelCommand {
    /// Append a breakdown row under an existing row.
    AddChildRow {
        statement: StatementKind,
        parent_id: String,
        label: String,
    },

    /// Insert a top-level row at a position, e.g. inside a balance sheet category block.
    InsertRow {
        statement: StatementKind,
        #[schemars(description = "Zero-based position among the top-level rows; clamped to the end.")]
        index: usize,
        row: Row,
    },

    MoveRow {
        statement: StatementKind,
        row_id: String,
        direction: Direction,
    },

    RemoveRow {
        statement: StatementKind,
        row_id: String,
    },

    RenameRow {
        statement: StatementKind,
        row_id: String,
        label: String,
    },

    /// Enter a value for a row that is not derived in that year.
    SetValue {
        statement: StatementKind,
        row_id: String,
        year: String,
        value: f64,
    },

    /// Replace the model's year labels.
    SetYears { years: Vec<String> },

    SetProjection {
        row_id: String,
        method: ProjectionMethod,
    },

    ClearProjection { row_id: String },

    #[schemars(description = "Stock-based compensation embedded in an income statement category.")]
    SetSbc {
        category_id: String,
        year: String,
        amount: f64,
    },

    #[schemars(description = "Depreciation & amortization embedded in an income statement category.")]
    SetDna {
        category_id: String,
        year: String,
        amount: f64,
    },
}

/// What a command did. Commands that target missing or protected rows are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "row_id", rename_all = "snake_case")]
pub enum CommandOutcome {
    Applied,
    Created(String),
    Ignored,
}

impl From<bool> for CommandOutcome {
    fn from(applied: bool) -> Self {
        if applied {
            CommandOutcome::Applied
        } else {
            CommandOutcome::Ignored
        }
    }
}

impl ModelCommandLog {
    pub fn new(commands: Vec<ModelCommand>) -> Self {
        Self { commands }
    }

    /// Replays the log on a copy of `base`; `base` itself is left untouched.
    pub fn apply(&self, base: &FinancialModel) -> Result<FinancialModel> {
        let mut model = base.clone();
        apply_commands(&mut model, &self.commands)?;
        Ok(model)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = schemars::schema_for!(ModelCommandLog);
        serde_json::to_string_pretty(&schema)
    }
}

pub fn apply_command(model: &mut FinancialModel, command: &ModelCommand) -> Result<CommandOutcome> {
    let outcome = match command {
        ModelCommand::AddChildRow {
            statement,
            parent_id,
            label,
        } => match model.add_child_row(*statement, parent_id, label)? {
            Some(id) => CommandOutcome::Created(id),
            None => CommandOutcome::Ignored,
        },

        ModelCommand::InsertRow {
            statement,
            index,
            row,
        } => CommandOutcome::Created(model.insert_row(*statement, *index, row.clone())),

        ModelCommand::MoveRow {
            statement,
            row_id,
            direction,
        } => model.move_row(*statement, row_id, *direction).into(),

        ModelCommand::RemoveRow { statement, row_id } => model.remove_row(*statement, row_id).into(),

        ModelCommand::RenameRow {
            statement,
            row_id,
            label,
        } => model.rename_row(*statement, row_id, label)?.into(),

        ModelCommand::SetValue {
            statement,
            row_id,
            year,
            value,
        } => model.update_row_value(*statement, row_id, year, *value).into(),

        ModelCommand::SetYears { years } => {
            model.update_years(years)?;
            CommandOutcome::Applied
        }

        ModelCommand::SetProjection { row_id, method } => {
            model.set_revenue_projection(row_id, method.clone())?;
            CommandOutcome::Applied
        }

        ModelCommand::ClearProjection { row_id } => model.clear_revenue_projection(row_id).into(),

        ModelCommand::SetSbc {
            category_id,
            year,
            amount,
        } => model.set_sbc(category_id, year, *amount).into(),

        ModelCommand::SetDna {
            category_id,
            year,
            amount,
        } => model.set_dna(category_id, year, *amount).into(),
    };
    debug!("Applied command {:?}: {:?}", command, outcome);
    Ok(outcome)
}

/// Applies commands in order, stopping at the first error. Commands applied before
/// the error stay applied.
pub fn apply_commands(model: &mut FinancialModel, commands: &[ModelCommand]) -> Result<Vec<CommandOutcome>> {
    commands
        .iter()
        .map(|command| apply_command(model, command))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FinancialModelError;
    use crate::schema::{GrowthSchedule, ModelMeta};
    use crate::skeleton::REVENUE;

    fn model() -> FinancialModel {
        FinancialModel::new(ModelMeta::new(
            "Replay Co",
            vec!["2023A".to_string(), "2024E".to_string()],
        ))
        .unwrap()
    }

    #[test]
    fn test_commands_deserialize_from_tagged_json() {
        let json = r#"{
            "commands": [
                {"action": "add_child_row", "statement": "income_statement", "parent_id": "revenue", "label": "SaaS"},
                {"action": "set_value", "statement": "income_statement", "row_id": "revenue_saas", "year": "2023A", "value": 100.0},
                {"action": "set_projection", "row_id": "revenue_saas", "method": {"method": "growth_rate", "growth": {"rate": 10.0}}}
            ]
        }"#;
        let log: ModelCommandLog = serde_json::from_str(json).unwrap();
        assert_eq!(log.commands.len(), 3);

        let base = model();
        let model = log.apply(&base).unwrap();
        assert!(base.row(StatementKind::IncomeStatement, "revenue_saas").is_none());
        let revenue = model.value(StatementKind::IncomeStatement, REVENUE, "2024E").unwrap();
        assert!((revenue - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_outcomes_report_ignored_commands() {
        let mut m = model();
        let outcomes = apply_commands(
            &mut m,
            &[
                ModelCommand::RemoveRow {
                    statement: StatementKind::IncomeStatement,
                    row_id: REVENUE.to_string(),
                },
                ModelCommand::AddChildRow {
                    statement: StatementKind::IncomeStatement,
                    parent_id: "nope".to_string(),
                    label: "X".to_string(),
                },
                ModelCommand::ClearProjection {
                    row_id: REVENUE.to_string(),
                },
            ],
        )
        .unwrap();
        assert_eq!(outcomes, vec![CommandOutcome::Ignored; 3]);
    }

    #[test]
    fn test_replay_stops_at_first_error() {
        let mut m = model();
        let result = apply_commands(
            &mut m,
            &[
                ModelCommand::SetYears {
                    years: vec!["2023A".to_string(), "2024E".to_string(), "2025E".to_string()],
                },
                ModelCommand::SetProjection {
                    row_id: "tax".to_string(),
                    method: ProjectionMethod::GrowthRate {
                        base_amount: None,
                        allocation_pct: None,
                        growth: GrowthSchedule::constant(1.0),
                    },
                },
                ModelCommand::SetYears { years: vec![] },
            ],
        );
        assert!(matches!(result, Err(FinancialModelError::InvalidProjection { .. })));
        assert_eq!(m.years().len(), 3);
    }

    #[test]
    fn test_command_log_schema() {
        let schema = ModelCommandLog::schema_as_json().unwrap();
        assert!(schema.contains("add_child_row"));
        assert!(schema.contains("set_projection"));
    }
}
