use crate::schema::StatementKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinancialModelError {
    #[error("Invalid row label '{0}': label must contain non-whitespace characters")]
    InvalidLabel(String),

    #[error("The {statement} row '{row_id}' is derived by a fixed formula and cannot be broken down")]
    InvalidParent {
        statement: StatementKind,
        row_id: String,
    },

    #[error("Invalid year list: {0}")]
    InvalidYears(String),

    #[error("Invalid projection for row '{row_id}': {details}")]
    InvalidProjection { row_id: String, details: String },

    #[error("Projection for row '{row_id}' references '{reference_id}', which depends on '{row_id}'")]
    ProjectionCycle {
        row_id: String,
        reference_id: String,
    },

    #[error("Value rejected for row '{row_id}': {details}")]
    ValueRejected { row_id: String, details: String },

    #[error("Accounting equation violation in {year}: Assets ({assets}) != Liabilities ({liabilities}) + Equity ({equity}), difference {difference}")]
    AccountingEquationViolation {
        year: String,
        assets: f64,
        liabilities: f64,
        equity: f64,
        difference: f64,
    },

    #[error("Invalid fiscal year end month {0}: must be between 1 and 12")]
    InvalidFiscalYearEndMonth(u32),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FinancialModelError>;
