use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Invalid operator data: {0}")]
    InvalidOperatorData(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}
