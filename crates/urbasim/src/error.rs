use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, UrbaSimError>;

#[derive(Debug, Error)]
pub enum UrbaSimError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown scenario: {0}. Must be 'trend', 'stable' or 'reducing'")]
    UnknownScenario(String),

    #[error("Growth rate {rate:.4} exceeds the allowed ceiling {ceiling:.4}")]
    GrowthRateTooHigh { rate: f64, ceiling: f64 },

    #[error("Missing input layer '{name}' at {path}")]
    MissingLayer { name: String, path: PathBuf },

    #[error("Layer '{name}' has shape {got_rows}x{got_cols}, expected {rows}x{cols}")]
    ShapeMismatch {
        name: String,
        rows: usize,
        cols: usize,
        got_rows: usize,
        got_cols: usize,
    },

    #[error("Invalid raster '{name}' at row {row}: {message}")]
    RasterRow {
        name: String,
        row: usize,
        message: String,
    },

    #[error("Invalid CSV Header in {path}: {message}")]
    CsvHeader { path: PathBuf, message: String },

    #[error("Invalid value in {path} at row {row}: {message}")]
    TableRow {
        path: PathBuf,
        row: usize,
        message: String,
    },

    #[error("Malformed distribution for district {district}: {message}")]
    Distribution { district: u32, message: String },

    #[error("History table needs at least two distinct years, got {0}")]
    History(usize),

    #[error("Failed to create directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create file {path}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<toml::de::Error> for UrbaSimError {
    fn from(err: toml::de::Error) -> Self {
        UrbaSimError::Config(format!("TOML parse error: {}", err))
    }
}

impl UrbaSimError {
    /// Errors raised while validating configuration, before any input is read.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            UrbaSimError::Config(_)
                | UrbaSimError::UnknownScenario(_)
                | UrbaSimError::GrowthRateTooHigh { .. }
        )
    }
}
