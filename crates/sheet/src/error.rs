use sheetstore_primitives::AddressError;
use thiserror::Error;

/// Errors that can occur during sheet operations
#[derive(Error, Debug)]
pub enum SheetError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Sheet not found: {name}")]
    SheetNotFound { name: String },

    #[error("Sheet already exists: {name}")]
    SheetAlreadyExists { name: String },

    #[error("Unreadable workbook: {0}")]
    Decode(String),

    #[error("Failed to encode workbook: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, SheetError>;
