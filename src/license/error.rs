use thiserror::Error;

use super::types::FieldError;
use crate::store::StoreError;

/// License issuance and lookup errors
#[derive(Error, Debug)]
pub enum LicenseError {
    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    #[error("Module not found")]
    ModuleNotFound(String),

    #[error("License not found")]
    LicenseNotFound(String),

    #[error("License key already in use")]
    KeyInUse,

    #[error("Invalid license key format")]
    InvalidKeyFormat,

    #[error("Trial already started for this module")]
    TrialAlreadyStarted,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
