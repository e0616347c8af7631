/// Module licensing for the laboratory suite
///
/// This module handles all licensing operations including:
/// - License key generation and format checks
/// - Install and trial issuance, deactivation
/// - Entitlement resolution against wall-clock expiry
pub mod entitlement;
pub mod error;
pub mod keys;
pub mod service;
pub mod types;

#[cfg(test)]
mod service_test;

// ============================================================================
// Issuance Constants
// ============================================================================

/// Validity window of an installed (paid) license
pub const INSTALL_DURATION_DAYS: i64 = 365;

/// Seats granted by an installed license
pub const INSTALL_MAX_USERS: u32 = 10;

/// Validity window of a trial license
pub const TRIAL_DURATION_DAYS: i64 = 30;

/// Seats granted by a trial license
pub const TRIAL_MAX_USERS: u32 = 3;

// Re-export main functions and types for convenience
pub use entitlement::{days_remaining, grants_access, resolve_access};
pub use error::LicenseError;
pub use keys::{generate_license_key, generate_trial_license_key, is_valid_license_key};
pub use service::{Clock, LicenseService};
pub use types::{
    FieldError, InstallRequest, InstalledLicense, LicenseDetails, LicenseStatus, Module,
    ModuleAccess, ModuleLicense, ModuleView, TrialRequest,
};
