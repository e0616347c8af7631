/// License type definitions for the module store
///
/// Defines the catalog entry, the persisted license row, and the derived views
/// the HTTP layer and the gating layer exchange.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entitlement;

/// Stored license status.
///
/// `Expired` is never written by the service; expiry is derived from
/// `expires_at` at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LicenseStatus {
    /// Paid license
    Active,
    /// Time-limited free license
    Trial,
    /// Explicitly expired (only ever set externally)
    Expired,
    /// Manually deactivated, terminal
    Suspended,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Trial => "TRIAL",
            Self::Expired => "EXPIRED",
            Self::Suspended => "SUSPENDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "TRIAL" => Some(Self::Trial),
            "EXPIRED" => Some(Self::Expired),
            "SUSPENDED" => Some(Self::Suspended),
            _ => None,
        }
    }

    /// Whether a row with this status can grant access at all.
    pub fn is_entitling(&self) -> bool {
        matches!(self, Self::Active | Self::Trial)
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An installable feature unit from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    /// Unique, stable identifier such as `analytics-pro`
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub category: String,
    pub price: f64,
    pub features: Vec<String>,
    pub is_active: bool,
}

/// A license row granting a module to an organization for a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLicense {
    pub id: String,
    pub module_id: String,
    pub license_key: String,
    pub organization_name: Option<String>,
    pub contact_email: Option<String>,
    pub status: LicenseStatus,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_users: u32,
    pub features: Vec<String>,
}

impl ModuleLicense {
    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        entitlement::grants_access(self.status, self.expires_at, now)
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        entitlement::days_remaining(self.expires_at, now)
    }
}

/// Catalog entry with its derived installation state (`GET /modules`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleView {
    #[serde(flatten)]
    pub module: Module,
    pub is_installed: bool,
    pub days_remaining: i64,
    pub license_status: Option<LicenseStatus>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ModuleView {
    /// A catalog entry with no usable license.
    pub fn uninstalled(module: Module) -> Self {
        Self {
            module,
            is_installed: false,
            days_remaining: 0,
            license_status: None,
            expires_at: None,
        }
    }
}

/// An entitling license joined with its module's display fields
/// (`GET /modules/installed`).
///
/// `id` is the license id; the module is referenced by `module_id` and `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledLicense {
    pub id: String,
    pub license_key: String,
    pub status: LicenseStatus,
    pub expires_at: DateTime<Utc>,
    pub days_remaining: i64,
    pub organization_name: Option<String>,
    pub max_users: u32,
    pub activated_at: DateTime<Utc>,

    pub module_id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub category: String,
    pub price: f64,
    pub features: Vec<String>,
}

impl InstalledLicense {
    pub fn join(license: ModuleLicense, module: &Module, now: DateTime<Utc>) -> Self {
        let days_remaining = license.days_remaining(now);
        let features = if license.features.is_empty() {
            module.features.clone()
        } else {
            license.features
        };

        Self {
            id: license.id,
            license_key: license.license_key,
            status: license.status,
            expires_at: license.expires_at,
            days_remaining,
            organization_name: license.organization_name,
            max_users: license.max_users,
            activated_at: license.activated_at,
            module_id: module.id.clone(),
            name: module.name.clone(),
            display_name: module.display_name.clone(),
            description: module.description.clone(),
            version: module.version.clone(),
            author: module.author.clone(),
            category: module.category.clone(),
            price: module.price,
            features,
        }
    }

    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        entitlement::grants_access(self.status, self.expires_at, now)
    }
}

/// A license together with the module it belongs to.
///
/// Returned by install, trial and deactivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseDetails {
    #[serde(flatten)]
    pub license: ModuleLicense,
    pub module: Module,
    pub days_remaining: i64,
}

/// Result of an access check (`GET /modules/access/:moduleName`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAccess {
    pub has_access: bool,
    pub days_remaining: i64,
    pub status: Option<LicenseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

impl ModuleAccess {
    pub fn denied() -> Self {
        Self {
            has_access: false,
            days_remaining: 0,
            status: None,
            expires_at: None,
            features: None,
        }
    }
}

/// Body of `POST /modules/install`
///
/// Required fields are optional here so missing values surface as field
/// errors instead of a body parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    #[serde(default)]
    pub module_id: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

/// Body of `POST /modules/trial`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRequest {
    #[serde(default)]
    pub module_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

/// A single rejected request field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_license(status: LicenseStatus, expires_in: Duration) -> ModuleLicense {
        let now = Utc::now();
        ModuleLicense {
            id: "lic-1".to_string(),
            module_id: "mod-1".to_string(),
            license_key: "ANA-TEST-KEY-0000000000".to_string(),
            organization_name: Some("Central Lab".to_string()),
            contact_email: None,
            status,
            activated_at: now,
            expires_at: now + expires_in,
            max_users: 10,
            features: vec!["KPI Tracking".to_string()],
        }
    }

    #[test]
    fn test_license_status_serialization() {
        let json = serde_json::to_string(&LicenseStatus::Active).unwrap();
        assert_eq!(json, "\"ACTIVE\"");

        let json = serde_json::to_string(&LicenseStatus::Suspended).unwrap();
        assert_eq!(json, "\"SUSPENDED\"");

        let trial: LicenseStatus = serde_json::from_str("\"TRIAL\"").unwrap();
        assert_eq!(trial, LicenseStatus::Trial);

        assert!(serde_json::from_str::<LicenseStatus>("\"trial\"").is_err());
    }

    #[test]
    fn test_license_status_parse_matches_as_str() {
        for status in [
            LicenseStatus::Active,
            LicenseStatus::Trial,
            LicenseStatus::Expired,
            LicenseStatus::Suspended,
        ] {
            assert_eq!(LicenseStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LicenseStatus::parse("PAID"), None);
    }

    #[test]
    fn test_only_active_and_trial_are_entitling() {
        assert!(LicenseStatus::Active.is_entitling());
        assert!(LicenseStatus::Trial.is_entitling());
        assert!(!LicenseStatus::Expired.is_entitling());
        assert!(!LicenseStatus::Suspended.is_entitling());
    }

    #[test]
    fn test_license_serializes_camel_case() {
        let license = sample_license(LicenseStatus::Trial, Duration::days(30));
        let value = serde_json::to_value(&license).unwrap();

        assert_eq!(value["licenseKey"], "ANA-TEST-KEY-0000000000");
        assert_eq!(value["moduleId"], "mod-1");
        assert_eq!(value["maxUsers"], 10);
        assert_eq!(value["status"], "TRIAL");
        assert!(value["contactEmail"].is_null());
    }

    #[test]
    fn test_access_denied_shape() {
        let value = serde_json::to_value(ModuleAccess::denied()).unwrap();

        assert_eq!(value["hasAccess"], false);
        assert_eq!(value["daysRemaining"], 0);
        assert!(value["status"].is_null());
        assert!(value.get("expiresAt").is_none());
        assert!(value.get("features").is_none());
    }

    #[test]
    fn test_install_request_missing_fields_deserialize() {
        let request: InstallRequest = serde_json::from_str(r#"{"moduleId": "m"}"#).unwrap();
        assert_eq!(request.module_id.as_deref(), Some("m"));
        assert!(request.license_key.is_none());
    }

    #[test]
    fn test_installed_license_falls_back_to_module_features() {
        let mut license = sample_license(LicenseStatus::Active, Duration::days(2));
        license.features.clear();
        let module = Module {
            id: "mod-1".to_string(),
            name: "analytics-pro".to_string(),
            display_name: "Analytics Pro".to_string(),
            description: String::new(),
            version: "3.0.0".to_string(),
            author: "SIL Lab Systems".to_string(),
            category: "analytics".to_string(),
            price: 399.99,
            features: vec!["Custom Dashboards".to_string()],
            is_active: true,
        };

        let installed = InstalledLicense::join(license, &module, Utc::now());
        assert_eq!(installed.name, "analytics-pro");
        assert_eq!(installed.features, vec!["Custom Dashboards"]);
        assert_eq!(installed.days_remaining, 2);
    }
}
