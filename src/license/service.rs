/// License service for module issuance and entitlement checks
///
/// Handles the catalog listing with derived install state, paid installs,
/// trials, deactivation and the per-module access check.
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::entitlement::{resolve_access, select_entitling};
use super::error::LicenseError;
use super::keys::{generate_trial_license_key, is_valid_license_key};
use super::types::{
    FieldError, InstallRequest, InstalledLicense, LicenseDetails, LicenseStatus, Module,
    ModuleAccess, ModuleLicense, ModuleView, TrialRequest,
};
use super::{INSTALL_DURATION_DAYS, INSTALL_MAX_USERS, TRIAL_DURATION_DAYS, TRIAL_MAX_USERS};
use crate::catalog;
use crate::store::{Conflict, LicenseStore, StoreError};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

pub struct LicenseService {
    store: Arc<LicenseStore>,
    clock: Clock,
    fallback_modules: Vec<Module>,
}

impl LicenseService {
    /// Create a service over the store using the system clock.
    ///
    /// `fallback_modules` are listed after the stored catalog when no stored
    /// module shares their name or id.
    pub fn new(store: Arc<LicenseStore>, fallback_modules: Vec<Module>) -> Self {
        Self {
            store,
            clock: Arc::new(Utc::now),
            fallback_modules,
        }
    }

    /// Replace the clock, mainly for tests
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<LicenseStore> {
        &self.store
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Active catalog modules with their derived installation state
    pub fn list_modules(&self) -> Result<Vec<ModuleView>, LicenseError> {
        let now = self.now();
        let modules = self.store.list_active_modules()?;

        let mut by_module: HashMap<String, Vec<ModuleLicense>> = HashMap::new();
        for license in self.store.list_licenses()? {
            by_module
                .entry(license.module_id.clone())
                .or_default()
                .push(license);
        }

        let views = modules
            .into_iter()
            .map(|module| {
                let licenses = by_module.get(&module.id).map(Vec::as_slice).unwrap_or(&[]);
                match select_entitling(licenses, now) {
                    Some(license) => ModuleView {
                        is_installed: true,
                        days_remaining: license.days_remaining(now),
                        license_status: Some(license.status),
                        expires_at: Some(license.expires_at),
                        module,
                    },
                    None => ModuleView::uninstalled(module),
                }
            })
            .collect();

        Ok(catalog::merge_fallback(views, &self.fallback_modules))
    }

    /// Every license that currently grants access, joined with its module
    pub fn list_installed(&self) -> Result<Vec<InstalledLicense>, LicenseError> {
        let now = self.now();
        let modules: HashMap<String, Module> = self
            .store
            .list_all_modules()?
            .into_iter()
            .map(|module| (module.id.clone(), module))
            .collect();

        let installed = self
            .store
            .list_licenses()?
            .into_iter()
            .filter(|license| license.grants_access(now))
            .filter_map(|license| {
                let module = modules.get(&license.module_id)?;
                Some(InstalledLicense::join(license, module, now))
            })
            .collect();

        Ok(installed)
    }

    /// Resolve access for a module by name. Unknown modules are simply denied.
    pub fn check_access(&self, module_name: &str) -> Result<ModuleAccess, LicenseError> {
        let now = self.now();
        let Some(module) = self.store.find_module_by_name(module_name)? else {
            return Ok(ModuleAccess::denied());
        };

        let licenses = self.store.licenses_for_module(&module.id)?;
        Ok(resolve_access(&licenses, now))
    }

    /// Install a module with a customer-supplied license key
    pub fn install(&self, request: InstallRequest) -> Result<LicenseDetails, LicenseError> {
        let mut errors = Vec::new();
        if request.module_id.as_deref().map_or(true, str::is_empty) {
            errors.push(FieldError::new("moduleId", "Module ID is required"));
        }
        if request.license_key.as_deref().map_or(true, str::is_empty) {
            errors.push(FieldError::new("licenseKey", "License key is required"));
        }
        validate_contact_email(request.contact_email.as_deref(), &mut errors);
        if !errors.is_empty() {
            return Err(LicenseError::Validation(errors));
        }

        let module_id = request.module_id.unwrap_or_default();
        let license_key = request.license_key.unwrap_or_default();

        let module = self
            .store
            .find_module(&module_id)?
            .ok_or_else(|| LicenseError::ModuleNotFound(module_id.clone()))?;

        if self.store.find_license_by_key(&license_key)?.is_some() {
            warn!(module = %module.name, "rejected install: license key already in use");
            return Err(LicenseError::KeyInUse);
        }

        if !is_valid_license_key(&license_key, &module.name) {
            warn!(module = %module.name, "rejected install: invalid license key format");
            return Err(LicenseError::InvalidKeyFormat);
        }

        let now = self.now();
        let license = ModuleLicense {
            id: Uuid::new_v4().to_string(),
            module_id: module.id.clone(),
            license_key,
            organization_name: request.organization_name,
            contact_email: request.contact_email,
            status: LicenseStatus::Active,
            activated_at: now,
            expires_at: now + Duration::days(INSTALL_DURATION_DAYS),
            max_users: INSTALL_MAX_USERS,
            features: module.features.clone(),
        };

        self.store.insert_license(&license).map_err(issuance_error)?;
        info!(module = %module.name, license_id = %license.id, "installed module license");

        Ok(details(license, module, now))
    }

    /// Start the one trial a module allows
    pub fn start_trial(&self, request: TrialRequest) -> Result<LicenseDetails, LicenseError> {
        let mut errors = Vec::new();
        if request.module_id.as_deref().map_or(true, str::is_empty) {
            errors.push(FieldError::new("moduleId", "Module ID is required"));
        }
        validate_contact_email(request.contact_email.as_deref(), &mut errors);
        if !errors.is_empty() {
            return Err(LicenseError::Validation(errors));
        }

        let module_id = request.module_id.unwrap_or_default();
        let module = self
            .store
            .find_module(&module_id)?
            .ok_or_else(|| LicenseError::ModuleNotFound(module_id.clone()))?;

        if self.store.find_trial(&module.id)?.is_some() {
            warn!(module = %module.name, "rejected trial: trial already started");
            return Err(LicenseError::TrialAlreadyStarted);
        }

        let now = self.now();
        let license = ModuleLicense {
            id: Uuid::new_v4().to_string(),
            module_id: module.id.clone(),
            license_key: generate_trial_license_key(&module.name),
            organization_name: request.organization_name,
            contact_email: request.contact_email,
            status: LicenseStatus::Trial,
            activated_at: now,
            expires_at: now + Duration::days(TRIAL_DURATION_DAYS),
            max_users: TRIAL_MAX_USERS,
            features: module.features.clone(),
        };

        self.store.insert_license(&license).map_err(issuance_error)?;
        info!(module = %module.name, license_id = %license.id, "started module trial");

        Ok(details(license, module, now))
    }

    /// Suspend a license. Suspension is terminal and repeating it is harmless.
    pub fn deactivate(&self, license_id: &str) -> Result<LicenseDetails, LicenseError> {
        let license = self
            .store
            .suspend_license(license_id)?
            .ok_or_else(|| LicenseError::LicenseNotFound(license_id.to_string()))?;

        let module = self
            .store
            .find_module(&license.module_id)?
            .ok_or_else(|| LicenseError::ModuleNotFound(license.module_id.clone()))?;

        info!(module = %module.name, license_id, "deactivated module license");
        Ok(details(license, module, self.now()))
    }
}

fn validate_contact_email(email: Option<&str>, errors: &mut Vec<FieldError>) {
    if let Some(email) = email {
        if !EMAIL_RE.is_match(email) {
            errors.push(FieldError::new(
                "contactEmail",
                "Contact email must be a valid email address",
            ));
        }
    }
}

fn issuance_error(err: StoreError) -> LicenseError {
    match err {
        StoreError::Conflict(Conflict::LicenseKey) => LicenseError::KeyInUse,
        StoreError::Conflict(Conflict::ModuleTrial) => LicenseError::TrialAlreadyStarted,
        other => LicenseError::Storage(other),
    }
}

fn details(license: ModuleLicense, module: Module, now: DateTime<Utc>) -> LicenseDetails {
    LicenseDetails {
        days_remaining: license.days_remaining(now),
        license,
        module,
    }
}
