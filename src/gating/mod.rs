// Client gating - decides which module-contributed routes, menus, widgets and
// quick actions a user sees, from the installed licenses and the user's role.

pub mod cache;
pub mod display;
pub mod registry;


use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::{ApiClient, ClientError};
use crate::license::{
    Clock, InstallRequest, InstalledLicense, LicenseDetails, LicenseError, LicenseService,
    ModuleAccess, TrialRequest,
};

pub use cache::InstalledLicenseCache;
pub use display::{describe_days_remaining, status_tone, StatusTone};
pub use registry::{
    role_allowed, DashboardWidget, MenuItem, ModuleDefinition, ModuleRegistry, ModuleRoute,
    QuickAction, RegistryError,
};

#[derive(Debug, thiserror::Error)]
pub enum GatingError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    License(#[from] LicenseError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Where the gating layer reads licenses from and sends license changes to
#[async_trait]
pub trait LicenseSource: Send + Sync {
    async fn installed_licenses(&self) -> Result<Vec<InstalledLicense>, GatingError>;

    async fn check_access(&self, module_name: &str) -> Result<ModuleAccess, GatingError>;

    async fn install(&self, request: InstallRequest) -> Result<LicenseDetails, GatingError>;

    async fn start_trial(&self, request: TrialRequest) -> Result<LicenseDetails, GatingError>;

    async fn deactivate(&self, license_id: &str) -> Result<LicenseDetails, GatingError>;
}

#[async_trait]
impl LicenseSource for ApiClient {
    async fn installed_licenses(&self) -> Result<Vec<InstalledLicense>, GatingError> {
        Ok(self.list_installed().await?)
    }

    async fn check_access(&self, module_name: &str) -> Result<ModuleAccess, GatingError> {
        Ok(ApiClient::check_access(self, module_name).await?)
    }

    async fn install(&self, request: InstallRequest) -> Result<LicenseDetails, GatingError> {
        Ok(ApiClient::install(self, &request).await?)
    }

    async fn start_trial(&self, request: TrialRequest) -> Result<LicenseDetails, GatingError> {
        Ok(ApiClient::start_trial(self, &request).await?)
    }

    async fn deactivate(&self, license_id: &str) -> Result<LicenseDetails, GatingError> {
        Ok(ApiClient::deactivate(self, license_id).await?.license)
    }
}

/// In-process source, for embedding the store next to the client
#[async_trait]
impl LicenseSource for LicenseService {
    async fn installed_licenses(&self) -> Result<Vec<InstalledLicense>, GatingError> {
        Ok(self.list_installed()?)
    }

    async fn check_access(&self, module_name: &str) -> Result<ModuleAccess, GatingError> {
        Ok(LicenseService::check_access(self, module_name)?)
    }

    async fn install(&self, request: InstallRequest) -> Result<LicenseDetails, GatingError> {
        Ok(LicenseService::install(self, request)?)
    }

    async fn start_trial(&self, request: TrialRequest) -> Result<LicenseDetails, GatingError> {
        Ok(LicenseService::start_trial(self, request)?)
    }

    async fn deactivate(&self, license_id: &str) -> Result<LicenseDetails, GatingError> {
        Ok(LicenseService::deactivate(self, license_id)?)
    }
}

#[async_trait]
impl<T: LicenseSource + ?Sized> LicenseSource for Arc<T> {
    async fn installed_licenses(&self) -> Result<Vec<InstalledLicense>, GatingError> {
        (**self).installed_licenses().await
    }

    async fn check_access(&self, module_name: &str) -> Result<ModuleAccess, GatingError> {
        (**self).check_access(module_name).await
    }

    async fn install(&self, request: InstallRequest) -> Result<LicenseDetails, GatingError> {
        (**self).install(request).await
    }

    async fn start_trial(&self, request: TrialRequest) -> Result<LicenseDetails, GatingError> {
        (**self).start_trial(request).await
    }

    async fn deactivate(&self, license_id: &str) -> Result<LicenseDetails, GatingError> {
        (**self).deactivate(license_id).await
    }
}

/// Registry plus installed-license cache, filtered per role.
///
/// Licenses are matched to registry entries by module name. Accessibility is
/// re-derived on every query with the shared entitlement predicate, so a
/// cached license stops counting the moment it expires.
pub struct GatingLayer<S> {
    source: S,
    registry: ModuleRegistry,
    cache: InstalledLicenseCache,
    clock: Clock,
}

impl<S: LicenseSource> GatingLayer<S> {
    pub fn new(source: S, registry: ModuleRegistry) -> Self {
        Self {
            source,
            registry,
            cache: InstalledLicenseCache::new(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &InstalledLicenseCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Re-fetch installed licenses. Returns the new cache version.
    pub async fn refresh(&self) -> Result<u64, GatingError> {
        let licenses = self.source.installed_licenses().await?;
        let count = licenses.len();
        let version = self.cache.replace(licenses, (self.clock)());
        debug!(version, licenses = count, "refreshed installed licenses");
        Ok(version)
    }

    /// Refresh only when the cache was never filled or has been invalidated
    pub async fn ensure_fresh(&self) -> Result<u64, GatingError> {
        if self.cache.is_stale() {
            return self.refresh().await;
        }
        Ok(self.cache.version())
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn is_module_active(&self, module_name: &str) -> bool {
        self.cache.is_accessible(module_name, (self.clock)())
    }

    pub fn module_license(&self, module_name: &str) -> Option<InstalledLicense> {
        self.cache.license_for(module_name, (self.clock)())
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// Routes whose declaring module is licensed and open to the role
    pub fn filter_routes(&self, candidates: &[ModuleRoute], role: &str) -> Vec<ModuleRoute> {
        candidates
            .iter()
            .filter(|route| {
                self.registry
                    .module_for_route(&route.path)
                    .map_or(false, |module| {
                        self.is_module_active(&module.id) && module.allows_role(role)
                    })
            })
            .cloned()
            .collect()
    }

    pub fn filter_menu_items(&self, candidates: &[MenuItem], role: &str) -> Vec<MenuItem> {
        candidates
            .iter()
            .filter(|item| role_allowed(&item.permissions, role))
            .filter(|item| {
                self.registry
                    .module_for_menu_path(&item.path)
                    .map_or(false, |module| self.is_module_active(&module.id))
            })
            .cloned()
            .collect()
    }

    pub fn filter_dashboard_widgets(
        &self,
        candidates: &[DashboardWidget],
        role: &str,
    ) -> Vec<DashboardWidget> {
        candidates
            .iter()
            .filter(|widget| role_allowed(&widget.permissions, role))
            .filter(|widget| {
                self.registry
                    .module_for_widget(&widget.id)
                    .map_or(false, |module| self.is_module_active(&module.id))
            })
            .cloned()
            .collect()
    }

    pub fn filter_quick_actions(&self, candidates: &[QuickAction], role: &str) -> Vec<QuickAction> {
        candidates
            .iter()
            .filter(|action| role_allowed(&action.permissions, role))
            .filter(|action| {
                self.registry
                    .module_for_action(&action.action)
                    .map_or(false, |module| self.is_module_active(&module.id))
            })
            .cloned()
            .collect()
    }

    pub fn active_routes(&self, role: &str) -> Vec<ModuleRoute> {
        self.filter_routes(&self.registry.routes_for_role(role), role)
    }

    pub fn active_menu_items(&self, role: &str) -> Vec<MenuItem> {
        self.filter_menu_items(&self.registry.menu_items_for_role(role), role)
    }

    pub fn active_dashboard_widgets(&self, role: &str) -> Vec<DashboardWidget> {
        self.filter_dashboard_widgets(&self.registry.dashboard_widgets_for_role(role), role)
    }

    pub fn active_quick_actions(&self, role: &str) -> Vec<QuickAction> {
        self.filter_quick_actions(&self.registry.quick_actions_for_role(role), role)
    }

    // ========================================================================
    // License changes
    // ========================================================================

    /// Install a module and refresh the cache before returning
    pub async fn install(&self, request: InstallRequest) -> Result<LicenseDetails, GatingError> {
        let details = self.source.install(request).await?;
        info!(module = %details.module.name, "module installed, refreshing gating");
        self.refresh_after_change().await?;
        Ok(details)
    }

    pub async fn start_trial(&self, request: TrialRequest) -> Result<LicenseDetails, GatingError> {
        let details = self.source.start_trial(request).await?;
        info!(module = %details.module.name, "trial started, refreshing gating");
        self.refresh_after_change().await?;
        Ok(details)
    }

    pub async fn deactivate(&self, license_id: &str) -> Result<LicenseDetails, GatingError> {
        let details = self.source.deactivate(license_id).await?;
        info!(module = %details.module.name, "module deactivated, refreshing gating");
        self.refresh_after_change().await?;
        Ok(details)
    }

    /// Ask the source directly. A disagreement with the cache triggers a refresh.
    pub async fn verify_access(&self, module_name: &str) -> Result<ModuleAccess, GatingError> {
        let access = self.source.check_access(module_name).await?;
        if access.has_access != self.is_module_active(module_name) {
            debug!(module = module_name, "cached access disagrees with source");
            self.refresh_after_change().await?;
        }
        Ok(access)
    }

    async fn refresh_after_change(&self) -> Result<u64, GatingError> {
        // Stays stale if the fetch fails, so the next ensure_fresh retries
        self.cache.invalidate();
        self.refresh().await
    }
}
