use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::license::InstalledLicense;

#[derive(Debug, Default)]
struct CacheState {
    licenses: Vec<InstalledLicense>,
    version: u64,
    refreshed_at: Option<DateTime<Utc>>,
    stale: bool,
}

/// Installed licenses as last fetched from the license source.
///
/// `version` increases on every replace; it starts at 0 before the first
/// fetch. The cache is stale until the first fetch and after `invalidate`.
#[derive(Debug)]
pub struct InstalledLicenseCache {
    state: RwLock<CacheState>,
}

impl Default for InstalledLicenseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InstalledLicenseCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                stale: true,
                ..CacheState::default()
            }),
        }
    }

    /// Swap in a fresh fetch and return the new version
    pub fn replace(&self, licenses: Vec<InstalledLicense>, now: DateTime<Utc>) -> u64 {
        let mut state = self.state.write();
        state.licenses = licenses;
        state.version += 1;
        state.refreshed_at = Some(now);
        state.stale = false;
        state.version
    }

    /// Mark the contents as outdated; the next refresh will re-fetch
    pub fn invalidate(&self) {
        self.state.write().stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.state.read().stale
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().refreshed_at
    }

    pub fn licenses(&self) -> Vec<InstalledLicense> {
        self.state.read().licenses.clone()
    }

    /// The license that currently entitles the module, latest expiry first
    pub fn license_for(&self, module_name: &str, now: DateTime<Utc>) -> Option<InstalledLicense> {
        self.state
            .read()
            .licenses
            .iter()
            .filter(|license| license.name == module_name && license.grants_access(now))
            .max_by_key(|license| license.expires_at)
            .cloned()
    }

    pub fn is_accessible(&self, module_name: &str, now: DateTime<Utc>) -> bool {
        self.state
            .read()
            .licenses
            .iter()
            .any(|license| license.name == module_name && license.grants_access(now))
    }
}
