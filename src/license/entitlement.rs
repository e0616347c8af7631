//! Entitlement rules shared by the server resolver and the gating layer.
//!
//! A license grants access when its stored status is ACTIVE or TRIAL and its
//! expiry has not passed. Expiry is never written back to storage.

use chrono::{DateTime, Utc};

use super::types::{LicenseStatus, ModuleAccess, ModuleLicense};

/// Milliseconds in one day.
pub const DAY_MS: i64 = 86_400_000;

/// The single accessibility predicate.
pub fn grants_access(status: LicenseStatus, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    status.is_entitling() && expires_at >= now
}

/// Whole days left before `expires_at`, rounded up, never negative.
///
/// One millisecond left still counts as a day.
pub fn days_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let remaining_ms = (expires_at - now).num_milliseconds();
    if remaining_ms <= 0 {
        return 0;
    }
    (remaining_ms + DAY_MS - 1) / DAY_MS
}

/// Pick the license that currently entitles its module.
///
/// When several qualify, the one expiring last wins.
pub fn select_entitling<'a, I>(licenses: I, now: DateTime<Utc>) -> Option<&'a ModuleLicense>
where
    I: IntoIterator<Item = &'a ModuleLicense>,
{
    licenses
        .into_iter()
        .filter(|license| license.grants_access(now))
        .max_by_key(|license| license.expires_at)
}

/// Resolve the access answer for one module's licenses.
pub fn resolve_access(licenses: &[ModuleLicense], now: DateTime<Utc>) -> ModuleAccess {
    match select_entitling(licenses, now) {
        Some(license) => ModuleAccess {
            has_access: true,
            days_remaining: license.days_remaining(now),
            status: Some(license.status),
            expires_at: Some(license.expires_at),
            features: Some(license.features.clone()),
        },
        None => ModuleAccess::denied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn license(id: &str, status: LicenseStatus, expires_at: DateTime<Utc>) -> ModuleLicense {
        ModuleLicense {
            id: id.to_string(),
            module_id: "mod-analytics".to_string(),
            license_key: format!("ANA-{}-000000000000000", id),
            organization_name: None,
            contact_email: None,
            status,
            activated_at: fixed_now() - Duration::days(1),
            expires_at,
            max_users: 10,
            features: vec!["KPI Tracking".to_string()],
        }
    }

    #[test]
    fn test_days_remaining_ceiling() {
        let now = fixed_now();

        assert_eq!(days_remaining(now + Duration::hours(48), now), 2);
        assert_eq!(days_remaining(now + Duration::seconds(1), now), 1);
        assert_eq!(days_remaining(now + Duration::milliseconds(1), now), 1);
        assert_eq!(days_remaining(now + Duration::hours(49), now), 3);
        assert_eq!(days_remaining(now + Duration::days(365), now), 365);
    }

    #[test]
    fn test_days_remaining_never_negative() {
        let now = fixed_now();

        assert_eq!(days_remaining(now, now), 0);
        assert_eq!(days_remaining(now - Duration::days(3), now), 0);
    }

    #[test]
    fn test_grants_access_boundary_is_inclusive() {
        let now = fixed_now();

        assert!(grants_access(LicenseStatus::Active, now, now));
        assert!(!grants_access(
            LicenseStatus::Active,
            now - Duration::milliseconds(1),
            now
        ));
    }

    #[test]
    fn test_suspended_never_grants_access() {
        let now = fixed_now();
        assert!(!grants_access(
            LicenseStatus::Suspended,
            now + Duration::days(100),
            now
        ));
        assert!(!grants_access(
            LicenseStatus::Expired,
            now + Duration::days(100),
            now
        ));
    }

    #[test]
    fn test_resolve_access_without_licenses() {
        let access = resolve_access(&[], fixed_now());
        assert_eq!(access, ModuleAccess::denied());
    }

    #[test]
    fn test_resolve_access_ignores_lapsed_active_license() {
        let now = fixed_now();
        let lapsed = license("old", LicenseStatus::Active, now - Duration::days(1));

        let access = resolve_access(&[lapsed.clone()], now);
        assert!(!access.has_access);
        // Stored status is untouched
        assert_eq!(lapsed.status, LicenseStatus::Active);
    }

    #[test]
    fn test_resolve_access_prefers_latest_expiry() {
        let now = fixed_now();
        let trial = license("trial", LicenseStatus::Trial, now + Duration::days(10));
        let paid = license("paid", LicenseStatus::Active, now + Duration::days(200));
        let suspended = license("gone", LicenseStatus::Suspended, now + Duration::days(900));

        let access = resolve_access(&[trial, paid, suspended], now);
        assert!(access.has_access);
        assert_eq!(access.status, Some(LicenseStatus::Active));
        assert_eq!(access.days_remaining, 200);
        assert_eq!(access.expires_at, Some(now + Duration::days(200)));
        assert_eq!(access.features, Some(vec!["KPI Tracking".to_string()]));
    }
}
