use super::entitlement::DAY_MS;
use super::keys::is_trial_license_key;
use super::*;
use crate::catalog;
use crate::store::LicenseStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// Fixtures
// ============================================================================

/// Manually advanced clock shared with the service under test
#[derive(Clone)]
struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        )))
    }

    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }

    fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }

    fn as_clock(&self) -> Clock {
        let inner = self.0.clone();
        Arc::new(move || *inner.lock())
    }
}

fn setup() -> (LicenseService, TestClock) {
    let store = Arc::new(LicenseStore::open_in_memory().unwrap());
    catalog::seed_catalog(&store).unwrap();
    let clock = TestClock::new();
    let service = LicenseService::new(store, catalog::static_fallback_modules())
        .with_clock(clock.as_clock());
    (service, clock)
}

fn module_id(service: &LicenseService, name: &str) -> String {
    service
        .store()
        .find_module_by_name(name)
        .unwrap()
        .expect("seeded module")
        .id
}

fn install_request(module_id: &str, key: &str) -> InstallRequest {
    InstallRequest {
        module_id: Some(module_id.to_string()),
        license_key: Some(key.to_string()),
        organization_name: Some("Central Lab".to_string()),
        contact_email: Some("admin@central-lab.example".to_string()),
    }
}

fn trial_request(module_id: &str) -> TrialRequest {
    TrialRequest {
        module_id: Some(module_id.to_string()),
        organization_name: None,
        contact_email: None,
    }
}

const ANALYTICS_KEY: &str = "ANA-1234-5678-9ABC-DEF0";

// ============================================================================
// Access
// ============================================================================

#[test]
fn test_access_without_license_is_denied() {
    let (service, _) = setup();

    let access = service.check_access("analytics-pro").unwrap();
    assert_eq!(access, ModuleAccess::denied());
}

#[test]
fn test_access_for_unknown_module_is_denied() {
    let (service, _) = setup();

    let access = service.check_access("does-not-exist").unwrap();
    assert!(!access.has_access);
    assert_eq!(access.days_remaining, 0);
    assert!(access.status.is_none());
}

#[test]
fn test_access_after_install() {
    let (service, clock) = setup();
    let id = module_id(&service, "analytics-pro");
    service.install(install_request(&id, ANALYTICS_KEY)).unwrap();

    let access = service.check_access("analytics-pro").unwrap();
    assert!(access.has_access);
    assert_eq!(access.status, Some(LicenseStatus::Active));
    assert_eq!(access.days_remaining, 365);
    assert_eq!(access.expires_at, Some(clock.now() + Duration::days(365)));
    assert_eq!(access.features.map(|f| f.len()), Some(8));
}

#[test]
fn test_access_at_expiry_instant_is_still_granted() {
    let (service, clock) = setup();
    let id = module_id(&service, "analytics-pro");
    service.install(install_request(&id, ANALYTICS_KEY)).unwrap();

    clock.advance(Duration::days(365));
    let access = service.check_access("analytics-pro").unwrap();
    assert!(access.has_access);
    assert_eq!(access.days_remaining, 0);

    clock.advance(Duration::milliseconds(1));
    assert!(!service.check_access("analytics-pro").unwrap().has_access);
}

#[test]
fn test_lapsed_active_license_is_excluded_everywhere() {
    let (service, clock) = setup();
    let id = module_id(&service, "analytics-pro");
    let installed = service.install(install_request(&id, ANALYTICS_KEY)).unwrap();

    clock.advance(Duration::days(366));

    assert!(!service.check_access("analytics-pro").unwrap().has_access);
    assert!(service.list_installed().unwrap().is_empty());
    let view = service
        .list_modules()
        .unwrap()
        .into_iter()
        .find(|v| v.module.name == "analytics-pro")
        .unwrap();
    assert!(!view.is_installed);
    assert!(view.license_status.is_none());

    // Stored status is never rewritten
    let stored = service
        .store()
        .find_license(&installed.license.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, LicenseStatus::Active);
}

// ============================================================================
// Install
// ============================================================================

#[test]
fn test_install_creates_active_license() {
    let (service, clock) = setup();
    let id = module_id(&service, "analytics-pro");

    let details = service.install(install_request(&id, ANALYTICS_KEY)).unwrap();

    assert_eq!(details.license.status, LicenseStatus::Active);
    assert_eq!(details.license.module_id, id);
    assert_eq!(details.license.license_key, ANALYTICS_KEY);
    assert_eq!(details.license.max_users, 10);
    assert_eq!(details.license.activated_at, clock.now());
    assert_eq!(
        (details.license.expires_at - details.license.activated_at).num_milliseconds(),
        365 * DAY_MS
    );
    assert_eq!(details.license.features, details.module.features);
    assert_eq!(
        details.license.organization_name.as_deref(),
        Some("Central Lab")
    );
    assert_eq!(details.module.name, "analytics-pro");
    assert_eq!(details.days_remaining, 365);
}

#[test]
fn test_install_reports_missing_fields_together() {
    let (service, _) = setup();

    let err = service.install(InstallRequest::default()).unwrap_err();
    match err {
        LicenseError::Validation(errors) => {
            let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
            assert_eq!(fields, vec!["moduleId", "licenseKey"]);
        }
        other => panic!("Expected validation error, got {:?}", other),
    }
    assert_eq!(service.store().count_licenses().unwrap(), 0);
}

#[test]
fn test_install_rejects_empty_strings_and_bad_email() {
    let (service, _) = setup();
    let request = InstallRequest {
        module_id: Some(String::new()),
        license_key: Some(ANALYTICS_KEY.to_string()),
        organization_name: None,
        contact_email: Some("not-an-email".to_string()),
    };

    let err = service.install(request).unwrap_err();
    match err {
        LicenseError::Validation(errors) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].field, "moduleId");
            assert_eq!(errors[1].field, "contactEmail");
        }
        other => panic!("Expected validation error, got {:?}", other),
    }
}

#[test]
fn test_validation_runs_before_module_lookup() {
    let (service, _) = setup();
    let request = InstallRequest {
        module_id: Some("missing-module".to_string()),
        license_key: None,
        ..InstallRequest::default()
    };

    assert!(matches!(
        service.install(request),
        Err(LicenseError::Validation(_))
    ));
}

#[test]
fn test_install_unknown_module() {
    let (service, _) = setup();

    let err = service
        .install(install_request("missing-module", ANALYTICS_KEY))
        .unwrap_err();
    assert!(matches!(err, LicenseError::ModuleNotFound(_)));
    assert_eq!(err.to_string(), "Module not found");
}

#[test]
fn test_duplicate_key_is_rejected_without_new_row() {
    let (service, _) = setup();
    let id = module_id(&service, "analytics-pro");
    service.install(install_request(&id, ANALYTICS_KEY)).unwrap();

    let err = service
        .install(install_request(&id, ANALYTICS_KEY))
        .unwrap_err();

    assert!(matches!(err, LicenseError::KeyInUse));
    assert_eq!(err.to_string(), "License key already in use");
    assert_eq!(service.store().count_licenses().unwrap(), 1);
}

#[test]
fn test_key_reuse_is_checked_before_format() {
    let (service, _) = setup();
    let analytics = module_id(&service, "analytics-pro");
    let billing = module_id(&service, "billing-manager");
    service
        .install(install_request(&analytics, ANALYTICS_KEY))
        .unwrap();

    // Wrong prefix for billing, but the key is taken first
    let err = service
        .install(install_request(&billing, ANALYTICS_KEY))
        .unwrap_err();
    assert!(matches!(err, LicenseError::KeyInUse));
}

#[test]
fn test_install_rejects_bad_key_format() {
    let (service, _) = setup();
    let id = module_id(&service, "billing-manager");

    for key in ["ANA-1234-5678-9ABC-DEF0", "BIL-SHORT", "bil-1234-5678-9abc-def0"] {
        let err = service.install(install_request(&id, key)).unwrap_err();
        assert!(matches!(err, LicenseError::InvalidKeyFormat), "{}", key);
    }
    assert_eq!(service.store().count_licenses().unwrap(), 0);
}

#[test]
fn test_generated_key_installs() {
    let (service, _) = setup();
    let id = module_id(&service, "quality-control");
    let key = generate_license_key("quality-control");

    let details = service.install(install_request(&id, &key)).unwrap();
    assert_eq!(details.license.license_key, key);
}

// ============================================================================
// Trial
// ============================================================================

#[test]
fn test_trial_creates_limited_license() {
    let (service, _) = setup();
    let id = module_id(&service, "analytics-pro");

    let details = service.start_trial(trial_request(&id)).unwrap();

    assert_eq!(details.license.status, LicenseStatus::Trial);
    assert_eq!(details.license.max_users, 3);
    assert!(details.license.license_key.starts_with("ANA-TRIAL-"));
    assert!(is_trial_license_key(&details.license.license_key));
    assert_eq!(
        (details.license.expires_at - details.license.activated_at).num_milliseconds(),
        30 * DAY_MS
    );
    assert_eq!(details.days_remaining, 30);

    let access = service.check_access("analytics-pro").unwrap();
    assert!(access.has_access);
    assert_eq!(access.status, Some(LicenseStatus::Trial));
}

#[test]
fn test_second_trial_is_rejected() {
    let (service, clock) = setup();
    let id = module_id(&service, "stock-manager");
    service.start_trial(trial_request(&id)).unwrap();

    let err = service.start_trial(trial_request(&id)).unwrap_err();
    assert!(matches!(err, LicenseError::TrialAlreadyStarted));
    assert_eq!(service.store().count_licenses().unwrap(), 1);

    // An expired trial still counts
    clock.advance(Duration::days(45));
    assert!(matches!(
        service.start_trial(trial_request(&id)),
        Err(LicenseError::TrialAlreadyStarted)
    ));
}

#[test]
fn test_trial_requires_module_id() {
    let (service, _) = setup();

    match service.start_trial(TrialRequest::default()).unwrap_err() {
        LicenseError::Validation(errors) => {
            assert_eq!(errors, vec![FieldError::new("moduleId", "Module ID is required")]);
        }
        other => panic!("Expected validation error, got {:?}", other),
    }
}

#[test]
fn test_trial_for_unknown_module() {
    let (service, _) = setup();

    assert!(matches!(
        service.start_trial(trial_request("missing-module")),
        Err(LicenseError::ModuleNotFound(_))
    ));
}

#[test]
fn test_paid_license_wins_over_shorter_trial() {
    let (service, _) = setup();
    let id = module_id(&service, "analytics-pro");
    service.start_trial(trial_request(&id)).unwrap();
    service.install(install_request(&id, ANALYTICS_KEY)).unwrap();

    let access = service.check_access("analytics-pro").unwrap();
    assert_eq!(access.status, Some(LicenseStatus::Active));
    assert_eq!(access.days_remaining, 365);
    assert_eq!(service.list_installed().unwrap().len(), 2);
}

// ============================================================================
// Deactivation
// ============================================================================

#[test]
fn test_deactivate_suspends_and_revokes_access() {
    let (service, _) = setup();
    let id = module_id(&service, "analytics-pro");
    let installed = service.install(install_request(&id, ANALYTICS_KEY)).unwrap();

    let details = service.deactivate(&installed.license.id).unwrap();

    assert_eq!(details.license.status, LicenseStatus::Suspended);
    assert_eq!(details.module.name, "analytics-pro");
    assert!(!service.check_access("analytics-pro").unwrap().has_access);
    assert!(service.list_installed().unwrap().is_empty());
}

#[test]
fn test_deactivate_is_idempotent() {
    let (service, _) = setup();
    let id = module_id(&service, "analytics-pro");
    let trial = service.start_trial(trial_request(&id)).unwrap();

    service.deactivate(&trial.license.id).unwrap();
    let again = service.deactivate(&trial.license.id).unwrap();
    assert_eq!(again.license.status, LicenseStatus::Suspended);
}

#[test]
fn test_deactivate_unknown_license() {
    let (service, _) = setup();

    let err = service.deactivate("no-such-license").unwrap_err();
    assert!(matches!(err, LicenseError::LicenseNotFound(_)));
}

// ============================================================================
// Listings
// ============================================================================

#[test]
fn test_list_modules_marks_installed() {
    let (service, _) = setup();
    let id = module_id(&service, "billing-manager");
    service.start_trial(trial_request(&id)).unwrap();

    let views = service.list_modules().unwrap();
    assert_eq!(views.len(), 5);

    let billing = views
        .iter()
        .find(|v| v.module.name == "billing-manager")
        .unwrap();
    assert!(billing.is_installed);
    assert_eq!(billing.days_remaining, 30);
    assert_eq!(billing.license_status, Some(LicenseStatus::Trial));

    let stock = views
        .iter()
        .find(|v| v.module.name == "stock-manager")
        .unwrap();
    assert!(!stock.is_installed);
    assert!(stock.expires_at.is_none());
}

#[test]
fn test_fallback_listed_when_stored_module_inactive() {
    let (service, _) = setup();
    let id = module_id(&service, "analytics-pro");
    service.store().set_module_active(&id, false).unwrap();

    let views = service.list_modules().unwrap();
    assert_eq!(views.len(), 5);
    let last = views.last().unwrap();
    assert_eq!(last.module.id, "analytics-pro");
    assert_eq!(last.module.price, 0.0);
    assert!(!last.is_installed);
}

#[test]
fn test_list_installed_joins_module_fields() {
    let (service, _) = setup();
    let id = module_id(&service, "analytics-pro");
    let details = service.install(install_request(&id, ANALYTICS_KEY)).unwrap();

    let installed = service.list_installed().unwrap();
    assert_eq!(installed.len(), 1);
    let entry = &installed[0];
    assert_eq!(entry.id, details.license.id);
    assert_eq!(entry.module_id, id);
    assert_eq!(entry.name, "analytics-pro");
    assert_eq!(entry.display_name, "Analytics Pro");
    assert_eq!(entry.days_remaining, 365);
    assert_eq!(entry.max_users, 10);
}

// ============================================================================
// Concurrent issuance
// ============================================================================

const RACERS: usize = 8;

/// Run `issue` on `RACERS` threads released together
fn race<T, F>(issue: F) -> Vec<Result<T, LicenseError>>
where
    T: Send,
    F: Fn() -> Result<T, LicenseError> + Sync,
{
    let barrier = Barrier::new(RACERS);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..RACERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    issue()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_concurrent_trials_issue_exactly_one() {
    let (service, _) = setup();
    let service = Arc::new(service);
    let id = module_id(&service, "stock-manager");

    let results = race(|| service.start_trial(trial_request(&id)));

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LicenseError::TrialAlreadyStarted)));
    assert_eq!(service.store().count_licenses().unwrap(), 1);
}

#[test]
fn test_concurrent_installs_with_one_key_issue_exactly_one() {
    let (service, _) = setup();
    let service = Arc::new(service);
    let id = module_id(&service, "analytics-pro");

    let results = race(|| service.install(install_request(&id, ANALYTICS_KEY)));

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LicenseError::KeyInUse)));
    assert_eq!(service.store().count_licenses().unwrap(), 1);
}
