use std::sync::Arc;
use tracing::error;
use warp::http::StatusCode;
use warp::reply::{json, with_status};
use warp::{Rejection, Reply};

use super::rejection::{ApiError, Operation, TaskFailed};
use super::{DeactivationResponse, HealthStatus};
use crate::catalog;
use crate::gating::registry::{Manifest, ModuleRegistry};
use crate::license::{InstallRequest, LicenseError, LicenseService, TrialRequest};

/// Run a service call on the blocking pool; SQLite I/O stays off the async workers
pub(super) async fn blocking<T, F>(
    operation: Operation,
    service: Arc<LicenseService>,
    call: F,
) -> Result<T, Rejection>
where
    T: Send + 'static,
    F: FnOnce(&LicenseService) -> Result<T, LicenseError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || call(&service)).await {
        Ok(result) => result.map_err(ApiError::reject(operation)),
        Err(err) => {
            error!(operation = ?operation, error = %err, "service task failed");
            Err(warp::reject::custom(TaskFailed(operation)))
        }
    }
}

pub fn health() -> impl Reply {
    json(&HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn list_modules(service: Arc<LicenseService>) -> Result<impl Reply, Rejection> {
    let modules = blocking(Operation::ListModules, service, |s| s.list_modules()).await?;
    Ok(json(&modules))
}

pub async fn list_installed(service: Arc<LicenseService>) -> Result<impl Reply, Rejection> {
    let installed = blocking(Operation::ListInstalled, service, |s| s.list_installed()).await?;
    Ok(json(&installed))
}

/// Stored catalog entries first, then registry entries not already present
pub async fn manifest(
    service: Arc<LicenseService>,
    registry: Arc<ModuleRegistry>,
) -> Result<impl Reply, Rejection> {
    let stored = blocking(Operation::Manifest, service, |s| {
        Ok(s.store().list_active_modules()?)
    })
    .await?;

    Ok(json(&Manifest {
        modules: catalog::merge_manifest(&stored, registry.all()),
    }))
}

pub async fn install(
    request: InstallRequest,
    service: Arc<LicenseService>,
) -> Result<impl Reply, Rejection> {
    let details = blocking(Operation::Install, service, move |s| s.install(request)).await?;
    Ok(with_status(json(&details), StatusCode::CREATED))
}

pub async fn start_trial(
    request: TrialRequest,
    service: Arc<LicenseService>,
) -> Result<impl Reply, Rejection> {
    let details =
        blocking(Operation::StartTrial, service, move |s| s.start_trial(request)).await?;
    Ok(with_status(json(&details), StatusCode::CREATED))
}

pub async fn check_access(
    module_name: String,
    service: Arc<LicenseService>,
) -> Result<impl Reply, Rejection> {
    let access = blocking(Operation::CheckAccess, service, move |s| {
        s.check_access(&module_name)
    })
    .await?;
    Ok(json(&access))
}

pub async fn deactivate(
    license_id: String,
    service: Arc<LicenseService>,
) -> Result<impl Reply, Rejection> {
    let license = blocking(Operation::Deactivate, service, move |s| {
        s.deactivate(&license_id)
    })
    .await?;

    Ok(json(&DeactivationResponse {
        message: "Module deactivated successfully".to_string(),
        license,
    }))
}
