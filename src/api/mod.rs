//! HTTP surface of the module store.
//!
//! Everything under `/api/modules` requires a configured bearer token;
//! `/health` is open.

mod auth;
mod handlers;
mod rejection;


use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, Reply};

use crate::gating::ModuleRegistry;
use crate::license::{InstallRequest, LicenseDetails, LicenseService, TrialRequest};

pub use rejection::{ApiError, Operation};

/// Largest accepted JSON body
const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Body of `DELETE /api/modules/:licenseId`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivationResponse {
    pub message: String,
    pub license: LicenseDetails,
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

/// Shared handles every route needs
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<LicenseService>,
    pub registry: Arc<ModuleRegistry>,
    pub tokens: Arc<Vec<String>>,
}

/// All routes, with error recovery and request logging applied
pub fn routes(state: ApiState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .map(handlers::health);

    health
        .or(module_routes(state))
        .recover(rejection::handle_rejection)
        .with(warp::log::custom(log_request))
}

fn module_routes(
    state: ApiState,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    let list = warp::path::end()
        .and(warp::get())
        .and(with_service(state.service.clone()))
        .and_then(handlers::list_modules);

    let installed = warp::path!("installed")
        .and(warp::get())
        .and(with_service(state.service.clone()))
        .and_then(handlers::list_installed);

    let manifest = warp::path!("manifest")
        .and(warp::get())
        .and(with_service(state.service.clone()))
        .and(with_registry(state.registry.clone()))
        .and_then(handlers::manifest);

    let install = warp::path!("install")
        .and(warp::post())
        .and(json_body::<InstallRequest>())
        .and(with_service(state.service.clone()))
        .and_then(handlers::install);

    let trial = warp::path!("trial")
        .and(warp::post())
        .and(json_body::<TrialRequest>())
        .and(with_service(state.service.clone()))
        .and_then(handlers::start_trial);

    let access = warp::path("access")
        .and(decoded_param())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_service(state.service.clone()))
        .and_then(handlers::check_access);

    let deactivate = decoded_param()
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_service(state.service))
        .and_then(handlers::deactivate);

    warp::path("api")
        .and(warp::path("modules"))
        .and(auth::bearer(state.tokens))
        .and(
            list.or(installed)
                .or(manifest)
                .or(install)
                .or(trial)
                .or(access)
                .or(deactivate),
        )
}

fn with_service(
    service: Arc<LicenseService>,
) -> impl Filter<Extract = (Arc<LicenseService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

fn with_registry(
    registry: Arc<ModuleRegistry>,
) -> impl Filter<Extract = (Arc<ModuleRegistry>,), Error = Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

/// One path segment, percent-decoded
fn decoded_param() -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::path::param::<String>().and_then(|raw: String| async move {
        urlencoding::decode(&raw)
            .map(|decoded| decoded.into_owned())
            .map_err(|_| warp::reject::custom(rejection::InvalidPathSegment))
    })
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn log_request(info: warp::log::Info<'_>) {
    tracing::info!(
        target: "module_store::api",
        method = %info.method(),
        path = info.path(),
        status = info.status().as_u16(),
        elapsed_ms = info.elapsed().as_millis() as u64,
        "request"
    );
}
