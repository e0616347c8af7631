use serde_json::json;
use std::convert::Infallible;
use tracing::{error, warn};
use warp::http::StatusCode;
use warp::reply::{json, with_status, Response};
use warp::{Rejection, Reply};

use crate::license::LicenseError;

/// Missing or unknown bearer token
#[derive(Debug)]
pub struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Path segment that is not valid percent-encoded UTF-8
#[derive(Debug)]
pub struct InvalidPathSegment;

impl warp::reject::Reject for InvalidPathSegment {}

/// A blocking service call that panicked or was cancelled
#[derive(Debug)]
pub struct TaskFailed(pub Operation);

impl warp::reject::Reject for TaskFailed {}

/// The operation a failed request was performing, for the 500 message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListModules,
    ListInstalled,
    Manifest,
    Install,
    StartTrial,
    CheckAccess,
    Deactivate,
}

impl Operation {
    fn failure_message(&self) -> &'static str {
        match self {
            Self::ListModules => "Failed to fetch modules",
            Self::ListInstalled => "Failed to fetch installed modules",
            Self::Manifest => "Internal server error",
            Self::Install => "Failed to install module",
            Self::StartTrial => "Failed to start trial",
            Self::CheckAccess => "Failed to check module access",
            Self::Deactivate => "Failed to deactivate module",
        }
    }
}

/// A license error raised while serving `operation`
#[derive(Debug)]
pub struct ApiError {
    pub operation: Operation,
    pub error: LicenseError,
}

impl warp::reject::Reject for ApiError {}

impl ApiError {
    pub fn reject(operation: Operation) -> impl Fn(LicenseError) -> Rejection {
        move |error| warp::reject::custom(ApiError { operation, error })
    }

    /// Status code and JSON body for this error
    pub fn to_response(&self) -> Response {
        match &self.error {
            LicenseError::Validation(errors) => {
                with_status(json(&json!({ "errors": errors })), StatusCode::BAD_REQUEST)
                    .into_response()
            }
            LicenseError::ModuleNotFound(_) | LicenseError::LicenseNotFound(_) => {
                error_reply(StatusCode::NOT_FOUND, &self.error.to_string())
            }
            LicenseError::KeyInUse
            | LicenseError::InvalidKeyFormat
            | LicenseError::TrialAlreadyStarted => {
                error_reply(StatusCode::BAD_REQUEST, &self.error.to_string())
            }
            LicenseError::Storage(cause) => {
                error!(operation = ?self.operation, error = %cause, "storage failure");
                error_reply(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    self.operation.failure_message(),
                )
            }
        }
    }
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    with_status(json(&json!({ "error": message })), status).into_response()
}

/// Turn every rejection into a JSON error body
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if let Some(api_error) = err.find::<ApiError>() {
        return Ok(api_error.to_response());
    }

    if let Some(TaskFailed(operation)) = err.find::<TaskFailed>() {
        return Ok(error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            operation.failure_message(),
        ));
    }

    if err.find::<Unauthorized>().is_some() {
        return Ok(error_reply(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    if err.find::<InvalidPathSegment>().is_some() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "Invalid path segment"));
    }

    if err.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "Not found"));
    }

    if let Some(cause) = err.find::<warp::filters::body::BodyDeserializeError>() {
        warn!(error = %cause, "rejected malformed request body");
        return Ok(error_reply(StatusCode::BAD_REQUEST, "Invalid request body"));
    }

    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(error_reply(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"));
    }

    if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        return Ok(error_reply(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected a JSON body",
        ));
    }

    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_reply(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"));
    }

    if err.find::<warp::reject::LengthRequired>().is_some() {
        return Ok(error_reply(StatusCode::LENGTH_REQUIRED, "Content length required"));
    }

    error!(rejection = ?err, "unhandled rejection");
    Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"))
}
