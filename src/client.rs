/// HTTP client for the module store API
///
/// Used by the gating layer when licenses live on a remote server. Errors
/// returned by the server are surfaced with their message; nothing is retried.
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::api::{DeactivationResponse, HealthStatus};
use crate::gating::registry::Manifest;
use crate::license::{
    FieldError, InstallRequest, InstalledLicense, LicenseDetails, ModuleAccess, ModuleView,
    TrialRequest,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// HTTP status for errors the server answered with
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    #[serde(default)]
    errors: Vec<FieldError>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Client for a server root such as `http://127.0.0.1:5001`
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, token, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        self.send(self.request(Method::GET, &["health"])?).await
    }

    pub async fn list_modules(&self) -> Result<Vec<ModuleView>, ClientError> {
        self.send(self.request(Method::GET, &["api", "modules"])?)
            .await
    }

    pub async fn list_installed(&self) -> Result<Vec<InstalledLicense>, ClientError> {
        self.send(self.request(Method::GET, &["api", "modules", "installed"])?)
            .await
    }

    pub async fn manifest(&self) -> Result<Manifest, ClientError> {
        self.send(self.request(Method::GET, &["api", "modules", "manifest"])?)
            .await
    }

    pub async fn check_access(&self, module_name: &str) -> Result<ModuleAccess, ClientError> {
        self.send(self.request(Method::GET, &["api", "modules", "access", module_name])?)
            .await
    }

    pub async fn install(&self, request: &InstallRequest) -> Result<LicenseDetails, ClientError> {
        let builder = self.request(Method::POST, &["api", "modules", "install"])?;
        self.send(builder.json(request)).await
    }

    pub async fn start_trial(&self, request: &TrialRequest) -> Result<LicenseDetails, ClientError> {
        let builder = self.request(Method::POST, &["api", "modules", "trial"])?;
        self.send(builder.json(request)).await
    }

    pub async fn deactivate(&self, license_id: &str) -> Result<DeactivationResponse, ClientError> {
        self.send(self.request(Method::DELETE, &["api", "modules", license_id])?)
            .await
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);

        let builder = self.http.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Api {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(error), ..
        }) => error,
        Ok(ErrorBody { errors, .. }) if !errors.is_empty() => errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        _ => status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
    }
}
