//! Public entry point: fetch one resource through whichever endpoint the
//! admission controller grants.

use crate::admission::{Admission, AdmissionController, AdmissionSettings, AdmissionToken, Rejection};
use crate::config::{Config, StoreConnectionParams};
use crate::config_validator::ConfigValidator;
use crate::endpoint::EndpointSet;
use crate::error::{ErrorResponse, ThrottlerError, ThrottlerResult};
use crate::redis_store::RedisStore;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches resources by id while staying inside every endpoint's quota.
pub struct PostFetcher {
    admission: Arc<AdmissionController>,
    http: reqwest::Client,
}

impl PostFetcher {
    pub fn new(admission: Arc<AdmissionController>, timeout: Duration) -> ThrottlerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ThrottlerError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(admission, http))
    }

    pub fn with_client(admission: Arc<AdmissionController>, http: reqwest::Client) -> Self {
        Self { admission, http }
    }

    /// Validate `config`, connect to its Redis store and build a fetcher.
    pub async fn from_config(config: &Config) -> ThrottlerResult<Self> {
        ConfigValidator::validate_config(config)?;

        let store = RedisStore::from_params(&config.store_params()).await?;
        let admission = AdmissionController::new(
            Arc::new(store),
            config.endpoints.clone(),
            config.admission_settings(),
        );

        Self::new(Arc::new(admission), config.http_timeout())
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Fetch resource `id` and return the raw response body.
    ///
    /// The reservation is released on every exit path, including transport
    /// errors and cancellation of the returned future.
    pub async fn fetch_resource(&self, id: u64) -> ThrottlerResult<String> {
        let token = match self.admission.reserve().await? {
            Admission::Granted(token) => token,
            Admission::Rejected(Rejection::TotalBlockage) => {
                return Err(ThrottlerError::TemporarilyUnavailable);
            }
            Admission::Rejected(Rejection::AllEndpointsSaturated) => {
                return Err(ThrottlerError::RateLimited {
                    retry_after: self.admission.settings().marker_ttl,
                });
            }
        };

        let url = token.endpoint().resource_url(id);
        let guard = ReservationGuard::new(Arc::clone(&self.admission), token);

        debug!(target: "mirror_throttler::fetcher", url = %url, "Fetching resource");
        let outcome = self.get(&url).await;
        guard.release().await;

        match &outcome {
            Ok(body) => info!(
                target: "mirror_throttler::fetcher",
                url = %url,
                bytes = body.len(),
                "Resource fetched"
            ),
            Err(err) => warn!(
                target: "mirror_throttler::fetcher",
                url = %url,
                error = %err,
                "Resource fetch failed"
            ),
        }

        outcome
    }

    async fn get(&self, url: &str) -> ThrottlerResult<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(ThrottlerError::TransportFailure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ThrottlerError::UpstreamError {
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(ThrottlerError::TransportFailure)
    }
}

/// Fetch post `post_id` through the default endpoint set, coordinating with
/// every other caller through the Redis store described by `params`.
pub async fn fetch_resource(post_id: u64, params: &StoreConnectionParams) -> ThrottlerResult<String> {
    let store = RedisStore::from_params(params).await?;
    let admission = AdmissionController::new(
        Arc::new(store),
        EndpointSet::default(),
        AdmissionSettings::default(),
    );

    PostFetcher::new(Arc::new(admission), DEFAULT_HTTP_TIMEOUT)?
        .fetch_resource(post_id)
        .await
}

/// Fetch each id in order and write one result per id to `out`: the body on
/// success, the error as pretty JSON otherwise. Fetch errors are reported,
/// not fatal; only a failing writer stops the run.
pub async fn write_outcomes<W: Write>(
    fetcher: &PostFetcher,
    ids: impl IntoIterator<Item = u64>,
    out: &mut W,
) -> std::io::Result<()> {
    for id in ids {
        match fetcher.fetch_resource(id).await {
            Ok(body) => writeln!(out, "{}", body)?,
            Err(err) => {
                let response = ErrorResponse::from_error(&err);
                writeln!(out, "{}", serde_json::to_string_pretty(&response)?)?;
            }
        }
    }
    Ok(())
}

/// Owns a granted token until it is released.
///
/// Dropping the guard without calling `release` (a cancelled fetch) hands the
/// release to the runtime so the slot is not held until its TTL.
struct ReservationGuard {
    admission: Arc<AdmissionController>,
    token: Option<AdmissionToken>,
}

impl ReservationGuard {
    fn new(admission: Arc<AdmissionController>, token: AdmissionToken) -> Self {
        Self {
            admission,
            token: Some(token),
        }
    }

    async fn release(mut self) {
        if let Some(token) = self.token.take() {
            release_logged(&self.admission, &token).await;
        }
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let admission = Arc::clone(&self.admission);
                handle.spawn(async move {
                    release_logged(&admission, &token).await;
                });
            }
            Err(_) => warn!(
                target: "mirror_throttler::fetcher",
                key = %token.reservation_key(),
                "No runtime to release reservation; it will expire on its own"
            ),
        }
    }
}

async fn release_logged(admission: &AdmissionController, token: &AdmissionToken) {
    if let Err(err) = admission.release(token).await {
        warn!(
            target: "mirror_throttler::fetcher",
            key = %token.reservation_key(),
            error = %err,
            "Failed to release reservation"
        );
    }
}
