use serde::Serialize;
use std::time::{Duration, Instant, SystemTime};

use crate::admission::{AdmissionController, EndpointUsage};
use crate::endpoint::QuotaBoundary;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: ServiceStatus,
    pub endpoints: Vec<EndpointUsage>,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub quota_boundary: QuotaBoundary,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

pub struct HealthChecker<'a> {
    admission: &'a AdmissionController,
}

impl<'a> HealthChecker<'a> {
    pub fn new(admission: &'a AdmissionController) -> Self {
        Self { admission }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let mut store = self.check_store().await;
        let mut endpoints = Vec::new();
        if store.error.is_none() {
            match self.admission.usage().await {
                Ok(usage) => endpoints = usage,
                Err(err) => {
                    store.status = "unavailable".to_string();
                    store.error = Some(err.to_string());
                }
            }
        }

        // Without the store every fetch fails, so there is no degraded mode.
        let overall_status = if store.error.is_none() { "healthy" } else { "unhealthy" };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            store,
            endpoints,
            window: self.admission.settings().marker_ttl,
            quota_boundary: self.admission.settings().boundary,
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.admission.store().ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ServiceStatus {
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(err) => ServiceStatus {
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some(err.to_string()),
            },
        }
    }
}
