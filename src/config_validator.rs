use crate::config::{Config, StoreConnectionParams};
use crate::endpoint::EndpointSet;
use crate::error::ThrottlerError;
use std::collections::HashSet;
use validator::Validate;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates where the coordination store lives
    pub fn validate_store_params(params: &StoreConnectionParams) -> Result<(), ThrottlerError> {
        let host = params.host.trim();
        if host.is_empty() {
            return Err(ThrottlerError::ValidationError(
                "Redis host cannot be empty".to_string(),
            ));
        }

        if host.contains(|c: char| c.is_whitespace() || c == '/' || c == '@') {
            return Err(ThrottlerError::ValidationError(format!(
                "Redis host '{}' is not a hostname or IP address",
                params.host
            )));
        }

        if params.port == 0 {
            return Err(ThrottlerError::ValidationError(
                "Redis port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the endpoint list: non-empty, well-formed URLs, positive
    /// quotas and no endpoint listed twice.
    pub fn validate_endpoints(endpoints: &EndpointSet) -> Result<(), ThrottlerError> {
        if endpoints.is_empty() {
            return Err(ThrottlerError::ValidationError(
                "At least one endpoint must be configured".to_string(),
            ));
        }

        endpoints
            .validate()
            .map_err(|e| ThrottlerError::ValidationError(format!("Invalid endpoint: {}", e)))?;

        let mut seen = HashSet::new();
        for endpoint in endpoints {
            if !seen.insert(endpoint.base()) {
                return Err(ThrottlerError::ValidationError(format!(
                    "Endpoint '{}' is configured more than once",
                    endpoint.base()
                )));
            }
        }

        Ok(())
    }

    /// Markers must outlive the 60 second quota window, otherwise the live
    /// count undercounts recent requests.
    pub fn validate_ttls(marker_ttl_secs: u64, lock_ttl_secs: u64) -> Result<(), ThrottlerError> {
        if marker_ttl_secs < 60 {
            return Err(ThrottlerError::ValidationError(format!(
                "Marker TTL must be at least 60 seconds, got {}",
                marker_ttl_secs
            )));
        }

        if lock_ttl_secs == 0 {
            return Err(ThrottlerError::ValidationError(
                "Lock TTL must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_config(config: &Config) -> Result<(), ThrottlerError> {
        Self::validate_store_params(&config.store_params())?;
        Self::validate_endpoints(&config.endpoints)?;
        Self::validate_ttls(config.marker_ttl_secs, config.lock_ttl_secs)?;

        if config.http_timeout_secs == 0 {
            return Err(ThrottlerError::ValidationError(
                "HTTP timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
