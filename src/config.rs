use crate::admission::AdmissionSettings;
use crate::endpoint::{EndpointSet, QuotaBoundary};
use envconfig::Envconfig;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Gateway bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    #[envconfig(from = "REDIS_HOST", default = "localhost")]
    pub redis_host: String,

    #[envconfig(from = "REDIS_PORT", default = "6379")]
    pub redis_port: u16,

    /// Empty means no authentication
    #[envconfig(from = "REDIS_PASSWORD", default = "")]
    pub redis_password: String,

    /// Ordered `base|quota` list, primary first
    #[envconfig(
        from = "ENDPOINTS",
        default = "https://api.com/posts|29,https://mirror1.com/posts|29"
    )]
    pub endpoints: EndpointSet,

    /// Lifetime of usage and reservation markers
    #[envconfig(from = "MARKER_TTL_SECS", default = "61")]
    pub marker_ttl_secs: u64,

    /// Lifetime of the selection lock if its holder dies
    #[envconfig(from = "LOCK_TTL_SECS", default = "61")]
    pub lock_ttl_secs: u64,

    /// `inclusive` admits up to quota + 1 per window, `strict` up to quota
    #[envconfig(from = "QUOTA_BOUNDARY", default = "inclusive")]
    pub quota_boundary: QuotaBoundary,

    /// Upstream request timeout
    #[envconfig(from = "HTTP_TIMEOUT_SECS", default = "30")]
    pub http_timeout_secs: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn store_params(&self) -> StoreConnectionParams {
        StoreConnectionParams {
            host: self.redis_host.clone(),
            port: self.redis_port,
            password: Some(self.redis_password.clone()).filter(|p| !p.is_empty()),
        }
    }

    pub fn admission_settings(&self) -> AdmissionSettings {
        AdmissionSettings {
            marker_ttl: Duration::from_secs(self.marker_ttl_secs),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            boundary: self.quota_boundary,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Where the coordination store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConnectionParams {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl StoreConnectionParams {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Structured connection info. The password is passed through as-is,
    /// never spliced into a URL, so no character in it needs escaping.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }

    /// `host:port`, safe to log.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for StoreConnectionParams {
    fn default() -> Self {
        Self::new("localhost", 6379)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_environment() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.quota_boundary, QuotaBoundary::Inclusive);
        assert_eq!(config.admission_settings(), AdmissionSettings::default());
        assert_eq!(config.store_params(), StoreConnectionParams::default());
    }

    #[test]
    fn test_overrides_from_environment() {
        let mut env = HashMap::new();
        env.insert("ENDPOINTS".to_string(), "https://a.com|3".to_string());
        env.insert("QUOTA_BOUNDARY".to_string(), "strict".to_string());
        env.insert("REDIS_PASSWORD".to_string(), "secret".to_string());
        env.insert("LOCK_TTL_SECS".to_string(), "5".to_string());

        let config = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.admission_settings().boundary, QuotaBoundary::Strict);
        assert_eq!(config.admission_settings().lock_ttl, Duration::from_secs(5));
        assert_eq!(config.store_params().password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_boundary_is_rejected() {
        let mut env = HashMap::new();
        env.insert("QUOTA_BOUNDARY".to_string(), "sometimes".to_string());
        assert!(Config::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn test_connection_info_without_password() {
        let info = StoreConnectionParams::new("cache", 6380).connection_info();
        match info.addr {
            ConnectionAddr::Tcp(ref host, port) => assert_eq!((host.as_str(), port), ("cache", 6380)),
            ref other => panic!("expected a TCP address, got {:?}", other),
        }
        assert_eq!(info.redis.password, None);
        assert_eq!(info.redis.db, 0);
    }

    #[test]
    fn test_connection_info_keeps_password_verbatim() {
        let params = StoreConnectionParams::new("cache", 6380).with_password("pa/ss%41?#@");
        let info = params.connection_info();

        assert_eq!(info.redis.password.as_deref(), Some("pa/ss%41?#@"));
        match info.addr {
            ConnectionAddr::Tcp(ref host, port) => assert_eq!((host.as_str(), port), ("cache", 6380)),
            ref other => panic!("expected a TCP address, got {:?}", other),
        }
        assert_eq!(params.address(), "cache:6380");
    }
}
