use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Requests admitted per endpoint per window unless configured otherwise.
pub const DEFAULT_QUOTA: u32 = 29;

/// One interchangeable API base URL (primary or mirror) and its quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct Endpoint {
    #[validate(url)]
    base: String,
    #[validate(range(min = 1))]
    quota: u32,
}

impl Endpoint {
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_quota(base, DEFAULT_QUOTA)
    }

    pub fn with_quota(base: impl Into<String>, quota: u32) -> Self {
        let base = base.into();
        Self {
            base: base.trim().trim_end_matches('/').to_string(),
            quota,
        }
    }

    /// Base URL without a trailing slash. Also the identity used in store keys.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quota(&self) -> u32 {
        self.quota
    }

    pub fn resource_url(&self, id: u64) -> String {
        format!("{}/{}", self.base, id)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (quota {})", self.base, self.quota)
    }
}

/// Parses `base` or `base|quota`.
impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Endpoint cannot be empty".to_string());
        }

        match s.rsplit_once('|') {
            Some((base, quota)) => {
                let quota = quota
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| format!("Invalid quota '{}' for {}: {}", quota, base, e))?;
                Ok(Endpoint::with_quota(base, quota))
            }
            None => Ok(Endpoint::new(s)),
        }
    }
}

/// The fixed, ordered list of endpoints. Order is preference order: the
/// first entry is the primary, the rest are mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct EndpointSet {
    #[validate(nested)]
    endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl Default for EndpointSet {
    fn default() -> Self {
        Self::new(vec![
            Endpoint::new("https://api.com/posts/"),
            Endpoint::new("https://mirror1.com/posts/"),
        ])
    }
}

/// Comma separated list of `base|quota` entries.
impl FromStr for EndpointSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let endpoints = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Endpoint::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(endpoints))
    }
}

impl<'a> IntoIterator for &'a EndpointSet {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.endpoints.iter()
    }
}

/// How the live usage count is compared against an endpoint's quota.
///
/// `Inclusive` admits while `count <= quota`, i.e. up to quota + 1 requests
/// per window. That is the historical behaviour of deployments sharing this
/// keyspace, so it stays the default. `Strict` admits while `count < quota`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaBoundary {
    #[default]
    Inclusive,
    Strict,
}

impl QuotaBoundary {
    pub fn admits(self, live_count: u64, quota: u32) -> bool {
        let quota = u64::from(quota);
        match self {
            QuotaBoundary::Inclusive => live_count <= quota,
            QuotaBoundary::Strict => live_count < quota,
        }
    }

    /// Most usage markers that can be live at once for a given quota.
    pub fn max_live(self, quota: u32) -> u64 {
        match self {
            QuotaBoundary::Inclusive => u64::from(quota) + 1,
            QuotaBoundary::Strict => u64::from(quota),
        }
    }
}

impl FromStr for QuotaBoundary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inclusive" => Ok(QuotaBoundary::Inclusive),
            "strict" => Ok(QuotaBoundary::Strict),
            other => Err(format!(
                "Invalid quota boundary '{}'. Must be 'inclusive' or 'strict'",
                other
            )),
        }
    }
}
