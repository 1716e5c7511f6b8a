//! Resource fetcher for FHIR REST reads and searches.
//!
//! A fetcher performs exactly one HTTP `GET` and either returns the parsed JSON
//! body or a [`FetchError`]. It never retries: walking fallbacks is the job of
//! [`crate::transport::ResilientTransport`].
//!
//! Search parameters keep their insertion order and may repeat, which is how
//! FHIR expresses ranges:
//!
//! ```text
//! GET {base}/Patient?birthdate=ge1967-07-01&birthdate=le1967-12-31&_count=20
//! Accept: application/fhir+json
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::FetchError;

/// Media type sent in the `Accept` header of every FHIR request.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Ordered, repeatable FHIR search parameters.
///
/// A key given several values is serialized as repeated query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pairs: Vec<(String, String)>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a search that only bounds the page size.
    pub fn count(n: u32) -> Self {
        Self::new().with("_count", n.to_string())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Adds one occurrence of `key` per value.
    pub fn with_all<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self.push(key, value);
        }
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// First value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// Resource type named by a path such as `Patient` or `Patient/123`.
pub fn resource_type_of(path: &str) -> &str {
    path.trim_start_matches('/').split('/').next().unwrap_or_default()
}

/// Build `{base}/{path}?{params}`.
///
/// `base_url` may carry a trailing `/`; values are form-encoded.
pub fn build_url(base_url: &str, path: &str, params: &SearchParams) -> Result<Url, FetchError> {
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut url = Url::parse(&joined)
        .map_err(|e| FetchError::InvalidUrl(format!("'{}': {}", joined, e)))?;

    if !params.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in params.iter() {
            query.append_pair(key, value);
        }
    }

    Ok(url)
}

/// Something that can perform a single FHIR `GET`.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// `GET` an absolute URL and parse the body as JSON.
    async fn get_json(&self, url: &Url) -> Result<Value, FetchError>;

    /// `GET {base_url}/{path}?{params}`.
    async fn fetch(
        &self,
        base_url: &str,
        path: &str,
        params: &SearchParams,
    ) -> Result<Value, FetchError> {
        let url = build_url(base_url, path, params)?;
        self.get_json(&url).await
    }
}

/// [`ResourceFetcher`] backed by a pooled `reqwest::Client`.
#[derive(Clone)]
pub struct HttpResourceFetcher {
    client: Client,
}

impl HttpResourceFetcher {
    /// Create a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Use a preconfigured client (proxies, TLS settings, custom timeouts).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpResourceFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url.as_str())
            .header("Accept", FHIR_JSON)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("Unknown status")
                    .to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::InvalidBody(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_repeats_array_values() {
        let params = SearchParams::new()
            .with_all("birthdate", ["ge1967-07-01", "le1967-12-31"])
            .with("_count", "20");

        let url = build_url("https://example.org/fhir/", "Patient", &params).unwrap();

        assert_eq!(
            url.as_str(),
            "https://example.org/fhir/Patient?birthdate=ge1967-07-01&birthdate=le1967-12-31&_count=20"
        );
    }

    #[test]
    fn test_build_url_read_by_id_without_query() {
        let url = build_url("https://example.org/fhir", "Patient/abc-123", &SearchParams::new())
            .unwrap();

        assert_eq!(url.as_str(), "https://example.org/fhir/Patient/abc-123");
        assert!(url.query().is_none());
    }

    #[test]
    fn test_build_url_encodes_modifiers_and_spaces() {
        let params = SearchParams::new().with("code:text", "type 2 diabetes");
        let url = build_url("https://example.org/fhir", "Condition", &params).unwrap();

        assert_eq!(
            url.query(),
            Some("code%3Atext=type+2+diabetes")
        );
    }

    #[test]
    fn test_build_url_rejects_relative_base() {
        let err = build_url("not a url", "Patient", &SearchParams::new()).unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[test]
    fn test_search_params_lookup() {
        let params = SearchParams::count(10)
            .with("patient", "123")
            .with_all("birthdate", ["ge2000-01-01", "le2000-12-31"]);

        assert_eq!(params.get("_count"), Some("10"));
        assert_eq!(params.get("patient"), Some("123"));
        assert_eq!(params.get_all("birthdate").len(), 2);
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_resource_type_of() {
        assert_eq!(resource_type_of("Patient"), "Patient");
        assert_eq!(resource_type_of("Patient/123"), "Patient");
        assert_eq!(resource_type_of("/Observation"), "Observation");
    }
}
