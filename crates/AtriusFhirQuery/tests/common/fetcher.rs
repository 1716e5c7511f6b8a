//! In-memory [`ResourceFetcher`] answering from a script of URL matchers.

use async_trait::async_trait;
use atrius_fhir_query::{FetchError, ResourceFetcher};
use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

type Matcher = Box<dyn Fn(&Url) -> bool + Send + Sync>;

struct Rule {
    matcher: Matcher,
    response: Result<Value, FetchError>,
}

/// Rules are checked in insertion order; the first match answers. Unmatched
/// URLs fail with a network error. Every requested URL is recorded.
#[derive(Default)]
pub struct ScriptedFetcher {
    rules: Vec<Rule>,
    requests: Mutex<Vec<Url>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        mut self,
        matcher: impl Fn(&Url) -> bool + Send + Sync + 'static,
        response: Result<Value, FetchError>,
    ) -> Self {
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            response,
        });
        self
    }

    /// Answer requests for `path` (relative to the base, e.g. `Patient` or
    /// `Patient/123`) whose query contains every `key=value` in `query`.
    pub fn on_path(self, path: &str, query: &[(&str, &str)], response: Value) -> Self {
        self.on(matches(path, query), Ok(response))
    }

    pub fn fail_path(self, path: &str, error: FetchError) -> Self {
        self.on(matches(path, &[]), Err(error))
    }

    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().clone()
    }

    /// Recorded requests whose path ends with `/{path}`.
    pub fn requests_for(&self, path: &str) -> Vec<Url> {
        let suffix = format!("/{}", path);
        self.requests()
            .into_iter()
            .filter(|url| url.path().ends_with(&suffix))
            .collect()
    }
}

pub fn matches(path: &str, query: &[(&str, &str)]) -> impl Fn(&Url) -> bool + Send + Sync + 'static {
    let suffix = format!("/{}", path);
    let query: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |url: &Url| {
        url.path().ends_with(&suffix)
            && query.iter().all(|(k, v)| {
                url.query_pairs()
                    .any(|(qk, qv)| qk == k.as_str() && qv == v.as_str())
            })
    }
}

#[async_trait]
impl ResourceFetcher for ScriptedFetcher {
    async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
        self.requests.lock().push(url.clone());
        self.rules
            .iter()
            .find(|rule| (rule.matcher)(url))
            .map(|rule| rule.response.clone())
            .unwrap_or_else(|| Err(FetchError::Network(format!("unscripted request {}", url))))
    }
}
