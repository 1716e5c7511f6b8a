//! Resilient transport: an ordered list of fetch strategies walked until one
//! succeeds.
//!
//! For a request against the session's current server the plan is:
//!
//! 1. direct fetch,
//! 2. the same URL through each CORS proxy (when proxies are enabled),
//! 3. every alternate server, direct and then through each proxy,
//! 4. the built-in local sample responder (when enabled).
//!
//! Strategies are tried strictly in sequence. Each failure is recorded as a
//! [`TransportAttempt`] and logged. The local sample responder never fails, so
//! with it enabled every request ends in a well-formed JSON body.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::fetcher::{HttpResourceFetcher, ResourceFetcher, SearchParams, build_url};
use crate::sample_data::sample_bundle;
use crate::session::{Session, SourceStatus};
use crate::{FetchError, QueryError, QueryResult};

/// Default FHIR server.
pub const DEFAULT_SERVER: &str = "https://hapi.fhir.org/baseR4";

/// Public servers tried, in order, when the selected one fails.
pub const DEFAULT_ALTERNATE_SERVERS: &[&str] =
    &["https://r4.smarthealthit.org", "https://server.fire.ly/r4"];

/// Relay prefixes; the url-encoded target is appended to each.
pub const DEFAULT_CORS_PROXIES: &[&str] = &[
    "https://api.codetabs.com/v1/proxy?quest=",
    "https://corsproxy.io/?",
    "https://api.allorigins.win/raw?url=",
];

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    pub cors_proxies: Vec<String>,
    /// Whether proxy strategies are planned at all. A native process has no
    /// cross-origin restriction, so this is off by default.
    pub use_cors_proxies: bool,
    pub alternate_servers: Vec<String>,
    /// Serve built-in sample data when every network strategy fails.
    pub local_sample: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            cors_proxies: DEFAULT_CORS_PROXIES.iter().map(|s| s.to_string()).collect(),
            use_cors_proxies: false,
            alternate_servers: DEFAULT_ALTERNATE_SERVERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            local_sample: true,
        }
    }
}

/// Which strategy produced an attempt. Indices are zero-based positions in
/// the configured proxy and alternate server lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    Direct,
    Proxy { proxy: usize },
    AlternateServer { server: usize, proxy: Option<usize> },
    LocalSample,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Direct => write!(f, "direct"),
            StrategyKind::Proxy { proxy } => write!(f, "proxy[{}]", proxy),
            StrategyKind::AlternateServer { server, proxy: None } => {
                write!(f, "alternate-server[{}]", server)
            }
            StrategyKind::AlternateServer {
                server,
                proxy: Some(proxy),
            } => write!(f, "alternate-server[{}] via proxy[{}]", server, proxy),
            StrategyKind::LocalSample => write!(f, "local-sample"),
        }
    }
}

/// A planned way of performing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub kind: StrategyKind,
    /// FHIR base URL the request targets. Empty for the local sample.
    pub base_url: String,
    pub proxy_prefix: Option<String>,
}

impl Strategy {
    /// The URL actually requested: the FHIR URL, wrapped by the proxy if any.
    pub fn request_url(&self, path: &str, params: &SearchParams) -> Result<Url, FetchError> {
        let target = build_url(&self.base_url, path, params)?;
        match &self.proxy_prefix {
            None => Ok(target),
            Some(prefix) => wrap_in_proxy(prefix, &target),
        }
    }
}

/// Wrap `target` as a query argument of a relay.
pub fn wrap_in_proxy(prefix: &str, target: &Url) -> Result<Url, FetchError> {
    let encoded: String = byte_serialize(target.as_str().as_bytes()).collect();
    let wrapped = format!("{}{}", prefix, encoded);
    Url::parse(&wrapped).map_err(|e| FetchError::InvalidUrl(format!("'{}': {}", wrapped, e)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    HttpError(u16),
    NetworkError(String),
}

/// One strategy tried during a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportAttempt {
    pub kind: StrategyKind,
    pub target_url: String,
    pub outcome: AttemptOutcome,
}

/// A successful request and how it was served.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub body: Value,
    pub source: StrategyKind,
    /// Base URL that answered; empty when the local sample answered.
    pub served_by: String,
    pub attempts: Vec<TransportAttempt>,
}

/// Walks the strategy plan for each request.
pub struct ResilientTransport {
    fetcher: Arc<dyn ResourceFetcher>,
    session: Arc<Session>,
    config: TransportConfig,
}

impl ResilientTransport {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        session: Arc<Session>,
        config: TransportConfig,
    ) -> Self {
        Self {
            fetcher,
            session,
            config,
        }
    }

    /// Transport over a `reqwest` fetcher using `config.timeout`.
    pub fn with_http(session: Arc<Session>, config: TransportConfig) -> Self {
        let fetcher = Arc::new(HttpResourceFetcher::new(config.timeout));
        Self::new(fetcher, session, config)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn fetcher(&self) -> Arc<dyn ResourceFetcher> {
        Arc::clone(&self.fetcher)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Strategies for a request whose selected server is `server`.
    pub fn plan(&self, server: &str) -> Vec<Strategy> {
        let server = server.trim_end_matches('/');
        let proxies: &[String] = if self.config.use_cors_proxies {
            &self.config.cors_proxies
        } else {
            &[]
        };

        let mut plan = vec![Strategy {
            kind: StrategyKind::Direct,
            base_url: server.to_string(),
            proxy_prefix: None,
        }];
        plan.extend(proxies.iter().enumerate().map(|(i, prefix)| Strategy {
            kind: StrategyKind::Proxy { proxy: i },
            base_url: server.to_string(),
            proxy_prefix: Some(prefix.clone()),
        }));

        for (s, alternate) in self.config.alternate_servers.iter().enumerate() {
            let alternate = alternate.trim_end_matches('/');
            if alternate == server {
                continue;
            }
            plan.push(Strategy {
                kind: StrategyKind::AlternateServer {
                    server: s,
                    proxy: None,
                },
                base_url: alternate.to_string(),
                proxy_prefix: None,
            });
            plan.extend(proxies.iter().enumerate().map(|(p, prefix)| Strategy {
                kind: StrategyKind::AlternateServer {
                    server: s,
                    proxy: Some(p),
                },
                base_url: alternate.to_string(),
                proxy_prefix: Some(prefix.clone()),
            }));
        }

        if self.config.local_sample {
            plan.push(Strategy {
                kind: StrategyKind::LocalSample,
                base_url: String::new(),
                proxy_prefix: None,
            });
        }

        plan
    }

    /// Fetch `path` with `params`, returning only the body.
    pub async fn request(&self, path: &str, params: &SearchParams) -> QueryResult<Value> {
        self.execute(path, params).await.map(|response| response.body)
    }

    /// Fetch `path` with `params`, returning the body with its attempt log.
    pub async fn execute(&self, path: &str, params: &SearchParams) -> QueryResult<TransportResponse> {
        let requested = self.session.endpoint();
        let plan = self.plan(&requested);
        let mut attempts = Vec::with_capacity(plan.len());
        let mut last_error = String::from("no strategies planned");

        for strategy in plan {
            if strategy.kind == StrategyKind::LocalSample {
                warn!(
                    "All network strategies failed for {}; serving local sample data",
                    path
                );
                attempts.push(TransportAttempt {
                    kind: StrategyKind::LocalSample,
                    target_url: format!("local:{}", path),
                    outcome: AttemptOutcome::Success,
                });
                self.session.set_status(SourceStatus::LocalSample);
                return Ok(TransportResponse {
                    body: sample_bundle(path),
                    source: StrategyKind::LocalSample,
                    served_by: String::new(),
                    attempts,
                });
            }

            let url = match strategy.request_url(path, params) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping {} strategy: {}", strategy.kind, e);
                    attempts.push(TransportAttempt {
                        kind: strategy.kind,
                        target_url: strategy.base_url.clone(),
                        outcome: AttemptOutcome::NetworkError(e.to_string()),
                    });
                    last_error = e.to_string();
                    continue;
                }
            };

            debug!("Trying {} strategy: {}", strategy.kind, url);
            match self.fetcher.get_json(&url).await {
                Ok(body) => {
                    attempts.push(TransportAttempt {
                        kind: strategy.kind,
                        target_url: url.to_string(),
                        outcome: AttemptOutcome::Success,
                    });
                    self.record_success(&requested, &strategy);
                    return Ok(TransportResponse {
                        body,
                        source: strategy.kind,
                        served_by: strategy.base_url,
                        attempts,
                    });
                }
                Err(e) => {
                    warn!("{} strategy failed for {}: {}", strategy.kind, url, e);
                    let outcome = match e.status() {
                        Some(status) => AttemptOutcome::HttpError(status),
                        None => AttemptOutcome::NetworkError(e.to_string()),
                    };
                    attempts.push(TransportAttempt {
                        kind: strategy.kind,
                        target_url: url.to_string(),
                        outcome,
                    });
                    last_error = e.to_string();
                }
            }
        }

        self.session.set_status(SourceStatus::Unreachable {
            endpoint: requested.to_string(),
        });
        Err(QueryError::AllStrategiesExhausted {
            attempts,
            last_error,
        })
    }

    fn record_success(&self, requested: &str, strategy: &Strategy) {
        match strategy.kind {
            StrategyKind::AlternateServer { .. } => {
                warn!(
                    "{} unavailable; switching to alternate server {}",
                    requested, strategy.base_url
                );
                self.session.switch_endpoint(strategy.base_url.as_str());
                self.session.set_status(SourceStatus::Substituted {
                    requested: requested.to_string(),
                    active: strategy.base_url.clone(),
                });
            }
            _ => self.session.set_status(SourceStatus::Connected {
                endpoint: strategy.base_url.clone(),
            }),
        }
    }

    /// Connection test for the selected server: `GET {server}/metadata` over
    /// the direct and proxy strategies only.
    pub async fn probe(&self) -> SourceStatus {
        let endpoint = self.session.endpoint();
        let params = SearchParams::new();

        for strategy in self
            .plan(&endpoint)
            .into_iter()
            .filter(|s| matches!(s.kind, StrategyKind::Direct | StrategyKind::Proxy { .. }))
        {
            let Ok(url) = strategy.request_url("metadata", &params) else {
                continue;
            };
            match self.fetcher.get_json(&url).await {
                Ok(_) => {
                    info!("Connected to {} via {}", endpoint, strategy.kind);
                    let status = SourceStatus::Connected {
                        endpoint: endpoint.to_string(),
                    };
                    self.session.set_status(status.clone());
                    return status;
                }
                Err(e) => debug!("Probe via {} failed: {}", strategy.kind, e),
            }
        }

        warn!("Connection test failed for {}", endpoint);
        let status = SourceStatus::Unreachable {
            endpoint: endpoint.to_string(),
        };
        self.session.set_status(status.clone());
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Fails every URL whose text contains one of `failing`.
    struct FailingFetcher {
        failing: Vec<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResourceFetcher for FailingFetcher {
        async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
            self.seen.lock().push(url.to_string());
            if self.failing.iter().any(|f| url.as_str().contains(f)) {
                Err(FetchError::Http {
                    status: 503,
                    message: "Service Unavailable".into(),
                })
            } else {
                Ok(json!({ "resourceType": "Bundle", "total": 1, "entry": [] }))
            }
        }
    }

    fn build(failing: Vec<&'static str>, config: TransportConfig) -> (ResilientTransport, Arc<FailingFetcher>) {
        let fetcher = Arc::new(FailingFetcher {
            failing,
            seen: Mutex::new(Vec::new()),
        });
        let session = Arc::new(Session::new("https://primary.example.org/fhir"));
        (
            ResilientTransport::new(fetcher.clone(), session, config),
            fetcher,
        )
    }

    #[test]
    fn test_plan_order_with_proxies() {
        let config = TransportConfig {
            use_cors_proxies: true,
            cors_proxies: vec!["https://relay.example/?url=".into()],
            alternate_servers: vec![
                "https://alt.example.org/r4".into(),
                "https://primary.example.org/fhir/".into(),
            ],
            ..TransportConfig::default()
        };
        let (transport, _) = build(vec![], config);

        let kinds: Vec<StrategyKind> = transport
            .plan("https://primary.example.org/fhir")
            .into_iter()
            .map(|s| s.kind)
            .collect();

        assert_eq!(
            kinds,
            vec![
                StrategyKind::Direct,
                StrategyKind::Proxy { proxy: 0 },
                StrategyKind::AlternateServer { server: 0, proxy: None },
                StrategyKind::AlternateServer { server: 0, proxy: Some(0) },
                StrategyKind::LocalSample,
            ]
        );
    }

    #[test]
    fn test_proxy_wraps_encoded_target() {
        let target = Url::parse("https://hapi.fhir.org/baseR4/Patient?_count=10").unwrap();
        let wrapped = wrap_in_proxy("https://api.codetabs.com/v1/proxy?quest=", &target).unwrap();

        assert_eq!(
            wrapped.as_str(),
            "https://api.codetabs.com/v1/proxy?quest=https%3A%2F%2Fhapi.fhir.org%2FbaseR4%2FPatient%3F_count%3D10"
        );
    }

    #[tokio::test]
    async fn test_direct_success_marks_connected() {
        let (transport, fetcher) = build(vec![], TransportConfig::default());

        let response = transport
            .execute("Patient", &SearchParams::count(10))
            .await
            .unwrap();

        assert_eq!(response.source, StrategyKind::Direct);
        assert_eq!(response.attempts.len(), 1);
        assert_eq!(fetcher.seen.lock().len(), 1);
        assert_eq!(
            transport.session().status(),
            SourceStatus::Connected {
                endpoint: "https://primary.example.org/fhir".into()
            }
        );
    }

    #[tokio::test]
    async fn test_alternate_server_switches_session() {
        let (transport, _) = build(vec!["primary.example.org"], TransportConfig::default());

        let response = transport.execute("Patient", &SearchParams::new()).await.unwrap();

        assert_eq!(
            response.source,
            StrategyKind::AlternateServer { server: 0, proxy: None }
        );
        assert_eq!(response.attempts[0].outcome, AttemptOutcome::HttpError(503));
        assert_eq!(
            transport.session().endpoint().as_str(),
            DEFAULT_ALTERNATE_SERVERS[0]
        );
        assert!(matches!(
            transport.session().status(),
            SourceStatus::Substituted { .. }
        ));
    }

    #[tokio::test]
    async fn test_local_sample_after_network_exhaustion() {
        let (transport, _) = build(vec!["https://"], TransportConfig::default());

        let body = transport.request("Condition", &SearchParams::new()).await.unwrap();

        assert_eq!(body["resourceType"], "Bundle");
        assert_eq!(body["entry"].as_array().unwrap().len(), 2);
        assert_eq!(transport.session().status(), SourceStatus::LocalSample);
    }

    #[tokio::test]
    async fn test_exhausted_without_local_sample() {
        let config = TransportConfig {
            local_sample: false,
            ..TransportConfig::default()
        };
        let (transport, _) = build(vec!["https://"], config);

        let err = transport.request("Patient", &SearchParams::new()).await.unwrap_err();

        match err {
            QueryError::AllStrategiesExhausted { attempts, .. } => assert_eq!(attempts.len(), 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_reports_unreachable() {
        let (transport, fetcher) = build(vec!["primary.example.org"], TransportConfig::default());

        let status = transport.probe().await;

        assert_eq!(
            status,
            SourceStatus::Unreachable {
                endpoint: "https://primary.example.org/fhir".into()
            }
        );
        assert!(fetcher.seen.lock()[0].ends_with("/metadata"));
    }
}
