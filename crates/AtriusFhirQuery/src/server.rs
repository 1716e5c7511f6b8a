//! # Natural-Language FHIR Query Server
//!
//! A small HTTP service exposing the query pipeline of [`atrius_fhir_query`]
//! to browser front ends. The server owns one [`Session`]: the selected FHIR
//! server, the smart-mode flag and the cloud reasoning credentials are shared
//! by every request, last write wins.
//!
//! ## API Endpoints
//!
//! ```text
//! POST /query
//!   Body: {"query": "find patients with diabetes"}
//!   Returns: {"type": "success|warning|error|info", "content": "..."}
//!
//! POST /assess
//!   Body: {"server": "https://...", "band_scheme": "four-band"}  (both optional)
//!   Returns: QualityAssessment plus {"band": {label, description, symbol}}
//!
//! GET /session
//!   Returns: server, smart mode, provider, model, source status
//!
//! PUT /session
//!   Body: {"server", "smart_mode", "provider", "api_key", "model", "clear_credentials"}
//!   A changed server is connection-tested immediately.
//!
//! POST /session/probe
//!   Connection test against the session's server; 502 when unreachable.
//!
//! GET /health
//! ```
//!
//! ## Configuration
//!
//! The server supports configuration through both command-line arguments and environment variables:
//!
//! - `ATRIUS_QUERY_PORT` / `--port`: Server port (default: 8080)
//! - `ATRIUS_QUERY_HOST` / `--host`: Server host (default: 127.0.0.1)
//! - `ATRIUS_QUERY_LOG_LEVEL` / `--log-level`: Log level (default: info)
//! - `ATRIUS_QUERY_MAX_BODY_SIZE` / `--max-body-size`: Max request size in bytes (default: 1MB)
//! - `ATRIUS_QUERY_REQUEST_TIMEOUT` / `--request-timeout`: Request timeout in seconds (default: 120)
//! - `ATRIUS_QUERY_ENABLE_CORS` / `--enable-cors`: Enable CORS (default: true)
//! - `ATRIUS_QUERY_CORS_ORIGINS` / `--cors-origins`: Allowed origins, comma-separated (default: *)
//! - `ATRIUS_QUERY_CORS_METHODS` / `--cors-methods`: Allowed methods, comma-separated
//! - `ATRIUS_QUERY_CORS_HEADERS` / `--cors-headers`: Allowed headers, comma-separated
//! - `ATRIUS_QUERY_SERVER` / `--fhir-server`: FHIR base URL (default: https://hapi.fhir.org/baseR4)
//! - `ATRIUS_QUERY_FHIR_TIMEOUT` / `--fhir-timeout`: Per-attempt FHIR timeout in seconds (default: 10)
//! - `ATRIUS_QUERY_USE_PROXIES` / `--use-proxies`: Route failed requests through CORS proxies (default: false)
//! - `ATRIUS_QUERY_NO_LOCAL_SAMPLE` / `--no-local-sample`: Disable the built-in sample data

use atrius_fhir_query::{FhirAssistant, Session, TransportConfig, transport::DEFAULT_SERVER};
use axum::{
    Router,
    routing::{get, post},
};
use http::{HeaderValue, Method, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod error;
mod handlers;
mod models;

use handlers::AppState;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
    /// Log level for the server
    pub log_level: String,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Request timeout in seconds
    pub request_timeout: u64,
    /// Whether to enable CORS
    pub enable_cors: bool,
    /// Allowed CORS origins (comma-separated list, "*" for any)
    pub cors_origins: String,
    /// Allowed CORS methods (comma-separated list, "*" for any)
    pub cors_methods: String,
    /// Allowed CORS headers (comma-separated list, "*" for any)
    pub cors_headers: String,
    /// Initial FHIR server of the session
    pub fhir_server: String,
    /// Per-attempt timeout for FHIR requests in seconds
    pub fhir_timeout: u64,
    /// Whether the transport tries CORS proxies
    pub use_proxies: bool,
    /// Whether the built-in sample data is the last fallback
    pub local_sample: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
            max_body_size: 1024 * 1024, // 1MB
            request_timeout: 120,
            enable_cors: true,
            cors_origins: "*".to_string(),
            cors_methods: "GET,POST,PUT,OPTIONS".to_string(),
            cors_headers: "Accept,Content-Type,Authorization,X-Requested-With".to_string(),
            fhir_server: DEFAULT_SERVER.to_string(),
            fhir_timeout: 10,
            use_proxies: false,
            local_sample: true,
        }
    }
}

impl ServerConfig {
    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.fhir_timeout),
            use_cors_proxies: self.use_proxies,
            local_sample: self.local_sample,
            ..TransportConfig::default()
        }
    }
}

/// Main server entry point
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = parse_args();

    let filter = format!(
        "atrius_fhir_query={},atrius_query_server={},tower_http={}",
        config.log_level, config.log_level, config.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .init();

    info!("Starting FHIR query server...");
    info!("Configuration: {:?}", config);

    let app = create_app_with_config(&config);

    let host: std::net::IpAddr = config.host.parse().unwrap_or_else(|_| {
        warn!("Invalid host address '{}', using 127.0.0.1", config.host);
        std::net::IpAddr::from([127, 0, 0, 1])
    });

    let addr = SocketAddr::from((host, config.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Parse command line arguments for server configuration
fn parse_args() -> ServerConfig {
    use clap::Parser;

    #[derive(Parser, Debug)]
    #[command(
        author,
        version,
        about = "Natural-language FHIR query server",
        long_about = "HTTP server answering free-text questions against FHIR servers\n\nEnvironment variables:\n  ATRIUS_QUERY_PORT - Server port (default: 8080)\n  ATRIUS_QUERY_HOST - Server host (default: 127.0.0.1)\n  ATRIUS_QUERY_LOG_LEVEL - Log level: error, warn, info, debug, trace (default: info)\n  ATRIUS_QUERY_MAX_BODY_SIZE - Maximum request body size in bytes (default: 1048576)\n  ATRIUS_QUERY_REQUEST_TIMEOUT - Request timeout in seconds (default: 120)\n  ATRIUS_QUERY_ENABLE_CORS - Enable CORS: true/false (default: true)\n  ATRIUS_QUERY_CORS_ORIGINS - Allowed origins (comma-separated, * for any) (default: *)\n  ATRIUS_QUERY_CORS_METHODS - Allowed methods (comma-separated, * for any) (default: GET,POST,PUT,OPTIONS)\n  ATRIUS_QUERY_CORS_HEADERS - Allowed headers (comma-separated, * for any) (default: common headers)\n  ATRIUS_QUERY_SERVER - FHIR base URL (default: https://hapi.fhir.org/baseR4)\n  ATRIUS_QUERY_FHIR_TIMEOUT - Per-attempt FHIR timeout in seconds (default: 10)\n  ATRIUS_QUERY_USE_PROXIES - Try CORS proxies after a direct failure (default: false)\n  ATRIUS_QUERY_NO_LOCAL_SAMPLE - Never fall back to built-in sample data\n\nNote: When using wildcard (*) origins, credentials are disabled for security."
    )]
    struct Args {
        /// Port to bind the server to
        #[arg(short, long, env = "ATRIUS_QUERY_PORT", default_value_t = 8080)]
        port: u16,

        /// Host address to bind to
        #[arg(
            short = 'H',
            long,
            env = "ATRIUS_QUERY_HOST",
            default_value = "127.0.0.1"
        )]
        host: String,

        /// Log level (error, warn, info, debug, trace)
        #[arg(short, long, env = "ATRIUS_QUERY_LOG_LEVEL", default_value = "info")]
        log_level: String,

        /// Maximum request body size in bytes
        #[arg(
            short = 'm',
            long,
            env = "ATRIUS_QUERY_MAX_BODY_SIZE",
            default_value_t = 1_048_576
        )]
        max_body_size: usize,

        /// Request timeout in seconds
        #[arg(
            short = 't',
            long,
            env = "ATRIUS_QUERY_REQUEST_TIMEOUT",
            default_value_t = 120
        )]
        request_timeout: u64,

        /// Enable CORS
        #[arg(short = 'c', long, env = "ATRIUS_QUERY_ENABLE_CORS", default_value_t = true)]
        enable_cors: bool,

        /// Allowed CORS origins (comma-separated list, "*" for any)
        #[arg(long, env = "ATRIUS_QUERY_CORS_ORIGINS", default_value = "*")]
        cors_origins: String,

        /// Allowed CORS methods (comma-separated list, "*" for any)
        #[arg(
            long,
            env = "ATRIUS_QUERY_CORS_METHODS",
            default_value = "GET,POST,PUT,OPTIONS"
        )]
        cors_methods: String,

        /// Allowed CORS headers (comma-separated list, "*" for any)
        #[arg(
            long,
            env = "ATRIUS_QUERY_CORS_HEADERS",
            default_value = "Accept,Content-Type,Authorization,X-Requested-With"
        )]
        cors_headers: String,

        /// FHIR base URL the session starts with
        #[arg(long, env = "ATRIUS_QUERY_SERVER", default_value = DEFAULT_SERVER)]
        fhir_server: String,

        /// Per-attempt timeout for FHIR requests in seconds
        #[arg(long, env = "ATRIUS_QUERY_FHIR_TIMEOUT", default_value_t = 10)]
        fhir_timeout: u64,

        /// Try CORS proxies after a direct failure
        #[arg(long, env = "ATRIUS_QUERY_USE_PROXIES")]
        use_proxies: bool,

        /// Never fall back to built-in sample data
        #[arg(long, env = "ATRIUS_QUERY_NO_LOCAL_SAMPLE")]
        no_local_sample: bool,
    }

    let args = Args::parse();

    ServerConfig {
        port: args.port,
        host: args.host,
        log_level: args.log_level,
        max_body_size: args.max_body_size,
        request_timeout: args.request_timeout,
        enable_cors: args.enable_cors,
        cors_origins: args.cors_origins,
        cors_methods: args.cors_methods,
        cors_headers: args.cors_headers,
        fhir_server: args.fhir_server,
        fhir_timeout: args.fhir_timeout,
        use_proxies: args.use_proxies,
        local_sample: !args.no_local_sample,
    }
}

/// Create the application router over an HTTP-backed assistant
fn create_app_with_config(config: &ServerConfig) -> Router {
    let session = Arc::new(Session::new(config.fhir_server.trim_end_matches('/')));
    let assistant = FhirAssistant::with_http(session, config.transport_config());
    create_app_with_assistant(config, Arc::new(assistant))
}

fn create_app_with_assistant(config: &ServerConfig, assistant: Arc<FhirAssistant>) -> Router {
    use axum::extract::DefaultBodyLimit;
    use tower::ServiceBuilder;
    use tower_http::timeout::TimeoutLayer;

    let mut app = Router::new()
        .route("/query", post(handlers::query_handler))
        .route("/assess", post(handlers::assess_handler))
        .route(
            "/session",
            get(handlers::get_session).put(handlers::put_session),
        )
        .route("/session/probe", post(handlers::probe_handler))
        .route("/health", get(handlers::health_check))
        .fallback(handlers::not_found)
        .with_state(AppState { assistant })
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(config.request_timeout),
                ))
                .into_inner(),
        );

    if config.enable_cors {
        app = app.layer(build_cors_layer(config));
    }

    app = app.layer(TraceLayer::new_for_http());

    app
}

/// Methods the routes answer to; a configured method list should cover them.
const ROUTE_METHODS: [Method; 3] = [Method::GET, Method::POST, Method::PUT];

/// Build CORS layer from configuration
///
/// Origins, methods and headers each accept "*" or a comma-separated list.
/// Credentials are only allowed when none of the three is a wildcard. A
/// method list that leaves out a route method or `OPTIONS` is kept as given,
/// with a warning, since browsers will then refuse those calls.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin};

    let mut cors = CorsLayer::new();
    let mut wildcards = Vec::new();

    if config.cors_origins == "*" {
        wildcards.push("origins");
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins: Vec<HeaderValue> = comma_list(&config.cors_origins)
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    if config.cors_methods == "*" {
        wildcards.push("methods");
        cors = cors.allow_methods(AllowMethods::any());
    } else {
        let methods = parse_methods(&config.cors_methods);
        let uncovered = uncovered_methods(&methods);
        if !uncovered.is_empty() {
            warn!(
                "CORS: methods {:?} are not allowed; browser calls using them will fail",
                uncovered
            );
        }
        cors = cors.allow_methods(methods);
    }

    if config.cors_headers == "*" {
        wildcards.push("headers");
        cors = cors.allow_headers(AllowHeaders::any());
    } else {
        let headers: Vec<http::HeaderName> = comma_list(&config.cors_headers)
            .filter_map(|s| s.parse().ok())
            .collect();
        if !headers.contains(&http::header::CONTENT_TYPE) {
            warn!("CORS: Content-Type is not an allowed header; JSON bodies from browsers will be refused");
        }
        cors = cors.allow_headers(headers);
    }

    if wildcards.is_empty() {
        cors = cors.allow_credentials(true);
    } else {
        info!(
            "CORS: wildcard {}, credentials are disabled",
            wildcards.join(", ")
        );
    }

    cors
}

fn comma_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_methods(value: &str) -> Vec<Method> {
    comma_list(value)
        .filter_map(|s| Method::from_bytes(s.to_uppercase().as_bytes()).ok())
        .collect()
}

/// Route methods, plus the `OPTIONS` preflight, missing from `allowed`.
fn uncovered_methods(allowed: &[Method]) -> Vec<Method> {
    ROUTE_METHODS
        .into_iter()
        .chain([Method::OPTIONS])
        .filter(|m| !allowed.contains(m))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atrius_fhir_query::{FetchError, ResourceFetcher};
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use url::Url;

    /// Answers `metadata` and nothing else.
    struct MetadataOnly;

    #[async_trait]
    impl ResourceFetcher for MetadataOnly {
        async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
            if url.path().ends_with("/metadata") && url.host_str() == Some("fhir.example.org") {
                Ok(json!({ "resourceType": "CapabilityStatement" }))
            } else {
                Err(FetchError::Network("connection refused".into()))
            }
        }
    }

    fn test_app(config: &ServerConfig) -> Router {
        let session = Arc::new(Session::new("https://fhir.example.org/r4"));
        let transport = TransportConfig {
            alternate_servers: Vec::new(),
            ..config.transport_config()
        };
        let assistant = FhirAssistant::with_fetcher(Arc::new(MetadataOnly), session, transport);
        create_app_with_assistant(config, Arc::new(assistant))
    }

    fn test_server() -> TestServer {
        TestServer::new(test_app(&ServerConfig::default())).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = test_server();

        let response = server.get("/health").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let json: Value = response.json();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "atrius-query-server");
    }

    #[tokio::test]
    async fn test_query_returns_type_and_content() {
        let server = test_server();

        let response = server
            .post("/query")
            .json(&json!({ "query": "show all patients" }))
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let json: Value = response.json();
        assert_eq!(json["type"], "success");
        assert!(json["content"].as_str().unwrap().contains("Maria Garcia"));
    }

    #[tokio::test]
    async fn test_empty_query_is_operation_outcome() {
        let server = test_server();

        let response = server.post("/query").json(&json!({ "query": "   " })).await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert_eq!(json["resourceType"], "OperationOutcome");
        assert_eq!(json["issue"][0]["code"], "invalid");
    }

    #[tokio::test]
    async fn test_assess_unreachable_server_scores_zero() {
        let server = test_server();

        let response = server
            .post("/assess")
            .json(&json!({ "band_scheme": "four-band" }))
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let json: Value = response.json();
        assert_eq!(json["server_endpoint"], "https://fhir.example.org/r4");
        assert_eq!(json["overall_score"], 0.0);
        assert_eq!(json["band"]["label"], "POOR");
    }

    #[tokio::test]
    async fn test_session_update_and_probe() {
        let server = test_server();

        let response = server
            .put("/session")
            .json(&json!({ "server": "https://other.example.org/fhir", "smart_mode": true }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let json: Value = response.json();
        assert_eq!(json["server"], "https://other.example.org/fhir");
        assert_eq!(json["smart_mode"], true);
        assert_eq!(json["status"]["state"], "unreachable");

        let response = server.post("/session/probe").await;
        assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);

        server
            .put("/session")
            .json(&json!({ "server": "https://fhir.example.org/r4" }))
            .await;
        let response = server.post("/session/probe").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let json: Value = response.json();
        assert_eq!(json["status"]["state"], "connected");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let server = test_server();

        let response = server.get("/Patient").await;

        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preflight_allows_session_update() {
        use axum::body::Body;
        use http::Request;
        use tower::ServiceExt;

        let config = ServerConfig {
            cors_origins: "http://localhost:3000".to_string(),
            ..ServerConfig::default()
        };

        let request = Request::builder()
            .method("OPTIONS")
            .uri("/session")
            .header("Origin", "http://localhost:3000")
            .header("Access-Control-Request-Method", "PUT")
            .body(Body::empty())
            .unwrap();
        let response = test_app(&config).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let allowed = response.headers()["access-control-allow-methods"]
            .to_str()
            .unwrap();
        assert!(allowed.contains("PUT"));
        assert_eq!(response.headers()["access-control-allow-credentials"], "true");
    }

    #[test]
    fn test_uncovered_methods() {
        assert!(uncovered_methods(&parse_methods("get, post, put, options")).is_empty());
        assert_eq!(
            uncovered_methods(&parse_methods("GET,POST")),
            vec![Method::PUT, Method::OPTIONS]
        );
    }
}
