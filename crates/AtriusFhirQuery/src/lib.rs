//! # Natural-Language FHIR Query Client
//!
//! This crate turns free-text questions ("show all patients", "find patients
//! with diabetes", "check data quality") into FHIR REST searches, executes them
//! against a FHIR server with layered failover, and renders the results as
//! short styled text records.
//!
//! There are two consumers of this crate:
//! - `atrius-query-cli` - a command-line front end (one-shot questions, a REPL,
//!   and data-quality assessments).
//! - `atrius-query-server` - a small HTTP service exposing the same pipeline as
//!   JSON endpoints for browser front ends.
//!
//! ## Architecture
//!
//! Components, leaves first:
//! - **Resource fetcher** ([`fetcher`]): a single `GET` against a FHIR base URL.
//! - **Resilient transport** ([`transport`]): walks an ordered strategy list
//!   (direct, CORS proxies, alternate servers, local sample data) until one
//!   succeeds.
//! - **Response interpreter** ([`interpreter`]): projects raw Bundle /
//!   OperationOutcome / resource JSON into read-only views.
//! - **Query classifier** ([`classifier`]): maps free text to a [`QueryIntent`].
//! - **Query executor** ([`executor`]): runs the FHIR calls for an intent and
//!   formats a [`FormattedResult`].
//! - **Data quality scorer** ([`quality`]): scores a server's data.
//! - **Cloud reasoning adapter** ([`reasoning`]): optional LLM planner that
//!   always degrades to the classifier.
//!
//! Process-wide state (current server, smart mode, provider credentials) lives
//! in an explicit [`Session`] owned by the calling layer.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use atrius_fhir_query::{FhirAssistant, Session, TransportConfig};
//!
//! # async fn example() {
//! let session = Arc::new(Session::new("https://hapi.fhir.org/baseR4"));
//! let assistant = FhirAssistant::with_http(session, TransportConfig::default());
//!
//! let result = assistant.process("show all patients").await;
//! println!("[{}] {}", result.kind, result.content);
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Network-level failures ([`FetchError`]) are absorbed by the transport and
//! turned into the next strategy attempt. The executor converts whatever
//! reaches it into an `error`-typed [`FormattedResult`], so the end user always
//! receives a styled message rather than an error value.

pub mod assistant;
pub mod classifier;
pub mod executor;
pub mod fetcher;
pub mod interpreter;
pub mod quality;
pub mod reasoning;
pub mod sample_data;
pub mod session;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use assistant::FhirAssistant;
pub use classifier::{BirthRange, Gender, PatientRef, QueryIntent, classify};
pub use executor::QueryExecutor;
pub use fetcher::{HttpResourceFetcher, ResourceFetcher, SearchParams};
pub use interpreter::{BundleView, FhirResponse, ResourceView, interpret};
pub use quality::{BandScheme, DataQualityScorer, Issue, IssueSeverity, QualityAssessment};
pub use reasoning::{CloudReasoningAdapter, Provider, ReasoningConfig};
pub use session::{Session, SourceStatus};
pub use transport::{ResilientTransport, TransportAttempt, TransportConfig};

/// Failure of a single HTTP `GET` performed by a [`ResourceFetcher`].
///
/// These errors are terminal for the fetcher; retrying is the job of the
/// [`ResilientTransport`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// The request never produced an HTTP response.
    ///
    /// Covers connection refusal, DNS failures and timeouts.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The base URL and resource path did not form a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The server answered 2xx but the body was not JSON.
    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

impl FetchError {
    /// Numeric status for HTTP failures, `None` otherwise.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors surfaced by the transport and the query executor.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Every enabled strategy failed.
    ///
    /// Only reachable when the local sample responder is disabled; the attempt
    /// log is kept for diagnostics.
    #[error("All {} transport strategies failed. Last error: {last_error}", .attempts.len())]
    AllStrategiesExhausted {
        attempts: Vec<TransportAttempt>,
        last_error: String,
    },

    /// The server returned a FHIR OperationOutcome instead of data.
    #[error("Server returned an OperationOutcome: {0}")]
    OperationOutcome(String),

    /// A read by id did not find the requested resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The response parsed, but not into the shape the caller expected.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A fetch failure passed through unchanged.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Result type alias for transport and executor operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Presentational category of a [`FormattedResult`].
///
/// The external UI uses it to pick styling; it never changes control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Success,
    Warning,
    Error,
    Info,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResultKind::Success => "success",
            ResultKind::Warning => "warning",
            ResultKind::Error => "error",
            ResultKind::Info => "info",
        };
        f.write_str(label)
    }
}

/// The `{type, content}` record handed to the presentation layer for every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedResult {
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub content: String,
}

impl FormattedResult {
    pub fn new(kind: ResultKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn success(content: impl Into<String>) -> Self {
        Self::new(ResultKind::Success, content)
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self::new(ResultKind::Warning, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ResultKind::Error, content)
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(ResultKind::Info, content)
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResultKind::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_result_serializes_type_field() {
        let result = FormattedResult::warning("No patients found.");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["type"], "warning");
        assert_eq!(json["content"], "No patients found.");
    }

    #[test]
    fn test_fetch_error_status() {
        let err = FetchError::Http {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404: Not Found");
        assert_eq!(FetchError::Network("refused".into()).status(), None);
    }
}
