//! Session context shared by the query pipeline.
//!
//! A [`Session`] replaces the page-global state of a browser client: the
//! selected FHIR server, the smart-mode toggle, cloud reasoning credentials and
//! the source status indicator. The calling layer (CLI, HTTP handler, test)
//! owns it and hands an `Arc<Session>` to the components that need it.
//!
//! Writes are last-write-wins. The endpoint is read at call time, so a
//! multi-step query may observe a server change made while it is running.

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use crate::reasoning::Provider;

/// Which data source is currently answering queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceStatus {
    /// The endpoint changed and no request has completed since.
    Connecting,
    /// The selected server answered.
    Connected { endpoint: String },
    /// The selected server failed and an alternate server answered instead.
    Substituted { requested: String, active: String },
    /// No server answered; built-in sample data was served.
    LocalSample,
    /// A connection test against the selected server failed.
    Unreachable { endpoint: String },
}

impl SourceStatus {
    /// One-line indicator for status bars.
    pub fn indicator(&self) -> String {
        match self {
            SourceStatus::Connecting => "🟡 Connecting...".to_string(),
            SourceStatus::Connected { endpoint } => format!("🟢 Connected to {}", endpoint),
            SourceStatus::Substituted { requested, active } => {
                format!("🟠 {} unavailable, using {}", requested, active)
            }
            SourceStatus::LocalSample => "🟠 Offline, showing sample data".to_string(),
            SourceStatus::Unreachable { endpoint } => {
                format!("🔴 Connection to {} failed", endpoint)
            }
        }
    }
}

/// Credentials for the cloud reasoning provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub provider: Provider,
    pub api_key: String,
    /// Overrides the provider's default model when set.
    pub model: Option<String>,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// Process-wide, user-settable query state.
pub struct Session {
    endpoint: ArcSwap<String>,
    smart_mode: AtomicBool,
    credentials: RwLock<Option<ProviderCredentials>>,
    preferred_model: RwLock<Option<String>>,
    status: watch::Sender<SourceStatus>,
}

impl Session {
    /// Create a session pointed at `endpoint` (trailing `/` removed).
    pub fn new(endpoint: impl Into<String>) -> Self {
        let (status, _) = watch::channel(SourceStatus::Connecting);
        Self {
            endpoint: ArcSwap::from_pointee(normalize(endpoint.into())),
            smart_mode: AtomicBool::new(false),
            credentials: RwLock::new(None),
            preferred_model: RwLock::new(None),
            status,
        }
    }

    /// The currently selected FHIR base URL.
    pub fn endpoint(&self) -> Arc<String> {
        self.endpoint.load_full()
    }

    /// Select a different FHIR server. Resets the status to `Connecting`.
    pub fn set_endpoint(&self, endpoint: impl Into<String>) {
        self.switch_endpoint(endpoint);
        self.set_status(SourceStatus::Connecting);
    }

    /// Swap the endpoint without touching the status indicator.
    pub(crate) fn switch_endpoint(&self, endpoint: impl Into<String>) {
        self.endpoint.store(Arc::new(normalize(endpoint.into())));
    }

    pub fn smart_mode(&self) -> bool {
        self.smart_mode.load(Ordering::Relaxed)
    }

    pub fn set_smart_mode(&self, enabled: bool) {
        self.smart_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn credentials(&self) -> Option<ProviderCredentials> {
        self.credentials.read().clone()
    }

    pub fn set_credentials(&self, credentials: Option<ProviderCredentials>) {
        *self.credentials.write() = credentials;
    }

    /// Last model the user picked; kept only for the lifetime of the session.
    pub fn preferred_model(&self) -> Option<String> {
        self.preferred_model.read().clone()
    }

    pub fn set_preferred_model(&self, model: Option<String>) {
        *self.preferred_model.write() = model;
    }

    pub fn status(&self) -> SourceStatus {
        self.status.borrow().clone()
    }

    /// Receive every status change from now on.
    pub fn subscribe_status(&self) -> watch::Receiver<SourceStatus> {
        self.status.subscribe()
    }

    pub fn set_status(&self, status: SourceStatus) {
        self.status.send_replace(status);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint())
            .field("smart_mode", &self.smart_mode())
            .field("credentials", &self.credentials())
            .field("status", &self.status())
            .finish()
    }
}

fn normalize(endpoint: String) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_normalized_and_last_write_wins() {
        let session = Session::new("https://a.example.org/fhir/");
        assert_eq!(session.endpoint().as_str(), "https://a.example.org/fhir");

        session.set_endpoint("https://b.example.org/fhir");
        session.set_endpoint("https://c.example.org/fhir");
        assert_eq!(session.endpoint().as_str(), "https://c.example.org/fhir");
        assert_eq!(session.status(), SourceStatus::Connecting);
    }

    #[test]
    fn test_status_subscribers_see_changes() {
        let session = Session::new("https://a.example.org/fhir");
        let rx = session.subscribe_status();

        session.set_status(SourceStatus::LocalSample);

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), SourceStatus::LocalSample);
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = ProviderCredentials {
            provider: Provider::OpenAi,
            api_key: "sk-secret".to_string(),
            model: None,
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_smart_mode_toggle() {
        let session = Session::new("https://a.example.org/fhir");
        assert!(!session.smart_mode());
        session.set_smart_mode(true);
        assert!(session.smart_mode());
    }
}
