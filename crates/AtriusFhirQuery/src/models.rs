//! Request and response models for the query server

use atrius_fhir_query::quality::Band;
use atrius_fhir_query::session::ProviderCredentials;
use atrius_fhir_query::{BandScheme, Provider, QualityAssessment, Session, SourceStatus};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ServerError, ServerResult};

/// Body of `POST /query`
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

/// Body of `POST /assess`
#[derive(Debug, Default, Deserialize)]
pub struct AssessRequest {
    /// Server to assess instead of the session's
    pub server: Option<String>,

    /// Banding for the label; defaults to the two-level availability scheme
    pub band_scheme: Option<BandScheme>,
}

/// Response of `POST /assess`
#[derive(Debug, Serialize)]
pub struct AssessResponse {
    #[serde(flatten)]
    pub assessment: QualityAssessment,
    pub band: Band,
}

/// Current session settings. The API key itself is never echoed.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub server: String,
    pub smart_mode: bool,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub has_api_key: bool,
    pub status: SourceStatus,
    pub indicator: String,
}

impl SessionView {
    pub fn from_session(session: &Session) -> Self {
        let credentials = session.credentials();
        let status = session.status();
        Self {
            server: session.endpoint().to_string(),
            smart_mode: session.smart_mode(),
            provider: credentials.as_ref().map(|c| c.provider),
            model: credentials
                .as_ref()
                .and_then(|c| c.model.clone())
                .or_else(|| session.preferred_model()),
            has_api_key: credentials.is_some(),
            indicator: status.indicator(),
            status,
        }
    }
}

/// Body of `PUT /session`; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct SessionUpdate {
    pub server: Option<String>,
    pub smart_mode: Option<bool>,
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Drop stored credentials
    #[serde(default)]
    pub clear_credentials: bool,
}

impl SessionUpdate {
    /// Validate the update and apply it to `session`.
    ///
    /// Returns whether the server endpoint changed.
    pub fn apply(self, session: &Session) -> ServerResult<bool> {
        let server = match self.server {
            Some(server) => Some(validate_server(&server)?),
            None => None,
        };

        let provider = match self.provider.as_deref() {
            Some(p) => Some(p.parse::<Provider>().map_err(ServerError::BadRequest)?),
            None => None,
        };

        if self.clear_credentials {
            session.set_credentials(None);
        } else if let Some(api_key) = self.api_key.filter(|k| !k.trim().is_empty()) {
            let provider = provider
                .or_else(|| session.credentials().map(|c| c.provider))
                .ok_or_else(|| {
                    ServerError::BadRequest("provider is required with api_key".to_string())
                })?;
            session.set_credentials(Some(ProviderCredentials {
                provider,
                api_key,
                model: self.model.clone(),
            }));
        } else if let Some(mut credentials) = session.credentials() {
            if let Some(provider) = provider {
                credentials.provider = provider;
            }
            if self.model.is_some() {
                credentials.model = self.model.clone();
            }
            session.set_credentials(Some(credentials));
        }

        if let Some(model) = self.model {
            session.set_preferred_model(Some(model));
        }
        if let Some(enabled) = self.smart_mode {
            session.set_smart_mode(enabled);
        }

        let changed = match server {
            Some(server) if server != *session.endpoint() => {
                session.set_endpoint(server);
                true
            }
            _ => false,
        };
        Ok(changed)
    }
}

/// Require an absolute http(s) URL; trailing slashes are dropped.
pub fn validate_server(server: &str) -> ServerResult<String> {
    let trimmed = server.trim().trim_end_matches('/');
    let url = Url::parse(trimmed)
        .map_err(|e| ServerError::BadRequest(format!("Invalid server URL '{}': {}", server, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ServerError::BadRequest(format!(
            "Server URL must use http or https, got '{}'",
            url.scheme()
        )));
    }
    Ok(trimmed.to_string())
}
