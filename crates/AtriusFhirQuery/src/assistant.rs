//! The end-to-end query pipeline.
//!
//! Free text goes to the cloud reasoning adapter when smart mode is on and
//! credentials are present, otherwise straight to the classifier. Either way the
//! resulting intent is run by the [`QueryExecutor`]. Provider failures never
//! reach the caller: they are logged and the classifier takes over.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::FormattedResult;
use crate::classifier::classify;
use crate::executor::QueryExecutor;
use crate::fetcher::ResourceFetcher;
use crate::reasoning::{CloudReasoningAdapter, ReasoningConfig};
use crate::session::{ProviderCredentials, Session};
use crate::transport::{ResilientTransport, TransportConfig};

pub struct FhirAssistant {
    executor: QueryExecutor,
    reasoner: CloudReasoningAdapter,
}

impl FhirAssistant {
    pub fn new(executor: QueryExecutor, reasoner: CloudReasoningAdapter) -> Self {
        Self { executor, reasoner }
    }

    /// Assistant talking to FHIR servers over HTTP.
    pub fn with_http(session: Arc<Session>, config: TransportConfig) -> Self {
        let transport = ResilientTransport::with_http(session, config);
        Self::new(
            QueryExecutor::new(Arc::new(transport)),
            CloudReasoningAdapter::new(ReasoningConfig::default()),
        )
    }

    /// Assistant over an arbitrary fetcher.
    pub fn with_fetcher(
        fetcher: Arc<dyn ResourceFetcher>,
        session: Arc<Session>,
        config: TransportConfig,
    ) -> Self {
        let transport = ResilientTransport::new(fetcher, session, config);
        Self::new(
            QueryExecutor::new(Arc::new(transport)),
            CloudReasoningAdapter::new(ReasoningConfig::default()),
        )
    }

    pub fn with_reasoning_config(mut self, config: ReasoningConfig) -> Self {
        self.reasoner = CloudReasoningAdapter::new(config);
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        self.executor.session()
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Answer one free-text question.
    pub async fn process(&self, text: &str) -> FormattedResult {
        let text = text.trim();
        let session = self.session();

        if session.smart_mode() {
            match self.credentials() {
                Some(credentials) => return self.process_with_reasoning(text, &credentials).await,
                None => debug!("Smart mode is on but no credentials are set"),
            }
        }

        let intent = classify(text);
        info!("Classified query as {}", intent.name());
        self.executor.execute(&intent).await
    }

    /// Session credentials, with the preferred model filled in when the
    /// credentials name none.
    fn credentials(&self) -> Option<ProviderCredentials> {
        let session = self.session();
        let mut credentials = session.credentials()?;
        if credentials.model.is_none() {
            credentials.model = session.preferred_model();
        }
        Some(credentials)
    }

    async fn process_with_reasoning(
        &self,
        text: &str,
        credentials: &ProviderCredentials,
    ) -> FormattedResult {
        let explanation = match self.reasoner.reason(text, credentials).await {
            Ok(reasoned) if !reasoned.fallback => match reasoned.plan.to_intent() {
                Some(intent) => {
                    info!("Provider planned a {} query", intent.name());
                    let mut result = self.executor.execute(&intent).await;
                    let reasoning = reasoned.plan.reasoning.trim();
                    if !reasoning.is_empty() {
                        result.content = format!("🤖 **AI Analysis**: {}\n\n{}", reasoning, result.content);
                    }
                    return result;
                }
                None => {
                    warn!("Provider plan maps to no supported query; using pattern matching");
                    reasoned.plan.reasoning
                }
            },
            Ok(reasoned) => {
                warn!("Provider reply needed keyword extraction; using pattern matching");
                reasoned.plan.reasoning
            }
            Err(e) => {
                warn!("Cloud reasoning failed, using pattern matching: {}", e);
                String::new()
            }
        };

        let intent = classify(text);
        info!("Classified query as {}", intent.name());
        let mut result = self.executor.execute(&intent).await;
        let explanation = explanation.trim();
        if !explanation.is_empty() {
            result.content = format!("🤖 {}\n\n{}", explanation, result.content);
        }
        result
    }
}
