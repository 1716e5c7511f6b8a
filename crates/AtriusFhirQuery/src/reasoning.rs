//! Cloud reasoning adapter.
//!
//! Sends the user's text to an OpenAI- or Anthropic-shaped chat API together
//! with a fixed system prompt, and parses the JSON action plan out of the
//! reply. Parsing degrades instead of failing:
//!
//! 1. the whole reply as JSON,
//! 2. the text between the first `{` and the last `}`,
//! 3. that text with comments and trailing commas removed,
//! 4. keyword extraction, producing a default search plan marked `fallback`.
//!
//! Provider failures surface as [`ProviderError`]; callers are expected to fall
//! back to [`crate::classifier::classify`] rather than show them as failures.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classifier::{BirthRange, Gender, QueryIntent};
use crate::session::ProviderCredentials;

/// Resources the planner may use.
pub const SUPPORTED_RESOURCES: [&str; 6] = [
    "Patient",
    "Condition",
    "Observation",
    "MedicationRequest",
    "CarePlan",
    "Encounter",
];

pub const SYSTEM_PROMPT: &str = r#"You are a FHIR query planner. Convert the user's healthcare question into FHIR REST operations.

Available FHIR resources:
- Patient: demographics. Search parameters: name, family, given, gender, birthdate (ge/le prefixes), _id
- Condition: diagnoses. Search parameters: patient, code, code:text, clinical-status
- Observation: labs and vitals. Search parameters: patient, code, category, date, _sort
- MedicationRequest: prescriptions. Search parameters: patient, status, intent
- CarePlan: care plans. Search parameters: patient, status
- Encounter: visits. Search parameters: patient, date, class

Respond with a single JSON object in exactly this format and nothing else:
{
  "reasoning": "one sentence describing your understanding of the request",
  "fhir_operations": [
    {
      "resource": "Patient",
      "operation": "search",
      "parameters": { "gender": "female" },
      "purpose": "why this operation is needed"
    }
  ],
  "response_format": "how the results should be presented"
}

Use "operation": "read" with a parameter "id" to fetch one resource by id.
Express birth date ranges as "birthdate": ["ge1967-07-01", "le1967-12-31"]."#;

/// Errors from the cloud reasoning provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No API key was configured for the session.
    #[error("No API key configured for the reasoning provider")]
    MissingCredentials,

    /// The provider could not be reached.
    #[error("Provider network error: {0}")]
    Network(String),

    /// The provider rejected the request.
    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The reply carried no text.
    #[error("Provider reply contained no text")]
    EmptyReply,

    /// The reply envelope was not the expected JSON shape.
    #[error("Provider reply could not be parsed: {0}")]
    Unparseable(String),
}

/// Supported chat APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => f.write_str("openai"),
            Provider::Anthropic => f.write_str("anthropic"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" | "gpt" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            other => Err(format!(
                "unknown provider '{}', expected 'openai' or 'anthropic'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub openai_model: String,
    pub anthropic_model: String,
    pub anthropic_version: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com".to_string(),
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            anthropic_model: "claude-3-5-haiku-20241022".to_string(),
            anthropic_version: "2023-06-01".to_string(),
            max_tokens: 1000,
            temperature: 0.1,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ReasoningConfig {
    pub fn default_model(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai_model,
            Provider::Anthropic => &self.anthropic_model,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanOperation {
    #[default]
    Search,
    Read,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirOperation {
    pub resource: String,
    #[serde(default)]
    pub operation: PlanOperation,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub purpose: String,
}

/// Structured plan returned by the provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionPlan {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub fhir_operations: Vec<FhirOperation>,
    #[serde(default)]
    pub response_format: String,
}

/// A parsed plan and whether it came from the last-resort keyword scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasonedPlan {
    pub plan: ActionPlan,
    pub fallback: bool,
}

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)(^|\s)//[^\n]*").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());

/// Parse a provider reply into a plan. Never fails.
pub fn parse_plan(reply: &str) -> ReasonedPlan {
    let reply = reply.trim();

    if let Ok(plan) = serde_json::from_str::<ActionPlan>(reply) {
        return ReasonedPlan { plan, fallback: false };
    }

    if let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) {
        if start < end {
            let candidate = &reply[start..=end];
            if let Ok(plan) = serde_json::from_str::<ActionPlan>(candidate) {
                debug!("Parsed plan from embedded JSON object");
                return ReasonedPlan { plan, fallback: false };
            }

            let stripped = BLOCK_COMMENT.replace_all(candidate, "");
            let stripped = LINE_COMMENT.replace_all(&stripped, "$1");
            let stripped = TRAILING_COMMA.replace_all(&stripped, "$1");
            if let Ok(plan) = serde_json::from_str::<ActionPlan>(&stripped) {
                debug!("Parsed plan after stripping comments");
                return ReasonedPlan { plan, fallback: false };
            }
        }
    }

    warn!("Provider reply was not valid JSON; extracting keywords");
    keyword_plan(reply)
}

fn keyword_plan(reply: &str) -> ReasonedPlan {
    let lower = reply.to_lowercase();
    let resource = SUPPORTED_RESOURCES
        .iter()
        .filter(|r| **r != "Patient")
        .find(|r| lower.contains(&r.to_lowercase()))
        .copied()
        .unwrap_or("Patient");

    let reasoning = reply.lines().next().unwrap_or_default().trim().to_string();

    ReasonedPlan {
        plan: ActionPlan {
            reasoning,
            fhir_operations: vec![FhirOperation {
                resource: resource.to_string(),
                operation: PlanOperation::Search,
                parameters: Map::new(),
                purpose: String::new(),
            }],
            response_format: String::new(),
        },
        fallback: true,
    }
}

impl ActionPlan {
    /// Intent equivalent to the plan's first operation, if any.
    pub fn to_intent(&self) -> Option<QueryIntent> {
        let op = self.fhir_operations.first()?;
        let params = &op.parameters;
        let patient = param_str(params, "patient").or_else(|| param_str(params, "subject"));

        match (op.resource.as_str(), op.operation) {
            ("Patient", PlanOperation::Read) => {
                let id = param_str(params, "id").or_else(|| param_str(params, "_id"))?;
                Some(QueryIntent::PatientById(id))
            }
            ("Patient", PlanOperation::Search) => patient_search_intent(params),
            ("Condition", PlanOperation::Search) => {
                let text = param_str(params, "code:text")
                    .or_else(|| param_str(params, "_text"))
                    .or_else(|| param_str(params, "code"));
                match (text, patient) {
                    (Some(text), None) => Some(QueryIntent::PatientsByCondition(text)),
                    (_, patient) => Some(QueryIntent::Conditions(patient)),
                }
            }
            ("Observation", PlanOperation::Search) => Some(QueryIntent::Observations(patient)),
            ("MedicationRequest", PlanOperation::Search) => Some(QueryIntent::Medications(patient)),
            ("CarePlan", PlanOperation::Search) => Some(QueryIntent::CarePlans(patient)),
            _ => None,
        }
    }
}

fn patient_search_intent(params: &Map<String, Value>) -> Option<QueryIntent> {
    if let Some(id) = param_str(params, "_id") {
        return Some(QueryIntent::PatientById(id));
    }
    if let Some(name) = ["name", "family", "given"]
        .iter()
        .find_map(|key| param_str(params, key))
    {
        return Some(QueryIntent::PatientByName(name));
    }
    if params.contains_key("birthdate") || params.contains_key("birthdate:le") {
        return birthdate_range(params).map(QueryIntent::PatientsByBirthRange);
    }
    if let Some(gender) = param_str(params, "gender") {
        return match gender.to_lowercase().as_str() {
            "male" => Some(QueryIntent::PatientsByGender(Gender::Male)),
            "female" => Some(QueryIntent::PatientsByGender(Gender::Female)),
            _ => None,
        };
    }
    Some(QueryIntent::ListPatients)
}

/// Accepts `birthdate: ["geX", "leY"]`, `birthdate: "geX"` with
/// `birthdate:le: "Y"`, a bare year, or an exact date.
fn birthdate_range(params: &Map<String, Value>) -> Option<BirthRange> {
    let mut start = None;
    let mut end = None;

    let mut values = param_list(params, "birthdate");
    values.extend(
        param_list(params, "birthdate:le")
            .into_iter()
            .map(|v| format!("le{}", v.trim_start_matches("le"))),
    );

    for value in values {
        let (prefix, date) = match value.get(..2) {
            Some(p @ ("ge" | "gt" | "le" | "lt" | "eq")) => (p.to_string(), value[2..].to_string()),
            _ => ("eq".to_string(), value.clone()),
        };

        if date.len() == 4 {
            let year: i32 = date.parse().ok()?;
            let whole = BirthRange::whole_year(year)?;
            match prefix.as_str() {
                "ge" | "gt" => start = Some(whole.start),
                "le" | "lt" => end = Some(whole.end),
                _ => {
                    start = Some(whole.start);
                    end = Some(whole.end);
                }
            }
            continue;
        }

        let date = NaiveDate::parse_from_str(date.get(..10).unwrap_or(&date), "%Y-%m-%d").ok()?;
        match prefix.as_str() {
            "ge" | "gt" => start = Some(date),
            "le" | "lt" => end = Some(date),
            _ => {
                start = Some(date);
                end = Some(date);
            }
        }
    }

    match (start, end) {
        (Some(s), Some(e)) => Some(BirthRange::new(s, e)),
        (Some(s), None) => Some(BirthRange::new(s, BirthRange::whole_year(s.year())?.end)),
        (None, Some(e)) => Some(BirthRange::new(BirthRange::whole_year(e.year())?.start, e)),
        (None, None) => None,
    }
}

fn param_list(params: &Map<String, Value>, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(value_as_string).collect(),
        Some(value) => value_as_string(value).into_iter().collect(),
        None => Vec::new(),
    }
}

fn param_str(params: &Map<String, Value>, key: &str) -> Option<String> {
    param_list(params, key).into_iter().next().filter(|s| !s.is_empty())
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Client for the configured chat provider.
pub struct CloudReasoningAdapter {
    client: Client,
    config: ReasoningConfig,
}

impl CloudReasoningAdapter {
    pub fn new(config: ReasoningConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(config.timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    /// Model used for `credentials`: the explicit choice, else the
    /// provider default.
    pub fn model_for<'a>(&'a self, credentials: &'a ProviderCredentials) -> &'a str {
        credentials
            .model
            .as_deref()
            .unwrap_or_else(|| self.config.default_model(credentials.provider))
    }

    /// Ask the provider for a plan.
    pub async fn reason(
        &self,
        text: &str,
        credentials: &ProviderCredentials,
    ) -> Result<ReasonedPlan, ProviderError> {
        if credentials.api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredentials);
        }

        let model = self.model_for(credentials);
        info!("Requesting plan from {} ({})", credentials.provider, model);

        let request = match credentials.provider {
            Provider::OpenAi => self
                .client
                .post(format!(
                    "{}/v1/chat/completions",
                    self.config.openai_base_url.trim_end_matches('/')
                ))
                .bearer_auth(&credentials.api_key)
                .json(&json!({
                    "model": model,
                    "messages": [
                        { "role": "system", "content": SYSTEM_PROMPT },
                        { "role": "user", "content": text }
                    ],
                    "temperature": self.config.temperature,
                    "max_tokens": self.config.max_tokens
                })),
            Provider::Anthropic => self
                .client
                .post(format!(
                    "{}/v1/messages",
                    self.config.anthropic_base_url.trim_end_matches('/')
                ))
                .header("x-api-key", &credentials.api_key)
                .header("anthropic-version", &self.config.anthropic_version)
                .json(&json!({
                    "model": model,
                    "max_tokens": self.config.max_tokens,
                    "system": SYSTEM_PROMPT,
                    "messages": [{ "role": "user", "content": text }]
                })),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Unparseable(e.to_string()))?;

        let reply = extract_reply(credentials.provider, &envelope)?;
        Ok(parse_plan(&reply))
    }
}

/// The assistant text inside a provider response envelope.
pub fn extract_reply(provider: Provider, envelope: &Value) -> Result<String, ProviderError> {
    let pointer = match provider {
        Provider::OpenAi => "/choices/0/message/content",
        Provider::Anthropic => "/content/0/text",
    };
    envelope
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .ok_or(ProviderError::EmptyReply)
}
