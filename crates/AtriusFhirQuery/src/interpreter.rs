//! FHIR response interpreter.
//!
//! Projects raw FHIR JSON into read-only views carrying only the fields the
//! formatters and the quality scorer need. Interpretation never fails: a body
//! without a recognised `resourceType` becomes [`ResourceView::Other`].
//!
//! The helpers [`format_name`], [`code_text`] and [`observation_value`] are
//! pure and shared with the executor.

use chrono::{Datelike, NaiveDate};
use serde_json::Value;

use crate::quality::{Issue, IssueSeverity};
use crate::{QueryError, QueryResult};

/// Shape of a fetched FHIR body.
#[derive(Debug, Clone, PartialEq)]
pub enum FhirResponse {
    Bundle(BundleView),
    Resource(ResourceView),
    OperationOutcome(OperationOutcomeView),
}

impl FhirResponse {
    /// Require a Bundle, turning an OperationOutcome into an error.
    pub fn into_bundle(self) -> QueryResult<BundleView> {
        match self {
            FhirResponse::Bundle(bundle) => Ok(bundle),
            FhirResponse::OperationOutcome(outcome) => {
                Err(QueryError::OperationOutcome(outcome.summary()))
            }
            FhirResponse::Resource(resource) => Err(QueryError::UnexpectedResponse(format!(
                "expected a Bundle, got {}",
                resource.resource_type()
            ))),
        }
    }

    /// Require the single resource `id`.
    ///
    /// A Bundle answer to a read (the local sample responder does this) is
    /// searched for an entry with that id.
    pub fn into_resource(self, id: &str) -> QueryResult<ResourceView> {
        match self {
            FhirResponse::Resource(resource) => Ok(resource),
            FhirResponse::Bundle(bundle) => bundle
                .entries
                .into_iter()
                .find(|entry| entry.id() == Some(id))
                .ok_or_else(|| QueryError::NotFound(id.to_string())),
            FhirResponse::OperationOutcome(outcome) => {
                Err(QueryError::OperationOutcome(outcome.summary()))
            }
        }
    }
}

/// A searchset or collection Bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleView {
    /// `Bundle.total`, 0 when the server omitted it.
    pub total: u64,
    pub entries: Vec<ResourceView>,
    /// Resource type of the first entry.
    pub entry_type: Option<String>,
}

impl BundleView {
    /// Number of matches to report: `total` when the server gave one, else
    /// the number of entries on this page.
    pub fn available(&self) -> u64 {
        if self.total > 0 {
            self.total
        } else {
            self.entries.len() as u64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcomeView {
    pub issues: Vec<Issue>,
}

impl OperationOutcomeView {
    /// The issue details joined into one line.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return "no issue details".to_string();
        }
        self.issues
            .iter()
            .map(|issue| issue.details.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddressView {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl AddressView {
    /// `City, State Country`, with missing parts left blank.
    pub fn display(&self) -> String {
        format!(
            "{}, {} {}",
            self.city.as_deref().unwrap_or(""),
            self.state.as_deref().unwrap_or(""),
            self.country.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientView {
    pub id: String,
    pub name: String,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub address: Option<AddressView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionView {
    pub id: String,
    pub code: String,
    pub clinical_status: Option<String>,
    pub onset: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationView {
    pub id: String,
    pub code: String,
    pub value: String,
    pub status: Option<String>,
    pub effective: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MedicationRequestView {
    pub id: String,
    pub medication: String,
    pub status: Option<String>,
    pub intent: Option<String>,
    pub authored_on: Option<String>,
    pub dosage: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarePlanView {
    pub id: String,
    pub title: Option<String>,
    pub status: Option<String>,
    pub intent: Option<String>,
    pub created: Option<String>,
    pub subject: Option<String>,
}

/// A single resource, reduced to the fields formatters use.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceView {
    Patient(PatientView),
    Condition(ConditionView),
    Observation(ObservationView),
    MedicationRequest(MedicationRequestView),
    CarePlan(CarePlanView),
    Other {
        resource_type: String,
        id: Option<String>,
        subject: Option<String>,
    },
}

impl ResourceView {
    pub fn from_json(json: &Value) -> Self {
        let resource_type = str_field(json, "resourceType").unwrap_or_else(|| "Unknown".into());
        let id = str_field(json, "id").unwrap_or_default();
        let subject = json
            .pointer("/subject/reference")
            .and_then(Value::as_str)
            .map(str::to_string);

        match resource_type.as_str() {
            "Patient" => ResourceView::Patient(PatientView {
                id,
                name: format_name(json.get("name")),
                gender: str_field(json, "gender"),
                birth_date: str_field(json, "birthDate"),
                address: json
                    .get("address")
                    .and_then(|a| a.get(0))
                    .map(|addr| AddressView {
                        city: str_field(addr, "city"),
                        state: str_field(addr, "state"),
                        country: str_field(addr, "country"),
                    }),
            }),
            "Condition" => ResourceView::Condition(ConditionView {
                id,
                code: code_text(json.get("code")),
                clinical_status: json
                    .pointer("/clinicalStatus/coding/0/code")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                onset: str_field(json, "onsetDateTime"),
                subject,
            }),
            "Observation" => ResourceView::Observation(ObservationView {
                id,
                code: code_text(json.get("code")),
                value: observation_value(json),
                status: str_field(json, "status"),
                effective: str_field(json, "effectiveDateTime"),
                subject,
            }),
            "MedicationRequest" => ResourceView::MedicationRequest(MedicationRequestView {
                id,
                medication: code_text(json.get("medicationCodeableConcept")),
                status: str_field(json, "status"),
                intent: str_field(json, "intent"),
                authored_on: str_field(json, "authoredOn"),
                dosage: json
                    .pointer("/dosageInstruction/0/text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                subject,
            }),
            "CarePlan" => ResourceView::CarePlan(CarePlanView {
                id,
                title: str_field(json, "title"),
                status: str_field(json, "status"),
                intent: str_field(json, "intent"),
                created: str_field(json, "created"),
                subject,
            }),
            _ => ResourceView::Other {
                resource_type,
                id: if id.is_empty() { None } else { Some(id) },
                subject,
            },
        }
    }

    pub fn resource_type(&self) -> &str {
        match self {
            ResourceView::Patient(_) => "Patient",
            ResourceView::Condition(_) => "Condition",
            ResourceView::Observation(_) => "Observation",
            ResourceView::MedicationRequest(_) => "MedicationRequest",
            ResourceView::CarePlan(_) => "CarePlan",
            ResourceView::Other { resource_type, .. } => resource_type,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ResourceView::Patient(p) => Some(p.id.as_str()),
            ResourceView::Condition(c) => Some(c.id.as_str()),
            ResourceView::Observation(o) => Some(o.id.as_str()),
            ResourceView::MedicationRequest(m) => Some(m.id.as_str()),
            ResourceView::CarePlan(c) => Some(c.id.as_str()),
            ResourceView::Other { id, .. } => id.as_deref(),
        }
    }

    /// `subject.reference`, e.g. `Patient/123`.
    pub fn subject_reference(&self) -> Option<&str> {
        match self {
            ResourceView::Patient(_) => None,
            ResourceView::Condition(c) => c.subject.as_deref(),
            ResourceView::Observation(o) => o.subject.as_deref(),
            ResourceView::MedicationRequest(m) => m.subject.as_deref(),
            ResourceView::CarePlan(c) => c.subject.as_deref(),
            ResourceView::Other { subject, .. } => subject.as_deref(),
        }
    }

    /// Last path segment of the subject reference.
    pub fn subject_id(&self) -> Option<&str> {
        self.subject_reference()
            .and_then(|reference| reference.rsplit('/').next())
            .filter(|id| !id.is_empty())
    }
}

/// Dispatch on `resourceType`.
pub fn interpret(json: &Value) -> FhirResponse {
    match json.get("resourceType").and_then(Value::as_str) {
        Some("Bundle") => {
            let entries: Vec<ResourceView> = json
                .get("entry")
                .and_then(Value::as_array)
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| entry.get("resource"))
                        .map(ResourceView::from_json)
                        .collect()
                })
                .unwrap_or_default();

            FhirResponse::Bundle(BundleView {
                total: json.get("total").and_then(Value::as_u64).unwrap_or(0),
                entry_type: entries.first().map(|e| e.resource_type().to_string()),
                entries,
            })
        }
        Some("OperationOutcome") => FhirResponse::OperationOutcome(OperationOutcomeView {
            issues: json
                .get("issue")
                .and_then(Value::as_array)
                .map(|issues| issues.iter().map(outcome_issue).collect())
                .unwrap_or_default(),
        }),
        _ => FhirResponse::Resource(ResourceView::from_json(json)),
    }
}

fn outcome_issue(issue: &Value) -> Issue {
    let severity = match issue.get("severity").and_then(Value::as_str) {
        Some("fatal") | Some("error") => IssueSeverity::Error,
        Some("warning") => IssueSeverity::Warning,
        _ => IssueSeverity::Info,
    };
    let details = issue
        .get("diagnostics")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| code_text(issue.get("details")));

    Issue {
        severity,
        code: str_field(issue, "code").unwrap_or_else(|| "unknown".into()),
        details,
    }
}

/// Display name from a `HumanName` array: given names, then family.
///
/// ```
/// use atrius_fhir_query::interpreter::format_name;
/// use serde_json::json;
///
/// let names = json!([{ "given": ["Jane"], "family": "Doe" }]);
/// assert_eq!(format_name(Some(&names)), "Jane Doe");
/// assert_eq!(format_name(None), "Unknown Name");
/// ```
pub fn format_name(names: Option<&Value>) -> String {
    let Some(name) = names.and_then(|n| n.get(0)) else {
        return "Unknown Name".to_string();
    };

    let given = name
        .get("given")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let family = name.get("family").and_then(Value::as_str).unwrap_or("");

    let full = format!("{} {}", given, family).trim().to_string();
    if full.is_empty() {
        "Unknown Name".to_string()
    } else {
        full
    }
}

/// Text of a `CodeableConcept`: `text`, then the first coding's display,
/// then its code.
pub fn code_text(code: Option<&Value>) -> String {
    let Some(code) = code else {
        return "Unknown".to_string();
    };

    if let Some(text) = code.get("text").and_then(Value::as_str) {
        return text.to_string();
    }

    code.pointer("/coding/0/display")
        .and_then(Value::as_str)
        .or_else(|| code.pointer("/coding/0/code").and_then(Value::as_str))
        .unwrap_or("Unknown")
        .to_string()
}

/// Observation value as text.
pub fn observation_value(observation: &Value) -> String {
    if let Some(quantity) = observation.get("valueQuantity") {
        let value = match quantity.get("value") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let unit = quantity.get("unit").and_then(Value::as_str).unwrap_or("");
        return format!("{} {}", value, unit).trim().to_string();
    }

    if let Some(text) = observation.get("valueString").and_then(Value::as_str) {
        return text.to_string();
    }

    if let Some(concept) = observation.get("valueCodeableConcept") {
        return code_text(Some(concept));
    }

    "No value recorded".to_string()
}

/// Date portion of a FHIR date or dateTime.
pub fn display_date(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v.get(..10).unwrap_or(v),
        _ => "Unknown date",
    }
}

/// Completed years between `birth_date` and `today`.
pub fn age_on(birth_date: &str, today: NaiveDate) -> Option<i32> {
    let birth = NaiveDate::parse_from_str(display_date(Some(birth_date)), "%Y-%m-%d").ok()?;
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    Some(age)
}

/// Year component of a FHIR date (`YYYY`, `YYYY-MM` or `YYYY-MM-DD`).
pub fn birth_year(birth_date: &str) -> Option<i32> {
    birth_date.get(..4)?.parse().ok()
}

fn str_field(json: &Value, key: &str) -> Option<String> {
    json.get(key).and_then(Value::as_str).map(str::to_string)
}
