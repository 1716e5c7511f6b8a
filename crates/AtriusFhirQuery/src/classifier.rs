//! Free-text query classifier.
//!
//! [`classify`] runs an ordered list of rules over the input and returns the
//! intent produced by the first rule that matches. Categories overlap
//! ("meds for patient X" mentions a patient), so the order is significant:
//!
//! | #  | Rule                          | Intent                         |
//! |----|-------------------------------|--------------------------------|
//! | 1  | diabetic + over/above/older   | `PatientsByConditionOverAge`   |
//! | 2  | llm / model / ai              | `SystemInfo`                   |
//! | 3  | tell me / more about NAME     | `ClinicalSummary(Name)`        |
//! | 4  | summary of/for NAME or UUID   | `ClinicalSummary`              |
//! | 5  | all patients                  | `ListPatients`                 |
//! | 6  | patient + condition text      | `PatientsByCondition`          |
//! | 7  | get/show patient ID or NAME   | `PatientById` / `PatientByName`|
//! | 8  | meds/drug + for/patient       | `Medications`                  |
//! | 9  | observation / lab / vital     | `Observations`                 |
//! | 10 | medication / prescription     | `Medications`                  |
//! | 11 | condition / diagnosis         | `Conditions`                   |
//! | 12 | data quality                  | `AssessQuality`                |
//! | 13 | care plan                     | `CarePlans`                    |
//! | 14 | born / birth + year           | `PatientsByBirthRange`         |
//! | 15 | male / female + patient       | `PatientsByGender`             |
//! | 16 | N years old / age N           | `PatientsByAgeApprox`          |
//! | 17 | Capitalized Two-Word name     | `PatientByName`                |
//!
//! Anything else is [`QueryIntent::Unknown`], which carries [`HELP_TEXT`].

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Suggestions returned for input no rule recognises.
pub const HELP_TEXT: &str = r#"I'm not sure how to process that query. Try asking about:
- **Patients**: "Show all patients", "Find patients born in 1967", "Show male patients"
- **Conditions**: "Find patients with diabetes"
- **Medications**: "Show meds for patient e312f2f5-689d-47f9-b4dd-f6f12417322f"
- **Observations**: "Recent lab results", "Show observations for patient 123"
- **Data Quality**: "Check data quality"

Or try queries like:
- "Find patients that were born in the latter half of 1967"
- "Show female patients"
- "Get conditions for patient [ID]""#;

/// Age threshold used when a compound condition query names no number.
pub const DEFAULT_MIN_AGE: u32 = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive birth-date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BirthRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BirthRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// January 1st to December 31st of `year`.
    pub fn whole_year(year: i32) -> Option<Self> {
        Some(Self::new(
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 31)?,
        ))
    }

    /// The two `birthdate` search values, `ge{start}` and `le{end}`.
    pub fn search_values(&self) -> [String; 2] {
        [
            format!("ge{}", self.start.format("%Y-%m-%d")),
            format!("le{}", self.end.format("%Y-%m-%d")),
        ]
    }
}

/// How a clinical summary names its patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "by", content = "value", rename_all = "lowercase")]
pub enum PatientRef {
    Name(String),
    Id(String),
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", content = "params")]
pub enum QueryIntent {
    ListPatients,
    PatientById(String),
    PatientByName(String),
    PatientsByCondition(String),
    PatientsByConditionOverAge { condition: String, min_age: u32 },
    PatientsByGender(Gender),
    /// Approximate: matches the whole birth year `current_year - age`.
    PatientsByAgeApprox(u32),
    PatientsByBirthRange(BirthRange),
    Observations(Option<String>),
    Medications(Option<String>),
    Conditions(Option<String>),
    CarePlans(Option<String>),
    ClinicalSummary(PatientRef),
    AssessQuality,
    SystemInfo,
    Unknown,
}

impl QueryIntent {
    /// Stable variant name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            QueryIntent::ListPatients => "ListPatients",
            QueryIntent::PatientById(_) => "PatientById",
            QueryIntent::PatientByName(_) => "PatientByName",
            QueryIntent::PatientsByCondition(_) => "PatientsByCondition",
            QueryIntent::PatientsByConditionOverAge { .. } => "PatientsByConditionOverAge",
            QueryIntent::PatientsByGender(_) => "PatientsByGender",
            QueryIntent::PatientsByAgeApprox(_) => "PatientsByAgeApprox",
            QueryIntent::PatientsByBirthRange(_) => "PatientsByBirthRange",
            QueryIntent::Observations(_) => "Observations",
            QueryIntent::Medications(_) => "Medications",
            QueryIntent::Conditions(_) => "Conditions",
            QueryIntent::CarePlans(_) => "CarePlans",
            QueryIntent::ClinicalSummary(_) => "ClinicalSummary",
            QueryIntent::AssessQuality => "AssessQuality",
            QueryIntent::SystemInfo => "SystemInfo",
            QueryIntent::Unknown => "Unknown",
        }
    }
}

/// Input as seen by a rule: the original text and its lower-cased copy.
struct Input<'a> {
    raw: &'a str,
    lower: String,
}

impl Input<'_> {
    fn has(&self, needle: &str) -> bool {
        self.lower.contains(needle)
    }

    fn has_any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.lower.contains(n))
    }
}

struct Rule {
    name: &'static str,
    apply: fn(&Input) -> Option<QueryIntent>,
}

static RULES: &[Rule] = &[
    Rule { name: "condition-over-age", apply: condition_over_age },
    Rule { name: "system-info", apply: system_info },
    Rule { name: "tell-me-about", apply: tell_me_about },
    Rule { name: "clinical-summary", apply: clinical_summary },
    Rule { name: "all-patients", apply: all_patients },
    Rule { name: "patients-with-condition", apply: patients_with_condition },
    Rule { name: "get-patient", apply: get_patient },
    Rule { name: "medications-for-patient", apply: medications_for_patient },
    Rule { name: "observations", apply: observations },
    Rule { name: "medications", apply: medications },
    Rule { name: "conditions", apply: conditions },
    Rule { name: "data-quality", apply: data_quality },
    Rule { name: "care-plans", apply: care_plans },
    Rule { name: "birth-range", apply: birth_range },
    Rule { name: "gender", apply: gender },
    Rule { name: "age", apply: age },
    Rule { name: "capitalized-name", apply: capitalized_name },
];

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap()
});
static BARE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-zA-Z0-9]{8,}\b").unwrap());
static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static SYSTEM_WORDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(llm|model|ai)\b").unwrap());
static ABOUT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:about|on)\s+([a-zA-Z\s]+?)(?:\s*$|\s*\?)").unwrap()
});
static SUMMARY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:of|for)\s+([a-zA-Z\s]+?)(?:\s*$|\s*\?)").unwrap()
});
static PATIENTS_WITH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"patients?\s+with\s+([a-z][a-z0-9\s-]*?)\s*(?:$|[?.!,])").unwrap()
});
static GET_PATIENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:get|show)\s+patient\b").unwrap());
static GET_PATIENT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:show|get)\s+patient\s+['"]?([a-zA-Z\s]+)['"]?"#).unwrap()
});
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").unwrap());
static YEARS_OLD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s*years?\s*old|\bage\s+(?:of\s+)?(\d+)").unwrap()
});
static CAPITALIZED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:patient\s+)?\b([A-Z][a-z]+\s+[A-Z][a-z]+)\b").unwrap()
});
static MALE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bmale\b").unwrap());
static MEDICATION_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bmed(?:s|ications?)?\b|prescription|\bdrugs?\b").unwrap()
});

/// Condition keywords recognised without a "patients with" phrase, mapped to
/// the text searched for.
const CONDITION_KEYWORDS: &[(&str, &str)] = &[
    ("diabetes", "diabetes"),
    ("diabetic", "diabetes"),
    ("hypertension", "hypertension"),
    ("asthma", "asthma"),
    ("copd", "copd"),
    ("obesity", "obesity"),
    ("depression", "depression"),
];

/// Words that follow "patient"/"for"/"id" without being an identifier.
const ID_STOP_WORDS: &[&str] = &[
    "patient", "patients", "for", "id", "the", "a", "an", "me", "all", "with", "my", "this",
    "that", "named", "called",
];

/// Map free text to a [`QueryIntent`]. Pure and deterministic.
///
/// ```
/// use atrius_fhir_query::{QueryIntent, classify};
///
/// assert_eq!(classify("show all patients"), QueryIntent::ListPatients);
/// assert_eq!(
///     classify("find patients with diabetes"),
///     QueryIntent::PatientsByCondition("diabetes".to_string())
/// );
/// ```
pub fn classify(text: &str) -> QueryIntent {
    let input = Input {
        raw: text.trim(),
        lower: text.trim().to_lowercase(),
    };

    RULES
        .iter()
        .find_map(|rule| {
            (rule.apply)(&input).inspect(|intent| {
                tracing::debug!("Rule '{}' classified query as {}", rule.name, intent.name());
            })
        })
        .unwrap_or(QueryIntent::Unknown)
}

/// Find a patient identifier in free text.
///
/// Tries a UUID first, then the word after "patient", "for" or "id", then any
/// bare alphanumeric token of eight or more characters. The last two forms
/// must contain a digit (or a hyphen, after a keyword) so that ordinary words
/// and names are not mistaken for ids.
pub fn extract_patient_id(text: &str) -> Option<String> {
    if let Some(m) = UUID.find(text) {
        return Some(m.as_str().to_string());
    }

    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, '?' | '.' | ',' | '!' | '"' | '\'')))
        .collect();
    for pair in words.windows(2) {
        let keyword = pair[0].to_lowercase();
        let candidate = pair[1];
        if !matches!(keyword.as_str(), "patient" | "for" | "id") {
            continue;
        }
        if ID_STOP_WORDS.contains(&candidate.to_lowercase().as_str()) {
            continue;
        }
        let id_shaped = !candidate.is_empty()
            && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && candidate.chars().any(|c| c.is_ascii_digit() || c == '-');
        if id_shaped {
            return Some(candidate.to_string());
        }
    }

    BARE_ID
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|token| token.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

fn condition_over_age(input: &Input) -> Option<QueryIntent> {
    if !input.has_any(&["diabetic", "diabetes"]) || !input.has_any(&["over", "above", "older"]) {
        return None;
    }
    let min_age = FIRST_NUMBER
        .find(&input.lower)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_MIN_AGE);

    Some(QueryIntent::PatientsByConditionOverAge {
        condition: "diabetes".to_string(),
        min_age,
    })
}

fn system_info(input: &Input) -> Option<QueryIntent> {
    SYSTEM_WORDS
        .is_match(&input.lower)
        .then_some(QueryIntent::SystemInfo)
}

fn tell_me_about(input: &Input) -> Option<QueryIntent> {
    if !input.has_any(&["more about", "tell me about", "information about", "details about"]) {
        return None;
    }
    capture_name(&ABOUT_NAME, input.raw).map(|name| QueryIntent::ClinicalSummary(PatientRef::Name(name)))
}

fn clinical_summary(input: &Input) -> Option<QueryIntent> {
    if !input.has("summary") {
        return None;
    }
    if let Some(m) = UUID.find(input.raw) {
        return Some(QueryIntent::ClinicalSummary(PatientRef::Id(m.as_str().to_string())));
    }
    capture_name(&SUMMARY_NAME, input.raw).map(|name| QueryIntent::ClinicalSummary(PatientRef::Name(name)))
}

fn all_patients(input: &Input) -> Option<QueryIntent> {
    (input.has("all patients") || input.lower == "show patients").then_some(QueryIntent::ListPatients)
}

fn patients_with_condition(input: &Input) -> Option<QueryIntent> {
    if !input.has("patient") {
        return None;
    }

    if let Some((_, condition)) = CONDITION_KEYWORDS.iter().find(|(kw, _)| input.has(kw)) {
        return Some(QueryIntent::PatientsByCondition(condition.to_string()));
    }

    let condition = PATIENTS_WITH
        .captures(&input.lower)?
        .get(1)?
        .as_str()
        .trim()
        .to_string();
    let looks_like_lookup = condition.is_empty()
        || condition == "id"
        || condition.starts_with("id ")
        || condition.starts_with("name")
        || condition.chars().any(|c| c.is_ascii_digit());
    if looks_like_lookup {
        return None;
    }
    Some(QueryIntent::PatientsByCondition(condition))
}

fn get_patient(input: &Input) -> Option<QueryIntent> {
    if !GET_PATIENT.is_match(&input.lower) {
        return None;
    }
    if let Some(id) = extract_patient_id(input.raw) {
        return Some(QueryIntent::PatientById(id));
    }
    capture_name(&GET_PATIENT_NAME, input.raw).map(QueryIntent::PatientByName)
}

fn medications_for_patient(input: &Input) -> Option<QueryIntent> {
    if !MEDICATION_WORDS.is_match(&input.lower) || !input.has_any(&["for", "patient"]) {
        return None;
    }
    Some(QueryIntent::Medications(extract_patient_id(input.raw)))
}

fn observations(input: &Input) -> Option<QueryIntent> {
    input
        .has_any(&["observation", "lab", "vital"])
        .then(|| QueryIntent::Observations(extract_patient_id(input.raw)))
}

fn medications(input: &Input) -> Option<QueryIntent> {
    input
        .has_any(&["medication", "prescription"])
        .then(|| QueryIntent::Medications(extract_patient_id(input.raw)))
}

fn conditions(input: &Input) -> Option<QueryIntent> {
    input
        .has_any(&["condition", "diagnos"])
        .then(|| QueryIntent::Conditions(extract_patient_id(input.raw)))
}

fn data_quality(input: &Input) -> Option<QueryIntent> {
    input
        .has_any(&["data quality", "check quality"])
        .then_some(QueryIntent::AssessQuality)
}

fn care_plans(input: &Input) -> Option<QueryIntent> {
    input
        .has("care plan")
        .then(|| QueryIntent::CarePlans(extract_patient_id(input.raw)))
}

fn birth_range(input: &Input) -> Option<QueryIntent> {
    if !input.has_any(&["born", "birth"]) {
        return None;
    }
    let year: i32 = YEAR.find(&input.lower)?.as_str().parse().ok()?;

    let range = if input.has_any(&["latter half", "second half"]) {
        BirthRange::new(
            NaiveDate::from_ymd_opt(year, 7, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 31)?,
        )
    } else if input.has_any(&["first half", "early"]) {
        BirthRange::new(
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year, 6, 30)?,
        )
    } else {
        BirthRange::whole_year(year)?
    };

    Some(QueryIntent::PatientsByBirthRange(range))
}

fn gender(input: &Input) -> Option<QueryIntent> {
    if !input.has("patient") {
        return None;
    }
    if input.has("female") {
        Some(QueryIntent::PatientsByGender(Gender::Female))
    } else if MALE.is_match(&input.lower) {
        Some(QueryIntent::PatientsByGender(Gender::Male))
    } else {
        None
    }
}

fn age(input: &Input) -> Option<QueryIntent> {
    let caps = YEARS_OLD.captures(&input.lower)?;
    let years = caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()?;
    Some(QueryIntent::PatientsByAgeApprox(years))
}

fn capitalized_name(input: &Input) -> Option<QueryIntent> {
    let name = CAPITALIZED_NAME.captures(input.raw)?.get(1)?.as_str();
    Some(QueryIntent::PatientByName(name.to_string()))
}

fn capture_name(pattern: &Regex, text: &str) -> Option<String> {
    let name = pattern.captures(text)?.get(1)?.as_str().trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: (i32, u32, u32), end: (i32, u32, u32)) -> QueryIntent {
        QueryIntent::PatientsByBirthRange(BirthRange::new(
            NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
        ))
    }

    #[test]
    fn test_list_patients() {
        assert_eq!(classify("show all patients"), QueryIntent::ListPatients);
        assert_eq!(classify("Show patients"), QueryIntent::ListPatients);
    }

    #[test]
    fn test_patients_by_condition() {
        assert_eq!(
            classify("find patients with diabetes"),
            QueryIntent::PatientsByCondition("diabetes".into())
        );
        assert_eq!(
            classify("Which patients with chronic kidney disease?"),
            QueryIntent::PatientsByCondition("chronic kidney disease".into())
        );
    }

    #[test]
    fn test_medication_for_patient_outranks_patient_search() {
        assert_eq!(
            classify("Show meds for patient e312f2f5-689d-47f9-b4dd-f6f12417322f"),
            QueryIntent::Medications(Some("e312f2f5-689d-47f9-b4dd-f6f12417322f".into()))
        );
        assert_eq!(
            classify("list prescriptions for patient 592011"),
            QueryIntent::Medications(Some("592011".into()))
        );
    }

    #[test]
    fn test_med_inside_a_word_is_not_medication() {
        assert_eq!(
            classify("find patient named John Smith"),
            QueryIntent::PatientByName("John Smith".into())
        );
        assert_eq!(
            classify("medications for patient 592011"),
            QueryIntent::Medications(Some("592011".into()))
        );
    }

    #[test]
    fn test_get_patient_by_id_and_name() {
        assert_eq!(
            classify("get patient 12345"),
            QueryIntent::PatientById("12345".into())
        );
        assert_eq!(
            classify("show patient John Smith"),
            QueryIntent::PatientByName("John Smith".into())
        );
    }

    #[test]
    fn test_resource_lists_with_optional_patient() {
        assert_eq!(classify("Recent lab results"), QueryIntent::Observations(None));
        assert_eq!(
            classify("Show observations for patient 123"),
            QueryIntent::Observations(Some("123".into()))
        );
        assert_eq!(classify("list all conditions"), QueryIntent::Conditions(None));
        assert_eq!(classify("show care plans"), QueryIntent::CarePlans(None));
        assert_eq!(classify("show medications"), QueryIntent::Medications(None));
    }

    #[test]
    fn test_birth_ranges() {
        assert_eq!(
            classify("Find patients that were born in the latter half of 1967"),
            range((1967, 7, 1), (1967, 12, 31))
        );
        assert_eq!(
            classify("patients born in the latter half of 1967"),
            range((1967, 7, 1), (1967, 12, 31))
        );
        assert_eq!(
            classify("patients born in the first half of 1980"),
            range((1980, 1, 1), (1980, 6, 30))
        );
        assert_eq!(
            classify("Find patients born in 1967"),
            range((1967, 1, 1), (1967, 12, 31))
        );
    }

    #[test]
    fn test_gender() {
        assert_eq!(
            classify("Show female patients"),
            QueryIntent::PatientsByGender(Gender::Female)
        );
        assert_eq!(
            classify("Show male patients"),
            QueryIntent::PatientsByGender(Gender::Male)
        );
    }

    #[test]
    fn test_age() {
        assert_eq!(classify("people 45 years old"), QueryIntent::PatientsByAgeApprox(45));
        assert_eq!(classify("anyone at age 30"), QueryIntent::PatientsByAgeApprox(30));
    }

    #[test]
    fn test_compound_condition_over_age() {
        assert_eq!(
            classify("show me diabetic patients over 70"),
            QueryIntent::PatientsByConditionOverAge {
                condition: "diabetes".into(),
                min_age: 70
            }
        );
        assert_eq!(
            classify("diabetes patients older than average"),
            QueryIntent::PatientsByConditionOverAge {
                condition: "diabetes".into(),
                min_age: DEFAULT_MIN_AGE
            }
        );
    }

    #[test]
    fn test_clinical_summary_and_about() {
        assert_eq!(
            classify("give me a clinical summary for Jane Doe"),
            QueryIntent::ClinicalSummary(PatientRef::Name("Jane Doe".into()))
        );
        assert_eq!(
            classify("clinical summary e312f2f5-689d-47f9-b4dd-f6f12417322f"),
            QueryIntent::ClinicalSummary(PatientRef::Id(
                "e312f2f5-689d-47f9-b4dd-f6f12417322f".into()
            ))
        );
        assert_eq!(
            classify("tell me more about James Agnew?"),
            QueryIntent::ClinicalSummary(PatientRef::Name("James Agnew".into()))
        );
        assert_eq!(
            classify("I need information about Maria Garcia"),
            QueryIntent::ClinicalSummary(PatientRef::Name("Maria Garcia".into()))
        );
    }

    #[test]
    fn test_system_info_and_name_fallback() {
        assert_eq!(classify("what is the LLM you're using?"), QueryIntent::SystemInfo);
        assert_eq!(
            classify("Maria Garcia"),
            QueryIntent::PatientByName("Maria Garcia".into())
        );
    }

    #[test]
    fn test_data_quality_and_unknown() {
        assert_eq!(classify("check data quality"), QueryIntent::AssessQuality);
        assert_eq!(classify("hello there"), QueryIntent::Unknown);
        assert!(HELP_TEXT.contains("Show all patients"));
    }

    #[test]
    fn test_classify_is_deterministic() {
        for text in [
            "show all patients",
            "find patients with diabetes",
            "Find patients born in 1967",
            "hello there",
        ] {
            assert_eq!(classify(text), classify(text));
        }
    }

    #[test]
    fn test_extract_patient_id() {
        assert_eq!(
            extract_patient_id("meds for e312f2f5-689d-47f9-b4dd-f6f12417322f please").as_deref(),
            Some("e312f2f5-689d-47f9-b4dd-f6f12417322f")
        );
        assert_eq!(extract_patient_id("for patient 123").as_deref(), Some("123"));
        assert_eq!(extract_patient_id("record abc12345xyz").as_deref(), Some("abc12345xyz"));
        assert_eq!(extract_patient_id("recent observations"), None);
        assert_eq!(extract_patient_id("get patient Jane"), None);
    }

    #[test]
    fn test_birth_range_search_values() {
        let range = BirthRange::whole_year(1967).unwrap();
        assert_eq!(range.search_values(), ["ge1967-01-01".to_string(), "le1967-12-31".to_string()]);
    }
}
