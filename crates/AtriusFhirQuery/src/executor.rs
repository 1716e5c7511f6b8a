//! Query executor: one handler per [`QueryIntent`].
//!
//! Handlers issue their FHIR calls through the [`ResilientTransport`] one at a
//! time and render a [`FormattedResult`]. Empty result sets become `warning`
//! results; a failed primary lookup becomes an `error` result carrying the
//! message. Failed dependent lookups (conditions and medications on a patient
//! report, observations on a clinical summary) are noted inline instead.

use chrono::{Datelike, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::classifier::{BirthRange, Gender, HELP_TEXT, PatientRef, QueryIntent};
use crate::fetcher::SearchParams;
use crate::interpreter::{
    BundleView, ConditionView, PatientView, ResourceView, age_on, birth_year, display_date,
    interpret,
};
use crate::quality::{BandScheme, DataQualityScorer, QualityAssessment};
use crate::session::Session;
use crate::transport::{AttemptOutcome, ResilientTransport, StrategyKind};
use crate::{FetchError, FormattedResult, QueryError, QueryResult};

const LIST_PAGE: u32 = 10;
const SEARCH_PAGE: u32 = 20;
const CONDITION_PAGE: u32 = 100;
const DEPENDENT_PAGE: u32 = 5;
/// Patients resolved by a condition search; the rest are only counted.
const CONDITION_PATIENT_LIMIT: usize = 5;
/// Patients checked by an over-age condition search.
const OVER_AGE_PATIENT_LIMIT: usize = 10;
/// Entries shown by a gender search.
const GENDER_DISPLAY_LIMIT: usize = 10;

/// Condition matches grouped by patient id, in first-seen order.
type ConditionsByPatient = Vec<(String, Vec<ConditionView>)>;

pub struct QueryExecutor {
    transport: Arc<ResilientTransport>,
    scorer: DataQualityScorer,
    band_scheme: BandScheme,
    today: fn() -> NaiveDate,
}

impl QueryExecutor {
    pub fn new(transport: Arc<ResilientTransport>) -> Self {
        let scorer = DataQualityScorer::new(transport.fetcher());
        Self {
            transport,
            scorer,
            band_scheme: BandScheme::default(),
            today: || Utc::now().date_naive(),
        }
    }

    /// Bands used by the data quality narrative.
    pub fn with_band_scheme(mut self, scheme: BandScheme) -> Self {
        self.band_scheme = scheme;
        self
    }

    /// Override the date used for age arithmetic.
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        self.transport.session()
    }

    pub fn transport(&self) -> &Arc<ResilientTransport> {
        &self.transport
    }

    /// Run `intent` and render the outcome. Never fails.
    pub async fn execute(&self, intent: &QueryIntent) -> FormattedResult {
        info!("Executing {} query", intent.name());

        let result = match intent {
            QueryIntent::ListPatients => self.list_patients().await,
            QueryIntent::PatientById(id) => return self.patient_report(id).await,
            QueryIntent::PatientByName(name) => self.patients_by_name(name).await,
            QueryIntent::PatientsByCondition(text) => self.patients_with_condition(text).await,
            QueryIntent::PatientsByConditionOverAge { condition, min_age } => {
                self.patients_with_condition_over_age(condition, *min_age).await
            }
            QueryIntent::PatientsByGender(gender) => self.patients_by_gender(*gender).await,
            QueryIntent::PatientsByAgeApprox(age) => self.patients_by_age(*age).await,
            QueryIntent::PatientsByBirthRange(range) => self.patients_by_birth_range(range).await,
            QueryIntent::Observations(patient) => self.observations(patient.as_deref()).await,
            QueryIntent::Medications(Some(patient)) => self.medications_for_patient(patient).await,
            QueryIntent::Medications(None) => self.medications().await,
            QueryIntent::Conditions(patient) => self.conditions(patient.as_deref()).await,
            QueryIntent::CarePlans(patient) => self.care_plans(patient.as_deref()).await,
            QueryIntent::ClinicalSummary(patient) => self.clinical_summary(patient).await,
            QueryIntent::AssessQuality => Ok(self.assess_quality().await),
            QueryIntent::SystemInfo => Ok(self.system_info()),
            QueryIntent::Unknown => Ok(FormattedResult::info(HELP_TEXT)),
        };

        result.unwrap_or_else(|e| FormattedResult::error(failure_message(intent, &e)))
    }

    /// Score the data on `server`, or on the session's server.
    pub async fn assess(&self, server: Option<&str>) -> QualityAssessment {
        let endpoint = match server {
            Some(server) => server.to_string(),
            None => self.session().endpoint().to_string(),
        };
        self.scorer.assess(&endpoint).await
    }

    /// Search `path` and interpret the answer as a Bundle.
    ///
    /// The local sample ignores search parameters, so when it answered, the
    /// filters are applied here instead.
    async fn search(&self, path: &str, params: &SearchParams) -> QueryResult<BundleView> {
        let response = self.transport.execute(path, params).await?;
        let mut bundle = interpret(&response.body).into_bundle()?;
        if response.source == StrategyKind::LocalSample {
            narrow_sample(&mut bundle, params);
        }
        Ok(bundle)
    }

    async fn read(&self, resource_type: &str, id: &str) -> QueryResult<ResourceView> {
        let body = self
            .transport
            .request(&format!("{}/{}", resource_type, id), &SearchParams::new())
            .await?;
        interpret(&body).into_resource(id)
    }

    async fn read_patient(&self, id: &str) -> QueryResult<PatientView> {
        match self.read("Patient", id).await? {
            ResourceView::Patient(patient) => Ok(patient),
            other => Err(QueryError::UnexpectedResponse(format!(
                "expected Patient, got {}",
                other.resource_type()
            ))),
        }
    }

    async fn list_patients(&self) -> QueryResult<FormattedResult> {
        let bundle = self.search("Patient", &SearchParams::count(LIST_PAGE)).await?;
        if bundle.is_empty() {
            return Ok(FormattedResult::warning("No patients found in this server."));
        }

        let mut content = format!(
            "Found {} patients. Here are the first {}:\n\n",
            bundle.available(),
            bundle.entries.len()
        );
        for patient in patients(&bundle) {
            content.push_str(&patient_block(patient));
        }
        Ok(FormattedResult::success(content))
    }

    /// `name`, `family` and `given` searches in turn, deduplicated by id.
    /// Individual failures are skipped; only a total failure is an error.
    async fn find_patients_by_name(&self, name: &str) -> QueryResult<Vec<PatientView>> {
        let mut found: Vec<PatientView> = Vec::new();
        let mut last_error = None;
        let mut any_succeeded = false;

        for key in ["name", "family", "given"] {
            let params = SearchParams::new()
                .with(key, name)
                .with("_count", SEARCH_PAGE.to_string());
            match self.search("Patient", &params).await {
                Ok(bundle) => {
                    any_succeeded = true;
                    for patient in patients(&bundle) {
                        if !found.iter().any(|p| p.id == patient.id) {
                            found.push(patient.clone());
                        }
                    }
                }
                Err(e) => {
                    debug!("Patient search by {}={} failed: {}", key, name, e);
                    last_error = Some(e);
                }
            }
        }

        match (any_succeeded, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(found),
        }
    }

    async fn patients_by_name(&self, name: &str) -> QueryResult<FormattedResult> {
        let found = self.find_patients_by_name(name).await?;
        if found.is_empty() {
            return Ok(FormattedResult::warning(format!(
                "No patients found with name \"{}\". Try searching for \"all patients\" to see available names.",
                name
            )));
        }

        let mut content = format!("Found {} patient(s) matching \"{}\":\n\n", found.len(), name);
        for patient in &found {
            content.push_str(&patient_block(patient));
        }
        Ok(FormattedResult::success(content))
    }

    /// Patient demographics plus conditions and medications.
    async fn patient_report(&self, id: &str) -> FormattedResult {
        let patient = match self.read_patient(id).await {
            Ok(patient) => patient,
            Err(e) if is_not_found(&e) => {
                return FormattedResult::error(format!("Patient with ID \"{}\" not found.", id));
            }
            Err(e) => return FormattedResult::error(format!("Failed to fetch patient: {}", e)),
        };

        let mut content = format!("**Patient: {}**\n\n", patient.name);
        content.push_str(&format!("🆔 **ID**: {}\n", patient.id));
        content.push_str(&format!("👤 **Gender**: {}\n", or_unknown(&patient.gender)));
        content.push_str(&format!("📅 **Birth Date**: {}\n", or_unknown(&patient.birth_date)));
        if let Some(address) = &patient.address {
            content.push_str(&format!("📍 **Location**: {}\n", address.display()));
        }
        content.push_str("\n**Clinical Data Summary:**\n");

        let dependent = SearchParams::new()
            .with("patient", id)
            .with("_count", DEPENDENT_PAGE.to_string());

        match self.search("Condition", &dependent).await {
            Ok(bundle) if !bundle.is_empty() => {
                content.push_str(&format!(
                    "\n📋 **Conditions** ({} total):\n",
                    bundle.available()
                ));
                for entry in &bundle.entries {
                    if let ResourceView::Condition(c) = entry {
                        content.push_str(&format!(
                            "- {} ({})\n",
                            c.code,
                            c.clinical_status.as_deref().unwrap_or("unknown status")
                        ));
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Conditions for patient {} unavailable: {}", id, e);
                content.push_str("\n📋 **Conditions**: Unable to fetch\n");
            }
        }

        match self.search("MedicationRequest", &dependent).await {
            Ok(bundle) if !bundle.is_empty() => {
                content.push_str(&format!(
                    "\n💊 **Medications** ({} total):\n",
                    bundle.available()
                ));
                for entry in &bundle.entries {
                    if let ResourceView::MedicationRequest(m) = entry {
                        content.push_str(&format!(
                            "- {} ({})\n",
                            m.medication,
                            or_unknown(&m.status)
                        ));
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Medications for patient {} unavailable: {}", id, e);
                content.push_str("\n💊 **Medications**: Unable to fetch\n");
            }
        }

        FormattedResult::success(content)
    }

    async fn clinical_summary(&self, patient: &PatientRef) -> QueryResult<FormattedResult> {
        let id = match patient {
            PatientRef::Id(id) => id.clone(),
            PatientRef::Name(name) => {
                let found = self.find_patients_by_name(name).await?;
                match found.into_iter().find(|p| name_matches(&p.name, name)) {
                    Some(p) => p.id,
                    None => return Ok(FormattedResult::warning(patient_not_found_help(name))),
                }
            }
        };

        let report = self.patient_report(&id).await;
        if report.is_error() {
            return Ok(report);
        }

        let mut content = format!("## Clinical Summary\n\n{}\n\n", report.content);
        let params = SearchParams::new()
            .with("patient", id.as_str())
            .with("_count", DEPENDENT_PAGE.to_string())
            .with("_sort", "-date");
        match self.search("Observation", &params).await {
            Ok(bundle) if !bundle.is_empty() => {
                content.push_str("### Recent Observations\n");
                for entry in &bundle.entries {
                    if let ResourceView::Observation(o) = entry {
                        let date = o
                            .effective
                            .as_deref()
                            .map(|d| format!(" ({})", display_date(Some(d))))
                            .unwrap_or_default();
                        content.push_str(&format!("- **{}**: {}{}\n", o.code, o.value, date));
                    }
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Observations for patient {} unavailable: {}", id, e),
        }

        Ok(FormattedResult::success(content))
    }

    /// Conditions whose text matches `text`, grouped by patient.
    ///
    /// Uses the server's `code:text` filter first; when that finds nothing,
    /// fetches an unfiltered page and filters on the coded text locally.
    async fn condition_matches(&self, text: &str) -> QueryResult<ConditionsByPatient> {
        let filtered = SearchParams::count(CONDITION_PAGE).with("code:text", text);
        let mut bundle = self.search("Condition", &filtered).await?;

        if bundle.is_empty() {
            debug!("No server-side match for '{}'; filtering locally", text);
            bundle = self.search("Condition", &SearchParams::count(CONDITION_PAGE)).await?;
            retain_code_text(&mut bundle, text);
        }

        let mut grouped: ConditionsByPatient = Vec::new();
        for entry in bundle.entries {
            let Some(patient_id) = entry.subject_id().map(str::to_string) else {
                continue;
            };
            let ResourceView::Condition(condition) = entry else {
                continue;
            };
            match grouped.iter_mut().find(|(id, _)| *id == patient_id) {
                Some((_, conditions)) => conditions.push(condition),
                None => grouped.push((patient_id, vec![condition])),
            }
        }
        Ok(grouped)
    }

    async fn patients_with_condition(&self, text: &str) -> QueryResult<FormattedResult> {
        let grouped = self.condition_matches(text).await?;
        if grouped.is_empty() {
            return Ok(FormattedResult::warning(format!(
                "No conditions found matching \"{}\".",
                text
            )));
        }

        let mut content = format!(
            "Found {} patients with conditions matching \"{}\":\n\n",
            grouped.len(),
            text
        );
        for (patient_id, conditions) in grouped.iter().take(CONDITION_PATIENT_LIMIT) {
            match self.read_patient(patient_id).await {
                Ok(patient) => {
                    content.push_str(&format!("**{}** (ID: {})\n", patient.name, patient_id));
                    for c in conditions {
                        content.push_str(&format!(
                            "- {} ({})",
                            c.code,
                            c.clinical_status.as_deref().unwrap_or("unknown")
                        ));
                        if let Some(onset) = &c.onset {
                            content.push_str(&format!(" since {}", display_date(Some(onset))));
                        }
                        content.push('\n');
                    }
                }
                Err(e) => {
                    debug!("Demographics for {} unavailable: {}", patient_id, e);
                    content.push_str(&format!(
                        "**Patient {}** (demographics not available)\n",
                        patient_id
                    ));
                    for c in conditions {
                        content.push_str(&format!(
                            "- {} ({})\n",
                            c.code,
                            c.clinical_status.as_deref().unwrap_or("unknown")
                        ));
                    }
                }
            }
            content.push('\n');
        }
        if grouped.len() > CONDITION_PATIENT_LIMIT {
            content.push_str(&format!(
                "\n...and {} more patients.",
                grouped.len() - CONDITION_PATIENT_LIMIT
            ));
        }

        Ok(FormattedResult::success(content))
    }

    /// Condition search narrowed to patients whose birth-year age exceeds
    /// `min_age`.
    async fn patients_with_condition_over_age(
        &self,
        condition: &str,
        min_age: u32,
    ) -> QueryResult<FormattedResult> {
        let grouped = self.condition_matches(condition).await?;
        if grouped.is_empty() {
            return Ok(FormattedResult::warning(format!(
                "No conditions found matching \"{}\".",
                condition
            )));
        }

        let current_year = (self.today)().year();
        let mut content = format!("Found patients with {} over {}:\n\n", condition, min_age);
        let mut count = 0;

        for (patient_id, _) in grouped.iter().take(OVER_AGE_PATIENT_LIMIT) {
            let patient = match self.read_patient(patient_id).await {
                Ok(patient) => patient,
                Err(e) => {
                    debug!("Skipping patient {}: {}", patient_id, e);
                    continue;
                }
            };
            let Some(year) = patient.birth_date.as_deref().and_then(birth_year) else {
                continue;
            };
            let age = i64::from(current_year) - i64::from(year);
            if age > i64::from(min_age) {
                count += 1;
                content.push_str(&format!(
                    "{}. **{}** (ID: {})\n   Age: {}, Gender: {}\n\n",
                    count,
                    patient.name,
                    patient.id,
                    age,
                    or_unknown(&patient.gender)
                ));
            }
        }

        if count == 0 {
            return Ok(FormattedResult::info(format!(
                "No patients with {} over {} found in the current dataset.",
                condition, min_age
            )));
        }
        Ok(FormattedResult::success(content))
    }

    async fn patients_by_gender(&self, gender: Gender) -> QueryResult<FormattedResult> {
        let params = SearchParams::new()
            .with("gender", gender.as_str())
            .with("_count", SEARCH_PAGE.to_string());
        let bundle = self.search("Patient", &params).await?;
        if bundle.is_empty() {
            return Ok(FormattedResult::warning(format!("No {} patients found.", gender)));
        }

        let mut content = format!("Found {} {} patients:\n\n", bundle.available(), gender);
        for patient in patients(&bundle).take(GENDER_DISPLAY_LIMIT) {
            content.push_str(&format!(
                "**{}**\n- ID: {}\n- Birth Date: {}\n\n",
                patient.name,
                patient.id,
                or_unknown(&patient.birth_date)
            ));
        }
        if bundle.entries.len() > GENDER_DISPLAY_LIMIT {
            content.push_str(&format!(
                "\n...and {} more patients.",
                bundle.entries.len() - GENDER_DISPLAY_LIMIT
            ));
        }
        Ok(FormattedResult::success(content))
    }

    /// Whole-year search for `current_year - age`; ignores month and day.
    async fn patients_by_age(&self, age: u32) -> QueryResult<FormattedResult> {
        let today = (self.today)();
        let Some((year, range)) = i32::try_from(age)
            .ok()
            .and_then(|age| today.year().checked_sub(age))
            .and_then(|year| Some((year, BirthRange::whole_year(year)?)))
        else {
            return Ok(FormattedResult::warning(format!(
                "An age of {} is outside the range of searchable birth dates.",
                age
            )));
        };

        let params = SearchParams::new()
            .with_all("birthdate", range.search_values())
            .with("_count", SEARCH_PAGE.to_string());
        let bundle = self.search("Patient", &params).await?;
        if bundle.is_empty() {
            return Ok(FormattedResult::warning(format!(
                "No patients found around age {}.",
                age
            )));
        }

        let mut content = format!(
            "Found {} patients around age {} (born in {}):\n\n",
            bundle.available(),
            age,
            year
        );
        for patient in patients(&bundle) {
            let computed = patient
                .birth_date
                .as_deref()
                .and_then(|bd| age_on(bd, today))
                .map(|a| format!(" (age {})", a))
                .unwrap_or_default();
            content.push_str(&format!(
                "**{}**\n- ID: {}\n- Birth Date: {}{}\n- Gender: {}\n\n",
                patient.name,
                patient.id,
                or_unknown(&patient.birth_date),
                computed,
                or_unknown(&patient.gender)
            ));
        }
        Ok(FormattedResult::success(content))
    }

    async fn patients_by_birth_range(&self, range: &BirthRange) -> QueryResult<FormattedResult> {
        let params = SearchParams::new()
            .with_all("birthdate", range.search_values())
            .with("_count", SEARCH_PAGE.to_string());
        let bundle = self.search("Patient", &params).await?;
        if bundle.is_empty() {
            return Ok(FormattedResult::warning(
                "No patients found matching that birth date criteria. This might be due to how the FHIR server handles date searches.",
            ));
        }

        let mut content = format!(
            "Found {} patients matching your birth date criteria:\n\n",
            bundle.available()
        );
        for patient in patients(&bundle) {
            content.push_str(&patient_block(patient));
        }
        Ok(FormattedResult::success(content))
    }

    async fn observations(&self, patient: Option<&str>) -> QueryResult<FormattedResult> {
        let mut params = SearchParams::count(LIST_PAGE).with("_sort", "-date");
        if let Some(patient) = patient {
            params.push("patient", patient);
        }
        let bundle = self.search("Observation", &params).await?;
        if bundle.is_empty() {
            return Ok(FormattedResult::warning("No observations found."));
        }

        let mut content = format!(
            "Found {} observations. Here are the most recent:\n\n",
            bundle.available()
        );
        for entry in &bundle.entries {
            if let ResourceView::Observation(o) = entry {
                content.push_str(&format!(
                    "📊 **{}**\n- Value: {}\n- Date: {}\n- Status: {}\n\n",
                    o.code,
                    o.value,
                    display_date(o.effective.as_deref()),
                    or_unknown(&o.status)
                ));
            }
        }
        Ok(FormattedResult::success(content))
    }

    async fn medications_for_patient(&self, patient: &str) -> QueryResult<FormattedResult> {
        let params = SearchParams::new()
            .with("patient", patient)
            .with("_count", SEARCH_PAGE.to_string());
        let bundle = self.search("MedicationRequest", &params).await?;
        if bundle.is_empty() {
            return Ok(FormattedResult::warning(format!(
                "No medications found for patient {}.",
                patient
            )));
        }

        let mut content = format!(
            "**Medications for Patient {}**\n\nFound {} medication requests:\n\n",
            patient,
            bundle.available()
        );
        for entry in &bundle.entries {
            if let ResourceView::MedicationRequest(m) = entry {
                content.push_str(&format!(
                    "💊 **{}**\n- Status: {}\n- Intent: {}\n- Prescribed: {}\n",
                    m.medication,
                    or_unknown(&m.status),
                    or_unknown(&m.intent),
                    display_date(m.authored_on.as_deref())
                ));
                if let Some(dosage) = &m.dosage {
                    content.push_str(&format!("- Dosage: {}\n", dosage));
                }
                content.push('\n');
            }
        }
        Ok(FormattedResult::success(content))
    }

    async fn medications(&self) -> QueryResult<FormattedResult> {
        let bundle = self
            .search("MedicationRequest", &SearchParams::count(LIST_PAGE))
            .await?;
        if bundle.is_empty() {
            return Ok(FormattedResult::warning("No medications found."));
        }

        let mut content = format!("Found {} medication requests:\n\n", bundle.available());
        for entry in &bundle.entries {
            if let ResourceView::MedicationRequest(m) = entry {
                content.push_str(&format!(
                    "💊 **{}**\n- Status: {}\n- Intent: {}\n- Prescribed: {}\n\n",
                    m.medication,
                    or_unknown(&m.status),
                    or_unknown(&m.intent),
                    display_date(m.authored_on.as_deref())
                ));
            }
        }
        Ok(FormattedResult::success(content))
    }

    async fn conditions(&self, patient: Option<&str>) -> QueryResult<FormattedResult> {
        let mut params = SearchParams::count(LIST_PAGE);
        if let Some(patient) = patient {
            params.push("patient", patient);
        }
        let bundle = self.search("Condition", &params).await?;
        if bundle.is_empty() {
            return Ok(FormattedResult::warning("No conditions found."));
        }

        let mut content = format!("Found {} conditions:\n\n", bundle.available());
        for entry in &bundle.entries {
            if let ResourceView::Condition(c) = entry {
                content.push_str(&format!(
                    "🏥 **{}**\n- Clinical Status: {}\n- Onset: {}\n",
                    c.code,
                    c.clinical_status.as_deref().unwrap_or("unknown"),
                    c.onset
                        .as_deref()
                        .map(|d| display_date(Some(d)))
                        .unwrap_or("Unknown")
                ));
                if let Some(subject) = entry.subject_id() {
                    content.push_str(&format!("- Patient ID: {}\n", subject));
                }
                content.push('\n');
            }
        }
        Ok(FormattedResult::success(content))
    }

    async fn care_plans(&self, patient: Option<&str>) -> QueryResult<FormattedResult> {
        let mut params = SearchParams::count(LIST_PAGE);
        if let Some(patient) = patient {
            params.push("patient", patient);
        }
        let bundle = self.search("CarePlan", &params).await?;
        if bundle.is_empty() {
            return Ok(FormattedResult::warning("No care plans found."));
        }

        let mut content = format!("Found {} care plans:\n\n", bundle.available());
        for entry in &bundle.entries {
            if let ResourceView::CarePlan(plan) = entry {
                content.push_str(&format!(
                    "📋 **{}**\n- Status: {}\n- Created: {}\n- Intent: {}\n\n",
                    plan.title.as_deref().unwrap_or("Untitled Plan"),
                    or_unknown(&plan.status),
                    plan.created
                        .as_deref()
                        .map(|d| display_date(Some(d)))
                        .unwrap_or("Unknown"),
                    or_unknown(&plan.intent)
                ));
            }
        }
        Ok(FormattedResult::success(content))
    }

    async fn assess_quality(&self) -> FormattedResult {
        let assessment = self.assess(None).await;
        FormattedResult::info(assessment.narrative(self.band_scheme))
    }

    fn system_info(&self) -> FormattedResult {
        let session = self.session();
        match session.credentials() {
            Some(credentials) if session.smart_mode() => {
                let model = credentials
                    .model
                    .or_else(|| session.preferred_model())
                    .unwrap_or_else(|| "its default model".to_string());
                FormattedResult::info(format!(
                    "Smart mode is on: queries are planned by {} using {}, with local pattern matching as the fallback when the provider is unavailable or its answer cannot be used.",
                    credentials.provider, model
                ))
            }
            _ => FormattedResult::info(
                "I'm using local pattern matching rules to interpret your queries. Turn on smart mode with an OpenAI or Anthropic API key to have a cloud model plan the FHIR queries instead.",
            ),
        }
    }
}

fn patients(bundle: &BundleView) -> impl Iterator<Item = &PatientView> {
    bundle.entries.iter().filter_map(|entry| match entry {
        ResourceView::Patient(p) => Some(p),
        _ => None,
    })
}

fn patient_block(patient: &PatientView) -> String {
    format!(
        "**{}**\n- ID: {}\n- Gender: {}\n- Birth Date: {}\n\n",
        patient.name,
        patient.id,
        or_unknown(&patient.gender),
        or_unknown(&patient.birth_date)
    )
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("Unknown")
}

fn patient_not_found_help(name: &str) -> String {
    format!(
        "Could not find a patient named \"{}\" on the current FHIR server.\n\n\
         📋 **Get available patients first:**\n\
         - \"Show all patients\"\n\
         - \"Find patients with diabetes\"\n\n\
         🎯 **Then use real patient names:**\n\
         - \"Give me a clinical summary for [actual patient name]\"\n\
         - \"Show me more about [actual patient name]\"",
        name
    )
}

/// Keep conditions whose coded text contains `text`, ignoring case.
fn retain_code_text(bundle: &mut BundleView, text: &str) {
    let needle = text.to_lowercase();
    bundle.entries.retain(|entry| match entry {
        ResourceView::Condition(c) => c.code.to_lowercase().contains(&needle),
        _ => false,
    });
    bundle.total = bundle.entries.len() as u64;
}

/// Apply the search filters the executor issues to a sample Bundle, which
/// ignores them.
fn narrow_sample(bundle: &mut BundleView, params: &SearchParams) {
    if let Some(patient) = params.get("patient") {
        bundle
            .entries
            .retain(|entry| entry.subject_id() == Some(patient));
    }
    if let Some(text) = params.get("code:text") {
        retain_code_text(bundle, text);
    }
    if let Some(name) = ["name", "family", "given"]
        .into_iter()
        .find_map(|key| params.get(key))
    {
        bundle.entries.retain(|entry| match entry {
            ResourceView::Patient(p) => name_matches(&p.name, name),
            _ => false,
        });
    }
    if let Some(gender) = params.get("gender") {
        bundle.entries.retain(|entry| match entry {
            ResourceView::Patient(p) => p.gender.as_deref() == Some(gender),
            _ => false,
        });
    }
    let birthdate = params.get_all("birthdate");
    if !birthdate.is_empty() {
        bundle.entries.retain(|entry| match entry {
            ResourceView::Patient(p) => p
                .birth_date
                .as_deref()
                .and_then(|bd| NaiveDate::parse_from_str(display_date(Some(bd)), "%Y-%m-%d").ok())
                .is_some_and(|bd| birthdate.iter().all(|value| date_satisfies(bd, value))),
            _ => false,
        });
    }
    bundle.total = bundle.entries.len() as u64;
}

/// Every whitespace-separated word of `query` occurs in `name`, ignoring case.
fn name_matches(name: &str, query: &str) -> bool {
    let name = name.to_lowercase();
    let mut words = query.split_whitespace().peekable();
    words.peek().is_some() && words.all(|word| name.contains(&word.to_lowercase()))
}

/// Evaluate one FHIR date search value (`ge1967-07-01`, `lt2000-01-01`,
/// `1967-09-14`) against `date`. Values that do not parse constrain nothing.
fn date_satisfies(date: NaiveDate, value: &str) -> bool {
    let (prefix, rest) = match value.get(..2) {
        Some(p @ ("eq" | "ne" | "gt" | "lt" | "ge" | "le")) => (p, &value[2..]),
        _ => ("eq", value),
    };
    let Ok(bound) = NaiveDate::parse_from_str(rest, "%Y-%m-%d") else {
        return true;
    };
    match prefix {
        "ne" => date != bound,
        "gt" => date > bound,
        "lt" => date < bound,
        "ge" => date >= bound,
        "le" => date <= bound,
        _ => date == bound,
    }
}

fn is_not_found(error: &QueryError) -> bool {
    match error {
        QueryError::NotFound(_) => true,
        QueryError::Fetch(FetchError::Http { status: 404, .. }) => true,
        QueryError::AllStrategiesExhausted { attempts, .. } => attempts
            .first()
            .is_some_and(|a| a.outcome == AttemptOutcome::HttpError(404)),
        _ => false,
    }
}

fn failure_message(intent: &QueryIntent, error: &QueryError) -> String {
    match intent {
        QueryIntent::ListPatients => format!("Failed to fetch patients: {}", error),
        QueryIntent::PatientByName(_) => format!("Failed to search patients by name: {}", error),
        QueryIntent::PatientsByCondition(_) | QueryIntent::PatientsByConditionOverAge { .. } => {
            format!("Failed to search conditions: {}", error)
        }
        QueryIntent::PatientsByGender(_) => {
            format!("Failed to search patients by gender: {}", error)
        }
        QueryIntent::PatientsByAgeApprox(_) => format!("Failed to search patients by age: {}", error),
        QueryIntent::PatientsByBirthRange(_) => format!(
            "Failed to search patients by birth date: {}. Note: Some FHIR servers may not support advanced date searches.",
            error
        ),
        QueryIntent::Observations(_) => format!("Failed to fetch observations: {}", error),
        QueryIntent::Medications(Some(patient)) => format!(
            "Failed to fetch medications for patient {}: {}",
            patient, error
        ),
        QueryIntent::Medications(None) => format!("Failed to fetch medications: {}", error),
        QueryIntent::Conditions(_) => format!("Failed to fetch conditions: {}", error),
        QueryIntent::CarePlans(_) => format!("Failed to fetch care plans: {}", error),
        QueryIntent::ClinicalSummary(_) => format!("Failed to build clinical summary: {}", error),
        QueryIntent::PatientById(_) => format!("Failed to fetch patient: {}", error),
        QueryIntent::AssessQuality => format!("Failed to assess data quality: {}", error),
        QueryIntent::SystemInfo | QueryIntent::Unknown => error.to_string(),
    }
}
