mod common;

use atrius_fhir_query::{Gender, QueryIntent, ResultKind, classify};
use common::{ScriptedFetcher, bundle, care_plan, medication_request, patient};
use std::sync::Arc;
use url::Url;

fn query_pairs(url: &Url) -> Vec<(String, String)> {
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
    expected
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_gender_search() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_path(
                "Patient",
                &[("gender", "female")],
                bundle(vec![patient("p1", "Jane", "Doe", "female", "1980-04-02")]),
            )
            .on_path("Patient", &[("gender", "male")], bundle(vec![])),
    );
    let executor = common::scripted_executor(fetcher.clone());

    let female = executor
        .execute(&QueryIntent::PatientsByGender(Gender::Female))
        .await;
    assert_eq!(female.kind, ResultKind::Success);
    assert!(female.content.starts_with("Found 1 female patients:"));
    assert!(female.content.contains("**Jane Doe**\n- ID: p1\n- Birth Date: 1980-04-02"));

    let male = executor
        .execute(&QueryIntent::PatientsByGender(Gender::Male))
        .await;
    assert_eq!(male.kind, ResultKind::Warning);
    assert_eq!(male.content, "No male patients found.");

    let requests = fetcher.requests_for("Patient");
    assert_eq!(query_pairs(&requests[0]), pairs(&[("gender", "female"), ("_count", "20")]));
}

#[tokio::test]
async fn test_age_searches_whole_birth_year() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_path(
                "Patient",
                &[("birthdate", "ge1980-01-01")],
                bundle(vec![patient("p1", "Jane", "Doe", "female", "1980-04-02")]),
            )
            .on_path("Patient", &[], bundle(vec![])),
    );
    let executor = common::scripted_executor(fetcher.clone());

    let found = executor.execute(&QueryIntent::PatientsByAgeApprox(44)).await;
    assert_eq!(found.kind, ResultKind::Success);
    assert!(found.content.starts_with("Found 1 patients around age 44 (born in 1980)"));
    assert!(found.content.contains("- Birth Date: 1980-04-02 (age 44)"));
    assert_eq!(
        query_pairs(&fetcher.requests()[0]),
        pairs(&[
            ("birthdate", "ge1980-01-01"),
            ("birthdate", "le1980-12-31"),
            ("_count", "20"),
        ])
    );

    let missing = executor.execute(&QueryIntent::PatientsByAgeApprox(30)).await;
    assert_eq!(missing.kind, ResultKind::Warning);
    assert_eq!(missing.content, "No patients found around age 30.");
}

#[tokio::test]
async fn test_birth_range_sends_paired_birthdate() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_path(
                "Patient",
                &[("birthdate", "ge1967-07-01"), ("birthdate", "le1967-12-31")],
                bundle(vec![patient("p7", "Maria", "Garcia", "female", "1967-09-14")]),
            )
            .on_path("Patient", &[], bundle(vec![])),
    );
    let executor = common::scripted_executor(fetcher.clone());

    let intent = classify("Find patients that were born in the latter half of 1967");
    let found = executor.execute(&intent).await;
    assert_eq!(found.kind, ResultKind::Success);
    assert!(found.content.starts_with("Found 1 patients matching your birth date criteria"));
    assert!(found.content.contains("**Maria Garcia**"));
    assert_eq!(
        query_pairs(&fetcher.requests()[0]),
        pairs(&[
            ("birthdate", "ge1967-07-01"),
            ("birthdate", "le1967-12-31"),
            ("_count", "20"),
        ])
    );

    let empty = executor
        .execute(&classify("patients born in the first half of 1980"))
        .await;
    assert_eq!(empty.kind, ResultKind::Warning);
    assert!(empty.content.starts_with("No patients found matching that birth date criteria."));
}

#[tokio::test]
async fn test_care_plans_for_patient() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_path(
                "CarePlan",
                &[("patient", "p1")],
                bundle(vec![care_plan("cp1", "Diabetes management", "p1")]),
            )
            .on_path("CarePlan", &[], bundle(vec![])),
    );
    let executor = common::scripted_executor(fetcher.clone());

    let found = executor
        .execute(&QueryIntent::CarePlans(Some("p1".into())))
        .await;
    assert_eq!(found.kind, ResultKind::Success);
    assert!(found.content.starts_with("Found 1 care plans:"));
    assert!(found.content.contains(
        "📋 **Diabetes management**\n- Status: active\n- Created: 2022-04-18\n- Intent: plan"
    ));
    assert_eq!(
        query_pairs(&fetcher.requests()[0]),
        pairs(&[("_count", "10"), ("patient", "p1")])
    );

    let none = executor.execute(&QueryIntent::CarePlans(None)).await;
    assert_eq!(none.kind, ResultKind::Warning);
    assert_eq!(none.content, "No care plans found.");
}

#[tokio::test]
async fn test_medications_for_patient() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_path(
                "MedicationRequest",
                &[("patient", "p1")],
                bundle(vec![medication_request("m1", "Metformin 500 MG", "p1")]),
            )
            .on_path("MedicationRequest", &[], bundle(vec![])),
    );
    let executor = common::scripted_executor(fetcher.clone());

    let intent = classify("show meds for patient p1");
    assert_eq!(intent, QueryIntent::Medications(Some("p1".into())));

    let found = executor.execute(&intent).await;
    assert_eq!(found.kind, ResultKind::Success);
    assert!(found.content.starts_with("**Medications for Patient p1**"));
    assert!(found.content.contains("Found 1 medication requests:"));
    assert!(found.content.contains(
        "💊 **Metformin 500 MG**\n- Status: active\n- Intent: order\n- Prescribed: 2023-11-02\n- Dosage: One tablet daily"
    ));
    assert_eq!(
        query_pairs(&fetcher.requests()[0]),
        pairs(&[("patient", "p1"), ("_count", "20")])
    );

    let none = executor
        .execute(&QueryIntent::Medications(Some("p2".into())))
        .await;
    assert_eq!(none.kind, ResultKind::Warning);
    assert_eq!(none.content, "No medications found for patient p2.");
}
