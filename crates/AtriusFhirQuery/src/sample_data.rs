//! Built-in sample data served when no FHIR server can be reached.
//!
//! The responder never fails. `Patient`, `Condition` and `Observation` yield
//! small synthetic searchset Bundles (3, 2 and 1 entries); every other
//! resource type yields an empty Bundle. Bundles are tagged so callers can tell
//! synthetic data from a real server response.

use serde_json::{Value, json};

use crate::fetcher::resource_type_of;

/// `meta.tag` code carried by every sample Bundle.
pub const SAMPLE_TAG_CODE: &str = "local-sample";

const SAMPLE_TAG_SYSTEM: &str = "urn:atrius:fhir-query";

/// Synthetic Bundle for the resource type named by `path`.
///
/// Reads by id (`Patient/123`) get the same Bundle as a search of that type.
pub fn sample_bundle(path: &str) -> Value {
    let entries = match resource_type_of(path) {
        "Patient" => sample_patients(),
        "Condition" => sample_conditions(),
        "Observation" => sample_observations(),
        _ => Vec::new(),
    };

    json!({
        "resourceType": "Bundle",
        "id": "local-sample-bundle",
        "meta": {
            "tag": [{ "system": SAMPLE_TAG_SYSTEM, "code": SAMPLE_TAG_CODE }]
        },
        "type": "searchset",
        "total": entries.len(),
        "entry": entries
            .into_iter()
            .map(|resource| json!({ "resource": resource }))
            .collect::<Vec<_>>(),
    })
}

/// Whether `json` was produced by [`sample_bundle`].
pub fn is_sample(json: &Value) -> bool {
    json.pointer("/meta/tag")
        .and_then(Value::as_array)
        .is_some_and(|tags| {
            tags.iter()
                .any(|tag| tag.get("code").and_then(Value::as_str) == Some(SAMPLE_TAG_CODE))
        })
}

fn sample_patients() -> Vec<Value> {
    vec![
        json!({
            "resourceType": "Patient",
            "id": "sample-patient-1",
            "name": [{ "given": ["Maria"], "family": "Garcia" }],
            "gender": "female",
            "birthDate": "1967-09-14",
            "address": [{ "city": "Boston", "state": "MA", "country": "US" }]
        }),
        json!({
            "resourceType": "Patient",
            "id": "sample-patient-2",
            "name": [{ "given": ["James", "T"], "family": "Wilson" }],
            "gender": "male",
            "birthDate": "1954-02-03"
        }),
        json!({
            "resourceType": "Patient",
            "id": "sample-patient-3",
            "name": [{ "given": ["Aiko"], "family": "Tanaka" }],
            "gender": "female",
            "birthDate": "1989-11-27"
        }),
    ]
}

fn sample_conditions() -> Vec<Value> {
    vec![
        json!({
            "resourceType": "Condition",
            "id": "sample-condition-1",
            "clinicalStatus": { "coding": [{ "code": "active" }] },
            "code": {
                "coding": [{
                    "system": "http://snomed.info/sct",
                    "code": "44054006",
                    "display": "Type 2 diabetes mellitus"
                }],
                "text": "Type 2 diabetes mellitus"
            },
            "subject": { "reference": "Patient/sample-patient-2" },
            "onsetDateTime": "2009-05-12"
        }),
        json!({
            "resourceType": "Condition",
            "id": "sample-condition-2",
            "clinicalStatus": { "coding": [{ "code": "active" }] },
            "code": {
                "coding": [{
                    "system": "http://snomed.info/sct",
                    "code": "59621000",
                    "display": "Essential hypertension"
                }]
            },
            "subject": { "reference": "Patient/sample-patient-1" },
            "onsetDateTime": "2015-08-30"
        }),
    ]
}

fn sample_observations() -> Vec<Value> {
    vec![json!({
        "resourceType": "Observation",
        "id": "sample-observation-1",
        "status": "final",
        "code": {
            "coding": [{
                "system": "http://loinc.org",
                "code": "29463-7",
                "display": "Body weight"
            }]
        },
        "subject": { "reference": "Patient/sample-patient-1" },
        "effectiveDateTime": "2024-03-18T09:30:00Z",
        "valueQuantity": { "value": 72.5, "unit": "kg" }
    })]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_count(bundle: &Value) -> usize {
        bundle["entry"].as_array().map(Vec::len).unwrap_or(usize::MAX)
    }

    #[test]
    fn test_sample_sizes_per_resource_type() {
        assert_eq!(entry_count(&sample_bundle("Patient")), 3);
        assert_eq!(entry_count(&sample_bundle("Condition")), 2);
        assert_eq!(entry_count(&sample_bundle("Observation")), 1);
        assert_eq!(entry_count(&sample_bundle("CarePlan")), 0);
        assert_eq!(entry_count(&sample_bundle("Patient/whatever")), 3);
    }

    #[test]
    fn test_sample_bundles_are_well_formed() {
        for path in ["Patient", "Condition", "Observation", "MedicationRequest", "metadata"] {
            let bundle = sample_bundle(path);
            assert_eq!(bundle["resourceType"], "Bundle");
            assert!(bundle["entry"].is_array());
            assert!(bundle["total"].as_u64().is_some());
            assert!(is_sample(&bundle));
        }
    }

    #[test]
    fn test_real_bundle_is_not_sample() {
        let bundle = json!({ "resourceType": "Bundle", "total": 0, "entry": [] });
        assert!(!is_sample(&bundle));
    }
}
