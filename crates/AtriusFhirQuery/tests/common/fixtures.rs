//! FHIR JSON builders.

use serde_json::{Value, json};

pub fn bundle(entries: Vec<Value>) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": entries.len(),
        "entry": entries.into_iter().map(|r| json!({ "resource": r })).collect::<Vec<_>>()
    })
}

pub fn patient(id: &str, given: &str, family: &str, gender: &str, birth_date: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{ "given": [given], "family": family }],
        "gender": gender,
        "birthDate": birth_date
    })
}

pub fn condition(id: &str, text: &str, patient_id: &str) -> Value {
    json!({
        "resourceType": "Condition",
        "id": id,
        "clinicalStatus": { "coding": [{ "code": "active" }] },
        "code": { "text": text },
        "subject": { "reference": format!("Patient/{}", patient_id) },
        "onsetDateTime": "2015-03-02"
    })
}

pub fn observation(id: &str, text: &str, value: f64, unit: &str, patient_id: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "code": { "text": text },
        "valueQuantity": { "value": value, "unit": unit },
        "subject": { "reference": format!("Patient/{}", patient_id) },
        "effectiveDateTime": "2024-01-15T09:30:00Z"
    })
}

pub fn medication_request(id: &str, text: &str, patient_id: &str) -> Value {
    json!({
        "resourceType": "MedicationRequest",
        "id": id,
        "status": "active",
        "intent": "order",
        "medicationCodeableConcept": { "text": text },
        "subject": { "reference": format!("Patient/{}", patient_id) },
        "authoredOn": "2023-11-02",
        "dosageInstruction": [{ "text": "One tablet daily" }]
    })
}

pub fn care_plan(id: &str, title: &str, patient_id: &str) -> Value {
    json!({
        "resourceType": "CarePlan",
        "id": id,
        "title": title,
        "status": "active",
        "intent": "plan",
        "created": "2022-04-18T10:00:00Z",
        "subject": { "reference": format!("Patient/{}", patient_id) }
    })
}
