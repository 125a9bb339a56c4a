//! Standard search parameter table.
//!
//! Adding a resource type is a data change: append rows to [`SIMPLE`],
//! [`COMPOSITE`] and [`PATIENT_COMPARTMENT`].

use crate::types::SearchParamType::{self, Date, Number, Quantity, Reference, String as Text, Token};

use super::registry::{CompositeComponentDef, SearchParameterDefinition};

/// Canonical URL prefix of the standard parameters.
pub const BASE_URL: &str = "http://hl7.org/fhir/SearchParameter";

/// `(base, code, type, expression, targets)`
type SimpleRow = (
    &'static str,
    &'static str,
    SearchParamType,
    &'static str,
    &'static [&'static str],
);

/// `(base, code, group root, [(component, type, relative expression)])`
type CompositeRow = (
    &'static str,
    &'static str,
    &'static str,
    &'static [(&'static str, SearchParamType, &'static str)],
);

const PATIENT_ONLY: &[&str] = &["Patient"];
const SUBJECTS: &[&str] = &["Patient", "Group"];
const PRACTITIONERS: &[&str] = &["Practitioner", "Organization"];
const ACTORS: &[&str] = &["Practitioner", "Organization", "Patient"];

static SIMPLE: &[SimpleRow] = &[
    ("Patient", "identifier", Token, "Patient.identifier", &[]),
    ("Patient", "name", Text, "Patient.name", &[]),
    ("Patient", "family", Text, "Patient.name.family", &[]),
    ("Patient", "given", Text, "Patient.name.given", &[]),
    ("Patient", "gender", Token, "Patient.gender", &[]),
    ("Patient", "birthdate", Date, "Patient.birthDate", &[]),
    ("Patient", "active", Token, "Patient.active", &[]),
    ("Patient", "address", Text, "Patient.address", &[]),
    ("Patient", "address-city", Text, "Patient.address.city", &[]),
    ("Patient", "telecom", Token, "Patient.telecom", &[]),
    ("Patient", "general-practitioner", Reference, "Patient.generalPractitioner", PRACTITIONERS),
    ("Patient", "organization", Reference, "Patient.managingOrganization", &["Organization"]),
    ("Patient", "link", Reference, "Patient.link.other", PATIENT_ONLY),
    ("Practitioner", "identifier", Token, "Practitioner.identifier", &[]),
    ("Practitioner", "name", Text, "Practitioner.name", &[]),
    ("Practitioner", "family", Text, "Practitioner.name.family", &[]),
    ("Practitioner", "given", Text, "Practitioner.name.given", &[]),
    ("Practitioner", "active", Token, "Practitioner.active", &[]),
    ("Organization", "identifier", Token, "Organization.identifier", &[]),
    ("Organization", "name", Text, "Organization.name", &[]),
    ("Organization", "active", Token, "Organization.active", &[]),
    ("Organization", "type", Token, "Organization.type", &[]),
    ("Organization", "partof", Reference, "Organization.partOf", &["Organization"]),
    ("Encounter", "identifier", Token, "Encounter.identifier", &[]),
    ("Encounter", "status", Token, "Encounter.status", &[]),
    ("Encounter", "class", Token, "Encounter.class", &[]),
    ("Encounter", "type", Token, "Encounter.type", &[]),
    ("Encounter", "subject", Reference, "Encounter.subject", SUBJECTS),
    ("Encounter", "patient", Reference, "Encounter.subject", PATIENT_ONLY),
    ("Encounter", "date", Date, "Encounter.period", &[]),
    ("Encounter", "participant", Reference, "Encounter.participant.individual", &["Practitioner"]),
    ("Encounter", "service-provider", Reference, "Encounter.serviceProvider", &["Organization"]),
    ("Observation", "identifier", Token, "Observation.identifier", &[]),
    ("Observation", "status", Token, "Observation.status", &[]),
    ("Observation", "code", Token, "Observation.code", &[]),
    ("Observation", "category", Token, "Observation.category", &[]),
    ("Observation", "subject", Reference, "Observation.subject", &["Patient", "Group", "Device", "Location"]),
    ("Observation", "patient", Reference, "Observation.subject", PATIENT_ONLY),
    ("Observation", "encounter", Reference, "Observation.encounter", &["Encounter"]),
    ("Observation", "performer", Reference, "Observation.performer", ACTORS),
    ("Observation", "date", Date, "Observation.effective", &[]),
    ("Observation", "value-quantity", Quantity, "Observation.value.ofType(Quantity)", &[]),
    ("Observation", "value-concept", Token, "Observation.value.ofType(CodeableConcept)", &[]),
    ("Observation", "value-string", Text, "Observation.value.ofType(string)", &[]),
    ("Observation", "component-code", Token, "Observation.component.code", &[]),
    ("Observation", "component-value-quantity", Quantity, "Observation.component.value.ofType(Quantity)", &[]),
    ("Observation", "combo-code", Token, "Observation.code | Observation.component.code", &[]),
    (
        "Observation",
        "combo-value-quantity",
        Quantity,
        "Observation.value.ofType(Quantity) | Observation.component.value.ofType(Quantity)",
        &[],
    ),
    ("Condition", "identifier", Token, "Condition.identifier", &[]),
    ("Condition", "code", Token, "Condition.code", &[]),
    ("Condition", "clinical-status", Token, "Condition.clinicalStatus", &[]),
    ("Condition", "verification-status", Token, "Condition.verificationStatus", &[]),
    ("Condition", "category", Token, "Condition.category", &[]),
    ("Condition", "subject", Reference, "Condition.subject", SUBJECTS),
    ("Condition", "patient", Reference, "Condition.subject", PATIENT_ONLY),
    ("Condition", "encounter", Reference, "Condition.encounter", &["Encounter"]),
    ("Condition", "onset-date", Date, "Condition.onset.ofType(dateTime) | Condition.onset.ofType(Period)", &[]),
    ("Condition", "recorded-date", Date, "Condition.recordedDate", &[]),
    ("Condition", "asserter", Reference, "Condition.asserter", &["Practitioner", "Patient"]),
    ("Procedure", "identifier", Token, "Procedure.identifier", &[]),
    ("Procedure", "code", Token, "Procedure.code", &[]),
    ("Procedure", "status", Token, "Procedure.status", &[]),
    ("Procedure", "subject", Reference, "Procedure.subject", SUBJECTS),
    ("Procedure", "patient", Reference, "Procedure.subject", PATIENT_ONLY),
    ("Procedure", "encounter", Reference, "Procedure.encounter", &["Encounter"]),
    ("Procedure", "date", Date, "Procedure.performed", &[]),
    ("Procedure", "performer", Reference, "Procedure.performer.actor", ACTORS),
    ("MedicationRequest", "identifier", Token, "MedicationRequest.identifier", &[]),
    ("MedicationRequest", "status", Token, "MedicationRequest.status", &[]),
    ("MedicationRequest", "intent", Token, "MedicationRequest.intent", &[]),
    ("MedicationRequest", "code", Token, "MedicationRequest.medication.ofType(CodeableConcept)", &[]),
    ("MedicationRequest", "medication", Reference, "MedicationRequest.medication.ofType(Reference)", &["Medication"]),
    ("MedicationRequest", "subject", Reference, "MedicationRequest.subject", SUBJECTS),
    ("MedicationRequest", "patient", Reference, "MedicationRequest.subject", PATIENT_ONLY),
    ("MedicationRequest", "encounter", Reference, "MedicationRequest.encounter", &["Encounter"]),
    ("MedicationRequest", "authoredon", Date, "MedicationRequest.authoredOn", &[]),
    ("MedicationRequest", "requester", Reference, "MedicationRequest.requester", ACTORS),
    ("AllergyIntolerance", "identifier", Token, "AllergyIntolerance.identifier", &[]),
    ("AllergyIntolerance", "code", Token, "AllergyIntolerance.code", &[]),
    ("AllergyIntolerance", "clinical-status", Token, "AllergyIntolerance.clinicalStatus", &[]),
    ("AllergyIntolerance", "criticality", Token, "AllergyIntolerance.criticality", &[]),
    ("AllergyIntolerance", "patient", Reference, "AllergyIntolerance.patient", PATIENT_ONLY),
    ("AllergyIntolerance", "recorder", Reference, "AllergyIntolerance.recorder", ACTORS),
    ("AllergyIntolerance", "date", Date, "AllergyIntolerance.recordedDate", &[]),
    ("AllergyIntolerance", "onset", Date, "AllergyIntolerance.reaction.onset", &[]),
    ("Immunization", "identifier", Token, "Immunization.identifier", &[]),
    ("Immunization", "status", Token, "Immunization.status", &[]),
    ("Immunization", "vaccine-code", Token, "Immunization.vaccineCode", &[]),
    ("Immunization", "patient", Reference, "Immunization.patient", PATIENT_ONLY),
    ("Immunization", "date", Date, "Immunization.occurrence", &[]),
    ("Immunization", "lot-number", Text, "Immunization.lotNumber", &[]),
    ("Immunization", "performer", Reference, "Immunization.performer.actor", PRACTITIONERS),
    ("DiagnosticReport", "identifier", Token, "DiagnosticReport.identifier", &[]),
    ("DiagnosticReport", "status", Token, "DiagnosticReport.status", &[]),
    ("DiagnosticReport", "code", Token, "DiagnosticReport.code", &[]),
    ("DiagnosticReport", "category", Token, "DiagnosticReport.category", &[]),
    ("DiagnosticReport", "subject", Reference, "DiagnosticReport.subject", SUBJECTS),
    ("DiagnosticReport", "patient", Reference, "DiagnosticReport.subject", PATIENT_ONLY),
    ("DiagnosticReport", "encounter", Reference, "DiagnosticReport.encounter", &["Encounter"]),
    ("DiagnosticReport", "date", Date, "DiagnosticReport.effective", &[]),
    ("DiagnosticReport", "issued", Date, "DiagnosticReport.issued", &[]),
    ("DiagnosticReport", "result", Reference, "DiagnosticReport.result", &["Observation"]),
    ("DiagnosticReport", "performer", Reference, "DiagnosticReport.performer", PRACTITIONERS),
    ("RiskAssessment", "identifier", Token, "RiskAssessment.identifier", &[]),
    ("RiskAssessment", "status", Token, "RiskAssessment.status", &[]),
    ("RiskAssessment", "subject", Reference, "RiskAssessment.subject", SUBJECTS),
    ("RiskAssessment", "patient", Reference, "RiskAssessment.subject", PATIENT_ONLY),
    ("RiskAssessment", "method", Token, "RiskAssessment.method", &[]),
    ("RiskAssessment", "probability", Number, "RiskAssessment.prediction.probability", &[]),
    ("RiskAssessment", "risk", Token, "RiskAssessment.prediction.qualitativeRisk", &[]),
    ("RiskAssessment", "date", Date, "RiskAssessment.occurrence", &[]),
    ("RiskAssessment", "condition", Reference, "RiskAssessment.condition", &["Condition"]),
];

const CODE_VALUE_QUANTITY: &[(&str, SearchParamType, &str)] = &[
    ("code", Token, "code"),
    ("value-quantity", Quantity, "value.ofType(Quantity)"),
];

static COMPOSITE: &[CompositeRow] = &[
    ("Observation", "code-value-quantity", "Observation", CODE_VALUE_QUANTITY),
    ("Observation", "component-code-value-quantity", "Observation.component", CODE_VALUE_QUANTITY),
    (
        "Observation",
        "combo-code-value-quantity",
        "Observation | Observation.component",
        CODE_VALUE_QUANTITY,
    ),
    (
        "Observation",
        "code-value-concept",
        "Observation",
        &[("code", Token, "code"), ("value-concept", Token, "value.ofType(CodeableConcept)")],
    ),
    (
        "Observation",
        "code-value-date",
        "Observation",
        &[("code", Token, "code"), ("value-date", Date, "value.ofType(dateTime) | value.ofType(Period)")],
    ),
];

/// Reference parameters placing a resource in a Patient's compartment.
pub static PATIENT_COMPARTMENT: &[(&str, &[&str])] = &[
    ("Patient", &["link"]),
    ("Encounter", &["patient"]),
    ("Observation", &["subject", "performer"]),
    ("Condition", &["patient", "asserter"]),
    ("Procedure", &["patient", "performer"]),
    ("MedicationRequest", &["subject"]),
    ("AllergyIntolerance", &["patient", "recorder"]),
    ("Immunization", &["patient"]),
    ("DiagnosticReport", &["subject"]),
    ("RiskAssessment", &["subject"]),
];

/// Builds the standard parameter definitions.
pub fn standard_parameters() -> Vec<SearchParameterDefinition> {
    let simple = SIMPLE.iter().map(|(base, code, param_type, expression, targets)| {
        let def = SearchParameterDefinition::new(
            format!("{}/{}-{}", BASE_URL, base, code),
            *code,
            *param_type,
            *expression,
        )
        .with_base([*base]);
        if targets.is_empty() {
            def
        } else {
            def.with_targets(targets.iter().copied())
        }
    });

    let composite = COMPOSITE.iter().map(|(base, code, root, components)| {
        SearchParameterDefinition::new(
            format!("{}/{}-{}", BASE_URL, base, code),
            *code,
            SearchParamType::Composite,
            *root,
        )
        .with_base([*base])
        .with_components(
            components
                .iter()
                .map(|(name, param_type, expression)| {
                    CompositeComponentDef::new(*name, *param_type, *expression)
                })
                .collect(),
        )
    });

    simple.chain(composite).collect()
}
