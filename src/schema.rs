//! Closed type enumerations and grammar-constraint schemas.
//!
//! The backend decodes under a JSON-Schema constraint; the schemas handed to
//! it are built here from the same enumerations the validator enforces, so
//! the constraint and the validation can never drift apart.
//!
//! Entity types follow the canonical legal taxonomy (160 types across nine
//! categories). Relationship types are the 34-type taxonomy in eight
//! families. Both enumerations are closed: anything outside them is a
//! schema violation.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde_json::{json, Value};

/// Citation entity types.
pub const CITATION_TYPES: &[&str] = &[
    "CASE_CITATION",
    "STATUTE_CITATION",
    "USC_CITATION",
    "CFR_CITATION",
    "STATE_STATUTE_CITATION",
    "STATE_REGULATION_CITATION",
    "CONSTITUTIONAL_CITATION",
    "REGULATION_CITATION",
    "ORDINANCE_CITATION",
    "TREATY_CITATION",
    "LAW_REVIEW_CITATION",
    "TREATISE_CITATION",
    "RESTATEMENT_CITATION",
    "LEGISLATIVE_HISTORY_CITATION",
    "EXECUTIVE_ORDER_CITATION",
    "PATENT_CITATION",
    "FOREIGN_CASE_CITATION",
    "SESSION_LAW_CITATION",
    "COURT_RULE_CITATION",
    "ATTORNEY_GENERAL_OPINION",
];

/// Individual and role actor types.
pub const ACTOR_TYPES: &[&str] = &[
    "PERSON",
    "PARTY",
    "PLAINTIFF",
    "DEFENDANT",
    "APPELLANT",
    "APPELLEE",
    "PETITIONER",
    "RESPONDENT",
    "INTERVENOR",
    "AMICUS_CURIAE",
    "ATTORNEY",
    "JUDGE",
    "JUSTICE",
    "MAGISTRATE_JUDGE",
    "ARBITRATOR",
    "MEDIATOR",
    "WITNESS",
    "EXPERT_WITNESS",
    "JUROR",
    "COURT_REPORTER",
    "CLERK",
    "TRUSTEE",
    "EXECUTOR",
    "GUARDIAN",
    "VICTIM",
];

/// Courts, firms, agencies, and other organizations.
pub const ORGANIZATION_TYPES: &[&str] = &[
    "COURT",
    "SUPREME_COURT",
    "APPELLATE_COURT",
    "DISTRICT_COURT",
    "BANKRUPTCY_COURT",
    "STATE_COURT",
    "ADMINISTRATIVE_AGENCY",
    "LAW_FIRM",
    "PROSECUTOR",
    "PUBLIC_DEFENDER",
    "GOVERNMENT_ENTITY",
    "CORPORATION",
    "LIMITED_LIABILITY_COMPANY",
    "PARTNERSHIP",
    "NONPROFIT_ORGANIZATION",
    "ORGANIZATION",
    "REGULATORY_BODY",
    "LAW_ENFORCEMENT_AGENCY",
    "LEGISLATURE",
    "UNION",
];

/// Temporal entity types.
pub const TEMPORAL_TYPES: &[&str] = &[
    "DATE",
    "FILING_DATE",
    "DECISION_DATE",
    "HEARING_DATE",
    "TRIAL_DATE",
    "DEADLINE",
    "EFFECTIVE_DATE",
    "EXECUTION_DATE",
    "TERMINATION_DATE",
    "STATUTE_OF_LIMITATIONS",
    "TIME_PERIOD",
    "DURATION",
];

/// Procedural artifacts and filings.
pub const PROCEDURAL_TYPES: &[&str] = &[
    "CASE_NUMBER",
    "DOCKET_NUMBER",
    "MOTION",
    "BRIEF",
    "PLEADING",
    "COMPLAINT",
    "ANSWER",
    "ORDER",
    "JUDGMENT",
    "VERDICT",
    "OPINION",
    "DISSENT",
    "CONCURRENCE",
    "INJUNCTION",
    "SUBPOENA",
    "DEPOSITION",
    "INTERROGATORY",
    "DISCOVERY_REQUEST",
    "PROCEDURAL_RULE",
    "APPEAL",
    "SETTLEMENT",
    "STIPULATION",
];

/// Monetary entity types.
pub const FINANCIAL_TYPES: &[&str] = &[
    "MONETARY_AMOUNT",
    "DAMAGES",
    "COMPENSATORY_DAMAGES",
    "PUNITIVE_DAMAGES",
    "FINE",
    "FEE",
    "ATTORNEY_FEE",
    "AWARD",
    "SETTLEMENT_AMOUNT",
    "BOND",
    "LIEN",
    "PENALTY",
];

/// Contract structures and clauses.
pub const CONTRACT_TYPES: &[&str] = &[
    "CONTRACT",
    "AGREEMENT",
    "LEASE",
    "LICENSE",
    "WARRANTY",
    "INDEMNIFICATION_CLAUSE",
    "ARBITRATION_CLAUSE",
    "CHOICE_OF_LAW_CLAUSE",
    "FORCE_MAJEURE_CLAUSE",
    "NON_COMPETE_CLAUSE",
    "CONFIDENTIALITY_CLAUSE",
    "TERMINATION_CLAUSE",
    "CONSIDERATION",
    "OBLIGATION",
    "BREACH",
];

/// Abstract legal concepts.
pub const CONCEPT_TYPES: &[&str] = &[
    "LEGAL_DOCTRINE",
    "LEGAL_STANDARD",
    "CAUSE_OF_ACTION",
    "CLAIM",
    "DEFENSE",
    "HOLDING",
    "JURISDICTION",
    "VENUE",
    "STANDARD_OF_REVIEW",
    "BURDEN_OF_PROOF",
    "PRECEDENT",
    "REMEDY",
    "RELIEF",
    "CHARGE",
    "OFFENSE",
];

/// Supporting identifiers and contact details.
pub const SUPPORTING_TYPES: &[&str] = &[
    "ADDRESS",
    "EMAIL",
    "PHONE_NUMBER",
    "BAR_NUMBER",
    "EXHIBIT",
    "APPENDIX",
    "SCHEDULE",
    "SIGNATURE",
    "NOTARY",
    "PROPERTY_DESCRIPTION",
    "PATENT_NUMBER",
    "TRADEMARK",
];

/// Geographic and residual types.
pub const GENERAL_TYPES: &[&str] = &[
    "LOCATION",
    "CITY",
    "STATE",
    "COUNTRY",
    "STATUTE",
    "REGULATION",
    "UNKNOWN",
];

/// Every canonical entity type, category order preserved.
pub static ALL_ENTITY_TYPES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    [
        CITATION_TYPES,
        ACTOR_TYPES,
        ORGANIZATION_TYPES,
        TEMPORAL_TYPES,
        PROCEDURAL_TYPES,
        FINANCIAL_TYPES,
        CONTRACT_TYPES,
        CONCEPT_TYPES,
        SUPPORTING_TYPES,
        GENERAL_TYPES,
    ]
    .concat()
});

static ENTITY_TYPE_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ALL_ENTITY_TYPES.iter().copied().collect());

/// Whether `name` is a member of the closed entity enumeration.
pub fn is_known_entity_type(name: &str) -> bool {
    ENTITY_TYPE_SET.contains(name)
}

/// Relationship taxonomy: 34 types in eight families.
pub const CASE_TO_CASE_RELATIONSHIPS: &[&str] = &[
    "CITES_CASE",
    "OVERRULES_CASE",
    "DISTINGUISHES_CASE",
    "FOLLOWS_CASE",
    "QUESTIONS_CASE",
];

pub const STATUTE_RELATIONSHIPS: &[&str] = &[
    "CITES_STATUTE",
    "INTERPRETS_STATUTE",
    "APPLIES_STATUTE",
    "INVALIDATES_STATUTE",
];

pub const PARTY_RELATIONSHIPS: &[&str] =
    &["PARTY_VS_PARTY", "REPRESENTS", "EMPLOYED_BY", "MEMBER_OF"];

pub const PROCEDURAL_RELATIONSHIPS: &[&str] =
    &["APPEALS_FROM", "REMANDS_TO", "CONSOLIDATES_WITH", "RELATES_TO"];

pub const DOCUMENT_RELATIONSHIPS: &[&str] = &[
    "REFERENCES_DOCUMENT",
    "INCORPORATES_BY_REFERENCE",
    "AMENDS",
    "SUPERSEDES",
];

pub const CONTRACTUAL_RELATIONSHIPS: &[&str] =
    &["CONTRACTS_WITH", "OBLIGATED_TO", "BENEFITS", "GUARANTEES"];

pub const JUDICIAL_RELATIONSHIPS: &[&str] = &[
    "DECIDED_BY",
    "AUTHORED_BY",
    "JOINED_BY",
    "DISSENTED_BY",
    "CONCURRED_BY",
    "RECUSED_FROM",
];

pub const TEMPORAL_RELATIONSHIPS: &[&str] =
    &["OCCURRED_BEFORE", "OCCURRED_AFTER", "OCCURRED_DURING"];

/// Every relationship type, family order preserved.
pub static ALL_RELATIONSHIP_TYPES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    [
        CASE_TO_CASE_RELATIONSHIPS,
        STATUTE_RELATIONSHIPS,
        PARTY_RELATIONSHIPS,
        PROCEDURAL_RELATIONSHIPS,
        DOCUMENT_RELATIONSHIPS,
        CONTRACTUAL_RELATIONSHIPS,
        JUDICIAL_RELATIONSHIPS,
        TEMPORAL_RELATIONSHIPS,
    ]
    .concat()
});

static RELATIONSHIP_TYPE_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ALL_RELATIONSHIP_TYPES.iter().copied().collect());

/// Whether `name` is a member of the closed relationship enumeration.
pub fn is_known_relationship_type(name: &str) -> bool {
    RELATIONSHIP_TYPE_SET.contains(name)
}

/// Entity types covered by each extraction wave. Wave slices are disjoint;
/// wave 1 carries actors, citations and temporal types, wave 2 procedural,
/// financial and organizational types, wave 3 the supporting remainder.
pub fn wave_entity_types(wave: u8) -> &'static [&'static str] {
    const WAVE1: &[&str] = &[
        "CASE_CITATION",
        "STATUTE_CITATION",
        "PARTY",
        "ATTORNEY",
        "COURT",
        "JUDGE",
        "USC_CITATION",
        "CFR_CITATION",
        "STATE_STATUTE_CITATION",
        "CONSTITUTIONAL_CITATION",
        "DATE",
        "FILING_DATE",
        "DEADLINE",
        "HEARING_DATE",
        "TRIAL_DATE",
    ];
    const WAVE2: &[&str] = &[
        "CASE_NUMBER",
        "DOCKET_NUMBER",
        "MOTION",
        "BRIEF",
        "PROCEDURAL_RULE",
        "MONETARY_AMOUNT",
        "DAMAGES",
        "FINE",
        "FEE",
        "AWARD",
        "LAW_FIRM",
        "PROSECUTOR",
        "PUBLIC_DEFENDER",
        "GOVERNMENT_ENTITY",
    ];
    const WAVE3: &[&str] = &["ADDRESS", "EMAIL", "PHONE_NUMBER", "BAR_NUMBER", "CORPORATION"];

    match wave {
        1 => WAVE1,
        2 => WAVE2,
        3 => WAVE3,
        _ => &[],
    }
}

fn entity_item_schema(entity_types: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "text": { "type": "string", "minLength": 1 },
            "entity_type": { "type": "string", "enum": entity_types },
            "start_pos": { "type": "integer", "minimum": 0 },
            "end_pos": { "type": "integer", "minimum": 0 },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "extraction_method": { "type": "string" },
            "subtype": { "type": "string" },
            "category": { "type": "string" },
            "metadata": { "type": "object" }
        },
        "required": ["text", "entity_type", "confidence", "extraction_method"],
        // Closes out the alias keys (type/start/end) at the grammar level.
        "additionalProperties": false
    })
}

fn relationship_item_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "source_entity_id": { "type": "string", "minLength": 1 },
            "target_entity_id": { "type": "string", "minLength": 1 },
            "relationship_type": { "type": "string", "enum": &*ALL_RELATIONSHIP_TYPES },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "evidence_text": { "type": "string", "minLength": 1 },
            "context_before": { "type": "string" },
            "context_after": { "type": "string" },
            "metadata": { "type": "object" }
        },
        "required": [
            "source_entity_id",
            "target_entity_id",
            "relationship_type",
            "confidence",
            "evidence_text"
        ],
        "additionalProperties": false
    })
}

/// Guided-decoding schema for an entity wave. Waves 1-3 constrain the type
/// enumeration to their slice; any other wave value gets the full taxonomy.
pub fn entity_response_schema(wave: Option<u8>) -> Value {
    let types: Vec<&str> = match wave {
        Some(w @ 1..=3) => wave_entity_types(w).to_vec(),
        _ => ALL_ENTITY_TYPES.clone(),
    };
    json!({
        "type": "object",
        "title": "EntityExtractionResponse",
        "properties": {
            "entities": { "type": "array", "items": entity_item_schema(&types) },
            "metadata": { "type": "object" }
        },
        "required": ["entities"],
        "additionalProperties": false
    })
}

/// Guided-decoding schema for the relationship wave.
pub fn relationship_response_schema() -> Value {
    json!({
        "type": "object",
        "title": "RelationshipExtractionResponse",
        "properties": {
            "relationships": { "type": "array", "items": relationship_item_schema() },
            "metadata": { "type": "object" }
        },
        "required": ["relationships"],
        "additionalProperties": false
    })
}

/// Guided-decoding schema for the combined single-pass call.
pub fn single_pass_response_schema() -> Value {
    json!({
        "type": "object",
        "title": "SinglePassExtractionResponse",
        "properties": {
            "entities": {
                "type": "array",
                "items": entity_item_schema(&ALL_ENTITY_TYPES)
            },
            "relationships": { "type": "array", "items": relationship_item_schema() },
            "metadata": { "type": "object" }
        },
        "required": ["entities"],
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_enumeration_is_closed_and_distinct() {
        let mut seen = HashSet::new();
        for t in ALL_ENTITY_TYPES.iter() {
            assert!(seen.insert(*t), "duplicate entity type {t}");
        }
        assert_eq!(ALL_ENTITY_TYPES.len(), 160);
        assert!(is_known_entity_type("CASE_CITATION"));
        assert!(is_known_entity_type("JUDGE"));
        assert!(!is_known_entity_type("SPACESHIP"));
    }

    #[test]
    fn relationship_enumeration_has_34_types_in_8_families() {
        let mut seen = HashSet::new();
        for t in ALL_RELATIONSHIP_TYPES.iter() {
            assert!(seen.insert(*t), "duplicate relationship type {t}");
        }
        assert_eq!(ALL_RELATIONSHIP_TYPES.len(), 34);
        assert!(is_known_relationship_type("CITES_CASE"));
        assert!(is_known_relationship_type("DECIDED_BY"));
        assert!(!is_known_relationship_type("LIKES"));
    }

    #[test]
    fn wave_slices_are_disjoint_and_known() {
        let mut seen = HashSet::new();
        for wave in 1..=3u8 {
            for t in wave_entity_types(wave) {
                assert!(is_known_entity_type(t), "wave {wave} type {t} not canonical");
                assert!(seen.insert(*t), "type {t} appears in two waves");
            }
        }
        assert!(wave_entity_types(4).is_empty());
    }

    #[test]
    fn entity_schema_forbids_alias_keys() {
        let schema = entity_response_schema(Some(1));
        let item = &schema["properties"]["entities"]["items"];
        assert_eq!(item["additionalProperties"], json!(false));
        assert!(item["properties"].get("type").is_none());
        assert!(item["properties"].get("start").is_none());
        assert!(item["properties"]["start_pos"].is_object());
    }

    #[test]
    fn wave_schema_restricts_enum_to_slice() {
        let schema = entity_response_schema(Some(3));
        let types = schema["properties"]["entities"]["items"]["properties"]["entity_type"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(types.len(), wave_entity_types(3).len());
        assert!(types.contains(&json!("EMAIL")));
        assert!(!types.contains(&json!("CASE_CITATION")));
    }

    #[test]
    fn single_pass_schema_combines_entities_and_relationships() {
        let schema = single_pass_response_schema();
        assert!(schema["properties"]["entities"].is_object());
        assert!(schema["properties"]["relationships"].is_object());
        let rel_types = schema["properties"]["relationships"]["items"]["properties"]
            ["relationship_type"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(rel_types.len(), 34);
    }
}
