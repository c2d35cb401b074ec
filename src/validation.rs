//! Response parsing and schema validation.
//!
//! The backend decodes under a grammar constraint, so a JSON parse failure
//! is exceptional: the whole response is dropped for that wave or chunk.
//! Individual entity or relationship violations are recovered locally: the
//! item is dropped, the reason recorded, and the batch continues.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::data::{Entity, Relationship};
use crate::exceptions::{ExtractError, ExtractResult};
use crate::logging::{report_progress, ProgressEvent};
use crate::schema::{is_known_entity_type, is_known_relationship_type};

/// Keys the schema bans in favor of the canonical names.
const FORBIDDEN_ALIASES: &[&str] = &["type", "start", "end"];

/// Validated entities plus rejection accounting for one response.
#[derive(Debug, Default)]
pub struct EntityBatch {
    pub entities: Vec<Entity>,
    pub rejected: usize,
    pub rejection_reasons: Vec<String>,
}

/// Validated relationships plus rejection accounting for one response.
#[derive(Debug, Default)]
pub struct RelationshipBatch {
    pub relationships: Vec<Relationship>,
    pub rejected: usize,
    pub rejection_reasons: Vec<String>,
}

/// Allocates document-scoped entity ids (`{document_id}:e{n}`).
///
/// Model-provided ids are honored only when unique within the document;
/// anything else gets a fresh monotonic id, which keeps wave-4 endpoint
/// references collision-free.
#[derive(Debug)]
pub struct IdAllocator {
    document_id: String,
    counter: usize,
    used: HashSet<String>,
}

impl IdAllocator {
    pub fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            counter: 0,
            used: HashSet::new(),
        }
    }

    fn assign(&mut self, provided: Option<&str>) -> String {
        if let Some(id) = provided {
            if !id.is_empty() && !self.used.contains(id) {
                self.used.insert(id.to_string());
                return id.to_string();
            }
        }
        loop {
            let id = format!("{}:e{}", self.document_id, self.counter);
            self.counter += 1;
            if self.used.insert(id.clone()) {
                return id;
            }
        }
    }
}

/// Parses and schema-validates model output.
pub struct ResponseValidator {
    relationship_confidence_floor: f64,
}

impl ResponseValidator {
    pub fn new(relationship_confidence_floor: f64) -> Self {
        Self { relationship_confidence_floor }
    }

    /// Parse an entity-wave response. A malformed payload fails the whole
    /// response; per-entity violations only drop the entity.
    pub fn parse_entities(&self, content: &str, ids: &mut IdAllocator) -> ExtractResult<EntityBatch> {
        let parsed: Value = serde_json::from_str(content).map_err(|e| {
            ExtractError::SchemaViolation(format!(
                "response is not valid JSON (grammar constraint should prevent this): {e}"
            ))
        })?;

        let Some(raw) = parsed.get("entities").and_then(|v| v.as_array()) else {
            return Err(ExtractError::SchemaViolation(
                "response has no entities array".to_string(),
            ));
        };

        let batch = self.validate_entity_list(raw, ids);
        report_progress(ProgressEvent::ValidationCompleted {
            accepted: batch.entities.len(),
            rejected: batch.rejected,
        });
        Ok(batch)
    }

    /// Parse a relationship-wave response against the known entity ids.
    pub fn parse_relationships(
        &self,
        content: &str,
        entity_ids: &HashSet<String>,
    ) -> ExtractResult<RelationshipBatch> {
        let parsed: Value = serde_json::from_str(content).map_err(|e| {
            ExtractError::SchemaViolation(format!(
                "response is not valid JSON (grammar constraint should prevent this): {e}"
            ))
        })?;

        let Some(raw) = parsed.get("relationships").and_then(|v| v.as_array()) else {
            return Err(ExtractError::SchemaViolation(
                "response has no relationships array".to_string(),
            ));
        };

        let batch = self.validate_relationship_list(raw, entity_ids);
        report_progress(ProgressEvent::ValidationCompleted {
            accepted: batch.relationships.len(),
            rejected: batch.rejected,
        });
        Ok(batch)
    }

    /// Parse a combined single-pass response: entities first, then
    /// relationships validated against the entities just accepted.
    pub fn parse_single_pass(
        &self,
        content: &str,
        ids: &mut IdAllocator,
    ) -> ExtractResult<(EntityBatch, RelationshipBatch)> {
        let parsed: Value = serde_json::from_str(content).map_err(|e| {
            ExtractError::SchemaViolation(format!(
                "response is not valid JSON (grammar constraint should prevent this): {e}"
            ))
        })?;

        let Some(raw_entities) = parsed.get("entities").and_then(|v| v.as_array()) else {
            return Err(ExtractError::SchemaViolation(
                "response has no entities array".to_string(),
            ));
        };
        let entities = self.validate_entity_list(raw_entities, ids);

        let entity_ids: HashSet<String> =
            entities.entities.iter().map(|e| e.id.clone()).collect();
        let relationships = match parsed.get("relationships").and_then(|v| v.as_array()) {
            Some(raw) => self.validate_relationship_list(raw, &entity_ids),
            None => RelationshipBatch::default(),
        };

        report_progress(ProgressEvent::ValidationCompleted {
            accepted: entities.entities.len() + relationships.relationships.len(),
            rejected: entities.rejected + relationships.rejected,
        });
        Ok((entities, relationships))
    }

    fn validate_entity_list(&self, raw: &[Value], ids: &mut IdAllocator) -> EntityBatch {
        let mut batch = EntityBatch::default();
        for (index, value) in raw.iter().enumerate() {
            match self.validate_entity(value, ids) {
                Ok(entity) => batch.entities.push(entity),
                Err(reason) => {
                    log::debug!("entity {index} rejected: {reason}");
                    batch.rejected += 1;
                    batch.rejection_reasons.push(reason);
                }
            }
        }
        batch
    }

    fn validate_entity(&self, value: &Value, ids: &mut IdAllocator) -> Result<Entity, String> {
        let Some(obj) = value.as_object() else {
            return Err("entity is not an object".to_string());
        };

        for alias in FORBIDDEN_ALIASES {
            if obj.contains_key(*alias) {
                return Err(format!(
                    "forbidden key '{alias}' present; use the canonical field names"
                ));
            }
        }

        let text = match obj.get("text").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Err("missing or empty text".to_string()),
        };
        let entity_type = match obj.get("entity_type").and_then(|v| v.as_str()) {
            Some(t) => t,
            None => return Err("missing entity_type".to_string()),
        };
        if !is_known_entity_type(entity_type) {
            return Err(format!("unknown entity_type '{entity_type}'"));
        }

        let confidence = match obj.get("confidence").and_then(|v| v.as_f64()) {
            Some(c) if (0.0..=1.0).contains(&c) => c,
            Some(c) => return Err(format!("confidence {c} outside [0, 1]")),
            None => return Err("missing confidence".to_string()),
        };

        let start_pos = read_position(obj, "start_pos")?;
        let end_pos = read_position(obj, "end_pos")?;
        if let (Some(start), Some(end)) = (start_pos, end_pos) {
            if end < start {
                return Err(format!("end_pos {end} < start_pos {start}"));
            }
        }

        for key in ["text", "subtype", "category", "extraction_method"] {
            if let Some(s) = obj.get(key).and_then(|v| v.as_str()) {
                if has_control_abuse(s) {
                    return Err(format!("field '{key}' contains control characters"));
                }
            }
        }

        let provided_id = obj.get("id").and_then(|v| v.as_str());
        let metadata = obj
            .get("metadata")
            .and_then(|v| v.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Ok(Entity {
            id: ids.assign(provided_id),
            text: text.to_string(),
            entity_type: entity_type.to_string(),
            start_pos,
            end_pos,
            confidence,
            extraction_method: obj
                .get("extraction_method")
                .and_then(|v| v.as_str())
                .unwrap_or("llm_guided")
                .to_string(),
            subtype: obj.get("subtype").and_then(|v| v.as_str()).map(String::from),
            category: obj.get("category").and_then(|v| v.as_str()).map(String::from),
            context_before: None,
            context_after: None,
            wave_number: None,
            prompt_template: None,
            chunk_index: None,
            metadata,
        })
    }

    fn validate_relationship_list(
        &self,
        raw: &[Value],
        entity_ids: &HashSet<String>,
    ) -> RelationshipBatch {
        let mut batch = RelationshipBatch::default();
        for (index, value) in raw.iter().enumerate() {
            match self.validate_relationship(value, entity_ids) {
                Ok(rel) => batch.relationships.push(rel),
                Err(reason) => {
                    log::debug!("relationship {index} rejected: {reason}");
                    batch.rejected += 1;
                    batch.rejection_reasons.push(reason);
                }
            }
        }
        batch
    }

    fn validate_relationship(
        &self,
        value: &Value,
        entity_ids: &HashSet<String>,
    ) -> Result<Relationship, String> {
        let Some(obj) = value.as_object() else {
            return Err("relationship is not an object".to_string());
        };

        let field = |key: &str| -> Result<String, String> {
            match obj.get(key).and_then(|v| v.as_str()) {
                Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
                _ => Err(format!("missing or empty {key}")),
            }
        };

        let source = field("source_entity_id")?;
        let target = field("target_entity_id")?;
        let relationship_type = field("relationship_type")?;
        let evidence_text = field("evidence_text")?;

        if !is_known_relationship_type(&relationship_type) {
            return Err(format!("unknown relationship_type '{relationship_type}'"));
        }
        if source == target {
            return Err(format!("self-referential relationship on '{source}'"));
        }
        if !entity_ids.contains(&source) {
            return Err(format!("source entity '{source}' not in extracted set"));
        }
        if !entity_ids.contains(&target) {
            return Err(format!("target entity '{target}' not in extracted set"));
        }

        let confidence = match obj.get("confidence").and_then(|v| v.as_f64()) {
            Some(c) if (0.0..=1.0).contains(&c) => c,
            Some(c) => return Err(format!("confidence {c} outside [0, 1]")),
            None => return Err("missing confidence".to_string()),
        };
        if confidence < self.relationship_confidence_floor {
            return Err(format!(
                "confidence {confidence:.2} below floor {:.2}",
                self.relationship_confidence_floor
            ));
        }

        if has_control_abuse(&evidence_text) {
            return Err("evidence_text contains control characters".to_string());
        }

        let metadata = obj
            .get("metadata")
            .and_then(|v| v.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_else(HashMap::new);

        Ok(Relationship {
            source_entity_id: source,
            target_entity_id: target,
            relationship_type,
            confidence,
            evidence_text,
            context_before: obj.get("context_before").and_then(|v| v.as_str()).map(String::from),
            context_after: obj.get("context_after").and_then(|v| v.as_str()).map(String::from),
            metadata,
        })
    }
}

fn read_position(
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<usize>, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) => Ok(Some(n as usize)),
            None => Err(format!("{key} must be a non-negative integer")),
        },
    }
}

/// NUL or non-whitespace control characters anywhere in the string.
fn has_control_abuse(s: &str) -> bool {
    s.chars().any(|c| c == '\0' || (c.is_control() && c != '\n' && c != '\r' && c != '\t'))
}
