//! Core data types shared across the extraction pipeline.
//!
//! A `Document` flows in, is sized and routed, optionally chunked, driven
//! through one or more LLM waves, and leaves as an `ExtractionResult`
//! holding typed `Entity` and `Relationship` records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable input document. Created by the caller, never mutated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Caller-supplied identifier; generated when absent.
    pub id: String,
    /// Full plain text of the document.
    pub text: String,
    /// Length of `text` in bytes.
    pub byte_length: usize,
    /// Length of `text` in characters.
    pub char_length: usize,
    /// Opaque caller metadata carried into the result.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Document {
    /// Create a document with a generated id.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), text)
    }

    /// Create a document with an explicit id.
    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            byte_length: text.len(),
            char_length: text.chars().count(),
            text,
            metadata: HashMap::new(),
        }
    }

    /// Attach caller metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Size category a document falls into, driving strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizeCategory {
    /// Zero characters.
    Empty,
    /// Non-empty but implausible as text (control-byte heavy).
    Invalid,
    /// Below the very-small threshold (default 5,000 chars).
    VerySmall,
    /// Up to the small threshold (default 50,000 chars).
    Small,
    /// Up to the medium threshold (default 150,000 chars).
    Medium,
    /// Above the medium threshold.
    Large,
}

/// Size measurements derived from a document's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeInfo {
    pub chars: usize,
    pub words: usize,
    pub lines: usize,
    pub tokens_estimate: usize,
    pub pages_estimate: usize,
    pub category: SizeCategory,
}

/// Processing plan selected by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// One combined entity+relationship call (very small documents).
    SinglePass,
    /// Three sequential entity waves.
    ThreeWave,
    /// Three entity waves plus a relationship wave.
    FourWave,
    /// Three entity waves per chunk; no relationships.
    ThreeWaveChunked,
    /// Empty input; no LLM calls.
    EmptyDocument,
    /// Non-text input; no LLM calls.
    InvalidDocument,
    /// Degenerate small input handled as a single pass.
    TooSmall,
}

impl Strategy {
    /// Wire / metadata name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePass => "SINGLE_PASS",
            Self::ThreeWave => "THREE_WAVE",
            Self::FourWave => "FOUR_WAVE",
            Self::ThreeWaveChunked => "THREE_WAVE_CHUNKED",
            Self::EmptyDocument => "EMPTY_DOCUMENT",
            Self::InvalidDocument => "INVALID_DOCUMENT",
            Self::TooSmall => "TOO_SMALL",
        }
    }
}

/// Router output: a strategy plus the reasoning behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub strategy: Strategy,
    /// Whether relationship extraction was requested by the caller.
    pub extract_relationships: bool,
    /// Human-readable explanation of the decision.
    pub rationale: String,
}

/// How a chunk boundary was chosen, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    Section,
    Paragraph,
    Sentence,
    PreservedSpanEnd,
    Word,
    Raw,
}

/// A contiguous slice of a large document, with overlap metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub index: usize,
    pub text: String,
    /// Character offset of the chunk start in the original document.
    pub start_pos: usize,
    /// Character offset one past the chunk end in the original document.
    pub end_pos: usize,
    /// Strategy label that produced the chunk (e.g. "legal_aware").
    pub chunk_type: String,
    /// How the trailing cut point was selected.
    pub boundary_kind: BoundaryKind,
    pub has_overlap: bool,
    /// Characters of overlap shared with the previous chunk.
    pub overlap_before_chars: usize,
    /// Characters of overlap shared with the next chunk.
    pub overlap_after_chars: usize,
}

impl DocumentChunk {
    /// Chunk length in characters.
    pub fn len(&self) -> usize {
        self.end_pos - self.start_pos
    }

    /// True when the chunk covers no characters.
    pub fn is_empty(&self) -> bool {
        self.end_pos == self.start_pos
    }
}

/// A typed span extracted from the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Document-scoped identifier (`{document_id}:e{n}`).
    pub id: String,
    /// Verbatim text of the span.
    pub text: String,
    /// Canonical type from the closed enumeration.
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_pos: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_pos: Option<usize>,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    /// How the entity was produced (e.g. "llm_guided").
    pub extraction_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Up to 50 characters preceding the span.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_before: Option<String>,
    /// Up to 50 characters following the span.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_after: Option<String>,
    /// Wave that produced the entity; `None` for single-pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_number: Option<u8>,
    /// Prompt template that produced the entity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    /// Originating chunk in chunked mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Entity {
    /// Dedup identity key: `(entity_type, lowercased trimmed text)`.
    pub fn identity_key(&self) -> (String, String) {
        (self.entity_type.clone(), self.text.trim().to_lowercase())
    }
}

/// A typed edge between two extracted entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_entity_id: String,
    pub target_entity_id: String,
    /// Canonical type from the closed relationship enumeration.
    pub relationship_type: String,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    /// Verbatim text supporting the relationship; never empty.
    pub evidence_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_after: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Relationship {
    /// Dedup identity key: `(source, type, target)`.
    pub fn identity_key(&self) -> (String, String, String) {
        (
            self.source_entity_id.clone(),
            self.relationship_type.clone(),
            self.target_entity_id.clone(),
        )
    }
}

/// Per-wave accounting recorded in result metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveStats {
    pub wave: u8,
    pub entities_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships_count: Option<usize>,
    pub tokens_used: usize,
    pub prompt_template: String,
}

/// Per-chunk accounting recorded in result metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub chunk_index: usize,
    pub entities_count: usize,
    pub tokens_used: usize,
    pub chunk_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waves_executed: Option<u8>,
    /// Set when the chunk failed after all retries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The final typed graph for one document, handed to the result sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub strategy: Strategy,
    pub waves_executed: u8,
    pub tokens_used: usize,
    /// Wall-clock processing time in seconds.
    pub processing_time: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExtractionResult {
    /// A well-formed empty result for the EMPTY/INVALID edge cases.
    pub fn edge_case(strategy: Strategy, tag: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("edge_case".to_string(), serde_json::json!(tag));
        Self {
            entities: Vec::new(),
            relationships: Vec::new(),
            strategy,
            waves_executed: 0,
            tokens_used: 0,
            processing_time: 0.0,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lengths_are_computed() {
        let doc = Document::new("héllo");
        assert_eq!(doc.char_length, 5);
        assert_eq!(doc.byte_length, 6);
        assert!(!doc.id.is_empty());
    }

    #[test]
    fn entity_identity_normalizes_text() {
        let mut a = sample_entity("  Smith v. Jones ");
        let b = sample_entity("smith v. jones");
        a.confidence = 0.5;
        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn strategy_names_use_wire_format() {
        assert_eq!(Strategy::ThreeWaveChunked.as_str(), "THREE_WAVE_CHUNKED");
        let json = serde_json::to_string(&Strategy::SinglePass).unwrap();
        assert_eq!(json, "\"SINGLE_PASS\"");
    }

    #[test]
    fn entity_serializes_positions_with_canonical_names() {
        let entity = sample_entity("Smith v. Jones");
        let value = serde_json::to_value(&entity).unwrap();
        assert!(value.get("start_pos").is_some());
        assert!(value.get("start").is_none());
        assert!(value.get("type").is_none());
    }

    fn sample_entity(text: &str) -> Entity {
        Entity {
            id: "doc:e0".to_string(),
            text: text.to_string(),
            entity_type: "CASE_CITATION".to_string(),
            start_pos: Some(3),
            end_pos: Some(17),
            confidence: 0.9,
            extraction_method: "llm_guided".to_string(),
            subtype: None,
            category: None,
            context_before: None,
            context_after: None,
            wave_number: Some(1),
            prompt_template: Some("wave1".to_string()),
            chunk_index: None,
            metadata: HashMap::new(),
        }
    }
}
