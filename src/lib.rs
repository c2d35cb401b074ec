//! # lexextract
//!
//! A document-intelligence extraction engine for legal text. A document
//! goes in; a typed graph of entities (CASE_CITATION, STATUTE_CITATION,
//! PARTY, JUDGE, ...) and relationships (CITES_CASE, DECIDED_BY, ...)
//! comes out. Extraction is driven through OpenAI-compatible LLM backends
//! with grammar-constrained JSON decoding.
//!
//! The pipeline: size detection classifies the document, the router picks
//! a strategy (single pass, three entity waves, four waves with
//! relationships, or chunked three-wave for large documents), the
//! orchestrator drives the waves, and validation plus dedup produce the
//! final [`ExtractionResult`].
//!
//! ```no_run
//! use lexextract::{extract, Document, ExtractorConfig};
//!
//! # async fn run() -> lexextract::ExtractResult<()> {
//! let config = ExtractorConfig::default();
//! let document = Document::new("In Smith v. Jones, 123 U.S. 456 (2020), the Court held...");
//! let result = extract(&document, &config, false).await?;
//! for entity in &result.entities {
//!     println!("{} [{}]", entity.text, entity.entity_type);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod config;
pub mod data;
pub mod exceptions;
pub mod gpu;
pub mod inference;
pub mod logging;
pub mod merge;
pub mod orchestrator;
pub mod prompting;
pub mod routing;
pub mod schema;
pub mod size;
pub mod tokens;
pub mod validation;

use std::collections::HashMap;
use std::sync::Arc;

pub use config::{DedupMode, ExtractorConfig};
pub use data::{
    Document, DocumentChunk, Entity, ExtractionResult, Relationship, RoutingDecision,
    SizeCategory, SizeInfo, Strategy,
};
pub use exceptions::{ExtractError, ExtractResult};
pub use inference::{InferenceClient, ServiceKind};
pub use orchestrator::ExtractionOrchestrator;

use size::SizeDetector;

/// Reusable extraction engine: size detection, routing, and orchestration
/// behind one call. Clients connect lazily on the first extraction.
pub struct ExtractionEngine {
    detector: SizeDetector,
    orchestrator: ExtractionOrchestrator,
}

impl ExtractionEngine {
    /// Build an engine from validated configuration.
    pub fn new(config: ExtractorConfig) -> ExtractResult<Self> {
        config.validate()?;
        Ok(Self {
            detector: SizeDetector::new(config.routing.clone(), &config.inference),
            orchestrator: ExtractionOrchestrator::new(config)?,
        })
    }

    /// Build an engine around externally supplied backend clients.
    pub fn with_clients(
        config: ExtractorConfig,
        instruct: Arc<dyn InferenceClient>,
        thinking: Option<Arc<dyn InferenceClient>>,
    ) -> ExtractResult<Self> {
        config.validate()?;
        Ok(Self {
            detector: SizeDetector::new(config.routing.clone(), &config.inference),
            orchestrator: ExtractionOrchestrator::with_clients(config, instruct, thinking)?,
        })
    }

    /// Size, route, and extract one document.
    pub async fn extract(
        &self,
        document: &Document,
        extract_relationships: bool,
    ) -> ExtractResult<ExtractionResult> {
        self.extract_with_metadata(document, extract_relationships, None).await
    }

    /// Like [`extract`](Self::extract), with caller metadata carried into
    /// the result.
    pub async fn extract_with_metadata(
        &self,
        document: &Document,
        extract_relationships: bool,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> ExtractResult<ExtractionResult> {
        let size_info = self.detector.detect(&document.text);
        let decision = routing::route(&size_info, extract_relationships);
        self.orchestrator.extract(document, &decision, &size_info, metadata).await
    }
}

/// One-shot convenience: build an engine and extract a single document.
pub async fn extract(
    document: &Document,
    config: &ExtractorConfig,
    extract_relationships: bool,
) -> ExtractResult<ExtractionResult> {
    let engine = ExtractionEngine::new(config.clone())?;
    engine.extract(document, extract_relationships).await
}
