//! The extraction orchestrator.
//!
//! Drives the strategy selected by the router: a single consolidated call
//! for very small documents, three sequential entity waves for small and
//! medium ones, an additional relationship wave when requested, and
//! chunked three-wave extraction for large documents with a bounded,
//! order-preserving fan-out.
//!
//! Backend clients are initialized lazily and single-flight on first use.
//! The instruct service is mandatory; the thinking service degrades to the
//! instruct client with a warning when its health check fails.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::chunking::LegalChunker;
use crate::config::ExtractorConfig;
use crate::data::{
    ChunkOutcome, Document, DocumentChunk, Entity, ExtractionResult, Relationship,
    RoutingDecision, SizeInfo, Strategy, WaveStats,
};
use crate::exceptions::{ExtractError, ExtractResult};
use crate::gpu::GpuMonitor;
use crate::inference::{
    client_for_service, ChatMessage, InferenceClient, InferenceRequest, ServiceKind,
};
use crate::logging::{report_progress, ProgressEvent};
use crate::merge::{
    adjust_chunk_positions, count_by, dedup_entities, dedup_relationships, enrich_context,
};
use crate::prompting::PromptAssembler;
use crate::schema::{entity_response_schema, relationship_response_schema, single_pass_response_schema};
use crate::validation::{IdAllocator, ResponseValidator};

/// Accumulated output of the entity waves for one text (document or chunk).
struct EntityWavesOutcome {
    entities: Vec<Entity>,
    tokens_used: usize,
    wave_stats: Vec<WaveStats>,
    schema_rejections: usize,
    dropped_responses: usize,
}

/// Output of one full strategy run, before result assembly.
struct StrategyOutcome {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    waves_executed: u8,
    tokens_used: usize,
    metadata: HashMap<String, Value>,
}

/// Central scheduler for document extraction.
pub struct ExtractionOrchestrator {
    config: ExtractorConfig,
    prompts: PromptAssembler,
    validator: ResponseValidator,
    chunker: LegalChunker,
    gpu: Option<Arc<GpuMonitor>>,
    instruct_preset: Option<Arc<dyn InferenceClient>>,
    thinking_preset: Option<Arc<dyn InferenceClient>>,
    instruct: Mutex<Option<Arc<dyn InferenceClient>>>,
    thinking: Mutex<Option<Arc<dyn InferenceClient>>>,
}

impl ExtractionOrchestrator {
    /// Build an orchestrator that creates HTTP backend clients on first use.
    pub fn new(config: ExtractorConfig) -> ExtractResult<Self> {
        config.validate()?;
        let gpu = config.gpu.enabled.then(|| Arc::new(GpuMonitor::new(config.gpu.clone())));
        if let Some(monitor) = &gpu {
            monitor.start_sampler();
        }
        Ok(Self::assemble(config, gpu, None, None))
    }

    /// Build an orchestrator around externally supplied clients. The
    /// clients are still health-checked on first use.
    pub fn with_clients(
        config: ExtractorConfig,
        instruct: Arc<dyn InferenceClient>,
        thinking: Option<Arc<dyn InferenceClient>>,
    ) -> ExtractResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, None, Some(instruct), thinking))
    }

    fn assemble(
        config: ExtractorConfig,
        gpu: Option<Arc<GpuMonitor>>,
        instruct_preset: Option<Arc<dyn InferenceClient>>,
        thinking_preset: Option<Arc<dyn InferenceClient>>,
    ) -> Self {
        Self {
            prompts: PromptAssembler::new(config.prompts_dir.clone(), config.patterns.clone()),
            validator: ResponseValidator::new(config.extraction.relationship_confidence_floor),
            chunker: LegalChunker::new(config.chunking.clone(), config.inference.chars_per_token),
            gpu,
            instruct_preset,
            thinking_preset,
            instruct: Mutex::new(None),
            thinking: Mutex::new(None),
            config,
        }
    }

    /// Lazy single-flight initialization of the entity-extraction client.
    /// A failed health check is fatal for the call.
    async fn ensure_instruct(&self) -> ExtractResult<Arc<dyn InferenceClient>> {
        let mut guard = self.instruct.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = self
            .instruct_preset
            .clone()
            .unwrap_or_else(|| client_for_service(&self.config, ServiceKind::Instruct, self.gpu.clone()));
        client.connect().await?;
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Lazy initialization of the relationship-extraction client, with
    /// graceful degradation to the instruct client.
    async fn ensure_thinking(&self) -> ExtractResult<Arc<dyn InferenceClient>> {
        {
            let guard = self.thinking.lock().await;
            if let Some(client) = guard.as_ref() {
                return Ok(client.clone());
            }
        }

        let candidate = self
            .thinking_preset
            .clone()
            .unwrap_or_else(|| client_for_service(&self.config, ServiceKind::Thinking, self.gpu.clone()));

        let resolved = match candidate.connect().await {
            Ok(()) => candidate,
            Err(e) => {
                log::warn!(
                    "thinking service unavailable ({e}); falling back to instruct client \
                     for relationship extraction"
                );
                self.ensure_instruct().await?
            }
        };

        let mut guard = self.thinking.lock().await;
        if guard.is_none() {
            *guard = Some(resolved.clone());
        }
        Ok(guard.as_ref().cloned().unwrap_or(resolved))
    }

    /// Extract entities (and relationships, per strategy) from a document.
    #[tracing::instrument(skip_all, fields(document_id = %document.id, strategy = decision.strategy.as_str()))]
    pub async fn extract(
        &self,
        document: &Document,
        decision: &RoutingDecision,
        size_info: &SizeInfo,
        metadata: Option<HashMap<String, Value>>,
    ) -> ExtractResult<ExtractionResult> {
        let start = std::time::Instant::now();
        report_progress(ProgressEvent::ExtractionStarted {
            document_id: document.id.clone(),
            strategy: decision.strategy.as_str().to_string(),
            chars: size_info.chars,
        });

        let outcome = if self.config.extraction_deadline_seconds > 0 {
            let deadline = Duration::from_secs(self.config.extraction_deadline_seconds);
            match tokio::time::timeout(deadline, self.dispatch(document, decision)).await {
                Ok(result) => result?,
                // No partial result survives the deadline.
                Err(_) => {
                    return Err(ExtractError::Cancelled(format!(
                        "extraction deadline of {}s expired",
                        self.config.extraction_deadline_seconds
                    )));
                }
            }
        } else {
            self.dispatch(document, decision).await?
        };

        let processing_time = start.elapsed().as_secs_f64();
        let mut result_metadata = outcome.metadata;
        if let Some(caller) = metadata {
            result_metadata.insert("document_metadata".to_string(), json!(caller));
        }
        result_metadata.insert("rationale".to_string(), json!(decision.rationale));

        report_progress(ProgressEvent::ExtractionCompleted {
            total_entities: outcome.entities.len(),
            total_relationships: outcome.relationships.len(),
            waves_executed: outcome.waves_executed,
            processing_time_ms: (processing_time * 1000.0) as u64,
        });

        Ok(ExtractionResult {
            entities: outcome.entities,
            relationships: outcome.relationships,
            strategy: decision.strategy,
            waves_executed: outcome.waves_executed,
            tokens_used: outcome.tokens_used,
            processing_time,
            metadata: result_metadata,
        })
    }

    async fn dispatch(
        &self,
        document: &Document,
        decision: &RoutingDecision,
    ) -> ExtractResult<StrategyOutcome> {
        match decision.strategy {
            Strategy::EmptyDocument => Ok(edge_case_outcome("empty_document")),
            Strategy::InvalidDocument => Ok(edge_case_outcome("invalid_document")),
            Strategy::SinglePass | Strategy::TooSmall => self.single_pass(document).await,
            Strategy::ThreeWave => self.three_wave(document).await,
            Strategy::FourWave => self.four_wave(document).await,
            Strategy::ThreeWaveChunked => self.three_wave_chunked(document).await,
        }
    }

    /// One combined entity+relationship call for very small documents.
    async fn single_pass(&self, document: &Document) -> ExtractResult<StrategyOutcome> {
        let client = self.ensure_instruct().await?;
        let template = self.prompts.single_pass_prompt().await?;
        let prompt = format_prompt(&template.content, &document.text, None);

        let request = InferenceRequest::new(
            vec![ChatMessage::user(prompt)],
            self.config.inference.max_completion_tokens,
        )
        .with_guided_json(single_pass_response_schema());

        let response = self.call_wave(&client, request, 0, "single_pass").await?;

        let mut ids = IdAllocator::new(&document.id);
        let mut schema_rejections = 0;
        let mut dropped_responses = 0;
        let (mut entities, relationships) =
            match self.validator.parse_single_pass(&response.content, &mut ids) {
                Ok((entity_batch, relationship_batch)) => {
                    schema_rejections += entity_batch.rejected + relationship_batch.rejected;
                    (entity_batch.entities, relationship_batch.relationships)
                }
                Err(e) => {
                    // Grammar constraint should make this unreachable; the
                    // whole response is dropped.
                    log::error!("single-pass response dropped: {e}");
                    dropped_responses += 1;
                    (Vec::new(), Vec::new())
                }
            };

        for entity in &mut entities {
            entity.prompt_template = Some("single_pass".to_string());
            entity.wave_number = None;
        }
        enrich_context(&mut entities, &document.text, self.config.extraction.context_window_chars);

        let entity_ids: HashSet<String> = entities.iter().map(|e| e.id.clone()).collect();
        let relationships = dedup_relationships(
            relationships,
            &entity_ids,
            self.config.extraction.relationship_confidence_floor,
        );

        let mut metadata = HashMap::new();
        metadata.insert("prompt_version".to_string(), json!("single_pass"));
        metadata.insert("prompt_tokens".to_string(), json!(template.token_count));
        metadata.insert(
            "extraction_type".to_string(),
            json!("combined_entities_relationships"),
        );
        metadata.insert("schema_rejections".to_string(), json!(schema_rejections));
        metadata.insert("dropped_responses".to_string(), json!(dropped_responses));

        Ok(StrategyOutcome {
            entities,
            relationships,
            waves_executed: 1,
            tokens_used: response.usage.total_tokens,
            metadata,
        })
    }

    /// Three sequential entity waves over the whole document.
    async fn three_wave(&self, document: &Document) -> ExtractResult<StrategyOutcome> {
        let client = self.ensure_instruct().await?;
        let mut ids = IdAllocator::new(&document.id);
        let waves = self.run_entity_waves(&client, &document.text, &mut ids).await?;

        let deduped = dedup_entities(
            waves.entities,
            self.config.extraction.dedup_mode,
            self.config.extraction.dedup_similarity_threshold,
        );

        let metadata = entity_wave_metadata("three_wave", &waves.wave_stats, &deduped, waves.schema_rejections, waves.dropped_responses);

        Ok(StrategyOutcome {
            entities: deduped,
            relationships: Vec::new(),
            waves_executed: 3,
            tokens_used: waves.tokens_used,
            metadata,
        })
    }

    /// Waves 1-3 plus the relationship wave. A wave-4 failure degrades to
    /// the entity-only result rather than failing the extraction.
    async fn four_wave(&self, document: &Document) -> ExtractResult<StrategyOutcome> {
        let client = self.ensure_instruct().await?;
        let mut ids = IdAllocator::new(&document.id);
        let waves = self.run_entity_waves(&client, &document.text, &mut ids).await?;

        let mut wave_stats = waves.wave_stats;
        let deduped = dedup_entities(
            waves.entities,
            self.config.extraction.dedup_mode,
            self.config.extraction.dedup_similarity_threshold,
        );
        let mut tokens_used = waves.tokens_used;
        let mut schema_rejections = waves.schema_rejections;
        let mut dropped_responses = waves.dropped_responses;

        let (relationships, waves_executed, degraded) =
            match self.run_relationship_wave(document, &deduped).await {
                Ok((relationships, tokens, rejected)) => {
                    tokens_used += tokens;
                    schema_rejections += rejected;
                    wave_stats.push(WaveStats {
                        wave: 4,
                        entities_count: 0,
                        relationships_count: Some(relationships.len()),
                        tokens_used: tokens,
                        prompt_template: "wave4".to_string(),
                    });
                    (relationships, 4, None)
                }
                Err(e) => {
                    log::warn!("wave 4 failed ({e}); returning entity-only result");
                    dropped_responses += 1;
                    (Vec::new(), 3, Some(e.to_string()))
                }
            };

        let mut metadata = entity_wave_metadata("four_wave", &wave_stats, &deduped, schema_rejections, dropped_responses);
        metadata.insert("relationships_extracted".to_string(), json!(relationships.len()));
        if let Some(reason) = degraded {
            metadata.insert("wave4_degraded".to_string(), json!(reason));
        }

        Ok(StrategyOutcome {
            entities: deduped,
            relationships,
            waves_executed,
            tokens_used,
            metadata,
        })
    }

    /// Chunked three-wave extraction for large documents. Chunks run with
    /// bounded parallelism in input order; a failed chunk contributes no
    /// entities and the extraction succeeds if at least one chunk does.
    async fn three_wave_chunked(&self, document: &Document) -> ExtractResult<StrategyOutcome> {
        let client = self.ensure_instruct().await?;
        let chunks = self.chunker.chunk(&document.text, None, None);
        if chunks.is_empty() {
            return Err(ExtractError::FatalBackend(
                "chunker produced no chunks for a large document".to_string(),
            ));
        }
        let total_chunks = chunks.len();
        let statistics = self.chunker.statistics(&chunks);

        let outcomes: Vec<(DocumentChunk, ExtractResult<EntityWavesOutcome>)> =
            stream::iter(chunks.into_iter())
                .map(|chunk| {
                    let client = client.clone();
                    let document_id = document.id.clone();
                    async move {
                        // Ids are namespaced per chunk so concurrent chunks
                        // stay collision-free and document-scoped.
                        let mut ids = IdAllocator::new(&format!("{document_id}:c{}", chunk.index));
                        let outcome = self.run_entity_waves(&client, &chunk.text, &mut ids).await;
                        (chunk, outcome)
                    }
                })
                .buffered(self.config.chunking.max_concurrent_chunks)
                .collect()
                .await;

        let mut all_entities = Vec::new();
        let mut chunk_results = Vec::with_capacity(total_chunks);
        let mut tokens_used = 0;
        let mut schema_rejections = 0;
        let mut dropped_responses = 0;
        let mut succeeded = 0usize;

        for (chunk, outcome) in outcomes {
            match outcome {
                Ok(mut waves) => {
                    adjust_chunk_positions(&mut waves.entities, &chunk);
                    enrich_context(
                        &mut waves.entities,
                        &document.text,
                        self.config.extraction.context_window_chars,
                    );
                    report_progress(ProgressEvent::ChunkCompleted {
                        chunk_index: chunk.index,
                        total_chunks,
                        entities_found: waves.entities.len(),
                    });
                    chunk_results.push(ChunkOutcome {
                        chunk_index: chunk.index,
                        entities_count: waves.entities.len(),
                        tokens_used: waves.tokens_used,
                        chunk_length: chunk.len(),
                        waves_executed: Some(3),
                        error: None,
                    });
                    tokens_used += waves.tokens_used;
                    schema_rejections += waves.schema_rejections;
                    dropped_responses += waves.dropped_responses;
                    succeeded += 1;
                    all_entities.extend(waves.entities);
                }
                Err(e) => {
                    report_progress(ProgressEvent::ChunkFailed {
                        chunk_index: chunk.index,
                        error: e.to_string(),
                    });
                    chunk_results.push(ChunkOutcome {
                        chunk_index: chunk.index,
                        entities_count: 0,
                        tokens_used: 0,
                        chunk_length: chunk.len(),
                        waves_executed: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if succeeded == 0 {
            return Err(ExtractError::FatalBackend(format!(
                "all {total_chunks} chunks failed"
            )));
        }

        let before_dedup = all_entities.len();
        let deduped = dedup_entities(
            all_entities,
            self.config.extraction.dedup_mode,
            self.config.extraction.dedup_similarity_threshold,
        );

        let mut metadata = HashMap::new();
        metadata.insert("prompt_version".to_string(), json!("three_wave_chunked"));
        metadata.insert("chunking_applied".to_string(), json!(true));
        metadata.insert("total_chunks".to_string(), json!(total_chunks));
        metadata.insert("chunks_succeeded".to_string(), json!(succeeded));
        metadata.insert("chunk_results".to_string(), json!(chunk_results));
        metadata.insert("chunk_statistics".to_string(), json!(statistics));
        metadata.insert(
            "deduplication_ratio".to_string(),
            json!(if before_dedup > 0 { deduped.len() as f64 / before_dedup as f64 } else { 1.0 }),
        );
        metadata.insert("entities_before_dedup".to_string(), json!(before_dedup));
        metadata.insert("entities_after_dedup".to_string(), json!(deduped.len()));
        metadata.insert(
            "entities_by_chunk".to_string(),
            json!(count_by(&deduped, |e| format!("chunk_{}", e.chunk_index.unwrap_or(0)))),
        );
        metadata.insert("schema_rejections".to_string(), json!(schema_rejections));
        metadata.insert("dropped_responses".to_string(), json!(dropped_responses));

        Ok(StrategyOutcome {
            entities: deduped,
            relationships: Vec::new(),
            waves_executed: 3,
            tokens_used,
            metadata,
        })
    }

    /// Run waves 1-3 over one text. Wave failures propagate to the caller,
    /// which decides whether they are fatal (whole-document strategies) or
    /// chunk-local.
    async fn run_entity_waves(
        &self,
        client: &Arc<dyn InferenceClient>,
        text: &str,
        ids: &mut IdAllocator,
    ) -> ExtractResult<EntityWavesOutcome> {
        let mut all_entities: Vec<Entity> = Vec::new();
        let mut wave_stats = Vec::with_capacity(3);
        let mut tokens_used = 0;
        let mut schema_rejections = 0;
        let mut dropped_responses = 0;

        for wave in 1..=3u8 {
            let template = self.prompts.entity_wave_prompt(wave).await?;
            // Later waves see the accumulated entities for disambiguation
            // only; the prompt instructs them not to re-emit.
            let previous = (wave > 1).then_some(all_entities.as_slice());
            let prompt = format_prompt(&template.content, text, previous);

            let request = InferenceRequest::new(
                vec![ChatMessage::user(prompt)],
                self.config.inference.max_completion_tokens,
            )
            .with_guided_json(entity_response_schema(Some(wave)));

            let response = self.call_wave(client, request, wave, &template.name).await?;
            tokens_used += response.usage.total_tokens;

            let mut entities = match self.validator.parse_entities(&response.content, ids) {
                Ok(batch) => {
                    schema_rejections += batch.rejected;
                    batch.entities
                }
                Err(e) => {
                    // Parse failure drops the whole response for this wave.
                    log::error!("wave {wave} response dropped: {e}");
                    dropped_responses += 1;
                    Vec::new()
                }
            };

            for entity in &mut entities {
                entity.wave_number = Some(wave);
                entity.prompt_template = Some(template.name.clone());
            }
            enrich_context(&mut entities, text, self.config.extraction.context_window_chars);

            report_progress(ProgressEvent::WaveCompleted {
                wave,
                entities_found: entities.len(),
                relationships_found: 0,
                tokens_used: response.usage.total_tokens,
            });
            wave_stats.push(WaveStats {
                wave,
                entities_count: entities.len(),
                relationships_count: None,
                tokens_used: response.usage.total_tokens,
                prompt_template: template.name.clone(),
            });
            all_entities.extend(entities);
        }

        Ok(EntityWavesOutcome {
            entities: all_entities,
            tokens_used,
            wave_stats,
            schema_rejections,
            dropped_responses,
        })
    }

    /// Wave 4: relationship extraction over the deduplicated entity set,
    /// on the thinking service.
    async fn run_relationship_wave(
        &self,
        document: &Document,
        entities: &[Entity],
    ) -> ExtractResult<(Vec<Relationship>, usize, usize)> {
        let client = self.ensure_thinking().await?;
        let template = self.prompts.relationship_wave_prompt(entities).await?;
        let prompt = format_prompt(&template.content, &document.text, None);

        let request = InferenceRequest::new(
            vec![ChatMessage::user(prompt)],
            self.config.inference.max_completion_tokens,
        )
        .with_guided_json(relationship_response_schema());

        let response = self.call_wave(&client, request, 4, "wave4").await?;

        let entity_ids: HashSet<String> = entities.iter().map(|e| e.id.clone()).collect();
        let batch = self.validator.parse_relationships(&response.content, &entity_ids)?;
        let relationships = dedup_relationships(
            batch.relationships,
            &entity_ids,
            self.config.extraction.relationship_confidence_floor,
        );

        report_progress(ProgressEvent::WaveCompleted {
            wave: 4,
            entities_found: 0,
            relationships_found: relationships.len(),
            tokens_used: response.usage.total_tokens,
        });

        Ok((relationships, response.usage.total_tokens, batch.rejected))
    }

    /// Issue one wave call under the per-wave timeout.
    async fn call_wave(
        &self,
        client: &Arc<dyn InferenceClient>,
        request: InferenceRequest,
        wave: u8,
        template_name: &str,
    ) -> ExtractResult<crate::inference::InferenceResponse> {
        report_progress(ProgressEvent::WaveStarted {
            wave,
            prompt_template: template_name.to_string(),
            prompt_chars: request.messages.iter().map(|m| m.content.len()).sum(),
        });

        if self.config.wave_timeout_seconds == 0 {
            return client.generate_chat_completion(request).await;
        }
        let timeout = Duration::from_secs(self.config.wave_timeout_seconds);
        match tokio::time::timeout(timeout, client.generate_chat_completion(request)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractError::Cancelled(format!(
                "wave {wave} timed out after {}s",
                self.config.wave_timeout_seconds
            ))),
        }
    }
}

fn edge_case_outcome(tag: &str) -> StrategyOutcome {
    let mut metadata = HashMap::new();
    metadata.insert("edge_case".to_string(), json!(tag));
    StrategyOutcome {
        entities: Vec::new(),
        relationships: Vec::new(),
        waves_executed: 0,
        tokens_used: 0,
        metadata,
    }
}

/// Assemble the final prompt: template, optional previous-entity context,
/// the document text, and the response cue.
fn format_prompt(template: &str, document_text: &str, previous: Option<&[Entity]>) -> String {
    let mut prompt = String::with_capacity(template.len() + document_text.len() + 256);
    prompt.push_str(template);
    prompt.push_str("\n\n");

    if let Some(entities) = previous {
        if !entities.is_empty() {
            let shown: Vec<Value> = entities
                .iter()
                .take(10)
                .map(|e| json!({ "id": e.id, "entity_type": e.entity_type, "text": e.text }))
                .collect();
            prompt.push_str(&format!(
                "## Context\n\nPreviously extracted entities ({} total, first {} shown; \
                 do not re-emit): {}\n\n",
                entities.len(),
                shown.len(),
                json!(shown)
            ));
        }
    }

    prompt.push_str("## Document Text\n\n");
    prompt.push_str(document_text);
    prompt.push_str("\n\n## Your Response (JSON only):\n\n");
    prompt
}

fn entity_wave_metadata(
    version: &str,
    wave_stats: &[WaveStats],
    deduped: &[Entity],
    schema_rejections: usize,
    dropped_responses: usize,
) -> HashMap<String, Value> {
    let before: usize = wave_stats.iter().map(|w| w.entities_count).sum();
    let mut metadata = HashMap::new();
    metadata.insert("prompt_version".to_string(), json!(version));
    metadata.insert("wave_results".to_string(), json!(wave_stats));
    metadata.insert(
        "deduplication_ratio".to_string(),
        json!(if before > 0 { deduped.len() as f64 / before as f64 } else { 1.0 }),
    );
    metadata.insert(
        "entities_by_wave".to_string(),
        json!(count_by(deduped, |e| format!("wave_{}", e.wave_number.unwrap_or(0)))),
    );
    metadata.insert("schema_rejections".to_string(), json!(schema_rejections));
    metadata.insert("dropped_responses".to_string(), json!(dropped_responses));
    metadata
}
