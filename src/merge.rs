//! Merging and deduplication of extraction results.
//!
//! Dedup is order-preserving: the first occurrence wins, so earlier waves
//! and earlier chunks keep priority and repeated runs produce identical
//! orderings. The optional fuzzy pass collapses near-duplicates of the
//! same type by normalized edit distance, retaining the highest-confidence
//! instance in the first occurrence's slot.

use std::collections::{HashMap, HashSet};

use crate::config::DedupMode;
use crate::data::{DocumentChunk, Entity, Relationship};
use crate::logging::{report_progress, ProgressEvent};

/// Deduplicate entities across waves and chunks.
pub fn dedup_entities(entities: Vec<Entity>, mode: DedupMode, threshold: f64) -> Vec<Entity> {
    let before = entities.len();

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut kept: Vec<Entity> = Vec::with_capacity(entities.len());

    for entity in entities {
        let key = entity.identity_key();
        if !seen.insert(key) {
            continue;
        }

        if mode == DedupMode::Fuzzy && threshold > 0.0 {
            // Compare against already-kept entities of the same type.
            let normalized = entity.text.trim().to_lowercase();
            let near = kept.iter_mut().find(|k| {
                k.entity_type == entity.entity_type
                    && similarity(&k.text.trim().to_lowercase(), &normalized) >= threshold
            });
            if let Some(existing) = near {
                if entity.confidence > existing.confidence {
                    // Higher-confidence duplicate takes over the slot.
                    *existing = entity;
                }
                continue;
            }
        }

        kept.push(entity);
    }

    report_progress(ProgressEvent::DedupCompleted { before, after: kept.len() });
    kept
}

/// Filter and deduplicate relationships.
///
/// Filters (applied before dedup): both endpoints must exist in the entity
/// set, no self-references, and confidence at or above the floor. Rejected
/// relationships are logged with the reason.
pub fn dedup_relationships(
    relationships: Vec<Relationship>,
    entity_ids: &HashSet<String>,
    confidence_floor: f64,
) -> Vec<Relationship> {
    let before = relationships.len();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut kept = Vec::with_capacity(relationships.len());

    for rel in relationships {
        if !entity_ids.contains(&rel.source_entity_id) {
            log::warn!(
                "dropping relationship: source '{}' not in entity set",
                rel.source_entity_id
            );
            continue;
        }
        if !entity_ids.contains(&rel.target_entity_id) {
            log::warn!(
                "dropping relationship: target '{}' not in entity set",
                rel.target_entity_id
            );
            continue;
        }
        if rel.source_entity_id == rel.target_entity_id {
            log::warn!(
                "dropping self-referential relationship on '{}'",
                rel.source_entity_id
            );
            continue;
        }
        if rel.confidence < confidence_floor {
            log::warn!(
                "dropping relationship {} -> {}: confidence {:.2} below floor {:.2}",
                rel.source_entity_id,
                rel.target_entity_id,
                rel.confidence,
                confidence_floor
            );
            continue;
        }
        if seen.insert(rel.identity_key()) {
            kept.push(rel);
        }
    }

    report_progress(ProgressEvent::DedupCompleted { before, after: kept.len() });
    kept
}

/// Attach `context_before`/`context_after` (up to `window` characters on
/// each side) to every entity with known positions.
pub fn enrich_context(entities: &mut [Entity], document_text: &str, window: usize) {
    let chars: Vec<char> = document_text.chars().collect();
    for entity in entities.iter_mut() {
        if let Some(start) = entity.start_pos {
            let from = start.saturating_sub(window);
            let to = start.min(chars.len());
            entity.context_before = Some(chars[from.min(to)..to].iter().collect());
        } else {
            entity.context_before = Some(String::new());
        }
        if let Some(end) = entity.end_pos {
            let from = end.min(chars.len());
            let to = (end + window).min(chars.len());
            entity.context_after = Some(chars[from..to.max(from)].iter().collect());
        } else {
            entity.context_after = Some(String::new());
        }
    }
}

/// Shift chunk-relative entity positions into document coordinates and tag
/// the chunk provenance.
pub fn adjust_chunk_positions(entities: &mut [Entity], chunk: &DocumentChunk) {
    for entity in entities.iter_mut() {
        if let Some(start) = entity.start_pos {
            entity.start_pos = Some(start + chunk.start_pos);
        }
        if let Some(end) = entity.end_pos {
            entity.end_pos = Some(end + chunk.start_pos);
        }
        entity.chunk_index = Some(chunk.index);
        entity.metadata.insert(
            "chunk_metadata".to_string(),
            serde_json::json!({
                "chunk_start": chunk.start_pos,
                "chunk_end": chunk.end_pos,
                "chunk_type": chunk.chunk_type,
                "has_overlap": chunk.has_overlap,
            }),
        );
    }
}

/// Normalized similarity in [0, 1] from Levenshtein distance.
fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }
    let dist = levenshtein(a, b);
    1.0 - dist as f64 / len_a.max(len_b) as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.iter().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (prev + cost).min(row[j] + 1).min(row[j + 1] + 1);
            prev = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

/// Histogram of entity counts keyed by a labeling function, for metadata.
pub fn count_by<F>(entities: &[Entity], label: F) -> HashMap<String, usize>
where
    F: Fn(&Entity) -> String,
{
    let mut counts = HashMap::new();
    for entity in entities {
        *counts.entry(label(entity)).or_insert(0) += 1;
    }
    counts
}
