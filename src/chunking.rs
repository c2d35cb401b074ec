//! Legal-aware document chunking.
//!
//! Large documents are split along semantically meaningful boundaries so
//! that no chunk bisects a citation or a substantial quotation. Five
//! strategies are available; the adaptive default picks one from the
//! detected document type. Cut points are snapped to the highest-priority
//! boundary available: paragraph > sentence > end of preserved span >
//! word > raw position.
//!
//! Positions: chunks are cut on UTF-8 character boundaries internally, and
//! `start_pos`/`end_pos` on the emitted chunks are character offsets into
//! the original document, matching entity position semantics.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ChunkingSettings;
use crate::data::{BoundaryKind, DocumentChunk};
use crate::logging::{report_progress, ProgressEvent};

/// Kinds of legal document, driving adaptive strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Contract,
    Opinion,
    Statute,
    Brief,
    Unknown,
}

/// Available chunking strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    LegalAware,
    SectionAware,
    ParagraphAware,
    SentenceAware,
    FixedSize,
    Adaptive,
}

impl ChunkStrategy {
    fn label(&self) -> &'static str {
        match self {
            Self::LegalAware => "legal_aware",
            Self::SectionAware => "section_aware",
            Self::ParagraphAware => "paragraph_aware",
            Self::SentenceAware => "sentence_aware",
            Self::FixedSize => "fixed_size",
            Self::Adaptive => "adaptive",
        }
    }
}

/// Aggregate chunk statistics recorded into result metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStatistics {
    pub total_chunks: usize,
    pub avg_chunk_size: f64,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub total_text_length: usize,
    pub chunk_types: HashMap<String, usize>,
    pub overlap_enabled: bool,
    pub overlap_size: usize,
}

static SECTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?mi)^\s*(?:(?:ARTICLE|ART\.?)\s+[IVXLCDM]+|(?:SECTION|SEC\.?|§)\s+\d+|\d+\.\s+[A-Z]|\([a-z]\)|\(\d+\)|[A-Z]\.\s+|\d+\.\d+|WHEREAS|NOW,?\s*THEREFORE|WITNESSETH|RECITALS?|DEFINITIONS?\s*:?$|(?:SCHEDULE|EXHIBIT|APPENDIX)\s+[A-Z0-9])",
    )
    .expect("section pattern compiles")
});

static CITATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b\d+\s+U\.S\.C\.\s*§?\s*\d+[\w().]*|\b\d+\s+C\.F\.R\.\s*§?\s*\d+[\w().]*|\b\d+\s+U\.S\.\s*\d+\b|\b\d+\s+S\.\s?Ct\.\s*\d+\b|\b\d+\s+[A-Z][a-z]+\.?\s?(?:2d|3d|4th)?\s+\d+\b|\b[A-Z][A-Za-z']+\s+v\.\s+[A-Z][A-Za-z']+|§§?\s*\d+(?:\.\d+)*",
    )
    .expect("citation pattern compiles")
});

static QUOTE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[^"]{10,}"|“[^”]{10,}”|``[^']{10,}''"#).expect("quote pattern compiles"));

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n+").expect("paragraph pattern compiles"));

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]["')\]]*\s+"#).expect("sentence pattern compiles"));

/// Legal terminology tiers used by the complexity score.
const HIGH_COMPLEXITY_TERMS: &[&str] = &[
    "notwithstanding", "hereinafter", "whereas", "heretofore", "aforementioned",
    "hereunder", "thereunder", "pursuant", "estoppel", "certiorari", "mandamus",
];
const MEDIUM_COMPLEXITY_TERMS: &[&str] = &[
    "plaintiff", "defendant", "appellant", "appellee", "jurisdiction", "precedent",
    "statute", "regulation", "liability", "negligence", "breach", "damages",
    "injunction", "motion", "discovery",
];
const LOW_COMPLEXITY_TERMS: &[&str] = &[
    "court", "judge", "law", "legal", "case", "claim", "party", "agreement",
    "contract", "document", "filing", "order",
];

struct PlannedCut {
    pos: usize,
    kind: BoundaryKind,
}

/// Smart chunker for legal documents.
pub struct LegalChunker {
    settings: ChunkingSettings,
    chars_per_token: f64,
}

impl LegalChunker {
    pub fn new(settings: ChunkingSettings, chars_per_token: f64) -> Self {
        Self { settings, chars_per_token }
    }

    /// Target usable chunk size in characters, from the sizing formula:
    /// `floor(context_window × safety_fraction) − fixed_overhead_tokens`,
    /// converted to characters and clamped to the configured bounds.
    pub fn target_chunk_chars(&self) -> usize {
        let s = &self.settings;
        let usable_tokens = (s.context_window_tokens as f64 * s.safety_fraction).floor() as usize;
        let usable_tokens = usable_tokens.saturating_sub(s.fixed_overhead_tokens);
        let chars = (usable_tokens as f64 * self.chars_per_token) as usize;
        chars.clamp(s.chunk_min_chars, s.chunk_max_chars)
    }

    /// Detect the document type from indicator terms in the opening text.
    pub fn detect_document_type(&self, text: &str) -> DocumentType {
        let head: String = text.chars().take(5_000).collect::<String>().to_lowercase();

        let score = |terms: &[&str]| terms.iter().filter(|t| head.contains(*t)).count();

        let contract = score(&[
            "agreement", "whereas", "witnesseth", "effective date", "termination",
            "obligations", "representations", "warranties", "indemnification",
        ]);
        let opinion = score(&[
            "opinion", "dissent", "concur", "reverse", "affirm", "remand", "appellant",
            "appellee", "held", "circuit", "district court", "supreme court",
        ]);
        let statute = score(&[
            "enacted", "amended", "subsection", "shall", "prohibited", "authorized",
            "penalty", "violation", "enforcement",
        ]);
        let brief = score(&[
            "plaintiff", "memorandum", "argument", "standard of review", "conclusion",
            "respectfully", "relief", "prayer",
        ]);

        let best = [
            (DocumentType::Contract, contract),
            (DocumentType::Opinion, opinion),
            (DocumentType::Statute, statute),
            (DocumentType::Brief, brief),
        ]
        .into_iter()
        .max_by_key(|(_, s)| *s)
        .map(|(t, s)| if s >= 2 { t } else { DocumentType::Unknown })
        .unwrap_or(DocumentType::Unknown);

        log::debug!("document type detected: {:?} (c={contract} o={opinion} s={statute} b={brief})", best);
        best
    }

    /// Complexity score in [0, 1] from legal-term density, sentence length
    /// and citation density.
    pub fn complexity(&self, text: &str) -> f64 {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();
        let total = words.len();
        if total == 0 {
            return 0.0;
        }

        let count_terms = |terms: &[&str]| {
            words.iter().filter(|w| terms.contains(&w.trim_matches(|c: char| !c.is_alphanumeric()))).count()
        };
        let high = count_terms(HIGH_COMPLEXITY_TERMS);
        let medium = count_terms(MEDIUM_COMPLEXITY_TERMS);
        let low = count_terms(LOW_COMPLEXITY_TERMS);
        let mut score = (high * 3 + medium * 2 + low) as f64 / (total * 3) as f64;

        let sentences = SENTENCE_END.find_iter(text).count().max(1);
        let avg_sentence_len = total as f64 / sentences as f64;
        score = (score + (avg_sentence_len / 50.0).min(1.0)) / 2.0;

        let citations = CITATION_PATTERN.find_iter(text).count() as f64;
        let citation_factor = (citations / (total as f64 / 100.0).max(1.0) / 5.0).min(1.0);

        (score * 0.6 + citation_factor * 0.4).clamp(0.0, 1.0)
    }

    /// Detect spans that a cut must never bisect: legal citations and
    /// substantial quoted runs, as merged `[start, end)` byte intervals.
    pub fn preserved_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans: Vec<(usize, usize)> = CITATION_PATTERN
            .find_iter(text)
            .chain(QUOTE_PATTERN.find_iter(text))
            .map(|m| (m.start(), m.end()))
            .collect();
        spans.sort_by_key(|s| s.0);

        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        merged
    }

    /// Split `text` into chunks. `strategy` defaults to adaptive selection;
    /// `document_type` is detected when not supplied.
    pub fn chunk(
        &self,
        text: &str,
        strategy: Option<ChunkStrategy>,
        document_type: Option<DocumentType>,
    ) -> Vec<DocumentChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let doc_type = document_type.unwrap_or_else(|| self.detect_document_type(text));
        let strategy = match strategy.unwrap_or(ChunkStrategy::Adaptive) {
            ChunkStrategy::Adaptive => self.select_strategy(text, doc_type),
            other => other,
        };

        let spans = self.preserved_spans(text);
        let cuts = self.plan_cuts(text, strategy, &spans);
        let chunks = self.materialize(text, cuts, strategy);

        report_progress(ProgressEvent::ChunkingStarted {
            total_chars: text.chars().count(),
            chunk_count: chunks.len(),
            strategy: strategy.label().to_string(),
        });

        chunks
    }

    fn select_strategy(&self, text: &str, doc_type: DocumentType) -> ChunkStrategy {
        match doc_type {
            DocumentType::Contract | DocumentType::Statute => ChunkStrategy::SectionAware,
            DocumentType::Opinion => ChunkStrategy::LegalAware,
            DocumentType::Brief => ChunkStrategy::ParagraphAware,
            DocumentType::Unknown => {
                let complexity = self.complexity(text);
                if complexity > 0.7 {
                    ChunkStrategy::LegalAware
                } else if complexity > 0.4 {
                    ChunkStrategy::ParagraphAware
                } else {
                    ChunkStrategy::SentenceAware
                }
            }
        }
    }

    /// Plan interior cut positions (byte offsets, always char boundaries).
    fn plan_cuts(
        &self,
        text: &str,
        strategy: ChunkStrategy,
        spans: &[(usize, usize)],
    ) -> Vec<PlannedCut> {
        let target = self.target_chunk_chars();

        match strategy {
            ChunkStrategy::SectionAware | ChunkStrategy::LegalAware => {
                let mut cuts = Vec::new();
                let mut section_starts: Vec<usize> =
                    SECTION_PATTERN.find_iter(text).map(|m| m.start()).collect();
                section_starts.retain(|&p| p > 0 && p < text.len());

                if section_starts.is_empty() {
                    return self.plan_size_cuts(text, 0, text.len(), target, strategy, spans);
                }

                let mut prev = 0usize;
                for &start in &section_starts {
                    // Only cut at a section start once enough text accumulated.
                    if start <= prev || start - prev < self.settings.chunk_min_chars {
                        continue;
                    }
                    // Oversize stretches between section starts get
                    // interior size-based cuts first.
                    if start - prev > target {
                        cuts.extend(self.plan_size_cuts(text, prev, start, target, strategy, spans));
                    }
                    // A header inside a preserved span (e.g. a quoted
                    // subsection list) is not a real boundary; the cut
                    // moves to the span end like any other snapped cut.
                    let (pos, kind) = match spans.iter().find(|&&(s, e)| start > s && start < e) {
                        Some(&(_, span_end)) => (span_end, BoundaryKind::PreservedSpanEnd),
                        None => (start, BoundaryKind::Section),
                    };
                    if pos <= prev || pos >= text.len() {
                        continue;
                    }
                    cuts.push(PlannedCut { pos, kind });
                    prev = pos;
                }
                if text.len() - prev > target {
                    cuts.extend(self.plan_size_cuts(text, prev, text.len(), target, strategy, spans));
                }
                cuts.sort_by_key(|c| c.pos);
                cuts.dedup_by_key(|c| c.pos);
                cuts
            }
            _ => self.plan_size_cuts(text, 0, text.len(), target, strategy, spans),
        }
    }

    /// Greedy size-based cutting of `text[from..to]` with boundary snapping.
    fn plan_size_cuts(
        &self,
        text: &str,
        from: usize,
        to: usize,
        target: usize,
        strategy: ChunkStrategy,
        spans: &[(usize, usize)],
    ) -> Vec<PlannedCut> {
        let mut cuts = Vec::new();
        let mut start = from;

        while to - start > target {
            let tentative = floor_char_boundary(text, start + target);
            let (mut pos, mut kind) = self.snap(text, start, tentative, strategy);

            // A cut strictly inside a preserved span is pushed to the span end.
            if let Some(&(_, span_end)) = spans.iter().find(|&&(s, e)| pos > s && pos < e) {
                pos = span_end.min(to);
                kind = BoundaryKind::PreservedSpanEnd;
            }

            if pos <= start || pos >= to {
                break;
            }
            cuts.push(PlannedCut { pos, kind });
            start = pos;
        }
        cuts
    }

    /// Snap a tentative cut backward to the best boundary in the window
    /// `[start + min_chunk, tentative]`. Priority: paragraph > sentence >
    /// word > raw.
    fn snap(&self, text: &str, start: usize, tentative: usize, strategy: ChunkStrategy) -> (usize, BoundaryKind) {
        let window_start = start + self.settings.chunk_min_chars.min(tentative - start);
        let window = &text[start..tentative];

        let allow_paragraph = !matches!(strategy, ChunkStrategy::SentenceAware | ChunkStrategy::FixedSize);
        let allow_sentence = !matches!(strategy, ChunkStrategy::FixedSize);

        if allow_paragraph {
            if let Some(m) = PARAGRAPH_BREAK.find_iter(window).last() {
                let pos = start + m.end();
                if pos > window_start && pos < tentative {
                    return (pos, BoundaryKind::Paragraph);
                }
            }
        }
        if allow_sentence {
            if let Some(m) = SENTENCE_END.find_iter(window).last() {
                let pos = start + m.end();
                if pos > window_start && pos < tentative {
                    return (pos, BoundaryKind::Sentence);
                }
            }
        }
        if let Some(rel) = window.rfind(char::is_whitespace) {
            let pos = start + rel + 1;
            if pos > start {
                return (pos, BoundaryKind::Word);
            }
        }
        (tentative, BoundaryKind::Raw)
    }

    /// Turn planned cuts into chunks: enforce the minimum size, apply the
    /// hard cap by merging the smallest neighbors, then add word-aligned
    /// overlap and convert byte offsets to character offsets.
    fn materialize(&self, text: &str, cuts: Vec<PlannedCut>, strategy: ChunkStrategy) -> Vec<DocumentChunk> {
        // Intervals without overlap, [start, end) with the trailing kind.
        let mut intervals: Vec<(usize, usize, BoundaryKind)> = Vec::with_capacity(cuts.len() + 1);
        let mut prev = 0usize;
        for cut in &cuts {
            intervals.push((prev, cut.pos, cut.kind));
            prev = cut.pos;
        }
        intervals.push((prev, text.len(), BoundaryKind::Raw));

        // No chunk below the minimum except possibly the last: merge small
        // chunks into their successor.
        let min = self.settings.chunk_min_chars;
        let mut merged: Vec<(usize, usize, BoundaryKind)> = Vec::with_capacity(intervals.len());
        for (start, end, kind) in intervals {
            if let Some(last) = merged.last_mut() {
                if last.1 - last.0 < min {
                    last.1 = end;
                    last.2 = kind;
                    continue;
                }
            }
            merged.push((start, end, kind));
        }

        // Hard cap: repeatedly merge the smallest adjacent pair.
        while merged.len() > self.settings.max_chunks_per_document {
            let mut best = 0;
            let mut best_size = usize::MAX;
            for i in 0..merged.len() - 1 {
                let size = (merged[i].1 - merged[i].0) + (merged[i + 1].1 - merged[i + 1].0);
                if size < best_size {
                    best_size = size;
                    best = i;
                }
            }
            let (_, end, kind) = merged.remove(best + 1);
            merged[best].1 = end;
            merged[best].2 = kind;
        }

        let overlap = self.settings.chunk_overlap_chars;
        let last_index = merged.len().saturating_sub(1);
        let mut chunks = Vec::with_capacity(merged.len());

        for (index, &(start, end, kind)) in merged.iter().enumerate() {
            let mut from = start;
            let mut to = end;
            if overlap > 0 && index > 0 {
                from = word_align_backward(text, start.saturating_sub(overlap));
            }
            if overlap > 0 && index < last_index {
                to = word_align_forward(text, (end + overlap).min(text.len()));
            }

            chunks.push(DocumentChunk {
                index,
                text: text[from..to].to_string(),
                start_pos: from,
                end_pos: to,
                chunk_type: strategy.label().to_string(),
                boundary_kind: kind,
                has_overlap: overlap > 0 && last_index > 0,
                overlap_before_chars: start - from,
                overlap_after_chars: to - end,
            });
        }

        // Byte offsets -> character offsets. Every recorded offset sits on
        // a char boundary, so each lookup is exact.
        let byte_to_char = build_char_index(text);
        for chunk in &mut chunks {
            let from_b = chunk.start_pos;
            let to_b = chunk.end_pos;
            let logical_start_b = from_b + chunk.overlap_before_chars;
            let logical_end_b = to_b - chunk.overlap_after_chars;
            let from_c = byte_to_char[&from_b];
            let to_c = byte_to_char[&to_b];
            chunk.overlap_before_chars = byte_to_char[&logical_start_b] - from_c;
            chunk.overlap_after_chars = to_c - byte_to_char[&logical_end_b];
            chunk.start_pos = from_c;
            chunk.end_pos = to_c;
        }

        chunks
    }

    /// Aggregate statistics for result metadata.
    pub fn statistics(&self, chunks: &[DocumentChunk]) -> ChunkStatistics {
        if chunks.is_empty() {
            return ChunkStatistics {
                total_chunks: 0,
                avg_chunk_size: 0.0,
                min_chunk_size: 0,
                max_chunk_size: 0,
                total_text_length: 0,
                chunk_types: HashMap::new(),
                overlap_enabled: self.settings.chunk_overlap_chars > 0,
                overlap_size: self.settings.chunk_overlap_chars,
            };
        }

        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        let total: usize = sizes.iter().sum();
        let mut chunk_types = HashMap::new();
        for chunk in chunks {
            *chunk_types.entry(chunk.chunk_type.clone()).or_insert(0) += 1;
        }

        ChunkStatistics {
            total_chunks: chunks.len(),
            avg_chunk_size: total as f64 / chunks.len() as f64,
            min_chunk_size: *sizes.iter().min().unwrap_or(&0),
            max_chunk_size: *sizes.iter().max().unwrap_or(&0),
            total_text_length: total,
            chunk_types,
            overlap_enabled: self.settings.chunk_overlap_chars > 0,
            overlap_size: self.settings.chunk_overlap_chars,
        }
    }
}

/// Largest char boundary <= `index`.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Walk backward to the start of the word containing `index`.
fn word_align_backward(text: &str, index: usize) -> usize {
    let mut i = floor_char_boundary(text, index);
    while i > 0 {
        let prev = text[..i].chars().next_back();
        match prev {
            Some(c) if !c.is_whitespace() => i -= c.len_utf8(),
            _ => break,
        }
    }
    i
}

/// Walk forward to the end of the word containing `index`.
fn word_align_forward(text: &str, index: usize) -> usize {
    let mut i = floor_char_boundary(text, index);
    while i < text.len() {
        match text[i..].chars().next() {
            Some(c) if !c.is_whitespace() => i += c.len_utf8(),
            _ => break,
        }
    }
    i
}

/// Map from byte offset to character offset, for every char boundary and
/// the one-past-end position.
fn build_char_index(text: &str) -> HashMap<usize, usize> {
    let mut map = HashMap::with_capacity(text.len() / 4 + 2);
    for (char_idx, (byte_idx, _)) in text.char_indices().enumerate() {
        map.insert(byte_idx, char_idx);
    }
    map.insert(text.len(), text.chars().count());
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize, min: usize, overlap: usize) -> LegalChunker {
        LegalChunker::new(
            ChunkingSettings {
                chunk_max_chars: max,
                chunk_min_chars: min,
                chunk_overlap_chars: overlap,
                max_chunks_per_document: 100,
                ..ChunkingSettings::default()
            },
            4.0,
        )
    }

    fn opinion_text(target: usize) -> String {
        let para = "The district court held that the statute was unconstitutional as \
                    applied. We review questions of law de novo. The appellant argues \
                    that the precedent controls here.\n\n";
        let mut text = String::new();
        while text.len() < target {
            text.push_str(para);
        }
        text
    }

    #[test]
    fn sizing_formula_clamps_to_bounds() {
        let c = LegalChunker::new(
            ChunkingSettings {
                context_window_tokens: 131_072,
                safety_fraction: 0.8,
                fixed_overhead_tokens: 2_000,
                chunk_max_chars: 10_000,
                chunk_min_chars: 1_000,
                ..ChunkingSettings::default()
            },
            4.0,
        );
        // (131072 * 0.8 - 2000) * 4 chars is far above the max bound.
        assert_eq!(c.target_chunk_chars(), 10_000);

        let tiny = LegalChunker::new(
            ChunkingSettings {
                context_window_tokens: 1_000,
                safety_fraction: 0.5,
                fixed_overhead_tokens: 400,
                chunk_max_chars: 10_000,
                chunk_min_chars: 1_000,
                ..ChunkingSettings::default()
            },
            4.0,
        );
        // (500 - 400) * 4 = 400 chars, below the min bound.
        assert_eq!(tiny.target_chunk_chars(), 1_000);
    }

    #[test]
    fn chunks_cover_document_without_gaps() {
        let text = opinion_text(30_000);
        let chunks = chunker(5_000, 500, 0).chunk(&text, Some(ChunkStrategy::ParagraphAware), None);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_pos, 0);
        assert_eq!(chunks.last().unwrap().end_pos, text.chars().count());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_pos, pair[1].start_pos, "gap between chunks");
        }
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, text.chars().count());
    }

    #[test]
    fn overlap_extends_chunks_at_word_boundaries() {
        let text = opinion_text(30_000);
        let chunks = chunker(5_000, 500, 200).chunk(&text, Some(ChunkStrategy::ParagraphAware), None);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // With overlap, chunk k extends past chunk k+1's logical start.
            assert!(pair[0].end_pos > pair[1].start_pos);
        }
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert!(total >= text.chars().count());

        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.has_overlap);
            if i > 0 {
                // Overlap is word-aligned, so the target is approximate.
                assert!(chunk.overlap_before_chars > 0);
                assert!(chunk.overlap_before_chars <= 200 + 40);
            }
        }
    }

    #[test]
    fn preserved_spans_are_never_bisected() {
        let citation = "Smith v. Jones, 123 U.S. 456";
        let mut text = String::new();
        while text.len() < 20_000 {
            text.push_str("Some ordinary filler sentence about the proceeding below. ");
            text.push_str(citation);
            text.push_str(" was discussed at length. ");
        }

        let c = chunker(2_000, 200, 0);
        let spans = c.preserved_spans(&text);
        assert!(!spans.is_empty());

        let chunks = c.chunk(&text, Some(ChunkStrategy::LegalAware), None);
        // Byte offsets equal char offsets for this ASCII input.
        for pair in chunks.windows(2) {
            let cut = pair[0].end_pos;
            for &(start, end) in &spans {
                assert!(
                    !(cut > start && cut < end),
                    "cut at {cut} bisects preserved span {start}..{end}"
                );
            }
        }
    }

    #[test]
    fn section_headers_inside_quotes_do_not_bisect_spans() {
        // The quoted passage spans multiple lines, so its interior
        // "(a)"/"(b)" lines also match the section pattern. Those matches
        // must not become cut points inside the preserved quote.
        let quoted = "\"The lease provides as follows:\n\
                      (a) Base rent of $1000 per month\n\
                      (b) Taxes and assessments paid by the tenant\"";
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!("SECTION {}\n", i + 1));
            text.push_str(
                "The tenant covenants to maintain the premises in good repair \
                 throughout the term of this lease, to comply with all \
                 applicable statutes, ordinances and regulations affecting the \
                 use and occupancy of the premises, and to surrender the \
                 premises at the expiration of the term in as good condition \
                 as received, reasonable wear and tear excepted. ",
            );
            text.push_str(quoted);
            text.push_str("\nFurther provisions follow below.\n\n");
        }

        let c = chunker(2_000, 200, 0);
        let spans = c.preserved_spans(&text);
        assert!(!spans.is_empty());

        let chunks = c.chunk(&text, Some(ChunkStrategy::SectionAware), None);
        assert!(chunks.len() > 1);
        // Byte offsets equal char offsets for this ASCII input.
        for pair in chunks.windows(2) {
            let cut = pair[0].end_pos;
            for &(start, end) in &spans {
                assert!(
                    !(cut > start && cut < end),
                    "section cut at {cut} bisects preserved span {start}..{end}"
                );
            }
        }
    }

    #[test]
    fn hard_cap_merges_smallest_neighbors() {
        let text = opinion_text(50_000);
        let c = LegalChunker::new(
            ChunkingSettings {
                chunk_max_chars: 2_000,
                chunk_min_chars: 200,
                chunk_overlap_chars: 0,
                max_chunks_per_document: 5,
                ..ChunkingSettings::default()
            },
            4.0,
        );
        let chunks = c.chunk(&text, Some(ChunkStrategy::FixedSize), None);
        assert!(chunks.len() <= 5);
        // Coverage still holds after merging.
        assert_eq!(chunks.last().unwrap().end_pos, text.chars().count());
    }

    #[test]
    fn no_chunk_below_minimum_except_last() {
        let text = opinion_text(23_000);
        let chunks = chunker(5_000, 1_000, 0).chunk(&text, Some(ChunkStrategy::SentenceAware), None);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.len() >= 1_000, "chunk {} below minimum", chunk.index);
        }
    }

    #[test]
    fn detects_opinion_documents() {
        let text = "OPINION of the court. The appellant urges us to reverse the \
                    district court and remand. We affirm. The supreme court held...";
        let c = chunker(5_000, 500, 0);
        assert_eq!(c.detect_document_type(text), DocumentType::Opinion);
    }

    #[test]
    fn detects_contract_documents() {
        let text = "THIS AGREEMENT, WHEREAS the parties desire to set forth their \
                    obligations, representations and warranties, with indemnification \
                    from the effective date until termination...";
        let c = chunker(5_000, 500, 0);
        assert_eq!(c.detect_document_type(text), DocumentType::Contract);
    }

    #[test]
    fn unknown_type_for_plain_prose() {
        let c = chunker(5_000, 500, 0);
        assert_eq!(
            c.detect_document_type("The weather was pleasant and the town was quiet."),
            DocumentType::Unknown
        );
    }

    #[test]
    fn complexity_ranks_legal_text_above_prose() {
        let c = chunker(5_000, 500, 0);
        let legal = "Notwithstanding the foregoing, the plaintiff pursuant to the \
                     statute alleges negligence and breach, and the defendant moves \
                     for an injunction pursuant to 42 U.S.C. § 1983.";
        let prose = "The cat sat on the mat. It was warm. The sun shone.";
        assert!(c.complexity(legal) > c.complexity(prose));
    }

    #[test]
    fn statistics_summarize_chunks() {
        let text = opinion_text(30_000);
        let c = chunker(5_000, 500, 0);
        let chunks = c.chunk(&text, Some(ChunkStrategy::ParagraphAware), None);
        let stats = c.statistics(&chunks);
        assert_eq!(stats.total_chunks, chunks.len());
        assert_eq!(stats.total_text_length, text.chars().count());
        assert!(!stats.overlap_enabled);
        assert_eq!(stats.chunk_types["paragraph_aware"], chunks.len());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunker(5_000, 500, 0).chunk("", None, None).is_empty());
    }
}
