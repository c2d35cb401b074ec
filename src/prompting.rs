//! Prompt template assembly.
//!
//! Templates ship embedded in the binary and can be overridden from a
//! directory. Each carries a `{{pattern_examples}}` placeholder filled from
//! the pattern catalog (HTTP, 1-hour TTL cache, stale-on-error), and the
//! wave-4 template additionally carries `{{previous_results}}`, filled per
//! call with the deduplicated entity set from waves 1-3. Waves 1-3 and the
//! single-pass template are assembled once and cached; wave 4 never is.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::Mutex;

use crate::config::PatternSettings;
use crate::data::Entity;
use crate::exceptions::{ExtractError, ExtractResult};
use crate::schema::wave_entity_types;

const SINGLE_PASS_TEMPLATE: &str = include_str!("prompts/single_pass.md");
const WAVE1_TEMPLATE: &str = include_str!("prompts/wave1.md");
const WAVE2_TEMPLATE: &str = include_str!("prompts/wave2.md");
const WAVE3_TEMPLATE: &str = include_str!("prompts/wave3.md");
const WAVE4_TEMPLATE: &str = include_str!("prompts/wave4.md");

/// Rough token estimate for prompt accounting.
const CHARS_PER_TOKEN: usize = 4;

/// Cap on entities echoed into the wave-4 prompt.
const MAX_PREVIOUS_RESULTS: usize = 50;

/// An assembled prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub content: String,
    pub token_count: usize,
}

impl PromptTemplate {
    fn new(name: impl Into<String>, content: String) -> Self {
        let token_count = content.len() / CHARS_PER_TOKEN;
        Self { name: name.into(), content, token_count }
    }
}

struct PatternCacheEntry {
    data: serde_json::Value,
    fetched_at: Instant,
}

/// Loads templates and injects pattern examples and previous-wave results.
pub struct PromptAssembler {
    prompts_dir: Option<PathBuf>,
    settings: PatternSettings,
    http: reqwest::Client,
    template_cache: Mutex<HashMap<String, Arc<PromptTemplate>>>,
    pattern_cache: Mutex<Option<PatternCacheEntry>>,
}

impl PromptAssembler {
    pub fn new(prompts_dir: Option<String>, settings: PatternSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.fetch_timeout_seconds.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            prompts_dir: prompts_dir.map(PathBuf::from),
            settings,
            http,
            template_cache: Mutex::new(HashMap::new()),
            pattern_cache: Mutex::new(None),
        }
    }

    /// Consolidated prompt for very small documents.
    pub async fn single_pass_prompt(&self) -> ExtractResult<Arc<PromptTemplate>> {
        self.cached_prompt("single_pass", 0).await
    }

    /// Prompt for waves 1-3. Cached after first assembly.
    pub async fn entity_wave_prompt(&self, wave: u8) -> ExtractResult<Arc<PromptTemplate>> {
        if !(1..=3).contains(&wave) {
            return Err(ExtractError::PromptTemplate(format!(
                "entity wave must be 1-3, got {wave}"
            )));
        }
        self.cached_prompt(&format!("wave{wave}"), wave).await
    }

    /// Wave-4 prompt. Depends on the accumulated entity set, so it is
    /// assembled fresh on every call.
    pub async fn relationship_wave_prompt(
        &self,
        previous_results: &[Entity],
    ) -> ExtractResult<Arc<PromptTemplate>> {
        if previous_results.is_empty() {
            log::warn!("wave 4 prompt requested without previous entities");
        }
        let raw = self.load_template("wave4")?;
        let examples = relationship_pattern_examples();
        let previous = format_previous_results(previous_results);
        let content = raw
            .replace("{{pattern_examples}}", &examples)
            .replace("{{previous_results}}", &previous);
        Ok(Arc::new(PromptTemplate::new("wave4", content)))
    }

    async fn cached_prompt(&self, name: &str, wave: u8) -> ExtractResult<Arc<PromptTemplate>> {
        {
            let cache = self.template_cache.lock().await;
            if let Some(tpl) = cache.get(name) {
                return Ok(tpl.clone());
            }
        }

        // Assemble outside the lock; last writer wins on a race, and the
        // installed value is identical either way.
        let raw = self.load_template(name)?;
        let patterns = self.fetch_patterns().await;
        let examples = build_pattern_examples(wave, &patterns);
        let content = raw.replace("{{pattern_examples}}", &examples);
        let tpl = Arc::new(PromptTemplate::new(name, content));

        let mut cache = self.template_cache.lock().await;
        let entry = cache.entry(name.to_string()).or_insert_with(|| tpl.clone());
        Ok(entry.clone())
    }

    /// Read a template from the override directory, falling back to the
    /// embedded copy.
    fn load_template(&self, name: &str) -> ExtractResult<String> {
        if let Some(dir) = &self.prompts_dir {
            let path = dir.join(format!("{name}.md"));
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    ExtractError::PromptTemplate(format!(
                        "failed to read {}: {e}",
                        path.display()
                    ))
                });
            }
        }
        match name {
            "single_pass" => Ok(SINGLE_PASS_TEMPLATE.to_string()),
            "wave1" => Ok(WAVE1_TEMPLATE.to_string()),
            "wave2" => Ok(WAVE2_TEMPLATE.to_string()),
            "wave3" => Ok(WAVE3_TEMPLATE.to_string()),
            "wave4" => Ok(WAVE4_TEMPLATE.to_string()),
            other => Err(ExtractError::PromptTemplate(format!("unknown template {other}"))),
        }
    }

    /// Fetch the pattern catalog with TTL caching. Serves stale data when
    /// the endpoint errors and an empty catalog when nothing was ever
    /// fetched.
    async fn fetch_patterns(&self) -> serde_json::Value {
        let empty = json!({ "total_patterns": 0, "patterns_by_category": {} });
        if self.settings.catalog_url.is_empty() {
            return empty;
        }

        let ttl = Duration::from_secs(self.settings.patterns_cache_ttl_seconds);
        {
            let cache = self.pattern_cache.lock().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < ttl {
                    return entry.data.clone();
                }
            }
        }

        let url = format!("{}?format=detailed", self.settings.catalog_url);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<serde_json::Value>().await {
                    Ok(data) => {
                        log::info!(
                            "cached {} patterns from catalog",
                            data.get("total_patterns").and_then(|v| v.as_u64()).unwrap_or(0)
                        );
                        let mut cache = self.pattern_cache.lock().await;
                        *cache = Some(PatternCacheEntry {
                            data: data.clone(),
                            fetched_at: Instant::now(),
                        });
                        data
                    }
                    Err(e) => self.stale_or_empty(empty, &e.to_string()).await,
                }
            }
            Ok(response) => {
                self.stale_or_empty(empty, &format!("catalog returned {}", response.status())).await
            }
            Err(e) => self.stale_or_empty(empty, &e.to_string()).await,
        }
    }

    async fn stale_or_empty(&self, empty: serde_json::Value, error: &str) -> serde_json::Value {
        log::warn!("pattern catalog fetch failed: {error}");
        let cache = self.pattern_cache.lock().await;
        match cache.as_ref() {
            Some(entry) => {
                log::info!("serving stale pattern cache");
                entry.data.clone()
            }
            None => empty,
        }
    }
}

/// Build the per-wave "do extract / do not extract" section from catalog
/// data. Wave 0 stands for the single-pass prompt and draws on every wave's
/// type slice.
fn build_pattern_examples(wave: u8, patterns: &serde_json::Value) -> String {
    let entity_types: Vec<&str> = match wave {
        1..=3 => wave_entity_types(wave).to_vec(),
        _ => (1..=3).flat_map(|w| wave_entity_types(w).iter().copied()).collect(),
    };

    let by_category = patterns
        .get("patterns_by_category")
        .and_then(|v| v.as_object());

    let mut out = Vec::new();
    let mut found_any = false;

    if let Some(categories) = by_category {
        out.push("### Pattern Examples\n".to_string());
        for entity_type in &entity_types {
            let mut examples: Vec<String> = Vec::new();
            for category_patterns in categories.values() {
                let Some(list) = category_patterns.as_array() else { continue };
                for pattern in list {
                    if pattern.get("entity_type").and_then(|v| v.as_str()) == Some(*entity_type) {
                        if let Some(items) = pattern.get("examples").and_then(|v| v.as_array()) {
                            examples.extend(
                                items.iter().filter_map(|v| v.as_str()).take(3).map(String::from),
                            );
                        }
                    }
                    if examples.len() >= 5 {
                        break;
                    }
                }
                if examples.len() >= 5 {
                    break;
                }
            }

            if !examples.is_empty() {
                found_any = true;
                out.push(format!("\n#### {entity_type}"));
                out.push("**DO EXTRACT:**".to_string());
                for example in examples.iter().take(5) {
                    out.push(format!("- {example}"));
                }
                let negative = negative_examples(entity_type);
                if !negative.is_empty() {
                    out.push(negative.to_string());
                }
            }
        }
    }

    if !found_any {
        // Negative examples are domain knowledge, not catalog data; they
        // apply even when the catalog is unreachable.
        out.clear();
        out.push("### Extraction Guidance\n".to_string());
        for entity_type in &entity_types {
            let negative = negative_examples(entity_type);
            if !negative.is_empty() {
                out.push(format!("\n#### {entity_type}"));
                out.push(negative.to_string());
            }
        }
    }

    out.join("\n")
}

/// Hard-coded anti-patterns for types the model historically over-extracts.
fn negative_examples(entity_type: &str) -> &'static str {
    match entity_type {
        "CASE_CITATION" => {
            "**DO NOT EXTRACT:**\n\
             - Filenames: \"Rahimi.md\", \"document.pdf\", \"case_brief.docx\"\n\
             - Generic names without citation format: \"Bruen\" standing alone\n\
             - URLs or file paths: \"/docs/Rahimi.pdf\"\n\
             **VALIDATION**: must have volume + reporter + page OR appear in a \
             legal citation context"
        }
        "STATUTE_CITATION" => {
            "**DO NOT EXTRACT:**\n\
             - Bare section symbols: \"§922(g)(8)\" without \"U.S.C.\" or a state code\n\
             **VALIDATION**: require the full format, e.g. \"18 U.S.C. § 922(g)(8)\""
        }
        "PROCEDURAL_RULE" => {
            "**DO NOT EXTRACT:**\n\
             - USC statute citations: \"18 U.S.C. § 922(g)(8)\" is a STATUTE, not a rule\n\
             **VALIDATION**: only \"Rule X\", \"Fed. R. Civ. P. X\", \"FRCP X\" formats"
        }
        "CASE_NUMBER" => {
            "**DO NOT EXTRACT:**\n\
             - Case names as case numbers: \"Bruen\" is a CASE_CITATION, not a number\n\
             - Bare years: \"2024\" alone is not a case number\n\
             **VALIDATION**: must match \"No. 22-6640\", \"Case No. 1:20-cv-12345\""
        }
        "PARTY" => {
            "**DO NOT EXTRACT:**\n\
             - Generic terms: \"intimate partner\", \"the victim\"\n\
             - Legal roles without names: \"plaintiff\", \"defendant\", \"appellant\"\n\
             **VALIDATION**: must be a specific named individual or entity"
        }
        "DATE" => {
            "**CONTEXT REQUIRED:**\n\
             - \"filed on June 21, 2024\" is a FILING_DATE\n\
             - \"heard on June 21, 2024\" is a HEARING_DATE\n\
             **VALIDATION**: prefer specific temporal types over generic DATE"
        }
        "ATTORNEY" => {
            "**DO NOT EXTRACT:**\n\
             - Historical legal scholars: \"Blackstone\", \"Coke\", \"Prosser\"\n\
             - Titles without names: \"Attorney General\", \"Counsel for the United States\"\n\
             **VALIDATION**: require a name plus an attorney indicator (Esq., Counsel)"
        }
        _ => "",
    }
}

/// Worked relationship examples for the wave-4 prompt, one per family.
fn relationship_pattern_examples() -> String {
    "### Relationship Pattern Examples\n\n\
     Extract relationship types across eight families. Focus on explicit \
     textual evidence.\n\n\
     **CITES_CASE**: \"In Roe v. Wade, the Court cited Griswold v. Connecticut\"\n\
     **CITES_STATUTE**: \"The complaint alleges violations of 42 U.S.C. § 1983\"\n\
     **PARTY_VS_PARTY**: \"John Smith brings this action against Acme Corporation\"\n\
     **REPRESENTS**: \"Sarah Johnson represents the plaintiff, Mary Williams\"\n\
     **APPEALS_FROM**: \"This case comes to us on appeal from the SDNY\"\n\
     **REFERENCES_DOCUMENT**: \"The Complaint references Exhibit A\"\n\
     **CONTRACTS_WITH**: \"Acme entered into an agreement with TechCo\"\n\
     **DECIDED_BY**: \"Decided by a three-judge panel consisting of...\"\n\
     **AUTHORED_BY**: \"Chief Justice Roberts delivered the opinion\"\n\
     **OCCURRED_BEFORE**: \"Agreement signed on Jan 15 before the act on Mar 3\"\n\n\
     All relationships MUST reference entity ids from the list above."
        .to_string()
}

/// Compact JSON view of the accumulated entity set for the wave-4 prompt.
fn format_previous_results(entities: &[Entity]) -> String {
    let shown: Vec<serde_json::Value> = entities
        .iter()
        .take(MAX_PREVIOUS_RESULTS)
        .map(|e| {
            json!({
                "id": e.id,
                "entity_type": e.entity_type,
                "text": e.text,
                "start_pos": e.start_pos,
                "end_pos": e.end_pos,
                "wave_number": e.wave_number,
                "subtype": e.subtype,
                "category": e.category,
            })
        })
        .collect();

    let mut histogram: HashMap<&str, usize> = HashMap::new();
    for entity in entities {
        *histogram.entry(entity.entity_type.as_str()).or_insert(0) += 1;
    }

    serde_json::to_string_pretty(&json!({
        "total_entities": entities.len(),
        "entities": shown,
        "entity_types_available": histogram,
    }))
    .unwrap_or_else(|_| "{\"total_entities\": 0, \"entities\": []}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn entity(id: &str, entity_type: &str, text: &str) -> Entity {
        Entity {
            id: id.to_string(),
            text: text.to_string(),
            entity_type: entity_type.to_string(),
            start_pos: Some(0),
            end_pos: Some(text.len()),
            confidence: 0.9,
            extraction_method: "llm_guided".to_string(),
            subtype: None,
            category: None,
            context_before: None,
            context_after: None,
            wave_number: Some(1),
            prompt_template: None,
            chunk_index: None,
            metadata: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn entity_wave_prompts_are_cached_and_filled() {
        let assembler = PromptAssembler::new(None, PatternSettings::default());
        let first = assembler.entity_wave_prompt(1).await.unwrap();
        let second = assembler.entity_wave_prompt(1).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.content.contains("{{pattern_examples}}"));
        assert!(first.content.contains("CASE_CITATION"));
        assert!(first.token_count > 0);
    }

    #[tokio::test]
    async fn wave_out_of_range_is_rejected() {
        let assembler = PromptAssembler::new(None, PatternSettings::default());
        assert!(assembler.entity_wave_prompt(0).await.is_err());
        assert!(assembler.entity_wave_prompt(4).await.is_err());
    }

    #[tokio::test]
    async fn wave4_prompt_embeds_previous_results_and_is_not_cached() {
        let assembler = PromptAssembler::new(None, PatternSettings::default());
        let entities = vec![
            entity("doc:e0", "CASE_CITATION", "Smith v. Jones"),
            entity("doc:e1", "JUDGE", "Judge Alsup"),
        ];
        let first = assembler.relationship_wave_prompt(&entities).await.unwrap();
        assert!(first.content.contains("doc:e0"));
        assert!(first.content.contains("\"total_entities\": 2"));
        assert!(first.content.contains("entity_types_available"));
        assert!(!first.content.contains("{{previous_results}}"));

        let second = assembler.relationship_wave_prompt(&entities[..1]).await.unwrap();
        assert!(second.content.contains("\"total_entities\": 1"));
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn empty_catalog_still_yields_negative_examples() {
        let assembler = PromptAssembler::new(None, PatternSettings::default());
        let prompt = assembler.entity_wave_prompt(1).await.unwrap();
        // Anti-patterns are domain knowledge, injected without catalog data.
        assert!(prompt.content.contains("DO NOT EXTRACT"));
        assert!(prompt.content.contains("Filenames"));
    }

    #[test]
    fn pattern_examples_pull_from_catalog_data() {
        let patterns = json!({
            "total_patterns": 1,
            "patterns_by_category": {
                "citations": [
                    {
                        "entity_type": "CASE_CITATION",
                        "examples": ["Brown v. Board, 347 U.S. 483 (1954)"]
                    }
                ]
            }
        });
        let section = build_pattern_examples(1, &patterns);
        assert!(section.contains("DO EXTRACT"));
        assert!(section.contains("Brown v. Board"));
        assert!(section.contains("DO NOT EXTRACT"));
    }

    #[test]
    fn previous_results_are_capped() {
        let entities: Vec<Entity> =
            (0..80).map(|i| entity(&format!("doc:e{i}"), "PARTY", "Someone")).collect();
        let formatted = format_previous_results(&entities);
        let value: serde_json::Value = serde_json::from_str(&formatted).unwrap();
        assert_eq!(value["total_entities"], 80);
        assert_eq!(value["entities"].as_array().unwrap().len(), MAX_PREVIOUS_RESULTS);
        assert_eq!(value["entity_types_available"]["PARTY"], 80);
    }

    #[tokio::test]
    async fn template_override_directory_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wave2.md"), "custom {{pattern_examples}}").unwrap();
        let assembler = PromptAssembler::new(
            Some(dir.path().to_string_lossy().into_owned()),
            PatternSettings::default(),
        );
        let prompt = assembler.entity_wave_prompt(2).await.unwrap();
        assert!(prompt.content.starts_with("custom"));
    }
}
