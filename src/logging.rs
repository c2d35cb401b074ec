//! Logging and progress reporting for the extraction pipeline.
//!
//! Library users install a [`ProgressHandler`] once; every pipeline stage
//! reports through it. The default handler routes events into the standard
//! `log` crate; CLI applications can install the console handler instead.

use std::sync::Arc;

/// Progress event types for the stages of an extraction.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Router selected a strategy for a document.
    RoutingDecided {
        document_chars: usize,
        strategy: String,
        rationale: String,
    },
    /// Extraction started for a document.
    ExtractionStarted {
        document_id: String,
        strategy: String,
        chars: usize,
    },
    /// A wave (LLM call) started.
    WaveStarted {
        wave: u8,
        prompt_template: String,
        prompt_chars: usize,
    },
    /// A wave completed.
    WaveCompleted {
        wave: u8,
        entities_found: usize,
        relationships_found: usize,
        tokens_used: usize,
    },
    /// A large document was split into chunks.
    ChunkingStarted {
        total_chars: usize,
        chunk_count: usize,
        strategy: String,
    },
    /// One chunk finished all of its waves.
    ChunkCompleted {
        chunk_index: usize,
        total_chunks: usize,
        entities_found: usize,
    },
    /// One chunk failed after all retries.
    ChunkFailed {
        chunk_index: usize,
        error: String,
    },
    /// Response validation completed for a wave or chunk.
    ValidationCompleted {
        accepted: usize,
        rejected: usize,
    },
    /// Dedup pass completed.
    DedupCompleted {
        before: usize,
        after: usize,
    },
    /// A backend call is being retried.
    RetryAttempt {
        operation: String,
        attempt: u32,
        max_attempts: u32,
        delay_seconds: f64,
    },
    /// The circuit breaker changed state.
    CircuitStateChanged {
        from: String,
        to: String,
    },
    /// GPU memory crossed the configured threshold.
    GpuAlert {
        gpu_id: u32,
        memory_utilization: f64,
    },
    /// Extraction finished.
    ExtractionCompleted {
        total_entities: usize,
        total_relationships: usize,
        waves_executed: u8,
        processing_time_ms: u64,
    },
    /// Error occurred.
    Error {
        operation: String,
        error: String,
    },
    /// Debug information.
    Debug {
        operation: String,
        details: String,
    },
}

/// Trait for handling progress events.
pub trait ProgressHandler: Send + Sync {
    /// Handle a progress event
    fn handle_progress(&self, event: ProgressEvent);
}

/// Console progress handler that outputs to stdout with stage tags.
pub struct ConsoleProgressHandler {
    /// Whether to show progress messages
    pub show_progress: bool,
    /// Whether to show debug information
    pub show_debug: bool,
}

impl ConsoleProgressHandler {
    /// Create a new console handler with default settings
    pub fn new() -> Self {
        Self { show_progress: true, show_debug: false }
    }

    /// Create a quiet console handler (only errors)
    pub fn quiet() -> Self {
        Self { show_progress: false, show_debug: false }
    }

    /// Create a verbose console handler (everything including debug)
    pub fn verbose() -> Self {
        Self { show_progress: true, show_debug: true }
    }

    fn format_message(&self, tag: &str, message: &str) -> String {
        format!("[{}] {}", tag, message)
    }
}

impl Default for ConsoleProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler for ConsoleProgressHandler {
    fn handle_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RoutingDecided { document_chars, strategy, rationale } => {
                if self.show_progress {
                    println!("{}", self.format_message("routing",
                        &format!("{} ({} chars): {}", strategy, document_chars, rationale)));
                }
            }
            ProgressEvent::ExtractionStarted { document_id, strategy, chars } => {
                if self.show_progress {
                    println!("{}", self.format_message("extract",
                        &format!("{} -- {} strategy, {} chars", document_id, strategy, chars)));
                }
            }
            ProgressEvent::WaveStarted { wave, prompt_template, prompt_chars } => {
                if self.show_debug {
                    println!("{}", self.format_message("wave",
                        &format!("wave {} ({}) -- {} chars prompt", wave, prompt_template, prompt_chars)));
                }
            }
            ProgressEvent::WaveCompleted { wave, entities_found, relationships_found, tokens_used } => {
                if self.show_progress {
                    println!("{}", self.format_message("wave",
                        &format!("wave {} done -- {} entities, {} relationships, {} tokens",
                            wave, entities_found, relationships_found, tokens_used)));
                }
            }
            ProgressEvent::ChunkingStarted { total_chars, chunk_count, strategy } => {
                if self.show_progress {
                    println!("{}", self.format_message("chunking",
                        &format!("{} chunks ({} strategy, {} chars total)", chunk_count, strategy, total_chars)));
                }
            }
            ProgressEvent::ChunkCompleted { chunk_index, total_chunks, entities_found } => {
                if self.show_progress {
                    println!("{}", self.format_message("progress",
                        &format!("chunk {}/{} -- {} entities", chunk_index + 1, total_chunks, entities_found)));
                }
            }
            ProgressEvent::ChunkFailed { chunk_index, error } => {
                // Chunk failures always surface
                eprintln!("{}", self.format_message("chunk",
                    &format!("chunk {} failed: {}", chunk_index, error)));
            }
            ProgressEvent::ValidationCompleted { accepted, rejected } => {
                if self.show_debug {
                    println!("{}", self.format_message("validation",
                        &format!("{} accepted, {} rejected", accepted, rejected)));
                }
            }
            ProgressEvent::DedupCompleted { before, after } => {
                if self.show_debug {
                    println!("{}", self.format_message("dedup",
                        &format!("{} -> {} ({} duplicates removed)", before, after, before - after)));
                }
            }
            ProgressEvent::RetryAttempt { operation, attempt, max_attempts, delay_seconds } => {
                if self.show_progress {
                    println!("{}", self.format_message("retry",
                        &format!("{} failed (attempt {}/{}), retrying in {:.1}s",
                            operation, attempt, max_attempts, delay_seconds)));
                }
            }
            ProgressEvent::CircuitStateChanged { from, to } => {
                if self.show_progress {
                    println!("{}", self.format_message("breaker", &format!("{} -> {}", from, to)));
                }
            }
            ProgressEvent::GpuAlert { gpu_id, memory_utilization } => {
                // GPU pressure always surfaces
                eprintln!("{}", self.format_message("gpu",
                    &format!("GPU {} memory at {:.1}%", gpu_id, memory_utilization * 100.0)));
            }
            ProgressEvent::ExtractionCompleted {
                total_entities,
                total_relationships,
                waves_executed,
                processing_time_ms,
            } => {
                if self.show_progress {
                    println!("{}", self.format_message("done",
                        &format!("{} entities, {} relationships ({} waves, {}ms)",
                            total_entities, total_relationships, waves_executed, processing_time_ms)));
                }
            }
            ProgressEvent::Error { operation, error } => {
                // Always show errors
                eprintln!("{}", self.format_message("error", &format!("{}: {}", operation, error)));
            }
            ProgressEvent::Debug { operation, details } => {
                if self.show_debug {
                    println!("{}", self.format_message("debug", &format!("{}: {}", operation, details)));
                }
            }
        }
    }
}

/// Silent progress handler that does nothing
pub struct SilentProgressHandler;

impl ProgressHandler for SilentProgressHandler {
    fn handle_progress(&self, _event: ProgressEvent) {
        // Do nothing
    }
}

/// Handler that routes events into the standard log crate
pub struct LogProgressHandler;

impl ProgressHandler for LogProgressHandler {
    fn handle_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RoutingDecided { document_chars, strategy, rationale } => {
                log::info!("Routing: {} for {} chars ({})", strategy, document_chars, rationale);
            }
            ProgressEvent::ExtractionStarted { document_id, strategy, chars } => {
                log::info!("Starting {} extraction for {} ({} chars)", strategy, document_id, chars);
            }
            ProgressEvent::WaveStarted { wave, prompt_template, prompt_chars } => {
                log::debug!("Wave {} started ({}, {} chars prompt)", wave, prompt_template, prompt_chars);
            }
            ProgressEvent::WaveCompleted { wave, entities_found, relationships_found, tokens_used } => {
                log::info!(
                    "Wave {} complete: {} entities, {} relationships, {} tokens",
                    wave, entities_found, relationships_found, tokens_used
                );
            }
            ProgressEvent::ChunkingStarted { total_chars, chunk_count, strategy } => {
                log::info!("Chunking document: {} {} chunks ({} chars)", chunk_count, strategy, total_chars);
            }
            ProgressEvent::ChunkCompleted { chunk_index, total_chunks, entities_found } => {
                log::debug!("Chunk {}/{} complete: {} entities", chunk_index + 1, total_chunks, entities_found);
            }
            ProgressEvent::ChunkFailed { chunk_index, error } => {
                log::warn!("Chunk {} failed: {}", chunk_index, error);
            }
            ProgressEvent::ValidationCompleted { accepted, rejected } => {
                log::debug!("Validation: {} accepted, {} rejected", accepted, rejected);
            }
            ProgressEvent::DedupCompleted { before, after } => {
                log::debug!("Dedup: {} -> {}", before, after);
            }
            ProgressEvent::RetryAttempt { operation, attempt, max_attempts, delay_seconds } => {
                log::warn!("Retry {}/{} for {}, waiting {:.1}s", attempt, max_attempts, operation, delay_seconds);
            }
            ProgressEvent::CircuitStateChanged { from, to } => {
                log::warn!("Circuit breaker: {} -> {}", from, to);
            }
            ProgressEvent::GpuAlert { gpu_id, memory_utilization } => {
                log::warn!("GPU {} memory at {:.1}%", gpu_id, memory_utilization * 100.0);
            }
            ProgressEvent::ExtractionCompleted {
                total_entities,
                total_relationships,
                waves_executed,
                processing_time_ms,
            } => {
                log::info!(
                    "Extraction completed: {} entities, {} relationships in {} waves ({}ms)",
                    total_entities, total_relationships, waves_executed, processing_time_ms
                );
            }
            ProgressEvent::Error { operation, error } => {
                log::error!("{}: {}", operation, error);
            }
            ProgressEvent::Debug { operation, details } => {
                log::debug!("{}: {}", operation, details);
            }
        }
    }
}

/// Global progress handler
static PROGRESS_HANDLER: std::sync::OnceLock<Arc<dyn ProgressHandler>> = std::sync::OnceLock::new();

/// Initialize the global progress handler
pub fn init_progress_handler(handler: Arc<dyn ProgressHandler>) {
    let _ = PROGRESS_HANDLER.set(handler);
}

/// Get the current progress handler, or create a default one
fn get_progress_handler() -> Arc<dyn ProgressHandler> {
    PROGRESS_HANDLER
        .get_or_init(|| Arc::new(LogProgressHandler))
        .clone()
}

/// Report a progress event
pub fn report_progress(event: ProgressEvent) {
    let handler = get_progress_handler();
    handler.handle_progress(event);
}

/// Convenience macro for debug-level progress events
#[macro_export]
macro_rules! progress_debug {
    ($operation:expr, $($arg:tt)*) => {
        $crate::logging::report_progress($crate::logging::ProgressEvent::Debug {
            operation: $operation.to_string(),
            details: format!($($arg)*),
        });
    };
}

/// Convenience macro for error progress events
#[macro_export]
macro_rules! progress_error {
    ($operation:expr, $($arg:tt)*) => {
        $crate::logging::report_progress($crate::logging::ProgressEvent::Error {
            operation: $operation.to_string(),
            error: format!($($arg)*),
        });
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_handler_formatting() {
        let handler = ConsoleProgressHandler::new();
        let message = handler.format_message("wave", "Test message");
        assert!(message.contains("[wave]"));
        assert!(message.contains("Test message"));
    }

    #[test]
    fn test_progress_events() {
        let handler = ConsoleProgressHandler::quiet();

        // Should not panic
        handler.handle_progress(ProgressEvent::ExtractionStarted {
            document_id: "doc-1".to_string(),
            strategy: "THREE_WAVE".to_string(),
            chars: 1000,
        });
        handler.handle_progress(ProgressEvent::DedupCompleted { before: 10, after: 8 });
    }
}
