//! Backend inference clients.
//!
//! The extraction engine talks to OpenAI-compatible chat-completion
//! endpoints that support grammar-constrained decoding via a `guided_json`
//! field in the request body. Three deployments are distinguished by URL
//! and model: *instruct* (entity waves), *thinking* (relationship wave) and
//! *embeddings* (unused by this engine).
//!
//! The HTTP client wraps every call in the resource envelope: token
//! budgeting, a concurrency semaphore, a per-minute rate bucket, retries
//! with exponential backoff for transient failures, and a three-state
//! circuit breaker. Entity and relationship calls are reproducible by
//! contract: temperature 0.0 and a fixed seed unless the caller explicitly
//! overrides both, which is logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, Semaphore};

use crate::config::{ExtractorConfig, InferenceSettings};
use crate::exceptions::{ExtractError, ExtractResult};
use crate::gpu::GpuMonitor;
use crate::logging::{report_progress, ProgressEvent};
use crate::tokens::TokenEstimator;

/// Which backend deployment a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Fast entity extraction.
    Instruct,
    /// Reasoning-optimized relationship extraction.
    Thinking,
    /// Document embeddings (not used by the extraction core).
    Embeddings,
}

impl ServiceKind {
    fn endpoint(&self, settings: &InferenceSettings) -> (String, String) {
        match self {
            Self::Instruct => (settings.instruct_url.clone(), settings.instruct_model.clone()),
            Self::Thinking => (settings.thinking_url.clone(), settings.thinking_model.clone()),
            Self::Embeddings => {
                (settings.embeddings_url.clone(), settings.embeddings_model.clone())
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Instruct => "instruct",
            Self::Thinking => "thinking",
            Self::Embeddings => "embeddings",
        }
    }
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

/// Request to the backend.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    /// `None` means the reproducibility default (0.0).
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<i32>,
    /// `None` means the reproducibility default seed.
    pub seed: Option<u64>,
    pub stop: Option<Vec<String>>,
    /// Opaque extra body fields merged into the payload; carries the
    /// `guided_json` grammar constraint.
    pub extra_body: Option<Value>,
}

impl InferenceRequest {
    pub fn new(messages: Vec<ChatMessage>, max_tokens: usize) -> Self {
        Self {
            messages,
            max_tokens,
            temperature: None,
            top_p: None,
            top_k: None,
            seed: None,
            stop: None,
            extra_body: None,
        }
    }

    /// Attach the grammar-constraint schema.
    pub fn with_guided_json(mut self, schema: Value) -> Self {
        self.extra_body = Some(json!({ "guided_json": schema }));
        self
    }

    /// Flatten messages for token estimation.
    pub fn to_prompt_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.messages.len() + 1);
        for msg in &self.messages {
            parts.push(format!("{}: {}", msg.role, msg.content));
        }
        parts.push("assistant:".to_string());
        parts.join("\n")
    }
}

/// Token accounting from the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Response from the backend.
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: String,
    pub response_time_ms: f64,
}

/// Connection lifecycle: NOT_READY -> CONNECTING -> READY -> CLOSING ->
/// CLOSED. Any operation while not READY triggers a single-flight connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotReady,
    Connecting,
    Ready,
    Closing,
    Closed,
}

/// Performance counters for one client.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientStats {
    pub requests_processed: u64,
    pub successful_generations: u64,
    pub errors_encountered: u64,
    pub retries: u64,
    pub total_tokens_generated: u64,
    pub context_overflows: u64,
    pub rate_limit_waits: u64,
    pub gpu_rejections: u64,
    pub total_processing_time_ms: f64,
    pub average_response_time_ms: f64,
    pub last_request_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn label(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Three-state circuit breaker: Closed -> Open after N consecutive
/// failures, Open -> HalfOpen after the recovery timeout, HalfOpen admits a
/// single probe and closes on success or re-opens on failure.
struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    recovery_timeout: Duration,
    opened_at: Option<tokio::time::Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold,
            recovery_timeout,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            report_progress(ProgressEvent::CircuitStateChanged {
                from: self.state.label().to_string(),
                to: to.label().to_string(),
            });
            self.state = to;
        }
    }

    fn admit(&mut self, now: tokio::time::Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|t| now.duration_since(t)).unwrap_or_default();
                if elapsed >= self.recovery_timeout {
                    self.transition(CircuitState::HalfOpen);
                    self.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        self.transition(CircuitState::Closed);
    }

    fn on_failure(&mut self, now: tokio::time::Instant) {
        match self.state {
            CircuitState::HalfOpen => {
                self.probe_in_flight = false;
                self.opened_at = Some(now);
                self.transition(CircuitState::Open);
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.opened_at = Some(now);
                    self.transition(CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Token-bucket limiter enforcing a per-minute call ceiling.
struct RateBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: tokio::time::Instant,
}

impl RateBucket {
    fn new(requests_per_minute: u32, now: tokio::time::Instant) -> Self {
        let capacity = requests_per_minute as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: now,
        }
    }

    /// Take one token, or report how long until one is available.
    fn try_acquire(&mut self, now: tokio::time::Instant) -> Result<(), Duration> {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Capability set every backend client provides.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Establish the connection and verify backend health.
    async fn connect(&self) -> ExtractResult<()>;

    /// Generate a single completion.
    async fn generate_chat_completion(
        &self,
        request: InferenceRequest,
    ) -> ExtractResult<InferenceResponse>;

    /// Generate completions for a batch of requests, in order.
    async fn generate_batch(
        &self,
        requests: Vec<InferenceRequest>,
    ) -> ExtractResult<Vec<InferenceResponse>>;

    /// Whether the client is READY for inference.
    async fn is_ready(&self) -> bool;

    /// Performance counters.
    async fn stats(&self) -> ClientStats;

    /// Release resources; the client is unusable afterwards.
    async fn close(&self);

    /// Service this client is bound to.
    fn service(&self) -> ServiceKind;
}

/// HTTP client for an OpenAI-compatible backend with `guided_json` support.
pub struct HttpInferenceClient {
    settings: InferenceSettings,
    service: ServiceKind,
    base_url: String,
    model: String,
    default_temperature: f32,
    default_seed: u64,
    http: reqwest::Client,
    estimator: TokenEstimator,
    state: Mutex<ConnectionState>,
    semaphore: Semaphore,
    bucket: Option<Mutex<RateBucket>>,
    breaker: Mutex<CircuitBreaker>,
    stats: Mutex<ClientStats>,
    gpu: Option<Arc<GpuMonitor>>,
}

impl HttpInferenceClient {
    /// Build a client for `service` from the engine configuration.
    pub fn new(
        config: &ExtractorConfig,
        service: ServiceKind,
        gpu: Option<Arc<GpuMonitor>>,
    ) -> Self {
        let settings = config.inference.clone();
        let (base_url, model) = service.endpoint(&settings);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds.max(1)))
            .build()
            .unwrap_or_default();
        let now = tokio::time::Instant::now();

        let default_temperature = match service {
            ServiceKind::Thinking => config.extraction.relationship_temperature,
            _ => config.extraction.entity_temperature,
        };

        Self {
            estimator: TokenEstimator::new(&settings),
            semaphore: Semaphore::new(settings.max_concurrent_requests),
            bucket: (settings.requests_per_minute > 0)
                .then(|| Mutex::new(RateBucket::new(settings.requests_per_minute, now))),
            breaker: Mutex::new(CircuitBreaker::new(
                settings.circuit_breaker_failure_threshold,
                Duration::from_secs(settings.circuit_breaker_recovery_timeout),
            )),
            stats: Mutex::new(ClientStats::default()),
            state: Mutex::new(ConnectionState::NotReady),
            default_temperature,
            default_seed: config.extraction.seed,
            base_url,
            model,
            settings,
            service,
            http,
            gpu,
        }
    }

    /// Single-flight connect: the state mutex is held across the health
    /// check, so concurrent callers observe CONNECTING and wait.
    async fn ensure_ready(&self) -> ExtractResult<()> {
        let mut state = self.state.lock().await;
        match *state {
            ConnectionState::Ready => return Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => {
                return Err(ExtractError::ModelNotLoaded(format!(
                    "{} client is closed",
                    self.service.label()
                )));
            }
            ConnectionState::NotReady | ConnectionState::Connecting => {}
        }

        *state = ConnectionState::Connecting;
        match self.health_check().await {
            Ok(model_id) => {
                log::info!(
                    "connected to {} service at {} (model {})",
                    self.service.label(),
                    self.base_url,
                    model_id
                );
                *state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                *state = ConnectionState::NotReady;
                Err(ExtractError::ModelNotLoaded(format!(
                    "{} service at {} is not available: {e}",
                    self.service.label(),
                    self.base_url
                )))
            }
        }
    }

    /// Health check against the OpenAI-compatible `/models` listing.
    async fn health_check(&self) -> ExtractResult<String> {
        let url = format!("{}/models", self.base_url);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ExtractError::TransientBackend(format!(
                "health check returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ExtractError::TransientBackend(e.to_string()))?;
        let model_id = body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .and_then(|m| m.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(model_id)
    }

    /// Resolve sampling parameters, enforcing the reproducibility contract.
    fn resolve_sampling(&self, request: &InferenceRequest) -> (f32, u64) {
        let temperature = match request.temperature {
            Some(t) if t != self.default_temperature => {
                log::warn!(
                    "temperature override {} (contract default {}): extraction is no \
                     longer reproducible",
                    t,
                    self.default_temperature
                );
                t
            }
            Some(t) => t,
            None => self.default_temperature,
        };
        let seed = match request.seed {
            Some(s) if s != self.default_seed => {
                log::warn!(
                    "seed override {} (contract default {}): extraction is no longer \
                     reproducible",
                    s,
                    self.default_seed
                );
                s
            }
            Some(s) => s,
            None => self.default_seed,
        };
        (temperature, seed)
    }

    fn build_payload(&self, request: &InferenceRequest, max_tokens: usize) -> Value {
        let (temperature, seed) = self.resolve_sampling(request);
        let mut payload = json!({
            "model": self.model,
            "messages": request.messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "top_p": request.top_p.unwrap_or(self.settings.top_p),
            "top_k": request.top_k.unwrap_or(self.settings.top_k),
            "seed": seed,
            "stream": false,
        });
        if let Some(stop) = &request.stop {
            payload["stop"] = json!(stop);
        }
        if let Some(extra) = &request.extra_body {
            if let (Some(obj), Some(extra_obj)) = (payload.as_object_mut(), extra.as_object()) {
                for (key, value) in extra_obj {
                    obj.insert(key.clone(), value.clone());
                }
            }
        }
        payload
    }

    /// Wait for a rate-bucket token, bounded by the request timeout.
    async fn acquire_rate_slot(&self) -> ExtractResult<()> {
        let Some(bucket) = &self.bucket else { return Ok(()) };
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.settings.request_timeout_seconds);
        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                match bucket.try_acquire(tokio::time::Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };
            {
                let mut stats = self.stats.lock().await;
                stats.rate_limit_waits += 1;
            }
            if tokio::time::Instant::now() + wait > deadline {
                return Err(ExtractError::Resource(format!(
                    "rate bucket empty; next slot in {:.1}s exceeds request timeout",
                    wait.as_secs_f64()
                )));
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// One HTTP attempt, with error classification.
    async fn attempt(&self, payload: &Value) -> ExtractResult<InferenceResponse> {
        let start = std::time::Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let response = self.http.post(&url).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("server returned {status}: {body}");
            return Err(if status.as_u16() == 429 {
                ExtractError::Resource(message)
            } else if status.is_server_error() {
                ExtractError::TransientBackend(message)
            } else {
                ExtractError::FatalBackend(message)
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ExtractError::TransientBackend(format!("malformed response body: {e}")))?;
        parse_completion_response(&body, start.elapsed().as_secs_f64() * 1000.0)
    }

    async fn record_success(&self, response: &InferenceResponse) {
        let mut stats = self.stats.lock().await;
        stats.requests_processed += 1;
        stats.successful_generations += 1;
        stats.total_tokens_generated += response.usage.completion_tokens as u64;
        stats.total_processing_time_ms += response.response_time_ms;
        stats.average_response_time_ms =
            stats.total_processing_time_ms / stats.requests_processed as f64;
        stats.last_request_time = Some(chrono::Utc::now());
    }

    async fn record_error(&self) {
        let mut stats = self.stats.lock().await;
        stats.requests_processed += 1;
        stats.errors_encountered += 1;
        stats.last_request_time = Some(chrono::Utc::now());
    }
}

/// Extract content and usage from an OpenAI-compatible completion body.
fn parse_completion_response(body: &Value, response_time_ms: f64) -> ExtractResult<InferenceResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| ExtractError::TransientBackend("no choices in response".to_string()))?;
    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExtractError::TransientBackend("no message content in response".to_string()))?
        .to_string();

    let usage: TokenUsage = body
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok())
        .unwrap_or_default();

    Ok(InferenceResponse {
        content,
        model: body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
        usage,
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .unwrap_or("stop")
            .to_string(),
        response_time_ms,
    })
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn connect(&self) -> ExtractResult<()> {
        self.ensure_ready().await
    }

    #[tracing::instrument(skip_all, fields(service = self.service.label(), max_tokens = request.max_tokens))]
    async fn generate_chat_completion(
        &self,
        request: InferenceRequest,
    ) -> ExtractResult<InferenceResponse> {
        self.ensure_ready().await?;

        if let Some(gpu) = &self.gpu {
            if gpu.should_reject() {
                let mut stats = self.stats.lock().await;
                stats.gpu_rejections += 1;
                return Err(ExtractError::Resource(
                    "GPU memory pressure; request rejected".to_string(),
                ));
            }
        }

        // Token budgeting before any network traffic. Overflow is
        // non-retryable and never silently truncated.
        let prompt = request.to_prompt_string();
        let (prompt_tokens, max_tokens) =
            match self.estimator.estimate_prompt_tokens(&prompt, request.max_tokens) {
                Ok(v) => v,
                Err(e) => {
                    if matches!(e, ExtractError::ContextOverflow { .. }) {
                        let mut stats = self.stats.lock().await;
                        stats.context_overflows += 1;
                    }
                    return Err(e);
                }
            };
        log::debug!(
            "{} request: ~{} prompt tokens, {} completion budget",
            self.service.label(),
            prompt_tokens,
            max_tokens
        );

        let payload = self.build_payload(&request, max_tokens);

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ExtractError::FatalBackend("client semaphore closed".to_string()))?;
        self.acquire_rate_slot().await?;

        let mut last_error: Option<ExtractError> = None;
        let max_attempts = self.settings.max_retries.saturating_add(1);

        for attempt in 0..max_attempts {
            {
                let mut breaker = self.breaker.lock().await;
                if !breaker.admit(tokio::time::Instant::now()) {
                    self.record_error().await;
                    return Err(ExtractError::FatalBackend(
                        "circuit breaker open; backend calls suspended".to_string(),
                    ));
                }
            }

            match self.attempt(&payload).await {
                Ok(response) => {
                    self.breaker.lock().await.on_success();
                    self.record_success(&response).await;
                    return Ok(response);
                }
                Err(e) => {
                    self.breaker.lock().await.on_failure(tokio::time::Instant::now());
                    if !e.is_retryable() || attempt + 1 == max_attempts {
                        self.record_error().await;
                        return Err(if e.is_retryable() {
                            ExtractError::FatalBackend(format!(
                                "retries exhausted after {max_attempts} attempts: {e}"
                            ))
                        } else {
                            e
                        });
                    }

                    let delay = (self.settings.backoff_factor.powi(attempt as i32))
                        .min(self.settings.backoff_max_seconds);
                    report_progress(ProgressEvent::RetryAttempt {
                        operation: format!("{} chat completion", self.service.label()),
                        attempt: attempt + 1,
                        max_attempts,
                        delay_seconds: delay,
                    });
                    {
                        let mut stats = self.stats.lock().await;
                        stats.retries += 1;
                    }
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }
        }

        self.record_error().await;
        Err(last_error
            .unwrap_or_else(|| ExtractError::FatalBackend("retries exhausted".to_string())))
    }

    async fn generate_batch(
        &self,
        requests: Vec<InferenceRequest>,
    ) -> ExtractResult<Vec<InferenceResponse>> {
        // The HTTP API has no native batching; calls run sequentially and
        // individually share the resource envelope.
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(self.generate_chat_completion(request).await?);
        }
        Ok(responses)
    }

    async fn is_ready(&self) -> bool {
        *self.state.lock().await == ConnectionState::Ready
    }

    async fn stats(&self) -> ClientStats {
        self.stats.lock().await.clone()
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        *state = ConnectionState::Closing;
        // reqwest pools close on drop; nothing further to release.
        *state = ConnectionState::Closed;
        log::info!("{} client closed", self.service.label());
    }

    fn service(&self) -> ServiceKind {
        self.service
    }
}

/// Factory: build a client for the requested service.
pub fn client_for_service(
    config: &ExtractorConfig,
    service: ServiceKind,
    gpu: Option<Arc<GpuMonitor>>,
) -> Arc<dyn InferenceClient> {
    Arc::new(HttpInferenceClient::new(config, service, gpu))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpInferenceClient {
        HttpInferenceClient::new(&ExtractorConfig::default(), ServiceKind::Instruct, None)
    }

    #[test]
    fn service_endpoints_resolve_from_settings() {
        let settings = InferenceSettings::default();
        let (url, model) = ServiceKind::Thinking.endpoint(&settings);
        assert_eq!(url, settings.thinking_url);
        assert_eq!(model, settings.thinking_model);
    }

    #[test]
    fn payload_enforces_reproducibility_defaults() {
        let c = client();
        let request = InferenceRequest::new(vec![ChatMessage::user("hello")], 100);
        let payload = c.build_payload(&request, 100);
        assert_eq!(payload["temperature"], json!(0.0));
        assert_eq!(payload["seed"], json!(42));
        assert_eq!(payload["stream"], json!(false));
        assert_eq!(payload["max_tokens"], json!(100));
    }

    #[test]
    fn payload_merges_guided_json_extra_body() {
        let c = client();
        let schema = json!({ "type": "object" });
        let request = InferenceRequest::new(vec![ChatMessage::user("hi")], 50)
            .with_guided_json(schema.clone());
        let payload = c.build_payload(&request, 50);
        assert_eq!(payload["guided_json"], schema);
    }

    #[test]
    fn payload_honors_explicit_overrides() {
        let c = client();
        let mut request = InferenceRequest::new(vec![ChatMessage::user("hi")], 50);
        request.temperature = Some(0.7);
        request.seed = Some(7);
        request.stop = Some(vec!["###".to_string()]);
        let payload = c.build_payload(&request, 50);
        assert_eq!(payload["temperature"], json!(0.7));
        assert_eq!(payload["seed"], json!(7));
        assert_eq!(payload["stop"], json!(["###"]));
    }

    #[test]
    fn completion_response_parses_content_and_usage() {
        let body = json!({
            "model": "test-model",
            "choices": [{
                "message": { "content": "{\"entities\": []}" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        });
        let response = parse_completion_response(&body, 12.5).unwrap();
        assert_eq!(response.content, "{\"entities\": []}");
        assert_eq!(response.usage.total_tokens, 15);
        assert_eq!(response.finish_reason, "stop");
    }

    #[test]
    fn empty_choices_is_a_transient_error() {
        let body = json!({ "choices": [] });
        let err = parse_completion_response(&body, 0.0).unwrap_err();
        assert_eq!(err.kind(), "transient_backend");
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_recovers_via_probe() {
        tokio::time::pause();
        let now = tokio::time::Instant::now;
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        assert!(breaker.admit(now()));
        breaker.on_failure(now());
        breaker.on_failure(now());
        assert_eq!(breaker.state, CircuitState::Closed);
        breaker.on_failure(now());
        assert_eq!(breaker.state, CircuitState::Open);
        assert!(!breaker.admit(now()));

        tokio::time::advance(Duration::from_secs(61)).await;
        // First admission after recovery is the half-open probe.
        assert!(breaker.admit(now()));
        assert_eq!(breaker.state, CircuitState::HalfOpen);
        // No second probe while one is in flight.
        assert!(!breaker.admit(now()));

        breaker.on_success();
        assert_eq!(breaker.state, CircuitState::Closed);
        assert!(breaker.admit(now()));
    }

    #[tokio::test]
    async fn breaker_reopens_on_failed_probe() {
        tokio::time::pause();
        let now = tokio::time::Instant::now;
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(30));

        assert!(breaker.admit(now()));
        breaker.on_failure(now());
        assert_eq!(breaker.state, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.admit(now()));
        breaker.on_failure(now());
        assert_eq!(breaker.state, CircuitState::Open);
        assert!(!breaker.admit(now()));
    }

    #[tokio::test]
    async fn rate_bucket_drains_and_refills() {
        tokio::time::pause();
        let now = tokio::time::Instant::now;
        let mut bucket = RateBucket::new(60, now());

        for _ in 0..60 {
            assert!(bucket.try_acquire(now()).is_ok());
        }
        let wait = bucket.try_acquire(now()).unwrap_err();
        assert!(wait > Duration::from_millis(900) && wait <= Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(bucket.try_acquire(now()).is_ok());
    }

    #[tokio::test]
    async fn context_overflow_short_circuits_before_network() {
        let mut config = ExtractorConfig::default();
        config.inference.max_model_context_tokens = 200;
        config.inference.max_completion_tokens = 100;
        // No backend is running; the overflow must fire before any request.
        let c = HttpInferenceClient::new(&config, ServiceKind::Instruct, None);
        // Force READY so ensure_ready does not attempt a health check.
        *c.state.lock().await = ConnectionState::Ready;

        let request = InferenceRequest::new(vec![ChatMessage::user("x".repeat(4_000))], 100);
        let err = c.generate_chat_completion(request).await.unwrap_err();
        assert_eq!(err.kind(), "context_overflow");
        assert_eq!(c.stats().await.context_overflows, 1);
    }

    #[tokio::test]
    async fn closed_client_refuses_operations() {
        let c = client();
        c.close().await;
        let request = InferenceRequest::new(vec![ChatMessage::user("hi")], 10);
        let err = c.generate_chat_completion(request).await.unwrap_err();
        assert_eq!(err.kind(), "model_not_loaded");
        assert!(!c.is_ready().await);
    }
}
