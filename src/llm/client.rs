//! LLM Client (§4.4)
//!
//! Retries, cache integration, cost attribution, and the JSON-repair loop.
//! Generalizes the agency's `CachedProvider` wrapper (`agent/cache.rs`) with
//! an explicit retry/backoff schedule and a JSON repair pass on top.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::cache::LLMCache;
use super::cost::CostTracker;
use super::json_repair::{extract_json, RepairStats};
use super::provider::{ChatMessage, CompletionRequest, CompletionResponse, LLMProvider, ProviderError};

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub agent_id: Option<String>,
    pub skip_cache: bool,
}

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub content: String,
    pub usage_input: u32,
    pub usage_output: u32,
    pub latency_ms: i64,
    pub cached: bool,
}

pub struct LLMClient {
    provider: Option<Arc<dyn LLMProvider>>,
    cache: Arc<LLMCache>,
    cost_tracker: Arc<CostTracker>,
    clock: Arc<dyn crate::clock::Clock>,
    default_model: String,
    pub repair_stats: std::sync::Mutex<RepairStats>,
}

impl LLMClient {
    pub fn new(
        provider: Option<Arc<dyn LLMProvider>>,
        cache: Arc<LLMCache>,
        cost_tracker: Arc<CostTracker>,
        clock: Arc<dyn crate::clock::Clock>,
    ) -> Self {
        Self {
            provider,
            cache,
            cost_tracker,
            clock,
            default_model: "claude-sonnet-4-5".to_string(),
            repair_stats: std::sync::Mutex::new(RepairStats::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// `complete(system, user, opts) -> Option<Outcome>`. `None` when the
    /// LLM is disabled (§4.4); callers must have a fallback path.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        opts: CompletionOptions,
    ) -> Option<CompletionOutcome> {
        let provider = self.provider.as_ref()?;
        let model = opts.model.clone().unwrap_or_else(|| self.default_model.clone());
        let temperature = opts.temperature.unwrap_or(0.3);
        let max_tokens = opts.max_tokens.unwrap_or(1024);
        let agent_id = opts.agent_id.clone().unwrap_or_else(|| super::cost::SYSTEM_AGENT.to_string());

        let cache_key = LLMCache::key(&model, temperature, system, user);
        if !opts.skip_cache {
            if let Some(cached) = self.cache.get(&cache_key) {
                // Open Question 1: cache hits are counted as a call (a call
                // happened; `cached=true` is what distinguishes it).
                self.cost_tracker.record_cost(&agent_id, &model, 0, 0);
                return Some(CompletionOutcome {
                    content: cached,
                    usage_input: 0,
                    usage_output: 0,
                    latency_ms: 0,
                    cached: true,
                });
            }
        }

        let request = CompletionRequest {
            model: model.clone(),
            system: Some(system.to_string()),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: user.to_string(),
            }],
            max_tokens,
            temperature,
        };

        let started = self.clock.now_ms();
        let response = self.call_with_retry(provider.as_ref(), request).await;
        let latency_ms = self.clock.now_ms() - started;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "llm call failed after retries");
                return None;
            }
        };

        self.cost_tracker.record_cost(
            &agent_id,
            &model,
            response.usage.input_tokens as u64,
            response.usage.output_tokens as u64,
        );

        let content = response.text();

        if !opts.skip_cache && LLMCache::cacheable(temperature) {
            self.cache.set(cache_key, content.clone());
        }

        Some(CompletionOutcome {
            content,
            usage_input: response.usage.input_tokens,
            usage_output: response.usage.output_tokens,
            latency_ms,
            cached: false,
        })
    }

    async fn call_with_retry(
        &self,
        provider: &dyn LLMProvider,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut attempt = 0u32;
        loop {
            match provider.messages_create(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = Duration::from_secs(1u64 << attempt);
                    tracing::warn!(attempt, error = %e, "llm call transient failure, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `completeWithJsonRetry`: one best-effort completion, one repair pass
    /// on parse failure, else `fallback` (§4.4, S6).
    pub async fn complete_with_json_retry(
        &self,
        system: &str,
        user: &str,
        schema: &Value,
        fallback: Value,
        opts: CompletionOptions,
    ) -> Value {
        let Some(outcome) = self.complete(system, user, opts.clone()).await else {
            return fallback;
        };

        if let Some(parsed) = extract_json(&outcome.content) {
            return parsed;
        }

        let mut stats = self.repair_stats.lock().unwrap();
        stats.attempts += 1;
        drop(stats);

        let repair_user = format!(
            "The following text was supposed to contain JSON matching this schema but did not \
             parse:\n\nSCHEMA:\n{}\n\nRAW OUTPUT:\n{}\n\nRespond with ONLY valid JSON, no markdown.",
            serde_json::to_string_pretty(schema).unwrap_or_default(),
            outcome.content
        );

        let repair_opts = CompletionOptions {
            skip_cache: true,
            ..opts
        };

        let Some(repaired) = self.complete(system, &repair_user, repair_opts).await else {
            return fallback;
        };

        match extract_json(&repaired.content) {
            Some(parsed) => {
                let mut stats = self.repair_stats.lock().unwrap();
                stats.successes += 1;
                parsed
            }
            None => fallback,
        }
    }

    pub fn repair_stats(&self) -> RepairStats {
        *self.repair_stats.lock().unwrap()
    }
}
