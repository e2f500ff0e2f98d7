//! LLM layer: provider interface, cache, cost tracking, JSON repair, and the
//! client that composes them (§4.4).

pub mod cache;
pub mod client;
pub mod cost;
pub mod json_repair;
pub mod provider;

pub use cache::LLMCache;
pub use client::{CompletionOptions, CompletionOutcome, LLMClient};
pub use cost::{Budget, CostRecord, CostTracker, Rate};
pub use provider::{HttpLLMProvider, LLMProvider, ProviderError};
