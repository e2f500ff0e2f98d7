//! Context Engine (§4.3)
//!
//! Assembles prompt sections from memory + knowledge base + ranker,
//! respecting each source's per-source ceiling and failure policy, with an
//! optional global rerank + greedy token-budget allocation pass.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::ranker::{AllocationResult, ContextRanker, RankableItem};
use crate::knowledge_base::KnowledgeBase;
use crate::memory::MemoryStore;

const CHARS_PER_TOKEN: usize = 4;
const DEFAULT_BUDGET_TOKENS: usize = 4000;

struct SourceSpec {
    name: &'static str,
    priority: u8,
    max_tokens: usize,
    always_include: bool,
}

const SOURCES: &[SourceSpec] = &[
    SourceSpec { name: "system", priority: 1, max_tokens: 200, always_include: true },
    SourceSpec { name: "task", priority: 2, max_tokens: 500, always_include: true },
    SourceSpec { name: "shortTermMemory", priority: 3, max_tokens: 500, always_include: false },
    SourceSpec { name: "ragResults", priority: 4, max_tokens: 800, always_include: false },
    SourceSpec { name: "longTermMemory", priority: 5, max_tokens: 400, always_include: false },
    SourceSpec { name: "domainContext", priority: 6, max_tokens: 300, always_include: false },
];

#[derive(Debug, Clone, Serialize)]
pub struct ContextSection {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct AssembleInput {
    pub session_id: String,
    pub system_prompt: String,
    pub domain: Option<String>,
    pub seller_id: Option<String>,
    pub token_budget: Option<usize>,
    pub rerank: bool,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub prompt: String,
    pub sections: Vec<ContextSection>,
    pub sources: Vec<String>,
    pub token_count: usize,
    pub allocation: Option<AllocationResult>,
}

pub struct ContextEngine {
    memory: Arc<MemoryStore>,
    knowledge_base: Arc<KnowledgeBase>,
}

impl ContextEngine {
    pub fn new(memory: Arc<MemoryStore>, knowledge_base: Arc<KnowledgeBase>) -> Self {
        Self { memory, knowledge_base }
    }

    pub async fn assemble(&self, agent_id: &str, task: &str, opts: AssembleInput) -> AssembledContext {
        let mut raw_sections: Vec<(&'static SourceSpec, String)> = Vec::new();

        for spec in SOURCES {
            let text = match spec.name {
                "system" => opts.system_prompt.clone(),
                "task" => task.to_string(),
                "shortTermMemory" => self.fetch_short_term(agent_id, &opts.session_id).await.unwrap_or_default(),
                "ragResults" => self.fetch_rag(&opts, task).await.unwrap_or_default(),
                "longTermMemory" => self.fetch_long_term(agent_id, task).await.unwrap_or_default(),
                "domainContext" => opts.domain.clone().unwrap_or_default(),
                _ => String::new(),
            };

            if text.is_empty() && !spec.always_include {
                continue;
            }

            let truncated = truncate_chars(&text, spec.max_tokens * CHARS_PER_TOKEN);
            raw_sections.push((spec, truncated));
        }

        let (sections, sources, token_count, allocation) = if opts.rerank {
            self.rerank_sections(raw_sections, task, opts.token_budget.unwrap_or(DEFAULT_BUDGET_TOKENS))
        } else {
            let sources = raw_sections.iter().map(|(s, _)| s.name.to_string()).collect();
            let sections: Vec<ContextSection> = raw_sections
                .iter()
                .map(|(s, t)| ContextSection { name: s.name.to_string(), text: t.clone() })
                .collect();
            let token_count: usize = sections.iter().map(|s| estimate_tokens(&s.text)).sum();
            (sections, sources, token_count, None)
        };

        let prompt = sections
            .iter()
            .map(|s| format!("## {}\n{}", s.name, s.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        AssembledContext {
            prompt,
            sections,
            sources,
            token_count,
            allocation,
        }
    }

    fn rerank_sections(
        &self,
        raw_sections: Vec<(&'static SourceSpec, String)>,
        task: &str,
        budget: usize,
    ) -> (Vec<ContextSection>, Vec<String>, usize, Option<AllocationResult>) {
        let mut guaranteed_tokens = 0usize;
        let mut guaranteed_sections = Vec::new();
        let mut rankable = Vec::new();

        for (spec, text) in raw_sections {
            if spec.always_include {
                guaranteed_tokens += estimate_tokens(&text);
                guaranteed_sections.push(ContextSection { name: spec.name.to_string(), text });
            } else {
                let tokens = estimate_tokens(&text);
                rankable.push(RankableItem {
                    id: spec.name.to_string(),
                    text,
                    tokens,
                });
            }
        }

        let ranked = ContextRanker::rank_items(&rankable, task);
        let allocation = ContextRanker::allocate_budget(&ranked, budget, guaranteed_tokens);

        let mut sources: Vec<String> = guaranteed_sections.iter().map(|s| s.name.clone()).collect();
        let mut sections = guaranteed_sections;
        for item in &allocation.items {
            sections.push(ContextSection {
                name: item.id.clone(),
                text: item.text.clone(),
            });
            sources.push(item.id.clone());
        }

        let token_count = allocation.total_tokens;
        (sections, sources, token_count, Some(allocation))
    }

    async fn fetch_short_term(&self, agent_id: &str, session_id: &str) -> anyhow::Result<String> {
        let entries = self.memory.short_term.get(agent_id, session_id).await?;
        Ok(entries
            .iter()
            .map(|e| e.entry.to_string())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn fetch_long_term(&self, agent_id: &str, task: &str) -> anyhow::Result<String> {
        let hits = self.memory.long_term.query(agent_id, task, 5).await?;
        Ok(hits
            .iter()
            .map(|h| h.entry.content.to_string())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn fetch_rag(&self, opts: &AssembleInput, task: &str) -> anyhow::Result<String> {
        let namespace = opts.domain.clone().unwrap_or_else(|| "default".to_string());
        let hits = self.knowledge_base.search(&namespace, task, 5).await?;
        Ok(hits.iter().map(|h| h.text.clone()).collect::<Vec<_>>().join("\n"))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN.max(1)
}

pub fn default_assemble_input(session_id: impl Into<String>, system_prompt: impl Into<String>) -> AssembleInput {
    AssembleInput {
        session_id: session_id.into(),
        system_prompt: system_prompt.into(),
        domain: None,
        seller_id: None,
        token_budget: None,
        rerank: false,
    }
}

pub type ContextValue = Value;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::kv::InMemoryKVStore;
    use serde_json::json;

    fn engine() -> ContextEngine {
        let clock = Arc::new(MockClock::new(0));
        let store: Arc<dyn crate::kv::KVStore> = Arc::new(InMemoryKVStore::new());
        let memory = Arc::new(MemoryStore::new(store.clone(), clock));
        let kb = Arc::new(KnowledgeBase::new(store, None));
        ContextEngine::new(memory, kb)
    }

    #[tokio::test]
    async fn system_and_task_are_always_included() {
        let engine = engine();
        let ctx = engine
            .assemble("A1", "evaluate this seller", default_assemble_input("S1", "you are a fraud analyst"))
            .await;
        let names: Vec<&str> = ctx.sections.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"system"));
        assert!(names.contains(&"task"));
    }

    #[tokio::test]
    async fn sections_are_truncated_to_their_own_ceiling() {
        let engine = engine();
        let long_prompt = "x".repeat(10_000);
        let ctx = engine
            .assemble("A1", "t", default_assemble_input("S1", long_prompt))
            .await;
        let system_section = ctx.sections.iter().find(|s| s.name == "system").unwrap();
        assert!(system_section.text.len() <= 200 * 4);
    }

    #[tokio::test]
    async fn empty_optional_sources_are_skipped_silently() {
        let engine = engine();
        let ctx = engine
            .assemble("A1", "t", default_assemble_input("S1", "sys"))
            .await;
        let names: Vec<&str> = ctx.sections.iter().map(|s| s.name.as_str()).collect();
        assert!(!names.contains(&"shortTermMemory"));
    }

    #[tokio::test]
    async fn rerank_respects_global_budget() {
        let engine = engine();
        for i in 0..5 {
            engine
                .memory
                .short_term
                .save("A1", "S1", json!({"note": format!("note {i}")}))
                .await
                .unwrap();
        }
        let mut opts = default_assemble_input("S1", "sys");
        opts.rerank = true;
        opts.token_budget = Some(50);
        let ctx = engine.assemble("A1", "notes about the seller", opts).await;
        assert!(ctx.allocation.is_some());
        assert!(ctx.token_count <= 50 + 10); // small slack for integer rounding in guaranteed sections
    }
}
