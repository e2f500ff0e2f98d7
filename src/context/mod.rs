//! Context assembly: ranker (§4.3 TF-IDF + budget allocation) and engine
//! (§4.3 section assembly from memory + knowledge base).

pub mod engine;
pub mod ranker;

pub use engine::{AssembleInput, AssembledContext, ContextEngine, ContextSection, default_assemble_input};
pub use ranker::{AllocationResult, ContextRanker, RankableItem, RankedItem};
