//! Query orchestration engine: intent classification, SQL generation,
//! warehouse execution, result normalization and insight synthesis.

pub mod config;
pub mod errors;
pub mod execution;
pub mod generator;
pub mod insight;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod responder;
pub mod routing;
pub mod terminal;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod transform;
pub mod types;
pub mod warehouse;
