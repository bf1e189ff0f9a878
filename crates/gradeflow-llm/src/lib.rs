// Model-provider side of grading: the provider trait, prompts, reply parsing
// and the HTTP clients for each supported provider.

pub mod client;
pub mod parse;
pub mod prompt;
pub mod provider;

pub use client::{probe_ollama, LlmClient, LlmGrader};
pub use parse::parse_grade_response;
pub use provider::{GradingProvider, GradingRequest, ProviderError};
