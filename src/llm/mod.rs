//! LLM access for compliance assessment
//!
//! This module handles:
//! - Talking to Ollama or OpenAI-compatible endpoints
//! - A provider trait so the orchestrator can run against a mock
//! - Prompt generation for requirement batches

mod client;
mod prompts;

pub use client::{LlmClient, LlmConfig, LlmProvider, LlmResponse, MockLlmClient};
pub use prompts::{RequirementPrompt, SYSTEM_PROMPT};
