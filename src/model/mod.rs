//! Decision client: prompt construction and model calls.

mod client;
mod prompt;

pub use client::{
    DecisionMaker, MessageBuilder, ModelClient, ModelConfig, ModelError, ADVANCED_TEMPERATURE,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_TEMPERATURE,
};
pub use prompt::{build_prompt, Prompt, PromptContext, PAGE_TEXT_LIMIT, PROMPT_ELEMENT_LIMIT};
