//! LLM integration.
//!
//! A thin client for OpenAI-compatible chat completion endpoints, used by
//! the bias classifier. The [`LlmProvider`] trait is the seam tests use to
//! substitute scripted responses.
//!
//! ```ignore
//! use bias_worker::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello")])
//!     .with_temperature(0.3)
//!     .with_json_response();
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message,
    ResponseFormat, Usage, DEFAULT_MODEL,
};
