//! LLM integration for devflow.
//!
//! Stage workers talk to a language model through the [`LlmProvider`] trait.
//! [`LiteLlmClient`] implements it for any OpenAI-compatible endpoint; tests
//! substitute scripted providers.
//!
//! ```ignore
//! use devflow::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello!")]);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
