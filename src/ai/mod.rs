//! AI Integration Layer
//!
//! Model invocation for the tutorial pipeline.

pub mod provider;
pub mod timeout;

pub use provider::{
    Completion, ModelInvoker, OllamaProvider, OpenAiProvider, ProviderConfig, ResponseTiming,
    SharedInvoker, TokenUsage, create_invoker,
};
pub use timeout::with_timeout;
