//! Model gateway implementations.
//!
//! | Provider | Module |
//! |----------|--------|
//! | OpenAI-compatible Chat Completions | [`openai`] |

pub mod openai;

pub use openai::OpenAiGateway;
