//! Language model access.
//!
//! - [`gateway`] - the [`ModelGateway`] trait and its request/response types
//! - [`providers`] - concrete gateways

pub mod gateway;
pub mod providers;

pub use gateway::{ModelGateway, ModelRequest, ModelResponse};
pub use providers::OpenAiGateway;
