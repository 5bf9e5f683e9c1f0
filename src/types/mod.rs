//! Shared data types for the conversation loop.

pub mod message;

pub use message::{CapabilityOutcome, CapabilityResult, Invocation, Message};
