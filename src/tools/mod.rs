//! Capability execution and the built-in capabilities.

pub mod builtin;
pub mod executor;

pub use builtin::BUILTIN_PROVIDER_ID;
pub use executor::{CapabilityExecutor, ScheduledInvocation};
