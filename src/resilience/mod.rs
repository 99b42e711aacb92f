//! Resilience primitives.
//!
//! - [`retry`]: exponential backoff, shared by in-process retries and the
//!   sync queue cooldown
//! - [`circuit_breaker`]: fail-fast guard around the remote sync backend

pub mod circuit_breaker;
pub mod retry;
