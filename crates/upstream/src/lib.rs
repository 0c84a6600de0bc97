//! Thin HTTP clients for the two upstream search providers.
//!
//! Clients are key-agnostic: the pool decrypts a key per call and passes
//! it in, so one client instance serves the whole key pool. Failures are
//! classified into the [`sg_domain::error::UpstreamErrorKind`] taxonomy
//! that drives key-state transitions.

mod brave;
mod classify;
mod tavily;

pub use brave::BraveClient;
pub use tavily::{AccountUsage, CreditsUsage, KeyUsage, TavilyClient};
