//! MCP server surface: JSON-RPC 2.0 types, the session registry, and the
//! tool catalogue.

pub mod protocol;
pub mod session;
pub mod tools;
