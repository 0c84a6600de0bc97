//! Persistence layer.
//!
//! [`Store`] is the abstract contract the gateway core depends on; the
//! bundled [`FileStore`] keeps entities in JSON snapshots and the
//! append-only logs in JSONL files under a data directory. Deployments
//! with a relational or key-value store implement [`Store`] instead.

mod file;
mod traits;

pub use file::FileStore;
pub use traits::Store;
