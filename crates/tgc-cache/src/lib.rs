//! Content-addressed graph cache: fingerprints a build configuration
//! (model, batch size, precision, reduce-precision, MMA kind, parallel-K
//! strategy, space level) into a legible cache-directory name, and
//! persists the optimized `FlowGraph` under it with write-then-rename
//! atomicity.
//!
//! Earlier iterations of this crate carried a SQLite-backed row-identity
//! store (`ProgramId`, `GraphStore` trait, `InMemoryStore`/`SqliteStore`
//! impls). None of that survives here: a tensor-program build cache is
//! keyed by the deterministic fingerprint of its build configuration,
//! not by an auto-incrementing row id, so there is nothing for a
//! database to index.

pub mod fingerprint;
pub mod store;

pub use fingerprint::{cache_path, fingerprint};
pub use store::{read_graph, write_graph};
