//! Snapshot-based assertion engine for tests whose textual outputs are
//! partially non-deterministic.
//!
//! A [`SnapshotSession`] records a golden JSON representation of test
//! outputs and, on later runs, normalizes newly observed outputs through a
//! pipeline of [`Transformer`]s before comparing them against the golden
//! copy. Recurring non-deterministic values (identifiers, ARNs, request
//! ids) collapse to stable `<name:N>` placeholder tokens; timestamps
//! collapse to canonical representations; skip paths exclude locations
//! from comparison entirely.

pub mod encoding;
pub mod path;
pub mod redact;
pub mod report;
pub mod session;
pub mod transform;

pub use session::{SessionOptions, SnapshotError, SnapshotMatchResult, SnapshotSession};
pub use transform::{TransformContext, TransformError, Transformer, utility};
