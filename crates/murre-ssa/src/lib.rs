//! murre-ssa — SSA optimizer for the Murre compiler backend.
//!
//! The front end lowers each function into a control-flow graph of basic
//! blocks in pruned SSA form; this crate rewrites those graphs into
//! semantically equivalent ones with fewer instructions, smaller stack
//! frames, and better use of the specialized machine opcodes (tagged-tuple
//! tests, unboxed float arithmetic, skipped binary matches).
//!
//! The entry point is [`optimize_module`]; per-pass behavior lives in
//! [`optimizer`].

pub mod cfg;
pub mod ir;
pub mod optimizer;
pub mod verify;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
pub use optimizer::{optimize_module, optimize_module_with, Options, TypeOptimizer};
