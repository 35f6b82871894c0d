//! Hook for the external type-based optimization.
//!
//! Type analysis lives in its own crate and is invoked as a black box on the
//! linearized CFG. Besides rewriting instructions it may mark float-capable
//! operations with the `float_op` annotation that the float pass consumes.

use crate::ir::{Block, Label, Var};
use anyhow::Result;

pub trait TypeOptimizer: Sync {
    fn optimize(
        &self,
        linear: Vec<(Label, Block)>,
        args: &[Var],
    ) -> Result<Vec<(Label, Block)>>;
}

/// Identity type pass, used when no type analysis is plugged in.
pub struct NoTypeOpt;

impl TypeOptimizer for NoTypeOpt {
    fn optimize(
        &self,
        linear: Vec<(Label, Block)>,
        _args: &[Var],
    ) -> Result<Vec<(Label, Block)>> {
        Ok(linear)
    }
}
