//! IR well-formedness checks.
//!
//! Each check corresponds to an invariant every pass must preserve:
//! single definition per variable, terminator targets that exist,
//! phi arguments matching the block's predecessors, and `succeeded`
//! referring to the instruction right before it (or the literal `true`
//! after substitution).

use crate::cfg;
use crate::ir::{Function, Label, Module, Op, Value, Var};
use anyhow::{bail, Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

/// Check all invariants on every function of a module.
pub fn check_module(module: &Module) -> Result<()> {
    for func in &module.functions {
        check_function(func)
            .with_context(|| format!("in {}/{}", func.name.as_str(), func.arity))?;
    }
    Ok(())
}

/// Check all invariants on one function.
pub fn check_function(func: &Function) -> Result<()> {
    check_single_definition(func)?;
    check_terminators(func)?;
    check_phis(func)?;
    check_succeeded(func)?;
    Ok(())
}

fn check_single_definition(func: &Function) -> Result<()> {
    let mut defined: FxHashSet<&Var> = func.args.iter().collect();
    if defined.len() != func.args.len() {
        bail!("duplicate argument variable");
    }
    for (label, block) in &func.blocks {
        for instr in &block.instrs {
            if !defined.insert(&instr.dst) {
                bail!("{:?} defined more than once (second definition in {label})", instr.dst);
            }
        }
    }
    Ok(())
}

fn check_terminators(func: &Function) -> Result<()> {
    for (label, block) in &func.blocks {
        for succ in cfg::successors(block) {
            if !func.blocks.contains_key(&succ) {
                bail!("{label} branches to undefined block {succ}");
            }
        }
    }
    Ok(())
}

fn check_phis(func: &Function) -> Result<()> {
    let preds = cfg::predecessors(&func.blocks);
    for (label, block) in &func.blocks {
        let mut seen_non_phi = false;
        for instr in &block.instrs {
            let Some(pairs) = instr.phi_pairs() else {
                seen_non_phi = true;
                continue;
            };
            if seen_non_phi {
                bail!("phi after a non-phi instruction in {label}");
            }
            let phi_preds: BTreeSet<Label> = pairs.iter().map(|(_, from)| *from).collect();
            let block_preds: BTreeSet<Label> =
                preds.get(label).into_iter().flatten().copied().collect();
            if phi_preds != block_preds {
                bail!(
                    "phi in {label} mentions predecessors {phi_preds:?}, block has {block_preds:?}"
                );
            }
        }
    }
    Ok(())
}

fn check_succeeded(func: &Function) -> Result<()> {
    for (label, block) in &func.blocks {
        for (idx, instr) in block.instrs.iter().enumerate() {
            if !matches!(instr.op, Op::Succeeded) {
                continue;
            }
            match instr.args.as_slice() {
                [Value::Lit(lit)] if lit.is_true() => {}
                [Value::Var(v)] => {
                    let prev = idx
                        .checked_sub(1)
                        .and_then(|i| block.instrs.get(i))
                        .map(|i| &i.dst);
                    if prev != Some(v) {
                        bail!(
                            "succeeded in {label} references {v:?}, which is not the preceding \
                             instruction's destination"
                        );
                    }
                }
                _ => bail!("malformed succeeded arguments in {label}"),
            }
        }
    }
    Ok(())
}

/// Definition labels for every variable, for diagnostics and tests.
pub fn definitions(func: &Function) -> FxHashMap<Var, Label> {
    let mut defs = FxHashMap::default();
    for (label, block) in &func.blocks {
        for instr in &block.instrs {
            defs.insert(instr.dst.clone(), *label);
        }
    }
    defs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Atom, Block, BlockMap, Instr, Last, Literal};

    fn func_of(blocks: BlockMap) -> Function {
        Function {
            name: Atom::new("t"),
            arity: 0,
            args: vec![],
            blocks,
            count: 100,
        }
    }

    #[test]
    fn accepts_well_formed_function() {
        let blocks = BlockMap::from([
            (
                Label(0),
                Block::new(
                    vec![
                        Instr::new(
                            Var::user("X"),
                            Op::Bif(Atom::new("abs")),
                            vec![Value::Lit(Literal::Int(-3))],
                        ),
                        Instr::new(Var::user("B"), Op::Succeeded, vec![Value::Var(Var::user("X"))]),
                    ],
                    Last::br(Value::Var(Var::user("B")), Label(2), Label(2)),
                ),
            ),
            (Label(2), Block::new(vec![], Last::ret(Var::user("X")))),
        ]);
        check_function(&func_of(blocks)).unwrap();
    }

    #[test]
    fn rejects_double_definition() {
        let blocks = BlockMap::from([(
            Label(0),
            Block::new(
                vec![
                    Instr::new(Var::user("X"), Op::PutTuple, vec![]),
                    Instr::new(Var::user("X"), Op::PutTuple, vec![]),
                ],
                Last::ret(Var::user("X")),
            ),
        )]);
        assert!(check_function(&func_of(blocks)).is_err());
    }

    #[test]
    fn rejects_dangling_branch_target() {
        let blocks = BlockMap::from([(Label(0), Block::new(vec![], Last::goto(Label(7))))]);
        assert!(check_function(&func_of(blocks)).is_err());
    }

    #[test]
    fn rejects_phi_with_wrong_predecessors() {
        let blocks = BlockMap::from([
            (Label(0), Block::new(vec![], Last::goto(Label(2)))),
            (
                Label(2),
                Block::new(
                    vec![Instr::new(
                        Var::user("P"),
                        Op::Phi(vec![(Value::Lit(Literal::Int(1)), Label(5))]),
                        vec![],
                    )],
                    Last::ret(Var::user("P")),
                ),
            ),
        ]);
        assert!(check_function(&func_of(blocks)).is_err());
    }

    #[test]
    fn accepts_succeeded_rewritten_to_true() {
        let blocks = BlockMap::from([(
            Label(0),
            Block::new(
                vec![Instr::new(
                    Var::user("B"),
                    Op::Succeeded,
                    vec![Value::Lit(Literal::bool(true))],
                )],
                Last::ret(Var::user("B")),
            ),
        )]);
        check_function(&func_of(blocks)).unwrap();
    }

    #[test]
    fn rejects_detached_succeeded() {
        let blocks = BlockMap::from([(
            Label(0),
            Block::new(
                vec![
                    Instr::new(Var::user("X"), Op::PutTuple, vec![]),
                    Instr::new(Var::user("Y"), Op::PutTuple, vec![]),
                    Instr::new(Var::user("B"), Op::Succeeded, vec![Value::Var(Var::user("X"))]),
                ],
                Last::ret(Var::user("B")),
            ),
        )]);
        assert!(check_function(&func_of(blocks)).is_err());
    }
}
