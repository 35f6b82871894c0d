//! Fusing the tagged-tuple test idiom.
//!
//! Matching a record lowers into three consecutive tests: `is_tuple`, an
//! arity check, and a tag comparison on element 0, all failing to the same
//! label. The backend has a single `is_tagged_tuple` instruction for the
//! whole idiom, so the `is_tuple` is rewritten into it here. The arity and
//! tag blocks become unreachable on the success path and are cleaned up by
//! the live and merge passes.

use super::{Cfg, St};
use crate::ir::{Atom, Block, Label, Last, Literal, Op, Value, Var};
use anyhow::Result;
use rustc_hash::FxHashMap;

pub(super) fn run(mut st: St) -> Result<St> {
    let mut linear = st.cfg.into_linear();
    let index: FxHashMap<Label, Block> = linear.iter().cloned().collect();
    for (_, block) in &mut linear {
        let Some(test) = block.instrs.last() else {
            continue;
        };
        let Op::Bif(name) = &test.op else { continue };
        if name != "is_tuple" {
            continue;
        }
        let [Value::Var(tuple)] = test.args.as_slice() else {
            continue;
        };
        let Last::Br { cond, succ, fail } = &block.last else {
            continue;
        };
        if cond != &Value::Var(test.dst.clone()) {
            continue;
        }
        if let Some((size, tag)) = probe_tagged_tuple(&index, tuple, *succ, *fail) {
            let tuple = tuple.clone();
            let test = block.instrs.last_mut().unwrap();
            test.op = Op::IsTaggedTuple;
            test.args = vec![
                Value::Var(tuple),
                Value::Lit(Literal::Int(size)),
                Value::Lit(Literal::Atom(tag)),
            ];
        }
    }
    st.cfg = Cfg::Linear(linear);
    Ok(st)
}

/// Follow the success edge of an `is_tuple` test: an arity-check block, then
/// a tag-check block, both failing to `fail`. Returns the checked size and
/// tag when the idiom matches.
fn probe_tagged_tuple(
    blocks: &FxHashMap<Label, Block>,
    tuple: &Var,
    succ: Label,
    fail: Label,
) -> Option<(i64, Atom)> {
    let arity_block = blocks.get(&succ)?;
    let [size_i, eq_i] = arity_block.instrs.as_slice() else {
        return None;
    };
    if !matches!(&size_i.op, Op::Bif(n) if n == "tuple_size")
        || size_i.args != [Value::Var(tuple.clone())]
    {
        return None;
    }
    let Op::Bif(eq_name) = &eq_i.op else {
        return None;
    };
    let [Value::Var(size_var), Value::Lit(Literal::Int(size))] = eq_i.args.as_slice() else {
        return None;
    };
    if eq_name != "=:=" || size_var != &size_i.dst {
        return None;
    }
    let Last::Br {
        cond,
        succ: tag_label,
        fail: arity_fail,
    } = &arity_block.last
    else {
        return None;
    };
    if cond != &Value::Var(eq_i.dst.clone()) || *arity_fail != fail {
        return None;
    }
    let tag = probe_tag(blocks.get(tag_label)?, tuple, fail)?;
    Some((*size, tag))
}

/// The tag block reads element 0 of the tuple and compares it with an atom,
/// failing to the same label. Other instructions may sit in between.
fn probe_tag(block: &Block, tuple: &Var, fail: Label) -> Option<Atom> {
    let Last::Br { cond, fail: tag_fail, .. } = &block.last else {
        return None;
    };
    if *tag_fail != fail {
        return None;
    }
    let mut tag_var = None;
    for instr in &block.instrs {
        match (&instr.op, tag_var.as_ref()) {
            (Op::GetTupleElement, None) => {
                if instr.args
                    == [Value::Var(tuple.clone()), Value::Lit(Literal::Int(0))]
                {
                    tag_var = Some(instr.dst.clone());
                }
            }
            (Op::Bif(name), Some(tag)) if name == "=:=" => {
                let [Value::Var(lhs), Value::Lit(Literal::Atom(atom))] =
                    instr.args.as_slice()
                else {
                    continue;
                };
                if lhs == tag && cond == &Value::Var(instr.dst.clone()) {
                    return Some(atom.clone());
                }
            }
            _ => {}
        }
    }
    None
}
