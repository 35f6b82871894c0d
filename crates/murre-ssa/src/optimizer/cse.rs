//! Common subexpression elimination within extended basic blocks.
//!
//! Two maps travel through the linear CFG: `es` maps an `(op, args)`
//! expression key to the variable that first computed it, and `sub` renames
//! eliminated destinations to their surviving representative. The expression
//! map is propagated to each successor and intersected with whatever was
//! recorded there before; the substitution applies to everything downstream.
//!
//! Type tests, comparisons and boolean operators are deliberately not
//! eliminated: keeping them duplicated lets the backend fuse each one with
//! its branch into a single test instruction.
//!
//! An instruction that clobbers the x registers empties the expression map;
//! reusing expressions across a call would force them into the stack frame.

use super::{Cfg, St};
use crate::cfg::{self, Sub};
use crate::ir::{Atom, Instr, Label, Op, Value, Var};
use anyhow::Result;
use rustc_hash::FxHashMap;

#[derive(Clone, PartialEq, Eq, Hash)]
struct ExprKey {
    op: Op,
    args: Vec<Value>,
}

type Es = FxHashMap<ExprKey, Var>;

pub(super) fn run(mut st: St) -> Result<St> {
    let linear = st.cfg.into_linear();
    let mut recorded: FxHashMap<Label, Es> = FxHashMap::default();
    if let Some((entry, _)) = linear.first() {
        recorded.insert(*entry, Es::default());
    }
    let mut sub = Sub::default();
    let mut out = Vec::with_capacity(linear.len());

    for (label, mut block) in linear {
        let es0 = recorded.get(&label).cloned().unwrap_or_default();
        let (instrs, es) = cse_block(std::mem::take(&mut block.instrs), es0, &mut sub);
        block.instrs = instrs;
        cfg::sub_last(&mut block.last, &sub);
        record_successors(&block, es, &mut recorded);
        out.push((label, block));
    }

    st.cfg = Cfg::Linear(out);
    Ok(st)
}

fn cse_block(instrs: Vec<Instr>, mut es: Es, sub: &mut Sub) -> (Vec<Instr>, Es) {
    let mut out = Vec::with_capacity(instrs.len());
    for mut instr in instrs {
        if matches!(instr.op, Op::Succeeded) {
            let original = instr.args.clone();
            cfg::sub_instr(&mut instr, sub);
            if instr.args == original {
                out.push(instr);
            } else {
                // The preceding instruction was eliminated; this check can
                // no longer fail.
                sub.insert(instr.dst, Value::lit_true());
            }
            continue;
        }
        cfg::sub_instr(&mut instr, sub);
        if cfg::clobbers_xregs(&instr) {
            es.clear();
            out.push(instr);
            continue;
        }
        match expr_key(&instr) {
            None => out.push(instr),
            Some(key) => match es.get(&key) {
                Some(src) => {
                    sub.insert(instr.dst, Value::Var(src.clone()));
                }
                None => {
                    es.insert(key, instr.dst.clone());
                    out.push(instr);
                }
            },
        }
    }
    (out, es)
}

/// Merge the outgoing expression map into each successor's record. The
/// failure edge of a fallible eliminated-candidate instruction must not see
/// the instruction's own value: it is only valid when the operation
/// succeeded.
fn record_successors(block: &crate::ir::Block, es: Es, recorded: &mut FxHashMap<Label, Es>) {
    let fallible_src = match block.instrs.as_slice() {
        [.., second_last, last]
            if matches!(last.op, Op::Succeeded)
                && last.args == [Value::Var(second_last.dst.clone())]
                && suitable(second_last) =>
        {
            Some(second_last.dst.clone())
        }
        _ => None,
    };
    match (&block.last, fallible_src) {
        (crate::ir::Last::Br { succ, fail, .. }, Some(src)) => {
            merge_into(*succ, es.clone(), recorded);
            let es_fail: Es = es.into_iter().filter(|(_, v)| *v != src).collect();
            merge_into(*fail, es_fail, recorded);
        }
        _ => {
            for succ in cfg::successors(block) {
                merge_into(succ, es.clone(), recorded);
            }
        }
    }
}

fn merge_into(label: Label, es: Es, recorded: &mut FxHashMap<Label, Es>) {
    match recorded.get_mut(&label) {
        None => {
            recorded.insert(label, es);
        }
        Some(prev) if prev.is_empty() => {}
        Some(prev) => {
            let merged: Es = es
                .into_iter()
                .filter(|(k, v)| prev.get(k) == Some(v))
                .collect();
            *prev = merged;
        }
    }
}

fn expr_key(instr: &Instr) -> Option<ExprKey> {
    if suitable(instr) {
        Some(ExprKey {
            op: instr.op.clone(),
            args: instr.args.clone(),
        })
    } else {
        None
    }
}

fn suitable(instr: &Instr) -> bool {
    match &instr.op {
        Op::GetHd | Op::GetTl | Op::PutList | Op::PutTuple => true,
        Op::Bif(name) => {
            let arity = instr.args.len();
            !(is_type_test(name, arity) || is_comp_op(name, arity) || is_bool_op(name, arity))
        }
        _ => false,
    }
}

fn is_type_test(name: &Atom, arity: usize) -> bool {
    matches!(
        (name.as_str(), arity),
        ("is_atom", 1)
            | ("is_binary", 1)
            | ("is_bitstring", 1)
            | ("is_boolean", 1)
            | ("is_float", 1)
            | ("is_function", 1)
            | ("is_function", 2)
            | ("is_integer", 1)
            | ("is_list", 1)
            | ("is_map", 1)
            | ("is_number", 1)
            | ("is_pid", 1)
            | ("is_port", 1)
            | ("is_reference", 1)
            | ("is_tuple", 1)
    )
}

fn is_comp_op(name: &Atom, arity: usize) -> bool {
    arity == 2
        && matches!(
            name.as_str(),
            "==" | "/=" | "=<" | "<" | ">=" | ">" | "=:=" | "=/="
        )
}

fn is_bool_op(name: &Atom, arity: usize) -> bool {
    matches!(
        (name.as_str(), arity),
        ("not", 1) | ("and", 2) | ("or", 2) | ("xor", 2)
    )
}
