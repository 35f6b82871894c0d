//! Unboxed float arithmetic.
//!
//! Arithmetic the type pass has marked `float_op` is rewritten into a
//! flush-protected region of float-register instructions:
//!
//! 1. `clearerror` on entry to the region.
//! 2. `put`/`convert` instructions load boxed operands into fresh float
//!    registers; the arithmetic itself becomes a `{float, Op}` writing a
//!    fresh register. Registers are reused when an operand is already
//!    loaded.
//! 3. On exit, a `checkerror` branches to the region's failure label if any
//!    operation signalled, followed by one `get` per operation result to box
//!    it back into the original destination variable.
//!
//! A `convert` of a runtime value can itself fail, so after the main rewrite
//! every `convert` is isolated at the end of its own block with a
//! `succeeded` branching to the failure label. A literal operand is
//! converted at compile time into a `put`; a literal that cannot be
//! converted keeps the runtime `convert` so the exception is raised exactly
//! as without the optimization.
//!
//! Blocks inside guards are left alone: a guard's failure semantics do not
//! tolerate the deferred error check. The non-guard blocks are
//! [`BADARG_BLOCK`] and every block starting with a `landingpad`.

use super::{Cfg, St};
use crate::cfg;
use crate::ir::{
    Block, FloatOp, Instr, Label, Last, Literal, Op, Value, Var, BADARG_BLOCK,
};
use anyhow::{bail, ensure, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Undefined,
    Cleared,
}

struct FloatReg {
    fr: Var,
    /// A copy register only mirrors an already-boxed operand; it needs no
    /// `get` at flush time.
    is_copy: bool,
}

struct Fs {
    phase: Phase,
    regs: BTreeMap<Var, FloatReg>,
    fail: Option<Label>,
    /// Renames of split/flushed block labels, applied to phi predecessor
    /// labels once the traversal is done.
    ren: FxHashMap<Label, Label>,
    non_guards: FxHashSet<Label>,
}

pub(super) fn run(mut st: St) -> Result<St> {
    let cfg = std::mem::replace(&mut st.cfg, Cfg::Linear(Vec::new()));
    let linear = cfg.into_linear();
    let mut fs = Fs {
        phase: Phase::Undefined,
        regs: BTreeMap::new(),
        fail: None,
        ren: FxHashMap::default(),
        non_guards: non_guard_blocks(&linear),
    };
    let preds = linear_predecessors(&linear);

    let mut out: Vec<(Label, Block)> = Vec::new();
    let mut iter = linear.into_iter().peekable();
    while let Some((label, block)) = iter.next() {
        let has_float = block.instrs.iter().any(|i| i.anno.float_op.is_some());
        let fail = block_fail(&block);
        let convertible = has_float
            && fail.is_some_and(|f| fs.non_guards.contains(&f));
        if !convertible {
            debug_assert_eq!(fs.phase, Phase::Undefined, "unflushed region at {label}");
            out.push((label, block));
            continue;
        }
        let fail = fail.unwrap();
        fs.fail = Some(fail);
        convert_block(label, block, fail, &mut fs, &mut st, &preds, &mut iter, &mut out)?;
    }
    ensure!(
        fs.phase == Phase::Undefined,
        "float region left unflushed at end of function"
    );

    for (_, block) in &mut out {
        rename_phi_labels(block, &fs.ren);
    }
    st.cfg = Cfg::Linear(out);
    Ok(st)
}

/// `BADARG_BLOCK` plus every block whose first instruction is a landingpad.
fn non_guard_blocks(linear: &[(Label, Block)]) -> FxHashSet<Label> {
    let mut set = FxHashSet::default();
    set.insert(BADARG_BLOCK);
    for (label, block) in linear {
        if matches!(block.instrs.first(), Some(i) if matches!(i.op, Op::Landingpad)) {
            set.insert(*label);
        }
    }
    set
}

fn linear_predecessors(linear: &[(Label, Block)]) -> FxHashMap<Label, Vec<Label>> {
    let mut preds: FxHashMap<Label, Vec<Label>> = FxHashMap::default();
    for (label, block) in linear {
        for succ in cfg::successors(block) {
            let list = preds.entry(succ).or_default();
            if !list.contains(label) {
                list.push(*label);
            }
        }
    }
    preds
}

/// The failure label of a block ending in the fallible `succeeded` + branch
/// shape.
fn block_fail(block: &Block) -> Option<Label> {
    let last_i = block.instrs.last()?;
    if !matches!(last_i.op, Op::Succeeded) {
        return None;
    }
    match &block.last {
        Last::Br { cond, fail, .. } if *cond == Value::Var(last_i.dst.clone()) => Some(*fail),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn convert_block(
    label: Label,
    mut block: Block,
    fail: Label,
    fs: &mut Fs,
    st: &mut St,
    preds: &FxHashMap<Label, Vec<Label>>,
    iter: &mut std::iter::Peekable<impl Iterator<Item = (Label, Block)>>,
    out: &mut Vec<(Label, Block)>,
) -> Result<()> {
    let instrs = std::mem::take(&mut block.instrs);
    let mut new_is: Vec<Instr> = Vec::with_capacity(instrs.len() * 2);
    let mut neutralized: Option<Label> = None;

    let mut idx = 0;
    while idx < instrs.len() {
        let instr = &instrs[idx];
        if instr.anno.float_op.is_none() {
            new_is.push(instr.clone());
            idx += 1;
            continue;
        }
        if fs.phase == Phase::Undefined {
            let dst = st.new_var("@fr_clear");
            new_is.push(Instr::new(dst, Op::Float(FloatOp::ClearError), vec![]));
            fs.phase = Phase::Cleared;
        }
        let fargs = load_operands(instr, &mut new_is, fs, st);
        let Op::Bif(name) = &instr.op else {
            bail!("float_op annotation on non-BIF instruction");
        };
        let fr_dst = st.new_var("@fr");
        new_is.push(Instr::new(
            fr_dst.clone(),
            Op::Float(FloatOp::Arith(name.clone())),
            fargs,
        ));
        fs.regs.insert(
            instr.dst.clone(),
            FloatReg {
                fr: fr_dst,
                is_copy: false,
            },
        );
        // The arithmetic itself can no longer fail; its success check is
        // subsumed by the region's checkerror.
        if let Some(next) = instrs.get(idx + 1) {
            if matches!(next.op, Op::Succeeded)
                && next.args == [Value::Var(instr.dst.clone())]
            {
                let is_branch_bool = matches!(
                    &block.last,
                    Last::Br { cond, .. } if *cond == Value::Var(next.dst.clone())
                );
                if idx + 2 == instrs.len() && is_branch_bool {
                    if let Last::Br { succ, .. } = &block.last {
                        neutralized = Some(*succ);
                    }
                } else {
                    new_is.push(Instr::new(
                        next.dst.clone(),
                        Op::Succeeded,
                        vec![Value::lit_true()],
                    ));
                }
                idx += 1;
            }
        }
        idx += 1;
    }
    if let Some(succ) = neutralized {
        block.last = Last::goto(succ);
    }

    // Isolate every convert at the end of its own block.
    let segments = split_on_converts(new_is);
    let mut labels = vec![label];
    for _ in 1..segments.len() {
        labels.push(st.new_label());
    }

    let n = segments.len();
    let mut built: Vec<(Label, Block)> = Vec::with_capacity(n + 2);
    for (i, mut segment) in segments.into_iter().enumerate() {
        if i + 1 < n {
            let conv_dst = segment
                .last()
                .map(|instr| instr.dst.clone())
                .expect("convert segments are never empty");
            let bool_var = st.new_var("@ssa_bool");
            segment.push(Instr::new(
                bool_var.clone(),
                Op::Succeeded,
                vec![Value::Var(conv_dst)],
            ));
            built.push((
                labels[i],
                Block::new(segment, Last::br(Value::Var(bool_var), labels[i + 1], fail)),
            ));
        } else {
            built.push((labels[i], Block::new(segment, block.last.clone())));
        }
    }

    let defer = match iter.peek() {
        Some((next_label, next_block)) => {
            let fall = match &built.last().unwrap().1.last {
                Last::Br { cond, succ, .. } if cond.is_lit_true() => Some(*succ),
                _ => None,
            };
            fall == Some(*next_label)
                && preds.get(next_label).is_some_and(|p| p == &[label])
                && matches!(next_block.instrs.first(), Some(i) if i.anno.float_op.is_some())
                && block_fail(next_block) == fs.fail
        }
        None => false,
    };

    if defer {
        if n > 1 {
            fs.ren.insert(label, *labels.last().unwrap());
        }
        out.extend(built);
        return Ok(());
    }

    // Flush: splice the checkerror and the register materializations on the
    // fall-through edge after the last block of the region.
    let chk_label = st.new_label();
    let get_label = st.new_label();
    let final_last = std::mem::replace(
        &mut built.last_mut().unwrap().1.last,
        Last::goto(chk_label),
    );
    let bool_var = st.new_var("@ssa_bool");
    let chk_block = Block::new(
        vec![Instr::new(
            bool_var.clone(),
            Op::Float(FloatOp::CheckError),
            vec![],
        )],
        Last::br(Value::Var(bool_var), get_label, fail),
    );
    let gets: Vec<Instr> = fs
        .regs
        .iter()
        .filter(|(_, reg)| !reg.is_copy)
        .map(|(var, reg)| {
            Instr::new(
                var.clone(),
                Op::Float(FloatOp::Get),
                vec![Value::Var(reg.fr.clone())],
            )
        })
        .collect();
    let get_block = Block::new(gets, final_last);

    fs.ren.insert(label, get_label);
    out.extend(built);
    out.push((chk_label, chk_block));
    out.push((get_label, get_block));

    fs.phase = Phase::Undefined;
    fs.regs.clear();
    fs.fail = None;
    Ok(())
}

/// Load the operands of a float-annotated instruction into float registers,
/// reusing registers for operands already loaded.
fn load_operands(instr: &Instr, new_is: &mut Vec<Instr>, fs: &mut Fs, st: &mut St) -> Vec<Value> {
    let mut fargs = Vec::with_capacity(instr.args.len());
    for arg in &instr.args {
        match arg {
            Value::Var(v) => {
                if let Some(reg) = fs.regs.get(v) {
                    fargs.push(Value::Var(reg.fr.clone()));
                    continue;
                }
                let fr = st.new_var("@fr");
                new_is.push(Instr::new(
                    fr.clone(),
                    Op::Float(FloatOp::Convert),
                    vec![Value::Var(v.clone())],
                ));
                fs.regs.insert(
                    v.clone(),
                    FloatReg {
                        fr: fr.clone(),
                        is_copy: true,
                    },
                );
                fargs.push(Value::Var(fr));
            }
            Value::Lit(lit) => {
                let fr = st.new_var("@fr");
                let load = match lit.to_float() {
                    Some(f) => Instr::new(
                        fr.clone(),
                        Op::Float(FloatOp::Put),
                        vec![Value::Lit(Literal::Float(f))],
                    ),
                    // Not convertible: keep the runtime convert so the
                    // exception is raised exactly as unoptimized code would.
                    None => Instr::new(
                        fr.clone(),
                        Op::Float(FloatOp::Convert),
                        vec![Value::Lit(lit.clone())],
                    ),
                };
                new_is.push(load);
                fargs.push(Value::Var(fr));
            }
            Value::Remote(_) => fargs.push(arg.clone()),
        }
    }
    fargs
}

/// Split an instruction stream so that every `convert` ends a segment.
fn split_on_converts(instrs: Vec<Instr>) -> Vec<Vec<Instr>> {
    let mut segments = vec![Vec::new()];
    for instr in instrs {
        let is_convert = matches!(instr.op, Op::Float(FloatOp::Convert));
        segments.last_mut().unwrap().push(instr);
        if is_convert {
            segments.push(Vec::new());
        }
    }
    segments
}

fn rename_phi_labels(block: &mut Block, ren: &FxHashMap<Label, Label>) {
    if ren.is_empty() {
        return;
    }
    for instr in &mut block.instrs {
        let Some(pairs) = instr.phi_pairs_mut() else {
            break;
        };
        for (_, from) in pairs {
            if let Some(to) = ren.get(from) {
                *from = *to;
            }
        }
    }
}
