//! Binary matching optimizations.
//!
//! **Skip rewrite** (`run`): a `bs_match` whose resulting context is never
//! fed to a `bs_extract` does not need the matched value. The match is
//! rewritten to the skip form, which only advances the position. Matches of
//! literal strings are never rewritten.
//!
//! **Shortcut** (`run_shortcut`): each match context has a known cumulative
//! bit offset from its start of match. When a match fails into a
//! `bs_test_tail` block whose remaining-bits check is already doomed by the
//! offset, the failure edge is redirected past it to the test's own failure
//! label.

use super::{Cfg, St};
use crate::ir::{Block, Instr, Label, Last, Literal, Op, Value, Var};
use anyhow::Result;
use rustc_hash::{FxHashMap, FxHashSet};

// ── Skip rewrite ─────────────────────────────────────────────────────────────

pub(super) fn run(mut st: St) -> Result<St> {
    let mut linear = st.cfg.into_linear();
    let extracted = extracted_contexts(&linear);
    for (_, block) in &mut linear {
        for instr in &mut block.instrs {
            skip_match(instr, &extracted);
        }
    }
    st.cfg = Cfg::Linear(linear);
    Ok(st)
}

/// Context variables consumed by some `bs_extract`.
fn extracted_contexts(linear: &[(Label, Block)]) -> FxHashSet<Var> {
    let mut set = FxHashSet::default();
    for (_, block) in linear {
        for instr in &block.instrs {
            if matches!(instr.op, Op::BsExtract) {
                if let Some(Value::Var(ctx)) = instr.args.first() {
                    set.insert(ctx.clone());
                }
            }
        }
    }
    set
}

fn skip_match(instr: &mut Instr, extracted: &FxHashSet<Var>) {
    if !matches!(instr.op, Op::BsMatch) || extracted.contains(&instr.dst) {
        return;
    }
    let [Value::Lit(Literal::Atom(ty)), ctx, rest @ ..] = instr.args.as_slice() else {
        return;
    };
    if ty == "string" || ty == "skip" {
        return;
    }
    let mut args = Vec::with_capacity(instr.args.len() + 1);
    args.push(Value::Lit(Literal::atom("skip")));
    args.push(ctx.clone());
    args.push(Value::Lit(Literal::Atom(ty.clone())));
    args.extend(rest.iter().cloned());
    instr.args = args;
}

// ── Shortcut ─────────────────────────────────────────────────────────────────

pub(super) fn run_shortcut(mut st: St) -> Result<St> {
    let mut linear = st.cfg.into_linear();
    let (positions, tail_tests) = match_positions(&linear);
    if !tail_tests.is_empty() {
        for (_, block) in &mut linear {
            shortcut_block(block, &positions, &tail_tests);
        }
    }
    st.cfg = Cfg::Linear(linear);
    Ok(st)
}

/// Accumulated bit offsets per context variable, and for each block holding
/// a lone `bs_test_tail` the total bits it requires plus its failure label.
fn match_positions(
    linear: &[(Label, Block)],
) -> (FxHashMap<Var, u64>, FxHashMap<Label, (u64, Label)>) {
    let mut positions: FxHashMap<Var, u64> = FxHashMap::default();
    let mut tail_tests: FxHashMap<Label, (u64, Label)> = FxHashMap::default();
    for (label, block) in linear {
        for instr in &block.instrs {
            match instr.op {
                Op::BsStartMatch => {
                    positions.insert(instr.dst.clone(), 0);
                }
                Op::BsMatch => {
                    let Some(prev_ctx) = match_context(instr) else {
                        continue;
                    };
                    let Some(&base) = positions.get(prev_ctx) else {
                        continue;
                    };
                    positions.insert(instr.dst.clone(), base + match_bits(instr));
                }
                _ => {}
            }
        }
        if let [test] = block.instrs.as_slice() {
            if let (Op::BsTestTail, Last::Br { cond, fail, .. }) = (&test.op, &block.last) {
                if *cond == Value::Var(test.dst.clone()) {
                    let ctx_bits = test
                        .args
                        .first()
                        .and_then(Value::as_var)
                        .and_then(|v| positions.get(v).copied());
                    let tail_bits = test
                        .args
                        .get(1)
                        .and_then(Value::as_lit)
                        .and_then(Literal::as_int);
                    if let (Some(base), Some(bits)) = (ctx_bits, tail_bits) {
                        tail_tests.insert(*label, (base + bits as u64, *fail));
                    }
                }
            }
        }
    }
    (positions, tail_tests)
}

/// The previous context operand of a match, in either argument form.
fn match_context(instr: &Instr) -> Option<&Var> {
    instr.args.get(1).and_then(Value::as_var)
}

/// Bits consumed by one match step: literal string sizes, the UTF constants,
/// or `size * unit` when both are literal integers. Unknown sizes consume
/// nothing, which keeps the shortcut conservative.
fn match_bits(instr: &Instr) -> u64 {
    let ty = match instr.args.first() {
        Some(Value::Lit(Literal::Atom(ty))) => ty.as_str(),
        _ => return 0,
    };
    // The skip form carries the real type at index 2 and shifts the size
    // arguments one to the right.
    let (ty, size_idx) = if ty == "skip" {
        match instr.args.get(2) {
            Some(Value::Lit(Literal::Atom(real))) => (real.as_str(), 4),
            _ => return 0,
        }
    } else {
        (ty, 3)
    };
    match ty {
        "string" => instr
            .args
            .last()
            .and_then(Value::as_lit)
            .and_then(Literal::bit_size)
            .unwrap_or(0),
        "utf8" => 8,
        "utf16" => 16,
        "utf32" => 32,
        _ => {
            let size = instr.args.get(size_idx).and_then(Value::as_lit);
            let unit = instr.args.get(size_idx + 1).and_then(Value::as_lit);
            match (size.and_then(Literal::as_int), unit.and_then(Literal::as_int)) {
                (Some(size), Some(unit)) if size >= 0 && unit >= 0 => {
                    size as u64 * unit as u64
                }
                _ => 0,
            }
        }
    }
}

/// Redirect the failure edge of a doomed match past a tail test that cannot
/// succeed.
fn shortcut_block(
    block: &mut Block,
    positions: &FxHashMap<Var, u64>,
    tail_tests: &FxHashMap<Label, (u64, Label)>,
) {
    let [matched, succ_i] = block.instrs.as_slice() else {
        return;
    };
    if !matches!(matched.op, Op::BsMatch)
        || !matches!(succ_i.op, Op::Succeeded)
        || succ_i.args != [Value::Var(matched.dst.clone())]
    {
        return;
    }
    let Some(old_ctx) = match_context(matched) else {
        return;
    };
    let Some(&bits) = positions.get(old_ctx) else {
        return;
    };
    let Last::Br { cond, fail, .. } = &mut block.last else {
        return;
    };
    if *cond != Value::Var(succ_i.dst.clone()) {
        return;
    }
    if let Some(&(tail_bits, ultimate_fail)) = tail_tests.get(fail) {
        if bits > tail_bits {
            *fail = ultimate_fail;
        }
    }
}
