//! CFG utilities shared by the optimizer passes.
//!
//! Provides the graph-level operations every pass builds on: successor and
//! predecessor maps, linearization, reverse-postorder, dominators,
//! used-variable collection, block splitting, phi-label rewriting, and the
//! caller-save clobber classification.
//!
//! Dominator sets are sorted `Vec<Label>` with linear merge operations; set
//! arithmetic on them is a hot path in the sink pass.

use crate::ir::{Block, BlockMap, Instr, Label, Last, Literal, Op, Value, Var, ENTRY_BLOCK};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeSet, VecDeque};

/// Variable-to-operand substitution applied to downstream instructions.
pub type Sub = FxHashMap<Var, Value>;

// ── Value traversal ──────────────────────────────────────────────────────────

fn visit_value<'a>(value: &'a Value, f: &mut impl FnMut(&'a Value)) {
    match value {
        Value::Remote(r) => {
            visit_value(&r.module, f);
            visit_value(&r.function, f);
        }
        _ => f(value),
    }
}

fn visit_value_mut(value: &mut Value, f: &mut impl FnMut(&mut Value)) {
    match value {
        Value::Remote(r) => {
            visit_value_mut(&mut r.module, f);
            visit_value_mut(&mut r.function, f);
        }
        _ => f(value),
    }
}

/// Calls `f` with every operand of `instr`, including phi argument values.
/// Remote operands are traversed into; `f` sees only `Var`/`Lit` nodes.
pub fn for_each_value<'a>(instr: &'a Instr, f: &mut impl FnMut(&'a Value)) {
    if let Op::Phi(pairs) = &instr.op {
        for (value, _) in pairs {
            visit_value(value, f);
        }
    }
    for arg in &instr.args {
        visit_value(arg, f);
    }
}

/// Mutable counterpart of [`for_each_value`]. For phis only the value
/// component of each `(value, predecessor)` pair is visited.
pub fn for_each_value_mut(instr: &mut Instr, f: &mut impl FnMut(&mut Value)) {
    if let Op::Phi(pairs) = &mut instr.op {
        for (value, _) in pairs {
            visit_value_mut(value, f);
        }
    }
    for arg in &mut instr.args {
        visit_value_mut(arg, f);
    }
}

/// Calls `f` with every operand of a terminator.
pub fn for_each_value_in_last<'a>(last: &'a Last, f: &mut impl FnMut(&'a Value)) {
    match last {
        Last::Br { cond, .. } => visit_value(cond, f),
        Last::Switch { arg, .. } => visit_value(arg, f),
        Last::Ret { arg } => visit_value(arg, f),
    }
}

pub fn for_each_value_in_last_mut(last: &mut Last, f: &mut impl FnMut(&mut Value)) {
    match last {
        Last::Br { cond, .. } => visit_value_mut(cond, f),
        Last::Switch { arg, .. } => visit_value_mut(arg, f),
        Last::Ret { arg } => visit_value_mut(arg, f),
    }
}

// ── Substitution ─────────────────────────────────────────────────────────────

fn sub_one(value: &mut Value, sub: &Sub) {
    if let Value::Var(v) = value {
        if let Some(replacement) = sub.get(v) {
            *value = replacement.clone();
        }
    }
}

/// Applies `sub` to every operand of `instr`.
pub fn sub_instr(instr: &mut Instr, sub: &Sub) {
    if sub.is_empty() {
        return;
    }
    for_each_value_mut(instr, &mut |v| sub_one(v, sub));
}

/// Applies `sub` to every operand of `last`.
pub fn sub_last(last: &mut Last, sub: &Sub) {
    if sub.is_empty() {
        return;
    }
    for_each_value_in_last_mut(last, &mut |v| sub_one(v, sub));
}

// ── Used variables ───────────────────────────────────────────────────────────

/// Sorted, deduplicated free variables of an instruction.
pub fn used(instr: &Instr) -> Vec<Var> {
    let mut vars = Vec::new();
    for_each_value(instr, &mut |v| {
        if let Value::Var(var) = v {
            vars.push(var.clone());
        }
    });
    vars.sort();
    vars.dedup();
    vars
}

/// Sorted, deduplicated free variables of a terminator.
pub fn used_in_last(last: &Last) -> Vec<Var> {
    let mut vars = Vec::new();
    for_each_value_in_last(last, &mut |v| {
        if let Value::Var(var) = v {
            vars.push(var.clone());
        }
    });
    vars.sort();
    vars.dedup();
    vars
}

/// Every variable read anywhere in a block, instructions and terminator.
pub fn block_used(block: &Block) -> BTreeSet<Var> {
    let mut vars = BTreeSet::new();
    for instr in &block.instrs {
        for_each_value(instr, &mut |v| {
            if let Value::Var(var) = v {
                vars.insert(var.clone());
            }
        });
    }
    for_each_value_in_last(&block.last, &mut |v| {
        if let Value::Var(var) = v {
            vars.insert(var.clone());
        }
    });
    vars
}

// ── Successors / predecessors ────────────────────────────────────────────────

/// Successor labels of a block, from its terminator.
///
/// A branch on a literal condition has a single successor. For a conditional
/// branch the failure label comes first; linearization relies on this to keep
/// success chains contiguous. Labels may repeat (e.g. a switch case equal to
/// the default).
pub fn successors(block: &Block) -> Vec<Label> {
    match &block.last {
        Last::Br { cond, succ, fail } => {
            if let Value::Lit(lit) = cond {
                if lit.is_true() {
                    return vec![*succ];
                }
                if matches!(lit, Literal::Atom(a) if a == "false") {
                    return vec![*fail];
                }
            }
            vec![*fail, *succ]
        }
        Last::Switch {
            cases, default, ..
        } => std::iter::once(*default)
            .chain(cases.iter().map(|(_, l)| *l))
            .collect(),
        Last::Ret { .. } => vec![],
    }
}

/// Map from each block to its distinct predecessors, sorted.
pub fn predecessors(blocks: &BlockMap) -> FxHashMap<Label, Vec<Label>> {
    let mut preds: FxHashMap<Label, Vec<Label>> = FxHashMap::default();
    for label in blocks.keys() {
        preds.entry(*label).or_default();
    }
    for (label, block) in blocks {
        for succ in successors(block) {
            preds.entry(succ).or_default().push(*label);
        }
    }
    for list in preds.values_mut() {
        list.sort_unstable();
        list.dedup();
    }
    preds
}

// ── Linearization / reverse-postorder ────────────────────────────────────────

fn postorder(
    label: Label,
    blocks: &BlockMap,
    seen: &mut FxHashSet<Label>,
    out: &mut Vec<Label>,
) {
    if !seen.insert(label) {
        return;
    }
    if let Some(block) = blocks.get(&label) {
        for succ in successors(block) {
            postorder(succ, blocks, seen, out);
        }
        out.push(label);
    }
}

/// Reverse-postorder of the reachable blocks, entry first.
pub fn rpo(blocks: &BlockMap) -> Vec<Label> {
    let mut seen = FxHashSet::default();
    let mut order = Vec::with_capacity(blocks.len());
    postorder(ENTRY_BLOCK, blocks, &mut seen, &mut order);
    order.reverse();
    order
}

/// Topological linear order of the reachable blocks, entry first.
///
/// Unreachable blocks are dropped; phi arguments flowing in from dropped
/// predecessors are pruned so the phi invariant holds on the result.
pub fn linearize(blocks: &BlockMap) -> Vec<(Label, Block)> {
    let order = rpo(blocks);
    let reachable: FxHashSet<Label> = order.iter().copied().collect();
    order
        .into_iter()
        .map(|label| {
            let mut block = blocks[&label].clone();
            for instr in &mut block.instrs {
                if let Some(pairs) = instr.phi_pairs_mut() {
                    pairs.retain(|(_, from)| reachable.contains(from));
                } else {
                    break;
                }
            }
            (label, block)
        })
        .collect()
}

// ── Sorted label-set arithmetic ──────────────────────────────────────────────

/// Intersection of two sorted label vectors, linear merge.
pub fn intersect_sorted(a: &[Label], b: &[Label]) -> Vec<Label> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// `a \ b` for sorted label vectors, linear merge.
pub fn subtract_sorted(a: &[Label], b: &[Label]) -> Vec<Label> {
    let mut out = Vec::with_capacity(a.len());
    let mut j = 0;
    for &x in a {
        while j < b.len() && b[j] < x {
            j += 1;
        }
        if j >= b.len() || b[j] != x {
            out.push(x);
        }
    }
    out
}

fn insert_sorted(set: &mut Vec<Label>, label: Label) {
    if let Err(pos) = set.binary_search(&label) {
        set.insert(pos, label);
    }
}

// ── Dominators ───────────────────────────────────────────────────────────────

/// Dominator sets for every reachable block: label to the sorted set of its
/// dominators, self included.
pub fn dominators(blocks: &BlockMap) -> FxHashMap<Label, Vec<Label>> {
    let order = rpo(blocks);
    let preds = predecessors(blocks);
    let mut doms: FxHashMap<Label, Vec<Label>> = FxHashMap::default();
    doms.insert(ENTRY_BLOCK, vec![ENTRY_BLOCK]);
    loop {
        let mut changed = false;
        for &label in order.iter().skip(1) {
            let mut meet: Option<Vec<Label>> = None;
            for pred in preds.get(&label).into_iter().flatten() {
                // Predecessors not yet visited (back edges on the first
                // sweep) contribute nothing to the meet.
                if let Some(dom) = doms.get(pred) {
                    meet = Some(match meet {
                        None => dom.clone(),
                        Some(cur) => intersect_sorted(&cur, dom),
                    });
                }
            }
            let mut new = meet.unwrap_or_default();
            insert_sorted(&mut new, label);
            if doms.get(&label) != Some(&new) {
                doms.insert(label, new);
                changed = true;
            }
        }
        if !changed {
            return doms;
        }
    }
}

// ── Phi label rewriting ──────────────────────────────────────────────────────

/// In each listed successor block, rewrite phi predecessor labels equal to
/// `from` into `to`.
pub fn update_phi_labels(succs: &[Label], from: Label, to: Label, blocks: &mut BlockMap) {
    for succ in succs {
        let Some(block) = blocks.get_mut(succ) else {
            continue;
        };
        for instr in &mut block.instrs {
            match instr.phi_pairs_mut() {
                Some(pairs) => {
                    for (_, label) in pairs {
                        if *label == from {
                            *label = to;
                        }
                    }
                }
                None => break,
            }
        }
    }
}

// ── Block splitting ──────────────────────────────────────────────────────────

/// Split every block so that each instruction matching `pred` (other than a
/// block's first instruction) starts a fresh block. Fresh labels are minted
/// from `count`; phi predecessor labels in successors are kept consistent.
pub fn split_blocks<P>(pred: P, mut blocks: BlockMap, mut count: u32) -> (BlockMap, u32)
where
    P: Fn(&Instr) -> bool,
{
    let mut work: VecDeque<Label> = rpo(&blocks).into();
    while let Some(label) = work.pop_front() {
        let block = &blocks[&label];
        let split_at = block
            .instrs
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, i)| pred(i))
            .map(|(idx, _)| idx);
        if let Some(idx) = split_at {
            let new_label = Label(count);
            count += 1;
            let block = blocks.get_mut(&label).unwrap();
            let after = block.instrs.split_off(idx);
            let old_last = std::mem::replace(&mut block.last, Last::goto(new_label));
            let new_block = Block::new(after, old_last);
            let succs = successors(&new_block);
            blocks.insert(new_label, new_block);
            update_phi_labels(&succs, label, new_label, &mut blocks);
            work.push_front(new_label);
        }
    }
    (blocks, count)
}

// ── Register clobbering ──────────────────────────────────────────────────────

/// Whether an instruction may clobber the caller-save x registers. Such
/// instructions bound any within-frame value reuse.
pub fn clobbers_xregs(instr: &Instr) -> bool {
    matches!(instr.op, Op::Call | Op::MakeFun)
}

// ── Tests ────────────────────────────────────────────────────────────────────
