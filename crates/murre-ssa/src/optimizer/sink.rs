//! Late placement of `get_tuple_element`.
//!
//! Tuple reads are emitted eagerly by the front end, often far above their
//! only uses. Moving each read down to the deepest block that still
//! dominates every use shrinks the live range and, with it, the stack
//! frame.
//!
//! Placement avoids blocks that must start with a specific instruction
//! (`bs_extract`, `bs_put`, float ops, `landingpad`, `peek_message`,
//! `wait_timeout`) and the whole body of every receive loop, found by
//! walking predecessors backwards from `remove_message`/`recv_next` until
//! `peek_message` boundaries.

use super::{Cfg, St};
use crate::cfg;
use crate::ir::{Block, BlockMap, Instr, Label, Op, Value, Var};
use anyhow::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

pub(super) fn run(mut st: St) -> Result<St> {
    let mut blocks = st.cfg.into_map();
    let linear = cfg::linearize(&blocks);

    let defs = def_blocks(&linear);
    let uses = used_blocks(&linear, &defs);
    let unsuitable = unsuitable(&linear, &blocks);

    let mut dom = cfg::dominators(&blocks);
    if !unsuitable.is_empty() {
        let blocked: Vec<Label> = {
            let mut v: Vec<Label> = unsuitable.iter().copied().collect();
            v.sort_unstable();
            v
        };
        for chain in dom.values_mut() {
            *chain = cfg::subtract_sorted(chain, &blocked);
        }
    }

    for (var, use_list) in &uses {
        let def_block = defs[var];
        let candidates = common_dom(use_list, def_block, &dom);
        if candidates.is_empty() {
            continue;
        }
        let target = most_dominated(&candidates, &dom);
        move_def(var, def_block, target, &mut blocks);
    }

    st.cfg = Cfg::Map(blocks);
    Ok(st)
}

/// Defining block of every `get_tuple_element` destination.
fn def_blocks(linear: &[(Label, Block)]) -> FxHashMap<Var, Label> {
    let mut defs = FxHashMap::default();
    for (label, block) in linear {
        for instr in &block.instrs {
            if matches!(instr.op, Op::GetTupleElement) {
                defs.insert(instr.dst.clone(), *label);
            }
        }
    }
    defs
}

/// For each tracked variable, the sorted list of blocks using it. Ordered
/// iteration keeps relocation deterministic.
fn used_blocks(
    linear: &[(Label, Block)],
    defs: &FxHashMap<Var, Label>,
) -> BTreeMap<Var, Vec<Label>> {
    let mut uses: BTreeMap<Var, Vec<Label>> = BTreeMap::new();
    for (label, block) in linear {
        for var in cfg::block_used(block) {
            if defs.contains_key(&var) {
                uses.entry(var).or_default().push(*label);
            }
        }
    }
    for list in uses.values_mut() {
        list.sort_unstable();
        list.dedup();
    }
    uses
}

/// Blocks a definition must not move into.
fn unsuitable(linear: &[(Label, Block)], blocks: &BlockMap) -> FxHashSet<Label> {
    let mut set = FxHashSet::default();
    for (label, block) in linear {
        if let Some(first) = block.instrs.first() {
            let pinned = matches!(
                first.op,
                Op::BsExtract
                    | Op::BsPut
                    | Op::Float(_)
                    | Op::Landingpad
                    | Op::PeekMessage
                    | Op::WaitTimeout
            );
            if pinned {
                set.insert(*label);
            }
        }
    }
    receive_loop_bodies(linear, blocks, &mut set);
    set
}

/// Every block backwards-reachable from a `remove_message` or `recv_next`
/// block, stopping at `peek_message` blocks: the body of a receive loop.
fn receive_loop_bodies(
    linear: &[(Label, Block)],
    blocks: &BlockMap,
    set: &mut FxHashSet<Label>,
) {
    let starts: Vec<Label> = linear
        .iter()
        .filter(|(_, block)| {
            matches!(
                block.instrs.first(),
                Some(i) if matches!(i.op, Op::RemoveMessage | Op::RecvNext)
            )
        })
        .map(|(label, _)| *label)
        .collect();
    if starts.is_empty() {
        return;
    }
    let preds = cfg::predecessors(blocks);
    let mut work: Vec<Label> = starts;
    let mut visited = FxHashSet::default();
    while let Some(label) = work.pop() {
        for pred in preds.get(&label).into_iter().flatten() {
            let starts_with_peek = matches!(
                blocks.get(pred).and_then(|b| b.instrs.first()),
                Some(i) if matches!(i.op, Op::PeekMessage)
            );
            if starts_with_peek {
                continue;
            }
            if visited.insert(*pred) {
                set.insert(*pred);
                work.push(*pred);
            }
        }
    }
}

/// `(⋂ dom(use)) \ dom(def)`: blocks below the definition dominating every
/// use.
fn common_dom(
    use_list: &[Label],
    def_block: Label,
    dom: &FxHashMap<Label, Vec<Label>>,
) -> Vec<Label> {
    let empty: Vec<Label> = Vec::new();
    let def_dom = dom.get(&def_block).unwrap_or(&empty);
    let mut acc: Option<Vec<Label>> = None;
    for use_block in use_list {
        let use_dom = dom.get(use_block).unwrap_or(&empty);
        acc = Some(match acc {
            None => cfg::subtract_sorted(use_dom, def_dom),
            Some(cur) => cfg::intersect_sorted(&cur, use_dom),
        });
        if matches!(&acc, Some(v) if v.is_empty()) {
            return Vec::new();
        }
    }
    acc.unwrap_or_default()
}

/// The candidate dominated by all the others: the deepest in the dominator
/// tree.
fn most_dominated(candidates: &[Label], dom: &FxHashMap<Label, Vec<Label>>) -> Label {
    let mut best = candidates[0];
    for &label in &candidates[1..] {
        let best_dom = &dom[&best];
        if !best_dom.contains(&label) {
            best = label;
        }
    }
    best
}

/// Physically relocate the definition of `var`. If no safe insertion point
/// exists in the target block, the CFG is left untouched for this variable.
fn move_def(var: &Var, from: Label, to: Label, blocks: &mut BlockMap) {
    if from == to {
        return;
    }
    let source = blocks.get_mut(&from).unwrap();
    let idx = source
        .instrs
        .iter()
        .position(|i| &i.dst == var)
        .expect("definition recorded for this block");
    let def = source.instrs.remove(idx);
    let target = blocks.get_mut(&to).unwrap();
    match insert_def(var, def, &mut target.instrs) {
        Ok(()) => {}
        Err(def) => {
            // not possible: restore the original position.
            blocks.get_mut(&from).unwrap().instrs.insert(idx, def);
        }
    }
}

/// Scan from the top of the target block for the insertion point:
/// - a phi using the variable makes the move impossible;
/// - `call`, `catch_end`, `set_tuple_element` and `timeout` are stepped
///   over unless they use the variable (then the definition goes right
///   before them);
/// - an instruction paired with its `succeeded` keeps the pair intact;
/// - anything else accepts the definition right before it.
fn insert_def(var: &Var, def: Instr, instrs: &mut Vec<Instr>) -> Result<(), Instr> {
    let mut at = None;
    for (idx, instr) in instrs.iter().enumerate() {
        if instr.is_phi() {
            if cfg::used(instr).contains(var) {
                return Err(def);
            }
            continue;
        }
        let step_beyond = matches!(
            instr.op,
            Op::Call | Op::CatchEnd | Op::SetTupleElement | Op::Timeout
        );
        let next_is_succ = matches!(
            instrs.get(idx + 1),
            Some(next) if matches!(next.op, Op::Succeeded)
                && next.args == [Value::Var(instr.dst.clone())]
        );
        if step_beyond && !next_is_succ {
            if cfg::used(instr).contains(var) {
                at = Some(idx);
                break;
            }
            continue;
        }
        at = Some(idx);
        break;
    }
    instrs.insert(at.unwrap_or(instrs.len()), def);
    Ok(())
}
