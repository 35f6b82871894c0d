//! Liveness-driven dead code elimination.
//!
//! Classic backward data flow over the linear CFG in reverse. A block's
//! live-out is the union of its successors' live-ins, where an edge into a
//! block with phis contributes the phi arguments for that edge only.
//!
//! Inside a block, instructions are visited bottom-up:
//! - a phi with a dead destination is dropped;
//! - a fallible instruction paired with its `succeeded` survives if either
//!   destination is live; when both are dead, the instruction is offered a
//!   cheaper replacement (`get_map_element` becomes `has_map_field`, bound
//!   to the `succeeded` destination) and otherwise dropped when pure;
//! - any other instruction with a dead destination is dropped when pure.

use super::{Cfg, St};
use crate::cfg;
use crate::ir::{Block, FloatOp, Instr, Label, Op, Value, Var};
use anyhow::Result;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

type LiveSet = BTreeSet<Var>;

#[derive(PartialEq, Eq, Hash)]
enum LiveKey {
    Block(Label),
    /// Live-in specific to one edge: `(block, predecessor)`.
    Edge(Label, Label),
}

pub(super) fn run(mut st: St) -> Result<St> {
    let linear = st.cfg.into_linear();
    let mut live_map: FxHashMap<LiveKey, LiveSet> = FxHashMap::default();
    let mut out_rev: Vec<(Label, Block)> = Vec::with_capacity(linear.len());

    for (label, mut block) in linear.into_iter().rev() {
        let mut live = LiveSet::new();
        for succ in cfg::successors(&block) {
            let set = live_map
                .get(&LiveKey::Edge(succ, label))
                .or_else(|| live_map.get(&LiveKey::Block(succ)));
            if let Some(set) = set {
                live.extend(set.iter().cloned());
            }
        }
        for var in cfg::used_in_last(&block.last) {
            live.insert(var);
        }

        let instrs = std::mem::take(&mut block.instrs);
        let phi_count = instrs.iter().take_while(|i| i.is_phi()).count();
        let mut phis: Vec<Instr> = instrs[..phi_count].to_vec();
        let body = instrs[phi_count..].to_vec();

        block.instrs = live_opt_body(body, &mut live);

        phis.retain(|phi| live.contains(&phi.dst));
        let mut base = live.clone();
        for phi in &phis {
            base.remove(&phi.dst);
        }
        if phis.is_empty() {
            live_map.insert(LiveKey::Block(label), base);
        } else {
            let preds: BTreeSet<Label> = phis
                .iter()
                .flat_map(|phi| phi.phi_pairs().unwrap().iter().map(|(_, from)| *from))
                .collect();
            for pred in preds {
                let mut edge = base.clone();
                for phi in &phis {
                    for (value, from) in phi.phi_pairs().unwrap() {
                        if *from == pred {
                            if let Value::Var(v) = value {
                                edge.insert(v.clone());
                            }
                        }
                    }
                }
                live_map.insert(LiveKey::Edge(label, pred), edge);
            }
            live_map.insert(LiveKey::Block(label), base);
        }

        let mut full = phis;
        full.append(&mut block.instrs);
        block.instrs = full;
        out_rev.push((label, block));
    }

    out_rev.reverse();
    st.cfg = Cfg::Linear(out_rev);
    Ok(st)
}

fn live_opt_body(mut body: Vec<Instr>, live: &mut LiveSet) -> Vec<Instr> {
    let mut kept_rev: Vec<Instr> = Vec::with_capacity(body.len());
    while let Some(instr) = body.pop() {
        // A `succeeded` paired with the instruction before it is handled as
        // a unit.
        let paired = matches!(instr.op, Op::Succeeded)
            && matches!(
                (body.last(), instr.args.as_slice()),
                (Some(prev), [Value::Var(v)]) if prev.dst == *v
            );
        if paired {
            let main = body.pop().unwrap();
            let main_live = live.contains(&main.dst);
            let succ_live = live.contains(&instr.dst);
            if main_live {
                live.remove(&instr.dst);
                live.remove(&main.dst);
                live.extend(cfg::used(&main));
                kept_rev.push(instr);
                kept_rev.push(main);
            } else if let Some(mut replacement) = downgrade(&main) {
                // The value is unused: the success check alone is the
                // cheaper instruction, bound to the succeeded destination.
                replacement.dst = instr.dst;
                body.push(replacement);
            } else if succ_live {
                live.remove(&instr.dst);
                live.extend(cfg::used(&main));
                kept_rev.push(instr);
                kept_rev.push(main);
            } else if is_pure(&main.op) {
                // Both results unused and the operation cannot be observed:
                // drop the pair.
            } else {
                live.extend(cfg::used(&main));
                kept_rev.push(instr);
                kept_rev.push(main);
            }
            continue;
        }

        if live.contains(&instr.dst) {
            live.remove(&instr.dst);
            live.extend(cfg::used(&instr));
            kept_rev.push(instr);
        } else if is_pure(&instr.op) {
            // Dead and pure: drop.
        } else {
            live.extend(cfg::used(&instr));
            kept_rev.push(instr);
        }
    }
    kept_rev.reverse();
    kept_rev
}

/// Replacement for a fallible instruction whose value is unused but whose
/// success is still observed.
fn downgrade(instr: &Instr) -> Option<Instr> {
    match instr.op {
        Op::GetMapElement => {
            let mut new = instr.clone();
            new.op = Op::HasMapField;
            Some(new)
        }
        _ => None,
    }
}

/// Operations with no observable effect besides their result.
fn is_pure(op: &Op) -> bool {
    matches!(
        op,
        Op::Bif(_)
            | Op::Float(FloatOp::Get)
            | Op::BsExtract
            | Op::Extract
            | Op::GetHd
            | Op::GetTl
            | Op::GetTupleElement
            | Op::IsNonemptyList
            | Op::IsTaggedTuple
            | Op::PutList
            | Op::PutTuple
    )
}
