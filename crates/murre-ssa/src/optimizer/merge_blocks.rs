//! Single-predecessor block merging.
//!
//! A block with exactly one predecessor that falls through to it
//! unconditionally is appended to that predecessor. Merges cascade: the
//! predecessor map is updated in place, so a chain of fall-throughs
//! collapses in one reverse-postorder sweep.
//!
//! A block starting with `peek_message` is never absorbed (the VM requires
//! a block boundary to re-enter the receive loop), and neither is a block
//! still carrying phis.

use super::{Cfg, St};
use crate::cfg;
use crate::ir::{Block, Label, Last, Op, ENTRY_BLOCK};
use anyhow::Result;
use rustc_hash::FxHashMap;

pub(super) fn run(mut st: St) -> Result<St> {
    let mut blocks = st.cfg.into_map();
    let mut preds = cfg::predecessors(&blocks);
    for label in cfg::rpo(&blocks) {
        let Some([pred]) = preds.get(&label).map(Vec::as_slice) else {
            continue;
        };
        let pred = *pred;
        if pred == label || !merge_allowed(label, &blocks[&pred], &blocks[&label]) {
            continue;
        }
        let absorbed = blocks.remove(&label).unwrap();
        let target = blocks.get_mut(&pred).unwrap();
        target.instrs.extend(absorbed.instrs);
        target.last = absorbed.last;
        let succs = cfg::successors(&blocks[&pred]);
        cfg::update_phi_labels(&succs, label, pred, &mut blocks);
        update_preds(&succs, label, pred, &mut preds);
    }
    st.cfg = Cfg::Map(blocks);
    Ok(st)
}

fn merge_allowed(label: Label, pred: &Block, block: &Block) -> bool {
    if label == ENTRY_BLOCK {
        return false;
    }
    match block.instrs.first() {
        Some(first) if matches!(first.op, Op::PeekMessage) || first.is_phi() => return false,
        _ => {}
    }
    // Only an unconditional fall-through may absorb its target.
    matches!(&pred.last, Last::Br { .. }) && cfg::successors(pred) == [label]
}

fn update_preds(
    succs: &[Label],
    from: Label,
    to: Label,
    preds: &mut FxHashMap<Label, Vec<Label>>,
) {
    for succ in succs {
        if let Some(list) = preds.get_mut(succ) {
            for p in list.iter_mut() {
                if *p == from {
                    *p = to;
                }
            }
            list.sort_unstable();
            list.dedup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::ir::{BlockMap, Instr, Value, Var};

    fn run_map(blocks: BlockMap) -> BlockMap {
        run(st_map(blocks, 100)).unwrap().cfg.into_map()
    }

    #[test]
    fn fall_through_pair_is_merged() {
        let blocks = BlockMap::from([
            (
                Label(0),
                Block::new(
                    vec![Instr::new(Var::user("H"), Op::GetHd, vec![var("L")])],
                    Last::goto(Label(2)),
                ),
            ),
            (
                Label(2),
                Block::new(
                    vec![Instr::new(Var::user("T"), Op::GetTl, vec![var("L")])],
                    Last::ret(var("T")),
                ),
            ),
        ]);
        let out = run_map(blocks);
        assert_eq!(out.len(), 1);
        let merged = &out[&Label(0)];
        assert_eq!(merged.instrs.len(), 2);
        assert_eq!(merged.last, Last::ret(var("T")));
    }

    #[test]
    fn chain_collapses_in_one_sweep() {
        let blocks = BlockMap::from([
            (Label(0), Block::new(vec![], Last::goto(Label(2)))),
            (Label(2), Block::new(vec![], Last::goto(Label(3)))),
            (Label(3), Block::new(vec![], ret_nil())),
        ]);
        let out = run_map(blocks);
        assert_eq!(out.len(), 1);
        assert_eq!(out[&Label(0)].last, ret_nil());
    }

    #[test]
    fn conditional_predecessor_does_not_merge() {
        let blocks = BlockMap::from([
            (
                Label(0),
                Block::new(vec![], Last::br(var("C"), Label(2), Label(3))),
            ),
            (Label(2), Block::new(vec![], ret_nil())),
            (Label(3), Block::new(vec![], ret_nil())),
        ]);
        let out = run_map(blocks);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn two_predecessors_do_not_merge() {
        let blocks = BlockMap::from([
            (
                Label(0),
                Block::new(vec![], Last::br(var("C"), Label(2), Label(3))),
            ),
            (Label(2), Block::new(vec![], Last::goto(Label(4)))),
            (Label(3), Block::new(vec![], Last::goto(Label(4)))),
            (Label(4), Block::new(vec![], ret_nil())),
        ]);
        let out = run_map(blocks);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn peek_message_block_is_not_absorbed() {
        let peek = Instr::new(Var::user("M"), Op::PeekMessage, vec![]);
        let blocks = BlockMap::from([
            (Label(0), Block::new(vec![], Last::goto(Label(2)))),
            (Label(2), Block::new(vec![peek], ret_nil())),
        ]);
        let out = run_map(blocks);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn phis_in_successors_are_repointed() {
        // 0 -> 2 merges; 3's phi must then name 0 as its predecessor.
        let phi = Instr::new(
            Var::user("P"),
            Op::Phi(vec![
                (var("X"), Label(2)),
                (var("Y"), Label(4)),
            ]),
            vec![],
        );
        let blocks = BlockMap::from([
            (Label(0), Block::new(vec![], Last::goto(Label(2)))),
            (
                Label(2),
                Block::new(
                    vec![Instr::new(Var::user("X"), Op::GetHd, vec![var("L")])],
                    Last::br(var("C"), Label(3), Label(4)),
                ),
            ),
            (Label(4), Block::new(vec![], Last::goto(Label(3)))),
            (Label(3), Block::new(vec![phi], Last::ret(var("P")))),
        ]);
        let out = run_map(blocks);
        assert!(!out.contains_key(&Label(2)));
        let pairs = out[&Label(3)].instrs[0].phi_pairs().unwrap().to_vec();
        let froms: Vec<Label> = pairs.iter().map(|(_, l)| *l).collect();
        assert!(froms.contains(&Label(0)));
        assert!(!froms.contains(&Label(2)));
    }

    #[test]
    fn merged_function_verifies() {
        let blocks = BlockMap::from([
            (Label(0), Block::new(vec![], Last::goto(Label(2)))),
            (
                Label(2),
                Block::new(
                    vec![Instr::new(
                        Var::user("T"),
                        Op::PutTuple,
                        vec![Value::Lit(crate::ir::Literal::Int(1))],
                    )],
                    Last::ret(var("T")),
                ),
            ),
        ]);
        let out = run_map(blocks);
        crate::verify::check_function(&func(out, 100)).unwrap();
    }
}
