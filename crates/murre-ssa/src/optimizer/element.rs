//! Reordering of `element/2` chains.
//!
//! A run of pattern-matching clauses on the same tuple lowers into a chain of
//! blocks, each of the exact shape
//!
//! ```text
//!   E = bif:element N, T
//!   B = succeeded E
//!   br B, next, fail
//! ```
//!
//! where every block's success target is the next block and all blocks share
//! the tuple and the failure label. Fetching the highest index first proves
//! the tuple long enough for the remaining reads, which later lowering can
//! then emit as raw `get_tuple_element` instructions. This pass swaps the
//! first block's `element` call with the highest-index one.

use super::{Cfg, St};
use crate::cfg;
use crate::ir::{Block, BlockMap, Label, Last, Op, Value, Var};
use anyhow::Result;

struct ElementCall {
    label: Label,
    /// Chain key: the tuple read from and the shared failure label.
    tuple: Var,
    fail: Label,
    index: i64,
    succ: Label,
}

pub(super) fn run(mut st: St) -> Result<St> {
    let mut blocks = st.cfg.into_map();
    let calls = collect_element_calls(&cfg::linearize(&blocks));
    for chain in collect_chains(&calls) {
        swap_element_calls(chain, &mut blocks);
    }
    st.cfg = Cfg::Map(blocks);
    Ok(st)
}

/// Blocks matching the `element` + `succeeded` + `br` shape, in linear order.
fn collect_element_calls(linear: &[(Label, Block)]) -> Vec<ElementCall> {
    let mut calls = Vec::new();
    for (label, block) in linear {
        let [elem, succ_i] = block.instrs.as_slice() else {
            continue;
        };
        let Op::Bif(name) = &elem.op else { continue };
        if name != "element" {
            continue;
        }
        let [Value::Lit(index), Value::Var(tuple)] = elem.args.as_slice() else {
            continue;
        };
        let Some(index) = index.as_int() else { continue };
        if !matches!(succ_i.op, Op::Succeeded)
            || succ_i.args != [Value::Var(elem.dst.clone())]
        {
            continue;
        }
        let Last::Br { cond, succ, fail } = &block.last else {
            continue;
        };
        if cond != &Value::Var(succ_i.dst.clone()) {
            continue;
        }
        calls.push(ElementCall {
            label: *label,
            tuple: tuple.clone(),
            fail: *fail,
            index,
            succ: *succ,
        });
    }
    calls
}

/// Group successive calls into chains: each block's success target must be
/// the next block, on the same tuple with the same failure label. Only
/// chains of two or more blocks are interesting.
fn collect_chains(calls: &[ElementCall]) -> Vec<&[ElementCall]> {
    let mut chains = Vec::new();
    let mut start = 0;
    for i in 1..=calls.len() {
        let linked = i < calls.len() && {
            let prev = &calls[i - 1];
            let this = &calls[i];
            prev.succ == this.label && prev.tuple == this.tuple && prev.fail == this.fail
        };
        if !linked {
            if i - start >= 2 {
                chains.push(&calls[start..i]);
            }
            start = i;
        }
    }
    chains
}

/// If the first block of the chain does not fetch the highest index, swap its
/// `element` instruction with the highest-index block's and re-point both
/// `succeeded` instructions at the destinations now in their blocks.
fn swap_element_calls(chain: &[ElementCall], blocks: &mut BlockMap) {
    let max = chain
        .iter()
        .max_by_key(|c| c.index)
        .expect("chains have at least two blocks");
    let first = &chain[0];
    if first.index >= max.index {
        return;
    }
    let elem1 = blocks[&first.label].instrs[0].clone();
    let elem2 = blocks[&max.label].instrs[0].clone();

    let b1 = blocks.get_mut(&first.label).unwrap();
    b1.instrs[1].args = vec![Value::Var(elem2.dst.clone())];
    b1.instrs[0] = elem2;

    let b2 = blocks.get_mut(&max.label).unwrap();
    b2.instrs[1].args = vec![Value::Var(elem1.dst.clone())];
    b2.instrs[0] = elem1;
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::ir::{Block, BlockMap, Instr, Last, Literal, Value};

    /// One chain block: `E<n> = element(index, T); B<n> = succeeded E<n>`.
    fn chain_block(n: u32, index: i64, succ: Label, fail: Label) -> Block {
        Block::new(
            vec![
                bif(&format!("E{n}"), "element", vec![int(index), var("T")]),
                succeeded(&format!("B{n}"), &format!("E{n}")),
            ],
            Last::br(var(&format!("B{n}")), succ, fail),
        )
    }

    fn index_of(block: &Block) -> i64 {
        block.instrs[0].args[0].as_lit().unwrap().as_int().unwrap()
    }

    #[test]
    fn chain_fetches_highest_index_first() {
        // element(1), element(3), element(2) on the same tuple and fail label.
        let blocks = BlockMap::from([
            (Label(0), chain_block(0, 1, Label(2), Label(1))),
            (Label(2), chain_block(2, 3, Label(3), Label(1))),
            (Label(3), chain_block(3, 2, Label(4), Label(1))),
            (Label(1), Block::new(vec![], ret_nil())),
            (Label(4), Block::new(vec![], ret_nil())),
        ]);
        let st = run(st_map(blocks, 10)).unwrap();
        let blocks = st.cfg.into_map();
        assert_eq!(index_of(&blocks[&Label(0)]), 3);
        assert_eq!(index_of(&blocks[&Label(2)]), 1);
        // The block between first and highest keeps its index.
        assert_eq!(index_of(&blocks[&Label(3)]), 2);
    }

    #[test]
    fn swapped_succeeded_follow_their_elements() {
        let blocks = BlockMap::from([
            (Label(0), chain_block(0, 1, Label(2), Label(1))),
            (Label(2), chain_block(2, 3, Label(3), Label(1))),
            (Label(1), Block::new(vec![], ret_nil())),
            (Label(3), Block::new(vec![], ret_nil())),
        ]);
        let st = run(st_map(blocks, 10)).unwrap();
        let blocks = st.cfg.into_map();
        for label in [Label(0), Label(2)] {
            let b = &blocks[&label];
            assert_eq!(
                b.instrs[1].args,
                vec![Value::Var(b.instrs[0].dst.clone())],
                "succeeded must reference its own block's element"
            );
        }
    }

    #[test]
    fn max_in_last_block_swaps_with_first() {
        // element(1), element(2), element(3): the last block holds the
        // highest index and trades places with the first; the middle block
        // is untouched.
        let blocks = BlockMap::from([
            (Label(0), chain_block(0, 1, Label(2), Label(1))),
            (Label(2), chain_block(2, 2, Label(3), Label(1))),
            (Label(3), chain_block(3, 3, Label(4), Label(1))),
            (Label(1), Block::new(vec![], ret_nil())),
            (Label(4), Block::new(vec![], ret_nil())),
        ]);
        let st = run(st_map(blocks, 10)).unwrap();
        let blocks = st.cfg.into_map();
        assert_eq!(index_of(&blocks[&Label(0)]), 3);
        assert_eq!(index_of(&blocks[&Label(2)]), 2);
        assert_eq!(index_of(&blocks[&Label(3)]), 1);
    }

    #[test]
    fn highest_first_chain_unchanged() {
        let blocks = BlockMap::from([
            (Label(0), chain_block(0, 5, Label(2), Label(1))),
            (Label(2), chain_block(2, 3, Label(3), Label(1))),
            (Label(1), Block::new(vec![], ret_nil())),
            (Label(3), Block::new(vec![], ret_nil())),
        ]);
        let st = run(st_map(blocks, 10)).unwrap();
        let blocks = st.cfg.into_map();
        assert_eq!(index_of(&blocks[&Label(0)]), 5);
        assert_eq!(index_of(&blocks[&Label(2)]), 3);
    }

    #[test]
    fn different_fail_labels_break_the_chain() {
        let blocks = BlockMap::from([
            (Label(0), chain_block(0, 1, Label(2), Label(1))),
            (Label(2), chain_block(2, 3, Label(4), Label(3))),
            (Label(1), Block::new(vec![], ret_nil())),
            (Label(3), Block::new(vec![], ret_nil())),
            (Label(4), Block::new(vec![], ret_nil())),
        ]);
        let st = run(st_map(blocks, 10)).unwrap();
        let blocks = st.cfg.into_map();
        assert_eq!(index_of(&blocks[&Label(0)]), 1);
        assert_eq!(index_of(&blocks[&Label(2)]), 3);
    }

    #[test]
    fn different_tuples_break_the_chain() {
        let other = Block::new(
            vec![
                bif("E9", "element", vec![int(7), var("U")]),
                succeeded("B9", "E9"),
            ],
            Last::br(var("B9"), Label(3), Label(1)),
        );
        let blocks = BlockMap::from([
            (Label(0), chain_block(0, 1, Label(2), Label(1))),
            (Label(2), other),
            (Label(1), Block::new(vec![], ret_nil())),
            (Label(3), Block::new(vec![], ret_nil())),
        ]);
        let st = run(st_map(blocks, 10)).unwrap();
        let blocks = st.cfg.into_map();
        assert_eq!(index_of(&blocks[&Label(0)]), 1);
    }

    #[test]
    fn block_with_extra_instructions_is_not_a_chain_member() {
        let mut fat = chain_block(0, 1, Label(2), Label(1));
        fat.instrs.insert(
            0,
            Instr::new(Var::user("H"), Op::GetHd, vec![var("L")]),
        );
        let blocks = BlockMap::from([
            (Label(0), fat),
            (Label(2), chain_block(2, 3, Label(3), Label(1))),
            (Label(1), Block::new(vec![], ret_nil())),
            (Label(3), Block::new(vec![], Last::ret(Literal::Nil))),
        ]);
        let st = run(st_map(blocks, 10)).unwrap();
        let blocks = st.cfg.into_map();
        assert_eq!(index_of(&blocks[&Label(2)]), 3);
    }
}
