//! Phi collapse and literal folding.
//!
//! Walking the linear CFG left to right with a substitution map:
//! - a phi whose arguments all carry the same value is a copy; the phi is
//!   dropped and its destination substituted downstream;
//! - a `put_tuple` of literals (or `put_list` of two literals) is folded
//!   into a literal term and substituted downstream.

use super::{Cfg, St};
use crate::cfg::{self, Sub};
use crate::ir::{Literal, Op, Value};
use anyhow::Result;

pub(super) fn run(mut st: St) -> Result<St> {
    let linear = st.cfg.into_linear();
    let mut sub = Sub::default();
    let mut out = Vec::with_capacity(linear.len());
    for (label, mut block) in linear {
        let instrs = std::mem::take(&mut block.instrs);
        for mut instr in instrs {
            cfg::sub_instr(&mut instr, &sub);
            match &instr.op {
                Op::Phi(pairs) if !pairs.is_empty() && all_same(pairs) => {
                    let (value, _) = pairs[0].clone();
                    sub.insert(instr.dst, value);
                }
                Op::PutTuple => match literal_args(&instr.args) {
                    Some(items) => {
                        sub.insert(instr.dst, Value::Lit(Literal::Tuple(items)));
                    }
                    None => block.instrs.push(instr),
                },
                Op::PutList => match instr.args.as_slice() {
                    [Value::Lit(head), Value::Lit(tail)] => {
                        let cons =
                            Literal::Cons(Box::new(head.clone()), Box::new(tail.clone()));
                        sub.insert(instr.dst, Value::Lit(cons));
                    }
                    _ => block.instrs.push(instr),
                },
                _ => block.instrs.push(instr),
            }
        }
        cfg::sub_last(&mut block.last, &sub);
        out.push((label, block));
    }
    st.cfg = Cfg::Linear(out);
    Ok(st)
}

/// All phi arguments agree on their value component (or there is only one).
fn all_same(pairs: &[(Value, crate::ir::Label)]) -> bool {
    pairs.windows(2).all(|w| w[0].0 == w[1].0)
}

fn literal_args(args: &[Value]) -> Option<Vec<Literal>> {
    args.iter()
        .map(|a| a.as_lit().cloned())
        .collect::<Option<Vec<_>>>()
}
