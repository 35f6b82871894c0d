//! A small reference interpreter for the SSA IR.
//!
//! Executes a function on literal arguments and returns the literal result.
//! Fallible operations follow the `succeeded` protocol: on failure the
//! destination stays unbound and the paired `succeeded` yields `false`.
//! Only the operations the test corpus (and its optimized forms) can
//! contain are implemented; anything else is a test bug and panics.

use murre_ssa::ir::{
    Block, FloatOp, Function, Instr, Label, Last, Literal, Op, Value, Var, ENTRY_BLOCK,
};
use std::collections::HashMap;

const STEP_LIMIT: usize = 10_000;

struct Machine {
    env: HashMap<Var, Literal>,
    /// Pending float exception flag for the unboxed float region.
    fpe: bool,
}

pub fn run(func: &Function, args: &[Literal]) -> Literal {
    assert_eq!(func.args.len(), args.len(), "arity mismatch");
    let mut m = Machine {
        env: func
            .args
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect(),
        fpe: false,
    };
    let mut current = ENTRY_BLOCK;
    let mut prev: Option<Label> = None;
    for _ in 0..STEP_LIMIT {
        let block = func
            .blocks
            .get(&current)
            .unwrap_or_else(|| panic!("jump to missing block {current}"));
        m.exec_phis(block, prev);
        m.exec_body(block);
        match m.exec_last(&block.last) {
            Flow::Jump(next) => {
                prev = Some(current);
                current = next;
            }
            Flow::Done(result) => return result,
        }
    }
    panic!("step limit exceeded in {}/{}", func.name.as_str(), func.arity);
}

enum Flow {
    Jump(Label),
    Done(Literal),
}

impl Machine {
    fn get(&self, value: &Value) -> Literal {
        match value {
            Value::Lit(l) => l.clone(),
            Value::Var(v) => self
                .env
                .get(v)
                .unwrap_or_else(|| panic!("unbound variable {v}"))
                .clone(),
            Value::Remote(_) => panic!("remote operand evaluated"),
        }
    }

    fn exec_phis(&mut self, block: &Block, prev: Option<Label>) {
        let mut updates = Vec::new();
        for instr in &block.instrs {
            let Some(pairs) = instr.phi_pairs() else { break };
            let prev = prev.expect("phi in the entry block");
            let (value, _) = pairs
                .iter()
                .find(|(_, from)| *from == prev)
                .unwrap_or_else(|| panic!("phi lacks an arm for predecessor {prev}"));
            updates.push((instr.dst.clone(), self.get(value)));
        }
        self.env.extend(updates);
    }

    fn exec_body(&mut self, block: &Block) {
        let body: Vec<&Instr> = block.instrs.iter().filter(|i| !i.is_phi()).collect();
        let mut idx = 0;
        while idx < body.len() {
            let instr = body[idx];
            if matches!(instr.op, Op::Succeeded) {
                let ok = match instr.args.as_slice() {
                    [Value::Lit(l)] if l.is_true() => true,
                    [Value::Var(v)] => self.env.contains_key(v),
                    other => panic!("malformed succeeded arguments {other:?}"),
                };
                self.env.insert(instr.dst.clone(), Literal::bool(ok));
                idx += 1;
                continue;
            }
            match self.eval(instr) {
                Some(result) => {
                    self.env.insert(instr.dst.clone(), result);
                }
                None => {
                    // Failed: the destination stays unbound; the paired
                    // succeeded observes that.
                    let next = body.get(idx + 1);
                    let paired = matches!(
                        next,
                        Some(n) if matches!(n.op, Op::Succeeded)
                            && n.args == [Value::Var(instr.dst.clone())]
                    );
                    assert!(paired, "unchecked failure of {instr}");
                }
            }
            idx += 1;
        }
    }

    /// Evaluate one non-phi instruction. `None` means the operation failed.
    fn eval(&mut self, instr: &Instr) -> Option<Literal> {
        match &instr.op {
            Op::Bif(name) => self.eval_bif(name.as_str(), &instr.args),
            Op::Call => Some(Literal::atom("<call>")),
            Op::GetTupleElement => {
                let tuple = self.get(&instr.args[0]);
                let index = self.get(&instr.args[1]);
                match (tuple, index) {
                    (Literal::Tuple(items), Literal::Int(i)) => {
                        Some(items[i as usize].clone())
                    }
                    other => panic!("get_tuple_element on {other:?}"),
                }
            }
            Op::IsTaggedTuple => {
                let term = self.get(&instr.args[0]);
                let size = self.get(&instr.args[1]);
                let tag = self.get(&instr.args[2]);
                let ok = matches!(
                    (&term, &size),
                    (Literal::Tuple(items), Literal::Int(n))
                        if items.len() as i64 == *n && items.first() == Some(&tag)
                );
                Some(Literal::bool(ok))
            }
            Op::PutTuple => {
                let items = instr.args.iter().map(|a| self.get(a)).collect();
                Some(Literal::Tuple(items))
            }
            Op::PutList => {
                let head = self.get(&instr.args[0]);
                let tail = self.get(&instr.args[1]);
                Some(Literal::Cons(Box::new(head), Box::new(tail)))
            }
            Op::GetHd => match self.get(&instr.args[0]) {
                Literal::Cons(head, _) => Some(*head),
                other => panic!("get_hd on {other:?}"),
            },
            Op::GetTl => match self.get(&instr.args[0]) {
                Literal::Cons(_, tail) => Some(*tail),
                other => panic!("get_tl on {other:?}"),
            },
            Op::Float(fop) => self.eval_float(fop, &instr.args),
            other => panic!("operation {other:?} not supported by the interpreter"),
        }
    }

    fn eval_bif(&mut self, name: &str, args: &[Value]) -> Option<Literal> {
        match name {
            "+" | "-" | "*" => {
                let a = self.get(&args[0]);
                let b = self.get(&args[1]);
                arith(name, a, b)
            }
            "element" => {
                let index = self.get(&args[0]);
                let tuple = self.get(&args[1]);
                match (index, tuple) {
                    (Literal::Int(i), Literal::Tuple(items))
                        if i >= 1 && (i as usize) <= items.len() =>
                    {
                        Some(items[i as usize - 1].clone())
                    }
                    _ => None,
                }
            }
            "tuple_size" => match self.get(&args[0]) {
                Literal::Tuple(items) => Some(Literal::Int(items.len() as i64)),
                _ => None,
            },
            "=:=" => {
                let a = self.get(&args[0]);
                let b = self.get(&args[1]);
                Some(Literal::bool(a == b))
            }
            "is_tuple" => {
                Some(Literal::bool(matches!(self.get(&args[0]), Literal::Tuple(_))))
            }
            "is_integer" => {
                Some(Literal::bool(matches!(self.get(&args[0]), Literal::Int(_))))
            }
            other => panic!("BIF {other} not supported by the interpreter"),
        }
    }

    fn eval_float(&mut self, fop: &FloatOp, args: &[Value]) -> Option<Literal> {
        match fop {
            FloatOp::ClearError => {
                self.fpe = false;
                Some(Literal::atom("ok"))
            }
            FloatOp::CheckError => {
                let ok = !self.fpe;
                self.fpe = false;
                Some(Literal::bool(ok))
            }
            FloatOp::Put => Some(self.get(&args[0])),
            FloatOp::Get => Some(self.get(&args[0])),
            FloatOp::Convert => match self.get(&args[0]).to_float() {
                Some(f) => Some(Literal::Float(f)),
                None => None,
            },
            FloatOp::Arith(name) => {
                let a = as_f64(self.get(&args[0]));
                let b = as_f64(self.get(&args[1]));
                let result = match name.as_str() {
                    "+" => a + b,
                    "-" => a - b,
                    "*" => a * b,
                    "/" => a / b,
                    other => panic!("float op {other} not supported"),
                };
                if !result.is_finite() {
                    self.fpe = true;
                }
                Some(Literal::Float(result))
            }
        }
    }

    fn exec_last(&mut self, last: &Last) -> Flow {
        match last {
            Last::Br { cond, succ, fail } => {
                let cond = self.get(cond);
                if cond.is_true() {
                    Flow::Jump(*succ)
                } else if cond == Literal::bool(false) {
                    Flow::Jump(*fail)
                } else {
                    panic!("branch on non-boolean {cond}")
                }
            }
            Last::Switch {
                arg,
                cases,
                default,
            } => {
                let value = self.get(arg);
                let target = cases
                    .iter()
                    .find(|(lit, _)| *lit == value)
                    .map(|(_, l)| *l)
                    .unwrap_or(*default);
                Flow::Jump(target)
            }
            Last::Ret { arg } => Flow::Done(self.get(arg)),
        }
    }
}

fn arith(name: &str, a: Literal, b: Literal) -> Option<Literal> {
    match (a, b) {
        (Literal::Int(a), Literal::Int(b)) => {
            let result = match name {
                "+" => a.checked_add(b),
                "-" => a.checked_sub(b),
                "*" => a.checked_mul(b),
                _ => unreachable!(),
            };
            result.map(Literal::Int)
        }
        (a, b) => {
            let (a, b) = (a.to_float()?, b.to_float()?);
            let result = match name {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                _ => unreachable!(),
            };
            Some(Literal::Float(result))
        }
    }
}

fn as_f64(lit: Literal) -> f64 {
    match lit {
        Literal::Float(f) => f,
        other => panic!("float register holds {other:?}"),
    }
}
