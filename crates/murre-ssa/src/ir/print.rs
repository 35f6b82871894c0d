//! Human-readable IR listings.
//!
//! The format is for debugging and test diagnostics only; the interchange
//! format of the CLI is the serde dump.

use super::{Block, FloatOp, Function, Instr, Label, Last, Literal, Module, Op, Value, Var};
use std::fmt;

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::User(name) => write!(f, "{name}"),
            Var::Gen { base, n } => write!(f, "{base}:{n}"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Atom(a) => write!(f, "{}", a.as_str()),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Float(x) => write!(f, "{x:?}"),
            Literal::Nil => write!(f, "[]"),
            Literal::Cons(h, t) => write!(f, "[{h}|{t}]"),
            Literal::Tuple(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
            Literal::Bytes(bytes) => {
                write!(f, "<<")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{b}")?;
                }
                write!(f, ">>")
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Var(v) => write!(f, "{v}"),
            Value::Lit(l) => write!(f, "`{l}`"),
            Value::Remote(r) => write!(f, "{}:{}", r.module, r.function),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Phi(_) => write!(f, "phi"),
            Op::Bif(name) => write!(f, "bif:{}", name.as_str()),
            Op::Call => write!(f, "call"),
            Op::MakeFun => write!(f, "make_fun"),
            Op::Succeeded => write!(f, "succeeded"),
            Op::GetTupleElement => write!(f, "get_tuple_element"),
            Op::IsTaggedTuple => write!(f, "is_tagged_tuple"),
            Op::IsNonemptyList => write!(f, "is_nonempty_list"),
            Op::Extract => write!(f, "extract"),
            Op::BsStartMatch => write!(f, "bs_start_match"),
            Op::BsMatch => write!(f, "bs_match"),
            Op::BsExtract => write!(f, "bs_extract"),
            Op::BsTestTail => write!(f, "bs_test_tail"),
            Op::BsPut => write!(f, "bs_put"),
            Op::Float(fop) => {
                let name = match fop {
                    FloatOp::ClearError => "clearerror",
                    FloatOp::CheckError => "checkerror",
                    FloatOp::Put => "put",
                    FloatOp::Get => "get",
                    FloatOp::Convert => "convert",
                    FloatOp::Arith(a) => a.as_str(),
                };
                write!(f, "float:{name}")
            }
            Op::PutTuple => write!(f, "put_tuple"),
            Op::PutList => write!(f, "put_list"),
            Op::GetHd => write!(f, "get_hd"),
            Op::GetTl => write!(f, "get_tl"),
            Op::PeekMessage => write!(f, "peek_message"),
            Op::RemoveMessage => write!(f, "remove_message"),
            Op::RecvNext => write!(f, "recv_next"),
            Op::WaitTimeout => write!(f, "wait_timeout"),
            Op::Timeout => write!(f, "timeout"),
            Op::Landingpad => write!(f, "landingpad"),
            Op::CatchEnd => write!(f, "catch_end"),
            Op::SetTupleElement => write!(f, "set_tuple_element"),
            Op::GetMapElement => write!(f, "get_map_element"),
            Op::HasMapField => write!(f, "has_map_field"),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.dst, self.op)?;
        if let Op::Phi(pairs) = &self.op {
            for (i, (value, from)) in pairs.iter().enumerate() {
                let sep = if i == 0 { ' ' } else { ',' };
                write!(f, "{sep}{{{value}, {from}}}")?;
            }
            return Ok(());
        }
        for (i, arg) in self.args.iter().enumerate() {
            let sep = if i == 0 { ' ' } else { ',' };
            write!(f, "{sep}{arg}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Last {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Last::Br { cond, succ, fail } if cond.is_lit_true() && succ == fail => {
                write!(f, "br {succ}")
            }
            Last::Br { cond, succ, fail } => write!(f, "br {cond}, {succ}, {fail}"),
            Last::Switch {
                arg,
                cases,
                default,
            } => {
                write!(f, "switch {arg}, {default}")?;
                for (lit, target) in cases {
                    write!(f, ", {{{lit}, {target}}}")?;
                }
                Ok(())
            }
            Last::Ret { arg } => write!(f, "ret {arg}"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in &self.instrs {
            writeln!(f, "    {i}")?;
        }
        writeln!(f, "    {}", self.last)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}/{}(", self.name.as_str(), self.arity)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        writeln!(f, ") {{")?;
        for (label, block) in &self.blocks {
            writeln!(f, "  {label}:")?;
            write!(f, "{block}")?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name.as_str())?;
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{func}")?;
        }
        Ok(())
    }
}
