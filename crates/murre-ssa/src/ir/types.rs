//! IR type definitions.
//!
//! These types represent the register-machine SSA form that the Murre front
//! end lowers function bodies into. A function body is a control-flow graph
//! of basic blocks; each block is a list of instructions followed by exactly
//! one terminator. Values are dynamically typed terms, so instruction
//! operands are either SSA variables or term literals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// An interned-style atom name (function names, BIF names, tags).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Atom(String);

impl Atom {
    pub fn new(name: impl Into<String>) -> Self {
        Atom(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom(s.to_string())
    }
}

impl PartialEq<str> for Atom {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Atom {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A term literal.
///
/// Equality and hashing are bit-exact for floats so that literals can be used
/// as map keys (two NaNs with the same bit pattern are the same literal).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Literal {
    Atom(Atom),
    Int(i64),
    Float(f64),
    Nil,
    Cons(Box<Literal>, Box<Literal>),
    Tuple(Vec<Literal>),
    /// A binary literal (whole bytes). `bs_match` string steps carry these.
    Bytes(Vec<u8>),
}

impl Literal {
    pub fn atom(name: impl Into<String>) -> Self {
        Literal::Atom(Atom::new(name))
    }

    /// The atoms `true`/`false` are the boolean terms of the language.
    pub fn bool(b: bool) -> Self {
        Literal::atom(if b { "true" } else { "false" })
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Literal::Atom(a) if a == "true")
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Compile-time conversion to a float, as the runtime `float/1` coercion
    /// would perform it. `None` means the coercion would raise.
    pub fn to_float(&self) -> Option<f64> {
        match self {
            Literal::Int(n) => Some(*n as f64),
            Literal::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Size in bits of a binary literal.
    pub fn bit_size(&self) -> Option<u64> {
        match self {
            Literal::Bytes(bytes) => Some(8 * bytes.len() as u64),
            _ => None,
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Atom(a), Literal::Atom(b)) => a == b,
            (Literal::Int(a), Literal::Int(b)) => a == b,
            (Literal::Float(a), Literal::Float(b)) => a.to_bits() == b.to_bits(),
            (Literal::Nil, Literal::Nil) => true,
            (Literal::Cons(h1, t1), Literal::Cons(h2, t2)) => h1 == h2 && t1 == t2,
            (Literal::Tuple(a), Literal::Tuple(b)) => a == b,
            (Literal::Bytes(a), Literal::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Literal::Atom(a) => a.hash(state),
            Literal::Int(n) => n.hash(state),
            Literal::Float(f) => f.to_bits().hash(state),
            Literal::Nil => {}
            Literal::Cons(h, t) => {
                h.hash(state);
                t.hash(state);
            }
            Literal::Tuple(items) => items.hash(state),
            Literal::Bytes(bytes) => bytes.hash(state),
        }
    }
}

/// An SSA variable.
///
/// Source-named variables come from the front end; generated variables are
/// minted by the optimizer from a base tag and the function's monotonic
/// counter. The two representations are never collapsed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Var {
    User(String),
    Gen { base: String, n: u32 },
}

impl Var {
    pub fn user(name: impl Into<String>) -> Self {
        Var::User(name.into())
    }

    pub fn gen(base: impl Into<String>, n: u32) -> Self {
        Var::Gen {
            base: base.into(),
            n,
        }
    }
}

/// An instruction operand.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Var(Var),
    Lit(Literal),
    /// A remote callee: a module/function pair of operands.
    Remote(Box<Remote>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Remote {
    pub module: Value,
    pub function: Value,
}

impl Value {
    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Value::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_lit(&self) -> Option<&Literal> {
        match self {
            Value::Lit(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_lit(&self) -> bool {
        matches!(self, Value::Lit(_))
    }

    /// The literal `true`, used as an always-taken branch condition.
    pub fn lit_true() -> Self {
        Value::Lit(Literal::bool(true))
    }

    pub fn is_lit_true(&self) -> bool {
        matches!(self, Value::Lit(l) if l.is_true())
    }
}

impl From<Var> for Value {
    fn from(v: Var) -> Self {
        Value::Var(v)
    }
}

impl From<Literal> for Value {
    fn from(l: Literal) -> Self {
        Value::Lit(l)
    }
}

/// Basic-block label.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Label(pub u32);

/// Entry block of every function.
pub const ENTRY_BLOCK: Label = Label(0);

/// Landing block for guard-style BIF failures. Always considered to be
/// outside any guard.
pub const BADARG_BLOCK: Label = Label(1);

/// Unboxed float sub-operations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatOp {
    ClearError,
    CheckError,
    Put,
    Get,
    Convert,
    /// An arithmetic operation on float registers (`+`, `-`, `*`, `/`).
    Arith(Atom),
}

/// Instruction operation codes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    /// SSA join. Each argument pairs a value with the predecessor label it
    /// flows in from.
    Phi(Vec<(Value, Label)>),
    /// Pure-or-failing built-in function call.
    Bif(Atom),
    Call,
    MakeFun,
    /// One-argument boolean: did the immediately preceding fallible
    /// instruction succeed?
    Succeeded,
    GetTupleElement,
    IsTaggedTuple,
    IsNonemptyList,
    /// Read a component of a caught exception.
    Extract,
    BsStartMatch,
    BsMatch,
    BsExtract,
    BsTestTail,
    BsPut,
    Float(FloatOp),
    PutTuple,
    PutList,
    GetHd,
    GetTl,
    PeekMessage,
    RemoveMessage,
    RecvNext,
    WaitTimeout,
    Timeout,
    Landingpad,
    CatchEnd,
    SetTupleElement,
    GetMapElement,
    HasMapField,
}

impl Op {
    pub fn is_phi(&self) -> bool {
        matches!(self, Op::Phi(_))
    }
}

/// Operand classification recorded by the type pass on float-capable ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberKind {
    Float,
    Number,
}

/// Instruction annotations. Only the type pass writes these today; the float
/// pass is the only consumer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Anno {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float_op: Option<Vec<NumberKind>>,
}

impl Anno {
    pub fn is_empty(&self) -> bool {
        self.float_op.is_none()
    }
}

/// A single instruction: destination variable, operation, ordered arguments,
/// and free-form annotations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub dst: Var,
    pub op: Op,
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Anno::is_empty")]
    pub anno: Anno,
}

impl Instr {
    pub fn new(dst: Var, op: Op, args: Vec<Value>) -> Self {
        Instr {
            dst,
            op,
            args,
            anno: Anno::default(),
        }
    }

    pub fn with_float_anno(mut self, kinds: Vec<NumberKind>) -> Self {
        self.anno.float_op = Some(kinds);
        self
    }

    pub fn is_phi(&self) -> bool {
        self.op.is_phi()
    }

    pub fn phi_pairs(&self) -> Option<&[(Value, Label)]> {
        match &self.op {
            Op::Phi(pairs) => Some(pairs),
            _ => None,
        }
    }

    pub fn phi_pairs_mut(&mut self) -> Option<&mut Vec<(Value, Label)>> {
        match &mut self.op {
            Op::Phi(pairs) => Some(pairs),
            _ => None,
        }
    }
}

/// Block terminator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Last {
    /// Conditional branch. `cond` may be the literal `true` for an
    /// unconditional jump (then `succ == fail` by convention).
    Br {
        cond: Value,
        succ: Label,
        fail: Label,
    },
    Switch {
        arg: Value,
        cases: Vec<(Literal, Label)>,
        default: Label,
    },
    Ret {
        arg: Value,
    },
}

impl Last {
    /// Unconditional jump.
    pub fn goto(target: Label) -> Self {
        Last::Br {
            cond: Value::lit_true(),
            succ: target,
            fail: target,
        }
    }

    pub fn br(cond: impl Into<Value>, succ: Label, fail: Label) -> Self {
        Last::Br {
            cond: cond.into(),
            succ,
            fail,
        }
    }

    pub fn ret(arg: impl Into<Value>) -> Self {
        Last::Ret { arg: arg.into() }
    }
}

/// A basic block: phi instructions (if any) first, then plain instructions,
/// then exactly one terminator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub instrs: Vec<Instr>,
    pub last: Last,
}

impl Block {
    pub fn new(instrs: Vec<Instr>, last: Last) -> Self {
        Block { instrs, last }
    }
}

/// Label-keyed block map, ordered for deterministic iteration.
pub type BlockMap = BTreeMap<Label, Block>;

/// A function under optimization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Function {
    pub name: Atom,
    pub arity: u32,
    /// Argument variables in declaration order.
    pub args: Vec<Var>,
    /// The CFG, entry at [`ENTRY_BLOCK`].
    #[serde(with = "block_map_serde")]
    pub blocks: BlockMap,
    /// Monotonic counter minting fresh labels and generated variables.
    pub count: u32,
}

/// A module: ordered list of functions plus metadata. Order is preserved by
/// the optimizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    pub name: Atom,
    pub functions: Vec<Function>,
}

/// Serialize the block map as a sequence of `(label, block)` pairs. JSON
/// object keys are strings, so a plain map serialization would stringify the
/// labels; a pair list keeps the dump format obvious.
mod block_map_serde {
    use super::{Block, BlockMap, Label};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &BlockMap, ser: S) -> Result<S::Ok, S::Error> {
        let mut seq = ser.serialize_seq(Some(map.len()))?;
        for entry in map.iter() {
            seq.serialize_element(&entry)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<BlockMap, D::Error> {
        let pairs = Vec::<(Label, Block)>::deserialize(de)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_compares_with_str() {
        assert_eq!(Atom::new("element"), "element");
        assert_ne!(Atom::new("element"), "elem");
    }

    #[test]
    fn bool_literals_are_atoms() {
        assert_eq!(Literal::bool(true), Literal::atom("true"));
        assert!(Literal::bool(true).is_true());
        assert!(!Literal::bool(false).is_true());
    }

    #[test]
    fn float_literal_equality_is_bit_exact() {
        assert_eq!(Literal::Float(f64::NAN), Literal::Float(f64::NAN));
        assert_ne!(Literal::Float(0.0), Literal::Float(-0.0));
        assert_eq!(Literal::Float(1.5), Literal::Float(1.5));
    }

    #[test]
    fn literal_to_float_coercion() {
        assert_eq!(Literal::Int(2).to_float(), Some(2.0));
        assert_eq!(Literal::Float(0.5).to_float(), Some(0.5));
        assert_eq!(Literal::atom("nope").to_float(), None);
        assert_eq!(Literal::Nil.to_float(), None);
    }

    #[test]
    fn bytes_bit_size() {
        assert_eq!(Literal::Bytes(vec![1, 2, 3]).bit_size(), Some(24));
        assert_eq!(Literal::Int(0).bit_size(), None);
    }

    #[test]
    fn user_and_gen_vars_are_distinct() {
        // A source variable named like a generated one must not compare equal.
        let user = Var::user("x");
        let gen = Var::gen("x", 0);
        assert_ne!(user, gen);
    }

    #[test]
    fn goto_is_lit_true_branch() {
        match Last::goto(Label(7)) {
            Last::Br { cond, succ, fail } => {
                assert!(cond.is_lit_true());
                assert_eq!(succ, Label(7));
                assert_eq!(fail, Label(7));
            }
            other => panic!("expected Br, got {other:?}"),
        }
    }

    #[test]
    fn function_json_round_trip() {
        let f = Function {
            name: Atom::new("id"),
            arity: 1,
            args: vec![Var::user("X")],
            blocks: BlockMap::from([(
                Label(0),
                Block::new(vec![], Last::ret(Var::user("X"))),
            )]),
            count: 2,
        };
        let json = serde_json::to_string(&f).unwrap();
        let back: Function = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, Atom::new("id"));
        assert_eq!(back.blocks.len(), 1);
        assert!(matches!(back.blocks[&Label(0)].last, Last::Ret { .. }));
    }
}
