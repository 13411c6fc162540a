// IR Node Types
//
// Defines every operation that can appear in a UOp graph

use crate::ir::types::{ConstValue, DType};
use std::fmt;

/// Stable handle of a node: its index in the graph arena
pub type NodeId = usize;

/// Operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UOps {
    /// Root marker; sources are the values to materialize
    Sink,
    /// Constant; `arg` is the value
    Const,
    /// Kernel parameter buffer; `arg` is the parameter slot
    DefineGlobal,
    /// Work-group shared buffer; `arg` names it and gives its size
    DefineLocal,
    /// Bounded integer kernel parameter
    DefineVar,
    /// Parallel lane index with a static bound
    Special,
    /// `(buf, idx[, alt, gate][, barrier])`
    Load,
    /// `(buf, idx, val[, gate])`
    Store,
    /// Unary, binary or ternary arithmetic; `arg` names the operator
    Alu,
    /// Value-converting conversion
    Cast,
    /// Bit reinterpretation between equal-width types
    Bitcast,
    /// Cross-lane synchronization point
    Barrier,
    /// Opens a predicated region; `src[0]` is the gate
    If,
    /// Closes the region of `src[0]`
    EndIf,
}

impl UOps {
    /// Nodes that produce no runtime value
    pub fn is_valueless(&self) -> bool {
        matches!(self, UOps::Store | UOps::Barrier | UOps::EndIf | UOps::Sink)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnaryOps {
    Neg,
    Exp2,
    Log2,
    Sin,
    Sqrt,
    Recip,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinaryOps {
    Add,
    Sub,
    Mul,
    IDiv,
    Max,
    Mod,
    CmpLt,
    CmpNe,
    Xor,
    And,
    Or,
    Shl,
    Shr,
}

/// Ternary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TernaryOps {
    Where,
    MulAcc,
}

/// Operator carried by an ALU node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AluOp {
    Unary(UnaryOps),
    Binary(BinaryOps),
    Ternary(TernaryOps),
}

impl AluOp {
    /// Number of operands the operator takes
    pub fn arity(&self) -> usize {
        match self {
            AluOp::Unary(_) => 1,
            AluOp::Binary(_) => 2,
            AluOp::Ternary(_) => 3,
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            AluOp::Binary(BinaryOps::CmpLt) | AluOp::Binary(BinaryOps::CmpNe)
        )
    }
}

impl From<UnaryOps> for AluOp {
    fn from(op: UnaryOps) -> Self {
        AluOp::Unary(op)
    }
}

impl From<BinaryOps> for AluOp {
    fn from(op: BinaryOps) -> Self {
        AluOp::Binary(op)
    }
}

impl From<TernaryOps> for AluOp {
    fn from(op: TernaryOps) -> Self {
        AluOp::Ternary(op)
    }
}

/// Opaque payload of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arg {
    None,
    Const(ConstOrd),
    Alu(AluOp),
    /// Parameter slot of a global buffer
    Global(usize),
    /// Named shared buffer with its element count
    Local { name: String, size: usize },
    /// Lane index `name` ranging over `0..bound`
    Special { name: String, bound: i64 },
    /// Kernel variable `name` in `min..=max`
    Var { name: String, min: i64, max: i64 },
}

impl Arg {
    pub fn constant(value: ConstValue) -> Self {
        Arg::Const(ConstOrd(value))
    }

    pub fn as_const(&self) -> Option<ConstValue> {
        match self {
            Arg::Const(c) => Some(c.0),
            _ => None,
        }
    }

    pub fn as_alu(&self) -> Option<AluOp> {
        match self {
            Arg::Alu(op) => Some(*op),
            _ => None,
        }
    }
}

/// A constant with a total order (floats by bit pattern) so that `Arg` is `Ord`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstOrd(pub ConstValue);

impl ConstOrd {
    fn key(&self) -> (u8, i128) {
        match self.0 {
            ConstValue::Bool(b) => (0, b as i128),
            ConstValue::Int(i) => (1, i),
            ConstValue::Float(f) => (2, f.to_bits() as i128),
        }
    }
}

impl PartialOrd for ConstOrd {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConstOrd {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// One immutable IR node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UOp {
    pub op: UOps,
    pub dtype: Option<DType>,
    pub src: Vec<NodeId>,
    pub arg: Arg,
}

impl UOp {
    pub fn new(op: UOps, dtype: Option<DType>, src: Vec<NodeId>, arg: Arg) -> Self {
        Self { op, dtype, src, arg }
    }

    pub fn const_value(&self) -> Option<ConstValue> {
        if self.op == UOps::Const {
            self.arg.as_const()
        } else {
            None
        }
    }
}

impl fmt::Display for UnaryOps {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnaryOps::Neg => write!(f, "neg"),
            UnaryOps::Exp2 => write!(f, "exp2"),
            UnaryOps::Log2 => write!(f, "log2"),
            UnaryOps::Sin => write!(f, "sin"),
            UnaryOps::Sqrt => write!(f, "sqrt"),
            UnaryOps::Recip => write!(f, "recip"),
        }
    }
}

impl fmt::Display for BinaryOps {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BinaryOps::Add => write!(f, "add"),
            BinaryOps::Sub => write!(f, "sub"),
            BinaryOps::Mul => write!(f, "mul"),
            BinaryOps::IDiv => write!(f, "idiv"),
            BinaryOps::Max => write!(f, "max"),
            BinaryOps::Mod => write!(f, "mod"),
            BinaryOps::CmpLt => write!(f, "cmplt"),
            BinaryOps::CmpNe => write!(f, "cmpne"),
            BinaryOps::Xor => write!(f, "xor"),
            BinaryOps::And => write!(f, "and"),
            BinaryOps::Or => write!(f, "or"),
            BinaryOps::Shl => write!(f, "shl"),
            BinaryOps::Shr => write!(f, "shr"),
        }
    }
}

impl fmt::Display for TernaryOps {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TernaryOps::Where => write!(f, "where"),
            TernaryOps::MulAcc => write!(f, "mulacc"),
        }
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AluOp::Unary(op) => write!(f, "{}", op),
            AluOp::Binary(op) => write!(f, "{}", op),
            AluOp::Ternary(op) => write!(f, "{}", op),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Arg::None => Ok(()),
            Arg::Const(c) => write!(f, "{}", c.0),
            Arg::Alu(op) => write!(f, "{}", op),
            Arg::Global(slot) => write!(f, "data{}", slot),
            Arg::Local { name, size } => write!(f, "{}[{}]", name, size),
            Arg::Special { name, bound } => write!(f, "{}<{}", name, bound),
            Arg::Var { name, min, max } => write!(f, "{}[{}..={}]", name, min, max),
        }
    }
}
