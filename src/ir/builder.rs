// IR Builder: Public API for composing UOp graphs
//
// Typed construction on top of the interning arena. Every ALU node is
// type-checked against the target before constant folding is attempted, and
// all-constant operands fold eagerly through the ALU semantics.

use crate::compiler::target::{Target, TargetFeature};
use crate::core::error::{KernelError, Result};
use crate::ir::alu::{self, check_alu, exec_alu};
use crate::ir::graph::UOpGraph;
use crate::ir::node::{AluOp, Arg, BinaryOps, NodeId, TernaryOps, UOps, UnaryOps};
use crate::ir::types::{AddrSpace, ConstValue, DType, ScalarType};
use crate::shape::symbolic::Node;
use crate::shape::tracker::ShapeTracker;
use std::collections::HashMap;

/// Dtype of lowered index arithmetic
pub const INDEX_TYPE: ScalarType = ScalarType::Int32;

/// Builder for constructing UOp graphs
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    graph: UOpGraph,
    target: Target,
}

impl GraphBuilder {
    /// Create a new graph builder for the generic target
    pub fn new() -> Self {
        Self::for_target(Target::default())
    }

    pub fn for_target(target: Target) -> Self {
        Self::from_graph(UOpGraph::new(), target)
    }

    /// Continue building on an existing graph
    pub fn from_graph(graph: UOpGraph, target: Target) -> Self {
        Self { graph, target }
    }

    pub fn graph(&self) -> &UOpGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut UOpGraph {
        &mut self.graph
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Build and return the graph
    pub fn build(self) -> UOpGraph {
        self.graph
    }

    fn check_type(&self, st: ScalarType) -> Result<()> {
        if st == ScalarType::Float64 {
            self.target.require(TargetFeature::Float64)?;
        }
        Ok(())
    }

    /// Scalar dtype of a value node
    pub fn scalar_type(&self, id: NodeId) -> Result<ScalarType> {
        let node = self.graph.get(id)?;
        node.dtype
            .and_then(|d| d.scalar())
            .ok_or_else(|| KernelError::invalid(node.op, format!("node {} is not a scalar value", id)))
    }

    fn const_of(&self, id: NodeId) -> Option<ConstValue> {
        self.graph.get(id).ok().and_then(|n| n.const_value())
    }

    fn is_const(&self, id: NodeId, v: i128) -> bool {
        matches!(self.const_of(id), Some(ConstValue::Int(x)) if x == v)
    }

    // ---- leaves -------------------------------------------------------

    /// Constant of `dtype`; the value is converted to the dtype first
    pub fn const_(&mut self, dtype: ScalarType, value: impl Into<ConstValue>) -> Result<NodeId> {
        self.check_type(dtype)?;
        let value = alu::cast(value.into(), dtype);
        self.graph
            .add(UOps::Const, Some(dtype.into()), vec![], Arg::constant(value))
    }

    /// Index-typed integer constant
    pub fn int(&mut self, v: i64) -> Result<NodeId> {
        self.const_(INDEX_TYPE, v)
    }

    /// Global buffer in parameter slot `slot`
    pub fn define_global(&mut self, slot: usize, dtype: ScalarType) -> Result<NodeId> {
        self.check_type(dtype)?;
        self.graph.add(
            UOps::DefineGlobal,
            Some(DType::ptr(dtype, AddrSpace::Global)),
            vec![],
            Arg::Global(slot),
        )
    }

    /// Work-group shared buffer of `size` elements
    pub fn define_local(
        &mut self,
        name: impl Into<String>,
        dtype: ScalarType,
        size: usize,
    ) -> Result<NodeId> {
        self.target.require(TargetFeature::SharedMemory)?;
        self.check_type(dtype)?;
        self.graph.add(
            UOps::DefineLocal,
            Some(DType::ptr(dtype, AddrSpace::Local)),
            vec![],
            Arg::Local {
                name: name.into(),
                size,
            },
        )
    }

    /// Integer kernel parameter in `min..=max`
    pub fn define_var(&mut self, name: impl Into<String>, min: i64, max: i64) -> Result<NodeId> {
        self.graph.add(
            UOps::DefineVar,
            Some(INDEX_TYPE.into()),
            vec![],
            Arg::Var {
                name: name.into(),
                min,
                max,
            },
        )
    }

    /// Lane index in `0..bound`. Names starting with `l` are local axes.
    pub fn special(&mut self, name: impl Into<String>, bound: i64) -> Result<NodeId> {
        self.graph.add(
            UOps::Special,
            Some(INDEX_TYPE.into()),
            vec![],
            Arg::Special {
                name: name.into(),
                bound,
            },
        )
    }

    // ---- memory -------------------------------------------------------

    /// Validate a buffer/index pair; returns the element type
    fn check_access(&self, op: UOps, buf: NodeId, idx: NodeId) -> Result<ScalarType> {
        let base = match self.graph.dtype(buf)? {
            Some(d) if d.is_ptr() => d.base(),
            _ => return Err(KernelError::invalid(op, format!("source {} is not a buffer", buf))),
        };
        match self.graph.dtype(idx)? {
            Some(d) if d.is_int() => Ok(base),
            _ => Err(KernelError::invalid(op, format!("index {} is not an integer", idx))),
        }
    }

    fn check_gate(&self, op: UOps, gate: NodeId) -> Result<()> {
        match self.graph.dtype(gate)? {
            Some(d) if d.is_bool() => Ok(()),
            _ => Err(KernelError::invalid(op, "gate must be bool")),
        }
    }

    fn check_value(&self, op: UOps, base: ScalarType, val: NodeId) -> Result<()> {
        let st = self.scalar_type(val)?;
        if st != base {
            return Err(KernelError::invalid(
                op,
                format!("value of type {} for a {} buffer", st, base),
            ));
        }
        Ok(())
    }

    pub fn load(&mut self, buf: NodeId, idx: NodeId) -> Result<NodeId> {
        let base = self.check_access(UOps::Load, buf, idx)?;
        self.graph
            .add(UOps::Load, Some(base.into()), vec![buf, idx], Arg::None)
    }

    /// Load that yields `alt` where `gate` is false
    pub fn load_gated(
        &mut self,
        buf: NodeId,
        idx: NodeId,
        alt: NodeId,
        gate: NodeId,
    ) -> Result<NodeId> {
        let base = self.check_access(UOps::Load, buf, idx)?;
        self.check_value(UOps::Load, base, alt)?;
        self.check_gate(UOps::Load, gate)?;
        self.graph.add(
            UOps::Load,
            Some(base.into()),
            vec![buf, idx, alt, gate],
            Arg::None,
        )
    }

    /// Load ordered after an explicit barrier
    pub fn load_after(&mut self, buf: NodeId, idx: NodeId, barrier: NodeId) -> Result<NodeId> {
        let base = self.check_access(UOps::Load, buf, idx)?;
        if self.graph.get(barrier)?.op != UOps::Barrier {
            return Err(KernelError::invalid(UOps::Load, "last source must be a barrier"));
        }
        self.graph.add(
            UOps::Load,
            Some(base.into()),
            vec![buf, idx, barrier],
            Arg::None,
        )
    }

    pub fn store(&mut self, buf: NodeId, idx: NodeId, val: NodeId) -> Result<NodeId> {
        let base = self.check_access(UOps::Store, buf, idx)?;
        self.check_value(UOps::Store, base, val)?;
        self.graph
            .add(UOps::Store, None, vec![buf, idx, val], Arg::None)
    }

    /// Store executed only where `gate` is true
    pub fn store_gated(
        &mut self,
        buf: NodeId,
        idx: NodeId,
        val: NodeId,
        gate: NodeId,
    ) -> Result<NodeId> {
        let base = self.check_access(UOps::Store, buf, idx)?;
        self.check_value(UOps::Store, base, val)?;
        self.check_gate(UOps::Store, gate)?;
        self.graph
            .add(UOps::Store, None, vec![buf, idx, val, gate], Arg::None)
    }

    /// Synchronization point after `deps`
    pub fn barrier(&mut self, deps: &[NodeId]) -> Result<NodeId> {
        self.target.require(TargetFeature::SharedMemory)?;
        self.graph
            .add(UOps::Barrier, None, deps.to_vec(), Arg::None)
    }

    /// Root marker over the values to materialise
    pub fn sink(&mut self, roots: &[NodeId]) -> Result<NodeId> {
        self.graph.add(UOps::Sink, None, roots.to_vec(), Arg::None)
    }

    // ---- arithmetic ---------------------------------------------------

    /// ALU node with type checking, constant folding and identity rewrites
    pub fn alu(&mut self, op: impl Into<AluOp>, srcs: &[NodeId]) -> Result<NodeId> {
        let op = op.into();
        let dtypes = srcs
            .iter()
            .map(|&s| {
                self.graph
                    .dtype(s)?
                    .ok_or_else(|| KernelError::invalid(UOps::Alu, format!("source {} has no value", s)))
            })
            .collect::<Result<Vec<_>>>()?;
        let out = check_alu(op, &dtypes)?;
        if op == AluOp::Ternary(TernaryOps::MulAcc) {
            self.target.require(TargetFeature::MulAcc)?;
        }
        let out_st = out.base();
        self.check_type(out_st)?;

        let consts: Option<Vec<ConstValue>> = srcs.iter().map(|&s| self.const_of(s)).collect();
        if let Some(values) = consts {
            match exec_alu(op, out_st, &values) {
                Ok(v) => return self.const_(out_st, v),
                Err(KernelError::DivisionByZero) => {
                    log::trace!("not folding {} by zero", op);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(id) = self.rewrite(op, srcs, out_st)? {
            return Ok(id);
        }
        self.graph
            .add(UOps::Alu, Some(out), srcs.to_vec(), Arg::Alu(op))
    }

    /// Algebraic identities on integers and bound-decided comparisons
    fn rewrite(&mut self, op: AluOp, srcs: &[NodeId], out: ScalarType) -> Result<Option<NodeId>> {
        let AluOp::Binary(bop) = op else {
            return Ok(None);
        };
        let (a, b) = (srcs[0], srcs[1]);
        if bop == BinaryOps::CmpLt {
            if let (Some((a0, a1)), Some((b0, b1))) = (self.graph.bounds(a), self.graph.bounds(b)) {
                if a1 < b0 {
                    return self.const_(ScalarType::Bool, true).map(Some);
                }
                if a0 >= b1 {
                    return self.const_(ScalarType::Bool, false).map(Some);
                }
            }
            return Ok(None);
        }
        if !out.is_integer() {
            return Ok(None);
        }
        let divisor = match self.const_of(b) {
            Some(ConstValue::Int(c)) if c > 0 => Some(c),
            _ => None,
        };
        let below_divisor = |g: &UOpGraph| match (divisor, g.bounds(a)) {
            (Some(c), Some((a0, a1))) => a0 >= 0 && a1 < c,
            _ => false,
        };
        Ok(match bop {
            BinaryOps::Add if self.is_const(b, 0) => Some(a),
            BinaryOps::Add if self.is_const(a, 0) => Some(b),
            BinaryOps::Sub if self.is_const(b, 0) => Some(a),
            BinaryOps::Mul if self.is_const(b, 1) => Some(a),
            BinaryOps::Mul if self.is_const(a, 1) => Some(b),
            BinaryOps::Mul if self.is_const(a, 0) || self.is_const(b, 0) => {
                Some(self.const_(out, 0)?)
            }
            BinaryOps::IDiv if self.is_const(b, 1) => Some(a),
            BinaryOps::IDiv if below_divisor(&self.graph) => Some(self.const_(out, 0)?),
            BinaryOps::Mod if self.is_const(b, 1) => Some(self.const_(out, 0)?),
            BinaryOps::Mod if below_divisor(&self.graph) => Some(a),
            _ => None,
        })
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::Add, &[a, b])
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::Sub, &[a, b])
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::Mul, &[a, b])
    }

    pub fn idiv(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::IDiv, &[a, b])
    }

    pub fn mod_(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::Mod, &[a, b])
    }

    pub fn max(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::Max, &[a, b])
    }

    pub fn lt(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::CmpLt, &[a, b])
    }

    pub fn ne(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::CmpNe, &[a, b])
    }

    pub fn and(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::And, &[a, b])
    }

    pub fn or(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::Or, &[a, b])
    }

    pub fn xor(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::Xor, &[a, b])
    }

    pub fn shl(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::Shl, &[a, b])
    }

    pub fn shr(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(BinaryOps::Shr, &[a, b])
    }

    pub fn neg(&mut self, a: NodeId) -> Result<NodeId> {
        self.alu(UnaryOps::Neg, &[a])
    }

    pub fn recip(&mut self, a: NodeId) -> Result<NodeId> {
        self.alu(UnaryOps::Recip, &[a])
    }

    pub fn sqrt(&mut self, a: NodeId) -> Result<NodeId> {
        self.alu(UnaryOps::Sqrt, &[a])
    }

    pub fn exp2(&mut self, a: NodeId) -> Result<NodeId> {
        self.alu(UnaryOps::Exp2, &[a])
    }

    pub fn log2(&mut self, a: NodeId) -> Result<NodeId> {
        self.alu(UnaryOps::Log2, &[a])
    }

    pub fn sin(&mut self, a: NodeId) -> Result<NodeId> {
        self.alu(UnaryOps::Sin, &[a])
    }

    pub fn where_(&mut self, cond: NodeId, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.alu(TernaryOps::Where, &[cond, a, b])
    }

    /// `a * b + c`
    pub fn mulacc(&mut self, a: NodeId, b: NodeId, c: NodeId) -> Result<NodeId> {
        self.alu(TernaryOps::MulAcc, &[a, b, c])
    }

    /// Value-converting cast; constants fold, same-type casts vanish
    pub fn cast(&mut self, x: NodeId, dtype: ScalarType) -> Result<NodeId> {
        let from = self.scalar_type(x)?;
        self.check_type(dtype)?;
        if from == dtype {
            return Ok(x);
        }
        if let Some(v) = self.const_of(x) {
            return self.const_(dtype, alu::cast(v, dtype));
        }
        self.graph
            .add(UOps::Cast, Some(dtype.into()), vec![x], Arg::None)
    }

    /// Raw bit reinterpretation; always a BITCAST node, even for constants
    pub fn bitcast(&mut self, x: NodeId, dtype: ScalarType) -> Result<NodeId> {
        let from = self.scalar_type(x)?;
        self.check_type(dtype)?;
        if from.size_bytes() != dtype.size_bytes() {
            return Err(KernelError::Unsupported(format!(
                "bitcast between {} and {} of different widths",
                from, dtype
            )));
        }
        self.graph
            .add(UOps::Bitcast, Some(dtype.into()), vec![x], Arg::None)
    }

    // ---- index lowering -----------------------------------------------

    /// Lower a symbolic index expression; `vars` binds its variables
    pub fn lower_index(&mut self, node: &Node, vars: &HashMap<String, NodeId>) -> Result<NodeId> {
        match node {
            Node::Num(v) => self.int(*v),
            Node::Var { name, .. } => vars
                .get(name)
                .copied()
                .ok_or_else(|| KernelError::UnboundVariable(name.clone())),
            Node::Mul(a, k) => {
                let a = self.lower_index(a, vars)?;
                let k = self.int(*k)?;
                self.mul(a, k)
            }
            Node::Div(a, k) => {
                let a = self.lower_index(a, vars)?;
                let k = self.int(*k)?;
                self.idiv(a, k)
            }
            Node::Mod(a, k) => {
                let a = self.lower_index(a, vars)?;
                let k = self.int(*k)?;
                self.mod_(a, k)
            }
            Node::Sum(ts) => {
                let mut acc: Option<NodeId> = None;
                for t in ts {
                    let t = self.lower_index(t, vars)?;
                    acc = Some(match acc {
                        Some(a) => self.add(a, t)?,
                        None => t,
                    });
                }
                match acc {
                    Some(a) => Ok(a),
                    None => self.int(0),
                }
            }
            Node::Lt(a, k) => {
                let a = self.lower_index(a, vars)?;
                let k = self.int(*k)?;
                self.lt(a, k)
            }
            Node::And(_) => self.lower_valid(node, vars),
        }
    }

    /// Lower a validity expression to a bool node
    pub fn lower_valid(&mut self, node: &Node, vars: &HashMap<String, NodeId>) -> Result<NodeId> {
        match node {
            Node::Num(v) => self.const_(ScalarType::Bool, *v != 0),
            Node::Lt(..) => self.lower_index(node, vars),
            Node::And(ts) => {
                let mut acc: Option<NodeId> = None;
                for t in ts {
                    let t = self.lower_valid(t, vars)?;
                    acc = Some(match acc {
                        Some(a) => self.and(a, t)?,
                        None => t,
                    });
                }
                match acc {
                    Some(a) => Ok(a),
                    None => self.const_(ScalarType::Bool, true),
                }
            }
            other => {
                let v = self.lower_index(other, vars)?;
                let zero = self.int(0)?;
                self.ne(v, zero)
            }
        }
    }

    /// Symbolic index and validity of `st` at per-dimension index nodes,
    /// plus the variable bindings needed to lower them
    fn view_expr(
        &self,
        st: &ShapeTracker,
        idxs: &[NodeId],
    ) -> Result<(Node, Node, HashMap<String, NodeId>)> {
        if idxs.len() != st.ndim() {
            return Err(KernelError::ShapeMismatch {
                expected: st.shape().to_vec(),
                got: vec![idxs.len() as i64],
            });
        }
        let mut vars = HashMap::new();
        let mut symbols = Vec::with_capacity(idxs.len());
        for (d, (&id, &s)) in idxs.iter().zip(st.shape()).enumerate() {
            let name = format!("idx{}", d);
            let (lo, hi) = self
                .graph
                .bounds(id)
                .map(|(a, b)| (a.max(0) as i64, (b as i64).min(s - 1)))
                .unwrap_or((0, s - 1));
            symbols.push(match self.const_of(id) {
                Some(c) => Node::num(c.as_i128() as i64),
                None => Node::var(name.clone(), lo, hi.max(lo)),
            });
            vars.insert(name, id);
        }
        let (idx, valid) = st.expr_idxs(Some(&symbols));
        Ok((idx, valid, vars))
    }

    /// Load through a ShapeTracker; masked positions read zero
    pub fn load_view(&mut self, buf: NodeId, st: &ShapeTracker, idxs: &[NodeId]) -> Result<NodeId> {
        let base = match self.graph.dtype(buf)? {
            Some(d) if d.is_ptr() => d.base(),
            _ => return Err(KernelError::invalid(UOps::Load, "source is not a buffer")),
        };
        let (idx, valid, vars) = self.view_expr(st, idxs)?;
        match valid {
            Node::Num(0) => self.const_(base, ConstValue::zero(base)),
            Node::Num(_) => {
                let i = self.lower_index(&idx, &vars)?;
                self.load(buf, i)
            }
            valid => {
                let i = self.lower_index(&idx, &vars)?;
                let gate = self.lower_valid(&valid, &vars)?;
                let alt = self.const_(base, ConstValue::zero(base))?;
                self.load_gated(buf, i, alt, gate)
            }
        }
    }

    /// Store through a ShapeTracker; `None` when every position is masked
    pub fn store_view(
        &mut self,
        buf: NodeId,
        st: &ShapeTracker,
        idxs: &[NodeId],
        val: NodeId,
    ) -> Result<Option<NodeId>> {
        let (idx, valid, vars) = self.view_expr(st, idxs)?;
        match valid {
            Node::Num(0) => Ok(None),
            Node::Num(_) => {
                let i = self.lower_index(&idx, &vars)?;
                self.store(buf, i, val).map(Some)
            }
            valid => {
                let i = self.lower_index(&idx, &vars)?;
                let gate = self.lower_valid(&valid, &vars)?;
                self.store_gated(buf, i, val, gate).map(Some)
            }
        }
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_folding() {
        let mut b = GraphBuilder::new();
        let x = b.const_(ScalarType::Uint8, 250).unwrap();
        let y = b.add(x, x).unwrap();
        assert_eq!(b.graph().get(y).unwrap().const_value(), Some(ConstValue::Int(244)));
        let seven = b.const_(ScalarType::Int8, 7).unwrap();
        let m3 = b.const_(ScalarType::Int8, -3).unwrap();
        let q = b.idiv(seven, m3).unwrap();
        assert_eq!(b.graph().get(q).unwrap().const_value(), Some(ConstValue::Int(-2)));
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let mut b = GraphBuilder::new();
        let one = b.int(1).unwrap();
        let zero = b.int(0).unwrap();
        let q = b.idiv(one, zero).unwrap();
        assert_eq!(b.graph().get(q).unwrap().op, UOps::Alu);
    }

    #[test]
    fn test_type_checked_before_folding() {
        let mut b = GraphBuilder::new();
        let f = b.const_(ScalarType::Float32, 1.5).unwrap();
        let i = b.int(2).unwrap();
        assert!(b.add(f, i).is_err());
        let c = b.mulacc(f, f, f).unwrap_err();
        assert!(matches!(c, KernelError::MissingFeature { .. }));
        let mut ptx = GraphBuilder::for_target(Target::assembly());
        let f = ptx.const_(ScalarType::Float32, 1.5).unwrap();
        let r = ptx.mulacc(f, f, f).unwrap();
        assert_eq!(ptx.graph().get(r).unwrap().const_value(), Some(ConstValue::Float(3.75)));
    }

    #[test]
    fn test_identity_rewrites() {
        let mut b = GraphBuilder::new();
        let lane = b.special("gidx0", 8).unwrap();
        let zero = b.int(0).unwrap();
        let one = b.int(1).unwrap();
        assert_eq!(b.add(lane, zero).unwrap(), lane);
        assert_eq!(b.mul(one, lane).unwrap(), lane);
        assert_eq!(b.mul(lane, zero).unwrap(), zero);
        assert_eq!(b.idiv(lane, one).unwrap(), lane);
        let eight = b.int(8).unwrap();
        assert_eq!(b.mod_(lane, eight).unwrap(), lane);
        let t = b.lt(lane, eight).unwrap();
        assert_eq!(b.graph().get(t).unwrap().const_value(), Some(ConstValue::Bool(true)));
    }

    #[test]
    fn test_cast_folds_and_bitcast_does_not() {
        let mut b = GraphBuilder::new();
        let x = b.const_(ScalarType::Int32, 3).unwrap();
        assert_eq!(b.cast(x, ScalarType::Int32).unwrap(), x);
        let f = b.cast(x, ScalarType::Float32).unwrap();
        assert_eq!(b.graph().get(f).unwrap().const_value(), Some(ConstValue::Float(3.0)));
        let bits = b.bitcast(x, ScalarType::Float32).unwrap();
        assert_eq!(b.graph().get(bits).unwrap().op, UOps::Bitcast);
        assert!(b.bitcast(x, ScalarType::Float64).is_err());
    }

    #[test]
    fn test_define_local_requires_shared_memory() {
        let mut b = GraphBuilder::for_target(Target::new("scalar"));
        assert!(matches!(
            b.define_local("smem", ScalarType::Float32, 16),
            Err(KernelError::MissingFeature { .. })
        ));
        assert!(b.const_(ScalarType::Float64, 1.0).is_err());
    }

    #[test]
    fn test_load_view_padding_is_gated() {
        let mut b = GraphBuilder::new();
        let buf = b.define_global(0, ScalarType::Float32).unwrap();
        let st = ShapeTracker::from_shape(&[4]).pad(&[(1, 1)]).unwrap();
        let lane = b.special("gidx0", 6).unwrap();
        let ld = b.load_view(buf, &st, &[lane]).unwrap();
        let parts = b.graph().load_parts(ld).unwrap();
        assert!(parts.gate.is_some());
        assert!(parts.alt.is_some());
    }

    #[test]
    fn test_store_view_fully_masked_is_suppressed() {
        let mut b = GraphBuilder::new();
        let buf = b.define_global(0, ScalarType::Float32).unwrap();
        let st = ShapeTracker::from_shape(&[4]).pad(&[(2, 0)]).unwrap();
        let zero = b.int(0).unwrap();
        let v = b.const_(ScalarType::Float32, 1.0).unwrap();
        assert_eq!(b.store_view(buf, &st, &[zero], v).unwrap(), None);
        let two = b.int(2).unwrap();
        assert!(b.store_view(buf, &st, &[two], v).unwrap().is_some());
    }
}
