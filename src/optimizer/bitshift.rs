// Bit-Shift Strength Reduction
//
// On targets with native shifts, multiplication by 2^k becomes `<< k` and
// integer division by 2^k becomes `>> k`. The division rewrite needs a
// non-negative dividend: IDIV truncates toward zero while an arithmetic
// shift rounds toward negative infinity.

use crate::core::error::Result;
use crate::ir::graph::UOpGraph;
use crate::ir::node::{AluOp, Arg, BinaryOps, NodeId, UOp, UOps};
use crate::ir::types::{ConstValue, ScalarType};
use crate::optimizer::pass::{rewrite_bottom_up, OptimizationPass};

/// Bit-shift rewrite pass
#[derive(Debug, Default)]
pub struct BitshiftPass;

impl BitshiftPass {
    pub fn new() -> Self {
        Self
    }

    /// `k` when `id` is the integer constant `2^k`, `k >= 1`
    fn log2_const(graph: &UOpGraph, id: NodeId) -> Option<u32> {
        match graph.get(id).ok()?.const_value()? {
            ConstValue::Int(c) if c > 1 && c & (c - 1) == 0 => Some(c.trailing_zeros()),
            _ => None,
        }
    }

    fn shift(
        graph: &mut UOpGraph,
        op: BinaryOps,
        x: NodeId,
        k: u32,
        st: ScalarType,
    ) -> Result<Option<NodeId>> {
        let amount = graph.add(
            UOps::Const,
            Some(st.into()),
            vec![],
            Arg::constant(ConstValue::Int(k as i128)),
        )?;
        graph
            .add(UOps::Alu, Some(st.into()), vec![x, amount], Arg::Alu(op.into()))
            .map(Some)
    }

    fn rewrite(graph: &mut UOpGraph, uop: &UOp) -> Result<Option<NodeId>> {
        if uop.op != UOps::Alu {
            return Ok(None);
        }
        let st = match uop.dtype.and_then(|d| d.scalar()) {
            Some(st) if st.is_integer() => st,
            _ => return Ok(None),
        };
        match uop.arg.as_alu() {
            Some(AluOp::Binary(BinaryOps::Mul)) => {
                let (a, b) = (uop.src[0], uop.src[1]);
                if let Some(k) = Self::log2_const(graph, b) {
                    return Self::shift(graph, BinaryOps::Shl, a, k, st);
                }
                if let Some(k) = Self::log2_const(graph, a) {
                    return Self::shift(graph, BinaryOps::Shl, b, k, st);
                }
                Ok(None)
            }
            Some(AluOp::Binary(BinaryOps::IDiv)) => {
                let (a, b) = (uop.src[0], uop.src[1]);
                let non_negative =
                    st.is_unsigned() || graph.bounds(a).map_or(false, |(lo, _)| lo >= 0);
                match Self::log2_const(graph, b) {
                    Some(k) if non_negative => Self::shift(graph, BinaryOps::Shr, a, k, st),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }
}

impl OptimizationPass for BitshiftPass {
    fn run(&mut self, graph: &mut UOpGraph, roots: &mut Vec<NodeId>) -> Result<bool> {
        rewrite_bottom_up(graph, roots, Self::rewrite)
    }

    fn name(&self) -> &str {
        "Bitshift"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(g: &mut UOpGraph, v: i128) -> NodeId {
        g.add(UOps::Const, Some(ScalarType::Int32.into()), vec![], Arg::constant(ConstValue::Int(v)))
            .unwrap()
    }

    fn alu(g: &mut UOpGraph, op: BinaryOps, a: NodeId, b: NodeId) -> NodeId {
        g.add(UOps::Alu, Some(ScalarType::Int32.into()), vec![a, b], Arg::Alu(op.into()))
            .unwrap()
    }

    #[test]
    fn test_mul_and_div_by_power_of_two() {
        let mut g = UOpGraph::new();
        let lane = g
            .add(
                UOps::Special,
                Some(ScalarType::Int32.into()),
                vec![],
                Arg::Special { name: "gidx0".into(), bound: 16 },
            )
            .unwrap();
        let eight = int(&mut g, 8);
        let four = int(&mut g, 4);
        let m = alu(&mut g, BinaryOps::Mul, lane, eight);
        let d = alu(&mut g, BinaryOps::IDiv, m, four);
        let mut roots = vec![d];
        assert!(BitshiftPass::new().run(&mut g, &mut roots).unwrap());
        let root = g.get(roots[0]).unwrap();
        assert_eq!(root.arg.as_alu(), Some(AluOp::Binary(BinaryOps::Shr)));
        let inner = g.get(root.src[0]).unwrap();
        assert_eq!(inner.arg.as_alu(), Some(AluOp::Binary(BinaryOps::Shl)));
    }

    #[test]
    fn test_signed_division_kept() {
        let mut g = UOpGraph::new();
        let v = g
            .add(
                UOps::DefineVar,
                Some(ScalarType::Int32.into()),
                vec![],
                Arg::Var { name: "n".into(), min: -8, max: 8 },
            )
            .unwrap();
        let two = int(&mut g, 2);
        let d = alu(&mut g, BinaryOps::IDiv, v, two);
        let mut roots = vec![d];
        assert!(!BitshiftPass::new().run(&mut g, &mut roots).unwrap());
    }
}
