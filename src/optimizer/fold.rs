// Constant Folding Pass
//
// Folds ALU and CAST nodes whose operands are all constants in graphs that
// were assembled directly through `UOpGraph::add`. The builder already folds
// eagerly; this pass gives raw graphs the same guarantee before
// linearization.

use crate::core::error::{KernelError, Result};
use crate::ir::alu::{cast, exec_alu};
use crate::ir::graph::UOpGraph;
use crate::ir::node::{Arg, NodeId, UOp, UOps};
use crate::ir::types::ConstValue;
use crate::optimizer::pass::{rewrite_bottom_up, OptimizationPass};

/// Constant folding pass
#[derive(Debug, Default)]
pub struct ConstantFoldPass {
    folded: usize,
}

impl ConstantFoldPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes folded by the last run
    pub fn folded(&self) -> usize {
        self.folded
    }

    fn fold(graph: &mut UOpGraph, uop: &UOp) -> Result<Option<NodeId>> {
        let st = match uop.dtype.and_then(|d| d.scalar()) {
            Some(st) => st,
            None => return Ok(None),
        };
        let values: Option<Vec<ConstValue>> = uop
            .src
            .iter()
            .map(|&s| graph.get(s).ok().and_then(|n| n.const_value()))
            .collect();
        let Some(values) = values else {
            return Ok(None);
        };
        let value = match uop.op {
            UOps::Alu => {
                let Some(op) = uop.arg.as_alu() else {
                    return Ok(None);
                };
                match exec_alu(op, st, &values) {
                    Ok(v) => v,
                    Err(KernelError::DivisionByZero) => return Ok(None),
                    Err(e) => return Err(e),
                }
            }
            UOps::Cast if values.len() == 1 => cast(values[0], st),
            _ => return Ok(None),
        };
        graph
            .add(UOps::Const, Some(st.into()), vec![], Arg::constant(value))
            .map(Some)
    }
}

impl OptimizationPass for ConstantFoldPass {
    fn run(&mut self, graph: &mut UOpGraph, roots: &mut Vec<NodeId>) -> Result<bool> {
        let mut folded = 0;
        let changed = rewrite_bottom_up(graph, roots, |g, uop| {
            let r = Self::fold(g, uop)?;
            if r.is_some() {
                folded += 1;
            }
            Ok(r)
        })?;
        self.folded = folded;
        Ok(changed)
    }

    fn name(&self) -> &str {
        "ConstantFold"
    }
}
