// Program Interpreter for Testing
//
// Executes a linearized program on host buffers so that generated
// instruction streams can be checked against the ALU semantics. This is
// NOT a backend - it's a reference implementation for validation.
//
// Global launch axes are walked one work-group at a time. The lanes of a
// work-group execute each instruction together before moving to the next,
// so a BARRIER holds trivially and only instruction order matters.

use crate::compiler::program::Program;
use crate::core::error::{KernelError, Result};
use crate::ir::alu::{bitcast, cast, exec_alu, truncate};
use crate::ir::node::{Arg, NodeId, UOp, UOps};
use crate::ir::types::{AddrSpace, ConstValue, ScalarType};
use std::collections::HashMap;

/// Per-lane execution state
#[derive(Debug, Clone, Default)]
struct Lane {
    values: HashMap<NodeId, ConstValue>,
    /// One entry per open IF: is this lane inside it?
    mask: Vec<bool>,
}

impl Lane {
    fn active(&self) -> bool {
        self.mask.iter().all(|&m| m)
    }

    fn value(&self, id: NodeId) -> Result<ConstValue> {
        self.values.get(&id).copied().ok_or(KernelError::UnknownNode(id))
    }
}

/// Program interpreter
pub struct Interpreter<'p> {
    program: &'p Program,
    vars: HashMap<String, i64>,
    nodes: HashMap<NodeId, &'p UOp>,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            vars: HashMap::new(),
            nodes: program.iter().map(|i| (i.id, &i.uop)).collect(),
        }
    }

    /// Bind a DEFINE_VAR parameter
    pub fn set_var(&mut self, name: impl Into<String>, value: i64) {
        self.vars.insert(name.into(), value);
    }

    /// Run the program. `buffers[slot]` is the global buffer of that
    /// parameter slot; stores write into it in place.
    pub fn execute(&self, buffers: &mut [Vec<ConstValue>]) -> Result<()> {
        let (global_axes, local_axes): (Vec<_>, Vec<_>) =
            self.program.specials().iter().partition(|a| !a.is_local());
        let global_bounds: Vec<i64> = global_axes.iter().map(|a| a.bound).collect();
        let local_bounds: Vec<i64> = local_axes.iter().map(|a| a.bound).collect();

        for group in coordinates(&global_bounds) {
            let mut locals: HashMap<NodeId, Vec<ConstValue>> = self
                .program
                .locals()
                .iter()
                .map(|d| (d.id, vec![ConstValue::zero(d.dtype); d.size.unwrap_or(0)]))
                .collect();

            let mut lanes: Vec<Lane> = coordinates(&local_bounds)
                .into_iter()
                .map(|lane| {
                    let mut state = Lane::default();
                    for (axis, v) in global_axes.iter().zip(&group) {
                        state.values.insert(axis.id, ConstValue::Int(*v as i128));
                    }
                    for (axis, v) in local_axes.iter().zip(&lane) {
                        state.values.insert(axis.id, ConstValue::Int(*v as i128));
                    }
                    state
                })
                .collect();

            for ins in self.program.iter() {
                for lane in lanes.iter_mut() {
                    self.step(ins.id, &ins.uop, lane, buffers, &mut locals)?;
                }
            }
        }
        Ok(())
    }

    fn step(
        &self,
        id: NodeId,
        uop: &UOp,
        lane: &mut Lane,
        buffers: &mut [Vec<ConstValue>],
        locals: &mut HashMap<NodeId, Vec<ConstValue>>,
    ) -> Result<()> {
        match uop.op {
            UOps::If => {
                let open = lane.active() && lane.value(uop.src[0])?.as_bool();
                lane.mask.push(open);
                return Ok(());
            }
            UOps::EndIf => {
                if lane.mask.pop().is_none() {
                    return Err(KernelError::RegionMismatch(format!("ENDIF {} without IF", id)));
                }
                return Ok(());
            }
            _ if !lane.active() => return Ok(()),
            _ => {}
        }

        let value = match uop.op {
            UOps::Const => uop.arg.as_const(),
            UOps::DefineVar => match &uop.arg {
                Arg::Var { name, .. } => Some(ConstValue::Int(
                    *self
                        .vars
                        .get(name)
                        .ok_or_else(|| KernelError::UnboundVariable(name.clone()))?
                        as i128,
                )),
                _ => None,
            },
            UOps::Alu => {
                let op = uop
                    .arg
                    .as_alu()
                    .ok_or_else(|| KernelError::invalid(UOps::Alu, "missing operator"))?;
                let operands = uop
                    .src
                    .iter()
                    .map(|&s| lane.value(s))
                    .collect::<Result<Vec<_>>>()?;
                Some(exec_alu(op, self.scalar(uop)?, &operands)?)
            }
            UOps::Cast => Some(cast(lane.value(uop.src[0])?, self.scalar(uop)?)),
            UOps::Bitcast => {
                let from = self.nodes.get(&uop.src[0]).copied().map(|n| self.scalar(n));
                let from = from.ok_or(KernelError::UnknownNode(uop.src[0]))??;
                Some(bitcast(lane.value(uop.src[0])?, from, self.scalar(uop)?)?)
            }
            UOps::Load => Some(self.load(uop, lane, buffers, locals)?),
            UOps::Store => {
                self.store(uop, lane, buffers, locals)?;
                None
            }
            // lanes run in lock step; declarations and launch indices are
            // already resolved
            _ => None,
        };
        if let Some(v) = value {
            lane.values.insert(id, v);
        }
        Ok(())
    }

    fn scalar(&self, uop: &UOp) -> Result<ScalarType> {
        uop.dtype
            .and_then(|d| d.scalar())
            .ok_or_else(|| KernelError::invalid(uop.op, "expected a scalar dtype"))
    }

    fn is_op(&self, id: NodeId, op: UOps) -> bool {
        self.nodes.get(&id).map_or(false, |n| n.op == op)
    }

    fn buffer<'b>(
        &self,
        buf: NodeId,
        buffers: &'b mut [Vec<ConstValue>],
        locals: &'b mut HashMap<NodeId, Vec<ConstValue>>,
    ) -> Result<&'b mut Vec<ConstValue>> {
        let decl = self.nodes.get(&buf).ok_or(KernelError::UnknownNode(buf))?;
        match (decl.dtype.and_then(|d| d.space()), &decl.arg) {
            (Some(AddrSpace::Global), Arg::Global(slot)) => buffers
                .get_mut(*slot)
                .ok_or_else(|| KernelError::invalid(UOps::DefineGlobal, format!("no buffer bound to slot {}", slot))),
            (Some(AddrSpace::Local), _) => locals.get_mut(&buf).ok_or(KernelError::UnknownNode(buf)),
            _ => Err(KernelError::UnresolvedIndex(buf)),
        }
    }

    fn element(lane: &Lane, idx: NodeId, size: usize) -> Result<usize> {
        let index = lane.value(idx)?.as_i128();
        if index < 0 || index >= size as i128 {
            return Err(KernelError::IndexOutOfBounds {
                index: index as i64,
                size,
            });
        }
        Ok(index as usize)
    }

    fn load(
        &self,
        uop: &UOp,
        lane: &Lane,
        buffers: &mut [Vec<ConstValue>],
        locals: &mut HashMap<NodeId, Vec<ConstValue>>,
    ) -> Result<ConstValue> {
        let mut rest = &uop.src[2..];
        if let Some((&last, head)) = rest.split_last() {
            if self.is_op(last, UOps::Barrier) {
                rest = head;
            }
        }
        if let [alt, gate] = rest {
            if !lane.value(*gate)?.as_bool() {
                return lane.value(*alt);
            }
        }
        let data = self.buffer(uop.src[0], buffers, locals)?;
        let i = Self::element(lane, uop.src[1], data.len())?;
        Ok(data[i])
    }

    fn store(
        &self,
        uop: &UOp,
        lane: &Lane,
        buffers: &mut [Vec<ConstValue>],
        locals: &mut HashMap<NodeId, Vec<ConstValue>>,
    ) -> Result<()> {
        // a region store's gate is its IF, already applied through the mask
        if let Some(&gate) = uop.src.get(3) {
            if !self.is_op(gate, UOps::If) && !lane.value(gate)?.as_bool() {
                return Ok(());
            }
        }
        let base = self
            .nodes
            .get(&uop.src[0])
            .and_then(|n| n.dtype)
            .map(|d| d.base())
            .ok_or(KernelError::UnresolvedIndex(uop.src[0]))?;
        let value = truncate(lane.value(uop.src[2])?, base);
        let data = self.buffer(uop.src[0], buffers, locals)?;
        let i = Self::element(lane, uop.src[1], data.len())?;
        data[i] = value;
        Ok(())
    }
}

/// Every point of the box `0..bounds[0] x 0..bounds[1] x ...`, last axis
/// fastest; a single empty point when there are no axes
fn coordinates(bounds: &[i64]) -> Vec<Vec<i64>> {
    let mut points = vec![Vec::with_capacity(bounds.len())];
    for &b in bounds {
        points = points
            .into_iter()
            .flat_map(|p| {
                (0..b.max(0)).map(move |v| {
                    let mut q = p.clone();
                    q.push(v);
                    q
                })
            })
            .collect();
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::linearizer::Linearizer;
    use crate::compiler::target::Target;
    use crate::ir::builder::GraphBuilder;
    use approx::assert_relative_eq;

    fn run(b: GraphBuilder, roots: &[NodeId], buffers: &mut [Vec<ConstValue>]) {
        let mut g = b.build();
        let program = Linearizer::new(Target::generic()).linearize(&mut g, roots).unwrap();
        Interpreter::new(&program).execute(buffers).unwrap();
    }

    #[test]
    fn test_coordinates() {
        assert_eq!(coordinates(&[]), vec![Vec::<i64>::new()]);
        assert_eq!(coordinates(&[2, 2]), vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }

    #[test]
    fn test_interpreter_elementwise() {
        let mut b = GraphBuilder::new();
        let out = b.define_global(0, ScalarType::Float32).unwrap();
        let inp = b.define_global(1, ScalarType::Float32).unwrap();
        let lane = b.special("gidx0", 4).unwrap();
        let x = b.load(inp, lane).unwrap();
        let y = b.mul(x, x).unwrap();
        let half = b.const_(ScalarType::Float32, 0.5).unwrap();
        let z = b.add(y, half).unwrap();
        let st = b.store(out, lane, z).unwrap();

        let mut bufs = vec![
            vec![ConstValue::Float(0.0); 4],
            (0..4).map(|i| ConstValue::Float(i as f64)).collect(),
        ];
        run(b, &[st], &mut bufs);
        for i in 0..4 {
            assert_relative_eq!(bufs[0][i].as_f64(), (i * i) as f64 + 0.5);
        }
    }

    #[test]
    fn test_interpreter_gated_store() {
        let mut b = GraphBuilder::new();
        let out = b.define_global(0, ScalarType::Int32).unwrap();
        let lane = b.special("gidx0", 6).unwrap();
        let three = b.int(3).unwrap();
        let gate = b.lt(lane, three).unwrap();
        let one = b.int(1).unwrap();
        let st = b.store_gated(out, lane, one, gate).unwrap();

        let mut bufs = vec![vec![ConstValue::Int(0); 6]];
        run(b, &[st], &mut bufs);
        let got: Vec<i128> = bufs[0].iter().map(|v| v.as_i128()).collect();
        assert_eq!(got, vec![1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_interpreter_out_of_bounds() {
        let mut b = GraphBuilder::new();
        let out = b.define_global(0, ScalarType::Int32).unwrap();
        let nine = b.int(9).unwrap();
        let st = b.store(out, nine, nine).unwrap();
        let mut g = b.build();
        let program = Linearizer::new(Target::generic()).linearize(&mut g, &[st]).unwrap();
        let mut bufs = vec![vec![ConstValue::Int(0); 4]];
        let err = Interpreter::new(&program).execute(&mut bufs).unwrap_err();
        assert_eq!(err, KernelError::IndexOutOfBounds { index: 9, size: 4 });
    }

    #[test]
    fn test_interpreter_unbound_var() {
        let mut b = GraphBuilder::new();
        let out = b.define_global(0, ScalarType::Int32).unwrap();
        let n = b.define_var("n", 0, 3).unwrap();
        let st = b.store(out, n, n).unwrap();
        let mut g = b.build();
        let program = Linearizer::new(Target::generic()).linearize(&mut g, &[st]).unwrap();
        let mut bufs = vec![vec![ConstValue::Int(0); 4]];
        let mut interp = Interpreter::new(&program);
        assert!(matches!(
            interp.execute(&mut bufs),
            Err(KernelError::UnboundVariable(_))
        ));
        interp.set_var("n", 2);
        interp.execute(&mut bufs).unwrap();
        assert_eq!(bufs[0][2], ConstValue::Int(2));
    }
}
