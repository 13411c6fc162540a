// IR Computation Graph
//
// Interning arena of UOps. Identical content always maps to the same NodeId
// and a node can only reference nodes created before it, so the graph is a
// DAG by construction.

use crate::core::error::{KernelError, Result};
use crate::ir::alu::truncate;
use crate::ir::node::{Arg, BinaryOps, NodeId, UOp, UOps};
use crate::ir::types::{AddrSpace, DType};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Sources of a LOAD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadParts {
    pub buf: NodeId,
    pub idx: NodeId,
    /// Value produced when the gate is false
    pub alt: Option<NodeId>,
    pub gate: Option<NodeId>,
    pub barrier: Option<NodeId>,
}

/// Sources of a STORE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreParts {
    pub buf: NodeId,
    pub idx: NodeId,
    pub val: NodeId,
    /// Boolean gate, or the IF of the region the store was moved into
    pub gate: Option<NodeId>,
}

/// Computation graph
#[derive(Debug, Clone, Default)]
pub struct UOpGraph {
    /// Nodes indexed by ID (creation order)
    nodes: Vec<UOp>,
    /// Content to ID
    interned: HashMap<UOp, NodeId>,
}

impl UOpGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get a node by ID
    pub fn get(&self, id: NodeId) -> Result<&UOp> {
        self.nodes.get(id).ok_or(KernelError::UnknownNode(id))
    }

    /// All nodes in creation order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &UOp)> {
        self.nodes.iter().enumerate()
    }

    /// ID of an already interned node
    pub fn lookup(&self, uop: &UOp) -> Option<NodeId> {
        self.interned.get(uop).copied()
    }

    pub fn dtype(&self, id: NodeId) -> Result<Option<DType>> {
        Ok(self.get(id)?.dtype)
    }

    /// Add (or find) a node
    pub fn add(
        &mut self,
        op: UOps,
        dtype: Option<DType>,
        src: Vec<NodeId>,
        arg: Arg,
    ) -> Result<NodeId> {
        self.insert(UOp::new(op, dtype, src, arg))
    }

    /// Add (or find) a node given by value
    pub fn insert(&mut self, mut uop: UOp) -> Result<NodeId> {
        // sources must already exist; a later node as source closes a cycle
        for &s in &uop.src {
            if s >= self.nodes.len() {
                return Err(KernelError::Cycle { source_id: s });
            }
        }
        self.validate(&mut uop)?;

        if let Some(&id) = self.interned.get(&uop) {
            return Ok(id);
        }
        let id = self.nodes.len();
        log::trace!("uop {}: {:?} {:?} {:?} {}", id, uop.op, uop.dtype, uop.src, uop.arg);
        self.interned.insert(uop.clone(), id);
        self.nodes.push(uop);
        Ok(id)
    }

    fn validate(&self, uop: &mut UOp) -> Result<()> {
        let op = uop.op;
        if op.is_valueless() != uop.dtype.is_none() {
            return Err(KernelError::invalid(
                op,
                if uop.dtype.is_none() {
                    "missing dtype"
                } else {
                    "valueless node carries a dtype"
                },
            ));
        }
        match op {
            UOps::DefineGlobal | UOps::DefineLocal => {
                let space = if op == UOps::DefineGlobal {
                    AddrSpace::Global
                } else {
                    AddrSpace::Local
                };
                if uop.dtype.and_then(|d| d.space()) != Some(space) {
                    return Err(KernelError::invalid(op, "must be pointer typed"));
                }
                let arg_ok = matches!(
                    (&uop.arg, op),
                    (Arg::Global(_), UOps::DefineGlobal) | (Arg::Local { .. }, UOps::DefineLocal)
                );
                if !arg_ok || !uop.src.is_empty() {
                    return Err(KernelError::invalid(op, "bad buffer declaration"));
                }
            }
            UOps::Const => {
                let st = uop
                    .dtype
                    .and_then(|d| d.scalar())
                    .ok_or_else(|| KernelError::invalid(op, "constants are scalar"))?;
                let value = uop
                    .arg
                    .as_const()
                    .ok_or_else(|| KernelError::invalid(op, "missing value"))?;
                // one canonical value per dtype so that interning is exact
                uop.arg = Arg::constant(truncate(value, st));
            }
            UOps::Special | UOps::DefineVar => {
                let typed = uop.dtype.map_or(false, |d| d.is_int());
                let arg_ok = matches!(
                    (&uop.arg, op),
                    (Arg::Special { bound, .. }, UOps::Special) if *bound > 0
                ) || matches!(
                    (&uop.arg, op),
                    (Arg::Var { min, max, .. }, UOps::DefineVar) if min <= max
                );
                if !typed || !arg_ok || !uop.src.is_empty() {
                    return Err(KernelError::invalid(op, "bad index parameter"));
                }
            }
            UOps::Alu => {
                let alu = uop
                    .arg
                    .as_alu()
                    .ok_or_else(|| KernelError::invalid(op, "missing operator"))?;
                if alu.arity() != uop.src.len() {
                    return Err(KernelError::invalid(
                        op,
                        format!("{} takes {} operands, got {}", alu, alu.arity(), uop.src.len()),
                    ));
                }
            }
            UOps::Load if uop.src.len() < 2 => {
                return Err(KernelError::invalid(op, "needs a buffer and an index"));
            }
            UOps::Store if uop.src.len() < 3 || uop.src.len() > 4 => {
                return Err(KernelError::invalid(op, "expects (buf, idx, val[, gate])"));
            }
            UOps::Cast | UOps::Bitcast if uop.src.len() != 1 => {
                return Err(KernelError::invalid(op, "takes one operand"));
            }
            UOps::If if uop.src.is_empty() => {
                return Err(KernelError::invalid(op, "needs a gate"));
            }
            UOps::EndIf => {
                let opens = uop.src.first().and_then(|&s| self.nodes.get(s));
                if opens.map(|n| n.op) != Some(UOps::If) {
                    return Err(KernelError::RegionMismatch(
                        "ENDIF must reference the IF it closes".into(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Nodes reachable from `roots` in dependency order
    pub fn toposort(&self, roots: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut visited = HashMap::new();
        let mut order = Vec::new();
        for &root in roots {
            self.dfs_topo(root, &mut visited, &mut order)?;
        }
        Ok(order)
    }

    /// Post-order DFS with an explicit stack of (node, next source) frames
    fn dfs_topo(
        &self,
        node_id: NodeId,
        visited: &mut HashMap<NodeId, bool>,
        order: &mut Vec<NodeId>,
    ) -> Result<()> {
        if let Some(&in_progress) = visited.get(&node_id) {
            if in_progress {
                return Err(KernelError::Cycle { source_id: node_id });
            }
            return Ok(());
        }

        visited.insert(node_id, true);
        let mut stack: Vec<(NodeId, usize)> = vec![(node_id, 0)];
        while let Some(&(id, next)) = stack.last() {
            match self.get(id)?.src.get(next).copied() {
                Some(input_id) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match visited.get(&input_id) {
                        Some(true) => return Err(KernelError::Cycle { source_id: input_id }),
                        Some(false) => {}
                        None => {
                            visited.insert(input_id, true);
                            stack.push((input_id, 0));
                        }
                    }
                }
                None => {
                    stack.pop();
                    visited.insert(id, false);
                    order.push(id);
                }
            }
        }
        Ok(())
    }

    /// Every node reachable from `roots`, roots included
    pub fn parents(&self, roots: &[NodeId]) -> Result<HashSet<NodeId>> {
        Ok(self.toposort(roots)?.into_iter().collect())
    }

    /// Does `from` (transitively) read `target`?
    pub fn depends_on(&self, from: NodeId, target: NodeId) -> bool {
        if from < target {
            return false;
        }
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(n) = stack.pop() {
            if n == target {
                return true;
            }
            if n < target || !seen.insert(n) {
                continue;
            }
            if let Some(node) = self.nodes.get(n) {
                stack.extend(node.src.iter().copied());
            }
        }
        false
    }

    /// Inclusive integer range of an index-valued node, when it can be bounded
    pub fn bounds(&self, id: NodeId) -> Option<(i128, i128)> {
        let node = self.nodes.get(id)?;
        let range = match node.op {
            UOps::Const => {
                let v = node.arg.as_const()?;
                if v.is_float() {
                    return None;
                }
                let v = v.as_i128();
                (v, v)
            }
            UOps::Special => match &node.arg {
                Arg::Special { bound, .. } => (0, *bound as i128 - 1),
                _ => return None,
            },
            UOps::DefineVar => match &node.arg {
                Arg::Var { min, max, .. } => (*min as i128, *max as i128),
                _ => return None,
            },
            UOps::Alu => {
                let op = match node.arg.as_alu()? {
                    crate::ir::node::AluOp::Binary(op) => op,
                    _ => return None,
                };
                let (a0, a1) = self.bounds(node.src[0])?;
                let (b0, b1) = self.bounds(node.src[1])?;
                match op {
                    BinaryOps::Add => (a0 + b0, a1 + b1),
                    BinaryOps::Sub => (a0 - b1, a1 - b0),
                    BinaryOps::Mul => {
                        let p = [a0 * b0, a0 * b1, a1 * b0, a1 * b1];
                        (*p.iter().min()?, *p.iter().max()?)
                    }
                    BinaryOps::Max => (a0.max(b0), a1.max(b1)),
                    BinaryOps::IDiv if b0 == b1 && b0 > 0 && a0 >= 0 => (a0 / b0, a1 / b0),
                    BinaryOps::Mod if b0 == b1 && b0 > 0 && a0 >= 0 => {
                        if a1 < b0 {
                            (a0, a1)
                        } else {
                            (0, b0 - 1)
                        }
                    }
                    BinaryOps::Shl if b0 == b1 && (0..64).contains(&b0) && a0 >= 0 => {
                        (a0 << b0, a1 << b0)
                    }
                    BinaryOps::Shr if b0 == b1 && (0..128).contains(&b0) && a0 >= 0 => {
                        (a0 >> b0, a1 >> b0)
                    }
                    _ => return None,
                }
            }
            _ => return None,
        };
        // wrapped arithmetic makes the interval meaningless
        let st = node.dtype?.scalar()?;
        if st.is_float() || range.0 < st.int_min() || range.1 > st.int_max() {
            return None;
        }
        Some(range)
    }

    /// Rebuild the graph under `roots` with `replace` applied; returns the
    /// new roots
    pub fn substitute(
        &mut self,
        roots: &[NodeId],
        replace: &HashMap<NodeId, NodeId>,
    ) -> Result<Vec<NodeId>> {
        let order = self.toposort(roots)?;
        let mut mapped: HashMap<NodeId, NodeId> = HashMap::new();
        for id in order {
            if let Some(&to) = replace.get(&id) {
                mapped.insert(id, to);
                continue;
            }
            let node = self.get(id)?;
            let src: Vec<NodeId> = node
                .src
                .iter()
                .map(|s| mapped.get(s).copied().unwrap_or(*s))
                .collect();
            if src == node.src {
                mapped.insert(id, id);
                continue;
            }
            let rebuilt = UOp::new(node.op, node.dtype, src, node.arg.clone());
            let new_id = self.insert(rebuilt)?;
            mapped.insert(id, new_id);
        }
        Ok(roots
            .iter()
            .map(|r| mapped.get(r).copied().unwrap_or(*r))
            .collect())
    }

    /// Total structural order: op, then arg, then dtype, then sources
    pub fn cmp_nodes(&self, a: NodeId, b: NodeId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let (x, y) = match (self.nodes.get(a), self.nodes.get(b)) {
            (Some(x), Some(y)) => (x, y),
            _ => return a.cmp(&b),
        };
        x.op.cmp(&y.op)
            .then_with(|| x.arg.cmp(&y.arg))
            .then_with(|| x.dtype.cmp(&y.dtype))
            .then_with(|| x.src.len().cmp(&y.src.len()))
            .then_with(|| {
                x.src
                    .iter()
                    .zip(&y.src)
                    .map(|(&p, &q)| self.cmp_nodes(p, q))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            })
    }

    pub fn load_parts(&self, id: NodeId) -> Result<LoadParts> {
        let node = self.get(id)?;
        if node.op != UOps::Load || node.src.len() < 2 {
            return Err(KernelError::UnresolvedIndex(id));
        }
        let mut rest = &node.src[2..];
        let mut barrier = None;
        if let Some((&last, head)) = rest.split_last() {
            if self.get(last)?.op == UOps::Barrier {
                barrier = Some(last);
                rest = head;
            }
        }
        let (alt, gate) = match rest {
            [] => (None, None),
            [alt, gate] => (Some(*alt), Some(*gate)),
            _ => return Err(KernelError::invalid(UOps::Load, "expects (buf, idx[, alt, gate][, barrier])")),
        };
        Ok(LoadParts {
            buf: node.src[0],
            idx: node.src[1],
            alt,
            gate,
            barrier,
        })
    }

    pub fn store_parts(&self, id: NodeId) -> Result<StoreParts> {
        let node = self.get(id)?;
        if node.op != UOps::Store || node.src.len() < 3 {
            return Err(KernelError::UnresolvedIndex(id));
        }
        Ok(StoreParts {
            buf: node.src[0],
            idx: node.src[1],
            val: node.src[2],
            gate: node.src.get(3).copied(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::AluOp;
    use crate::ir::types::{ConstValue, ScalarType};

    fn int_const(g: &mut UOpGraph, v: i64) -> NodeId {
        g.add(
            UOps::Const,
            Some(ScalarType::Int32.into()),
            vec![],
            Arg::constant(ConstValue::from(v)),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_graph() {
        let graph = UOpGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.toposort(&[]).unwrap(), Vec::<NodeId>::new());
    }

    #[test]
    fn test_interning() {
        let mut g = UOpGraph::new();
        let a = int_const(&mut g, 3);
        let b = int_const(&mut g, 3);
        let c = int_const(&mut g, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_const_values_are_canonical() {
        let mut g = UOpGraph::new();
        let a = g
            .add(
                UOps::Const,
                Some(ScalarType::Uint8.into()),
                vec![],
                Arg::constant(ConstValue::Int(256 + 7)),
            )
            .unwrap();
        let b = g
            .add(
                UOps::Const,
                Some(ScalarType::Uint8.into()),
                vec![],
                Arg::constant(ConstValue::Int(7)),
            )
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_forward_reference_is_cycle() {
        let mut g = UOpGraph::new();
        let a = int_const(&mut g, 1);
        let err = g
            .add(
                UOps::Alu,
                Some(ScalarType::Int32.into()),
                vec![a, a + 1],
                Arg::Alu(BinaryOps::Add.into()),
            )
            .unwrap_err();
        assert_eq!(err, KernelError::Cycle { source_id: a + 1 });
    }

    #[test]
    fn test_dtype_presence() {
        let mut g = UOpGraph::new();
        let a = int_const(&mut g, 1);
        assert!(g.add(UOps::Sink, Some(ScalarType::Int32.into()), vec![a], Arg::None).is_err());
        assert!(g.add(UOps::Cast, None, vec![a], Arg::None).is_err());
        assert!(g
            .add(UOps::DefineGlobal, Some(ScalarType::Float32.into()), vec![], Arg::Global(0))
            .is_err());
    }

    #[test]
    fn test_toposort_and_bounds() {
        let mut g = UOpGraph::new();
        let lane = g
            .add(
                UOps::Special,
                Some(ScalarType::Int32.into()),
                vec![],
                Arg::Special { name: "gidx0".into(), bound: 4 },
            )
            .unwrap();
        let four = int_const(&mut g, 4);
        let off = g
            .add(
                UOps::Alu,
                Some(ScalarType::Int32.into()),
                vec![lane, four],
                Arg::Alu(BinaryOps::Mul.into()),
            )
            .unwrap();
        assert_eq!(g.toposort(&[off]).unwrap(), vec![lane, four, off]);
        assert_eq!(g.bounds(off), Some((0, 12)));
        assert!(g.depends_on(off, lane));
        assert!(!g.depends_on(lane, off));
    }

    #[test]
    fn test_toposort_deep_chain() {
        let mut g = UOpGraph::new();
        let one = int_const(&mut g, 1);
        let mut acc = one;
        for _ in 0..200_000 {
            acc = g
                .add(UOps::Alu, Some(ScalarType::Int32.into()), vec![acc, one], Arg::Alu(BinaryOps::Add.into()))
                .unwrap();
        }
        let order = g.toposort(&[acc]).unwrap();
        assert_eq!(order.len(), 200_001);
        assert_eq!(order[0], one);
        assert_eq!(*order.last().unwrap(), acc);
    }

    #[test]
    fn test_cmp_nodes_orders_by_operator() {
        let mut g = UOpGraph::new();
        let a = int_const(&mut g, 2);
        let b = int_const(&mut g, 5);
        let mut alu = |op: BinaryOps| {
            g.add(UOps::Alu, Some(ScalarType::Int32.into()), vec![a, b], Arg::Alu(AluOp::Binary(op)))
                .unwrap()
        };
        let add = alu(BinaryOps::Add);
        let mul = alu(BinaryOps::Mul);
        assert_ne!(g.cmp_nodes(add, mul), Ordering::Equal);
        assert_eq!(g.cmp_nodes(add, mul), g.cmp_nodes(mul, add).reverse());
    }

    #[test]
    fn test_substitute_rebuilds_users() {
        let mut g = UOpGraph::new();
        let a = int_const(&mut g, 2);
        let b = int_const(&mut g, 5);
        let c = int_const(&mut g, 9);
        let add = g
            .add(UOps::Alu, Some(ScalarType::Int32.into()), vec![a, b], Arg::Alu(BinaryOps::Add.into()))
            .unwrap();
        let map: HashMap<NodeId, NodeId> = [(b, c)].into_iter().collect();
        let roots = g.substitute(&[add], &map).unwrap();
        assert_eq!(g.get(roots[0]).unwrap().src, vec![a, c]);
    }
}
