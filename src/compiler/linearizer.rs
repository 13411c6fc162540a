// Linearizer: UOp graph -> ordered program
//
// Pipeline:
// 1. rewrite passes (constant folding, target strength reduction)
// 2. structural verification against the target
// 3. barrier insertion for loads of shared buffers
// 4. gated stores moved into IF/ENDIF regions
// 5. priority toposort with region and store-address constraints

use crate::compiler::cache::{CacheKey, ProgramCache};
use crate::compiler::program::{Instruction, Program};
use crate::compiler::target::{Target, TargetFeature};
use crate::core::error::{KernelError, Result};
use crate::ir::graph::UOpGraph;
use crate::ir::node::{AluOp, Arg, NodeId, TernaryOps, UOp, UOps};
use crate::ir::types::{AddrSpace, DType, ScalarType};
use crate::optimizer::{BitshiftPass, ConstantFoldPass, PassManager};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Sort key of a store: buffer, then static address range, then creation
type StoreKey = (NodeId, Option<(i128, i128)>, NodeId);

/// Turns a UOp graph into a [`Program`] for one target
#[derive(Debug, Clone)]
pub struct Linearizer {
    target: Target,
    name: String,
    cache: Option<Arc<ProgramCache>>,
}

impl Linearizer {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            name: "kernel".to_string(),
            cache: None,
        }
    }

    /// Reuse programs for graphs already linearized through `cache`
    pub fn with_cache(mut self, cache: Arc<ProgramCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Name given to produced programs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Linearize everything reachable from `roots`.
    ///
    /// The graph is extended with the rewritten nodes (folded constants,
    /// barriers, IF/ENDIF regions); existing nodes are never modified.
    /// On a cache hit the graph is left untouched and the program's node ids
    /// are those of the graph it was first built from.
    pub fn linearize(&self, graph: &mut UOpGraph, roots: &[NodeId]) -> Result<Program> {
        if roots.is_empty() {
            return Ok(Program::empty(self.name.clone()));
        }
        let Some(cache) = &self.cache else {
            return self.compile(graph, roots);
        };
        let key = CacheKey::from_graph(graph, roots, &self.target, &self.name)?;
        if let Some(program) = cache.get(&key) {
            log::debug!("program cache hit {}", key.to_hex());
            return Ok(program.as_ref().clone());
        }
        let program = self.compile(graph, roots)?;
        cache.insert_as(key, program.clone());
        Ok(program)
    }

    fn compile(&self, graph: &mut UOpGraph, roots: &[NodeId]) -> Result<Program> {
        log::info!(
            "linearizing {} root(s) for target '{}'",
            roots.len(),
            self.target.name()
        );

        let mut roots = roots.to_vec();
        let mut passes = PassManager::new();
        passes.add_pass(Box::new(ConstantFoldPass::new()));
        if self.target.supports(TargetFeature::BitShift) {
            passes.add_pass(Box::new(BitshiftPass::new()));
        }
        passes.run_all(graph, &mut roots)?;

        self.verify(graph, &roots)?;
        let roots = insert_barriers(graph, roots)?;

        let gated = GateRewriter::new(graph, &roots, Grouping::Shared)?.run(&roots)?;
        let order = match Scheduler::new(graph, &gated).and_then(Scheduler::schedule) {
            Err(KernelError::RegionMismatch(reason)) => {
                log::debug!("regrouping gated stores per buffer: {}", reason);
                let gated = GateRewriter::new(graph, &roots, Grouping::PerBuffer)?.run(&roots)?;
                Scheduler::new(graph, &gated)?.schedule()?
            }
            other => other?,
        };
        let uops = order
            .into_iter()
            .map(|id| {
                Ok(Instruction {
                    id,
                    uop: graph.get(id)?.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let program = Program::new(self.name.clone(), uops)?;
        log::debug!("linearized {} instruction(s)", program.len());
        log::trace!("{}", program);
        Ok(program)
    }

    fn verify(&self, graph: &UOpGraph, roots: &[NodeId]) -> Result<()> {
        for id in graph.toposort(roots)? {
            let uop = graph.get(id)?;
            if uop.dtype.map(|d| d.base()) == Some(ScalarType::Float64) {
                self.target.require(TargetFeature::Float64)?;
            }
            match uop.op {
                UOps::DefineLocal => self.target.require(TargetFeature::SharedMemory)?,
                UOps::Alu if uop.arg.as_alu() == Some(AluOp::Ternary(TernaryOps::MulAcc)) => {
                    self.target.require(TargetFeature::MulAcc)?
                }
                UOps::Store => {
                    let parts = graph.store_parts(id)?;
                    check_address(graph, id, parts.buf, parts.idx)?;
                    if let Some(gate) = parts.gate {
                        if graph.dtype(gate)? != Some(DType::Scalar(ScalarType::Bool)) {
                            return Err(KernelError::invalid(UOps::Store, "gate must be bool"));
                        }
                    }
                }
                UOps::Load => {
                    let parts = graph.load_parts(id)?;
                    check_address(graph, id, parts.buf, parts.idx)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A memory access needs a pointer buffer and an integer index
fn check_address(graph: &UOpGraph, id: NodeId, buf: NodeId, idx: NodeId) -> Result<()> {
    let buf_ok = graph.dtype(buf)?.map_or(false, |d| d.is_ptr());
    let idx_ok = graph.dtype(idx)?.map_or(false, |d| d.is_int());
    if buf_ok && idx_ok {
        Ok(())
    } else {
        Err(KernelError::UnresolvedIndex(id))
    }
}

fn is_local_buffer(graph: &UOpGraph, buf: NodeId) -> Result<bool> {
    Ok(graph.dtype(buf)?.and_then(|d| d.space()) == Some(AddrSpace::Local))
}

/// Give every shared-buffer load without a barrier one whose sources are
/// the stores to that buffer it does not itself feed. Returns the new roots.
fn insert_barriers(graph: &mut UOpGraph, mut roots: Vec<NodeId>) -> Result<Vec<NodeId>> {
    loop {
        let order = graph.toposort(&roots)?;
        let mut pending = None;
        for &id in &order {
            if graph.get(id)?.op != UOps::Load {
                continue;
            }
            let parts = graph.load_parts(id)?;
            if parts.barrier.is_none() && is_local_buffer(graph, parts.buf)? {
                pending = Some((id, parts.buf));
                break;
            }
        }
        let Some((load, buf)) = pending else {
            return Ok(roots);
        };

        // one forward sweep: users of the load are downstream, every other
        // store to the buffer is a writer the load must wait for
        let mut downstream: HashSet<NodeId> = HashSet::from([load]);
        let mut stores = Vec::new();
        for &id in &order {
            let node = graph.get(id)?;
            if node.src.iter().any(|s| downstream.contains(s)) {
                downstream.insert(id);
            } else if node.op == UOps::Store && node.src[0] == buf {
                stores.push(id);
            }
        }
        if stores.is_empty() {
            log::trace!("load {} reads shared buffer {} before any store", load, buf);
        }
        let node = graph.get(load)?.clone();
        let mut src = node.src.clone();
        let barrier = graph.add(UOps::Barrier, None, stores, Arg::None)?;
        src.push(barrier);
        let rebuilt = graph.insert(UOp::new(node.op, node.dtype, src, node.arg))?;
        log::trace!("load {} -> {} after barrier {}", load, rebuilt, barrier);

        let replace: HashMap<NodeId, NodeId> = [(load, rebuilt)].into_iter().collect();
        roots = graph.substitute(&roots, &replace)?;
    }
}

/// How gated stores sharing a gate are split into regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grouping {
    /// One region may hold stores to several buffers
    Shared,
    /// Every region holds stores to a single buffer
    PerBuffer,
}

/// Region key: gate, store level, buffer (per-buffer grouping only), segment
type GroupKey = (NodeId, usize, Option<NodeId>, usize);

/// Moves gated stores into IF/ENDIF regions.
///
/// Stores sharing a gate are grouped by their store level (1 + the deepest
/// store they depend on) so a region never waits on a store of its own
/// group. Within a level a region covers a run of neighbours in each
/// buffer's address chain: a store to the same buffer outside the group
/// sitting between two members starts a new segment. Every use of a
/// grouped store is redirected to the group's ENDIF.
struct GateRewriter<'g> {
    graph: &'g mut UOpGraph,
    group_of: HashMap<NodeId, usize>,
    groups: Vec<StoreGroup>,
    endifs: Vec<Option<NodeId>>,
    mapped: HashMap<NodeId, NodeId>,
}

#[derive(Debug, Clone)]
struct StoreGroup {
    gate: NodeId,
    members: Vec<NodeId>,
    /// Earlier group with the same gate; its ENDIF orders this IF
    after: Option<usize>,
}

/// Unit of work of the rebuild: a node, or a whole region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Step {
    Node(NodeId),
    Group(usize),
}

impl<'g> GateRewriter<'g> {
    fn new(graph: &'g mut UOpGraph, roots: &[NodeId], grouping: Grouping) -> Result<Self> {
        let order = graph.toposort(roots)?;
        let mut level: HashMap<NodeId, usize> = HashMap::with_capacity(order.len());
        let mut keyed: BTreeMap<(NodeId, usize), Vec<NodeId>> = BTreeMap::new();
        let mut chains: BTreeMap<NodeId, Vec<StoreKey>> = BTreeMap::new();
        for &id in &order {
            let node = graph.get(id)?;
            let mut l = node.src.iter().filter_map(|s| level.get(s)).copied().max().unwrap_or(0);
            if node.op == UOps::Store {
                l += 1;
                let key = store_key(graph, id);
                if key.1.is_some() {
                    chains.entry(key.0).or_default().push(key);
                }
                if let Some(gate) = graph.store_parts(id)?.gate {
                    if graph.get(gate)?.op != UOps::If {
                        keyed.entry((gate, l)).or_default().push(id);
                    }
                }
            }
            level.insert(id, l);
        }
        for chain in chains.values_mut() {
            chain.sort();
        }

        let mut split: BTreeMap<GroupKey, Vec<NodeId>> = BTreeMap::new();
        for ((gate, l), members) in keyed {
            let segment = segments(graph, &chains, &members);
            for m in members {
                let buf = graph.store_parts(m)?.buf;
                let seg = segment.get(&m).copied().unwrap_or(0);
                let owner = match grouping {
                    Grouping::Shared => None,
                    Grouping::PerBuffer => Some(buf),
                };
                split.entry((gate, l, owner, seg)).or_default().push(m);
            }
        }

        let mut group_of = HashMap::new();
        let mut groups: Vec<StoreGroup> = Vec::with_capacity(split.len());
        for ((gate, ..), members) in split {
            for &m in &members {
                group_of.insert(m, groups.len());
            }
            let after = match groups.last() {
                Some(prev) if prev.gate == gate => Some(groups.len() - 1),
                _ => None,
            };
            groups.push(StoreGroup { gate, members, after });
        }
        log::trace!("{} gated region(s), {:?} grouping", groups.len(), grouping);
        Ok(Self {
            graph,
            group_of,
            endifs: vec![None; groups.len()],
            groups,
            mapped: HashMap::new(),
        })
    }

    fn run(mut self, roots: &[NodeId]) -> Result<Vec<NodeId>> {
        if self.groups.is_empty() {
            return Ok(roots.to_vec());
        }
        roots.iter().map(|&r| self.resolve(r)).collect()
    }

    fn is_done(&self, step: Step) -> bool {
        match step {
            Step::Node(id) => self.mapped.contains_key(&id),
            Step::Group(g) => self.endifs[g].is_some(),
        }
    }

    fn inputs(&self, step: Step) -> Result<Vec<Step>> {
        match step {
            Step::Node(id) => match self.group_of.get(&id) {
                Some(&g) => Ok(vec![Step::Group(g)]),
                None => Ok(self.graph.get(id)?.src.iter().map(|&s| Step::Node(s)).collect()),
            },
            Step::Group(g) => {
                let group = &self.groups[g];
                let mut steps = vec![Step::Node(group.gate)];
                if let Some(prev) = group.after {
                    steps.push(Step::Group(prev));
                }
                for &m in &group.members {
                    let parts = self.graph.store_parts(m)?;
                    steps.extend([Step::Node(parts.buf), Step::Node(parts.idx), Step::Node(parts.val)]);
                }
                Ok(steps)
            }
        }
    }

    /// Rebuild `root` bottom-up with an explicit stack
    fn resolve(&mut self, root: NodeId) -> Result<NodeId> {
        let mut stack = vec![(Step::Node(root), false)];
        let mut open: HashSet<Step> = HashSet::new();
        while let Some((step, expanded)) = stack.pop() {
            if self.is_done(step) {
                continue;
            }
            if expanded {
                open.remove(&step);
                self.finish(step)?;
                continue;
            }
            open.insert(step);
            stack.push((step, true));
            for input in self.inputs(step)? {
                if open.contains(&input) {
                    let source_id = match input {
                        Step::Node(id) => id,
                        Step::Group(g) => self.groups[g].gate,
                    };
                    return Err(KernelError::Cycle { source_id });
                }
                if !self.is_done(input) {
                    stack.push((input, false));
                }
            }
        }
        self.lookup(root)
    }

    fn lookup(&self, id: NodeId) -> Result<NodeId> {
        self.mapped.get(&id).copied().ok_or(KernelError::UnknownNode(id))
    }

    fn finish(&mut self, step: Step) -> Result<()> {
        match step {
            Step::Group(g) => self.finish_group(g),
            Step::Node(id) => {
                if let Some(&g) = self.group_of.get(&id) {
                    let endif = self.endifs[g].ok_or(KernelError::UnknownNode(id))?;
                    self.mapped.insert(id, endif);
                    return Ok(());
                }
                let node = self.graph.get(id)?.clone();
                let src = node
                    .src
                    .iter()
                    .map(|&s| self.lookup(s))
                    .collect::<Result<Vec<_>>>()?;
                let new_id = if src == node.src {
                    id
                } else {
                    self.graph
                        .insert(UOp::new(node.op, node.dtype, src, node.arg))?
                };
                self.mapped.insert(id, new_id);
                Ok(())
            }
        }
    }

    fn finish_group(&mut self, g: usize) -> Result<()> {
        let StoreGroup { gate, members, after } = self.groups[g].clone();
        let gate = self.lookup(gate)?;
        let mut src = vec![gate];
        // regions over one gate stay distinct IF nodes
        if let Some(prev) = after.and_then(|p| self.endifs[p]) {
            src.push(prev);
        }
        let region = self.graph.add(
            UOps::If,
            Some(DType::Scalar(ScalarType::Bool)),
            src,
            Arg::None,
        )?;

        let mut stores = Vec::with_capacity(members.len());
        for &m in &members {
            let parts = self.graph.store_parts(m)?;
            let buf = self.lookup(parts.buf)?;
            let idx = self.lookup(parts.idx)?;
            let val = self.lookup(parts.val)?;
            let store = self
                .graph
                .add(UOps::Store, None, vec![buf, idx, val, region], Arg::None)?;
            stores.push(store);
        }
        stores.sort_by_key(|&s| store_key(self.graph, s));
        stores.dedup();

        let mut src = vec![region];
        src.extend(stores);
        let endif = self.graph.add(UOps::EndIf, None, src, Arg::None)?;
        log::trace!("gate {}: {} store(s) in region {}", gate, members.len(), region);
        self.endifs[g] = Some(endif);
        for m in members {
            self.mapped.insert(m, endif);
        }
        Ok(())
    }
}

/// Segment of every member within its buffer's address chain. The segment
/// advances each time a store outside `members` separates two members.
fn segments(
    graph: &UOpGraph,
    chains: &BTreeMap<NodeId, Vec<StoreKey>>,
    members: &[NodeId],
) -> HashMap<NodeId, usize> {
    let inside: HashSet<NodeId> = members.iter().copied().collect();
    let buffers: BTreeSet<NodeId> = members.iter().map(|&m| store_key(graph, m).0).collect();
    let mut segment = HashMap::new();
    for buf in buffers {
        let Some(chain) = chains.get(&buf) else {
            continue;
        };
        let (mut seg, mut started, mut gap) = (0, false, false);
        for &(_, _, store) in chain {
            if inside.contains(&store) {
                if started && gap {
                    seg += 1;
                }
                started = true;
                gap = false;
                segment.insert(store, seg);
            } else if started {
                gap = true;
            }
        }
    }
    segment
}

fn store_key(graph: &UOpGraph, store: NodeId) -> StoreKey {
    match graph.get(store) {
        Ok(node) if node.op == UOps::Store => (node.src[0], graph.bounds(node.src[1]), store),
        _ => (NodeId::MAX, None, store),
    }
}

/// Emission priority: buffer declarations, then launch indices, then
/// creation order
fn priority(op: UOps) -> u8 {
    match op {
        UOps::DefineGlobal | UOps::DefineLocal => 0,
        UOps::Special | UOps::DefineVar => 1,
        _ => 2,
    }
}

struct Scheduler<'g> {
    graph: &'g UOpGraph,
    nodes: Vec<NodeId>,
    deps: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Store or ENDIF -> IF of the region it belongs to
    region_of: HashMap<NodeId, NodeId>,
}

impl<'g> Scheduler<'g> {
    fn new(graph: &'g UOpGraph, roots: &[NodeId]) -> Result<Self> {
        let nodes: Vec<NodeId> = graph
            .toposort(roots)?
            .into_iter()
            .filter(|&id| graph.get(id).map_or(false, |n| n.op != UOps::Sink))
            .collect();
        let present: HashSet<NodeId> = nodes.iter().copied().collect();

        let mut deps: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        let mut region_of = HashMap::new();
        for &id in &nodes {
            let node = graph.get(id)?;
            deps.insert(
                id,
                node.src.iter().copied().filter(|s| present.contains(s)).collect(),
            );
            if node.op == UOps::EndIf {
                let region = node.src[0];
                region_of.insert(id, region);
                for &s in &node.src[1..] {
                    region_of.insert(s, region);
                }
            }
        }

        let mut sched = Self {
            graph,
            nodes,
            deps,
            region_of,
        };

        // an IF opens only once every input of its stores is available
        let regions: BTreeSet<NodeId> = sched.region_of.values().copied().collect();
        for region in regions {
            let members = sched.members(region);
            let mut inputs = BTreeSet::new();
            for &m in &members {
                if let Some(d) = sched.deps.get(&m) {
                    inputs.extend(d.iter().copied().filter(|&s| s != region && !members.contains(&s)));
                }
            }
            if let Some(d) = sched.deps.get_mut(&region) {
                d.extend(inputs);
            }
        }

        sched.chain_stores()?;
        Ok(sched)
    }

    /// Stores and ENDIF of a region
    fn members(&self, region: NodeId) -> BTreeSet<NodeId> {
        self.region_of
            .iter()
            .filter(|(_, &r)| r == region)
            .map(|(&n, _)| n)
            .collect()
    }

    /// Does `from` wait (transitively) on `target`?
    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(n) = stack.pop() {
            if n == target {
                return true;
            }
            if !seen.insert(n) {
                continue;
            }
            if let Some(d) = self.deps.get(&n) {
                stack.extend(d.iter().copied());
            }
        }
        false
    }

    /// Order stores to one buffer by static address where that is possible.
    ///
    /// A store that reads (through a barrier and load) the one at the next
    /// higher address keeps its data order. Any other conflict comes from
    /// region placement and is a `RegionMismatch`.
    fn chain_stores(&mut self) -> Result<()> {
        let mut by_buffer: BTreeMap<NodeId, Vec<(StoreKey, NodeId)>> = BTreeMap::new();
        for &id in &self.nodes {
            let node = self.graph.get(id)?;
            if node.op != UOps::Store {
                continue;
            }
            let key = store_key(self.graph, id);
            if key.1.is_some() {
                by_buffer.entry(node.src[0]).or_default().push((key, id));
            }
        }

        for (_, mut stores) in by_buffer {
            stores.sort();
            for pair in stores.windows(2) {
                let (prev, next) = (pair[0].1, pair[1].1);
                let prev_region = self.region_of.get(&prev).copied();
                let next_region = self.region_of.get(&next).copied();
                // a store inside a region makes its IF wait as well
                let mut waiters = vec![next];
                if let Some(r) = next_region {
                    if prev_region != Some(r) {
                        waiters.push(r);
                    }
                }
                if waiters.iter().any(|&w| self.reaches(prev, w)) {
                    if self.graph.depends_on(prev, next) {
                        log::debug!("store {} reads store {}; data order kept", prev, next);
                        continue;
                    }
                    return Err(KernelError::RegionMismatch(format!(
                        "store {} cannot precede store {} across their regions",
                        prev, next
                    )));
                }
                for w in waiters {
                    if let Some(d) = self.deps.get_mut(&w) {
                        d.insert(prev);
                    }
                }
            }
        }
        Ok(())
    }

    fn schedule(self) -> Result<Vec<NodeId>> {
        let mut indegree: HashMap<NodeId, usize> = HashMap::with_capacity(self.nodes.len());
        let mut users: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (&id, d) in &self.deps {
            indegree.insert(id, d.len());
            for &s in d {
                users.entry(s).or_default().push(id);
            }
        }

        let mut ready: BTreeSet<(u8, NodeId)> = BTreeSet::new();
        for &id in &self.nodes {
            if indegree.get(&id) == Some(&0) {
                ready.insert((priority(self.graph.get(id)?.op), id));
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut open: Option<NodeId> = None;
        while order.len() < self.nodes.len() {
            let next = match open {
                None => ready.iter().copied().find(|(_, id)| !self.region_of.contains_key(id)),
                Some(region) => ready
                    .iter()
                    .copied()
                    .filter(|(_, id)| self.region_of.get(id) == Some(&region))
                    .min_by_key(|&(_, id)| {
                        // ENDIF sorts after every store of its region
                        let is_end = self.graph.get(id).map_or(true, |n| n.op == UOps::EndIf);
                        (is_end, store_key(self.graph, id))
                    }),
            };
            let Some(entry) = next else {
                let stuck = self
                    .nodes
                    .iter()
                    .copied()
                    .find(|id| indegree.get(id).map_or(false, |&d| d > 0))
                    .unwrap_or_default();
                return Err(KernelError::Cycle { source_id: stuck });
            };
            ready.remove(&entry);
            let id = entry.1;
            match self.graph.get(id)?.op {
                UOps::If => open = Some(id),
                UOps::EndIf => open = None,
                _ => {}
            }
            order.push(id);

            for &u in users.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(d) = indegree.get_mut(&u) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert((priority(self.graph.get(u)?.op), u));
                    }
                }
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;

    fn linearize(b: GraphBuilder, roots: &[NodeId]) -> Program {
        let target = b.target().clone();
        let mut g = b.build();
        Linearizer::new(target).linearize(&mut g, roots).unwrap()
    }

    #[test]
    fn test_empty_roots() {
        let mut g = UOpGraph::new();
        let p = Linearizer::new(Target::generic()).linearize(&mut g, &[]).unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn test_declarations_first() {
        let mut b = GraphBuilder::new();
        let lane = b.special("gidx0", 4).unwrap();
        let one = b.int(1).unwrap();
        let idx = b.add(lane, one).unwrap();
        let out = b.define_global(0, ScalarType::Int32).unwrap();
        let st = b.store(out, lane, idx).unwrap();
        let p = linearize(b, &[st]);
        assert_eq!(p.ops()[0], UOps::DefineGlobal);
        assert_eq!(p.ops()[1], UOps::Special);
        assert_eq!(*p.ops().last().unwrap(), UOps::Store);
    }

    #[test]
    fn test_store_order_by_address() {
        let mut b = GraphBuilder::new();
        let out = b.define_global(0, ScalarType::Float32).unwrap();
        let four = b.int(4).unwrap();
        let zero = b.int(0).unwrap();
        let v = b.const_(ScalarType::Float32, 1.0).unwrap();
        let s4 = b.store(out, four, v).unwrap();
        let s0 = b.store(out, zero, v).unwrap();
        let p = linearize(b, &[s4, s0]);
        assert!(p.position(s0).unwrap() < p.position(s4).unwrap());
    }

    #[test]
    fn test_gated_stores_share_region() {
        let mut b = GraphBuilder::new();
        let a = b.define_global(0, ScalarType::Float32).unwrap();
        let c = b.define_global(1, ScalarType::Float32).unwrap();
        let lane = b.special("gidx0", 8).unwrap();
        let four = b.int(4).unwrap();
        let gate = b.lt(lane, four).unwrap();
        let v = b.const_(ScalarType::Float32, 2.0).unwrap();
        let s1 = b.store_gated(a, lane, v, gate).unwrap();
        let s2 = b.store_gated(c, lane, v, gate).unwrap();
        let p = linearize(b, &[s1, s2]);
        assert_eq!(p.count(UOps::If), 1);
        assert_eq!(p.count(UOps::EndIf), 1);
        let ops = p.ops();
        let at = ops.iter().position(|&o| o == UOps::If).unwrap();
        assert_eq!(&ops[at..], &[UOps::If, UOps::Store, UOps::Store, UOps::EndIf]);
    }

    #[test]
    fn test_different_gates_different_regions() {
        let mut b = GraphBuilder::new();
        let a = b.define_global(0, ScalarType::Float32).unwrap();
        let lane = b.special("gidx0", 8).unwrap();
        let four = b.int(4).unwrap();
        let two = b.int(2).unwrap();
        let g1 = b.lt(lane, four).unwrap();
        let g2 = b.lt(lane, two).unwrap();
        let v = b.const_(ScalarType::Float32, 2.0).unwrap();
        let s1 = b.store_gated(a, lane, v, g1).unwrap();
        let s2 = b.store_gated(a, lane, v, g2).unwrap();
        let p = linearize(b, &[s1, s2]);
        assert_eq!(p.count(UOps::If), 2);
        assert_eq!(p.count(UOps::EndIf), 2);
        for ins in p.iter().filter(|i| i.uop.op == UOps::EndIf) {
            assert_eq!(ins.uop.src.len(), 2);
        }
    }

    #[test]
    fn test_barrier_inserted_for_shared_load() {
        let mut b = GraphBuilder::new();
        let out = b.define_global(0, ScalarType::Float32).unwrap();
        let smem = b.define_local("smem", ScalarType::Float32, 16).unwrap();
        let zero = b.int(0).unwrap();
        let v = b.const_(ScalarType::Float32, 42.0).unwrap();
        let st = b.store(smem, zero, v).unwrap();
        let ld = b.load(smem, zero).unwrap();
        let out_st = b.store(out, zero, ld).unwrap();
        let p = linearize(b, &[st, out_st]);
        assert_eq!(p.count(UOps::Barrier), 1);
        let barrier = p.iter().find(|i| i.uop.op == UOps::Barrier).unwrap();
        assert_eq!(barrier.uop.src, vec![st]);
        let load = p.iter().find(|i| i.uop.op == UOps::Load).unwrap();
        assert_eq!(load.uop.src.last(), Some(&barrier.id));
    }

    #[test]
    fn test_shared_memory_required() {
        let mut g = UOpGraph::new();
        let smem = g
            .add(
                UOps::DefineLocal,
                Some(DType::ptr(ScalarType::Float32, AddrSpace::Local)),
                vec![],
                Arg::Local { name: "smem".into(), size: 4 },
            )
            .unwrap();
        let idx = g
            .add(UOps::Const, Some(ScalarType::Int32.into()), vec![], Arg::constant(0i64.into()))
            .unwrap();
        let ld = g
            .add(UOps::Load, Some(ScalarType::Float32.into()), vec![smem, idx], Arg::None)
            .unwrap();
        let target = Target::new("scalar");
        let err = Linearizer::new(target).linearize(&mut g, &[ld]).unwrap_err();
        assert!(matches!(err, KernelError::MissingFeature { .. }));
    }

    #[test]
    fn test_store_with_float_index_unresolved() {
        let mut g = UOpGraph::new();
        let buf = g
            .add(
                UOps::DefineGlobal,
                Some(DType::ptr(ScalarType::Float32, AddrSpace::Global)),
                vec![],
                Arg::Global(0),
            )
            .unwrap();
        let f = g
            .add(UOps::Const, Some(ScalarType::Float32.into()), vec![], Arg::constant(1.0f64.into()))
            .unwrap();
        let st = g.add(UOps::Store, None, vec![buf, f, f], Arg::None).unwrap();
        let err = Linearizer::new(Target::generic()).linearize(&mut g, &[st]).unwrap_err();
        assert_eq!(err, KernelError::UnresolvedIndex(st));
    }

    #[test]
    fn test_foreign_store_splits_region() {
        let mut b = GraphBuilder::new();
        let a = b.define_global(0, ScalarType::Int32).unwrap();
        let lane = b.special("gidx0", 4).unwrap();
        let two = b.int(2).unwrap();
        let gate = b.lt(lane, two).unwrap();
        let zero = b.int(0).unwrap();
        let one = b.int(1).unwrap();
        let s0 = b.store_gated(a, zero, lane, gate).unwrap();
        let s1 = b.store(a, one, lane).unwrap();
        let s2 = b.store_gated(a, two, lane, gate).unwrap();
        let p = linearize(b, &[s2, s1, s0]);
        assert_eq!(p.count(UOps::If), 2);
        // the second region is ordered after the first through its ENDIF
        let ifs: Vec<&Instruction> = p.iter().filter(|i| i.uop.op == UOps::If).collect();
        let first_end = p.iter().find(|i| i.uop.op == UOps::EndIf).unwrap();
        assert_eq!(ifs[1].uop.src, vec![gate, first_end.id]);
        assert!(p.position(s1).unwrap() > p.position(first_end.id).unwrap());
        assert!(p.position(s1).unwrap() < p.position(ifs[1].id).unwrap());
    }

    #[test]
    fn test_deep_value_chain() {
        let mut b = GraphBuilder::new();
        let a = b.define_global(0, ScalarType::Int32).unwrap();
        let lane = b.special("gidx0", 2).unwrap();
        let one = b.int(1).unwrap();
        let gate = b.lt(lane, one).unwrap();
        let mut acc = lane;
        for _ in 0..50_000 {
            acc = b.add(acc, one).unwrap();
        }
        let st = b.store_gated(a, lane, acc, gate).unwrap();
        let p = linearize(b, &[st]);
        assert_eq!(p.count(UOps::If), 1);
        assert_eq!(p.count(UOps::Alu), 50_001);
    }

    #[test]
    fn test_cache_reuses_program() {
        let build = || {
            let mut b = GraphBuilder::new();
            let a = b.define_global(0, ScalarType::Int32).unwrap();
            let lane = b.special("gidx0", 8).unwrap();
            let three = b.int(3).unwrap();
            let x = b.mul(lane, three).unwrap();
            let st = b.store(a, lane, x).unwrap();
            (b.build(), st)
        };
        let cache = Arc::new(ProgramCache::default());
        let generic = Linearizer::new(Target::generic()).with_cache(cache.clone());

        let (mut g1, r1) = build();
        let p1 = generic.linearize(&mut g1, &[r1]).unwrap();
        let (mut g2, r2) = build();
        let before = g2.len();
        let p2 = generic.linearize(&mut g2, &[r2]).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(g2.len(), before);
        assert_eq!(cache.stats().num_entries, 1);
        assert_eq!(cache.stats().total_uses, 2);

        // the target is part of the key
        let (mut g3, r3) = build();
        Linearizer::new(Target::assembly())
            .with_cache(cache.clone())
            .linearize(&mut g3, &[r3])
            .unwrap();
        assert_eq!(cache.stats().num_entries, 2);
    }

    #[test]
    fn test_deterministic() {
        let build = || {
            let mut b = GraphBuilder::new();
            let a = b.define_global(0, ScalarType::Int32).unwrap();
            let lane = b.special("gidx0", 8).unwrap();
            let three = b.int(3).unwrap();
            let gate = b.lt(lane, three).unwrap();
            let x = b.mul(lane, three).unwrap();
            let s = b.store_gated(a, lane, x, gate).unwrap();
            let sink = b.sink(&[s]).unwrap();
            linearize(b, &[sink])
        };
        assert_eq!(build(), build());
        assert_eq!(build().to_string(), build().to_string());
    }
}
