// Optimization Pass Infrastructure

use crate::core::error::Result;
use crate::ir::graph::UOpGraph;
use crate::ir::node::{NodeId, UOp};
use std::collections::HashMap;

/// Optimization pass trait
pub trait OptimizationPass {
    /// Run the pass over the graph under `roots`, updating `roots` to the
    /// rewritten nodes. Returns true if anything was rewritten.
    fn run(&mut self, graph: &mut UOpGraph, roots: &mut Vec<NodeId>) -> Result<bool>;

    /// Get pass name
    fn name(&self) -> &str;
}

/// Rebuild the graph under `roots` bottom-up. `rule` sees each node with its
/// sources already rewritten and may return a replacement.
pub fn rewrite_bottom_up<F>(graph: &mut UOpGraph, roots: &mut [NodeId], mut rule: F) -> Result<bool>
where
    F: FnMut(&mut UOpGraph, &UOp) -> Result<Option<NodeId>>,
{
    let order = graph.toposort(roots)?;
    let mut mapped: HashMap<NodeId, NodeId> = HashMap::with_capacity(order.len());
    let mut changed = false;
    for id in order {
        let node = graph.get(id)?.clone();
        let src: Vec<NodeId> = node
            .src
            .iter()
            .map(|s| mapped.get(s).copied().unwrap_or(*s))
            .collect();
        let candidate = UOp::new(node.op, node.dtype, src, node.arg.clone());
        let new_id = match rule(graph, &candidate)? {
            Some(replacement) => replacement,
            None if candidate.src == node.src => id,
            None => graph.insert(candidate)?,
        };
        if new_id != id {
            log::trace!("rewrote {} -> {}", id, new_id);
            changed = true;
        }
        mapped.insert(id, new_id);
    }
    for root in roots.iter_mut() {
        if let Some(&m) = mapped.get(root) {
            *root = m;
        }
    }
    Ok(changed)
}

/// Pass manager for running multiple passes
pub struct PassManager {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn run_all(&mut self, graph: &mut UOpGraph, roots: &mut Vec<NodeId>) -> Result<()> {
        for pass in &mut self.passes {
            log::debug!("Running optimization pass: {}", pass.name());
            let changed = pass.run(graph, roots)?;
            if changed {
                log::debug!("Pass '{}' modified the graph", pass.name());
            } else {
                log::trace!("Pass '{}' made no changes", pass.name());
            }
        }
        Ok(())
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}
