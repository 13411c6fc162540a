// tensorkern: kernel-compilation core of a tensor-compute engine
//
// Takes a graph of scalar operations plus ShapeTracker descriptions of how
// tensors map onto flat memory and produces one ordered,
// synchronization-correct instruction stream per kernel.
//
// Architecture:
// - core: error taxonomy
// - shape: symbolic index algebra, View and ShapeTracker
// - ir: UOp graph, ALU semantics, builder with constant folding, interpreter
// - optimizer: rewrite passes over UOp graphs
// - compiler: target description, linearizer, program cache

pub mod core;
pub mod shape;
pub mod ir;
pub mod optimizer;
pub mod compiler;

// Re-export commonly used items for convenience
pub use compiler::{Linearizer, Program, Target, TargetFeature};
pub use core::{KernelError, Result};
pub use ir::{GraphBuilder, UOpGraph};
pub use shape::{ShapeTracker, View};
