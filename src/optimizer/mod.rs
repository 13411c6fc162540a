// Optimizer Module: UOp graph rewrite passes

pub mod bitshift;
pub mod fold;
pub mod pass;

// Re-exports
pub use bitshift::BitshiftPass;
pub use fold::ConstantFoldPass;
pub use pass::{rewrite_bottom_up, OptimizationPass, PassManager};
