// Core Layer: Error Types
//
// Every failure surfaced by graph construction, ShapeTracker composition and
// linearization. Simplifier non-findings are not errors (they are `None`).

use crate::ir::node::{NodeId, UOps};

/// Broad class of a [`KernelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The input graph or shape description is malformed
    Structural,
    /// The operator/dtype/target combination is not defined
    Unsupported,
}

/// Errors raised by the kernel-compilation core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// A node id that does not exist in the graph
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A source that would be created after its user, i.e. a cycle
    #[error("node source {source_id} does not precede its user (graph would contain a cycle)")]
    Cycle { source_id: NodeId },

    /// Node content violates the IR typing rules
    #[error("invalid {op:?} node: {reason}")]
    InvalidNode { op: UOps, reason: String },

    /// A LOAD or STORE without a usable index operand
    #[error("node {0} has no resolvable index")]
    UnresolvedIndex(NodeId),

    /// IF/ENDIF regions that do not nest or do not match
    #[error("region mismatch: {0}")]
    RegionMismatch(String),

    /// Shapes that do not compose
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<i64>, got: Vec<i64> },

    /// Movement-op arguments that are out of range for the view
    #[error("invalid view operation: {0}")]
    InvalidView(String),

    /// Symbolic expression evaluated without a binding for a variable
    #[error("unbound index variable '{0}'")]
    UnboundVariable(String),

    /// Operator/dtype combination without defined semantics
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Operation needs a target feature the target lacks
    #[error("target '{target}' does not support {feature}")]
    MissingFeature { target: String, feature: String },

    /// Integer division or modulo by zero (never folded)
    #[error("integer division by zero")]
    DivisionByZero,

    /// Memory access outside a buffer during interpretation
    #[error("index {index} out of bounds for buffer of size {size}")]
    IndexOutOfBounds { index: i64, size: usize },
}

impl KernelError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unsupported(_) | Self::MissingFeature { .. } | Self::DivisionByZero => {
                ErrorCategory::Unsupported
            }
            _ => ErrorCategory::Structural,
        }
    }

    pub(crate) fn invalid(op: UOps, reason: impl Into<String>) -> Self {
        Self::InvalidNode {
            op,
            reason: reason.into(),
        }
    }
}

/// Result type for kernel-compilation operations
pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            KernelError::Cycle { source_id: 3 }.category(),
            ErrorCategory::Structural
        );
        assert_eq!(
            KernelError::RegionMismatch("x".into()).category(),
            ErrorCategory::Structural
        );
        assert_eq!(
            KernelError::Unsupported("mulacc".into()).category(),
            ErrorCategory::Unsupported
        );
        assert_eq!(KernelError::DivisionByZero.category(), ErrorCategory::Unsupported);
    }

    #[test]
    fn test_display() {
        let err = KernelError::ShapeMismatch {
            expected: vec![2, 3],
            got: vec![7],
        };
        assert_eq!(err.to_string(), "shape mismatch: expected [2, 3], got [7]");
    }
}
