// IR Module: UOp intermediate representation

pub mod alu;
pub mod builder;
pub mod graph;
pub mod interpreter;
pub mod node;
pub mod types;

// Re-exports
pub use alu::{bitcast, cast, check_alu, exec_alu, truncate};
pub use builder::{GraphBuilder, INDEX_TYPE};
pub use graph::{LoadParts, StoreParts, UOpGraph};
pub use interpreter::Interpreter;
pub use node::{AluOp, Arg, BinaryOps, NodeId, TernaryOps, UOp, UOps, UnaryOps};
pub use types::{AddrSpace, ConstValue, DType, ScalarType};
