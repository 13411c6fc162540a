// Compiler Module: target description, linearization and program caching

pub mod cache;
pub mod linearizer;
pub mod program;
pub mod target;

// Re-exports
pub use cache::{CacheKey, CacheStats, CachedProgram, ProgramCache};
pub use linearizer::Linearizer;
pub use program::{BufferDecl, Instruction, LaunchAxis, Program};
pub use target::{Target, TargetFeature};
