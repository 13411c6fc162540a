// Core Layer: shared error types

pub mod error;

pub use error::{ErrorCategory, KernelError, Result};
