// Compilation Target Descriptor
//
// Explicit capability set handed to graph construction and linearization
// instead of ambient device configuration.

use crate::core::error::{KernelError, Result};
use std::fmt;

/// Capabilities a backend may offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetFeature {
    /// Work-group shared buffers and barriers
    SharedMemory,
    /// Native shift instructions; enables the bit-shift rewrite
    BitShift,
    /// Fused multiply-accumulate
    MulAcc,
    /// 64-bit floating point
    Float64,
}

impl fmt::Display for TargetFeature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TargetFeature::SharedMemory => "shared memory",
            TargetFeature::BitShift => "bit shifts",
            TargetFeature::MulAcc => "multiply-accumulate",
            TargetFeature::Float64 => "float64",
        };
        write!(f, "{}", name)
    }
}

/// Target description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    name: String,
    features: Vec<TargetFeature>,
}

impl Target {
    /// A target with no optional features
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
        }
    }

    /// Shared memory and float64, no special instructions
    pub fn generic() -> Self {
        Self::new("generic")
            .with_feature(TargetFeature::SharedMemory)
            .with_feature(TargetFeature::Float64)
    }

    /// Every feature, as an assembly-level backend would have
    pub fn assembly() -> Self {
        Self::generic()
            .with_name("assembly")
            .with_feature(TargetFeature::BitShift)
            .with_feature(TargetFeature::MulAcc)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_feature(mut self, feature: TargetFeature) -> Self {
        if !self.features.contains(&feature) {
            self.features.push(feature);
            self.features.sort();
        }
        self
    }

    pub fn without_feature(mut self, feature: TargetFeature) -> Self {
        self.features.retain(|f| *f != feature);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn features(&self) -> &[TargetFeature] {
        &self.features
    }

    /// Check if the target supports a specific feature
    pub fn supports(&self, feature: TargetFeature) -> bool {
        self.features.contains(&feature)
    }

    /// `MissingFeature` unless the feature is present
    pub fn require(&self, feature: TargetFeature) -> Result<()> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(KernelError::MissingFeature {
                target: self.name.clone(),
                feature: feature.to_string(),
            })
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::generic()
    }
}
