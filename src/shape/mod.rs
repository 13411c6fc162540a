// Shape Module: index algebra and multi-view tensor addressing

pub mod symbolic;
pub mod tracker;
pub mod view;

// Re-exports
pub use symbolic::Node;
pub use tracker::ShapeTracker;
pub use view::{strides_for_shape, Mask, View};
