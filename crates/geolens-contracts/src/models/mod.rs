mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};

pub const STRUCTURED: &str = "structured";
pub const VISION: &str = "vision";
pub const GROUNDED: &str = "grounded";
pub const CONVERSATIONAL: &str = "conversational";
