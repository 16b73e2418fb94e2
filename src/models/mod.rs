// Re-export all model types for ease of use

pub mod comparison;
pub mod document;
pub mod query;
pub mod queue;

pub use comparison::*;
pub use document::*;
pub use query::*;
pub use queue::*;
