//! Core domain types for the cohort training pipeline.

pub mod batch;
pub mod example;
pub mod ground_truth;
pub mod model;
pub mod scored;
pub mod trajectory;

pub use batch::*;
pub use example::*;
pub use ground_truth::*;
pub use model::*;
pub use scored::*;
pub use trajectory::*;
