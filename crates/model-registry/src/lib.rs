//! Model Registry
//!
//! Registers trained checkpoints as monotonically versioned models, stores
//! their artifacts under version-qualified paths, and manages the staged
//! deployment lifecycle with automatic rollback to the previous active
//! version.

mod artifacts;
mod deployment;
mod registry;

pub use artifacts::{ArtifactStore, FsArtifactStore};
pub use deployment::DeploymentController;
pub use registry::ModelRegistry;
