//! Training Core Library
//!
//! Shared domain types, store traits, and database repositories for the
//! cohort training pipeline.

pub mod config;
pub mod db;
pub mod error;
pub mod retry;
pub mod store;
pub mod types;
pub mod window;

pub use error::{Error, Result};
