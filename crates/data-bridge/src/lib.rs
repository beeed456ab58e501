//! Data Bridge
//!
//! Groups trajectories into window cohorts and converts them into
//! training-ready message sequences with ground-truth context and bounded
//! random sub-sampling.

mod converter;
mod grouper;

pub use converter::{dropout_rate, ContextConverter, ConverterConfig};
pub use grouper::CohortGrouper;
