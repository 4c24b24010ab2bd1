//! Test harness for the meshview engine.
//!
//! Provides a surface-less device context for buffer transfer tests.

pub mod harness;

pub use harness::{GpuHarness, MeshReadback};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] meshview_gpu::GpuError),
    #[error("Data mismatch: {0}")]
    Mismatch(String),
}

pub type Result<T> = std::result::Result<T, TestError>;
