//! Core scene types for the meshview viewer.
//!
//! This crate provides the data the GPU engine consumes:
//! - Vertex and mesh data laid out for direct GPU upload
//! - Axis-aligned bounding boxes
//! - A camera with a tagged perspective/orthographic projection
//! - The in-memory scene handed over by whatever loaded it

pub mod camera;
pub mod error;
pub mod math;
pub mod mesh;
pub mod scene;

pub use camera::{Camera, Projection};
pub use error::{Error, Result};
pub use math::Aabb;
pub use mesh::{Mesh, Vertex};
pub use scene::Scene;
