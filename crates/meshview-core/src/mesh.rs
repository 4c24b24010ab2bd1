//! Mesh data laid out for GPU upload.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::error::{Error, Result};
use crate::math::Aabb;

/// A single mesh vertex.
///
/// The layout is uploaded byte-for-byte into the vertex buffer, so the
/// field order is part of the pipeline's vertex input description.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

impl Vertex {
    /// Vertex with position, normal and uv; tangent frame left at zero.
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
            ..Self::default()
        }
    }
}

/// A triangle mesh.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    /// Triangles as index triples into `vertices`.
    pub faces: Vec<[u32; 3]>,
    pub aabb: Aabb,
}

impl Mesh {
    /// Create a mesh and compute its bounding box.
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, faces: Vec<[u32; 3]>) -> Self {
        let mut mesh = Self {
            name: name.into(),
            vertices,
            faces,
            aabb: Aabb::EMPTY,
        };
        mesh.refresh_bounding_box();
        mesh
    }

    /// Recompute the bounding box from the vertex positions.
    pub fn refresh_bounding_box(&mut self) {
        self.aabb = Aabb::from_points(self.vertices.iter().map(|v| v.position));
    }

    /// Number of indices an indexed draw over every face consumes.
    pub fn index_count(&self) -> u32 {
        (self.faces.len() * 3) as u32
    }

    /// Vertex data as raw bytes.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data as raw bytes (tightly packed `u32`).
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.faces)
    }

    /// Size in bytes of the vertex buffer this mesh needs.
    pub fn vertex_buffer_size(&self) -> u64 {
        std::mem::size_of_val(self.vertices.as_slice()) as u64
    }

    /// Size in bytes of the index buffer this mesh needs.
    pub fn index_buffer_size(&self) -> u64 {
        std::mem::size_of_val(self.faces.as_slice()) as u64
    }

    /// Check that the mesh is drawable: non-empty and every index in range.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.faces.is_empty() {
            return Err(Error::InvalidData(format!(
                "mesh '{}' has {} vertices and {} faces",
                self.name,
                self.vertices.len(),
                self.faces.len()
            )));
        }

        let vertex_count = self.vertices.len() as u32;
        if let Some(face) = self
            .faces
            .iter()
            .find(|face| face.iter().any(|&i| i >= vertex_count))
        {
            return Err(Error::InvalidData(format!(
                "mesh '{}' face {face:?} indexes past {vertex_count} vertices",
                self.name
            )));
        }

        Ok(())
    }

    /// A unit quad in the XY plane made of two counter-clockwise triangles.
    pub fn quad() -> Self {
        let normal = Vec3::Z;
        let vertices = vec![
            Vertex::new(Vec3::new(-0.5, -0.5, 0.0), normal, Vec2::new(0.0, 1.0)),
            Vertex::new(Vec3::new(0.5, -0.5, 0.0), normal, Vec2::new(1.0, 1.0)),
            Vertex::new(Vec3::new(0.5, 0.5, 0.0), normal, Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(-0.5, 0.5, 0.0), normal, Vec2::new(0.0, 0.0)),
        ];
        Self::new("quad", vertices, vec![[0, 1, 2], [0, 2, 3]])
    }

    /// A unit cube centered at the origin with per-face normals and tangents.
    pub fn cube() -> Self {
        // (normal, tangent, bitangent) with tangent x bitangent == normal
        const FACES: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        const CORNERS: [(f32, f32, Vec2); 4] = [
            (-1.0, -1.0, Vec2::new(0.0, 1.0)),
            (1.0, -1.0, Vec2::new(1.0, 1.0)),
            (1.0, 1.0, Vec2::new(1.0, 0.0)),
            (-1.0, 1.0, Vec2::new(0.0, 0.0)),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut faces = Vec::with_capacity(12);

        for (normal, tangent, bitangent) in FACES {
            let base = vertices.len() as u32;
            for (s, t, uv) in CORNERS {
                vertices.push(Vertex {
                    position: (normal + tangent * s + bitangent * t) * 0.5,
                    normal,
                    uv,
                    tangent,
                    bitangent,
                });
            }
            faces.push([base, base + 1, base + 2]);
            faces.push([base, base + 2, base + 3]);
        }

        Self::new("cube", vertices, faces)
    }
}
