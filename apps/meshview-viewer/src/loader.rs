//! OBJ loading into engine meshes.

use std::path::Path;

use anyhow::{bail, Context};
use glam::{Vec2, Vec3};
use meshview_core::{Mesh, Vertex};
use tracing::{info, warn};

/// Load every model of an OBJ file as a separate mesh.
pub fn load_obj(path: &Path) -> anyhow::Result<Vec<Mesh>> {
    let (models, materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    if let Err(e) = materials {
        warn!("Ignoring materials of {}: {e}", path.display());
    }

    let mut meshes = Vec::with_capacity(models.len());
    for model in &models {
        if model.mesh.indices.is_empty() {
            warn!("Skipping empty model '{}'", model.name);
            continue;
        }
        let mesh = mesh_from_obj(&model.name, &model.mesh)
            .with_context(|| format!("Invalid model '{}'", model.name))?;
        meshes.push(mesh);
    }

    if meshes.is_empty() {
        bail!("{} contains no triangles", path.display());
    }

    info!(
        "Loaded {} meshes ({} triangles) from {}",
        meshes.len(),
        meshes.iter().map(|m| m.faces.len()).sum::<usize>(),
        path.display()
    );
    Ok(meshes)
}

/// Convert one single-indexed, triangulated OBJ mesh.
///
/// Missing normals are rebuilt from the faces. Tangents and bitangents are
/// derived from the texture coordinates; without them they stay zero.
pub fn mesh_from_obj(name: &str, obj: &tobj::Mesh) -> anyhow::Result<Mesh> {
    if obj.positions.len() % 3 != 0 {
        bail!("{} position components is not a multiple of 3", obj.positions.len());
    }
    if obj.indices.len() % 3 != 0 {
        bail!("{} indices do not form whole triangles", obj.indices.len());
    }

    let vertex_count = obj.positions.len() / 3;
    let has_normals = obj.normals.len() == obj.positions.len();
    let has_uvs = obj.texcoords.len() / 2 == vertex_count;

    let mut vertices: Vec<Vertex> = (0..vertex_count)
        .map(|i| {
            let position = Vec3::from_slice(&obj.positions[i * 3..i * 3 + 3]);
            let normal = if has_normals {
                Vec3::from_slice(&obj.normals[i * 3..i * 3 + 3])
            } else {
                Vec3::ZERO
            };
            let uv = if has_uvs {
                Vec2::from_slice(&obj.texcoords[i * 2..i * 2 + 2])
            } else {
                Vec2::ZERO
            };
            Vertex::new(position, normal, uv)
        })
        .collect();

    let faces: Vec<[u32; 3]> = obj
        .indices
        .chunks_exact(3)
        .map(|tri| [tri[0], tri[1], tri[2]])
        .collect();

    if !has_normals {
        smooth_normals(&mut vertices, &faces);
    }
    if has_uvs {
        tangent_frames(&mut vertices, &faces);
    }

    let mesh = Mesh::new(name, vertices, faces);
    mesh.validate()?;
    Ok(mesh)
}

/// Area-weighted vertex normals from the face winding.
fn smooth_normals(vertices: &mut [Vertex], faces: &[[u32; 3]]) {
    for face in faces {
        let [a, b, c] = face.map(|i| i as usize);
        if a.max(b).max(c) >= vertices.len() {
            continue;
        }
        let edge1 = vertices[b].position - vertices[a].position;
        let edge2 = vertices[c].position - vertices[a].position;
        let normal = edge1.cross(edge2);
        for i in [a, b, c] {
            vertices[i].normal += normal;
        }
    }
    for vertex in vertices {
        vertex.normal = vertex.normal.normalize_or_zero();
    }
}

/// Per-vertex tangent and bitangent accumulated from each face's uv gradient.
///
/// Faces with degenerate texture coordinates contribute nothing.
fn tangent_frames(vertices: &mut [Vertex], faces: &[[u32; 3]]) {
    for face in faces {
        let [a, b, c] = face.map(|i| i as usize);
        if a.max(b).max(c) >= vertices.len() {
            continue;
        }
        let ab = vertices[b].position - vertices[a].position;
        let ac = vertices[c].position - vertices[a].position;
        let uv0 = vertices[b].uv - vertices[a].uv;
        let uv1 = vertices[c].uv - vertices[a].uv;

        let det = uv0.x * uv1.y - uv0.y * uv1.x;
        if det.abs() <= f32::EPSILON {
            continue;
        }
        let r = det.recip();
        let tangent = (ab * uv1.y - ac * uv0.y) * r;
        let bitangent = (ac * uv0.x - ab * uv1.x) * r;
        for i in [a, b, c] {
            vertices[i].tangent += tangent;
            vertices[i].bitangent += bitangent;
        }
    }
    for vertex in vertices {
        vertex.tangent = vertex.tangent.normalize_or_zero();
        vertex.bitangent = vertex.bitangent.normalize_or_zero();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> tobj::Mesh {
        tobj::Mesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            indices: vec![0, 1, 2],
            ..Default::default()
        }
    }

    #[test]
    fn triangle_converts() {
        let mesh = mesh_from_obj("tri", &triangle()).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
        assert_eq!(mesh.aabb.max, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn missing_normals_are_rebuilt() {
        let mesh = mesh_from_obj("tri", &triangle()).unwrap();
        for vertex in &mesh.vertices {
            assert_eq!(vertex.normal, Vec3::Z);
        }
    }

    #[test]
    fn supplied_attributes_are_kept() {
        let obj = tobj::Mesh {
            normals: vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            texcoords: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            ..triangle()
        };
        let mesh = mesh_from_obj("tri", &obj).unwrap();
        assert_eq!(mesh.vertices[0].normal, Vec3::Y);
        assert_eq!(mesh.vertices[1].uv, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn tangent_frame_follows_texture_axes() {
        let obj = tobj::Mesh {
            texcoords: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            ..triangle()
        };
        let mesh = mesh_from_obj("tri", &obj).unwrap();
        for vertex in &mesh.vertices {
            assert_eq!(vertex.tangent, Vec3::X);
            assert_eq!(vertex.bitangent, Vec3::Y);
        }
    }

    #[test]
    fn degenerate_uvs_leave_tangents_zero() {
        let obj = tobj::Mesh {
            texcoords: vec![0.5, 0.5, 0.5, 0.5, 0.5, 0.5],
            ..triangle()
        };
        let mesh = mesh_from_obj("tri", &obj).unwrap();
        assert!(mesh.vertices.iter().all(|v| v.tangent == Vec3::ZERO));
        assert!(mesh.vertices.iter().all(|v| v.bitangent == Vec3::ZERO));
    }

    #[test]
    fn missing_uvs_leave_tangents_zero() {
        let mesh = mesh_from_obj("tri", &triangle()).unwrap();
        assert!(mesh.vertices.iter().all(|v| v.tangent == Vec3::ZERO));
    }

    #[test]
    fn partial_triangle_is_rejected() {
        let obj = tobj::Mesh {
            indices: vec![0, 1],
            ..triangle()
        };
        assert!(mesh_from_obj("bad", &obj).is_err());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let obj = tobj::Mesh {
            indices: vec![0, 1, 7],
            ..triangle()
        };
        assert!(mesh_from_obj("bad", &obj).is_err());
    }
}
