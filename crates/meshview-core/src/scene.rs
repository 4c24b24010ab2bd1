//! In-memory scene handed to the engine.

use glam::Vec3;

use crate::camera::Camera;
use crate::error::{Error, Result};
use crate::math::Aabb;
use crate::mesh::Mesh;

/// Meshes plus the cameras to view them with.
#[derive(Clone, Debug)]
pub struct Scene {
    pub meshes: Vec<Mesh>,
    pub cameras: Vec<Camera>,
    pub aabb: Aabb,
    pub background_color: Vec3,
}

impl Scene {
    /// Build a scene from meshes, computing the bounds.
    ///
    /// When no camera is supplied a default one is framed on the bounds.
    pub fn new(meshes: Vec<Mesh>, cameras: Vec<Camera>) -> Result<Self> {
        if meshes.is_empty() {
            return Err(Error::EmptyScene);
        }
        for mesh in &meshes {
            mesh.validate()?;
        }

        let aabb = meshes
            .iter()
            .fold(Aabb::EMPTY, |acc, mesh| acc.merge(&mesh.aabb));

        let mut scene = Self {
            meshes,
            cameras,
            aabb,
            background_color: Vec3::ONE,
        };
        if scene.cameras.is_empty() {
            scene.cameras.push(scene.default_camera());
        }
        Ok(scene)
    }

    /// Camera at the max corner of the bounds looking at their center.
    pub fn default_camera(&self) -> Camera {
        let mut camera = Camera::default();
        camera.look_at(self.aabb.max, self.aabb.center(), Vec3::Y);

        // Keep the far plane past the whole model
        let diagonal = self.aabb.size().length();
        camera.far = camera.far.max(diagonal * 4.0);
        camera
    }

    /// The camera the viewer starts with.
    pub fn primary_camera(&self) -> Camera {
        self.cameras
            .first()
            .cloned()
            .unwrap_or_else(|| self.default_camera())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Projection;

    #[test]
    fn empty_scene_is_rejected() {
        assert!(matches!(Scene::new(Vec::new(), Vec::new()), Err(Error::EmptyScene)));
    }

    #[test]
    fn default_camera_frames_bounds() {
        let scene = Scene::new(vec![Mesh::cube()], Vec::new()).unwrap();
        assert_eq!(scene.cameras.len(), 1);

        let camera = scene.primary_camera();
        assert_eq!(camera.eye, Vec3::splat(0.5));
        assert_eq!(camera.target, Vec3::ZERO);
        assert!(matches!(camera.projection, Projection::Perspective { .. }));
    }

    #[test]
    fn bounds_merge_all_meshes() {
        let mut shifted = Mesh::quad();
        for vertex in &mut shifted.vertices {
            vertex.position += Vec3::new(10.0, 0.0, 0.0);
        }
        shifted.refresh_bounding_box();

        let scene = Scene::new(vec![Mesh::cube(), shifted], Vec::new()).unwrap();
        assert_eq!(scene.aabb.min, Vec3::splat(-0.5));
        assert_eq!(scene.aabb.max, Vec3::new(10.5, 0.5, 0.5));
    }
}
