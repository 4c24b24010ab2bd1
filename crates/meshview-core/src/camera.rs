//! Camera and view management.

use glam::{Mat4, Vec3};

/// How the camera projects view space onto the screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Perspective projection with a vertical field of view in radians.
    Perspective { fov_y: f32 },
    /// Orthographic projection covering `height` world units vertically.
    Orthographic { height: f32 },
}

/// Camera for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub near: f32,
    pub far: f32,
    pub projection: Projection,
    viewport: (u32, u32),
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            near: 0.1,
            far: 1000.0,
            projection: Projection::Perspective {
                fov_y: std::f32::consts::FRAC_PI_2,
            },
            viewport: (1280, 720),
        }
    }
}

impl Camera {
    /// Create a perspective camera looking from `eye` at `target`.
    pub fn perspective(eye: Vec3, target: Vec3, up: Vec3, fov_y: f32) -> Self {
        Self {
            eye,
            target,
            up,
            projection: Projection::Perspective { fov_y },
            ..Self::default()
        }
    }

    /// Create an orthographic camera looking from `eye` at `target`.
    pub fn orthographic(eye: Vec3, target: Vec3, up: Vec3, height: f32) -> Self {
        Self {
            eye,
            target,
            up,
            projection: Projection::Orthographic { height },
            ..Self::default()
        }
    }

    /// Point the camera.
    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.eye = eye;
        self.target = target;
        self.up = up;
    }

    /// Update the viewport the projection is built for.
    ///
    /// Zero-sized dimensions (a minimized window) are ignored so the aspect
    /// ratio never degenerates.
    pub fn set_viewport_dimensions(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.viewport = (width, height);
        }
    }

    /// Viewport dimensions in pixels.
    pub fn viewport_dimensions(&self) -> (u32, u32) {
        self.viewport
    }

    /// Width over height of the current viewport.
    pub fn aspect(&self) -> f32 {
        self.viewport.0 as f32 / self.viewport.1 as f32
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Projection matrix with a `[0, 1]` depth range.
    pub fn projection_matrix(&self) -> Mat4 {
        let aspect = self.aspect();
        match self.projection {
            Projection::Perspective { fov_y } => {
                Mat4::perspective_rh(fov_y, aspect, self.near, self.far)
            }
            Projection::Orthographic { height } => {
                let half_h = height * 0.5;
                let half_w = half_h * aspect;
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        }
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn viewport_drives_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport_dimensions(800, 400);
        assert_relative_eq!(camera.aspect(), 2.0);

        // Minimized windows keep the last usable viewport
        camera.set_viewport_dimensions(0, 0);
        assert_eq!(camera.viewport_dimensions(), (800, 400));
    }

    #[test]
    fn target_lands_in_front_of_camera() {
        let camera = Camera::perspective(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::ZERO,
            Vec3::Y,
            std::f32::consts::FRAC_PI_2,
        );
        let clip = camera.view_projection_matrix() * Vec3::ZERO.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn orthographic_ignores_distance() {
        let near = Camera::orthographic(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, Vec3::Y, 4.0);
        let far = Camera::orthographic(Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO, Vec3::Y, 4.0);

        let point = Vec3::new(1.0, 1.0, 0.0).extend(1.0);
        let a = near.view_projection_matrix() * point;
        let b = far.view_projection_matrix() * point;
        assert_relative_eq!(a.x, b.x, epsilon = 1e-5);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-5);
    }
}
