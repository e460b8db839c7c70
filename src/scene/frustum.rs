use glam::{
  Mat4,
  Vec3,
  Vec4,
};

use super::bounds::HalaSphere;

/// A view frustum defined by 6 planes (left, right, bottom, top, near, far).
/// Each plane is (normal, distance), with the normal pointing inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalaFrustum {
  pub planes: [Vec4; 6],
}

impl HalaFrustum {
  /// Extract the frustum from a view-projection matrix with a [0, 1] depth range.
  /// param view_proj: The view-projection matrix.
  /// return: The frustum.
  pub fn from_matrix(view_proj: &Mat4) -> Self {
    let r0 = view_proj.row(0);
    let r1 = view_proj.row(1);
    let r2 = view_proj.row(2);
    let r3 = view_proj.row(3);

    let normalize = |p: Vec4| {
      let len = p.truncate().length();
      if len > 0.0 { p / len } else { p }
    };

    Self {
      planes: [
        normalize(r3 + r0),
        normalize(r3 - r0),
        normalize(r3 + r1),
        normalize(r3 - r1),
        normalize(r2),
        normalize(r3 - r2),
      ],
    }
  }

  /// A frustum that accepts everything.
  pub fn infinite() -> Self {
    Self {
      planes: [Vec4::new(0.0, 0.0, 0.0, 1.0); 6],
    }
  }

  /// Test a sphere against the frustum.
  /// param center: The sphere center.
  /// param radius: The sphere radius.
  /// return: True if the sphere is at least partially inside.
  pub fn test_sphere(&self, center: Vec3, radius: f32) -> bool {
    self.planes.iter().all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
  }

  pub fn contains(&self, sphere: &HalaSphere) -> bool {
    self.test_sphere(sphere.center, sphere.radius)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sphere_culling_against_camera() {
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
    let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), Vec3::Y);
    let frustum = HalaFrustum::from_matrix(&(proj * view));

    assert!(frustum.test_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0));
    assert!(!frustum.test_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0));
    assert!(!frustum.test_sphere(Vec3::new(0.0, 0.0, -500.0), 1.0));
    // Straddles the left plane.
    assert!(frustum.test_sphere(Vec3::new(-10.5, 0.0, -10.0), 1.0));
  }

  #[test]
  fn infinite_frustum_accepts_all() {
    let frustum = HalaFrustum::infinite();
    assert!(frustum.test_sphere(Vec3::splat(1.0e6), 0.0));
  }
}
