use glam::{
  Mat4,
  Vec3,
};

/// Axis-aligned bounding box (AABB) representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalaBounds {
  pub center: Vec3,
  pub extents: Vec3,
}

/// A bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalaSphere {
  pub center: Vec3,
  pub radius: f32,
}

impl Default for HalaBounds {
  fn default() -> Self {
    Self::new(Vec3::ZERO, Vec3::ZERO)
  }
}

/// Implementation of HalaBounds.
impl HalaBounds {

  /// Create a new HalaBounds instance.
  /// param center: The center of the AABB.
  /// param extents: The half size of the AABB.
  /// return: The new HalaBounds instance.
  pub fn new(center: Vec3, extents: Vec3) -> Self {
    Self { center, extents }
  }

  /// Create the AABB from its corners.
  /// param min: The minimum corner.
  /// param max: The maximum corner.
  /// return: The new HalaBounds instance.
  pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
    let extents = (max - min) * 0.5;
    Self::new(min + extents, extents)
  }

  /// Create the tightest AABB around the points.
  /// param points: The points to enclose.
  /// return: The bounds, None if there are no points.
  pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Option<Self> {
    let mut iter = points.into_iter();
    let first = iter.next()?;
    let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
    Some(Self::from_min_max(min, max))
  }

  pub fn get_min(&self) -> Vec3 {
    self.center - self.extents
  }

  pub fn get_max(&self) -> Vec3 {
    self.center + self.extents
  }

  pub fn get_size(&self) -> Vec3 {
    self.extents * 2.0
  }

  /// Grows the AABB to include the given point.
  /// param point: The point to include.
  pub fn encapsulate_point(&mut self, point: Vec3) {
    *self = Self::from_min_max(self.get_min().min(point), self.get_max().max(point));
  }

  /// Grows the AABB to include the given bounds.
  /// param bounds: The bounds to include.
  pub fn encapsulate_bounds(&mut self, bounds: &HalaBounds) {
    *self = Self::from_min_max(
      self.get_min().min(bounds.get_min()),
      self.get_max().max(bounds.get_max()),
    );
  }

  /// Does another AABB intersect with this AABB?
  /// param other: The other AABB to check.
  /// return: True if the AABBs intersect, false otherwise.
  pub fn intersects(&self, other: &HalaBounds) -> bool {
    let d = (self.center - other.center).abs();
    let r = self.extents + other.extents;
    d.x <= r.x && d.y <= r.y && d.z <= r.z
  }

  /// The sphere circumscribing this box.
  pub fn to_sphere(&self) -> HalaSphere {
    HalaSphere {
      center: self.center,
      radius: self.extents.length(),
    }
  }

  /// Transform the box and return the AABB of the result.
  /// param mtx: The transform.
  /// return: The transformed bounds.
  pub fn transformed(&self, mtx: &Mat4) -> HalaBounds {
    let center = mtx.transform_point3(self.center);
    let extents = mtx.x_axis.truncate().abs() * self.extents.x
      + mtx.y_axis.truncate().abs() * self.extents.y
      + mtx.z_axis.truncate().abs() * self.extents.z;
    Self::new(center, extents)
  }

}

/// Implementation of HalaSphere.
impl HalaSphere {
  pub fn new(center: Vec3, radius: f32) -> Self {
    Self { center, radius }
  }

  /// Transform the sphere. Non-uniform scale is covered by the largest axis scale.
  /// param mtx: The transform.
  /// return: The transformed sphere.
  pub fn transformed(&self, mtx: &Mat4) -> HalaSphere {
    let scale = mtx.x_axis.truncate().length()
      .max(mtx.y_axis.truncate().length())
      .max(mtx.z_axis.truncate().length());
    HalaSphere {
      center: mtx.transform_point3(self.center),
      radius: self.radius * scale,
    }
  }

  /// The smallest sphere containing both spheres.
  /// param other: The other sphere.
  /// return: The union sphere.
  pub fn union(&self, other: &HalaSphere) -> HalaSphere {
    let delta = other.center - self.center;
    let dist = delta.length();
    if dist + other.radius <= self.radius {
      return *self;
    }
    if dist + self.radius <= other.radius {
      return *other;
    }
    let radius = (dist + self.radius + other.radius) * 0.5;
    let center = self.center + delta * ((radius - self.radius) / dist);
    HalaSphere { center, radius }
  }

  /// Compute an approximately minimal bounding sphere of the points (Ritter's method).
  /// param points: The points to enclose, must not be empty.
  /// return: The bounding sphere.
  pub fn from_points(points: &[Vec3]) -> HalaSphere {
    debug_assert!(!points.is_empty());
    if points.is_empty() {
      return HalaSphere::new(Vec3::ZERO, 0.0);
    }

    // Extremum points along each axis.
    let mut pmin = [points[0]; 3];
    let mut pmax = [points[0]; 3];
    for p in points {
      for axis in 0..3 {
        if p[axis] < pmin[axis][axis] {
          pmin[axis] = *p;
        }
        if p[axis] > pmax[axis][axis] {
          pmax[axis] = *p;
        }
      }
    }

    // The widest pair seeds the sphere.
    let mut paxis = 0;
    let mut paxisd2 = 0.0;
    for axis in 0..3 {
      let d2 = pmin[axis].distance_squared(pmax[axis]);
      if d2 > paxisd2 {
        paxisd2 = d2;
        paxis = axis;
      }
    }

    let mut center = (pmin[paxis] + pmax[paxis]) * 0.5;
    let mut radius = paxisd2.sqrt() * 0.5;

    // Grow until every point fits.
    for p in points {
      let d2 = p.distance_squared(center);
      if d2 > radius * radius {
        let d = d2.sqrt();
        let k = 0.5 + (radius / d) * 0.5;
        center = center * k + *p * (1.0 - k);
        radius = (radius + d) * 0.5;
      }
    }

    HalaSphere { center, radius }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bounds_grow_to_include_points() {
    let mut bounds = HalaBounds::from_points([Vec3::ZERO, Vec3::ONE]).unwrap();
    bounds.encapsulate_point(Vec3::new(-1.0, 2.0, 0.5));
    assert_eq!(bounds.get_min(), Vec3::new(-1.0, 0.0, 0.0));
    assert_eq!(bounds.get_max(), Vec3::new(1.0, 2.0, 1.0));
    assert!(HalaBounds::from_points(std::iter::empty()).is_none());
  }

  #[test]
  fn sphere_encloses_every_point() {
    let points = [
      Vec3::new(0.0, 0.0, 0.0),
      Vec3::new(4.0, 0.0, 0.0),
      Vec3::new(2.0, 3.0, 0.0),
      Vec3::new(1.0, -1.0, 2.0),
    ];
    let sphere = HalaSphere::from_points(&points);
    for p in points {
      assert!(p.distance(sphere.center) <= sphere.radius + 1e-4);
    }
  }

  #[test]
  fn sphere_is_seeded_by_the_widest_axis_pair() {
    // The x extremes are the widest pair, the third point already fits.
    let sphere = HalaSphere::from_points(&[Vec3::new(-2.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0), Vec3::new(2.0, 0.0, 0.0)]);
    assert_eq!(sphere, HalaSphere::new(Vec3::ZERO, 2.0));
    let single = HalaSphere::from_points(&[Vec3::ONE]);
    assert_eq!(single, HalaSphere::new(Vec3::ONE, 0.0));
  }

  #[test]
  fn sphere_union_contains_both() {
    let a = HalaSphere::new(Vec3::ZERO, 1.0);
    let b = HalaSphere::new(Vec3::new(4.0, 0.0, 0.0), 1.0);
    let u = a.union(&b);
    assert!((u.radius - 3.0).abs() < 1e-5);
    assert!((u.center - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
    assert_eq!(a.union(&HalaSphere::new(Vec3::ZERO, 0.5)), a);
  }

  #[test]
  fn transformed_bounds_follow_translation() {
    let bounds = HalaBounds::new(Vec3::ZERO, Vec3::ONE);
    let moved = bounds.transformed(&Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
    assert_eq!(moved.center, Vec3::new(10.0, 0.0, 0.0));
    assert!(!moved.intersects(&bounds));
  }
}
