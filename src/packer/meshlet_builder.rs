use glam::Vec3;

use crate::scene::HalaSphere;

pub const MAX_VERTICES: usize = 64;
pub const MAX_PRIMITIVES: usize = 64;
pub const MAX_INDICES: usize = MAX_PRIMITIVES * 3;

/// Marks a vertex that is not part of the meshlet under construction.
pub(crate) const NOT_IN_MESHLET: u8 = u8::MAX;

/// A meshlet under construction.
/// Vertices are ids into the packer's canonical vertex table.
#[derive(Debug, Clone)]
pub(crate) struct HalaMeshletBuilder {
  pub vertices: Vec<u32>,
  pub indices: Vec<u8>,
  pub bounds: HalaSphere,
}

impl HalaMeshletBuilder {
  pub fn new() -> Self {
    Self {
      vertices: Vec::with_capacity(MAX_VERTICES),
      indices: Vec::with_capacity(MAX_INDICES),
      bounds: HalaSphere::new(Vec3::ZERO, 0.0),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.indices.is_empty()
  }

  pub fn triangle_count(&self) -> usize {
    self.indices.len() / 3
  }

  /// Try to append a triangle.
  /// `slots` maps canonical vertex id -> local slot for the meshlet under construction,
  /// giving constant time membership tests.
  /// param tri: The canonical vertex ids.
  /// param slots: The membership table.
  /// return: False if the meshlet would exceed its capacity, nothing is modified then.
  pub fn insert(&mut self, tri: [u32; 3], slots: &mut [u8]) -> bool {
    if self.indices.len() + 3 > MAX_INDICES {
      return false;
    }

    let mut fresh = 0;
    for (i, &v) in tri.iter().enumerate() {
      let seen_in_tri = tri[..i].contains(&v);
      if slots[v as usize] == NOT_IN_MESHLET && !seen_in_tri {
        fresh += 1;
      }
    }
    if self.vertices.len() + fresh > MAX_VERTICES {
      return false;
    }

    for &v in tri.iter() {
      if slots[v as usize] == NOT_IN_MESHLET {
        slots[v as usize] = self.vertices.len() as u8;
        self.vertices.push(v);
      }
      self.indices.push(slots[v as usize]);
    }
    true
  }

  /// Finish construction: release the membership table entries and compute bounds.
  /// param slots: The membership table.
  /// param positions: Positions of the canonical vertices.
  pub fn close(&mut self, slots: &mut [u8], positions: &[Vec3]) {
    for &v in self.vertices.iter() {
      slots[v as usize] = NOT_IN_MESHLET;
    }
    self.update_bounds(positions);
  }

  pub fn update_bounds(&mut self, positions: &[Vec3]) {
    let points = self.vertices.iter().map(|&v| positions[v as usize]).collect::<Vec<_>>();
    self.bounds = HalaSphere::from_points(&points);
  }

  fn shared_vertices(&self, other: &HalaMeshletBuilder) -> usize {
    other.vertices.iter().filter(|v| self.vertices.contains(v)).count()
  }

  /// Whether the union of both meshlets still fits the capacity.
  pub fn can_merge(&self, other: &HalaMeshletBuilder) -> bool {
    if self.indices.len() + other.indices.len() > MAX_INDICES {
      return false;
    }
    let unique = self.vertices.len() + other.vertices.len() - self.shared_vertices(other);
    unique <= MAX_VERTICES
  }

  /// Whether the bounding spheres overlap.
  pub fn has_intersection(&self, other: &HalaMeshletBuilder) -> bool {
    let r = self.bounds.radius + other.bounds.radius;
    self.q_distance(other) <= r * r
  }

  /// Squared distance between the sphere centers.
  pub fn q_distance(&self, other: &HalaMeshletBuilder) -> f32 {
    self.bounds.center.distance_squared(other.bounds.center)
  }

  /// Append the triangles of `other`. The caller checks `can_merge` and updates the bounds.
  pub fn merge(&mut self, other: &HalaMeshletBuilder) {
    debug_assert!(self.can_merge(other));
    let remap = other.vertices.iter()
      .map(|v| match self.vertices.iter().position(|x| x == v) {
        Some(slot) => slot as u8,
        None => {
          self.vertices.push(*v);
          (self.vertices.len() - 1) as u8
        },
      })
      .collect::<Vec<_>>();
    self.indices.extend(other.indices.iter().map(|&i| remap[i as usize]));
  }

  /// The meshlet respects every capacity bound.
  pub fn validate(&self) -> bool {
    !self.vertices.is_empty()
      && self.vertices.len() <= MAX_VERTICES
      && !self.indices.is_empty()
      && self.indices.len() <= MAX_INDICES
      && self.indices.len() % 3 == 0
      && self.indices.iter().all(|&i| (i as usize) < self.vertices.len())
  }
}

/// Greedily split a triangle list into meshlets, keeping the triangle order.
/// param triangles: Canonical vertex ids per triangle.
/// param slots: The membership table, all entries NOT_IN_MESHLET.
/// param positions: Positions of the canonical vertices.
/// return: The closed meshlets.
pub(crate) fn build_meshlets(triangles: &[[u32; 3]], slots: &mut [u8], positions: &[Vec3]) -> Vec<HalaMeshletBuilder> {
  let mut meshlets = Vec::new();
  let mut current = HalaMeshletBuilder::new();
  for &tri in triangles {
    if current.insert(tri, slots) {
      continue;
    }
    current.close(slots, positions);
    meshlets.push(std::mem::replace(&mut current, HalaMeshletBuilder::new()));
    let inserted = current.insert(tri, slots);
    assert!(inserted, "a single triangle must always fit an empty meshlet");
  }
  if !current.is_empty() {
    current.close(slots, positions);
    meshlets.push(current);
  }
  meshlets
}

/// A feasible merge, ranked by squared center distance, then by the radius of the merged sphere,
/// then by position in the list.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HalaMergeCandidate {
  d2: f32,
  radius: f32,
  first: usize,
  second: usize,
}

impl HalaMergeCandidate {
  fn is_better(&self, other: &Self) -> bool {
    (self.d2, self.radius, self.first, self.second) < (other.d2, other.radius, other.first, other.second)
  }

  fn involves(&self, index: usize) -> bool {
    self.first == index || self.second == index
  }
}

fn merge_candidate(meshlets: &[Option<HalaMeshletBuilder>], a: usize, b: usize) -> Option<HalaMergeCandidate> {
  if a == b {
    return None;
  }
  let (first, second) = (a.min(b), a.max(b));
  let (x, y) = (meshlets[first].as_ref()?, meshlets[second].as_ref()?);
  if !x.has_intersection(y) || !x.can_merge(y) {
    return None;
  }
  Some(HalaMergeCandidate {
    d2: x.q_distance(y),
    radius: x.bounds.union(&y.bounds).radius,
    first,
    second,
  })
}

fn best_of(a: HalaMergeCandidate, b: HalaMergeCandidate) -> HalaMergeCandidate {
  if b.is_better(&a) { b } else { a }
}

fn best_partner(meshlets: &[Option<HalaMeshletBuilder>], index: usize) -> Option<HalaMergeCandidate> {
  (0..meshlets.len())
    .filter_map(|other| merge_candidate(meshlets, index, other))
    .reduce(best_of)
}

/// Merge overlapping meshlets while capacity allows, always taking the best ranked pair first.
/// Every meshlet caches its best partner; a merge only rescans the meshlets whose partner it consumed.
/// param meshlets: The meshlets of one submesh.
/// param positions: Positions of the canonical vertices.
pub(crate) fn merge_meshlets(meshlets: &mut Vec<HalaMeshletBuilder>, positions: &[Vec3]) {
  let mut alive = std::mem::take(meshlets).into_iter().map(Some).collect::<Vec<_>>();
  let mut best = (0..alive.len()).map(|k| best_partner(&alive, k)).collect::<Vec<_>>();

  while let Some(pick) = best.iter().flatten().copied().reduce(best_of) {
    let (i, j) = (pick.first, pick.second);
    if let (Some(other), Some(target)) = (alive[j].take(), alive[i].as_mut()) {
      target.merge(&other);
      target.update_bounds(positions);
    }
    best[j] = None;
    best[i] = best_partner(&alive, i);
    for k in 0..alive.len() {
      if k == i || alive[k].is_none() {
        continue;
      }
      best[k] = match best[k] {
        Some(current) if current.involves(i) || current.involves(j) => best_partner(&alive, k),
        current => match (current, merge_candidate(&alive, k, i)) {
          (Some(current), Some(fresh)) => Some(best_of(current, fresh)),
          (current, fresh) => current.or(fresh),
        },
      };
    }
  }
  *meshlets = alive.into_iter().flatten().collect();
}

#[cfg(test)]
mod tests {
  use super::*;

  fn slots(n: usize) -> Vec<u8> {
    vec![NOT_IN_MESHLET; n]
  }

  #[test]
  fn shared_vertices_cost_nothing() {
    let mut table = slots(4);
    let mut meshlet = HalaMeshletBuilder::new();
    assert!(meshlet.insert([0, 1, 2], &mut table));
    assert!(meshlet.insert([2, 1, 3], &mut table));
    assert_eq!(meshlet.vertices, vec![0, 1, 2, 3]);
    assert_eq!(meshlet.indices, vec![0, 1, 2, 2, 1, 3]);
  }

  #[test]
  fn degenerate_triangle_counts_each_vertex_once() {
    let mut table = slots(2);
    let mut meshlet = HalaMeshletBuilder::new();
    assert!(meshlet.insert([0, 0, 1], &mut table));
    assert_eq!(meshlet.vertices.len(), 2);
    assert_eq!(meshlet.triangle_count(), 1);
    assert!(meshlet.validate());
  }

  #[test]
  fn vertex_capacity_closes_meshlet() {
    // Disjoint triangles: 21 fit into 63 vertices, the 22nd needs 66.
    let triangles = (0..22u32).map(|t| [t * 3, t * 3 + 1, t * 3 + 2]).collect::<Vec<_>>();
    let positions = (0..66).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect::<Vec<_>>();
    let mut table = slots(66);
    let meshlets = build_meshlets(&triangles, &mut table, &positions);
    assert_eq!(meshlets.len(), 2);
    assert_eq!(meshlets[0].triangle_count(), 21);
    assert_eq!(meshlets[1].triangle_count(), 1);
    assert!(table.iter().all(|&s| s == NOT_IN_MESHLET));
  }

  #[test]
  fn primitive_capacity_closes_meshlet() {
    // The same 3 vertices over and over, only the primitive bound applies.
    let triangles = vec![[0u32, 1, 2]; 65];
    let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
    let mut table = slots(3);
    let meshlets = build_meshlets(&triangles, &mut table, &positions);
    assert_eq!(meshlets.len(), 2);
    assert_eq!(meshlets[0].triangle_count(), MAX_PRIMITIVES);
    assert_eq!(meshlets[0].vertices.len(), 3);
  }

  #[test]
  fn merge_joins_overlapping_small_meshlets() {
    let positions = vec![
      Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0),
      Vec3::new(1.0, 1.0, 0.0), Vec3::new(100.0, 0.0, 0.0), Vec3::new(101.0, 0.0, 0.0),
      Vec3::new(100.0, 1.0, 0.0),
    ];
    let mut table = slots(positions.len());
    let mut meshlets = Vec::new();
    for tri in [[0u32, 1, 2], [1, 3, 2], [4, 5, 6]] {
      let mut m = HalaMeshletBuilder::new();
      assert!(m.insert(tri, &mut table));
      m.close(&mut table, &positions);
      meshlets.push(m);
    }
    merge_meshlets(&mut meshlets, &positions);
    assert_eq!(meshlets.len(), 2);
    assert_eq!(meshlets[0].vertices, vec![0, 1, 2, 3]);
    assert_eq!(meshlets[0].indices, vec![0, 1, 2, 1, 3, 2]);
    assert_eq!(meshlets[1].vertices, vec![4, 5, 6]);
  }

  /// Rescan every pair after every merge.
  fn merge_exhaustively(meshlets: &mut Vec<HalaMeshletBuilder>, positions: &[Vec3]) {
    loop {
      let mut best: Option<(usize, usize, f32, f32)> = None;
      for i in 0..meshlets.len() {
        for j in (i + 1)..meshlets.len() {
          let (a, b) = (&meshlets[i], &meshlets[j]);
          if !a.has_intersection(b) || !a.can_merge(b) {
            continue;
          }
          let d2 = a.q_distance(b);
          let radius = a.bounds.union(&b.bounds).radius;
          if best.map_or(true, |(_, _, bd2, br)| d2 < bd2 || (d2 == bd2 && radius < br)) {
            best = Some((i, j, d2, radius));
          }
        }
      }
      let Some((i, j, _, _)) = best else { break };
      let other = meshlets.remove(j);
      meshlets[i].merge(&other);
      meshlets[i].update_bounds(positions);
    }
  }

  #[test]
  fn merge_picks_the_same_pairs_as_an_exhaustive_search() {
    // A strip of single triangle meshlets with uneven spacing.
    let positions = (0..120)
      .map(|i| Vec3::new((i / 2) as f32 * (1.0 + (i % 7) as f32 * 0.1), (i % 2) as f32, 0.0))
      .collect::<Vec<_>>();
    let mut table = slots(positions.len());
    let mut meshlets = Vec::new();
    for t in 0..58u32 {
      let mut m = HalaMeshletBuilder::new();
      assert!(m.insert([t * 2, t * 2 + 1, t * 2 + 2], &mut table));
      m.close(&mut table, &positions);
      meshlets.push(m);
    }
    let mut expected = meshlets.clone();
    merge_exhaustively(&mut expected, &positions);
    merge_meshlets(&mut meshlets, &positions);

    assert!(meshlets.len() < 58);
    assert_eq!(meshlets.len(), expected.len());
    for (got, want) in meshlets.iter().zip(expected.iter()) {
      assert_eq!(got.vertices, want.vertices);
      assert_eq!(got.indices, want.indices);
      assert!(got.validate());
    }
  }

  #[test]
  fn merge_respects_capacity() {
    let mut a = HalaMeshletBuilder::new();
    let mut b = HalaMeshletBuilder::new();
    let mut table = slots(128);
    for t in 0..20u32 {
      assert!(a.insert([t * 3, t * 3 + 1, t * 3 + 2], &mut table));
    }
    a.close(&mut table, &vec![Vec3::ZERO; 128]);
    for t in 20..40u32 {
      assert!(b.insert([t * 3, t * 3 + 1, t * 3 + 2], &mut table));
    }
    assert!(!a.can_merge(&b));
  }
}
