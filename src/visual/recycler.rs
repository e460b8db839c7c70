use std::rc::Rc;

use crate::device::{
  HalaAccelerationStructure,
  HalaBuffer,
  HalaDescriptorLayout,
  HalaDescriptorSet,
  HalaDevice,
};
use crate::visual::static_mesh::HalaMeshGeometry;

/// A GPU object waiting for the frames that may still reference it to finish.
#[derive(Debug, Clone)]
pub enum HalaRecycled {
  Buffer(HalaBuffer),
  DescriptorSet(HalaDescriptorLayout, HalaDescriptorSet),
  AccelerationStructure(HalaAccelerationStructure),
  /// A reference to mesh geometry. The geometry is released when its last reference goes.
  Geometry(Rc<HalaMeshGeometry>),
}

impl HalaRecycled {
  /// Hand the object back to the device.
  pub fn release(self, device: &dyn HalaDevice) {
    match self {
      Self::Buffer(buffer) => device.release_buffer(buffer),
      Self::DescriptorSet(_, set) => device.release_descriptor_set(set),
      Self::AccelerationStructure(structure) => device.release_acceleration_structure(structure),
      Self::Geometry(geometry) => drop(geometry),
    }
  }
}

/// A fixed ring of per-frame release queues.
/// Objects pushed while frame `f` is recorded come back out at the start of
/// the next frame with id `f`, when the device is done with the earlier one.
pub struct HalaRecycleRing<T> {
  queues: Vec<Vec<T>>,
  current: usize,
}

/// The implementation of the recycle ring.
impl<T> HalaRecycleRing<T> {
  /// Create a ring.
  /// param frames_in_flight: The number of frames the device may keep in flight.
  /// return: The ring.
  pub fn new(frames_in_flight: usize) -> Self {
    let frames = frames_in_flight.max(1);
    Self {
      queues: (0..frames).map(|_| Vec::new()).collect(),
      current: 0,
    }
  }

  pub fn frames_in_flight(&self) -> usize {
    self.queues.len()
  }

  /// Queue an object for release.
  pub fn push(&mut self, item: T) {
    self.queues[self.current].push(item);
  }

  /// Begin frame `frame_id`.
  /// param frame_id: The frame slot about to be recorded.
  /// return: The objects queued the last time this slot was recorded, safe to release now.
  pub fn pre_frame_update(&mut self, frame_id: usize) -> Vec<T> {
    self.current = frame_id % self.queues.len();
    std::mem::take(&mut self.queues[self.current])
  }

  /// Empty every queue, for teardown when the device is idle.
  pub fn drain_all(&mut self) -> Vec<T> {
    self.queues.iter_mut().flat_map(std::mem::take).collect()
  }

  pub fn pending(&self) -> usize {
    self.queues.iter().map(Vec::len).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn items_come_back_after_all_frames_in_flight() {
    let mut ring = HalaRecycleRing::new(2);
    ring.pre_frame_update(0);
    ring.push("a");
    assert!(ring.pre_frame_update(1).is_empty());
    ring.push("b");
    assert_eq!(ring.pre_frame_update(0), vec!["a"]);
    assert_eq!(ring.pending(), 1);
    assert_eq!(ring.pre_frame_update(1), vec!["b"]);
    assert_eq!(ring.pending(), 0);
  }

  #[test]
  fn drain_all_empties_every_queue() {
    let mut ring = HalaRecycleRing::new(3);
    for frame in 0..3 {
      ring.pre_frame_update(frame);
      ring.push(frame);
    }
    let mut drained = ring.drain_all();
    drained.sort();
    assert_eq!(drained, vec![0, 1, 2]);
    assert_eq!(ring.frames_in_flight(), 3);
  }
}
