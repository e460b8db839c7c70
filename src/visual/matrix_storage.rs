use std::cell::RefCell;
use std::ops::Range;
use std::rc::{Rc, Weak};

use glam::Mat4;

use crate::device::{
  HalaBuffer,
  HalaBufferUsageFlags,
  HalaDevice,
};
use crate::error::HalaWorldError;

struct HalaMatrixState {
  data: Vec<Mat4>,
  /// Sorted, non adjacent free ranges.
  free: Vec<Range<usize>>,
  dirty: Vec<bool>,
}

impl HalaMatrixState {
  fn alloc(&mut self, count: usize) -> Option<usize> {
    let pos = self.free.iter().position(|r| r.len() >= count)?;
    let range = &mut self.free[pos];
    let offset = range.start;
    range.start += count;
    if range.is_empty() {
      self.free.remove(pos);
    }
    Some(offset)
  }

  fn release(&mut self, range: Range<usize>) {
    let pos = self.free.partition_point(|r| r.start < range.start);
    self.free.insert(pos, range);
    if pos + 1 < self.free.len() && self.free[pos].end == self.free[pos + 1].start {
      let next = self.free.remove(pos + 1);
      self.free[pos].end = next.end;
    }
    if pos > 0 && self.free[pos - 1].end == self.free[pos].start {
      let this = self.free.remove(pos);
      self.free[pos - 1].end = this.end;
    }
  }

  fn mark_dirty(&mut self) {
    self.dirty.iter_mut().for_each(|d| *d = true);
  }
}

/// The bone matrices of every animated instance, mirrored into one storage buffer per frame.
pub struct HalaMatrixStorage {
  device: Rc<dyn HalaDevice>,
  buffers: Vec<HalaBuffer>,
  state: Rc<RefCell<HalaMatrixState>>,
}

/// A range of matrices owned by one animated instance. Returned to the storage on drop.
#[derive(Default)]
pub struct HalaMatrixId {
  state: Weak<RefCell<HalaMatrixState>>,
  offset: usize,
  count: usize,
}

/// The implementation of the matrix storage.
impl HalaMatrixStorage {
  /// Create the storage.
  /// param device: The device.
  /// param capacity: The number of matrices.
  /// param frames_in_flight: The number of per frame buffers.
  /// return: The storage.
  pub fn new(device: Rc<dyn HalaDevice>, capacity: usize, frames_in_flight: usize) -> Result<Self, HalaWorldError> {
    let frames_in_flight = frames_in_flight.max(1);
    let size = (capacity.max(1) * std::mem::size_of::<Mat4>()) as u64;
    let mut buffers = Vec::with_capacity(frames_in_flight);
    for i in 0..frames_in_flight {
      match device.create_buffer(size, HalaBufferUsageFlags::STORAGE_BUFFER, &format!("matrix_storage_{}.buffer", i)) {
        Ok(buffer) => buffers.push(buffer),
        Err(err) => {
          buffers.into_iter().for_each(|b| device.release_buffer(b));
          return Err(HalaWorldError::new("Create matrix storage buffer failed.", Some(Box::new(err))));
        },
      }
    }
    log::debug!("A HalaMatrixStorage of {} matrices is created.", capacity);

    Ok(Self {
      device,
      buffers,
      state: Rc::new(RefCell::new(HalaMatrixState {
        data: vec![Mat4::IDENTITY; capacity],
        free: if capacity > 0 { vec![0..capacity] } else { Vec::new() },
        dirty: vec![true; frames_in_flight],
      })),
    })
  }

  /// Reserve a contiguous range of matrices.
  /// param count: The number of matrices, usually the bone count.
  /// return: The range handle.
  pub fn alloc(&self, count: usize) -> Result<HalaMatrixId, HalaWorldError> {
    if count == 0 {
      return Ok(HalaMatrixId::default());
    }
    let offset = self.state.borrow_mut().alloc(count)
      .ok_or_else(|| HalaWorldError::new(&format!("Matrix storage has no room for {} matrices.", count), None))?;
    Ok(HalaMatrixId {
      state: Rc::downgrade(&self.state),
      offset,
      count,
    })
  }

  /// Upload the matrices for a frame if they changed since its last upload.
  /// param frame_id: The frame slot.
  /// return: The result.
  pub fn commit(&self, frame_id: usize) -> Result<(), HalaWorldError> {
    let mut state = self.state.borrow_mut();
    let frame = frame_id % self.buffers.len();
    if !state.dirty[frame] {
      return Ok(());
    }
    self.device.write_buffer(self.buffers[frame], 0, bytemuck::cast_slice(&state.data))?;
    state.dirty[frame] = false;
    Ok(())
  }

  pub fn buffer(&self, frame_id: usize) -> HalaBuffer {
    self.buffers[frame_id % self.buffers.len()]
  }

  pub fn buffers(&self) -> &[HalaBuffer] {
    &self.buffers
  }

  pub fn capacity(&self) -> usize {
    self.state.borrow().data.len()
  }

  /// Number of matrices not owned by any id.
  pub fn available(&self) -> usize {
    self.state.borrow().free.iter().map(|r| r.len()).sum()
  }
}

impl Drop for HalaMatrixStorage {
  fn drop(&mut self) {
    for buffer in self.buffers.drain(..) {
      self.device.release_buffer(buffer);
    }
    log::debug!("A HalaMatrixStorage is dropped.");
  }
}

/// The implementation of the matrix range handle.
impl HalaMatrixId {
  /// The first matrix of the range, as seen by the shaders.
  pub fn offset(&self) -> u32 {
    self.offset as u32
  }

  pub fn len(&self) -> usize {
    self.count
  }

  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  /// Set one matrix of the range.
  /// param index: The index inside the range.
  /// param mtx: The matrix.
  pub fn set(&self, index: usize, mtx: &Mat4) {
    debug_assert!(index < self.count, "matrix {} out of range {}", index, self.count);
    if index >= self.count {
      return;
    }
    if let Some(state) = self.state.upgrade() {
      let mut state = state.borrow_mut();
      state.data[self.offset + index] = *mtx;
      state.mark_dirty();
    }
  }

  /// Set the whole range, extra matrices are ignored.
  pub fn set_all(&self, matrices: &[Mat4]) {
    if let Some(state) = self.state.upgrade() {
      let mut state = state.borrow_mut();
      let count = matrices.len().min(self.count);
      state.data[self.offset..self.offset + count].copy_from_slice(&matrices[..count]);
      state.mark_dirty();
    }
  }
}

impl Drop for HalaMatrixId {
  fn drop(&mut self) {
    if self.count == 0 {
      return;
    }
    if let Some(state) = self.state.upgrade() {
      state.borrow_mut().release(self.offset..self.offset + self.count);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::testing::RecordingDevice;

  fn storage(capacity: usize) -> (Rc<RecordingDevice>, HalaMatrixStorage) {
    let device = Rc::new(RecordingDevice::default());
    let storage = HalaMatrixStorage::new(device.clone(), capacity, 2).unwrap();
    (device, storage)
  }

  #[test]
  fn ranges_are_reused_and_coalesced() {
    let (_device, storage) = storage(16);
    let a = storage.alloc(4).unwrap();
    let b = storage.alloc(4).unwrap();
    let c = storage.alloc(8).unwrap();
    assert_eq!((a.offset(), b.offset(), c.offset()), (0, 4, 8));
    assert!(storage.alloc(1).is_err());

    drop(a);
    drop(b);
    assert_eq!(storage.available(), 8);
    // Both freed ranges merged into one.
    let d = storage.alloc(8).unwrap();
    assert_eq!(d.offset(), 0);
  }

  #[test]
  fn commit_uploads_only_dirty_frames() {
    let (device, storage) = storage(4);
    let id = storage.alloc(2).unwrap();
    storage.commit(0).unwrap();
    storage.commit(1).unwrap();

    let mtx = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
    id.set(1, &mtx);
    storage.commit(0).unwrap();
    let data = device.buffer_data(storage.buffer(0));
    assert_eq!(&data[64..128], bytemuck::bytes_of(&mtx));
    // Frame 1 has not been committed since the change.
    let stale = device.buffer_data(storage.buffer(1));
    assert_eq!(&stale[64..128], bytemuck::bytes_of(&Mat4::IDENTITY));
  }

  #[test]
  fn ids_outliving_the_storage_are_harmless() {
    let (device, storage) = storage(4);
    let id = storage.alloc(2).unwrap();
    drop(storage);
    assert_eq!(device.live_buffers(), 0);
    id.set(0, &Mat4::IDENTITY);
    drop(id);
  }
}
