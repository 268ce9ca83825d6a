use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::TraceError;
use crate::{ArrayElement, tensor::BufferId};

#[derive(Debug, Default)]
struct Allocations {
    next_id: usize,
    buffers: HashMap<BufferId, Vec<u8>>,
}

/// Host storage shared between a context and its kernels.
#[derive(Debug, Clone, Default)]
pub(super) struct TraceMemory {
    inner: Arc<Mutex<Allocations>>,
}

impl TraceMemory {
    pub fn allocate(
        &self,
        size: usize,
    ) -> Result<BufferId, TraceError> {
        let mut allocations =
            self.inner.lock().map_err(|_| TraceError::Poisoned)?;
        let id = BufferId(allocations.next_id);
        allocations.next_id += 1;
        allocations.buffers.insert(id, vec![0; size]);
        Ok(id)
    }

    pub fn write<T: ArrayElement>(
        &self,
        buffer: BufferId,
        byte_offset: usize,
        values: &[T],
    ) -> Result<(), TraceError> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let mut allocations =
            self.inner.lock().map_err(|_| TraceError::Poisoned)?;
        let storage = allocations
            .buffers
            .get_mut(&buffer)
            .ok_or(TraceError::UnknownBuffer(buffer))?;
        let length = storage.len();
        let target = storage
            .get_mut(byte_offset..byte_offset + bytes.len())
            .ok_or(TraceError::OutOfBounds {
                buffer,
                offset: byte_offset,
                len: bytes.len(),
                length,
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(
        &self,
        buffer: BufferId,
        byte_offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, TraceError> {
        let allocations =
            self.inner.lock().map_err(|_| TraceError::Poisoned)?;
        let storage = allocations
            .buffers
            .get(&buffer)
            .ok_or(TraceError::UnknownBuffer(buffer))?;
        storage
            .get(byte_offset..byte_offset + len)
            .map(<[u8]>::to_vec)
            .ok_or(TraceError::OutOfBounds {
                buffer,
                offset: byte_offset,
                len,
                length: storage.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_at_offset() {
        let memory = TraceMemory::default();
        let buffer = memory.allocate(16).unwrap();
        memory.write(buffer, 4, &[1.5f32, -2.0]).unwrap();
        let bytes = memory.read(buffer, 4, 8).unwrap();
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
        assert_eq!(values, vec![1.5, -2.0]);
    }

    #[test]
    fn test_out_of_bounds_write() {
        let memory = TraceMemory::default();
        let buffer = memory.allocate(4).unwrap();
        assert!(matches!(
            memory.write(buffer, 2, &[0u8; 4]),
            Err(TraceError::OutOfBounds { .. })
        ));
        assert!(matches!(
            memory.read(BufferId(7), 0, 1),
            Err(TraceError::UnknownBuffer(BufferId(7)))
        ));
    }
}
