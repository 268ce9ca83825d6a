use std::{
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use super::{Trace, TraceBuffer, TraceError, TraceKernels, memory::TraceMemory};
use crate::{
    ArrayElement, DataType,
    backends::common::{Context, DeviceProperties, MemoryInfo, NativeBuffer},
    tensor::{BufferId, DeviceTensor},
};

const DEFAULT_TOTAL_MEMORY: usize = 80 << 30;

#[derive(Debug)]
pub struct TraceContext {
    properties: DeviceProperties,
    total_memory: usize,
    free_memory: AtomicUsize,
    memory: TraceMemory,
}

impl TraceContext {
    pub fn new(properties: DeviceProperties) -> Rc<Self> {
        Self::with_memory(properties, DEFAULT_TOTAL_MEMORY)
    }

    pub fn with_memory(
        properties: DeviceProperties,
        total_memory: usize,
    ) -> Rc<Self> {
        Rc::new(Self {
            properties,
            total_memory,
            free_memory: AtomicUsize::new(total_memory),
            memory: TraceMemory::default(),
        })
    }

    /// Kernels sharing this context's buffers.
    pub fn kernels(&self) -> Rc<TraceKernels> {
        Rc::new(TraceKernels::new(self.memory.clone()))
    }

    /// Overrides the free memory reported to the dispatcher.
    pub fn set_free_memory(
        &self,
        free: usize,
    ) {
        self.free_memory.store(free, Ordering::Relaxed);
    }

    /// Allocates a buffer for `shape` and returns a contiguous view over it.
    pub fn create_tensor(
        &self,
        data_type: DataType,
        shape: &[usize],
    ) -> Result<DeviceTensor, TraceError> {
        let size = data_type.bytes_for(shape.iter().product());
        let buffer = self.create_buffer(size)?;
        Ok(DeviceTensor::new(buffer.id(), data_type, shape))
    }

    pub fn write<T: ArrayElement>(
        &self,
        tensor: &DeviceTensor,
        values: &[T],
    ) -> Result<(), TraceError> {
        self.memory.write(tensor.buffer(), tensor.byte_offset(), values)
    }

    pub fn read_bytes(
        &self,
        buffer: BufferId,
        byte_offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, TraceError> {
        self.memory.read(buffer, byte_offset, len)
    }
}

impl Context for TraceContext {
    type Backend = Trace;

    fn device_properties(&self) -> DeviceProperties {
        self.properties
    }

    fn memory_info(&self) -> Result<MemoryInfo, TraceError> {
        Ok(MemoryInfo {
            free: self.free_memory.load(Ordering::Relaxed),
            total: self.total_memory,
        })
    }

    fn create_buffer(
        &self,
        size: usize,
    ) -> Result<TraceBuffer, TraceError> {
        self.free_memory
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |free| {
                free.checked_sub(size)
            })
            .map_err(|available| TraceError::OutOfMemory {
                requested: size,
                available,
            })?;
        let id = self.memory.allocate(size)?;
        Ok(TraceBuffer::new(id, size))
    }
}
