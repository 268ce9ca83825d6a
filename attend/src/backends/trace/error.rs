use thiserror::Error;

use crate::tensor::BufferId;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("Out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    #[error("Access of {len} bytes at {offset} outside buffer {buffer:?} of {length} bytes")]
    OutOfBounds {
        buffer: BufferId,
        offset: usize,
        len: usize,
        length: usize,
    },
    #[error("Launch before kernels were selected for layer {layer_idx}")]
    NotInitialized {
        layer_idx: usize,
    },
    #[error("Trace state poisoned")]
    Poisoned,
}
