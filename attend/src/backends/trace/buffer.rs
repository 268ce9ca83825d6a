use super::Trace;
use crate::{backends::common::NativeBuffer, tensor::BufferId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceBuffer {
    id: BufferId,
    length: usize,
}

impl TraceBuffer {
    pub(super) fn new(
        id: BufferId,
        length: usize,
    ) -> Self {
        Self {
            id,
            length,
        }
    }
}

impl NativeBuffer for TraceBuffer {
    type Backend = Trace;

    fn length(&self) -> usize {
        self.length
    }

    fn id(&self) -> BufferId {
        self.id
    }
}
