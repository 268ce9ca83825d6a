use super::Backend;
use crate::tensor::BufferId;

pub trait NativeBuffer: Send + Sync {
    type Backend: Backend;

    fn length(&self) -> usize;
    fn id(&self) -> BufferId;
}
