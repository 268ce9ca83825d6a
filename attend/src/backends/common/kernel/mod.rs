mod params;

pub use params::{
    CommonParams, ContextParams, DecoupledRotaryQuery, GenerationParams,
    GenerationPreparation, LatentParams, PoolAddress, SemaphoreArray,
    SpecDecodingParams,
};

use super::Backend;
use crate::{descriptor::KernelSelection, tensor::DeviceTensor};

/// Opaque attention kernel backend.
///
/// Every `enqueue_*` call submits work to the backend's execution stream in
/// call order; nothing here waits for completion.
pub trait AttentionKernels: Sized {
    type Backend: Backend<Kernels = Self>;

    /// Loads the kernels chosen for a freshly initialized descriptor.
    fn load(
        &self,
        selection: &KernelSelection,
    ) -> Result<(), <Self::Backend as Backend>::Error>;

    fn prepare_generation(
        &self,
        preparation: &GenerationPreparation,
    ) -> Result<(), <Self::Backend as Backend>::Error>;

    /// Reserves `count` zeroed multi-block synchronization slots.
    fn reserve_semaphores(
        &self,
        count: usize,
    ) -> Result<SemaphoreArray, <Self::Backend as Backend>::Error>;

    fn enqueue_context(
        &self,
        params: &ContextParams,
    ) -> Result<(), <Self::Backend as Backend>::Error>;

    fn enqueue_generation(
        &self,
        params: &GenerationParams,
    ) -> Result<(), <Self::Backend as Backend>::Error>;

    fn enqueue_latent_generation(
        &self,
        latent: &LatentParams,
        params: &GenerationParams,
    ) -> Result<(), <Self::Backend as Backend>::Error>;

    /// Whether the first `rows` rows of `output` contain NaN or Inf.
    fn has_non_finite(
        &self,
        output: &DeviceTensor,
        rows: usize,
    ) -> Result<bool, <Self::Backend as Backend>::Error>;
}
