use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use half::{bf16, f16};
use serde::Serialize;

use super::{Trace, TraceError, memory::TraceMemory};
use crate::{
    ArrayElement, DataType,
    backends::common::{
        AttentionKernels,
        kernel::{
            CommonParams, ContextParams, GenerationParams,
            GenerationPreparation, LatentParams, PoolAddress, SemaphoreArray,
        },
    },
    descriptor::{ContextKernel, GenerationKernel, KernelSelection},
    runner::Phase,
    tensor::DeviceTensor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchKernel {
    Context(ContextKernel),
    Generation(GenerationKernel),
}

/// One recorded kernel submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelLaunch {
    pub phase: Phase,
    pub kernel: LaunchKernel,
    pub layer_idx: usize,
    pub input_data_type: DataType,
    pub output_data_type: DataType,
    pub batch_size: usize,
    pub num_tokens: usize,
    pub token_offset: usize,
    pub input_seq_length: usize,
    pub max_past_kv_length: usize,
    pub max_attention_window_size: usize,
    pub max_blocks_per_sequence: usize,
    pub primary_pool: Option<PoolAddress>,
    pub secondary_pool: Option<PoolAddress>,
    pub workspace_bytes: usize,
    pub latent: bool,
    pub max_generation_length: Option<usize>,
}

impl KernelLaunch {
    fn new(
        phase: Phase,
        kernel: LaunchKernel,
        common: &CommonParams,
        batch_size: usize,
    ) -> Self {
        Self {
            phase,
            kernel,
            layer_idx: common.descriptor.layer_idx(),
            input_data_type: common.input_data_type,
            output_data_type: common.output_data_type,
            batch_size,
            num_tokens: common.num_tokens,
            token_offset: common.token_offset(),
            input_seq_length: common.input_seq_length,
            max_past_kv_length: common.max_past_kv_length,
            max_attention_window_size: common.max_attention_window_size,
            max_blocks_per_sequence: common.max_blocks_per_sequence,
            primary_pool: common.host_primary_pool,
            secondary_pool: common.host_secondary_pool,
            workspace_bytes: common.workspace.len_bytes(),
            latent: false,
            max_generation_length: None,
        }
    }
}

#[derive(Debug)]
pub struct TraceKernels {
    memory: TraceMemory,
    launches: Mutex<Vec<KernelLaunch>>,
    loads: AtomicUsize,
    preparations: AtomicUsize,
    semaphore_reservations: Mutex<Vec<usize>>,
    non_finite_checks: AtomicUsize,
}

impl TraceKernels {
    pub(super) fn new(memory: TraceMemory) -> Self {
        Self {
            memory,
            launches: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            preparations: AtomicUsize::new(0),
            semaphore_reservations: Mutex::new(Vec::new()),
            non_finite_checks: AtomicUsize::new(0),
        }
    }

    /// Launches recorded so far, in submission order.
    pub fn launches(&self) -> Vec<KernelLaunch> {
        self.launches.lock().map(|launches| launches.clone()).unwrap_or_default()
    }

    pub fn clear_launches(&self) {
        if let Ok(mut launches) = self.launches.lock() {
            launches.clear();
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn preparation_count(&self) -> usize {
        self.preparations.load(Ordering::Relaxed)
    }

    /// Slot counts of every semaphore reservation.
    pub fn semaphore_reservations(&self) -> Vec<usize> {
        self.semaphore_reservations
            .lock()
            .map(|reservations| reservations.clone())
            .unwrap_or_default()
    }

    pub fn non_finite_check_count(&self) -> usize {
        self.non_finite_checks.load(Ordering::Relaxed)
    }

    fn record(
        &self,
        launch: KernelLaunch,
    ) -> Result<(), TraceError> {
        log::trace!("{:?} launch {:?} at layer {}", launch.phase, launch.kernel, launch.layer_idx);
        self.launches.lock().map_err(|_| TraceError::Poisoned)?.push(launch);
        Ok(())
    }

    fn selection<'a>(
        common: &CommonParams<'a>
    ) -> Result<&'a KernelSelection, TraceError> {
        common.descriptor.selection().ok_or(TraceError::NotInitialized {
            layer_idx: common.descriptor.layer_idx(),
        })
    }
}

fn contains_non_finite<T: ArrayElement>(bytes: &[u8]) -> bool {
    bytes.chunks_exact(size_of::<T>()).any(|chunk| {
        let value: T = bytemuck::pod_read_unaligned(chunk);
        num_traits::cast::<T, f64>(value).is_none_or(|value| !value.is_finite())
    })
}

impl AttentionKernels for TraceKernels {
    type Backend = Trace;

    fn load(
        &self,
        selection: &KernelSelection,
    ) -> Result<(), TraceError> {
        log::trace!("Loading kernels {:?}", selection);
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn prepare_generation(
        &self,
        _preparation: &GenerationPreparation,
    ) -> Result<(), TraceError> {
        self.preparations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn reserve_semaphores(
        &self,
        count: usize,
    ) -> Result<SemaphoreArray, TraceError> {
        let buffer = self.memory.allocate(count * size_of::<u32>())?;
        self.semaphore_reservations
            .lock()
            .map_err(|_| TraceError::Poisoned)?
            .push(count);
        Ok(SemaphoreArray {
            buffer,
            count,
        })
    }

    fn enqueue_context(
        &self,
        params: &ContextParams,
    ) -> Result<(), TraceError> {
        let selection = Self::selection(&params.common)?;
        let mut launch = KernelLaunch::new(
            Phase::Context,
            LaunchKernel::Context(selection.context),
            &params.common,
            params.batch_size,
        );
        launch.latent = params.latent.is_some();
        self.record(launch)
    }

    fn enqueue_generation(
        &self,
        params: &GenerationParams,
    ) -> Result<(), TraceError> {
        let selection = Self::selection(&params.common)?;
        let mut launch = KernelLaunch::new(
            Phase::Generation,
            LaunchKernel::Generation(selection.generation),
            &params.common,
            params.num_requests * params.beam_width,
        );
        launch.max_generation_length = params
            .spec_decoding
            .as_ref()
            .map(|spec_decoding| spec_decoding.max_generation_length);
        self.record(launch)
    }

    fn enqueue_latent_generation(
        &self,
        latent: &LatentParams,
        params: &GenerationParams,
    ) -> Result<(), TraceError> {
        let selection = Self::selection(&params.common)?;
        let mut launch = KernelLaunch::new(
            Phase::Generation,
            LaunchKernel::Generation(selection.generation),
            &params.common,
            latent.batch_size,
        );
        launch.latent = true;
        launch.max_generation_length = params
            .spec_decoding
            .as_ref()
            .map(|spec_decoding| spec_decoding.max_generation_length);
        self.record(launch)
    }

    fn has_non_finite(
        &self,
        output: &DeviceTensor,
        rows: usize,
    ) -> Result<bool, TraceError> {
        self.non_finite_checks.fetch_add(1, Ordering::Relaxed);
        let elements = match output.strides().first() {
            Some(&row_stride) => rows * row_stride,
            None => output.num_elements(),
        };
        let bytes = self.memory.read(
            output.buffer(),
            output.byte_offset(),
            output.data_type().bytes_for(elements),
        )?;
        Ok(match output.data_type() {
            DataType::F32 => contains_non_finite::<f32>(&bytes),
            DataType::F16 => contains_non_finite::<f16>(&bytes),
            DataType::BF16 => contains_non_finite::<bf16>(&bytes),
            _ => false,
        })
    }
}
