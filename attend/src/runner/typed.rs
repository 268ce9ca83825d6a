use std::{marker::PhantomData, sync::Arc};

use super::{Phase, PhaseSpan, PreparedOperation, RunnerStrategy};
use crate::{
    AttentionElement, DataType,
    backends::common::{
        AttentionKernels, Backend, Context,
        kernel::{
            CommonParams, ContextParams, DecoupledRotaryQuery, GenerationParams,
            GenerationPreparation, LatentParams, SpecDecodingParams,
        },
    },
    config::{LatentAttentionParams, RunnerConfig},
    descriptor::OperationDescriptor,
    dispatcher::{
        AttentionInputs,
        validation::{
            decoupled_rotary_layout, generation_input_length, max_attention_window,
            max_length, require,
        },
    },
    error::DispatchError,
    paged_cache::{CacheAddressResolver, CacheGeometry},
    tensor::DeviceTensor,
};

/// Runner computing in `T` and writing `O` (`T` unless the output is
/// compressed).
pub struct Runner<T, O = T> {
    _marker: PhantomData<fn() -> (T, O)>,
}

impl<T, O> Runner<T, O> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T, O> Default for Runner<T, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AttentionElement, O: AttentionElement> Runner<T, O> {
    fn common_params<'a, B: Backend>(
        &self,
        operation: &'a PreparedOperation,
        span: &PhaseSpan,
        inputs: &AttentionInputs<'a>,
        workspace: &DeviceTensor,
    ) -> Result<(CommonParams<'a>, Option<&'a [i32]>), DispatchError<B>> {
        let descriptor: &'a OperationDescriptor = operation.descriptor();
        let runner_config = operation.runner_config();

        let (rotary_inv_freq, rotary_cos_sin) = if descriptor.is_rotary_enabled() {
            let cos_sin = require(&inputs.rotary.cos_sin, "rotary cos/sin table", "rotary embedding")?;
            (inputs.rotary.inv_freq.clone(), Some(cos_sin.clone()))
        } else {
            (None, None)
        };

        let max_past_kv_length =
            max_length(inputs.host_past_kv_lengths, span.seq_offset, span.num_seqs, "past KV length")?;
        let max_attention_window_size = max_attention_window(runner_config, inputs)?;
        let cyclic_attention_window_size = runner_config.attention_window_size;

        let resolved = match &inputs.paged_cache {
            Some(paged_cache) if descriptor.use_kv_cache() => {
                let resolver = CacheAddressResolver::new(CacheGeometry::new(descriptor, T::DATA_TYPE)?);
                Some(resolver.resolve(paged_cache, descriptor.layer_idx(), span.seq_offset, span.num_seqs)?)
            },
            _ => None,
        };

        let (kv_scale_orig_quant, kv_scale_quant_orig) =
            match (&inputs.kv_quant_scales, descriptor.kv_cache_quant_mode().has_kv_cache_quant()) {
                (Some(scales), true) => (Some(scales.orig_quant.clone()), Some(scales.quant_orig.clone())),
                _ => (None, None),
            };

        let attention_output_orig_quant = if descriptor.fp8_context_fmha() && !descriptor.fuse_fp4_quant() {
            Some(require(&inputs.output_scale, "output scale", "8-bit output")?.clone())
        } else {
            None
        };
        let (attention_output_sf_scale, context_buf_sf) = if descriptor.fuse_fp4_quant() {
            (
                Some(require(&inputs.output_scale, "output scale", "4-bit output")?.clone()),
                Some(require(&inputs.output_scale_factors, "output scale factors", "4-bit output")?.clone()),
            )
        } else {
            (None, None)
        };

        let common = CommonParams {
            descriptor,
            input_data_type: T::DATA_TYPE,
            output_data_type: O::DATA_TYPE,
            attention_input: inputs.qkv.narrow_from(span.token_offset)?,
            rotary_inv_freq,
            rotary_cos_sin,
            max_past_kv_length,
            max_attention_window_size,
            cyclic_attention_window_size,
            max_cyclic_attention_window_size: cyclic_attention_window_size,
            can_use_one_more_block: runner_config.beam_width > 1,
            sink_token_length: runner_config.sink_token_length,
            kv_scale_orig_quant,
            kv_scale_quant_orig,
            attention_output_orig_quant,
            attention_output_sf_scale,
            context_buf: inputs.output.narrow_from(span.token_offset)?,
            context_buf_sf,
            block_offsets: resolved.as_ref().map(|cache| cache.block_offsets.clone()),
            host_primary_pool: resolved.as_ref().map(|cache| cache.primary),
            host_secondary_pool: resolved.as_ref().and_then(|cache| cache.secondary),
            num_tokens: span.num_tokens,
            max_blocks_per_sequence: resolved.as_ref().map_or(0, |cache| cache.max_blocks_per_sequence),
            sequence_lengths: inputs.sequence_lengths.narrow_from(span.seq_offset)?,
            context_lengths: inputs.context_lengths.narrow_from(span.seq_offset)?,
            host_context_lengths: inputs.host_context_lengths,
            workspace: workspace.clone(),
            input_seq_length: 0,
        };
        Ok((common, resolved.map(|cache| cache.host_block_offsets)))
    }

    fn latent_params<B: Backend>(
        &self,
        meta: LatentAttentionParams,
        descriptor: &OperationDescriptor,
        span: &PhaseSpan,
        inputs: &AttentionInputs,
        common: &CommonParams,
    ) -> Result<LatentParams, DispatchError<B>> {
        let latent = &inputs.latent;
        let paged_context =
            span.is_context() && descriptor.paged_context_fmha() && descriptor.uses_paged_cache();

        let mut params = LatentParams {
            meta,
            attention_input: common.attention_input.clone(),
            context_buf: common.context_buf.clone(),
            cos_sin_cache: common.rotary_cos_sin.clone(),
            latent_cache: None,
            context_paged_kv: None,
            context_block_offsets: None,
            context_paged_kv_max_blocks_per_seq: 0,
            q_pe: None,
            block_ids_per_seq: None,
            cache_seq_lens: common.sequence_lengths.clone(),
            batch_size: span.num_seqs,
            acc_q_len: span.num_tokens,
            head_num: descriptor.num_heads(),
            max_input_seq_len: 0,
            workspace: common.workspace.clone(),
        };

        if paged_context {
            let feature = "paged context latent attention";
            let block_offsets = require(&latent.context_block_offsets, "latent context block offsets", feature)?;
            params.context_paged_kv =
                Some(require(&latent.context_paged_kv, "latent context paged KV", feature)?.clone());
            params.context_paged_kv_max_blocks_per_seq = block_offsets.last_dim();
            params.context_block_offsets = Some(block_offsets.clone());
        } else {
            params.latent_cache = Some(require(&latent.latent_cache, "latent cache", "latent attention")?.clone());
        }

        if !span.is_context() {
            let q_pe = require(&latent.q_pe, "decoupled rotary query", "latent generation")?;
            let (leading_dimension, stride) = decoupled_rotary_layout(q_pe)?;
            params.q_pe = Some(DecoupledRotaryQuery {
                tensor: q_pe.clone(),
                leading_dimension,
                stride,
            });
            if descriptor.uses_flash_latent() {
                params.block_ids_per_seq = Some(
                    require(&latent.block_ids_per_seq, "per-sequence block ids", "flash latent generation")?
                        .clone(),
                );
            }
        }
        Ok(params)
    }

    fn spec_decoding_params<B: Backend>(
        &self,
        inputs: &AttentionInputs,
        input_seq_length: usize,
    ) -> Result<SpecDecodingParams, DispatchError<B>> {
        let spec_decoding = &inputs.spec_decoding;
        let feature = "speculative decoding";
        Ok(SpecDecodingParams {
            generation_lengths: require(&spec_decoding.generation_lengths, "speculative generation lengths", feature)?
                .clone(),
            position_offsets: require(&spec_decoding.position_offsets, "speculative position offsets", feature)?
                .clone(),
            packed_mask: require(&spec_decoding.packed_mask, "speculative packed mask", feature)?.clone(),
            is_generation_length_variable: true,
            max_generation_length: input_seq_length + 1,
        })
    }
}

impl<B, T, O> RunnerStrategy<B> for Runner<T, O>
where
    B: Backend,
    T: AttentionElement,
    O: AttentionElement,
{
    fn input_data_type(&self) -> DataType {
        T::DATA_TYPE
    }

    fn output_data_type(&self) -> DataType {
        O::DATA_TYPE
    }

    fn prepare(
        &self,
        descriptor: &Arc<OperationDescriptor>,
        runner_config: RunnerConfig,
        context: &B::Context,
        kernels: &B::Kernels,
    ) -> Result<PreparedOperation, DispatchError<B>> {
        kernels
            .prepare_generation(&GenerationPreparation {
                descriptor,
                input_data_type: T::DATA_TYPE,
                output_data_type: O::DATA_TYPE,
                beam_width: runner_config.beam_width,
                max_num_requests: runner_config.max_num_requests,
                max_attention_window_size: runner_config.attention_window_size,
                cyclic_attention_window_size: runner_config.attention_window_size,
                sink_token_length: runner_config.sink_token_length,
            })
            .map_err(DispatchError::Backend)?;

        // Multi-block generation may split heads further; never reserve fewer
        // slots than there are multiprocessors.
        let multiprocessor_count = context.device_properties().multiprocessor_count;
        let slots = (descriptor.num_heads() * runner_config.max_num_requests).max(multiprocessor_count);
        let semaphores = kernels.reserve_semaphores(slots).map_err(DispatchError::Backend)?;

        Ok(PreparedOperation::new(descriptor.clone(), runner_config, semaphores))
    }

    fn workspace_size(
        &self,
        descriptor: &OperationDescriptor,
        runner_config: &RunnerConfig,
        num_tokens: usize,
        max_attention_window_size: usize,
        num_gen_tokens: usize,
    ) -> usize {
        let context = descriptor.context_workspace_size(
            runner_config.max_num_requests,
            descriptor.max_context_length(),
            num_tokens,
        );
        let generation = descriptor.generation_workspace_size(
            runner_config.max_num_requests,
            max_attention_window_size,
            num_gen_tokens,
        );
        context.max(generation)
    }

    fn run(
        &self,
        operation: &PreparedOperation,
        kernels: &B::Kernels,
        span: &PhaseSpan,
        inputs: &AttentionInputs,
        workspace: &DeviceTensor,
    ) -> Result<(), DispatchError<B>> {
        let descriptor = operation.descriptor();
        let runner_config = operation.runner_config();
        let (mut common, host_block_offsets) = self.common_params::<B>(operation, span, inputs, workspace)?;
        let max_context_q_len =
            max_length(inputs.host_context_lengths, span.seq_offset, span.num_seqs, "context length")?;

        let mut latent = match descriptor.latent() {
            Some(meta) => Some(self.latent_params::<B>(*meta, descriptor, span, inputs, &common)?),
            None => None,
        };

        match span.phase {
            Phase::Context => {
                common.input_seq_length = max_context_q_len;
                if let Some(latent) = latent.as_mut() {
                    latent.max_input_seq_len = max_context_q_len;
                }
                let multi_rope_cos_sin = if descriptor.is_multi_rope_enabled() {
                    inputs.multi_rope.cos_sin.clone()
                } else {
                    None
                };
                let params = ContextParams {
                    common,
                    host_block_offsets,
                    batch_size: span.num_seqs,
                    softmax_stats: inputs.softmax_stats.clone(),
                    latent,
                    multi_rope_cos_sin,
                };
                kernels.enqueue_context(&params).map_err(DispatchError::Backend)
            },
            Phase::Generation => {
                let beam_width = runner_config.beam_width;
                let input_seq_length = generation_input_length(span.num_tokens, span.num_seqs, beam_width)?;
                common.input_seq_length = input_seq_length;

                let spec_decoding = if descriptor.spec_decoding().is_active() {
                    Some(self.spec_decoding_params::<B>(inputs, input_seq_length)?)
                } else {
                    None
                };
                let multi_rope_position_deltas = if descriptor.is_multi_rope_enabled() {
                    inputs.multi_rope.position_deltas.clone()
                } else {
                    None
                };
                let cache_indirection = if beam_width > 1 {
                    Some(require(&inputs.cache_indirection, "beam cache indirection", "beam search")?.clone())
                } else {
                    None
                };
                let params = GenerationParams {
                    common,
                    beam_width,
                    num_requests: span.num_seqs / beam_width,
                    cache_indirection,
                    semaphores: operation.semaphores(),
                    host_past_kv_lengths: inputs.host_past_kv_lengths,
                    start_token_idx_sf: span.token_offset,
                    multi_rope_position_deltas,
                    spec_decoding,
                };

                let enqueued = match &latent {
                    Some(latent) => kernels.enqueue_latent_generation(latent, &params),
                    None => kernels.enqueue_generation(&params),
                };
                enqueued.map_err(DispatchError::Backend)
            },
        }
    }
}
