use super::{AttentionInputs, BatchClassification};
use crate::{
    DataType,
    backends::common::Backend,
    config::{AttentionConfig, RunnerConfig},
    descriptor::OperationDescriptor,
    error::{ConfigError, DispatchError, ShapeError},
    paged_cache::{CacheAddressResolver, CacheGeometry},
    runner::PhaseSpan,
    tensor::DeviceTensor,
};

/// Unwraps an optional input that `feature` depends on.
pub(crate) fn require<'t>(
    tensor: &'t Option<DeviceTensor>,
    input: &'static str,
    feature: &'static str,
) -> Result<&'t DeviceTensor, ConfigError> {
    tensor.as_ref().ok_or(ConfigError::MissingInput {
        input,
        feature,
    })
}

/// Tokens per request of a generation sub-batch.
pub(crate) fn generation_input_length(
    num_tokens: usize,
    num_seqs: usize,
    beam_width: usize,
) -> Result<usize, ShapeError> {
    if beam_width == 0 || num_seqs % beam_width != 0 {
        return Err(ShapeError::BeamWidthMismatch {
            num_seqs,
            beam_width,
        });
    }
    if num_seqs == 0 || num_tokens % num_seqs != 0 {
        return Err(ShapeError::NonUniformGeneration {
            num_tokens,
            num_seqs,
        });
    }
    Ok(num_tokens / num_seqs)
}

/// Key/value capacity visible to the kernels: the attention window, or the
/// beam cache indirection width when beams are searched.
pub(crate) fn max_attention_window(
    runner_config: &RunnerConfig,
    inputs: &AttentionInputs,
) -> Result<usize, ConfigError> {
    if runner_config.beam_width == 1 {
        return Ok(runner_config.attention_window_size);
    }
    let indirection = require(&inputs.cache_indirection, "beam cache indirection", "beam search")?;
    Ok(indirection.shape().get(2).copied().unwrap_or(0))
}

/// Largest of `lengths[range]`, rejecting negative entries.
pub(crate) fn max_length(
    lengths: &[i32],
    seq_offset: usize,
    num_seqs: usize,
    what: &'static str,
) -> Result<usize, ShapeError> {
    let slice = lengths.get(seq_offset..seq_offset + num_seqs).ok_or(
        ShapeError::SliceOutOfRange {
            start: seq_offset,
            len: num_seqs,
            total: lengths.len(),
        },
    )?;
    slice.iter().try_fold(0usize, |max, &length| {
        let length = usize::try_from(length).map_err(|_| ShapeError::NegativeValue {
            what,
            value: i64::from(length),
        })?;
        Ok(max.max(length))
    })
}

fn check_rows(
    tensor: &DeviceTensor,
    what: &'static str,
    rows: usize,
) -> Result<(), ShapeError> {
    let actual = tensor.shape().first().copied().unwrap_or(0);
    if actual < rows {
        return Err(ShapeError::LengthMismatch {
            what,
            expected: rows,
            actual,
        });
    }
    Ok(())
}

/// Checks every input an enabled feature depends on for the planned phases,
/// before anything is enqueued.
pub(crate) fn validate_inputs<B: Backend>(
    config: &AttentionConfig,
    descriptor: &OperationDescriptor,
    output_data_type: DataType,
    inputs: &AttentionInputs,
    classification: &BatchClassification,
    phases: &[PhaseSpan],
) -> Result<(), DispatchError<B>> {
    let num_seqs = classification.num_seqs;
    let num_tokens = inputs.num_tokens();

    if inputs.output.data_type() != output_data_type {
        return Err(ConfigError::OutputTypeMismatch {
            expected: output_data_type,
            actual: inputs.output.data_type(),
        }
        .into());
    }
    check_rows(&inputs.output, "output", num_tokens)?;
    check_rows(&inputs.sequence_lengths, "sequence lengths", num_seqs)?;
    check_rows(&inputs.context_lengths, "context lengths", num_seqs)?;
    if inputs.host_past_kv_lengths.len() < num_seqs {
        return Err(ShapeError::LengthMismatch {
            what: "host past KV lengths",
            expected: num_seqs,
            actual: inputs.host_past_kv_lengths.len(),
        }
        .into());
    }

    if let Some(paged_cache) = &inputs.paged_cache {
        paged_cache.validate_layout()?;
        let resolver = CacheAddressResolver::new(CacheGeometry::new(descriptor, descriptor.data_type())?);
        let mapping = resolver.pool_mapping(paged_cache.pool_mapping, descriptor.layer_idx())?;
        resolver.pool_addresses(paged_cache.pools, mapping)?;
        let total = paged_cache.max_sequences();
        for span in phases {
            if span.seq_end() > total {
                return Err(ShapeError::SliceOutOfRange {
                    start: span.seq_offset,
                    len: span.num_seqs,
                    total,
                }
                .into());
            }
        }
    }

    if descriptor.is_rotary_enabled() {
        require(&inputs.rotary.cos_sin, "rotary cos/sin table", "rotary embedding")?;
    }
    if descriptor.kv_cache_quant_mode().has_kv_cache_quant() && inputs.kv_quant_scales.is_none() {
        return Err(ConfigError::MissingInput {
            input: "KV cache quantization scales",
            feature: "KV cache quantization",
        }
        .into());
    }
    if descriptor.fp8_context_fmha() {
        require(&inputs.output_scale, "output scale", "compressed output")?;
    }
    if descriptor.fuse_fp4_quant() {
        require(&inputs.output_scale_factors, "output scale factors", "4-bit output")?;
    }
    if config.beam_width > 1 {
        let indirection = require(&inputs.cache_indirection, "beam cache indirection", "beam search")?;
        if indirection.rank() != 3 {
            return Err(ShapeError::InvalidLayout {
                tensor: "beam cache indirection",
                reason: "expected [batch, beam, window]",
            }
            .into());
        }
    }

    let generation_planned = phases.iter().any(|span| !span.is_context());
    for span in phases {
        if !span.is_context() {
            generation_input_length(span.num_tokens, span.num_seqs, config.beam_width)?;
        }
        if descriptor.is_latent_attention_enabled() {
            validate_latent::<B>(descriptor, inputs, span)?;
        }
    }

    if generation_planned && descriptor.spec_decoding().is_active() {
        let spec_decoding = &inputs.spec_decoding;
        for (tensor, input) in [
            (&spec_decoding.generation_lengths, "speculative generation lengths"),
            (&spec_decoding.position_offsets, "speculative position offsets"),
            (&spec_decoding.packed_mask, "speculative packed mask"),
        ] {
            require(tensor, input, "speculative decoding")?;
        }
    }
    Ok(())
}

fn validate_latent<B: Backend>(
    descriptor: &OperationDescriptor,
    inputs: &AttentionInputs,
    span: &PhaseSpan,
) -> Result<(), DispatchError<B>> {
    let latent = &inputs.latent;
    if span.is_context() && descriptor.paged_context_fmha() && descriptor.uses_paged_cache() {
        require(&latent.context_paged_kv, "latent context paged KV", "paged context latent attention")?;
        require(
            &latent.context_block_offsets,
            "latent context block offsets",
            "paged context latent attention",
        )?;
    } else {
        require(&latent.latent_cache, "latent cache", "latent attention")?;
    }
    if !span.is_context() {
        decoupled_rotary_layout(require(&latent.q_pe, "decoupled rotary query", "latent generation")?)?;
        if descriptor.uses_flash_latent() {
            require(&latent.block_ids_per_seq, "per-sequence block ids", "flash latent generation")?;
        }
    }
    Ok(())
}

/// Leading dimension and row stride of a `[tokens, heads, rope_dim]` query.
pub(crate) fn decoupled_rotary_layout(q_pe: &DeviceTensor) -> Result<(usize, usize), ShapeError> {
    if q_pe.rank() != 3 {
        return Err(ShapeError::InvalidLayout {
            tensor: "decoupled rotary query",
            reason: "expected rank 3",
        });
    }
    if q_pe.stride(2) != 1 {
        return Err(ShapeError::InvalidLayout {
            tensor: "decoupled rotary query",
            reason: "innermost stride must be 1",
        });
    }
    Ok((q_pe.stride(1), q_pe.stride(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::BufferId;

    #[test]
    fn test_generation_input_length() {
        assert_eq!(generation_input_length(8, 4, 1), Ok(2));
        assert_eq!(generation_input_length(8, 4, 2), Ok(2));
        assert_eq!(
            generation_input_length(7, 2, 1),
            Err(ShapeError::NonUniformGeneration {
                num_tokens: 7,
                num_seqs: 2
            })
        );
        assert!(matches!(
            generation_input_length(6, 3, 2),
            Err(ShapeError::BeamWidthMismatch { .. })
        ));
    }

    #[test]
    fn test_max_length_over_slice() {
        let lengths = [5, 17, 3, 9];
        assert_eq!(max_length(&lengths, 1, 2, "context length"), Ok(17));
        assert_eq!(max_length(&lengths, 2, 2, "context length"), Ok(9));
        assert_eq!(max_length(&lengths, 4, 0, "context length"), Ok(0));
        assert!(max_length(&lengths, 3, 2, "context length").is_err());
        assert_eq!(
            max_length(&[1, -2], 0, 2, "past KV length"),
            Err(ShapeError::NegativeValue {
                what: "past KV length",
                value: -2
            })
        );
    }

    #[test]
    fn test_decoupled_rotary_layout() {
        let q_pe = DeviceTensor::with_strides(BufferId(0), DataType::BF16, &[4, 16, 64], &[1536, 96, 1]);
        assert_eq!(decoupled_rotary_layout(&q_pe), Ok((96, 1536)));
        let transposed = DeviceTensor::with_strides(BufferId(0), DataType::BF16, &[4, 16, 64], &[1024, 1, 16]);
        assert!(decoupled_rotary_layout(&transposed).is_err());
        let flat = DeviceTensor::new(BufferId(0), DataType::BF16, &[4, 1024]);
        assert!(decoupled_rotary_layout(&flat).is_err());
    }
}
