mod key;
mod probe;
mod selection;
mod workspace;

pub use key::{DescriptorKey, FloatBits};
pub use probe::CompressedOutputProbe;
pub use selection::{
    ContextKernel, GenerationKernel, KernelSelection, supports_fp4_output,
};
pub use workspace::WORKSPACE_ALIGNMENT;

use crate::{
    DataType,
    backends::common::DeviceProperties,
    config::{
        AttentionConfig, LatentAttentionParams, MaskType, QuantMode,
        SpecDecodingFlags,
    },
    error::ConfigError,
};

/// Element type of the attention output relative to the input type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputQuantization {
    None,
    Fp8,
    Fp4,
}

impl OutputQuantization {
    pub fn of(output: DataType) -> Self {
        match output {
            DataType::F8E4M3 => OutputQuantization::Fp8,
            DataType::FP4E2M1 => OutputQuantization::Fp4,
            _ => OutputQuantization::None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        *self != OutputQuantization::None
    }
}

/// Frozen attention configuration plus the kernel variants selected for it.
///
/// Equality and hashing go through [`DescriptorKey`]; the selection is
/// derived from the key and the device, so two descriptors with equal keys
/// initialized on the same device are interchangeable.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    key: DescriptorKey,
    selection: Option<KernelSelection>,
}

impl PartialEq for OperationDescriptor {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.key == other.key
    }
}

impl Eq for OperationDescriptor {}

impl OperationDescriptor {
    /// Builds an uninitialized descriptor.
    ///
    /// `latent_num_layers` is the number of layers in the cache pool mapping
    /// and is required when latent attention is enabled.
    pub fn new(
        config: &AttentionConfig,
        data_type: DataType,
        output: OutputQuantization,
        use_kv_cache: bool,
        latent_num_layers: Option<usize>,
    ) -> Result<Self, ConfigError> {
        let mut num_kv_heads = config.num_kv_heads;
        let mut head_size = config.head_size;
        let mut is_generation_latent = false;
        let latent = match config.latent {
            Some(dims) => {
                if output == OutputQuantization::Fp4 {
                    return Err(ConfigError::CompressedOutputWithLatent);
                }
                let compressed = dims.compressed_head_size();
                let context = dims.context_head_size();
                if head_size != compressed && head_size != context {
                    return Err(ConfigError::LatentHeadSizeMismatch {
                        head_size,
                        context,
                        compressed,
                    });
                }
                is_generation_latent = head_size == compressed;
                let num_layers =
                    latent_num_layers.ok_or(ConfigError::MissingInput {
                        input: "cache pool mapping",
                        feature: "latent attention",
                    })?;
                num_kv_heads = 1;
                head_size = compressed;
                Some(LatentAttentionParams {
                    dims,
                    predicted_tokens_per_seq: config.predicted_tokens_per_seq,
                    num_layers,
                })
            },
            None => None,
        };

        if use_kv_cache && config.tokens_per_block.is_none() {
            return Err(ConfigError::MissingTokensPerBlock);
        }

        let rotary = &config.rotary;
        let key = DescriptorKey {
            data_type,
            layer_idx: config.layer_idx,
            num_heads: config.num_heads,
            num_kv_heads,
            head_size,
            mask_type: config.mask_type,
            kv_cache_quant_mode: config.quant_mode,
            use_kv_cache,
            paged_kv_cache: use_kv_cache,
            tokens_per_block: config.tokens_per_block,
            fp8_context_fmha: output.is_compressed(),
            fuse_fp4_quant: output == OutputQuantization::Fp4,
            fmha_force_fp32_acc: data_type == DataType::BF16,
            max_context_length: config.max_context_length,
            q_scaling: config.q_scaling.into(),
            position_embedding_type: config.position_embedding_type,
            rotary_dim: rotary.dim,
            rotary_base: rotary.base.into(),
            rotary_scale_type: rotary.scale_type,
            rotary_scales: rotary.scales.map(Into::into),
            rotary_max_positions: rotary.max_positions(),
            rotary_original_max_positions: rotary.original_max_positions(),
            paged_context_fmha: config.use_paged_context_fmha,
            attention_chunk_size: config.attention_chunk_size,
            spec_decoding: config.spec_decoding,
            multi_block_mode: !config.spec_decoding.is_enabled,
            latent,
            is_generation_latent,
        };
        Ok(Self::from_key(key))
    }

    pub fn from_key(key: DescriptorKey) -> Self {
        Self {
            key,
            selection: None,
        }
    }

    /// Selects kernel variants for `device`. Calling it again for the same
    /// device leaves the descriptor untouched.
    pub fn initialize(
        &mut self,
        device: &DeviceProperties,
    ) -> Result<(), ConfigError> {
        if self.selection.is_some_and(|selection| selection.device == *device) {
            return Ok(());
        }
        self.selection = Some(KernelSelection::select(&self.key, device)?);
        Ok(())
    }

    pub fn key(&self) -> &DescriptorKey {
        &self.key
    }

    pub fn selection(&self) -> Option<&KernelSelection> {
        self.selection.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.selection.is_some()
    }

    pub fn data_type(&self) -> DataType {
        self.key.data_type
    }

    pub fn layer_idx(&self) -> usize {
        self.key.layer_idx
    }

    pub fn num_heads(&self) -> usize {
        self.key.num_heads
    }

    pub fn num_kv_heads(&self) -> usize {
        self.key.num_kv_heads
    }

    pub fn head_size(&self) -> usize {
        self.key.head_size
    }

    pub fn tokens_per_block(&self) -> Option<usize> {
        self.key.tokens_per_block
    }

    pub fn mask_type(&self) -> MaskType {
        self.key.mask_type
    }

    pub fn kv_cache_quant_mode(&self) -> QuantMode {
        self.key.kv_cache_quant_mode
    }

    pub fn max_context_length(&self) -> usize {
        self.key.max_context_length
    }

    pub fn rotary_dim(&self) -> usize {
        self.key.rotary_dim
    }

    pub fn use_kv_cache(&self) -> bool {
        self.key.use_kv_cache
    }

    pub fn uses_paged_cache(&self) -> bool {
        self.key.paged_kv_cache
    }

    pub fn paged_context_fmha(&self) -> bool {
        self.key.paged_context_fmha
    }

    pub fn fp8_context_fmha(&self) -> bool {
        self.key.fp8_context_fmha
    }

    pub fn fuse_fp4_quant(&self) -> bool {
        self.key.fuse_fp4_quant
    }

    pub fn multi_block_mode(&self) -> bool {
        self.key.multi_block_mode
    }

    pub fn spec_decoding(&self) -> SpecDecodingFlags {
        self.key.spec_decoding
    }

    pub fn latent(&self) -> Option<&LatentAttentionParams> {
        self.key.latent.as_ref()
    }

    pub fn is_latent_attention_enabled(&self) -> bool {
        self.key.latent.is_some()
    }

    pub fn is_generation_latent(&self) -> bool {
        self.key.is_generation_latent
    }

    pub fn is_rotary_enabled(&self) -> bool {
        self.key.position_embedding_type.is_rotary()
    }

    pub fn is_multi_rope_enabled(&self) -> bool {
        self.key.position_embedding_type.is_multi_rotary()
    }

    /// Whether fused 4-bit output is available; `false` before initialization.
    pub fn supports_compressed_output(&self) -> bool {
        self.selection.is_some_and(|selection| selection.supports_compressed_output)
    }

    pub fn uses_flash_latent(&self) -> bool {
        self.selection.is_some_and(|selection| {
            selection.generation == GenerationKernel::FlashLatent
        })
    }
}
