use thiserror::Error;

use crate::{DataType, backends::common::Backend};

/// Invalid or unsupported combination of configuration values or inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Unknown {kind} code: {code}")]
    UnknownCode {
        kind: &'static str,
        code: i64,
    },
    #[error("Only fused QKV is supported")]
    UnfusedQkv,
    #[error("KV cache update cannot be disabled")]
    CacheUpdateDisabled,
    #[error("Separate {0} tensor must be absent when using fused QKV")]
    UnexpectedSeparateInput(&'static str),
    #[error(
        "Empty head geometry: num_heads={num_heads}, num_kv_heads={num_kv_heads}, head_size={head_size}"
    )]
    EmptyHeadGeometry {
        num_heads: usize,
        num_kv_heads: usize,
        head_size: usize,
    },
    #[error("num_heads={num_heads} is not a multiple of num_kv_heads={num_kv_heads}")]
    HeadCountNotDivisible {
        num_heads: usize,
        num_kv_heads: usize,
    },
    #[error("Beam width must be at least 1")]
    ZeroBeamWidth,
    #[error("Rotary dim {rotary_dim} exceeds head size {head_size}")]
    RotaryDimTooLarge {
        rotary_dim: usize,
        head_size: usize,
    },
    #[error("Unsupported data types: input {input:?}, output {output:?}")]
    UnsupportedDataTypes {
        input: DataType,
        output: Option<DataType>,
    },
    #[error("Output tensor holds {actual:?}, runner writes {expected:?}")]
    OutputTypeMismatch {
        expected: DataType,
        actual: DataType,
    },
    #[error("Latent attention does not support 4-bit compressed output")]
    CompressedOutputWithLatent,
    #[error(
        "Head size {head_size} matches neither latent context head size {context} nor compressed head size {compressed}"
    )]
    LatentHeadSizeMismatch {
        head_size: usize,
        context: usize,
        compressed: usize,
    },
    #[error("Paged KV cache requires tokens_per_block")]
    MissingTokensPerBlock,
    #[error("Missing {input}, required by {feature}")]
    MissingInput {
        input: &'static str,
        feature: &'static str,
    },
    #[error("Expected 2 speculative decoding flags, got {0}")]
    SpecDecodingFlagCount(usize),
    #[error("{feature} requires compute capability {required}, device has {actual}")]
    UnsupportedHardware {
        feature: &'static str,
        required: u32,
        actual: u32,
    },
    #[error("Descriptor cache lock poisoned")]
    CachePoisoned,
}

/// Violated shape or ordering invariant of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("Context request at index {index} follows a generation request")]
    RequestOrder {
        index: usize,
    },
    #[error(
        "seq_len should be same for all generation requests, num_tokens={num_tokens}, num_seqs={num_seqs}"
    )]
    NonUniformGeneration {
        num_tokens: usize,
        num_seqs: usize,
    },
    #[error("Generation batch of {num_seqs} sequences is not a multiple of beam width {beam_width}")]
    BeamWidthMismatch {
        num_seqs: usize,
        beam_width: usize,
    },
    #[error("Context tokens {num_ctx_tokens} exceed total tokens {num_tokens}")]
    ContextTokensExceedTotal {
        num_ctx_tokens: usize,
        num_tokens: usize,
    },
    #[error("Slice of {len} starting at {start} out of range for length {total}")]
    SliceOutOfRange {
        start: usize,
        len: usize,
        total: usize,
    },
    #[error("Expected rank of at least {expected}, got {actual}")]
    RankMismatch {
        expected: usize,
        actual: usize,
    },
    #[error("Length of {what} is {actual}, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid layout of {tensor}: {reason}")]
    InvalidLayout {
        tensor: &'static str,
        reason: &'static str,
    },
    #[error("Layer {layer_idx} is not mapped to a cache pool ({num_layers} layers mapped)")]
    LayerNotMapped {
        layer_idx: usize,
        num_layers: usize,
    },
    #[error("Pool index {pool_index} out of range ({num_pools} pools)")]
    PoolOutOfRange {
        pool_index: usize,
        num_pools: usize,
    },
    #[error("Negative {what}: {value}")]
    NegativeValue {
        what: &'static str,
        value: i64,
    },
}

#[derive(Debug, Error)]
pub enum DispatchError<B: Backend> {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Shape invariant violated: {0}")]
    Shape(#[from] ShapeError),
    #[error(
        "Attention workspace size {required} bytes exceeds available device memory {available} bytes"
    )]
    ResourceExhausted {
        required: usize,
        available: usize,
    },
    #[error("Backend error: {0}")]
    Backend(#[source] B::Error),
}
