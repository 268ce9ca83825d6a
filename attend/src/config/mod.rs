mod attention_config;
mod latent;
mod mask_type;
mod quant_mode;
mod request;
mod rotary;
mod runner_config;
mod speculative;

pub use attention_config::AttentionConfig;
pub use latent::{LatentAttentionDims, LatentAttentionParams};
pub use mask_type::MaskType;
pub use quant_mode::QuantMode;
pub use request::{AttentionInputType, RequestType};
pub use rotary::{PositionEmbeddingType, RotaryConfig, RotaryScalingType};
pub use runner_config::RunnerConfig;
pub use speculative::SpecDecodingFlags;
