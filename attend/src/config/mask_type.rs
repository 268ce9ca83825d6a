use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MaskType {
    Padding,
    #[default]
    Causal,
    SlidingWindowCausal,
    Bidirectional,
    BidirectionalGlm,
    BlockSparse,
    Custom,
}

impl MaskType {
    pub fn is_causal(&self) -> bool {
        matches!(self, MaskType::Causal | MaskType::SlidingWindowCausal)
    }
}

impl TryFrom<i64> for MaskType {
    type Error = ConfigError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MaskType::Padding),
            1 => Ok(MaskType::Causal),
            2 => Ok(MaskType::SlidingWindowCausal),
            3 => Ok(MaskType::Bidirectional),
            4 => Ok(MaskType::BidirectionalGlm),
            5 => Ok(MaskType::BlockSparse),
            6 => Ok(MaskType::Custom),
            _ => Err(ConfigError::UnknownCode {
                kind: "mask type",
                code,
            }),
        }
    }
}
