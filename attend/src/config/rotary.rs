use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PositionEmbeddingType {
    #[default]
    LearnedAbsolute,
    RopeGptj,
    RopeGptNeox,
    LongRope,
    Alibi,
    AlibiWithScale,
    Relative,
    Chatglm,
    Yarn,
    MultiRope,
}

impl PositionEmbeddingType {
    pub fn is_rotary(&self) -> bool {
        matches!(
            self,
            PositionEmbeddingType::RopeGptj
                | PositionEmbeddingType::RopeGptNeox
                | PositionEmbeddingType::LongRope
                | PositionEmbeddingType::Yarn
                | PositionEmbeddingType::MultiRope
        )
    }

    pub fn is_multi_rotary(&self) -> bool {
        matches!(self, PositionEmbeddingType::MultiRope)
    }
}

impl TryFrom<i64> for PositionEmbeddingType {
    type Error = ConfigError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PositionEmbeddingType::LearnedAbsolute),
            1 => Ok(PositionEmbeddingType::RopeGptj),
            2 => Ok(PositionEmbeddingType::RopeGptNeox),
            3 => Ok(PositionEmbeddingType::LongRope),
            4 => Ok(PositionEmbeddingType::Alibi),
            5 => Ok(PositionEmbeddingType::AlibiWithScale),
            6 => Ok(PositionEmbeddingType::Relative),
            7 => Ok(PositionEmbeddingType::Chatglm),
            8 => Ok(PositionEmbeddingType::Yarn),
            9 => Ok(PositionEmbeddingType::MultiRope),
            _ => Err(ConfigError::UnknownCode {
                kind: "position embedding type",
                code,
            }),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RotaryScalingType {
    #[default]
    None,
    Linear,
    Dynamic,
    Long,
    Llama3,
}

impl TryFrom<i64> for RotaryScalingType {
    type Error = ConfigError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(RotaryScalingType::None),
            1 => Ok(RotaryScalingType::Linear),
            2 => Ok(RotaryScalingType::Dynamic),
            3 => Ok(RotaryScalingType::Long),
            4 => Ok(RotaryScalingType::Llama3),
            _ => Err(ConfigError::UnknownCode {
                kind: "rotary scaling type",
                code,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotaryConfig {
    pub dim: usize,
    pub base: f64,
    pub scale_type: RotaryScalingType,
    /// `[scale, short_m_scale, long_m_scale]`
    pub scales: [f64; 3],
    /// `[max_positions, original_max_positions]`
    pub max_position_info: [usize; 2],
}

impl Default for RotaryConfig {
    fn default() -> Self {
        Self {
            dim: 0,
            base: 10000.0,
            scale_type: RotaryScalingType::None,
            scales: [1.0, 1.0, 1.0],
            max_position_info: [1024, 1024],
        }
    }
}

impl RotaryConfig {
    pub fn scale(&self) -> f64 {
        self.scales[0]
    }

    pub fn short_m_scale(&self) -> f64 {
        self.scales[1]
    }

    pub fn long_m_scale(&self) -> f64 {
        self.scales[2]
    }

    pub fn max_positions(&self) -> usize {
        self.max_position_info[0]
    }

    pub fn original_max_positions(&self) -> usize {
        self.max_position_info[1]
    }
}
