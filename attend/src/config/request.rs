use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum RequestType {
    Context = 0,
    Generation = 1,
}

impl TryFrom<i32> for RequestType {
    type Error = ConfigError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(RequestType::Context),
            1 => Ok(RequestType::Generation),
            _ => Err(ConfigError::UnknownCode {
                kind: "request type",
                code: code as i64,
            }),
        }
    }
}

/// Restricts a dispatch to one phase even if the batch holds both kinds of
/// requests.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AttentionInputType {
    #[default]
    Mixed,
    ContextOnly,
    GenerationOnly,
}

impl AttentionInputType {
    pub fn allows_context(&self) -> bool {
        !matches!(self, AttentionInputType::GenerationOnly)
    }

    pub fn allows_generation(&self) -> bool {
        !matches!(self, AttentionInputType::ContextOnly)
    }
}

impl TryFrom<i64> for AttentionInputType {
    type Error = ConfigError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(AttentionInputType::Mixed),
            1 => Ok(AttentionInputType::ContextOnly),
            2 => Ok(AttentionInputType::GenerationOnly),
            _ => Err(ConfigError::UnknownCode {
                kind: "attention input type",
                code,
            }),
        }
    }
}
