use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(default)]
pub struct SpecDecodingFlags {
    /// The engine was built with speculative decoding support.
    pub is_enabled: bool,
    /// The current step actually carries speculated tokens.
    pub use_spec_decoding: bool,
}

impl SpecDecodingFlags {
    /// Parses the raw `[is_enabled, use_spec_decoding]` flag array.
    pub fn from_slice(flags: &[bool]) -> Result<Self, ConfigError> {
        match flags {
            [is_enabled, use_spec_decoding] => Ok(Self {
                is_enabled: *is_enabled,
                use_spec_decoding: *use_spec_decoding,
            }),
            _ => Err(ConfigError::SpecDecodingFlagCount(flags.len())),
        }
    }

    /// Accepts either the named fields or the raw two-element flag array.
    pub fn deserialize_flags<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flags {
            Raw(Vec<bool>),
            Named(SpecDecodingFlags),
        }

        match Flags::deserialize(deserializer)? {
            Flags::Raw(flags) => Self::from_slice(&flags).map_err(serde::de::Error::custom),
            Flags::Named(flags) => Ok(flags),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_enabled && self.use_spec_decoding
    }
}
