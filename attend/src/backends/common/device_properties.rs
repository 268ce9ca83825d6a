use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Compute capability as `major * 10 + minor`, e.g. `90`.
    pub compute_capability: u32,
    pub multiprocessor_count: usize,
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self {
            compute_capability: 90,
            multiprocessor_count: 132,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub free: usize,
    pub total: usize,
}
