pub mod backends;

pub mod config;

pub mod data_type;
pub use data_type::{ArrayElement, AttentionElement, DataType, F8E4M3, FP4E2M1x2};

pub mod error;
pub use error::{ConfigError, DispatchError, ShapeError};

pub mod tensor;
pub use tensor::{BufferId, DeviceTensor};

pub mod descriptor;
pub mod descriptor_cache;
pub use descriptor::{CompressedOutputProbe, OperationDescriptor};
pub use descriptor_cache::DescriptorCache;

pub mod dispatcher;
pub mod paged_cache;
pub mod runner;
pub use dispatcher::{AttentionInputs, BatchDispatcher, DispatchSummary, Workspace};
