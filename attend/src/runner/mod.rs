mod phase;
mod typed;

use std::sync::Arc;

use half::{bf16, f16};
pub use phase::{Phase, PhaseSpan};
pub use typed::Runner;

use crate::{
    DataType, F8E4M3, FP4E2M1x2,
    backends::common::{Backend, kernel::SemaphoreArray},
    config::RunnerConfig,
    descriptor::OperationDescriptor,
    dispatcher::AttentionInputs,
    error::{ConfigError, DispatchError},
    tensor::DeviceTensor,
};

/// Kernel state prepared once per (descriptor, runner configuration) on one
/// backend.
#[derive(Debug)]
pub struct PreparedOperation {
    descriptor: Arc<OperationDescriptor>,
    runner_config: RunnerConfig,
    semaphores: SemaphoreArray,
}

impl PreparedOperation {
    pub fn new(
        descriptor: Arc<OperationDescriptor>,
        runner_config: RunnerConfig,
        semaphores: SemaphoreArray,
    ) -> Self {
        Self {
            descriptor,
            runner_config,
            semaphores,
        }
    }

    pub fn descriptor(&self) -> &Arc<OperationDescriptor> {
        &self.descriptor
    }

    pub fn runner_config(&self) -> &RunnerConfig {
        &self.runner_config
    }

    pub fn semaphores(&self) -> SemaphoreArray {
        self.semaphores
    }
}

/// Execution strategy for one (input element, output element) pair.
pub trait RunnerStrategy<B: Backend> {
    fn input_data_type(&self) -> DataType;

    fn output_data_type(&self) -> DataType;

    /// Prepares generation kernels and reserves the multi-block semaphore
    /// pool. Runs once per descriptor and runner configuration on each
    /// dispatcher.
    fn prepare(
        &self,
        descriptor: &Arc<OperationDescriptor>,
        runner_config: RunnerConfig,
        context: &B::Context,
        kernels: &B::Kernels,
    ) -> Result<PreparedOperation, DispatchError<B>>;

    /// Larger of the context and generation scratch requirements.
    fn workspace_size(
        &self,
        descriptor: &OperationDescriptor,
        runner_config: &RunnerConfig,
        num_tokens: usize,
        max_attention_window_size: usize,
        num_gen_tokens: usize,
    ) -> usize;

    /// Enqueues one phase of the batch.
    fn run(
        &self,
        operation: &PreparedOperation,
        kernels: &B::Kernels,
        span: &PhaseSpan,
        inputs: &AttentionInputs,
        workspace: &DeviceTensor,
    ) -> Result<(), DispatchError<B>>;
}

/// Picks the strategy for `input` elements written out as `output`
/// (`None` keeps the input type).
pub fn select_runner<B: Backend>(
    input: DataType,
    output: Option<DataType>,
) -> Result<Box<dyn RunnerStrategy<B>>, ConfigError> {
    let output = output.unwrap_or(input);
    let runner: Box<dyn RunnerStrategy<B>> = match (input, output) {
        (DataType::F32, DataType::F32) => Box::new(Runner::<f32, f32>::new()),
        (DataType::F16, DataType::F16) => Box::new(Runner::<f16, f16>::new()),
        (DataType::F16, DataType::F8E4M3) => Box::new(Runner::<f16, F8E4M3>::new()),
        (DataType::F16, DataType::FP4E2M1) => Box::new(Runner::<f16, FP4E2M1x2>::new()),
        (DataType::BF16, DataType::BF16) => Box::new(Runner::<bf16, bf16>::new()),
        (DataType::BF16, DataType::F8E4M3) => Box::new(Runner::<bf16, F8E4M3>::new()),
        (DataType::BF16, DataType::FP4E2M1) => Box::new(Runner::<bf16, FP4E2M1x2>::new()),
        _ => {
            return Err(ConfigError::UnsupportedDataTypes {
                input,
                output: Some(output),
            });
        },
    };
    Ok(runner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::trace::Trace;

    #[test]
    fn test_supported_pairs() {
        let pairs = [
            (DataType::F32, None, DataType::F32),
            (DataType::F16, None, DataType::F16),
            (DataType::F16, Some(DataType::F8E4M3), DataType::F8E4M3),
            (DataType::F16, Some(DataType::FP4E2M1), DataType::FP4E2M1),
            (DataType::BF16, Some(DataType::BF16), DataType::BF16),
            (DataType::BF16, Some(DataType::F8E4M3), DataType::F8E4M3),
            (DataType::BF16, Some(DataType::FP4E2M1), DataType::FP4E2M1),
        ];
        for (input, output, expected) in pairs {
            let runner = select_runner::<Trace>(input, output).unwrap();
            assert_eq!(runner.input_data_type(), input);
            assert_eq!(runner.output_data_type(), expected);
        }
    }

    #[test]
    fn test_unsupported_pairs() {
        for (input, output) in [
            (DataType::F32, Some(DataType::F8E4M3)),
            (DataType::F16, Some(DataType::BF16)),
            (DataType::I8, None),
            (DataType::F8E4M3, None),
        ] {
            assert!(matches!(
                select_runner::<Trace>(input, output),
                Err(ConfigError::UnsupportedDataTypes { .. })
            ));
        }
    }
}
