mod classification;
mod inputs;
pub(crate) mod validation;
mod workspace;

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
    sync::Arc,
};

pub use classification::BatchClassification;
pub use inputs::{
    AttentionInputs, KvQuantScales, LatentInputs, MultiRopeInputs, RotaryInputs,
    SpecDecodingInputs,
};
use serde::Serialize;
pub use workspace::{WORKSPACE_MEMORY_CHECK_THRESHOLD, Workspace};
use workspace::{acquire, check_available_memory};

use crate::{
    backends::common::{AttentionKernels, Backend, Context},
    config::{AttentionConfig, RunnerConfig},
    descriptor::{
        CompressedOutputProbe, DescriptorKey, OperationDescriptor,
        OutputQuantization, supports_fp4_output,
    },
    descriptor_cache::DescriptorCache,
    error::{ConfigError, DispatchError},
    runner::{PhaseSpan, PreparedOperation, RunnerStrategy, select_runner},
};

/// What one dispatch planned and enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub classification: BatchClassification,
    pub workspace_size: usize,
    pub phases: Vec<PhaseSpan>,
}

/// Splits attention batches into phases and submits them to a backend.
///
/// Initialized descriptors live in the shared [`DescriptorCache`]. Kernel
/// loading and prepared kernel state belong to the backend this dispatcher
/// drives and are kept here. The scratch workspace is owned by the caller.
pub struct BatchDispatcher<B: Backend> {
    context: Rc<B::Context>,
    kernels: Rc<B::Kernels>,
    cache: Arc<DescriptorCache>,
    loaded: RefCell<HashSet<DescriptorKey>>,
    operations: RefCell<HashMap<(DescriptorKey, RunnerConfig), Rc<PreparedOperation>>>,
    check_non_finite: bool,
}

impl<B: Backend> BatchDispatcher<B> {
    pub fn new(
        context: Rc<B::Context>,
        kernels: Rc<B::Kernels>,
        cache: Arc<DescriptorCache>,
    ) -> Self {
        Self {
            context,
            kernels,
            cache,
            loaded: RefCell::new(HashSet::new()),
            operations: RefCell::new(HashMap::new()),
            check_non_finite: cfg!(debug_assertions),
        }
    }

    /// Scans generation outputs for NaN or Inf after each launch. On by
    /// default in debug builds.
    pub fn with_non_finite_check(
        mut self,
        enabled: bool,
    ) -> Self {
        self.check_non_finite = enabled;
        self
    }

    pub fn context(&self) -> &Rc<B::Context> {
        &self.context
    }

    pub fn kernels(&self) -> &Rc<B::Kernels> {
        &self.kernels
    }

    pub fn cache(&self) -> &Arc<DescriptorCache> {
        &self.cache
    }

    /// Number of prepared (descriptor, runner configuration) pairs.
    pub fn operation_count(&self) -> usize {
        self.operations.borrow().len()
    }

    /// Runs one attention call: validates, resolves the cached descriptor,
    /// sizes the workspace and enqueues the context then generation phases.
    ///
    /// All validation happens before the first enqueue. A failure leaves the
    /// output untouched; the workspace may already have grown.
    pub fn run(
        &self,
        config: &AttentionConfig,
        inputs: &AttentionInputs,
        workspace: &mut Option<Workspace<B>>,
    ) -> Result<DispatchSummary, DispatchError<B>> {
        log::trace!("Attention layer {} start", config.layer_idx);

        config.validate()?;
        if inputs.k.is_some() {
            return Err(ConfigError::UnexpectedSeparateInput("key").into());
        }
        if inputs.v.is_some() {
            return Err(ConfigError::UnexpectedSeparateInput("value").into());
        }

        let input_data_type = inputs.qkv.data_type();
        let runner = select_runner::<B>(input_data_type, config.output_data_type)?;
        let output = OutputQuantization::of(runner.output_data_type());

        let use_kv_cache = inputs.paged_cache.is_some();
        let latent_num_layers = inputs.paged_cache.as_ref().map(|paged_cache| paged_cache.num_layers());
        let template =
            OperationDescriptor::new(config, input_data_type, output, use_kv_cache, latent_num_layers)?;
        let device = self.context.device_properties();
        let descriptor = self.cache.get_or_create(template.key(), &device, || {
            let mut descriptor = template.clone();
            descriptor.initialize(&device)?;
            Ok::<_, DispatchError<B>>(descriptor)
        })?;

        let runner_config = config.runner_config();
        let operation = self.prepared_operation(runner.as_ref(), &descriptor, runner_config)?;

        let classification = BatchClassification::classify(
            inputs.host_request_types,
            inputs.host_context_lengths,
            inputs.num_tokens(),
            config.input_type(),
        )?;
        let phases = classification.phases(config.predicted_tokens_per_seq);
        validation::validate_inputs::<B>(
            config,
            &descriptor,
            runner.output_data_type(),
            inputs,
            &classification,
            &phases,
        )?;

        let max_attention_window_size = validation::max_attention_window(&runner_config, inputs)?;
        let workspace_size = runner.workspace_size(
            &descriptor,
            &runner_config,
            classification.num_tokens,
            max_attention_window_size,
            classification.num_gen_tokens,
        );
        log::trace!("Attention layer {} requires {} workspace bytes", config.layer_idx, workspace_size);
        check_available_memory::<B>(&*self.context, workspace_size)?;
        let scratch = acquire(&*self.context, workspace, workspace_size)?.tensor();

        for span in &phases {
            runner.run(&operation, &*self.kernels, span, inputs, &scratch)?;
            if self.check_non_finite && !span.is_context() {
                self.scan_generation_output(config.layer_idx, inputs, span);
            }
        }

        log::trace!("Attention layer {} stop", config.layer_idx);
        Ok(DispatchSummary {
            classification,
            workspace_size,
            phases,
        })
    }

    /// Whether attention with this geometry can write 4-bit compressed
    /// output on the current device. Answers are cached per geometry.
    pub fn supports_compressed_output(
        &self,
        probe: &CompressedOutputProbe,
    ) -> Result<bool, DispatchError<B>> {
        if probe.is_latent_attention {
            return Ok(false);
        }
        let device = self.context.device_properties();
        if !supports_fp4_output(device.compute_capability) {
            return Ok(false);
        }
        self.cache.supports_compressed_output(&probe.key(), &device, || {
            let mut descriptor = probe.descriptor();
            match descriptor.initialize(&device) {
                Ok(()) => Ok(descriptor.supports_compressed_output()),
                Err(ConfigError::UnsupportedHardware {
                    ..
                }) => Ok(false),
                Err(error) => Err(DispatchError::from(error)),
            }
        })
    }

    /// Prepared state of `descriptor` under `runner_config` on this
    /// dispatcher's backend. Kernels are loaded once per descriptor.
    fn prepared_operation(
        &self,
        runner: &dyn RunnerStrategy<B>,
        descriptor: &Arc<OperationDescriptor>,
        runner_config: RunnerConfig,
    ) -> Result<Rc<PreparedOperation>, DispatchError<B>> {
        let key = (*descriptor.key(), runner_config);
        if let Some(operation) = self.operations.borrow().get(&key) {
            return Ok(operation.clone());
        }

        let loaded = self.loaded.borrow().contains(descriptor.key());
        if !loaded {
            if let Some(selection) = descriptor.selection() {
                self.kernels.load(selection).map_err(DispatchError::Backend)?;
            }
            self.loaded.borrow_mut().insert(*descriptor.key());
        }

        log::trace!("Preparing layer {} for {:?}", descriptor.layer_idx(), runner_config);
        let operation = Rc::new(runner.prepare(descriptor, runner_config, &*self.context, &*self.kernels)?);
        self.operations.borrow_mut().insert(key, operation.clone());
        Ok(operation)
    }

    /// Warns about NaN or Inf in the rows a generation phase wrote. A failed
    /// scan is logged and never fails the dispatch.
    fn scan_generation_output(
        &self,
        layer_idx: usize,
        inputs: &AttentionInputs,
        span: &PhaseSpan,
    ) {
        let scanned = inputs
            .output
            .narrow_from(span.token_offset)
            .map_err(DispatchError::<B>::from)
            .and_then(|output| {
                self.kernels.has_non_finite(&output, span.num_tokens).map_err(DispatchError::Backend)
            });
        match scanned {
            Ok(true) => {
                log::warn!("Found invalid number (NaN or Inf) in gen attention at layer {}", layer_idx)
            },
            Ok(false) => {},
            Err(error) => log::warn!("Skipped invalid number check at layer {}: {}", layer_idx, error),
        }
    }
}
