mod common;

use attend::{
    BatchDispatcher, BufferId, CompressedOutputProbe, ConfigError, DataType, DeviceTensor,
    DispatchError, ShapeError, Workspace,
    backends::trace::{LaunchKernel, Trace},
    config::{AttentionInputType, SpecDecodingFlags},
    descriptor::{ContextKernel, GenerationKernel},
    runner::Phase,
};
use common::{Harness, latent_config, llama_config, mixed_shape};
use half::f16;

#[test]
fn test_mixed_batch_runs_context_then_generation() {
    let harness = Harness::new(90);
    let config = llama_config();
    let batch = harness.batch(&config, &mixed_shape(&[5, 7, 4], &[100, 200]));
    let mut workspace: Option<Workspace<Trace>> = None;

    let summary = harness.dispatcher.run(&config, &batch.inputs(), &mut workspace).unwrap();

    let classification = summary.classification;
    assert_eq!((classification.num_contexts, classification.num_generations), (3, 2));
    assert_eq!((classification.num_ctx_tokens, classification.num_gen_tokens), (16, 2));
    assert_eq!(classification.num_contexts + classification.num_generations, classification.num_seqs);
    assert_eq!(classification.num_ctx_tokens + classification.num_gen_tokens, classification.num_tokens);

    let launches = harness.kernels.launches();
    assert_eq!(launches.len(), 2);

    let context = &launches[0];
    assert_eq!(context.phase, Phase::Context);
    assert_eq!(context.kernel, LaunchKernel::Context(ContextKernel::FusedMultiHead));
    assert_eq!(context.batch_size, 3);
    assert_eq!((context.token_offset, context.num_tokens), (0, 16));
    assert_eq!(context.input_seq_length, 7);

    let generation = &launches[1];
    assert_eq!(generation.phase, Phase::Generation);
    assert_eq!(generation.kernel, LaunchKernel::Generation(GenerationKernel::FusedGroupedQuery));
    assert_eq!(generation.batch_size, 2);
    assert_eq!((generation.token_offset, generation.num_tokens), (16, 2));
    assert_eq!(generation.input_seq_length, 1);
    assert_eq!(generation.max_past_kv_length, 200);
    assert_eq!(generation.max_attention_window_size, 4096);
    assert_eq!(generation.max_blocks_per_sequence, 4);

    assert_eq!(workspace.as_ref().map(Workspace::size), Some(summary.workspace_size));
    assert_eq!(context.workspace_bytes, summary.workspace_size);
}

#[test]
fn test_descriptor_is_initialized_once() {
    let harness = Harness::new(90);
    let config = llama_config();
    let mut shape = mixed_shape(&[8], &[32]);
    shape.num_layers = 2;
    let batch = harness.batch(&config, &shape);
    let mut workspace = None;

    for _ in 0..3 {
        harness.dispatcher.run(&config, &batch.inputs(), &mut workspace).unwrap();
    }
    assert_eq!(harness.kernels.load_count(), 1);
    assert_eq!(harness.kernels.preparation_count(), 1);
    assert_eq!(harness.kernels.semaphore_reservations(), vec![32 * 8]);
    assert_eq!(harness.dispatcher.cache().descriptor_count(), 1);

    let next_layer = attend::config::AttentionConfig {
        layer_idx: 1,
        ..config
    };
    harness.dispatcher.run(&next_layer, &batch.inputs(), &mut workspace).unwrap();
    assert_eq!(harness.kernels.load_count(), 2);
    assert_eq!(harness.dispatcher.cache().descriptor_count(), 2);
}

#[test]
fn test_semaphores_cover_every_multiprocessor() {
    let harness = Harness::new(90);
    let config = attend::config::AttentionConfig {
        num_heads: 4,
        num_kv_heads: 4,
        max_num_requests: 2,
        ..llama_config()
    };
    let batch = harness.batch(&config, &mixed_shape(&[], &[12]));
    harness.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    assert_eq!(harness.kernels.semaphore_reservations(), vec![132]);
}

#[test]
fn test_non_uniform_generation_is_rejected_before_enqueue() {
    let harness = Harness::new(90);
    let config = llama_config();
    let mut shape = mixed_shape(&[], &[10, 10]);
    shape.num_tokens = Some(7);
    let batch = harness.batch(&config, &shape);
    let mut workspace: Option<Workspace<Trace>> = None;

    let result = harness.dispatcher.run(&config, &batch.inputs(), &mut workspace);
    assert!(matches!(
        result,
        Err(DispatchError::Shape(ShapeError::NonUniformGeneration {
            num_tokens: 7,
            num_seqs: 2,
        }))
    ));
    assert!(harness.kernels.launches().is_empty());
    assert!(workspace.is_none());
}

#[test]
fn test_context_after_generation_is_rejected() {
    let harness = Harness::new(90);
    let config = llama_config();
    let mut shape = mixed_shape(&[4], &[10]);
    shape.request_types.reverse();
    let batch = harness.batch(&config, &shape);

    let result = harness.dispatcher.run(&config, &batch.inputs(), &mut None);
    assert!(matches!(
        result,
        Err(DispatchError::Shape(ShapeError::RequestOrder {
            index: 1
        }))
    ));
    assert!(harness.kernels.launches().is_empty());
}

#[test]
fn test_input_type_filters_phases() {
    let harness = Harness::new(90);
    let mixed = mixed_shape(&[5, 7, 4], &[100, 200]);

    let context_only = attend::config::AttentionConfig {
        attention_input_type: Some(AttentionInputType::ContextOnly),
        ..llama_config()
    };
    let batch = harness.batch(&context_only, &mixed);
    let summary = harness.dispatcher.run(&context_only, &batch.inputs(), &mut None).unwrap();
    assert_eq!(summary.phases.len(), 1);
    let launches = harness.kernels.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].phase, Phase::Context);

    harness.kernels.clear_launches();
    let generation_only = attend::config::AttentionConfig {
        attention_input_type: Some(AttentionInputType::GenerationOnly),
        ..llama_config()
    };
    let batch = harness.batch(&generation_only, &mixed_shape(&[], &[40, 41, 42]));
    harness.dispatcher.run(&generation_only, &batch.inputs(), &mut None).unwrap();
    let launches = harness.kernels.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].phase, Phase::Generation);
    assert_eq!((launches[0].token_offset, launches[0].num_tokens), (0, 3));

    harness.kernels.clear_launches();
    let config = llama_config();
    let batch = harness.batch(&config, &mixed_shape(&[9, 3], &[]));
    harness.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    let launches = harness.kernels.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].phase, Phase::Context);
}

#[test]
fn test_beam_search_uses_cache_indirection_width() {
    let harness = Harness::new(90);
    let config = attend::config::AttentionConfig {
        beam_width: 2,
        attention_window_size: 1024,
        ..llama_config()
    };
    let batch = harness.batch(&config, &mixed_shape(&[], &[30, 30, 30, 30]));
    harness.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();

    let launches = harness.kernels.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].batch_size, 4);
    assert_eq!(launches[0].max_attention_window_size, 1024);

    let odd = harness.batch(&config, &mixed_shape(&[], &[30, 30, 30]));
    assert!(matches!(
        harness.dispatcher.run(&config, &odd.inputs(), &mut None),
        Err(DispatchError::Shape(ShapeError::BeamWidthMismatch {
            num_seqs: 3,
            beam_width: 2,
        }))
    ));
}

#[test]
fn test_speculative_generation_length() {
    let harness = Harness::new(90);
    let config = attend::config::AttentionConfig {
        spec_decoding: SpecDecodingFlags {
            is_enabled: true,
            use_spec_decoding: true,
        },
        ..llama_config()
    };
    let mut shape = mixed_shape(&[], &[50, 60]);
    shape.generation_tokens_per_seq = 3;
    let batch = harness.batch(&config, &shape);
    harness.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();

    let launches = harness.kernels.launches();
    assert_eq!(launches[0].input_seq_length, 3);
    assert_eq!(launches[0].max_generation_length, Some(4));

    let mut inputs = batch.inputs();
    inputs.spec_decoding.packed_mask = None;
    assert!(matches!(
        harness.dispatcher.run(&config, &inputs, &mut None),
        Err(DispatchError::Configuration(ConfigError::MissingInput {
            input: "speculative packed mask",
            ..
        }))
    ));
}

#[test]
fn test_missing_feature_inputs_are_rejected() {
    let harness = Harness::new(90);
    let config = llama_config();
    let batch = harness.batch(&config, &mixed_shape(&[6], &[20]));

    let mut inputs = batch.inputs();
    inputs.rotary.cos_sin = None;
    assert!(matches!(
        harness.dispatcher.run(&config, &inputs, &mut None),
        Err(DispatchError::Configuration(ConfigError::MissingInput {
            input: "rotary cos/sin table",
            ..
        }))
    ));

    let mut inputs = batch.inputs();
    inputs.k = Some(inputs.qkv.clone());
    assert!(matches!(
        harness.dispatcher.run(&config, &inputs, &mut None),
        Err(DispatchError::Configuration(ConfigError::UnexpectedSeparateInput("key")))
    ));
    assert!(harness.kernels.launches().is_empty());
}

#[test]
fn test_compressed_output_types() {
    let config = attend::config::AttentionConfig {
        output_data_type: Some(DataType::F8E4M3),
        ..llama_config()
    };

    let ampere = Harness::new(80);
    let batch = ampere.batch(&config, &mixed_shape(&[6], &[]));
    assert!(matches!(
        ampere.dispatcher.run(&config, &batch.inputs(), &mut None),
        Err(DispatchError::Configuration(ConfigError::UnsupportedHardware {
            required: 89,
            ..
        }))
    ));

    let hopper = Harness::new(90);
    let batch = hopper.batch(&config, &mixed_shape(&[6], &[]));
    hopper.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    assert_eq!(hopper.kernels.launches()[0].output_data_type, DataType::F8E4M3);

    let mismatched = hopper.batch(&llama_config(), &mixed_shape(&[6], &[]));
    assert!(matches!(
        hopper.dispatcher.run(&config, &mismatched.inputs(), &mut None),
        Err(DispatchError::Configuration(ConfigError::OutputTypeMismatch {
            expected: DataType::F8E4M3,
            actual: DataType::F16,
        }))
    ));

    let fp4 = attend::config::AttentionConfig {
        output_data_type: Some(DataType::FP4E2M1),
        ..llama_config()
    };
    let batch = hopper.batch(&fp4, &mixed_shape(&[6], &[]));
    assert!(matches!(
        hopper.dispatcher.run(&fp4, &batch.inputs(), &mut None),
        Err(DispatchError::Configuration(ConfigError::UnsupportedHardware {
            required: 100,
            ..
        }))
    ));

    let blackwell = Harness::new(100);
    let batch = blackwell.batch(&fp4, &mixed_shape(&[6], &[8]));
    blackwell.dispatcher.run(&fp4, &batch.inputs(), &mut None).unwrap();
    assert!(
        blackwell
            .kernels
            .launches()
            .iter()
            .all(|launch| launch.output_data_type == DataType::FP4E2M1)
    );
}

#[test]
fn test_latent_generation() {
    let config = latent_config();

    let hopper = Harness::new(90);
    let batch = hopper.batch(&config, &mixed_shape(&[], &[40, 50]));
    hopper.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    let launches = hopper.kernels.launches();
    assert_eq!(launches.len(), 1);
    assert!(launches[0].latent);
    assert_eq!(launches[0].kernel, LaunchKernel::Generation(GenerationKernel::FlashLatent));

    let blackwell = Harness::new(100);
    let batch = blackwell.batch(&config, &mixed_shape(&[], &[40, 50]));
    blackwell.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    assert_eq!(
        blackwell.kernels.launches()[0].kernel,
        LaunchKernel::Generation(GenerationKernel::LatentFmha)
    );

    let mut inputs = batch.inputs();
    inputs.latent.q_pe = None;
    assert!(matches!(
        blackwell.dispatcher.run(&config, &inputs, &mut None),
        Err(DispatchError::Configuration(ConfigError::MissingInput {
            input: "decoupled rotary query",
            ..
        }))
    ));

    let fp4 = attend::config::AttentionConfig {
        output_data_type: Some(DataType::FP4E2M1),
        ..config
    };
    assert!(matches!(
        blackwell.dispatcher.run(&fp4, &batch.inputs(), &mut None),
        Err(DispatchError::Configuration(ConfigError::CompressedOutputWithLatent))
    ));
}

#[test]
fn test_latent_cache_requirement_per_phase() {
    let harness = Harness::new(90);
    let config = attend::config::AttentionConfig {
        use_paged_context_fmha: true,
        ..latent_config()
    };

    let context_batch = harness.batch(&config, &mixed_shape(&[12, 20], &[]));
    let mut inputs = context_batch.inputs();
    inputs.latent.latent_cache = None;
    harness.dispatcher.run(&config, &inputs, &mut None).unwrap();
    assert!(harness.kernels.launches()[0].latent);

    let generation_batch = harness.batch(&config, &mixed_shape(&[], &[30]));
    let mut inputs = generation_batch.inputs();
    inputs.latent.latent_cache = None;
    assert!(matches!(
        harness.dispatcher.run(&config, &inputs, &mut None),
        Err(DispatchError::Configuration(ConfigError::MissingInput {
            input: "latent cache",
            ..
        }))
    ));
}

#[test]
fn test_non_finite_check_covers_generation_only() {
    let harness = Harness::checking_non_finite(90);
    let config = llama_config();
    let batch = harness.batch(&config, &mixed_shape(&[], &[10, 10]));
    harness.context.write(batch.output(), &[f16::NAN]).unwrap();

    harness.dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    assert_eq!(harness.kernels.non_finite_check_count(), 1);

    let context_batch = harness.batch(&config, &mixed_shape(&[4], &[]));
    harness.dispatcher.run(&config, &context_batch.inputs(), &mut None).unwrap();
    assert_eq!(harness.kernels.non_finite_check_count(), 1);

    let mixed_batch = harness.batch(&config, &mixed_shape(&[4], &[12]));
    harness.dispatcher.run(&config, &mixed_batch.inputs(), &mut None).unwrap();
    assert_eq!(harness.kernels.non_finite_check_count(), 2);

    let quiet = Harness::new(90);
    let dispatcher = BatchDispatcher::<Trace>::new(
        quiet.context.clone(),
        quiet.kernels.clone(),
        quiet.dispatcher.cache().clone(),
    )
    .with_non_finite_check(false);
    let batch = quiet.batch(&config, &mixed_shape(&[], &[10]));
    dispatcher.run(&config, &batch.inputs(), &mut None).unwrap();
    assert_eq!(quiet.kernels.non_finite_check_count(), 0);
}

#[test]
fn test_failed_non_finite_check_keeps_dispatch_result() {
    let harness = Harness::checking_non_finite(90);
    let config = llama_config();
    let batch = harness.batch(&config, &mixed_shape(&[], &[10]));
    let mut inputs = batch.inputs();
    // The backend cannot read back a buffer it never allocated.
    let shape = inputs.output.shape().to_vec();
    inputs.output = DeviceTensor::new(BufferId(usize::MAX), inputs.output.data_type(), &shape);

    let summary = harness.dispatcher.run(&config, &inputs, &mut None).unwrap();
    assert_eq!(summary.classification.num_generations, 1);
    assert_eq!(harness.kernels.non_finite_check_count(), 1);
    assert_eq!(harness.kernels.launches().len(), 1);
}

#[test]
fn test_compressed_output_probe() {
    let config = llama_config();
    let probe = CompressedOutputProbe::from(&config);

    assert!(!Harness::new(90).dispatcher.supports_compressed_output(&probe).unwrap());
    assert!(!Harness::new(120).dispatcher.supports_compressed_output(&probe).unwrap());

    let blackwell = Harness::new(100);
    assert!(blackwell.dispatcher.supports_compressed_output(&probe).unwrap());
    assert!(blackwell.dispatcher.supports_compressed_output(&probe).unwrap());

    let latent = CompressedOutputProbe {
        is_latent_attention: true,
        ..probe
    };
    assert!(!blackwell.dispatcher.supports_compressed_output(&latent).unwrap());

    let odd_head = CompressedOutputProbe {
        head_size: 96,
        ..probe
    };
    assert!(!blackwell.dispatcher.supports_compressed_output(&odd_head).unwrap());
}
