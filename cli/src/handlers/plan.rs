use std::sync::Arc;

use attend::{
    BatchDispatcher, DescriptorCache, DispatchSummary, Workspace,
    backends::{
        common::DeviceProperties,
        trace::{BatchShape, KernelLaunch, Trace, TraceBatch, TraceContext},
    },
    config::AttentionConfig,
};
use console::Style;
use serde::Serialize;

use super::{HandlerResult, load_json};

#[derive(Serialize)]
struct LayerPlan {
    layer_idx: usize,
    summary: DispatchSummary,
    launches: Vec<KernelLaunch>,
}

#[derive(Serialize)]
struct Plan {
    device: DeviceProperties,
    layers: Vec<LayerPlan>,
    descriptors: usize,
    prepared_operations: usize,
    workspace_bytes: usize,
}

fn format_layer(layer: &LayerPlan) -> String {
    let style_header = Style::new().bold();
    let style_dim = Style::new().dim();
    let classification = &layer.summary.classification;

    let mut lines = vec![format!(
        "{} {}",
        style_header.apply_to(format!("layer {}", layer.layer_idx)),
        style_dim.apply_to(format!(
            "{} context / {} generation requests, {} + {} tokens, workspace {} bytes",
            classification.num_contexts,
            classification.num_generations,
            classification.num_ctx_tokens,
            classification.num_gen_tokens,
            layer.summary.workspace_size,
        )),
    )];
    for launch in &layer.launches {
        lines.push(format!(
            "  {:?} {:?}: batch {}, tokens {}..{}, input length {}, past KV {}",
            launch.phase,
            launch.kernel,
            launch.batch_size,
            launch.token_offset,
            launch.token_offset + launch.num_tokens,
            launch.input_seq_length,
            launch.max_past_kv_length,
        ));
    }
    lines.join("\n")
}

pub fn handle_plan(
    config_path: String,
    batch_path: String,
    workspace_bytes: Option<usize>,
    layers: usize,
    json: bool,
    device: DeviceProperties,
) -> HandlerResult {
    let config: AttentionConfig = load_json(&config_path)?;
    let mut shape: BatchShape = load_json(&batch_path)?;
    shape.num_layers = shape.num_layers.max(config.layer_idx + layers);

    let context = TraceContext::new(device);
    let kernels = context.kernels();
    let dispatcher =
        BatchDispatcher::<Trace>::new(context.clone(), kernels.clone(), Arc::new(DescriptorCache::new()));
    let batch = TraceBatch::new(&context, &config, &shape)?;

    let mut workspace = match workspace_bytes {
        Some(size) => Some(Workspace::<Trace>::allocate(&context, size)?),
        None => None,
    };

    let mut plans = Vec::with_capacity(layers);
    for layer_idx in config.layer_idx..config.layer_idx + layers {
        let layer_config = AttentionConfig {
            layer_idx,
            ..config.clone()
        };
        kernels.clear_launches();
        let summary = dispatcher.run(&layer_config, &batch.inputs(), &mut workspace)?;
        plans.push(LayerPlan {
            layer_idx,
            summary,
            launches: kernels.launches(),
        });
    }

    let plan = Plan {
        device,
        layers: plans,
        descriptors: dispatcher.cache().descriptor_count(),
        prepared_operations: dispatcher.operation_count(),
        workspace_bytes: workspace.as_ref().map_or(0, Workspace::size),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    for layer in &plan.layers {
        println!("{}", format_layer(layer));
    }
    let style_stats = Style::new().bold();
    println!(
        "\n{}",
        style_stats.apply_to(format!(
            "{} descriptors, {} prepared operations, workspace {} bytes",
            plan.descriptors, plan.prepared_operations, plan.workspace_bytes,
        ))
    );
    Ok(())
}
