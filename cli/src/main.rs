mod handlers;

use attend::backends::common::DeviceProperties;
use clap::{Args, Parser, Subcommand};
use console::Style;
use handlers::{handle_plan, handle_probe};
use log::LevelFilter;
use simple_logger::SimpleLogger;

#[derive(Parser)]
#[command(name = "attend_cli")]
#[command(version, about = "Plan attention dispatches on the trace backend", long_about = None)]
struct Cli {
    /// Log level, may be "off", "trace", "debug", "info", "warn" or "error".
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a batch and print the kernel launches it would enqueue
    Plan {
        /// Attention configuration JSON
        config_path: String,
        /// Batch shape JSON
        batch_path: String,
        /// Pre-allocated workspace size in bytes
        #[arg(long)]
        workspace: Option<usize>,
        /// Dispatch this many consecutive layers
        #[arg(long, default_value_t = 1)]
        layers: usize,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Check whether a geometry can write 4-bit compressed output
    Probe {
        /// Attention configuration JSON
        config_path: String,
        #[command(flatten)]
        device: DeviceArgs,
    },
}

#[derive(Args)]
struct DeviceArgs {
    /// Compute capability of the simulated device, e.g. 90
    #[arg(long, default_value_t = 90)]
    compute_capability: u32,
    #[arg(long, default_value_t = 132)]
    multiprocessor_count: usize,
}

impl From<DeviceArgs> for DeviceProperties {
    fn from(args: DeviceArgs) -> Self {
        DeviceProperties {
            compute_capability: args.compute_capability,
            multiprocessor_count: args.multiprocessor_count,
        }
    }
}

fn init_log(log: Option<&str>) {
    let level = log
        .and_then(|log| match log.to_lowercase().as_str() {
            "off" | "none" => Some(LevelFilter::Off),
            "all" | "trace" => Some(LevelFilter::Trace),
            "debug" => Some(LevelFilter::Debug),
            "info" => Some(LevelFilter::Info),
            "warn" => Some(LevelFilter::Warn),
            "error" => Some(LevelFilter::Error),
            _ => None,
        })
        .unwrap_or(LevelFilter::Warn);
    if let Err(error) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialize logger: {error}");
    }
}

fn main() {
    let cli = Cli::parse();
    init_log(cli.log.as_deref());

    let result = match cli.command {
        Commands::Plan {
            config_path,
            batch_path,
            workspace,
            layers,
            json,
            device,
        } => handle_plan(config_path, batch_path, workspace, layers, json, device.into()),
        Commands::Probe {
            config_path,
            device,
        } => handle_probe(config_path, device.into()),
    };

    if let Err(error) = result {
        eprintln!("{} {}", Style::new().red().bold().apply_to("error:"), error);
        std::process::exit(1);
    }
}
