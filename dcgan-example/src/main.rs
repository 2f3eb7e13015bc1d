use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dcgan_core::backends::cpu::CpuTensor;
use dcgan_core::backends::session::{Session, Value};
use dcgan_core::backends::Tensor;
use dcgan_core::graph::Scope;
use dcgan_core::nn::activations::sigmoid;
use dcgan_models::{Dcgan, DcganConfig};

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use std::path::PathBuf;

/// Builds the DCGAN graph, initializes its variables and runs one forward
/// pass on synthetic images.
#[derive(Parser)]
#[command(name = "dcgan")]
struct Cli {
    /// JSON file with network hyperparameters; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "8")]
    batch_size: usize,

    /// Overrides the seed from the config
    #[arg(long)]
    seed: Option<u64>,

    /// Write the graph definition as JSON to this path
    #[arg(long)]
    graph_out: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &cli.config {
        Some(path) => DcganConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => DcganConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    info!(?config, batch_size = cli.batch_size, "configuration");

    let scope = Scope::new_root();
    let gan = Dcgan::new(&scope, &config, cli.batch_size).context("failed to build the DCGAN graph")?;

    if let Some(path) = &cli.graph_out {
        let def = scope.graph().to_graph_def();
        def.save(path)
            .with_context(|| format!("failed to write graph definition to {}", path.display()))?;
        info!(path = %path.display(), nodes = def.nodes.len(), "saved graph definition");
    }

    let mut session: Session = Session::with_seed(&scope, config.seed);
    session
        .initialize(&gan.initializers())
        .context("failed to initialize variables")?;

    let real = synthetic_images(&config.image_shape(cli.batch_size), config.seed)?;
    let outputs = session
        .run(
            &[(gan.real_images, Value::Float(real))],
            &[gan.generator_loss, gan.discriminator_loss, gan.real_output, gan.fake_output],
            &[],
        )
        .context("forward pass failed")?;

    let generator_loss = outputs[0].scalar()?;
    let discriminator_loss = outputs[1].scalar()?;
    info!(generator_loss, discriminator_loss, "losses");

    let real_probs = sigmoid(outputs[2].as_float()?);
    let fake_probs = sigmoid(outputs[3].as_float()?);
    info!(
        real = ?real_probs.get_data().iter().collect::<Vec<_>>(),
        fake = ?fake_probs.get_data().iter().collect::<Vec<_>>(),
        "discriminator probabilities"
    );

    Ok(())
}

/// Uniform pixels in `[-1, 1)` standing in for a batch of real images.
fn synthetic_images(shape: &[usize], seed: u64) -> Result<CpuTensor<f32>> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let len: usize = shape.iter().product();
    let pixels = (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect::<Vec<f32>>();
    Ok(CpuTensor::new(ArrayD::from_shape_vec(IxDyn(shape), pixels)?))
}
