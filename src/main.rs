//! attngan CLI: builds the translation networks, runs one inference pass on
//! random inputs and writes the generated batch as a PNG mosaic.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use attngan::{utils::save_mosaic, FeatureExtractorConfig, Mode, ModelConfig};
use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Distribution, Tensor},
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "wgpu")]
type MyBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "wgpu"))]
type MyBackend = burn::backend::NdArray<f32>;

#[derive(Parser, Debug)]
#[command(name = "attngan", about = "Run the attention GAN networks once", version)]
struct Cli {
    /// JSON model configuration. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this file and continue.
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Where to write the generated mosaic.
    #[arg(short, long, default_value = "generated.png")]
    output: PathBuf,

    /// Number of images to generate.
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    /// Height and width of the random single-channel source images.
    #[arg(long, default_value_t = 64)]
    source_size: usize,

    /// Images per mosaic row.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    nrow: u32,

    /// Pretrained VGG19 record; when given, perceptual features of the output are reported.
    #[arg(long)]
    vgg_weights: Option<PathBuf>,

    /// Seed for the backend's random number generator.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let device = Default::default();
    if let Some(seed) = cli.seed {
        MyBackend::seed(seed);
    }

    let config = match &cli.config {
        Some(path) => ModelConfig::load(path)
            .map_err(|err| anyhow!("cannot read config {}: {err:?}", path.display()))?,
        None => ModelConfig::new(),
    };
    if let Some(path) = &cli.dump_config {
        config
            .save(path)
            .with_context(|| format!("cannot write config {}", path.display()))?;
        info!(path = %path.display(), "configuration written");
    }

    let model = config.init::<MyBackend>(&device)?;
    info!(
        condition_channels = model.condition_channels(),
        params = model.num_params(),
        "model ready"
    );

    let batch_size = cli.batch_size as usize;
    let [height, width] = config.encoder_config.output_size;
    let source = Tensor::<MyBackend, 4>::random(
        [batch_size, config.encoder_config.in_channels, cli.source_size, cli.source_size],
        Distribution::Uniform(-1.0, 1.0),
        &device,
    );
    let condition = Tensor::<MyBackend, 4>::random(
        [batch_size, config.condition_channels, height, width],
        Distribution::Normal(0.0, 1.0),
        &device,
    );

    let images = model.translate(source, condition, Mode::Eval)?;
    info!(dims = ?images.dims(), "generated images");

    let scores = model.discriminate(images.clone())?;
    let realism = scores.mean().into_scalar();
    let predicted = model.classify(images.clone())?.argmax(1);
    info!(
        realism = ?realism,
        classes = ?predicted.into_data().iter::<i64>().collect::<Vec<_>>(),
        "critique"
    );

    if let Some(path) = &cli.vgg_weights {
        let extractor =
            FeatureExtractorConfig::new().init_pretrained::<MyBackend, _>(path, &device)?;
        let features = extractor.forward(images.clone())?;
        info!(dims = ?features.dims(), "perceptual features");
    }

    save_mosaic(images, cli.nrow, &cli.output)?;
    info!(path = %cli.output.display(), "mosaic saved");

    Ok(())
}
