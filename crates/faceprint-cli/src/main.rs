use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceprint_core::{EmbedResponse, Embedding, EngineConfig, FaceEmbedder, OnnxFactory};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "faceprint", about = "Face embeddings from image files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed one image and print the response as JSON
    Embed {
        image: PathBuf,
        /// Single-line JSON
        #[arg(long)]
        compact: bool,
    },
    /// Cosine similarity of the best faces in two images
    Compare { a: PathBuf, b: PathBuf },
    /// Print the effective engine configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("loading configuration")?;

    match cli.command {
        Commands::Embed { image, compact } => {
            let embedder = load_embedder(&config)?;
            let response = embed_file(&embedder, &image)?;
            let out = if compact {
                serde_json::to_string(&response)?
            } else {
                serde_json::to_string_pretty(&response)?
            };
            println!("{out}");
        }
        Commands::Compare { a, b } => {
            let embedder = load_embedder(&config)?;
            let first = embed_file(&embedder, &a)?;
            let second = embed_file(&embedder, &b)?;
            let score = similarity(&first, &second)
                .with_context(|| format!("comparing {} and {}", a.display(), b.display()))?;
            println!("{score:.4}");
        }
        Commands::Config => {
            let view = json!({
                "model_dir": config.model_dir.display().to_string(),
                "model_name": &config.model_name,
                "detector": config.detector_model_path()?,
                "recognizer": config.recognizer_model_path()?,
                "providers": &config.providers,
                "intra_threads": config.intra_threads,
                "max_long_edge_for_first_pass": config.limits.first_pass_max_edge,
                "abs_max_long_edge": config.limits.abs_max_edge,
                "upscale_on_fail": config.limits.upscale_on_fail,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}

fn load_embedder(config: &EngineConfig) -> Result<FaceEmbedder> {
    let factory = OnnxFactory::load(config).context("loading model pack")?;
    Ok(FaceEmbedder::new(Arc::new(factory), config.limits))
}

fn embed_file(embedder: &FaceEmbedder, path: &Path) -> Result<EmbedResponse> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let response = embedder
        .embed_bytes(&bytes)
        .with_context(|| format!("embedding {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        faces = response.faces.len(),
        attempts = response.tried.len(),
        "embedded"
    );
    Ok(response)
}

fn similarity(a: &EmbedResponse, b: &EmbedResponse) -> Result<f32> {
    let best = |r: &EmbedResponse, which: &str| -> Result<Embedding> {
        match &r.best_embedding {
            Some(values) => Ok(Embedding::new(values.clone())),
            None => bail!("{which} image: {}", r.message.unwrap_or("no embedding")),
        }
    };
    Ok(best(a, "first")?.similarity(&best(b, "second")?))
}
