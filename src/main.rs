use anyhow::{Context, bail};
use clap::Parser;
use clap::builder::PossibleValuesParser;
use quadmap::{BuildJob, Config, DatasetRegistry, SnapshotBackend};
use std::path::{Path, PathBuf};
use tracing::info;

/// Build the zoomable tile pyramid of a dataset's projected embeddings.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Dataset to build; defaults to the first registered dataset
    #[arg(short, long)]
    collection: Option<String>,

    /// Drop and rebuild existing output collections
    #[arg(
        short,
        long,
        default_value = "n",
        value_parser = PossibleValuesParser::new(["y", "n"]),
        ignore_case = true
    )]
    repopulate: String,

    /// Directory holding the collection snapshots
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Dataset registry; defaults to $HOME/datasets.json
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Build configuration (.json, or .toml with the `toml` feature)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        #[cfg(feature = "toml")]
        Some("toml") => Ok(Config::from_toml(&text)?),
        Some("json") | None => Ok(Config::from_json(&text)?),
        Some(other) => bail!("unsupported config format '.{}'", other),
    }
}

fn default_registry() -> anyhow::Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set; pass --registry")?;
    Ok(PathBuf::from(home).join("datasets.json"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quadmap_build=info,quadmap=info,warn".into()),
        )
        .init();

    let args = Args::parse();

    let registry_path = match args.registry {
        Some(path) => path,
        None => default_registry()?,
    };
    let mut registry = DatasetRegistry::load(&registry_path)?;

    let dataset = match args.collection {
        Some(name) => name,
        None => match registry.first() {
            Some(entry) => entry.name.clone(),
            None => bail!("no datasets registered in {}", registry_path.display()),
        },
    };

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    info!("Opening collections in {}", args.data_dir.display());
    let mut backend =
        SnapshotBackend::open_with_search_limit(&args.data_dir, config.storage.search_limit)
            .with_context(|| format!("opening data directory {}", args.data_dir.display()))?;

    let report = BuildJob::new(dataset.as_str())
        .repopulate(args.repopulate.eq_ignore_ascii_case("y"))
        .config(config)
        .run(&mut backend, &mut registry)
        .with_context(|| format!("building {}", dataset))?;

    info!(
        dataset = %report.dataset,
        points = report.points,
        max_zoom = report.max_zoom,
        tiles = report.stats.tiles_written,
        images = report.images_indexed,
        refetched = report.stats.tiles_refetched,
        evicted = report.stats.tiles_evicted,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Build finished"
    );
    Ok(())
}
