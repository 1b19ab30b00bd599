use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facetag::config::{self, Config};
use facetag::engine::EngineSlot;
use facetag::enroll;
use facetag::gallery::{Gallery, GalleryStore, LoadOutcome};
use facetag::identify::{self, IdentifyReport};
use facetag::progress::LogObserver;
use facetag::runner::Runner;
use facetag::{model, Pipeline};
use facetag_vision::DetectorParams;
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facetag")]
#[command(
    version,
    about = "Recognise enrolled people in photos and rename the files after them"
)]
struct Cli {
    /// Config file (defaults to $FACETAG_CONFIG_PATH or the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the detector and recognizer models if missing
    Models,
    /// Build the gallery from <known>/<label>/<images>
    Enroll {
        /// Directory of labelled photo folders
        #[arg(short, long)]
        known: Option<PathBuf>,
    },
    /// Identify and rename photos using the saved gallery
    Identify(IdentifyArgs),
    /// Enroll, then identify in one go
    Run {
        /// Directory of labelled photo folders
        #[arg(short, long)]
        known: Option<PathBuf>,
        #[command(flatten)]
        identify: IdentifyArgs,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
struct IdentifyArgs {
    /// Directory of photos to rename
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Similarity a match must exceed (0.1 to 0.9)
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Write a JSON review of every photo with a detected face
    #[arg(short, long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::builder()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_target(false)
        .format_timestamp(None)
        .init();

    let config_path = cli.config.as_deref();
    let mut cfg = config::load_config(config_path)?;

    match cli.command {
        Commands::Models => provision(&cfg),
        Commands::Enroll { known } => {
            if let Some(known) = known {
                cfg.known_dir = known;
            }
            enroll_only(&cfg)
        }
        Commands::Identify(args) => {
            let report_path = apply_identify_args(&mut cfg, args)?;
            identify_only(&cfg, report_path.as_deref())
        }
        Commands::Run { known, identify } => {
            if let Some(known) = known {
                cfg.known_dir = known;
            }
            let report_path = apply_identify_args(&mut cfg, identify)?;
            enroll_and_identify(&cfg, report_path.as_deref())
        }
        Commands::Config { init } => show_config(&cfg, config_path, init),
    }
}

fn apply_identify_args(cfg: &mut Config, args: IdentifyArgs) -> Result<Option<PathBuf>> {
    if let Some(dir) = args.dir {
        cfg.unknown_dir = dir;
    }
    if let Some(threshold) = args.threshold {
        cfg.threshold = threshold;
    }
    cfg.validate()?;
    Ok(args.report)
}

fn engine_slot(cfg: &Config) -> EngineSlot<Pipeline> {
    let model_dir = cfg.model_dir.clone();
    let params = DetectorParams::from(&cfg.detector);
    EngineSlot::lazy(move || {
        let paths = model::ensure_models(&model_dir, &mut |m| info!("{}", m))?;
        Pipeline::load(&paths, params)
    })
}

fn provision(cfg: &Config) -> Result<()> {
    let paths = model::ensure_models(&cfg.model_dir, &mut |m| info!("{}", m))
        .context("Failed to provision models")?;
    info!("Detector:   {}", paths.detector.display());
    info!("Recognizer: {}", paths.recognizer.display());
    Ok(())
}

fn enroll_only(cfg: &Config) -> Result<()> {
    info!("Enrolling faces from {}", cfg.known_dir.display());

    let mut engine = engine_slot(cfg);
    let known = cfg.known_dir.clone();
    let store = GalleryStore::new(&cfg.gallery_path);

    let handle = Runner::new().spawn(move |ctx| {
        let mut gallery = Gallery::new();
        enroll::enroll(&mut engine, &known, &store, &mut gallery, ctx)
    })?;
    let report = handle.drain_into(&LogObserver).context("Enrollment failed")?;

    info!(
        "✓ {} signature(s) from {} label(s) saved to {}",
        report.embeddings,
        report.labels,
        cfg.gallery_path.display()
    );
    Ok(())
}

fn identify_only(cfg: &Config, report_path: Option<&Path>) -> Result<()> {
    let store = GalleryStore::new(&cfg.gallery_path);
    let outcome = store.load();
    let (_, count) = outcome.status();
    let gallery = match outcome {
        LoadOutcome::Loaded(gallery) if !gallery.is_empty() => gallery,
        LoadOutcome::Corrupt(e) => {
            anyhow::bail!(
                "Gallery {} is unreadable ({:#}). Run 'enroll' first.",
                cfg.gallery_path.display(),
                e
            )
        }
        _ => anyhow::bail!(
            "No signatures found in {}. Run 'enroll' first.",
            cfg.gallery_path.display()
        ),
    };
    info!(
        "Loaded {} signature(s) from {}",
        count,
        cfg.gallery_path.display()
    );

    let mut engine = engine_slot(cfg);
    let dir = cfg.unknown_dir.clone();
    let threshold = cfg.threshold;

    let handle = Runner::new().spawn(move |ctx| {
        identify::identify(&mut engine, &dir, &gallery, threshold, ctx)
    })?;
    let report = handle.drain_into(&LogObserver).context("Identification failed")?;

    finish_identify(&report, report_path)
}

fn enroll_and_identify(cfg: &Config, report_path: Option<&Path>) -> Result<()> {
    let mut engine = engine_slot(cfg);
    let known = cfg.known_dir.clone();
    let dir = cfg.unknown_dir.clone();
    let threshold = cfg.threshold;
    let store = GalleryStore::new(&cfg.gallery_path);

    let handle = Runner::new().spawn(move |ctx| {
        let mut gallery = Gallery::new();
        enroll::enroll(&mut engine, &known, &store, &mut gallery, ctx)?;
        identify::identify(&mut engine, &dir, &gallery, threshold, ctx)
    })?;
    let report = handle.drain_into(&LogObserver).context("Run failed")?;

    finish_identify(&report, report_path)
}

fn finish_identify(report: &IdentifyReport, report_path: Option<&Path>) -> Result<()> {
    if report.rename_failures > 0 {
        warn!("{} file(s) could not be renamed", report.rename_failures);
    }
    if let Some(path) = report_path {
        report.write_json(path)?;
        info!("Review written to {}", path.display());
    }
    info!(
        "✓ {} image(s) processed, {} renamed",
        report.processed, report.renamed
    );
    Ok(())
}

fn show_config(cfg: &Config, path: Option<&Path>, init: bool) -> Result<()> {
    if init {
        config::save_config(cfg, path)?;
        let written = path.unwrap_or(&config::CONFIG_PATH);
        info!("Config written to {}", written.display());
        return Ok(());
    }
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}
