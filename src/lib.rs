//! Shrinkwatch: camera-to-PDV shrink reconciliation and offline
//! training-image collection.
//!
//! Two pipelines share this crate:
//!
//! - **Reconciliation**: a [`detect::Detector`] counts products in camera
//!   frames and [`reconcile::compare`] flags products the camera saw more of
//!   than the point-of-sale system recorded.
//! - **Collection**: field devices capture and annotate images in a
//!   [`ledger::Ledger`], ship them as [`bundle`]s, and the central store
//!   merges them idempotently into a class-indexed [`dataset`].
//!
//! # Modules
//!
//! - [`ir`]: Core records (IDs, boxes, checksums, products, sync states)
//! - [`detect`]: Detection model seam, detector and counting
//! - [`reconcile`]: Camera vs. PDV comparison
//! - [`ledger`]: Per-device collection ledger
//! - [`bundle`]: Export bundles, import and merge
//! - [`dataset`]: Central training dataset and class index
//! - [`validation`]: Ledger and store validation reports
//! - [`config`], [`logging`], [`error`]: Ambient plumbing

pub mod bundle;
pub mod config;
pub mod dataset;
pub mod detect;
pub mod error;
pub mod ir;
pub mod ledger;
pub mod logging;
pub mod reconcile;
pub mod validation;

use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::bundle::{export_bundle, import_bundle, ExportOptions, SyncReceipt};
use crate::config::Config;
use crate::dataset::{DatasetStore, TrainingSelection};
use crate::detect::{Detector, Frame, ReplayLoader};
use crate::ir::fsutil::read_json;
use crate::ir::{Annotation, Checksum, ClassId, ImageId, NormalizedBox, ProductId};
use crate::ledger::{Ledger, SyncSink};
use crate::reconcile::{PriceTable, ProductCount};

pub use error::ShrinkError;

/// The shrinkwatch CLI application.
#[derive(Parser)]
#[command(name = "shrinkwatch")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true, env = config::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Log filter (overrides logging.level; RUST_LOG overrides both).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Count products in camera frames.
    Count(CountArgs),
    /// Compare camera counts against PDV records.
    Reconcile(ReconcileArgs),
    /// Manage the device collection ledger.
    Ledger(LedgerArgs),
    /// Package annotated images into an export bundle.
    Export(ExportArgs),
    /// Merge an export bundle into the training dataset.
    Import(ImportArgs),
    /// Inspect and maintain the training dataset.
    Dataset(DatasetArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Detection model file (recorded model outputs).
    #[arg(long)]
    model: PathBuf,

    /// Frame image files.
    #[arg(long = "frame", required = true)]
    frames: Vec<PathBuf>,

    /// Minimum confidence to keep a detection (default from config).
    #[arg(long)]
    threshold: Option<f64>,
}

#[derive(clap::Args)]
struct CountArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Print only the count for this product.
    #[arg(long)]
    product: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(clap::Args)]
struct ReconcileArgs {
    /// Camera counts as JSON (`{"product": count}`).
    #[arg(long, conflicts_with = "model")]
    camera: Option<PathBuf>,

    /// Detection model file; counts the given frames instead of --camera.
    #[arg(long, requires = "frames")]
    model: Option<PathBuf>,

    #[arg(long = "frame")]
    frames: Vec<PathBuf>,

    #[arg(long)]
    threshold: Option<f64>,

    /// PDV counts as JSON (`{"product": count}`).
    #[arg(long)]
    pdv: PathBuf,

    /// Unit prices in cents as JSON (`{"product": cents}`).
    #[arg(long)]
    prices: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(clap::Args)]
struct LedgerArgs {
    /// Ledger directory (default from config).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: LedgerCommand,
}

#[derive(Subcommand)]
enum LedgerCommand {
    /// Create an empty ledger.
    Init {
        /// Device identifier (default from config).
        #[arg(long)]
        device_id: Option<String>,
    },
    /// Add a product to the catalog.
    AddProduct { name: String },
    /// Capture image files.
    Capture {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Attach annotations to an image.
    Annotate {
        image: u64,
        /// `PRODUCT_ID:x_center,y_center,width,height`, normalized.
        #[arg(long = "box", required = true)]
        boxes: Vec<String>,
    },
    /// Remove all annotations from an image.
    Clear { image: u64 },
    /// Reopen an exported or synced image for correction.
    Reopen { image: u64 },
    /// Show image counts per sync state.
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Validate the ledger.
    Validate {
        /// Treat warnings as errors.
        #[arg(long)]
        strict: bool,
        /// Re-hash every image file.
        #[arg(long)]
        verify_checksums: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Apply a sync receipt from the central store.
    Confirm {
        receipt: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(clap::Args)]
struct ExportArgs {
    /// Ledger directory (default from config).
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Directory to create the bundle in.
    #[arg(long)]
    out: PathBuf,

    /// Export only these image IDs.
    #[arg(long = "image")]
    images: Vec<u64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(clap::Args)]
struct ImportArgs {
    /// Bundle directory.
    bundle: PathBuf,

    /// Dataset directory (default from config).
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Confirm synced images directly in this ledger.
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Write a sync receipt for the originating device.
    #[arg(long)]
    receipt: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(clap::Args)]
struct DatasetArgs {
    /// Dataset directory (default from config).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: DatasetCommand,
}

#[derive(Subcommand)]
enum DatasetCommand {
    /// Per-class counts and training split.
    Stats {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Flag entries as consumed by a training run.
    MarkTrained {
        /// Every entry.
        #[arg(long, conflicts_with_all = ["untrained", "class", "checksum"])]
        all: bool,
        /// Entries not marked before.
        #[arg(long, conflicts_with_all = ["class", "checksum"])]
        untrained: bool,
        /// Entries with boxes of this class ID.
        #[arg(long, conflicts_with = "checksum")]
        class: Vec<u32>,
        /// Entries with this image checksum.
        #[arg(long)]
        checksum: Vec<String>,
    },
    /// Write data.yaml for the training pipeline.
    DataYaml,
    /// Cross-check index files against images and labels.
    Verify {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Pin a class name to a chosen ID.
    RegisterClass {
        #[arg(long)]
        id: u32,
        #[arg(long)]
        name: String,
    },
}

/// Run the shrinkwatch CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), ShrinkError> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    logging::init(&config.logging)?;

    match cli.command {
        Some(Commands::Count(args)) => run_count(args, &config),
        Some(Commands::Reconcile(args)) => run_reconcile(args, &config),
        Some(Commands::Ledger(args)) => run_ledger(args, &config),
        Some(Commands::Export(args)) => run_export(args, &config),
        Some(Commands::Import(args)) => run_import(args, &config),
        Some(Commands::Dataset(args)) => run_dataset(args, &config),
        None => {
            println!("shrinkwatch {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Camera-to-PDV shrink reconciliation and offline training-image collection.");
            println!();
            println!("Run 'shrinkwatch --help' for usage information.");
            Ok(())
        }
    }
}

fn emit<T: Serialize + Display>(value: &T, output: OutputFormat) -> Result<(), ShrinkError> {
    match output {
        OutputFormat::Text => print!("{}", value),
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(value).map_err(|source| ShrinkError::JsonWrite {
                    path: PathBuf::from("<stdout>"),
                    source,
                })?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn count_frames(
    model: &Path,
    frames: &[PathBuf],
    threshold: Option<f64>,
    config: &Config,
) -> Result<ProductCount, ShrinkError> {
    let threshold = threshold.unwrap_or(config.detector.confidence_threshold);
    let detector = Detector::load(&ReplayLoader, model, threshold)?;
    let mut counts = ProductCount::new();
    for path in frames {
        let frame = Frame::from_path(path)?;
        counts.merge(&detector.count_frame(&frame)?);
    }
    Ok(counts)
}

fn run_count(args: CountArgs, config: &Config) -> Result<(), ShrinkError> {
    let counts = count_frames(
        &args.model.model,
        &args.model.frames,
        args.model.threshold,
        config,
    )?;

    match (args.product, args.output) {
        (Some(product), OutputFormat::Text) => println!("{}", counts.get(&product)),
        (Some(product), OutputFormat::Json) => {
            println!("{}", serde_json::json!({ "product": product, "count": counts.get(&product) }))
        }
        (None, OutputFormat::Text) => {
            for (product, qty) in counts.iter() {
                println!("{}: {}", product, qty);
            }
        }
        (None, OutputFormat::Json) => {
            let json =
                serde_json::to_string_pretty(&counts).map_err(|source| ShrinkError::JsonWrite {
                    path: PathBuf::from("<stdout>"),
                    source,
                })?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn run_reconcile(args: ReconcileArgs, config: &Config) -> Result<(), ShrinkError> {
    let camera = match (&args.camera, &args.model) {
        (Some(path), _) => read_json::<ProductCount>(path)?,
        (None, Some(model)) => count_frames(model, &args.frames, args.threshold, config)?,
        (None, None) => {
            return Err(ShrinkError::Config {
                message: "either --camera or --model with --frame is required".to_string(),
            })
        }
    };
    let pdv: ProductCount = read_json(&args.pdv)?;

    let mut report = reconcile::compare(&camera, &pdv);
    if let Some(path) = &args.prices {
        let prices: PriceTable = read_json(path)?;
        report = report.with_unit_prices(&prices);
    }
    emit(&report, args.output)
}

fn run_ledger(args: LedgerArgs, config: &Config) -> Result<(), ShrinkError> {
    let root = args.root.unwrap_or_else(|| config.ledger.root.clone());

    match args.command {
        LedgerCommand::Init { device_id } => {
            let device_id = device_id.unwrap_or_else(|| config.ledger.device_id.clone());
            Ledger::init(&root, &device_id)?;
            println!("Initialized ledger for '{}' at {}", device_id, root.display());
        }
        LedgerCommand::AddProduct { name } => {
            let mut ledger = Ledger::open(&root)?;
            let id = ledger.add_product(&name)?;
            println!("{}", id);
        }
        LedgerCommand::Capture { files } => {
            let mut ledger = Ledger::open(&root)?;
            for file in files {
                let id = ledger.capture(&file)?;
                println!("{}\t{}", id, file.display());
            }
        }
        LedgerCommand::Annotate { image, boxes } => {
            let mut ledger = Ledger::open(&root)?;
            let annotations = boxes
                .iter()
                .map(|raw| parse_box_arg(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let state = ledger.annotate(ImageId::new(image), annotations)?;
            println!("image {}: {}", image, state);
        }
        LedgerCommand::Clear { image } => {
            let mut ledger = Ledger::open(&root)?;
            let state = ledger.clear_annotations(ImageId::new(image))?;
            println!("image {}: {}", image, state);
        }
        LedgerCommand::Reopen { image } => {
            let mut ledger = Ledger::open(&root)?;
            let state = ledger.reopen(ImageId::new(image))?;
            println!("image {}: {}", image, state);
        }
        LedgerCommand::Status { output } => {
            let ledger = Ledger::open(&root)?;
            emit(&ledger.status(), output)?;
        }
        LedgerCommand::Validate {
            strict,
            verify_checksums,
            output,
        } => {
            let ledger = Ledger::open(&root)?;
            let opts = validation::ValidateOptions {
                strict,
                verify_checksums,
            };
            let report = validation::validate_ledger(&ledger, &opts);
            return finish_validation(report, output, strict);
        }
        LedgerCommand::Confirm { receipt, output } => {
            let mut ledger = Ledger::open(&root)?;
            let receipt = SyncReceipt::read(&receipt)?;
            let outcome = ledger.apply_receipt(&receipt)?;
            match output {
                OutputFormat::Text => println!(
                    "synced: {}, already synced: {}, stale: {}, unknown: {}",
                    outcome.synced, outcome.already_synced, outcome.stale, outcome.unknown
                ),
                OutputFormat::Json => println!("{}", serde_json::json!(outcome)),
            }
        }
    }
    Ok(())
}

/// Parses `PRODUCT_ID:x_center,y_center,width,height`.
fn parse_box_arg(raw: &str) -> Result<Annotation, ShrinkError> {
    let invalid = |message: String| ShrinkError::InvalidAnnotation { message };

    let (product, coords) = raw
        .split_once(':')
        .ok_or_else(|| invalid(format!("'{raw}': expected PRODUCT_ID:cx,cy,w,h")))?;
    let product_id: u64 = product
        .trim()
        .parse()
        .map_err(|_| invalid(format!("'{raw}': invalid product id '{product}'")))?;
    let values = coords
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid(format!("'{raw}': coordinates must be numbers")))?;
    let &[cx, cy, w, h] = values.as_slice() else {
        return Err(invalid(format!("'{raw}': expected four coordinates")));
    };

    Ok(Annotation::new(
        ProductId::new(product_id),
        NormalizedBox::new(cx, cy, w, h)?,
    ))
}

fn finish_validation(
    report: validation::ValidationReport,
    output: OutputFormat,
    strict: bool,
) -> Result<(), ShrinkError> {
    match output {
        OutputFormat::Text => print!("{}", report),
        OutputFormat::Json => {
            let json = serde_json::json!({
                "error_count": report.error_count(),
                "warning_count": report.warning_count(),
                "issues": report.issues,
            });
            println!("{:#}", json);
        }
    }

    let has_errors = report.error_count() > 0;
    let has_warnings = report.warning_count() > 0;

    if has_errors || (strict && has_warnings) {
        Err(ShrinkError::ValidationFailed {
            error_count: report.error_count(),
            warning_count: report.warning_count(),
            report,
        })
    } else {
        Ok(())
    }
}

fn run_export(args: ExportArgs, config: &Config) -> Result<(), ShrinkError> {
    let root = args.ledger.unwrap_or_else(|| config.ledger.root.clone());
    let mut ledger = Ledger::open(&root)?;
    let opts = ExportOptions {
        created_at: None,
        images: (!args.images.is_empty())
            .then(|| args.images.iter().copied().map(ImageId::new).collect()),
    };
    let outcome = export_bundle(&mut ledger, &args.out, &opts)?;
    emit(&outcome.report, args.output)?;
    if let (Some(bundle), OutputFormat::Text) = (&outcome.bundle, args.output) {
        println!("Bundle directory: {}", bundle.dir.display());
    }
    Ok(())
}

fn run_import(args: ImportArgs, config: &Config) -> Result<(), ShrinkError> {
    let root = args.dataset.unwrap_or_else(|| config.dataset.root.clone());
    let store = DatasetStore::open_with_timeout(&root, config.dataset.lock_timeout())?;

    let mut ledger = args.ledger.as_deref().map(Ledger::open).transpose()?;
    let sink = ledger.as_mut().map(|l| l as &mut dyn SyncSink);
    let report = import_bundle(&args.bundle, &store, sink)?;

    if let Some(path) = &args.receipt {
        report.receipt().write(path)?;
    }
    emit(&report, args.output)
}

fn run_dataset(args: DatasetArgs, config: &Config) -> Result<(), ShrinkError> {
    let root = args.root.unwrap_or_else(|| config.dataset.root.clone());
    let store = DatasetStore::open_with_timeout(&root, config.dataset.lock_timeout())?;

    match args.command {
        DatasetCommand::Stats { output } => emit(&dataset::class_stats(&store), output),
        DatasetCommand::MarkTrained {
            all,
            untrained,
            class,
            checksum,
        } => {
            let selection = if all {
                TrainingSelection::All
            } else if untrained {
                TrainingSelection::Untrained
            } else if !class.is_empty() {
                TrainingSelection::Classes(class.into_iter().map(ClassId::new).collect())
            } else if !checksum.is_empty() {
                let sums = checksum
                    .iter()
                    .map(|raw| {
                        Checksum::parse(raw).ok_or_else(|| ShrinkError::Config {
                            message: format!("'{raw}' is not a SHA-256 checksum"),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                TrainingSelection::Checksums(sums)
            } else {
                return Err(ShrinkError::Config {
                    message: "choose entries with --all, --untrained, --class or --checksum"
                        .to_string(),
                });
            };
            let updated = dataset::mark_trained(&store, &selection, Utc::now())?;
            println!("Marked {} entr{} as trained", updated, if updated == 1 { "y" } else { "ies" });
            Ok(())
        }
        DatasetCommand::DataYaml => {
            let path = dataset::write_data_yaml(&store)?;
            println!("{}", path.display());
            Ok(())
        }
        DatasetCommand::Verify { output } => {
            let report = dataset::verify_store(&store)?;
            finish_validation(report, output, false)
        }
        DatasetCommand::RegisterClass { id, name } => {
            dataset::register_class(&store, ClassId::new(id), &name)?;
            println!("{}: {}", id, name.trim());
            Ok(())
        }
    }
}
