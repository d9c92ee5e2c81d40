use clap::{Args, Parser, Subcommand};
use docshrink::batch::{BatchContext, BatchResult, DocumentJob, optimize_document};
use docshrink::config;
use docshrink::container::inspect_members;
use docshrink::imaging::{RustBackend, TargetFormat, classify, get_dimensions};
use docshrink::metadata::{self, OpfMetadataEmbedder};
use docshrink::output::{self, SniffRecord};
use docshrink::progress::CancelFlag;
use docshrink::scan::{self, DocumentSource};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docshrink")]
#[command(about = "Shrink the images inside EPUB, CBZ and Office documents")]
#[command(long_about = "\
Shrink the images inside EPUB, CBZ and Office documents

Every ZIP-structured document is copied member by member. Images are
resized and re-encoded, everything else is copied unchanged, and the
'mimetype' entry stays first and uncompressed so readers still accept
the result.

Documents are grouped by name: Dune.epub and Dune.kepub in the same
directory are two formats of one document and share one title.

  books/
  ├── Dune.epub            → out/Dune.optimized.epub
  ├── Dune.kepub           → out/Dune.optimized.kepub
  └── comics/
      └── Akira.cbz        → out/Akira.optimized.cbz

Settings come from ./docshrink.toml (or --config), overridden by flags.
Run 'docshrink gen-config' to generate a documented docshrink.toml.")]
#[command(version)]
struct Cli {
    /// Log every member and transcode decision
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize the images in one or more documents
    Optimize(OptimizeArgs),
    /// Report the image kind and size of files or archive members
    Sniff(SniffArgs),
    /// Print a stock docshrink.toml with all options documented
    GenConfig,
}

#[derive(Args)]
struct OptimizeArgs {
    /// Documents or directories to optimize
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Config file (default: ./docshrink.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Limit in pixels on the shorter side of each image
    #[arg(long)]
    max_size: Option<u32>,

    /// Keep every image's dimensions
    #[arg(long, conflicts_with = "max_size")]
    no_resize: bool,

    /// Lossy encoding quality
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    quality: Option<u32>,

    /// Output image encoding (original, jpeg, png, webp, avif, ...)
    #[arg(long)]
    format: Option<TargetFormat>,

    /// Give outputs the modification time of their source
    #[arg(long, conflicts_with = "reset_import_time")]
    keep_import_time: bool,

    /// Give outputs the current time
    #[arg(long)]
    reset_import_time: bool,

    /// Where optimized documents are written (default: next to each source)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct SniffArgs {
    /// Files to inspect
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Treat each file as a ZIP container and inspect its members
    #[arg(long)]
    members: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Optimize(args) => run_optimize(args)?,
        Command::Sniff(args) => run_sniff(args)?,
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "docshrink=debug"
    } else {
        "docshrink=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

/// Config file, then flags on top.
fn resolve_config(args: &OptimizeArgs) -> Result<config::OptimizerConfig, config::ConfigError> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::CONFIG_FILE_NAME));
    if args.config.is_some() && !path.exists() {
        return Err(config::ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("config file not found: {}", path.display()),
        )));
    }
    let mut cfg = config::load_config(&path)?;

    let opt = &mut cfg.optimize;
    if let Some(max_size) = args.max_size {
        opt.resize = true;
        opt.max_size = max_size;
    }
    if args.no_resize {
        opt.resize = false;
    }
    if let Some(quality) = args.quality {
        opt.quality = quality;
    }
    if let Some(format) = args.format {
        opt.format = format;
    }
    if args.keep_import_time {
        opt.keep_import_time = true;
    }
    if args.reset_import_time {
        opt.keep_import_time = false;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn run_optimize(args: OptimizeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = resolve_config(&args)?;
    let params = cfg.to_parameters();
    init_thread_pool(&cfg.processing);

    let documents = scan::discover_documents(&args.paths)?;
    if documents.is_empty() {
        warn!("No documents found");
    }
    info!(
        "Optimizing {} document(s): max size {}, quality {}, format {}",
        documents.len(),
        params
            .max_dimension
            .map_or_else(|| "unlimited".to_string(), |m| format!("{m}px")),
        params.quality.value(),
        params.target_format
    );

    let backend = RustBackend::new();
    let embedder = OpfMetadataEmbedder::new();
    let cancel = CancelFlag::new();
    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            println!("{}", output::format_progress_event(&event));
        }
    });

    let results: Vec<(String, BatchResult)> = documents
        .par_iter()
        .map_with(tx, |tx, doc| {
            let out_dir = args.output_dir.clone().unwrap_or_else(|| doc.dir.clone());
            let title = document_title(doc);
            let job = DocumentJob {
                formats: doc.formats.clone(),
                metadata: metadata::DocumentMetadata::with_title(&title).annotated(),
                params,
            };
            if let Err(e) = fs::create_dir_all(&out_dir) {
                error!("Cannot create {}: {e}", out_dir.display());
                return (job.metadata.title, BatchResult::default());
            }
            let ctx = BatchContext {
                backend: &backend,
                embedder: &embedder,
                progress: Some(&*tx),
                cancel: &cancel,
                temp_dir: Some(&out_dir),
            };
            let mut result = optimize_document(&job, &ctx);
            place_outputs(doc, &out_dir, &mut result);
            (job.metadata.title, result)
        })
        .collect();

    if printer.join().is_err() {
        warn!("Progress printer exited abnormally");
    }
    output::print_optimize_report(&results);
    Ok(())
}

/// Title from the first EPUB-family format's package document, else the stem.
fn document_title(doc: &DocumentSource) -> String {
    let from_package = doc
        .formats
        .iter()
        .filter(|(label, _)| OpfMetadataEmbedder::supports(label))
        .find_map(|(_, path)| metadata::read_opf_title(path));
    metadata::resolve(&[from_package.as_deref(), Some(doc.stem.as_str())])
        .unwrap_or_else(|| doc.stem.clone())
}

/// Move each temporary output to `<out_dir>/<stem>.optimized.<ext>`.
///
/// A format whose output cannot be placed is dropped from the result.
fn place_outputs(doc: &DocumentSource, out_dir: &Path, result: &mut BatchResult) {
    let keep_time = result.keep_import_timestamp;
    result.outputs.retain(|label, done| {
        let Some(source) = doc.formats.get(label) else {
            return false;
        };
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map_or_else(|| label.to_lowercase(), str::to_string);
        let dest = out_dir.join(format!("{}{}.{ext}", doc.stem, scan::OUTPUT_MARKER));

        if let Err(e) = move_file(&done.output, &dest) {
            error!("Cannot write {}: {e}", dest.display());
            fs::remove_file(&done.output).ok();
            return false;
        }
        if keep_time {
            if let Err(e) = copy_mtime(source, &dest) {
                warn!("Could not keep import time on {}: {e}", dest.display());
            }
        }
        done.output = dest;
        true
    });
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

fn copy_mtime(source: &Path, dest: &Path) -> std::io::Result<()> {
    let modified: SystemTime = fs::metadata(source)?.modified()?;
    fs::File::options().write(true).open(dest)?.set_modified(modified)
}

fn run_sniff(args: SniffArgs) -> Result<(), Box<dyn std::error::Error>> {
    let backend = RustBackend::new();
    let mut records = Vec::new();

    for file in &args.files {
        if args.members {
            match inspect_members(&backend, file) {
                Ok(members) => records.extend(members.into_iter().map(|m| {
                    SniffRecord::new(
                        format!("{}:{}", file.display(), m.name),
                        m.kind,
                        m.dimensions,
                    )
                })),
                Err(e) => error!("{}: {e}", file.display()),
            }
            continue;
        }
        match fs::read(file) {
            Ok(data) => {
                let kind = classify(&data);
                let dims = kind.and_then(|_| get_dimensions(&backend, &data));
                records.push(SniffRecord::new(file.display().to_string(), kind, dims));
            }
            Err(e) => error!("{}: {e}", file.display()),
        }
    }

    if args.json {
        println!("{}", output::format_sniff_json(&records)?);
    } else {
        for record in &records {
            println!("{}", output::format_sniff_line(record));
        }
    }
    Ok(())
}
