//! com-census: inventory COM servers on a Windows host.
//!
//! This is the main entry point for the CLI application.

use com_census::com::{self, Activator, ClassProbeRecord, ClassProber, Clsid, ComActivator};
use com_census::core::config::{Config, RegistryHive};
use com_census::core::error::{Error, Result};
use com_census::core::types::{ClassScanSummary, ModuleScanSummary, ModuleVerdict, ScanStatus};
use com_census::scanner::{self, ConsoleProgressReporter, ModuleScanner};
use com_census::ui::cli::{ClassArgs, Cli, Commands, ConfigAction, ModuleArgs, OutputFormat};
use com_census::utils::logging::{cleanup_old_logs, init_logging, LogConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// How a command ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Cancelled,
}

impl Outcome {
    fn from_status(status: ScanStatus) -> Self {
        if status == ScanStatus::Cancelled {
            Outcome::Cancelled
        } else {
            Outcome::Completed
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::Cancelled) => {
            eprintln!("Scan cancelled.");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(hint) = e.suggestion() {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<Outcome> {
    // Parse command-line arguments
    let cli = Cli::parse_args();

    // Configuration drives the logger, so it is loaded first and its
    // warnings are logged once the logger is up
    let (mut config, config_warnings) = Config::load_or_default(cli.config.as_deref());

    let mut log_config = LogConfig::from_config(&config);
    if cli.verbose {
        log_config = LogConfig {
            file: log_config.file,
            file_path: log_config.file_path,
            ..LogConfig::verbose()
        };
    }
    init_logging(log_config)?;

    log::info!("com-census v{}", env!("CARGO_PKG_VERSION"));
    for warning in &config_warnings {
        log::warn!("{}", warning);
    }

    if config.logging.log_to_file {
        if let Err(e) = cleanup_old_logs(&config.logging.log_dir(), config.logging.keep_logs_days) {
            log::warn!("Log cleanup failed: {}", e);
        }
    }

    // Ctrl-C only raises the stop flag; pipelines wind down on their own
    let cancelled = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&cancelled))
        .map_err(|e| Error::Internal(format!("Failed to install Ctrl-C handler: {}", e)))?;

    let show_progress = cli.format == OutputFormat::Text && !cli.verbose;

    match cli.command {
        Some(Commands::Modules { args }) => {
            apply_module_args(&mut config, args);
            config.validate()?;
            let summary =
                run_modules(Arc::new(config), cancelled, cli.format, show_progress).await?;
            Ok(Outcome::from_status(summary.status))
        }
        Some(Commands::Classes { args }) => {
            apply_class_args(&mut config, args)?;
            config.validate()?;
            let summary = run_classes(Arc::new(config), cancelled, cli.format).await?;
            Ok(Outcome::from_status(summary.status))
        }
        Some(Commands::All { modules, classes }) => {
            apply_module_args(&mut config, modules);
            apply_class_args(&mut config, classes)?;
            config.validate()?;
            run_all(Arc::new(config), cancelled, cli.format).await
        }
        Some(Commands::Inspect { paths, exports }) => {
            run_inspect(&paths, exports, cli.format)?;
            Ok(Outcome::Completed)
        }
        Some(Commands::Probe { clsid }) => {
            run_probe(&config, &clsid, cli.format).await?;
            Ok(Outcome::Completed)
        }
        Some(Commands::Config { action }) => {
            run_config(action, &config, cli.config.as_deref())?;
            Ok(Outcome::Completed)
        }
        Some(Commands::Info) => {
            run_info(&config);
            Ok(Outcome::Completed)
        }
        None => {
            // No command specified, show help
            println!("com-census - COM server inventory");
            println!();
            println!("Use --help for usage information");
            println!();
            println!("Quick start:");
            println!("  com-census modules --root C:\\Windows   Find DLLs exporting DllGetClassObject");
            println!("  com-census classes                     Activate every registered CLSID");
            println!("  com-census all                         Run both pipelines");
            Ok(Outcome::Completed)
        }
    }
}

fn apply_module_args(config: &mut Config, args: ModuleArgs) {
    if !args.roots.is_empty() {
        config.scan.roots = args.roots;
    }
    if let Some(output) = args.output {
        config.scan.output_file = output;
    }
    if let Some(threads) = args.threads {
        config.scan.scan_threads = threads;
    }
    if args.no_journal {
        config.scan.incremental_flush = false;
    }
}

fn apply_class_args(config: &mut Config, args: ClassArgs) -> Result<()> {
    if args.describe {
        config.probe.describe = true;
    }
    if let Some(hive) = args.hive {
        config.probe.hive = RegistryHive::parse(&hive)?;
    }
    Ok(())
}

/// Run the module pipeline.
async fn run_modules(
    config: Arc<Config>,
    cancelled: Arc<AtomicBool>,
    format: OutputFormat,
    show_progress: bool,
) -> Result<ModuleScanSummary> {
    let scanner = ModuleScanner::with_cancel_flag(config, cancelled);

    if show_progress {
        let reporter = ConsoleProgressReporter::new();
        scanner.set_progress_callback(move |progress| reporter.report(&progress));
    }

    let summary = scanner.scan().await?;
    print_module_summary(&summary, format)?;
    Ok(summary)
}

/// Run the class pipeline on a blocking thread.
async fn run_classes(
    config: Arc<Config>,
    cancelled: Arc<AtomicBool>,
    format: OutputFormat,
) -> Result<ClassScanSummary> {
    let summary = tokio::task::spawn_blocking(move || -> Result<ClassScanSummary> {
        let root = com::open_class_root(&config.probe)?;
        log::info!("Enumerating {}", config.probe.class_root_path());

        let activator = ComActivator::from_config(&config.probe);
        let prober = ClassProber::new(cancelled).with_describe(config.probe.describe);
        Ok(prober.run(&root, &activator, |record| print_record(record, format)))
    })
    .await
    .map_err(|e| Error::Worker(e.to_string()))??;

    print_class_summary(&summary, format)?;
    Ok(summary)
}

/// Run both pipelines concurrently. A fatal error in one does not stop
/// the other.
async fn run_all(
    config: Arc<Config>,
    cancelled: Arc<AtomicBool>,
    format: OutputFormat,
) -> Result<Outcome> {
    let (modules, classes) = tokio::join!(
        run_modules(Arc::clone(&config), Arc::clone(&cancelled), format, false),
        run_classes(Arc::clone(&config), Arc::clone(&cancelled), format),
    );

    let mut outcome = Outcome::Completed;
    let mut first_error = None;

    for (pipeline, status) in [
        ("Module", modules.map(|s| s.status)),
        ("Class", classes.map(|s| s.status)),
    ] {
        match status {
            Ok(ScanStatus::Cancelled) => outcome = Outcome::Cancelled,
            Ok(_) => {}
            Err(e) => {
                log::error!("{} pipeline failed: {}", pipeline, e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(outcome),
    }
}

fn print_record(record: &ClassProbeRecord, format: OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", record.to_line()),
        OutputFormat::Json => match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to serialize record for {}: {}", record.clsid, e),
        },
    }
}

fn print_module_summary(summary: &ModuleScanSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Text => {
            println!();
            println!("=== Module Scan Complete ===");
            println!("Scan ID:         {}", summary.scan_id);
            println!("Status:          {:?}", summary.status);
            println!("Candidates:      {}", summary.candidates);
            println!("Inspected:       {}", summary.inspected);
            println!("COM Servers:     {}", summary.com_servers);
            println!("Invalid Images:  {}", summary.invalid_images);
            println!("Walk Errors:     {}", summary.walk_errors);
            if let Some(path) = &summary.output_path {
                println!("Listing:         {}", path.display());
            }
            if let Some(duration) = summary.duration_secs() {
                println!("Duration:        {} seconds", duration);
            }
        }
    }
    Ok(())
}

fn print_class_summary(summary: &ClassScanSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Text => {
            println!();
            println!("=== Class Scan Complete ===");
            println!("Scan ID:         {}", summary.scan_id);
            println!("Status:          {:?}", summary.status);
            println!("CLSIDs:          {}", summary.enumerated);
            println!("Activated:       {}", summary.activated);
            println!("Not Registered:  {}", summary.not_registered);
            println!("No Interface:    {}", summary.no_interface);
            println!("Null Instance:   {}", summary.null_instance);
            println!("Other Errors:    {}", summary.other_errors);
            println!("Probe Failures:  {}", summary.probe_failures);
            if let Some(duration) = summary.duration_secs() {
                println!("Duration:        {} seconds", duration);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct InspectReport {
    path: PathBuf,
    verdict: ModuleVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    exports: Option<Vec<String>>,
}

/// Inspect individual files.
fn run_inspect(paths: &[PathBuf], list_exports: bool, format: OutputFormat) -> Result<()> {
    let reports: Vec<InspectReport> = paths
        .iter()
        .map(|path| {
            let verdict = scanner::inspect(path);
            let exports = if list_exports && verdict != ModuleVerdict::InvalidImage {
                scanner::exported_names(path)
                    .map_err(|e| log::debug!("Cannot list exports of {}: {}", path.display(), e))
                    .ok()
            } else {
                None
            };
            InspectReport {
                path: path.clone(),
                verdict,
                exports,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Text => {
            for report in &reports {
                println!("{}: {}", report.path.display(), report.verdict);
                for name in report.exports.iter().flatten() {
                    println!("    {}", name);
                }
            }
        }
    }
    Ok(())
}

/// Activate a single class.
async fn run_probe(config: &Config, clsid: &str, format: OutputFormat) -> Result<()> {
    let clsid: Clsid = clsid.parse()?;
    let activator = ComActivator::from_config(&config.probe);

    // The apartment belongs to the thread that makes the call
    let status = tokio::task::spawn_blocking(move || {
        activator.activate(&clsid).map(|activation| activation.release())
    })
    .await
    .map_err(|e| Error::Worker(e.to_string()))??;

    let record = ClassProbeRecord {
        clsid,
        status: Some(status),
        error: None,
        registration: None,
    };
    print_record(&record, format);
    Ok(())
}

/// Handle configuration commands.
fn run_config(action: ConfigAction, config: &Config, path: Option<&Path>) -> Result<()> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_config_path);

    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Reset => {
            log::info!("Resetting configuration to defaults...");
            Config::default().save(&path)?;
            println!("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// Show application information.
fn run_info(config: &Config) {
    println!("com-census - COM server inventory");
    println!();
    println!("Version:          {}", env!("CARGO_PKG_VERSION"));
    println!("Config Path:      {}", Config::default_config_path().display());
    println!("Data Directory:   {}", Config::data_dir().display());
    println!("Log Directory:    {}", config.logging.log_dir().display());
    println!(
        "COM Activation:   {}",
        if cfg!(target_os = "windows") {
            "available"
        } else {
            "unavailable on this platform"
        }
    );
    println!();
    println!("Module Scan Settings:");
    println!("  Roots:          {:?}", config.scan.roots);
    println!("  Extensions:     {:?}", config.scan.extensions);
    println!("  Max Image Size: {} MB", config.scan.max_image_size_mb);
    println!("  Threads:        {}", config.scan.scan_threads);
    println!("  Output File:    {}", config.scan.output_file.display());
    println!();
    println!("Class Scan Settings:");
    println!("  Class Root:     {}", config.probe.class_root_path());
    println!("  Contexts:       {:?}", config.probe.contexts);
}
