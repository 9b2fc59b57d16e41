use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use vision_gate::config::{ProductMode, StationConfig};
use vision_gate::detection::{ContourModelLoader, ModelCache};
use vision_gate::serial::{ProductCodeReader, ReaderSettings, RetryPolicy, SerialConnector, SerialOutput};
use vision_gate::report::AnnotatedImageWriter;
use vision_gate::{CameraTable, ConsoleDisplay, CsvRuleStore, ProfileManager, ResultLog, Station, StationSettings};

#[derive(Parser)]
#[command(name = "vision-gate")]
#[command(about = "Multi-camera visual inspection station with serial OK/NG output")]
struct Cli {
    /// Station configuration file
    #[arg(long, value_name = "FILE", default_value = "config/config.toml")]
    config: PathBuf,

    /// Inspect this product code (forces static mode)
    #[arg(long, value_name = "CODE")]
    product: Option<String>,

    /// Do not send verdicts over the serial port
    #[arg(long)]
    no_serial: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Console output plus an append-only `processing.log` in `log_dir`.
fn init_logging(log_dir: &Path, verbose: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    std::fs::create_dir_all(log_dir)?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("processing.log"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let loaded = StationConfig::read(&args.config)?;
    let from_file = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    if let Some(code) = args.product {
        config.product.mode = ProductMode::Static;
        config.product.code = code;
    }
    if args.no_serial {
        config.serial_output.enabled = false;
    }

    init_logging(&config.paths.log_dir, args.verbose)?;
    info!("vision-gate starting ({})", args.config.display());
    StationConfig::log_source(&args.config, from_file);
    info!(
        "product mode: {:?}, rules: {}",
        config.product.mode, config.product.rules_path
    );

    let cameras = CameraTable::load(&config.camera.config_csv, config.camera.create_folders)?;
    let profiles = ProfileManager::new(
        config.product.mode,
        config.product.code.clone(),
        config.product.default_code.clone(),
        Box::new(CsvRuleStore::new(config.product.rules_path.clone())),
        cameras,
    );

    let out = &config.serial_output;
    let mut output = SerialOutput::new(
        Box::new(SerialConnector::new(
            out.port.clone(),
            out.baud_rate,
            Duration::from_millis(out.timeout_ms),
        )),
        RetryPolicy {
            retries: out.retry_count,
            delay: config.retry_delay(),
        },
        out.enabled,
    )
    .with_disable_on_connect_failure(out.disable_on_connect_failure);
    if output.try_connect() {
        info!("serial output ready on {}", out.port);
    }

    let input = match config.product.mode {
        ProductMode::Static => None,
        ProductMode::Live => {
            let inp = &config.serial_input;
            Some(ProductCodeReader::new(
                Box::new(SerialConnector::new(
                    inp.port.clone(),
                    inp.baud_rate,
                    Duration::from_millis(inp.timeout_ms),
                )),
                ReaderSettings {
                    poll_interval: Duration::from_millis(inp.poll_interval_ms),
                    reconnect_backoff: Duration::from_millis(inp.reconnect_backoff_ms),
                    stop_timeout: Duration::from_millis(inp.stop_timeout_ms),
                    history: inp.history,
                },
            ))
        }
    };

    let display = ConsoleDisplay::new(config.display.max_history)
        .with_quiet(!config.display.enabled)
        .with_interrupt_handler();
    let models = ModelCache::new(Box::new(ContourModelLoader::new(config.models.dir.clone())));
    let results = ResultLog::new(&config.paths.output_dir)?;
    let annotations = if config.paths.save_annotated {
        Some(AnnotatedImageWriter::new(&config.paths.output_dir)?)
    } else {
        None
    };

    let settings = StationSettings {
        display_wait: config.display_wait(),
        cleanup_temp: config.camera.cleanup_temp,
    };
    let station = match Station::new(settings, profiles, models, Box::new(display), output, input) {
        Ok(station) => {
            let station = station.with_result_log(results);
            match annotations {
                Some(writer) => station.with_annotated_images(writer),
                None => station,
            }
        }
        Err(e) => {
            error!("cannot start: {}", e);
            return Err(e.into());
        }
    };

    info!("press Ctrl+C to stop");
    let batches = station.run();
    info!("vision-gate stopped after {} batches", batches);
    Ok(())
}
