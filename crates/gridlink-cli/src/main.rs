//! `gridlink-cli` – obstacle telemetry bridge
//!
//! This binary wires a perception source to a MAVLink link:
//!
//! 1. Loads `~/.gridlink/config.toml` (or `$GRIDLINK_CONFIG`), applies the
//!    `GRIDLINK_*` overrides and validates the result.
//! 2. Opens the perception source and reads its calibration.
//! 3. Opens the telemetry link and starts the heartbeat and obstacle tasks.
//! 4. Starts the ingest thread and runs until Ctrl-C or the end of the
//!    perception stream, then shuts everything down with a bounded wait.
//!
//! `gridlink init` writes the default configuration file.

mod config;

use colored::Colorize;
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use gridlink_hal::{PerceptionDevice, ReplayDevice, SimDevice};
use gridlink_middleware::{LogLink, SerialLink, TelemetryLink, UdpLink};
use gridlink_runtime::{IngestStats, ObstacleService};
use gridlink_types::{GridError, GridlinkConfig, LinkConfig, LinkKind, SourceKind, period_from_rate};

/// Bounded wait for each task during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() {
    // Tracing first: the OTLP exporter must exist before any runtime.
    let otel_guard = gridlink_runtime::init_tracing("gridlink");
    info!(otlp = otel_guard.is_exporting(), "tracing initialised");

    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());
    let code = match command.as_str() {
        "run" => {
            print_banner();
            report(run())
        }
        "init" => report(init()),
        "help" | "-h" | "--help" => {
            print_usage();
            0
        }
        other => {
            println!("{}: unknown command '{}'", "Error".red(), other);
            print_usage();
            2
        }
    };

    // `process::exit` skips destructors; flush pending spans first.
    drop(otel_guard);
    std::process::exit(code);
}

fn report(result: Result<(), GridError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "gridlink failed");
            println!("{} {}", "✗".red().bold(), e.to_string().red());
            1
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn init() -> Result<(), GridError> {
    let path = config::config_path();
    let force = std::env::args().skip(2).any(|a| a == "--force");
    if path.exists() && !force {
        println!(
            "  Config already exists at {} (use {} to overwrite)",
            path.display().to_string().bold(),
            "--force".bold()
        );
        return Ok(());
    }
    config::save_to(&GridlinkConfig::default(), &path).map_err(GridError::Config)?;
    println!(
        "  {} Default config written to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

fn run() -> Result<(), GridError> {
    let cfg = config::load().map_err(GridError::Config)?;
    cfg.validate()?;
    println!(
        "  Config: {}",
        config::config_path().display().to_string().dimmed()
    );

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – initiating graceful shutdown …".yellow().bold());
        interrupted_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Perception source ─────────────────────────────────────────────────
    let mut device = open_device(&cfg)?;
    let calibration = device.calibration()?;
    info!(
        device = device.id(),
        lens_position = calibration.lens_position,
        has_intrinsics = calibration.intrinsic_matrix.is_some(),
        hfov_deg = ?calibration.hfov_deg,
        "perception source ready"
    );
    println!("  Source: {} ({})", device.id().bold(), cfg.source.kind);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("gridlink-worker")
        .build()
        .map_err(|e| GridError::Config(format!("cannot build tokio runtime: {e}")))?;

    let (clean, ingest_thread) = runtime.block_on(async {
        let link = open_link(&cfg.link).await?;
        println!("  Link:   {}", link.name().bold());

        let service = ObstacleService::new(cfg.clone(), &calibration, link)?;
        let ingest = service.ingest(device)?;
        let shutdown = service.shutdown_flag();
        let running = service.start()?;
        let ingest_thread = ingest.spawn()?;

        println!(
            "  {} Streaming obstacles. Press {} to stop.\n",
            "✓".green().bold(),
            "Ctrl-C".bold()
        );

        while !interrupted.load(Ordering::SeqCst) && !shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok::<_, GridError>((running.shutdown(SHUTDOWN_GRACE).await, ingest_thread))
    })?;

    let stats = join_ingest(ingest_thread, SHUTDOWN_GRACE);
    runtime.shutdown_timeout(Duration::from_secs(1));

    if let Some(stats) = stats {
        info!(
            frames = stats.frames,
            published = stats.published,
            dropped = stats.dropped,
            "ingest joined"
        );
    }
    if clean {
        println!("{}", "  ✓ Exiting gridlink.".green());
    } else {
        println!("{}", "  ⚠ Some tasks had to be aborted.".yellow());
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring helpers
// ─────────────────────────────────────────────────────────────────────────────

fn open_device(cfg: &GridlinkConfig) -> Result<Box<dyn PerceptionDevice>, GridError> {
    match cfg.source.kind {
        SourceKind::Sim => {
            let sim = SimDevice::new(&cfg.grid, cfg.source.sim_rate_hz);
            if cfg.source.sim_mask_depth {
                Ok(Box::new(sim.with_mask_depth()))
            } else {
                Ok(Box::new(sim))
            }
        }
        SourceKind::Replay => {
            let period = cfg
                .source
                .replay_rate_hz
                .map(|rate| period_from_rate(rate, "replay_rate_hz"))
                .transpose()?;
            match &cfg.source.path {
                Some(path) => Ok(Box::new(paced(ReplayDevice::open(path)?, period))),
                None => Ok(Box::new(paced(ReplayDevice::stdin(), period))),
            }
        }
    }
}

fn paced<R: BufRead + Send>(device: ReplayDevice<R>, period: Option<Duration>) -> ReplayDevice<R> {
    match period {
        Some(period) => device.with_frame_period(period),
        None => device,
    }
}

async fn open_link(cfg: &LinkConfig) -> Result<Arc<dyn TelemetryLink>, GridError> {
    Ok(match cfg.kind {
        LinkKind::Serial => Arc::new(SerialLink::open(cfg.device.as_str(), cfg.baud_rate)),
        LinkKind::Udp => Arc::new(UdpLink::connect(&cfg.udp_target).await?),
        LinkKind::Log => Arc::new(LogLink::new()),
    })
}

/// Join the ingest thread if it finishes within `grace`.
///
/// A thread blocked on a device read (e.g. stdin) is left behind; the
/// process exits shortly after.
fn join_ingest(handle: JoinHandle<IngestStats>, grace: Duration) -> Option<IngestStats> {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(grace_ms = grace.as_millis() as u64, "ingest thread still blocked; leaving it");
            return None;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    match handle.join() {
        Ok(stats) => Some(stats),
        Err(_) => {
            warn!("ingest thread panicked");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____      _     _ _ _       _    "#.bold().cyan());
    println!("{}", r#"  / ___|_ __(_) __| | (_)_ __ | | __"#.bold().cyan());
    println!("{}", r#" | |  _| '__| |/ _` | | | '_ \| |/ /"#.bold().cyan());
    println!("{}", r#" | |_| | |  | | (_| | | | | | |   < "#.bold().cyan());
    println!("{}", r#"  \____|_|  |_|\__,_|_|_|_| |_|_|\_\"#.bold().cyan());
    println!();
    println!("  {} {}",
        "gridlink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Obstacle grid to MAVLink bridge");
    println!();
}

fn print_usage() {
    println!("Usage: gridlink [run|init [--force]]");
    println!();
    println!("  {}   stream obstacles from the configured source (default)", "run".bold());
    println!("  {}  write the default config to {}", "init".bold(), config::config_path().display());
}
