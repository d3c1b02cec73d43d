//! rtskb - Real-time socket buffer pool simulator
//!
//! Usage:
//!   rtskb [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>      Configuration file path
//!   -g, --global-rtskbs <N>  Buffers in the global pool (default: 32)
//!   --cache-size <N>         Buffers in the reserve cache (default: 16)
//!   -d, --duration <TIME>    How long to run (default: 5s)
//!   --no-capture             Disable the capture consumer
//!   --json                   Print the report as JSON
//!   -l, --log-level          Log level (error, warn, info, debug, trace)
//!   -h, --help               Print help

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rtskb::capture::{CaptureSink, ChannelCapture};
use rtskb::config::Config;
use rtskb::sim::{self, CaptureTap, SimReport};
use rtskb::{Metrics, MetricsServer, SkbAllocator};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// rtskb - Real-time socket buffer pools
#[derive(Parser, Debug)]
#[command(name = "rtskb")]
#[command(version)]
#[command(about = "Real-time socket buffer pool allocator and workload simulator")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Buffers in the global pool
    #[arg(short, long)]
    global_rtskbs: Option<usize>,

    /// Buffers in the reserve cache for real-time pool creation
    #[arg(long)]
    cache_size: Option<usize>,

    /// Simulation duration (e.g. "500ms", "10s")
    #[arg(short, long, value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Run without the capture consumer
    #[arg(long)]
    no_capture: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus env overrides
    let loaded = match &args.config {
        Some(config_path) => Config::load(config_path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (warn)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(n) = args.global_rtskbs {
        config.pools.global_rtskbs = n;
    }
    if let Some(n) = args.cache_size {
        config.pools.cache_size = n;
    }
    if let Some(d) = args.duration {
        config.sim.duration = d;
    }
    if args.no_capture {
        config.sim.capture = false;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("Starting rtskb simulator");
    info!("  Global pool: {} buffers", config.pools.global_rtskbs);
    info!("  Reserve cache: {} buffers", config.pools.cache_size);
    info!(
        "  Arena: {} buffers, {} pools",
        config.pools.max_buffers, config.pools.max_pools
    );
    info!("  Duration: {:?}", config.sim.duration);

    // Build the allocator, with a capture channel if enabled
    let (allocator, tap) = if config.sim.capture {
        let (sink, rx) = ChannelCapture::bounded(config.sim.capture_depth);
        let sink = Arc::new(sink);
        let dyn_sink: Arc<dyn CaptureSink> = sink.clone();
        let allocator = SkbAllocator::with_capture(&config.pools, dyn_sink)?;
        info!("  Capture: enabled (depth {})", config.sim.capture_depth);
        (allocator, Some(CaptureTap { sink, rx }))
    } else {
        info!("  Capture: disabled");
        (SkbAllocator::new(&config.pools)?, None)
    };

    // Setup metrics if configured
    if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new());
        info!("  Metrics: enabled ({})", config.metrics.scrape_url());

        let metrics_server = MetricsServer::new(metrics, allocator.clone(), config.metrics.bind);
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run().await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    } else {
        info!("  Metrics: disabled");
    }

    // The simulator runs its own OS threads; keep it off the runtime workers
    let sim_allocator = allocator.clone();
    let sim_config = config.sim.clone();
    let report = tokio::task::spawn_blocking(move || sim::run(&sim_allocator, &sim_config, tap))
        .await??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    allocator.shutdown();

    if !report.balanced || report.allocator.balance_violations > 0 {
        std::process::exit(2);
    }
    Ok(())
}

fn print_report(report: &SimReport) {
    let d = &report.driver;
    let s = &report.stack;
    let c = &report.calibration;
    let a = &report.allocator;

    println!("elapsed           {:?}", report.elapsed);
    println!(
        "rx                {} received, {} no buffer, {} backlog",
        d.received, d.dropped_no_buffer, d.dropped_backlog
    );
    println!(
        "stack             {} delivered, {} socket drops, {} malformed",
        s.delivered, s.socket_dropped, s.malformed
    );
    println!("clone             {} ok, {} failed", s.cloned, s.clone_failures);
    println!(
        "tx                {} chains, {} failed, {} completed",
        s.tx_chains, s.tx_failures, d.tx_completed
    );
    println!(
        "calibration       {} cycles, {} short, {} skipped",
        c.cycles, c.shortfalls, c.skipped
    );
    if let Some(cap) = &report.capture {
        println!(
            "capture           {} frames ({} bytes), {} dropped, {} share failures",
            cap.captured, cap.bytes, cap.dropped, s.share_failures
        );
    }
    println!(
        "pools             {} live, {} max",
        a.pools_live, a.pools_live_max
    );
    println!(
        "buffers           {} live, {} max, {} cached, {} vacant",
        a.buffers_live, a.buffers_live_max, a.cache_free, a.arena_vacant
    );
    println!(
        "failures          {} alloc, {} balance",
        a.alloc_failures, a.balance_violations
    );
    println!(
        "balanced          {}",
        if report.balanced { "yes" } else { "NO" }
    );
}
