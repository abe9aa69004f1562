//! Fatigue Sensor Agent CLI
//!
//! Contentless interaction logging and feature extraction for fatigue research.

use chrono::Local;
use clap::{Parser, Subcommand};
use fatigue_sensor_agent::{
    capture::{raw_log_path, CaptureLogger},
    collector::{check_permission, now_ms, Collector, CollectorConfig},
    config::Config,
    core::{
        extract_features, fill_and_clip, latest_feature_table, latest_raw_file,
        read_event_log, read_feature_table, write_feature_table, write_normalized_table,
        ZScoreStats,
    },
    labels::{
        append_label, build_dataset, fill_label_gaps, last_label_end, load_labels,
        write_dataset_file, LabelRange, DEFAULT_LABEL_SPAN_MIN,
    },
    transparency::{create_shared_stats, stats_path, CaptureStatsSnapshot},
    PRIVACY_DECLARATION, VERSION,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fatigue-sensor")]
#[command(version = VERSION)]
#[command(about = "Contentless keyboard and mouse logging for fatigue research", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture keyboard and mouse events until Ctrl+C
    Capture {
        /// Input sources to capture (keyboard, mouse, or all); defaults to the config file
        #[arg(long)]
        sources: Option<String>,

        /// Seconds between background flushes
        #[arg(long)]
        flush_interval: Option<u64>,

        /// Maximum events held in memory between flushes
        #[arg(long)]
        buffer_capacity: Option<usize>,
    },

    /// Turn a raw event log into a feature table
    Features {
        /// Raw log to read (defaults to the most recent one)
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Window width in milliseconds
        #[arg(long)]
        window_ms: Option<i64>,

        /// Also write a z-score normalized table and its statistics
        #[arg(long)]
        zscore: bool,
    },

    /// Record a fatigue score for the last few minutes
    Label {
        /// Fatigue score to record
        #[arg(long)]
        score: f64,

        /// Minutes the score applies to, ending now
        #[arg(long, default_value_t = DEFAULT_LABEL_SPAN_MIN)]
        span_min: i64,

        /// Cover everything since the end of the last label instead
        #[arg(long)]
        since_last: bool,
    },

    /// Close the gaps between consecutive label ranges
    FillLabels {
        /// Labels file (defaults to the configured one)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Join a feature table with the labels into a training dataset
    Dataset {
        /// Feature table (defaults to the most recent one)
        #[arg(long)]
        features: Option<PathBuf>,

        /// Labels file (defaults to the configured one)
        #[arg(long)]
        labels: Option<PathBuf>,
    },

    /// Show permission, configuration and last-run statistics
    Status,

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config ({e}), using defaults");
            Config::default()
        }
    };

    match cli.command {
        Commands::Capture {
            sources,
            flush_interval,
            buffer_capacity,
        } => {
            cmd_capture(config, sources.as_deref(), flush_interval, buffer_capacity);
        }
        Commands::Features {
            input,
            window_ms,
            zscore,
        } => {
            cmd_features(config, input, window_ms, zscore);
        }
        Commands::Label {
            score,
            span_min,
            since_last,
        } => {
            cmd_label(&config, score, span_min, since_last);
        }
        Commands::FillLabels { file } => {
            cmd_fill_labels(&config, file);
        }
        Commands::Dataset { features, labels } => {
            cmd_dataset(&config, features, labels);
        }
        Commands::Status => {
            cmd_status(&config);
        }
        Commands::Privacy => {
            cmd_privacy();
        }
        Commands::Config => {
            cmd_config(&config);
        }
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn cmd_capture(
    mut config: Config,
    sources: Option<&str>,
    flush_interval: Option<u64>,
    buffer_capacity: Option<usize>,
) {
    println!("Fatigue Sensor Agent v{VERSION}");
    println!();

    // Check for Input Monitoring permission
    if !check_permission() {
        eprintln!("Error: Input Monitoring permission not granted.");
        eprintln!();
        eprintln!("To grant permission:");
        eprintln!("1. Open System Settings > Privacy & Security");
        eprintln!("2. Select 'Input Monitoring'");
        eprintln!("3. Add this application to the allowed list");
        eprintln!("4. Restart the application");
        std::process::exit(1);
    }

    let source_config = config.sources_with_override(sources);
    if !source_config.any_enabled() {
        fail("At least one source must be enabled (keyboard or mouse)");
    }

    if let Some(secs) = flush_interval {
        config.flush_interval = Duration::from_secs(secs);
    }
    if let Some(capacity) = buffer_capacity {
        config.buffer_capacity = capacity;
    }
    let settings = match config.capture_settings() {
        Ok(settings) => settings,
        Err(e) => fail(e),
    };

    if let Err(e) = config.ensure_directories() {
        fail(format!("Could not create data directories: {e}"));
    }

    let stats = create_shared_stats();
    let log_path = raw_log_path(&config.raw_dir());
    let logger =
        match CaptureLogger::with_log_file(settings, &log_path, stats.clone()) {
            Ok(logger) => logger,
            Err(e) => fail(format!("Could not open {}: {e}", log_path.display())),
        };

    println!("Starting capture...");
    println!(
        "  Keyboard: {}",
        if source_config.keyboard {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  Mouse: {}",
        if source_config.mouse {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Flush interval: {}s", config.flush_interval.as_secs());
    println!("  Buffer capacity: {}", config.buffer_capacity);
    println!("  Log file: {}", log_path.display());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let stop = logger.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || stop.request_stop()) {
        fail(format!("Could not install Ctrl+C handler: {e}"));
    }

    let mut collector = Collector::new(CollectorConfig {
        capture_keyboard: source_config.keyboard,
        capture_mouse: source_config.mouse,
        ..CollectorConfig::default()
    });

    let result = logger.run(&mut collector);

    println!();
    println!("{}", stats.summary());

    if let Err(e) = stats.save(&stats_path(&config.data_path)) {
        eprintln!("Warning: Could not save capture statistics: {e}");
    }

    match result {
        Ok(()) => println!("Events written to {}", log_path.display()),
        Err(e) => fail(e),
    }
}

fn cmd_features(mut config: Config, input: Option<PathBuf>, window_ms: Option<i64>, zscore: bool) {
    let input = match input.map(Ok).unwrap_or_else(|| latest_raw_file(&config.raw_dir())) {
        Ok(path) => path,
        Err(e) => fail(e),
    };

    if let Some(width) = window_ms {
        config.window_width_ms = width;
    }
    let assigner = match config.window_assigner() {
        Ok(assigner) => assigner,
        Err(e) => fail(e),
    };
    let aggregator = match config.feature_aggregator() {
        Ok(aggregator) => aggregator,
        Err(e) => fail(e),
    };

    let log = match read_event_log(&input) {
        Ok(log) => log,
        Err(e) => fail(format!("Could not read {}: {e}", input.display())),
    };
    println!(
        "Read {} events from {}",
        log.events.len(),
        input.display()
    );
    if log.skipped_lines > 0 {
        println!("  Skipped {} malformed lines", log.skipped_lines);
    }

    let features = match extract_features(&log.events, &assigner, &aggregator) {
        Ok(features) => fill_and_clip(&features),
        Err(e) => fail(e),
    };

    let stamp = Local::now().format("%Y-%m-%dT%H-%M-%S").to_string();
    let output = config.features_dir().join(format!("features_{stamp}.csv"));
    if let Err(e) = write_feature_table(&output, &features) {
        fail(format!("Could not write {}: {e}", output.display()));
    }
    println!("Wrote {} windows to {}", features.len(), output.display());

    if zscore {
        let Some(stats) = ZScoreStats::fit(&features) else {
            println!("No windows to normalize.");
            return;
        };
        let normalized = config.features_dir().join(format!("normalized_{stamp}.csv"));
        if let Err(e) = write_normalized_table(&normalized, &stats.apply_all(&features)) {
            fail(format!("Could not write {}: {e}", normalized.display()));
        }
        let stats_file = config.features_dir().join(format!("zscore_{stamp}.json"));
        if let Err(e) = stats.save(&stats_file) {
            fail(format!("Could not write {}: {e}", stats_file.display()));
        }
        println!(
            "Wrote normalized table to {} and statistics to {}",
            normalized.display(),
            stats_file.display()
        );
    }
}

fn cmd_label(config: &Config, score: f64, span_min: i64, since_last: bool) {
    if !score.is_finite() {
        fail("--score must be a finite number");
    }
    if span_min <= 0 {
        fail("--span-min must be positive");
    }

    let path = config.labels_path();
    let label = if since_last {
        match last_label_end(&path) {
            Ok(last_end) => LabelRange::since_last(last_end, now_ms(), span_min, score),
            Err(e) => fail(e),
        }
    } else {
        LabelRange::ending_at(now_ms(), span_min, score)
    };

    if let Err(e) = append_label(&path, &label) {
        fail(format!("Could not write {}: {e}", path.display()));
    }
    let minutes = (label.applies_to - label.applies_from) as f64 / 60_000.0;
    println!(
        "Recorded fatigue score {score} for the last {minutes:.1} minutes in {}",
        path.display()
    );
}

fn cmd_fill_labels(config: &Config, file: Option<PathBuf>) {
    let path = file.unwrap_or_else(|| config.labels_path());
    match fill_label_gaps(&path) {
        Ok(rows) => println!("Filled gaps across {rows} label rows in {}", path.display()),
        Err(e) => fail(e),
    }
}

fn cmd_dataset(config: &Config, features: Option<PathBuf>, labels: Option<PathBuf>) {
    let features_path = match features
        .map(Ok)
        .unwrap_or_else(|| latest_feature_table(&config.features_dir()))
    {
        Ok(path) => path,
        Err(e) => fail(e),
    };
    let labels_path = labels.unwrap_or_else(|| config.labels_path());

    let table = match read_feature_table(&features_path) {
        Ok(table) => table,
        Err(e) => fail(e),
    };
    let labels = match load_labels(&labels_path) {
        Ok(labels) => labels,
        Err(e) => fail(e),
    };

    let rows = match build_dataset(&table, &labels) {
        Ok(rows) => rows,
        Err(e) => fail(e),
    };

    let output = config.datasets_dir().join("train.csv");
    if let Err(e) = write_dataset_file(&output, &rows) {
        fail(format!("Could not write {}: {e}", output.display()));
    }
    println!(
        "Labeled {} of {} windows, wrote {}",
        rows.len(),
        table.len(),
        output.display()
    );
}

fn cmd_status(config: &Config) {
    println!("Fatigue Sensor Agent Status");
    println!("===========================");
    println!();

    let has_permission = check_permission();
    println!(
        "Input Monitoring Permission: {}",
        if has_permission {
            "Granted ✓"
        } else {
            "Not Granted ✗"
        }
    );
    println!();

    println!("Configuration:");
    println!(
        "  Keyboard capture: {}",
        if config.sources.keyboard {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  Mouse capture: {}",
        if config.sources.mouse {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Window width: {}ms", config.window_width_ms);
    println!("  Flush interval: {}s", config.flush_interval.as_secs());
    println!("  Data directory: {}", config.data_path.display());
    println!();

    match latest_raw_file(&config.raw_dir()) {
        Ok(path) => println!("Latest raw log: {}", path.display()),
        Err(_) => println!("No raw logs yet."),
    }

    let stats_file = stats_path(&config.data_path);
    match CaptureStatsSnapshot::load(&stats_file) {
        Ok(stats) => {
            println!();
            println!("Last Capture Run:");
            println!("  Started: {}", stats.session_start.with_timezone(&Local));
            println!("  Duration: {}s", stats.session_duration_secs);
            println!("  Events captured: {}", stats.events_captured());
            println!("  Events written: {}", stats.events_flushed);
            println!("  Events evicted: {}", stats.events_evicted);
            println!("  Failed flushes: {}", stats.persist_failures);
        }
        Err(_) => {
            println!();
            println!("No previous capture run found.");
        }
    }
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}

fn cmd_config(config: &Config) {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).unwrap_or_else(|_| "Error".to_string())
    );
}
