use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use libvds_merger::config::Config;
use libvds_merger::process::{calibrate_file, create_subsets, process_run, process_subset};
use libvds_merger::worker_status::{BarColor, WorkerStatus};

const LOG_FILE: &str = "vds_merger.log";

fn make_template_config(path: &Path) {
    let config = Config::default();
    match config.write_config_file(path) {
        Ok(()) => log::info!("Done."),
        Err(e) => log::error!("Could not write template config: {e}"),
    }
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let template = match color {
        BarColor::CYAN => "{prefix:>12} [{bar:40.cyan/blue}] {pos:>3}% {msg}",
        BarColor::MAGENTA => "{prefix:>12} [{bar:40.magenta/blue}] {pos:>3}% {msg}",
        BarColor::GREEN => "{prefix:>12} [{bar:40.green/blue}] {pos:>3}% {msg}",
        BarColor::RED => "{prefix:>12} [{bar:40.red/blue}] {pos:>3}% {msg}",
    };
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn update_bar(bar: &ProgressBar, status: &WorkerStatus) {
    bar.set_style(bar_style(&status.color));
    bar.set_message(format!("run {} {}", status.run_number, status.stage));
    bar.set_position((status.progress * 100.0) as u64);
}

fn load_config(config_path: &Path) -> Option<Config> {
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return None;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Base Path: {}", config.base_path.to_string_lossy());
    log::info!("Output Path: {}", config.out_path.to_string_lossy());
    match config.dark_path.as_ref() {
        Some(p) => log::info!("Dark Path: {}", p.to_string_lossy()),
        None => log::info!("Dark Path: None"),
    }
    log::info!("Modules: {:?}", config.modules);
    log::info!("Pulse IDs: {:?}", config.pulse_ids);
    log::info!("Stream: {}", config.tag());
    log::info!(
        "First Run: {} Last Run: {}",
        config.first_run_number,
        config.last_run_number
    );
    Some(config)
}

/// Build a single run on the main thread
fn run_single(config: Config, matches: &ArgMatches, pb_manager: &MultiProgress) {
    let run_number = match matches.get_one::<i32>("run") {
        Some(r) => *r,
        None => {
            log::error!("A run number is required");
            return;
        }
    };
    let mut config = config;
    if matches.get_flag("calib") {
        config.calibrate = true;
    }

    let pb = pb_manager.add(ProgressBar::new(100));
    pb.set_prefix("worker 0");
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let handle = std::thread::spawn(move || process_run(&config, run_number, &tx, &0));
    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(status) => update_bar(&pb, &status),
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    pb.finish();

    match handle.join() {
        Ok(Ok(path)) => log::info!("Successfully wrote {}", path.display()),
        Ok(Err(e)) => log::error!("Run {run_number} failed with error: {e}"),
        Err(_) => log::error!("Failed to join processing task!"),
    }
}

/// Build the whole run range, one worker thread per subset
fn run_batch(config: Config, pb_manager: &MultiProgress) {
    if !config.is_n_threads_valid() {
        log::error!("n_threads must be at least 1, got {}", config.n_threads);
        return;
    }
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut bars = Vec::new();
    let mut workers = Vec::new();
    for (idx, subset) in create_subsets(&config).into_iter().enumerate() {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let pb = pb_manager.add(ProgressBar::new(100));
        pb.set_prefix(format!("worker {idx}"));
        bars.push((idx, pb));
        let conf = config.clone();
        let tx = tx.clone();
        workers.push(std::thread::spawn(move || process_subset(conf, tx, idx, subset)));
    }
    // Only the workers hold senders now
    drop(tx);

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(status) => {
                if let Some((_, pb)) = bars.iter().find(|(id, _)| *id == status.worker_id) {
                    update_bar(pb, &status);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    for (_, pb) in bars.iter() {
        pb.finish();
    }

    let mut failed: Vec<i32> = Vec::new();
    for worker in workers {
        match worker.join() {
            Ok(Ok(runs)) => failed.extend(runs),
            Ok(Err(e)) => log::error!("Processor error: {e}"),
            Err(_) => log::error!("An error occured joining one of the workers!"),
        }
    }
    if failed.is_empty() {
        log::info!("Successfully processed all runs!");
    } else {
        failed.sort();
        log::warn!("Some runs failed, check {LOG_FILE} for details: {failed:?}");
    }
}

fn run_calibration(config: Config, matches: &ArgMatches) {
    let hdf_path = match matches.get_one::<String>("file") {
        Some(f) => PathBuf::from(f),
        None => {
            log::error!("A consolidated file is required");
            return;
        }
    };
    let dark_path = match config.dark_file() {
        Ok(Some(p)) => p,
        Ok(None) => {
            log::error!("No dark_path is configured");
            return;
        }
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    match calibrate_file(&hdf_path, &dark_path, &config) {
        Ok(()) => log::info!("Successfully calibrated {}", hdf_path.display()),
        Err(e) => log::error!("Calibration failed with error: {e}"),
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("vds_merger_cli")
        .arg_required_else_help(true)
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .help("Path to the configuration file"),
        )
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("run")
                .about("Build the consolidated file of a single run")
                .arg(
                    Arg::new("run")
                        .required(true)
                        .value_parser(value_parser!(i32))
                        .help("Run number"),
                )
                .arg(
                    Arg::new("calib")
                        .long("calib")
                        .action(ArgAction::SetTrue)
                        .help("Calibrate the run after building it"),
                ),
        )
        .subcommand(Command::new("batch").about("Build every run of the configured range"))
        .subcommand(
            Command::new("calibrate")
                .about("Calibrate an existing consolidated file")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .help("Path to the consolidated file"),
                ),
        )
        .get_matches();

    // Initialize feedback
    let term_logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = Vec::new();
    loggers.push(term_logger);
    match File::create(LOG_FILE) {
        Ok(file) => loggers.push(simplelog::WriteLogger::new(
            simplelog::LevelFilter::Info,
            simplelog::Config::default(),
            file,
        )),
        Err(e) => eprintln!("Could not create log file {LOG_FILE}: {e}"),
    }
    let logger = simplelog::CombinedLogger::new(loggers);

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");
    log::set_max_level(log::LevelFilter::Info);

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => {
            log::error!("A configuration path is required (-p/--path)");
            return;
        }
    };

    match matches.subcommand() {
        Some(("new", _)) => {
            log::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );
            make_template_config(&config_path);
        }
        Some(("run", sub)) => {
            if let Some(config) = load_config(&config_path) {
                run_single(config, sub, &pb_manager);
            }
        }
        Some(("batch", _)) => {
            if let Some(config) = load_config(&config_path) {
                run_batch(config, &pb_manager);
            }
        }
        Some(("calibrate", sub)) => {
            if let Some(config) = load_config(&config_path) {
                run_calibration(config, sub);
            }
        }
        _ => log::error!("Unrecognized command"),
    }

    log::info!("Done.");
}
