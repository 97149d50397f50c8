use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use super::alignment::align;
use super::calibrator::{calibrate, ComposedFrames};
use super::catalog::SourceCatalog;
use super::composer::compose;
use super::config::Config;
use super::dark::DarkFile;
use super::error::{CalibratorError, ProcessorError};
use super::hdf_writer::{write_calibration, HDFWriter};
use super::worker_status::{Stage, WorkerStatus};

/// Apply the dark calibration to an already consolidated file.
///
/// The composed datasets are only read; results land in their own group.
pub fn calibrate_file(
    hdf_path: &Path,
    dark_path: &Path,
    config: &Config,
) -> Result<(), CalibratorError> {
    log::info!("Calibrating {}...", hdf_path.display());
    let frames = ComposedFrames::read(hdf_path)?;
    let dark = DarkFile::open(dark_path, config.module_shape[0], config.mask_inverted)?;
    let result = calibrate(&frames, &dark)?;
    write_calibration(hdf_path, &result)?;
    Ok(())
}

/// Calibrate a freshly composed run. Failures are logged and never invalidate the composed file.
fn calibrate_run(config: &Config, hdf_path: &Path) {
    let dark_path = match config.dark_file() {
        Ok(Some(path)) => path,
        Ok(None) => {
            log::warn!("Calibration requested but no dark_path is configured, skipping");
            return;
        }
        Err(e) => {
            log::error!("Could not access the dark reference: {e}");
            return;
        }
    };
    if let Err(e) = calibrate_file(hdf_path, &dark_path, config) {
        log::error!("Calibration of {} failed: {e}", hdf_path.display());
        log::warn!("The composed data of {} is left uncalibrated", hdf_path.display());
    }
}

/// The main loop of vds_merger.
///
/// Discovers the source files of a run, aligns them, writes the consolidated virtual file
/// and optionally calibrates it. Returns the path of the written file.
pub fn process_run(
    config: &Config,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<PathBuf, ProcessorError> {
    tx.send(WorkerStatus::new(0.0, run_number, *worker_id, Stage::Aligning))?;
    let mask = config.module_mask()?;
    let run_dir = config.run_directory(run_number);
    log::info!("Reading run {run_number} from {}", run_dir.display());
    let catalog = SourceCatalog::new(&run_dir, run_number);
    let streams = catalog.open_run(&mask, config.auxiliary_ids())?;
    tx.send(WorkerStatus::new(0.5, run_number, *worker_id, Stage::Aligning))?;

    let alignment = align(run_number, &streams, &mask, &config.pulse_ids)?;
    tx.send(WorkerStatus::new(0.0, run_number, *worker_id, Stage::Composing))?;

    let composed = compose(&streams, &alignment, config.module_shape)?;
    tx.send(WorkerStatus::new(0.5, run_number, *worker_id, Stage::Composing))?;

    let hdf_path = config.hdf_file_name(run_number)?;
    let mut writer = HDFWriter::new(&hdf_path)?;
    writer.write_run_info(run_number, config.tag(), alignment.trains.as_slice())?;
    writer.write_composed(&composed)?;
    writer.close()?;
    tx.send(WorkerStatus::new(1.0, run_number, *worker_id, Stage::Composing))?;

    if config.calibrate {
        if composed.primary.is_some() {
            tx.send(WorkerStatus::new(0.0, run_number, *worker_id, Stage::Calibrating))?;
            calibrate_run(config, &hdf_path);
            tx.send(WorkerStatus::new(1.0, run_number, *worker_id, Stage::Calibrating))?;
        } else {
            log::warn!("Run {run_number} has no AGIPD data, skipping calibration");
        }
    }
    Ok(hdf_path)
}

/// The function to be called by a separate thread (typically the UI).
/// Processes the full run range of the config on one worker
/// Returns the runs which failed
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<Vec<i32>, ProcessorError> {
    let runs: Vec<i32> = (config.first_run_number..(config.last_run_number + 1)).collect();
    process_subset(config, tx, worker_id, runs)
}

/// Process a subset of runs.
///
/// A failing run is logged and skipped; the failed run numbers are returned. Only a closed
/// status channel stops the worker.
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<i32>,
) -> Result<Vec<i32>, ProcessorError> {
    let mut failed = Vec::new();
    for run in subset {
        log::info!("Processing run {}...", run);
        match process_run(&config, run, &tx, &worker_id) {
            Ok(path) => log::info!("Finished processing run {} into {}.", run, path.display()),
            Err(ProcessorError::SendError(e)) => return Err(ProcessorError::SendError(e)),
            Err(e) => {
                log::error!("Run {} failed: {}", run, e);
                tx.send(WorkerStatus::new(1.0, run, worker_id, Stage::Failed))?;
                failed.push(run);
            }
        }
    }
    Ok(failed)
}

/// Divide a run range in to a set of subranges (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<i32>> {
    let mut subsets: Vec<Vec<i32>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for (idx, run) in (config.first_run_number..(config.last_run_number + 1)).enumerate() {
        subsets[idx % n_subsets].push(run)
    }

    subsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_create_subsets_round_robin() {
        let config = Config {
            first_run_number: 10,
            last_run_number: 16,
            n_threads: 3,
            ..Default::default()
        };
        assert_eq!(
            create_subsets(&config),
            vec![vec![10, 13, 16], vec![11, 14], vec![12, 15]]
        );
    }

    #[test]
    fn test_missing_runs_fail_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            base_path: dir.path().join("base"),
            out_path: dir.path().join("out"),
            first_run_number: 1,
            last_run_number: 3,
            ..Default::default()
        };
        let (tx, rx) = channel();
        let failed = process(config, tx, 0).unwrap();
        assert_eq!(failed, vec![1, 2, 3]);
        let failures = rx
            .try_iter()
            .filter(|status| status.stage == Stage::Failed)
            .count();
        assert_eq!(failures, 3);
    }
}
