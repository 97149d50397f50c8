use hdf5::{File, Group};
use ndarray::{s, Array1, Array2, Array4, Array5, Ix1, Ix2, Ix4};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;

use libvds_merger::config::Config;
use libvds_merger::constants::{agipd_channel, epix_data_key, GAIN_FACTORS, NUMBER_OF_MODULES};
use libvds_merger::error::{ComposerError, ProcessorError};
use libvds_merger::process::process_run;

const RUN: i32 = 42;
const H: usize = 12;
const W: usize = 2;
const PULSES: u64 = 2;
const SIGNAL: u16 = 20;
const OFFSET: f32 = 5.0;

fn group_at(file: &File, path: &str) -> Group {
    let mut group = file.group("/").unwrap();
    for name in path.split('/').filter(|s| !s.is_empty()) {
        group = match group.group(name) {
            Ok(g) => g,
            Err(_) => group.create_group(name).unwrap(),
        };
    }
    group
}

fn pixel_value(module: usize, train: u64, pulse: u64) -> u16 {
    (module as u64 * 1000 + train * 10 + pulse) as u16
}

/// One AGIPD sequence file. Every pixel of the data plane carries `pixel_value`, the last
/// two pixel rows an additional signal. The gain plane is zero.
fn write_agipd(dir: &Path, module: usize, sequence: usize, trains: &[u64], chunk: Option<usize>) {
    let path = dir.join(format!("RAW-R{RUN:04}-AGIPD{module:02}-S{sequence:05}.h5"));
    let file = File::create(path).unwrap();
    let index = group_at(&file, "INDEX");
    index
        .new_dataset_builder()
        .with_data(trains)
        .create("trainId")
        .unwrap();

    let mut row_trains = Vec::new();
    let mut row_pulses = Vec::new();
    for train in trains {
        for pulse in 0..PULSES {
            row_trains.push(*train);
            row_pulses.push(pulse);
        }
    }
    let rows = row_trains.len();
    let cells: Vec<u16> = row_pulses.iter().map(|p| *p as u16 + 1).collect();
    let mut data = Array4::<u16>::zeros((rows, 2, H, W));
    for row in 0..rows {
        let value = pixel_value(module, row_trains[row], row_pulses[row]);
        data.slice_mut(s![row, 0, .., ..]).fill(value);
        data.slice_mut(s![row, 0, 10.., ..]).fill(value + SIGNAL);
    }

    let channel = agipd_channel(module);
    let header = group_at(&file, &format!("{channel}/header"));
    header
        .new_dataset_builder()
        .with_data(trains)
        .create("trainId")
        .unwrap();
    let image = group_at(&file, &format!("{channel}/image"));
    image
        .new_dataset_builder()
        .with_data(&row_trains)
        .create("trainId")
        .unwrap();
    image
        .new_dataset_builder()
        .with_data(&row_pulses)
        .create("pulseId")
        .unwrap();
    image
        .new_dataset_builder()
        .with_data(&cells)
        .create("cellId")
        .unwrap();
    match chunk {
        Some(c) => image
            .new_dataset_builder()
            .with_data(&data)
            .chunk((c, 2, H, W))
            .create("data")
            .unwrap(),
        None => image
            .new_dataset_builder()
            .with_data(&data)
            .create("data")
            .unwrap(),
    };
}

fn write_epix(dir: &Path, epix: usize, trains: &[u64]) {
    let path = dir.join(format!("RAW-R{RUN:04}-EPIX{epix:02}-S00000.h5"));
    let file = File::create(path).unwrap();
    group_at(&file, "INDEX")
        .new_dataset_builder()
        .with_data(trains)
        .create("trainId")
        .unwrap();
    let data = Array2::from_shape_fn((trains.len(), 3), |(row, col)| {
        (trains[row] * 100 + col as u64) as u16
    });
    let key = epix_data_key(epix);
    let (parent, name) = key.rsplit_once('/').unwrap();
    group_at(&file, parent)
        .new_dataset_builder()
        .with_data(&data)
        .chunk((2, 3))
        .create(name)
        .unwrap();
}

/// Dark constants with entries for the first `modules` modules only
fn write_dark(path: &Path, modules: usize) {
    let file = File::create(path).unwrap();
    let offset = Array5::<f32>::from_elem((3, 3, modules, H, W), OFFSET);
    let gain_level = Array5::<f32>::from_elem((3, 3, modules, H, W), 100.0);
    let bad = Array2::<u8>::zeros((modules * H, W));
    file.new_dataset_builder()
        .with_data(&offset)
        .create("AnalogOffset")
        .unwrap();
    file.new_dataset_builder()
        .with_data(&gain_level)
        .create("DigitalGainLevel")
        .unwrap();
    file.new_dataset_builder()
        .with_data(&bad)
        .create("Badpixel")
        .unwrap();
}

/// Module 0 over two sequences with trains 1..=6, module 1 with trains 2..=6 and ePix-1
/// with trains 2, 3, 4, 5, 7. The common trains are 2..=5.
fn setup(root: &Path, chunk: Option<usize>) -> Config {
    let run_dir = root.join("base/raw").join(format!("r{RUN:04}"));
    std::fs::create_dir_all(&run_dir).unwrap();
    write_agipd(&run_dir, 0, 0, &[1, 2, 3], chunk);
    write_agipd(&run_dir, 0, 1, &[4, 5, 6], chunk);
    write_agipd(&run_dir, 1, 0, &[2, 3, 4, 5, 6], chunk);
    write_epix(&run_dir, 1, &[2, 3, 4, 5, 7]);
    Config {
        out_path: root.join("out"),
        base_path: root.join("base"),
        modules: vec![0, 1, 5],
        pulse_ids: vec![1],
        module_shape: [H, W],
        ..Default::default()
    }
}

fn run(config: &Config) -> Result<PathBuf, ProcessorError> {
    let (tx, _rx) = channel();
    process_run(config, RUN, &tx, &0)
}

#[test]
fn test_run_is_aligned_and_virtual() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), Some(3));
    let path = run(&config).unwrap();
    assert_eq!(path, dir.path().join("out/hdf5/r0042.h5"));

    let file = File::open(&path).unwrap();
    let trains = file.dataset("index/trainId").unwrap().read::<u64, Ix1>().unwrap();
    assert_eq!(trains, Array1::from(vec![2, 3, 4, 5]));
    assert_eq!(file.dataset("index/run").unwrap().read_scalar::<i32>().unwrap(), RUN);
    let modules = file.dataset("data/AGIPD/moduleId").unwrap().read_raw::<u64>().unwrap();
    assert_eq!(modules, vec![0, 1]);
    let pulses = file
        .dataset("data/AGIPD/index/pulseId")
        .unwrap()
        .read_raw::<u64>()
        .unwrap();
    assert_eq!(pulses, vec![1; 4]);

    let data = file
        .dataset("data/AGIPD/index/data")
        .unwrap()
        .read::<u16, Ix4>()
        .unwrap();
    assert_eq!(data.shape(), &[4, 2, H, W]);
    let gain = file
        .dataset("data/AGIPD/index/gain")
        .unwrap()
        .read::<u16, Ix4>()
        .unwrap();
    assert!(gain.iter().all(|g| *g == 0));
    for (frame, train) in [2u64, 3, 4, 5].iter().enumerate() {
        for module in 0..2 {
            assert_eq!(data[[frame, module, 0, 0]], pixel_value(module, *train, 1));
            assert_eq!(
                data[[frame, module, 11, 1]],
                pixel_value(module, *train, 1) + SIGNAL
            );
        }
    }

    let epix = file.dataset("data/EPIX-1/data").unwrap().read::<u16, Ix2>().unwrap();
    assert_eq!(epix.shape(), &[4, 3]);
    let column: Vec<u16> = (0..4).map(|row| epix[[row, 0]]).collect();
    assert_eq!(column, vec![200, 300, 400, 500]);
    assert!(file.group("data/AGIPD_calibrated").is_err());
}

#[test]
fn test_run_with_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let dark = dir.path().join("dark.h5");
    write_dark(&dark, NUMBER_OF_MODULES);
    let config = Config {
        calibrate: true,
        dark_path: Some(dark),
        ..setup(dir.path(), Some(4))
    };
    let path = run(&config).unwrap();

    let file = File::open(&path).unwrap();
    let sum = file
        .dataset("data/AGIPD_calibrated/sum")
        .unwrap()
        .read::<f32, Ix4>()
        .unwrap();
    assert_eq!(sum.shape(), &[4, 2, H, W]);
    let expected = f32::from(SIGNAL) * GAIN_FACTORS[0];
    assert!((sum[[0, 1, 11, 0]] - expected).abs() < 1e-5);
    assert!(sum[[3, 0, 0, 0]].abs() < 1e-5);
    let mask = file.dataset("data/AGIPD_calibrated/mask").unwrap();
    assert_eq!(mask.shape(), vec![2, 4, 2, H, W]);
}

#[test]
fn test_unrecorded_pulse_keeps_index_and_data_in_step() {
    let dir = tempfile::tempdir().unwrap();
    let dark = dir.path().join("dark.h5");
    write_dark(&dark, NUMBER_OF_MODULES);
    // Pulse 5 is configured but never recorded
    let config = Config {
        calibrate: true,
        dark_path: Some(dark),
        pulse_ids: vec![1, 5],
        ..setup(dir.path(), Some(3))
    };
    let path = run(&config).unwrap();

    let file = File::open(&path).unwrap();
    let cells = file
        .dataset("data/AGIPD/index/cellId")
        .unwrap()
        .read_raw::<u16>()
        .unwrap();
    let data = file.dataset("data/AGIPD/index/data").unwrap();
    assert_eq!(cells, vec![2; 4]);
    assert_eq!(data.shape()[0], cells.len());
    let sum = file.dataset("data/AGIPD_calibrated/sum").unwrap();
    assert_eq!(sum.shape(), vec![cells.len(), 2, H, W]);
}

#[test]
fn test_missing_dark_module_keeps_composed_file() {
    let dir = tempfile::tempdir().unwrap();
    let dark = dir.path().join("dark.h5");
    // Only module 0 has dark constants
    write_dark(&dark, 1);
    let config = Config {
        calibrate: true,
        dark_path: Some(dark),
        ..setup(dir.path(), Some(4))
    };
    let path = run(&config).unwrap();

    let file = File::open(&path).unwrap();
    let data = file
        .dataset("data/AGIPD/index/data")
        .unwrap()
        .read::<u16, Ix4>()
        .unwrap();
    assert_eq!(data[[0, 1, 0, 0]], pixel_value(1, 2, 1));
    assert!(file.dataset("data/AGIPD_calibrated/sum").is_err());
}

#[test]
fn test_unchunked_source_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), None);
    match run(&config) {
        Err(ProcessorError::ComposerError(ComposerError::StorageChunk(name))) => {
            assert!(name.contains("AGIPD00"))
        }
        other => panic!("expected a storage chunk error, got {other:?}"),
    }
}

#[test]
fn test_missing_run_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        base_path: dir.path().join("base"),
        out_path: dir.path().join("out"),
        ..Default::default()
    };
    let result = run(&config);
    match result {
        Err(e) => assert!(e.to_string().contains("No files, bad run number 42")),
        Ok(path) => panic!("expected no data, wrote {}", path.display()),
    }
}
