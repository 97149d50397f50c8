// AGIPD layout
pub const NUMBER_OF_MODULES: usize = 16;
pub const DEFAULT_MODULE_SHAPE: [usize; 2] = [512, 128];

// Raw frames hold the sample plane and the gain plane side by side
pub const DATA_PLANE: usize = 0;
pub const GAIN_PLANE: usize = 1;

// Source file structure
pub const AGIPD_KEY: &str = "MID_DET_AGIPD1M-1";
pub const INDEX_TRAIN_KEY: &str = "INDEX/trainId";
pub const EPIX_IDS: [usize; 2] = [1, 2];

// Output file structure
pub const RUN_KEY: &str = "index/run";
pub const STREAM_KEY: &str = "index/stream";
pub const TRAIN_KEY: &str = "index/trainId";
pub const AGIPD_GROUP: &str = "data/AGIPD";
pub const AGIPD_INDEX_GROUP: &str = "data/AGIPD/index";
pub const AGIPD_TRAIN_NAME: &str = "trainId";
pub const AGIPD_CELL_NAME: &str = "cellId";
pub const AGIPD_PULSE_NAME: &str = "pulseId";
pub const AGIPD_DATA_NAME: &str = "data";
pub const AGIPD_GAIN_NAME: &str = "gain";
pub const AGIPD_MODULE_NAME: &str = "moduleId";
pub const AGIPD_CALIB_GROUP: &str = "data/AGIPD_calibrated";
pub const CREATION_ATTR: &str = "data";

// Dark calibration file structure
pub const OFFSET_KEY: &str = "AnalogOffset";
pub const BADMASK_KEY: &str = "Badpixel";
pub const GAIN_LEVEL_KEY: &str = "DigitalGainLevel";

// Dark calibration constants
pub const HIGH_GAIN: usize = 0;
pub const MEDIUM_GAIN: usize = 1;
pub const GAIN_FACTORS: [f32; 2] = [1.0 / 68.8, 1.0 / 1.376];
/// Leading pixel rows of a module used for the per-event zero level
pub const FLAT_ROI: (usize, usize) = (0, 10);

/// Full path of an AGIPD module channel inside a source file
pub fn agipd_channel(module_id: usize) -> String {
    format!("INSTRUMENT/{AGIPD_KEY}/DET/{module_id}CH0:xtdf")
}

pub fn epix_data_key(epix_id: usize) -> String {
    format!("INSTRUMENT/MID_EXP_EPIX-{epix_id}/DET/RECEIVER:daqOutput/data/image/pixels")
}

pub fn epix_group(epix_id: usize) -> String {
    format!("data/EPIX-{epix_id}")
}
