use hdf5::File;
use ndarray::{s, Array2, Array5, Ix2};
use std::path::Path;

use super::constants::{BADMASK_KEY, GAIN_LEVEL_KEY, OFFSET_KEY};
use super::error::CalibrationReferenceError;

/// Read access to dark calibration constants.
///
/// Offset and gain level tables are indexed by (gain branch, memory cell, module) and return
/// one module frame. The bad pixel mask is static per module.
pub trait DarkReference {
    fn offset(
        &self,
        gain: usize,
        cell: usize,
        module: usize,
    ) -> Result<Array2<f32>, CalibrationReferenceError>;

    fn gain_level(
        &self,
        gain: usize,
        cell: usize,
        module: usize,
    ) -> Result<Array2<f32>, CalibrationReferenceError>;

    /// Usable pixels of a module (`true` = good)
    fn good_pixels(&self, module: usize) -> Result<Array2<bool>, CalibrationReferenceError>;
}

/// Turn a raw bad pixel table into a good pixel mask.
///
/// When `inverted` the table flags bad pixels with any non zero value, otherwise non zero
/// marks the good ones.
fn good_from_raw(raw: &Array2<u8>, inverted: bool) -> Array2<bool> {
    if inverted {
        raw.mapv(|v| v == 0)
    } else {
        raw.mapv(|v| v != 0)
    }
}

fn check_entry(
    table: &str,
    shape: &[usize],
    gain: usize,
    cell: usize,
    module: usize,
) -> Result<(), CalibrationReferenceError> {
    if shape.len() < 5 || gain >= shape[0] || cell >= shape[1] || module >= shape[2] {
        return Err(CalibrationReferenceError::MissingEntry {
            table: table.to_string(),
            gain,
            cell,
            module,
        });
    }
    Ok(())
}

/// Dark constants stored in an HDF5 file.
///
/// `AnalogOffset` and `DigitalGainLevel` have shape (gain, cell, module, y, x); `Badpixel`
/// stacks the module frames along y. The file stays open for the whole calibration pass.
#[derive(Debug)]
pub struct DarkFile {
    file: File,
    module_height: usize,
    mask_inverted: bool,
}

impl DarkFile {
    pub fn open(
        path: &Path,
        module_height: usize,
        mask_inverted: bool,
    ) -> Result<Self, CalibrationReferenceError> {
        if !path.exists() {
            return Err(CalibrationReferenceError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        for table in [OFFSET_KEY, GAIN_LEVEL_KEY, BADMASK_KEY] {
            if file.dataset(table).is_err() {
                return Err(CalibrationReferenceError::MissingTable(table.to_string()));
            }
        }
        log::info!("Loaded dark reference {}", path.display());
        Ok(Self {
            file,
            module_height,
            mask_inverted,
        })
    }

    fn read_frame(
        &self,
        table: &str,
        gain: usize,
        cell: usize,
        module: usize,
    ) -> Result<Array2<f32>, CalibrationReferenceError> {
        let dataset = self.file.dataset(table)?;
        check_entry(table, &dataset.shape(), gain, cell, module)?;
        Ok(dataset.read_slice::<f32, _, Ix2>(s![gain, cell, module, .., ..])?)
    }
}

impl DarkReference for DarkFile {
    fn offset(
        &self,
        gain: usize,
        cell: usize,
        module: usize,
    ) -> Result<Array2<f32>, CalibrationReferenceError> {
        self.read_frame(OFFSET_KEY, gain, cell, module)
    }

    fn gain_level(
        &self,
        gain: usize,
        cell: usize,
        module: usize,
    ) -> Result<Array2<f32>, CalibrationReferenceError> {
        self.read_frame(GAIN_LEVEL_KEY, gain, cell, module)
    }

    fn good_pixels(&self, module: usize) -> Result<Array2<bool>, CalibrationReferenceError> {
        let dataset = self.file.dataset(BADMASK_KEY)?;
        let shape = dataset.shape();
        let (start, stop) = (
            module * self.module_height,
            (module + 1) * self.module_height,
        );
        if shape.len() != 2 || stop > shape[0] {
            return Err(CalibrationReferenceError::MissingMask(module));
        }
        let raw = dataset.read_slice::<u8, _, Ix2>(s![start..stop, ..])?;
        Ok(good_from_raw(&raw, self.mask_inverted))
    }
}

/// Dark constants held in memory, laid out like [`DarkFile`]
#[derive(Debug, Clone)]
pub struct MemoryDark {
    pub offset: Array5<f32>,
    pub gain_level: Array5<f32>,
    pub bad_pixels: Array2<u8>,
    pub module_height: usize,
    pub mask_inverted: bool,
}

impl DarkReference for MemoryDark {
    fn offset(
        &self,
        gain: usize,
        cell: usize,
        module: usize,
    ) -> Result<Array2<f32>, CalibrationReferenceError> {
        check_entry(OFFSET_KEY, self.offset.shape(), gain, cell, module)?;
        Ok(self.offset.slice(s![gain, cell, module, .., ..]).to_owned())
    }

    fn gain_level(
        &self,
        gain: usize,
        cell: usize,
        module: usize,
    ) -> Result<Array2<f32>, CalibrationReferenceError> {
        check_entry(GAIN_LEVEL_KEY, self.gain_level.shape(), gain, cell, module)?;
        Ok(self.gain_level.slice(s![gain, cell, module, .., ..]).to_owned())
    }

    fn good_pixels(&self, module: usize) -> Result<Array2<bool>, CalibrationReferenceError> {
        let (start, stop) = (
            module * self.module_height,
            (module + 1) * self.module_height,
        );
        if stop > self.bad_pixels.nrows() {
            return Err(CalibrationReferenceError::MissingMask(module));
        }
        let raw = self.bad_pixels.slice(s![start..stop, ..]).to_owned();
        Ok(good_from_raw(&raw, self.mask_inverted))
    }
}
