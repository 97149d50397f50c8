use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, Hyperslab, Selection, SliceOrIndex};
use ndarray::arr0;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::calibrator::CalibratedResult;
use super::composer::{AuxiliaryLayout, ComposedRun, PrimaryLayout};
use super::constants::{
    epix_group, AGIPD_CALIB_GROUP, AGIPD_CELL_NAME, AGIPD_GROUP, AGIPD_INDEX_GROUP,
    AGIPD_MODULE_NAME, AGIPD_PULSE_NAME, AGIPD_TRAIN_NAME, CREATION_ATTR, RUN_KEY, STREAM_KEY,
    TRAIN_KEY,
};
use super::error::HDF5WriterError;
use super::source_file::row_selection;
use super::virtual_layout::VirtualLayout;

const ADU_NAME: &str = "adu";
const MASK_NAME: &str = "mask";
const CALIB_DATA_NAME: &str = "data";
const SUM_NAME: &str = "sum";
const ZERO_LEVEL_NAME: &str = "zero_level";

// Structure
// / - data (creation time)
// index
// |---- run, stream, trainId
// data
// |---- AGIPD
// |    |---- moduleId
// |    |---- index
// |    |    |---- trainId, pulseId, cellId
// |    |    |---- data(virtual), gain(virtual)
// |---- EPIX-N
// |    |---- data(virtual)
// |---- AGIPD_calibrated
// |    |---- adu, mask, data, sum, zero_level

/// Split an absolute HDF5 path into its parent group and link name
fn split_key(key: &str) -> (&str, &str) {
    match key.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", key),
    }
}

/// Open a group, creating every missing group along the path
fn ensure_group(file: &File, path: &str) -> Result<Group, HDF5WriterError> {
    let mut group = file.group("/")?;
    for name in path.split('/').filter(|s| !s.is_empty()) {
        group = match group.group(name) {
            Ok(g) => g,
            Err(_) => group.create_group(name)?,
        };
    }
    Ok(group)
}

fn to_unicode(value: &str) -> Result<VarLenUnicode, HDF5WriterError> {
    VarLenUnicode::from_str(value).map_err(|_| HDF5WriterError::BadString(value.to_string()))
}

/// Output selection of `rows`, restricted to one `column` if given
fn output_selection(rows: std::ops::Range<usize>, column: Option<usize>, shape: &[usize]) -> Selection {
    let mut slices: Vec<SliceOrIndex> = vec![rows.into()];
    let mut dims = shape.iter().skip(1);
    if let Some(c) = column {
        dims.next();
        slices.push(c.into());
    }
    slices.extend(dims.map(|d| SliceOrIndex::from(0..*d)));
    Selection::from(Hyperslab::from(slices))
}

/// Create a virtual dataset in `group` realizing every binding of `layout`.
///
/// Each contiguous run of a binding is one virtual mapping.
fn write_virtual(group: &Group, layout: &VirtualLayout) -> Result<usize, HDF5WriterError> {
    let shape = layout.shape().to_vec();
    let mut builder = group.new_dataset::<u16>().shape(shape.clone());
    let mut mappings = 0;
    for binding in layout.bindings() {
        let file_name = binding.source.file_path.to_string_lossy().to_string();
        for (run, out) in binding.mapped_runs() {
            builder = builder.virtual_map(
                &file_name,
                &binding.source.data_key,
                binding.source.extents.clone(),
                row_selection(run, binding.plane, binding.source.frame_dims()),
                shape.clone(),
                output_selection(out, binding.column, &shape),
            );
            mappings += 1;
        }
    }
    builder.create(layout.name())?;
    Ok(mappings)
}

/// A simple struct which wraps around the hdf5-rust library.
///
/// Creates the consolidated file of a run. Real samples are never copied; detector data is
/// stored as virtual datasets pointing into the source files.
#[derive(Debug)]
pub struct HDFWriter {
    file_handle: File,
    path: PathBuf,
    frames: usize,
    mappings: usize,
}

impl HDFWriter {
    /// Create the writer, opening (truncating) a file at path and stamping its creation time
    pub fn new(path: &Path) -> Result<Self, HDF5WriterError> {
        let file_handle = File::create(path)?;
        let created = OffsetDateTime::now_utc().format(&Rfc3339)?;
        file_handle
            .new_attr::<VarLenUnicode>()
            .create(CREATION_ATTR)?
            .write_scalar(&to_unicode(&created)?)?;
        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
            frames: 0,
            mappings: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the run number, the stream tag and the aligned trains
    pub fn write_run_info(
        &mut self,
        run_number: i32,
        tag: &str,
        trains: &[u64],
    ) -> Result<(), HDF5WriterError> {
        let (parent, run_name) = split_key(RUN_KEY);
        let group = ensure_group(&self.file_handle, parent)?;
        group
            .new_dataset_builder()
            .with_data(&arr0(run_number))
            .create(run_name)?;
        let (_, stream_name) = split_key(STREAM_KEY);
        group
            .new_dataset_builder()
            .with_data(&arr0(to_unicode(tag)?))
            .create(stream_name)?;
        let (_, train_name) = split_key(TRAIN_KEY);
        group
            .new_dataset_builder()
            .with_data(trains)
            .create(train_name)?;
        Ok(())
    }

    /// Write the module list, the per-frame indices and the virtual data and gain of the
    /// primary detector
    pub fn write_primary(&mut self, primary: &PrimaryLayout) -> Result<(), HDF5WriterError> {
        let group = ensure_group(&self.file_handle, AGIPD_GROUP)?;
        let modules: Vec<u64> = primary.modules.iter().map(|m| *m as u64).collect();
        group
            .new_dataset_builder()
            .with_data(&modules)
            .create(AGIPD_MODULE_NAME)?;

        let index = ensure_group(&self.file_handle, AGIPD_INDEX_GROUP)?;
        index
            .new_dataset_builder()
            .with_data(&primary.index.train_ids)
            .create(AGIPD_TRAIN_NAME)?;
        index
            .new_dataset_builder()
            .with_data(&primary.index.pulse_ids)
            .create(AGIPD_PULSE_NAME)?;
        index
            .new_dataset_builder()
            .with_data(&primary.index.cell_ids)
            .create(AGIPD_CELL_NAME)?;

        self.mappings += write_virtual(&index, &primary.data)?;
        self.mappings += write_virtual(&index, &primary.gain)?;
        self.frames += primary.data.shape().first().copied().unwrap_or(0);
        log::info!("AGIPD data shape: {:?}", primary.data.shape());
        Ok(())
    }

    pub fn write_auxiliary(&mut self, auxiliary: &AuxiliaryLayout) -> Result<(), HDF5WriterError> {
        let group = ensure_group(&self.file_handle, &epix_group(auxiliary.id))?;
        self.mappings += write_virtual(&group, &auxiliary.data)?;
        log::info!(
            "EPIX-{} data shape: {:?}",
            auxiliary.id,
            auxiliary.data.shape()
        );
        Ok(())
    }

    /// Write every composed layout of a run
    pub fn write_composed(&mut self, composed: &ComposedRun) -> Result<(), HDF5WriterError> {
        if let Some(primary) = composed.primary.as_ref() {
            self.write_primary(primary)?;
        }
        for auxiliary in composed.auxiliary.iter() {
            self.write_auxiliary(auxiliary)?;
        }
        Ok(())
    }

    /// Flush and close the file, consuming the writer
    pub fn close(self) -> Result<(), HDF5WriterError> {
        self.file_handle.flush()?;
        let size = self.file_handle.size();
        drop(self.file_handle);
        log::info!(
            "{} frames written to {} with {} virtual mappings ({})",
            self.frames,
            self.path.display(),
            self.mappings,
            human_bytes::human_bytes(size as f64)
        );
        Ok(())
    }
}

/// Store a calibration result next to the composed data of an existing file.
///
/// Previous calibration output in the file is replaced.
pub fn write_calibration(path: &Path, result: &CalibratedResult) -> Result<(), HDF5WriterError> {
    let file = File::open_rw(path)?;
    let group = ensure_group(&file, AGIPD_CALIB_GROUP)?;
    for name in [ADU_NAME, MASK_NAME, CALIB_DATA_NAME, SUM_NAME, ZERO_LEVEL_NAME] {
        if group.link_exists(name) {
            group.unlink(name)?;
        }
    }
    group
        .new_dataset_builder()
        .with_data(&result.adu)
        .create(ADU_NAME)?;
    group
        .new_dataset_builder()
        .with_data(&result.mask)
        .create(MASK_NAME)?;
    group
        .new_dataset_builder()
        .with_data(&result.data)
        .create(CALIB_DATA_NAME)?;
    group
        .new_dataset_builder()
        .with_data(&result.sum)
        .create(SUM_NAME)?;
    group
        .new_dataset_builder()
        .with_data(&result.zero_levels)
        .create(ZERO_LEVEL_NAME)?;
    file.flush()?;
    log::info!("Calibrated data saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("index/run"), ("index", "run"));
        assert_eq!(split_key("run"), ("", "run"));
    }
}
