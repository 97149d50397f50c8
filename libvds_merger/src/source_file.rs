use hdf5::{Hyperslab, Selection, SliceOrIndex};
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use std::ops::Range;
use std::path::{Path, PathBuf};

use super::constants::{agipd_channel, epix_data_key, INDEX_TRAIN_KEY};
use super::error::SourceFileError;

/// The per-train tables of a source file used to build a stream timeline.
///
/// `index` is the file level train table. Multi-module detectors also carry a companion
/// table (the module header) which should agree with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    pub index: Vec<u64>,
    pub companion: Option<Vec<u64>>,
}

/// Per-row secondary indices, row aligned with the file's train ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecondaryIds {
    pub pulse_ids: Vec<u64>,
    pub cell_ids: Vec<u16>,
}

/// Complete per-row index of a source file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowIndex {
    pub train_ids: Vec<u64>,
    pub pulse_ids: Vec<u64>,
    pub cell_ids: Vec<u16>,
}

impl RowIndex {
    pub fn len(&self) -> usize {
        self.train_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train_ids.is_empty()
    }
}

/// Read access to one acquisition file of a stream.
///
/// The alignment and composition engines only ever talk to this trait, so the backing
/// container can be an HDF5 file on disk or an in-memory table.
pub trait SourceFile: std::fmt::Debug {
    /// File name used in logs and error messages
    fn name(&self) -> String;

    /// Location of the file, referenced by virtual mappings
    fn file_path(&self) -> &Path;

    /// Path of the sample array inside the file
    fn data_key(&self) -> &str;

    fn timeline(&self) -> Result<Timeline, SourceFileError>;

    /// Train id of every data row
    fn train_ids(&self) -> Result<Vec<u64>, SourceFileError>;

    /// Pulse and cell id of every data row
    fn secondary_ids(&self) -> Result<SecondaryIds, SourceFileError>;

    /// Number of rows in one native storage chunk of the sample array
    fn chunk_size(&self) -> Result<usize, SourceFileError>;

    /// Shape of one data row
    fn frame_shape(&self) -> Result<Vec<usize>, SourceFileError>;

    /// Copy a contiguous range of data rows out of the file
    fn read_rows(&self, rows: Range<usize>) -> Result<ArrayD<u16>, SourceFileError>;

    /// Read the train and secondary ids together, checking they are row aligned
    fn read_index(&self) -> Result<RowIndex, SourceFileError> {
        let train_ids = self.train_ids()?;
        let SecondaryIds {
            pulse_ids,
            cell_ids,
        } = self.secondary_ids()?;
        if pulse_ids.len() != train_ids.len() || cell_ids.len() != train_ids.len() {
            return Err(SourceFileError::MismatchedIndex {
                file: self.name(),
                trains: train_ids.len(),
                pulses: pulse_ids.len(),
                cells: cell_ids.len(),
            });
        }
        Ok(RowIndex {
            train_ids,
            pulse_ids,
            cell_ids,
        })
    }
}

/// Selection of `rows` (optionally restricted to one leading `plane` of each frame) over a
/// dataset whose rows have shape `frame_dims`
pub fn row_selection(rows: Range<usize>, plane: Option<usize>, frame_dims: &[usize]) -> Selection {
    let mut slices: Vec<SliceOrIndex> = vec![rows.into()];
    let mut dims = frame_dims.iter();
    if let Some(p) = plane {
        dims.next();
        slices.push(p.into());
    }
    slices.extend(dims.map(|d| SliceOrIndex::from(0..*d)));
    Selection::from(Hyperslab::from(slices))
}

/// Which detector family a file belongs to; decides where its index tables live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLayout {
    AgipdModule(usize),
    Epix(usize),
}

/// A source file stored as EuXFEL HDF5.
///
/// The file is only held open for the duration of a single call.
#[derive(Debug, Clone)]
pub struct Hdf5Source {
    path: PathBuf,
    layout: SourceLayout,
    data_key: String,
}

impl Hdf5Source {
    pub fn new(path: &Path, layout: SourceLayout) -> Result<Self, SourceFileError> {
        if !path.exists() {
            return Err(SourceFileError::BadFilePath(path.to_path_buf()));
        }
        let data_key = match layout {
            SourceLayout::AgipdModule(module) => format!("{}/image/data", agipd_channel(module)),
            SourceLayout::Epix(id) => epix_data_key(id),
        };
        Ok(Self {
            path: path.to_path_buf(),
            layout,
            data_key,
        })
    }

    /// Size of the file on disk in bytes
    pub fn size_bytes(&self) -> u64 {
        self.path.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn open(&self) -> Result<hdf5::File, SourceFileError> {
        Ok(hdf5::File::open(&self.path)?)
    }

    fn read_u64(&self, file: &hdf5::File, key: &str) -> Result<Vec<u64>, SourceFileError> {
        Ok(file.dataset(key)?.read_raw::<u64>()?)
    }
}

impl SourceFile for Hdf5Source {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    fn file_path(&self) -> &Path {
        &self.path
    }

    fn data_key(&self) -> &str {
        &self.data_key
    }

    fn timeline(&self) -> Result<Timeline, SourceFileError> {
        let file = self.open()?;
        let index = self.read_u64(&file, INDEX_TRAIN_KEY)?;
        let companion = match self.layout {
            SourceLayout::AgipdModule(module) => Some(self.read_u64(
                &file,
                &format!("{}/header/trainId", agipd_channel(module)),
            )?),
            SourceLayout::Epix(_) => None,
        };
        Ok(Timeline { index, companion })
    }

    fn train_ids(&self) -> Result<Vec<u64>, SourceFileError> {
        let file = self.open()?;
        match self.layout {
            SourceLayout::AgipdModule(module) => {
                self.read_u64(&file, &format!("{}/image/trainId", agipd_channel(module)))
            }
            SourceLayout::Epix(_) => self.read_u64(&file, INDEX_TRAIN_KEY),
        }
    }

    fn secondary_ids(&self) -> Result<SecondaryIds, SourceFileError> {
        let file = self.open()?;
        match self.layout {
            SourceLayout::AgipdModule(module) => {
                let channel = agipd_channel(module);
                Ok(SecondaryIds {
                    pulse_ids: self.read_u64(&file, &format!("{channel}/image/pulseId"))?,
                    cell_ids: file
                        .dataset(&format!("{channel}/image/cellId"))?
                        .read_raw::<u16>()?,
                })
            }
            SourceLayout::Epix(_) => {
                // Single frame per train, there is no pulse structure
                let rows = file.dataset(INDEX_TRAIN_KEY)?.size();
                Ok(SecondaryIds {
                    pulse_ids: vec![0; rows],
                    cell_ids: vec![0; rows],
                })
            }
        }
    }

    fn chunk_size(&self) -> Result<usize, SourceFileError> {
        let file = self.open()?;
        let dataset = file.dataset(&self.data_key)?;
        match dataset.chunk() {
            Some(chunk) if !chunk.is_empty() && chunk[0] > 0 => Ok(chunk[0]),
            _ => Err(SourceFileError::NotChunked(self.name())),
        }
    }

    fn frame_shape(&self) -> Result<Vec<usize>, SourceFileError> {
        let file = self.open()?;
        let shape = file.dataset(&self.data_key)?.shape();
        Ok(shape.into_iter().skip(1).collect())
    }

    fn read_rows(&self, rows: Range<usize>) -> Result<ArrayD<u16>, SourceFileError> {
        let file = self.open()?;
        let dataset = file.dataset(&self.data_key)?;
        let shape = dataset.shape();
        let n_rows = shape.first().copied().unwrap_or(0);
        if rows.end > n_rows || rows.start > rows.end {
            return Err(SourceFileError::RowsOutOfRange {
                file: self.name(),
                start: rows.start,
                end: rows.end,
                rows: n_rows,
            });
        }
        let selection = row_selection(rows, None, &shape[1..]);
        Ok(dataset.read_slice::<u16, _, IxDyn>(selection)?)
    }
}

/// A source file held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    pub path: PathBuf,
    pub data_key: String,
    pub timeline: Timeline,
    pub index: RowIndex,
    pub chunk: Option<usize>,
    pub data: ArrayD<u16>,
}

impl MemorySource {
    /// Source whose rows are described by `index`, with zero-filled frames of `frame_shape`
    pub fn new(name: &str, index: RowIndex, frame_shape: &[usize], chunk: Option<usize>) -> Self {
        let mut shape = vec![index.len()];
        shape.extend_from_slice(frame_shape);
        let timeline = Timeline {
            index: crate::index_set::IndexSet::new(index.train_ids.clone()).into_vec(),
            companion: None,
        };
        Self {
            path: PathBuf::from(name),
            data_key: String::from("data"),
            timeline,
            index,
            chunk,
            data: ArrayD::zeros(IxDyn(&shape)),
        }
    }

    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = timeline;
        self
    }

    pub fn with_data(mut self, data: ArrayD<u16>) -> Self {
        self.data = data;
        self
    }
}

impl SourceFile for MemorySource {
    fn name(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn file_path(&self) -> &Path {
        &self.path
    }

    fn data_key(&self) -> &str {
        &self.data_key
    }

    fn timeline(&self) -> Result<Timeline, SourceFileError> {
        Ok(self.timeline.clone())
    }

    fn train_ids(&self) -> Result<Vec<u64>, SourceFileError> {
        Ok(self.index.train_ids.clone())
    }

    fn secondary_ids(&self) -> Result<SecondaryIds, SourceFileError> {
        Ok(SecondaryIds {
            pulse_ids: self.index.pulse_ids.clone(),
            cell_ids: self.index.cell_ids.clone(),
        })
    }

    fn chunk_size(&self) -> Result<usize, SourceFileError> {
        self.chunk.ok_or_else(|| SourceFileError::NotChunked(self.name()))
    }

    fn frame_shape(&self) -> Result<Vec<usize>, SourceFileError> {
        Ok(self.data.shape()[1..].to_vec())
    }

    fn read_rows(&self, rows: Range<usize>) -> Result<ArrayD<u16>, SourceFileError> {
        let n_rows = self.data.shape()[0];
        if rows.end > n_rows || rows.start > rows.end {
            return Err(SourceFileError::RowsOutOfRange {
                file: self.name(),
                start: rows.start,
                end: rows.end,
                rows: n_rows,
            });
        }
        Ok(self
            .data
            .slice_axis(Axis(0), Slice::from(rows))
            .to_owned())
    }
}
