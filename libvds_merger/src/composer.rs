use fxhash::FxHashMap;

use super::alignment::{AlignmentResult, FrameKey};
use super::constants::{DATA_PLANE, GAIN_PLANE};
use super::error::ComposerError;
use super::source_file::{RowIndex, SourceFile};
use super::stream::{RunStreams, Stream, StreamId};
use super::virtual_layout::{LayoutBuilder, SourceRef, VirtualLayout};

/// Virtual layouts of the primary detector.
///
/// `data` and `gain` share every row selection and offset; `index` holds the per-row
/// train/pulse/cell ids of the output rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryLayout {
    pub data: VirtualLayout,
    pub gain: VirtualLayout,
    pub index: RowIndex,
    pub modules: Vec<usize>,
}

/// Virtual layout of an auxiliary detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryLayout {
    pub id: usize,
    pub data: VirtualLayout,
}

/// Everything composed for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedRun {
    pub primary: Option<PrimaryLayout>,
    pub auxiliary: Vec<AuxiliaryLayout>,
}

fn chunk_size(file: &dyn SourceFile) -> Result<usize, ComposerError> {
    file.chunk_size()
        .map_err(|_| ComposerError::StorageChunk(file.name()))
}

/// Compose the data and gain layouts of the primary detector.
///
/// Output frame `i` of every module column is the source row carrying
/// `alignment.frames[i]`. Consecutive frames read from one file are bound in batches of at
/// most one storage chunk. A module that has no row for an aligned frame is an error.
pub fn compose_primary(
    streams: &RunStreams,
    alignment: &AlignmentResult,
    module_shape: [usize; 2],
) -> Result<PrimaryLayout, ComposerError> {
    let frames = alignment.frame_count();
    let columns = alignment.active_modules.len();
    let shape = vec![frames, columns, module_shape[0], module_shape[1]];
    let mut data = LayoutBuilder::new("data", shape.clone(), columns);
    let mut gain = LayoutBuilder::new("gain", shape, columns);
    let slot_of: FxHashMap<FrameKey, usize> = alignment
        .frames
        .iter()
        .enumerate()
        .map(|(slot, key)| (*key, slot))
        .collect();
    let mut cell_ids = vec![0u16; frames];

    for (column, module) in alignment.active_modules.iter().enumerate() {
        let stream = streams
            .module(*module)
            .ok_or_else(|| ComposerError::EmptyStream(StreamId::Module(*module).to_string()))?;
        log::info!("Processing {}", stream.id);

        // (file, row) feeding each output frame
        let mut bound: Vec<Option<(usize, usize)>> = vec![None; frames];
        let mut file_rows = Vec::with_capacity(stream.files.len());
        for (file_idx, file) in stream.files.iter().enumerate() {
            log::info!("Opening file: {}", file.name());
            let rows = file.read_index()?;
            let keys = rows.train_ids.iter().copied().zip(rows.pulse_ids.iter().copied());
            for (row, key) in keys.enumerate() {
                let slot = match slot_of.get(&key) {
                    Some(slot) if bound[*slot].is_none() => *slot,
                    _ => continue,
                };
                bound[slot] = Some((file_idx, row));
                // The first module defines the cell ids of the output
                if column == 0 {
                    cell_ids[slot] = rows.cell_ids[row];
                }
            }
            file_rows.push(rows.len());
        }

        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for (slot, entry) in bound.iter().enumerate() {
            let (file_idx, row) = match entry {
                Some(e) => *e,
                None => {
                    let (train, pulse) = alignment.frames[slot];
                    return Err(ComposerError::MissingFrame {
                        stream: stream.id.to_string(),
                        train,
                        pulse,
                    });
                }
            };
            match groups.last_mut() {
                Some((idx, rows)) if *idx == file_idx => rows.push(row),
                _ => groups.push((file_idx, vec![row])),
            }
        }

        for (file_idx, rows) in groups.iter() {
            let file = &stream.files[*file_idx];
            let chunk = chunk_size(file.as_ref())?;
            let source = SourceRef::new(file.as_ref(), file_rows[*file_idx])?;
            for batch in rows.chunks(chunk) {
                data.push(Some(column), Some(DATA_PLANE), &source, batch)?;
                gain.push(Some(column), Some(GAIN_PLANE), &source, batch)?;
            }
            log::info!(
                "File {} saved, data size: {}",
                file.name(),
                data.filled(column)
            );
        }
    }

    let index = RowIndex {
        train_ids: alignment.frames.iter().map(|(train, _)| *train).collect(),
        pulse_ids: alignment.frames.iter().map(|(_, pulse)| *pulse).collect(),
        cell_ids,
    };
    Ok(PrimaryLayout {
        data: data.commit(),
        gain: gain.commit(),
        index,
        modules: alignment.active_modules.clone(),
    })
}

/// Compose the layout of an auxiliary stream.
///
/// Rows are taken in aligned train order: for each aligned train every row of the file
/// carrying that train is mapped.
pub fn compose_auxiliary(
    stream: &Stream,
    alignment: &AlignmentResult,
) -> Result<AuxiliaryLayout, ComposerError> {
    let id = match stream.id {
        StreamId::Auxiliary(id) => id,
        StreamId::Module(_) => return Err(ComposerError::EmptyStream(stream.id.to_string())),
    };
    let first = stream
        .files
        .first()
        .ok_or_else(|| ComposerError::EmptyStream(stream.id.to_string()))?;
    let trains: &[u64] = match alignment.auxiliary(id) {
        Some(aux) => &aux.trains,
        None => alignment.trains.as_slice(),
    };
    let mut shape = vec![trains.len()];
    shape.extend(first.frame_shape()?);
    let mut layout = LayoutBuilder::new("data", shape, 1);

    log::info!("Processing {}", stream.id);
    for file in stream.files.iter() {
        log::info!("Opening file: {}", file.name());
        let file_trains = file.train_ids()?;
        let mut rows_of_train: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
        for (row, train) in file_trains.iter().enumerate() {
            rows_of_train.entry(*train).or_default().push(row);
        }
        let selected: Vec<usize> = trains
            .iter()
            .filter_map(|t| rows_of_train.get(t))
            .flatten()
            .copied()
            .collect();
        if selected.is_empty() {
            continue;
        }

        let chunk = chunk_size(file.as_ref())?;
        let source = SourceRef::new(file.as_ref(), file_trains.len())?;
        for batch in selected.chunks(chunk) {
            layout.push(None, None, &source, batch)?;
        }
        log::info!(
            "File {} saved, data size: {}",
            file.name(),
            layout.filled(0)
        );
    }

    Ok(AuxiliaryLayout {
        id,
        data: layout.commit(),
    })
}

/// Compose every stream of a run. No sample data is read.
pub fn compose(
    streams: &RunStreams,
    alignment: &AlignmentResult,
    module_shape: [usize; 2],
) -> Result<ComposedRun, ComposerError> {
    let primary = if alignment.has_primary() {
        Some(compose_primary(streams, alignment, module_shape)?)
    } else {
        None
    };
    let mut auxiliary = Vec::new();
    for stream in streams.auxiliary.iter().filter(|s| !s.is_empty()) {
        auxiliary.push(compose_auxiliary(stream, alignment)?);
    }
    Ok(ComposedRun { primary, auxiliary })
}
