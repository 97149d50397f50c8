use fxhash::FxHashSet;

use super::error::AlignmentError;
use super::index_set::{intersect_indices, IndexSet};
use super::stream::{ModuleMask, RunStreams, Stream, StreamId};

/// The aligned timeline of one auxiliary stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryAlignment {
    pub id: usize,
    /// Trains of the stream, re-indexed to the common order
    pub trains: Vec<u64>,
    /// Position of each common train in the stream's concatenated timeline
    pub timeline_rows: Vec<usize>,
    /// Number of timeline entries before alignment
    pub raw_count: usize,
}

/// One primary detector frame, identified by (train, pulse)
pub type FrameKey = (u64, u64);

/// The authoritative event ordering of a run.
///
/// Created once by [`align`] and only read afterwards. Every dataset written for the run
/// follows the ordering of `trains`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentResult {
    pub run_number: i32,
    pub trains: IndexSet,
    pub pulse_ids: IndexSet,
    /// Primary detector frames recorded by every active module, ascending
    pub frames: Vec<FrameKey>,
    /// Module mask after clearing modules without usable data
    pub module_mask: ModuleMask,
    pub active_modules: Vec<usize>,
    pub auxiliary: Vec<AuxiliaryAlignment>,
    /// Timeline entries seen over all active modules before alignment
    pub total_rows: usize,
}

impl AlignmentResult {
    pub fn has_primary(&self) -> bool {
        !self.active_modules.is_empty()
    }

    /// Number of output frames of the primary detector
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn auxiliary(&self, id: usize) -> Option<&AuxiliaryAlignment> {
        self.auxiliary.iter().find(|a| a.id == id)
    }
}

/// Concatenate the per-file train tables of a module, each file's table first intersected
/// with its companion table. Returns the raw (concatenated) timeline.
fn module_timeline(stream: &Stream) -> Result<Vec<u64>, AlignmentError> {
    let mut trains = Vec::new();
    for file in stream.files.iter() {
        let timeline = file.timeline()?;
        let index = IndexSet::new(timeline.index);
        let agreed = match timeline.companion {
            Some(companion) => index.intersect(&IndexSet::new(companion)),
            None => index,
        };
        trains.extend(agreed.into_vec());
    }
    log::info!(
        "{} processed from {} files, {} trains",
        stream.id,
        stream.files.len(),
        trains.len()
    );
    Ok(trains)
}

/// The selected (train, pulse) pairs present in a module's image tables
fn module_frames(
    stream: &Stream,
    trains: &IndexSet,
    pulse_ids: &IndexSet,
) -> Result<FxHashSet<FrameKey>, AlignmentError> {
    let mut keys = FxHashSet::default();
    for file in stream.files.iter() {
        let rows = file.read_index()?;
        let train_mask = trains.membership_mask(&rows.train_ids);
        let pulse_mask = pulse_ids.membership_mask(&rows.pulse_ids);
        for (row, (train, pulse)) in train_mask
            .iter()
            .by_vals()
            .zip(pulse_mask.iter().by_vals())
            .enumerate()
        {
            if train && pulse {
                keys.insert((rows.train_ids[row], rows.pulse_ids[row]));
            }
        }
    }
    Ok(keys)
}

fn auxiliary_timeline(stream: &Stream) -> Result<Vec<u64>, AlignmentError> {
    let mut trains = Vec::new();
    for file in stream.files.iter() {
        trains.extend(file.timeline()?.index);
    }
    Ok(trains)
}

/// Compute the common ordered set of trains of a run.
///
/// Module timelines are intersected across all active modules. The result is then
/// intersected with each auxiliary stream in precedence order. Modules without files or
/// without agreeing internal indices are cleared from the mask.
pub fn align(
    run_number: i32,
    streams: &RunStreams,
    mask: &ModuleMask,
    pulse_ids: &[u64],
) -> Result<AlignmentResult, AlignmentError> {
    if streams.total_files() == 0 {
        return Err(AlignmentError::NoData(run_number));
    }

    let mut module_mask = mask.clone();
    let mut module_sets: Vec<IndexSet> = Vec::new();
    let mut total_rows = 0;
    let mut primary_has_files = false;
    for module in mask.active() {
        let stream = match streams.module(module) {
            Some(s) if !s.is_empty() => s,
            _ => {
                log::warn!("No files for AGIPD{module:02}, deactivating module");
                module_mask.clear(module);
                continue;
            }
        };
        primary_has_files = true;
        let trains = module_timeline(stream)?;
        if trains.is_empty() {
            log::warn!("AGIPD{module:02} index tables never agree, deactivating module");
            module_mask.clear(module);
            continue;
        }
        total_rows += trains.len();
        module_sets.push(IndexSet::new(trains));
    }

    if primary_has_files && module_sets.is_empty() {
        return Err(AlignmentError::Inconsistent(run_number));
    }

    let mut common = if module_sets.is_empty() {
        None
    } else {
        Some(IndexSet::intersect_all(module_sets.iter()))
    };

    let mut aux_timelines: Vec<(usize, Vec<u64>)> = Vec::new();
    for stream in streams.auxiliary.iter().filter(|s| !s.is_empty()) {
        let id = match stream.id {
            StreamId::Auxiliary(id) => id,
            StreamId::Module(_) => continue,
        };
        let trains = auxiliary_timeline(stream)?;
        log::info!("{} processed, {} trains", stream.id, trains.len());
        let set = IndexSet::new(trains.clone());
        common = Some(match common {
            Some(c) => c.intersect(&set),
            None => set,
        });
        aux_timelines.push((id, trains));
    }

    let trains = common.unwrap_or_default();

    // Re-index every auxiliary stream to the final common order
    let auxiliary = aux_timelines
        .into_iter()
        .map(|(id, raw)| {
            let (_, _, timeline_rows) = intersect_indices(trains.as_slice(), &raw);
            AuxiliaryAlignment {
                id,
                trains: timeline_rows.iter().map(|row| raw[*row]).collect(),
                timeline_rows,
                raw_count: raw.len(),
            }
        })
        .collect();

    let active_modules = module_mask.active();
    let pulse_ids = IndexSet::new(pulse_ids.to_vec());

    // Within the common trains, keep only the frames every module recorded
    let mut common_frames: Option<FxHashSet<FrameKey>> = None;
    for module in active_modules.iter() {
        if let Some(stream) = streams.module(*module) {
            let keys = module_frames(stream, &trains, &pulse_ids)?;
            common_frames = Some(match common_frames {
                Some(c) => c.intersection(&keys).copied().collect(),
                None => keys,
            });
        }
    }
    let mut frames: Vec<FrameKey> = common_frames.unwrap_or_default().into_iter().collect();
    frames.sort_unstable();
    let nominal = trains.len() * pulse_ids.len();
    if !active_modules.is_empty() && frames.len() < nominal {
        log::warn!(
            "{} of {} selected frames are missing from at least one module",
            nominal - frames.len(),
            nominal
        );
    }
    if let (Some(first), Some(last)) = (trains.first(), trains.last()) {
        log::info!(
            "Run {run_number}: {} trains (originally {}) in [{first}, {last}]",
            trains.len(),
            total_rows / active_modules.len().max(1)
        );
    } else {
        log::warn!("Run {run_number}: no train is common to all streams");
    }
    log::info!(
        "{} pulses per train, Pulse ID: {:?}",
        pulse_ids.len(),
        pulse_ids.as_slice()
    );
    log::info!("{} frames in total", frames.len());

    Ok(AlignmentResult {
        run_number,
        trains,
        pulse_ids,
        frames,
        module_mask,
        active_modules,
        auxiliary,
        total_rows,
    })
}
