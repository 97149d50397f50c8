use fxhash::FxHashMap;
use hdf5::File;
use ndarray::{s, Array2, Array4, Array5, Axis, Ix4, Zip};
use std::path::Path;

use super::constants::{
    AGIPD_CELL_NAME, AGIPD_DATA_NAME, AGIPD_GAIN_NAME, AGIPD_GROUP, AGIPD_INDEX_GROUP,
    AGIPD_MODULE_NAME, FLAT_ROI, GAIN_FACTORS, HIGH_GAIN, MEDIUM_GAIN,
};
use super::dark::DarkReference;
use super::error::{CalibrationReferenceError, CalibratorError};

/// Gain branches carried through calibration: nominal (high) and reduced (medium) gain
const BRANCHES: [usize; 2] = [HIGH_GAIN, MEDIUM_GAIN];

/// Primary detector frames of a consolidated file, read into memory.
///
/// `data` and `gain` have shape (frames, modules, y, x).
#[derive(Debug, Clone)]
pub struct ComposedFrames {
    pub modules: Vec<usize>,
    pub cell_ids: Vec<u16>,
    pub data: Array4<u16>,
    pub gain: Array4<u16>,
}

impl ComposedFrames {
    pub fn new(
        modules: Vec<usize>,
        cell_ids: Vec<u16>,
        data: Array4<u16>,
        gain: Array4<u16>,
    ) -> Result<Self, CalibratorError> {
        if data.shape() != gain.shape() || data.shape()[1] != modules.len() {
            return Err(CalibratorError::ShapeMismatch(
                data.shape().to_vec(),
                gain.shape().to_vec(),
            ));
        }
        if cell_ids.len() != data.shape()[0] {
            return Err(CalibratorError::CellCount(cell_ids.len(), data.shape()[0]));
        }
        Ok(Self {
            modules,
            cell_ids,
            data,
            gain,
        })
    }

    /// Read the composed detector data of a consolidated file
    pub fn read(path: &Path) -> Result<Self, CalibratorError> {
        let file = File::open(path)?;
        let group = file
            .group(AGIPD_GROUP)
            .map_err(|_| CalibratorError::NoDetectorData(path.to_path_buf()))?;
        let index = group.group("index")?;
        let modules = group
            .dataset(AGIPD_MODULE_NAME)?
            .read_raw::<u64>()?
            .into_iter()
            .map(|m| m as usize)
            .collect();
        let cell_ids = index.dataset(AGIPD_CELL_NAME)?.read_raw::<u16>()?;
        let data = index.dataset(AGIPD_DATA_NAME)?.read::<u16, Ix4>()?;
        log::info!("Data shape: {:?}", data.shape());
        let gain = index.dataset(AGIPD_GAIN_NAME)?.read::<u16, Ix4>()?;
        log::info!("Gain shape: {:?}", gain.shape());
        log::debug!("Read composed frames from {AGIPD_INDEX_GROUP}");
        Self::new(modules, cell_ids, data, gain)
    }

    pub fn frames(&self) -> usize {
        self.data.shape()[0]
    }

    fn frame_dims(&self) -> (usize, usize) {
        (self.data.shape()[2], self.data.shape()[3])
    }
}

/// Output of a calibration pass. Branch arrays have shape (2, frames, modules, y, x).
#[derive(Debug, Clone)]
pub struct CalibratedResult {
    /// Offset subtracted (and for the nominal branch zero level corrected) samples
    pub adu: Array5<f32>,
    /// 1 where a branch is valid for a pixel
    pub mask: Array5<u8>,
    /// Masked samples scaled to physical units per branch
    pub data: Array5<f32>,
    /// Final corrected value, the sum of both branches
    pub sum: Array4<f32>,
    /// Per (frame, module) zero level of the nominal branch
    pub zero_levels: Array2<f32>,
}

/// Per (branch or table, cell, module) frame lookups, fetched from the reference once
struct FrameCache<'a, R: DarkReference + ?Sized> {
    reference: &'a R,
    offsets: FxHashMap<(usize, usize, usize), Array2<f32>>,
    levels: FxHashMap<(usize, usize), Array2<f32>>,
    good: FxHashMap<usize, Array2<bool>>,
}

impl<'a, R: DarkReference + ?Sized> FrameCache<'a, R> {
    fn new(reference: &'a R) -> Self {
        Self {
            reference,
            offsets: FxHashMap::default(),
            levels: FxHashMap::default(),
            good: FxHashMap::default(),
        }
    }

    fn offset(
        &mut self,
        gain: usize,
        cell: usize,
        module: usize,
    ) -> Result<&Array2<f32>, CalibrationReferenceError> {
        let key = (gain, cell, module);
        if !self.offsets.contains_key(&key) {
            let frame = self.reference.offset(gain, cell, module)?;
            self.offsets.insert(key, frame);
        }
        Ok(&self.offsets[&key])
    }

    fn threshold(&mut self, cell: usize, module: usize) -> Result<&Array2<f32>, CalibrationReferenceError> {
        let key = (cell, module);
        if !self.levels.contains_key(&key) {
            let frame = self.reference.gain_level(MEDIUM_GAIN, cell, module)?;
            self.levels.insert(key, frame);
        }
        Ok(&self.levels[&key])
    }

    fn good(&mut self, module: usize) -> Result<&Array2<bool>, CalibrationReferenceError> {
        if !self.good.contains_key(&module) {
            let frame = self.reference.good_pixels(module)?;
            self.good.insert(module, frame);
        }
        Ok(&self.good[&module])
    }
}

fn check_frame(
    frame: &Array2<impl Clone>,
    dims: (usize, usize),
    table: &str,
    gain: usize,
    cell: usize,
    module: usize,
) -> Result<(), CalibrationReferenceError> {
    if frame.dim() != dims {
        return Err(CalibrationReferenceError::MissingEntry {
            table: table.to_string(),
            gain,
            cell,
            module,
        });
    }
    Ok(())
}

/// Step 1: subtract the dark offset of each branch from the raw samples.
///
/// Samples are promoted to f32 before the subtraction.
pub fn subtract_offsets<R: DarkReference + ?Sized>(
    frames: &ComposedFrames,
    reference: &R,
) -> Result<Array5<f32>, CalibratorError> {
    log::info!("Subtracting offsets...");
    let (height, width) = frames.frame_dims();
    let n_modules = frames.modules.len();
    let mut cache = FrameCache::new(reference);
    let mut adu = Array5::<f32>::zeros((2, frames.frames(), n_modules, height, width));
    for (b, branch) in BRANCHES.iter().enumerate() {
        for (f, cell) in frames.cell_ids.iter().enumerate() {
            for (m, module) in frames.modules.iter().enumerate() {
                let offset = cache.offset(*branch, *cell as usize, *module)?;
                check_frame(offset, (height, width), "offset", *branch, *cell as usize, *module)?;
                let raw = frames.data.slice(s![f, m, .., ..]);
                Zip::from(adu.slice_mut(s![b, f, m, .., ..]))
                    .and(&raw)
                    .and(offset)
                    .for_each(|out, &r, &o| *out = f32::from(r) - o);
            }
        }
    }
    log::info!("Done, ADU data shape: {:?}", adu.shape());
    Ok(adu)
}

/// Step 2: remove the per event zero level from the nominal branch.
///
/// The level of a (frame, module) is the mean of the leading [`FLAT_ROI`] pixel rows and is
/// subtracted from the whole module frame. Returns the levels, shape (frames, modules).
pub fn correct_zero_level(adu: &mut Array5<f32>) -> Array2<f32> {
    log::info!("Baseline correcting...");
    let (_, n_frames, n_modules, height, _) = adu.dim();
    let (lo, hi) = (FLAT_ROI.0.min(height), FLAT_ROI.1.min(height));
    let mut levels = Array2::<f32>::zeros((n_frames, n_modules));
    let mut nominal = adu.index_axis_mut(Axis(0), 0);
    for f in 0..n_frames {
        for m in 0..n_modules {
            let mut frame = nominal.slice_mut(s![f, m, .., ..]);
            let level = frame.slice(s![lo..hi, ..]).mean().unwrap_or(0.0);
            frame.mapv_inplace(|v| v - level);
            levels[[f, m]] = level;
        }
    }
    log::info!(
        "Done, zero levels: {:?}",
        levels.mean_axis(Axis(0)).map(|l| l.to_vec()).unwrap_or_default()
    );
    levels
}

/// Step 3: decide per pixel which gain branch is valid.
///
/// The nominal branch is valid below the medium gain level, the reduced branch above it.
/// Both are cleared on bad pixels.
pub fn build_mask<R: DarkReference + ?Sized>(
    frames: &ComposedFrames,
    reference: &R,
) -> Result<Array5<u8>, CalibratorError> {
    log::info!("Generating mask...");
    let (height, width) = frames.frame_dims();
    let n_modules = frames.modules.len();
    let mut cache = FrameCache::new(reference);
    let mut mask = Array5::<u8>::zeros((2, frames.frames(), n_modules, height, width));
    for (f, cell) in frames.cell_ids.iter().enumerate() {
        for (m, module) in frames.modules.iter().enumerate() {
            let good = cache.good(*module)?.clone();
            check_frame(&good, (height, width), "mask", MEDIUM_GAIN, *cell as usize, *module)?;
            let threshold = cache.threshold(*cell as usize, *module)?;
            check_frame(threshold, (height, width), "gain level", MEDIUM_GAIN, *cell as usize, *module)?;
            let gain = frames.gain.slice(s![f, m, .., ..]);
            let (mut nominal, mut reduced) = mask.multi_slice_mut((
                s![0, f, m, .., ..],
                s![1, f, m, .., ..],
            ));
            Zip::from(&mut nominal)
                .and(&mut reduced)
                .and(&gain)
                .and(threshold)
                .and(&good)
                .for_each(|n, r, &g, &t, &ok| {
                    let g = f32::from(g);
                    *n = u8::from(ok && g < t);
                    *r = u8::from(ok && g > t);
                });
        }
    }
    log::info!("Done, mask shape: {:?}", mask.shape());
    Ok(mask)
}

/// Step 4: apply the mask, scale each branch to physical units and sum the branches
pub fn scale_branches(adu: &Array5<f32>, mask: &Array5<u8>) -> (Array5<f32>, Array4<f32>) {
    let mut data = Array5::<f32>::zeros(adu.raw_dim());
    for (b, factor) in GAIN_FACTORS.iter().enumerate() {
        Zip::from(data.index_axis_mut(Axis(0), b))
            .and(adu.index_axis(Axis(0), b))
            .and(mask.index_axis(Axis(0), b))
            .for_each(|out, &a, &m| *out = a * f32::from(m) * factor);
    }
    let sum = &data.index_axis(Axis(0), 0) + &data.index_axis(Axis(0), 1);
    (data, sum)
}

/// Run the full calibration of composed frames against a dark reference.
///
/// Order matters: offsets, then zero level on the nominal branch, then masking and scaling.
pub fn calibrate<R: DarkReference + ?Sized>(
    frames: &ComposedFrames,
    reference: &R,
) -> Result<CalibratedResult, CalibratorError> {
    let mut adu = subtract_offsets(frames, reference)?;
    let zero_levels = correct_zero_level(&mut adu);
    let mask = build_mask(frames, reference)?;
    let (data, sum) = scale_branches(&adu, &mask);
    Ok(CalibratedResult {
        adu,
        mask,
        data,
        sum,
        zero_levels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dark::MemoryDark;

    const H: usize = 12;
    const W: usize = 2;

    /// One module (id 1) of 12x2 pixels, two memory cells
    fn reference() -> MemoryDark {
        let mut offset = Array5::<f32>::zeros((3, 2, 2, H, W));
        offset.slice_mut(s![0, .., 1, .., ..]).fill(100.0);
        offset.slice_mut(s![1, .., 1, .., ..]).fill(40.0);
        offset.slice_mut(s![0, 1, 1, .., ..]).fill(110.0);
        let mut gain_level = Array5::<f32>::zeros((3, 2, 2, H, W));
        gain_level.fill(1000.0);
        let mut bad_pixels = Array2::<u8>::zeros((2 * H, W));
        // module 1, pixel (11, 1) is bad
        bad_pixels[[H + 11, 1]] = 1;
        MemoryDark {
            offset,
            gain_level,
            bad_pixels,
            module_height: H,
            mask_inverted: true,
        }
    }

    fn frames(values: u16, gains: u16) -> ComposedFrames {
        ComposedFrames::new(
            vec![1],
            vec![0, 1],
            Array4::from_elem((2, 1, H, W), values),
            Array4::from_elem((2, 1, H, W), gains),
        )
        .unwrap()
    }

    #[test]
    fn test_offsets_per_branch_and_cell() {
        let adu = subtract_offsets(&frames(150, 0), &reference()).unwrap();
        assert_eq!(adu[[0, 0, 0, 0, 0]], 50.0);
        assert_eq!(adu[[0, 1, 0, 0, 0]], 40.0);
        assert_eq!(adu[[1, 0, 0, 3, 1]], 110.0);
    }

    #[test]
    fn test_zero_level_only_touches_nominal_branch() {
        let mut input = frames(150, 0);
        // Rows beyond the flat window carry signal
        input.data.slice_mut(s![.., .., 10.., ..]).fill(170);
        let mut adu = subtract_offsets(&input, &reference()).unwrap();
        let levels = correct_zero_level(&mut adu);
        assert_eq!(levels[[0, 0]], 50.0);
        assert_eq!(levels[[1, 0]], 40.0);
        assert_eq!(adu[[0, 0, 0, 0, 0]], 0.0);
        assert_eq!(adu[[0, 0, 0, 11, 0]], 20.0);
        assert_eq!(adu[[1, 0, 0, 11, 0]], 130.0);
    }

    #[test]
    fn test_mask_thresholds_and_bad_pixels() {
        let mut input = frames(150, 500);
        input.gain.slice_mut(s![1, .., .., ..]).fill(1500);
        input.gain[[0, 0, 5, 0]] = 1000;
        let mask = build_mask(&input, &reference()).unwrap();
        assert_eq!(mask[[0, 0, 0, 0, 0]], 1);
        assert_eq!(mask[[1, 0, 0, 0, 0]], 0);
        assert_eq!(mask[[0, 1, 0, 0, 0]], 0);
        assert_eq!(mask[[1, 1, 0, 0, 0]], 1);
        // exactly at threshold is valid for neither branch
        assert_eq!(mask[[0, 0, 0, 5, 0]], 0);
        assert_eq!(mask[[1, 0, 0, 5, 0]], 0);
        // bad pixel
        assert_eq!(mask[[0, 0, 0, 11, 1]], 0);
        assert_eq!(mask[[1, 1, 0, 11, 1]], 0);
    }

    #[test]
    fn test_full_calibration_sum() {
        let mut input = frames(150, 500);
        input.data.slice_mut(s![.., .., 10.., ..]).fill(218);
        let result = calibrate(&input, &reference()).unwrap();
        // frame 0 nominal: 218 - 100 - 50 = 68 ADU, scaled by 1/68.8
        let expected = 68.0 * GAIN_FACTORS[0];
        assert!((result.sum[[0, 0, 10, 0]] - expected).abs() < 1e-6);
        assert_eq!(result.data[[1, 0, 0, 10, 0]], 0.0);
        assert_eq!(result.sum[[0, 0, 11, 1]], 0.0);
        assert_eq!(result.zero_levels.dim(), (2, 1));
    }

    #[test]
    fn test_masking_before_zero_level_changes_result() {
        let mut input = frames(150, 500);
        // Half the flat window lies in the reduced branch
        input.gain.slice_mut(s![.., .., 0..5, ..]).fill(1500);
        input.data.slice_mut(s![.., .., 10.., ..]).fill(300);
        let dark = reference();
        let expected = calibrate(&input, &dark).unwrap();

        let mut adu = subtract_offsets(&input, &dark).unwrap();
        let mask = build_mask(&input, &dark).unwrap();
        Zip::from(&mut adu).and(&mask).for_each(|a, &m| *a *= f32::from(m));
        correct_zero_level(&mut adu);
        let (_, swapped) = scale_branches(&adu, &mask);

        assert_ne!(expected.sum, swapped);
    }

    #[test]
    fn test_missing_reference_module() {
        let input = ComposedFrames::new(
            vec![7],
            vec![0],
            Array4::zeros((1, 1, H, W)),
            Array4::zeros((1, 1, H, W)),
        )
        .unwrap();
        assert!(matches!(
            calibrate(&input, &reference()),
            Err(CalibratorError::ReferenceError(
                CalibrationReferenceError::MissingEntry { module: 7, .. }
            ))
        ));
    }
}
