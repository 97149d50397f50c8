use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum SourceFileError {
    #[error("SourceFile failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("SourceFile {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("SourceFile {file} has mismatched index lengths -- trains: {trains} pulses: {pulses} cells: {cells}")]
    MismatchedIndex {
        file: String,
        trains: usize,
        pulses: usize,
        cells: usize,
    },
    #[error("SourceFile {file} was asked for rows {start}..{end} but only has {rows} rows")]
    RowsOutOfRange {
        file: String,
        start: usize,
        end: usize,
        rows: usize,
    },
    #[error("SourceFile {0} has no storage chunk layout")]
    NotChunked(String),
    #[error("SourceFile failed to reshape rows: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("SourceCatalog failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("SourceCatalog failed due to SourceFile error: {0}")]
    FileError(#[from] SourceFileError),
}

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("No files, bad run number {0}")]
    NoData(i32),
    #[error("No AGIPD module of run {0} has agreeing train indices")]
    Inconsistent(i32),
    #[error("Alignment failed due to SourceFile error: {0}")]
    FileError(#[from] SourceFileError),
}

#[derive(Debug, Error)]
pub enum ComposerError {
    #[error("Storage chunk layout of {0} is absent or unreadable")]
    StorageChunk(String),
    #[error("Composer failed due to SourceFile error: {0}")]
    FileError(#[from] SourceFileError),
    #[error("Composer received a stream with no files: {0}")]
    EmptyStream(String),
    #[error("Composer found no row in {stream} for train {train}, pulse {pulse}")]
    MissingFrame {
        stream: String,
        train: u64,
        pulse: u64,
    },
    #[error("Composer overflowed output column {column}: offset {offset} exceeds {frames} frames")]
    ColumnOverflow {
        column: usize,
        offset: usize,
        frames: usize,
    },
}

#[derive(Debug, Error)]
pub enum CalibrationReferenceError {
    #[error("Dark reference file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Dark reference is missing table {0}")]
    MissingTable(String),
    #[error("Dark reference table {table} has no entry for gain {gain}, cell {cell}, module {module}")]
    MissingEntry {
        table: String,
        gain: usize,
        cell: usize,
        module: usize,
    },
    #[error("Dark reference bad pixel mask has no rows for module {0}")]
    MissingMask(usize),
    #[error("Dark reference failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
}

#[derive(Debug, Error)]
pub enum CalibratorError {
    #[error("Calibrator failed due to reference error: {0}")]
    ReferenceError(#[from] CalibrationReferenceError),
    #[error("Calibrator failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Calibrator received mismatched shapes -- data: {0:?} gain: {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),
    #[error("Calibrator received {0} cell ids for {1} frames")]
    CellCount(usize, usize),
    #[error("Calibrator was given a file without AGIPD data: {0:?}")]
    NoDetectorData(PathBuf),
    #[error("Calibrator failed due to HDF5Writer error: {0}")]
    WriterError(#[from] HDF5WriterError),
}

#[derive(Debug, Error)]
pub enum HDF5WriterError {
    #[error("HDF5Writer failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HDF5Writer failed to format the creation time: {0}")]
    TimeError(#[from] time::error::Format),
    #[error("HDF5Writer could not store string {0:?}")]
    BadString(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config lists module {0} but the detector only has {max} modules", max = super::constants::NUMBER_OF_MODULES)]
    BadModule(usize),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Catalog error: {0}")]
    CatalogError(#[from] CatalogError),
    #[error("Processor failed due to Alignment error: {0}")]
    AlignmentError(#[from] AlignmentError),
    #[error("Processor failed due to Composer error: {0}")]
    ComposerError(#[from] ComposerError),
    #[error("Processor failed due to HDF5Writer error: {0}")]
    HDFError(#[from] HDF5WriterError),
    #[error("Processor failed due to Calibrator error: {0}")]
    CalibratorError(#[from] CalibratorError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}
