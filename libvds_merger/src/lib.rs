//! # vds_merger
//!
//! vds_merger builds consolidated run files for the AGIPD 1M detector and the two ePix
//! detectors of the MID instrument at the European XFEL, written in Rust. The DAQ writes
//! every AGIPD module and every ePix into its own sequence of HDF5 files. vds_merger finds
//! the acquisition events (trains) common to all of them, and writes a single HDF5 file per
//! run in which the detector data are virtual datasets pointing back into the source files.
//! No sample is copied. Optionally, a dark calibration is applied to the AGIPD frames.
//!
//! ## Installation
//!
//! HDF5 (1.10 or later, for virtual dataset support) must be installed. If the Rust libraries
//! cannot locate it, write the following into `.cargo/config.toml` of the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! To build and install the CLI use `cargo install --path ./vds_merger_cli`.
//!
//! ## Configuration
//!
//! ```yml
//! out_path: /path/to/output
//! base_path: /gpfs/exfel/exp/MID/202201/p002985
//! dark_path: /path/to/dark.h5
//! modules: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
//! pulse_ids: [0]
//! raw: true
//! first_run_number: 0
//! last_run_number: 0
//! calibrate: false
//! n_threads: 1
//! module_shape: [512, 128]
//! mask_inverted: true
//! ```
//!
//! - `raw` selects the `raw/` or the `proc/` tree of `base_path`.
//! - `pulse_ids` selects the AGIPD pulses kept in every train.
//! - `mask_inverted` means the dark file flags bad pixels with non zero values.
//!
//! ## Output
//!
//! ```text
//! hdf5/r0001.h5 - data (creation time)
//! index
//! |---- run, stream, trainId
//! data
//! |---- AGIPD
//! |    |---- moduleId
//! |    |---- index
//! |    |    |---- trainId, pulseId, cellId
//! |    |    |---- data(virtual, frames x modules x 512 x 128)
//! |    |    |---- gain(virtual, frames x modules x 512 x 128)
//! |---- EPIX-1, EPIX-2
//! |    |---- data(virtual)
//! |---- AGIPD_calibrated
//! |    |---- adu, mask, data, sum, zero_level
//! ```
//!
//! Every dataset of a file follows the same train order. A run without AGIPD files but with
//! ePix files still produces a file with only the ePix groups.
pub mod alignment;
pub mod calibrator;
pub mod catalog;
pub mod composer;
pub mod config;
pub mod constants;
pub mod dark;
pub mod error;
pub mod hdf_writer;
pub mod index_set;
pub mod process;
pub mod source_file;
pub mod stream;
pub mod virtual_layout;
pub mod worker_status;
