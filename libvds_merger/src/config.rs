use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::{DEFAULT_MODULE_SHAPE, EPIX_IDS};
use super::error::ConfigError;
use super::stream::ModuleMask;

fn default_module_shape() -> [usize; 2] {
    DEFAULT_MODULE_SHAPE
}

fn default_mask_inverted() -> bool {
    true
}

/// Structure representing the application configuration. Contains pathing, detector and run information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Where the `hdf5/` directory of consolidated files is created
    pub out_path: PathBuf,
    /// Root of the acquisition data, containing `raw/` and `proc/`
    pub base_path: PathBuf,
    pub dark_path: Option<PathBuf>,
    pub modules: Vec<usize>,
    pub pulse_ids: Vec<u64>,
    /// Read from `raw/` when true, `proc/` otherwise
    pub raw: bool,
    pub first_run_number: i32,
    pub last_run_number: i32,
    pub calibrate: bool,
    pub n_threads: i32,
    #[serde(default = "default_module_shape")]
    pub module_shape: [usize; 2],
    #[serde(default = "default_mask_inverted")]
    pub mask_inverted: bool,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be invalid
    fn default() -> Self {
        Self {
            out_path: PathBuf::from("None"),
            base_path: PathBuf::from("None"),
            dark_path: None,
            modules: (0..16).collect(),
            pulse_ids: vec![0],
            raw: true,
            first_run_number: 0,
            last_run_number: 0,
            calibrate: false,
            n_threads: 1,
            module_shape: DEFAULT_MODULE_SHAPE,
            mask_inverted: true,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        // Reject out of range modules early
        config.module_mask()?;
        Ok(config)
    }

    /// Write the configuration as YAML
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// The data stream tag, `raw` or `proc`
    pub fn tag(&self) -> &'static str {
        if self.raw {
            "raw"
        } else {
            "proc"
        }
    }

    /// Get the directory holding the source files of a run
    pub fn run_directory(&self, run_number: i32) -> PathBuf {
        self.base_path
            .join(self.tag())
            .join(self.get_run_str(run_number))
    }

    /// Get the path to the output hdf5 file, creating its directory if needed
    pub fn hdf_file_name(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        let hdf_dir = self.out_path.join("hdf5");
        if !hdf_dir.exists() {
            std::fs::create_dir_all(&hdf_dir)?;
        }
        Ok(hdf_dir.join(format!("{}.h5", self.get_run_str(run_number))))
    }

    /// Get the path to the dark calibration file, if one is configured
    pub fn dark_file(&self) -> Result<Option<PathBuf>, ConfigError> {
        match self.dark_path.as_ref() {
            None => Ok(None),
            Some(path) if path.exists() => Ok(Some(path.clone())),
            Some(path) => Err(ConfigError::BadFilePath(path.clone())),
        }
    }

    pub fn module_mask(&self) -> Result<ModuleMask, ConfigError> {
        ModuleMask::from_modules(&self.modules)
    }

    /// Auxiliary detectors, in alignment precedence order
    pub fn auxiliary_ids(&self) -> &'static [usize] {
        &EPIX_IDS
    }

    /// Construct the run string using the EuXFEL DAQ format
    fn get_run_str(&self, run_number: i32) -> String {
        format!("r{run_number:0>4}")
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            out_path: dir.path().join("out"),
            base_path: PathBuf::from("/gpfs/exfel/exp/MID/202201/p002985"),
            raw: false,
            ..Default::default()
        };
        assert_eq!(
            config.run_directory(7),
            PathBuf::from("/gpfs/exfel/exp/MID/202201/p002985/proc/r0007")
        );
        let hdf = config.hdf_file_name(123).unwrap();
        assert_eq!(hdf, dir.path().join("out/hdf5/r0123.h5"));
        assert!(dir.path().join("out/hdf5").is_dir());
    }

    #[test]
    fn test_yaml_defaults_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "out_path: /tmp/out\nbase_path: /tmp/base\ndark_path: null\nmodules: [0, 3]\n\
             pulse_ids: [1, 2]\nraw: true\nfirst_run_number: 1\nlast_run_number: 4\n\
             calibrate: false\nn_threads: 2\n",
        )
        .unwrap();
        let config = Config::read_config_file(&path).unwrap();
        assert_eq!(config.module_shape, DEFAULT_MODULE_SHAPE);
        assert!(config.mask_inverted);
        assert_eq!(config.module_mask().unwrap().active(), vec![0, 3]);

        config.write_config_file(&path).unwrap();
        assert_eq!(Config::read_config_file(&path).unwrap(), config);
    }

    #[test]
    fn test_bad_module_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let config = Config {
            modules: vec![2, 16],
            ..Default::default()
        };
        config.write_config_file(&path).unwrap();
        assert!(matches!(
            Config::read_config_file(&path),
            Err(ConfigError::BadModule(16))
        ));
    }
}
