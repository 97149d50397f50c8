use std::path::{Path, PathBuf};

use super::error::CatalogError;
use super::source_file::{Hdf5Source, SourceFile, SourceLayout};
use super::stream::{ModuleMask, RunStreams, Stream, StreamId};

/// The SourceCatalog finds the acquisition files of every stream in a run directory.
///
/// EuXFEL DAQ files are split into sequences (`-S00000.h5`, `-S00001.h5`, ...). The sequence
/// number is the only thing which changes at the tail of a name, so sorting by file name
/// gives the timeline order of a stream.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    run_dir: PathBuf,
    run_number: i32,
}

impl SourceCatalog {
    pub fn new(run_dir: &Path, run_number: i32) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            run_number,
        }
    }

    /// The pattern a file name must contain to belong to a stream
    fn pattern(&self, id: &StreamId) -> String {
        match id {
            StreamId::Module(module) => format!("-AGIPD{module:02}-S"),
            StreamId::Auxiliary(epix) => format!("-R{:04}-EPIX{epix:02}-S", self.run_number),
        }
    }

    /// Find all files of a stream, sorted by name. Finding nothing is not an error.
    pub fn discover(&self, id: &StreamId) -> Result<Vec<PathBuf>, CatalogError> {
        if !self.run_dir.exists() {
            log::warn!("Run directory {} does not exist", self.run_dir.display());
            return Ok(vec![]);
        }
        let pattern = self.pattern(id);
        let end_pattern = ".h5";
        let mut file_list: Vec<PathBuf> = Vec::new();
        for item in self.run_dir.read_dir()? {
            let item_path = item?.path();
            let name = match item_path.file_name() {
                Some(n) => n.to_string_lossy().to_string(),
                None => continue,
            };
            if name.contains(&pattern) && name.ends_with(end_pattern) {
                file_list.push(item_path);
            }
        }
        file_list.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(file_list)
    }

    /// Discover a stream and open its files
    pub fn open_stream(&self, id: StreamId) -> Result<Stream, CatalogError> {
        let layout = match id {
            StreamId::Module(module) => SourceLayout::AgipdModule(module),
            StreamId::Auxiliary(epix) => SourceLayout::Epix(epix),
        };
        let mut files: Vec<Box<dyn SourceFile>> = Vec::new();
        let mut total_bytes = 0;
        for path in self.discover(&id)? {
            let source = Hdf5Source::new(&path, layout)?;
            total_bytes += source.size_bytes();
            files.push(Box::new(source));
        }
        if !files.is_empty() {
            log::info!(
                "Found {} files for {id} with total size {}",
                files.len(),
                human_bytes::human_bytes(total_bytes as f64)
            );
        }
        Ok(Stream::new(id, files))
    }

    /// Open every configured module and auxiliary stream of the run
    pub fn open_run(
        &self,
        mask: &ModuleMask,
        auxiliary: &[usize],
    ) -> Result<RunStreams, CatalogError> {
        let mut streams = RunStreams::default();
        for module in mask.active() {
            streams.modules.push(self.open_stream(StreamId::Module(module))?);
        }
        for aux in auxiliary {
            streams
                .auxiliary
                .push(self.open_stream(StreamId::Auxiliary(*aux))?);
        }
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_discover_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "RAW-R0042-AGIPD03-S00002.h5");
        touch(dir.path(), "RAW-R0042-AGIPD03-S00000.h5");
        touch(dir.path(), "RAW-R0042-AGIPD03-S00001.h5");
        touch(dir.path(), "RAW-R0042-AGIPD04-S00000.h5");
        touch(dir.path(), "RAW-R0042-AGIPD03-S00003.txt");
        let catalog = SourceCatalog::new(dir.path(), 42);
        let files = catalog.discover(&StreamId::Module(3)).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "RAW-R0042-AGIPD03-S00000.h5",
                "RAW-R0042-AGIPD03-S00001.h5",
                "RAW-R0042-AGIPD03-S00002.h5",
            ]
        );
    }

    #[test]
    fn test_discover_epix_uses_run_number() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "RAW-R0042-EPIX01-S00000.h5");
        touch(dir.path(), "RAW-R0043-EPIX01-S00000.h5");
        let catalog = SourceCatalog::new(dir.path(), 42);
        let files = catalog.discover(&StreamId::Auxiliary(1)).unwrap();
        assert_eq!(files.len(), 1);
        assert!(catalog.discover(&StreamId::Auxiliary(2)).unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let catalog = SourceCatalog::new(Path::new("/does/not/exist/r0001"), 1);
        assert!(catalog.discover(&StreamId::Module(0)).unwrap().is_empty());
    }
}
