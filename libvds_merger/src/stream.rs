use bitvec::vec::BitVec;
use std::fmt::Display;

use super::constants::NUMBER_OF_MODULES;
use super::error::ConfigError;
use super::source_file::SourceFile;

/// Identity of one acquisition stream.
///
/// The primary detector is split into modules, each an independent stream. Auxiliary
/// detectors are single streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamId {
    Module(usize),
    Auxiliary(usize),
}

impl Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Module(id) => write!(f, "AGIPD{id:02}"),
            Self::Auxiliary(id) => write!(f, "EPIX-{id:02}"),
        }
    }
}

/// A stream and its files, in timeline order
#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    pub files: Vec<Box<dyn SourceFile>>,
}

impl Stream {
    pub fn new(id: StreamId, files: Vec<Box<dyn SourceFile>>) -> Self {
        Self { id, files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// All streams discovered for one run
#[derive(Debug, Default)]
pub struct RunStreams {
    /// One entry per configured module, possibly without files
    pub modules: Vec<Stream>,
    /// Auxiliary streams in precedence order, possibly without files
    pub auxiliary: Vec<Stream>,
}

impl RunStreams {
    pub fn module(&self, module_id: usize) -> Option<&Stream> {
        self.modules
            .iter()
            .find(|s| s.id == StreamId::Module(module_id))
    }

    pub fn auxiliary(&self, aux_id: usize) -> Option<&Stream> {
        self.auxiliary
            .iter()
            .find(|s| s.id == StreamId::Auxiliary(aux_id))
    }

    pub fn total_files(&self) -> usize {
        self.modules
            .iter()
            .chain(self.auxiliary.iter())
            .map(|s| s.files.len())
            .sum()
    }
}

/// Which module slots of the primary detector take part in processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMask {
    bits: BitVec,
}

impl ModuleMask {
    pub fn from_modules(modules: &[usize]) -> Result<Self, ConfigError> {
        let mut bits = BitVec::repeat(false, NUMBER_OF_MODULES);
        for module in modules {
            if *module >= NUMBER_OF_MODULES {
                return Err(ConfigError::BadModule(*module));
            }
            bits.set(*module, true);
        }
        Ok(Self { bits })
    }

    pub fn is_active(&self, module: usize) -> bool {
        self.bits.get(module).map(|b| *b).unwrap_or(false)
    }

    pub fn clear(&mut self, module: usize) {
        if module < self.bits.len() {
            self.bits.set(module, false);
        }
    }

    /// Active module ids in ascending order
    pub fn active(&self) -> Vec<usize> {
        self.bits.iter_ones().collect()
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_mask() {
        let mut mask = ModuleMask::from_modules(&[3, 0, 15]).unwrap();
        assert_eq!(mask.active(), vec![0, 3, 15]);
        mask.clear(3);
        assert!(!mask.is_active(3));
        assert_eq!(mask.count(), 2);
        assert!(matches!(
            ModuleMask::from_modules(&[16]),
            Err(ConfigError::BadModule(16))
        ));
    }
}
