use ndarray::{ArrayD, Axis, IxDyn, Slice};
use std::ops::Range;
use std::path::{Path, PathBuf};

use super::error::{ComposerError, SourceFileError};
use super::source_file::SourceFile;

/// Where a binding reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub name: String,
    pub file_path: PathBuf,
    pub data_key: String,
    /// Full shape of the source sample array
    pub extents: Vec<usize>,
}

impl SourceRef {
    pub fn new(file: &dyn SourceFile, rows: usize) -> Result<Self, SourceFileError> {
        let mut extents = vec![rows];
        extents.extend(file.frame_shape()?);
        Ok(Self {
            name: file.name(),
            file_path: file.file_path().to_path_buf(),
            data_key: file.data_key().to_string(),
            extents,
        })
    }

    pub fn frame_dims(&self) -> &[usize] {
        &self.extents[1..]
    }
}

/// One batch of source rows mapped onto consecutive output rows.
///
/// A batch never holds more rows than one storage chunk of its source. The source rows are
/// kept as runs of contiguous rows so each run maps to a single hyperslab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// First output row
    pub offset: usize,
    /// Output column (module slot), if the output has one
    pub column: Option<usize>,
    /// Leading frame index selected in the source, if any
    pub plane: Option<usize>,
    pub source: SourceRef,
    pub runs: Vec<Range<usize>>,
}

impl Binding {
    pub fn len(&self) -> usize {
        self.runs.iter().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Each run paired with the output rows it fills
    pub fn mapped_runs(&self) -> impl Iterator<Item = (Range<usize>, Range<usize>)> + '_ {
        let mut offset = self.offset;
        self.runs.iter().map(move |run| {
            let out = offset..offset + run.len();
            offset += run.len();
            (run.clone(), out)
        })
    }
}

/// Split row indices into runs of consecutive ascending rows
pub fn contiguous_runs(rows: &[usize]) -> Vec<Range<usize>> {
    let mut runs: Vec<Range<usize>> = Vec::new();
    for row in rows {
        match runs.last_mut() {
            Some(run) if run.end == *row => run.end += 1,
            _ => runs.push(*row..*row + 1),
        }
    }
    runs
}

/// Incrementally builds the bindings of an output dataset.
///
/// Each output column keeps its own fill counter; rows pushed to a column land at the next
/// unfilled offset.
#[derive(Debug, Clone)]
pub struct LayoutBuilder {
    name: String,
    shape: Vec<usize>,
    bindings: Vec<Binding>,
    offsets: Vec<usize>,
}

impl LayoutBuilder {
    /// `columns` is the number of independent column slots, 1 for single stream outputs
    pub fn new(name: &str, shape: Vec<usize>, columns: usize) -> Self {
        Self {
            name: name.to_string(),
            shape,
            bindings: Vec::new(),
            offsets: vec![0; columns.max(1)],
        }
    }

    pub fn frames(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Rows filled so far in a column
    pub fn filled(&self, column: usize) -> usize {
        self.offsets.get(column).copied().unwrap_or(0)
    }

    /// Bind a batch of source rows to the next free rows of `column`
    pub fn push(
        &mut self,
        column: Option<usize>,
        plane: Option<usize>,
        source: &SourceRef,
        rows: &[usize],
    ) -> Result<(), ComposerError> {
        if rows.is_empty() {
            return Ok(());
        }
        let slot = column.unwrap_or(0);
        let frames = self.frames();
        let offset = match self.offsets.get_mut(slot) {
            Some(o) => o,
            None => {
                return Err(ComposerError::ColumnOverflow {
                    column: slot,
                    offset: 0,
                    frames,
                })
            }
        };
        if *offset + rows.len() > frames {
            return Err(ComposerError::ColumnOverflow {
                column: slot,
                offset: *offset + rows.len(),
                frames,
            });
        }
        self.bindings.push(Binding {
            offset: *offset,
            column,
            plane,
            source: source.clone(),
            runs: contiguous_runs(rows),
        });
        *offset += rows.len();
        Ok(())
    }

    /// Finalize the layout. No binding can be added afterwards.
    pub fn commit(self) -> VirtualLayout {
        VirtualLayout {
            name: self.name,
            shape: self.shape,
            bindings: self.bindings,
            filled: self.offsets,
        }
    }
}

/// A committed, immutable mapping of output rows onto source rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualLayout {
    name: String,
    shape: Vec<usize>,
    bindings: Vec<Binding>,
    filled: Vec<usize>,
}

impl VirtualLayout {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Rows filled per column
    pub fn filled(&self) -> &[usize] {
        &self.filled
    }

    /// Realize the layout by copying every bound row out of its source.
    ///
    /// Rows which no binding covers stay zero. `sources` must contain every file the layout
    /// references.
    pub fn materialize(&self, sources: &[&dyn SourceFile]) -> Result<ArrayD<u16>, SourceFileError> {
        let mut output = ArrayD::<u16>::zeros(IxDyn(&self.shape));
        for binding in self.bindings.iter() {
            let source = find_source(sources, &binding.source.file_path)
                .ok_or_else(|| SourceFileError::BadFilePath(binding.source.file_path.clone()))?;
            for (run, out) in binding.mapped_runs() {
                let rows = source.read_rows(run)?;
                let rows = match binding.plane {
                    Some(p) => rows.index_axis_move(Axis(1), p),
                    None => rows,
                };
                let mut target = output.slice_axis_mut(Axis(0), Slice::from(out));
                match binding.column {
                    Some(c) => target.index_axis_mut(Axis(1), c).assign(&rows),
                    None => target.assign(&rows),
                }
            }
        }
        Ok(output)
    }
}

fn find_source<'a>(sources: &[&'a dyn SourceFile], path: &Path) -> Option<&'a dyn SourceFile> {
    sources.iter().find(|s| s.file_path() == path).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_ref() -> SourceRef {
        SourceRef {
            name: String::from("f"),
            file_path: PathBuf::from("f"),
            data_key: String::from("data"),
            extents: vec![100, 2, 2],
        }
    }

    #[test]
    fn test_contiguous_runs() {
        assert_eq!(contiguous_runs(&[1, 2, 3, 7, 8, 10]), vec![1..4, 7..9, 10..11]);
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[test]
    fn test_offsets_advance_per_column() {
        let src = source_ref();
        let mut builder = LayoutBuilder::new("d", vec![4, 2, 2, 2], 2);
        builder.push(Some(0), None, &src, &[0, 1]).unwrap();
        builder.push(Some(1), None, &src, &[5]).unwrap();
        builder.push(Some(0), None, &src, &[9, 11]).unwrap();
        let layout = builder.commit();
        let offsets: Vec<(Option<usize>, usize)> =
            layout.bindings().iter().map(|b| (b.column, b.offset)).collect();
        assert_eq!(offsets, vec![(Some(0), 0), (Some(1), 0), (Some(0), 2)]);
        assert_eq!(layout.filled(), &[4, 1]);
        assert_eq!(layout.bindings()[2].runs, vec![9..10, 11..12]);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let src = source_ref();
        let mut builder = LayoutBuilder::new("d", vec![2, 2, 2], 1);
        builder.push(None, None, &src, &[0, 1]).unwrap();
        assert!(matches!(
            builder.push(None, None, &src, &[2]),
            Err(ComposerError::ColumnOverflow { .. })
        ));
    }
}
