//! Compressed sparse matrices used for the training data and the cluster model.

use log::debug;

use crate::error::{RefineErr, Result, Stage};

/// A borrowed sparse vector: sorted indices and their values.
#[derive(Debug, Clone, Copy)]
pub struct SparseVec<'a> {
    indices: &'a [u32],
    values: &'a [f32],
}

/// One row of a `CsrMatrix`, indices are column ids.
pub type SparseRow<'a> = SparseVec<'a>;

/// One column of a `CsrMatrix`'s column index, indices are row ids.
pub type SparseCol<'a> = SparseVec<'a>;

impl<'a> SparseVec<'a> {
    const EMPTY: SparseVec<'static> = SparseVec {
        indices: &[],
        values: &[],
    };

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(self) -> impl Iterator<Item = (usize, f32)> + 'a {
        self.indices
            .iter()
            .zip(self.values)
            .map(|(&idx, &val)| (idx as usize, val))
    }

    /// Looks up the value stored at `idx`, absent entries are zero.
    pub fn get(&self, idx: usize) -> f32 {
        let Ok(idx) = u32::try_from(idx) else {
            return 0.;
        };

        self.indices
            .binary_search(&idx)
            .map(|pos| self.values[pos])
            .unwrap_or(0.)
    }

    /// Sparse dot product of two vectors over the same index space.
    pub fn dot(&self, other: &SparseVec<'_>) -> f64 {
        let (mut i, mut j) = (0, 0);
        let mut acc = 0.;

        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    acc += f64::from(self.values[i]) * f64::from(other.values[j]);
                    i += 1;
                    j += 1;
                }
            }
        }

        acc
    }
}

#[derive(Debug, Clone)]
struct ColIndex {
    ncols: usize,
    colptr: Vec<usize>,
    rowind: Vec<u32>,
    values: Vec<f32>,
}

/// Row compressed sparse matrix with an optional column index.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    rowptr: Vec<usize>,
    colind: Vec<u32>,
    values: Vec<f32>,
    col_index: Option<ColIndex>,
}

impl CsrMatrix {
    /// Builds a matrix from its rows.
    ///
    /// The declared column count is one past the largest populated column,
    /// so trailing empty columns are not part of it until `ensure_columns`.
    ///
    /// # Arguments
    /// * `rows` - For every row, its `(column, value)` entries in any order.
    pub fn from_rows<R>(rows: R) -> Self
    where
        R: IntoIterator<Item = Vec<(u32, f32)>>,
    {
        let mut rowptr = vec![0];
        let mut colind = Vec::new();
        let mut values = Vec::new();
        let mut ncols = 0;

        for mut row in rows {
            row.sort_unstable_by_key(|&(col, _)| col);

            for (col, val) in row {
                ncols = ncols.max(col as usize + 1);
                colind.push(col);
                values.push(val);
            }

            rowptr.push(colind.len());
        }

        Self {
            nrows: rowptr.len() - 1,
            ncols,
            rowptr,
            colind,
            values,
            col_index: None,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.colind.len()
    }

    /// Returns row `i`, or an empty row if `i` is out of range.
    pub fn row(&self, i: usize) -> SparseRow<'_> {
        if i >= self.nrows {
            return SparseVec::EMPTY;
        }

        let span = self.rowptr[i]..self.rowptr[i + 1];
        SparseVec {
            indices: &self.colind[span.clone()],
            values: &self.values[span],
        }
    }

    /// Whether a column index covering every declared column exists.
    pub fn has_col_index(&self) -> bool {
        self.col_index
            .as_ref()
            .is_some_and(|index| index.ncols == self.ncols)
    }

    /// Returns column `j` through the column index.
    ///
    /// # Returns
    /// `None` if there is no up to date column index or `j` is not a declared column.
    pub fn col(&self, j: usize) -> Option<SparseCol<'_>> {
        let index = self.col_index.as_ref().filter(|_| self.has_col_index())?;
        if j >= index.ncols {
            return None;
        }

        let span = index.colptr[j]..index.colptr[j + 1];
        Some(SparseVec {
            indices: &index.rowind[span.clone()],
            values: &index.values[span],
        })
    }

    /// (Re)builds the column index over the declared column count.
    pub fn create_col_index(&mut self) {
        let ncols = self.ncols;
        let mut colptr = vec![0; ncols + 1];

        for &col in &self.colind {
            colptr[col as usize + 1] += 1;
        }

        for j in 0..ncols {
            colptr[j + 1] += colptr[j];
        }

        let mut cursor = colptr.clone();
        let mut rowind = vec![0; self.colind.len()];
        let mut values = vec![0.; self.colind.len()];

        // Rows are visited in order, so every column ends up sorted by row.
        for i in 0..self.nrows {
            for pos in self.rowptr[i]..self.rowptr[i + 1] {
                let col = self.colind[pos] as usize;
                let slot = cursor[col];
                rowind[slot] = i as u32;
                values[slot] = self.values[pos];
                cursor[col] += 1;
            }
        }

        self.col_index = Some(ColIndex {
            ncols,
            colptr,
            rowind,
            values,
        });
    }

    /// Widens the declared column count to at least `min_cols` and makes sure
    /// the column index covers it.
    ///
    /// Calling it again with the same or a smaller width is a no-op.
    pub fn ensure_columns(&mut self, min_cols: usize) {
        if min_cols > self.ncols {
            debug!(from = self.ncols, to = min_cols; "widening model columns");
            self.ncols = min_cols;
        }

        if !self.has_col_index() {
            self.create_col_index();
        }
    }

    /// Borrows the column block of `cluster`, `width` columns wide.
    ///
    /// # Returns
    /// A `LengthMismatch` error if the block isn't covered by the column index.
    pub fn cluster_slice(&self, cluster: usize, width: usize) -> Result<ClusterSlice<'_>> {
        let needed = (cluster + 1) * width;
        let indexed = if self.has_col_index() { self.ncols } else { 0 };

        if needed > indexed {
            return Err(RefineErr::LengthMismatch {
                stage: Stage::Optimize,
                what: "indexed model columns",
                got: indexed,
                expected: needed,
            });
        }

        Ok(ClusterSlice {
            model: self,
            cluster,
            offset: cluster * width,
            width,
        })
    }
}

/// The model columns belonging to a single cluster.
#[derive(Debug, Clone, Copy)]
pub struct ClusterSlice<'a> {
    model: &'a CsrMatrix,
    cluster: usize,
    offset: usize,
    width: usize,
}

impl<'a> ClusterSlice<'a> {
    pub fn cluster(&self) -> usize {
        self.cluster
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Column `i` of the block, relative to the block start.
    pub fn column(&self, i: usize) -> SparseCol<'a> {
        if i >= self.width {
            return SparseVec::EMPTY;
        }

        self.model
            .col(self.offset + i)
            .unwrap_or(SparseVec::EMPTY)
    }
}
