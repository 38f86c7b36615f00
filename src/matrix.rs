//! The global sparse matrix container and its two-phase build API.
//!
//! Construction is modeled as a small state machine: row sizes are reserved
//! first, then column indices are filled in, and only then does the matrix
//! become fillable with values. Calls out of sequence are programming
//! errors, not data errors, and panic immediately.
//!
//! The value phase enforces the frozen sparsity pattern: writes to an entry
//! the pattern does not cover are reported as [`AssemblyError::PatternViolation`],
//! never silently dropped, since a dropped entry would corrupt the assembled
//! system. Reads of structurally absent entries inside the matrix bounds
//! yield zero.
//!
//! When several threads assemble into the same matrix concurrently, the
//! caller must impose a write discipline (per-row locking, atomic adds or a
//! coloring scheme that keeps rows disjoint); `add` is commutative per
//! entry, so the assembled values are independent of flush order once such
//! a discipline is in place.

use std::marker::PhantomData;

use itertools::izip;
use nalgebra::{DMatrix, Scalar};
use num::{One, Zero};

use crate::error::AssemblyError;

/// The reserve and index phases of the two-phase build contract.
///
/// Implemented by [`CsrBuilder`]; kept as a trait so a pattern can be pushed
/// into any container honoring the contract (see
/// [`apply_pattern`](crate::pattern::apply_pattern)).
pub trait TwoPhaseBuilder {
    /// Reserves `nnz` entries for `row`. Only valid before [`end_row_sizes`](Self::end_row_sizes).
    fn set_row_size(&mut self, row: usize, nnz: usize);

    /// Closes the reserve phase.
    fn end_row_sizes(&mut self);

    /// Appends column `col` to `row`. Columns must arrive in ascending order
    /// per row, without duplicates, and must not exceed the reserved row
    /// size. Only valid between [`end_row_sizes`](Self::end_row_sizes) and
    /// [`end_indices`](Self::end_indices).
    fn add_index(&mut self, row: usize, col: usize);

    /// Closes the index phase. Every row must be filled to its reserved size.
    fn end_indices(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildPhase {
    Empty,
    RowSizesSet,
    IndicesSet,
}

/// Two-phase builder producing a [`CsrMatrix`].
#[derive(Debug, Clone)]
pub struct CsrBuilder<T> {
    nrows: usize,
    ncols: usize,
    phase: BuildPhase,
    row_sizes: Vec<usize>,
    offsets: Vec<usize>,
    indices: Vec<usize>,
    // Per-row fill cursor during the index phase
    cursors: Vec<usize>,
    marker: PhantomData<T>,
}

impl<T> CsrBuilder<T> {
    pub fn new(nrows: usize, ncols: usize) -> Result<Self, AssemblyError> {
        if nrows == 0 || ncols == 0 {
            return Err(AssemblyError::RequirementsNotMet(format!(
                "matrix must have at least one row and one column (got {} x {})",
                nrows, ncols
            )));
        }
        Ok(Self {
            nrows,
            ncols,
            phase: BuildPhase::Empty,
            row_sizes: vec![0; nrows],
            offsets: Vec::new(),
            indices: Vec::new(),
            cursors: Vec::new(),
            marker: PhantomData,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Finishes the build, yielding a zero-initialized fillable matrix.
    ///
    /// # Panics
    ///
    /// Panics unless both build phases have been completed.
    pub fn finish(self) -> CsrMatrix<T>
    where
        T: Scalar + Zero,
    {
        assert_eq!(
            self.phase,
            BuildPhase::IndicesSet,
            "finish called before the index phase was completed"
        );
        let nnz = self.indices.len();
        CsrMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            offsets: self.offsets,
            indices: self.indices,
            values: vec![T::zero(); nnz],
        }
    }
}

impl<T> TwoPhaseBuilder for CsrBuilder<T> {
    fn set_row_size(&mut self, row: usize, nnz: usize) {
        assert_eq!(
            self.phase,
            BuildPhase::Empty,
            "set_row_size called after end_row_sizes"
        );
        assert!(
            row < self.nrows,
            "row index {} out of range (matrix has {} rows)",
            row,
            self.nrows
        );
        assert!(
            nnz <= self.ncols,
            "row size {} exceeds the number of columns {}",
            nnz,
            self.ncols
        );
        self.row_sizes[row] = nnz;
    }

    fn end_row_sizes(&mut self) {
        assert_eq!(
            self.phase,
            BuildPhase::Empty,
            "end_row_sizes called twice or after end_indices"
        );
        self.offsets.reserve(self.nrows + 1);
        let mut offset = 0;
        for &size in &self.row_sizes {
            self.offsets.push(offset);
            offset += size;
        }
        self.offsets.push(offset);
        self.indices = vec![usize::MAX; offset];
        self.cursors = self.offsets[..self.nrows].to_vec();
        self.phase = BuildPhase::RowSizesSet;
    }

    fn add_index(&mut self, row: usize, col: usize) {
        assert_eq!(
            self.phase,
            BuildPhase::RowSizesSet,
            "add_index called outside the index phase"
        );
        assert!(
            row < self.nrows,
            "row index {} out of range (matrix has {} rows)",
            row,
            self.nrows
        );
        assert!(
            col < self.ncols,
            "column index {} out of range (matrix has {} columns)",
            col,
            self.ncols
        );
        let cursor = self.cursors[row];
        assert!(
            cursor < self.offsets[row + 1],
            "row {} received more column indices than its reserved size",
            row
        );
        if cursor > self.offsets[row] {
            assert!(
                self.indices[cursor - 1] < col,
                "column indices of row {} must be ascending without duplicates",
                row
            );
        }
        self.indices[cursor] = col;
        self.cursors[row] = cursor + 1;
    }

    fn end_indices(&mut self) {
        assert_eq!(
            self.phase,
            BuildPhase::RowSizesSet,
            "end_indices called outside the index phase"
        );
        for row in 0..self.nrows {
            assert_eq!(
                self.cursors[row],
                self.offsets[row + 1],
                "row {} was not filled to its reserved size",
                row
            );
        }
        self.phase = BuildPhase::IndicesSet;
    }
}

/// A CSR matrix with a frozen sparsity pattern, produced by [`CsrBuilder`].
///
/// The value phase is repeatable: the same matrix can be refilled for every
/// re-assembly without rebuilding the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrMatrix<T> {
    nrows: usize,
    ncols: usize,
    offsets: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<T>,
}

impl<T> CsrMatrix<T> {
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn row_offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn column_indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Position of `(row, col)` in the value storage, if the pattern covers it.
    fn find(&self, row: usize, col: usize) -> Option<usize> {
        let row_begin = self.offsets[row];
        let row_end = self.offsets[row + 1];
        self.indices[row_begin..row_end]
            .binary_search(&col)
            .ok()
            .map(|local| row_begin + local)
    }

    fn assert_in_range(&self, row: usize, col: usize) {
        assert!(
            row < self.nrows,
            "row index {} out of range (matrix has {} rows)",
            row,
            self.nrows
        );
        assert!(
            col < self.ncols,
            "column index {} out of range (matrix has {} columns)",
            col,
            self.ncols
        );
    }
}

impl<T: Scalar> CsrMatrix<T> {
    /// Gives an iterator over stored entries in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        (0..self.nrows).flat_map(move |i| {
            let row_begin = self.offsets[i];
            let row_end = self.offsets[i + 1];
            izip!(
                &self.indices[row_begin..row_end],
                &self.values[row_begin..row_end]
            )
            .map(move |(j, v)| (i, *j, v))
        })
    }

    /// Sets all stored values to `value`. The pattern is unaffected.
    pub fn fill(&mut self, value: T) {
        for v in &mut self.values {
            *v = value.clone();
        }
    }
}

impl<T: Scalar + Zero> CsrMatrix<T> {
    /// Reads the entry at `(row, col)`. Structurally absent entries inside
    /// the matrix bounds read as zero.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `col` is out of range.
    pub fn get(&self, row: usize, col: usize) -> T {
        self.assert_in_range(row, col);
        match self.find(row, col) {
            Some(idx) => self.values[idx].clone(),
            None => T::zero(),
        }
    }

    /// Accumulates `delta` into the entry at `(row, col)`.
    ///
    /// Writes outside the frozen pattern are reported, not dropped: they
    /// signal that the assembly stencil disagrees with the pattern stencil.
    pub fn add(&mut self, row: usize, col: usize, delta: T) -> Result<(), AssemblyError>
    where
        T: std::ops::AddAssign,
    {
        self.assert_in_range(row, col);
        match self.find(row, col) {
            Some(idx) => {
                self.values[idx] += delta;
                Ok(())
            }
            None => Err(AssemblyError::PatternViolation { row, col }),
        }
    }

    /// Overwrites the entry at `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<(), AssemblyError> {
        self.assert_in_range(row, col);
        match self.find(row, col) {
            Some(idx) => {
                self.values[idx] = value;
                Ok(())
            }
            None => Err(AssemblyError::PatternViolation { row, col }),
        }
    }

    /// Zeroes every stored entry of `row`. The pattern is unaffected.
    pub fn clear_row(&mut self, row: usize) {
        assert!(
            row < self.nrows,
            "row index {} out of range (matrix has {} rows)",
            row,
            self.nrows
        );
        let row_begin = self.offsets[row];
        let row_end = self.offsets[row + 1];
        for v in &mut self.values[row_begin..row_end] {
            *v = T::zero();
        }
    }

    /// Zeroes every stored entry of `row` and sets the diagonal to one,
    /// enforcing an essential (Dirichlet-like) constraint on that row.
    ///
    /// Fails with [`AssemblyError::PatternViolation`] if the diagonal entry
    /// is not covered by the pattern.
    pub fn unit_row(&mut self, row: usize) -> Result<(), AssemblyError>
    where
        T: One,
    {
        self.clear_row(row);
        self.set(row, row, T::one())
    }

    /// Expands to a dense matrix; intended for tests and small systems.
    pub fn build_dense(&self) -> DMatrix<T> {
        let mut result = DMatrix::zeros(self.nrows, self.ncols);
        for (i, j, v) in self.iter() {
            result[(i, j)] = v.clone();
        }
        result
    }
}

/// The value-phase interface of a global sparse container, as written
/// through by the assembly proxy.
///
/// The provided [`CsrMatrix`] implements it; an external container honoring
/// the same contract can be substituted without touching the proxy.
pub trait GlobalMatrix<T> {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;
    fn add(&mut self, row: usize, col: usize, delta: T) -> Result<(), AssemblyError>;
    fn set(&mut self, row: usize, col: usize, value: T) -> Result<(), AssemblyError>;
    fn get(&self, row: usize, col: usize) -> T;
    fn clear_row(&mut self, row: usize);
    fn unit_row(&mut self, row: usize) -> Result<(), AssemblyError>;
}

impl<T> GlobalMatrix<T> for CsrMatrix<T>
where
    T: Scalar + Zero + One + std::ops::AddAssign,
{
    fn nrows(&self) -> usize {
        CsrMatrix::nrows(self)
    }

    fn ncols(&self) -> usize {
        CsrMatrix::ncols(self)
    }

    fn add(&mut self, row: usize, col: usize, delta: T) -> Result<(), AssemblyError> {
        CsrMatrix::add(self, row, col, delta)
    }

    fn set(&mut self, row: usize, col: usize, value: T) -> Result<(), AssemblyError> {
        CsrMatrix::set(self, row, col, value)
    }

    fn get(&self, row: usize, col: usize) -> T {
        CsrMatrix::get(self, row, col)
    }

    fn clear_row(&mut self, row: usize) {
        CsrMatrix::clear_row(self, row)
    }

    fn unit_row(&mut self, row: usize) -> Result<(), AssemblyError> {
        CsrMatrix::unit_row(self, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tridiagonal_builder(n: usize) -> CsrBuilder<f64> {
        let mut builder = CsrBuilder::new(n, n).unwrap();
        for row in 0..n {
            let mut size = 1;
            if row > 0 {
                size += 1;
            }
            if row + 1 < n {
                size += 1;
            }
            builder.set_row_size(row, size);
        }
        builder.end_row_sizes();
        for row in 0..n {
            if row > 0 {
                builder.add_index(row, row - 1);
            }
            builder.add_index(row, row);
            if row + 1 < n {
                builder.add_index(row, row + 1);
            }
        }
        builder.end_indices();
        builder
    }

    #[test]
    fn structurally_absent_entries_read_as_zero() {
        let matrix = tridiagonal_builder(4).finish();
        assert_eq!(matrix.get(0, 3), 0.0);
        assert_eq!(matrix.get(0, 0), 0.0);
        assert_eq!(matrix.nnz(), 10);
    }

    #[test]
    fn add_outside_pattern_is_a_violation() {
        let mut matrix = tridiagonal_builder(4).finish();
        assert_eq!(
            matrix.add(0, 3, 1.0),
            Err(AssemblyError::PatternViolation { row: 0, col: 3 })
        );
        // the matrix is untouched
        assert!(matrix.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn add_accumulates() {
        let mut matrix = tridiagonal_builder(3).finish();
        matrix.add(1, 1, 2.0).unwrap();
        matrix.add(1, 1, 0.5).unwrap();
        assert_eq!(matrix.get(1, 1), 2.5);
    }

    #[test]
    #[should_panic(expected = "add_index called outside the index phase")]
    fn add_index_before_end_row_sizes_panics() {
        let mut builder: CsrBuilder<f64> = CsrBuilder::new(2, 2).unwrap();
        builder.add_index(0, 0);
    }

    #[test]
    #[should_panic(expected = "not filled to its reserved size")]
    fn underfilled_row_panics_at_end_indices() {
        let mut builder: CsrBuilder<f64> = CsrBuilder::new(2, 2).unwrap();
        builder.set_row_size(0, 2);
        builder.set_row_size(1, 1);
        builder.end_row_sizes();
        builder.add_index(0, 0);
        builder.add_index(0, 1);
        builder.end_indices();
    }

    #[test]
    #[should_panic(expected = "ascending without duplicates")]
    fn duplicate_index_panics() {
        let mut builder: CsrBuilder<f64> = CsrBuilder::new(1, 2).unwrap();
        builder.set_row_size(0, 2);
        builder.end_row_sizes();
        builder.add_index(0, 1);
        builder.add_index(0, 1);
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(
            CsrBuilder::<f64>::new(0, 1),
            Err(AssemblyError::RequirementsNotMet(_))
        ));
    }
}
