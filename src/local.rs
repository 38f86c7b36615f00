//! Local-to-global scatter with near-zero suppression.
//!
//! Element kernels accumulate into a small dense block addressed by *local*
//! indices; [`LocalMatrixProxy`] owns that block together with the
//! local-to-global DOF maps and flushes it into the global container in one
//! go. Flushing filters entries through a [`FloatCmp`] tolerance so that
//! numerically-zero garbage produced by the kernel never triggers a
//! pattern violation on positions the stencil legitimately omits.
//!
//! [`commit`](LocalMatrixProxy::commit) is the primary way to flush, since
//! it surfaces pattern violations as errors. A proxy dropped without commit
//! still flushes, but can only log failures, so the drop path is a safety
//! net and not an API.

use nalgebra::{DMatrixView, RealField};

use crate::cmp::FloatCmp;
use crate::connectivity::ElementConnectivity;
use crate::error::AssemblyError;
use crate::matrix::GlobalMatrix;

/// Accumulator for one local block of the global matrix.
///
/// Local indices are dense and zero-based: local row `i` maps to global row
/// `row_map[i]`, and likewise for columns. Values accumulate locally; the
/// global container is only touched at flush time.
#[derive(Debug)]
pub struct LocalMatrixProxy<'a, T, M>
where
    T: RealField,
    M: GlobalMatrix<T>,
{
    matrix: &'a mut M,
    row_map: Vec<usize>,
    col_map: Vec<usize>,
    entries: Vec<T>,
    cmp: FloatCmp<T>,
    committed: bool,
}

impl<'a, T, M> LocalMatrixProxy<'a, T, M>
where
    T: RealField,
    M: GlobalMatrix<T>,
{
    /// Opens a proxy over explicit local-to-global maps, with the default
    /// near-zero tolerance.
    ///
    /// # Panics
    ///
    /// Panics if any mapped index lies outside the matrix dimensions; a map
    /// pointing outside the matrix means the connectivity provider and the
    /// container disagree about the problem size.
    pub fn from_dof_maps(matrix: &'a mut M, rows: &[usize], cols: &[usize]) -> Self {
        for &row in rows {
            assert!(
                row < matrix.nrows(),
                "mapped row index {} out of range (matrix has {} rows)",
                row,
                matrix.nrows()
            );
        }
        for &col in cols {
            assert!(
                col < matrix.ncols(),
                "mapped column index {} out of range (matrix has {} columns)",
                col,
                matrix.ncols()
            );
        }
        let entries = vec![T::zero(); rows.len() * cols.len()];
        Self {
            matrix,
            row_map: rows.to_vec(),
            col_map: cols.to_vec(),
            entries,
            cmp: FloatCmp::default(),
            committed: false,
        }
    }

    /// Opens a proxy over the self-block of `element`: its row DOFs against
    /// its own column DOFs.
    ///
    /// Fails with [`AssemblyError::ShapesDoNotMatch`] when the matrix
    /// dimensions disagree with the connectivity's DOF counts.
    pub fn open<C>(
        matrix: &'a mut M,
        connectivity: &C,
        element: usize,
    ) -> Result<Self, AssemblyError>
    where
        C: ElementConnectivity + ?Sized,
    {
        Self::open_pair(matrix, connectivity, element, element)
    }

    /// Opens a proxy over the coupling block of an element pair: the row
    /// DOFs of `element` against the column DOFs of `neighbor`.
    pub fn open_pair<C>(
        matrix: &'a mut M,
        connectivity: &C,
        element: usize,
        neighbor: usize,
    ) -> Result<Self, AssemblyError>
    where
        C: ElementConnectivity + ?Sized,
    {
        if matrix.nrows() != connectivity.num_rows() || matrix.ncols() != connectivity.num_cols() {
            return Err(AssemblyError::ShapesDoNotMatch {
                expected_rows: connectivity.num_rows(),
                expected_cols: connectivity.num_cols(),
                got_rows: matrix.nrows(),
                got_cols: matrix.ncols(),
            });
        }
        let mut rows = vec![usize::MAX; connectivity.element_row_dof_count(element)];
        connectivity.populate_element_row_dofs(&mut rows, element);
        let mut cols = vec![usize::MAX; connectivity.element_col_dof_count(neighbor)];
        connectivity.populate_element_col_dofs(&mut cols, neighbor);
        Ok(Self::from_dof_maps(matrix, &rows, &cols))
    }

    /// Replaces the near-zero tolerance used at flush time.
    ///
    /// # Panics
    ///
    /// Panics if `eps` is negative.
    pub fn with_epsilon(mut self, eps: T) -> Self {
        self.cmp = FloatCmp::new(eps);
        self
    }

    pub fn local_rows(&self) -> usize {
        self.row_map.len()
    }

    pub fn local_cols(&self) -> usize {
        self.col_map.len()
    }

    /// The global row that local row `local_row` maps to.
    pub fn global_row(&self, local_row: usize) -> usize {
        assert!(
            local_row < self.row_map.len(),
            "local row index {} out of range (proxy has {} rows)",
            local_row,
            self.row_map.len()
        );
        self.row_map[local_row]
    }

    /// The global column that local column `local_col` maps to.
    pub fn global_col(&self, local_col: usize) -> usize {
        assert!(
            local_col < self.col_map.len(),
            "local column index {} out of range (proxy has {} columns)",
            local_col,
            self.col_map.len()
        );
        self.col_map[local_col]
    }

    /// Accumulates `value` into the local entry `(local_row, local_col)`.
    ///
    /// # Panics
    ///
    /// Panics if either local index is out of range.
    pub fn add(&mut self, local_row: usize, local_col: usize, value: T) {
        self.assert_local(local_row, local_col);
        self.entries[local_row * self.col_map.len() + local_col] += value;
    }

    /// Reads the accumulated local entry at `(local_row, local_col)`.
    pub fn get(&self, local_row: usize, local_col: usize) -> T {
        self.assert_local(local_row, local_col);
        self.entries[local_row * self.col_map.len() + local_col].clone()
    }

    /// Accumulates a whole local block at once.
    ///
    /// Fails with [`AssemblyError::ShapesDoNotMatch`] when the block's
    /// dimensions differ from the proxy's local dimensions.
    pub fn add_block<'b>(
        &mut self,
        block: impl Into<DMatrixView<'b, T>>,
    ) -> Result<(), AssemblyError> {
        let block = block.into();
        if block.nrows() != self.row_map.len() || block.ncols() != self.col_map.len() {
            return Err(AssemblyError::ShapesDoNotMatch {
                expected_rows: self.row_map.len(),
                expected_cols: self.col_map.len(),
                got_rows: block.nrows(),
                got_cols: block.ncols(),
            });
        }
        for local_row in 0..block.nrows() {
            for local_col in 0..block.ncols() {
                self.entries[local_row * self.col_map.len() + local_col] +=
                    block[(local_row, local_col)].clone();
            }
        }
        Ok(())
    }

    /// Discards the accumulated local row and turns the corresponding
    /// global row into a unit row (see [`GlobalMatrix::unit_row`]).
    ///
    /// Call this after all accumulation into the row is done; later `add`
    /// calls into the same local row would dirty the constrained global row
    /// again at flush time.
    pub fn unit_row(&mut self, local_row: usize) -> Result<(), AssemblyError> {
        assert!(
            local_row < self.row_map.len(),
            "local row index {} out of range (proxy has {} rows)",
            local_row,
            self.row_map.len()
        );
        self.zero_local_row(local_row);
        self.matrix.unit_row(self.row_map[local_row])
    }

    /// Discards the accumulated local row and zeroes the corresponding
    /// global row.
    pub fn clear_row(&mut self, local_row: usize) {
        assert!(
            local_row < self.row_map.len(),
            "local row index {} out of range (proxy has {} rows)",
            local_row,
            self.row_map.len()
        );
        self.zero_local_row(local_row);
        self.matrix.clear_row(self.row_map[local_row]);
    }

    /// Flushes the accumulated block into the global container.
    ///
    /// Entries within the near-zero tolerance are skipped entirely, so they
    /// neither write to the container nor trip its pattern check. Entries
    /// above the tolerance at positions the pattern does not cover surface
    /// as [`AssemblyError::PatternViolation`].
    pub fn commit(mut self) -> Result<(), AssemblyError> {
        self.committed = true;
        self.flush()
    }

    fn flush(&mut self) -> Result<(), AssemblyError> {
        let ncols = self.col_map.len();
        for (local_row, &row) in self.row_map.iter().enumerate() {
            for (local_col, &col) in self.col_map.iter().enumerate() {
                let value = self.entries[local_row * ncols + local_col].clone();
                if !self.cmp.is_zero(&value) {
                    self.matrix.add(row, col, value)?;
                }
            }
        }
        Ok(())
    }

    fn zero_local_row(&mut self, local_row: usize) {
        let ncols = self.col_map.len();
        for entry in &mut self.entries[local_row * ncols..(local_row + 1) * ncols] {
            *entry = T::zero();
        }
    }

    fn assert_local(&self, local_row: usize, local_col: usize) {
        assert!(
            local_row < self.row_map.len(),
            "local row index {} out of range (proxy has {} rows)",
            local_row,
            self.row_map.len()
        );
        assert!(
            local_col < self.col_map.len(),
            "local column index {} out of range (proxy has {} columns)",
            local_col,
            self.col_map.len()
        );
    }
}

impl<'a, T, M> Drop for LocalMatrixProxy<'a, T, M>
where
    T: RealField,
    M: GlobalMatrix<T>,
{
    fn drop(&mut self) {
        if !self.committed {
            self.committed = true;
            if let Err(error) = self.flush() {
                log::error!(
                    "local contribution dropped without commit could not be flushed: {}",
                    error
                );
            }
        }
    }
}
