//! Sparsity pattern construction from element/neighbor connectivity.
//!
//! A [`SparsityPattern`] stores, per row, the set of column indices that may
//! hold a nonzero value in the assembled matrix. It is built once per
//! discretization by one of the stencil traversals and then frozen into the
//! global container through the two-phase build API (see
//! [`apply_pattern`]); after that point it is never mutated.

use std::collections::BTreeSet;

use crate::connectivity::ElementConnectivity;
use crate::error::AssemblyError;
use crate::matrix::TwoPhaseBuilder;

/// The set of `(row, col)` positions a sparse matrix is permitted to store a
/// value at.
///
/// Rows are kept as ordered sets, so duplicate insertions collapse and the
/// per-row column indices come out ascending, which is exactly what the
/// index phase of the two-phase build API requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    rows: Vec<BTreeSet<usize>>,
    col_count: usize,
}

impl SparsityPattern {
    /// Creates an empty pattern with the given dimensions.
    pub fn new(row_count: usize, col_count: usize) -> Result<Self, AssemblyError> {
        if row_count == 0 || col_count == 0 {
            return Err(AssemblyError::RequirementsNotMet(format!(
                "sparsity pattern must have at least one row and one column \
                 (got {} x {})",
                row_count, col_count
            )));
        }
        Ok(Self {
            rows: vec![BTreeSet::new(); row_count],
            col_count,
        })
    }

    /// Creates a pattern with every diagonal entry `(i, i)` present.
    ///
    /// For non-square dimensions the diagonal is populated up to
    /// `min(row_count, col_count)`.
    pub fn with_diagonal(row_count: usize, col_count: usize) -> Result<Self, AssemblyError> {
        let mut pattern = Self::new(row_count, col_count)?;
        for i in 0..row_count.min(col_count) {
            pattern.insert(i, i);
        }
        Ok(pattern)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.col_count
    }

    /// Total number of stored entries.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(BTreeSet::len).sum()
    }

    /// Inserts a nonzero entry. Inserting an existing pair is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `col` is out of range; an out-of-range index means
    /// the connectivity provider and the pattern dimensions disagree, which
    /// is a programming error and not recoverable in place.
    pub fn insert(&mut self, row: usize, col: usize) {
        self.assert_in_range(row, col);
        self.rows[row].insert(col);
    }

    /// Removes an entry. Removing an absent pair is a no-op.
    pub fn erase(&mut self, row: usize, col: usize) {
        self.assert_in_range(row, col);
        self.rows[row].remove(&col);
    }

    /// Returns `true` iff `col` is absent from `row`'s column set.
    pub fn is_zero(&self, row: usize, col: usize) -> bool {
        self.assert_in_range(row, col);
        !self.rows[row].contains(&col)
    }

    /// Number of stored entries in `row`.
    pub fn count_nonzeros(&self, row: usize) -> usize {
        assert!(
            row < self.rows.len(),
            "row index {} out of range (pattern has {} rows)",
            row,
            self.rows.len()
        );
        self.rows[row].len()
    }

    /// The column indices of `row`, in ascending order.
    pub fn row_indices(&self, row: usize) -> impl Iterator<Item = usize> + '_ {
        assert!(
            row < self.rows.len(),
            "row index {} out of range (pattern has {} rows)",
            row,
            self.rows.len()
        );
        self.rows[row].iter().copied()
    }

    /// Iterates over all stored `(row, col)` pairs in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(row, cols)| cols.iter().map(move |&col| (row, col)))
    }

    fn assert_in_range(&self, row: usize, col: usize) {
        assert!(
            row < self.rows.len(),
            "row index {} out of range (pattern has {} rows)",
            row,
            self.rows.len()
        );
        assert!(
            col < self.col_count,
            "column index {} out of range (pattern has {} columns)",
            col,
            self.col_count
        );
    }
}

/// Pushes the frozen pattern through the two-phase build API of a matrix
/// container: row sizes first (ascending rows), then per row the column
/// indices in ascending order.
pub fn apply_pattern<B: TwoPhaseBuilder>(pattern: &SparsityPattern, builder: &mut B) {
    for row in 0..pattern.row_count() {
        builder.set_row_size(row, pattern.count_nonzeros(row));
    }
    builder.end_row_sizes();
    for row in 0..pattern.row_count() {
        for col in pattern.row_indices(row) {
            builder.add_index(row, col);
        }
    }
    builder.end_indices();
}

/// Diagonal-only coupling: every element couples its own row DOFs with its
/// own column DOFs and nothing else (mass-matrix-like stencils).
#[derive(Debug, Clone, Copy)]
pub struct ElementStencil;

impl ElementStencil {
    pub fn build<C>(connectivity: &C) -> Result<SparsityPattern, AssemblyError>
    where
        C: ElementConnectivity + ?Sized,
    {
        let mut pattern = SparsityPattern::new(connectivity.num_rows(), connectivity.num_cols())?;
        let mut dofs = DofBuffers::default();
        for element in 0..connectivity.num_elements() {
            dofs.populate_element(connectivity, element);
            couple(&mut pattern, &dofs.element_rows, &dofs.element_cols);
        }
        Ok(pattern)
    }
}

/// Element/neighbor coupling across interior interfaces.
///
/// For every element `e` the element coupling `(rows(e), cols(e))` is
/// inserted; then for every interior neighbor `n` of `e` the couplings
/// `(rows(e), cols(n))`, `(rows(n), cols(n))` and `(cols(n), cols(e))` are
/// inserted, in that order. The third coupling reads the test-space indices
/// of `n` as *row* positions; this asymmetry is a deliberate contract
/// supporting non-square ansatz/test pairings and must not be "repaired"
/// into a symmetric stencil.
#[derive(Debug, Clone, Copy)]
pub struct ElementNeighborStencil;

impl ElementNeighborStencil {
    pub fn build<C>(connectivity: &C) -> Result<SparsityPattern, AssemblyError>
    where
        C: ElementConnectivity + ?Sized,
    {
        let mut pattern = SparsityPattern::new(connectivity.num_rows(), connectivity.num_cols())?;
        let mut dofs = DofBuffers::default();
        for element in 0..connectivity.num_elements() {
            dofs.populate_element(connectivity, element);
            couple(&mut pattern, &dofs.element_rows, &dofs.element_cols);

            let DofBuffers {
                element_rows,
                element_cols,
                neighbor_rows,
                neighbor_cols,
            } = &mut dofs;
            connectivity.for_each_interior_neighbor(element, &mut |neighbor| {
                populate(connectivity, neighbor, neighbor_rows, neighbor_cols);
                couple(&mut pattern, &element_rows[..], &neighbor_cols[..]);
                couple(&mut pattern, &neighbor_rows[..], &neighbor_cols[..]);
                couple(&mut pattern, &neighbor_cols[..], &element_cols[..]);
            });
        }
        Ok(pattern)
    }
}

fn couple(pattern: &mut SparsityPattern, rows: &[usize], cols: &[usize]) {
    for &row in rows {
        for &col in cols {
            pattern.insert(row, col);
        }
    }
}

fn populate<C>(connectivity: &C, element: usize, rows: &mut Vec<usize>, cols: &mut Vec<usize>)
where
    C: ElementConnectivity + ?Sized,
{
    rows.resize(connectivity.element_row_dof_count(element), usize::MAX);
    connectivity.populate_element_row_dofs(rows, element);
    cols.resize(connectivity.element_col_dof_count(element), usize::MAX);
    connectivity.populate_element_col_dofs(cols, element);
}

#[derive(Debug, Default)]
struct DofBuffers {
    element_rows: Vec<usize>,
    element_cols: Vec<usize>,
    neighbor_rows: Vec<usize>,
    neighbor_cols: Vec<usize>,
}

impl DofBuffers {
    fn populate_element<C>(&mut self, connectivity: &C, element: usize)
    where
        C: ElementConnectivity + ?Sized,
    {
        populate(
            connectivity,
            element,
            &mut self.element_rows,
            &mut self.element_cols,
        );
    }
}
