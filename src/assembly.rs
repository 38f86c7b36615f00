//! The element-loop assembly driver.
//!
//! [`Assembler`] ties the pieces together: it builds the sparsity pattern
//! from the connectivity, freezes it into a [`CsrMatrix`] through the
//! two-phase build API, and runs the element loop, feeding each element
//! kernel a zeroed scratch block and scattering the result through a
//! [`LocalMatrixProxy`].
//!
//! The driver itself runs the loop on the calling thread. The scratch pools
//! are sized for the full thread count of the configured [`ThreadManager`],
//! so a caller that partitions elements across threads itself can invoke
//! the per-element path concurrently, provided it also imposes a write
//! discipline on the global matrix (e.g. a coloring that keeps the touched
//! rows of concurrently processed elements disjoint). Per-entry accumulation
//! is commutative, so the result does not depend on the flush order.

use nalgebra::{DMatrixViewMut, DVector, DVectorViewMut, RealField};

use crate::connectivity::ElementConnectivity;
use crate::error::AssemblyError;
use crate::local::LocalMatrixProxy;
use crate::matrix::{CsrBuilder, CsrMatrix, GlobalMatrix};
use crate::pattern::{apply_pattern, ElementNeighborStencil, SparsityPattern};
use crate::scratch::{
    ScratchMatrixPool, ScratchVectorPool, SingleThread, ThreadManager, ThreadScratch,
    IDX_ELEMENT_COLS, IDX_ELEMENT_ROWS, IDX_NEIGHBOR_COLS, KIND_NEIGHBOR, KIND_SELF,
};

/// An element kernel producing local matrix contributions.
///
/// The output views are pre-zeroed by the driver and sized exactly to the
/// element's (or pair's) local block; kernels accumulate into them and never
/// see global indices.
pub trait ElementPairAssembler<T: RealField> {
    /// Writes the contribution of `element` to its own block
    /// (`element` rows against `element` columns).
    fn assemble_element_matrix_into(
        &self,
        element: usize,
        output: DMatrixViewMut<T>,
    ) -> Result<(), AssemblyError>;

    /// Writes the coupling contribution across the interior interface
    /// between `element` and `neighbor` (`element` rows against `neighbor`
    /// columns).
    fn assemble_neighbor_matrix_into(
        &self,
        element: usize,
        neighbor: usize,
        output: DMatrixViewMut<T>,
    ) -> Result<(), AssemblyError>;
}

/// An element kernel producing local right-hand-side contributions.
pub trait ElementVectorAssembler<T: RealField> {
    /// Writes the contribution of `element` to its row DOFs.
    fn assemble_element_vector_into(
        &self,
        element: usize,
        output: DVectorViewMut<T>,
    ) -> Result<(), AssemblyError>;
}

/// Drives pattern construction and the element loop.
#[derive(Debug, Clone)]
pub struct Assembler<TM = SingleThread> {
    thread_manager: TM,
}

impl Assembler<SingleThread> {
    pub fn new() -> Self {
        Self {
            thread_manager: SingleThread,
        }
    }
}

impl Default for Assembler<SingleThread> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TM> Assembler<TM>
where
    TM: ThreadManager + Clone,
{
    pub fn with_thread_manager(thread_manager: TM) -> Self {
        Self { thread_manager }
    }

    /// Builds the element/neighbor sparsity pattern for `connectivity`.
    pub fn assemble_pattern<C>(&self, connectivity: &C) -> Result<SparsityPattern, AssemblyError>
    where
        C: ElementConnectivity + ?Sized,
    {
        ElementNeighborStencil::build(connectivity)
    }

    /// Builds the pattern, freezes it into a [`CsrMatrix`] and runs the
    /// element loop in one call.
    pub fn assemble_matrix<T, C, K>(
        &self,
        connectivity: &C,
        kernel: &K,
    ) -> Result<CsrMatrix<T>, AssemblyError>
    where
        T: RealField,
        C: ElementConnectivity + ?Sized,
        K: ElementPairAssembler<T> + ?Sized,
    {
        let pattern = self.assemble_pattern(connectivity)?;
        log::debug!(
            "assembling {} x {} matrix with {} pattern entries",
            pattern.row_count(),
            pattern.col_count(),
            pattern.nnz()
        );
        let mut builder = CsrBuilder::new(connectivity.num_rows(), connectivity.num_cols())?;
        apply_pattern(&pattern, &mut builder);
        let mut matrix = builder.finish();
        self.assemble_into(&mut matrix, connectivity, kernel)?;
        Ok(matrix)
    }

    /// Runs the element loop into an existing global container.
    ///
    /// The container's stored values are accumulated into, not reset;
    /// callers re-assembling into a reused matrix clear it first (see
    /// [`CsrMatrix::fill`]).
    pub fn assemble_into<T, C, K, M>(
        &self,
        matrix: &mut M,
        connectivity: &C,
        kernel: &K,
    ) -> Result<(), AssemblyError>
    where
        T: RealField,
        C: ElementConnectivity + ?Sized,
        K: ElementPairAssembler<T> + ?Sized,
        M: GlobalMatrix<T>,
    {
        if matrix.nrows() != connectivity.num_rows() || matrix.ncols() != connectivity.num_cols() {
            return Err(AssemblyError::ShapesDoNotMatch {
                expected_rows: connectivity.num_rows(),
                expected_cols: connectivity.num_cols(),
                got_rows: matrix.nrows(),
                got_cols: matrix.ncols(),
            });
        }
        let max_rows = max_dof_count(connectivity, ElementConnectivity::element_row_dof_count);
        let max_cols = max_dof_count(connectivity, ElementConnectivity::element_col_dof_count);
        let pool =
            ScratchMatrixPool::new(&[1, 1], max_rows, max_cols, self.thread_manager.clone())?;

        for element in 0..connectivity.num_elements() {
            let mut scratch = pool.borrow_local();
            let element_rows = connectivity.element_row_dof_count(element);
            let element_cols = connectivity.element_col_dof_count(element);
            connectivity.populate_element_row_dofs(
                &mut scratch.index_vector_mut(IDX_ELEMENT_ROWS)[..element_rows],
                element,
            );
            connectivity.populate_element_col_dofs(
                &mut scratch.index_vector_mut(IDX_ELEMENT_COLS)[..element_cols],
                element,
            );

            {
                let local = scratch.matrix_mut(KIND_SELF, 0);
                let mut view = local.view_mut((0, 0), (element_rows, element_cols));
                view.fill(T::zero());
                kernel.assemble_element_matrix_into(element, view)?;
            }
            let mut proxy = LocalMatrixProxy::from_dof_maps(
                &mut *matrix,
                &scratch.index_vector(IDX_ELEMENT_ROWS)[..element_rows],
                &scratch.index_vector(IDX_ELEMENT_COLS)[..element_cols],
            );
            proxy.add_block(
                scratch
                    .matrix(KIND_SELF, 0)
                    .view((0, 0), (element_rows, element_cols)),
            )?;
            proxy.commit()?;

            let mut status = Ok(());
            connectivity.for_each_interior_neighbor(element, &mut |neighbor| {
                if status.is_err() {
                    return;
                }
                status = assemble_neighbor_block(
                    &mut *matrix,
                    connectivity,
                    kernel,
                    &mut *scratch,
                    element,
                    element_rows,
                    neighbor,
                );
            });
            status?;
        }
        Ok(())
    }

    /// Runs the element loop for a right-hand-side vector.
    pub fn assemble_vector_into<T, C, K>(
        &self,
        vector: &mut DVector<T>,
        connectivity: &C,
        kernel: &K,
    ) -> Result<(), AssemblyError>
    where
        T: RealField,
        C: ElementConnectivity + ?Sized,
        K: ElementVectorAssembler<T> + ?Sized,
    {
        if vector.len() != connectivity.num_rows() {
            return Err(AssemblyError::ShapesDoNotMatch {
                expected_rows: connectivity.num_rows(),
                expected_cols: 1,
                got_rows: vector.len(),
                got_cols: 1,
            });
        }
        let max_rows = max_dof_count(connectivity, ElementConnectivity::element_row_dof_count);
        let pool = ScratchVectorPool::new(&[1, 1], max_rows, self.thread_manager.clone())?;

        for element in 0..connectivity.num_elements() {
            let mut scratch = pool.borrow_local();
            let element_rows = connectivity.element_row_dof_count(element);
            connectivity
                .populate_element_row_dofs(&mut scratch.index_vector_mut()[..element_rows], element);
            {
                let local = scratch.vector_mut(KIND_SELF, 0);
                let mut view = local.rows_mut(0, element_rows);
                view.fill(T::zero());
                kernel.assemble_element_vector_into(element, view)?;
            }
            let local = scratch.vector(KIND_SELF, 0);
            for (local_index, &row) in scratch.index_vector()[..element_rows].iter().enumerate() {
                assert!(
                    row < vector.len(),
                    "mapped row index {} out of range (vector has {} rows)",
                    row,
                    vector.len()
                );
                vector[row] += local[local_index].clone();
            }
        }
        Ok(())
    }
}

fn max_dof_count<C>(connectivity: &C, count: impl Fn(&C, usize) -> usize) -> usize
where
    C: ElementConnectivity + ?Sized,
{
    (0..connectivity.num_elements())
        .map(|element| count(connectivity, element))
        .max()
        .unwrap_or(0)
}

fn assemble_neighbor_block<T, C, K, M>(
    matrix: &mut M,
    connectivity: &C,
    kernel: &K,
    scratch: &mut ThreadScratch<T>,
    element: usize,
    element_rows: usize,
    neighbor: usize,
) -> Result<(), AssemblyError>
where
    T: RealField,
    C: ElementConnectivity + ?Sized,
    K: ElementPairAssembler<T> + ?Sized,
    M: GlobalMatrix<T>,
{
    let neighbor_cols = connectivity.element_col_dof_count(neighbor);
    connectivity.populate_element_col_dofs(
        &mut scratch.index_vector_mut(IDX_NEIGHBOR_COLS)[..neighbor_cols],
        neighbor,
    );
    {
        let local = scratch.matrix_mut(KIND_NEIGHBOR, 0);
        let mut view = local.view_mut((0, 0), (element_rows, neighbor_cols));
        view.fill(T::zero());
        kernel.assemble_neighbor_matrix_into(element, neighbor, view)?;
    }
    let mut proxy = LocalMatrixProxy::from_dof_maps(
        matrix,
        &scratch.index_vector(IDX_ELEMENT_ROWS)[..element_rows],
        &scratch.index_vector(IDX_NEIGHBOR_COLS)[..neighbor_cols],
    );
    proxy.add_block(
        scratch
            .matrix(KIND_NEIGHBOR, 0)
            .view((0, 0), (element_rows, neighbor_cols)),
    )?;
    proxy.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ChainConnectivity;
    use nalgebra::dvector;

    struct ChainLaplacian;

    impl ElementPairAssembler<f64> for ChainLaplacian {
        fn assemble_element_matrix_into(
            &self,
            _element: usize,
            mut output: DMatrixViewMut<f64>,
        ) -> Result<(), AssemblyError> {
            output[(0, 0)] += 2.0;
            Ok(())
        }

        fn assemble_neighbor_matrix_into(
            &self,
            _element: usize,
            _neighbor: usize,
            mut output: DMatrixViewMut<f64>,
        ) -> Result<(), AssemblyError> {
            output[(0, 0)] += -1.0;
            Ok(())
        }
    }

    struct UnitLoad;

    impl ElementVectorAssembler<f64> for UnitLoad {
        fn assemble_element_vector_into(
            &self,
            _element: usize,
            mut output: DVectorViewMut<f64>,
        ) -> Result<(), AssemblyError> {
            output[0] += 1.0;
            Ok(())
        }
    }

    #[test]
    fn chain_assembles_a_tridiagonal_operator() {
        let chain = ChainConnectivity::new(3);
        let matrix = Assembler::new()
            .assemble_matrix(&chain, &ChainLaplacian)
            .unwrap();
        assert_eq!(matrix.get(0, 0), 2.0);
        assert_eq!(matrix.get(0, 1), -1.0);
        assert_eq!(matrix.get(1, 0), -1.0);
        assert_eq!(matrix.get(1, 1), 2.0);
        assert_eq!(matrix.get(1, 2), -1.0);
        assert_eq!(matrix.get(2, 1), -1.0);
        assert_eq!(matrix.get(2, 2), 2.0);
        assert_eq!(matrix.get(0, 2), 0.0);
    }

    #[test]
    fn vector_assembly_scatters_loads() {
        let chain = ChainConnectivity::new(4);
        let mut rhs = DVector::zeros(4);
        Assembler::new()
            .assemble_vector_into(&mut rhs, &chain, &UnitLoad)
            .unwrap();
        assert_eq!(rhs, dvector![1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn mismatched_container_shape_is_rejected() {
        let chain = ChainConnectivity::new(3);
        let mut rhs = DVector::<f64>::zeros(2);
        let result = Assembler::new().assemble_vector_into(&mut rhs, &chain, &UnitLoad);
        assert!(matches!(
            result,
            Err(AssemblyError::ShapesDoNotMatch { .. })
        ));
    }
}
