use matrixcompare::assert_matrix_eq;
use nalgebra::{dmatrix, DMatrix, DMatrixViewMut};
use proptest::collection::vec;
use proptest::prelude::*;

use fem_sparse::assembly::{Assembler, ElementPairAssembler};
use fem_sparse::connectivity::{ChainConnectivity, ElementConnectivity};
use fem_sparse::local::LocalMatrixProxy;
use fem_sparse::matrix::{CsrBuilder, CsrMatrix};
use fem_sparse::pattern::{apply_pattern, ElementNeighborStencil};
use fem_sparse::scratch::{ScratchMatrixPool, ThreadManager, KIND_SELF};
use fem_sparse::AssemblyError;

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

/// Per-element weights, so that randomized assemblies can be checked
/// against a dense reference computation.
struct WeightedChain {
    weights: Vec<f64>,
}

impl ElementPairAssembler<f64> for WeightedChain {
    fn assemble_element_matrix_into(
        &self,
        element: usize,
        mut output: DMatrixViewMut<f64>,
    ) -> Result<(), AssemblyError> {
        output[(0, 0)] += self.weights[element];
        Ok(())
    }

    fn assemble_neighbor_matrix_into(
        &self,
        _element: usize,
        neighbor: usize,
        mut output: DMatrixViewMut<f64>,
    ) -> Result<(), AssemblyError> {
        output[(0, 0)] -= 0.5 * self.weights[neighbor];
        Ok(())
    }
}

/// A thread manager pinned to one slot, for exercising explicit slot
/// assignment without spawning threads.
#[derive(Clone)]
struct FixedSlot {
    slot: usize,
    count: usize,
}

impl ThreadManager for FixedSlot {
    fn max_threads(&self) -> usize {
        self.count
    }

    fn current_thread_index(&self) -> usize {
        self.slot
    }
}

fn tridiagonal_matrix(n: usize) -> CsrMatrix<f64> {
    let pattern = ElementNeighborStencil::build(&ChainConnectivity::new(n)).unwrap();
    let mut builder = CsrBuilder::new(n, n).unwrap();
    apply_pattern(&pattern, &mut builder);
    builder.finish()
}

#[test]
fn driver_assembles_the_chain_laplacian() {
    let chain = ChainConnectivity::new(4);
    let matrix = Assembler::new()
        .assemble_matrix(&chain, &ChainLaplacian)
        .unwrap();
    let expected = dmatrix![
         2.0, -1.0,  0.0,  0.0;
        -1.0,  2.0, -1.0,  0.0;
         0.0, -1.0,  2.0, -1.0;
         0.0,  0.0, -1.0,  2.0
    ];
    assert_matrix_eq!(matrix.build_dense(), expected, comp = abs, tol = 1e-14);
}

#[test]
fn near_zero_entries_do_not_trip_the_pattern_check() {
    let mut matrix = tridiagonal_matrix(3);
    matrix.set(0, 0, 4.0).unwrap();

    // (0, 2) lies outside the tridiagonal pattern; an entry within the
    // tolerance is suppressed instead of reported.
    let mut proxy =
        LocalMatrixProxy::from_dof_maps(&mut matrix, &[0], &[0, 1, 2]).with_epsilon(1e-10);
    proxy.add(0, 0, 1.0);
    proxy.add(0, 2, 1e-15);
    proxy.commit().unwrap();
    assert_eq!(matrix.get(0, 0), 5.0);
    assert_eq!(matrix.get(0, 2), 0.0);

    // the same entry above the tolerance is a genuine violation
    let mut proxy =
        LocalMatrixProxy::from_dof_maps(&mut matrix, &[0], &[0, 1, 2]).with_epsilon(1e-10);
    proxy.add(0, 2, 1.0);
    assert_eq!(
        proxy.commit(),
        Err(AssemblyError::PatternViolation { row: 0, col: 2 })
    );
}

#[test]
fn unit_row_enforces_a_constraint_after_assembly() {
    let chain = ChainConnectivity::new(3);
    let mut matrix = Assembler::new()
        .assemble_matrix(&chain, &ChainLaplacian)
        .unwrap();
    matrix.unit_row(0).unwrap();
    let expected = dmatrix![
         1.0,  0.0,  0.0;
        -1.0,  2.0, -1.0;
         0.0, -1.0,  2.0
    ];
    assert_matrix_eq!(matrix.build_dense(), expected, comp = abs, tol = 1e-14);
}

#[test]
fn scratch_slots_do_not_alias() {
    let manager = FixedSlot { slot: 0, count: 2 };
    let pool = ScratchMatrixPool::<f64, _>::new(&[1, 1], 2, 2, manager).unwrap();
    {
        let mut first = pool.borrow_slot(0);
        let mut second = pool.borrow_slot(1);
        first.matrix_mut(KIND_SELF, 0)[(0, 0)] = 1.0;
        second.matrix_mut(KIND_SELF, 0)[(0, 0)] = -1.0;
    }
    assert_eq!(pool.borrow_slot(0).matrix(KIND_SELF, 0)[(0, 0)], 1.0);
    assert_eq!(pool.borrow_slot(1).matrix(KIND_SELF, 0)[(0, 0)], -1.0);
    // borrow_local follows the manager's slot assignment
    assert_eq!(pool.borrow_local().matrix(KIND_SELF, 0)[(0, 0)], 1.0);
}

#[test]
fn flush_order_does_not_change_the_result() {
    let contributions = vec![
        (vec![0], vec![0, 1], 2.0),
        (vec![1], vec![0, 1, 2], -1.0),
        (vec![2], vec![1, 2], 0.5),
    ];

    let mut forward = tridiagonal_matrix(3);
    for (rows, cols, value) in &contributions {
        let mut proxy = LocalMatrixProxy::from_dof_maps(&mut forward, rows, cols);
        for local_col in 0..cols.len() {
            proxy.add(0, local_col, *value);
        }
        proxy.commit().unwrap();
    }

    let mut backward = tridiagonal_matrix(3);
    for (rows, cols, value) in contributions.iter().rev() {
        let mut proxy = LocalMatrixProxy::from_dof_maps(&mut backward, rows, cols);
        for local_col in 0..cols.len() {
            proxy.add(0, local_col, *value);
        }
        proxy.commit().unwrap();
    }

    assert_eq!(forward, backward);
}

#[test]
fn mismatched_matrix_shape_is_rejected() {
    let chain = ChainConnectivity::new(3);
    let mut matrix = tridiagonal_matrix(4);
    let result = Assembler::new().assemble_into(&mut matrix, &chain, &ChainLaplacian);
    assert_eq!(
        result,
        Err(AssemblyError::ShapesDoNotMatch {
            expected_rows: 3,
            expected_cols: 3,
            got_rows: 4,
            got_cols: 4,
        })
    );
}

proptest! {
    #[test]
    fn randomized_assembly_matches_a_dense_reference(
        weights in vec(-100.0f64..100.0, 2..12)
    ) {
        let n = weights.len();
        let chain = ChainConnectivity::new(n);
        let kernel = WeightedChain { weights: weights.clone() };
        let matrix = Assembler::new().assemble_matrix(&chain, &kernel).unwrap();

        let mut reference = DMatrix::zeros(n, n);
        for element in 0..n {
            reference[(element, element)] += weights[element];
            chain.for_each_interior_neighbor(element, &mut |neighbor| {
                reference[(element, neighbor)] -= 0.5 * weights[neighbor];
            });
        }
        assert_matrix_eq!(matrix.build_dense(), reference, comp = abs, tol = 1e-12);
    }

    #[test]
    fn reassembly_is_deterministic(weights in vec(-10.0f64..10.0, 2..8)) {
        let chain = ChainConnectivity::new(weights.len());
        let kernel = WeightedChain { weights };
        let first = Assembler::new().assemble_matrix::<f64, _, _>(&chain, &kernel).unwrap();
        let second = Assembler::new().assemble_matrix::<f64, _, _>(&chain, &kernel).unwrap();
        prop_assert_eq!(first, second);
    }
}
