//! Interface to the mesh/connectivity provider.
//!
//! The engine never inspects a mesh directly. Everything it needs to know
//! about the discretization is expressed through [`ElementConnectivity`]:
//! element iteration, local-to-global DOF index mappings for both the
//! ansatz (row) and test (column) spaces, and which elements share an
//! interior codimension-1 interface.

/// Connectivity of a discretized domain, as consumed by the pattern builders
/// and the assembly driver.
///
/// Row indices are mapped through the ansatz space, column indices through
/// the test space. For the common square case both mappings coincide, but
/// the engine never assumes so; the neighbor stencil in particular relies on
/// the distinction to support Petrov-Galerkin-style couplings.
pub trait ElementConnectivity {
    fn num_elements(&self) -> usize;

    /// Total number of row DOFs (the dimension of the ansatz space).
    fn num_rows(&self) -> usize;

    /// Total number of column DOFs (the dimension of the test space).
    fn num_cols(&self) -> usize;

    fn element_row_dof_count(&self, element: usize) -> usize;

    fn element_col_dof_count(&self, element: usize) -> usize;

    /// Writes the global row DOF indices of `element` into `dofs`.
    ///
    /// `dofs` must have length `element_row_dof_count(element)`.
    fn populate_element_row_dofs(&self, dofs: &mut [usize], element: usize);

    /// Writes the global column DOF indices of `element` into `dofs`.
    ///
    /// `dofs` must have length `element_col_dof_count(element)`.
    fn populate_element_col_dofs(&self, dofs: &mut [usize], element: usize);

    /// Calls `visitor` once for every element sharing an *interior*
    /// codimension-1 interface with `element`. Boundary interfaces are not
    /// reported.
    fn for_each_interior_neighbor(&self, element: usize, visitor: &mut dyn FnMut(usize));
}

/// A 1-D chain of single-DOF elements, where element `i` neighbors `i - 1`
/// and `i + 1` and the two ends are boundary interfaces.
///
/// This is the canonical DG0-style smoke-test discretization: row and column
/// index spaces coincide and element `i` owns global DOF `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConnectivity {
    num_elements: usize,
}

impl ChainConnectivity {
    pub fn new(num_elements: usize) -> Self {
        Self { num_elements }
    }
}

impl ElementConnectivity for ChainConnectivity {
    fn num_elements(&self) -> usize {
        self.num_elements
    }

    fn num_rows(&self) -> usize {
        self.num_elements
    }

    fn num_cols(&self) -> usize {
        self.num_elements
    }

    fn element_row_dof_count(&self, _element: usize) -> usize {
        1
    }

    fn element_col_dof_count(&self, _element: usize) -> usize {
        1
    }

    fn populate_element_row_dofs(&self, dofs: &mut [usize], element: usize) {
        assert!(
            element < self.num_elements,
            "element index {} out of range (chain has {} elements)",
            element,
            self.num_elements
        );
        dofs[0] = element;
    }

    fn populate_element_col_dofs(&self, dofs: &mut [usize], element: usize) {
        self.populate_element_row_dofs(dofs, element);
    }

    fn for_each_interior_neighbor(&self, element: usize, visitor: &mut dyn FnMut(usize)) {
        assert!(
            element < self.num_elements,
            "element index {} out of range (chain has {} elements)",
            element,
            self.num_elements
        );
        if element > 0 {
            visitor(element - 1);
        }
        if element + 1 < self.num_elements {
            visitor(element + 1);
        }
    }
}
