//! Reusable per-thread scratch storage for local assembly.
//!
//! The hot per-element loop must not allocate, so dense local matrices and
//! vectors are allocated once per worker thread when a pool is constructed
//! and handed out again and again. Thread identity is supplied by an
//! explicit [`ThreadManager`] rather than language thread-local storage, so
//! the same pools work under a fixed worker pool, a user-space scheduler, or
//! a degenerate single-threaded build.
//!
//! Buffers checked out for different thread slots never alias. Buffers
//! checked out repeatedly for the *same* slot alias the same storage and
//! retain whatever values the previous use left behind; callers must clear
//! what they need cleared. This is a documented contract, not an automatic
//! guarantee.

use nalgebra::{DMatrix, DVector, Scalar};
use num::Zero;
use parking_lot::{Mutex, MutexGuard};

use crate::error::AssemblyError;

/// Scratch buffer kind for contributions of an element to itself.
pub const KIND_SELF: usize = 0;
/// Scratch buffer kind for contributions of an element to a neighbor.
pub const KIND_NEIGHBOR: usize = 1;

/// Index vector slot for the element's row (ansatz) DOFs.
pub const IDX_ELEMENT_ROWS: usize = 0;
/// Index vector slot for the element's column (test) DOFs.
pub const IDX_ELEMENT_COLS: usize = 1;
/// Index vector slot for the neighbor's row (ansatz) DOFs.
pub const IDX_NEIGHBOR_ROWS: usize = 2;
/// Index vector slot for the neighbor's column (test) DOFs.
pub const IDX_NEIGHBOR_COLS: usize = 3;

const NUM_INDEX_VECTORS: usize = 4;
const MIN_KINDS: usize = 2;

/// Abstraction over the threading runtime.
///
/// A degenerate implementation returning `1`/`0` is a valid substitute in a
/// non-parallel build. Implementations must guarantee that no two threads
/// concurrently report the same index; the pools rely on this for
/// non-aliasing of their slots.
pub trait ThreadManager {
    /// Maximal number of threads possible in the current run.
    fn max_threads(&self) -> usize;

    /// Slot index of the calling thread, in `0..max_threads()`.
    fn current_thread_index(&self) -> usize;
}

/// Single-threaded fallback: one slot, always index zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleThread;

impl ThreadManager for SingleThread {
    fn max_threads(&self) -> usize {
        1
    }

    fn current_thread_index(&self) -> usize {
        0
    }
}

/// Thread identity supplied by the global rayon pool.
///
/// Calls from outside the pool map to slot zero; callers mixing pool and
/// non-pool assembly concurrently must supply their own manager instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayonThreadManager;

impl ThreadManager for RayonThreadManager {
    fn max_threads(&self) -> usize {
        rayon::current_num_threads()
    }

    fn current_thread_index(&self) -> usize {
        rayon::current_thread_index().unwrap_or(0)
    }
}

/// The scratch storage of one thread slot: per kind a set of dense local
/// matrices, plus four index vectors (one per entity/ansatz-test
/// combination) for local-to-global DOF maps.
#[derive(Debug)]
pub struct ThreadScratch<T: Scalar> {
    matrices: Vec<Vec<DMatrix<T>>>,
    indices: Vec<Vec<usize>>,
}

impl<T: Scalar> ThreadScratch<T> {
    pub fn num_kinds(&self) -> usize {
        self.matrices.len()
    }

    pub fn matrix(&self, kind: usize, index: usize) -> &DMatrix<T> {
        assert!(kind < self.matrices.len(), "scratch kind {} out of range", kind);
        assert!(
            index < self.matrices[kind].len(),
            "scratch matrix index {} out of range for kind {}",
            index,
            kind
        );
        &self.matrices[kind][index]
    }

    pub fn matrix_mut(&mut self, kind: usize, index: usize) -> &mut DMatrix<T> {
        assert!(kind < self.matrices.len(), "scratch kind {} out of range", kind);
        assert!(
            index < self.matrices[kind].len(),
            "scratch matrix index {} out of range for kind {}",
            index,
            kind
        );
        &mut self.matrices[kind][index]
    }

    pub fn index_vector(&self, which: usize) -> &[usize] {
        assert!(
            which < self.indices.len(),
            "index vector {} out of range",
            which
        );
        &self.indices[which]
    }

    pub fn index_vector_mut(&mut self, which: usize) -> &mut [usize] {
        assert!(
            which < self.indices.len(),
            "index vector {} out of range",
            which
        );
        &mut self.indices[which]
    }
}

/// Per-thread pool of dense scratch matrices.
///
/// One independent set of buffers is allocated for every thread slot up to
/// `thread_manager.max_threads()` at construction; no allocation happens on
/// checkout.
#[derive(Debug)]
pub struct ScratchMatrixPool<T: Scalar, TM = SingleThread> {
    slots: Vec<Mutex<ThreadScratch<T>>>,
    thread_manager: TM,
    max_rows: usize,
    max_cols: usize,
}

impl<T, TM> ScratchMatrixPool<T, TM>
where
    T: Scalar + Zero,
    TM: ThreadManager,
{
    /// Allocates `counts_per_kind[k]` zero-initialized `max_rows x max_cols`
    /// matrices for each kind `k`, per thread slot, plus index vectors of
    /// length `max(max_rows, max_cols)`.
    ///
    /// At least two kind counts must be supplied (self and neighbor
    /// contributions); fewer is a construction error, checked here and not
    /// at use.
    pub fn new(
        counts_per_kind: &[usize],
        max_rows: usize,
        max_cols: usize,
        thread_manager: TM,
    ) -> Result<Self, AssemblyError> {
        if counts_per_kind.len() < MIN_KINDS {
            return Err(AssemblyError::RequirementsNotMet(format!(
                "scratch pool needs counts for at least {} buffer kinds (got {})",
                MIN_KINDS,
                counts_per_kind.len()
            )));
        }
        let index_len = max_rows.max(max_cols);
        let slots = (0..thread_manager.max_threads())
            .map(|_| {
                Mutex::new(ThreadScratch {
                    matrices: counts_per_kind
                        .iter()
                        .map(|&count| vec![DMatrix::zeros(max_rows, max_cols); count])
                        .collect(),
                    indices: vec![vec![0; index_len]; NUM_INDEX_VECTORS],
                })
            })
            .collect();
        Ok(Self {
            slots,
            thread_manager,
            max_rows,
            max_cols,
        })
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn max_cols(&self) -> usize {
        self.max_cols
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Checks out the scratch storage of the calling thread's slot.
    ///
    /// The lock is uncontended whenever the thread manager upholds its
    /// contract; it exists so that a misbehaving manager cannot cause
    /// aliased mutable access.
    pub fn borrow_local(&self) -> MutexGuard<'_, ThreadScratch<T>> {
        self.borrow_slot(self.thread_manager.current_thread_index())
    }

    /// Checks out the scratch storage of an explicit slot; intended for
    /// schedulers that manage slot assignment themselves.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not in `0..num_slots()`.
    pub fn borrow_slot(&self, slot: usize) -> MutexGuard<'_, ThreadScratch<T>> {
        assert!(
            slot < self.slots.len(),
            "thread slot {} out of range (pool has {} slots)",
            slot,
            self.slots.len()
        );
        self.slots[slot].lock()
    }
}

/// The vector scratch storage of one thread slot.
#[derive(Debug)]
pub struct ThreadVectorScratch<T: Scalar> {
    vectors: Vec<Vec<DVector<T>>>,
    indices: Vec<usize>,
}

impl<T: Scalar> ThreadVectorScratch<T> {
    pub fn num_kinds(&self) -> usize {
        self.vectors.len()
    }

    pub fn vector(&self, kind: usize, index: usize) -> &DVector<T> {
        assert!(kind < self.vectors.len(), "scratch kind {} out of range", kind);
        assert!(
            index < self.vectors[kind].len(),
            "scratch vector index {} out of range for kind {}",
            index,
            kind
        );
        &self.vectors[kind][index]
    }

    pub fn vector_mut(&mut self, kind: usize, index: usize) -> &mut DVector<T> {
        assert!(kind < self.vectors.len(), "scratch kind {} out of range", kind);
        assert!(
            index < self.vectors[kind].len(),
            "scratch vector index {} out of range for kind {}",
            index,
            kind
        );
        &mut self.vectors[kind][index]
    }

    pub fn index_vector(&self) -> &[usize] {
        &self.indices
    }

    pub fn index_vector_mut(&mut self) -> &mut [usize] {
        &mut self.indices
    }
}

/// Per-thread pool of dense scratch vectors, the right-hand-side analogue
/// of [`ScratchMatrixPool`].
#[derive(Debug)]
pub struct ScratchVectorPool<T: Scalar, TM = SingleThread> {
    slots: Vec<Mutex<ThreadVectorScratch<T>>>,
    thread_manager: TM,
    max_size: usize,
}

impl<T, TM> ScratchVectorPool<T, TM>
where
    T: Scalar + Zero,
    TM: ThreadManager,
{
    pub fn new(
        counts_per_kind: &[usize],
        max_size: usize,
        thread_manager: TM,
    ) -> Result<Self, AssemblyError> {
        if counts_per_kind.len() < MIN_KINDS {
            return Err(AssemblyError::RequirementsNotMet(format!(
                "scratch pool needs counts for at least {} buffer kinds (got {})",
                MIN_KINDS,
                counts_per_kind.len()
            )));
        }
        let slots = (0..thread_manager.max_threads())
            .map(|_| {
                Mutex::new(ThreadVectorScratch {
                    vectors: counts_per_kind
                        .iter()
                        .map(|&count| vec![DVector::zeros(max_size); count])
                        .collect(),
                    indices: vec![0; max_size],
                })
            })
            .collect();
        Ok(Self {
            slots,
            thread_manager,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn borrow_local(&self) -> MutexGuard<'_, ThreadVectorScratch<T>> {
        self.borrow_slot(self.thread_manager.current_thread_index())
    }

    pub fn borrow_slot(&self, slot: usize) -> MutexGuard<'_, ThreadVectorScratch<T>> {
        assert!(
            slot < self.slots.len(),
            "thread slot {} out of range (pool has {} slots)",
            slot,
            self.slots.len()
        );
        self.slots[slot].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_kind_counts_is_rejected_at_construction() {
        let result = ScratchMatrixPool::<f64, _>::new(&[1], 4, 4, SingleThread);
        assert!(matches!(result, Err(AssemblyError::RequirementsNotMet(_))));
        let result = ScratchVectorPool::<f64, _>::new(&[], 4, SingleThread);
        assert!(matches!(result, Err(AssemblyError::RequirementsNotMet(_))));
    }

    #[test]
    fn repeated_checkout_aliases_the_same_storage() {
        let pool = ScratchMatrixPool::<f64, _>::new(&[1, 1], 3, 3, SingleThread).unwrap();
        {
            let mut scratch = pool.borrow_local();
            scratch.matrix_mut(KIND_SELF, 0)[(1, 2)] = 42.0;
            scratch.index_vector_mut(IDX_ELEMENT_ROWS)[0] = 7;
        }
        // stale contents survive re-checkout; nothing clears them for us
        let scratch = pool.borrow_local();
        assert_eq!(scratch.matrix(KIND_SELF, 0)[(1, 2)], 42.0);
        assert_eq!(scratch.index_vector(IDX_ELEMENT_ROWS)[0], 7);
        assert_eq!(scratch.matrix(KIND_NEIGHBOR, 0)[(1, 2)], 0.0);
    }

    #[test]
    #[should_panic(expected = "thread slot 1 out of range")]
    fn out_of_range_slot_panics() {
        let pool = ScratchMatrixPool::<f64, _>::new(&[1, 1], 2, 2, SingleThread).unwrap();
        let _ = pool.borrow_slot(1);
    }

    #[test]
    fn index_vectors_cover_the_larger_dimension() {
        let pool = ScratchMatrixPool::<f64, _>::new(&[1, 1], 2, 5, SingleThread).unwrap();
        let scratch = pool.borrow_local();
        assert_eq!(scratch.index_vector(IDX_NEIGHBOR_COLS).len(), 5);
    }
}
