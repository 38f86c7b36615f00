//! Sparse matrix assembly for element-based discretizations.
//!
//! This crate provides the machinery between a mesh/connectivity provider
//! and a global sparse matrix: sparsity pattern construction from element
//! and element/neighbor stencils ([`pattern`]), a CSR container with a
//! two-phase build API and a frozen pattern ([`matrix`]), reusable
//! per-thread scratch storage ([`scratch`]), a local-to-global scatter
//! proxy with near-zero suppression ([`local`]) and an element-loop driver
//! tying it all together ([`assembly`]).
//!
//! # Error policy
//!
//! Recoverable conditions (invalid construction parameters, shape
//! mismatches, writes outside the frozen pattern) are reported through
//! [`error::AssemblyError`]. Out-of-range indices and calls that violate the
//! two-phase build sequence are programming errors and panic.
//!
//! # Concurrency
//!
//! Pattern construction and the two-phase build are single-threaded by
//! contract. Value-phase assembly may be parallelized by the caller:
//! scratch pools hand out non-aliasing per-thread buffers (identified
//! through a [`scratch::ThreadManager`]), per-entry accumulation is
//! commutative, and the caller imposes a write discipline on the global
//! container, e.g. an element coloring that keeps concurrently touched
//! rows disjoint.

pub extern crate nalgebra;

pub mod assembly;
pub mod cmp;
pub mod connectivity;
pub mod error;
pub mod local;
pub mod matrix;
pub mod pattern;
pub mod scratch;

pub use crate::error::AssemblyError;
