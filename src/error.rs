use thiserror::Error;

/// Errors reported by the assembly engine.
///
/// These cover everything a correct caller can trigger with bad *data*:
/// malformed construction parameters, local blocks whose shape disagrees with
/// the queried dimensions, and writes outside the frozen sparsity pattern.
/// Index misuse (out-of-range rows, columns or thread slots) and
/// out-of-sequence two-phase build calls are programming errors and panic
/// eagerly instead of returning a variant; see the crate-level documentation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// Construction parameters do not satisfy the documented requirements,
    /// e.g. a pattern with zero rows or a scratch pool with fewer buffer
    /// kinds than the assembly loop needs.
    #[error("requirements not met: {0}")]
    RequirementsNotMet(String),

    /// A local block's dimensions disagree with the element/neighbor DOF
    /// counts the assembler queried.
    #[error(
        "local block of size {got_rows}x{got_cols} does not match \
         expected size {expected_rows}x{expected_cols}"
    )]
    ShapesDoNotMatch {
        expected_rows: usize,
        expected_cols: usize,
        got_rows: usize,
        got_cols: usize,
    },

    /// An attempt was made to write to an entry that is not part of the
    /// frozen sparsity pattern. This signals a mismatch between the stencil
    /// used to build the pattern and the stencil actually used during
    /// numeric assembly.
    #[error("entry ({row}, {col}) is not part of the frozen sparsity pattern")]
    PatternViolation { row: usize, col: usize },
}
