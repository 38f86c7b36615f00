//! Floating-point comparison policy for near-zero suppression.
//!
//! The assembly proxy filters accumulated entries through an explicit,
//! injectable tolerance rather than a hard-coded constant, so that precision
//! concerns stay testable and swappable per scalar type.

use nalgebra::RealField;

/// The default tolerance for deciding whether an accumulated entry is
/// effectively zero: a small multiple of the scalar type's machine epsilon.
pub fn default_epsilon<T: RealField>() -> T {
    let scale: T = nalgebra::convert(8.0);
    T::default_epsilon() * scale
}

/// Component-wise floating-point comparison with an absolute tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatCmp<T> {
    eps: T,
}

impl<T: RealField> FloatCmp<T> {
    /// Creates a comparison policy with the given absolute tolerance.
    ///
    /// # Panics
    ///
    /// Panics if `eps` is negative.
    pub fn new(eps: T) -> Self {
        assert!(eps >= T::zero(), "comparison tolerance must be non-negative");
        Self { eps }
    }

    pub fn epsilon(&self) -> T {
        self.eps.clone()
    }

    pub fn eq(&self, a: &T, b: &T) -> bool {
        (a.clone() - b.clone()).abs() <= self.eps
    }

    pub fn ne(&self, a: &T, b: &T) -> bool {
        !self.eq(a, b)
    }

    /// Returns `true` if `value` compares equal to zero within the tolerance.
    pub fn is_zero(&self, value: &T) -> bool {
        value.clone().abs() <= self.eps
    }
}

impl<T: RealField> Default for FloatCmp<T> {
    fn default() -> Self {
        Self::new(default_epsilon())
    }
}
