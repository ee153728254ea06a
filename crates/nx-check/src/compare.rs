//! Element-wise comparison of an output against its reference.

use std::fmt;

use nx_tensor::Tensor;

/// One element whose absolute difference exceeds `atol`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub actual: f32,
    pub expected: f32,
    pub diff: f32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error! {}-th data has diff with target data: {} vs: {}. Diff is: {}",
            self.index, self.actual, self.expected, self.diff
        )
    }
}

/// Outcome of comparing two tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub actual_dims: Vec<usize>,
    pub expected_dims: Vec<usize>,
    pub mismatches: Vec<Mismatch>,
    /// Largest absolute difference seen; NaN if any element was NaN.
    pub max_diff: f32,
    /// `|a - b| <= atol + rtol * |b|` for every element, shapes equal.
    pub all_close: bool,
}

impl Comparison {
    pub fn shapes_match(&self) -> bool {
        self.actual_dims == self.expected_dims
    }

    pub fn passed(&self) -> bool {
        self.shapes_match() && self.all_close && self.mismatches.is_empty()
    }
}

/// Compares `actual` with `expected` element by element.
///
/// A length mismatch compares nothing and fails. NaN on either side is
/// never close.
pub fn compare(actual: &Tensor, expected: &Tensor, atol: f32, rtol: f32) -> Comparison {
    let actual_dims = actual.shape().dims().to_vec();
    let expected_dims = expected.shape().dims().to_vec();
    if actual.numel() != expected.numel() {
        return Comparison {
            actual_dims,
            expected_dims,
            mismatches: Vec::new(),
            max_diff: f32::INFINITY,
            all_close: false,
        };
    }

    let mut mismatches = Vec::new();
    let mut max_diff = 0.0f32;
    let mut all_close = true;
    for (index, (&a, &b)) in actual.data().iter().zip(expected.data()).enumerate() {
        let diff = (a - b).abs();
        if diff.is_nan() {
            max_diff = f32::NAN;
        } else if !max_diff.is_nan() {
            max_diff = max_diff.max(diff);
        }
        // Negated comparisons so NaN lands on the failing side.
        if !(diff <= atol) {
            mismatches.push(Mismatch {
                index,
                actual: a,
                expected: b,
                diff,
            });
        }
        if !(diff <= atol + rtol * b.abs()) {
            all_close = false;
        }
    }
    Comparison {
        actual_dims,
        expected_dims,
        mismatches,
        max_diff,
        all_close,
    }
}
