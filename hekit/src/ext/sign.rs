//! Sign function as an iterated polynomial approximation.

use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::ext::poly::evaluate_odd_cubic;

/// Coefficients `(c1, c3)` of the degree-3 sign approximation
/// `f(x) = (3x - x^3) / 2`, applied iteratively to drive values in
/// `[-1, 1]` toward plus or minus one.
pub const SIGN_CUBIC: (f64, f64) = (1.5, -0.5);

/// [Evaluator] extension that approximates the sign of every slot.
/// Useful for comparisons between ciphertexts; also a convenient worked
/// example of a deep circuit for the depth and scale analyses.
pub trait SignEvaluator: Evaluator {
	/// Applies the cubic sign approximation `iterations` times. Each
	/// iteration costs two levels; inputs must lie in `[-1, 1]`.
	fn sign(&self, ct: &Self::Ciphertext, iterations: u32) -> Result<Self::Ciphertext>;
}

impl<E: Evaluator> SignEvaluator for E {
	fn sign(&self, ct: &Self::Ciphertext, iterations: u32) -> Result<Self::Ciphertext> {
		let (c1, c3) = SIGN_CUBIC;
		let mut acc = ct.clone();
		for _ in 0..iterations {
			acc = evaluate_odd_cubic(self, &acc, c3, c1, 0.0)?;
		}
		Ok(acc)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::evaluators::{DepthFinder, PlaintextEval};
	use crate::params::CkksParams;

	#[test]
	fn two_iterations_cost_four_levels() {
		let params = Arc::new(CkksParams::new(4096, 4, 24).unwrap());
		let eval = DepthFinder::new(params);
		let x = eval.encrypt(&[0.5]).unwrap();
		let _ = eval.sign(&x, 2).unwrap();
		assert_eq!(eval.get_multiplicative_depth(), 4);
	}

	#[test]
	fn iterations_sharpen_toward_the_sign() {
		let params = Arc::new(CkksParams::new(4096, 4, 24).unwrap());
		let eval = PlaintextEval::new(params);
		let input = [0.9, -0.7, 0.3, -0.05];
		let x = eval.encrypt(&input).unwrap();
		let y = eval.sign(&x, 2).unwrap();
		let out = eval.decrypt(&y).unwrap();
		for (o, v) in out.iter().zip(input.iter()) {
			assert!((o - v.signum()).abs() < (v - v.signum()).abs());
			assert!(o.abs() <= 1.0 + 1e-9);
		}
	}
}
