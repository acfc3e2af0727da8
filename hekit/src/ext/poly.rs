//! Depth-2 evaluation of odd cubic polynomials.

use crate::ciphertext::CiphertextHandle;
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;

/// Evaluates `c3*x^3 + c1*x + c0` slot-wise at multiplicative depth 2.
///
/// The input must be a linear ciphertext at nominal scale with at least two
/// levels remaining. The result lands two levels below the input. The
/// rescale discipline mirrors the canonical CKKS polynomial pipeline:
/// square and rescale, fold the cubic coefficient into a scalar product,
/// multiply, then bring the linear term down to the product's level.
pub fn evaluate_odd_cubic<E: Evaluator>(
	eval: &E,
	x: &E::Ciphertext,
	c3: f64,
	c1: f64,
	c0: f64,
) -> Result<E::Ciphertext> {
	if x.level() < 2 {
		return Err(Error::invalid_argument(format!(
			"an odd cubic needs two levels, the input has {}",
			x.level()
		)));
	}
	let x2 = eval.square(x)?;
	let x2 = eval.relinearize(&x2)?;
	let x2 = eval.rescale_to_next(&x2)?;

	let cx = eval.multiply_scalar(x, c3)?;
	let cx = eval.rescale_to_next(&cx)?;

	let x3 = eval.multiply(&x2, &cx)?;
	let x3 = eval.relinearize(&x3)?;
	let x3 = eval.rescale_to_next(&x3)?;

	let bx = eval.multiply_scalar(x, c1)?;
	let bx = eval.rescale_to_next(&bx)?;
	let bx = eval.mod_down_to(&bx, &x3)?;

	let sum = eval.add(&x3, &bx)?;
	eval.add_scalar(&sum, c0)
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::evaluators::{DepthFinder, PlaintextEval};
	use crate::params::CkksParams;

	#[test]
	fn cubic_costs_exactly_two_levels() {
		let params = Arc::new(CkksParams::new(4096, 2, 40).unwrap());
		let eval = DepthFinder::new(params);
		let x = eval.encrypt(&[1.0]).unwrap();
		let y = evaluate_odd_cubic(&eval, &x, -0.0002, 0.0843, 0.5).unwrap();
		assert_eq!(y.level(), 0);
		assert_eq!(eval.get_multiplicative_depth(), 2);
	}

	#[test]
	fn cubic_matches_the_cleartext_function() {
		let params = Arc::new(CkksParams::new(4096, 2, 40).unwrap());
		let eval = PlaintextEval::new(params);
		let input = [-16.0, -1.0, 0.0, 2.5, 16.0];
		let x = eval.encrypt(&input).unwrap();
		let y = evaluate_odd_cubic(&eval, &x, -0.0002, 0.0843, 0.5).unwrap();
		let out = eval.decrypt(&y).unwrap();
		for (o, v) in out.iter().zip(input.iter()) {
			let expected = -0.0002 * v * v * v + 0.0843 * v + 0.5;
			assert!((o - expected).abs() < 1e-12);
		}
	}

	#[test]
	fn shallow_inputs_are_rejected() {
		let params = Arc::new(CkksParams::new(4096, 2, 40).unwrap());
		let eval = DepthFinder::new(params);
		let x = eval.encrypt_at_level(&[1.0], 1).unwrap();
		assert!(evaluate_odd_cubic(&eval, &x, 1.0, 1.0, 0.0).is_err());
	}
}
