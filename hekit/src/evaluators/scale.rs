//! Scale estimation.
//!
//! The estimator runs the circuit over a cleartext shadow while tracking,
//! per handle, the exact scale a real execution would carry, and globally
//! the largest `log2(scale)` for which no intermediate value can overflow
//! the plaintext range. Scales live on the nominal per-level grid: a fresh
//! top-level ciphertext carries `2^log_scale`, and every rescale squares the
//! scale and divides by the dropped prime, so a well-formed linear handle at
//! level `l` carries exactly `nominal(l)` and a fresh product `nominal(l)^2`.
//! Anything else is a bookkeeping bug and is reported, not repaired.

use std::sync::{Arc, Mutex};

use crate::ciphertext::{CiphertextHandle, CiphertextMeta, ShadowCiphertext};
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::evaluators::{DepthFinder, PlaintextEval};
use crate::params::{max_modulus_bits, CkksParams, PLAINTEXT_LOG_MAX};
use crate::util;

/// Evaluator that derives the maximum usable scale for a circuit.
pub struct ScaleEstimator {
	params: Arc<CkksParams>,
	depth: DepthFinder,
	plain: PlaintextEval,
	max_log_scale: Mutex<f64>,
}

impl ScaleEstimator {
	pub fn new(params: Arc<CkksParams>) -> Self {
		let bound = Self::initial_bound(&params);
		Self {
			depth: DepthFinder::new(params.clone()),
			plain: PlaintextEval::new(params.clone()),
			params,
			max_log_scale: Mutex::new(bound),
		}
	}

	/// Starting bound implied by the total modulus budget of the chain.
	fn initial_bound(params: &CkksParams) -> f64 {
		PLAINTEXT_LOG_MAX as f64 - 60.0 + params.total_log2_moduli()
	}

	/// Largest `log2(scale)` the circuit observed so far can tolerate.
	///
	/// Combines the tracked overflow bound with the plaintext range cap and
	/// with the backend's limit on the total modulus size for this
	/// polynomial degree.
	pub fn get_estimated_max_log_scale(&self) -> f64 {
		let tracked = *self.max_log_scale.lock().unwrap();
		let bound = (PLAINTEXT_LOG_MAX as f64).min(tracked);
		let top = self.params.max_level();
		if top > 0 {
			let budget = max_modulus_bits(self.params.poly_degree()) as f64;
			bound.min((budget - 120.0) / top as f64)
		} else {
			bound
		}
	}

	/// Largest log2 plaintext magnitude observed, from the shadow branch.
	pub fn get_exact_max_log_plain_val(&self) -> f64 {
		self.plain.get_exact_max_log_plain_val()
	}

	/// Registers an externally known plaintext magnitude bound.
	pub fn update_plaintext_max_val(&self, value: f64) {
		self.plain.update_plaintext_max_val(value);
	}

	/// Scale exponent of a handle on the nominal grid: 1 for a linear
	/// scale, 2 for a fresh product. Any other scale is an inconsistency.
	fn classify_exponent(&self, meta: &CiphertextMeta) -> Result<u32> {
		let nominal = self.params.nominal_scale_at(meta.level);
		if util::are_close_f64(meta.scale, nominal) {
			Ok(1)
		} else if util::are_close_f64(meta.scale, nominal * nominal) {
			Ok(2)
		} else {
			Err(Error::ScaleInconsistency {
				expected: nominal,
				actual: meta.scale,
				context: format!("scale off the nominal grid at level {}", meta.level),
			})
		}
	}

	/// Tightens the global scale bound from one handle's scale exponent,
	/// level, and shadow magnitude.
	fn update_max_log_scale(&self, ct: &ShadowCiphertext) -> Result<()> {
		let exponent = self.classify_exponent(&ct.meta)?;
		let level = ct.meta.level;
		let norm = util::linf_norm(&ct.shadow);
		let log_norm = if norm == 0.0 { f64::NEG_INFINITY } else { norm.log2() };
		if exponent > level {
			let bound = (PLAINTEXT_LOG_MAX as f64 - log_norm) / (exponent - level) as f64;
			let mut max = self.max_log_scale.lock().unwrap();
			*max = max.min(bound);
		} else if exponent == level && log_norm > PLAINTEXT_LOG_MAX as f64 {
			return Err(Error::Overflow {
				log_plain: log_norm,
				limit: PLAINTEXT_LOG_MAX,
			});
		}
		Ok(())
	}

	fn check_same_scale(&self, a: &CiphertextMeta, b: &CiphertextMeta) -> Result<()> {
		if !util::are_close_f64(a.scale, b.scale) {
			return Err(Error::ScaleInconsistency {
				expected: a.scale,
				actual: b.scale,
				context: "operand scales differ".into(),
			});
		}
		Ok(())
	}
}

impl Evaluator for ScaleEstimator {
	type Ciphertext = ShadowCiphertext;

	fn params(&self) -> &CkksParams {
		&self.params
	}

	fn reset(&self) {
		self.depth.reset();
		self.plain.reset();
		*self.max_log_scale.lock().unwrap() = Self::initial_bound(&self.params);
	}

	fn encrypt_internal(&self, values: &[f64], level: u32) -> Result<ShadowCiphertext> {
		let ct = self.plain.encrypt_internal(values, level)?;
		self.update_max_log_scale(&ct)?;
		Ok(ct)
	}

	fn decrypt_internal(&self, ct: &ShadowCiphertext) -> Result<Vec<f64>> {
		self.plain.decrypt_internal(ct)
	}

	fn rotate_left_internal(&self, ct: &mut ShadowCiphertext, steps: usize) -> Result<()> {
		self.plain.rotate_left_internal(ct, steps)
	}

	fn rotate_right_internal(&self, ct: &mut ShadowCiphertext, steps: usize) -> Result<()> {
		self.plain.rotate_right_internal(ct, steps)
	}

	fn negate_internal(&self, ct: &mut ShadowCiphertext) -> Result<()> {
		self.plain.negate_internal(ct)
	}

	fn add_internal(&self, a: &mut ShadowCiphertext, b: &ShadowCiphertext) -> Result<()> {
		self.depth.check_same_level(&a.meta, &b.meta)?;
		self.check_same_scale(&a.meta, &b.meta)?;
		self.plain.add_internal(a, b)?;
		self.update_max_log_scale(a)
	}

	fn sub_internal(&self, a: &mut ShadowCiphertext, b: &ShadowCiphertext) -> Result<()> {
		self.depth.check_same_level(&a.meta, &b.meta)?;
		self.check_same_scale(&a.meta, &b.meta)?;
		self.plain.sub_internal(a, b)?;
		self.update_max_log_scale(a)
	}

	fn add_scalar_internal(&self, ct: &mut ShadowCiphertext, scalar: f64) -> Result<()> {
		self.plain.add_scalar_internal(ct, scalar)?;
		self.update_max_log_scale(ct)
	}

	fn sub_scalar_internal(&self, ct: &mut ShadowCiphertext, scalar: f64) -> Result<()> {
		self.plain.sub_scalar_internal(ct, scalar)?;
		self.update_max_log_scale(ct)
	}

	fn add_plain_internal(&self, ct: &mut ShadowCiphertext, plain: &[f64]) -> Result<()> {
		self.plain.add_plain_internal(ct, plain)?;
		self.update_max_log_scale(ct)
	}

	fn sub_plain_internal(&self, ct: &mut ShadowCiphertext, plain: &[f64]) -> Result<()> {
		self.plain.sub_plain_internal(ct, plain)?;
		self.update_max_log_scale(ct)
	}

	fn multiply_internal(&self, a: &mut ShadowCiphertext, b: &ShadowCiphertext) -> Result<()> {
		self.depth.check_same_level(&a.meta, &b.meta)?;
		self.plain.multiply_internal(a, b)?;
		self.update_max_log_scale(a)
	}

	fn multiply_scalar_internal(&self, ct: &mut ShadowCiphertext, scalar: f64) -> Result<()> {
		self.plain.multiply_scalar_internal(ct, scalar)?;
		self.update_max_log_scale(ct)
	}

	fn multiply_plain_internal(&self, ct: &mut ShadowCiphertext, plain: &[f64]) -> Result<()> {
		self.plain.multiply_plain_internal(ct, plain)?;
		self.update_max_log_scale(ct)
	}

	fn square_internal(&self, ct: &mut ShadowCiphertext) -> Result<()> {
		self.plain.square_internal(ct)?;
		self.update_max_log_scale(ct)
	}

	fn mod_down_to_internal(
		&self,
		ct: &mut ShadowCiphertext,
		target: &ShadowCiphertext,
	) -> Result<()> {
		self.plain.mod_down_to_internal(ct, target)?;
		self.update_max_log_scale(ct)
	}

	fn mod_down_to_level_internal(&self, ct: &mut ShadowCiphertext, level: u32) -> Result<()> {
		// one step per dropped level so the bound sees every intermediate
		while ct.meta.level > level {
			ct.meta.propagate_mod_down_step(&self.params);
			self.update_max_log_scale(ct)?;
		}
		Ok(())
	}

	fn rescale_to_next_internal(&self, ct: &mut ShadowCiphertext) -> Result<()> {
		self.plain.rescale_to_next_internal(ct)?;
		self.depth.observe_level(ct.meta.level);
		self.update_max_log_scale(ct)
	}

	fn relinearize_internal(&self, _ct: &mut ShadowCiphertext) -> Result<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn estimator(max_level: u32) -> ScaleEstimator {
		ScaleEstimator::new(Arc::new(CkksParams::new(4096, max_level, 40).unwrap()))
	}

	#[test]
	fn fresh_encryptions_sit_on_the_nominal_grid() {
		let eval = estimator(2);
		let x = eval.encrypt(&[1.0]).unwrap();
		assert_eq!(x.scale(), 2f64.powi(40));
		let low = eval.encrypt_at_level(&[1.0], 0).unwrap();
		assert_eq!(low.scale(), eval.params().nominal_scale_at(0));
	}

	#[test]
	fn multiply_squares_and_rescale_restores() {
		let eval = estimator(2);
		let x = eval.encrypt(&[2.0]).unwrap();
		let sq = eval.square(&x).unwrap();
		assert_eq!(sq.scale(), x.scale() * x.scale());
		let sq = eval.relinearize(&sq).unwrap();
		let dropped = eval.rescale_to_next(&sq).unwrap();
		assert_eq!(dropped.scale(), eval.params().nominal_scale_at(1));
		// rescaling a nominal-scale ciphertext leaves the grid
		assert!(matches!(
			eval.rescale_to_next(&dropped),
			Err(Error::ScaleInconsistency { .. })
		));
	}

	#[test]
	fn mod_down_follows_the_homomorphic_recurrence() {
		let eval = estimator(2);
		let x = eval.encrypt(&[1.0]).unwrap();
		let low = eval.mod_down_to_level(&x, 0).unwrap();
		assert_eq!(low.level(), 0);
		assert_eq!(low.scale(), eval.params().nominal_scale_at(0));
	}

	#[test]
	fn estimate_reflects_observed_magnitudes() {
		let eval = estimator(2);
		let x = eval.encrypt(&[16.0]).unwrap();
		let sq = eval.square(&x).unwrap();
		let sq = eval.relinearize(&sq).unwrap();
		let sq = eval.rescale_to_next(&sq).unwrap();
		let sq = eval.rescale_to_next(&eval.multiply_scalar(&sq, 1.0).unwrap()).unwrap();
		// at level 0 with e = 1 and |x^2| = 256 the bound is 59 - 8 = 51,
		// and the chain budget gives (218 - 120) / 2 = 49
		let est = eval.get_estimated_max_log_scale();
		assert!((est - 49.0).abs() < 1e-9, "estimate was {est}");
		assert!(est >= crate::params::MIN_LOG_SCALE as f64);
		assert_eq!(eval.get_exact_max_log_plain_val(), 8.0);
		drop(sq);
		eval.reset();
		assert!(eval.get_estimated_max_log_scale() >= 49.0);
	}

	#[test]
	fn overflow_is_raised_eagerly() {
		let eval = estimator(2);
		let x = eval.encrypt(&[2f64.powi(40)]).unwrap();
		// |x^2| = 2^80 at level 2 with exponent 2: overflow imminent
		assert!(matches!(eval.square(&x), Err(Error::Overflow { .. })));
	}
}
