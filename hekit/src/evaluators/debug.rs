//! Step-by-step cross-check between encrypted and cleartext execution.

use std::sync::Arc;

use log::{info, warn};

use crate::backend::Backend;
use crate::ciphertext::{DebugCiphertext, NativeCiphertext, ShadowCiphertext};
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::evaluators::{HomomorphicEval, ScaleEstimator};
use crate::params::{CkksParams, MAX_NORM};
use crate::util;

/// Evaluator that runs every operation both homomorphically and on the
/// cleartext shadow, then decrypts and diffs the two after each step.
///
/// This is the correctness oracle of the toolkit: it is the only variant
/// that proves the encrypted path matches the intended cleartext path at
/// every operation rather than just at the end. Before an operation it also
/// re-derives the scale the backend ciphertext must carry at its level and
/// rejects anything off that grid.
pub struct DebugEval<B: Backend> {
	homomorphic: HomomorphicEval<B>,
	estimator: ScaleEstimator,
	verbose: bool,
}

impl<B: Backend> DebugEval<B> {
	pub fn new(params: Arc<CkksParams>, backend: B, verbose: bool) -> Result<Self> {
		Ok(Self {
			homomorphic: HomomorphicEval::new(params.clone(), backend)?,
			estimator: ScaleEstimator::new(params),
			verbose,
		})
	}

	/// Largest usable `log2(scale)` tracked by the estimator branch.
	pub fn get_estimated_max_log_scale(&self) -> f64 {
		self.estimator.get_estimated_max_log_scale()
	}

	/// Largest log2 plaintext magnitude tracked by the shadow branch.
	pub fn get_exact_max_log_plain_val(&self) -> f64 {
		self.estimator.get_exact_max_log_plain_val()
	}

	pub fn backend(&self) -> &B {
		self.homomorphic.backend()
	}

	fn native(&self, ct: &DebugCiphertext<B>) -> NativeCiphertext<B> {
		NativeCiphertext {
			meta: ct.meta.clone(),
			inner: ct.inner.clone(),
		}
	}

	fn shadow(&self, ct: &DebugCiphertext<B>) -> ShadowCiphertext {
		ShadowCiphertext {
			meta: ct.meta.clone(),
			shadow: ct.shadow.clone(),
		}
	}

	/// Merges the two branches back into one handle. Metadata is taken from
	/// the estimator branch, the backend ciphertext from the homomorphic
	/// branch.
	fn merge(
		&self,
		ct: &mut DebugCiphertext<B>,
		native: NativeCiphertext<B>,
		tracked: ShadowCiphertext,
	) {
		ct.meta = tracked.meta;
		ct.inner = native.inner;
		ct.shadow = tracked.shadow;
	}

	/// Asserts that the backend ciphertext's scale is the nominal scale at
	/// its level, or its square.
	fn check_scale(&self, ct: &DebugCiphertext<B>) -> Result<()> {
		let backend = self.homomorphic.backend();
		let level = backend.level_of(&ct.inner);
		let actual = backend.scale_of(&ct.inner);
		let expected = self.homomorphic.params().nominal_scale_at(level);
		if !util::are_close_f64(actual, expected)
			&& !util::are_close_f64(actual, expected * expected)
		{
			return Err(Error::ScaleInconsistency {
				expected,
				actual,
				context: format!("scale computation is incorrect at level {level}"),
			});
		}
		Ok(())
	}

	/// Decrypts and diffs against the shadow; the per-operation oracle.
	fn check_divergence(&self, ct: &DebugCiphertext<B>, op: &str) -> Result<()> {
		let decrypted = self.homomorphic.decrypt_internal(&self.native(ct))?;
		let distance = util::relative_l2_distance(&decrypted, &ct.shadow);
		if distance > MAX_NORM {
			return Err(Error::Divergence {
				distance,
				tolerance: MAX_NORM,
				decrypted_head: decrypted.iter().take(8).copied().collect(),
				expected_head: ct.shadow.iter().take(8).copied().collect(),
			});
		}
		if distance > MAX_NORM / 2.0 {
			warn!("{op}: relative error {distance:.3e} is approaching the divergence bound");
		} else if self.verbose {
			info!("{op}: relative error {distance:.3e}");
		}
		Ok(())
	}

	fn run_unary(
		&self,
		ct: &mut DebugCiphertext<B>,
		op: &str,
		native_op: impl FnOnce(&HomomorphicEval<B>, &mut NativeCiphertext<B>) -> Result<()>,
		tracked_op: impl FnOnce(&ScaleEstimator, &mut ShadowCiphertext) -> Result<()>,
	) -> Result<()> {
		self.check_scale(ct)?;
		let mut tracked = self.shadow(ct);
		tracked_op(&self.estimator, &mut tracked)?;
		let mut native = self.native(ct);
		native_op(&self.homomorphic, &mut native)?;
		self.merge(ct, native, tracked);
		self.check_divergence(ct, op)
	}

	fn run_binary(
		&self,
		a: &mut DebugCiphertext<B>,
		b: &DebugCiphertext<B>,
		op: &str,
		native_op: impl FnOnce(
			&HomomorphicEval<B>,
			&mut NativeCiphertext<B>,
			&NativeCiphertext<B>,
		) -> Result<()>,
		tracked_op: impl FnOnce(&ScaleEstimator, &mut ShadowCiphertext, &ShadowCiphertext) -> Result<()>,
	) -> Result<()> {
		self.check_scale(a)?;
		self.check_scale(b)?;
		let mut tracked = self.shadow(a);
		tracked_op(&self.estimator, &mut tracked, &self.shadow(b))?;
		let mut native = self.native(a);
		native_op(&self.homomorphic, &mut native, &self.native(b))?;
		self.merge(a, native, tracked);
		self.check_divergence(a, op)
	}
}

impl<B: Backend> Evaluator for DebugEval<B> {
	type Ciphertext = DebugCiphertext<B>;

	fn params(&self) -> &CkksParams {
		self.homomorphic.params()
	}

	fn reset(&self) {
		self.homomorphic.reset();
		self.estimator.reset();
	}

	fn encrypt_internal(&self, values: &[f64], level: u32) -> Result<DebugCiphertext<B>> {
		let native = self.homomorphic.encrypt_internal(values, level)?;
		let tracked = self.estimator.encrypt_internal(values, level)?;
		let ct = DebugCiphertext {
			meta: tracked.meta,
			inner: native.inner,
			shadow: tracked.shadow,
		};
		self.check_divergence(&ct, "encrypt")?;
		Ok(ct)
	}

	fn decrypt_internal(&self, ct: &DebugCiphertext<B>) -> Result<Vec<f64>> {
		self.check_divergence(ct, "decrypt")?;
		self.homomorphic.decrypt_internal(&self.native(ct))
	}

	fn rotate_left_internal(&self, ct: &mut DebugCiphertext<B>, steps: usize) -> Result<()> {
		self.run_unary(
			ct,
			"rotate_left",
			|h, n| h.rotate_left_internal(n, steps),
			|e, s| e.rotate_left_internal(s, steps),
		)
	}

	fn rotate_right_internal(&self, ct: &mut DebugCiphertext<B>, steps: usize) -> Result<()> {
		self.run_unary(
			ct,
			"rotate_right",
			|h, n| h.rotate_right_internal(n, steps),
			|e, s| e.rotate_right_internal(s, steps),
		)
	}

	fn negate_internal(&self, ct: &mut DebugCiphertext<B>) -> Result<()> {
		self.run_unary(
			ct,
			"negate",
			|h, n| h.negate_internal(n),
			|e, s| e.negate_internal(s),
		)
	}

	fn add_internal(&self, a: &mut DebugCiphertext<B>, b: &DebugCiphertext<B>) -> Result<()> {
		self.run_binary(
			a,
			b,
			"add",
			|h, x, y| h.add_internal(x, y),
			|e, x, y| e.add_internal(x, y),
		)
	}

	fn sub_internal(&self, a: &mut DebugCiphertext<B>, b: &DebugCiphertext<B>) -> Result<()> {
		self.run_binary(
			a,
			b,
			"sub",
			|h, x, y| h.sub_internal(x, y),
			|e, x, y| e.sub_internal(x, y),
		)
	}

	fn add_scalar_internal(&self, ct: &mut DebugCiphertext<B>, scalar: f64) -> Result<()> {
		self.run_unary(
			ct,
			"add_scalar",
			|h, n| h.add_scalar_internal(n, scalar),
			|e, s| e.add_scalar_internal(s, scalar),
		)
	}

	fn sub_scalar_internal(&self, ct: &mut DebugCiphertext<B>, scalar: f64) -> Result<()> {
		self.run_unary(
			ct,
			"sub_scalar",
			|h, n| h.sub_scalar_internal(n, scalar),
			|e, s| e.sub_scalar_internal(s, scalar),
		)
	}

	fn add_plain_internal(&self, ct: &mut DebugCiphertext<B>, plain: &[f64]) -> Result<()> {
		self.run_unary(
			ct,
			"add_plain",
			|h, n| h.add_plain_internal(n, plain),
			|e, s| e.add_plain_internal(s, plain),
		)
	}

	fn sub_plain_internal(&self, ct: &mut DebugCiphertext<B>, plain: &[f64]) -> Result<()> {
		self.run_unary(
			ct,
			"sub_plain",
			|h, n| h.sub_plain_internal(n, plain),
			|e, s| e.sub_plain_internal(s, plain),
		)
	}

	fn multiply_internal(&self, a: &mut DebugCiphertext<B>, b: &DebugCiphertext<B>) -> Result<()> {
		self.run_binary(
			a,
			b,
			"multiply",
			|h, x, y| h.multiply_internal(x, y),
			|e, x, y| e.multiply_internal(x, y),
		)
	}

	fn multiply_scalar_internal(&self, ct: &mut DebugCiphertext<B>, scalar: f64) -> Result<()> {
		self.run_unary(
			ct,
			"multiply_scalar",
			|h, n| h.multiply_scalar_internal(n, scalar),
			|e, s| e.multiply_scalar_internal(s, scalar),
		)
	}

	fn multiply_plain_internal(&self, ct: &mut DebugCiphertext<B>, plain: &[f64]) -> Result<()> {
		self.run_unary(
			ct,
			"multiply_plain",
			|h, n| h.multiply_plain_internal(n, plain),
			|e, s| e.multiply_plain_internal(s, plain),
		)
	}

	fn square_internal(&self, ct: &mut DebugCiphertext<B>) -> Result<()> {
		self.run_unary(
			ct,
			"square",
			|h, n| h.square_internal(n),
			|e, s| e.square_internal(s),
		)
	}

	fn mod_down_to_internal(
		&self,
		ct: &mut DebugCiphertext<B>,
		target: &DebugCiphertext<B>,
	) -> Result<()> {
		let native_target = self.native(target);
		let tracked_target = self.shadow(target);
		self.run_unary(
			ct,
			"mod_down_to",
			|h, n| h.mod_down_to_internal(n, &native_target),
			|e, s| e.mod_down_to_internal(s, &tracked_target),
		)
	}

	fn mod_down_to_level_internal(&self, ct: &mut DebugCiphertext<B>, level: u32) -> Result<()> {
		self.run_unary(
			ct,
			"mod_down_to_level",
			|h, n| h.mod_down_to_level_internal(n, level),
			|e, s| e.mod_down_to_level_internal(s, level),
		)
	}

	fn rescale_to_next_internal(&self, ct: &mut DebugCiphertext<B>) -> Result<()> {
		self.run_unary(
			ct,
			"rescale_to_next",
			|h, n| h.rescale_to_next_internal(n),
			|e, s| e.rescale_to_next_internal(s),
		)
	}

	fn relinearize_internal(&self, ct: &mut DebugCiphertext<B>) -> Result<()> {
		self.run_unary(
			ct,
			"relinearize",
			|h, n| h.relinearize_internal(n),
			|e, s| e.relinearize_internal(s),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::SoftBackend;
	use crate::ciphertext::CiphertextHandle;

	fn eval() -> DebugEval<SoftBackend> {
		let params = Arc::new(CkksParams::new(4096, 2, 40).unwrap());
		DebugEval::new(params.clone(), SoftBackend::new(params), false).unwrap()
	}

	#[test]
	fn correct_circuits_never_diverge() {
		let eval = eval();
		let input: Vec<f64> = (0..64).map(|i| i as f64 / 4.0 - 8.0).collect();
		let x = eval.encrypt(&input).unwrap();
		let x2 = eval.square(&x).unwrap();
		let x2 = eval.relinearize(&x2).unwrap();
		let x2 = eval.rescale_to_next(&x2).unwrap();
		let cx = eval.multiply_scalar(&x, -0.0002).unwrap();
		let cx = eval.rescale_to_next(&cx).unwrap();
		let x3 = eval.multiply(&x2, &cx).unwrap();
		let x3 = eval.relinearize(&x3).unwrap();
		let x3 = eval.rescale_to_next(&x3).unwrap();
		assert_eq!(x3.level(), 0);
		let dec = eval.decrypt(&x3).unwrap();
		for (d, v) in dec.iter().zip(input.iter()) {
			assert!((d - (-0.0002 * v * v * v)).abs() < 1e-6);
		}
	}

	#[test]
	fn merged_metadata_comes_from_the_estimator_branch() {
		let eval = eval();
		let x = eval.encrypt(&[1.0, 2.0]).unwrap();
		let y = eval.square(&x).unwrap();
		assert_eq!(y.scale(), x.scale() * x.scale());
		assert_eq!(y.plaintext()[1], 4.0);
		let backend_scale = eval.backend().scale_of(&y.inner);
		assert_eq!(y.scale(), backend_scale);
	}

	#[test]
	fn estimator_state_is_reachable_through_the_debug_wrapper() {
		let eval = eval();
		let x = eval.encrypt(&[16.0]).unwrap();
		let _ = eval.square(&x).unwrap();
		assert_eq!(eval.get_exact_max_log_plain_val(), 8.0);
		assert!(eval.get_estimated_max_log_scale() <= 49.0);
	}
}
