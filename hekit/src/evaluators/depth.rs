//! Multiplicative depth tracking.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::ciphertext::{CiphertextMeta, MetaCiphertext};
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::params::CkksParams;

/// Evaluator that tracks only ciphertext levels.
///
/// Running a circuit under the depth finder costs nothing but metadata
/// updates and yields the multiplicative depth: the maximum number of
/// rescales along any path from a fresh encryption, which in turn fixes the
/// minimum length of the modulus chain.
pub struct DepthFinder {
	params: Arc<CkksParams>,
	top_level: u32,
	max_depth: AtomicU32,
}

impl DepthFinder {
	pub fn new(params: Arc<CkksParams>) -> Self {
		let top_level = params.max_level();
		Self {
			params,
			top_level,
			max_depth: AtomicU32::new(0),
		}
	}

	/// Largest number of rescales observed on any path so far.
	pub fn get_multiplicative_depth(&self) -> u32 {
		self.max_depth.load(Ordering::Relaxed)
	}

	// Metadata-level helpers, shared with the evaluators that compose a
	// depth finder instead of delegating whole handles.

	pub(crate) fn check_same_level(&self, a: &CiphertextMeta, b: &CiphertextMeta) -> Result<()> {
		if a.level != b.level {
			return Err(Error::LevelMismatch {
				left: a.level,
				right: b.level,
			});
		}
		Ok(())
	}

	/// Records that a rescale reached `level`.
	pub(crate) fn observe_level(&self, level: u32) {
		self.max_depth
			.fetch_max(self.top_level - level, Ordering::Relaxed);
	}
}

impl Evaluator for DepthFinder {
	type Ciphertext = MetaCiphertext;

	fn params(&self) -> &CkksParams {
		&self.params
	}

	fn reset(&self) {
		self.max_depth.store(0, Ordering::Relaxed);
	}

	fn encrypt_internal(&self, _values: &[f64], level: u32) -> Result<MetaCiphertext> {
		Ok(MetaCiphertext {
			meta: CiphertextMeta::fresh(
				self.params.slot_count(),
				level,
				self.params.nominal_scale_at(level),
			),
		})
	}

	fn decrypt_internal(&self, _ct: &MetaCiphertext) -> Result<Vec<f64>> {
		Err(Error::invalid_argument(
			"the depth finder carries no plaintext data to decrypt",
		))
	}

	fn rotate_left_internal(&self, _ct: &mut MetaCiphertext, _steps: usize) -> Result<()> {
		Ok(())
	}

	fn rotate_right_internal(&self, _ct: &mut MetaCiphertext, _steps: usize) -> Result<()> {
		Ok(())
	}

	fn negate_internal(&self, _ct: &mut MetaCiphertext) -> Result<()> {
		Ok(())
	}

	fn add_internal(&self, a: &mut MetaCiphertext, b: &MetaCiphertext) -> Result<()> {
		self.check_same_level(&a.meta, &b.meta)
	}

	fn sub_internal(&self, a: &mut MetaCiphertext, b: &MetaCiphertext) -> Result<()> {
		self.check_same_level(&a.meta, &b.meta)
	}

	fn add_scalar_internal(&self, _ct: &mut MetaCiphertext, _scalar: f64) -> Result<()> {
		Ok(())
	}

	fn sub_scalar_internal(&self, _ct: &mut MetaCiphertext, _scalar: f64) -> Result<()> {
		Ok(())
	}

	fn add_plain_internal(&self, _ct: &mut MetaCiphertext, _plain: &[f64]) -> Result<()> {
		Ok(())
	}

	fn sub_plain_internal(&self, _ct: &mut MetaCiphertext, _plain: &[f64]) -> Result<()> {
		Ok(())
	}

	fn multiply_internal(&self, a: &mut MetaCiphertext, b: &MetaCiphertext) -> Result<()> {
		self.check_same_level(&a.meta, &b.meta)?;
		a.meta.propagate_product(b.meta.scale);
		Ok(())
	}

	fn multiply_scalar_internal(&self, ct: &mut MetaCiphertext, _scalar: f64) -> Result<()> {
		ct.meta.propagate_square();
		Ok(())
	}

	fn multiply_plain_internal(&self, ct: &mut MetaCiphertext, _plain: &[f64]) -> Result<()> {
		ct.meta.propagate_square();
		Ok(())
	}

	fn square_internal(&self, ct: &mut MetaCiphertext) -> Result<()> {
		ct.meta.propagate_square();
		Ok(())
	}

	fn mod_down_to_internal(&self, ct: &mut MetaCiphertext, target: &MetaCiphertext) -> Result<()> {
		ct.meta.propagate_mod_down_to(&target.meta);
		Ok(())
	}

	fn mod_down_to_level_internal(&self, ct: &mut MetaCiphertext, level: u32) -> Result<()> {
		while ct.meta.level > level {
			ct.meta.propagate_mod_down_step(&self.params);
		}
		Ok(())
	}

	fn rescale_to_next_internal(&self, ct: &mut MetaCiphertext) -> Result<()> {
		ct.meta.propagate_rescale(&self.params);
		self.observe_level(ct.meta.level);
		Ok(())
	}

	fn relinearize_internal(&self, _ct: &mut MetaCiphertext) -> Result<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ciphertext::CiphertextHandle;

	fn finder() -> DepthFinder {
		DepthFinder::new(Arc::new(CkksParams::new(4096, 3, 40).unwrap()))
	}

	#[test]
	fn depth_of_a_two_level_circuit() {
		let eval = finder();
		let x = eval.encrypt(&[1.0]).unwrap();
		let x2 = eval.square(&x).unwrap();
		let x2 = eval.relinearize(&x2).unwrap();
		let x2 = eval.rescale_to_next(&x2).unwrap();
		let cx = eval.multiply_scalar(&x, -0.0002).unwrap();
		let cx = eval.rescale_to_next(&cx).unwrap();
		let x3 = eval.multiply(&x2, &cx).unwrap();
		let x3 = eval.relinearize(&x3).unwrap();
		let x3 = eval.rescale_to_next(&x3).unwrap();
		assert_eq!(x3.level(), 1);
		assert_eq!(eval.get_multiplicative_depth(), 2);
		eval.reset();
		assert_eq!(eval.get_multiplicative_depth(), 0);
	}

	#[test]
	fn mixed_levels_are_rejected() {
		let eval = finder();
		let x = eval.encrypt(&[1.0]).unwrap();
		let y = eval.rescale_to_next(&x).unwrap();
		assert!(matches!(
			eval.add(&x, &y),
			Err(Error::LevelMismatch { left: 3, right: 2 })
		));
		let (a, b) = eval.mod_down_to_min(&x, &y).unwrap();
		assert_eq!((a.level(), b.level()), (2, 2));
		assert!(eval.add(&a, &b).is_ok());
	}

	#[test]
	fn mod_down_below_target_is_rejected() {
		let eval = finder();
		let x = eval.encrypt(&[1.0]).unwrap();
		let low = eval.mod_down_to_level(&x, 0).unwrap();
		assert_eq!(low.level(), 0);
		assert!(eval.mod_down_to(&low, &x).is_err());
		assert!(eval.mod_down_to(&x, &low).is_ok());
	}
}
