//! Real homomorphic execution over a backend.

use std::sync::Arc;

use crate::backend::Backend;
use crate::ciphertext::{CiphertextMeta, NativeCiphertext};
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::params::CkksParams;

/// Evaluator that executes every operation on real backend ciphertexts.
///
/// This is a thin delegation layer: levels and scales are owned by the
/// backend ciphertext and mirrored into the handle metadata after each
/// operation. Primitive operations are independent per ciphertext and safe
/// to dispatch from a worker pool.
pub struct HomomorphicEval<B: Backend> {
	params: Arc<CkksParams>,
	backend: B,
}

impl<B: Backend> HomomorphicEval<B> {
	pub fn new(params: Arc<CkksParams>, backend: B) -> Result<Self> {
		if backend.slot_count() != params.slot_count()
			|| backend.max_level() != params.max_level()
		{
			return Err(Error::invalid_argument(format!(
				"backend shape ({} slots, {} levels) does not match the parameters \
				 ({} slots, {} levels)",
				backend.slot_count(),
				backend.max_level(),
				params.slot_count(),
				params.max_level()
			)));
		}
		Ok(Self { params, backend })
	}

	pub fn backend(&self) -> &B {
		&self.backend
	}

	fn sync_meta(&self, ct: &mut NativeCiphertext<B>) {
		ct.meta.level = self.backend.level_of(&ct.inner);
		ct.meta.scale = self.backend.scale_of(&ct.inner);
	}

	fn broadcast(&self, scalar: f64) -> Vec<f64> {
		vec![scalar; self.params.slot_count()]
	}
}

impl<B: Backend> Evaluator for HomomorphicEval<B> {
	type Ciphertext = NativeCiphertext<B>;

	fn params(&self) -> &CkksParams {
		&self.params
	}

	fn reset(&self) {}

	fn encrypt_internal(&self, values: &[f64], level: u32) -> Result<NativeCiphertext<B>> {
		let scale = self.params.nominal_scale_at(level);
		Ok(NativeCiphertext {
			meta: CiphertextMeta::fresh(self.params.slot_count(), level, scale),
			inner: self.backend.encrypt(values, level, scale)?,
		})
	}

	fn decrypt_internal(&self, ct: &NativeCiphertext<B>) -> Result<Vec<f64>> {
		self.backend.decrypt(&ct.inner)
	}

	fn rotate_left_internal(&self, ct: &mut NativeCiphertext<B>, steps: usize) -> Result<()> {
		ct.inner = self.backend.rotate_left(&ct.inner, steps)?;
		Ok(())
	}

	fn rotate_right_internal(&self, ct: &mut NativeCiphertext<B>, steps: usize) -> Result<()> {
		ct.inner = self.backend.rotate_right(&ct.inner, steps)?;
		Ok(())
	}

	fn negate_internal(&self, ct: &mut NativeCiphertext<B>) -> Result<()> {
		ct.inner = self.backend.negate(&ct.inner)?;
		Ok(())
	}

	fn add_internal(&self, a: &mut NativeCiphertext<B>, b: &NativeCiphertext<B>) -> Result<()> {
		a.inner = self.backend.add(&a.inner, &b.inner)?;
		self.sync_meta(a);
		Ok(())
	}

	fn sub_internal(&self, a: &mut NativeCiphertext<B>, b: &NativeCiphertext<B>) -> Result<()> {
		a.inner = self.backend.sub(&a.inner, &b.inner)?;
		self.sync_meta(a);
		Ok(())
	}

	fn add_scalar_internal(&self, ct: &mut NativeCiphertext<B>, scalar: f64) -> Result<()> {
		ct.inner = self.backend.add_plain(&ct.inner, &self.broadcast(scalar))?;
		self.sync_meta(ct);
		Ok(())
	}

	fn sub_scalar_internal(&self, ct: &mut NativeCiphertext<B>, scalar: f64) -> Result<()> {
		ct.inner = self.backend.sub_plain(&ct.inner, &self.broadcast(scalar))?;
		self.sync_meta(ct);
		Ok(())
	}

	fn add_plain_internal(&self, ct: &mut NativeCiphertext<B>, plain: &[f64]) -> Result<()> {
		ct.inner = self.backend.add_plain(&ct.inner, plain)?;
		self.sync_meta(ct);
		Ok(())
	}

	fn sub_plain_internal(&self, ct: &mut NativeCiphertext<B>, plain: &[f64]) -> Result<()> {
		ct.inner = self.backend.sub_plain(&ct.inner, plain)?;
		self.sync_meta(ct);
		Ok(())
	}

	fn multiply_internal(&self, a: &mut NativeCiphertext<B>, b: &NativeCiphertext<B>) -> Result<()> {
		a.inner = self.backend.multiply(&a.inner, &b.inner)?;
		self.sync_meta(a);
		Ok(())
	}

	fn multiply_scalar_internal(&self, ct: &mut NativeCiphertext<B>, scalar: f64) -> Result<()> {
		if scalar == 0.0 {
			// A disclosed public zero: encrypt a fresh zero at the squared
			// scale so the bookkeeping matches the multiply path.
			let scale = ct.meta.scale * ct.meta.scale;
			ct.inner = self
				.backend
				.encrypt(&vec![0.0; self.params.slot_count()], ct.meta.level, scale)?;
		} else {
			ct.inner = self.backend.multiply_plain(&ct.inner, &self.broadcast(scalar))?;
		}
		self.sync_meta(ct);
		Ok(())
	}

	fn multiply_plain_internal(&self, ct: &mut NativeCiphertext<B>, plain: &[f64]) -> Result<()> {
		ct.inner = self.backend.multiply_plain(&ct.inner, plain)?;
		self.sync_meta(ct);
		Ok(())
	}

	fn square_internal(&self, ct: &mut NativeCiphertext<B>) -> Result<()> {
		ct.inner = self.backend.square(&ct.inner)?;
		self.sync_meta(ct);
		Ok(())
	}

	fn mod_down_to_internal(
		&self,
		ct: &mut NativeCiphertext<B>,
		target: &NativeCiphertext<B>,
	) -> Result<()> {
		self.mod_down_to_level_internal(ct, target.meta.level)
	}

	fn mod_down_to_level_internal(&self, ct: &mut NativeCiphertext<B>, level: u32) -> Result<()> {
		// There is no native jump primitive: each dropped level costs one
		// multiply-by-one and one backend rescale.
		let ones = self.broadcast(1.0);
		while ct.meta.level > level {
			ct.inner = self.backend.multiply_plain(&ct.inner, &ones)?;
			ct.inner = self.backend.rescale_to_next(&ct.inner)?;
			self.sync_meta(ct);
		}
		Ok(())
	}

	fn rescale_to_next_internal(&self, ct: &mut NativeCiphertext<B>) -> Result<()> {
		ct.inner = self.backend.rescale_to_next(&ct.inner)?;
		self.sync_meta(ct);
		Ok(())
	}

	fn relinearize_internal(&self, ct: &mut NativeCiphertext<B>) -> Result<()> {
		ct.inner = self.backend.relinearize(&ct.inner)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::SoftBackend;
	use crate::ciphertext::CiphertextHandle;

	fn eval() -> HomomorphicEval<SoftBackend> {
		let params = Arc::new(CkksParams::new(4096, 2, 40).unwrap());
		HomomorphicEval::new(params.clone(), SoftBackend::new(params)).unwrap()
	}

	#[test]
	fn executes_a_product_with_exact_bookkeeping() {
		let eval = eval();
		let x = eval.encrypt(&[3.0, -0.5]).unwrap();
		let y = eval.encrypt(&[2.0, 8.0]).unwrap();
		let prod = eval.multiply(&x, &y).unwrap();
		assert_eq!(prod.scale(), x.scale() * y.scale());
		let prod = eval.relinearize(&prod).unwrap();
		let prod = eval.rescale_to_next(&prod).unwrap();
		assert_eq!(prod.level(), 1);
		assert_eq!(prod.scale(), eval.params().nominal_scale_at(1));
		let dec = eval.decrypt(&prod).unwrap();
		assert!((dec[0] - 6.0).abs() < 1e-6);
		assert!((dec[1] + 4.0).abs() < 1e-6);
	}

	#[test]
	fn zero_scalar_short_circuits_to_a_fresh_zero() {
		let eval = eval();
		let x = eval.encrypt(&[5.0, 7.0]).unwrap();
		let zeroed = eval.multiply_scalar(&x, 0.0).unwrap();
		assert_eq!(zeroed.scale(), x.scale() * x.scale());
		assert_eq!(zeroed.level(), x.level());
		let dec = eval.decrypt(&zeroed).unwrap();
		assert!(dec.iter().all(|v| *v == 0.0));
	}

	#[test]
	fn mod_down_costs_one_rescale_per_level() {
		let eval = eval();
		let x = eval.encrypt(&[1.25]).unwrap();
		let low = eval.mod_down_to_level(&x, 0).unwrap();
		assert_eq!(low.level(), 0);
		assert_eq!(low.scale(), eval.params().nominal_scale_at(0));
		let dec = eval.decrypt(&low).unwrap();
		assert!((dec[0] - 1.25).abs() < 1e-6);
	}
}
