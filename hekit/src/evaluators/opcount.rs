//! Operation counting on top of the depth finder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ciphertext::MetaCiphertext;
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::evaluators::DepthFinder;
use crate::params::CkksParams;

/// Evaluator that counts invocations per operation category while tracking
/// levels exactly like [DepthFinder].
///
/// Categories follow the cost model of a real backend: additions cover
/// subtraction, negation, and the scalar/plaintext forms; multiplications
/// cover squaring and the scalar/plaintext forms; mod-downs count dropped
/// levels rather than calls.
pub struct OpCount {
	inner: DepthFinder,
	encryptions: AtomicUsize,
	additions: AtomicUsize,
	multiplications: AtomicUsize,
	rotations: AtomicUsize,
	rescales: AtomicUsize,
	mod_downs: AtomicUsize,
	relinearizations: AtomicUsize,
}

impl OpCount {
	pub fn new(params: Arc<CkksParams>) -> Self {
		Self {
			inner: DepthFinder::new(params),
			encryptions: AtomicUsize::new(0),
			additions: AtomicUsize::new(0),
			multiplications: AtomicUsize::new(0),
			rotations: AtomicUsize::new(0),
			rescales: AtomicUsize::new(0),
			mod_downs: AtomicUsize::new(0),
			relinearizations: AtomicUsize::new(0),
		}
	}

	/// The wrapped depth finder, for reading the multiplicative depth of the
	/// counted circuit.
	pub fn depth_finder(&self) -> &DepthFinder {
		&self.inner
	}

	pub fn encryptions(&self) -> usize {
		self.encryptions.load(Ordering::Relaxed)
	}

	pub fn additions(&self) -> usize {
		self.additions.load(Ordering::Relaxed)
	}

	pub fn multiplications(&self) -> usize {
		self.multiplications.load(Ordering::Relaxed)
	}

	pub fn rotations(&self) -> usize {
		self.rotations.load(Ordering::Relaxed)
	}

	pub fn rescales(&self) -> usize {
		self.rescales.load(Ordering::Relaxed)
	}

	pub fn mod_downs(&self) -> usize {
		self.mod_downs.load(Ordering::Relaxed)
	}

	pub fn relinearizations(&self) -> usize {
		self.relinearizations.load(Ordering::Relaxed)
	}

	/// One-line summary of all counters.
	pub fn report(&self) -> String {
		format!(
			"encryptions: {}, additions: {}, multiplications: {}, rotations: {}, \
			 rescales: {}, mod_downs: {}, relinearizations: {}",
			self.encryptions(),
			self.additions(),
			self.multiplications(),
			self.rotations(),
			self.rescales(),
			self.mod_downs(),
			self.relinearizations()
		)
	}

	fn bump(counter: &AtomicUsize) {
		counter.fetch_add(1, Ordering::Relaxed);
	}
}

impl Evaluator for OpCount {
	type Ciphertext = MetaCiphertext;

	fn params(&self) -> &CkksParams {
		self.inner.params()
	}

	fn reset(&self) {
		self.inner.reset();
		for counter in [
			&self.encryptions,
			&self.additions,
			&self.multiplications,
			&self.rotations,
			&self.rescales,
			&self.mod_downs,
			&self.relinearizations,
		] {
			counter.store(0, Ordering::Relaxed);
		}
	}

	fn encrypt_internal(&self, values: &[f64], level: u32) -> Result<MetaCiphertext> {
		Self::bump(&self.encryptions);
		self.inner.encrypt_internal(values, level)
	}

	fn decrypt_internal(&self, ct: &MetaCiphertext) -> Result<Vec<f64>> {
		self.inner.decrypt_internal(ct)
	}

	fn rotate_left_internal(&self, ct: &mut MetaCiphertext, steps: usize) -> Result<()> {
		Self::bump(&self.rotations);
		self.inner.rotate_left_internal(ct, steps)
	}

	fn rotate_right_internal(&self, ct: &mut MetaCiphertext, steps: usize) -> Result<()> {
		Self::bump(&self.rotations);
		self.inner.rotate_right_internal(ct, steps)
	}

	fn negate_internal(&self, ct: &mut MetaCiphertext) -> Result<()> {
		Self::bump(&self.additions);
		self.inner.negate_internal(ct)
	}

	fn add_internal(&self, a: &mut MetaCiphertext, b: &MetaCiphertext) -> Result<()> {
		Self::bump(&self.additions);
		self.inner.add_internal(a, b)
	}

	fn sub_internal(&self, a: &mut MetaCiphertext, b: &MetaCiphertext) -> Result<()> {
		Self::bump(&self.additions);
		self.inner.sub_internal(a, b)
	}

	fn add_scalar_internal(&self, ct: &mut MetaCiphertext, scalar: f64) -> Result<()> {
		Self::bump(&self.additions);
		self.inner.add_scalar_internal(ct, scalar)
	}

	fn sub_scalar_internal(&self, ct: &mut MetaCiphertext, scalar: f64) -> Result<()> {
		Self::bump(&self.additions);
		self.inner.sub_scalar_internal(ct, scalar)
	}

	fn add_plain_internal(&self, ct: &mut MetaCiphertext, plain: &[f64]) -> Result<()> {
		Self::bump(&self.additions);
		self.inner.add_plain_internal(ct, plain)
	}

	fn sub_plain_internal(&self, ct: &mut MetaCiphertext, plain: &[f64]) -> Result<()> {
		Self::bump(&self.additions);
		self.inner.sub_plain_internal(ct, plain)
	}

	fn multiply_internal(&self, a: &mut MetaCiphertext, b: &MetaCiphertext) -> Result<()> {
		Self::bump(&self.multiplications);
		self.inner.multiply_internal(a, b)
	}

	fn multiply_scalar_internal(&self, ct: &mut MetaCiphertext, scalar: f64) -> Result<()> {
		Self::bump(&self.multiplications);
		self.inner.multiply_scalar_internal(ct, scalar)
	}

	fn multiply_plain_internal(&self, ct: &mut MetaCiphertext, plain: &[f64]) -> Result<()> {
		Self::bump(&self.multiplications);
		self.inner.multiply_plain_internal(ct, plain)
	}

	fn square_internal(&self, ct: &mut MetaCiphertext) -> Result<()> {
		Self::bump(&self.multiplications);
		self.inner.square_internal(ct)
	}

	fn mod_down_to_internal(&self, ct: &mut MetaCiphertext, target: &MetaCiphertext) -> Result<()> {
		self.mod_downs.fetch_add(
			(ct.meta.level - target.meta.level) as usize,
			Ordering::Relaxed,
		);
		self.inner.mod_down_to_internal(ct, target)
	}

	fn mod_down_to_level_internal(&self, ct: &mut MetaCiphertext, level: u32) -> Result<()> {
		self.mod_downs
			.fetch_add((ct.meta.level - level) as usize, Ordering::Relaxed);
		self.inner.mod_down_to_level_internal(ct, level)
	}

	fn rescale_to_next_internal(&self, ct: &mut MetaCiphertext) -> Result<()> {
		Self::bump(&self.rescales);
		self.inner.rescale_to_next_internal(ct)
	}

	fn relinearize_internal(&self, ct: &mut MetaCiphertext) -> Result<()> {
		Self::bump(&self.relinearizations);
		self.inner.relinearize_internal(ct)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counters_follow_the_circuit() {
		let eval = OpCount::new(Arc::new(CkksParams::new(4096, 2, 40).unwrap()));
		let x = eval.encrypt(&[1.0, 2.0]).unwrap();
		let y = eval.square(&x).unwrap();
		let y = eval.relinearize(&y).unwrap();
		let y = eval.rescale_to_next(&y).unwrap();
		let x_low = eval.mod_down_to_level(&x, 0).unwrap();
		let _ = eval.rotate_left(&y, 3).unwrap();
		let _ = eval.add_scalar(&y, 0.5).unwrap();
		assert_eq!(eval.encryptions(), 1);
		assert_eq!(eval.multiplications(), 1);
		assert_eq!(eval.relinearizations(), 1);
		assert_eq!(eval.rescales(), 1);
		assert_eq!(eval.mod_downs(), 2);
		assert_eq!(eval.rotations(), 1);
		assert_eq!(eval.additions(), 1);
		assert_eq!(eval.depth_finder().get_multiplicative_depth(), 1);
		drop(x_low);
		eval.reset();
		assert_eq!(eval.multiplications(), 0);
	}
}
