//! Cleartext shadow evaluation.

use std::sync::{Arc, Mutex};

use crate::ciphertext::{CiphertextMeta, ShadowCiphertext};
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::params::CkksParams;
use crate::util;

/// Starting value of the running maximum; effectively negative infinity on
/// the log2 axis.
const LOG_PLAIN_FLOOR: f64 = -100.0;

/// Evaluator that performs the literal real-number equivalent of every
/// operation on a shadow slot array.
///
/// Besides giving the exact cleartext answer a correct homomorphic run must
/// approximate, it records the largest log2 magnitude ever observed, which
/// is the quantity the scale estimator trades off against the scale.
pub struct PlaintextEval {
	params: Arc<CkksParams>,
	max_log_plain: Mutex<f64>,
}

impl PlaintextEval {
	pub fn new(params: Arc<CkksParams>) -> Self {
		Self {
			params,
			max_log_plain: Mutex::new(LOG_PLAIN_FLOOR),
		}
	}

	/// Largest log2 magnitude observed across all operations so far.
	pub fn get_exact_max_log_plain_val(&self) -> f64 {
		*self.max_log_plain.lock().unwrap()
	}

	/// Registers an externally known magnitude bound, e.g. for inputs of a
	/// circuit that never touches them with a magnitude-changing operation.
	pub fn update_plaintext_max_val(&self, value: f64) {
		if value != 0.0 {
			let mut max = self.max_log_plain.lock().unwrap();
			*max = max.max(value.abs().log2());
		}
	}

	pub(crate) fn track(&self, shadow: &[f64]) {
		let norm = util::linf_norm(shadow);
		if norm > 0.0 {
			let mut max = self.max_log_plain.lock().unwrap();
			*max = max.max(norm.log2());
		}
	}
}

impl Evaluator for PlaintextEval {
	type Ciphertext = ShadowCiphertext;

	fn params(&self) -> &CkksParams {
		&self.params
	}

	fn reset(&self) {
		*self.max_log_plain.lock().unwrap() = LOG_PLAIN_FLOOR;
	}

	fn encrypt_internal(&self, values: &[f64], level: u32) -> Result<ShadowCiphertext> {
		let mut shadow = vec![0.0; self.params.slot_count()];
		shadow[..values.len()].copy_from_slice(values);
		self.track(&shadow);
		Ok(ShadowCiphertext {
			meta: CiphertextMeta::fresh(
				self.params.slot_count(),
				level,
				self.params.nominal_scale_at(level),
			),
			shadow,
		})
	}

	fn decrypt_internal(&self, ct: &ShadowCiphertext) -> Result<Vec<f64>> {
		Ok(ct.shadow.clone())
	}

	fn rotate_left_internal(&self, ct: &mut ShadowCiphertext, steps: usize) -> Result<()> {
		let len = ct.shadow.len();
		ct.shadow.rotate_left(steps % len);
		Ok(())
	}

	fn rotate_right_internal(&self, ct: &mut ShadowCiphertext, steps: usize) -> Result<()> {
		let len = ct.shadow.len();
		ct.shadow.rotate_right(steps % len);
		Ok(())
	}

	fn negate_internal(&self, ct: &mut ShadowCiphertext) -> Result<()> {
		for v in ct.shadow.iter_mut() {
			*v = -*v;
		}
		Ok(())
	}

	fn add_internal(&self, a: &mut ShadowCiphertext, b: &ShadowCiphertext) -> Result<()> {
		for (x, y) in a.shadow.iter_mut().zip(b.shadow.iter()) {
			*x += y;
		}
		self.track(&a.shadow);
		Ok(())
	}

	fn sub_internal(&self, a: &mut ShadowCiphertext, b: &ShadowCiphertext) -> Result<()> {
		for (x, y) in a.shadow.iter_mut().zip(b.shadow.iter()) {
			*x -= y;
		}
		self.track(&a.shadow);
		Ok(())
	}

	fn add_scalar_internal(&self, ct: &mut ShadowCiphertext, scalar: f64) -> Result<()> {
		for v in ct.shadow.iter_mut() {
			*v += scalar;
		}
		self.track(&ct.shadow);
		Ok(())
	}

	fn sub_scalar_internal(&self, ct: &mut ShadowCiphertext, scalar: f64) -> Result<()> {
		for v in ct.shadow.iter_mut() {
			*v -= scalar;
		}
		self.track(&ct.shadow);
		Ok(())
	}

	fn add_plain_internal(&self, ct: &mut ShadowCiphertext, plain: &[f64]) -> Result<()> {
		for (v, p) in ct.shadow.iter_mut().zip(plain.iter()) {
			*v += p;
		}
		self.track(&ct.shadow);
		Ok(())
	}

	fn sub_plain_internal(&self, ct: &mut ShadowCiphertext, plain: &[f64]) -> Result<()> {
		for (v, p) in ct.shadow.iter_mut().zip(plain.iter()) {
			*v -= p;
		}
		self.track(&ct.shadow);
		Ok(())
	}

	fn multiply_internal(&self, a: &mut ShadowCiphertext, b: &ShadowCiphertext) -> Result<()> {
		for (x, y) in a.shadow.iter_mut().zip(b.shadow.iter()) {
			*x *= y;
		}
		a.meta.propagate_product(b.meta.scale);
		self.track(&a.shadow);
		Ok(())
	}

	fn multiply_scalar_internal(&self, ct: &mut ShadowCiphertext, scalar: f64) -> Result<()> {
		for v in ct.shadow.iter_mut() {
			*v *= scalar;
		}
		ct.meta.propagate_square();
		self.track(&ct.shadow);
		Ok(())
	}

	fn multiply_plain_internal(&self, ct: &mut ShadowCiphertext, plain: &[f64]) -> Result<()> {
		for (v, p) in ct.shadow.iter_mut().zip(plain.iter()) {
			*v *= p;
		}
		ct.meta.propagate_square();
		self.track(&ct.shadow);
		Ok(())
	}

	fn square_internal(&self, ct: &mut ShadowCiphertext) -> Result<()> {
		for v in ct.shadow.iter_mut() {
			*v *= *v;
		}
		ct.meta.propagate_square();
		self.track(&ct.shadow);
		Ok(())
	}

	fn mod_down_to_internal(
		&self,
		ct: &mut ShadowCiphertext,
		target: &ShadowCiphertext,
	) -> Result<()> {
		ct.meta.propagate_mod_down_to(&target.meta);
		Ok(())
	}

	fn mod_down_to_level_internal(&self, ct: &mut ShadowCiphertext, level: u32) -> Result<()> {
		while ct.meta.level > level {
			ct.meta.propagate_mod_down_step(&self.params);
		}
		Ok(())
	}

	fn rescale_to_next_internal(&self, ct: &mut ShadowCiphertext) -> Result<()> {
		ct.meta.propagate_rescale(&self.params);
		Ok(())
	}

	fn relinearize_internal(&self, _ct: &mut ShadowCiphertext) -> Result<()> {
		Ok(())
	}
}
