//! Software CKKS simulator.
//!
//! Slots are stored on the fixed-point grid `round(value * scale)`, the
//! representation a real CKKS decoder sees after the canonical embedding is
//! stripped away. Multiplication multiplies scales, rescaling divides the
//! grid by the dropped prime and re-rounds, and mod-switching drops levels
//! with the scale untouched, so every piece of level/scale bookkeeping in
//! the evaluators is exercised against the same arithmetic a lattice backend
//! would perform. No encryption happens here: this backend is insecure by
//! construction and exists for parameter analysis, debugging, and tests.

use std::sync::Arc;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::params::CkksParams;
use crate::util;

/// Ciphertext of the simulator: the scaled slot grid plus bookkeeping.
#[derive(Debug, Clone)]
pub struct SoftCiphertext {
	slots: Vec<f64>,
	level: u32,
	scale: f64,
	/// 1 for linear ciphertexts, 2 after an unrelinearized multiplication.
	degree: u8,
}

/// Deterministic, insecure backend over [CkksParams].
#[derive(Debug, Clone)]
pub struct SoftBackend {
	params: Arc<CkksParams>,
}

impl SoftBackend {
	pub fn new(params: Arc<CkksParams>) -> Self {
		Self { params }
	}

	pub fn params(&self) -> &CkksParams {
		&self.params
	}

	fn check_level(&self, a: &SoftCiphertext, b: &SoftCiphertext) -> Result<()> {
		if a.level != b.level {
			return Err(Error::backend(format!(
				"ciphertexts are at different levels: {} vs {}",
				a.level, b.level
			)));
		}
		Ok(())
	}

	fn check_scale(&self, a: &SoftCiphertext, b: &SoftCiphertext) -> Result<()> {
		if !util::are_close_f64(a.scale, b.scale) {
			return Err(Error::backend(format!(
				"ciphertexts are at different scales: {} vs {}",
				a.scale, b.scale
			)));
		}
		Ok(())
	}

	fn check_linear(&self, a: &SoftCiphertext) -> Result<()> {
		if a.degree != 1 {
			return Err(Error::backend(
				"ciphertext must be relinearized before this operation",
			));
		}
		Ok(())
	}

	fn encode(&self, values: &[f64], scale: f64) -> Result<Vec<f64>> {
		if values.len() > self.params.slot_count() {
			return Err(Error::backend(format!(
				"plaintext of {} values does not fit {} slots",
				values.len(),
				self.params.slot_count()
			)));
		}
		let mut slots = vec![0.0; self.params.slot_count()];
		for (slot, v) in slots.iter_mut().zip(values.iter()) {
			*slot = (v * scale).round();
		}
		Ok(slots)
	}
}

impl Backend for SoftBackend {
	type Ciphertext = SoftCiphertext;

	fn slot_count(&self) -> usize {
		self.params.slot_count()
	}

	fn max_level(&self) -> u32 {
		self.params.max_level()
	}

	fn modulus_bits_at(&self, level: u32) -> u32 {
		self.params.modulus_bits_at(level)
	}

	fn encrypt(&self, values: &[f64], level: u32, scale: f64) -> Result<SoftCiphertext> {
		if level > self.params.max_level() {
			return Err(Error::backend(format!(
				"cannot encrypt at level {} with only {} levels",
				level,
				self.params.max_level()
			)));
		}
		Ok(SoftCiphertext {
			slots: self.encode(values, scale)?,
			level,
			scale,
			degree: 1,
		})
	}

	fn decrypt(&self, ct: &SoftCiphertext) -> Result<Vec<f64>> {
		Ok(ct.slots.iter().map(|s| s / ct.scale).collect())
	}

	fn level_of(&self, ct: &SoftCiphertext) -> u32 {
		ct.level
	}

	fn scale_of(&self, ct: &SoftCiphertext) -> f64 {
		ct.scale
	}

	fn add(&self, a: &SoftCiphertext, b: &SoftCiphertext) -> Result<SoftCiphertext> {
		self.check_level(a, b)?;
		self.check_scale(a, b)?;
		let mut out = a.clone();
		for (slot, other) in out.slots.iter_mut().zip(b.slots.iter()) {
			*slot += other;
		}
		out.degree = a.degree.max(b.degree);
		Ok(out)
	}

	fn add_plain(&self, a: &SoftCiphertext, values: &[f64]) -> Result<SoftCiphertext> {
		let plain = self.encode(values, a.scale)?;
		let mut out = a.clone();
		for (slot, p) in out.slots.iter_mut().zip(plain.iter()) {
			*slot += p;
		}
		Ok(out)
	}

	fn sub(&self, a: &SoftCiphertext, b: &SoftCiphertext) -> Result<SoftCiphertext> {
		self.check_level(a, b)?;
		self.check_scale(a, b)?;
		let mut out = a.clone();
		for (slot, other) in out.slots.iter_mut().zip(b.slots.iter()) {
			*slot -= other;
		}
		out.degree = a.degree.max(b.degree);
		Ok(out)
	}

	fn sub_plain(&self, a: &SoftCiphertext, values: &[f64]) -> Result<SoftCiphertext> {
		let plain = self.encode(values, a.scale)?;
		let mut out = a.clone();
		for (slot, p) in out.slots.iter_mut().zip(plain.iter()) {
			*slot -= p;
		}
		Ok(out)
	}

	fn negate(&self, a: &SoftCiphertext) -> Result<SoftCiphertext> {
		let mut out = a.clone();
		for slot in out.slots.iter_mut() {
			*slot = -*slot;
		}
		Ok(out)
	}

	fn multiply(&self, a: &SoftCiphertext, b: &SoftCiphertext) -> Result<SoftCiphertext> {
		self.check_level(a, b)?;
		self.check_linear(a)?;
		self.check_linear(b)?;
		let mut out = a.clone();
		for (slot, other) in out.slots.iter_mut().zip(b.slots.iter()) {
			*slot *= other;
		}
		out.scale = a.scale * b.scale;
		out.degree = 2;
		Ok(out)
	}

	fn multiply_plain(&self, a: &SoftCiphertext, values: &[f64]) -> Result<SoftCiphertext> {
		let plain = self.encode(values, a.scale)?;
		let mut out = a.clone();
		for (slot, p) in out.slots.iter_mut().zip(plain.iter()) {
			*slot *= p;
		}
		out.scale = a.scale * a.scale;
		Ok(out)
	}

	fn square(&self, a: &SoftCiphertext) -> Result<SoftCiphertext> {
		self.check_linear(a)?;
		let mut out = a.clone();
		for slot in out.slots.iter_mut() {
			*slot *= *slot;
		}
		out.scale = a.scale * a.scale;
		out.degree = 2;
		Ok(out)
	}

	fn rotate_left(&self, a: &SoftCiphertext, steps: usize) -> Result<SoftCiphertext> {
		self.check_linear(a)?;
		let mut out = a.clone();
		out.slots.rotate_left(steps % self.params.slot_count());
		Ok(out)
	}

	fn rotate_right(&self, a: &SoftCiphertext, steps: usize) -> Result<SoftCiphertext> {
		self.check_linear(a)?;
		let mut out = a.clone();
		out.slots.rotate_right(steps % self.params.slot_count());
		Ok(out)
	}

	fn rescale_to_next(&self, a: &SoftCiphertext) -> Result<SoftCiphertext> {
		if a.level == 0 {
			return Err(Error::backend("cannot rescale past level 0"));
		}
		let prime = self.params.modulus_at(a.level) as f64;
		let mut out = a.clone();
		for slot in out.slots.iter_mut() {
			*slot = (*slot / prime).round();
		}
		out.scale = a.scale / prime;
		out.level = a.level - 1;
		Ok(out)
	}

	fn relinearize(&self, a: &SoftCiphertext) -> Result<SoftCiphertext> {
		let mut out = a.clone();
		out.degree = 1;
		Ok(out)
	}

	fn mod_switch_to(&self, a: &SoftCiphertext, level: u32) -> Result<SoftCiphertext> {
		if level > a.level {
			return Err(Error::backend(format!(
				"cannot switch up from level {} to {}",
				a.level, level
			)));
		}
		let mut out = a.clone();
		out.level = level;
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn backend() -> SoftBackend {
		SoftBackend::new(Arc::new(CkksParams::new(4096, 2, 40).unwrap()))
	}

	#[test]
	fn encrypt_decrypt_round_trip() {
		let be = backend();
		let values = [1.5, -2.25, 0.0, 3.0];
		let ct = be.encrypt(&values, 2, be.params().base_scale()).unwrap();
		let dec = be.decrypt(&ct).unwrap();
		for (d, v) in dec.iter().zip(values.iter()) {
			assert!((d - v).abs() < 1e-9);
		}
		assert_eq!(dec.len(), 4096);
		assert_eq!(dec[4], 0.0);
	}

	#[test]
	fn multiply_then_rescale_tracks_the_scale() {
		let be = backend();
		let scale = be.params().base_scale();
		let a = be.encrypt(&[3.0], 2, scale).unwrap();
		let b = be.encrypt(&[4.0], 2, scale).unwrap();
		let prod = be.multiply(&a, &b).unwrap();
		assert_eq!(be.scale_of(&prod), scale * scale);
		let prod = be.relinearize(&prod).unwrap();
		let dropped = be.rescale_to_next(&prod).unwrap();
		assert_eq!(be.level_of(&dropped), 1);
		let expected = scale * scale / be.params().modulus_at(2) as f64;
		assert_eq!(be.scale_of(&dropped), expected);
		assert!((be.decrypt(&dropped).unwrap()[0] - 12.0).abs() < 1e-9);
	}

	#[test]
	fn unrelinearized_products_refuse_rotation() {
		let be = backend();
		let scale = be.params().base_scale();
		let a = be.encrypt(&[1.0], 2, scale).unwrap();
		let sq = be.square(&a).unwrap();
		assert!(be.rotate_left(&sq, 1).is_err());
		assert!(be.rotate_left(&be.relinearize(&sq).unwrap(), 1).is_ok());
	}

	#[test]
	fn mod_switch_keeps_scale() {
		let be = backend();
		let scale = be.params().base_scale();
		let a = be.encrypt(&[2.0], 2, scale).unwrap();
		let down = be.mod_switch_to(&a, 0).unwrap();
		assert_eq!(be.level_of(&down), 0);
		assert_eq!(be.scale_of(&down), scale);
		assert!(be.mod_switch_to(&down, 1).is_err());
	}
}
