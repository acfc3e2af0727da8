//! The evaluator contract.
//!
//! A circuit is written once against [Evaluator] and can then be run under
//! any variant: depth finding, operation counting, cleartext shadowing,
//! scale estimation, real homomorphic execution, or the debug cross-check.
//! The provided methods of the trait form the shared contract layer: they
//! validate operand encodings and shapes, derive the encoding of the result,
//! and emit trace logging, before dispatching to the `*_internal` methods
//! each variant implements. Variants never re-implement the validation; they
//! only maintain the state they track (levels, shadows, scales, or backend
//! ciphertexts).
//!
//! # Arithmetic operations
//! The core operations are element-wise addition and multiplication of
//! ciphertexts, their scalar and plaintext-array forms, and squaring. Binary
//! operations require compatible encodings: equal kinds, or the two mixed
//! pairs (row-matrix with matrix, matrix with column-matrix) produced when a
//! vector has been combined with a matrix. `multiply` additionally enforces
//! a canonical operand order: a row vector multiplies a matrix from the
//! left, a column vector from the right; arguments arriving in the opposite
//! order are swapped automatically.
//!
//! # Level and scale maintenance
//! `rescale_to_next` drops one modulus layer and divides the scale by its
//! prime; `mod_down_to`, `mod_down_to_min`, and `mod_down_to_level` lower a
//! ciphertext to a target level without the precision benefit of a rescale.
//! `relinearize` restores a quadratic ciphertext to linear form. These are
//! the operations whose bookkeeping the tracking evaluators exist to verify:
//! a single slip in level or scale produces either a hard failure or a
//! silent loss of precision.

use log::trace;

use crate::ciphertext::{CiphertextHandle, CiphertextMeta, Encoding};
use crate::error::{Error, Result};
use crate::params::CkksParams;
use crate::util;

/// Operations every evaluator variant provides.
pub trait Evaluator {
	/// The handle type this variant produces and consumes.
	type Ciphertext: CiphertextHandle + Send + Sync;

	/// Instance parameters shared by every evaluator of one computation.
	fn params(&self) -> &CkksParams;

	/// Clears accumulator state (maximum depth, observed norms, counters).
	/// Must not be called while operations are in flight on this instance.
	fn reset(&self);

	// ----- required internals, one per operation ------------------------
	//
	// Implementations maintain level/scale/shadow/native state only; the
	// provided wrappers below own validation and encoding derivation.

	fn encrypt_internal(&self, values: &[f64], level: u32) -> Result<Self::Ciphertext>;

	fn decrypt_internal(&self, ct: &Self::Ciphertext) -> Result<Vec<f64>>;

	fn rotate_left_internal(&self, ct: &mut Self::Ciphertext, steps: usize) -> Result<()>;

	fn rotate_right_internal(&self, ct: &mut Self::Ciphertext, steps: usize) -> Result<()>;

	fn negate_internal(&self, ct: &mut Self::Ciphertext) -> Result<()>;

	fn add_internal(&self, a: &mut Self::Ciphertext, b: &Self::Ciphertext) -> Result<()>;

	fn sub_internal(&self, a: &mut Self::Ciphertext, b: &Self::Ciphertext) -> Result<()>;

	fn add_scalar_internal(&self, ct: &mut Self::Ciphertext, scalar: f64) -> Result<()>;

	fn sub_scalar_internal(&self, ct: &mut Self::Ciphertext, scalar: f64) -> Result<()>;

	fn add_plain_internal(&self, ct: &mut Self::Ciphertext, plain: &[f64]) -> Result<()>;

	fn sub_plain_internal(&self, ct: &mut Self::Ciphertext, plain: &[f64]) -> Result<()>;

	fn multiply_internal(&self, a: &mut Self::Ciphertext, b: &Self::Ciphertext) -> Result<()>;

	fn multiply_scalar_internal(&self, ct: &mut Self::Ciphertext, scalar: f64) -> Result<()>;

	fn multiply_plain_internal(&self, ct: &mut Self::Ciphertext, plain: &[f64]) -> Result<()>;

	fn square_internal(&self, ct: &mut Self::Ciphertext) -> Result<()>;

	fn mod_down_to_internal(
		&self,
		ct: &mut Self::Ciphertext,
		target: &Self::Ciphertext,
	) -> Result<()>;

	fn mod_down_to_level_internal(&self, ct: &mut Self::Ciphertext, level: u32) -> Result<()>;

	fn rescale_to_next_internal(&self, ct: &mut Self::Ciphertext) -> Result<()>;

	fn relinearize_internal(&self, ct: &mut Self::Ciphertext) -> Result<()>;

	// ----- provided contract --------------------------------------------

	/// Encrypts `values` at the top level.
	fn encrypt(&self, values: &[f64]) -> Result<Self::Ciphertext> {
		self.encrypt_at_level(values, self.params().max_level())
	}

	/// Encrypts `values` at an explicit level.
	fn encrypt_at_level(&self, values: &[f64], level: u32) -> Result<Self::Ciphertext> {
		if values.len() > self.params().slot_count() {
			return Err(Error::invalid_argument(format!(
				"plaintext of {} values does not fit {} slots",
				values.len(),
				self.params().slot_count()
			)));
		}
		if level > self.params().max_level() {
			return Err(Error::invalid_argument(format!(
				"cannot encrypt at level {level}; the top level is {}",
				self.params().max_level()
			)));
		}
		trace!("encrypt: {} values at level {level}", values.len());
		self.encrypt_internal(values, level)
	}

	/// Recovers the plaintext slots. Tracking-only variants without either a
	/// real ciphertext or a shadow reject this.
	fn decrypt(&self, ct: &Self::Ciphertext) -> Result<Vec<f64>> {
		self.decrypt_internal(ct)
	}

	/// Rotates the slots `steps` positions to the left, cyclically.
	fn rotate_left(&self, ct: &Self::Ciphertext, steps: usize) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.rotate_left_inplace(&mut out, steps)?;
		Ok(out)
	}

	fn rotate_left_inplace(&self, ct: &mut Self::Ciphertext, steps: usize) -> Result<()> {
		trace!("rotate_left by {steps}");
		self.rotate_left_internal(ct, steps)
	}

	/// Rotates the slots `steps` positions to the right, cyclically.
	fn rotate_right(&self, ct: &Self::Ciphertext, steps: usize) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.rotate_right_inplace(&mut out, steps)?;
		Ok(out)
	}

	fn rotate_right_inplace(&self, ct: &mut Self::Ciphertext, steps: usize) -> Result<()> {
		trace!("rotate_right by {steps}");
		self.rotate_right_internal(ct, steps)
	}

	/// Negates every slot.
	fn negate(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.negate_inplace(&mut out)?;
		Ok(out)
	}

	fn negate_inplace(&self, ct: &mut Self::Ciphertext) -> Result<()> {
		trace!("negate");
		self.negate_internal(ct)
	}

	/// Adds `a` and `b`.
	fn add(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext> {
		let mut out = a.clone();
		self.add_inplace(&mut out, b)?;
		Ok(out)
	}

	/// Adds `b` into `a`.
	fn add_inplace(&self, a: &mut Self::Ciphertext, b: &Self::Ciphertext) -> Result<()> {
		let derived = additive_result(a.meta(), b.meta())?;
		trace!("add: {:?} + {:?}", a.encoding(), b.encoding());
		self.add_internal(a, b)?;
		a.meta_mut().apply_encoding(&derived);
		Ok(())
	}

	/// Subtracts `b` from `a`.
	fn sub(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext> {
		let mut out = a.clone();
		self.sub_inplace(&mut out, b)?;
		Ok(out)
	}

	fn sub_inplace(&self, a: &mut Self::Ciphertext, b: &Self::Ciphertext) -> Result<()> {
		let derived = additive_result(a.meta(), b.meta())?;
		trace!("sub: {:?} - {:?}", a.encoding(), b.encoding());
		self.sub_internal(a, b)?;
		a.meta_mut().apply_encoding(&derived);
		Ok(())
	}

	/// Adds a public scalar to every slot.
	fn add_scalar(&self, ct: &Self::Ciphertext, scalar: f64) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.add_scalar_inplace(&mut out, scalar)?;
		Ok(out)
	}

	fn add_scalar_inplace(&self, ct: &mut Self::Ciphertext, scalar: f64) -> Result<()> {
		trace!("add_scalar {scalar}");
		self.add_scalar_internal(ct, scalar)
	}

	/// Subtracts a public scalar from every slot.
	fn sub_scalar(&self, ct: &Self::Ciphertext, scalar: f64) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.sub_scalar_inplace(&mut out, scalar)?;
		Ok(out)
	}

	fn sub_scalar_inplace(&self, ct: &mut Self::Ciphertext, scalar: f64) -> Result<()> {
		trace!("sub_scalar {scalar}");
		self.sub_scalar_internal(ct, scalar)
	}

	/// Adds a public plaintext array, which must cover the encoded tile
	/// exactly.
	fn add_plain(&self, ct: &Self::Ciphertext, plain: &[f64]) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.add_plain_inplace(&mut out, plain)?;
		Ok(out)
	}

	fn add_plain_inplace(&self, ct: &mut Self::Ciphertext, plain: &[f64]) -> Result<()> {
		check_plain_len(ct.meta(), plain)?;
		trace!("add_plain of {} values", plain.len());
		self.add_plain_internal(ct, plain)
	}

	/// Subtracts a public plaintext array covering the encoded tile.
	fn sub_plain(&self, ct: &Self::Ciphertext, plain: &[f64]) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.sub_plain_inplace(&mut out, plain)?;
		Ok(out)
	}

	fn sub_plain_inplace(&self, ct: &mut Self::Ciphertext, plain: &[f64]) -> Result<()> {
		check_plain_len(ct.meta(), plain)?;
		trace!("sub_plain of {} values", plain.len());
		self.sub_plain_internal(ct, plain)
	}

	/// Multiplies `a` and `b` element-wise. Operands arriving against the
	/// canonical vector-matrix order are swapped automatically.
	fn multiply(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext> {
		let mut out = a.clone();
		self.multiply_inplace(&mut out, b)?;
		Ok(out)
	}

	fn multiply_inplace(&self, a: &mut Self::Ciphertext, b: &Self::Ciphertext) -> Result<()> {
		let (swap, derived) = multiplicative_result(a.meta(), b.meta())?;
		trace!("multiply: {:?} * {:?} (swap: {swap})", a.encoding(), b.encoding());
		if swap {
			let mut lhs = b.clone();
			self.multiply_internal(&mut lhs, a)?;
			lhs.meta_mut().apply_encoding(&derived);
			*a = lhs;
		} else {
			self.multiply_internal(a, b)?;
			a.meta_mut().apply_encoding(&derived);
		}
		Ok(())
	}

	/// Multiplies every slot by a public scalar. The result carries a
	/// squared scale like any other multiplication.
	fn multiply_scalar(&self, ct: &Self::Ciphertext, scalar: f64) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.multiply_scalar_inplace(&mut out, scalar)?;
		Ok(out)
	}

	fn multiply_scalar_inplace(&self, ct: &mut Self::Ciphertext, scalar: f64) -> Result<()> {
		trace!("multiply_scalar {scalar}");
		self.multiply_scalar_internal(ct, scalar)
	}

	/// Multiplies element-wise by a public plaintext array covering the
	/// encoded tile.
	fn multiply_plain(&self, ct: &Self::Ciphertext, plain: &[f64]) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.multiply_plain_inplace(&mut out, plain)?;
		Ok(out)
	}

	fn multiply_plain_inplace(&self, ct: &mut Self::Ciphertext, plain: &[f64]) -> Result<()> {
		check_plain_len(ct.meta(), plain)?;
		trace!("multiply_plain of {} values", plain.len());
		self.multiply_plain_internal(ct, plain)
	}

	/// Squares every slot.
	fn square(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.square_inplace(&mut out)?;
		Ok(out)
	}

	fn square_inplace(&self, ct: &mut Self::Ciphertext) -> Result<()> {
		trace!("square");
		self.square_internal(ct)
	}

	/// Lowers `ct` to the level and scale of `target`.
	fn mod_down_to(
		&self,
		ct: &Self::Ciphertext,
		target: &Self::Ciphertext,
	) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.mod_down_to_inplace(&mut out, target)?;
		Ok(out)
	}

	fn mod_down_to_inplace(
		&self,
		ct: &mut Self::Ciphertext,
		target: &Self::Ciphertext,
	) -> Result<()> {
		check_mod_down(ct.meta(), target.meta())?;
		trace!("mod_down_to level {}", target.level());
		self.mod_down_to_internal(ct, target)
	}

	/// Lowers whichever of the two operands is higher so both end up at the
	/// minimum of their levels.
	fn mod_down_to_min(
		&self,
		a: &Self::Ciphertext,
		b: &Self::Ciphertext,
	) -> Result<(Self::Ciphertext, Self::Ciphertext)> {
		let mut a = a.clone();
		let mut b = b.clone();
		self.mod_down_to_min_inplace(&mut a, &mut b)?;
		Ok((a, b))
	}

	fn mod_down_to_min_inplace(
		&self,
		a: &mut Self::Ciphertext,
		b: &mut Self::Ciphertext,
	) -> Result<()> {
		if a.level() == b.level() && !util::are_close_f64(a.scale(), b.scale()) {
			return Err(Error::ScaleInconsistency {
				expected: a.scale(),
				actual: b.scale(),
				context: "operands at one level with different scales".into(),
			});
		}
		let min = a.level().min(b.level());
		trace!("mod_down_to_min to level {min}");
		if a.level() > min {
			self.mod_down_to_level_internal(a, min)?;
		} else if b.level() > min {
			self.mod_down_to_level_internal(b, min)?;
		}
		Ok(())
	}

	/// Lowers `ct` to an explicit level.
	fn mod_down_to_level(&self, ct: &Self::Ciphertext, level: u32) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.mod_down_to_level_inplace(&mut out, level)?;
		Ok(out)
	}

	fn mod_down_to_level_inplace(&self, ct: &mut Self::Ciphertext, level: u32) -> Result<()> {
		if ct.level() < level {
			return Err(Error::invalid_argument(format!(
				"ciphertext is below the target level: {} < {level}",
				ct.level()
			)));
		}
		trace!("mod_down_to_level {level}");
		self.mod_down_to_level_internal(ct, level)
	}

	/// Drops one modulus layer, dividing the scale by its prime.
	fn rescale_to_next(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.rescale_to_next_inplace(&mut out)?;
		Ok(out)
	}

	fn rescale_to_next_inplace(&self, ct: &mut Self::Ciphertext) -> Result<()> {
		if ct.level() == 0 {
			return Err(Error::invalid_argument(
				"cannot rescale a ciphertext already at level 0",
			));
		}
		trace!("rescale_to_next from level {}", ct.level());
		self.rescale_to_next_internal(ct)
	}

	/// Restores a quadratic ciphertext to linear form.
	fn relinearize(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext> {
		let mut out = ct.clone();
		self.relinearize_inplace(&mut out)?;
		Ok(out)
	}

	fn relinearize_inplace(&self, ct: &mut Self::Ciphertext) -> Result<()> {
		trace!("relinearize");
		self.relinearize_internal(ct)
	}
}

fn check_encoded_dims(a: &CiphertextMeta, b: &CiphertextMeta) -> Result<()> {
	if a.encoded_height != b.encoded_height || a.encoded_width != b.encoded_width {
		return Err(Error::shape_mismatch(format!(
			"encoded tiles differ: {}x{} vs {}x{}",
			a.encoded_height, a.encoded_width, b.encoded_height, b.encoded_width
		)));
	}
	Ok(())
}

fn check_plain_len(meta: &CiphertextMeta, plain: &[f64]) -> Result<()> {
	if plain.len() != meta.encoded_len() {
		return Err(Error::invalid_argument(format!(
			"plaintext array of {} values does not cover the {}x{} encoded tile",
			plain.len(),
			meta.encoded_height,
			meta.encoded_width
		)));
	}
	Ok(())
}

fn check_mod_down(meta: &CiphertextMeta, target: &CiphertextMeta) -> Result<()> {
	if meta.level < target.level {
		return Err(Error::invalid_argument(format!(
			"ciphertext is below the target level: {} < {}",
			meta.level, target.level
		)));
	}
	if meta.level == target.level && !util::are_close_f64(meta.scale, target.scale) {
		return Err(Error::ScaleInconsistency {
			expected: target.scale,
			actual: meta.scale,
			context: "operands at one level with different scales".into(),
		});
	}
	Ok(())
}

fn derived(
	template: &CiphertextMeta,
	encoding: Encoding,
	shape_from: &CiphertextMeta,
) -> CiphertextMeta {
	let mut out = template.clone();
	out.encoding = encoding;
	out.logical_height = shape_from.logical_height;
	out.logical_width = shape_from.logical_width;
	out.encoded_height = shape_from.encoded_height;
	out.encoded_width = shape_from.encoded_width;
	out
}

/// Encoding and shape of the result of `add`/`sub`.
pub(crate) fn additive_result(a: &CiphertextMeta, b: &CiphertextMeta) -> Result<CiphertextMeta> {
	check_encoded_dims(a, b)?;
	use Encoding::*;
	match (a.encoding, b.encoding) {
		(x, y) if x == y => {
			if a.logical_height != b.logical_height || a.logical_width != b.logical_width {
				return Err(Error::shape_mismatch(format!(
					"cannot add a {}x{} object to a {}x{} object",
					a.logical_height, a.logical_width, b.logical_height, b.logical_width
				)));
			}
			Ok(a.clone())
		}
		// the mixed operand's shape wins
		(RowMatrix, Matrix) => Ok(derived(a, RowMatrix, a)),
		(Matrix, RowMatrix) => Ok(derived(a, RowMatrix, b)),
		(Matrix, ColMatrix) => Ok(derived(a, ColMatrix, b)),
		(ColMatrix, Matrix) => Ok(derived(a, ColMatrix, a)),
		(x, y) => Err(Error::shape_mismatch(format!(
			"cannot add {x:?} and {y:?} encodings"
		))),
	}
}

/// Operand order and result encoding of `multiply`. The boolean is true when
/// the canonical-order rule swaps the operands.
pub(crate) fn multiplicative_result(
	a: &CiphertextMeta,
	b: &CiphertextMeta,
) -> Result<(bool, CiphertextMeta)> {
	check_encoded_dims(a, b)?;
	use Encoding::*;
	match (a.encoding, b.encoding) {
		(RowVector, Matrix | RowMatrix) => Ok((false, derived(a, RowMatrix, b))),
		(Matrix | RowMatrix, RowVector) => Ok((true, derived(a, RowMatrix, a))),
		(Matrix | ColMatrix, ColVector) => Ok((false, derived(a, ColMatrix, a))),
		(ColVector, Matrix | ColMatrix) => Ok((true, derived(a, ColMatrix, b))),
		(x, y) if x == y && matches!(x, Uninitialized | RowVector | ColVector) => {
			Ok((false, a.clone()))
		}
		(x, y) => Err(Error::shape_mismatch(format!(
			"cannot multiply {x:?} and {y:?} encodings"
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn meta(encoding: Encoding, lh: usize, lw: usize, eh: usize, ew: usize) -> CiphertextMeta {
		CiphertextMeta {
			logical_height: lh,
			logical_width: lw,
			encoded_height: eh,
			encoded_width: ew,
			encoding,
			level: 2,
			scale: 2f64.powi(40),
		}
	}

	#[test]
	fn add_requires_matching_logical_shape() {
		let a = meta(Encoding::Matrix, 10, 20, 64, 64);
		let b = meta(Encoding::Matrix, 10, 21, 64, 64);
		assert!(matches!(additive_result(&a, &b), Err(Error::ShapeMismatch(_))));
		let b = meta(Encoding::Matrix, 10, 20, 64, 64);
		assert_eq!(additive_result(&a, &b).unwrap().encoding, Encoding::Matrix);
	}

	#[test]
	fn mixed_add_takes_the_mixed_shape() {
		let rm = meta(Encoding::RowMatrix, 8, 20, 64, 64);
		let m = meta(Encoding::Matrix, 10, 20, 64, 64);
		let out = additive_result(&m, &rm).unwrap();
		assert_eq!(out.encoding, Encoding::RowMatrix);
		assert_eq!((out.logical_height, out.logical_width), (8, 20));
	}

	#[test]
	fn multiply_swaps_into_canonical_order() {
		let rv = meta(Encoding::RowVector, 1, 10, 64, 64);
		let m = meta(Encoding::Matrix, 10, 20, 64, 64);
		let (swap, out) = multiplicative_result(&rv, &m).unwrap();
		assert!(!swap);
		assert_eq!(out.encoding, Encoding::RowMatrix);
		assert_eq!((out.logical_height, out.logical_width), (10, 20));

		let (swap, out) = multiplicative_result(&m, &rv).unwrap();
		assert!(swap);
		assert_eq!(out.encoding, Encoding::RowMatrix);

		let cv = meta(Encoding::ColVector, 20, 1, 64, 64);
		let (swap, out) = multiplicative_result(&m, &cv).unwrap();
		assert!(!swap);
		assert_eq!(out.encoding, Encoding::ColMatrix);
		let (swap, _) = multiplicative_result(&cv, &m).unwrap();
		assert!(swap);
	}

	#[test]
	fn matrix_times_matrix_is_rejected_at_the_contract() {
		let m = meta(Encoding::Matrix, 10, 20, 64, 64);
		assert!(multiplicative_result(&m, &m).is_err());
		let rv = meta(Encoding::RowVector, 1, 10, 64, 64);
		let cv = meta(Encoding::ColVector, 20, 1, 64, 64);
		assert!(multiplicative_result(&rv, &cv).is_err());
	}

	#[test]
	fn mismatched_tiles_are_rejected_first() {
		let a = meta(Encoding::Matrix, 10, 20, 64, 64);
		let b = meta(Encoding::Matrix, 10, 20, 128, 32);
		assert!(additive_result(&a, &b).is_err());
		assert!(multiplicative_result(&a, &b).is_err());
	}
}
