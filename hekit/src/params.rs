//! CKKS instance parameters and the coefficient modulus chain.
//!
//! Parameters fix the slot count, the number of levels, and the scale
//! exponent. From those, a modulus chain is derived: a 60-bit base prime,
//! one prime per level within a few ulps of `2^log_scale`, and a 60-bit
//! special prime reserved for key switching. All primes are NTT-friendly
//! (congruent to 1 modulo twice the polynomial degree) so any conforming
//! backend can use them directly.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::error::{Error, Result};

/// Largest number of bits a plaintext value may occupy before decoding
/// becomes unreliable.
pub const PLAINTEXT_LOG_MAX: u32 = 59;

/// Divergence tolerance used by the debug evaluator when comparing a
/// decrypted result against its plaintext shadow.
pub const MAX_NORM: f64 = 0.02;

/// Smallest supported scale exponent.
pub const MIN_LOG_SCALE: u32 = 22;

/// Bit size of the base and special primes.
const STABLE_PRIME_BITS: u32 = 60;

const_assert!(PLAINTEXT_LOG_MAX < 64);
const_assert!(MIN_LOG_SCALE < PLAINTEXT_LOG_MAX);

/// Upper bound on the total coefficient modulus size for a given polynomial
/// degree, per the homomorphic encryption security standard tables at 128-bit
/// security. Degrees beyond the table double the bound per doubling.
pub fn max_modulus_bits(poly_degree: usize) -> u32 {
	match poly_degree {
		1024 => 27,
		2048 => 54,
		4096 => 109,
		8192 => 218,
		16384 => 438,
		32768 => 881,
		d if d > 32768 && d.is_power_of_two() => {
			let mut bits = 881;
			let mut degree = 32768;
			while degree < d {
				bits *= 2;
				degree *= 2;
			}
			bits
		}
		_ => 0,
	}
}

/// Instance parameters shared by every evaluator derived from one
/// computation. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CkksParams {
	poly_degree: usize,
	slot_count: usize,
	max_level: u32,
	log_scale: u32,
	/// `moduli[0]` is the base prime; `moduli[l]` for `l >= 1` is the prime
	/// dropped when rescaling away from level `l`.
	moduli: Vec<u64>,
	special_modulus: u64,
}

impl CkksParams {
	/// Builds parameters for `num_slots` plaintext slots, `max_level`
	/// rescale levels, and a scale of `2^log_scale`.
	pub fn new(num_slots: usize, max_level: u32, log_scale: u32) -> Result<Self> {
		if !num_slots.is_power_of_two() || num_slots < 2 {
			return Err(Error::invalid_argument(format!(
				"number of slots must be a power of two >= 2, got {num_slots}"
			)));
		}
		if log_scale < MIN_LOG_SCALE {
			return Err(Error::invalid_argument(format!(
				"log_scale must be at least {MIN_LOG_SCALE}, got {log_scale}"
			)));
		}
		if log_scale > PLAINTEXT_LOG_MAX {
			return Err(Error::invalid_argument(format!(
				"log_scale must not exceed {PLAINTEXT_LOG_MAX}, got {log_scale}"
			)));
		}
		let poly_degree = num_slots * 2;
		let budget = max_modulus_bits(poly_degree);
		if budget == 0 {
			return Err(Error::invalid_argument(format!(
				"unsupported polynomial degree {poly_degree}"
			)));
		}
		let total = 2 * STABLE_PRIME_BITS + max_level * log_scale;
		if total > budget {
			return Err(Error::invalid_argument(format!(
				"modulus chain of {total} bits exceeds the {budget}-bit budget \
				 for degree {poly_degree}; reduce the depth or the scale"
			)));
		}

		let group = 2 * poly_degree as u64;
		let stable = generate_primes(group, STABLE_PRIME_BITS, 2)?;
		let mut moduli = vec![stable[0]];
		moduli.extend(generate_primes(group, log_scale, max_level as usize)?);
		Ok(Self {
			poly_degree,
			slot_count: num_slots,
			max_level,
			log_scale,
			moduli,
			special_modulus: stable[1],
		})
	}

	pub fn poly_degree(&self) -> usize {
		self.poly_degree
	}

	pub fn slot_count(&self) -> usize {
		self.slot_count
	}

	pub fn max_level(&self) -> u32 {
		self.max_level
	}

	pub fn log_scale(&self) -> u32 {
		self.log_scale
	}

	/// Scale used for fresh encryptions at the top level.
	pub fn base_scale(&self) -> f64 {
		2f64.powi(self.log_scale as i32)
	}

	/// Prime dropped when rescaling away from `level`. Level 0 cannot be
	/// rescaled; its entry is the base prime.
	pub fn modulus_at(&self, level: u32) -> u64 {
		self.moduli[level as usize]
	}

	/// Bit length of the prime at `level`.
	pub fn modulus_bits_at(&self, level: u32) -> u32 {
		64 - self.moduli[level as usize].leading_zeros()
	}

	pub fn special_modulus(&self) -> u64 {
		self.special_modulus
	}

	/// Sum of `log2` over the ciphertext modulus chain of a fresh top-level
	/// ciphertext (the special prime is not part of it).
	pub fn total_log2_moduli(&self) -> f64 {
		self.moduli.iter().map(|&p| (p as f64).log2()).sum()
	}

	/// The scale a well-formed linear ciphertext carries at `level`.
	///
	/// Fresh encryptions at the top level use `2^log_scale`; each rescale
	/// squares-then-divides, so the grid drifts slightly away from the power
	/// of two as primes are only approximately `2^log_scale`.
	pub fn nominal_scale_at(&self, level: u32) -> f64 {
		let mut scale = self.base_scale();
		let mut l = self.max_level;
		while l > level {
			scale = scale * scale / self.moduli[l as usize] as f64;
			l -= 1;
		}
		scale
	}
}

/// Deterministic Miller-Rabin primality test for `u64`.
fn is_prime(n: u64) -> bool {
	if n < 2 {
		return false;
	}
	for p in [2u64, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
		if n == p {
			return true;
		}
		if n % p == 0 {
			return false;
		}
	}
	let mut d = n - 1;
	let mut r = 0u32;
	while d % 2 == 0 {
		d /= 2;
		r += 1;
	}
	'witness: for a in [2u64, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
		let mut x = pow_mod(a, d, n);
		if x == 1 || x == n - 1 {
			continue;
		}
		for _ in 0..r - 1 {
			x = mul_mod(x, x, n);
			if x == n - 1 {
				continue 'witness;
			}
		}
		return false;
	}
	true
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
	((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
	let mut acc = 1u64;
	base %= m;
	while exp > 0 {
		if exp & 1 == 1 {
			acc = mul_mod(acc, base, m);
		}
		base = mul_mod(base, base, m);
		exp >>= 1;
	}
	acc
}

/// Largest `count` distinct primes below `2^bits` congruent to 1 mod `group`.
fn generate_primes(group: u64, bits: u32, count: usize) -> Result<Vec<u64>> {
	let ceiling = 1u64 << bits;
	let mut candidate = (ceiling - 1) / group * group + 1;
	if candidate >= ceiling {
		candidate -= group;
	}
	let mut primes = Vec::with_capacity(count);
	while primes.len() < count {
		if candidate <= group {
			return Err(Error::invalid_argument(format!(
				"cannot find {count} NTT-friendly primes of {bits} bits for group {group}"
			)));
		}
		if is_prime(candidate) {
			primes.push(candidate);
		}
		candidate -= group;
	}
	Ok(primes)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn primes_are_ntt_friendly_and_near_target() {
		let params = CkksParams::new(4096, 2, 40).unwrap();
		let group = 2 * params.poly_degree() as u64;
		for level in 0..=params.max_level() {
			let p = params.modulus_at(level);
			assert!(is_prime(p));
			assert_eq!(p % group, 1);
		}
		assert_eq!(params.modulus_bits_at(0), 60);
		assert_eq!(params.modulus_bits_at(1), 40);
		assert_eq!(params.modulus_bits_at(2), 40);
		assert!(is_prime(params.special_modulus()));
		assert_ne!(params.modulus_at(0), params.special_modulus());
	}

	#[test]
	fn nominal_scale_follows_the_rescale_recurrence() {
		let params = CkksParams::new(4096, 2, 40).unwrap();
		let top = params.nominal_scale_at(2);
		assert_eq!(top, 2f64.powi(40));
		let expected = top * top / params.modulus_at(2) as f64;
		assert_eq!(params.nominal_scale_at(1), expected);
		let expected = expected * expected / params.modulus_at(1) as f64;
		assert_eq!(params.nominal_scale_at(0), expected);
		// primes sit close to 2^40, so the grid stays near the base scale
		assert!((params.nominal_scale_at(0).log2() - 40.0).abs() < 0.01);
	}

	#[test]
	fn rejects_overfull_chains() {
		// 4096-slot instances have a 218-bit budget: 60 + 3*40 + 60 fits,
		// 60 + 40*40 + 60 does not.
		assert!(CkksParams::new(4096, 3, 40).is_ok());
		assert!(CkksParams::new(4096, 40, 40).is_err());
		assert!(CkksParams::new(4096, 1, 10).is_err());
		assert!(CkksParams::new(1000, 1, 40).is_err());
	}

	#[test]
	fn serde_round_trip() {
		let params = CkksParams::new(4096, 1, 22).unwrap();
		let json = serde_json::to_string(&params).unwrap();
		let back: CkksParams = serde_json::from_str(&json).unwrap();
		assert_eq!(params, back);
	}

	#[test]
	fn standard_bits_table() {
		assert_eq!(max_modulus_bits(8192), 218);
		assert_eq!(max_modulus_bits(65536), 1762);
		assert_eq!(max_modulus_bits(1234), 0);
	}
}
