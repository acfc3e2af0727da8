//! The HE backend capability consumed by the homomorphic evaluators.
//!
//! Everything above this seam depends only on the [Backend] trait: given a
//! level and a scale it encrypts, decrypts, and performs the primitive CKKS
//! operations. Key generation, encoding, and noise management live entirely
//! behind it. The crate ships [soft::SoftBackend], a deterministic simulator
//! suitable for parameter analysis and tests; a lattice-backed
//! implementation can be substituted without touching the evaluators.

use crate::error::Result;

mod soft;

pub use soft::{SoftBackend, SoftCiphertext};

/// Primitive CKKS operations at explicit level and scale.
///
/// All operations are value oriented: inputs are borrowed, outputs are fresh
/// ciphertexts. Implementations must be safe to share across worker threads.
pub trait Backend: Send + Sync {
	/// Opaque ciphertext resource owned by the caller.
	type Ciphertext: Clone + Send + Sync;

	/// Number of plaintext slots per ciphertext.
	fn slot_count(&self) -> usize;

	/// Highest level a fresh ciphertext can be encrypted at.
	fn max_level(&self) -> u32;

	/// Bit size of the modulus prime at `level`.
	fn modulus_bits_at(&self, level: u32) -> u32;

	/// Encrypts `values` (padded with zeros up to the slot count) at the
	/// given level and scale.
	fn encrypt(&self, values: &[f64], level: u32, scale: f64) -> Result<Self::Ciphertext>;

	fn decrypt(&self, ct: &Self::Ciphertext) -> Result<Vec<f64>>;

	/// Level recorded inside the backend ciphertext.
	fn level_of(&self, ct: &Self::Ciphertext) -> u32;

	/// Scale recorded inside the backend ciphertext.
	fn scale_of(&self, ct: &Self::Ciphertext) -> f64;

	fn add(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	fn add_plain(&self, a: &Self::Ciphertext, values: &[f64]) -> Result<Self::Ciphertext>;

	fn sub(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	fn sub_plain(&self, a: &Self::Ciphertext, values: &[f64]) -> Result<Self::Ciphertext>;

	fn negate(&self, a: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	fn multiply(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	fn multiply_plain(&self, a: &Self::Ciphertext, values: &[f64]) -> Result<Self::Ciphertext>;

	fn square(&self, a: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	fn rotate_left(&self, a: &Self::Ciphertext, steps: usize) -> Result<Self::Ciphertext>;

	fn rotate_right(&self, a: &Self::Ciphertext, steps: usize) -> Result<Self::Ciphertext>;

	/// Drops one modulus layer and divides the scale by its prime.
	fn rescale_to_next(&self, a: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	/// Reduces a quadratic ciphertext back to linear form.
	fn relinearize(&self, a: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	/// Switches down to `level` without touching the scale.
	fn mod_switch_to(&self, a: &Self::Ciphertext, level: u32) -> Result<Self::Ciphertext>;
}
