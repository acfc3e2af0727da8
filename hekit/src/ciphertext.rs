//! Ciphertext handles and their shared metadata.
//!
//! Each evaluator variant works with its own handle type so that a handle
//! only carries the state its evaluator actually tracks: metadata alone for
//! the depth finder, a plaintext shadow for the tracking evaluators, a
//! backend ciphertext for real execution, or both for the debug evaluator.
//! All of them expose the same [CiphertextMeta] through [CiphertextHandle],
//! which is what the shared contract layer validates against.

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::params::CkksParams;

/// How the slots of a ciphertext are interpreted by the linear algebra
/// layer.
///
/// `RowMatrix` and `ColMatrix` are intermediate mixed kinds produced when a
/// row or column vector is combined with a full matrix; they are consumed by
/// the row/column reductions and never escape a well-formed computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
	Uninitialized,
	Matrix,
	RowVector,
	ColVector,
	RowMatrix,
	ColMatrix,
}

impl Encoding {
	/// True for the two vector-times-matrix intermediate kinds.
	pub fn is_mixed(self) -> bool {
		matches!(self, Encoding::RowMatrix | Encoding::ColMatrix)
	}
}

/// Shape, encoding, level, and scale of a ciphertext.
///
/// Logical dimensions describe the linear algebra object a ciphertext is
/// part of; encoded dimensions describe the padded tile actually packed into
/// the slots. For initialized encodings the encoded tile always fills the
/// slot vector exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct CiphertextMeta {
	pub logical_height: usize,
	pub logical_width: usize,
	pub encoded_height: usize,
	pub encoded_width: usize,
	pub encoding: Encoding,
	pub level: u32,
	pub scale: f64,
}

impl CiphertextMeta {
	/// Metadata for a freshly encrypted, not yet encoded ciphertext.
	pub fn fresh(slot_count: usize, level: u32, scale: f64) -> Self {
		Self {
			logical_height: 1,
			logical_width: slot_count,
			encoded_height: 1,
			encoded_width: slot_count,
			encoding: Encoding::Uninitialized,
			level,
			scale,
		}
	}

	/// Number of slots covered by the encoded tile.
	pub fn encoded_len(&self) -> usize {
		self.encoded_height * self.encoded_width
	}

	/// Adopts encoding kind and shapes from a derived result description,
	/// leaving level and scale to the evaluator internals.
	pub(crate) fn apply_encoding(&mut self, other: &CiphertextMeta) {
		self.encoding = other.encoding;
		self.logical_height = other.logical_height;
		self.logical_width = other.logical_width;
		self.encoded_height = other.encoded_height;
		self.encoded_width = other.encoded_width;
	}

	// Level/scale propagation shared by the tracking evaluators. Each
	// variant applies these exactly once per operation so that every handle
	// carries truthful metadata regardless of which evaluator produced it.

	/// A product's scale is the product of the operand scales.
	pub(crate) fn propagate_product(&mut self, other_scale: f64) {
		self.scale *= other_scale;
	}

	/// Scalar, plaintext, and squaring products square the scale.
	pub(crate) fn propagate_square(&mut self) {
		self.scale *= self.scale;
	}

	/// A rescale drops one level and divides by the dropped prime.
	pub(crate) fn propagate_rescale(&mut self, params: &CkksParams) {
		let prime = params.modulus_at(self.level) as f64;
		self.level -= 1;
		self.scale /= prime;
	}

	/// One mod-down step: multiply by one (squaring the scale), then
	/// rescale. Applied per dropped level.
	pub(crate) fn propagate_mod_down_step(&mut self, params: &CkksParams) {
		let prime = params.modulus_at(self.level) as f64;
		self.scale = self.scale * self.scale / prime;
		self.level -= 1;
	}

	/// Mod-down to a target handle adopts its level and scale.
	pub(crate) fn propagate_mod_down_to(&mut self, target: &CiphertextMeta) {
		self.level = target.level;
		self.scale = target.scale;
	}
}

/// Access to the metadata every handle carries, regardless of which
/// evaluator produced it.
pub trait CiphertextHandle: Clone {
	fn meta(&self) -> &CiphertextMeta;

	fn meta_mut(&mut self) -> &mut CiphertextMeta;

	/// Remaining levels in the modulus chain.
	fn level(&self) -> u32 {
		self.meta().level
	}

	/// Current scale factor.
	fn scale(&self) -> f64 {
		self.meta().scale
	}

	fn encoding(&self) -> Encoding {
		self.meta().encoding
	}
}

/// Metadata-only handle used by the depth finder and the operation counter.
#[derive(Debug, Clone)]
pub struct MetaCiphertext {
	pub(crate) meta: CiphertextMeta,
}

impl CiphertextHandle for MetaCiphertext {
	fn meta(&self) -> &CiphertextMeta {
		&self.meta
	}

	fn meta_mut(&mut self) -> &mut CiphertextMeta {
		&mut self.meta
	}
}

/// Handle carrying a cleartext shadow of the would-be plaintext, used by the
/// plaintext evaluator and the scale estimator.
#[derive(Debug, Clone)]
pub struct ShadowCiphertext {
	pub(crate) meta: CiphertextMeta,
	pub(crate) shadow: Vec<f64>,
}

impl ShadowCiphertext {
	/// The shadow slot array.
	pub fn plaintext(&self) -> &[f64] {
		&self.shadow
	}
}

impl CiphertextHandle for ShadowCiphertext {
	fn meta(&self) -> &CiphertextMeta {
		&self.meta
	}

	fn meta_mut(&mut self) -> &mut CiphertextMeta {
		&mut self.meta
	}
}

/// Handle owning a real backend ciphertext.
pub struct NativeCiphertext<B: Backend> {
	pub(crate) meta: CiphertextMeta,
	pub(crate) inner: B::Ciphertext,
}

impl<B: Backend> Clone for NativeCiphertext<B> {
	fn clone(&self) -> Self {
		Self {
			meta: self.meta.clone(),
			inner: self.inner.clone(),
		}
	}
}

impl<B: Backend> CiphertextHandle for NativeCiphertext<B> {
	fn meta(&self) -> &CiphertextMeta {
		&self.meta
	}

	fn meta_mut(&mut self) -> &mut CiphertextMeta {
		&mut self.meta
	}
}

/// Handle owning both the backend ciphertext and the plaintext shadow, so
/// the debug evaluator can diff them after every operation.
pub struct DebugCiphertext<B: Backend> {
	pub(crate) meta: CiphertextMeta,
	pub(crate) inner: B::Ciphertext,
	pub(crate) shadow: Vec<f64>,
}

impl<B: Backend> Clone for DebugCiphertext<B> {
	fn clone(&self) -> Self {
		Self {
			meta: self.meta.clone(),
			inner: self.inner.clone(),
			shadow: self.shadow.clone(),
		}
	}
}

impl<B: Backend> DebugCiphertext<B> {
	/// The shadow slot array tracked alongside the encrypted value.
	pub fn plaintext(&self) -> &[f64] {
		&self.shadow
	}
}

impl<B: Backend> CiphertextHandle for DebugCiphertext<B> {
	fn meta(&self) -> &CiphertextMeta {
		&self.meta
	}

	fn meta_mut(&mut self) -> &mut CiphertextMeta {
		&mut self.meta
	}
}
