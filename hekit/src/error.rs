use thiserror::Error;

/// Result convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by evaluators, the linear algebra layer, and backends.
///
/// Every variant is fatal at this layer: the design philosophy is to fail
/// loudly at the offending operation rather than attempt repair, since CKKS
/// bookkeeping bugs are otherwise silent and only visible as garbled output
/// after decryption.
#[derive(Debug, Error)]
pub enum Error {
	/// An argument failed basic validation before any ciphertext work.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Operand encodings, shapes, or encoding units are incompatible.
	#[error("shape mismatch: {0}")]
	ShapeMismatch(String),

	/// Operands are at different levels where equality is required.
	#[error("levels do not match: {left} vs {right}")]
	LevelMismatch {
		left: u32,
		right: u32,
	},

	/// A ciphertext scale diverged from the value implied by its level, or
	/// an operation that requires nominal scale received a squared scale.
	#[error("scale computation is incorrect: expected {expected}, got {actual} ({context})")]
	ScaleInconsistency {
		expected: f64,
		actual: f64,
		context: String,
	},

	/// The tracked plaintext magnitude would exceed the representable range
	/// at the current scale. Raised eagerly by the scale estimator.
	#[error("overflow imminent: log2 of plaintext magnitude {log_plain:.2} exceeds {limit} bits")]
	Overflow {
		log_plain: f64,
		limit: u32,
	},

	/// The decrypted result disagrees with the shadow plaintext beyond the
	/// divergence tolerance. Carries truncated views of both for diagnosis.
	#[error(
		"result diverged from plaintext shadow: normalized L2 distance {distance:.3e} > {tolerance}; \
		 decrypted {decrypted_head:?}…, expected {expected_head:?}…"
	)]
	Divergence {
		distance: f64,
		tolerance: f64,
		decrypted_head: Vec<f64>,
		expected_head: Vec<f64>,
	},

	/// Opaque failure propagated from the HE backend.
	#[error("backend error: {0}")]
	Backend(String),
}

impl Error {
	pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
		Error::InvalidArgument(msg.into())
	}

	pub(crate) fn shape_mismatch(msg: impl Into<String>) -> Self {
		Error::ShapeMismatch(msg.into())
	}

	pub(crate) fn backend(msg: impl Into<String>) -> Self {
		Error::Backend(msg.into())
	}
}
