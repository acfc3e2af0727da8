//! Parameter analysis and execution toolkit for leveled CKKS circuits.
//!
//! Write a circuit once against the [Evaluator] contract, then run it under
//! interchangeable evaluators that each extract different information:
//!
//! - [DepthFinder] reports the multiplicative depth, which fixes the length
//!   of the modulus chain;
//! - [OpCount] tallies invocations per operation category;
//! - [PlaintextEval] shadows the computation on cleartext slots and records
//!   the largest magnitude ever produced;
//! - [ScaleEstimator] derives the largest usable scale for the circuit;
//! - [HomomorphicEval] executes for real against an HE [Backend];
//! - [DebugEval] runs both paths at once and diffs them after every single
//!   operation.
//!
//! On top of the contract sits [linalg::LinearAlgebra]: matrices and vectors
//! are packed onto power-of-two encoding units, and matrix arithmetic is
//! assembled from element-wise operations, masking, and log-depth rotation
//! folds. The linear algebra layer never depends on a concrete evaluator,
//! so the same code path that runs encrypted is the one that was
//! depth-checked and scale-estimated.
//!
//! Correctness in CKKS is a bookkeeping discipline: levels and scales must
//! agree at every operation, and a single slip shows up either as a hard
//! failure or as silently garbled output. The toolkit's philosophy is to
//! fail loudly at the offending operation (see [error::Error]) rather than
//! repair anything.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hekit::{CkksParams, DepthFinder, Evaluator, HomomorphicEval, ScaleEstimator, SoftBackend};
//!
//! fn circuit<E: Evaluator>(eval: &E, x: &E::Ciphertext) -> hekit::Result<E::Ciphertext> {
//! 	let sq = eval.square(x)?;
//! 	let sq = eval.relinearize(&sq)?;
//! 	eval.rescale_to_next(&sq)
//! }
//!
//! fn main() -> hekit::Result<()> {
//! 	let params = Arc::new(CkksParams::new(4096, 1, 40)?);
//! 	let depth = DepthFinder::new(params.clone());
//! 	circuit(&depth, &depth.encrypt(&[1.0, 2.0])?)?;
//! 	assert_eq!(depth.get_multiplicative_depth(), 1);
//!
//! 	let scale = ScaleEstimator::new(params.clone());
//! 	circuit(&scale, &scale.encrypt(&[1.0, 2.0])?)?;
//! 	assert!(scale.get_estimated_max_log_scale() >= 40.0);
//!
//! 	let real = HomomorphicEval::new(params.clone(), SoftBackend::new(params))?;
//! 	let out = circuit(&real, &real.encrypt(&[1.0, 2.0])?)?;
//! 	let values = real.decrypt(&out)?;
//! 	assert!((values[1] - 4.0).abs() < 1e-6);
//! 	Ok(())
//! }
//! ```

mod ciphertext;
mod evaluator;
mod params;
mod util;

pub mod backend;
pub mod error;
pub mod evaluators;
pub mod ext;
pub mod linalg;

pub use backend::{Backend, SoftBackend};
pub use ciphertext::{
	CiphertextHandle, CiphertextMeta, DebugCiphertext, Encoding, MetaCiphertext, NativeCiphertext,
	ShadowCiphertext,
};
pub use error::{Error, Result};
pub use evaluator::Evaluator;
pub use evaluators::{
	DebugEval, DepthFinder, HomomorphicEval, OpCount, PlaintextEval, ScaleEstimator,
};
pub use linalg::{
	EncodingUnit, EncryptedColVector, EncryptedMatrix, EncryptedObject, EncryptedRowVector,
	LinearAlgebra,
};
pub use params::{max_modulus_bits, CkksParams, MAX_NORM, MIN_LOG_SCALE, PLAINTEXT_LOG_MAX};
