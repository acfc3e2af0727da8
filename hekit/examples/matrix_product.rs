use std::sync::Arc;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hekit::{CkksParams, DebugEval, LinearAlgebra, SoftBackend};

fn main() -> anyhow::Result<()> {
	env_logger::init();

	let params = Arc::new(CkksParams::new(4096, 2, 40)?);
	let eval = DebugEval::new(params.clone(), SoftBackend::new(params), false)?;
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64)?;

	let mut rng = StdRng::seed_from_u64(42);
	let a = DMatrix::from_fn(70, 80, |_, _| rng.gen_range(-1.0..1.0));
	let b = DMatrix::from_fn(80, 90, |_, _| rng.gen_range(-1.0..1.0));

	println!("Computing a 70x80 by 80x90 matrix product under encryption");

	// the transposed operand is encrypted one level above the other: its
	// row extraction masks consume that level
	let enc_a = la.encrypt_matrix_at_level(&a, unit, 1)?;
	let enc_bt = la.encrypt_matrix(&b.transpose(), unit)?;

	let product = la.multiply(&enc_a, &enc_bt, 1.0)?;
	let decrypted = la.decrypt_matrix(&product)?;

	let expected = &a * &b;
	let err = (&decrypted - &expected).norm() / expected.norm();
	println!("Relative L2 error vs the cleartext product: {err:.3e}");

	Ok(())
}
