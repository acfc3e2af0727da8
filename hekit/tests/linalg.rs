//! Encoding round trips, reductions, and matrix products over the linear
//! algebra layer, checked against nalgebra references.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hekit::{CkksParams, DebugEval, Error, LinearAlgebra, PlaintextEval, SoftBackend, MAX_NORM};

fn params() -> Arc<CkksParams> {
	Arc::new(CkksParams::new(4096, 2, 40).unwrap())
}

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> DMatrix<f64> {
	DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(-1.0..1.0))
}

fn random_vector(rng: &mut StdRng, len: usize) -> DVector<f64> {
	DVector::from_fn(len, |_, _| rng.gen_range(-1.0..1.0))
}

fn assert_matrix_close(actual: &DMatrix<f64>, expected: &DMatrix<f64>, tolerance: f64) {
	assert_eq!(actual.shape(), expected.shape());
	let err = (actual - expected).norm() / expected.norm();
	assert!(err < tolerance, "relative error {err}");
}

fn assert_vector_close(actual: &DVector<f64>, expected: &DVector<f64>, tolerance: f64) {
	assert_eq!(actual.len(), expected.len());
	let err = (actual - expected).norm() / expected.norm();
	assert!(err < tolerance, "relative error {err}");
}

#[test]
fn matrix_round_trip_is_exact() {
	let eval = PlaintextEval::new(params());
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64).unwrap();
	let mut rng = StdRng::seed_from_u64(17);
	let mat = random_matrix(&mut rng, 100, 75);
	let enc = la.encrypt_matrix(&mat, unit).unwrap();
	assert_eq!(enc.unit_rows(), 2);
	assert_eq!(enc.unit_cols(), 2);
	assert_eq!(la.decrypt_matrix(&enc).unwrap(), mat);
}

#[test]
fn vector_round_trips_are_exact() {
	let eval = PlaintextEval::new(params());
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64).unwrap();
	let mut rng = StdRng::seed_from_u64(18);
	let row = random_vector(&mut rng, 130);
	let enc = la.encrypt_row_vector(&row, unit).unwrap();
	assert_eq!(enc.cells().len(), 3);
	assert_eq!(la.decrypt_row_vector(&enc).unwrap(), row);
	let col = random_vector(&mut rng, 70);
	let enc = la.encrypt_col_vector(&col, unit).unwrap();
	assert_eq!(enc.cells().len(), 2);
	assert_eq!(la.decrypt_col_vector(&enc).unwrap(), col);
}

#[test]
fn mismatched_units_fail_before_any_ciphertext_work() {
	let eval = PlaintextEval::new(params());
	let la = LinearAlgebra::new(&eval);
	let mut rng = StdRng::seed_from_u64(19);
	let mat = random_matrix(&mut rng, 32, 32);
	let a = la.encrypt_matrix(&mat, la.make_unit(64).unwrap()).unwrap();
	let b = la.encrypt_matrix(&mat, la.make_unit(128).unwrap()).unwrap();
	assert!(matches!(la.add(&a, &b), Err(Error::ShapeMismatch(_))));
}

#[test]
fn cell_wise_addition_matches_the_reference() {
	let eval = PlaintextEval::new(params());
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64).unwrap();
	let mut rng = StdRng::seed_from_u64(20);
	let a = random_matrix(&mut rng, 90, 40);
	let b = random_matrix(&mut rng, 90, 40);
	let sum = la
		.add(
			&la.encrypt_matrix(&a, unit).unwrap(),
			&la.encrypt_matrix(&b, unit).unwrap(),
		)
		.unwrap();
	assert_matrix_close(&la.decrypt_matrix(&sum).unwrap(), &(a + b), 1e-12);
}

#[test]
fn reductions_match_the_reference() {
	let eval = PlaintextEval::new(params());
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64).unwrap();
	let mut rng = StdRng::seed_from_u64(21);
	// one padded shape and one that fills its units exactly
	for (rows, cols) in [(100, 70), (128, 64)] {
		let mat = random_matrix(&mut rng, rows, cols);
		let enc = la.encrypt_matrix(&mat, unit).unwrap();

		let col_sums = la.sum_rows(&enc).unwrap();
		let expected = DVector::from_fn(cols, |j, _| mat.column(j).sum());
		assert_vector_close(&la.decrypt_col_vector(&col_sums).unwrap(), &expected, 1e-10);

		let row_sums = la.sum_cols(&enc, 2.5).unwrap();
		let expected = DVector::from_fn(rows, |i, _| 2.5 * mat.row(i).sum());
		assert_vector_close(&la.decrypt_row_vector(&row_sums).unwrap(), &expected, 1e-10);
	}
}

#[test]
fn concatenated_reductions_match_the_separate_ones() {
	let eval = PlaintextEval::new(params());
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64).unwrap();
	let mut rng = StdRng::seed_from_u64(22);

	// horizontal concatenation for sum_cols
	let a = random_matrix(&mut rng, 80, 30);
	let b = random_matrix(&mut rng, 80, 50);
	let enc_a = la.encrypt_matrix(&a, unit).unwrap();
	let enc_b = la.encrypt_matrix(&b, unit).unwrap();
	let many = la.sum_cols_many(&[&enc_a, &enc_b], 1.0).unwrap();
	let expected = DVector::from_fn(80, |i, _| a.row(i).sum() + b.row(i).sum());
	assert_vector_close(&la.decrypt_row_vector(&many).unwrap(), &expected, 1e-10);

	// vertical concatenation for sum_rows
	let c = random_matrix(&mut rng, 20, 60);
	let d = random_matrix(&mut rng, 90, 60);
	let enc_c = la.encrypt_matrix(&c, unit).unwrap();
	let enc_d = la.encrypt_matrix(&d, unit).unwrap();
	let many = la.sum_rows_many(&[&enc_c, &enc_d]).unwrap();
	let expected = DVector::from_fn(60, |j, _| c.column(j).sum() + d.column(j).sum());
	assert_vector_close(&la.decrypt_col_vector(&many).unwrap(), &expected, 1e-10);
}

#[test]
fn vector_matrix_products_match_the_reference() {
	let eval = PlaintextEval::new(params());
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64).unwrap();
	let mut rng = StdRng::seed_from_u64(23);

	let mat = random_matrix(&mut rng, 90, 110);
	let enc_mat = la.encrypt_matrix(&mat, unit).unwrap();

	// row vector times matrix comes out encoded as a column vector
	let v = random_vector(&mut rng, 90);
	let enc_v = la.encrypt_row_vector(&v, unit).unwrap();
	let prod = la.multiply_row_matrix(&enc_v, &enc_mat).unwrap();
	let expected = mat.transpose() * &v;
	assert_vector_close(&la.decrypt_col_vector(&prod).unwrap(), &expected, 1e-10);

	// matrix times column vector comes out encoded as a row vector
	let w = random_vector(&mut rng, 110);
	let enc_w = la.encrypt_col_vector(&w, unit).unwrap();
	let prod = la.multiply_matrix_col(&enc_mat, &enc_w, 0.5).unwrap();
	let expected = 0.5 * (&mat * &w);
	assert_vector_close(&la.decrypt_row_vector(&prod).unwrap(), &expected, 1e-10);
}

#[test]
fn matrix_product_matches_within_the_divergence_bound() {
	let params = params();
	let eval = DebugEval::new(params.clone(), SoftBackend::new(params), false).unwrap();
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64).unwrap();
	let mut rng = StdRng::seed_from_u64(24);

	let a = random_matrix(&mut rng, 70, 80);
	let b = random_matrix(&mut rng, 80, 90);
	// the transposed operand arrives one level above the other
	let enc_a = la.encrypt_matrix_at_level(&a, unit, 1).unwrap();
	let enc_bt = la.encrypt_matrix(&b.transpose(), unit).unwrap();
	let product = la.multiply(&enc_a, &enc_bt, 0.5).unwrap();
	let decrypted = la.decrypt_matrix(&product).unwrap();
	let expected = 0.5 * (&a * &b);
	let err = (&decrypted - &expected).norm() / expected.norm();
	assert!(err < MAX_NORM, "relative error {err} exceeds the bound");
	assert!(err < 1e-4, "relative error {err} unexpectedly large");
}

#[test]
fn matrix_product_requires_the_level_gap() {
	let eval = PlaintextEval::new(params());
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64).unwrap();
	let mut rng = StdRng::seed_from_u64(25);
	let a = random_matrix(&mut rng, 16, 16);
	let enc_a = la.encrypt_matrix(&a, unit).unwrap();
	let enc_b = la.encrypt_matrix(&a, unit).unwrap();
	assert!(la.multiply(&enc_a, &enc_b, 1.0).is_err());
}

#[test]
fn transpose_unit_is_metadata_only() {
	let eval = PlaintextEval::new(params());
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(16).unwrap();
	let mut rng = StdRng::seed_from_u64(26);

	let short = random_vector(&mut rng, 12);
	let enc = la.encrypt_row_vector(&short, unit).unwrap();
	let swapped = enc.transpose_unit().unwrap();
	assert_eq!(swapped.encoding_unit(), unit.transpose());
	assert_eq!(swapped.width(), 12);

	let long = random_vector(&mut rng, 500);
	let enc = la.encrypt_row_vector(&long, unit).unwrap();
	assert!(enc.transpose_unit().is_err());
}
