use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::DMatrix;

use hekit::ext::poly::evaluate_odd_cubic;
use hekit::{CkksParams, Evaluator, HomomorphicEval, LinearAlgebra, SoftBackend};

fn bench_cubic(c: &mut Criterion) {
	let params = Arc::new(CkksParams::new(4096, 2, 40).unwrap());
	let eval = HomomorphicEval::new(params.clone(), SoftBackend::new(params)).unwrap();
	let input: Vec<f64> = (0..4096).map(|i| i as f64 / 256.0 - 8.0).collect();
	let x = eval.encrypt(&input).unwrap();
	c.bench_function("odd_cubic_4096_slots", |bench| {
		bench.iter(|| evaluate_odd_cubic(&eval, black_box(&x), -0.0002, 0.0843, 0.5).unwrap())
	});
}

fn bench_matrix_product(c: &mut Criterion) {
	let params = Arc::new(CkksParams::new(4096, 2, 40).unwrap());
	let eval = HomomorphicEval::new(params.clone(), SoftBackend::new(params)).unwrap();
	let la = LinearAlgebra::new(&eval);
	let unit = la.make_unit(64).unwrap();
	let a = DMatrix::from_fn(64, 64, |r, _| r as f64 / 64.0);
	let b = DMatrix::from_fn(64, 64, |_, c| c as f64 / 64.0);
	let enc_a = la.encrypt_matrix_at_level(&a, unit, 1).unwrap();
	let enc_bt = la.encrypt_matrix(&b.transpose(), unit).unwrap();
	c.bench_function("matrix_product_64", |bench| {
		bench.iter(|| la.multiply(black_box(&enc_a), black_box(&enc_bt), 1.0).unwrap())
	});
}

criterion_group!(benches, bench_cubic, bench_matrix_product);
criterion_main!(benches);
