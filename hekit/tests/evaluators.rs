//! End-to-end parameter-selection workflow over the depth-2 logistic cubic
//! f(x) = -0.0002 x^3 + 0.0843 x + 0.5 on 4096 slots with inputs in
//! [-16, 16].

use std::sync::Arc;

use hekit::ext::poly::evaluate_odd_cubic;
use hekit::{
	CiphertextHandle, CkksParams, DebugEval, DepthFinder, Evaluator, HomomorphicEval, OpCount,
	PlaintextEval, ScaleEstimator, SoftBackend, MIN_LOG_SCALE,
};

const C3: f64 = -0.0002;
const C1: f64 = 0.0843;
const C0: f64 = 0.5;

fn params() -> Arc<CkksParams> {
	Arc::new(CkksParams::new(4096, 2, 40).unwrap())
}

fn input() -> Vec<f64> {
	(0..4096)
		.map(|i| -16.0 + 32.0 * i as f64 / 4095.0)
		.collect()
}

fn reference(values: &[f64]) -> Vec<f64> {
	values.iter().map(|v| C3 * v * v * v + C1 * v + C0).collect()
}

fn relative_l2(actual: &[f64], expected: &[f64]) -> f64 {
	let diff: f64 = actual
		.iter()
		.zip(expected.iter())
		.map(|(a, e)| (a - e) * (a - e))
		.sum();
	let norm: f64 = expected.iter().map(|e| e * e).sum();
	(diff / norm).sqrt()
}

#[test]
fn depth_finder_reports_depth_two() {
	let eval = DepthFinder::new(params());
	let x = eval.encrypt(&input()).unwrap();
	let out = evaluate_odd_cubic(&eval, &x, C3, C1, C0).unwrap();
	assert_eq!(out.level(), 0);
	assert_eq!(eval.get_multiplicative_depth(), 2);
}

#[test]
fn op_count_sees_every_backend_operation() {
	let eval = OpCount::new(params());
	let x = eval.encrypt(&input()).unwrap();
	let _ = evaluate_odd_cubic(&eval, &x, C3, C1, C0).unwrap();
	assert_eq!(eval.encryptions(), 1);
	// square, two scalar products, one ciphertext product
	assert_eq!(eval.multiplications(), 4);
	assert_eq!(eval.rescales(), 4);
	assert_eq!(eval.mod_downs(), 1);
	assert_eq!(eval.relinearizations(), 2);
	assert_eq!(eval.depth_finder().get_multiplicative_depth(), 2);
}

#[test]
fn plaintext_eval_matches_the_direct_function() {
	let eval = PlaintextEval::new(params());
	let values = input();
	let x = eval.encrypt(&values).unwrap();
	let out = evaluate_odd_cubic(&eval, &x, C3, C1, C0).unwrap();
	let dec = eval.decrypt(&out).unwrap();
	for (d, e) in dec.iter().zip(reference(&values).iter()) {
		assert!((d - e).abs() < 1e-12);
	}
	// the largest intermediate is x^2 = 256
	assert_eq!(eval.get_exact_max_log_plain_val(), 8.0);
}

#[test]
fn scale_estimator_clears_the_minimum_scale() {
	let eval = ScaleEstimator::new(params());
	let x = eval.encrypt(&input()).unwrap();
	let _ = evaluate_odd_cubic(&eval, &x, C3, C1, C0).unwrap();
	let est = eval.get_estimated_max_log_scale();
	assert!(est >= MIN_LOG_SCALE as f64, "estimate {est} below the minimum");
	// the 40-bit scale these tests run at is inside the estimate
	assert!(est >= 40.0, "estimate {est} does not cover the working scale");
}

#[test]
fn homomorphic_run_matches_cleartext_within_tolerance() {
	let params = params();
	let eval = HomomorphicEval::new(params.clone(), SoftBackend::new(params)).unwrap();
	let values = input();
	let x = eval.encrypt(&values).unwrap();
	let out = evaluate_odd_cubic(&eval, &x, C3, C1, C0).unwrap();
	assert_eq!(out.level(), 0);
	let dec = eval.decrypt(&out).unwrap();
	let err = relative_l2(&dec, &reference(&values));
	assert!(err < 1e-4, "relative L2 error {err}");
}

#[test]
fn debug_run_never_diverges_on_a_correct_circuit() {
	let params = params();
	let eval = DebugEval::new(params.clone(), SoftBackend::new(params), false).unwrap();
	let values = input();
	let x = eval.encrypt(&values).unwrap();
	let out = evaluate_odd_cubic(&eval, &x, C3, C1, C0).unwrap();
	let dec = eval.decrypt(&out).unwrap();
	let err = relative_l2(&dec, &reference(&values));
	assert!(err < 1e-4, "relative L2 error {err}");
	assert_eq!(eval.get_exact_max_log_plain_val(), 8.0);
}

#[test]
fn evaluators_agree_on_the_workflow() {
	// depth first, scale second, execution third: the workflow the
	// evaluators exist to support
	let depth_params = params();
	let depth = DepthFinder::new(depth_params);
	let x = depth.encrypt(&input()).unwrap();
	let _ = evaluate_odd_cubic(&depth, &x, C3, C1, C0).unwrap();
	let levels = depth.get_multiplicative_depth();

	let run_params = Arc::new(CkksParams::new(4096, levels, 40).unwrap());
	let estimator = ScaleEstimator::new(run_params.clone());
	let x = estimator.encrypt(&input()).unwrap();
	let _ = evaluate_odd_cubic(&estimator, &x, C3, C1, C0).unwrap();
	assert!(40.0 <= estimator.get_estimated_max_log_scale());

	let real = HomomorphicEval::new(run_params.clone(), SoftBackend::new(run_params)).unwrap();
	let x = real.encrypt(&input()).unwrap();
	let out = evaluate_odd_cubic(&real, &x, C3, C1, C0).unwrap();
	assert_eq!(out.level(), 0);
}
