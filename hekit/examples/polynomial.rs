use std::sync::Arc;

use hekit::ext::poly::evaluate_odd_cubic;
use hekit::{
	CiphertextHandle, CkksParams, DebugEval, DepthFinder, Evaluator, HomomorphicEval, OpCount,
	ScaleEstimator, SoftBackend,
};

// logistic-regression activation approximation
const C3: f64 = -0.0002;
const C1: f64 = 0.0843;
const C0: f64 = 0.5;

fn main() -> anyhow::Result<()> {
	env_logger::init();

	println!("Example: evaluating {C3}*x^3 + {C1}*x + {C0} under every evaluator");

	let params = Arc::new(CkksParams::new(4096, 2, 40)?);
	println!(
		"Instance: {} slots, {} levels, scale 2^{}",
		params.slot_count(),
		params.max_level(),
		params.log_scale()
	);

	let slot_count = params.slot_count();
	let input: Vec<f64> = (0..slot_count)
		.map(|i| -16.0 + 32.0 * i as f64 / (slot_count - 1) as f64)
		.collect();

	// 1. multiplicative depth
	let depth = DepthFinder::new(params.clone());
	let x = depth.encrypt(&input)?;
	let out = evaluate_odd_cubic(&depth, &x, C3, C1, C0)?;
	println!(
		"Depth finder: multiplicative depth {} (output at level {})",
		depth.get_multiplicative_depth(),
		out.level()
	);

	// 2. operation counts
	let counter = OpCount::new(params.clone());
	let x = counter.encrypt(&input)?;
	let _ = evaluate_odd_cubic(&counter, &x, C3, C1, C0)?;
	println!("Op count: {}", counter.report());

	// 3. usable scale
	let estimator = ScaleEstimator::new(params.clone());
	let x = estimator.encrypt(&input)?;
	let _ = evaluate_odd_cubic(&estimator, &x, C3, C1, C0)?;
	println!(
		"Scale estimator: max log scale {:.2} bits, max plaintext magnitude 2^{:.2}",
		estimator.get_estimated_max_log_scale(),
		estimator.get_exact_max_log_plain_val()
	);

	// 4. real execution
	let real = HomomorphicEval::new(params.clone(), SoftBackend::new(params.clone()))?;
	let x = real.encrypt(&input)?;
	let out = evaluate_odd_cubic(&real, &x, C3, C1, C0)?;
	let decrypted = real.decrypt(&out)?;
	let max_err = input
		.iter()
		.zip(decrypted.iter())
		.map(|(v, d)| (d - (C3 * v * v * v + C1 * v + C0)).abs())
		.fold(0.0_f64, f64::max);
	println!("Homomorphic run: max absolute error {max_err:.3e}");

	// 5. step-by-step cross check
	let debug = DebugEval::new(params.clone(), SoftBackend::new(params), true)?;
	let x = debug.encrypt(&input)?;
	let out = evaluate_odd_cubic(&debug, &x, C3, C1, C0)?;
	println!(
		"Debug run: no divergence, output scale {:.2} bits at level {}",
		out.scale().log2(),
		out.level()
	);

	Ok(())
}
