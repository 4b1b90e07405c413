use itertools::Itertools;
use mppovm::{ MPArray, MPPovm, SampleMethod, SampleOpts, StateMode };
use ndarray as nd;
use num_complex::Complex64 as C64;
use rand::{ rngs::StdRng, SeedableRng };
use rayon::iter::{ IntoParallelIterator, ParallelIterator };
use tracing_subscriber::EnvFilter;

const N: usize = 8; // number of qubits

// (∣0...0⟩ + ∣1...1⟩) / √2
fn ghz(n: usize) -> MPArray {
    let site = |l: usize, r: usize, scale: f64| {
        nd::ArrayD::from_shape_fn(vec![l, 2, r], |ix| {
            let (a, s, b) = (ix[0], ix[1], ix[2]);
            let a_ok = l == 1 || a == s;
            let b_ok = r == 1 || b == s;
            if a_ok && b_ok { C64::from(scale) } else { C64::from(0.0) }
        })
    };
    let ltens: Vec<nd::ArrayD<C64>>
        = (0..n)
        .map(|k| {
            let l = if k == 0 { 1 } else { 2 };
            let r = if k == n - 1 { 1 } else { 2 };
            let scale = if k == 0 { std::f64::consts::FRAC_1_SQRT_2 } else { 1.0 };
            site(l, r, scale)
        })
        .collect();
    MPArray::from_tensors(ltens).expect("GHZ tensors have matching bonds")
}

// largest deviation between the empirical and exact joint distribution of the
// first two sites
fn max_deviation(samples: &nd::Array2<u8>, exact: &nd::ArrayD<C64>) -> f64 {
    let n = samples.nrows() as f64;
    let mut freq: nd::Array2<f64> = nd::Array2::zeros((6, 6));
    for row in samples.rows() {
        freq[[row[0] as usize, row[1] as usize]] += 1.0 / n;
    }
    (0..6).cartesian_product(0..6)
        .map(|(a, b)| (freq[[a, b]] - exact[[a, b]].re).abs())
        .fold(0.0, f64::max)
}

fn main() {
    const REPS: usize = 24;
    const SAMPLES: usize = 5000;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let psi = ghz(N);
    let mpp = MPPovm::pauli_mpp(N, 2).expect("qubit Pauli POVM");
    let marginal = MPPovm::pauli_mpp(2, 2).expect("qubit Pauli POVM")
        .embed(N, 0, 2).expect("two sites fit in the chain")
        .probab(&psi, StateMode::Mps).expect("GHZ state is a valid MPS")
        .prune(true)
        .to_array();

    for (method, n_group) in [(SampleMethod::Cond, 1), (SampleMethod::Cond, 2)] {
        let opts = SampleOpts { method, n_group, ..SampleOpts::default() };
        let dev: f64
            = (0..REPS).into_par_iter()
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed as u64);
                let samples = mpp.sample(&mut rng, &psi, SAMPLES, &opts)
                    .expect("sampling failed");
                max_deviation(&samples, &marginal)
            })
            .sum::<f64>() / REPS as f64;
        println!("{:?} (group {}): mean max deviation {:.5}", method, n_group, dev);
    }

    let opts = SampleOpts { method: SampleMethod::Direct, ..SampleOpts::default() };
    let small = MPPovm::pauli_mpp(3, 2).expect("qubit Pauli POVM");
    let psi3 = ghz(3);
    let exact3 = MPPovm::pauli_mpp(2, 2).expect("qubit Pauli POVM")
        .embed(3, 0, 2).expect("two sites fit in the chain")
        .probab(&psi3, StateMode::Mps).expect("GHZ state is a valid MPS")
        .prune(true)
        .to_array();
    let dev: f64
        = (0..REPS).into_par_iter()
        .map(|seed| {
            let mut rng = StdRng::seed_from_u64(seed as u64);
            let samples = small.sample(&mut rng, &psi3, SAMPLES, &opts)
                .expect("sampling failed");
            max_deviation(&samples, &exact3)
        })
        .sum::<f64>() / REPS as f64;
    println!("Direct (3 sites): mean max deviation {:.5}", dev);
}
