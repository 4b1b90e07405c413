use mppovm::{ MPArray, MPPovm, PovmResult, SampleOpts, StateMode };
use ndarray as nd;
use num_complex::Complex64 as C64;
use rand::{ rngs::StdRng, Rng, SeedableRng };
use rayon::iter::{ IntoParallelIterator, ParallelIterator };
use tracing_subscriber::EnvFilter;

const N: usize = 5; // number of qubits
const EPS: f64 = 1e-10;

// normalized state with random complex amplitudes
fn random_state<R>(rng: &mut R, n: usize) -> MPArray
where R: Rng + ?Sized
{
    let arr = nd::ArrayD::from_shape_fn(vec![2; n], |_| {
        C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5)
    });
    let norm: f64 = arr.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();
    MPArray::from_array(&arr.mapv(|x| x / norm), 1).expect("dense state factorizes")
}

struct Trial {
    prob_err: f64,
    fun_err: f64,
    fun_std: f64,
}

fn run_trial(seed: u64, samples_per_basis: usize) -> PovmResult<Trial> {
    let mut rng = StdRng::seed_from_u64(seed);
    let psi = random_state(&mut rng, N);
    // all nine two-site Pauli product bases on every pair of neighbors
    let bases = MPPovm::pauli_mpps(2, 2)?.block(N)?;
    let target = MPPovm::pauli_mpp(2, 2)?.block(N)?;
    let opts = SampleOpts::default();
    let samples: Vec<nd::Array2<u8>>
        = bases.sample(&mut rng, &psi, samples_per_basis, &opts)
        .collect::<PovmResult<_>>()?;

    let exact: Vec<nd::ArrayD<C64>>
        = target.probab(&psi, StateMode::Mps)
        .map(|p| p.map(|p| p.prune(true).to_array()))
        .collect::<PovmResult<_>>()?;
    let mut prob_err: f64 = 0.0;
    for (est, p) in target.estprob_from(&bases, &samples, EPS).zip(exact.iter()) {
        let (p_est, _) = est?;
        prob_err = p_est.iter().zip(p.iter())
            .map(|(e, q)| (e - q.re).abs())
            .fold(prob_err, f64::max);
    }

    // ⟨Z_k Z_{k+1}⟩ summed over neighbors: outcomes (z+, z+) and (z-, z-) count
    // +1, (z+, z-) and (z-, z+) count -1, weighted by the 1/3 per-site share of
    // the Z basis in the Pauli POVM
    let zz = nd::ArrayD::from_shape_fn(vec![6, 6], |ix| {
        match (ix[0], ix[1]) {
            (4, 4) | (5, 5) => 9.0,
            (4, 5) | (5, 4) => -9.0,
            _ => 0.0,
        }
    });
    let coeff: Vec<nd::ArrayD<f64>> = vec![zz.clone(); target.len()];
    let (fun_est, fun_var) = target.estfun_from(&bases, &coeff, &samples, EPS)?;
    let fun_exact: f64
        = exact.iter()
        .map(|p| p.iter().zip(zz.iter()).map(|(q, c)| q.re * c).sum::<f64>())
        .sum();
    Ok(Trial {
        prob_err,
        fun_err: (fun_est - fun_exact).abs(),
        fun_std: fun_var.sqrt(),
    })
}

fn main() {
    const REPS: usize = 16;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    for samples_per_basis in [250, 1000, 4000] {
        let trials: Vec<Trial>
            = (0..REPS).into_par_iter()
            .map(|seed| run_trial(seed as u64, samples_per_basis))
            .collect::<PovmResult<_>>()
            .expect("estimation failed");
        let mean = |f: fn(&Trial) -> f64| {
            trials.iter().map(f).sum::<f64>() / trials.len() as f64
        };
        println!(
            "{:>5} samples/basis: max prob error {:.5}, ZZ error {:.5} (est. std {:.5})",
            samples_per_basis,
            mean(|t| t.prob_err),
            mean(|t| t.fun_err),
            mean(|t| t.fun_std),
        );
    }
}
