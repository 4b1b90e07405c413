//! Drawing measurement outcomes from an MP-POVM.
//!
//! Two methods are available:
//!
//! - [`SampleMethod::Direct`] contracts the full joint distribution over the
//!   measured sites and draws from it. This is exponential in the number of
//!   measured sites and is only meant for small systems.
//! - [`SampleMethod::Cond`] draws outcomes a few sites at a time from
//!   conditional distributions, using the matrix-product form of the
//!   marginals.
//!
//! Samples are returned as a `u8` matrix with one row per sample and one
//! column per measured site; unmeasured sites do not appear.

use std::str::FromStr;
use ndarray as nd;
use num_complex::Complex64 as C64;
use rand::{ distributions::{ Distribution, WeightedIndex }, Rng };
use tracing::debug;
use crate::{
    error::{ check_tol, PovmError, PovmResult },
    mparray::{ MPArray, unravel_index },
    mppovm::MPPovm,
    mpsmpo::StateMode,
};

/// Sampling strategy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SampleMethod {
    /// Sequential draws from conditional marginals.
    Cond,
    /// Single draw from the dense joint distribution.
    Direct,
}

impl FromStr for SampleMethod {
    type Err = PovmError;

    fn from_str(s: &str) -> PovmResult<Self> {
        match s.to_lowercase().as_str() {
            "cond" => Ok(Self::Cond),
            "direct" => Ok(Self::Direct),
            _ => Err(PovmError::UnknownMethod(s.to_string())),
        }
    }
}

/// Options for [`MPPovm::sample`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SampleOpts {
    /// Sampling strategy.
    pub method: SampleMethod,
    /// Number of measured sites drawn jointly per step of conditional
    /// sampling.
    pub n_group: usize,
    /// How to read the state.
    pub mode: StateMode,
    /// Tolerance on imaginary parts, negative probabilities, and
    /// normalization.
    pub eps: f64,
}

impl Default for SampleOpts {
    fn default() -> Self {
        Self {
            method: SampleMethod::Cond,
            n_group: 1,
            mode: StateMode::Auto,
            eps: crate::DEFAULT_EPS,
        }
    }
}

// check that `values` form a probability distribution up to `eps` and return
// their real parts with small negatives clipped to zero
fn clean_distribution<I>(values: I, norm: f64, eps: f64) -> PovmResult<Vec<f64>>
where I: IntoIterator<Item = C64>
{
    let values: Vec<C64> = values.into_iter().map(|p| p / norm).collect();
    let max_imag = values.iter().map(|p| p.im.abs()).fold(0.0, f64::max);
    check_tol("probabilities must be real", max_imag, eps)?;
    let min_real = values.iter().map(|p| p.re).fold(f64::INFINITY, f64::min);
    check_tol("probabilities must be non-negative", -min_real, eps)?;
    let probs: Vec<f64> = values.iter().map(|p| p.re.max(0.0)).collect();
    let total: f64 = probs.iter().sum();
    check_tol("probabilities must sum to 1", (total - 1.0).abs(), eps)?;
    Ok(probs)
}

fn draw<R>(rng: &mut R, probs: &[f64]) -> PovmResult<usize>
where R: Rng + ?Sized
{
    // WeightedIndex normalizes its weights, so clipped distributions are
    // renormalized here
    let dist = WeightedIndex::new(probs)
        .map_err(|e| PovmError::invalid(format!("cannot sample: {e}")))?;
    Ok(dist.sample(rng))
}

impl MPPovm {
    /// Draw `n_samples` outcomes of measuring `state`.
    ///
    /// The result has shape `(n_samples, self.nsoutdims().len())`. Every
    /// measured site must have at most 255 outcomes.
    pub fn sample<R>(
        &self,
        rng: &mut R,
        state: &MPArray,
        n_samples: usize,
        opts: &SampleOpts,
    ) -> PovmResult<nd::Array2<u8>>
    where R: Rng + ?Sized
    {
        let nsoutdims = self.nsoutdims();
        if let Some(&d) = nsoutdims.iter().find(|&&d| d > 255) {
            return Err(PovmError::invalid(format!(
                "outcome dimension {d} does not fit in u8")));
        }
        if opts.n_group == 0 {
            return Err(PovmError::invalid("n_group must be positive"));
        }
        let probab = self.probab(state, opts.mode)?.prune(true);
        let total = probab.total();
        check_tol("total probability must be real", total.im.abs(), opts.eps)?;
        check_tol("total probability must be 1", (total.re - 1.0).abs(), opts.eps)?;
        debug!(
            n_samples,
            method = ?opts.method,
            n_group = opts.n_group,
            measured = nsoutdims.len(),
            "sampling MP-POVM"
        );

        let mut out: nd::Array2<u8>
            = nd::Array2::from_elem((n_samples, nsoutdims.len()), u8::MAX);
        if nsoutdims.is_empty() { return Ok(out); }
        match opts.method {
            SampleMethod::Direct
                => sample_direct(rng, &probab, &nsoutdims, &mut out, opts.eps)?,
            SampleMethod::Cond
                => sample_cond(rng, &probab, opts.n_group, &mut out, opts.eps)?,
        }
        for row in out.rows() {
            for (&x, &d) in row.iter().zip(nsoutdims.iter()) {
                if usize::from(x) >= d {
                    return Err(PovmError::invalid("sample entry left unfilled"));
                }
            }
        }
        Ok(out)
    }
}

fn sample_direct<R>(
    rng: &mut R,
    probab: &MPArray,
    nsoutdims: &[usize],
    out: &mut nd::Array2<u8>,
    eps: f64,
) -> PovmResult<()>
where R: Rng + ?Sized
{
    let probs = clean_distribution(probab.to_array().iter().copied(), 1.0, eps)?;
    let dist = WeightedIndex::new(&probs)
        .map_err(|e| PovmError::invalid(format!("cannot sample: {e}")))?;
    for mut row in out.rows_mut() {
        let idx = unravel_index(dist.sample(rng), nsoutdims);
        row.iter_mut().zip(idx).for_each(|(x, i)| { *x = i as u8; });
    }
    Ok(())
}

fn sample_cond<R>(
    rng: &mut R,
    probab: &MPArray,
    n_group: usize,
    out: &mut nd::Array2<u8>,
    eps: f64,
) -> PovmResult<()>
where R: Rng + ?Sized
{
    let n = probab.len();
    // marginals[k]: joint distribution of the first k measured sites
    let mut marginals: Vec<MPArray> = Vec::with_capacity(n + 1);
    marginals.push(probab.clone());
    for k in (0..n).rev() {
        let next = marginals[marginals.len() - 1].sum_site(k)?;
        marginals.push(next);
    }
    marginals.reverse();
    let p0 = marginals[0].total();
    check_tol("marginal over no sites must be 1", (p0 - 1.0).norm(), eps)?;

    let mut outcome: Vec<usize> = vec![0; n];
    for mut row in out.rows_mut() {
        let mut out_p: f64 = 1.0;
        let mut n_out: usize = 0;
        while n_out < n {
            let n_next = (n_out + n_group).min(n);
            let joint = marginals[n_next].fix_leading(&outcome[..n_out])?.to_array();
            let shape: Vec<usize> = joint.shape().to_vec();
            let probs = clean_distribution(joint.iter().copied(), out_p, eps)?;
            let choice = draw(rng, &probs)?;
            let idx = unravel_index(choice, &shape);
            outcome[n_out..n_next].copy_from_slice(&idx);
            out_p *= probs[choice];
            if !(out_p.is_finite() && out_p > 0.0) {
                return Err(PovmError::Tolerance {
                    what: "partial outcome probability must be positive",
                    dev: out_p,
                    eps,
                });
            }
            n_out = n_next;
        }
        let p = marginals[n].fix_leading(&outcome)?.total();
        check_tol(
            "conditional probabilities must multiply to the joint",
            (p.re - out_p).abs(),
            eps,
        )?;
        row.iter_mut().zip(outcome.iter()).for_each(|(x, &i)| { *x = i as u8; });
    }
    Ok(())
}
