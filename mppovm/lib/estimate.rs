//! Linear estimators built from sample functions.
//!
//! An estimator for a quantity `Σ_i c_i f_i` is a coefficient vector `c`
//! together with functions `f_i` evaluated on every sample. The estimate is
//! the (weighted) sample mean and its variance follows from the sample
//! covariance of the function values.

use ndarray::{ self as nd, Axis };
use tracing::debug;
use crate::{
    error::{ check_tol, PovmError, PovmResult },
    mparray::unravel_index,
    mppovm::MPPovm,
    mpplist::MPPovmList,
};

/// A real function of each row of a sample matrix.
///
/// `eval` receives samples of shape `(n, m)` and returns `n` values.
pub trait SampleFunction {
    fn eval(&self, samples: nd::ArrayView2<u8>) -> nd::Array1<f64>;
}

impl<F> SampleFunction for F
where F: Fn(nd::ArrayView2<u8>) -> nd::Array1<f64>
{
    fn eval(&self, samples: nd::ArrayView2<u8>) -> nd::Array1<f64> {
        self(samples)
    }
}

/// 1 for samples with the given values in the given columns, 0 otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutcomeIndicator {
    pub columns: Vec<usize>,
    pub values: Vec<u8>,
}

impl SampleFunction for OutcomeIndicator {
    fn eval(&self, samples: nd::ArrayView2<u8>) -> nd::Array1<f64> {
        samples.rows().into_iter()
            .map(|row| {
                let hit = self.columns.iter().zip(self.values.iter())
                    .all(|(&c, &v)| row[c] == v);
                if hit { 1.0 } else { 0.0 }
            })
            .collect()
    }
}

/// Coefficients and indicator functions of a linear estimator on the samples
/// of a single MP-POVM.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Estimator {
    pub coeff: Vec<f64>,
    pub funs: Vec<OutcomeIndicator>,
}

impl Estimator {
    /// Number of terms.
    pub fn len(&self) -> usize { self.coeff.len() }

    /// Return `true` if there are no terms.
    pub fn is_empty(&self) -> bool { self.coeff.is_empty() }

    /// Append every term of `other`.
    pub fn extend(&mut self, other: Estimator) {
        self.coeff.extend(other.coeff);
        self.funs.extend(other.funs);
    }

    /// The indicator functions as trait objects, for [`MPPovm::est_fun`].
    pub fn fun_refs(&self) -> Vec<&dyn SampleFunction> {
        self.funs.iter().map(|f| f as &dyn SampleFunction).collect()
    }
}

impl MPPovm {
    /// Sample means and covariance matrix of several functions.
    ///
    /// `samples` must have one column per measured site. With `weights`, each
    /// sample enters with its weight and the effective sample size is the
    /// sum of the weights. The covariance is divided once more by the sample
    /// size (it is the covariance of the means) and includes the `n / (n -
    /// 1)` correction.
    pub fn est_fun_cov(
        &self,
        funs: &[&dyn SampleFunction],
        samples: nd::ArrayView2<u8>,
        weights: Option<nd::ArrayView1<f64>>,
    ) -> PovmResult<(nd::Array1<f64>, nd::Array2<f64>)>
    {
        if samples.ncols() != self.nsoutdims().len() {
            return Err(PovmError::shape(format!(
                "{} sample columns for {} measured sites",
                samples.ncols(), self.nsoutdims().len())));
        }
        let n = samples.nrows();
        let weights: nd::Array1<f64>
            = match weights {
                Some(w) => {
                    if w.len() != n {
                        return Err(PovmError::shape("one weight per sample required"));
                    }
                    if w.iter().any(|&x| x < 0.0) {
                        return Err(PovmError::invalid("negative sample weight"));
                    }
                    w.to_owned()
                },
                None => nd::Array1::ones(n),
            };
        let n_eff: f64 = weights.sum();
        if n_eff <= 1.0 {
            return Err(PovmError::invalid(format!(
                "effective sample size {n_eff} too small for a variance")));
        }

        let mut fun_out: nd::Array2<f64> = nd::Array2::zeros((funs.len(), n));
        for (mut row, f) in fun_out.rows_mut().into_iter().zip(funs) {
            let vals = f.eval(samples);
            if vals.len() != n {
                return Err(PovmError::shape("sample function returned wrong length"));
            }
            row.assign(&vals);
        }
        let w_fun_out = &fun_out * &weights.view().insert_axis(Axis(0));
        let ept: nd::Array1<f64> = w_fun_out.sum_axis(Axis(1)) / n_eff;
        let outer = ept.view().insert_axis(Axis(1)).dot(&ept.view().insert_axis(Axis(0)));
        let mut cov: nd::Array2<f64> = fun_out.dot(&w_fun_out.t()) / n_eff - outer;
        cov *= (n_eff / (n_eff - 1.0)) / n_eff;
        Ok((ept, cov))
    }

    /// Estimate of `Σ_i coeff[i] f_i` and its variance.
    ///
    /// Fails if rounding makes the variance more negative than `-eps`; small
    /// negative values are clamped to zero.
    pub fn est_fun(
        &self,
        coeff: &[f64],
        funs: &[&dyn SampleFunction],
        samples: nd::ArrayView2<u8>,
        weights: Option<nd::ArrayView1<f64>>,
        eps: f64,
    ) -> PovmResult<(f64, f64)>
    {
        if coeff.len() != funs.len() {
            return Err(PovmError::shape(format!(
                "{} coefficients for {} functions", coeff.len(), funs.len())));
        }
        let (ept, cov) = self.est_fun_cov(funs, samples, weights)?;
        let coeff = nd::ArrayView1::from(coeff);
        let est = coeff.dot(&ept);
        let var = coeff.dot(&cov.dot(&coeff));
        check_tol("estimated variance is negative", -var, eps)?;
        Ok((est, var.max(0.0)))
    }

    /// Build estimators for `Σ_x coeff[x] p(x)` (sum over the outcomes of
    /// `self`) from samples of each member of `other`.
    ///
    /// Each outcome of `self` that can be reconstructed from `other` is
    /// spread across the members that determine it, weighted by their sample
    /// counts `n_samples`. Returns one [`Estimator`] per member.
    ///
    /// Fails with [`PovmError::Unconvertible`] if an outcome with a non-zero
    /// coefficient is not determined by any member of `other`.
    pub fn estfun_contributions(
        &self,
        other: &MPPovmList,
        n_samples: &[usize],
        coeff: &nd::ArrayD<f64>,
        eps: f64,
    ) -> PovmResult<Vec<Estimator>>
    {
        let own_shape = self.nsoutdims();
        if coeff.shape() != own_shape.as_slice() {
            return Err(PovmError::shape(format!(
                "coefficients of shape {:?} for outcomes of shape {own_shape:?}",
                coeff.shape())));
        }
        if n_samples.len() != other.len() {
            return Err(PovmError::shape(format!(
                "{} sample counts for {} POVMs", n_samples.len(), other.len())));
        }
        let coeff: Vec<f64> = coeff.iter().copied().collect();
        let support = self.support();
        let mut n_per_outcome: Vec<usize> = vec![0; coeff.len()];
        let mut terms: Vec<(usize, usize, f64, OutcomeIndicator)> = Vec::new();
        for (pos, (mpp, &n_sam)) in other.mpps().iter().zip(n_samples).enumerate() {
            let m = self.find_matching_elements(mpp, Default::default(), eps)?;
            let other_support = mpp.support();
            for (own, other_out, pf) in m.pairs() {
                let mut columns: Vec<usize> = Vec::with_capacity(support.len());
                let mut values: Vec<u8> = Vec::with_capacity(support.len());
                for (s, &o) in support.iter().zip(other_out.iter()) {
                    match other_support.iter().position(|t| t == s) {
                        Some(col) => {
                            columns.push(col);
                            values.push(o as u8);
                        },
                        None => {
                            debug_assert_eq!(o, 0);
                        },
                    }
                }
                n_per_outcome[own] += n_sam;
                let c = coeff[own] * n_sam as f64 * pf;
                terms.push((pos, own, c, OutcomeIndicator { columns, values }));
            }
        }
        let mut est: Vec<Estimator> = vec![Estimator::default(); other.len()];
        for (pos, own, c, fun) in terms.into_iter() {
            est[pos].coeff.push(c / n_per_outcome[own] as f64);
            est[pos].funs.push(fun);
        }
        let undetermined: Vec<usize>
            = n_per_outcome.iter().zip(coeff.iter())
            .enumerate()
            .filter_map(|(k, (&n, &c))| (n == 0 && c != 0.0).then_some(k))
            .collect();
        if let Some(&first) = undetermined.first() {
            let first = unravel_index(first, &own_shape);
            debug!(
                missing = undetermined.len(),
                ?first,
                "weighted outcomes not determined by any sampled POVM"
            );
            return Err(PovmError::Unconvertible);
        }
        Ok(est)
    }
}
