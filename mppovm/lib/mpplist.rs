//! Ordered collections of MP-POVMs on the same chain.
//!
//! A typical list is a set of product bases (e.g. from
//! [`MPPovm::pauli_mpps`]) that are each measured on separate copies of a
//! state, with the combined samples used to estimate quantities of another
//! POVM.

use ndarray as nd;
use rand::Rng;
use tracing::debug;
use crate::{
    error::{ PovmError, PovmResult },
    estimate::Estimator,
    mparray::MPArray,
    mppovm::MPPovm,
    mpsmpo::StateMode,
    sample::SampleOpts,
};

/// A non-empty list of MP-POVMs of equal length.
#[derive(Clone, Debug, PartialEq)]
pub struct MPPovmList {
    mpps: Vec<MPPovm>,
}

impl MPPovmList {
    /// Create a new list, checking that it is non-empty and that all members
    /// act on the same number of sites.
    pub fn new<I>(mpps: I) -> PovmResult<Self>
    where I: IntoIterator<Item = MPPovm>
    {
        let mpps: Vec<MPPovm> = mpps.into_iter().collect();
        let n = mpps.first()
            .ok_or_else(|| PovmError::invalid("empty MP-POVM list"))?
            .len();
        if mpps.iter().any(|mpp| mpp.len() != n) {
            return Err(PovmError::shape("MP-POVMs in a list must have equal lengths"));
        }
        Ok(Self { mpps })
    }

    /// The members, in order.
    pub fn mpps(&self) -> &[MPPovm] { &self.mpps }

    /// Number of members.
    pub fn len(&self) -> usize { self.mpps.len() }

    /// Always `false`: a list has at least one member.
    pub fn is_empty(&self) -> bool { self.mpps.is_empty() }

    /// Number of sites of every member.
    pub fn nr_sites(&self) -> usize { self.mpps[0].len() }

    /// Embed every member at every position of a chain of `nr_sites` sites.
    ///
    /// The result is ordered by position first, then by member.
    pub fn block(&self, nr_sites: usize) -> PovmResult<Self> {
        let blocked: Vec<MPPovmList>
            = self.mpps.iter()
            .map(|mpp| mpp.block(nr_sites))
            .collect::<PovmResult<_>>()?;
        let n_pos = nr_sites + 1 - self.nr_sites();
        let mpps = (0..n_pos)
            .flat_map(|pos| blocked.iter().map(move |b| b.mpps[pos].clone()));
        Self::new(mpps)
    }

    /// Tile every member over `nr_sites` sites.
    pub fn repeat(&self, nr_sites: usize) -> PovmResult<Self> {
        let mpps = self.mpps.iter()
            .map(|mpp| mpp.repeat(nr_sites))
            .collect::<PovmResult<Vec<_>>>()?;
        Self::new(mpps)
    }

    /// Lazily draw `n_samples` from each member in turn.
    pub fn sample<'a, R>(
        &'a self,
        rng: &'a mut R,
        state: &'a MPArray,
        n_samples: usize,
        opts: &'a SampleOpts,
    ) -> impl Iterator<Item = PovmResult<nd::Array2<u8>>> + 'a
    where R: Rng + ?Sized
    {
        self.mpps.iter()
            .map(move |mpp| mpp.sample(rng, state, n_samples, opts))
    }

    /// Lazily compute the outcome probabilities of each member.
    pub fn probab<'a>(&'a self, state: &'a MPArray, mode: StateMode)
        -> impl Iterator<Item = PovmResult<MPArray>> + 'a
    {
        self.mpps.iter().map(move |mpp| mpp.probab(state, mode))
    }

    /// Lazily estimate the outcome probabilities of each member from samples
    /// of `other`; see [`MPPovm::estprob_from_mpplist`].
    pub fn estprob_from<'a>(
        &'a self,
        other: &'a MPPovmList,
        samples: &'a [nd::Array2<u8>],
        eps: f64,
    ) -> impl Iterator<Item = PovmResult<(nd::ArrayD<f64>, nd::ArrayD<usize>)>> + 'a
    {
        self.mpps.iter()
            .map(move |mpp| mpp.estprob_from_mpplist(other, samples, eps))
    }

    /// Estimators for `Σ_k Σ_x coeff[k][x] p_k(x)`, where `p_k` are the
    /// outcome probabilities of the `k`-th member, from samples of each
    /// member of `other`.
    ///
    /// Contributions of all members are collected per member of `other`.
    pub fn estfun_from_estimator(
        &self,
        other: &MPPovmList,
        coeff: &[nd::ArrayD<f64>],
        n_samples: &[usize],
        eps: f64,
    ) -> PovmResult<Vec<Estimator>>
    {
        if coeff.len() != self.len() {
            return Err(PovmError::shape(format!(
                "{} coefficient arrays for {} POVMs", coeff.len(), self.len())));
        }
        let init: Vec<Estimator> = vec![Estimator::default(); other.len()];
        self.mpps.iter().zip(coeff)
            .try_fold(init, |mut acc, (mpp, c)| {
                let contrib = mpp.estfun_contributions(other, n_samples, c, eps)?;
                acc.iter_mut().zip(contrib).for_each(|(a, e)| a.extend(e));
                Ok(acc)
            })
    }

    /// Estimate `Σ_k Σ_x coeff[k][x] p_k(x)` and its variance from samples of
    /// each member of `other`.
    pub fn estfun_from(
        &self,
        other: &MPPovmList,
        coeff: &[nd::ArrayD<f64>],
        samples: &[nd::Array2<u8>],
        eps: f64,
    ) -> PovmResult<(f64, f64)>
    {
        if samples.len() != other.len() {
            return Err(PovmError::shape(format!(
                "{} sample sets for {} POVMs", samples.len(), other.len())));
        }
        let n_samples: Vec<usize> = samples.iter().map(|s| s.nrows()).collect();
        let estimators = self.estfun_from_estimator(other, coeff, &n_samples, eps)?;
        let mut est: f64 = 0.0;
        let mut var: f64 = 0.0;
        for ((mpp, e), sam) in other.mpps.iter().zip(estimators.iter()).zip(samples) {
            if e.is_empty() { continue; }
            let (x, v) = mpp.est_fun(&e.coeff, &e.fun_refs(), sam.view(), None, eps)?;
            est += x;
            var += v;
        }
        debug!(est, var, "estimated linear function");
        Ok((est, var))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{ rngs::StdRng, SeedableRng };
    use crate::{ localpovm::LocalPovm, mppovm::test::random_mps };

    #[test]
    fn construction() {
        assert!(MPPovmList::new(Vec::new()).is_err());
        let a = MPPovm::pauli_mpp(1, 2).unwrap();
        let b = MPPovm::pauli_mpp(2, 2).unwrap();
        assert!(MPPovmList::new([a.clone(), b]).is_err());
        let list = MPPovmList::new([a.clone(), a]).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.nr_sites(), 1);
    }

    #[test]
    fn block_is_position_major() {
        let parts = MPPovm::pauli_mpps(1, 2).unwrap();
        let blocked = parts.block(2).unwrap();
        assert_eq!(blocked.len(), 6);
        let x = MPPovm::from_local_povm(&LocalPovm::x(2).unwrap(), 1).unwrap();
        let y = MPPovm::from_local_povm(&LocalPovm::y(2).unwrap(), 1).unwrap();
        assert_eq!(blocked.mpps()[0], x.embed(2, 0, 2).unwrap());
        assert_eq!(blocked.mpps()[1], y.embed(2, 0, 2).unwrap());
        assert_eq!(blocked.mpps()[3], x.embed(2, 1, 2).unwrap());
        let repeated = parts.repeat(3).unwrap();
        assert_eq!(repeated.nr_sites(), 3);
        assert_eq!(repeated.mpps()[2], MPPovm::from_local_povm(&LocalPovm::z(2).unwrap(), 3).unwrap());
    }

    #[test]
    fn probabilities_and_samples() {
        let mut rng = StdRng::seed_from_u64(10546);
        let psi = random_mps(&mut rng, 2, 2);
        let parts = MPPovm::pauli_mpps(2, 2).unwrap();
        let probs: Vec<MPArray> = parts.probab(&psi, StateMode::Mps)
            .collect::<PovmResult<_>>().unwrap();
        assert_eq!(probs.len(), 9);
        assert!(probs.iter().all(|p| (p.total().re - 1.0).abs() < 1e-10));
        let opts = SampleOpts::default();
        let samples: Vec<nd::Array2<u8>> = parts.sample(&mut rng, &psi, 50, &opts)
            .collect::<PovmResult<_>>().unwrap();
        assert!(samples.iter().all(|s| s.dim() == (50, 2)));
    }

    #[test]
    fn estimate_from_parts() {
        let mut rng = StdRng::seed_from_u64(10546);
        let psi = random_mps(&mut rng, 3, 2);
        let parts = MPPovm::pauli_mpps(1, 2).unwrap().block(3).unwrap();
        let opts = SampleOpts::default();
        let samples: Vec<nd::Array2<u8>> = parts.sample(&mut rng, &psi, 3000, &opts)
            .collect::<PovmResult<_>>().unwrap();
        let target = MPPovm::pauli_mpp(1, 2).unwrap().block(3).unwrap();

        let estimates: Vec<_> = target.estprob_from(&parts, &samples, 1e-10)
            .collect::<PovmResult<_>>().unwrap();
        let exact: Vec<MPArray> = target.probab(&psi, StateMode::Mps)
            .collect::<PovmResult<_>>().unwrap();
        for ((p_est, n_used), p) in estimates.iter().zip(exact.iter()) {
            assert!(n_used.iter().all(|&n| n == 3000));
            let p = p.prune(true).to_array();
            for (e, q) in p_est.iter().zip(p.iter()) {
                assert!((e - q.re).abs() < 0.03);
            }
        }

        // sum of z+ probabilities over all three sites
        let coeff: Vec<nd::ArrayD<f64>>
            = (0..3)
            .map(|_| nd::ArrayD::from_shape_fn(vec![6], |ix| if ix[0] == 4 { 1.0 } else { 0.0 }))
            .collect();
        let (est, var) = target.estfun_from(&parts, &coeff, &samples, 1e-10).unwrap();
        let exact_sum: f64 = exact.iter()
            .map(|p| p.prune(true).to_array()[[4]].re)
            .sum();
        assert!(var > 0.0);
        assert!((est - exact_sum).abs() < 5.0 * var.sqrt() + 1e-3);
    }
}
