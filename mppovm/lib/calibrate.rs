//! Converting samples between MP-POVMs.
//!
//! Samples drawn from one POVM (`other`) carry information about the
//! probabilities of another (`self`) whenever elements of the two are
//! proportional: if `E_i = c · F_j`, then `p(E_i) = c · p(F_j)`. This module
//! finds such matches and turns samples of `other` into probability estimates
//! for `self`.

use ndarray::{ self as nd, Dimension };
use num_complex::Complex64 as C64;
use rustc_hash::FxHashMap;
use tracing::debug;
use crate::{
    error::{ check_tol, PovmError, PovmResult },
    mparray::{ MPArray, ravel_index, unravel_index },
    mppovm::MPPovm,
    mpplist::MPPovmList,
};

/// Which side of a match should be checked for linearly dependent elements.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExcludeDup {
    /// No two elements of `self` may match the same element of `other`.
    pub own: bool,
    /// No two elements of `other` may match the same element of `self`.
    pub other: bool,
}

/// Proportional pairs of elements of two MP-POVMs.
///
/// Both arrays have shape `self.nsoutdims() ++ [other.outdims()[s] for s in
/// self.support()]`: the outcomes of `self` on its support, then the outcomes
/// of `other` on the same sites.
#[derive(Clone, Debug)]
pub struct ElementMatch {
    /// `true` where the two elements are proportional.
    pub matches: nd::ArrayD<bool>,
    /// `‖E_self‖ / ‖E_other‖` where matched, NaN elsewhere.
    pub prefactors: nd::ArrayD<f64>,
    /// Number of leading axes belonging to `self`.
    pub n_own: usize,
}

impl ElementMatch {
    fn own_shape(&self) -> &[usize] { &self.matches.shape()[..self.n_own] }

    /// Iterate over matched pairs as `(flat own outcome, other outcome on the
    /// support, prefactor)`.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, Vec<usize>, f64)> + '_ {
        let own_shape = self.own_shape();
        self.matches.indexed_iter()
            .filter(|(_, m)| **m)
            .map(move |(ix, _)| {
                let ix = ix.slice();
                let own = ravel_index(&ix[..self.n_own], own_shape);
                let pf = self.prefactors[ix];
                (own, ix[self.n_own..].to_vec(), pf)
            })
    }

    /// For each outcome of `self`, whether it matches any outcome of `other`.
    pub fn given(&self) -> nd::ArrayD<bool> {
        let own_shape = self.own_shape().to_vec();
        let mut given = nd::ArrayD::from_elem(own_shape.clone(), false);
        for (own, _, _) in self.pairs() {
            given[unravel_index(own, &own_shape).as_slice()] = true;
        }
        given
    }
}

// per-site factors summing out the outcomes of `other` wherever `self` is
// unmeasured
fn reduce_other(own: &MPPovm, other: &MPPovm) -> PovmResult<MPPovm> {
    let factors = own.outdims().into_iter()
        .zip(other.outdims())
        .map(|(o_own, o_other)| {
            if o_own > 1 {
                nd::Array2::<C64>::eye(o_other).into_dyn()
            } else {
                nd::Array2::from_elem((1, o_other), C64::from(1.0)).into_dyn()
            }
        });
    let tr = MPArray::from_kron(factors);
    MPPovm::new(tr.dot(other.as_mpa(), &[1], &[0])?)
}

// squared Frobenius norm of every element, indexed by outcome
fn element_norms_sq(mpp: &MPPovm) -> PovmResult<nd::ArrayD<f64>> {
    let mpa = mpp.as_mpa();
    let gram = mpa.conj().dot(mpa, &[1, 2], &[1, 2])?.diag_legs(0, 1)?;
    Ok(gram.to_array().mapv(|x| x.re))
}

// extend a selection over the sites `support` (one leg per supported site) to
// every site, with all-ones vectors of length `outdims[s]` in the holes
fn fill_out_holes(outdims: &[usize], support: &[usize], outcome: MPArray)
    -> PovmResult<MPArray>
{
    let ones = |s: usize| nd::Array1::from_elem(outdims[s], C64::from(1.0)).into_dyn();
    let nr_sites = outdims.len();
    let mut mpa = outcome;
    // fill from the right so that earlier positions stay valid
    let after_last: Vec<nd::ArrayD<C64>>
        = (support.last().map(|&s| s + 1).unwrap_or(0)..nr_sites).map(ones).collect();
    mpa = mpa.inject(support.len(), &after_last)?;
    for (pos, (&prev, &cur)) in support.iter().zip(support.iter().skip(1)).enumerate().rev() {
        let gap: Vec<nd::ArrayD<C64>> = (prev + 1..cur).map(ones).collect();
        mpa = mpa.inject(pos + 1, &gap)?;
    }
    if let Some(&first) = support.first() {
        let gap: Vec<nd::ArrayD<C64>> = (0..first).map(ones).collect();
        mpa = mpa.inject(0, &gap)?;
    }
    Ok(mpa)
}

impl MPPovm {
    /// Find pairs of proportional elements of `self` and `other`.
    ///
    /// `other` is first reduced to the support of `self` by summing its
    /// outcomes on every site where `self` is unmeasured. Two elements are
    /// said to match when the Cauchy-Schwarz inequality
    /// `|⟨E, F⟩|² ≤ ‖E‖² ‖F‖²` is saturated to within `eps` (relative).
    pub fn find_matching_elements(&self, other: &MPPovm, exclude_dup: ExcludeDup, eps: f64)
        -> PovmResult<ElementMatch>
    {
        if self.len() != other.len() || self.hdims() != other.hdims() {
            return Err(PovmError::shape(
                "matching elements needs POVMs on the same sites"));
        }
        let red = reduce_other(self, other)?;
        let inner = self.as_mpa().conj()
            .dot(red.as_mpa(), &[1, 2], &[1, 2])?
            .to_array_global()?;
        let snorm = element_norms_sq(self)?;
        let onorm = element_norms_sq(&red)?;

        let own_shape = self.nsoutdims();
        let support = self.support();
        let red_outdims = red.outdims();
        let other_shape: Vec<usize> = support.iter().map(|&s| red_outdims[s]).collect();
        let n_own: usize = own_shape.iter().product();
        let n_other: usize = other_shape.iter().product();
        // unmeasured axes all have dimension 1, so these reshapes only drop
        // them
        let inner: Vec<C64> = inner.iter().copied().collect();
        let snorm: Vec<f64> = snorm.iter().copied().collect();
        let onorm: Vec<f64> = onorm.iter().copied().collect();
        if inner.len() != n_own * n_other
            || snorm.len() != n_own
            || onorm.len() != n_other
        {
            return Err(PovmError::shape("unexpected element counts while matching"));
        }
        if snorm.iter().chain(onorm.iter()).any(|&x| !(x > 0.0)) {
            return Err(PovmError::invalid("POVM element with zero norm"));
        }

        let mut matches: Vec<bool> = Vec::with_capacity(n_own * n_other);
        let mut prefactors: Vec<f64> = Vec::with_capacity(n_own * n_other);
        for (i, sn) in snorm.iter().enumerate() {
            for (j, on) in onorm.iter().enumerate() {
                let normprod = sn * on;
                let ip = inner[i * n_other + j].norm_sqr();
                let dev = (normprod - ip) / normprod;
                check_tol("Cauchy-Schwarz inequality violated", -dev, eps)?;
                let m = (ip / normprod - 1.0).abs() <= eps;
                matches.push(m);
                prefactors.push(if m { (sn / on).sqrt() } else { f64::NAN });
            }
        }

        let mut shape = own_shape.clone();
        shape.extend_from_slice(&other_shape);
        if exclude_dup.own {
            for j in 0..n_other {
                if (0..n_own).filter(|i| matches[i * n_other + j]).count() > 1 {
                    return Err(PovmError::invalid(
                        "pair of linearly dependent elements in self"));
                }
            }
        }
        if exclude_dup.other {
            for i in 0..n_own {
                if (0..n_other).filter(|j| matches[i * n_other + j]).count() > 1 {
                    return Err(PovmError::invalid(
                        "pair of linearly dependent elements in other"));
                }
            }
        }
        let matches = nd::ArrayD::from_shape_vec(shape.clone(), matches)
            .map_err(|e| PovmError::shape(e.to_string()))?;
        let prefactors = nd::ArrayD::from_shape_vec(shape, prefactors)
            .map_err(|e| PovmError::shape(e.to_string()))?;
        Ok(ElementMatch { matches, prefactors, n_own: own_shape.len() })
    }

    /// Check whether the elements of `self` selected by `given` sum to a
    /// multiple of the identity.
    ///
    /// `given` is indexed by the outcomes on the sites `support`; other sites
    /// are summed over. Returns the multiple `c` (with `c ≈ 1` if every
    /// element is selected, `c < 1` otherwise), or `None` if the sum is not
    /// proportional to the identity.
    pub fn elemsum_identity(&self, support: &[usize], given: &nd::ArrayD<bool>, eps: f64)
        -> PovmResult<Option<f64>>
    {
        if !given.iter().any(|&g| g) {
            return Err(PovmError::invalid("some elements are required"));
        }
        let any_missing = !given.iter().all(|&g| g);
        let outdims = self.outdims();
        if support.len() != given.ndim()
            || support.iter().zip(given.shape()).any(|(&s, &d)| s >= outdims.len() || outdims[s] != d)
        {
            return Err(PovmError::shape("selection does not match the outcome dimensions"));
        }
        let given_c: nd::ArrayD<C64> = given.mapv(|g| C64::from(if g { 1.0 } else { 0.0 }));
        let sel
            = if support.is_empty() {
                let g = given_c.iter().copied().next().unwrap_or_default();
                fill_out_holes(&outdims, support, MPArray::from_tensors_unchecked(Vec::new()))?
                    .scale(g)
            } else {
                fill_out_holes(&outdims, support, MPArray::from_array(&given_c, 1)?)?
            };
        let elem_sum = sel.dot(self.as_mpa(), &[0], &[0])?;
        let eye = MPArray::from_kron(
            self.hdims().into_iter().map(|d| nd::Array2::<C64>::eye(d).into_dyn()));
        let sum_norm = elem_sum.norm();
        let eye_norm = eye.norm();
        let normprod = sum_norm * eye_norm;
        let inner = elem_sum.inner(&eye)?.norm();
        let dev = (normprod - inner) / normprod;
        check_tol("Cauchy-Schwarz inequality violated", -dev, eps)?;
        if dev > eps { return Ok(None); }
        let all_prefactor = sum_norm / eye_norm;
        if any_missing {
            check_tol("partial element sum exceeds the identity", all_prefactor - 1.0, eps)?;
        } else {
            check_tol("element sum must be the identity", (all_prefactor - 1.0).abs(), eps)?;
        }
        Ok(Some(all_prefactor))
    }

    /// Convert samples of `other` into estimated outcome probabilities of
    /// `self`.
    ///
    /// Columns of `samples` correspond to the measured sites of `other`.
    /// Returns the estimates (shape `self.nsoutdims()`, NaN for outcomes that
    /// no element of `other` determines) and the number of samples that
    /// contributed to at least one estimate.
    ///
    /// If every outcome of `other` matches some element of `self`, the
    /// estimates sum to the identity fraction of the matched elements.
    pub fn counts_from(&self, other: &MPPovm, samples: nd::ArrayView2<u8>, eps: f64)
        -> PovmResult<(nd::ArrayD<f64>, usize)>
    {
        let other_support = other.support();
        if samples.ncols() != other_support.len() {
            return Err(PovmError::shape(format!(
                "{} sample columns for {} measured sites",
                samples.ncols(), other_support.len())));
        }
        let n_samples = samples.nrows();
        if n_samples == 0 {
            return Err(PovmError::invalid("no samples"));
        }
        let m = self.find_matching_elements(other, ExcludeDup::default(), eps)?;
        let own_shape = self.nsoutdims();
        let n_own: usize = own_shape.iter().product();
        let given = m.given();
        if !given.iter().any(|&g| g) {
            return Ok((nd::ArrayD::from_elem(own_shape, f64::NAN), 0));
        }
        let support = self.support();
        let all_prefactor = self.elemsum_identity(&support, &given, eps)?
            .ok_or(PovmError::Unconvertible)?;

        let columns: Vec<Option<usize>>
            = support.iter()
            .map(|s| other_support.iter().position(|t| t == s))
            .collect();
        let mut lookup: FxHashMap<Vec<usize>, Vec<(usize, f64)>> = FxHashMap::default();
        for (own, other_out, pf) in m.pairs() {
            lookup.entry(other_out).or_default().push((own, pf));
        }

        let mut counts: Vec<f64> = vec![0.0; n_own];
        let mut n_used: usize = 0;
        let mut key: Vec<usize> = vec![0; support.len()];
        for row in samples.rows() {
            key.iter_mut().zip(columns.iter())
                .for_each(|(k, col)| { *k = col.map(|c| usize::from(row[c])).unwrap_or(0); });
            if let Some(hits) = lookup.get(&key) {
                n_used += 1;
                for &(own, pf) in hits.iter() {
                    counts[own] += pf / n_samples as f64;
                }
            }
        }
        // the sum is fixed only if every outcome of `other` is matched;
        // otherwise it depends on how many samples fell on matched outcomes
        let n_other_out: usize = m.matches.shape()[m.n_own..].iter().product();
        if lookup.len() == n_other_out {
            let total: f64 = counts.iter().sum();
            check_tol(
                "converted counts must sum to the matched fraction",
                (total - all_prefactor).abs(),
                eps,
            )?;
        }
        counts.iter_mut().zip(given.iter())
            .filter(|(_, g)| !**g)
            .for_each(|(c, _)| { *c = f64::NAN; });
        debug!(n_samples, n_used, all_prefactor, "converted samples");
        let counts = nd::ArrayD::from_shape_vec(own_shape, counts)
            .map_err(|e| PovmError::shape(e.to_string()))?;
        Ok((counts, n_used))
    }

    fn outcome_index(&self, row: nd::ArrayView1<u8>, dims: &[usize]) -> PovmResult<usize> {
        if row.len() != dims.len() {
            return Err(PovmError::shape(format!(
                "{} sample columns for {} measured sites", row.len(), dims.len())));
        }
        let idx: Vec<usize> = row.iter().map(|&x| usize::from(x)).collect();
        if idx.iter().zip(dims).any(|(&i, &d)| i >= d) {
            return Err(PovmError::invalid("sample outcome out of range"));
        }
        Ok(ravel_index(&idx, dims))
    }

    /// Histogram of samples of `self`, shape `self.nsoutdims()`.
    pub fn count_samples(&self, samples: nd::ArrayView2<u8>) -> PovmResult<nd::ArrayD<usize>> {
        let dims = self.nsoutdims();
        let mut counts = vec![0_usize; dims.iter().product()];
        for row in samples.rows() {
            counts[self.outcome_index(row, &dims)?] += 1;
        }
        debug_assert_eq!(counts.iter().sum::<usize>(), samples.nrows());
        nd::ArrayD::from_shape_vec(dims, counts)
            .map_err(|e| PovmError::shape(e.to_string()))
    }

    /// Like [`Self::count_samples`], with a non-negative weight per sample.
    pub fn count_samples_weighted(&self, samples: nd::ArrayView2<u8>, weights: nd::ArrayView1<f64>)
        -> PovmResult<nd::ArrayD<f64>>
    {
        if weights.len() != samples.nrows() {
            return Err(PovmError::shape("one weight per sample required"));
        }
        if weights.iter().any(|&w| w < 0.0) {
            return Err(PovmError::invalid("negative sample weight"));
        }
        let dims = self.nsoutdims();
        let mut counts = vec![0.0; dims.iter().product()];
        for (row, &w) in samples.rows().into_iter().zip(weights.iter()) {
            counts[self.outcome_index(row, &dims)?] += w;
        }
        nd::ArrayD::from_shape_vec(dims, counts)
            .map_err(|e| PovmError::shape(e.to_string()))
    }

    /// Estimate the outcome probabilities of `self` from samples of every
    /// member of `other`.
    ///
    /// Estimates from different members are averaged, weighted by the number
    /// of samples each used. Returns the estimates (NaN where no member
    /// contributed) and the total number of samples used per outcome.
    pub fn estprob_from_mpplist(
        &self,
        other: &MPPovmList,
        samples: &[nd::Array2<u8>],
        eps: f64,
    ) -> PovmResult<(nd::ArrayD<f64>, nd::ArrayD<usize>)>
    {
        if samples.len() != other.len() {
            return Err(PovmError::shape(format!(
                "{} sample sets for {} POVMs", samples.len(), other.len())));
        }
        let shape = self.nsoutdims();
        let mut weighted: nd::ArrayD<f64> = nd::ArrayD::zeros(shape.clone());
        let mut n_used: nd::ArrayD<usize> = nd::ArrayD::zeros(shape);
        for (mpp, sam) in other.mpps().iter().zip(samples) {
            let (counts, used) = self.counts_from(mpp, sam.view(), eps)?;
            nd::Zip::from(&mut weighted).and(&mut n_used).and(&counts)
                .for_each(|w, n, &c| {
                    if !c.is_nan() {
                        *w += c * used as f64;
                        *n += used;
                    }
                });
        }
        let p_est = nd::Zip::from(&weighted).and(&n_used)
            .map_collect(|&w, &n| if n > 0 { w / n as f64 } else { f64::NAN });
        Ok((p_est, n_used))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{ rngs::StdRng, SeedableRng };
    use crate::{
        localpovm::LocalPovm,
        mppovm::test::random_mps,
        mpsmpo::StateMode,
        sample::SampleOpts,
    };

    fn x_povm(n: usize) -> MPPovm {
        MPPovm::from_local_povm(&LocalPovm::x(2).unwrap(), n).unwrap()
    }

    #[test]
    fn pauli_matches_x_part() {
        let pauli = MPPovm::pauli_mpp(1, 2).unwrap();
        let x = x_povm(1);
        let m = pauli.find_matching_elements(&x, ExcludeDup::default(), 1e-10).unwrap();
        assert_eq!(m.matches.shape(), &[6, 2]);
        let pairs: Vec<(usize, Vec<usize>, f64)> = m.pairs().collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, 0);
        assert_eq!(pairs[0].1, vec![0]);
        assert!((pairs[0].2 - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(pairs[1].0, 1);
        assert_eq!(pairs[1].1, vec![1]);

        let back = x.find_matching_elements(&pauli, ExcludeDup::default(), 1e-10).unwrap();
        let pairs: Vec<(usize, Vec<usize>, f64)> = back.pairs().collect();
        assert_eq!(pairs.len(), 2);
        assert!((pairs[0].2 - 3.0).abs() < 1e-12);
        assert!(back.prefactors[[0, 2]].is_nan());
    }

    #[test]
    fn duplicate_detection() {
        // both x+ elements of a doubled X POVM match the one x+ of X
        let x = LocalPovm::x(2).unwrap();
        let doubled = LocalPovm::combine(&[(&x, 0.5), (&x, 0.5)], false).unwrap();
        let doubled = MPPovm::from_local_povm(&doubled, 1).unwrap();
        let single = x_povm(1);
        let dup = ExcludeDup { own: true, other: false };
        assert!(doubled.find_matching_elements(&single, dup, 1e-10).is_err());
        assert!(doubled.find_matching_elements(&single, ExcludeDup::default(), 1e-10).is_ok());
        let dup = ExcludeDup { own: false, other: true };
        assert!(single.find_matching_elements(&doubled, dup, 1e-10).is_err());
    }

    #[test]
    fn match_shape_uses_own_support() {
        let pauli = MPPovm::pauli_mpp(1, 2).unwrap().embed(3, 1, 2).unwrap();
        let full = MPPovm::pauli_mpp(3, 2).unwrap();
        let m = pauli.find_matching_elements(&full, ExcludeDup::default(), 1e-10).unwrap();
        assert_eq!(m.matches.shape(), &[6, 6]);
        assert_eq!(m.n_own, 1);
        assert_eq!(m.pairs().count(), 6);
    }

    #[test]
    fn identity_sums() {
        let pauli = MPPovm::pauli_mpp(2, 2).unwrap();
        let support = pauli.support();
        let all = nd::ArrayD::from_elem(vec![6, 6], true);
        let c = pauli.elemsum_identity(&support, &all, 1e-10).unwrap().unwrap();
        assert!((c - 1.0).abs() < 1e-10);
        // x outcomes on both sites: (1/3)^2 of the identity
        let xx = nd::ArrayD::from_shape_fn(vec![6, 6], |ix| ix[0] < 2 && ix[1] < 2);
        let c = pauli.elemsum_identity(&support, &xx, 1e-10).unwrap().unwrap();
        assert!((c - 1.0 / 9.0).abs() < 1e-10);
        // a single element is not proportional to the identity
        let one = nd::ArrayD::from_shape_fn(vec![6, 6], |ix| ix[0] == 0 && ix[1] == 0);
        assert!(pauli.elemsum_identity(&support, &one, 1e-10).unwrap().is_none());
        // selection on the first site only, second summed over
        let first = nd::ArrayD::from_shape_fn(vec![6], |ix| ix[0] >= 4);
        let c = pauli.elemsum_identity(&[0], &first, 1e-10).unwrap().unwrap();
        assert!((c - 1.0 / 3.0).abs() < 1e-10);
        let none = nd::ArrayD::from_elem(vec![6, 6], false);
        assert!(pauli.elemsum_identity(&support, &none, 1e-10).is_err());
    }

    #[test]
    fn identity_sum_without_support() {
        let eye = MPPovm::eye(&[2, 2]).unwrap();
        let given = nd::ArrayD::from_elem(nd::IxDyn(&[]), true);
        let c = eye.elemsum_identity(&[], &given, 1e-10).unwrap().unwrap();
        assert!((c - 1.0).abs() < 1e-10);
    }

    #[test]
    fn counts_from_self_are_frequencies() {
        let mut rng = StdRng::seed_from_u64(10546);
        let psi = random_mps(&mut rng, 2, 2);
        let mpp = MPPovm::pauli_mpp(2, 2).unwrap();
        let samples = mpp.sample(&mut rng, &psi, 500, &SampleOpts::default()).unwrap();
        let (counts, n_used) = mpp.counts_from(&mpp, samples.view(), 1e-10).unwrap();
        assert_eq!(n_used, 500);
        let hist = mpp.count_samples(samples.view()).unwrap();
        for (c, h) in counts.iter().zip(hist.iter()) {
            assert!((c - *h as f64 / 500.0).abs() < 1e-12);
        }
    }

    #[test]
    fn counts_from_part_recover_pauli() {
        let mut rng = StdRng::seed_from_u64(10546);
        let psi = random_mps(&mut rng, 1, 2);
        let pauli = MPPovm::pauli_mpp(1, 2).unwrap();
        let x = x_povm(1);
        let samples = x.sample(&mut rng, &psi, 40000, &SampleOpts::default()).unwrap();
        let (counts, n_used) = pauli.counts_from(&x, samples.view(), 1e-10).unwrap();
        assert_eq!(n_used, 40000);
        let p = pauli.probab(&psi, StateMode::Mps).unwrap().to_array();
        for k in 0..2 {
            assert!((counts[[k]] - p[[k]].re).abs() < 0.01);
        }
        assert!(counts.iter().skip(2).all(|c| c.is_nan()));
    }

    #[test]
    fn counts_from_larger_povm() {
        let mut rng = StdRng::seed_from_u64(10546);
        let psi = random_mps(&mut rng, 1, 2);
        let pauli = MPPovm::pauli_mpp(1, 2).unwrap();
        let x = x_povm(1);
        let samples = pauli.sample(&mut rng, &psi, 6000, &SampleOpts::default()).unwrap();
        let (counts, n_used) = x.counts_from(&pauli, samples.view(), 1e-10).unwrap();
        let n_x = samples.iter().filter(|&&s| s < 2).count();
        assert_eq!(n_used, n_x);
        let p = x.probab(&psi, StateMode::Mps).unwrap().to_array();
        for k in 0..2 {
            assert!((counts[[k]] - p[[k]].re).abs() < 0.08);
        }

        let parts = MPPovm::pauli_mpps(1, 2).unwrap();
        let list = MPPovmList::new([pauli, parts.mpps()[2].clone()]).unwrap();
        let z_samples = parts.mpps()[2].sample(&mut rng, &psi, 100, &SampleOpts::default()).unwrap();
        let (p_est, n_used) = x.estprob_from_mpplist(&list, &[samples, z_samples], 1e-10).unwrap();
        assert!(n_used.iter().all(|&n| n == n_x));
        for k in 0..2 {
            assert!((p_est[[k]] - counts[[k]]).abs() < 1e-12);
        }
    }

    #[test]
    fn unconvertible_samples() {
        let c = |x: f64| C64::from(x);
        let z = LocalPovm::z(2).unwrap();
        let x = LocalPovm::x(2).unwrap();
        let own = MPPovm::from_local_povm(
            &LocalPovm::combine(&[(&z, 0.5), (&x, 0.5)], false).unwrap(), 1).unwrap();
        // matches only ½∣0⟩⟨0∣ and ½∣−⟩⟨−∣, whose sum is not ∝ 1
        let other = LocalPovm::from_elements(
            nd::arr2(&[
                [c(0.5), c(0.0), c(0.0), c(0.0)],
                [c(0.25), c(-0.25), c(-0.25), c(0.25)],
                [c(0.25), c(0.25), c(0.25), c(0.75)],
            ]),
            false,
            1e-12,
        ).unwrap();
        let other = MPPovm::from_local_povm(&other, 1).unwrap();
        let m = own.find_matching_elements(&other, ExcludeDup::default(), 1e-10).unwrap();
        assert_eq!(m.pairs().count(), 2);
        let samples = nd::arr2(&[[0_u8], [1], [2]]);
        let res = own.counts_from(&other, samples.view(), 1e-10);
        assert!(matches!(res, Err(PovmError::Unconvertible)));
    }

    #[test]
    fn weighted_counts() {
        let mpp = x_povm(1);
        let samples = nd::arr2(&[[0_u8], [1], [1]]);
        let w = nd::arr1(&[0.5, 1.0, 2.0]);
        let counts = mpp.count_samples_weighted(samples.view(), w.view()).unwrap();
        assert_eq!(counts[[0]], 0.5);
        assert_eq!(counts[[1]], 3.0);
        let bad = nd::arr2(&[[2_u8]]);
        assert!(mpp.count_samples(bad.view()).is_err());
    }

    #[test]
    fn estprob_from_pauli_parts() {
        let mut rng = StdRng::seed_from_u64(10546);
        let psi = random_mps(&mut rng, 2, 2);
        let pauli = MPPovm::pauli_mpp(2, 2).unwrap();
        let parts = MPPovm::pauli_mpps(2, 2).unwrap();
        let samples: Vec<nd::Array2<u8>>
            = parts.mpps().iter()
            .map(|mpp| mpp.sample(&mut rng, &psi, 4000, &SampleOpts::default()).unwrap())
            .collect();
        let (p_est, n_used) = pauli.estprob_from_mpplist(&parts, &samples, 1e-10).unwrap();
        let p = pauli.probab(&psi, StateMode::Mps).unwrap().to_array();
        assert!(n_used.iter().all(|&n| n == 4000));
        for (e, q) in p_est.iter().zip(p.iter()) {
            assert!((e - q.re).abs() < 0.01);
        }
    }
}
