//! Matrix-product POVMs.
//!
//! An [`MPPovm`] is an [`MPArray`] with exactly three physical legs per site:
//! `(outcome, row, column)`. Fixing the outcome leg of every site yields one
//! POVM element, an operator on the full Hilbert space. Sites whose outcome
//! dimension is 1 are *unmeasured*; their only element is the identity (or
//! anything else the bonds allow), and the set of measured sites is the
//! POVM's *support*.
//!
//! The elements are required to sum to the identity but this is not checked
//! on construction; it is only assumed by the probability routines and
//! checked where a result depends on it (see `MPPovm::elemsum_identity`).

use ndarray::{ self as nd, Axis };
use num_complex::Complex64 as C64;
use once_cell::sync::OnceCell;
use itertools::Itertools;
use crate::{
    error::{ PovmError, PovmResult },
    localpovm::LocalPovm,
    mparray::MPArray,
    mpplist::MPPovmList,
    mpsmpo::{ self, StateMode },
};

/// A POVM on a chain of sites with matrix-product structure.
#[derive(Clone, Debug)]
pub struct MPPovm {
    mpa: MPArray,
    pmap: OnceCell<MPArray>,
}

impl PartialEq for MPPovm {
    fn eq(&self, other: &Self) -> bool { self.mpa == other.mpa }
}

// [1, 1, d, d, 1] identity site
fn eye_mpa(dims: &[usize]) -> MPArray {
    MPArray::from_kron(
        dims.iter()
            .map(|&d| nd::Array2::<C64>::eye(d).insert_axis(Axis(0)).into_dyn())
    )
}

impl MPPovm {
    /// Wrap an [`MPArray`] as an MP-POVM.
    ///
    /// Every site must carry three legs whose last two (row and column) have
    /// equal dimension, and there must be at least one site.
    pub fn new(mpa: MPArray) -> PovmResult<Self> {
        if mpa.is_empty() {
            return Err(PovmError::shape("MP-POVM needs at least one site"));
        }
        for (site, dims) in mpa.pdims().iter().enumerate() {
            if dims.len() != 3 {
                return Err(PovmError::shape(format!(
                    "site {site} has {} legs; an MP-POVM needs 3", dims.len())));
            }
            if dims[1] != dims[2] {
                return Err(PovmError::shape(format!(
                    "site {site} has non-square operator legs {}x{}",
                    dims[1], dims[2])));
            }
        }
        Ok(Self { mpa, pmap: OnceCell::new() })
    }

    /// The underlying matrix-product array, legs `(outcome, row, column)`.
    pub fn as_mpa(&self) -> &MPArray { &self.mpa }

    /// Number of sites.
    pub fn len(&self) -> usize { self.mpa.len() }

    /// Always `false`: an MP-POVM has at least one site.
    pub fn is_empty(&self) -> bool { self.mpa.is_empty() }

    /// Outcome dimension of each site.
    pub fn outdims(&self) -> Vec<usize> {
        self.mpa.pdims().iter().map(|p| p[0]).collect()
    }

    /// Outcome dimensions of the measured sites only.
    pub fn nsoutdims(&self) -> Vec<usize> {
        self.outdims().into_iter().filter(|&d| d > 1).collect()
    }

    /// Hilbert space dimension of each site.
    pub fn hdims(&self) -> Vec<usize> {
        self.mpa.pdims().iter().map(|p| p[1]).collect()
    }

    /// Indices of the measured sites, ascending.
    pub fn support(&self) -> Vec<usize> {
        self.outdims().into_iter()
            .enumerate()
            .filter_map(|(k, d)| (d > 1).then_some(k))
            .collect()
    }

    /// Bond dimensions.
    pub fn bdims(&self) -> Vec<usize> { self.mpa.bdims() }

    /// Apply the same local POVM on `width` adjacent sites.
    pub fn from_local_povm(lpovm: &LocalPovm, width: usize) -> PovmResult<Self> {
        let site = lpovm.element_tensor().into_dyn();
        Self::new(MPArray::from_kron((0..width).map(|_| site.clone())))
    }

    /// The trivial POVM with a single identity element on sites of the given
    /// dimensions.
    pub fn eye(dims: &[usize]) -> PovmResult<Self> {
        Self::new(eye_mpa(dims))
    }

    /// Tensor product of MP-POVMs on consecutive blocks of sites.
    pub fn outer(parts: &[&MPPovm]) -> PovmResult<Self> {
        let mpas: Vec<&MPArray> = parts.iter().map(|p| &p.mpa).collect();
        Self::new(MPArray::outer(&mpas))
    }

    /// Place `self` on sites `startsite..startsite + len` of a chain of
    /// `nr_sites` sites, filling the rest with identity POVMs of dimension
    /// `local_dim`.
    pub fn embed(&self, nr_sites: usize, startsite: usize, local_dim: usize)
        -> PovmResult<Self>
    {
        if startsite + self.len() > nr_sites {
            return Err(PovmError::shape(format!(
                "cannot place {} sites at {startsite} in a chain of {nr_sites}",
                self.len())));
        }
        let left = eye_mpa(&vec![local_dim; startsite]);
        let right = eye_mpa(&vec![local_dim; nr_sites - startsite - self.len()]);
        Self::new(MPArray::outer(&[&left, &self.mpa, &right]))
    }

    /// Every embedding of `self` into a chain of `nr_sites` sites, from
    /// left to right.
    ///
    /// All sites must have the same Hilbert space dimension.
    pub fn block(&self, nr_sites: usize) -> PovmResult<MPPovmList> {
        let hdims = self.hdims();
        let d = hdims[0];
        if hdims.iter().any(|&h| h != d) {
            return Err(PovmError::shape("block requires uniform local dimensions"));
        }
        if nr_sites < self.len() {
            return Err(PovmError::shape(format!(
                "cannot block {} sites into {nr_sites}", self.len())));
        }
        let mpps = (0..=nr_sites - self.len())
            .map(|start| self.embed(nr_sites, start, d))
            .collect::<PovmResult<Vec<_>>>()?;
        MPPovmList::new(mpps)
    }

    /// Tile `self` over `nr_sites` sites.
    ///
    /// If `nr_sites` is not a multiple of the length, the last copy is
    /// truncated, which requires a bond of dimension 1 at the cut.
    pub fn repeat(&self, nr_sites: usize) -> PovmResult<Self> {
        if nr_sites == 0 {
            return Err(PovmError::invalid("cannot repeat onto zero sites"));
        }
        let n_repeat = nr_sites / self.len();
        let n_last = nr_sites % self.len();
        let tail
            = if n_last > 0 {
                if self.bdims()[n_last - 1] != 1 {
                    return Err(PovmError::invalid(format!(
                        "partial repetition needs bond dimension 1 after site {}",
                        n_last - 1)));
                }
                self.mpa.slice_sites(0, n_last)?
            } else {
                MPArray::from_tensors_unchecked(Vec::new())
            };
        let parts: Vec<&MPArray>
            = std::iter::repeat(&self.mpa).take(n_repeat)
            .chain(std::iter::once(&tail))
            .collect();
        Self::new(MPArray::outer(&parts))
    }

    /// The POVM element for a given outcome (one index per site, 0 on
    /// unmeasured sites), as an MPO with legs `(row, column)`.
    pub fn element(&self, outcome: &[usize]) -> PovmResult<MPArray> {
        self.mpa.fix_legs(0, outcome)
    }

    /// Pauli POVM on every one of `nr_sites` sites.
    pub fn pauli_mpp(nr_sites: usize, d: usize) -> PovmResult<Self> {
        Self::from_local_povm(&LocalPovm::pauli(d)?, nr_sites)
    }

    /// All products of the parts of the Pauli POVM over `nr_sites` sites, in
    /// lexicographic order of the part indices (last site fastest).
    pub fn pauli_mpps(nr_sites: usize, d: usize) -> PovmResult<MPPovmList> {
        if nr_sites == 0 {
            return Err(PovmError::invalid("need at least one site"));
        }
        let parts = LocalPovm::pauli_parts(d)?
            .iter()
            .map(|p| Self::from_local_povm(p, 1))
            .collect::<PovmResult<Vec<_>>>()?;
        let mpps = (0..nr_sites).map(|_| parts.iter())
            .multi_cartesian_product()
            .map(|factors| Self::outer(&factors))
            .collect::<PovmResult<Vec<_>>>()?;
        MPPovmList::new(mpps)
    }

    /// Conjugated elements with row and column merged, so that contracting
    /// with a vectorized density operator gives outcome probabilities.
    ///
    /// Computed once and cached.
    pub fn probability_map(&self) -> &MPArray {
        self.pmap.get_or_init(|| self.mpa.conj().merge_legs(1))
    }

    /// Outcome probabilities on every window of `self.len()` sites of a
    /// longer state, from left to right.
    ///
    /// Each item is an MPArray with one outcome leg per site. The iterator is
    /// lazy and single-pass.
    pub fn expectations<'a>(&'a self, state: &MPArray, mode: StateMode)
        -> PovmResult<impl Iterator<Item = PovmResult<MPArray>> + 'a>
    {
        if self.len() > state.len() {
            return Err(PovmError::shape(format!(
                "{}-site POVM cannot measure a {}-site state",
                self.len(), state.len())));
        }
        let pmap = self.probability_map();
        let reductions = mpsmpo::reductions(state, mode, self.len())?;
        Ok(reductions.map(move |rho| pmap.dot(&rho.ravel(), &[1], &[0])))
    }

    /// Outcome probabilities for a state on exactly `self.len()` sites.
    pub fn probab(&self, state: &MPArray, mode: StateMode) -> PovmResult<MPArray> {
        if self.len() != state.len() {
            return Err(PovmError::shape(format!(
                "{}-site POVM cannot measure a {}-site state",
                self.len(), state.len())));
        }
        self.expectations(state, mode)?
            .next()
            .ok_or_else(|| PovmError::shape("no reduction for the full state"))?
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use ndarray::Dimension;

    pub(crate) fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    pub(crate) fn dense_close(a: &nd::ArrayD<C64>, b: &nd::ArrayD<C64>, eps: f64) -> bool {
        a.shape() == b.shape()
            && a.iter().zip(b.iter()).all(|(x, y)| (x - y).norm() < eps)
    }

    // two-qubit POVM with correlated outcomes, bond dimension 2
    pub(crate) fn correlated_mpp() -> MPPovm {
        let x = [
            nd::arr2(&[[c(0.5, 0.0), c(0.5, 0.0)], [c(0.5, 0.0), c(0.5, 0.0)]]),
            nd::arr2(&[[c(0.5, 0.0), c(-0.5, 0.0)], [c(-0.5, 0.0), c(0.5, 0.0)]]),
        ];
        let z = [
            nd::arr2(&[[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(0.0, 0.0)]]),
            nd::arr2(&[[c(0.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]]),
        ];
        let arr = nd::ArrayD::from_shape_fn(vec![2, 2, 2, 2, 2, 2], |ix| {
            let ix = ix.slice();
            let (a, r0, c0, b, r1, c1) = (ix[0], ix[1], ix[2], ix[3], ix[4], ix[5]);
            (z[a][[r0, c0]] * z[b][[r1, c1]] + x[a][[r0, c0]] * x[b][[r1, c1]]) * 0.5
        });
        MPPovm::new(MPArray::from_array(&arr, 3).unwrap()).unwrap()
    }

    pub(crate) fn random_mps<R>(rng: &mut R, n: usize, d: usize) -> MPArray
    where R: rand::Rng + ?Sized
    {
        let arr = nd::ArrayD::from_shape_fn(vec![d; n], |_| {
            c(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5)
        });
        let norm: f64 = arr.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();
        MPArray::from_array(&arr.mapv(|x| x / norm), 1).unwrap()
    }

    #[test]
    fn structure() {
        let mpp = MPPovm::pauli_mpp(3, 2).unwrap();
        assert_eq!(mpp.len(), 3);
        assert_eq!(mpp.outdims(), vec![6, 6, 6]);
        assert_eq!(mpp.hdims(), vec![2, 2, 2]);
        assert_eq!(mpp.bdims(), vec![1, 1]);
        assert_eq!(mpp.support(), vec![0, 1, 2]);
        let emb = mpp.embed(5, 1, 2).unwrap();
        assert_eq!(emb.outdims(), vec![1, 6, 6, 6, 1]);
        assert_eq!(emb.nsoutdims(), vec![6, 6, 6]);
        assert_eq!(emb.support(), vec![1, 2, 3]);
        assert!(mpp.embed(3, 1, 2).is_err());
        assert!(MPPovm::new(MPArray::from_kron([nd::Array2::<C64>::eye(2).into_dyn()])).is_err());
    }

    #[test]
    fn pauli_element() {
        let mpp = MPPovm::pauli_mpp(2, 2).unwrap();
        let elem = mpp.element(&[1, 3]).unwrap()
            .to_array_global().unwrap()
            .into_shape((4, 4)).unwrap();
        let xm = [c(0.5, 0.0), c(-0.5, 0.0)];
        let ym = [c(1.0, 0.0), c(0.0, -1.0)];
        let xy: Vec<C64> = xm.iter()
            .flat_map(|a| ym.iter().map(move |b| a * b))
            .collect();
        let expect = nd::Array2::from_shape_fn((4, 4), |(i, j)| {
            xy[i] * xy[j].conj() / 9.0
        });
        assert!(elem.iter().zip(expect.iter()).all(|(a, b)| (a - b).norm() < 1e-12));
    }

    #[test]
    fn block_embeds_with_identity() {
        let mpp = MPPovm::pauli_mpp(2, 2).unwrap();
        let blocked = mpp.block(3).unwrap();
        assert_eq!(blocked.len(), 2);
        assert_eq!(blocked.mpps()[0].outdims(), vec![6, 6, 1]);
        assert_eq!(blocked.mpps()[1].outdims(), vec![1, 6, 6]);
        let small = mpp.element(&[2, 5]).unwrap()
            .to_array_global().unwrap()
            .into_shape((4, 4)).unwrap();
        let eye2 = nd::Array2::<C64>::eye(2);
        let left = blocked.mpps()[0].element(&[2, 5, 0]).unwrap()
            .to_array_global().unwrap()
            .into_shape((8, 8)).unwrap();
        let right = blocked.mpps()[1].element(&[0, 2, 5]).unwrap()
            .to_array_global().unwrap()
            .into_shape((8, 8)).unwrap();
        let kl = nd::linalg::kron(&small, &eye2);
        let kr = nd::linalg::kron(&eye2, &small);
        assert!(dense_close(&left.into_dyn(), &kl.into_dyn(), 1e-12));
        assert!(dense_close(&right.into_dyn(), &kr.into_dyn(), 1e-12));
    }

    #[test]
    fn repeat_tiles() {
        let one = MPPovm::pauli_mpp(1, 2).unwrap();
        assert_eq!(one.repeat(3).unwrap(), MPPovm::pauli_mpp(3, 2).unwrap());

        let corr = correlated_mpp();
        assert!(corr.bdims()[0] > 1);
        let tiled = corr.repeat(4).unwrap();
        assert_eq!(tiled.len(), 4);
        let pair = MPPovm::outer(&[&corr, &corr]).unwrap();
        assert!(dense_close(&tiled.as_mpa().to_array(), &pair.as_mpa().to_array(), 1e-10));
        assert_eq!(tiled.bdims()[1], 1);
        assert!(corr.repeat(3).is_err());
        assert!(MPPovm::pauli_mpp(2, 2).unwrap().repeat(3).is_ok());
    }

    #[test]
    fn pauli_mpps_order() {
        let list = MPPovm::pauli_mpps(2, 2).unwrap();
        assert_eq!(list.len(), 9);
        let x = MPPovm::from_local_povm(&LocalPovm::x(2).unwrap(), 1).unwrap();
        let y = MPPovm::from_local_povm(&LocalPovm::y(2).unwrap(), 1).unwrap();
        assert_eq!(list.mpps()[1], MPPovm::outer(&[&x, &y]).unwrap());
        assert_eq!(MPPovm::pauli_mpps(1, 3).unwrap().len(), 2);
    }

    #[test]
    fn probabilities_sum_to_one() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(10546);
        let psi = random_mps(&mut rng, 3, 2);
        for mpp in [MPPovm::pauli_mpp(3, 2).unwrap(), correlated_mpp().embed(3, 1, 2).unwrap()] {
            let p = mpp.probab(&psi, StateMode::Auto).unwrap();
            assert!((p.total() - c(1.0, 0.0)).norm() < 1e-10);
            assert!(p.to_array().iter().all(|x| x.re > -1e-12 && x.im.abs() < 1e-12));
        }
    }

    #[test]
    fn state_modes_agree() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(10546);
        let psi = random_mps(&mut rng, 2, 2);
        let mpp = MPPovm::pauli_mpp(2, 2).unwrap();
        let p_mps = mpp.probab(&psi, StateMode::Mps).unwrap().to_array();
        let rho = mpsmpo::mps_to_mpdo(&psi).unwrap();
        let p_mpdo = mpp.probab(&rho, StateMode::Mpdo).unwrap().to_array();
        // trivial one-dimensional ancilla on each site
        let pmps = MPArray::from_tensors(
            psi.tensors().iter().map(|t| t.clone().insert_axis(Axis(2))).collect()
        ).unwrap();
        let p_pmps = mpp.probab(&pmps, StateMode::Pmps).unwrap().to_array();
        assert!(dense_close(&p_mps, &p_mpdo, 1e-12));
        assert!(dense_close(&p_mps, &p_pmps, 1e-12));
    }

    #[test]
    fn expectations_slide() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(10546);
        let psi = random_mps(&mut rng, 4, 2);
        let mpp = MPPovm::pauli_mpp(2, 2).unwrap();
        let probs: Vec<MPArray> = mpp.expectations(&psi, StateMode::Mps).unwrap()
            .collect::<PovmResult<_>>().unwrap();
        assert_eq!(probs.len(), 3);
        let blocked = mpp.block(4).unwrap();
        for (k, p) in probs.iter().enumerate() {
            let full = blocked.mpps()[k].probab(&psi, StateMode::Mps).unwrap()
                .prune(true)
                .to_array();
            assert!(dense_close(&p.to_array(), &full, 1e-12));
        }
    }
}
