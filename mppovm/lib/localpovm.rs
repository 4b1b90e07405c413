//! POVMs on a single site.
//!
//! A [`LocalPovm`] on a *d*-dimensional system is a list of *k* positive
//! semidefinite *d* × *d* matrices summing to the identity. Elements are
//! stored flattened, one per row of a *k* × *d*² matrix, so that the
//! probability of outcome *i* for a density matrix ρ is the Hilbert-Schmidt
//! inner product `Σ_{ab} conj(E_i[a, b]) ρ[a, b]`.

use std::str::FromStr;
use nalgebra as na;
use ndarray as nd;
use num_complex::Complex64 as C64;
use once_cell::sync::OnceCell;
use crate::error::{ check_tol, PovmError, PovmResult };

/// Named single-site POVMs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LocalPovmKind {
    /// Generalized X basis, `d (d - 1)` outcomes.
    X,
    /// Generalized Y basis, `d (d - 1)` outcomes.
    Y,
    /// Computational basis, `d` outcomes.
    Z,
    /// Equal-weight mixture of X, Y, Z (qubits) or of X, Y (`d > 2`).
    Pauli,
}

impl FromStr for LocalPovmKind {
    type Err = PovmError;

    fn from_str(s: &str) -> PovmResult<Self> {
        match s.to_lowercase().as_str() {
            "x" => Ok(Self::X),
            "y" => Ok(Self::Y),
            "z" => Ok(Self::Z),
            "pauli" => Ok(Self::Pauli),
            _ => Err(PovmError::invalid(format!("unknown local POVM {s:?}"))),
        }
    }
}

/// A POVM on a single *d*-dimensional site.
#[derive(Clone, Debug)]
pub struct LocalPovm {
    d: usize,
    elements: nd::Array2<C64>,
    vectors: Option<nd::Array2<C64>>,
    info_complete: bool,
    probability_map: OnceCell<nd::Array2<C64>>,
    linear_inversion_map: OnceCell<nd::Array2<C64>>,
}

// v_i conj(v_j) for each row v of `vectors`, flattened
fn rank_one_elements(vectors: &nd::Array2<C64>) -> nd::Array2<C64> {
    let (k, d) = vectors.dim();
    nd::Array2::from_shape_fn((k, d * d), |(m, ab)| {
        vectors[[m, ab / d]] * vectors[[m, ab % d]].conj()
    })
}

impl LocalPovm {
    /// Create a new POVM from rank-one projectors given by the rows of
    /// `vectors` (each of length `d`).
    ///
    /// Elements are checked to sum to the identity within `eps`.
    pub fn from_vectors(vectors: nd::Array2<C64>, info_complete: bool, eps: f64)
        -> PovmResult<Self>
    {
        let d = vectors.ncols();
        let elements = rank_one_elements(&vectors);
        let povm = Self {
            d,
            elements,
            vectors: Some(vectors),
            info_complete,
            probability_map: OnceCell::new(),
            linear_inversion_map: OnceCell::new(),
        };
        povm.check_identity(eps)?;
        Ok(povm)
    }

    /// Create a new POVM from flattened elements (a `k × d²` matrix).
    pub fn from_elements(elements: nd::Array2<C64>, info_complete: bool, eps: f64)
        -> PovmResult<Self>
    {
        let dsq = elements.ncols();
        let d = (dsq as f64).sqrt().round() as usize;
        if d * d != dsq {
            return Err(PovmError::shape(format!(
                "element length {dsq} is not a square")));
        }
        let povm = Self {
            d,
            elements,
            vectors: None,
            info_complete,
            probability_map: OnceCell::new(),
            linear_inversion_map: OnceCell::new(),
        };
        povm.check_identity(eps)?;
        Ok(povm)
    }

    fn check_identity(&self, eps: f64) -> PovmResult<()> {
        let sum = self.elements.sum_axis(nd::Axis(0));
        let d = self.d;
        let dev = sum.iter().enumerate()
            .map(|(ab, x)| {
                let target = if ab / d == ab % d { 1.0 } else { 0.0 };
                (*x - target).norm()
            })
            .fold(0.0, f64::max);
        check_tol("local POVM elements must sum to the identity", dev, eps)
    }

    /// Generalized X basis measurement.
    ///
    /// For each pair `i < j`, two outcomes with vectors `(e_i ± e_j)` are
    /// included ("+" first), normalized by `sqrt(2 (d - 1))`.
    pub fn x(d: usize) -> PovmResult<Self> {
        Self::pairwise(d, C64::from(1.0))
    }

    /// Generalized Y basis measurement, like [`Self::x`] with vectors
    /// `(e_i ± i e_j)`.
    pub fn y(d: usize) -> PovmResult<Self> {
        Self::pairwise(d, C64::i())
    }

    fn pairwise(d: usize, phase: C64) -> PovmResult<Self> {
        if d < 2 {
            return Err(PovmError::invalid("X/Y POVMs need d >= 2"));
        }
        let k = d * (d - 1);
        let norm = (2.0 * (d - 1) as f64).sqrt().recip();
        let mut vectors: nd::Array2<C64> = nd::Array2::zeros((k, d));
        let pairs = (0..d).flat_map(|i| (i + 1..d).map(move |j| (i, j)));
        for (m, (i, j)) in pairs.enumerate() {
            vectors[[2 * m, i]] = C64::from(norm);
            vectors[[2 * m, j]] = phase * norm;
            vectors[[2 * m + 1, i]] = C64::from(norm);
            vectors[[2 * m + 1, j]] = -phase * norm;
        }
        Self::from_vectors(vectors, false, crate::DEFAULT_EPS)
    }

    /// Computational basis measurement.
    pub fn z(d: usize) -> PovmResult<Self> {
        if d < 1 {
            return Err(PovmError::invalid("Z POVM needs d >= 1"));
        }
        let vectors = nd::Array2::from_shape_fn((d, d), |(i, j)| {
            if i == j { C64::from(1.0) } else { C64::from(0.0) }
        });
        Self::from_vectors(vectors, false, crate::DEFAULT_EPS)
    }

    /// Construct a named POVM.
    pub fn new(kind: LocalPovmKind, d: usize) -> PovmResult<Self> {
        match kind {
            LocalPovmKind::X => Self::x(d),
            LocalPovmKind::Y => Self::y(d),
            LocalPovmKind::Z => Self::z(d),
            LocalPovmKind::Pauli => Self::pauli(d),
        }
    }

    /// Weighted union of the outcomes of several POVMs on the same system.
    ///
    /// Weights must be non-negative and sum to 1. Element lists are
    /// concatenated after scaling each by its weight; when every part has
    /// vectors, the vectors are scaled by the square root of the weight.
    pub fn combine(parts: &[(&LocalPovm, f64)], info_complete: bool)
        -> PovmResult<Self>
    {
        let d = parts.first()
            .ok_or_else(|| PovmError::invalid("cannot combine zero POVMs"))?
            .0.d;
        if parts.iter().any(|(p, _)| p.d != d) {
            return Err(PovmError::shape("combined POVMs act on different dimensions"));
        }
        if parts.iter().any(|(_, w)| *w < 0.0) {
            return Err(PovmError::invalid("negative POVM weight"));
        }
        let wsum: f64 = parts.iter().map(|(_, w)| w).sum();
        check_tol("POVM weights must sum to 1", (wsum - 1.0).abs(), 1e-12)?;
        let elements: Vec<nd::Array2<C64>>
            = parts.iter()
            .map(|(p, w)| p.elements.mapv(|x| x * *w))
            .collect();
        let views: Vec<nd::ArrayView2<C64>> = elements.iter().map(|e| e.view()).collect();
        let elements = nd::concatenate(nd::Axis(0), &views)
            .map_err(|e| PovmError::shape(e.to_string()))?;
        let vectors: Option<nd::Array2<C64>>
            = parts.iter()
            .map(|(p, w)| p.vectors.as_ref().map(|v| v.mapv(|x| x * w.sqrt())))
            .collect::<Option<Vec<_>>>()
            .map(|vs| {
                let views: Vec<nd::ArrayView2<C64>> = vs.iter().map(|v| v.view()).collect();
                nd::concatenate(nd::Axis(0), &views)
            })
            .transpose()
            .map_err(|e| PovmError::shape(e.to_string()))?;
        let povm = Self {
            d,
            elements,
            vectors,
            info_complete,
            probability_map: OnceCell::new(),
            linear_inversion_map: OnceCell::new(),
        };
        povm.check_identity(crate::DEFAULT_EPS)?;
        Ok(povm)
    }

    /// The Pauli POVM: X, Y, Z each with weight 1/3 for `d = 2`, otherwise
    /// X and Y each with weight 1/2.
    pub fn pauli(d: usize) -> PovmResult<Self> {
        let parts = Self::pauli_parts(d)?;
        let w = 1.0 / parts.len() as f64;
        let weighted: Vec<(&LocalPovm, f64)> = parts.iter().map(|p| (p, w)).collect();
        Self::combine(&weighted, true)
    }

    /// The components of [`Self::pauli`]: `[X, Y, Z]` for `d = 2`, otherwise
    /// `[X, Y]`.
    pub fn pauli_parts(d: usize) -> PovmResult<Vec<Self>> {
        if d == 2 {
            Ok(vec![Self::x(d)?, Self::y(d)?, Self::z(d)?])
        } else {
            Ok(vec![Self::x(d)?, Self::y(d)?])
        }
    }

    /// Local dimension *d*.
    pub fn dim(&self) -> usize { self.d }

    /// Number of outcomes *k*.
    pub fn num_outcomes(&self) -> usize { self.elements.nrows() }

    /// Flattened elements, one per row.
    pub fn elements(&self) -> &nd::Array2<C64> { &self.elements }

    /// Rank-one vectors, if the POVM was built from them.
    pub fn vectors(&self) -> Option<&nd::Array2<C64>> { self.vectors.as_ref() }

    /// Return `true` if the elements span the operator space.
    pub fn is_informationally_complete(&self) -> bool { self.info_complete }

    /// The `i`-th element as a *d* × *d* matrix.
    pub fn element(&self, i: usize) -> Option<nd::Array2<C64>> {
        (i < self.num_outcomes()).then(|| {
            self.elements.row(i).to_owned()
                .into_shape((self.d, self.d))
                .expect("element has d^2 entries")
        })
    }

    /// Elements as a `k × d × d` tensor.
    pub fn element_tensor(&self) -> nd::Array3<C64> {
        self.elements.clone()
            .into_shape((self.num_outcomes(), self.d, self.d))
            .expect("elements have d^2 entries")
    }

    /// The map from a flattened density matrix to outcome probabilities,
    /// `p = P · vec(ρ)` with `P[i, ab] = conj(E_i[a, b])`.
    pub fn probability_map(&self) -> &nd::Array2<C64> {
        self.probability_map.get_or_init(|| self.elements.mapv(|x| x.conj()))
    }

    /// Pseudoinverse of [`Self::probability_map`], mapping outcome
    /// probabilities back to a flattened density matrix.
    ///
    /// Singular values below `rcond` times the largest are discarded. The map
    /// is computed on first use and cached, so later calls return the result
    /// for the first `rcond`.
    pub fn linear_inversion_map(&self, rcond: f64) -> PovmResult<&nd::Array2<C64>> {
        self.linear_inversion_map.get_or_try_init(|| {
            let pmap = self.probability_map();
            let (k, dsq) = pmap.dim();
            let mat = na::DMatrix::from_row_iterator(k, dsq, pmap.iter().copied());
            let svd = mat.svd(true, true);
            let smax = svd.singular_values.max();
            let pinv = svd.pseudo_inverse(rcond * smax)
                .map_err(|e| PovmError::invalid(e.to_string()))?;
            Ok(nd::Array2::from_shape_fn((dsq, k), |(i, j)| pinv[(i, j)]))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{ rngs::StdRng, Rng, SeedableRng };

    fn identity_dev(povm: &LocalPovm) -> f64 {
        let d = povm.dim();
        let mut sum: nd::Array2<C64> = nd::Array2::zeros((d, d));
        for i in 0..povm.num_outcomes() {
            sum += &povm.element(i).unwrap();
        }
        sum.indexed_iter()
            .map(|((a, b), x)| (*x - if a == b { 1.0 } else { 0.0 }).norm())
            .fold(0.0, f64::max)
    }

    #[test]
    fn sums_to_identity() {
        for d in 2..6 {
            for kind in [LocalPovmKind::X, LocalPovmKind::Y, LocalPovmKind::Z, LocalPovmKind::Pauli] {
                let povm = LocalPovm::new(kind, d).unwrap();
                assert!(identity_dev(&povm) < 1e-12, "{kind:?} d={d}");
            }
        }
    }

    #[test]
    fn outcome_counts() {
        assert_eq!(LocalPovm::x(3).unwrap().num_outcomes(), 6);
        assert_eq!(LocalPovm::z(3).unwrap().num_outcomes(), 3);
        assert_eq!(LocalPovm::pauli(2).unwrap().num_outcomes(), 6);
        assert_eq!(LocalPovm::pauli(3).unwrap().num_outcomes(), 12);
        assert!(LocalPovm::pauli(2).unwrap().is_informationally_complete());
        assert!(!LocalPovm::x(2).unwrap().is_informationally_complete());
    }

    #[test]
    fn pauli_qubit_elements() {
        let povm = LocalPovm::pauli(2).unwrap();
        // outcome 3 is "y-" with weight 1/3
        let e = povm.element(3).unwrap();
        let expect = nd::arr2(&[
            [C64::new(0.5, 0.0), C64::new(0.0, 0.5)],
            [C64::new(0.0, -0.5), C64::new(0.5, 0.0)],
        ]).mapv(|x| x / 3.0);
        assert!(e.iter().zip(expect.iter()).all(|(a, b)| (a - b).norm() < 1e-12));
        let v = povm.vectors().unwrap();
        assert!((v[[0, 0]].norm_sqr() - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn combine_rejects_bad_weights() {
        let x = LocalPovm::x(2).unwrap();
        let z = LocalPovm::z(2).unwrap();
        assert!(LocalPovm::combine(&[(&x, 0.5), (&z, 0.4)], false).is_err());
        assert!(LocalPovm::combine(&[(&x, 0.5), (&LocalPovm::z(3).unwrap(), 0.5)], false).is_err());
        assert!(LocalPovm::combine(&[(&x, 0.25), (&z, 0.75)], false).is_ok());
    }

    #[test]
    fn linear_inversion_recovers_state() {
        let mut rng = StdRng::seed_from_u64(10546);
        for d in [2, 3] {
            let povm = LocalPovm::pauli(d).unwrap();
            let a = nd::Array2::from_shape_fn((d, d), |_| {
                C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5)
            });
            let rho = a.dot(&a.t().mapv(|x| x.conj()));
            let tr: C64 = rho.diag().sum();
            let rho = rho.mapv(|x| x / tr);
            let vec = rho.clone().into_shape(d * d).unwrap();
            let p = povm.probability_map().dot(&vec);
            let psum: C64 = p.sum();
            assert!((psum - 1.0).norm() < 1e-12);
            let back = povm.linear_inversion_map(crate::DEFAULT_RCOND).unwrap().dot(&p);
            assert!(back.iter().zip(vec.iter()).all(|(a, b)| (a - b).norm() < 1e-10));
        }
    }

    #[test]
    fn kind_from_str() {
        assert_eq!("Pauli".parse::<LocalPovmKind>().unwrap(), LocalPovmKind::Pauli);
        assert!("w".parse::<LocalPovmKind>().is_err());
    }
}
