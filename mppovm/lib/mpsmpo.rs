//! State representations and their local reductions.
//!
//! A state on *L* sites can be given in one of three matrix-product forms:
//!
//! - **MPS**: one physical leg per site; the state is ∣ψ⟩.
//! - **MPDO**: two legs (row, column) per site; the state is a density
//!   operator ρ.
//! - **PMPS**: two legs (physical, ancilla) per site; a purification whose
//!   partial trace over the ancillas is ρ.
//!
//! Every form is converted to an MPDO, after which reduced density operators
//! on contiguous windows are produced lazily by [`Reductions`].

use std::{ iter::FusedIterator, str::FromStr };
use ndarray::{ self as nd, Axis };
use num_complex::Complex64 as C64;
use crate::{
    error::{ PovmError, PovmResult },
    mparray::{ MPArray, tensordot },
};

/// How an [`MPArray`] should be read as a quantum state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StateMode {
    /// Pure state, one leg per site.
    Mps,
    /// Density operator, legs (row, column) per site.
    Mpdo,
    /// Purification, legs (physical, ancilla) per site.
    Pmps,
    /// `Mps` if every site has one leg, `Mpdo` if every site has two.
    Auto,
}

impl FromStr for StateMode {
    type Err = PovmError;

    fn from_str(s: &str) -> PovmResult<Self> {
        match s.to_lowercase().as_str() {
            "mps" => Ok(Self::Mps),
            "mpdo" => Ok(Self::Mpdo),
            "pmps" => Ok(Self::Pmps),
            "auto" => Ok(Self::Auto),
            _ => Err(PovmError::UnknownMode(s.to_string())),
        }
    }
}

impl StateMode {
    /// Replace `Auto` with a concrete mode based on the leg counts of
    /// `state`.
    pub fn resolve(self, state: &MPArray) -> PovmResult<Self> {
        match self {
            Self::Auto => {
                let plegs = state.plegs();
                if plegs.iter().all(|&p| p == 1) {
                    Ok(Self::Mps)
                } else if plegs.iter().all(|&p| p == 2) {
                    Ok(Self::Mpdo)
                } else {
                    Err(PovmError::UnknownMode(
                        format!("auto (leg counts {plegs:?})")))
                }
            },
            mode => Ok(mode),
        }
    }
}

fn check_plegs(state: &MPArray, n: usize, mode: &str) -> PovmResult<()> {
    if state.plegs().iter().all(|&p| p == n) {
        Ok(())
    } else {
        Err(PovmError::shape(format!(
            "{mode} state needs {n} physical legs on every site")))
    }
}

// a [l, p, q, r] x conj(a) [l', p', q, r'] summed over the legs in `traced`,
// returned as [l l', p, p', r r']
fn outer_conj(t: &nd::ArrayD<C64>, traced: &[usize]) -> nd::ArrayD<C64> {
    let tc = t.mapv(|x| x.conj());
    let c = tensordot(t, &tc, traced, traced);
    // c: [l, p, r, l', p', r']
    let c = c.permuted_axes(vec![0, 3, 1, 4, 2, 5]);
    let sh = c.shape().to_vec();
    c.as_standard_layout().into_owned()
        .into_shape(vec![sh[0] * sh[1], sh[2], sh[3], sh[4] * sh[5]])
        .expect("merging bond legs")
}

/// Convert a pure state ∣ψ⟩ to the density operator ∣ψ⟩⟨ψ∣.
pub fn mps_to_mpdo(psi: &MPArray) -> PovmResult<MPArray> {
    check_plegs(psi, 1, "MPS")?;
    let ltens = psi.tensors().iter()
        .map(|t| outer_conj(t, &[]))
        .collect();
    Ok(MPArray::from_tensors_unchecked(ltens))
}

/// Convert a purification to its density operator by tracing out the
/// ancillas.
pub fn pmps_to_mpdo(psi: &MPArray) -> PovmResult<MPArray> {
    check_plegs(psi, 2, "PMPS")?;
    let ltens = psi.tensors().iter()
        .map(|t| outer_conj(t, &[2]))
        .collect();
    Ok(MPArray::from_tensors_unchecked(ltens))
}

/// Convert any state to an MPDO.
pub fn to_mpdo(state: &MPArray, mode: StateMode) -> PovmResult<MPArray> {
    match mode.resolve(state)? {
        StateMode::Mps => mps_to_mpdo(state),
        StateMode::Pmps => pmps_to_mpdo(state),
        StateMode::Mpdo => {
            check_plegs(state, 2, "MPDO")?;
            Ok(state.clone())
        },
        StateMode::Auto => unreachable!(),
    }
}

// partial trace of one MPDO site, [l, p, p, r] -> [l, r]
fn site_trace(t: &nd::ArrayD<C64>) -> nd::Array2<C64> {
    let sh = t.shape();
    let mut acc: nd::Array2<C64> = nd::Array2::zeros((sh[0], sh[3]));
    for i in 0..sh[1] {
        let slab = t.index_axis(Axis(2), i);
        let slab = slab.index_axis(Axis(1), i);
        acc += &slab.into_dimensionality::<nd::Ix2>()
            .expect("site trace is a matrix");
    }
    acc
}

/// Lazy iterator over the reduced density operators of all contiguous
/// windows of a fixed width, from left to right.
///
/// Each item is an MPDO of `width` sites. The iterator is single-pass.
#[derive(Clone, Debug)]
pub struct Reductions {
    ltens: Vec<nd::ArrayD<C64>>,
    // left[k]: contraction of the traces of sites 0..k
    left: Vec<nd::Array1<C64>>,
    // right[k]: contraction of the traces of sites k..n
    right: Vec<nd::Array1<C64>>,
    width: usize,
    next: usize,
}

impl Reductions {
    fn new(rho: MPArray, width: usize) -> PovmResult<Self> {
        let n = rho.len();
        if width == 0 || width > n {
            return Err(PovmError::shape(format!(
                "window width {width} invalid for {n} sites")));
        }
        let traces: Vec<nd::Array2<C64>>
            = rho.tensors().iter().map(site_trace).collect();
        let mut left: Vec<nd::Array1<C64>> = Vec::with_capacity(n + 1);
        left.push(nd::Array1::ones(1));
        for tr in traces.iter() {
            let next = left[left.len() - 1].dot(tr);
            left.push(next);
        }
        let mut right: Vec<nd::Array1<C64>> = vec![nd::Array1::ones(1); n + 1];
        for k in (0..n).rev() {
            right[k] = traces[k].dot(&right[k + 1]);
        }
        let ltens = rho.tensors().to_vec();
        Ok(Self { ltens, left, right, width, next: 0 })
    }

    fn window(&self, start: usize) -> MPArray {
        let stop = start + self.width;
        let mut ltens: Vec<nd::ArrayD<C64>> = self.ltens[start..stop].to_vec();
        let l = self.left[start].clone().into_dyn();
        ltens[0] = tensordot(&l, &ltens[0], &[0], &[0]).insert_axis(Axis(0));
        let r = self.right[stop].clone().into_dyn();
        let last = &ltens[self.width - 1];
        let n = last.ndim();
        let absorbed = tensordot(last, &r, &[n - 1], &[0]).insert_axis(Axis(n - 1));
        ltens[self.width - 1] = absorbed;
        MPArray::from_tensors_unchecked(ltens)
    }
}

impl Iterator for Reductions {
    type Item = MPArray;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next + self.width > self.ltens.len() { return None; }
        let rho = self.window(self.next);
        self.next += 1;
        Some(rho)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.ltens.len() + 1).saturating_sub(self.next + self.width);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Reductions { }

impl FusedIterator for Reductions { }

/// Reduced density operators of every contiguous window of `width` sites.
pub fn reductions(state: &MPArray, mode: StateMode, width: usize)
    -> PovmResult<Reductions>
{
    let rho = to_mpdo(state, mode)?;
    Reductions::new(rho, width)
}

#[cfg(test)]
mod test {
    use super::*;

    fn c(re: f64) -> C64 { C64::from(re) }

    fn bell() -> MPArray {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let psi = nd::arr2(&[[c(s), c(0.0)], [c(0.0), c(s)]]).into_dyn();
        MPArray::from_array(&psi, 1).unwrap()
    }

    #[test]
    fn mode_from_str() {
        assert_eq!("MPS".parse::<StateMode>().unwrap(), StateMode::Mps);
        assert_eq!("pmps".parse::<StateMode>().unwrap(), StateMode::Pmps);
        assert!(matches!(
            "mpo".parse::<StateMode>(), Err(PovmError::UnknownMode(_))));
    }

    #[test]
    fn auto_resolution() {
        let psi = bell();
        assert_eq!(StateMode::Auto.resolve(&psi).unwrap(), StateMode::Mps);
        let rho = mps_to_mpdo(&psi).unwrap();
        assert_eq!(StateMode::Auto.resolve(&rho).unwrap(), StateMode::Mpdo);
        let mixed = MPArray::outer(&[
            &psi.slice_sites(0, 0).unwrap(),
            &MPArray::from_kron([nd::Array1::from_elem(2, c(1.0)).into_dyn()]),
            &MPArray::from_kron([nd::Array2::from_elem((2, 2), c(1.0)).into_dyn()]),
        ]);
        assert!(StateMode::Auto.resolve(&mixed).is_err());
    }

    #[test]
    fn bell_reductions_are_maximally_mixed() {
        let psi = bell();
        let reds: Vec<MPArray> = reductions(&psi, StateMode::Mps, 1).unwrap().collect();
        assert_eq!(reds.len(), 2);
        for rho in reds.iter() {
            let arr = rho.to_array();
            assert_eq!(arr.shape(), &[2, 2]);
            assert!((arr[[0, 0]] - c(0.5)).norm() < 1e-12);
            assert!((arr[[1, 1]] - c(0.5)).norm() < 1e-12);
            assert!(arr[[0, 1]].norm() < 1e-12);
        }
        let full: Vec<MPArray> = reductions(&psi, StateMode::Mps, 2).unwrap().collect();
        assert_eq!(full.len(), 1);
        let arr = full[0].to_array();
        assert!((arr[[0, 1, 0, 1]] - c(0.5)).norm() < 1e-12);
        assert!(arr[[0, 0, 1, 1]].norm() < 1e-12);
        assert!((full[0].total() - c(2.0)).norm() < 1e-12);
    }

    #[test]
    fn pmps_traces_ancilla() {
        // ancilla maximally entangled with a single site
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let a = nd::arr2(&[[c(s), c(0.0)], [c(0.0), c(s)]]).into_dyn();
        let pmps = MPArray::from_kron([a]);
        let rho = to_mpdo(&pmps, StateMode::Pmps).unwrap().to_array();
        assert!((rho[[0, 0]] - c(0.5)).norm() < 1e-12);
        assert!((rho[[1, 1]] - c(0.5)).norm() < 1e-12);
        assert!(rho[[1, 0]].norm() < 1e-12);
    }

    #[test]
    fn too_wide() {
        assert!(reductions(&bell(), StateMode::Mps, 3).is_err());
        assert!(reductions(&bell(), StateMode::Mps, 0).is_err());
    }
}
