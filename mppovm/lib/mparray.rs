//! Exact matrix-product (tensor-train) arrays.
//!
//! An [`MPArray`] of length *L* stores an order-*N* tensor as a chain of *L*
//! local tensors, each with shape `[left, p_1, ..., p_k, right]`, where
//! `p_1, ..., p_k` are the *physical* legs belonging to that site and `left`,
//! `right` are bond indices shared with the neighboring sites. The first left
//! bond and last right bond always have dimension 1.
//!
//! Only exact operations are provided here: bond dimensions multiply under
//! contraction and nothing is ever truncated or re-canonicalized. A single
//! site with no physical legs (shape `[1, 1]`) represents a scalar.

use nalgebra as na;
use ndarray::{ self as nd, Axis, Dimension };
use num_complex::Complex64 as C64;
use crate::error::{ PovmError, PovmResult };

/// A matrix-product array with complex entries.
#[derive(Clone, Debug, PartialEq)]
pub struct MPArray {
    ltens: Vec<nd::ArrayD<C64>>,
}

impl MPArray {
    /// Create a new array from local tensors, checking that bonds agree.
    pub fn from_tensors(ltens: Vec<nd::ArrayD<C64>>) -> PovmResult<Self> {
        for (k, t) in ltens.iter().enumerate() {
            if t.ndim() < 2 {
                return Err(PovmError::shape(format!(
                    "local tensor {k} has {} axes; need at least 2", t.ndim())));
            }
        }
        if let Some(first) = ltens.first() {
            if first.shape()[0] != 1 {
                return Err(PovmError::shape("first left bond must be 1"));
            }
        }
        if let Some(last) = ltens.last() {
            if last.shape()[last.ndim() - 1] != 1 {
                return Err(PovmError::shape("last right bond must be 1"));
            }
        }
        for (k, (a, b)) in ltens.iter().zip(ltens.iter().skip(1)).enumerate() {
            if a.shape()[a.ndim() - 1] != b.shape()[0] {
                return Err(PovmError::shape(format!(
                    "bond mismatch between sites {} and {}", k, k + 1)));
            }
        }
        Ok(Self { ltens })
    }

    pub(crate) fn from_tensors_unchecked(ltens: Vec<nd::ArrayD<C64>>) -> Self {
        Self { ltens }
    }

    /// Construct a product (bond dimension 1) array from one dense factor per
    /// site.
    pub fn from_kron<I>(factors: I) -> Self
    where I: IntoIterator<Item = nd::ArrayD<C64>>
    {
        let ltens: Vec<nd::ArrayD<C64>>
            = factors.into_iter()
            .map(|f| {
                let n = f.ndim();
                f.insert_axis(Axis(0)).insert_axis(Axis(n + 1))
            })
            .collect();
        Self { ltens }
    }

    /// Construct an array from a dense tensor, assigning `plegs` consecutive
    /// axes to each site.
    ///
    /// The factorization is exact: it is a left-to-right sweep of QR
    /// decompositions without truncation.
    pub fn from_array(arr: &nd::ArrayD<C64>, plegs: usize) -> PovmResult<Self> {
        if plegs == 0 || arr.ndim() == 0 || arr.ndim() % plegs != 0 {
            return Err(PovmError::shape(format!(
                "cannot split {} axes into sites of {plegs} legs", arr.ndim())));
        }
        let nsites = arr.ndim() / plegs;
        let dims: Vec<usize> = arr.shape().to_vec();
        let mut rest: nd::Array2<C64>
            = arr.as_standard_layout().into_owned()
            .into_shape((1, arr.len()))
            .expect("contiguous array");
        let mut left: usize = 1;
        let mut ltens: Vec<nd::ArrayD<C64>> = Vec::with_capacity(nsites);
        for site in 0..nsites - 1 {
            let sdims = &dims[site * plegs..(site + 1) * plegs];
            let m: usize = left * sdims.iter().product::<usize>();
            let n: usize = rest.len() / m;
            let mat = na::DMatrix::from_row_iterator(m, n, rest.iter().copied());
            let qr = mat.qr();
            let q = qr.q();
            let r = qr.r();
            let rank = q.ncols();
            let mut shape = vec![left];
            shape.extend_from_slice(sdims);
            shape.push(rank);
            let q: nd::ArrayD<C64>
                = nd::Array2::from_shape_fn((m, rank), |(i, j)| q[(i, j)])
                .into_shape(shape)
                .expect("QR factor has the local shape")
                .into_dyn();
            ltens.push(q);
            rest = nd::Array2::from_shape_fn((rank, n), |(i, j)| r[(i, j)]);
            left = rank;
        }
        let mut shape = vec![left];
        shape.extend_from_slice(&dims[(nsites - 1) * plegs..]);
        shape.push(1);
        let last: nd::ArrayD<C64>
            = rest.into_shape(shape).expect("remainder has the local shape");
        ltens.push(last);
        Ok(Self { ltens })
    }

    /// Number of sites.
    pub fn len(&self) -> usize { self.ltens.len() }

    /// Return `true` if there are no sites.
    pub fn is_empty(&self) -> bool { self.ltens.is_empty() }

    /// Local tensors, each shaped `[left, legs..., right]`.
    pub fn tensors(&self) -> &[nd::ArrayD<C64>] { &self.ltens }

    /// Physical dimensions of each site.
    pub fn pdims(&self) -> Vec<Vec<usize>> {
        self.ltens.iter()
            .map(|t| t.shape()[1..t.ndim() - 1].to_vec())
            .collect()
    }

    /// Number of physical legs on each site.
    pub fn plegs(&self) -> Vec<usize> {
        self.ltens.iter().map(|t| t.ndim() - 2).collect()
    }

    /// Bond dimensions between neighboring sites (`len() - 1` entries).
    pub fn bdims(&self) -> Vec<usize> {
        self.ltens.iter()
            .take(self.len().saturating_sub(1))
            .map(|t| t.shape()[t.ndim() - 1])
            .collect()
    }

    /// Complex conjugate.
    pub fn conj(&self) -> Self {
        let ltens = self.ltens.iter().map(|t| t.mapv(|x| x.conj())).collect();
        Self { ltens }
    }

    /// Multiply by a scalar.
    pub fn scale(&self, c: C64) -> Self {
        let mut ltens = self.ltens.clone();
        if let Some(first) = ltens.first_mut() {
            first.mapv_inplace(|x| x * c);
        }
        Self { ltens }
    }

    /// Apply the same permutation to the physical legs of every site.
    pub fn transpose_legs(&self, perm: &[usize]) -> PovmResult<Self> {
        let ltens = self.ltens.iter()
            .map(|t| {
                let n = t.ndim();
                if perm.len() != n - 2 {
                    return Err(PovmError::shape(format!(
                        "permutation of {} legs applied to site with {}",
                        perm.len(), n - 2)));
                }
                let axes: Vec<usize>
                    = std::iter::once(0)
                    .chain(perm.iter().map(|p| p + 1))
                    .chain(std::iter::once(n - 1))
                    .collect();
                Ok(t.view().permuted_axes(axes).as_standard_layout().into_owned())
            })
            .collect::<PovmResult<Vec<_>>>()?;
        Ok(Self { ltens })
    }

    /// Merge all physical legs from position `from` onward into one leg on
    /// every site.
    pub fn merge_legs(&self, from: usize) -> Self {
        let ltens = self.ltens.iter()
            .map(|t| {
                let sh = t.shape();
                let n = sh.len();
                let from = (from + 1).min(n - 1);
                let mut shape: Vec<usize> = sh[..from].to_vec();
                shape.push(sh[from..n - 1].iter().product());
                shape.push(sh[n - 1]);
                t.as_standard_layout().into_owned()
                    .into_shape(shape)
                    .expect("merging contiguous legs")
            })
            .collect();
        Self { ltens }
    }

    /// Merge all physical legs of each site into a single leg.
    pub fn ravel(&self) -> Self { self.merge_legs(0) }

    /// Concatenate arrays site-wise. Empty arrays are skipped.
    pub fn outer(parts: &[&MPArray]) -> Self {
        let ltens = parts.iter()
            .flat_map(|p| p.ltens.iter().cloned())
            .collect();
        Self { ltens }
    }

    /// Sites `start..stop` as a new array.
    ///
    /// The bonds cut at both ends must have dimension 1.
    pub fn slice_sites(&self, start: usize, stop: usize) -> PovmResult<Self> {
        if start > stop || stop > self.len() {
            return Err(PovmError::shape(format!(
                "site range {start}..{stop} out of bounds for length {}",
                self.len())));
        }
        let ltens = self.ltens[start..stop].to_vec();
        Self::from_tensors(ltens)
    }

    /// Contract physical legs `axes_a` of `self` with `axes_b` of `other`,
    /// site by site.
    ///
    /// The physical legs of each resulting site are the uncontracted legs of
    /// `self` followed by those of `other`; bond dimensions multiply.
    pub fn dot(&self, other: &MPArray, axes_a: &[usize], axes_b: &[usize])
        -> PovmResult<Self>
    {
        if self.len() != other.len() {
            return Err(PovmError::shape(format!(
                "cannot contract arrays of lengths {} and {}",
                self.len(), other.len())));
        }
        if axes_a.len() != axes_b.len() {
            return Err(PovmError::shape("unequal numbers of contracted legs"));
        }
        let ltens = self.ltens.iter().zip(other.ltens.iter()).enumerate()
            .map(|(site, (a, b))| {
                let na_ = a.ndim() - 2;
                let nb_ = b.ndim() - 2;
                for (&ia, &ib) in axes_a.iter().zip(axes_b) {
                    if ia >= na_ || ib >= nb_
                        || a.shape()[ia + 1] != b.shape()[ib + 1]
                    {
                        return Err(PovmError::shape(format!(
                            "contracted legs ({ia}, {ib}) incompatible at site {site}")));
                    }
                }
                let ax_a: Vec<usize> = axes_a.iter().map(|k| k + 1).collect();
                let ax_b: Vec<usize> = axes_b.iter().map(|k| k + 1).collect();
                let c = tensordot(a, b, &ax_a, &ax_b);
                // c: [la, a_free.., ra, lb, b_free.., rb]
                let fa = na_ - axes_a.len();
                let fb = nb_ - axes_b.len();
                let mut perm: Vec<usize> = vec![0, fa + 2];
                perm.extend(1..fa + 1);
                perm.extend(fa + 3..fa + 3 + fb);
                perm.push(fa + 1);
                perm.push(fa + 3 + fb);
                let c = c.permuted_axes(perm);
                let sh = c.shape();
                let mut shape = vec![sh[0] * sh[1]];
                shape.extend_from_slice(&sh[2..sh.len() - 2]);
                shape.push(sh[sh.len() - 2] * sh[sh.len() - 1]);
                Ok(c.as_standard_layout().into_owned()
                    .into_shape(shape)
                    .expect("merging bond legs"))
            })
            .collect::<PovmResult<Vec<_>>>()?;
        Ok(Self { ltens })
    }

    /// Hilbert-Schmidt inner product `Σ conj(self) · other` over all entries.
    pub fn inner(&self, other: &MPArray) -> PovmResult<C64> {
        if self.len() != other.len() || self.pdims() != other.pdims() {
            return Err(PovmError::shape("inner product of differently shaped arrays"));
        }
        let mut env: nd::ArrayD<C64> = nd::Array2::ones((1, 1)).into_dyn();
        for (a, b) in self.ltens.iter().zip(other.ltens.iter()) {
            let np = a.ndim() - 2;
            let a = a.mapv(|x| x.conj());
            // [lb, legs.., ra]
            let t = tensordot(&env, &a, &[0], &[0]);
            let ax_t: Vec<usize> = (0..=np).collect();
            let ax_b: Vec<usize> = (0..=np).collect();
            env = tensordot(&t, b, &ax_t, &ax_b);
        }
        Ok(env.iter().copied().sum())
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.inner(self).map(|x| x.re.max(0.0).sqrt()).unwrap_or(f64::NAN)
    }

    /// Fix physical leg `leg` of every site to the index given for that site,
    /// removing the leg.
    pub fn fix_legs(&self, leg: usize, idx: &[usize]) -> PovmResult<Self> {
        if idx.len() != self.len() {
            return Err(PovmError::shape(format!(
                "{} indices given for {} sites", idx.len(), self.len())));
        }
        let ltens = self.ltens.iter().zip(idx).enumerate()
            .map(|(site, (t, &i))| {
                if leg + 2 >= t.ndim() || i >= t.shape()[leg + 1] {
                    return Err(PovmError::shape(format!(
                        "index {i} on leg {leg} out of bounds at site {site}")));
                }
                Ok(t.index_axis(Axis(leg + 1), i).to_owned())
            })
            .collect::<PovmResult<Vec<_>>>()?;
        Ok(Self { ltens })
    }

    /// Fix the first physical leg of the leading `idx.len()` sites and absorb
    /// the resulting leg-less sites into their neighbors.
    pub fn fix_leading(&self, idx: &[usize]) -> PovmResult<Self> {
        if idx.len() > self.len() {
            return Err(PovmError::shape("more indices than sites"));
        }
        let ltens = self.ltens.iter().enumerate()
            .map(|(site, t)| {
                if site >= idx.len() { return Ok(t.clone()); }
                if t.ndim() < 3 || idx[site] >= t.shape()[1] {
                    return Err(PovmError::shape(format!(
                        "index {} out of bounds at site {site}", idx[site])));
                }
                Ok(t.index_axis(Axis(1), idx[site]).to_owned())
            })
            .collect::<PovmResult<Vec<_>>>()?;
        Ok(Self { ltens }.prune(false))
    }

    /// Keep only the diagonal `leg_a == leg_b` of two equal-dimension physical
    /// legs on every site; `leg_b` is removed.
    pub fn diag_legs(&self, leg_a: usize, leg_b: usize) -> PovmResult<Self> {
        if leg_a >= leg_b {
            return Err(PovmError::invalid("diag_legs requires leg_a < leg_b"));
        }
        let ltens = self.ltens.iter()
            .map(|t| {
                if leg_b + 2 >= t.ndim()
                    || t.shape()[leg_a + 1] != t.shape()[leg_b + 1]
                {
                    return Err(PovmError::shape("diagonal of unequal legs"));
                }
                let slabs: Vec<nd::ArrayViewD<C64>>
                    = (0..t.shape()[leg_a + 1])
                    .map(|i| {
                        t.index_axis(Axis(leg_b + 1), i)
                            .index_axis_move(Axis(leg_a + 1), i)
                    })
                    .collect();
                Ok(nd::stack(Axis(leg_a + 1), &slabs)
                    .expect("diagonal slabs share a shape"))
            })
            .collect::<PovmResult<Vec<_>>>()?;
        Ok(Self { ltens })
    }

    /// Sum over every physical leg of site `site`; the site is then
    /// absorbed into its neighbors.
    pub fn sum_site(&self, site: usize) -> PovmResult<Self> {
        if site >= self.len() {
            return Err(PovmError::shape(format!("no site {site}")));
        }
        let mut ltens = self.ltens.clone();
        let t = &ltens[site];
        let sh = t.shape();
        let (l, r) = (sh[0], sh[sh.len() - 1]);
        let summed: nd::ArrayD<C64>
            = t.as_standard_layout().into_owned()
            .into_shape((l, t.len() / (l * r), r))
            .expect("contiguous site tensor")
            .sum_axis(Axis(1))
            .into_dyn();
        ltens[site] = summed;
        Ok(Self { ltens }.prune(false))
    }

    /// Absorb sites without physical legs into their neighbors.
    ///
    /// With `singletons`, sites whose physical legs all have dimension 1 are
    /// treated as leg-less. If no site remains, the result is a scalar.
    pub fn prune(&self, singletons: bool) -> Self {
        let mut kept: Vec<nd::ArrayD<C64>> = Vec::with_capacity(self.len());
        let mut pending: Option<nd::Array2<C64>> = None;
        for t in self.ltens.iter() {
            let sh = t.shape();
            let legless
                = sh.len() == 2
                || (singletons && sh[1..sh.len() - 1].iter().all(|&d| d == 1));
            if legless {
                let m: nd::Array2<C64>
                    = t.as_standard_layout().into_owned()
                    .into_shape((sh[0], sh[sh.len() - 1]))
                    .expect("leg-less site is a matrix");
                pending = Some(match pending {
                    Some(p) => p.dot(&m),
                    None => m,
                });
            } else {
                let t = match pending.take() {
                    Some(p) => tensordot(&p.into_dyn(), t, &[1], &[0]),
                    None => t.clone(),
                };
                kept.push(t);
            }
        }
        match (pending, kept.last_mut()) {
            (Some(p), Some(last)) => {
                let n = last.ndim();
                *last = tensordot(last, &p.into_dyn(), &[n - 1], &[0]);
            },
            (Some(p), None) => { kept.push(p.into_dyn()); },
            (None, _) => { },
        }
        Self { ltens: kept }
    }

    /// Insert new sites before position `pos`, each carrying the dense factor
    /// given (tensored with the identity on the bond at that position).
    pub fn inject(&self, pos: usize, fill: &[nd::ArrayD<C64>]) -> PovmResult<Self> {
        if pos > self.len() {
            return Err(PovmError::shape(format!(
                "injection position {pos} beyond length {}", self.len())));
        }
        let bond
            = if pos == 0 || pos == self.len() {
                1
            } else {
                self.ltens[pos].shape()[0]
            };
        let new = fill.iter()
            .map(|f| {
                let mut shape = vec![bond];
                shape.extend_from_slice(f.shape());
                shape.push(bond);
                nd::ArrayD::from_shape_fn(shape, |ix| {
                    let ix = ix.slice();
                    let n = ix.len();
                    if ix[0] == ix[n - 1] { f[&ix[1..n - 1]] } else { C64::from(0.0) }
                })
            });
        let ltens: Vec<nd::ArrayD<C64>>
            = self.ltens[..pos].iter().cloned()
            .chain(new)
            .chain(self.ltens[pos..].iter().cloned())
            .collect();
        Ok(Self { ltens })
    }

    /// Sum of all entries.
    pub fn total(&self) -> C64 {
        let mut env: nd::Array1<C64> = nd::Array1::ones(1);
        for t in self.ltens.iter() {
            let sh = t.shape();
            let (l, r) = (sh[0], sh[sh.len() - 1]);
            let m: nd::Array2<C64>
                = t.as_standard_layout().into_owned()
                .into_shape((l, t.len() / (l * r), r))
                .expect("contiguous site tensor")
                .sum_axis(Axis(1));
            env = env.dot(&m);
        }
        env.sum()
    }

    /// Contract all bonds, returning a dense tensor whose axes are the physical
    /// legs in site order (all legs of site 0, then site 1, ...).
    pub fn to_array(&self) -> nd::ArrayD<C64> {
        let mut acc: nd::ArrayD<C64> = nd::Array2::ones((1, 1)).into_dyn();
        for t in self.ltens.iter() {
            let n = acc.ndim();
            acc = tensordot(&acc, t, &[n - 1], &[0]);
        }
        let sh = acc.shape();
        let shape: Vec<usize> = sh[1..sh.len() - 1].to_vec();
        acc.as_standard_layout().into_owned()
            .into_shape(shape)
            .expect("dropping unit boundary bonds")
    }

    /// Like [`Self::to_array`], but with axes grouped by leg kind: the first
    /// leg of every site, then the second leg of every site, and so on.
    ///
    /// Requires every site to carry the same number of legs.
    pub fn to_array_global(&self) -> PovmResult<nd::ArrayD<C64>> {
        let plegs = self.plegs();
        let k = plegs.first().copied().unwrap_or(0);
        if plegs.iter().any(|&p| p != k) {
            return Err(PovmError::shape("global ordering needs uniform leg counts"));
        }
        let n = self.len();
        let perm: Vec<usize>
            = (0..k).flat_map(|leg| (0..n).map(move |site| site * k + leg))
            .collect();
        Ok(self.to_array().permuted_axes(perm).as_standard_layout().into_owned())
    }
}

/// Contract axes `ax_a` of `a` with `ax_b` of `b`.
///
/// The result carries the free axes of `a` followed by the free axes of `b`,
/// each in their original order.
pub(crate) fn tensordot(
    a: &nd::ArrayD<C64>,
    b: &nd::ArrayD<C64>,
    ax_a: &[usize],
    ax_b: &[usize],
) -> nd::ArrayD<C64>
{
    let free_a: Vec<usize> = (0..a.ndim()).filter(|k| !ax_a.contains(k)).collect();
    let free_b: Vec<usize> = (0..b.ndim()).filter(|k| !ax_b.contains(k)).collect();
    let m: usize = free_a.iter().map(|&k| a.shape()[k]).product();
    let c: usize = ax_a.iter().map(|&k| a.shape()[k]).product();
    let n: usize = free_b.iter().map(|&k| b.shape()[k]).product();
    let perm_a: Vec<usize> = free_a.iter().chain(ax_a).copied().collect();
    let perm_b: Vec<usize> = ax_b.iter().chain(free_b.iter()).copied().collect();
    let a2: nd::Array2<C64>
        = a.view().permuted_axes(perm_a).as_standard_layout().into_owned()
        .into_shape((m, c))
        .expect("contiguous after permutation");
    let b2: nd::Array2<C64>
        = b.view().permuted_axes(perm_b).as_standard_layout().into_owned()
        .into_shape((c, n))
        .expect("contiguous after permutation");
    let shape: Vec<usize>
        = free_a.iter().map(|&k| a.shape()[k])
        .chain(free_b.iter().map(|&k| b.shape()[k]))
        .collect();
    a2.dot(&b2).into_shape(shape).expect("product has the free shape")
}

/// Row-major flat index of a multi-index.
pub fn ravel_index(idx: &[usize], shape: &[usize]) -> usize {
    idx.iter().zip(shape).fold(0, |acc, (&i, &d)| acc * d + i)
}

/// Row-major multi-index of a flat index.
pub fn unravel_index(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut idx = vec![0; shape.len()];
    for (i, &d) in idx.iter_mut().zip(shape).rev() {
        *i = flat % d;
        flat /= d;
    }
    idx
}
