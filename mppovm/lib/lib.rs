//! Measurement, sampling, and estimation with matrix-product POVMs.
//!
//! A positive operator-valued measure (POVM) on a chain of sites is stored in
//! matrix-product (tensor-train) form, with one outcome leg and two operator
//! legs per site. From a state given as a matrix-product state, density
//! operator, or purification, this crate computes outcome probabilities,
//! draws samples, and turns samples of one set of POVMs into estimates of
//! the probabilities (and linear functions thereof) of another.
//!
//! All tensor networks here are contracted exactly; no bond dimension is ever
//! truncated, so everything is meant for modest numbers of sites.

pub mod error;
pub mod mparray;
pub mod mpsmpo;
pub mod localpovm;
pub mod mppovm;
pub mod sample;
pub mod calibrate;
pub mod estimate;
pub mod mpplist;

pub use crate::{
    error::{ PovmError, PovmResult },
    localpovm::{ LocalPovm, LocalPovmKind },
    mparray::MPArray,
    mppovm::MPPovm,
    mpplist::MPPovmList,
    mpsmpo::StateMode,
    sample::{ SampleMethod, SampleOpts },
};

/// Default tolerance for numerical consistency checks.
pub const DEFAULT_EPS: f64 = 1e-10;

/// Default relative cutoff on singular values for pseudoinverses.
pub const DEFAULT_RCOND: f64 = 1e-15;
