//! A module for covariance functions (kernels) of the GP prior.
//!
//! The following kernel families are implemented, all with automatic
//! relevance determination (one length scale per feature) where the
//! family is stationary and anisotropic:
//! * constant,
//! * squared exponential (default),
//! * exponential,
//! * Matern class of arbitrary half-integer order,
//! * piecewise polynomial with compact support (degrees 0 to 3),
//! * rational quadratic,
//! * periodic,
//! * polynomial,
//! * linear,
//! * neural network (arcsine)
//!
//! Kernels are composable with `+` and `*` (elementwise sum/product of the
//! Gram matrices) and can be rescaled by a constant, `k * 2.0`. Composition
//! rescopes parameter names so the joint parameter list stays unique.
//!
//! Inputs follow the column-sample convention: `x` has shape
//! (n_features, n_samples) and `value(x1, x2)` returns the
//! (n_samples_1, n_samples_2) covariance matrix.

use crate::errors::{GpError, Result};
use crate::hyperparameters::{Parameter, Prior};
use crate::mean_models::short_name;
use crate::utils::{dim_sq_diffs, gram, scaled_sq_dists};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Mul};

/// Functional form of a kernel leaf
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelForm {
    /// k(x, x') = sigma_f^2
    Constant,
    /// k(x, x') = sigma_f^2 exp(-r^2 / 2)
    SquaredExponential,
    /// k(x, x') = sigma_f^2 exp(-r)
    Exponential,
    /// Matern kernel of half-integer order nu = p + 1/2
    Matern(usize),
    /// Compactly supported piecewise polynomial kernel of degree q <= 3
    PiecewisePolynomial(usize),
    /// k(x, x') = sigma_f^2 (1 + r^2 / (2 alpha))^-alpha
    RationalQuadratic,
    /// k(x, x') = sigma_f^2 exp(-2 sin^2(pi d / p) / l^2)
    Periodic,
    /// k(x, x') = sigma_f^2 (x' z + c)^degree
    Polynomial(usize),
    /// k(x, x') = (x' z + 1) / l^2
    Linear,
    /// Arcsine kernel of a neural network with one infinite hidden layer
    NeuralNetwork,
}

impl KernelForm {
    fn acronym(&self) -> &'static str {
        match self {
            KernelForm::Constant => "Const",
            KernelForm::SquaredExponential => "SE",
            KernelForm::Exponential => "E",
            KernelForm::Matern(1) => "M32",
            KernelForm::Matern(2) => "M52",
            KernelForm::Matern(_) => "Matern",
            KernelForm::PiecewisePolynomial(_) => "PP",
            KernelForm::RationalQuadratic => "RQ",
            KernelForm::Periodic => "Periodic",
            KernelForm::Polynomial(_) => "Poly",
            KernelForm::Linear => "Lin",
            KernelForm::NeuralNetwork => "NN",
        }
    }

    /// Whether the family carries a `length_scales` parameter that may be
    /// broadcast to one component per feature.
    pub(crate) fn is_anisotropic(&self) -> bool {
        matches!(
            self,
            KernelForm::SquaredExponential
                | KernelForm::Exponential
                | KernelForm::Matern(_)
                | KernelForm::PiecewisePolynomial(_)
                | KernelForm::RationalQuadratic
        )
    }

    fn make_params<F: Float>(&self) -> Vec<Parameter<F>> {
        let one = F::one();
        match self {
            KernelForm::Constant => vec![Parameter::positive("signal_variance", one)],
            KernelForm::SquaredExponential
            | KernelForm::Exponential
            | KernelForm::Matern(_)
            | KernelForm::PiecewisePolynomial(_) => vec![
                Parameter::positive("length_scales", one),
                Parameter::positive("signal_variance", one),
            ],
            KernelForm::RationalQuadratic => vec![
                Parameter::positive("length_scales", one),
                Parameter::positive("signal_variance", one),
                Parameter::positive("alpha", one),
            ],
            KernelForm::Periodic => vec![
                Parameter::positive("length_scales", one),
                Parameter::positive("period", one),
                Parameter::positive("signal_variance", one),
            ],
            KernelForm::Polynomial(_) => vec![
                Parameter::positive("offset", one),
                Parameter::positive("signal_variance", one),
            ],
            KernelForm::Linear => vec![Parameter::positive("length_scales", one)],
            KernelForm::NeuralNetwork => vec![
                Parameter::positive("weight_variance", one),
                Parameter::positive("signal_variance", one),
            ],
        }
    }
}

fn fact(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

/// Prefactor p!/(2p)! and binomial-style coefficients
/// b_i = (p+i)! / (i! (p-i)!) of the half-integer Matern polynomial.
fn matern_coeffs(p: usize) -> (f64, Vec<f64>) {
    let pref = fact(p) / fact(2 * p);
    let b = (0..=p)
        .map(|i| fact(p + i) / (fact(i) * fact(p - i)))
        .collect();
    (pref, b)
}

/// Radial profile g(r) and derivative g'(r) of a stationary kernel,
/// k = sigma_f^2 g(r). `extra` carries the family constants that do not
/// change across matrix entries.
enum RadialProfile {
    SquaredExponential,
    Exponential,
    Matern { sqrt2p1: f64, pref: f64, b: Vec<f64>, p: usize },
    PiecewisePolynomial { j: f64, q: usize },
    RationalQuadratic { alpha: f64 },
}

impl RadialProfile {
    fn eval(&self, r: f64) -> (f64, f64) {
        match self {
            RadialProfile::SquaredExponential => {
                let g = (-r * r / 2.).exp();
                (g, -r * g)
            }
            RadialProfile::Exponential => {
                let g = (-r).exp();
                (g, -g)
            }
            RadialProfile::Matern { sqrt2p1, pref, b, p } => {
                let t = sqrt2p1 * r;
                let et = (-t).exp();
                let mut s = 0.;
                let mut s_prime = 0.;
                for (i, bi) in b.iter().enumerate() {
                    let e = (p - i) as f64;
                    s += bi * (2. * t).powf(e);
                    if p - i >= 1 {
                        s_prime += bi * e * 2. * (2. * t).powf(e - 1.);
                    }
                }
                let g = pref * et * s;
                let dg_dt = pref * et * (s_prime - s);
                (g, dg_dt * sqrt2p1)
            }
            RadialProfile::PiecewisePolynomial { j, q } => {
                if r >= 1. {
                    return (0., 0.);
                }
                let j = *j;
                let u = 1. - r;
                match q {
                    0 => (u.powf(j), -j * u.powf(j - 1.)),
                    1 => {
                        let poly = (j + 1.) * r + 1.;
                        let g = u.powf(j + 1.) * poly;
                        let gp = -(j + 1.) * u.powf(j) * poly + u.powf(j + 1.) * (j + 1.);
                        (g, gp)
                    }
                    2 => {
                        let poly = (j + 1.) * (j + 3.) * r * r + 3. * (j + 2.) * r + 3.;
                        let dpoly = 2. * (j + 1.) * (j + 3.) * r + 3. * (j + 2.);
                        let g = u.powf(j + 2.) * poly / 3.;
                        let gp = (-(j + 2.) * u.powf(j + 1.) * poly + u.powf(j + 2.) * dpoly) / 3.;
                        (g, gp)
                    }
                    3 => {
                        let c3 = j * j * j + 9. * j * j + 23. * j + 15.;
                        let c2 = 6. * j * j + 36. * j + 45.;
                        let c1 = 15. * j + 45.;
                        let poly = c3 * r * r * r + c2 * r * r + c1 * r + 15.;
                        let dpoly = 3. * c3 * r * r + 2. * c2 * r + c1;
                        let g = u.powf(j + 3.) * poly / 15.;
                        let gp = (-(j + 3.) * u.powf(j + 2.) * poly + u.powf(j + 3.) * dpoly) / 15.;
                        (g, gp)
                    }
                    _ => unreachable!("degree is validated at construction"),
                }
            }
            RadialProfile::RationalQuadratic { alpha } => {
                let u = 1. + r * r / (2. * alpha);
                (u.powf(-alpha), -r * u.powf(-alpha - 1.))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct KernelLeaf<F: Float> {
    form: KernelForm,
    params: Vec<Parameter<F>>,
}

impl<F: Float> KernelLeaf<F> {
    fn check_lengths(&self, idx: usize, n_features: usize, anisotropic: bool) -> Result<()> {
        let p = &self.params[idx];
        let len = p.value().len();
        let max = if anisotropic { n_features } else { 1 };
        if len != 1 && len != max {
            return Err(GpError::DimensionMismatch(format!(
                "Parameter '{}' has {} component(s), but the input has {} feature(s).",
                p.name(),
                len,
                n_features
            )));
        }
        Ok(())
    }

    fn radial_profile(&self, n_features: usize) -> Option<RadialProfile> {
        match self.form {
            KernelForm::SquaredExponential => Some(RadialProfile::SquaredExponential),
            KernelForm::Exponential => Some(RadialProfile::Exponential),
            KernelForm::Matern(p) => {
                let (pref, b) = matern_coeffs(p);
                Some(RadialProfile::Matern {
                    sqrt2p1: ((2 * p + 1) as f64).sqrt(),
                    pref,
                    b,
                    p,
                })
            }
            KernelForm::PiecewisePolynomial(q) => Some(RadialProfile::PiecewisePolynomial {
                j: (n_features / 2 + q + 1) as f64,
                q,
            }),
            KernelForm::RationalQuadratic => Some(RadialProfile::RationalQuadratic {
                alpha: self.params[2].scalar().to_f64().unwrap_or(1.),
            }),
            _ => None,
        }
    }

    fn value(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        Ok(self.value_and_grads_impl(x1, x2, false)?.0)
    }

    fn value_and_grads(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Vec<Array2<F>>)> {
        self.value_and_grads_impl(x1, x2, true)
    }

    fn value_and_grads_impl(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
        want_grads: bool,
    ) -> Result<(Array2<F>, Vec<Array2<F>>)> {
        if x1.nrows() != x2.nrows() {
            return Err(GpError::DimensionMismatch(format!(
                "Kernel inputs have {} and {} feature(s).",
                x1.nrows(),
                x2.nrows()
            )));
        }
        let (nf, n1, n2) = (x1.nrows(), x1.ncols(), x2.ncols());
        match self.form {
            KernelForm::Constant => {
                let sf2 = self.params[0].scalar();
                let k = Array2::from_elem((n1, n2), sf2);
                let grads = if want_grads {
                    vec![Array2::ones((n1, n2))]
                } else {
                    vec![]
                };
                Ok((k, grads))
            }
            KernelForm::SquaredExponential
            | KernelForm::Exponential
            | KernelForm::Matern(_)
            | KernelForm::PiecewisePolynomial(_)
            | KernelForm::RationalQuadratic => {
                self.stationary_value_and_grads(x1, x2, want_grads)
            }
            KernelForm::Periodic => {
                self.check_lengths(0, nf, false)?;
                let l = self.params[0].scalar();
                let period = self.params[1].scalar();
                let sf2 = self.params[2].scalar();
                let pi = F::cast(std::f64::consts::PI);
                let two = F::cast(2.);
                let four = F::cast(4.);
                let d = scaled_sq_dists(x1, x2, &[F::one()]).mapv(F::sqrt);
                let mut k = Array2::zeros((n1, n2));
                let mut g_l = Array2::zeros((n1, n2));
                let mut g_p = Array2::zeros((n1, n2));
                let mut g_s = Array2::zeros((n1, n2));
                for i in 0..n1 {
                    for j in 0..n2 {
                        let u = pi * d[[i, j]] / period;
                        let sin_u = u.sin();
                        let kij = sf2 * (-two * sin_u * sin_u / (l * l)).exp();
                        k[[i, j]] = kij;
                        if want_grads {
                            g_l[[i, j]] = kij * four * sin_u * sin_u / (l * l * l);
                            g_p[[i, j]] = kij * (two * pi * d[[i, j]] / (l * l * period * period))
                                * (two * u).sin();
                            g_s[[i, j]] = kij / sf2;
                        }
                    }
                }
                let grads = if want_grads { vec![g_l, g_p, g_s] } else { vec![] };
                Ok((k, grads))
            }
            KernelForm::Polynomial(degree) => {
                let c = self.params[0].scalar();
                let sf2 = self.params[1].scalar();
                let xz = gram(x1, x2);
                let mut k = Array2::zeros((n1, n2));
                let mut g_c = Array2::zeros((n1, n2));
                let mut g_s = Array2::zeros((n1, n2));
                let deg = F::cast(degree as f64);
                for i in 0..n1 {
                    for j in 0..n2 {
                        let base = xz[[i, j]] + c;
                        let pow = base.powi(degree as i32);
                        k[[i, j]] = sf2 * pow;
                        if want_grads {
                            g_c[[i, j]] = sf2 * deg * base.powi(degree as i32 - 1);
                            g_s[[i, j]] = pow;
                        }
                    }
                }
                let grads = if want_grads { vec![g_c, g_s] } else { vec![] };
                Ok((k, grads))
            }
            KernelForm::Linear => {
                self.check_lengths(0, nf, false)?;
                let l = self.params[0].scalar();
                let xz = gram(x1, x2);
                let k = xz.mapv(|v| (v + F::one()) / (l * l));
                let grads = if want_grads {
                    vec![k.mapv(|v| -F::cast(2.) * v / l)]
                } else {
                    vec![]
                };
                Ok((k, grads))
            }
            KernelForm::NeuralNetwork => {
                let w = self.params[0].scalar();
                let sf2 = self.params[1].scalar();
                let xz = gram(x1, x2);
                let sx: Array1<F> = (0..n1).map(|i| x1.column(i).dot(&x1.column(i))).collect();
                let sz: Array1<F> = (0..n2).map(|j| x2.column(j).dot(&x2.column(j))).collect();
                let one = F::one();
                let two = F::cast(2.);
                let tiny = F::cast(1e-12);
                let mut k = Array2::zeros((n1, n2));
                let mut g_w = Array2::zeros((n1, n2));
                let mut g_s = Array2::zeros((n1, n2));
                for i in 0..n1 {
                    for j in 0..n2 {
                        let num = w * (one + xz[[i, j]]);
                        let dx = one + w * (one + sx[i]);
                        let dz = one + w * (one + sz[j]);
                        let s = num / (dx * dz).sqrt();
                        k[[i, j]] = sf2 * s.asin();
                        if want_grads {
                            let ds_dw =
                                (s / w) * (one - ((dx - one) / dx + (dz - one) / dz) / two);
                            let denom = (one - s * s).max(tiny).sqrt();
                            g_w[[i, j]] = sf2 / denom * ds_dw;
                            g_s[[i, j]] = s.asin();
                        }
                    }
                }
                let grads = if want_grads { vec![g_w, g_s] } else { vec![] };
                Ok((k, grads))
            }
        }
    }

    /// Value and gradients of the stationary families through their radial
    /// profile, k = sigma_f^2 g(r) with r the length-scaled distance.
    fn stationary_value_and_grads(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
        want_grads: bool,
    ) -> Result<(Array2<F>, Vec<Array2<F>>)> {
        let (nf, n1, n2) = (x1.nrows(), x1.ncols(), x2.ncols());
        self.check_lengths(0, nf, true)?;
        let lengths = self.params[0].value().to_vec();
        let sf2 = self.params[1].scalar();
        let profile = self
            .radial_profile(nf)
            .ok_or_else(|| GpError::InvalidOperation("kernel is not stationary".to_string()))?;
        let r = scaled_sq_dists(x1, x2, &lengths).mapv(F::sqrt);
        let mut k = Array2::zeros((n1, n2));
        let mut gp_mat = Array2::zeros((n1, n2));
        for i in 0..n1 {
            for j in 0..n2 {
                let (g, gp) = profile.eval(r[[i, j]].to_f64().unwrap_or(0.));
                k[[i, j]] = sf2 * F::cast(g);
                gp_mat[[i, j]] = F::cast(gp);
            }
        }
        if !want_grads {
            return Ok((k, vec![]));
        }
        let tiny = F::cast(1e-12);
        let mut grads = vec![];
        if lengths.len() == 1 {
            let l = lengths[0];
            let mut g_l = Array2::zeros((n1, n2));
            for i in 0..n1 {
                for j in 0..n2 {
                    g_l[[i, j]] = sf2 * gp_mat[[i, j]] * (-r[[i, j]] / l);
                }
            }
            grads.push(g_l);
        } else {
            for d in 0..nf {
                let dd = dim_sq_diffs(x1, x2, d);
                let ld = lengths[d];
                let mut g_d = Array2::zeros((n1, n2));
                for i in 0..n1 {
                    for j in 0..n2 {
                        if r[[i, j]] > tiny {
                            g_d[[i, j]] = sf2 * gp_mat[[i, j]]
                                * (-dd[[i, j]] / (ld * ld * ld * r[[i, j]]));
                        }
                    }
                }
                grads.push(g_d);
            }
        }
        grads.push(k.mapv(|v| v / sf2));
        if let KernelForm::RationalQuadratic = self.form {
            let alpha = self.params[2].scalar();
            let two = F::cast(2.);
            let mut g_a = Array2::zeros((n1, n2));
            for i in 0..n1 {
                for j in 0..n2 {
                    let r2 = r[[i, j]] * r[[i, j]];
                    let u = F::one() + r2 / (two * alpha);
                    g_a[[i, j]] = k[[i, j]] * (-u.ln() + r2 / (two * alpha * u));
                }
            }
            grads.push(g_a);
        }
        Ok((k, grads))
    }
}

#[derive(Clone, Debug)]
enum KernelNode<F: Float> {
    Leaf(KernelLeaf<F>),
    Sum(Box<Kernel<F>>, Box<Kernel<F>>),
    Prod(Box<Kernel<F>>, Box<Kernel<F>>),
}

/// A covariance function of the GP prior, either a single family or a
/// sum/product composition. Owns its [`Parameter`]s.
#[derive(Clone, Debug)]
pub struct Kernel<F: Float> {
    node: KernelNode<F>,
}

impl<F: Float> Default for Kernel<F> {
    fn default() -> Self {
        Kernel::squared_exponential()
    }
}

impl<F: Float> Kernel<F> {
    fn leaf(form: KernelForm) -> Kernel<F> {
        let mut kernel = Kernel {
            node: KernelNode::Leaf(KernelLeaf {
                form,
                params: form.make_params(),
            }),
        };
        kernel.rescope();
        kernel
    }

    /// Constant kernel with the given amplitude
    pub fn constant(signal_variance: F) -> Kernel<F> {
        let mut kernel = Kernel::leaf(KernelForm::Constant);
        if let KernelNode::Leaf(leaf) = &mut kernel.node {
            leaf.params[0] = Parameter::positive("signal_variance", signal_variance);
        }
        kernel.rescope();
        kernel
    }

    /// Squared exponential kernel, the default
    pub fn squared_exponential() -> Kernel<F> {
        Kernel::leaf(KernelForm::SquaredExponential)
    }

    /// Exponential kernel (Matern with nu = 1/2)
    pub fn exponential() -> Kernel<F> {
        Kernel::leaf(KernelForm::Exponential)
    }

    /// Matern kernel of half-integer order nu = order + 1/2
    pub fn matern(order: usize) -> Kernel<F> {
        Kernel::leaf(KernelForm::Matern(order))
    }

    /// Matern kernel with nu = 3/2
    pub fn matern_32() -> Kernel<F> {
        Kernel::matern(1)
    }

    /// Matern kernel with nu = 5/2
    pub fn matern_52() -> Kernel<F> {
        Kernel::matern(2)
    }

    /// Compactly supported piecewise polynomial kernel.
    ///
    /// Only degrees 0 to 3 are positive definite in arbitrary dimension.
    pub fn piecewise_polynomial(degree: usize) -> Result<Kernel<F>> {
        if degree > 3 {
            return Err(GpError::InvalidArgument(format!(
                "Degree {degree} of the piecewise polynomial kernel is not supported. \
                 Supported degrees are 0, 1, 2 and 3."
            )));
        }
        Ok(Kernel::leaf(KernelForm::PiecewisePolynomial(degree)))
    }

    /// Rational quadratic kernel
    pub fn rational_quadratic() -> Kernel<F> {
        Kernel::leaf(KernelForm::RationalQuadratic)
    }

    /// Periodic kernel
    pub fn periodic() -> Kernel<F> {
        Kernel::leaf(KernelForm::Periodic)
    }

    /// Polynomial kernel of the given degree
    pub fn polynomial(degree: usize) -> Kernel<F> {
        Kernel::leaf(KernelForm::Polynomial(degree))
    }

    /// Linear kernel
    pub fn linear() -> Kernel<F> {
        Kernel::leaf(KernelForm::Linear)
    }

    /// Neural network (arcsine) kernel
    pub fn neural_network() -> Kernel<F> {
        Kernel::leaf(KernelForm::NeuralNetwork)
    }

    /// Covariance matrix between the sample columns of `x1` and `x2`
    pub fn value(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        match &self.node {
            KernelNode::Leaf(leaf) => leaf.value(x1, x2),
            KernelNode::Sum(a, b) => Ok(a.value(x1, x2)? + b.value(x1, x2)?),
            KernelNode::Prod(a, b) => Ok(a.value(x1, x2)? * b.value(x1, x2)?),
        }
    }

    /// Covariance matrix of `x` with itself
    pub fn gram(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        self.value(x, x)
    }

    /// Covariance matrix and its gradients wrt every scalar parameter
    /// component, ordered like [`Kernel::parameters`] (flattened). The
    /// gradients are wrt the natural (non-log) parameter values.
    pub fn value_and_grads(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Vec<Array2<F>>)> {
        match &self.node {
            KernelNode::Leaf(leaf) => leaf.value_and_grads(x1, x2),
            KernelNode::Sum(a, b) => {
                let (va, mut ga) = a.value_and_grads(x1, x2)?;
                let (vb, gb) = b.value_and_grads(x1, x2)?;
                ga.extend(gb);
                Ok((va + vb, ga))
            }
            KernelNode::Prod(a, b) => {
                let (va, ga) = a.value_and_grads(x1, x2)?;
                let (vb, gb) = b.value_and_grads(x1, x2)?;
                let mut grads: Vec<Array2<F>> = ga.into_iter().map(|g| g * &vb).collect();
                grads.extend(gb.into_iter().map(|g| g * &va));
                Ok((va * vb, grads))
            }
        }
    }

    /// Owned parameters in left-to-right tree order
    pub fn parameters(&self) -> Vec<&Parameter<F>> {
        let mut out = vec![];
        self.collect_params(&mut out);
        out
    }

    fn collect_params<'a>(&'a self, out: &mut Vec<&'a Parameter<F>>) {
        match &self.node {
            KernelNode::Leaf(leaf) => out.extend(leaf.params.iter()),
            KernelNode::Sum(a, b) | KernelNode::Prod(a, b) => {
                a.collect_params(out);
                b.collect_params(out);
            }
        }
    }

    /// Mutable access to the owned parameters, same order as [`Kernel::parameters`]
    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter<F>> {
        let mut out = vec![];
        self.collect_params_mut(&mut out);
        out
    }

    fn collect_params_mut<'a>(&'a mut self, out: &mut Vec<&'a mut Parameter<F>>) {
        match &mut self.node {
            KernelNode::Leaf(leaf) => out.extend(leaf.params.iter_mut()),
            KernelNode::Sum(a, b) | KernelNode::Prod(a, b) => {
                a.collect_params_mut(out);
                b.collect_params_mut(out);
            }
        }
    }

    /// Find a parameter by its scoped name or by its short name when unique
    pub fn param_mut(&mut self, name: &str) -> Result<&mut Parameter<F>> {
        let matches: Vec<usize> = self
            .parameters()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.name() == name || short_name(p.name()) == name)
            .map(|(i, _)| i)
            .collect();
        match matches.len() {
            1 => Ok(self.parameters_mut().swap_remove(matches[0])),
            0 => Err(GpError::InvalidArgument(format!(
                "Kernel has no parameter named '{name}'"
            ))),
            _ => Err(GpError::InvalidArgument(format!(
                "Parameter name '{name}' is ambiguous, use the scoped name"
            ))),
        }
    }

    /// Set a scalar parameter value, builder style
    pub fn with_param(mut self, name: &str, value: F) -> Result<Self> {
        self.param_mut(name)?.set_value(&[value])?;
        Ok(self)
    }

    /// Set a parameter to the given components, builder style. A
    /// `length_scales` parameter with one component per feature turns on
    /// automatic relevance determination.
    pub fn with_param_values(mut self, name: &str, values: &[F]) -> Result<Self> {
        self.param_mut(name)?.set_value(values)?;
        Ok(self)
    }

    /// Fix a parameter at its current value, builder style
    pub fn fix_param(mut self, name: &str) -> Result<Self> {
        self.param_mut(name)?.set_fixed(true);
        Ok(self)
    }

    /// Assign a hyperprior to a parameter, builder style
    pub fn with_prior(mut self, name: &str, prior: Prior<F>) -> Result<Self> {
        self.param_mut(name)?.set_prior(Some(prior));
        Ok(self)
    }

    /// Short family identifier for diagnostics
    pub fn acronym(&self) -> String {
        match &self.node {
            KernelNode::Leaf(leaf) => leaf.form.acronym().to_string(),
            KernelNode::Sum(a, b) => format!("({}+{})", a.acronym(), b.acronym()),
            KernelNode::Prod(a, b) => format!("({}*{})", a.acronym(), b.acronym()),
        }
    }

    pub(crate) fn for_each_leaf_mut(&mut self, f: &mut impl FnMut(&mut KernelLeaf<F>)) {
        match &mut self.node {
            KernelNode::Leaf(leaf) => f(leaf),
            KernelNode::Sum(a, b) | KernelNode::Prod(a, b) => {
                a.for_each_leaf_mut(f);
                b.for_each_leaf_mut(f);
            }
        }
    }

    /// Broadcast every anisotropic `length_scales` parameter to one
    /// component per feature.
    pub(crate) fn broadcast_length_scales(&mut self, n_features: usize) -> Result<()> {
        let mut result = Ok(());
        self.for_each_leaf_mut(&mut |leaf| {
            if result.is_ok() && leaf.form.is_anisotropic() {
                result = leaf.params[0].broadcast(n_features);
            }
        });
        result
    }

    /// Deterministically rename all parameters so that the joint parameter
    /// list stays collision free after composition, mirroring
    /// [`Mean`](crate::mean_models::Mean) scoping.
    fn rescope(&mut self) {
        let mut totals: HashMap<&'static str, usize> = HashMap::new();
        self.for_each_leaf_mut(&mut |leaf| {
            *totals.entry(leaf.form.acronym()).or_insert(0) += 1;
        });
        let mut seen: HashMap<&'static str, usize> = HashMap::new();
        self.for_each_leaf_mut(&mut |leaf| {
            let acr = leaf.form.acronym();
            let occ = seen.entry(acr).or_insert(0);
            *occ += 1;
            let scope = if totals[acr] > 1 {
                format!("{acr}_{occ}")
            } else {
                acr.to_string()
            };
            for p in leaf.params.iter_mut() {
                let short = short_name(p.name()).to_string();
                p.set_name(format!("{scope}.{short}"));
            }
        });
    }
}

impl<F: Float> Add for Kernel<F> {
    type Output = Kernel<F>;

    fn add(self, rhs: Kernel<F>) -> Kernel<F> {
        let mut kernel = Kernel {
            node: KernelNode::Sum(Box::new(self), Box::new(rhs)),
        };
        kernel.rescope();
        kernel
    }
}

impl<F: Float> Mul for Kernel<F> {
    type Output = Kernel<F>;

    fn mul(self, rhs: Kernel<F>) -> Kernel<F> {
        let mut kernel = Kernel {
            node: KernelNode::Prod(Box::new(self), Box::new(rhs)),
        };
        kernel.rescope();
        kernel
    }
}

/// Rescaling by a constant wraps a fixed constant kernel so the factor is
/// not touched by hyperparameter optimization.
impl<F: Float> Mul<F> for Kernel<F> {
    type Output = Kernel<F>;

    fn mul(self, rhs: F) -> Kernel<F> {
        let mut amplitude = Parameter::positive("signal_variance", rhs);
        amplitude.set_fixed(true);
        let scale = Kernel {
            node: KernelNode::Leaf(KernelLeaf {
                form: KernelForm::Constant,
                params: vec![amplitude],
            }),
        };
        self * scale
    }
}

impl<F: Float> fmt::Display for Kernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.acronym())
    }
}
