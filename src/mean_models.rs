//! A module for mean function models of the GP prior.
//!
//! The following mean functions are implemented:
//! * zero (default),
//! * one,
//! * constant,
//! * linear
//!
//! Mean functions are composable: `m1 + m2` and `m1 * m2` build composite
//! means evaluating to the elementwise sum/product of their constituents,
//! with parameter names rescoped to stay unique.

use crate::errors::{GpError, Result};
use crate::hyperparameters::{Parameter, Prior};
use linfa::Float;
use ndarray::{Array1, ArrayBase, Data, Ix2};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Mul};

/// Functional form of a mean function leaf
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeanForm {
    /// m(x) = 0
    Zero,
    /// m(x) = 1
    One,
    /// m(x) = bias
    Constant,
    /// m(x) = coefficient' * x
    Linear,
}

impl MeanForm {
    fn acronym(&self) -> &'static str {
        match self {
            MeanForm::Zero => "Zero",
            MeanForm::One => "One",
            MeanForm::Constant => "Const",
            MeanForm::Linear => "Lin",
        }
    }

    fn make_params<F: Float>(&self) -> Vec<Parameter<F>> {
        match self {
            MeanForm::Zero | MeanForm::One => vec![],
            MeanForm::Constant => vec![Parameter::real("bias", F::zero())],
            MeanForm::Linear => vec![Parameter::real("coefficient", F::zero())],
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct MeanLeaf<F: Float> {
    form: MeanForm,
    params: Vec<Parameter<F>>,
}

impl<F: Float> MeanLeaf<F> {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        let n = x.ncols();
        match self.form {
            MeanForm::Zero => Ok(Array1::zeros(n)),
            MeanForm::One => Ok(Array1::ones(n)),
            MeanForm::Constant => Ok(Array1::from_elem(n, self.params[0].scalar())),
            MeanForm::Linear => {
                let coeff = self.params[0].value();
                check_coeff_dim(self.params[0].name(), coeff.len(), x.nrows())?;
                let mut m = Array1::zeros(n);
                for j in 0..n {
                    let mut acc = F::zero();
                    for d in 0..x.nrows() {
                        let c = if coeff.len() == 1 { coeff[0] } else { coeff[d] };
                        acc = acc + c * x[[d, j]];
                    }
                    m[j] = acc;
                }
                Ok(m)
            }
        }
    }

    /// Gradients of the mean vector wrt each scalar parameter component,
    /// in parameter order.
    fn param_grads(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Vec<Array1<F>>> {
        let n = x.ncols();
        match self.form {
            MeanForm::Zero | MeanForm::One => Ok(vec![]),
            MeanForm::Constant => Ok(vec![Array1::ones(n)]),
            MeanForm::Linear => {
                let coeff = self.params[0].value();
                check_coeff_dim(self.params[0].name(), coeff.len(), x.nrows())?;
                if coeff.len() == 1 {
                    // scalar coefficient applies to every input dimension
                    let mut g = Array1::zeros(n);
                    for j in 0..n {
                        g[j] = x.column(j).sum();
                    }
                    Ok(vec![g])
                } else {
                    Ok((0..coeff.len())
                        .map(|d| x.row(d).to_owned())
                        .collect())
                }
            }
        }
    }
}

fn check_coeff_dim(name: &str, len: usize, n_features: usize) -> Result<()> {
    if len != 1 && len != n_features {
        return Err(GpError::DimensionMismatch(format!(
            "Parameter '{name}' has {len} component(s), but the input has {n_features} feature(s)."
        )));
    }
    Ok(())
}

#[derive(Clone, Debug)]
enum MeanNode<F: Float> {
    Leaf(MeanLeaf<F>),
    Sum(Box<Mean<F>>, Box<Mean<F>>),
    Prod(Box<Mean<F>>, Box<Mean<F>>),
}

/// A mean function of the GP prior, either a single functional form or a
/// sum/product composition. Owns its [`Parameter`]s.
#[derive(Clone, Debug)]
pub struct Mean<F: Float> {
    node: MeanNode<F>,
}

impl<F: Float> Default for Mean<F> {
    fn default() -> Self {
        Mean::zero()
    }
}

impl<F: Float> Mean<F> {
    fn leaf(form: MeanForm) -> Mean<F> {
        let mut mean = Mean {
            node: MeanNode::Leaf(MeanLeaf {
                form,
                params: form.make_params(),
            }),
        };
        mean.rescope();
        mean
    }

    /// Zero mean, the default; has no parameters
    pub fn zero() -> Mean<F> {
        Mean::leaf(MeanForm::Zero)
    }

    /// Constant one mean; has no parameters
    pub fn one() -> Mean<F> {
        Mean::leaf(MeanForm::One)
    }

    /// Constant mean with the given bias
    pub fn constant(bias: F) -> Mean<F> {
        let mut mean = Mean::leaf(MeanForm::Constant);
        if let MeanNode::Leaf(leaf) = &mut mean.node {
            leaf.params[0] = Parameter::real("bias", bias);
        }
        mean.rescope();
        mean
    }

    /// Linear mean with the given coefficient (scalar, broadcast over features)
    pub fn linear(coefficient: F) -> Mean<F> {
        let mut mean = Mean::leaf(MeanForm::Linear);
        if let MeanNode::Leaf(leaf) = &mut mean.node {
            leaf.params[0] = Parameter::real("coefficient", coefficient);
        }
        mean.rescope();
        mean
    }

    /// Evaluate the mean at the sample columns of `x` (n_features, n)
    pub fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        match &self.node {
            MeanNode::Leaf(leaf) => leaf.value(x),
            MeanNode::Sum(a, b) => Ok(a.value(x)? + b.value(x)?),
            MeanNode::Prod(a, b) => Ok(a.value(x)? * b.value(x)?),
        }
    }

    /// Evaluate the mean and its gradients wrt every scalar parameter
    /// component, ordered like [`Mean::parameters`] (flattened).
    pub fn value_and_param_grads(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Vec<Array1<F>>)> {
        match &self.node {
            MeanNode::Leaf(leaf) => Ok((leaf.value(x)?, leaf.param_grads(x)?)),
            MeanNode::Sum(a, b) => {
                let (va, mut ga) = a.value_and_param_grads(x)?;
                let (vb, gb) = b.value_and_param_grads(x)?;
                ga.extend(gb);
                Ok((va + vb, ga))
            }
            MeanNode::Prod(a, b) => {
                let (va, ga) = a.value_and_param_grads(x)?;
                let (vb, gb) = b.value_and_param_grads(x)?;
                let mut grads: Vec<Array1<F>> =
                    ga.into_iter().map(|g| g * &vb).collect();
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
            MeanNode::Leaf(leaf) => out.extend(leaf.params.iter()),
            MeanNode::Sum(a, b) | MeanNode::Prod(a, b) => {
                a.collect_params(out);
                b.collect_params(out);
            }
        }
    }

    /// Mutable access to the owned parameters, same order as [`Mean::parameters`]
    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter<F>> {
        let mut out = vec![];
        self.collect_params_mut(&mut out);
        out
    }

    fn collect_params_mut<'a>(&'a mut self, out: &mut Vec<&'a mut Parameter<F>>) {
        match &mut self.node {
            MeanNode::Leaf(leaf) => out.extend(leaf.params.iter_mut()),
            MeanNode::Sum(a, b) | MeanNode::Prod(a, b) => {
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
                "Mean function has no parameter named '{name}'"
            ))),
            _ => Err(GpError::InvalidArgument(format!(
                "Parameter name '{name}' is ambiguous, use the scoped name"
            ))),
        }
    }

    /// Set a parameter value, builder style
    pub fn with_param(mut self, name: &str, value: F) -> Result<Self> {
        self.param_mut(name)?.set_value(&[value])?;
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
            MeanNode::Leaf(leaf) => leaf.form.acronym().to_string(),
            MeanNode::Sum(a, b) => format!("({}+{})", a.acronym(), b.acronym()),
            MeanNode::Prod(a, b) => format!("({}*{})", a.acronym(), b.acronym()),
        }
    }

    fn for_each_leaf_mut(&mut self, f: &mut impl FnMut(&mut MeanLeaf<F>)) {
        match &mut self.node {
            MeanNode::Leaf(leaf) => f(leaf),
            MeanNode::Sum(a, b) | MeanNode::Prod(a, b) => {
                a.for_each_leaf_mut(f);
                b.for_each_leaf_mut(f);
            }
        }
    }

    /// Broadcast every linear coefficient to one component per feature.
    pub(crate) fn broadcast_coefficients(&mut self, n_features: usize) -> Result<()> {
        let mut result = Ok(());
        self.for_each_leaf_mut(&mut |leaf| {
            if result.is_ok() && leaf.form == MeanForm::Linear {
                result = leaf.params[0].broadcast(n_features);
            }
        });
        result
    }

    /// Deterministically rename all parameters so that the joint parameter
    /// list stays collision free after composition: a family occurring once
    /// keeps `ACR.param`, repeated families get `ACR_1.param`, `ACR_2.param`
    /// in left-to-right order.
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

pub(crate) fn short_name(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((_, short)) => short,
        None => name,
    }
}

impl<F: Float> Add for Mean<F> {
    type Output = Mean<F>;

    fn add(self, rhs: Mean<F>) -> Mean<F> {
        let mut mean = Mean {
            node: MeanNode::Sum(Box::new(self), Box::new(rhs)),
        };
        mean.rescope();
        mean
    }
}

impl<F: Float> Mul for Mean<F> {
    type Output = Mean<F>;

    fn mul(self, rhs: Mean<F>) -> Mean<F> {
        let mut mean = Mean {
            node: MeanNode::Prod(Box::new(self), Box::new(rhs)),
        };
        mean.rescope();
        mean
    }
}

impl<F: Float> fmt::Display for Mean<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.acronym())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_zero_mean_default() {
        let mean = Mean::<f64>::default();
        let x = array![[0., 1., 2.]];
        assert_eq!(mean.value(&x).unwrap(), array![0., 0., 0.]);
        assert!(mean.parameters().is_empty());
    }

    #[test]
    fn test_linear_mean() {
        let mean = Mean::linear(0.5);
        let x = array![[0., 1., 2.]];
        assert_abs_diff_eq!(mean.value(&x).unwrap(), array![0., 0.5, 1.0], epsilon = 1e-12);
    }

    #[test]
    fn test_linear_plus_one() {
        let mean = Mean::linear(0.5) + Mean::one();
        let x = array![[0., 1., 2.]];
        assert_abs_diff_eq!(mean.value(&x).unwrap(), array![1., 1.5, 2.0], epsilon = 1e-12);
        assert_eq!(mean.parameters().len(), 1);
        assert_eq!(mean.parameters()[0].name(), "Lin.coefficient");
    }

    #[test]
    fn test_sum_is_elementwise_sum() {
        let m1 = Mean::linear(0.3);
        let m2 = Mean::constant(2.0);
        let x = array![[0., 1., 2.], [1., 0., 1.]];
        let expected = m1.value(&x).unwrap() + m2.value(&x).unwrap();
        let sum = m1 + m2;
        assert_abs_diff_eq!(sum.value(&x).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_product_is_elementwise_product() {
        let m1 = Mean::linear(0.3);
        let m2 = Mean::constant(2.0);
        let x = array![[0.5, 1., 2.]];
        let expected = m1.value(&x).unwrap() * m2.value(&x).unwrap();
        let prod = m1 * m2;
        assert_abs_diff_eq!(prod.value(&x).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_namescoping_no_collisions() {
        let mean = Mean::<f64>::linear(0.1) + Mean::linear(0.2) + Mean::constant(1.0);
        let names: Vec<_> = mean.parameters().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["Lin_1.coefficient", "Lin_2.coefficient", "Const.bias"]);
        assert_eq!(mean.parameters().len(), 3);
    }

    #[test]
    fn test_param_count_is_sum_of_constituents() {
        let m1 = Mean::<f64>::linear(0.);
        let m2 = Mean::constant(0.);
        let (n1, n2) = (m1.parameters().len(), m2.parameters().len());
        assert_eq!((m1 + m2).parameters().len(), n1 + n2);
    }

    #[test]
    fn test_fixed_coefficient() {
        let mean = Mean::<f64>::linear(0.5)
            .fix_param("coefficient")
            .unwrap();
        assert!(mean.parameters()[0].fixed());
    }

    #[test]
    fn test_product_grads() {
        // (c1 * x) * (bias) wrt c1 and bias
        let mean = Mean::linear(0.3) * Mean::constant(2.0);
        let x = array![[0.5, 1., 2.]];
        let (v, grads) = mean.value_and_param_grads(&x).unwrap();
        assert_abs_diff_eq!(v, array![0.3, 0.6, 1.2], epsilon = 1e-12);
        assert_eq!(grads.len(), 2);
        // d/dc1 = x * bias
        assert_abs_diff_eq!(grads[0], array![1.0, 2.0, 4.0], epsilon = 1e-12);
        // d/dbias = c1 * x
        assert_abs_diff_eq!(grads[1], array![0.15, 0.3, 0.6], epsilon = 1e-12);
    }
}
