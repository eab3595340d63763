//! Named hyperparameters of mean, kernel and likelihood models.
//!
//! A [`Parameter`] is a named value with bounds, an optional hyperprior and a
//! `fixed` flag. Strictly positive parameters (length scales, variances) are
//! optimized in log space, which keeps them positive without constraints.

use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::Array1;
use std::fmt;

/// Default bounds for strictly positive parameters
pub const POSITIVE_BOUNDS: (f64, f64) = (1e-10, 1e10);
/// Default bounds for unconstrained parameters
pub const REAL_BOUNDS: (f64, f64) = (-1e10, 1e10);

/// A hyperprior distribution over a scalar hyperparameter.
///
/// Assigning a prior adds its log density to the log marginal likelihood.
/// The `Delta` prior pins the parameter at its current value: it contributes
/// nothing to the objective and removes the parameter from the free vector.
#[derive(Clone, Debug, PartialEq)]
pub enum Prior<F: Float> {
    /// Gaussian density with given mean and variance
    Gaussian {
        /// Prior mean
        mean: F,
        /// Prior variance
        variance: F,
    },
    /// Laplace density with given mean and variance (scale b = sqrt(variance / 2))
    Laplace {
        /// Prior mean
        mean: F,
        /// Prior variance
        variance: F,
    },
    /// Point mass at the parameter's current value
    Delta,
}

impl<F: Float> Prior<F> {
    /// Build a prior from its name and sufficient statistics.
    ///
    /// Recognized names are `"Gaussian"`, `"Laplace"` and `"Delta"`; anything
    /// else is rejected with `InvalidArgument`.
    pub fn from_name(name: &str, mean: F, variance: F) -> Result<Prior<F>> {
        match name {
            "Gaussian" => Ok(Prior::Gaussian { mean, variance }),
            "Laplace" => Ok(Prior::Laplace { mean, variance }),
            "Delta" => Ok(Prior::Delta),
            _ => Err(GpError::InvalidArgument(format!(
                "Hyperprior '{name}' not recognized"
            ))),
        }
    }

    /// Log density at `theta`
    pub fn log_pdf(&self, theta: F) -> F {
        match *self {
            Prior::Gaussian { mean, variance } => {
                let two = F::cast(2.);
                let diff = theta - mean;
                -(two * F::cast(std::f64::consts::PI) * variance).ln() / two
                    - diff * diff / (two * variance)
            }
            Prior::Laplace { mean, variance } => {
                let b = (variance / F::cast(2.)).sqrt();
                -(F::cast(2.) * b).ln() - (theta - mean).abs() / b
            }
            Prior::Delta => F::zero(),
        }
    }

    /// Derivative of the log density at `theta`
    pub fn d_log_pdf(&self, theta: F) -> F {
        match *self {
            Prior::Gaussian { mean, variance } => -(theta - mean) / variance,
            Prior::Laplace { mean, variance } => {
                let b = (variance / F::cast(2.)).sqrt();
                -(theta - mean).signum() / b
            }
            Prior::Delta => F::zero(),
        }
    }

    /// Whether this prior pins its parameter (excluded from optimization)
    pub fn pins(&self) -> bool {
        matches!(self, Prior::Delta)
    }
}

/// A named hyperparameter owned by a mean, kernel or likelihood model.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter<F: Float> {
    name: String,
    value: Array1<F>,
    bounds: (F, F),
    fixed: bool,
    is_log: bool,
    prior: Option<Prior<F>>,
}

impl<F: Float> Parameter<F> {
    /// An unconstrained parameter with a single component
    pub fn real(name: impl Into<String>, value: F) -> Parameter<F> {
        Parameter {
            name: name.into(),
            value: Array1::from_elem(1, value),
            bounds: (F::cast(REAL_BOUNDS.0), F::cast(REAL_BOUNDS.1)),
            fixed: false,
            is_log: false,
            prior: None,
        }
    }

    /// A strictly positive parameter, optimized in log space
    pub fn positive(name: impl Into<String>, value: F) -> Parameter<F> {
        Parameter {
            name: name.into(),
            value: Array1::from_elem(1, value),
            bounds: (F::cast(POSITIVE_BOUNDS.0), F::cast(POSITIVE_BOUNDS.1)),
            fixed: false,
            is_log: true,
            prior: None,
        }
    }

    pub(crate) fn positive_with_bounds(
        name: impl Into<String>,
        value: F,
        lower: F,
        upper: F,
    ) -> Parameter<F> {
        Parameter {
            name: name.into(),
            value: Array1::from_elem(1, value),
            bounds: (lower, upper),
            fixed: false,
            is_log: true,
            prior: None,
        }
    }

    /// Parameter name, namescoped by its owning model (e.g. `SE.length_scales`)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Current value
    pub fn value(&self) -> &Array1<F> {
        &self.value
    }

    /// First component of the value, for the common scalar case
    pub fn scalar(&self) -> F {
        self.value[0]
    }

    /// Set the value, enforcing bounds. Supplying more than one component
    /// reshapes the parameter (e.g. per-feature length scales).
    pub fn set_value(&mut self, value: &[F]) -> Result<()> {
        if value.is_empty() {
            return Err(GpError::InvalidArgument(format!(
                "Parameter '{}' requires at least one component",
                self.name
            )));
        }
        for &v in value {
            if v < self.bounds.0 || v > self.bounds.1 {
                return Err(GpError::InvalidArgument(format!(
                    "Value {} of parameter '{}' outside bounds [{}, {}]",
                    v, self.name, self.bounds.0, self.bounds.1
                )));
            }
        }
        self.value = Array1::from_vec(value.to_vec());
        Ok(())
    }

    pub(crate) fn set_component(&mut self, i: usize, v: F) {
        self.value[i] = v;
    }

    /// Reshape the value to `n` components, broadcasting a scalar
    pub(crate) fn broadcast(&mut self, n: usize) -> Result<()> {
        if self.value.len() == n {
            return Ok(());
        }
        if self.value.len() == 1 {
            self.value = Array1::from_elem(n, self.value[0]);
            return Ok(());
        }
        Err(GpError::DimensionMismatch(format!(
            "Parameter '{}' has {} component(s), but {} are required.",
            self.name,
            self.value.len(),
            n
        )))
    }

    /// Log-transformed value; fails when the parameter is not log-scaled
    pub fn log(&self) -> Result<Array1<F>> {
        if !self.is_log {
            return Err(GpError::InvalidOperation(format!(
                "Parameter '{}' is not a log-scale parameter",
                self.name
            )));
        }
        Ok(self.value.mapv(|v| v.ln()))
    }

    /// Set the value from its log-transformed representation
    pub fn set_log(&mut self, log_value: &[F]) -> Result<()> {
        if !self.is_log {
            return Err(GpError::InvalidOperation(format!(
                "Parameter '{}' is not a log-scale parameter",
                self.name
            )));
        }
        let natural: Vec<F> = log_value.iter().map(|v| v.exp()).collect();
        self.set_value(&natural)
    }

    /// Whether optimization operates on the log of this parameter
    pub fn is_log(&self) -> bool {
        self.is_log
    }

    /// Whether this parameter is excluded from the optimization vector
    pub fn fixed(&self) -> bool {
        self.fixed
    }

    /// Exclude from / include into the optimization vector
    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    /// Whether fitting may move this parameter
    pub fn is_free(&self) -> bool {
        !self.fixed && !self.prior.as_ref().map(Prior::pins).unwrap_or(false)
    }

    /// Lower and upper bounds on the value
    pub fn bounds(&self) -> (F, F) {
        self.bounds
    }

    /// Set bounds; positive parameters require a positive lower bound
    pub fn set_bounds(&mut self, lower: F, upper: F) -> Result<()> {
        if lower >= upper {
            return Err(GpError::InvalidArgument(format!(
                "Invalid bounds [{}, {}] for parameter '{}'",
                lower, upper, self.name
            )));
        }
        if self.is_log && lower <= F::zero() {
            return Err(GpError::InvalidArgument(format!(
                "Parameter '{}' is strictly positive, lower bound must be > 0",
                self.name
            )));
        }
        self.bounds = (lower, upper);
        Ok(())
    }

    /// Current hyperprior, if any
    pub fn prior(&self) -> Option<&Prior<F>> {
        self.prior.as_ref()
    }

    /// Assign or clear the hyperprior
    pub fn set_prior(&mut self, prior: Option<Prior<F>>) {
        self.prior = prior;
    }

    /// Number of scalar components
    pub fn n_components(&self) -> usize {
        self.value.len()
    }

    /// Sum of prior log densities over all components
    pub(crate) fn log_prior(&self) -> F {
        match &self.prior {
            Some(p) => self.value.mapv(|v| p.log_pdf(v)).sum(),
            None => F::zero(),
        }
    }
}

impl<F: Float> fmt::Display for Parameter<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_positive_parameter_log() {
        let p = Parameter::positive("GP.noise_variance", 1.0f64);
        assert_eq!(p.value(), &array![1.0]);
        assert_eq!(p.log().unwrap(), array![0.0]);
    }

    #[test]
    fn test_real_parameter_log_fails() {
        let p = Parameter::real("Lin.coefficient", 0.5f64);
        assert!(matches!(p.log(), Err(GpError::InvalidOperation(_))));
    }

    #[test]
    fn test_set_value_enforces_bounds() {
        let mut p = Parameter::positive("SE.length_scales", 1.0f64);
        assert!(p.set_value(&[-1.0]).is_err());
        assert!(p.set_value(&[2.0]).is_ok());
        assert_eq!(p.scalar(), 2.0);
    }

    #[test]
    fn test_set_value_reshapes() {
        let mut p = Parameter::positive("SE.length_scales", 1.0f64);
        assert!(p.set_value(&[]).is_err());
        p.set_value(&[1.0, 2.0]).unwrap();
        assert_eq!(p.n_components(), 2);
    }

    #[test]
    fn test_set_log_roundtrip() {
        let mut p = Parameter::positive("SE.signal_variance", 1.0f64);
        p.set_log(&[-2.0]).unwrap();
        assert_abs_diff_eq!(p.scalar(), (-2.0f64).exp(), epsilon = 1e-15);
    }

    #[test]
    fn test_gaussian_prior_log_pdf() {
        let prior = Prior::Gaussian {
            mean: 0.0f64,
            variance: 1.0,
        };
        // standard normal at 0
        assert_abs_diff_eq!(
            prior.log_pdf(0.0),
            -0.5 * (2.0 * std::f64::consts::PI).ln(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(prior.d_log_pdf(1.5), -1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_delta_prior_pins() {
        let mut p = Parameter::positive("GP.noise_variance", 0.01f64);
        assert!(p.is_free());
        p.set_prior(Some(Prior::Delta));
        assert!(!p.is_free());
        assert_eq!(p.log_prior(), 0.0);
    }

    #[test]
    fn test_prior_from_name_unrecognized() {
        let res = Prior::<f64>::from_name("Gumbel", 0., 1.);
        assert!(matches!(res, Err(GpError::InvalidArgument(_))));
    }
}
