//! Observation likelihoods.
//!
//! Only the Gaussian likelihood is implemented; it owns the observation
//! noise variance as a hyperparameter. The non-Gaussian likelihoods of the
//! wider GP literature (logistic, Laplacian, Student's t) are recognized by
//! name but rejected, they have no closed-form posterior.

use crate::errors::{GpError, Result};
use crate::hyperparameters::Parameter;
use linfa::Float;

/// Lower bound for the observation noise variance, keeping the Gram matrix
/// invertible even for noise-free data.
pub const NOISE_FLOOR: f64 = 1e-12;
const NOISE_CEIL: f64 = 1e10;

/// Gaussian observation likelihood, y = f(x) + e with e ~ N(0, noise_variance)
#[derive(Clone, Debug)]
pub struct GaussianLikelihood<F: Float> {
    noise_variance: Parameter<F>,
}

impl<F: Float> Default for GaussianLikelihood<F> {
    fn default() -> Self {
        GaussianLikelihood::new(F::one())
    }
}

impl<F: Float> GaussianLikelihood<F> {
    /// Gaussian likelihood with the given initial noise variance
    pub fn new(noise_variance: F) -> GaussianLikelihood<F> {
        GaussianLikelihood {
            noise_variance: Parameter::positive_with_bounds(
                "GP.noise_variance",
                noise_variance,
                F::cast(NOISE_FLOOR),
                F::cast(NOISE_CEIL),
            ),
        }
    }

    /// Build a likelihood from its name, as accepted by the model
    /// configuration layer.
    pub fn from_name(name: &str) -> Result<GaussianLikelihood<F>> {
        match name {
            "Gaussian" => Ok(GaussianLikelihood::default()),
            "Logistic" | "Laplacian" | "Students t" => Err(GpError::NotSupported(format!(
                "Likelihood '{name}' is not supported. Only the Gaussian likelihood is supported."
            ))),
            _ => Err(GpError::InvalidArgument(format!(
                "Likelihood '{name}' not recognized"
            ))),
        }
    }

    /// The observation noise variance hyperparameter
    pub fn noise_variance(&self) -> &Parameter<F> {
        &self.noise_variance
    }

    /// Mutable access to the noise variance hyperparameter
    pub fn noise_variance_mut(&mut self) -> &mut Parameter<F> {
        &mut self.noise_variance
    }
}
