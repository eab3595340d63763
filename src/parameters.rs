//! Configuration of a Gaussian process model before training.
//!
//! [`GpParams`] collects the pieces of a model (feature/label names, mean
//! function, kernel, likelihood, inference scheme, optimizer settings) and
//! validates them in [`GpParams::build`]. Likelihood and inference are
//! selected by name so that configuration errors surface as typed errors
//! rather than panics.

use crate::algorithm::GaussianProcess;
use crate::errors::{GpError, Result};
use crate::hyperparameters::Prior;
use crate::inference::Inference;
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use crate::mean_models::Mean;
use linfa::Float;

/// Default number of optimization restarts
pub const DEFAULT_N_START: usize = 10;
/// Default cobyla evaluation budget per restart
pub const DEFAULT_MAX_EVAL: usize = 200;

/// Builder for a [`GaussianProcess`]
pub struct GpParams<F: Float> {
    features: Vec<String>,
    labels: Vec<String>,
    mean: Mean<F>,
    kernel: Kernel<F>,
    likelihood_name: String,
    inference_name: String,
    noise_variance: F,
    hyperprior: Option<(String, F, F)>,
    solver_name: String,
    n_start: usize,
    max_eval: usize,
    nugget: F,
    seed: Option<u64>,
}

impl<F: Float> GpParams<F> {
    /// Start a configuration for the named features and labels
    pub fn new(features: &[&str], labels: &[&str]) -> GpParams<F> {
        GpParams {
            features: features.iter().map(|s| s.to_string()).collect(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            mean: Mean::default(),
            kernel: Kernel::default(),
            likelihood_name: "Gaussian".to_string(),
            inference_name: "exact".to_string(),
            noise_variance: F::one(),
            hyperprior: None,
            solver_name: "COBYLA".to_string(),
            n_start: DEFAULT_N_START,
            max_eval: DEFAULT_MAX_EVAL,
            // nugget added to the Gram matrix diagonal unconditionally
            nugget: F::cast(100.0) * F::epsilon(),
            seed: None,
        }
    }

    /// Set the mean function of the prior (default: zero)
    pub fn mean(mut self, mean: Mean<F>) -> Self {
        self.mean = mean;
        self
    }

    /// Set the covariance function of the prior
    /// (default: squared exponential)
    pub fn kernel(mut self, kernel: Kernel<F>) -> Self {
        self.kernel = kernel;
        self
    }

    /// Select the observation likelihood by name (default: `"Gaussian"`)
    pub fn likelihood(mut self, name: &str) -> Self {
        self.likelihood_name = name.to_string();
        self
    }

    /// Select the inference scheme by name (default: `"exact"`)
    pub fn inference(mut self, name: &str) -> Self {
        self.inference_name = name.to_string();
        self
    }

    /// Set the initial observation noise variance (default: 1)
    pub fn noise_variance(mut self, noise_variance: F) -> Self {
        self.noise_variance = noise_variance;
        self
    }

    /// Put the named hyperprior with the given mean and variance on every
    /// hyperparameter that has none of its own
    pub fn hyperprior(mut self, name: &str, mean: F, variance: F) -> Self {
        self.hyperprior = Some((name.to_string(), mean, variance));
        self
    }

    /// Select the hyperparameter solver by name (default: `"COBYLA"`,
    /// the only backend)
    pub fn solver(mut self, name: &str) -> Self {
        self.solver_name = name.to_string();
        self
    }

    /// Set the number of optimization restarts (default: 10)
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.n_start = n_start;
        self
    }

    /// Set the cobyla evaluation budget per restart (default: 200)
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.max_eval = max_eval;
        self
    }

    /// Set the nugget added to the Gram matrix diagonal
    /// (default: 100 * machine epsilon)
    pub fn nugget(mut self, nugget: F) -> Self {
        self.nugget = nugget;
        self
    }

    /// Seed the multistart random number generator for reproducible fits
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the configuration and build the model
    pub fn build(self) -> Result<GaussianProcess<F>> {
        if self.features.is_empty() {
            return Err(GpError::InvalidArgument(
                "At least one feature is required.".to_string(),
            ));
        }
        if self.labels.is_empty() {
            return Err(GpError::InvalidArgument(
                "At least one label is required.".to_string(),
            ));
        }
        if self.labels.len() > 1 {
            return Err(GpError::InvalidArgument(
                "Training a GP on multiple labels is not supported. Please use 'MultiOutputGP' \
                 to train GPs on multiple labels."
                    .to_string(),
            ));
        }
        if !self.solver_name.eq_ignore_ascii_case("COBYLA") {
            return Err(GpError::InvalidArgument(format!(
                "Solver '{}' not recognized",
                self.solver_name
            )));
        }
        let mut likelihood = GaussianLikelihood::from_name(&self.likelihood_name)?;
        likelihood
            .noise_variance_mut()
            .set_value(&[self.noise_variance])?;
        let inference = Inference::from_name(&self.inference_name)?;

        let mut kernel = self.kernel;
        let mut mean = self.mean;
        if let Some((name, prior_mean, prior_variance)) = self.hyperprior {
            let prior = Prior::from_name(&name, prior_mean, prior_variance)?;
            if likelihood.noise_variance().prior().is_none() {
                likelihood.noise_variance_mut().set_prior(Some(prior.clone()));
            }
            for p in kernel.parameters_mut() {
                if p.prior().is_none() {
                    p.set_prior(Some(prior.clone()));
                }
            }
            for p in mean.parameters_mut() {
                if p.prior().is_none() {
                    p.set_prior(Some(prior.clone()));
                }
            }
        }

        Ok(GaussianProcess::from_config(GpConfig {
            features: self.features,
            labels: self.labels,
            mean,
            kernel,
            likelihood,
            inference,
            n_start: self.n_start,
            max_eval: self.max_eval,
            nugget: self.nugget,
            seed: self.seed,
        }))
    }
}

/// Validated configuration handed to the model constructor
pub(crate) struct GpConfig<F: Float> {
    pub(crate) features: Vec<String>,
    pub(crate) labels: Vec<String>,
    pub(crate) mean: Mean<F>,
    pub(crate) kernel: Kernel<F>,
    pub(crate) likelihood: GaussianLikelihood<F>,
    pub(crate) inference: Inference,
    pub(crate) n_start: usize,
    pub(crate) max_eval: usize,
    pub(crate) nugget: F,
    pub(crate) seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_build() {
        let gp = GpParams::<f64>::new(&["x"], &["y"]).build().unwrap();
        assert_eq!(gp.n_features(), 1);
        assert_eq!(gp.n_labels(), 1);
        // noise variance + SE length scale + SE signal variance
        assert_eq!(gp.hyperparameters().len(), 3);
        assert_eq!(gp.noise_variance().scalar(), 1.0);
        assert_eq!(gp.noise_variance().log().unwrap()[0], 0.0);
        assert_eq!(gp.noise_variance().name(), "GP.noise_variance");
    }

    #[test]
    fn test_multiple_labels_rejected() {
        let err = GpParams::<f64>::new(&["x"], &["y1", "y2"])
            .build()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Training a GP on multiple labels is not supported. Please use 'MultiOutputGP' \
             to train GPs on multiple labels."
        );
    }

    #[test]
    fn test_unknown_likelihood_and_inference() {
        let err = GpParams::<f64>::new(&["x"], &["y"])
            .likelihood("Cauchy")
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "Likelihood 'Cauchy' not recognized");

        let err = GpParams::<f64>::new(&["x"], &["y"])
            .inference("sampling")
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "Inference 'sampling' not recognized");
    }

    #[test]
    fn test_unsupported_likelihood_and_inference() {
        let err = GpParams::<f64>::new(&["x"], &["y"])
            .likelihood("Students t")
            .build()
            .unwrap_err();
        assert!(matches!(err, GpError::NotSupported(_)));

        let err = GpParams::<f64>::new(&["x"], &["y"])
            .inference("Variational Bayes")
            .build()
            .unwrap_err();
        assert!(matches!(err, GpError::NotImplemented(_)));
    }

    #[test]
    fn test_unknown_solver() {
        let err = GpParams::<f64>::new(&["x"], &["y"])
            .solver("L-BFGS-B")
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "Solver 'L-BFGS-B' not recognized");
        assert!(GpParams::<f64>::new(&["x"], &["y"])
            .solver("cobyla")
            .build()
            .is_ok());
    }

    #[test]
    fn test_hyperprior_applied_to_all_free_params() {
        let gp = GpParams::<f64>::new(&["x"], &["y"])
            .hyperprior("Gaussian", 0.0, 1.0)
            .build()
            .unwrap();
        for p in gp.hyperparameters() {
            assert!(p.prior().is_some());
        }
    }

    #[test]
    fn test_unknown_hyperprior() {
        let err = GpParams::<f64>::new(&["x"], &["y"])
            .hyperprior("Cauchy", 0.0, 1.0)
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "Hyperprior 'Cauchy' not recognized");
    }
}
