//! Gaussian process regression.
//!
//! A [`GaussianProcess`] is configured through [`GpParams`], fed training
//! data with [`GaussianProcess::set_training_data`], prepared with
//! [`GaussianProcess::setup`] and trained with
//! [`GaussianProcess::fit_model`], which maximizes the log marginal
//! likelihood over the free hyperparameters with a multistarted cobyla
//! search. Training inputs follow the column-sample convention: `x` has
//! shape (n_features, n_samples) and `y` has shape (n_labels, n_samples)
//! with a single label.
//!
//! ```no_run
//! use mpckit_gp::{GaussianProcess, Kernel};
//! use ndarray::array;
//!
//! let mut gp = GaussianProcess::params(&["x"], &["y"])
//!     .kernel(Kernel::squared_exponential())
//!     .noise_variance(0.1)
//!     .build()?;
//! gp.set_training_data(&array![[0.0, 0.5, 1.0, 1.5]], &array![[0.1, 0.6, 0.8, 0.4]])?;
//! gp.setup()?;
//! let report = gp.fit_model()?;
//! let (mean, variance) = gp.predict(&array![[0.25, 0.75]])?;
//! # Ok::<(), mpckit_gp::GpError>(())
//! ```

use crate::errors::{GpError, Result};
use crate::hyperparameters::Parameter;
use crate::inference::{ExactState, Inference};
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use crate::mean_models::Mean;
use crate::optimization::{into_f64, optimize_params, prepare_multistart, CobylaParams};
use crate::parameters::{GpConfig, GpParams};
use crate::utils::has_duplicate_columns;
use linfa::Float;
use ndarray::{arr1, Array1, Array2, ArrayBase, Data, Ix2};
use std::fmt;

/// Non-fatal conditions raised while mutating a model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpWarning {
    /// Training data changed on an already trained model
    RefitRequired,
    /// The number of samples changed since the last `setup()`
    SetupStale,
    /// No optimization restart converged
    NotConverged,
}

impl fmt::Display for GpWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GpWarning::RefitRequired => write!(
                f,
                "Gaussian process was already executed. Use the fit_model() method again to \
                 optimize with respect to the newly set training data."
            ),
            GpWarning::SetupStale => write!(
                f,
                "Dimensions of training data set changed. Please run setup() method again."
            ),
            GpWarning::NotConverged => write!(
                f,
                "Hyperparameter optimization did not converge. The best point found so far is \
                 kept."
            ),
        }
    }
}

/// Outcome of [`GaussianProcess::fit_model`]
#[derive(Clone, Debug)]
pub struct FitReport<F: Float> {
    /// Log marginal likelihood at the selected hyperparameters
    pub lml: F,
    /// Whether at least one optimization restart converged
    pub converged: bool,
}

/// Which model owns a free hyperparameter component
#[derive(Clone, Copy, Debug)]
enum Slot {
    Noise,
    Kernel(usize),
    Mean(usize),
}

/// One scalar entry of the optimization vector
#[derive(Clone, Debug)]
struct FreeComp {
    slot: Slot,
    comp: usize,
    is_log: bool,
    x0: f64,
    bounds: (f64, f64),
}

fn push_free_comps<F: Float>(layout: &mut Vec<FreeComp>, slot_of: impl Fn(usize) -> Slot, params: &[&Parameter<F>]) {
    for (pi, p) in params.iter().enumerate() {
        if !p.is_free() {
            continue;
        }
        let (lo, up) = p.bounds();
        let (lo, up) = (into_f64(&lo), into_f64(&up));
        for c in 0..p.n_components() {
            let v = into_f64(&p.value()[c]);
            let (x0, bounds) = if p.is_log() {
                (v.ln(), (lo.ln(), up.ln()))
            } else {
                (v, (lo, up))
            };
            layout.push(FreeComp {
                slot: slot_of(pi),
                comp: c,
                is_log: p.is_log(),
                x0,
                bounds,
            });
        }
    }
}

fn apply_free<F: Float>(
    x: &[f64],
    layout: &[FreeComp],
    likelihood: &mut GaussianLikelihood<F>,
    kernel: &mut Kernel<F>,
    mean: &mut Mean<F>,
) {
    for (xi, fc) in x.iter().zip(layout) {
        let v = if fc.is_log { xi.exp() } else { *xi };
        let v = F::cast(v);
        match fc.slot {
            Slot::Noise => likelihood.noise_variance_mut().set_component(fc.comp, v),
            Slot::Kernel(pi) => kernel.parameters_mut()[pi].set_component(fc.comp, v),
            Slot::Mean(pi) => mean.parameters_mut()[pi].set_component(fc.comp, v),
        }
    }
}

/// Gaussian process regression model with a Gaussian likelihood and exact
/// inference
#[derive(Clone, Debug)]
pub struct GaussianProcess<F: Float> {
    features: Vec<String>,
    labels: Vec<String>,
    mean: Mean<F>,
    kernel: Kernel<F>,
    likelihood: GaussianLikelihood<F>,
    inference: Inference,
    n_start: usize,
    max_eval: usize,
    nugget: F,
    seed: Option<u64>,
    x_train: Array2<F>,
    y_train: Array1<F>,
    is_setup: bool,
    is_fit: bool,
    setup_n_samples: usize,
    state: Option<ExactState<F>>,
}

impl<F: Float> GaussianProcess<F> {
    /// Start configuring a model for the named features and labels
    pub fn params(features: &[&str], labels: &[&str]) -> GpParams<F> {
        GpParams::new(features, labels)
    }

    pub(crate) fn from_config(config: GpConfig<F>) -> GaussianProcess<F> {
        let n_features = config.features.len();
        GaussianProcess {
            features: config.features,
            labels: config.labels,
            mean: config.mean,
            kernel: config.kernel,
            likelihood: config.likelihood,
            inference: config.inference,
            n_start: config.n_start,
            max_eval: config.max_eval,
            nugget: config.nugget,
            seed: config.seed,
            x_train: Array2::zeros((n_features, 0)),
            y_train: Array1::zeros(0),
            is_setup: false,
            is_fit: false,
            setup_n_samples: 0,
            state: None,
        }
    }

    /// Feature names
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Label names
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    /// Number of labels, always one
    pub fn n_labels(&self) -> usize {
        self.labels.len()
    }

    /// Training inputs, shape (n_features, n_samples)
    pub fn x_train(&self) -> &Array2<F> {
        &self.x_train
    }

    /// Training targets
    pub fn y_train(&self) -> &Array1<F> {
        &self.y_train
    }

    /// Whether `setup()` ran for the current training data
    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    /// Whether the model has been trained
    pub fn is_fit(&self) -> bool {
        self.is_fit
    }

    /// The covariance function of the prior
    pub fn kernel(&self) -> &Kernel<F> {
        &self.kernel
    }

    /// Mutable access to the covariance function
    pub fn kernel_mut(&mut self) -> &mut Kernel<F> {
        &mut self.kernel
    }

    /// The mean function of the prior
    pub fn mean(&self) -> &Mean<F> {
        &self.mean
    }

    /// Mutable access to the mean function
    pub fn mean_mut(&mut self) -> &mut Mean<F> {
        &mut self.mean
    }

    /// The observation noise variance hyperparameter
    pub fn noise_variance(&self) -> &Parameter<F> {
        self.likelihood.noise_variance()
    }

    /// Mutable access to the noise variance hyperparameter
    pub fn noise_variance_mut(&mut self) -> &mut Parameter<F> {
        self.likelihood.noise_variance_mut()
    }

    /// All hyperparameters in canonical order: noise variance, then kernel
    /// parameters in tree order, then mean parameters
    pub fn hyperparameters(&self) -> Vec<&Parameter<F>> {
        let mut out = vec![self.likelihood.noise_variance()];
        out.extend(self.kernel.parameters());
        out.extend(self.mean.parameters());
        out
    }

    /// Names of [`GaussianProcess::hyperparameters`] in the same order
    pub fn hyperparameter_names(&self) -> Vec<String> {
        self.hyperparameters()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    fn check_features_dim(&self, supplied: usize) -> Result<()> {
        if supplied != self.n_features() {
            return Err(GpError::DimensionMismatch(format!(
                "Dimension mismatch. Supplied dimension for the features is {supplied}, but \
                 required dimension is {}.",
                self.n_features()
            )));
        }
        Ok(())
    }

    fn check_labels_dim(&self, supplied: usize) -> Result<()> {
        if supplied != self.n_labels() {
            return Err(GpError::DimensionMismatch(format!(
                "Dimension mismatch. Supplied dimension for the labels is {supplied}, but \
                 required dimension is {}.",
                self.n_labels()
            )));
        }
        Ok(())
    }

    /// Warnings raised by replacing training data on a live model
    fn data_change_warnings(&self, n_samples: usize) -> Vec<GpWarning> {
        let mut warnings = vec![];
        if self.is_fit {
            warnings.push(GpWarning::RefitRequired);
        }
        if self.is_setup && n_samples != self.setup_n_samples {
            warnings.push(GpWarning::SetupStale);
        }
        for w in &warnings {
            log::warn!("{w}");
        }
        warnings
    }

    /// Replace both training inputs and targets. The previously trained
    /// model, if any, stays in place until `fit_model()` runs again; the
    /// returned warnings say so.
    pub fn set_training_data(
        &mut self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Vec<GpWarning>> {
        self.check_features_dim(x.nrows())?;
        self.check_labels_dim(y.nrows())?;
        if x.ncols() != y.ncols() {
            return Err(GpError::DimensionMismatch(
                "Number of observations in training matrix and target vector do not match!"
                    .to_string(),
            ));
        }
        let warnings = self.data_change_warnings(x.ncols());
        self.x_train = x.to_owned();
        self.y_train = y.row(0).to_owned();
        Ok(warnings)
    }

    /// Replace the training inputs only
    pub fn set_x_train(
        &mut self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Vec<GpWarning>> {
        self.check_features_dim(x.nrows())?;
        let warnings = self.data_change_warnings(x.ncols());
        self.x_train = x.to_owned();
        Ok(warnings)
    }

    /// Replace the training targets only
    pub fn set_y_train(
        &mut self,
        y: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Vec<GpWarning>> {
        self.check_labels_dim(y.nrows())?;
        let warnings = self.data_change_warnings(y.ncols());
        self.y_train = y.row(0).to_owned();
        Ok(warnings)
    }

    fn check_training_data(&self) -> Result<()> {
        if self.x_train.ncols() == 0 || self.y_train.is_empty() {
            return Err(GpError::NotReady(
                "The training data has not been set. Please run the method set_training_data() \
                 to proceed."
                    .to_string(),
            ));
        }
        if self.x_train.ncols() != self.y_train.len() {
            return Err(GpError::DimensionMismatch(
                "Number of observations in training matrix and target vector do not match!"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn check_setup(&self) -> Result<()> {
        self.check_training_data()?;
        if !self.is_setup {
            return Err(GpError::NotReady(
                "The Gaussian process has not been set up. Please run the setup() method to \
                 proceed."
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Prepare the model for the current training data: broadcast
    /// per-feature hyperparameters and sanity-check the inputs.
    pub fn setup(&mut self) -> Result<()> {
        self.check_training_data()?;
        self.kernel.broadcast_length_scales(self.n_features())?;
        self.mean.broadcast_coefficients(self.n_features())?;
        if has_duplicate_columns(&self.x_train) {
            log::warn!(
                "Duplicate samples found in the training data. The Gram matrix may be ill \
                 conditioned."
            );
        }
        self.setup_n_samples = self.x_train.ncols();
        self.is_setup = true;
        Ok(())
    }

    /// Log marginal likelihood of the training data at the current
    /// hyperparameters, hyperprior log densities included
    pub fn log_marginal_likelihood(&self) -> Result<F> {
        self.check_setup()?;
        let Inference::Exact(inference) = self.inference;
        let state = inference.posterior(
            &self.kernel,
            &self.mean,
            &self.likelihood,
            &self.x_train,
            &self.y_train,
            self.nugget,
        )?;
        Ok(state.lml)
    }

    /// Gradient of the log marginal likelihood wrt every hyperparameter
    /// component in canonical order. Components of log-scale parameters
    /// are differentiated wrt their logarithm.
    pub fn log_marginal_likelihood_gradient(&self) -> Result<Array1<F>> {
        self.check_setup()?;
        let Inference::Exact(inference) = self.inference;
        inference.lml_gradient(
            &self.kernel,
            &self.mean,
            &self.likelihood,
            &self.x_train,
            &self.y_train,
            self.nugget,
        )
    }

    /// Train the model by maximizing the log marginal likelihood over the
    /// free hyperparameters with a multistarted cobyla search. The best
    /// point over all restarts is committed once at the end; when no
    /// restart converges a warning is logged but the best finite point is
    /// still kept.
    pub fn fit_model(&mut self) -> Result<FitReport<F>> {
        self.check_setup()?;
        let Inference::Exact(inference) = self.inference;

        let mut layout = vec![];
        push_free_comps(&mut layout, |_| Slot::Noise, &[self.likelihood.noise_variance()]);
        push_free_comps(&mut layout, Slot::Kernel, &self.kernel.parameters());
        push_free_comps(&mut layout, Slot::Mean, &self.mean.parameters());

        let mut converged = true;
        if !layout.is_empty() {
            let x0 = arr1(&layout.iter().map(|fc| fc.x0).collect::<Vec<_>>());
            let bounds: Vec<(f64, f64)> = layout.iter().map(|fc| fc.bounds).collect();

            let base_kernel = self.kernel.clone();
            let base_mean = self.mean.clone();
            let base_lik = self.likelihood.clone();
            let x_train = self.x_train.clone();
            let y_train = self.y_train.clone();
            let nugget = self.nugget;
            let objfn = |x: &[f64], _grad: Option<&mut [f64]>, _u: &mut ()| -> f64 {
                let mut kernel = base_kernel.clone();
                let mut mean = base_mean.clone();
                let mut likelihood = base_lik.clone();
                apply_free(x, &layout, &mut likelihood, &mut kernel, &mut mean);
                match inference.posterior(&kernel, &mean, &likelihood, &x_train, &y_train, nugget)
                {
                    Ok(state) => -into_f64(&state.lml),
                    Err(_) => f64::INFINITY,
                }
            };

            let starts = prepare_multistart(self.n_start, &x0, &bounds, self.seed);
            let mut best: Option<(f64, Array1<f64>)> = None;
            let mut any_converged = false;
            for start in starts.rows() {
                let (fval, x_opt, run_converged) = optimize_params(
                    &objfn,
                    &start.to_owned(),
                    &bounds,
                    CobylaParams {
                        maxeval: self.max_eval,
                        ..CobylaParams::default()
                    },
                );
                any_converged |= run_converged;
                if best.as_ref().map(|(f, _)| fval < *f).unwrap_or(true) {
                    best = Some((fval, x_opt));
                }
            }
            converged = any_converged;
            match best {
                Some((fval, x_opt)) if fval.is_finite() => {
                    apply_free(
                        &x_opt.to_vec(),
                        &layout,
                        &mut self.likelihood,
                        &mut self.kernel,
                        &mut self.mean,
                    );
                }
                _ => converged = false,
            }
            if !converged {
                log::warn!("{}", GpWarning::NotConverged);
            }
        }

        let state = inference.posterior(
            &self.kernel,
            &self.mean,
            &self.likelihood,
            &self.x_train,
            &self.y_train,
            self.nugget,
        )?;
        let lml = state.lml;
        self.state = Some(state);
        self.is_fit = true;
        Ok(FitReport { lml, converged })
    }

    /// Posterior predictive mean and variance of the latent function at
    /// the sample columns of `x_new`. Requires a trained model.
    pub fn predict(
        &self,
        x_new: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        self.check_features_dim(x_new.nrows())?;
        let state = self.state.as_ref().filter(|_| self.is_fit).ok_or_else(|| {
            GpError::NotReady(
                "The Gaussian process has not been fitted. Please run the fit_model() method \
                 to proceed."
                    .to_string(),
            )
        })?;
        if state.alpha.len() != self.x_train.ncols() {
            return Err(GpError::NotReady(
                "The training data changed since the last fit. Please run the fit_model() \
                 method again to proceed."
                    .to_string(),
            ));
        }
        let Inference::Exact(inference) = self.inference;
        inference.predict(&self.kernel, &self.mean, state, &self.x_train, x_new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::Prior;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::{Distribution, Normal};
    use rand_xoshiro::Xoshiro256Plus;

    fn training_data() -> (Array2<f64>, Array2<f64>) {
        let x = array![[0.0, 0.3, 0.7, 1.1, 1.6, 2.2, 2.9]];
        let y = x.mapv(|v: f64| (2.0 * v).sin());
        (x, y)
    }

    fn ready_gp() -> GaussianProcess<f64> {
        let mut gp = GaussianProcess::params(&["x"], &["y"])
            .noise_variance(0.1)
            .n_start(2)
            .max_eval(100)
            .seed(42)
            .build()
            .unwrap();
        let (x, y) = training_data();
        gp.set_training_data(&x, &y).unwrap();
        gp.setup().unwrap();
        gp
    }

    #[test]
    fn test_default_hyperparameter_order() {
        let gp = GaussianProcess::<f64>::params(&["x"], &["y"]).build().unwrap();
        assert_eq!(
            gp.hyperparameter_names(),
            vec!["GP.noise_variance", "SE.length_scales", "SE.signal_variance"]
        );
    }

    #[test]
    fn test_training_data_dimension_mismatch() {
        let mut gp = GaussianProcess::<f64>::params(&["x"], &["y"]).build().unwrap();
        let err = gp
            .set_training_data(&array![[0.0], [1.0]], &array![[0.5]])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Dimension mismatch. Supplied dimension for the features is 2, but required \
             dimension is 1."
        );
        let err = gp
            .set_training_data(&array![[0.0]], &array![[0.5], [0.6]])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Dimension mismatch. Supplied dimension for the labels is 2, but required \
             dimension is 1."
        );
    }

    #[test]
    fn test_observation_count_mismatch() {
        let mut gp = GaussianProcess::<f64>::params(&["x"], &["y"]).build().unwrap();
        let err = gp
            .set_training_data(&array![[0.0, 1.0]], &array![[0.5]])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Number of observations in training matrix and target vector do not match!"
        );
    }

    #[test]
    fn test_setup_requires_training_data() {
        let mut gp = GaussianProcess::<f64>::params(&["x"], &["y"]).build().unwrap();
        let err = gp.setup().unwrap_err();
        assert_eq!(
            err.to_string(),
            "The training data has not been set. Please run the method set_training_data() to \
             proceed."
        );
    }

    #[test]
    fn test_predict_requires_fit() {
        let gp = ready_gp();
        let err = gp.predict(&array![[0.5]]).unwrap_err();
        assert!(matches!(err, GpError::NotReady(_)));
    }

    #[test]
    fn test_setup_broadcasts_length_scales() {
        let mut gp = GaussianProcess::<f64>::params(&["x1", "x2"], &["y"])
            .build()
            .unwrap();
        gp.set_training_data(
            &array![[0.0, 1.0, 2.0], [0.5, 0.1, 0.9]],
            &array![[0.1, 0.4, 0.2]],
        )
        .unwrap();
        gp.setup().unwrap();
        let hyperparameters = gp.hyperparameters();
        let lengths = hyperparameters[1];
        assert_eq!(lengths.name(), "SE.length_scales");
        assert_eq!(lengths.n_components(), 2);
    }

    #[test]
    fn test_predict_rejects_stale_training_data() {
        let mut gp = ready_gp();
        gp.fit_model().unwrap();
        gp.set_training_data(&array![[0.0, 1.0]], &array![[0.1, 0.4]])
            .unwrap();
        let err = gp.predict(&array![[0.5]]).unwrap_err();
        assert!(matches!(err, GpError::NotReady(_)));
        assert_eq!(
            err.to_string(),
            "The training data changed since the last fit. Please run the fit_model() method \
             again to proceed."
        );
    }

    #[test]
    fn test_refit_warnings() {
        let mut gp = ready_gp();
        gp.fit_model().unwrap();
        let (x, y) = training_data();
        // same shape: only the refit warning
        let warnings = gp.set_training_data(&x, &y).unwrap();
        assert_eq!(warnings, vec![GpWarning::RefitRequired]);
        // changed sample count: refit and stale-setup warnings
        let warnings = gp
            .set_training_data(&array![[0.0, 1.0]], &array![[0.1, 0.4]])
            .unwrap();
        assert_eq!(
            warnings,
            vec![GpWarning::RefitRequired, GpWarning::SetupStale]
        );
    }

    #[test]
    fn test_fit_improves_log_marginal_likelihood() {
        let mut gp = ready_gp();
        let before = gp.log_marginal_likelihood().unwrap();
        let report = gp.fit_model().unwrap();
        assert!(report.converged);
        assert!(report.lml >= before - 1e-9);
        assert_abs_diff_eq!(
            report.lml,
            gp.log_marginal_likelihood().unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_fit_and_predict_smooth_function() {
        let mut gp = ready_gp();
        gp.fit_model().unwrap();
        let (x, y) = training_data();
        let (pred, var) = gp.predict(&x).unwrap();
        for i in 0..x.ncols() {
            assert_abs_diff_eq!(pred[i], y[[0, i]], epsilon = 0.2);
            assert!(var[i] >= 0.);
        }
    }

    #[test]
    fn test_exhausted_budget_keeps_best_point() {
        let mut gp = GaussianProcess::params(&["x"], &["y"])
            .noise_variance(0.1)
            .n_start(1)
            .max_eval(4)
            .seed(7)
            .build()
            .unwrap();
        let (x, y) = training_data();
        gp.set_training_data(&x, &y).unwrap();
        gp.setup().unwrap();
        let report = gp.fit_model().unwrap();
        assert!(!report.converged);
        assert!(report.lml.is_finite());
        // the partially optimized model is still usable
        let (_, var) = gp.predict(&array![[0.5]]).unwrap();
        assert!(var[0] >= 0.);
    }

    #[test]
    fn test_noise_recovery() {
        // noisy samples of a smooth function, fitted noise should land in
        // the right order of magnitude
        let mut rng = Xoshiro256Plus::seed_from_u64(17);
        let noise = Normal::new(0.0, 0.1).unwrap();
        let n = 30;
        let x = Array2::from_shape_fn((1, n), |(_, j)| 3.0 * j as f64 / n as f64);
        let y = Array2::from_shape_fn((1, n), |(_, j)| {
            (2.0 * x[[0, j]]).sin() + noise.sample(&mut rng)
        });
        let mut gp = GaussianProcess::params(&["x"], &["y"])
            .noise_variance(1.0)
            .n_start(4)
            .max_eval(200)
            .seed(3)
            .build()
            .unwrap();
        gp.set_training_data(&x, &y).unwrap();
        gp.setup().unwrap();
        gp.fit_model().unwrap();
        let fitted = gp.noise_variance().scalar();
        assert!(
            (1e-4..0.1).contains(&fitted),
            "fitted noise variance {fitted} is implausible"
        );
    }

    /// Normal deviates from a Lehmer generator (Schrage multiplication)
    /// fed through a Box-Muller transform. Reproduces a fixed data set
    /// bit for bit on every platform, unlike library samplers.
    fn portable_randn(seed: f64, n: usize) -> Array1<f64> {
        let total = (n + 1) / 2 * 2;
        let (a, m): (f64, f64) = (16807.0, 2147483647.0);
        let q = (m / a).trunc();
        let r = m % a;
        let mut state = (seed * 2f64.powi(31)).trunc();
        let mut u = Vec::with_capacity(total);
        for _ in 0..total {
            state = a * (state % q) - r * (state / q).trunc();
            if state < 0.0 {
                state += m;
            }
            u.push(state / 2f64.powi(31));
        }
        let half = total / 2;
        let mut out = Vec::with_capacity(total);
        for i in 0..half {
            let w = (-2.0 * u[i].ln()).sqrt();
            out.push(w * (2.0 * std::f64::consts::PI * u[half + i]).cos());
        }
        for i in 0..half {
            let w = (-2.0 * u[i].ln()).sqrt();
            out.push(w * (2.0 * std::f64::consts::PI * u[half + i]).sin());
        }
        out.truncate(n);
        arr1(&out)
    }

    #[test]
    fn test_fit_recovers_known_optimum() {
        // y = sin(3x) + 0.1*noise on a fixed 20-sample draw. The optimum
        // of the marginal likelihood for this data set under the default
        // squared exponential kernel is known from an independent
        // implementation; a derivative-free search should land close to
        // it from the default initial point.
        let n = 20;
        let xs = portable_randn(0.8, n);
        let noise = portable_randn(0.9, n);
        let x = Array2::from_shape_fn((1, n), |(_, j)| xs[j]);
        let y = Array2::from_shape_fn((1, n), |(_, j)| (3.0 * xs[j]).sin() + 0.1 * noise[j]);

        let mut gp = GaussianProcess::params(&["x"], &["y"])
            .noise_variance((-2.0f64).exp())
            .n_start(4)
            .max_eval(500)
            .seed(1)
            .build()
            .unwrap();
        gp.set_training_data(&x, &y).unwrap();
        gp.setup().unwrap();
        let report = gp.fit_model().unwrap();
        assert!(report.converged);

        let reference = [0.0085251, 0.5298217, 0.8114553];
        let fitted = [
            gp.noise_variance().scalar(),
            gp.hyperparameters()[1].scalar(),
            gp.hyperparameters()[2].scalar(),
        ];
        for (&f, &r) in fitted.iter().zip(reference.iter()) {
            assert_abs_diff_eq!(f, r, epsilon = 0.1 * r);
        }

        // the reached likelihood must be essentially the optimal one
        let mut at_reference = gp.clone();
        at_reference
            .noise_variance_mut()
            .set_component(0, reference[0]);
        at_reference.kernel_mut().parameters_mut()[0].set_component(0, reference[1]);
        at_reference.kernel_mut().parameters_mut()[1].set_component(0, reference[2]);
        let lml_reference = at_reference.log_marginal_likelihood().unwrap();
        assert!(report.lml >= lml_reference - 0.05);
    }

    #[test]
    fn test_delta_prior_pins_noise() {
        let mut gp = ready_gp();
        gp.noise_variance_mut().set_prior(Some(Prior::Delta));
        gp.fit_model().unwrap();
        assert_abs_diff_eq!(gp.noise_variance().scalar(), 0.1, epsilon = 0.);
    }

    #[test]
    fn test_fixed_parameter_not_moved() {
        let mut gp = GaussianProcess::params(&["x"], &["y"])
            .kernel(
                Kernel::matern_32()
                    .with_param("length_scales", 0.25)
                    .unwrap()
                    .fix_param("length_scales")
                    .unwrap(),
            )
            .noise_variance(0.05)
            .n_start(2)
            .max_eval(100)
            .seed(5)
            .build()
            .unwrap();
        let (x, y) = training_data();
        gp.set_training_data(&x, &y).unwrap();
        gp.setup().unwrap();
        gp.fit_model().unwrap();
        assert_abs_diff_eq!(gp.hyperparameters()[1].scalar(), 0.25, epsilon = 0.);
    }

    #[test]
    fn test_gradient_available_after_setup() {
        let gp = ready_gp();
        let grad = gp.log_marginal_likelihood_gradient().unwrap();
        assert_eq!(grad.len(), gp.hyperparameters().len());
    }

    /// Optimizer-space representation of every hyperparameter component
    fn flat_hyperparameters(gp: &GaussianProcess<f64>) -> Array1<f64> {
        let mut flat = vec![];
        for p in gp.hyperparameters() {
            for c in 0..p.n_components() {
                let v = p.value()[c];
                flat.push(if p.is_log() { v.ln() } else { v });
            }
        }
        arr1(&flat)
    }

    fn set_flat_hyperparameters(gp: &mut GaussianProcess<f64>, flat: &Array1<f64>) {
        let mut i = 0;
        let mut params = vec![gp.likelihood.noise_variance_mut()];
        params.extend(gp.kernel.parameters_mut());
        params.extend(gp.mean.parameters_mut());
        for p in params {
            for c in 0..p.n_components() {
                let v = if p.is_log() { flat[i].exp() } else { flat[i] };
                p.set_component(c, v);
                i += 1;
            }
        }
    }

    #[test]
    fn test_lml_gradient_matches_finite_differences() {
        use finitediff::FiniteDiff;
        let mut gp = GaussianProcess::params(&["x"], &["y"])
            .kernel(Kernel::matern_52() + Kernel::linear())
            .mean(Mean::linear(0.3))
            .noise_variance(0.2)
            .build()
            .unwrap();
        let (x, y) = training_data();
        gp.set_training_data(&x, &y).unwrap();
        gp.setup().unwrap();

        let grad = gp.log_marginal_likelihood_gradient().unwrap();
        let x0 = flat_hyperparameters(&gp);
        let f = |flat: &Array1<f64>| {
            let mut gp = gp.clone();
            set_flat_hyperparameters(&mut gp, flat);
            gp.log_marginal_likelihood().unwrap()
        };
        let fd = x0.central_diff(&f);
        assert_eq!(grad.len(), fd.len());
        for (&g, &d) in grad.iter().zip(fd.iter()) {
            assert_abs_diff_eq!(g, d, epsilon = 1e-4 * (1. + d.abs()));
        }
    }

    #[test]
    fn test_composite_kernel_and_mean_fit() {
        let mut gp = GaussianProcess::params(&["x"], &["y"])
            .kernel(Kernel::squared_exponential() + Kernel::linear())
            .mean(Mean::linear(0.5) + Mean::one())
            .noise_variance(0.1)
            .n_start(2)
            .max_eval(150)
            .seed(11)
            .build()
            .unwrap();
        let (x, y) = training_data();
        gp.set_training_data(&x, &y).unwrap();
        gp.setup().unwrap();
        let before = gp.log_marginal_likelihood().unwrap();
        let report = gp.fit_model().unwrap();
        assert!(report.lml >= before - 1e-9);
    }
}
