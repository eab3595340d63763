//! Inference over the latent function.
//!
//! With a Gaussian likelihood the posterior is available in closed form and
//! [`ExactInference`] computes it through a Cholesky factorization of the
//! noisy Gram matrix. The approximate inference schemes of the wider GP
//! literature (Laplace, expectation propagation, variational Bayes,
//! Kullback-Leibler) are recognized by name but not implemented.

use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use crate::mean_models::Mean;
use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};

/// Attempts of the jitter ladder before giving up on the factorization
const MAX_JITTER_ATTEMPTS: usize = 6;

/// Posterior quantities cached after a successful factorization
#[derive(Clone, Debug)]
pub(crate) struct ExactState<F: Float> {
    /// Lower Cholesky factor of the noisy Gram matrix
    pub(crate) l: Array2<F>,
    /// Weights alpha = K_y^-1 (y - m)
    pub(crate) alpha: Array1<F>,
    /// Log marginal likelihood at the current hyperparameters, including
    /// the hyperprior log densities
    pub(crate) lml: F,
}

/// Exact Gaussian process inference
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExactInference;

/// Inference scheme selected for a GP model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inference {
    /// Closed-form posterior via Cholesky factorization
    Exact(ExactInference),
}

impl Default for Inference {
    fn default() -> Self {
        Inference::Exact(ExactInference)
    }
}

impl Inference {
    /// Build an inference scheme from its name. Only `"exact"`
    /// (case-insensitive) resolves.
    pub fn from_name(name: &str) -> Result<Inference> {
        if name.eq_ignore_ascii_case("exact") {
            return Ok(Inference::Exact(ExactInference));
        }
        match name {
            "Laplace" | "Expectation propagation" | "Variational Bayes" | "Kullback Leibler" => {
                Err(GpError::NotImplemented(format!(
                    "Inference method '{name}' is not implemented. Only exact inference is supported."
                )))
            }
            _ => Err(GpError::InvalidArgument(format!(
                "Inference '{name}' not recognized"
            ))),
        }
    }
}

/// Laplace approximation, unavailable with a Gaussian-only likelihood
#[derive(Debug)]
pub struct LaplaceInference;

impl LaplaceInference {
    /// Always fails, the approximation is not implemented
    pub fn new() -> Result<LaplaceInference> {
        Err(GpError::NotImplemented(
            "Inference method 'Laplace' is not implemented. Only exact inference is supported."
                .to_string(),
        ))
    }
}

/// Expectation propagation, unavailable with a Gaussian-only likelihood
#[derive(Debug)]
pub struct ExpectationPropagationInference;

impl ExpectationPropagationInference {
    /// Always fails, the approximation is not implemented
    pub fn new() -> Result<ExpectationPropagationInference> {
        Err(GpError::NotImplemented(
            "Inference method 'Expectation propagation' is not implemented. \
             Only exact inference is supported."
                .to_string(),
        ))
    }
}

/// Variational Bayes, unavailable with a Gaussian-only likelihood
#[derive(Debug)]
pub struct VariationalBayesInference;

impl VariationalBayesInference {
    /// Always fails, the approximation is not implemented
    pub fn new() -> Result<VariationalBayesInference> {
        Err(GpError::NotImplemented(
            "Inference method 'Variational Bayes' is not implemented. \
             Only exact inference is supported."
                .to_string(),
        ))
    }
}

/// Kullback-Leibler minimization, unavailable with a Gaussian-only likelihood
#[derive(Debug)]
pub struct KullbackLeiblerInference;

impl KullbackLeiblerInference {
    /// Always fails, the approximation is not implemented
    pub fn new() -> Result<KullbackLeiblerInference> {
        Err(GpError::NotImplemented(
            "Inference method 'Kullback Leibler' is not implemented. \
             Only exact inference is supported."
                .to_string(),
        ))
    }
}

/// Cholesky factorization with a jitter ladder: on failure, add a small
/// multiple of the mean diagonal to the diagonal and retry with a tenfold
/// increase per attempt.
fn cholesky_with_jitter<F: Float>(ky: &Array2<F>) -> Result<Array2<F>> {
    if let Ok(l) = ky.cholesky() {
        return Ok(l);
    }
    let n = ky.nrows();
    let scale = ky.diag().sum() / F::cast(n.max(1) as f64);
    let mut jitter = F::cast(1e-10) * scale;
    for _ in 0..MAX_JITTER_ATTEMPTS {
        let mut kj = ky.clone();
        for d in kj.diag_mut() {
            *d = *d + jitter;
        }
        if let Ok(l) = kj.cholesky() {
            log::debug!("Gram matrix factorized after adding jitter {:?}", jitter);
            return Ok(l);
        }
        jitter = jitter * F::cast(10.);
    }
    Err(GpError::NumericalInstability(
        "Cholesky factorization of the Gram matrix failed even with jitter added to the diagonal"
            .to_string(),
    ))
}

impl ExactInference {
    /// Noisy Gram matrix K + (noise_variance + nugget) I
    fn noisy_gram<F: Float>(
        kernel: &Kernel<F>,
        likelihood: &GaussianLikelihood<F>,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        nugget: F,
    ) -> Result<Array2<F>> {
        let mut ky = kernel.gram(x)?;
        let bump = likelihood.noise_variance().scalar() + nugget;
        for d in ky.diag_mut() {
            *d = *d + bump;
        }
        Ok(ky)
    }

    /// Sum of hyperprior log densities over all model hyperparameters
    fn log_prior_sum<F: Float>(
        kernel: &Kernel<F>,
        mean: &Mean<F>,
        likelihood: &GaussianLikelihood<F>,
    ) -> F {
        let mut sum = likelihood.noise_variance().log_prior();
        for p in kernel.parameters() {
            sum = sum + p.log_prior();
        }
        for p in mean.parameters() {
            sum = sum + p.log_prior();
        }
        sum
    }

    /// Factorize the posterior and evaluate the log marginal likelihood
    /// at the current hyperparameters.
    pub(crate) fn posterior<F: Float>(
        &self,
        kernel: &Kernel<F>,
        mean: &Mean<F>,
        likelihood: &GaussianLikelihood<F>,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &Array1<F>,
        nugget: F,
    ) -> Result<ExactState<F>> {
        let n = x.ncols();
        let ky = Self::noisy_gram(kernel, likelihood, x, nugget)?;
        let l = cholesky_with_jitter(&ky)?;

        let m = mean.value(x)?;
        let r = (y - &m).into_shape((n, 1)).map_err(|e| {
            GpError::InvalidOperation(format!("residual reshape failed: {e}"))
        })?;
        let rho = l.solve_triangular(&r, UPLO::Lower)?;
        let alpha2 = l.t().solve_triangular_into(rho, UPLO::Upper)?;
        let alpha = alpha2.column(0).to_owned();

        let half = F::cast(0.5);
        let fit = (y - &m).dot(&alpha);
        let log_det = l.diag().mapv(|d| d.ln()).sum();
        let norm = F::cast(n as f64) * half * F::cast((2. * std::f64::consts::PI).ln());
        let lml = -half * fit - log_det - norm + Self::log_prior_sum(kernel, mean, likelihood);
        Ok(ExactState { l, alpha, lml })
    }

    /// Gradient of the log marginal likelihood (hyperpriors included) wrt
    /// every hyperparameter component in canonical order: noise variance,
    /// then kernel parameters in tree order, then mean parameters.
    /// Components of log-scale parameters are differentiated wrt their
    /// logarithm.
    pub(crate) fn lml_gradient<F: Float>(
        &self,
        kernel: &Kernel<F>,
        mean: &Mean<F>,
        likelihood: &GaussianLikelihood<F>,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &Array1<F>,
        nugget: F,
    ) -> Result<Array1<F>> {
        let n = x.ncols();
        let ky = Self::noisy_gram(kernel, likelihood, x, nugget)?;
        let l = cholesky_with_jitter(&ky)?;

        let (m, mean_grads) = mean.value_and_param_grads(x)?;
        let r = (y - &m).into_shape((n, 1)).map_err(|e| {
            GpError::InvalidOperation(format!("residual reshape failed: {e}"))
        })?;
        let rho = l.solve_triangular(&r, UPLO::Lower)?;
        let alpha = l
            .t()
            .solve_triangular_into(rho, UPLO::Upper)?
            .column(0)
            .to_owned();
        let kinv = l.t().solve_triangular_into(
            l.solve_triangular(&Array2::eye(n), UPLO::Lower)?,
            UPLO::Upper,
        )?;

        let (_, kernel_grads) = kernel.value_and_grads(x, x)?;

        let half = F::cast(0.5);
        let mut grad = Vec::with_capacity(1 + kernel_grads.len() + mean_grads.len());

        // noise variance, dK_y/dsigma_n^2 = I
        let noise = likelihood.noise_variance();
        let sn2 = noise.scalar();
        let trace: F = kinv.diag().sum();
        let mut g = half * (alpha.dot(&alpha) - trace);
        if let Some(p) = noise.prior() {
            g = g + p.d_log_pdf(sn2);
        }
        grad.push(g * sn2);

        // kernel parameters via the trace identity
        let mut idx = 0;
        for p in kernel.parameters() {
            for c in 0..p.n_components() {
                let dk = &kernel_grads[idx];
                let quad = alpha.dot(&dk.dot(&alpha));
                let trace = (&kinv * dk).sum();
                let mut g = half * (quad - trace);
                let v = p.value()[c];
                if let Some(prior) = p.prior() {
                    g = g + prior.d_log_pdf(v);
                }
                if p.is_log() {
                    g = g * v;
                }
                grad.push(g);
                idx += 1;
            }
        }

        // mean parameters enter only through the residual
        let mut idx = 0;
        for p in mean.parameters() {
            for c in 0..p.n_components() {
                let mut g = alpha.dot(&mean_grads[idx]);
                let v = p.value()[c];
                if let Some(prior) = p.prior() {
                    g = g + prior.d_log_pdf(v);
                }
                if p.is_log() {
                    g = g * v;
                }
                grad.push(g);
                idx += 1;
            }
        }

        Ok(Array1::from_vec(grad))
    }

    /// Posterior predictive mean and variance at the sample columns of
    /// `x_new`. The variance is that of the latent function, clipped at
    /// zero against roundoff.
    pub(crate) fn predict<F: Float>(
        &self,
        kernel: &Kernel<F>,
        mean: &Mean<F>,
        state: &ExactState<F>,
        x_train: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x_new: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        let n_new = x_new.ncols();
        let ks = kernel.value(x_train, x_new)?;
        let m_new = mean.value(x_new)?;
        let pred_mean = &m_new + &ks.t().dot(&state.alpha);

        let v = state.l.solve_triangular(&ks, UPLO::Lower)?;
        let mut pred_var = Array1::zeros(n_new);
        for j in 0..n_new {
            let col = x_new.column(j).insert_axis(ndarray::Axis(1));
            let kss = kernel.value(&col, &col)?[[0, 0]];
            let explained = v.column(j).dot(&v.column(j));
            pred_var[j] = (kss - explained).max(F::zero());
        }
        Ok((pred_mean, pred_var))
    }
}
