//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process)
//! regression for model predictive control and estimation toolchains, where
//! GPs serve as learned plant models or residual models.
//!
//! A model is assembled from a mean function ([Mean]), a covariance
//! function ([Kernel]), a Gaussian observation likelihood and an exact
//! inference scheme, then trained by maximizing the log marginal
//! likelihood over its hyperparameters with a multistarted local search.
//! Mean and covariance functions are composable with `+` and `*`, and every
//! hyperparameter carries bounds, an optional hyperprior and a fixed flag
//! controlling whether training may move it.
//!
//! GP models are implemented by [GaussianProcess] parameterized by [GpParams].
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod errors;
pub mod hyperparameters;
mod inference;
pub mod kernels;
mod likelihood;
pub mod mean_models;

mod parameters;
mod utils;

mod optimization;

pub use algorithm::*;
pub use errors::*;
pub use hyperparameters::{Parameter, Prior};
pub use inference::*;
pub use kernels::Kernel;
pub use likelihood::*;
pub use mean_models::Mean;
pub use parameters::*;
